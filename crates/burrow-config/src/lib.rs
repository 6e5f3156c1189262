//! # burrow-config
//!
//! Declarative configuration for the burrow resolver. One struct tree
//! with serde defaults, loadable from YAML, TOML or JSON; everything the
//! daemon wires together at startup — listeners, resolver tunables,
//! cache sizing, trust anchors, logging — lives here instead of an
//! embedded scripting surface.

#![warn(missing_docs)]
#![warn(clippy::all)]

use burrow_proto::{Name, RType};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File access failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// YAML syntax error.
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON syntax error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML syntax error.
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value failed validation.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The configuration file does not exist.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server identity.
    pub server: ServerSection,
    /// Listening endpoints.
    pub listen: Vec<ListenSpec>,
    /// Iterator and worker tunables.
    pub resolver: ResolverSection,
    /// Record cache sizing.
    pub cache: CacheSection,
    /// Static trust anchors.
    pub trust_anchors: Vec<AnchorSpec>,
    /// Root server override; empty means the builtin IANA hints.
    pub hints: Vec<SocketAddr>,
    /// Logging setup.
    pub logging: LoggingSection,
}

/// Server identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Instance name used in logs.
    pub name: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "burrow".to_string(),
        }
    }
}

/// One listening endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenSpec {
    /// Address to bind; IPv6 is recognized by a colon.
    pub addr: String,
    /// Port to bind.
    pub port: u16,
    /// Serve UDP.
    pub udp: bool,
    /// Serve TCP.
    pub tcp: bool,
}

impl Default for ListenSpec {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 53,
            udp: true,
            tcp: true,
        }
    }
}

/// Iterator and worker tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSection {
    /// Iteration ceiling per client request.
    pub iter_limit: u16,
    /// EDNS payload advertised on sub-queries.
    pub edns_payload: u16,
    /// Datagram retransmission period, milliseconds.
    pub retry_ms: u64,
    /// Per-iteration I/O deadline, milliseconds.
    pub rtt_max_ms: u64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            iter_limit: 50,
            edns_payload: 4096,
            retry_ms: 250,
            rtt_max_ms: 2000,
        }
    }
}

/// Record cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Soft entry ceiling reported through the control surface.
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
        }
    }
}

/// One configured trust anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorSpec {
    /// Anchored name.
    pub name: String,
    /// Anchor record type: `DS` or `DNSKEY`.
    #[serde(default = "default_anchor_type")]
    pub rtype: String,
    /// Record TTL.
    #[serde(default = "default_anchor_ttl")]
    pub ttl: u32,
    /// Rdata as hex.
    pub rdata: String,
}

fn default_anchor_type() -> String {
    "DS".to_string()
}

fn default_anchor_ttl() -> u32 {
    172_800
}

impl AnchorSpec {
    /// Decodes the spec into resolver-facing values.
    pub fn decode(&self) -> Result<(Name, RType, u32, Vec<u8>)> {
        let name: Name = self.name.parse().map_err(|e| ConfigError::Invalid {
            field: "trust_anchors.name",
            message: format!("{e}"),
        })?;
        let rtype = match self.rtype.to_ascii_uppercase().as_str() {
            "DS" => RType::Ds,
            "DNSKEY" => RType::Dnskey,
            other => {
                return Err(ConfigError::Invalid {
                    field: "trust_anchors.rtype",
                    message: format!("{other} is not DS or DNSKEY"),
                })
            }
        };
        let rdata = data_encoding::HEXLOWER_PERMISSIVE
            .decode(self.rdata.replace(' ', "").to_ascii_lowercase().as_bytes())
            .map_err(|e| ConfigError::Invalid {
                field: "trust_anchors.rdata",
                message: format!("{e}"),
            })?;
        Ok((name, rtype, self.ttl, rdata))
    }
}

/// Logging setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Loads a configuration file, choosing the parser by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Parses a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.resolver.iter_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "resolver.iter_limit",
                message: "must be at least 1".to_string(),
            });
        }
        if usize::from(self.resolver.edns_payload) < burrow_proto::MIN_UDP_PAYLOAD {
            return Err(ConfigError::Invalid {
                field: "resolver.edns_payload",
                message: format!("must be at least {}", burrow_proto::MIN_UDP_PAYLOAD),
            });
        }
        if self.resolver.rtt_max_ms < self.resolver.retry_ms {
            return Err(ConfigError::Invalid {
                field: "resolver.rtt_max_ms",
                message: "deadline shorter than the retry period".to_string(),
            });
        }
        for spec in &self.listen {
            if !spec.udp && !spec.tcp {
                return Err(ConfigError::Invalid {
                    field: "listen",
                    message: format!("{}@{} serves neither udp nor tcp", spec.addr, spec.port),
                });
            }
        }
        for anchor in &self.trust_anchors {
            anchor.decode()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.resolver.iter_limit, 50);
        assert_eq!(config.resolver.edns_payload, 4096);
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = r#"
server:
  name: test-instance
listen:
  - addr: "127.0.0.1"
    port: 5353
    udp: true
    tcp: false
resolver:
  iter_limit: 20
trust_anchors:
  - name: "."
    rtype: DS
    rdata: "4f 66 0a"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.name, "test-instance");
        assert_eq!(config.listen.len(), 1);
        assert_eq!(config.listen[0].port, 5353);
        assert!(!config.listen[0].tcp);
        assert_eq!(config.resolver.iter_limit, 20);

        let (name, rtype, ttl, rdata) = config.trust_anchors[0].decode().unwrap();
        assert!(name.is_root());
        assert_eq!(rtype, RType::Ds);
        assert_eq!(ttl, 172_800);
        assert_eq!(rdata, vec![0x4f, 0x66, 0x0a]);
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut config = Config::default();
        config.resolver.iter_limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.resolver.edns_payload = 100;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trust_anchors.push(AnchorSpec {
            name: ".".to_string(),
            rtype: "A".to_string(),
            ttl: 60,
            rdata: "00".to_string(),
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trust_anchors.push(AnchorSpec {
            name: ".".to_string(),
            rtype: "DS".to_string(),
            ttl: 60,
            rdata: "zz".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_parses() {
        let toml = r#"
[server]
name = "alpha"

[[listen]]
addr = "::1"
port = 5300
udp = true
tcp = true

[resolver]
rtt_max_ms = 1500
retry_ms = 100
"#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.name, "alpha");
        assert_eq!(config.listen[0].addr, "::1");
        assert_eq!(config.resolver.rtt_max_ms, 1500);
    }
}
