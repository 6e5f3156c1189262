//! Resource record types.

use std::fmt;

/// A DNS RR type.
///
/// Only the types the resolver routes on get named variants; everything
/// else is carried through opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RType {
    /// IPv4 address.
    #[default]
    A,
    /// Authoritative nameserver.
    Ns,
    /// Canonical name alias.
    Cname,
    /// Start of authority.
    Soa,
    /// Domain pointer.
    Ptr,
    /// Mail exchange.
    Mx,
    /// Text strings.
    Txt,
    /// IPv6 address.
    Aaaa,
    /// EDNS(0) pseudo record.
    Opt,
    /// Delegation signer.
    Ds,
    /// RRset signature.
    Rrsig,
    /// Next secure record.
    Nsec,
    /// DNSSEC public key.
    Dnskey,
    /// Transaction signature.
    Tsig,
    /// Query for any type.
    Any,
    /// Any other type, by number.
    Other(u16),
}

impl RType {
    /// Decodes from the wire value.
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            6 => Self::Soa,
            12 => Self::Ptr,
            15 => Self::Mx,
            16 => Self::Txt,
            28 => Self::Aaaa,
            41 => Self::Opt,
            43 => Self::Ds,
            46 => Self::Rrsig,
            47 => Self::Nsec,
            48 => Self::Dnskey,
            250 => Self::Tsig,
            255 => Self::Any,
            other => Self::Other(other),
        }
    }

    /// Encodes to the wire value.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Ns => 2,
            Self::Cname => 5,
            Self::Soa => 6,
            Self::Ptr => 12,
            Self::Mx => 15,
            Self::Txt => 16,
            Self::Aaaa => 28,
            Self::Opt => 41,
            Self::Ds => 43,
            Self::Rrsig => 46,
            Self::Nsec => 47,
            Self::Dnskey => 48,
            Self::Tsig => 250,
            Self::Any => 255,
            Self::Other(v) => v,
        }
    }

    /// True for types whose rdata starts with (or is) a domain name that
    /// may arrive compressed and must be rewritten on capture.
    pub fn rdata_has_name(self) -> bool {
        matches!(self, Self::Ns | Self::Cname | Self::Soa | Self::Ptr | Self::Mx)
    }

    /// True for the address types a zone cut needs.
    pub fn is_address(self) -> bool {
        matches!(self, Self::A | Self::Aaaa)
    }
}

impl fmt::Display for RType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::Ns => f.write_str("NS"),
            Self::Cname => f.write_str("CNAME"),
            Self::Soa => f.write_str("SOA"),
            Self::Ptr => f.write_str("PTR"),
            Self::Mx => f.write_str("MX"),
            Self::Txt => f.write_str("TXT"),
            Self::Aaaa => f.write_str("AAAA"),
            Self::Opt => f.write_str("OPT"),
            Self::Ds => f.write_str("DS"),
            Self::Rrsig => f.write_str("RRSIG"),
            Self::Nsec => f.write_str("NSEC"),
            Self::Dnskey => f.write_str("DNSKEY"),
            Self::Tsig => f.write_str("TSIG"),
            Self::Any => f.write_str("ANY"),
            Self::Other(v) => write!(f, "TYPE{}", v),
        }
    }
}
