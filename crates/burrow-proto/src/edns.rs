//! EDNS(0) support (RFC 6891).

use crate::class::RClass;
use crate::name::Name;
use crate::record::Record;
use crate::rtype::RType;
use bytes::Bytes;

/// Flag bit for DNSSEC OK in the OPT TTL field.
const DO_BIT: u32 = 0x8000_0000;

/// Decoded OPT pseudo-record state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edns {
    /// Advertised UDP payload size.
    pub payload: u16,
    /// Extended RCODE high bits.
    pub ext_rcode: u8,
    /// EDNS version (0).
    pub version: u8,
    /// DNSSEC OK flag.
    pub do_bit: bool,
    /// Raw options, passed through untouched.
    pub options: Bytes,
}

impl Edns {
    /// A plain EDNS(0) marker advertising `payload` bytes.
    pub fn with_payload(payload: u16) -> Self {
        Self {
            payload,
            ext_rcode: 0,
            version: 0,
            do_bit: false,
            options: Bytes::new(),
        }
    }

    /// Decodes from an OPT record, if it is one.
    pub fn from_record(rec: &Record) -> Option<Self> {
        if rec.rtype != RType::Opt {
            return None;
        }
        Some(Self {
            payload: rec.rclass.to_u16(),
            ext_rcode: (rec.ttl >> 24) as u8,
            version: (rec.ttl >> 16) as u8,
            do_bit: rec.ttl & DO_BIT != 0,
            options: rec.rdata.clone(),
        })
    }

    /// Encodes back into an OPT record for the additional section.
    pub fn to_record(&self) -> Record {
        let mut ttl = (u32::from(self.ext_rcode) << 24) | (u32::from(self.version) << 16);
        if self.do_bit {
            ttl |= DO_BIT;
        }
        Record::new(
            Name::root(),
            RType::Opt,
            RClass::from_u16(self.payload),
            ttl,
            self.options.clone(),
        )
    }
}
