//! Resource records and RRSets.
//!
//! Rdata is kept as opaque bytes; the resolver only interprets the handful
//! of types it routes on (addresses, NS/CNAME targets, SOA minimum), and
//! the cache stores rdata verbatim. Names embedded in rdata are rewritten
//! to uncompressed form at parse time so records stay self-contained.

use crate::class::RClass;
use crate::error::Result;
use crate::name::Name;
use crate::rtype::RType;
use crate::wire::{Cursor, Emitter};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// One resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Owner name.
    pub owner: Name,
    /// Record type.
    pub rtype: RType,
    /// Record class (carries the payload size for OPT).
    pub rclass: RClass,
    /// Time to live in seconds (flags for OPT).
    pub ttl: u32,
    /// Uncompressed rdata.
    pub rdata: Bytes,
}

impl Record {
    /// Creates a record from parts.
    pub fn new(owner: Name, rtype: RType, rclass: RClass, ttl: u32, rdata: Bytes) -> Self {
        Self { owner, rtype, rclass, ttl, rdata }
    }

    /// Builds an `IN A` record.
    pub fn a(owner: Name, ttl: u32, addr: Ipv4Addr) -> Self {
        Self::new(owner, RType::A, RClass::In, ttl, Bytes::copy_from_slice(&addr.octets()))
    }

    /// Builds an `IN AAAA` record.
    pub fn aaaa(owner: Name, ttl: u32, addr: Ipv6Addr) -> Self {
        Self::new(owner, RType::Aaaa, RClass::In, ttl, Bytes::copy_from_slice(&addr.octets()))
    }

    /// Builds an `IN NS` record.
    pub fn ns(owner: Name, ttl: u32, target: &Name) -> Self {
        Self::new(owner, RType::Ns, RClass::In, ttl, Bytes::copy_from_slice(target.as_wire()))
    }

    /// Builds an `IN CNAME` record.
    pub fn cname(owner: Name, ttl: u32, target: &Name) -> Self {
        Self::new(owner, RType::Cname, RClass::In, ttl, Bytes::copy_from_slice(target.as_wire()))
    }

    /// Parses one record, rewriting compressed rdata names.
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let owner = Name::parse(cur)?;
        let rtype = RType::from_u16(cur.u16()?);
        let rclass = RClass::from_u16(cur.u16()?);
        let ttl = cur.u32()?;
        let rdlen = cur.u16()? as usize;
        let rdata_start = cur.position();
        let raw = cur.bytes(rdlen)?;

        let rdata = if rtype.rdata_has_name() {
            decompress_rdata(cur, rtype, rdata_start, rdlen)?
        } else {
            Bytes::copy_from_slice(raw)
        };

        Ok(Self { owner, rtype, rclass, ttl, rdata })
    }

    /// Writes the record. Rdata is emitted verbatim.
    pub fn emit(&self, out: &mut Emitter) -> Result<()> {
        self.owner.emit(out)?;
        out.u16(self.rtype.to_u16())?;
        out.u16(self.rclass.to_u16())?;
        out.u32(self.ttl)?;
        out.u16(self.rdata.len() as u16)?;
        out.bytes(&self.rdata)
    }

    /// Wire size of this record when emitted uncompressed.
    pub fn wire_len(&self) -> usize {
        self.owner.wire_len() + 10 + self.rdata.len()
    }

    /// Returns a copy with a different TTL.
    #[must_use]
    pub fn with_ttl(&self, ttl: u32) -> Self {
        let mut copy = self.clone();
        copy.ttl = ttl;
        copy
    }

    /// The address carried by an A or AAAA record.
    pub fn ip_addr(&self) -> Option<IpAddr> {
        match self.rtype {
            RType::A if self.rdata.len() == 4 => {
                let o: [u8; 4] = self.rdata[..].try_into().ok()?;
                Some(IpAddr::V4(Ipv4Addr::from(o)))
            }
            RType::Aaaa if self.rdata.len() == 16 => {
                let o: [u8; 16] = self.rdata[..].try_into().ok()?;
                Some(IpAddr::V6(Ipv6Addr::from(o)))
            }
            _ => None,
        }
    }

    /// The target name of an NS, CNAME or PTR record.
    pub fn name_target(&self) -> Option<Name> {
        match self.rtype {
            RType::Ns | RType::Cname | RType::Ptr => Name::from_wire(&self.rdata).ok(),
            _ => None,
        }
    }

    /// The MINIMUM field of a SOA record, used for negative TTLs.
    pub fn soa_minimum(&self) -> Option<u32> {
        if self.rtype != RType::Soa || self.rdata.len() < 4 {
            return None;
        }
        let tail = &self.rdata[self.rdata.len() - 4..];
        Some(u32::from_be_bytes(tail.try_into().ok()?))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} ({} bytes)",
            self.owner,
            self.ttl,
            self.rclass,
            self.rtype,
            self.rdata.len()
        )
    }
}

/// Rewrites rdata whose leading fields are names, expanding compression.
fn decompress_rdata(cur: &Cursor<'_>, rtype: RType, start: usize, rdlen: usize) -> Result<Bytes> {
    let mut inner = Cursor::new(cur.message());
    inner.seek(start);
    let mut out = BytesMut::with_capacity(rdlen);
    match rtype {
        RType::Ns | RType::Cname | RType::Ptr => {
            let target = Name::parse(&mut inner)?;
            out.extend_from_slice(target.as_wire());
        }
        RType::Mx => {
            out.put_u16(inner.u16()?);
            let target = Name::parse(&mut inner)?;
            out.extend_from_slice(target.as_wire());
        }
        RType::Soa => {
            let mname = Name::parse(&mut inner)?;
            let rname = Name::parse(&mut inner)?;
            out.extend_from_slice(mname.as_wire());
            out.extend_from_slice(rname.as_wire());
            // serial, refresh, retry, expire, minimum
            out.extend_from_slice(inner.bytes(20)?);
        }
        _ => unreachable!("decompress_rdata called for opaque type"),
    }
    Ok(out.freeze())
}

/// An RRSet: records sharing owner, class and type, with per-record TTLs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RrSet {
    /// Shared owner name.
    pub owner: Name,
    /// Shared record type.
    pub rtype: RType,
    /// Shared class.
    pub rclass: RClass,
    /// The member rdatas with their TTLs.
    pub items: Vec<RrItem>,
}

/// One member of an [`RrSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrItem {
    /// Remaining time to live.
    pub ttl: u32,
    /// Opaque rdata.
    pub data: Bytes,
}

impl RrSet {
    /// Creates an empty set.
    pub fn new(owner: Name, rtype: RType, rclass: RClass) -> Self {
        Self {
            owner,
            rtype,
            rclass,
            items: Vec::new(),
        }
    }

    /// Appends one rdata.
    pub fn push(&mut self, ttl: u32, data: Bytes) {
        self.items.push(RrItem { ttl, data });
    }

    /// True when the set holds no records.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// The largest member TTL, or zero for an empty set.
    pub fn max_ttl(&self) -> u32 {
        self.items.iter().map(|i| i.ttl).max().unwrap_or(0)
    }

    /// Expands the set into standalone records.
    pub fn to_records(&self) -> Vec<Record> {
        self.items
            .iter()
            .map(|i| Record::new(self.owner.clone(), self.rtype, self.rclass, i.ttl, i.data.clone()))
            .collect()
    }

    /// Collects records with matching owner and type into a set.
    pub fn gather<'a>(records: impl Iterator<Item = &'a Record>, owner: &Name, rtype: RType) -> Self {
        let mut set = Self::new(owner.clone(), rtype, RClass::In);
        for rec in records {
            if rec.rtype == rtype && rec.owner == *owner {
                set.rclass = rec.rclass;
                set.push(rec.ttl, rec.rdata.clone());
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let rec = Record::a("host.example.".parse().unwrap(), 300, Ipv4Addr::new(10, 0, 0, 1));
        let mut out = Emitter::new(128);
        rec.emit(&mut out).unwrap();
        let wire = out.finish();

        let mut cur = Cursor::new(&wire);
        let parsed = Record::parse(&mut cur).unwrap();
        assert_eq!(parsed, rec);
        assert_eq!(parsed.ip_addr(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(parsed.wire_len(), wire.len());
    }

    #[test]
    fn compressed_ns_target_is_expanded() {
        // Header, then "example." at offset 12, then an NS record whose
        // rdata is "ns1." + pointer back to "example.".
        let mut msg = vec![0u8; 12];
        msg.extend_from_slice(b"\x07example\x00");
        let rec_start = msg.len();
        msg.extend_from_slice(b"\x03sub\xC0\x0C"); // owner sub.example.
        msg.extend_from_slice(&2u16.to_be_bytes()); // NS
        msg.extend_from_slice(&1u16.to_be_bytes()); // IN
        msg.extend_from_slice(&3600u32.to_be_bytes());
        msg.extend_from_slice(&6u16.to_be_bytes()); // rdlen
        msg.extend_from_slice(b"\x03ns1\xC0\x0C");

        let mut cur = Cursor::new(&msg);
        cur.seek(rec_start);
        let rec = Record::parse(&mut cur).unwrap();
        assert_eq!(rec.owner.to_string(), "sub.example.");
        assert_eq!(rec.name_target().unwrap().to_string(), "ns1.example.");
    }

    #[test]
    fn soa_minimum_is_last_field() {
        let mut rdata = BytesMut::new();
        rdata.extend_from_slice(b"\x02ns\x00"); // mname
        rdata.extend_from_slice(b"\x04root\x00"); // rname
        rdata.extend_from_slice(&1u32.to_be_bytes()); // serial
        rdata.extend_from_slice(&7200u32.to_be_bytes()); // refresh
        rdata.extend_from_slice(&3600u32.to_be_bytes()); // retry
        rdata.extend_from_slice(&86400u32.to_be_bytes()); // expire
        rdata.extend_from_slice(&900u32.to_be_bytes()); // minimum
        let rec = Record::new(
            "example.".parse().unwrap(),
            RType::Soa,
            RClass::In,
            3600,
            rdata.freeze(),
        );
        assert_eq!(rec.soa_minimum(), Some(900));
    }

    #[test]
    fn rrset_gather_and_ttl() {
        let owner: Name = "example.com".parse().unwrap();
        let records = vec![
            Record::a(owner.clone(), 120, Ipv4Addr::new(192, 0, 2, 1)),
            Record::a(owner.clone(), 300, Ipv4Addr::new(192, 0, 2, 2)),
            Record::ns(owner.clone(), 900, &"ns.example.com".parse().unwrap()),
        ];
        let set = RrSet::gather(records.iter(), &owner, RType::A);
        assert_eq!(set.len(), 2);
        assert_eq!(set.max_ttl(), 300);
        assert!(RrSet::gather(records.iter(), &owner, RType::Aaaa).is_empty());
    }
}
