//! DNS message parsing and serialization.

use crate::class::RClass;
use crate::edns::Edns;
use crate::error::{Error, Result};
use crate::header::Header;
use crate::name::Name;
use crate::question::Question;
use crate::record::Record;
use crate::rtype::RType;
use crate::wire::{Cursor, Emitter};
use bytes::Bytes;

/// Byte offsets of header fields, used when patching counts after emit.
const OFF_FLAGS: usize = 2;
const OFF_QDCOUNT: usize = 4;
const OFF_ANCOUNT: usize = 6;
const OFF_NSCOUNT: usize = 8;
const OFF_ARCOUNT: usize = 10;

/// A parsed or under-construction DNS message.
///
/// The OPT and TSIG pseudo-records are lifted out of the additional section
/// at parse time and re-appended (in that order, TSIG last) on emit.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Header bits. Section counts are recomputed on emit.
    pub header: Header,
    questions: Vec<Question>,
    answers: Vec<Record>,
    authorities: Vec<Record>,
    additionals: Vec<Record>,
    edns: Option<Edns>,
    tsig: Option<Record>,
}

impl Message {
    /// Builds a query message around one question.
    pub fn query(question: Question) -> Self {
        let mut msg = Self::default();
        msg.questions.push(question);
        msg
    }

    /// Builds the skeleton of a response to `query`: id, question and RD
    /// are copied, QR is set.
    pub fn response_to(query: &Self) -> Self {
        let mut msg = Self::default();
        msg.header.id = query.header.id;
        msg.header.set_qr(true);
        msg.header.set_rd(query.header.rd());
        msg.questions = query.questions.clone();
        msg
    }

    /// Parses a message from wire bytes.
    ///
    /// The whole buffer must be consumed; trailing garbage is an error so
    /// that short TCP frames are caught instead of silently accepted.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(buf);
        let header = Header::parse(&mut cur)?;

        let mut msg = Self {
            header,
            ..Self::default()
        };

        for _ in 0..header.qdcount {
            msg.questions.push(Question::parse(&mut cur)?);
        }
        for _ in 0..header.ancount {
            msg.answers.push(Record::parse(&mut cur)?);
        }
        for _ in 0..header.nscount {
            msg.authorities.push(Record::parse(&mut cur)?);
        }
        for _ in 0..header.arcount {
            let rec = Record::parse(&mut cur)?;
            match rec.rtype {
                RType::Opt => {
                    if msg.edns.is_some() {
                        return Err(Error::DuplicateOpt);
                    }
                    msg.edns = Edns::from_record(&rec);
                }
                RType::Tsig => msg.tsig = Some(rec),
                _ => msg.additionals.push(rec),
            }
        }

        if !cur.is_exhausted() {
            return Err(Error::Malformed {
                offset: cur.position(),
                reason: "trailing bytes after last section",
            });
        }
        Ok(msg)
    }

    /// Serializes the message, truncating to `limit` bytes.
    ///
    /// When an answer or authority record does not fit, the TC bit is set
    /// and the section is cut short; additional records are dropped
    /// silently. The OPT and TSIG trailers are always given room.
    pub fn to_wire(&self, limit: usize) -> Result<Bytes> {
        let trailer: usize = self.edns.as_ref().map(|e| e.to_record().wire_len()).unwrap_or(0)
            + self.tsig.as_ref().map(Record::wire_len).unwrap_or(0);

        let mut out = Emitter::new(limit);
        let mut header = self.header;
        header.qdcount = 0;
        header.ancount = 0;
        header.nscount = 0;
        header.arcount = 0;
        header.emit(&mut out)?;

        for q in &self.questions {
            q.emit(&mut out)?;
        }

        let mut truncated = false;
        let mut counts = [0u16; 3];
        for (idx, section) in [&self.answers, &self.authorities, &self.additionals]
            .into_iter()
            .enumerate()
        {
            for rec in section {
                if truncated || out.len() + rec.wire_len() + trailer > limit {
                    if idx < 2 {
                        truncated = true;
                    }
                    break;
                }
                rec.emit(&mut out)?;
                counts[idx] += 1;
            }
        }

        let mut arcount = counts[2];
        if let Some(edns) = &self.edns {
            edns.to_record().emit(&mut out)?;
            arcount += 1;
        }
        if let Some(tsig) = &self.tsig {
            tsig.emit(&mut out)?;
            arcount += 1;
        }

        let mut flags_hdr = self.header;
        if truncated {
            flags_hdr.set_tc(true);
        }
        // Re-emit flags and real counts over the placeholder header.
        let mut patch = Emitter::new(12);
        flags_hdr.emit(&mut patch)?;
        out.patch(OFF_FLAGS, &patch.as_slice()[OFF_FLAGS..OFF_QDCOUNT]);
        out.patch(OFF_QDCOUNT, &(self.questions.len() as u16).to_be_bytes());
        out.patch(OFF_ANCOUNT, &counts[0].to_be_bytes());
        out.patch(OFF_NSCOUNT, &counts[1].to_be_bytes());
        out.patch(OFF_ARCOUNT, &arcount.to_be_bytes());

        Ok(out.finish())
    }

    /// The first (and in practice only) question.
    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Replaces the question section.
    pub fn set_question(&mut self, question: Question) {
        self.questions.clear();
        self.questions.push(question);
    }

    /// Answer section records.
    pub fn answers(&self) -> &[Record] {
        &self.answers
    }

    /// Authority section records.
    pub fn authorities(&self) -> &[Record] {
        &self.authorities
    }

    /// Additional section records, OPT and TSIG excluded.
    pub fn additionals(&self) -> &[Record] {
        &self.additionals
    }

    /// Appends an answer record.
    pub fn add_answer(&mut self, rec: Record) {
        self.answers.push(rec);
    }

    /// Appends an authority record.
    pub fn add_authority(&mut self, rec: Record) {
        self.authorities.push(rec);
    }

    /// Appends an additional record.
    pub fn add_additional(&mut self, rec: Record) {
        self.additionals.push(rec);
    }

    /// EDNS state, when present.
    pub fn edns(&self) -> Option<&Edns> {
        self.edns.as_ref()
    }

    /// Attaches or replaces the EDNS state.
    pub fn set_edns(&mut self, edns: Edns) {
        self.edns = Some(edns);
    }

    /// The TSIG trailer, when present.
    pub fn tsig(&self) -> Option<&Record> {
        self.tsig.as_ref()
    }

    /// Attaches a TSIG trailer (echoed on answers, never forwarded).
    pub fn set_tsig(&mut self, tsig: Option<Record>) {
        self.tsig = tsig;
    }

    /// Convenience: the queried name.
    pub fn qname(&self) -> Option<&Name> {
        self.question().map(|q| &q.qname)
    }

    /// True for responses (QR set).
    pub fn is_response(&self) -> bool {
        self.header.qr()
    }

    /// True when the TC bit is set.
    pub fn is_truncated(&self) -> bool {
        self.header.tc()
    }

    /// True for an NXDOMAIN response.
    pub fn is_nxdomain(&self) -> bool {
        self.header.rcode() == crate::rcode::Rcode::NxDomain
    }

    /// True for a NOERROR response carrying no answers and no delegation.
    pub fn is_nodata(&self) -> bool {
        self.header.rcode() == crate::rcode::Rcode::NoError
            && self.answers.is_empty()
            && !self.is_referral()
    }

    /// True for a downward referral: no answers, not authoritative, and
    /// NS records in the authority section.
    pub fn is_referral(&self) -> bool {
        self.answers.is_empty()
            && !self.header.aa()
            && self.authorities.iter().any(|r| r.rtype == RType::Ns)
    }
}

/// Gathers all distinct `(owner, rtype)` pairs of a section in order.
pub fn section_rrsets(records: &[Record]) -> Vec<(Name, RType, RClass)> {
    let mut seen: Vec<(Name, RType, RClass)> = Vec::new();
    for rec in records {
        if rec.rtype == RType::Opt || rec.rtype == RType::Tsig {
            continue;
        }
        if !seen.iter().any(|(n, t, _)| *t == rec.rtype && n == &rec.owner) {
            seen.push((rec.owner.clone(), rec.rtype, rec.rclass));
        }
    }
    seen
}
