//! The fixed 12-byte DNS message header.

use crate::error::{Error, Result};
use crate::rcode::Rcode;
use crate::wire::{Cursor, Emitter};

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const OPCODE_SHIFT: u16 = 11;
const OPCODE_MASK: u16 = 0x7800;

/// Parsed DNS header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Message identifier echoed between query and response.
    pub id: u16,
    /// Flag and code bits, stored packed.
    flags: u16,
    /// Question count.
    pub qdcount: u16,
    /// Answer record count.
    pub ancount: u16,
    /// Authority record count.
    pub nscount: u16,
    /// Additional record count.
    pub arcount: u16,
}

impl Header {
    /// Parses a header from the front of a message.
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        if cur.message().len() < 12 {
            return Err(Error::ShortMessage {
                length: cur.message().len(),
            });
        }
        Ok(Self {
            id: cur.u16()?,
            flags: cur.u16()?,
            qdcount: cur.u16()?,
            ancount: cur.u16()?,
            nscount: cur.u16()?,
            arcount: cur.u16()?,
        })
    }

    /// Writes the header.
    pub fn emit(&self, out: &mut Emitter) -> Result<()> {
        out.u16(self.id)?;
        out.u16(self.flags)?;
        out.u16(self.qdcount)?;
        out.u16(self.ancount)?;
        out.u16(self.nscount)?;
        out.u16(self.arcount)
    }

    /// True when the message is a response.
    pub fn qr(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    /// Sets or clears the response bit.
    pub fn set_qr(&mut self, on: bool) {
        self.set(FLAG_QR, on);
    }

    /// Authoritative answer bit.
    pub fn aa(&self) -> bool {
        self.flags & FLAG_AA != 0
    }

    /// Sets or clears the authoritative answer bit.
    pub fn set_aa(&mut self, on: bool) {
        self.set(FLAG_AA, on);
    }

    /// Truncation bit.
    pub fn tc(&self) -> bool {
        self.flags & FLAG_TC != 0
    }

    /// Sets or clears the truncation bit.
    pub fn set_tc(&mut self, on: bool) {
        self.set(FLAG_TC, on);
    }

    /// Recursion desired bit.
    pub fn rd(&self) -> bool {
        self.flags & FLAG_RD != 0
    }

    /// Sets or clears the recursion desired bit.
    pub fn set_rd(&mut self, on: bool) {
        self.set(FLAG_RD, on);
    }

    /// Recursion available bit.
    pub fn ra(&self) -> bool {
        self.flags & FLAG_RA != 0
    }

    /// Sets or clears the recursion available bit.
    pub fn set_ra(&mut self, on: bool) {
        self.set(FLAG_RA, on);
    }

    /// Operation code (0 = QUERY).
    pub fn opcode(&self) -> u8 {
        ((self.flags & OPCODE_MASK) >> OPCODE_SHIFT) as u8
    }

    /// Sets the operation code.
    pub fn set_opcode(&mut self, opcode: u8) {
        self.flags = (self.flags & !OPCODE_MASK) | ((u16::from(opcode) << OPCODE_SHIFT) & OPCODE_MASK);
    }

    /// Response code from the low header bits.
    pub fn rcode(&self) -> Rcode {
        Rcode::from_u8((self.flags & 0x0F) as u8)
    }

    /// Sets the response code bits.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.flags = (self.flags & !0x0F) | u16::from(rcode.to_u8());
    }

    fn set(&mut self, flag: u16, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}
