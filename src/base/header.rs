//! The header of a DNS message.

use super::iana::{Opcode, Rcode};
use super::wire::{Composer, ParseError, Parser, TruncationError};

/// The length of a message header in wire format.
pub const HEADER_LEN: usize = 12;

//------------ Header --------------------------------------------------------

/// The first four octets of a message: ID and flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Header {
    /// The transaction ID.
    id: u16,

    /// The flags word: QR, opcode, AA, TC, RD, RA, Z, rcode.
    flags: u16,
}

impl Header {
    /// Creates a header with everything zero.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the transaction ID.
    pub fn id(self) -> u16 {
        self.id
    }

    /// Sets the transaction ID.
    pub fn set_id(&mut self, id: u16) {
        self.id = id
    }

    /// Returns whether the message is a response.
    pub fn qr(self) -> bool {
        self.flags & 0x8000 != 0
    }

    /// Sets whether the message is a response.
    pub fn set_qr(&mut self, qr: bool) {
        self.set_flag(0x8000, qr)
    }

    /// Returns the opcode.
    pub fn opcode(self) -> Opcode {
        Opcode::from_int(((self.flags >> 11) & 0x0F) as u8)
    }

    /// Sets the opcode.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.flags =
            self.flags & !0x7800 | (u16::from(opcode.to_int()) << 11);
    }

    /// Returns whether the message was truncated.
    pub fn tc(self) -> bool {
        self.flags & 0x0200 != 0
    }

    /// Sets the truncation flag.
    pub fn set_tc(&mut self, tc: bool) {
        self.set_flag(0x0200, tc)
    }

    /// Returns the response code.
    pub fn rcode(self) -> Rcode {
        Rcode::from_int((self.flags & 0x0F) as u8)
    }

    /// Sets the response code.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.flags = self.flags & !0x0F | u16::from(rcode.to_int());
    }

    /// Sets or clears the given flag bit.
    fn set_flag(&mut self, mask: u16, value: bool) {
        if value {
            self.flags |= mask
        } else {
            self.flags &= !mask
        }
    }

    /// Parses the first four header octets.
    pub fn parse(parser: &mut Parser) -> Result<Self, ParseError> {
        Ok(Header {
            id: parser.parse_u16_be()?,
            flags: parser.parse_u16_be()?,
        })
    }

    /// Appends the first four header octets.
    pub fn compose(self, target: &mut Composer) -> Result<(), TruncationError> {
        target.append_u16_be(self.id)?;
        target.append_u16_be(self.flags)
    }
}

//------------ HeaderCounts --------------------------------------------------

/// The four section counts of a message header.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HeaderCounts {
    /// The number of questions.
    pub qdcount: u16,

    /// The number of answer records.
    pub ancount: u16,

    /// The number of authority records.
    pub nscount: u16,

    /// The number of additional records.
    pub arcount: u16,
}

impl HeaderCounts {
    /// Parses the count fields.
    pub fn parse(parser: &mut Parser) -> Result<Self, ParseError> {
        Ok(HeaderCounts {
            qdcount: parser.parse_u16_be()?,
            ancount: parser.parse_u16_be()?,
            nscount: parser.parse_u16_be()?,
            arcount: parser.parse_u16_be()?,
        })
    }

    /// Appends the count fields.
    pub fn compose(self, target: &mut Composer) -> Result<(), TruncationError> {
        target.append_u16_be(self.qdcount)?;
        target.append_u16_be(self.ancount)?;
        target.append_u16_be(self.nscount)?;
        target.append_u16_be(self.arcount)
    }
}

//============ Tests =========================================================
