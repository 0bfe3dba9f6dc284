//! The enumerated protocol parameters used by the negotiation subsystem.
//!
//! Each parameter is a thin wrapper around its wire integer with associated
//! constants for the values this crate cares about. Unknown values survive
//! a parse–compose round trip unchanged.

use core::fmt;

//------------ Opcode --------------------------------------------------------

/// The operation code of a message.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Opcode(u8);

impl Opcode {
    /// A standard query.
    pub const QUERY: Opcode = Opcode(0);

    /// Creates an opcode from its wire value.
    pub const fn from_int(value: u8) -> Self {
        Opcode(value & 0x0F)
    }

    /// Returns the wire value.
    pub const fn to_int(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Opcode::QUERY => f.write_str("QUERY"),
            Opcode(value) => write!(f, "OPCODE{}", value),
        }
    }
}

//------------ Rcode ---------------------------------------------------------

/// The response code of a message header.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Rcode(u8);

impl Rcode {
    /// No error condition.
    pub const NOERROR: Rcode = Rcode(0);

    /// The server was unable to interpret the query.
    pub const FORMERR: Rcode = Rcode(1);

    /// The server encountered an internal failure.
    pub const SERVFAIL: Rcode = Rcode(2);

    /// The queried domain name does not exist.
    pub const NXDOMAIN: Rcode = Rcode(3);

    /// The requested kind of query is not implemented.
    pub const NOTIMP: Rcode = Rcode(4);

    /// The server refuses to answer for policy reasons.
    pub const REFUSED: Rcode = Rcode(5);

    /// The server is not authorized to answer, also used for TSIG errors.
    pub const NOTAUTH: Rcode = Rcode(9);

    /// Creates a response code from its wire value.
    pub const fn from_int(value: u8) -> Self {
        Rcode(value & 0x0F)
    }

    /// Returns the wire value.
    pub const fn to_int(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Rcode::NOERROR => f.write_str("NOERROR"),
            Rcode::FORMERR => f.write_str("FORMERR"),
            Rcode::SERVFAIL => f.write_str("SERVFAIL"),
            Rcode::NXDOMAIN => f.write_str("NXDOMAIN"),
            Rcode::NOTIMP => f.write_str("NOTIMP"),
            Rcode::REFUSED => f.write_str("REFUSED"),
            Rcode::NOTAUTH => f.write_str("NOTAUTH"),
            Rcode(value) => write!(f, "RCODE{}", value),
        }
    }
}

//------------ Rtype ---------------------------------------------------------

/// A resource record type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Rtype(u16);

impl Rtype {
    /// A key record.
    pub const KEY: Rtype = Rtype(25);

    /// A transaction key record.
    pub const TKEY: Rtype = Rtype(249);

    /// A transaction signature record.
    pub const TSIG: Rtype = Rtype(250);

    /// Creates a record type from its wire value.
    pub const fn from_int(value: u16) -> Self {
        Rtype(value)
    }

    /// Returns the wire value.
    pub const fn to_int(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rtype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Rtype::KEY => f.write_str("KEY"),
            Rtype::TKEY => f.write_str("TKEY"),
            Rtype::TSIG => f.write_str("TSIG"),
            Rtype(value) => write!(f, "TYPE{}", value),
        }
    }
}

//------------ Class ---------------------------------------------------------

/// A resource record class.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Class(u16);

impl Class {
    /// The Internet class.
    pub const IN: Class = Class(1);

    /// The `NONE` class used in dynamic update.
    pub const NONE: Class = Class(254);

    /// The `ANY` class used by TKEY and TSIG records.
    pub const ANY: Class = Class(255);

    /// Creates a class from its wire value.
    pub const fn from_int(value: u16) -> Self {
        Class(value)
    }

    /// Returns the wire value.
    pub const fn to_int(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Class::IN => f.write_str("IN"),
            Class::NONE => f.write_str("NONE"),
            Class::ANY => f.write_str("ANY"),
            Class(value) => write!(f, "CLASS{}", value),
        }
    }
}

//------------ TsigRcode -----------------------------------------------------

/// An extended response code as used by TSIG and TKEY record data.
///
/// These are 16 bit values. The lower range coincides with the message
/// header's [`Rcode`]; the values from 16 on are specific to the TSIG and
/// TKEY mechanisms.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TsigRcode(u16);

impl TsigRcode {
    /// No error condition.
    pub const NOERROR: TsigRcode = TsigRcode(0);

    /// The TSIG signature failed to verify.
    pub const BADSIG: TsigRcode = TsigRcode(16);

    /// The key used is not recognized by the server.
    pub const BADKEY: TsigRcode = TsigRcode(17);

    /// The time signed lies outside the allowed window.
    pub const BADTIME: TsigRcode = TsigRcode(18);

    /// The TKEY mode is not supported.
    pub const BADMODE: TsigRcode = TsigRcode(19);

    /// The proposed key name is not acceptable.
    pub const BADNAME: TsigRcode = TsigRcode(20);

    /// The proposed algorithm is not supported.
    pub const BADALG: TsigRcode = TsigRcode(21);

    /// The MAC is truncated below the acceptable minimum.
    pub const BADTRUNC: TsigRcode = TsigRcode(22);

    /// Creates an extended response code from its wire value.
    pub const fn from_int(value: u16) -> Self {
        TsigRcode(value)
    }

    /// Returns the wire value.
    pub const fn to_int(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TsigRcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TsigRcode::NOERROR => f.write_str("NOERROR"),
            TsigRcode::BADSIG => f.write_str("BADSIG"),
            TsigRcode::BADKEY => f.write_str("BADKEY"),
            TsigRcode::BADTIME => f.write_str("BADTIME"),
            TsigRcode::BADMODE => f.write_str("BADMODE"),
            TsigRcode::BADNAME => f.write_str("BADNAME"),
            TsigRcode::BADALG => f.write_str("BADALG"),
            TsigRcode::BADTRUNC => f.write_str("BADTRUNC"),
            TsigRcode(value) => write!(f, "RCODE{}", value),
        }
    }
}

//------------ TkeyMode ------------------------------------------------------

/// The mode of a TKEY exchange.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TkeyMode(u16);

impl TkeyMode {
    /// The server assigns the key.
    pub const SERVER_ASSIGNMENT: TkeyMode = TkeyMode(1);

    /// Diffie-Hellman key agreement.
    pub const DIFFIE_HELLMAN: TkeyMode = TkeyMode(2);

    /// GSS-API negotiation.
    pub const GSS_API: TkeyMode = TkeyMode(3);

    /// The resolver assigns the key.
    pub const RESOLVER_ASSIGNMENT: TkeyMode = TkeyMode(4);

    /// An existing key is deleted.
    pub const KEY_DELETION: TkeyMode = TkeyMode(5);

    /// Creates a mode from its wire value.
    pub const fn from_int(value: u16) -> Self {
        TkeyMode(value)
    }

    /// Returns the wire value.
    pub const fn to_int(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TkeyMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TkeyMode::SERVER_ASSIGNMENT => f.write_str("server assignment"),
            TkeyMode::DIFFIE_HELLMAN => f.write_str("Diffie-Hellman"),
            TkeyMode::GSS_API => f.write_str("GSS-API"),
            TkeyMode::RESOLVER_ASSIGNMENT => f.write_str("resolver assignment"),
            TkeyMode::KEY_DELETION => f.write_str("key deletion"),
            TkeyMode(value) => write!(f, "MODE{}", value),
        }
    }
}
