//! Creating and consuming data in wire format.

use bytes::{BufMut, Bytes, BytesMut};
use core::fmt;

//------------ Parser --------------------------------------------------------

/// A bounds-checked cursor over the octets of a message.
///
/// The parser always holds the complete message so that compressed domain
/// names can follow their pointers, and keeps a current read position that
/// only ever moves forward through the parse methods.
#[derive(Clone, Debug)]
pub struct Parser<'a> {
    /// The complete message.
    octets: &'a [u8],

    /// The current read position.
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser positioned at the start of the message.
    pub fn new(octets: &'a [u8]) -> Self {
        Parser { octets, pos: 0 }
    }

    /// Creates a parser positioned at `pos`.
    pub fn with_pos(octets: &'a [u8], pos: usize) -> Result<Self, ParseError> {
        if pos > octets.len() {
            return Err(ParseError::ShortInput);
        }
        Ok(Parser { octets, pos })
    }

    /// Returns the complete underlying message.
    pub fn as_slice(&self) -> &'a [u8] {
        self.octets
    }

    /// Returns the current read position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Returns the number of octets left to parse.
    pub fn remaining(&self) -> usize {
        self.octets.len() - self.pos
    }

    /// Advances the position by `len` octets.
    pub fn advance(&mut self, len: usize) -> Result<(), ParseError> {
        if len > self.remaining() {
            return Err(ParseError::ShortInput);
        }
        self.pos += len;
        Ok(())
    }

    /// Takes the next `len` octets.
    pub fn parse_octets(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        if len > self.remaining() {
            return Err(ParseError::ShortInput);
        }
        let res = &self.octets[self.pos..self.pos + len];
        self.pos += len;
        Ok(res)
    }

    /// Takes the next octet.
    pub fn parse_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.parse_octets(1)?[0])
    }

    /// Takes the next big-endian 16 bit integer.
    pub fn parse_u16_be(&mut self) -> Result<u16, ParseError> {
        let octets = self.parse_octets(2)?;
        Ok(u16::from_be_bytes([octets[0], octets[1]]))
    }

    /// Takes the next big-endian 32 bit integer.
    pub fn parse_u32_be(&mut self) -> Result<u32, ParseError> {
        let octets = self.parse_octets(4)?;
        Ok(u32::from_be_bytes([
            octets[0], octets[1], octets[2], octets[3],
        ]))
    }

    /// Takes the next big-endian 48 bit integer.
    pub fn parse_u48_be(&mut self) -> Result<u64, ParseError> {
        let octets = self.parse_octets(6)?;
        let mut res = 0u64;
        for ch in octets {
            res = res << 8 | u64::from(*ch);
        }
        Ok(res)
    }
}

//------------ Composer ------------------------------------------------------

/// A growable byte buffer that enforces a wire-format length limit.
///
/// All appends are checked against the limit negotiated for the transport
/// the message is intended for. An append that would exceed the limit fails
/// with a [`TruncationError`] and leaves the buffer untouched.
#[derive(Clone, Debug)]
pub struct Composer {
    /// The message assembled so far.
    target: BytesMut,

    /// Maximum length of the assembled message.
    limit: usize,
}

impl Composer {
    /// Creates a new composer with the given length limit.
    pub fn with_limit(limit: usize) -> Self {
        Composer {
            target: BytesMut::new(),
            limit,
        }
    }

    /// Returns the length of the message assembled so far.
    pub fn len(&self) -> usize {
        self.target.len()
    }

    /// Returns whether nothing has been composed yet.
    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Returns the message assembled so far.
    pub fn as_slice(&self) -> &[u8] {
        self.target.as_ref()
    }

    /// Returns the message assembled so far for modification.
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        self.target.as_mut()
    }

    /// Appends a slice of octets.
    pub fn append_slice(&mut self, slice: &[u8]) -> Result<(), TruncationError> {
        if self.target.len() + slice.len() > self.limit {
            return Err(TruncationError);
        }
        self.target.put_slice(slice);
        Ok(())
    }

    /// Appends a single octet.
    pub fn append_u8(&mut self, value: u8) -> Result<(), TruncationError> {
        self.append_slice(&[value])
    }

    /// Appends a big-endian 16 bit integer.
    pub fn append_u16_be(&mut self, value: u16) -> Result<(), TruncationError> {
        self.append_slice(&value.to_be_bytes())
    }

    /// Appends a big-endian 32 bit integer.
    pub fn append_u32_be(&mut self, value: u32) -> Result<(), TruncationError> {
        self.append_slice(&value.to_be_bytes())
    }

    /// Appends a big-endian 48 bit integer.
    ///
    /// The upper 16 bits of `value` must be zero.
    pub fn append_u48_be(&mut self, value: u64) -> Result<(), TruncationError> {
        crate::invariant!(value >> 48 == 0, "48 bit value overflows");
        self.append_slice(&value.to_be_bytes()[2..])
    }

    /// Composes data prefixed by its 16 bit length.
    ///
    /// The closure appends the data; afterwards the length field in front of
    /// it is patched with the number of octets actually appended. If the
    /// closure fails, the buffer is rolled back to its previous state.
    pub fn append_len_prefixed<F>(&mut self, op: F) -> Result<(), TruncationError>
    where
        F: FnOnce(&mut Composer) -> Result<(), TruncationError>,
    {
        self.append_slice(&[0; 2])?;
        let pos = self.target.len();
        match op(self) {
            Ok(()) => {
                let len = u16::try_from(self.target.len() - pos)
                    .map_err(|_| TruncationError)?;
                self.target[pos - 2..pos].copy_from_slice(&len.to_be_bytes());
                Ok(())
            }
            Err(err) => {
                self.target.truncate(pos - 2);
                Err(err)
            }
        }
    }

    /// Rolls the buffer back to the given length.
    pub fn truncate(&mut self, len: usize) {
        self.target.truncate(len)
    }

    /// Finishes composing, returning the message octets.
    pub fn freeze(self) -> Bytes {
        self.target.freeze()
    }
}

//============ Error Types ===================================================

//------------ ParseError ----------------------------------------------------

/// An error happened while parsing wire data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The data ended before parsing was complete.
    ShortInput,

    /// The data violated the wire format.
    Form(&'static str),
}

//--- Display and Error

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParseError::ShortInput => f.write_str("unexpected end of input"),
            ParseError::Form(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ParseError {}

//------------ TruncationError -----------------------------------------------

/// Composed data would have exceeded the message length limit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TruncationError;

//--- Display and Error

impl fmt::Display for TruncationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("message length limit exceeded")
    }
}

impl std::error::Error for TruncationError {}

//============ Tests =========================================================
