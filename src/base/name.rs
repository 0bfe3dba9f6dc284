//! Domain names.
//!
//! The negotiation subsystem deals in absolute domain names only: key
//! names, owner names and the algorithm names embedded in TKEY and TSIG
//! record data. [`Name`] keeps a name in uncompressed wire format and
//! compares and hashes case-insensitively the way the DNS does.

use super::wire::{Composer, ParseError, Parser, TruncationError};
use bytes::Bytes;
use core::cmp::Ordering;
use core::hash::{Hash, Hasher};
use core::fmt;

/// The maximum length of a domain name in wire format.
const MAX_NAME_LEN: usize = 255;

/// The maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

//------------ Name ----------------------------------------------------------

/// An absolute domain name in uncompressed wire format.
#[derive(Clone)]
pub struct Name {
    /// The wire-format octets, always ending in the root label.
    octets: Bytes,
}

impl Name {
    /// Returns the root name.
    pub fn root() -> Self {
        Name {
            octets: Bytes::from_static(b"\0"),
        }
    }

    /// Creates a name from wire-format octets without checking them.
    ///
    /// This is only used within the crate for names that are known to be
    /// correctly formatted, such as the built-in algorithm names.
    pub(crate) fn from_wire_unchecked(octets: Bytes) -> Self {
        Name { octets }
    }

    /// Creates a name from its presentation format.
    ///
    /// The name is taken to be absolute whether or not it ends in a dot.
    /// Escapes are not supported; the negotiation protocol only ever deals
    /// in plain host-name-like labels.
    pub fn from_str(s: &str) -> Result<Self, NameError> {
        if s.is_empty() || s == "." {
            return Ok(Self::root());
        }
        let s = s.strip_suffix('.').unwrap_or(s);
        let mut octets = Vec::with_capacity(s.len() + 2);
        for label in s.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(NameError::BadLabel);
            }
            octets.push(label.len() as u8);
            octets.extend_from_slice(label.as_bytes());
        }
        octets.push(0);
        if octets.len() > MAX_NAME_LEN {
            return Err(NameError::LongName);
        }
        Ok(Name {
            octets: octets.into(),
        })
    }

    /// Creates a new name by prepending a label to this one.
    pub fn prepend_label(&self, label: &[u8]) -> Result<Self, NameError> {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(NameError::BadLabel);
        }
        let mut octets = Vec::with_capacity(self.octets.len() + label.len() + 1);
        octets.push(label.len() as u8);
        octets.extend_from_slice(label);
        octets.extend_from_slice(&self.octets);
        if octets.len() > MAX_NAME_LEN {
            return Err(NameError::LongName);
        }
        Ok(Name {
            octets: octets.into(),
        })
    }

    /// Returns the wire-format octets of the name.
    pub fn as_slice(&self) -> &[u8] {
        self.octets.as_ref()
    }

    /// Returns whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.octets.len() == 1
    }

    /// Returns an iterator over the labels of the name.
    ///
    /// The final root label is not included.
    pub fn iter_labels(&self) -> LabelIter {
        LabelIter {
            octets: self.octets.as_ref(),
        }
    }

    /// Appends the name in wire format.
    pub fn compose(&self, target: &mut Composer) -> Result<(), TruncationError> {
        target.append_slice(self.octets.as_ref())
    }

    /// Appends the name in canonical form: uncompressed and lowercased.
    pub fn compose_canonical(
        &self,
        target: &mut Composer,
    ) -> Result<(), TruncationError> {
        for label in self.iter_labels() {
            target.append_u8(label.len() as u8)?;
            for ch in label {
                target.append_u8(ch.to_ascii_lowercase())?;
            }
        }
        target.append_u8(0)
    }

    /// Parses a possibly compressed name out of a message.
    ///
    /// The parser must span the complete message so compression pointers
    /// can be followed. The returned name is stored uncompressed.
    pub fn parse(parser: &mut Parser) -> Result<Self, ParseError> {
        let mut octets = Vec::new();
        let mut pos = parser.pos();
        // The position right after the name at its original location. Only
        // set once the first compression pointer has been followed.
        let mut resume = None;
        let mut jumps = 0;
        loop {
            let mut cursor = Parser::with_pos(parser.as_slice(), pos)?;
            let ctrl = cursor.parse_u8()?;
            match ctrl {
                0 => {
                    octets.push(0);
                    if octets.len() > MAX_NAME_LEN {
                        return Err(ParseError::Form("long domain name"));
                    }
                    let end = resume.unwrap_or_else(|| cursor.pos());
                    parser.advance(end - parser.pos())?;
                    return Ok(Name {
                        octets: octets.into(),
                    });
                }
                len if len <= MAX_LABEL_LEN as u8 => {
                    octets.push(len);
                    octets.extend_from_slice(
                        cursor.parse_octets(len as usize)?,
                    );
                    pos = cursor.pos();
                }
                ctrl if ctrl & 0xC0 == 0xC0 => {
                    // Compression pointer. Pointers must point strictly
                    // backwards and their number is limited so a loop
                    // cannot stall parsing.
                    jumps += 1;
                    if jumps > 32 {
                        return Err(ParseError::Form("compression loop"));
                    }
                    let target = usize::from(ctrl & 0x3F) << 8
                        | usize::from(cursor.parse_u8()?);
                    if target >= pos {
                        return Err(ParseError::Form(
                            "forward compression pointer",
                        ));
                    }
                    if resume.is_none() {
                        resume = Some(cursor.pos());
                    }
                    pos = target;
                }
                _ => return Err(ParseError::Form("unknown label type")),
            }
        }
    }
}

//--- PartialEq, Eq, Hash, Ord

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.octets.iter().map(u8::to_ascii_lowercase);
        let right = other.octets.iter().map(u8::to_ascii_lowercase);
        left.cmp(right)
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for ch in self.octets.iter() {
            state.write_u8(ch.to_ascii_lowercase())
        }
    }
}

//--- Display and Debug

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.iter_labels() {
            for ch in label {
                if ch.is_ascii_graphic() && *ch != b'.' && *ch != b'\\' {
                    write!(f, "{}", *ch as char)?;
                } else {
                    write!(f, "\\{:03}", ch)?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Name({})", self)
    }
}

//------------ LabelIter -----------------------------------------------------

/// An iterator over the labels of a name.
pub struct LabelIter<'a> {
    /// The remaining wire-format octets.
    octets: &'a [u8],
}

impl<'a> Iterator for LabelIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = usize::from(*self.octets.first()?);
        if len == 0 {
            return None;
        }
        let (label, rest) = self.octets[1..].split_at(len);
        self.octets = rest;
        Some(label)
    }
}

//============ Error Types ===================================================

/// A domain name could not be created.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NameError {
    /// A label was empty or longer than 63 octets.
    BadLabel,

    /// The name as a whole exceeds 255 octets.
    LongName,
}

//--- Display and Error

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            NameError::BadLabel => f.write_str("invalid label"),
            NameError::LongName => f.write_str("domain name too long"),
        }
    }
}

impl std::error::Error for NameError {}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn presentation_round_trip() {
        let name = Name::from_str("tkeytest.example.com").unwrap();
        assert_eq!(
            name.as_slice(),
            b"\x08tkeytest\x07example\x03com\0"
        );
        assert_eq!(format!("{}", name), "tkeytest.example.com.");
        assert_eq!(format!("{}", Name::root()), ".");
    }

    #[test]
    fn comparison_ignores_case() {
        let lower = Name::from_str("Key.Example").unwrap();
        let upper = Name::from_str("kEY.eXAMPLE").unwrap();
        assert_eq!(lower, upper);
        let mut set = std::collections::HashSet::new();
        set.insert(lower);
        assert!(set.contains(&upper));
    }

    #[test]
    fn parse_follows_compression() {
        // "example.com" at offset 2, then "www" + pointer back to it.
        let msg = b"\0\0\x07example\x03com\0\x03www\xC0\x02";
        let mut parser = Parser::with_pos(msg, 15).unwrap();
        let name = Name::parse(&mut parser).unwrap();
        assert_eq!(name, Name::from_str("www.example.com").unwrap());
        assert_eq!(parser.remaining(), 0);
    }

    #[test]
    fn parse_rejects_pointer_loop() {
        let msg = b"\xC0\x00";
        let mut parser = Parser::new(msg);
        assert!(Name::parse(&mut parser).is_err());
    }

    #[test]
    fn prepend_label() {
        let owner = Name::from_str("example").unwrap();
        let name = owner.prepend_label(b"0a1b2c3d").unwrap();
        assert_eq!(format!("{}", name), "0a1b2c3d.example.");
    }
}
