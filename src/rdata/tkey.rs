//! Record data from [RFC 2930]: TKEY records.
//!
//! [RFC 2930]: https://tools.ietf.org/html/rfc2930

use crate::base::iana::{Rtype, TkeyMode, TsigRcode};
use crate::base::message::{ComposeRecordData, ParsedRecord};
use crate::base::name::Name;
use crate::base::wire::{Composer, ParseError, TruncationError};
use bytes::Bytes;

//------------ Tkey ----------------------------------------------------------

/// TKEY record data.
///
/// In a Diffie-Hellman exchange the key data field carries the sender's
/// public value followed by its nonce; the other data field is unused.
/// A TKEY record must be carried with a TTL of zero, which the caller
/// pushing the record enforces.
#[derive(Clone, Debug)]
pub struct Tkey {
    /// The algorithm of the key being negotiated, as a domain name.
    algorithm: Name,

    /// Start of the key's validity, seconds since the Unix epoch.
    inception: u32,

    /// End of the key's validity, seconds since the Unix epoch.
    expiration: u32,

    /// The negotiation mode.
    mode: TkeyMode,

    /// The extended error reported by the responder.
    error: TsigRcode,

    /// The key exchange data.
    key: Bytes,

    /// The other data field, unused by the supported modes.
    other: Bytes,
}

impl Tkey {
    /// Creates new TKEY record data from its components.
    pub fn new(
        algorithm: Name,
        inception: u32,
        expiration: u32,
        mode: TkeyMode,
        error: TsigRcode,
        key: impl Into<Bytes>,
        other: impl Into<Bytes>,
    ) -> Self {
        Tkey {
            algorithm,
            inception,
            expiration,
            mode,
            error,
            key: key.into(),
            other: other.into(),
        }
    }

    /// Returns a reference to the algorithm name.
    pub fn algorithm(&self) -> &Name {
        &self.algorithm
    }

    /// Returns the inception time.
    pub fn inception(&self) -> u32 {
        self.inception
    }

    /// Returns the expiration time.
    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    /// Returns the negotiation mode.
    pub fn mode(&self) -> TkeyMode {
        self.mode
    }

    /// Returns the extended error.
    pub fn error(&self) -> TsigRcode {
        self.error
    }

    /// Returns the key exchange data.
    pub fn key(&self) -> &[u8] {
        self.key.as_ref()
    }

    /// Returns the other data field.
    pub fn other(&self) -> &[u8] {
        self.other.as_ref()
    }

    /// Parses TKEY record data out of a parsed record.
    pub fn parse_record(record: &ParsedRecord) -> Result<Self, ParseError> {
        let mut parser = record.rdata_parser();
        let end = parser.pos() + record.rdata_len();
        let algorithm = Name::parse(&mut parser)?;
        let inception = parser.parse_u32_be()?;
        let expiration = parser.parse_u32_be()?;
        let mode = TkeyMode::from_int(parser.parse_u16_be()?);
        let error = TsigRcode::from_int(parser.parse_u16_be()?);
        let key_len = usize::from(parser.parse_u16_be()?);
        let key = Bytes::copy_from_slice(parser.parse_octets(key_len)?);
        let other_len = usize::from(parser.parse_u16_be()?);
        let other = Bytes::copy_from_slice(parser.parse_octets(other_len)?);
        if parser.pos() != end {
            return Err(ParseError::Form("trailing data in TKEY record"));
        }
        Ok(Tkey {
            algorithm,
            inception,
            expiration,
            mode,
            error,
            key,
            other,
        })
    }
}

//--- ComposeRecordData

impl ComposeRecordData for Tkey {
    fn rtype(&self) -> Rtype {
        Rtype::TKEY
    }

    fn compose_rdata(
        &self,
        target: &mut Composer,
    ) -> Result<(), TruncationError> {
        self.algorithm.compose(target)?;
        target.append_u32_be(self.inception)?;
        target.append_u32_be(self.expiration)?;
        target.append_u16_be(self.mode.to_int())?;
        target.append_u16_be(self.error.to_int())?;
        target.append_len_prefixed(|t| t.append_slice(self.key.as_ref()))?;
        target.append_len_prefixed(|t| t.append_slice(self.other.as_ref()))
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::iana::Class;
    use crate::base::message::MessageBuilder;

    #[test]
    fn wire_round_trip() {
        let data = Tkey::new(
            Name::from_str("hmac-md5.sig-alg.reg.int").unwrap(),
            1_700_000_000,
            1_700_003_600,
            TkeyMode::DIFFIE_HELLMAN,
            TsigRcode::NOERROR,
            &[0xAB; 48][..],
            &b"\x00\x07"[..],
        );
        let mut builder = MessageBuilder::new(512);
        builder
            .push_answer(
                &Name::from_str("key.example").unwrap(),
                Class::ANY,
                0,
                &data,
            )
            .unwrap();
        let msg = builder.freeze();
        let record = msg.answer().unwrap().next().unwrap().unwrap();
        assert_eq!(record.rtype, Rtype::TKEY);
        assert_eq!(record.ttl, 0);
        let parsed = Tkey::parse_record(&record).unwrap();
        assert_eq!(parsed.algorithm(), data.algorithm());
        assert_eq!(parsed.mode(), TkeyMode::DIFFIE_HELLMAN);
        assert_eq!(parsed.error(), TsigRcode::NOERROR);
        assert_eq!(parsed.key(), &[0xAB; 48][..]);
        assert_eq!(parsed.other(), data.other());
        assert_eq!(parsed.inception(), 1_700_000_000);
        assert_eq!(parsed.expiration(), 1_700_003_600);
    }

    #[test]
    fn short_rdata_rejected() {
        let data = Tkey::new(
            Name::root(),
            0,
            0,
            TkeyMode::KEY_DELETION,
            TsigRcode::NOERROR,
            &b""[..],
            &b""[..],
        );
        let mut builder = MessageBuilder::new(512);
        builder
            .push_answer(&Name::root(), Class::ANY, 0, &data)
            .unwrap();
        let msg = builder.freeze();
        // Truncating the message mid-record must yield a parse error, not
        // a panic.
        let mut octets = msg.as_slice().to_vec();
        octets.truncate(octets.len() - 3);
        let short = crate::base::Message::from_octets(octets.into()).unwrap();
        assert!(matches!(
            short.answer().unwrap().next(),
            Some(Err(_)) | None
        ));
    }
}
