//! Record data from [RFC 2845]: TSIG records.
//!
//! [RFC 2845]: https://tools.ietf.org/html/rfc2845

use crate::base::iana::{Rtype, TsigRcode};
use crate::base::message::{ComposeRecordData, ParsedRecord};
use crate::base::name::Name;
use crate::base::wire::{Composer, ParseError, TruncationError};
use bytes::Bytes;
use core::fmt;
use std::time::SystemTime;

//------------ Time48 --------------------------------------------------------

/// A 48 bit Unix timestamp as used in the TSIG time signed field.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Time48(u64);

impl Time48 {
    /// Returns the current system time as a 48 bit timestamp.
    pub fn now() -> Self {
        Self::from_u64(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .expect("system time before Unix epoch")
                .as_secs(),
        )
    }

    /// Creates a timestamp from a seconds value, masking off excess bits.
    pub fn from_u64(value: u64) -> Self {
        Time48(value & 0x0000_FFFF_FFFF_FFFF)
    }

    /// Returns the timestamp as seconds since the Unix epoch.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the six wire-format octets of the timestamp.
    pub fn into_octets(self) -> [u8; 6] {
        let octets = self.0.to_be_bytes();
        [octets[2], octets[3], octets[4], octets[5], octets[6], octets[7]]
    }

    /// Creates a timestamp from a six octet slice.
    ///
    /// # Panics
    ///
    /// Panics if the slice is not exactly six octets long.
    pub fn from_slice(slice: &[u8]) -> Self {
        assert_eq!(slice.len(), 6);
        let mut res = 0u64;
        for ch in slice {
            res = res << 8 | u64::from(*ch);
        }
        Time48(res)
    }

    /// Returns whether `other` is within `fudge` seconds of this time.
    pub fn eq_fudged(self, other: Self, fudge: u64) -> bool {
        self.0.saturating_sub(fudge) <= other.0
            && self.0.saturating_add(fudge) >= other.0
    }
}

impl From<Time48> for u64 {
    fn from(value: Time48) -> u64 {
        value.0
    }
}

impl fmt::Display for Time48 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ Tsig ----------------------------------------------------------

/// TSIG record data.
#[derive(Clone, Debug)]
pub struct Tsig {
    /// The signature algorithm as a domain name.
    algorithm: Name,

    /// The Unix time at which the signature was created.
    time_signed: Time48,

    /// Seconds of error permitted in time signed.
    fudge: u16,

    /// The message authentication code.
    mac: Bytes,

    /// The original message ID.
    original_id: u16,

    /// The TSIG response code.
    error: TsigRcode,

    /// The other data field, normally empty except for BADTIME errors.
    other: Bytes,
}

impl Tsig {
    /// Creates new TSIG record data from its components.
    pub fn new(
        algorithm: Name,
        time_signed: Time48,
        fudge: u16,
        mac: impl Into<Bytes>,
        original_id: u16,
        error: TsigRcode,
        other: impl Into<Bytes>,
    ) -> Self {
        Tsig {
            algorithm,
            time_signed,
            fudge,
            mac: mac.into(),
            original_id,
            error,
            other: other.into(),
        }
    }

    /// Returns a reference to the algorithm name.
    pub fn algorithm(&self) -> &Name {
        &self.algorithm
    }

    /// Returns the time the signature was created.
    pub fn time_signed(&self) -> Time48 {
        self.time_signed
    }

    /// Returns the permitted clock error in seconds.
    pub fn fudge(&self) -> u16 {
        self.fudge
    }

    /// Returns the MAC.
    pub fn mac(&self) -> &[u8] {
        self.mac.as_ref()
    }

    /// Returns the original message ID.
    pub fn original_id(&self) -> u16 {
        self.original_id
    }

    /// Returns the TSIG error.
    pub fn error(&self) -> TsigRcode {
        self.error
    }

    /// Returns the other data field.
    pub fn other(&self) -> &[u8] {
        self.other.as_ref()
    }

    /// Returns the other data field as a server timestamp.
    ///
    /// The field only ever legitimately carries a timestamp, reported by
    /// the server on BADTIME errors.
    pub fn other_time(&self) -> Option<Time48> {
        if self.other.len() == 6 {
            Some(Time48::from_slice(self.other.as_ref()))
        } else {
            None
        }
    }

    /// Returns whether the signature is valid at the given time.
    pub fn is_valid_at(&self, now: Time48) -> bool {
        now.eq_fudged(self.time_signed, self.fudge.into())
    }

    /// Parses TSIG record data out of a parsed record.
    pub fn parse_record(record: &ParsedRecord) -> Result<Self, ParseError> {
        let mut parser = record.rdata_parser();
        let end = parser.pos() + record.rdata_len();
        let algorithm = Name::parse(&mut parser)?;
        let time_signed = Time48::from_u64(parser.parse_u48_be()?);
        let fudge = parser.parse_u16_be()?;
        let mac_len = usize::from(parser.parse_u16_be()?);
        let mac = Bytes::copy_from_slice(parser.parse_octets(mac_len)?);
        let original_id = parser.parse_u16_be()?;
        let error = TsigRcode::from_int(parser.parse_u16_be()?);
        let other_len = usize::from(parser.parse_u16_be()?);
        let other = Bytes::copy_from_slice(parser.parse_octets(other_len)?);
        if parser.pos() != end {
            return Err(ParseError::Form("trailing data in TSIG record"));
        }
        Ok(Tsig {
            algorithm,
            time_signed,
            fudge,
            mac,
            original_id,
            error,
            other,
        })
    }
}

//--- ComposeRecordData

impl ComposeRecordData for Tsig {
    fn rtype(&self) -> Rtype {
        Rtype::TSIG
    }

    fn compose_rdata(
        &self,
        target: &mut Composer,
    ) -> Result<(), TruncationError> {
        self.algorithm.compose(target)?;
        target.append_u48_be(self.time_signed.as_u64())?;
        target.append_u16_be(self.fudge)?;
        target.append_len_prefixed(|t| t.append_slice(self.mac.as_ref()))?;
        target.append_u16_be(self.original_id)?;
        target.append_u16_be(self.error.to_int())?;
        target.append_len_prefixed(|t| t.append_slice(self.other.as_ref()))
    }
}

//============ Tests =========================================================
