//! DNS messages and how to build them.
//!
//! [`Message`] wraps the octets of a received message and gives access to
//! its header and sections. [`MessageBuilder`] assembles a message while
//! keeping the header's record counts equal to the records actually
//! pushed, so the two can never drift apart.

use super::header::{Header, HeaderCounts, HEADER_LEN};
use super::iana::{Class, Rtype};
use super::name::Name;
use super::wire::{Composer, ParseError, Parser, TruncationError};
use crate::precondition;
use bytes::Bytes;

//------------ Message -------------------------------------------------------

/// A DNS message as received from the wire.
#[derive(Clone, Debug)]
pub struct Message {
    /// The raw message octets.
    octets: Bytes,
}

impl Message {
    /// Creates a message from raw octets.
    ///
    /// Only checks that a complete header is present. The sections are
    /// validated lazily while iterating.
    pub fn from_octets(octets: Bytes) -> Result<Self, ParseError> {
        if octets.len() < HEADER_LEN {
            return Err(ParseError::ShortInput);
        }
        Ok(Message { octets })
    }

    /// Returns the raw octets of the message.
    pub fn as_slice(&self) -> &[u8] {
        self.octets.as_ref()
    }

    /// Returns the raw octets of the message.
    pub fn as_octets(&self) -> &Bytes {
        &self.octets
    }

    /// Returns the message header.
    pub fn header(&self) -> Header {
        let mut parser = Parser::new(self.octets.as_ref());
        Header::parse(&mut parser).expect("checked in from_octets")
    }

    /// Returns the header counts.
    pub fn counts(&self) -> HeaderCounts {
        let mut parser =
            Parser::with_pos(self.octets.as_ref(), 4).expect("short header");
        HeaderCounts::parse(&mut parser).expect("checked in from_octets")
    }

    /// Returns the first question of the message, if there is one.
    pub fn first_question(&self) -> Result<Option<Question>, ParseError> {
        if self.counts().qdcount == 0 {
            return Ok(None);
        }
        let mut parser =
            Parser::with_pos(self.octets.as_ref(), HEADER_LEN)?;
        Question::parse(&mut parser).map(Some)
    }

    /// Returns an iterator over the answer section.
    pub fn answer(&self) -> Result<RecordIter, ParseError> {
        let counts = self.counts();
        let mut parser =
            Parser::with_pos(self.octets.as_ref(), HEADER_LEN)?;
        for _ in 0..counts.qdcount {
            Question::parse(&mut parser)?;
        }
        Ok(RecordIter {
            message: self.octets.clone(),
            pos: parser.pos(),
            remaining: counts.ancount,
        })
    }

    /// Returns an iterator over the additional section.
    pub fn additional(&self) -> Result<RecordIter, ParseError> {
        let counts = self.counts();
        let mut iter = self.answer()?;
        iter.remaining = counts
            .ancount
            .checked_add(counts.nscount)
            .ok_or(ParseError::Form("implausible section counts"))?;
        while iter.next().transpose()?.is_some() {}
        iter.remaining = counts.arcount;
        Ok(iter)
    }

    /// Returns whether this message answers the given query.
    ///
    /// The message must be a response carrying the query's ID, and unless
    /// it reports an error with empty sections, its question must equal
    /// the query's question.
    pub fn is_answer(&self, query: &Message) -> bool {
        let header = self.header();
        if !header.qr() || header.id() != query.header().id() {
            return false;
        }
        let counts = self.counts();
        if counts.qdcount == 0 {
            // Error responses may come back with all sections empty.
            return counts.ancount == 0
                && counts.nscount == 0
                && counts.arcount == 0;
        }
        match (self.first_question(), query.first_question()) {
            (Ok(mine), Ok(theirs)) => mine == theirs,
            _ => false,
        }
    }
}

//------------ Question ------------------------------------------------------

/// A question from the question section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Question {
    /// The name being asked about.
    pub qname: Name,

    /// The record type being asked for.
    pub qtype: Rtype,

    /// The class being asked in.
    pub qclass: Class,
}

impl Question {
    /// Parses a question.
    pub fn parse(parser: &mut Parser) -> Result<Self, ParseError> {
        Ok(Question {
            qname: Name::parse(parser)?,
            qtype: Rtype::from_int(parser.parse_u16_be()?),
            qclass: Class::from_int(parser.parse_u16_be()?),
        })
    }
}

//------------ ParsedRecord --------------------------------------------------

/// A resource record parsed out of a message.
///
/// The record data is kept unparsed; record data types in [`crate::rdata`]
/// parse it on demand via [`rdata_parser`][Self::rdata_parser], which spans
/// the whole message so compressed names inside the data resolve.
#[derive(Clone, Debug)]
pub struct ParsedRecord {
    /// The complete message the record was parsed from.
    message: Bytes,

    /// The owner name.
    pub owner: Name,

    /// The record type.
    pub rtype: Rtype,

    /// The class.
    pub class: Class,

    /// The time to live.
    pub ttl: u32,

    /// Offset of the start of the record within the message.
    start: usize,

    /// Offset of the start of the record data within the message.
    rdata_start: usize,

    /// Length of the record data.
    rdata_len: usize,
}

impl ParsedRecord {
    /// Returns the offset of the start of the record within the message.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns the unparsed record data.
    pub fn rdata(&self) -> &[u8] {
        &self.message[self.rdata_start..self.rdata_start + self.rdata_len]
    }

    /// Returns the length of the record data.
    pub fn rdata_len(&self) -> usize {
        self.rdata_len
    }

    /// Returns a parser positioned at the start of the record data.
    pub fn rdata_parser(&self) -> Parser {
        Parser::with_pos(self.message.as_ref(), self.rdata_start)
            .expect("record offsets checked while iterating")
    }
}

//------------ RecordIter ----------------------------------------------------

/// An iterator over the records of one message section.
#[derive(Clone, Debug)]
pub struct RecordIter {
    /// The complete message.
    message: Bytes,

    /// The current parse position.
    pos: usize,

    /// The number of records left in the section.
    remaining: u16,
}

impl Iterator for RecordIter {
    type Item = Result<ParsedRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let start = self.pos;
        let mut parser = match Parser::with_pos(self.message.as_ref(), start)
        {
            Ok(parser) => parser,
            Err(err) => return Some(Err(err)),
        };
        let res = (|| {
            let owner = Name::parse(&mut parser)?;
            let rtype = Rtype::from_int(parser.parse_u16_be()?);
            let class = Class::from_int(parser.parse_u16_be()?);
            let ttl = parser.parse_u32_be()?;
            let rdata_len = usize::from(parser.parse_u16_be()?);
            let rdata_start = parser.pos();
            parser.advance(rdata_len)?;
            Ok(ParsedRecord {
                message: self.message.clone(),
                owner,
                rtype,
                class,
                ttl,
                start,
                rdata_start,
                rdata_len,
            })
        })();
        if res.is_ok() {
            self.pos = parser.pos();
        } else {
            self.remaining = 0;
        }
        Some(res)
    }
}

//------------ ComposeRecordData ---------------------------------------------

/// A type that can serve as record data when building a message.
pub trait ComposeRecordData {
    /// Returns the record type of the data.
    fn rtype(&self) -> Rtype;

    /// Appends the wire-format record data.
    fn compose_rdata(&self, target: &mut Composer)
        -> Result<(), TruncationError>;
}

//------------ MessageBuilder ------------------------------------------------

/// The sections of a message in the order they are built.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Section {
    /// The question section.
    Question,

    /// The answer section.
    Answer,

    /// The additional section.
    Additional,
}

/// Builds a DNS message.
///
/// The builder writes records straight into its buffer and bumps the
/// matching header count in place, so [`as_slice`][Self::as_slice] always
/// returns a valid message for the content pushed so far. That property is
/// what lets the transaction signer digest the message before the TSIG
/// record is appended.
///
/// Sections are filled in wire order; pushing into an earlier section
/// after a later one has been started is a precondition violation.
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    /// The message being assembled.
    composer: Composer,

    /// The section currently being filled.
    section: Section,
}

impl MessageBuilder {
    /// Creates a new builder with the given message length limit.
    pub fn new(limit: usize) -> Self {
        let mut composer = Composer::with_limit(limit);
        composer
            .append_slice(&[0; HEADER_LEN])
            .expect("limit below header length");
        MessageBuilder {
            composer,
            section: Section::Question,
        }
    }

    /// Returns the header as built so far.
    pub fn header(&self) -> Header {
        let mut parser = Parser::new(self.composer.as_slice());
        Header::parse(&mut parser).expect("header always present")
    }

    /// Updates the header.
    pub fn update_header<F: FnOnce(&mut Header)>(&mut self, op: F) {
        let mut header = self.header();
        op(&mut header);
        let mut front = Composer::with_limit(4);
        header.compose(&mut front).expect("header fits");
        self.composer.as_slice_mut()[..4].copy_from_slice(front.as_slice());
    }

    /// Appends a question.
    pub fn push_question(
        &mut self,
        qname: &Name,
        qtype: Rtype,
        qclass: Class,
    ) -> Result<(), TruncationError> {
        precondition!(
            self.section == Section::Question,
            "question pushed after records"
        );
        let mark = self.composer.len();
        let res = (|| {
            qname.compose(&mut self.composer)?;
            self.composer.append_u16_be(qtype.to_int())?;
            self.composer.append_u16_be(qclass.to_int())
        })();
        if res.is_err() {
            self.composer.truncate(mark);
            return res;
        }
        self.bump_count(0);
        Ok(())
    }

    /// Appends a record to the answer section.
    pub fn push_answer(
        &mut self,
        owner: &Name,
        class: Class,
        ttl: u32,
        data: &impl ComposeRecordData,
    ) -> Result<(), TruncationError> {
        precondition!(
            self.section <= Section::Answer,
            "answer pushed after additional section"
        );
        self.section = Section::Answer;
        self.push_record(owner, class, ttl, data, 1)
    }

    /// Appends a record to the additional section.
    pub fn push_additional(
        &mut self,
        owner: &Name,
        class: Class,
        ttl: u32,
        data: &impl ComposeRecordData,
    ) -> Result<(), TruncationError> {
        self.section = Section::Additional;
        self.push_record(owner, class, ttl, data, 3)
    }

    /// Appends a record and bumps the count at `count_index`.
    ///
    /// On failure the buffer is rolled back to where it was before the
    /// call and the count is left untouched.
    fn push_record(
        &mut self,
        owner: &Name,
        class: Class,
        ttl: u32,
        data: &impl ComposeRecordData,
        count_index: usize,
    ) -> Result<(), TruncationError> {
        let mark = self.composer.len();
        let res = (|| {
            owner.compose(&mut self.composer)?;
            self.composer.append_u16_be(data.rtype().to_int())?;
            self.composer.append_u16_be(class.to_int())?;
            self.composer.append_u32_be(ttl)?;
            self.composer
                .append_len_prefixed(|target| data.compose_rdata(target))
        })();
        if res.is_err() {
            self.composer.truncate(mark);
            return res;
        }
        self.bump_count(count_index);
        Ok(())
    }

    /// Increments one of the four header counts in place.
    fn bump_count(&mut self, index: usize) {
        let offset = 4 + index * 2;
        let slice = &mut self.composer.as_slice_mut()[offset..offset + 2];
        let count = u16::from_be_bytes([slice[0], slice[1]])
            .checked_add(1)
            .expect("section count overflow");
        slice.copy_from_slice(&count.to_be_bytes());
    }

    /// Returns the message as built so far.
    pub fn as_slice(&self) -> &[u8] {
        self.composer.as_slice()
    }

    /// Finishes building and returns the message.
    pub fn freeze(self) -> Message {
        Message {
            octets: self.composer.freeze(),
        }
    }
}

//============ Tests =========================================================
