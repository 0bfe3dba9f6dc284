//! The basic building blocks of DNS messages.
//!
//! This module provides the machinery shared by everything above it: the
//! wire-format [`Parser`][wire::Parser] and [`Composer`][wire::Composer],
//! the enumerated protocol constants in [`iana`], the message
//! [`Header`][header::Header], domain [`Name`][name::Name]s, and the
//! [`Message`][message::Message] and [`MessageBuilder`][message::
//! MessageBuilder] types tying them together.

pub mod header;
pub mod iana;
pub mod message;
pub mod name;
pub mod wire;

pub use self::header::{Header, HeaderCounts, HEADER_LEN};
pub use self::message::{
    ComposeRecordData, Message, MessageBuilder, ParsedRecord, Question,
    RecordIter,
};
pub use self::name::Name;
pub use self::wire::{Composer, ParseError, Parser, TruncationError};
