//! Sending queries and receiving responses.
//!
//! [`dispatch`] demultiplexes incoming datagrams to pending requests by
//! transaction ID and peer address. [`request`] drives the lifecycle of a
//! single outstanding request: sending, retransmission, timeout,
//! authentication of the response, and cancellation.

pub mod dispatch;
pub mod request;

pub use self::dispatch::Dispatch;
pub use self::request::{Connection, RequestHandle, RequestOptions};
