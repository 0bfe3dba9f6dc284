//! In-band DNS key negotiation.
//!
//! This crate establishes a shared symmetric authentication key between two
//! DNS endpoints using a Diffie-Hellman exchange carried in TKEY resource
//! records as defined in [RFC 2930]. The exchange itself, as well as all
//! traffic protected by the negotiated key, is authenticated with TSIG
//! transaction signatures as defined in [RFC 2845].
//!
//! The crate is organized in layers, leaves first:
//!
//! * [`base`] contains the wire-format plumbing: bounds-checked parsing and
//!   composing, domain names, the message header, and a message builder that
//!   keeps its record counts in sync with the records actually present.
//! * [`rdata`] contains the record data types for TKEY and TSIG.
//! * [`tsig`] implements keys, the concurrent [`KeyRing`][tsig::KeyRing],
//!   and the client and server transaction signers.
//! * [`tkey`] implements the negotiation state machine that builds a
//!   Diffie-Hellman TKEY query, processes the response, derives the shared
//!   key and installs it into the key ring.
//! * [`net`] provides the transaction dispatcher and the request manager
//!   that owns the send–retransmit–timeout–cancel lifecycle of a query.
//! * [`keyfile`] reads and writes the on-disk key file convention used by
//!   the `keycreate` driver binary.
//!
//! A negotiation run wires these together: the driver builds a signed TKEY
//! query through [`tkey::Exchange`], hands it to a request from
//! [`net::Connection`], and feeds the authenticated response back into the
//! exchange, which installs the derived key into the ring and reports the
//! key's name.
//!
//! [RFC 2845]: https://tools.ietf.org/html/rfc2845
//! [RFC 2930]: https://tools.ietf.org/html/rfc2930

pub mod base;
pub mod contract;
pub mod keyfile;
pub mod net;
pub mod rdata;
pub mod tkey;
pub mod tsig;
