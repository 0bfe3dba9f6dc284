//! Record data for the negotiation record types.
//!
//! Only the two record types the subsystem speaks are implemented here:
//! [`Tkey`][tkey::Tkey] carries the key negotiation payload and
//! [`Tsig`][tsig::Tsig] the transaction signature.

pub mod tkey;
pub mod tsig;

pub use self::tkey::Tkey;
pub use self::tsig::{Time48, Tsig};
