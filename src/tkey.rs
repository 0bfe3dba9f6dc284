//! In-band key negotiation via TKEY records.
//!
//! The [`Exchange`] type drives one Diffie-Hellman key negotiation as
//! described in [RFC 2930]: the client sends a TKEY query carrying its
//! public value and a nonce, the server answers in kind, and both sides
//! derive the same symmetric key from the shared secret and the two
//! nonces. The exchange itself is authenticated with an existing TSIG
//! key, the bootstrap key, so an attacker can neither inject a bogus
//! server value nor learn anything beyond the public values.
//!
//! An exchange is single use. It builds exactly one query, consumes
//! exactly one response, and ends up either completed, with the newly
//! derived key installed in a [`KeyRing`], or failed. A failed exchange
//! never installs anything; the caller starts over with a fresh one.
//!
//! [RFC 2930]: https://tools.ietf.org/html/rfc2930

use crate::base::iana::{Class, Opcode, Rcode, Rtype, TkeyMode, TsigRcode};
use crate::base::message::{Message, MessageBuilder};
use crate::base::name::{Name, NameError};
use crate::base::wire::{ParseError, TruncationError};
use crate::precondition;
use crate::rdata::tkey::Tkey;
use crate::rdata::tsig::Time48;
use crate::tsig::{
    Algorithm, ClientTransaction, Key, KeyRing, KeyRingError,
    ValidationError,
};
use core::fmt;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

/// The length of the nonce each side contributes to key derivation.
pub const NONCE_LEN: usize = 16;

/// The length of an X25519 public value.
pub const DH_PUBLIC_LEN: usize = 32;

/// The message length limit for negotiation messages.
const MESSAGE_LIMIT: usize = 4096;

//------------ Config --------------------------------------------------------

/// The default key lifetime in seconds.
const LIFETIME_DEFAULT: u32 = 3600;

/// The range the key lifetime can be set to, in seconds.
const LIFETIME_RANGE: (u32, u32) = (60, 86_400);

/// Configuration of a key negotiation exchange.
#[derive(Clone, Debug)]
pub struct Config {
    /// The requested validity of the negotiated key in seconds.
    lifetime: u32,

    /// The MAC algorithm the negotiated key is to be used with.
    algorithm: Algorithm,
}

impl Config {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the requested key lifetime in seconds.
    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    /// Sets the requested key lifetime in seconds.
    ///
    /// Out-of-range values are silently trimmed to fit. The default is
    /// 3600 seconds.
    pub fn set_lifetime(&mut self, lifetime: u32) {
        self.lifetime = lifetime.clamp(LIFETIME_RANGE.0, LIFETIME_RANGE.1)
    }

    /// Returns the algorithm of the key being negotiated.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Sets the algorithm of the key being negotiated.
    ///
    /// The default is HMAC-MD5, the mandatory algorithm of the
    /// Diffie-Hellman TKEY mode.
    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = algorithm
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lifetime: LIFETIME_DEFAULT,
            algorithm: Algorithm::HmacMd5,
        }
    }
}

//------------ DhKeyPair -----------------------------------------------------

/// An X25519 key pair for the Diffie-Hellman exchange.
///
/// The secret is held as a static key so it can be loaded from and
/// written to key files.
#[derive(Clone)]
pub struct DhKeyPair {
    /// The secret scalar.
    secret: StaticSecret,
}

impl DhKeyPair {
    /// Generates a fresh key pair from the system's secure randomness.
    pub fn generate() -> Self {
        DhKeyPair {
            secret: StaticSecret::random_from_rng(rand::rngs::OsRng),
        }
    }

    /// Recreates a key pair from its 32 secret octets.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        DhKeyPair {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Returns the secret octets for persisting the pair.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Returns the public value sent to the peer.
    pub fn public_bytes(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Computes the shared secret with a peer's public value.
    ///
    /// Returns `None` if the peer's value is one of the low order points
    /// that force the shared secret regardless of our contribution.
    pub fn diffie_hellman(&self, peer: &[u8; 32]) -> Option<[u8; 32]> {
        let shared =
            self.secret.diffie_hellman(&PublicKey::from(*peer));
        if shared.was_contributory() {
            Some(*shared.as_bytes())
        } else {
            None
        }
    }
}

//--- Debug

impl fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Only the public half appears in output.
        f.debug_struct("DhKeyPair")
            .field("public", &self.public_bytes())
            .finish()
    }
}

//------------ derive_key ----------------------------------------------------

/// Derives the symmetric key octets from the exchange outputs.
///
/// Octets are drawn from successive SHA-256 blocks over the client
/// nonce, the server nonce, the shared secret and a block counter, and
/// truncated to the native key length of the algorithm. Both sides call
/// this with the same inputs and arrive at the same key.
pub fn derive_key(
    shared: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    algorithm: Algorithm,
) -> Vec<u8> {
    let len = algorithm.native_len();
    let mut out = Vec::with_capacity(len);
    let mut counter = 0u8;
    while out.len() < len {
        let mut digest = Sha256::new();
        digest.update(client_nonce);
        digest.update(server_nonce);
        digest.update(shared);
        digest.update([counter]);
        out.extend_from_slice(&digest.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

//------------ Exchange ------------------------------------------------------

/// The states an exchange passes through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// The query has not been built yet.
    Building,

    /// The query is out and we are waiting for the response.
    AwaitingResponse,

    /// The negotiated key has been installed.
    Completed,

    /// The exchange failed. Terminal for this attempt.
    Failed,
}

/// A single key negotiation exchange.
///
/// Created with the bootstrap key authenticating the exchange and the
/// local Diffie-Hellman pair, then driven through
/// [`build_query`][Self::build_query] and
/// [`process_response`][Self::process_response].
#[derive(Debug)]
pub struct Exchange {
    /// The exchange configuration.
    config: Config,

    /// The key authenticating the exchange.
    bootstrap: Arc<Key>,

    /// The local Diffie-Hellman pair.
    dh: DhKeyPair,

    /// Our nonce contribution to key derivation.
    nonce: [u8; NONCE_LEN],

    /// The generated name of the key being negotiated.
    key_name: Name,

    /// The TSIG transaction of the outstanding query, if any.
    transaction: Option<ClientTransaction>,

    /// Where the exchange currently stands.
    state: State,
}

impl Exchange {
    /// Creates a new exchange.
    ///
    /// The key being negotiated receives a unique name directly under
    /// `owner`, generated from random octets so that concurrent
    /// negotiations against the same server cannot collide.
    pub fn new(
        bootstrap: Arc<Key>,
        dh: DhKeyPair,
        owner: &Name,
        config: Config,
    ) -> Result<Self, NameError> {
        let mut rng = rand::thread_rng();
        let mut label = String::with_capacity(16);
        for _ in 0..8 {
            label.push_str(&format!("{:02x}", rng.gen::<u8>()));
        }
        let key_name = owner.prepend_label(label.as_bytes())?;
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut nonce);
        Ok(Exchange {
            config,
            bootstrap,
            dh,
            nonce,
            key_name,
            transaction: None,
            state: State::Building,
        })
    }

    /// Returns the name of the key being negotiated.
    pub fn key_name(&self) -> &Name {
        &self.key_name
    }

    /// Returns the TSIG transaction of the outstanding query.
    ///
    /// Available once the query has been built; the request layer uses
    /// it to authenticate the response before handing it back.
    pub fn transaction(&self) -> Option<&ClientTransaction> {
        self.transaction.as_ref()
    }

    /// Builds the signed TKEY query.
    ///
    /// The query carries our public value and nonce in a TKEY record in
    /// the additional section, signed with the bootstrap key.
    ///
    /// # Panics
    ///
    /// Calling this on an exchange that has already built its query is a
    /// precondition violation.
    pub fn build_query(
        &mut self,
        id: u16,
        now: Time48,
    ) -> Result<Message, NegotiationError> {
        precondition!(
            self.state == State::Building,
            "query built twice on one exchange"
        );
        let mut builder = MessageBuilder::new(MESSAGE_LIMIT);
        builder.update_header(|header| {
            header.set_id(id);
            header.set_opcode(Opcode::QUERY);
        });
        builder.push_question(&self.key_name, Rtype::TKEY, Class::ANY)?;

        let mut key_data =
            Vec::with_capacity(DH_PUBLIC_LEN + NONCE_LEN);
        key_data.extend_from_slice(&self.dh.public_bytes());
        key_data.extend_from_slice(&self.nonce);
        let inception = now.as_u64() as u32;
        let expiration = inception.wrapping_add(self.config.lifetime);
        let tkey = Tkey::new(
            self.config.algorithm.to_name(),
            inception,
            expiration,
            TkeyMode::DIFFIE_HELLMAN,
            TsigRcode::NOERROR,
            key_data,
            Vec::new(),
        );
        builder.push_additional(&self.key_name, Class::ANY, 0, &tkey)?;

        let transaction = ClientTransaction::request(
            self.bootstrap.clone(),
            &mut builder,
            now,
        )?;
        self.transaction = Some(transaction);
        self.state = State::AwaitingResponse;
        Ok(builder.freeze())
    }

    /// Processes the response and installs the negotiated key.
    ///
    /// The checks run in a fixed order: the TSIG signature first, then
    /// the message rcode, then the TKEY record's own error field, then
    /// the algorithm and owner, and only then is any key material
    /// touched. No key is installed unless every check passes. Any
    /// failure is terminal for this exchange.
    ///
    /// On success the key is installed in `ring` under the owner name of
    /// the response's TKEY record and returned.
    ///
    /// # Panics
    ///
    /// Calling this before the query was built, or again after the
    /// response was processed, is a precondition violation.
    pub fn process_response(
        &mut self,
        ring: &KeyRing,
        message: &Message,
        now: Time48,
    ) -> Result<Arc<Key>, NegotiationError> {
        precondition!(
            self.state == State::AwaitingResponse,
            "no response outstanding on this exchange"
        );
        match self.check_response(ring, message, now) {
            Ok(key) => {
                debug!(key = %key.name(), "key negotiation completed");
                self.state = State::Completed;
                Ok(key)
            }
            Err(err) => {
                debug!(error = %err, "key negotiation failed");
                self.state = State::Failed;
                Err(err)
            }
        }
    }

    /// Runs the ordered response checks and key installation.
    fn check_response(
        &self,
        ring: &KeyRing,
        message: &Message,
        now: Time48,
    ) -> Result<Arc<Key>, NegotiationError> {
        let transaction = match self.transaction {
            Some(ref transaction) => transaction,
            None => return Err(NegotiationError::Malformed),
        };
        transaction.answer(message, now)?;

        let rcode = message.header().rcode();
        if rcode != Rcode::NOERROR {
            return Err(NegotiationError::Server(rcode));
        }

        let mut found = None;
        for record in message.answer()? {
            let record = record?;
            if record.rtype == Rtype::TKEY {
                found = Some(record);
                break;
            }
        }
        let record = found.ok_or(NegotiationError::Malformed)?;
        // TKEY records must travel with a TTL of zero.
        if record.ttl != 0 {
            return Err(NegotiationError::Malformed);
        }
        let tkey = Tkey::parse_record(&record)?;

        if tkey.error() != TsigRcode::NOERROR {
            return Err(NegotiationError::Rejected(tkey.error()));
        }
        if tkey.mode() != TkeyMode::DIFFIE_HELLMAN
            || *tkey.algorithm() != self.config.algorithm.to_name()
            || record.owner != self.key_name
        {
            return Err(NegotiationError::Mismatch);
        }

        let key_data = tkey.key();
        if key_data.len() < DH_PUBLIC_LEN + NONCE_LEN {
            return Err(NegotiationError::Malformed);
        }
        let mut peer_public = [0u8; DH_PUBLIC_LEN];
        peer_public.copy_from_slice(&key_data[..DH_PUBLIC_LEN]);
        let server_nonce =
            &key_data[DH_PUBLIC_LEN..DH_PUBLIC_LEN + NONCE_LEN];
        let shared = self
            .dh
            .diffie_hellman(&peer_public)
            .ok_or(NegotiationError::Malformed)?;
        let secret = derive_key(
            &shared,
            &self.nonce,
            server_nonce,
            self.config.algorithm,
        );

        let mut key = Key::new(
            self.config.algorithm,
            &secret,
            record.owner.clone(),
            true,
        );
        key.set_validity(
            u64::from(tkey.inception()),
            u64::from(tkey.expiration()),
        );
        ring.create(key, None).map_err(NegotiationError::KeyRing)
    }
}

//============ Error Types ===================================================

//------------ NegotiationError ----------------------------------------------

/// A key negotiation exchange failed.
#[derive(Clone, Debug)]
pub enum NegotiationError {
    /// Sending the query or receiving the response failed.
    Request(crate::net::request::Error),

    /// The response failed TSIG validation.
    Authentication(ValidationError),

    /// The server answered with a non-zero rcode.
    Server(Rcode),

    /// The server rejected the negotiation via the TKEY error field.
    Rejected(TsigRcode),

    /// The response negotiates a different key than we asked for.
    Mismatch,

    /// The response was malformed or carried unusable key data.
    Malformed,

    /// The negotiated key could not be installed in the ring.
    KeyRing(KeyRingError),

    /// The query did not fit into a message.
    Truncation,
}

//--- From

impl From<ValidationError> for NegotiationError {
    fn from(err: ValidationError) -> Self {
        NegotiationError::Authentication(err)
    }
}

impl From<ParseError> for NegotiationError {
    fn from(_: ParseError) -> Self {
        NegotiationError::Malformed
    }
}

impl From<TruncationError> for NegotiationError {
    fn from(_: TruncationError) -> Self {
        NegotiationError::Truncation
    }
}

impl From<crate::net::request::Error> for NegotiationError {
    fn from(err: crate::net::request::Error) -> Self {
        NegotiationError::Request(err)
    }
}

//--- Display and Error

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            NegotiationError::Request(ref err) => {
                write!(f, "request failed: {}", err)
            }
            NegotiationError::Authentication(ref err) => {
                write!(f, "response validation failed: {}", err)
            }
            NegotiationError::Server(rcode) => {
                write!(f, "server returned {}", rcode)
            }
            NegotiationError::Rejected(error) => {
                write!(f, "server rejected negotiation: {}", error)
            }
            NegotiationError::Mismatch => {
                f.write_str("response key does not match request")
            }
            NegotiationError::Malformed => {
                f.write_str("malformed response")
            }
            NegotiationError::KeyRing(err) => {
                write!(f, "cannot install key: {}", err)
            }
            NegotiationError::Truncation => {
                f.write_str("query does not fit into a message")
            }
        }
    }
}

impl std::error::Error for NegotiationError {}

//============ Tests =========================================================
