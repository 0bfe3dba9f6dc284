//! Keys, the key ring, and TSIG transaction signing.
//!
//! TSIG authenticates a message exchange with a secret key shared between
//! the two participants. The requesting side signs its message and appends
//! the signature in a [TSIG][crate::rdata::Tsig] record as the last record
//! of the additional section. The responder verifies it, and signs its
//! answer in turn, mixing the request's MAC into the digest so that request
//! and answer are cryptographically bound together.
//!
//! Keys are [`Key`] values tying together a name, an [`Algorithm`] and the
//! secret octets. The [`KeyRing`] stores them for concurrent lookup; it is
//! the one piece of state that may be shared between worker loops. The
//! [`ClientTransaction`] and [`ServerTransaction`] types implement the two
//! roles of a signed request/response exchange.

use crate::base::header::HEADER_LEN;
use crate::base::iana::{Class, Rcode, TsigRcode};
use crate::base::message::{Message, MessageBuilder, ParsedRecord};
use crate::base::name::Name;
use crate::base::wire::{Composer, ParseError, TruncationError};
use crate::rdata::tsig::{Time48, Tsig};
use bytes::Bytes;
use core::{fmt, str};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

/// The default fudge value recommended by RFC 2845, in seconds.
const DEFAULT_FUDGE: u16 = 300;

//------------ Algorithm -----------------------------------------------------

/// The supported MAC algorithms.
///
/// Algorithms form a closed set: adding one means adding a variant, not
/// registering a name at run time. HMAC-MD5 is kept despite its age
/// because it is the mandatory-to-implement algorithm of the TKEY
/// Diffie-Hellman exchange and what existing peers bootstrap with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Algorithm {
    /// HMAC-MD5, named `hmac-md5.sig-alg.reg.int.` on the wire.
    HmacMd5,

    /// HMAC-SHA1.
    HmacSha1,

    /// HMAC-SHA256.
    HmacSha256,

    /// HMAC-SHA384.
    HmacSha384,

    /// HMAC-SHA512.
    HmacSha512,
}

impl Algorithm {
    /// Creates a value from its domain name representation.
    ///
    /// Returns `None` if the name doesn't represent a known algorithm.
    pub fn from_name(name: &Name) -> Option<Self> {
        [
            Algorithm::HmacMd5,
            Algorithm::HmacSha1,
            Algorithm::HmacSha256,
            Algorithm::HmacSha384,
            Algorithm::HmacSha512,
        ]
        .into_iter()
        .find(|alg| alg.to_name() == *name)
    }

    /// Returns an octets slice of the wire-format domain name.
    fn as_wire_slice(self) -> &'static [u8] {
        match self {
            Algorithm::HmacMd5 => {
                b"\x08hmac-md5\x07sig-alg\x03reg\x03int\0"
            }
            Algorithm::HmacSha1 => b"\x09hmac-sha1\0",
            Algorithm::HmacSha256 => b"\x0Bhmac-sha256\0",
            Algorithm::HmacSha384 => b"\x0Bhmac-sha384\0",
            Algorithm::HmacSha512 => b"\x0Bhmac-sha512\0",
        }
    }

    /// Returns the domain name for this algorithm.
    pub fn to_name(self) -> Name {
        Name::from_wire_unchecked(Bytes::from_static(self.as_wire_slice()))
    }

    /// Returns the native length of a MAC created with this algorithm.
    pub fn native_len(self) -> usize {
        match self {
            Algorithm::HmacMd5 => 16,
            Algorithm::HmacSha1 => 20,
            Algorithm::HmacSha256 => 32,
            Algorithm::HmacSha384 => 48,
            Algorithm::HmacSha512 => 64,
        }
    }

    /// Returns the minimum acceptable length of a received MAC.
    ///
    /// RFC 4635 allows truncation down to the larger of 10 octets and
    /// half the native length.
    pub fn min_mac_len(self) -> usize {
        core::cmp::max(10, self.native_len() / 2)
    }

    /// Returns the key file algorithm number.
    pub fn number(self) -> u8 {
        match self {
            Algorithm::HmacMd5 => 157,
            Algorithm::HmacSha1 => 161,
            Algorithm::HmacSha256 => 163,
            Algorithm::HmacSha384 => 164,
            Algorithm::HmacSha512 => 165,
        }
    }
}

//--- FromStr and Display

impl str::FromStr for Algorithm {
    type Err = AlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hmac-md5" => Ok(Algorithm::HmacMd5),
            "hmac-sha1" => Ok(Algorithm::HmacSha1),
            "hmac-sha256" => Ok(Algorithm::HmacSha256),
            "hmac-sha384" => Ok(Algorithm::HmacSha384),
            "hmac-sha512" => Ok(Algorithm::HmacSha512),
            _ => Err(AlgorithmError),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Algorithm::HmacMd5 => "hmac-md5",
            Algorithm::HmacSha1 => "hmac-sha1",
            Algorithm::HmacSha256 => "hmac-sha256",
            Algorithm::HmacSha384 => "hmac-sha384",
            Algorithm::HmacSha512 => "hmac-sha512",
        })
    }
}

//------------ MacContext ----------------------------------------------------

/// An in-progress MAC computation.
#[derive(Clone)]
enum MacContext {
    /// HMAC-MD5 state.
    Md5(Hmac<Md5>),

    /// HMAC-SHA1 state.
    Sha1(Hmac<Sha1>),

    /// HMAC-SHA256 state.
    Sha256(Hmac<Sha256>),

    /// HMAC-SHA384 state.
    Sha384(Hmac<Sha384>),

    /// HMAC-SHA512 state.
    Sha512(Hmac<Sha512>),
}

impl MacContext {
    /// Creates a fresh context for the given algorithm and secret.
    fn new(algorithm: Algorithm, secret: &[u8]) -> Self {
        // HMAC accepts keys of any length, so `new_from_slice` cannot
        // actually fail.
        match algorithm {
            Algorithm::HmacMd5 => MacContext::Md5(
                Hmac::<Md5>::new_from_slice(secret)
                    .expect("HMAC takes any key"),
            ),
            Algorithm::HmacSha1 => MacContext::Sha1(
                Hmac::<Sha1>::new_from_slice(secret)
                    .expect("HMAC takes any key"),
            ),
            Algorithm::HmacSha256 => MacContext::Sha256(
                Hmac::<Sha256>::new_from_slice(secret)
                    .expect("HMAC takes any key"),
            ),
            Algorithm::HmacSha384 => MacContext::Sha384(
                Hmac::<Sha384>::new_from_slice(secret)
                    .expect("HMAC takes any key"),
            ),
            Algorithm::HmacSha512 => MacContext::Sha512(
                Hmac::<Sha512>::new_from_slice(secret)
                    .expect("HMAC takes any key"),
            ),
        }
    }

    /// Feeds data into the MAC computation.
    fn update(&mut self, data: &[u8]) {
        match self {
            MacContext::Md5(mac) => mac.update(data),
            MacContext::Sha1(mac) => mac.update(data),
            MacContext::Sha256(mac) => mac.update(data),
            MacContext::Sha384(mac) => mac.update(data),
            MacContext::Sha512(mac) => mac.update(data),
        }
    }

    /// Finishes the computation and returns the MAC.
    fn finalize(self) -> Vec<u8> {
        match self {
            MacContext::Md5(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha1(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha384(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }

    /// Finishes the computation and compares against a received MAC.
    ///
    /// The comparison happens in constant time and accepts truncation
    /// down to the limit given.
    fn verify_truncated(
        self,
        provided: &[u8],
        min_len: usize,
    ) -> Result<(), ValidationError> {
        if provided.len() < min_len {
            return Err(ValidationError::BadTrunc);
        }
        let res = match self {
            MacContext::Md5(mac) => mac.verify_truncated_left(provided),
            MacContext::Sha1(mac) => mac.verify_truncated_left(provided),
            MacContext::Sha256(mac) => mac.verify_truncated_left(provided),
            MacContext::Sha384(mac) => mac.verify_truncated_left(provided),
            MacContext::Sha512(mac) => mac.verify_truncated_left(provided),
        };
        res.map_err(|_| ValidationError::BadSig)
    }
}

//------------ Key -----------------------------------------------------------

/// A key for creating and validating TSIG signatures.
///
/// A key ties together the secret octets, the algorithm they are used
/// with, and the domain name under which the peers know the key. Validity
/// timestamps and the `ephemeral` flag distinguishing negotiated from
/// statically provisioned keys are metadata for the key's owner; the
/// store never acts on them itself.
pub struct Key {
    /// The algorithm the key is used with.
    algorithm: Algorithm,

    /// The name of the key as a domain name.
    name: Name,

    /// The secret octets.
    secret: Vec<u8>,

    /// Start of validity, seconds since the Unix epoch.
    inception: Option<u64>,

    /// End of validity, seconds since the Unix epoch.
    expiration: Option<u64>,

    /// Whether the key was negotiated rather than statically provisioned.
    ephemeral: bool,
}

impl Key {
    /// Creates a new key from its components.
    pub fn new(
        algorithm: Algorithm,
        secret: &[u8],
        name: Name,
        ephemeral: bool,
    ) -> Self {
        Key {
            algorithm,
            name,
            secret: secret.to_vec(),
            inception: None,
            expiration: None,
            ephemeral,
        }
    }

    /// Sets the validity window of the key.
    pub fn set_validity(&mut self, inception: u64, expiration: u64) {
        self.inception = Some(inception);
        self.expiration = Some(expiration);
    }

    /// Returns the algorithm of this key.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Returns a reference to the name of this key.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Returns the secret octets.
    ///
    /// This is the one place key material leaves the key; it exists for
    /// callers that persist the key, and they alone are responsible for
    /// where the copy ends up.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Returns whether the key was negotiated rather than provisioned.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Returns the validity window, if one was recorded.
    pub fn validity(&self) -> Option<(u64, u64)> {
        Some((self.inception?, self.expiration?))
    }

    /// Returns whether the key has expired at the given time.
    ///
    /// Expiry is advisory: the ring keeps expired keys until deleted and
    /// callers decide when to check.
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.expiration {
            Some(expiration) => now >= expiration,
            None => false,
        }
    }

    /// Creates a MAC context for this key.
    fn context(&self) -> MacContext {
        MacContext::new(self.algorithm, &self.secret)
    }
}

//--- Debug

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The secret stays out of all output.
        f.debug_struct("Key")
            .field("algorithm", &self.algorithm)
            .field("name", &self.name)
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

impl AsRef<Key> for Key {
    fn as_ref(&self) -> &Self {
        self
    }
}

//------------ KeyRing -------------------------------------------------------

/// A concurrent store of authentication keys.
///
/// The ring maps a pair of key name and optional peer address scope to a
/// key. There is at most one key per pair. Lookups run concurrently;
/// mutations take the write lock for the duration of a single map
/// operation only. A caller holding a returned [`Arc<Key>`] keeps the key
/// alive even after it has been deleted from the index; the secret is
/// freed when the last holder lets go.
#[derive(Debug, Default)]
pub struct KeyRing {
    /// The index of keys.
    keys: RwLock<HashMap<(Name, Option<IpAddr>), Arc<Key>>>,
}

impl KeyRing {
    /// Creates an empty key ring.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a key to the ring.
    ///
    /// Fails if the ring already has a key for the same name and scope.
    pub fn create(
        &self,
        key: Key,
        scope: Option<IpAddr>,
    ) -> Result<Arc<Key>, KeyRingError> {
        let key = Arc::new(key);
        let mut keys = self.keys.write().expect("poisoned key ring");
        match keys.entry((key.name().clone(), scope)) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(KeyRingError::Duplicate)
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(key.clone());
                Ok(key)
            }
        }
    }

    /// Looks up a key by name and scope.
    ///
    /// A scoped lookup falls back to an unscoped key of the same name.
    pub fn lookup(
        &self,
        name: &Name,
        scope: Option<IpAddr>,
    ) -> Result<Arc<Key>, KeyRingError> {
        let keys = self.keys.read().expect("poisoned key ring");
        if let Some(key) = keys.get(&(name.clone(), scope)) {
            return Ok(key.clone());
        }
        if scope.is_some() {
            if let Some(key) = keys.get(&(name.clone(), None)) {
                return Ok(key.clone());
            }
        }
        Err(KeyRingError::NotFound)
    }

    /// Removes a key from the ring.
    ///
    /// Holders of the key keep it alive; the ring merely stops handing
    /// it out.
    pub fn delete(
        &self,
        name: &Name,
        scope: Option<IpAddr>,
    ) -> Result<(), KeyRingError> {
        let mut keys = self.keys.write().expect("poisoned key ring");
        match keys.remove(&(name.clone(), scope)) {
            Some(_) => Ok(()),
            None => Err(KeyRingError::NotFound),
        }
    }

    /// Looks up a key for server-side verification.
    ///
    /// Returns the key only if its algorithm matches the one named in the
    /// received TSIG record.
    fn get_key(
        &self,
        name: &Name,
        algorithm: Algorithm,
        scope: Option<IpAddr>,
    ) -> Option<Arc<Key>> {
        self.lookup(name, scope)
            .ok()
            .filter(|key| key.algorithm() == algorithm)
    }

    /// Returns the number of keys in the ring.
    pub fn len(&self) -> usize {
        self.keys.read().expect("poisoned key ring").len()
    }

    /// Returns whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//------------ Variables -----------------------------------------------------

/// The TSIG variables that enter the MAC besides the message itself.
#[derive(Clone, Debug)]
struct Variables {
    /// The time the signature was created.
    time_signed: Time48,

    /// The permitted clock error.
    fudge: u16,

    /// The TSIG error code.
    error: TsigRcode,

    /// The content of the other field: a server timestamp or nothing.
    other: Option<Time48>,
}

impl Variables {
    /// Creates a new value from the parts.
    fn new(
        time_signed: Time48,
        fudge: u16,
        error: TsigRcode,
        other: Option<Time48>,
    ) -> Self {
        Variables {
            time_signed,
            fudge,
            error,
            other,
        }
    }

    /// Recovers the variables from a received TSIG record.
    fn from_tsig(tsig: &Tsig) -> Self {
        Variables::new(
            tsig.time_signed(),
            tsig.fudge(),
            tsig.error(),
            tsig.other_time(),
        )
    }

    /// Applies the variables to a MAC context.
    fn sign(&self, key: &Key, context: &mut MacContext) {
        let mut buf = Composer::with_limit(512);
        // Key name in canonical wire format.
        key.name()
            .compose_canonical(&mut buf)
            .expect("key name fits");
        // CLASS, always ANY, and TTL, always 0.
        buf.append_u16_be(Class::ANY.to_int()).expect("fits");
        buf.append_u32_be(0).expect("fits");
        context.update(buf.as_slice());
        // Algorithm name in canonical wire format.
        context.update(key.algorithm().as_wire_slice());
        // Time signed and fudge.
        context.update(&self.time_signed.into_octets());
        context.update(&self.fudge.to_be_bytes());
        // Error and other data.
        context.update(&self.error.to_int().to_be_bytes());
        match self.other {
            Some(time) => {
                context.update(&6u16.to_be_bytes());
                context.update(&time.into_octets());
            }
            None => context.update(&0u16.to_be_bytes()),
        }
    }

    /// Produces the TSIG record data for these variables.
    fn to_tsig(&self, key: &Key, mac: Vec<u8>, original_id: u16) -> Tsig {
        let other = match self.other {
            Some(time) => time.into_octets().to_vec(),
            None => Vec::new(),
        };
        Tsig::new(
            key.algorithm().to_name(),
            self.time_signed,
            self.fudge,
            mac,
            original_id,
            self.error,
            other,
        )
    }
}

//------------ MessageTsig ---------------------------------------------------

/// The TSIG record found in a received message.
struct MessageTsig {
    /// The parsed record data.
    data: Tsig,

    /// The owner name of the record.
    owner: Name,

    /// The offset of the start of the record within the message.
    start: usize,
}

impl MessageTsig {
    /// Finds the TSIG record of a message.
    ///
    /// The record must be the last record of the additional section.
    /// Returns `None` if the last record is of some other type or the
    /// section is empty; a TSIG anywhere else is treated as absent since
    /// the MAC could not cover it correctly anyway.
    fn from_message(msg: &Message) -> Result<Option<Self>, ValidationError> {
        let mut last: Option<ParsedRecord> = None;
        for record in msg.additional()? {
            last = Some(record?);
        }
        let record = match last {
            Some(record)
                if record.rtype
                    == crate::base::iana::Rtype::TSIG =>
            {
                record
            }
            _ => return Ok(None),
        };
        let data = Tsig::parse_record(&record)?;
        Ok(Some(MessageTsig {
            data,
            owner: record.owner.clone(),
            start: record.start(),
        }))
    }
}

/// Digests a message with its TSIG record stripped.
///
/// The header is fed with the ID restored to the original ID from the
/// TSIG record and the additional count decremented by one, followed by
/// the body up to the start of the TSIG record.
fn update_stripped(
    context: &mut MacContext,
    msg: &Message,
    tsig: &MessageTsig,
) {
    let mut header = msg.header();
    header.set_id(tsig.data.original_id());
    let mut counts = msg.counts();
    counts.arcount = counts.arcount.saturating_sub(1);
    let mut front = Composer::with_limit(HEADER_LEN);
    header.compose(&mut front).expect("header fits");
    counts.compose(&mut front).expect("counts fit");
    context.update(front.as_slice());
    context.update(&msg.as_slice()[HEADER_LEN..tsig.start]);
}

/// Feeds a MAC into a context, prefixed by its 16 bit length.
fn update_mac(context: &mut MacContext, mac: &[u8]) {
    context.update(&(mac.len() as u16).to_be_bytes());
    context.update(mac);
}

//------------ ClientTransaction ---------------------------------------------

/// TSIG client transaction state.
///
/// Created by signing a request via [`request`][Self::request]; afterwards
/// [`answer`][Self::answer] checks whether a received message correctly
/// signs the response to that request.
#[derive(Clone, Debug)]
pub struct ClientTransaction {
    /// The key the transaction is signed with.
    key: Arc<Key>,

    /// The MAC of the request, which the answer's MAC must cover.
    request_mac: Vec<u8>,

    /// The transaction ID of the request.
    original_id: u16,
}

impl ClientTransaction {
    /// Signs a request with the default fudge of 300 seconds.
    ///
    /// The builder must contain the complete message; the TSIG record is
    /// appended as the final additional record. Returns the transaction
    /// state needed to validate the answer.
    pub fn request(
        key: Arc<Key>,
        message: &mut MessageBuilder,
        now: Time48,
    ) -> Result<Self, TruncationError> {
        Self::request_with_fudge(key, message, now, DEFAULT_FUDGE)
    }

    /// Signs a request with an explicit fudge.
    pub fn request_with_fudge(
        key: Arc<Key>,
        message: &mut MessageBuilder,
        now: Time48,
        fudge: u16,
    ) -> Result<Self, TruncationError> {
        let variables =
            Variables::new(now, fudge, TsigRcode::NOERROR, None);
        let mut context = key.context();
        context.update(message.as_slice());
        variables.sign(&key, &mut context);
        let mac = context.finalize();
        let original_id = message.header().id();
        let tsig = variables.to_tsig(&key, mac.clone(), original_id);
        message.push_additional(key.name(), Class::ANY, 0, &tsig)?;
        Ok(ClientTransaction {
            key,
            request_mac: mac,
            original_id,
        })
    }

    /// Validates an answer to this transaction.
    ///
    /// The message must carry a TSIG record as its final additional
    /// record; a response without one is an authentication failure, not
    /// an acceptable plain response.
    pub fn answer(
        &self,
        message: &Message,
        now: Time48,
    ) -> Result<(), ValidationError> {
        let tsig = match MessageTsig::from_message(message)? {
            Some(tsig) => tsig,
            None => return Err(ValidationError::ServerUnsigned),
        };

        if tsig.data.original_id() != self.original_id {
            return Err(ValidationError::BadId);
        }
        if tsig.owner != *self.key.name()
            || *tsig.data.algorithm() != self.key.algorithm().to_name()
        {
            return Err(ValidationError::BadKey);
        }

        // Unsigned errors reported by the server.
        if message.header().rcode() == Rcode::NOTAUTH {
            match tsig.data.error() {
                TsigRcode::BADKEY => {
                    return Err(ValidationError::ServerBadKey)
                }
                TsigRcode::BADSIG => {
                    return Err(ValidationError::ServerBadSig)
                }
                _ => {}
            }
        }

        // The MAC check comes before the time check so a manipulated
        // timestamp cannot direct us into the wrong error path.
        let variables = Variables::from_tsig(&tsig.data);
        let mut context = self.key.context();
        update_mac(&mut context, &self.request_mac);
        update_stripped(&mut context, message, &tsig);
        variables.sign(&self.key, &mut context);
        context.verify_truncated(
            tsig.data.mac(),
            self.key.algorithm().min_mac_len(),
        )?;

        if message.header().rcode() == Rcode::NOTAUTH
            && tsig.data.error() == TsigRcode::BADTIME
        {
            let server = match tsig.data.other_time() {
                Some(time) => time,
                None => return Err(ValidationError::FormErr),
            };
            return Err(ValidationError::ServerBadTime {
                client: tsig.data.time_signed(),
                server,
            });
        }
        if !tsig.data.is_valid_at(now) {
            return Err(ValidationError::BadTime);
        }
        Ok(())
    }

    /// Returns a reference to the transaction's key.
    pub fn key(&self) -> &Arc<Key> {
        &self.key
    }
}

//------------ ServerTransaction ---------------------------------------------

/// TSIG server transaction state.
///
/// Checks a received request against the keys in a ring and signs the
/// answer to it.
#[derive(Clone, Debug)]
pub struct ServerTransaction {
    /// The key the request was signed with.
    key: Arc<Key>,

    /// The MAC of the request.
    request_mac: Vec<u8>,
}

impl ServerTransaction {
    /// Checks a received request.
    ///
    /// Returns `Ok(None)` if the message carries no TSIG record at all.
    /// Otherwise the TSIG record must verify against a key from the
    /// ring; the error case carries the extended rcode that should go
    /// into the error response.
    pub fn request(
        ring: &KeyRing,
        scope: Option<IpAddr>,
        message: &Message,
        now: Time48,
    ) -> Result<Option<Self>, ServerError> {
        let tsig = match MessageTsig::from_message(message)
            .map_err(|_| ServerError::new(TsigRcode::BADSIG))?
        {
            Some(tsig) => tsig,
            None => return Ok(None),
        };

        let algorithm = match Algorithm::from_name(tsig.data.algorithm()) {
            Some(algorithm) => algorithm,
            None => return Err(ServerError::new(TsigRcode::BADKEY)),
        };
        let key = match ring.get_key(&tsig.owner, algorithm, scope) {
            Some(key) => key,
            None => return Err(ServerError::new(TsigRcode::BADKEY)),
        };

        // MAC before time, as for the client side.
        let variables = Variables::from_tsig(&tsig.data);
        let mut context = key.context();
        update_stripped(&mut context, message, &tsig);
        variables.sign(&key, &mut context);
        context
            .verify_truncated(tsig.data.mac(), algorithm.min_mac_len())
            .map_err(|err| match err {
                ValidationError::BadTrunc => {
                    ServerError::new(TsigRcode::BADTRUNC)
                }
                _ => ServerError::new(TsigRcode::BADSIG),
            })?;

        if !tsig.data.is_valid_at(now) {
            return Err(ServerError::new(TsigRcode::BADTIME));
        }

        Ok(Some(ServerTransaction {
            key,
            request_mac: tsig.data.mac().to_vec(),
        }))
    }

    /// Signs an answer.
    ///
    /// The builder must contain the complete response; the TSIG record
    /// is appended as the final additional record.
    pub fn answer(
        self,
        message: &mut MessageBuilder,
        now: Time48,
    ) -> Result<(), TruncationError> {
        let variables =
            Variables::new(now, DEFAULT_FUDGE, TsigRcode::NOERROR, None);
        let mut context = self.key.context();
        update_mac(&mut context, &self.request_mac);
        context.update(message.as_slice());
        variables.sign(&self.key, &mut context);
        let mac = context.finalize();
        let original_id = message.header().id();
        let tsig = variables.to_tsig(&self.key, mac, original_id);
        message.push_additional(self.key.name(), Class::ANY, 0, &tsig)
    }

    /// Returns a reference to the transaction's key.
    pub fn key(&self) -> &Arc<Key> {
        &self.key
    }
}

//============ Error Types ===================================================

//------------ ValidationError -----------------------------------------------

/// An error happened while validating a TSIG-signed message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationError {
    /// The MAC did not verify.
    BadSig,

    /// The MAC was truncated below the acceptable minimum.
    BadTrunc,

    /// The message was signed with a different key or algorithm.
    BadKey,

    /// The time signed lies outside the fudge window.
    BadTime,

    /// The embedded original ID does not match the outstanding query.
    BadId,

    /// The TSIG record was malformed.
    FormErr,

    /// The response to a signed query carried no signature at all.
    ServerUnsigned,

    /// The server did not recognize the key.
    ServerBadKey,

    /// The server failed to verify our MAC.
    ServerBadSig,

    /// The server reported our clock as out of range.
    ServerBadTime {
        /// The time we signed with.
        client: Time48,

        /// The server's own time.
        server: Time48,
    },
}

//--- From

impl From<ParseError> for ValidationError {
    fn from(_: ParseError) -> Self {
        ValidationError::FormErr
    }
}

//--- Display and Error

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ValidationError::BadSig => f.write_str("bad signature"),
            ValidationError::BadTrunc => f.write_str("short signature"),
            ValidationError::BadKey => f.write_str("unknown key"),
            ValidationError::BadTime => f.write_str("bad time"),
            ValidationError::BadId => f.write_str("original ID mismatch"),
            ValidationError::FormErr => f.write_str("format error"),
            ValidationError::ServerUnsigned => {
                f.write_str("unsigned answer")
            }
            ValidationError::ServerBadKey => {
                f.write_str("unknown key on server")
            }
            ValidationError::ServerBadSig => {
                f.write_str("server failed to verify MAC")
            }
            ValidationError::ServerBadTime { .. } => {
                f.write_str("server reported bad time")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

//------------ ServerError ---------------------------------------------------

/// A TSIG record of a received request could not be validated.
///
/// Carries the extended rcode to report back to the client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ServerError {
    /// The extended rcode describing the failure.
    error: TsigRcode,
}

impl ServerError {
    /// Creates a new error from the rcode to report.
    fn new(error: TsigRcode) -> Self {
        ServerError { error }
    }

    /// Returns the extended rcode describing the failure.
    pub fn error(self) -> TsigRcode {
        self.error
    }
}

//--- Display and Error

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for ServerError {}

//------------ AlgorithmError ------------------------------------------------

/// An invalid algorithm was provided.
#[derive(Clone, Copy, Debug)]
pub struct AlgorithmError;

//--- Display and Error

impl fmt::Display for AlgorithmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid algorithm")
    }
}

impl std::error::Error for AlgorithmError {}

//------------ KeyRingError --------------------------------------------------

/// The key ring was misused.
///
/// Both variants are of the programmer error class: they indicate a caller
/// managing key lifecycles incorrectly rather than a runtime condition to
/// recover from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyRingError {
    /// A key already exists for the given name and scope.
    Duplicate,

    /// No key exists for the given name and scope.
    NotFound,
}

//--- Display and Error

impl fmt::Display for KeyRingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            KeyRingError::Duplicate => f.write_str("duplicate key"),
            KeyRingError::NotFound => f.write_str("key not found"),
        }
    }
}

impl std::error::Error for KeyRingError {}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::iana::{Opcode, Rtype};
    use crate::base::message::MessageBuilder;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn test_key(secret: &[u8]) -> Arc<Key> {
        Arc::new(Key::new(
            Algorithm::HmacSha256,
            secret,
            name("test.key"),
            false,
        ))
    }

    fn build_query(id: u16) -> MessageBuilder {
        let mut builder = MessageBuilder::new(512);
        builder.update_header(|header| {
            header.set_id(id);
            header.set_opcode(Opcode::QUERY);
        });
        builder
            .push_question(&name("example.com"), Rtype::TKEY, Class::ANY)
            .unwrap();
        builder
    }

    fn build_response(query: &Message) -> MessageBuilder {
        let mut builder = MessageBuilder::new(512);
        builder.update_header(|header| {
            header.set_id(query.header().id());
            header.set_qr(true);
        });
        let question = query.first_question().unwrap().unwrap();
        builder
            .push_question(&question.qname, question.qtype, question.qclass)
            .unwrap();
        builder
    }

    /// Returns the TSIG record data of a signed message.
    fn message_tsig(msg: &Message) -> Tsig {
        let record = msg
            .additional()
            .unwrap()
            .map(Result::unwrap)
            .last()
            .unwrap();
        Tsig::parse_record(&record).unwrap()
    }

    #[test]
    fn algorithm_names() {
        for alg in [
            Algorithm::HmacMd5,
            Algorithm::HmacSha1,
            Algorithm::HmacSha256,
            Algorithm::HmacSha384,
            Algorithm::HmacSha512,
        ] {
            assert_eq!(Algorithm::from_name(&alg.to_name()), Some(alg));
        }
        assert_eq!(
            Algorithm::from_name(&name("hmac-md5.sig-alg.reg.int")),
            Some(Algorithm::HmacMd5)
        );
        assert_eq!(Algorithm::from_name(&name("hmac-fancy")), None);
    }

    #[test]
    fn exchange_round_trip() {
        let key = test_key(b"secret-secret-secret");
        let ring = KeyRing::new();
        ring.create(
            Key::new(
                Algorithm::HmacSha256,
                b"secret-secret-secret",
                name("test.key"),
                false,
            ),
            None,
        )
        .unwrap();

        let now = Time48::from_u64(1_700_000_000);
        let mut query = build_query(0x1234);
        let transaction =
            ClientTransaction::request(key, &mut query, now).unwrap();
        let query = query.freeze();

        let server =
            ServerTransaction::request(&ring, None, &query, now)
                .unwrap()
                .unwrap();
        let mut response = build_response(&query);
        server.answer(&mut response, now).unwrap();
        let response = response.freeze();

        transaction.answer(&response, now).unwrap();
    }

    #[test]
    fn wrong_key_rejected() {
        let key = test_key(b"right-key");
        let now = Time48::from_u64(1_700_000_000);
        let mut query = build_query(1);
        let transaction =
            ClientTransaction::request(key, &mut query, now).unwrap();
        let query = query.freeze();

        // The server signs with the same name but a different secret.
        let ring = KeyRing::new();
        ring.create(
            Key::new(
                Algorithm::HmacSha256,
                b"wrong-key",
                name("test.key"),
                false,
            ),
            None,
        )
        .unwrap();
        // Server-side verification already fails on the different secret.
        assert!(
            ServerTransaction::request(&ring, None, &query, now).is_err()
        );

        // A response signed with the wrong secret must not verify either.
        let server = ServerTransaction {
            key: ring.lookup(&name("test.key"), None).unwrap(),
            request_mac: transaction.request_mac.clone(),
        };
        let mut response = build_response(&query);
        server.answer(&mut response, now).unwrap();
        assert_eq!(
            transaction.answer(&response.freeze(), now),
            Err(ValidationError::BadSig)
        );
    }

    #[test]
    fn tampered_body_rejected() {
        let key = test_key(b"tamper-key");
        let now = Time48::from_u64(1_700_000_000);
        let mut query = build_query(2);
        let transaction =
            ClientTransaction::request(key.clone(), &mut query, now)
                .unwrap();
        let query = query.freeze();

        let server = ServerTransaction {
            key,
            request_mac: transaction.request_mac.clone(),
        };
        let mut response = build_response(&query);
        server.answer(&mut response, now).unwrap();
        let mut octets = response.freeze().as_slice().to_vec();
        // Flip a bit in the question name.
        octets[HEADER_LEN + 1] ^= 0x20;
        let tampered = Message::from_octets(octets.into()).unwrap();
        assert_eq!(
            transaction.answer(&tampered, now),
            Err(ValidationError::BadSig)
        );
    }

    #[test]
    fn stale_signature_rejected() {
        let key = test_key(b"stale-key");
        let now = Time48::from_u64(1_700_000_000);
        let mut query = build_query(3);
        let transaction =
            ClientTransaction::request(key.clone(), &mut query, now)
                .unwrap();
        let query = query.freeze();

        let server = ServerTransaction {
            key,
            request_mac: transaction.request_mac.clone(),
        };
        let mut response = build_response(&query);
        server.answer(&mut response, now).unwrap();
        let response = response.freeze();

        let late = Time48::from_u64(1_700_000_000 + 301);
        assert_eq!(
            transaction.answer(&response, late),
            Err(ValidationError::BadTime)
        );
    }

    #[test]
    fn unsigned_answer_rejected() {
        let key = test_key(b"unsigned-key");
        let now = Time48::from_u64(1_700_000_000);
        let mut query = build_query(4);
        let transaction =
            ClientTransaction::request(key, &mut query, now).unwrap();
        let query = query.freeze();

        let response = build_response(&query).freeze();
        assert_eq!(
            transaction.answer(&response, now),
            Err(ValidationError::ServerUnsigned)
        );
    }

    #[test]
    fn mismatched_original_id_rejected() {
        let key = test_key(b"id-key");
        let now = Time48::from_u64(1_700_000_000);
        let mut query = build_query(5);
        let transaction =
            ClientTransaction::request(key.clone(), &mut query, now)
                .unwrap();
        let query = query.freeze();

        let server = ServerTransaction {
            key: key.clone(),
            request_mac: transaction.request_mac.clone(),
        };
        let mut response = build_response(&query);
        server.answer(&mut response, now).unwrap();
        let tsig = message_tsig(&response.freeze());

        // Rebuild the response with the TSIG pointing at another query.
        let resigned = Tsig::new(
            tsig.algorithm().clone(),
            tsig.time_signed(),
            tsig.fudge(),
            tsig.mac().to_vec(),
            tsig.original_id().wrapping_add(1),
            tsig.error(),
            tsig.other().to_vec(),
        );
        let mut response = build_response(&query);
        response
            .push_additional(key.name(), Class::ANY, 0, &resigned)
            .unwrap();
        assert_eq!(
            transaction.answer(&response.freeze(), now),
            Err(ValidationError::BadId)
        );
    }

    #[test]
    fn truncated_mac_accepted() {
        let key = test_key(b"trunc-key");
        let now = Time48::from_u64(1_700_000_000);
        let mut query = build_query(6);
        let transaction =
            ClientTransaction::request(key.clone(), &mut query, now)
                .unwrap();
        let query = query.freeze();

        let server = ServerTransaction {
            key: key.clone(),
            request_mac: transaction.request_mac.clone(),
        };
        let mut response = build_response(&query);
        server.answer(&mut response, now).unwrap();
        let tsig = message_tsig(&response.freeze());

        // Half the native length is the shortest acceptable SHA-256 MAC.
        let keep = Algorithm::HmacSha256.min_mac_len();
        assert_eq!(keep, 16);
        let truncated = Tsig::new(
            tsig.algorithm().clone(),
            tsig.time_signed(),
            tsig.fudge(),
            tsig.mac()[..keep].to_vec(),
            tsig.original_id(),
            tsig.error(),
            Vec::new(),
        );
        let mut response = build_response(&query);
        response
            .push_additional(key.name(), Class::ANY, 0, &truncated)
            .unwrap();
        assert_eq!(transaction.answer(&response.freeze(), now), Ok(()));
    }

    #[test]
    fn overtruncated_mac_rejected() {
        let key = test_key(b"trunc-key");
        let now = Time48::from_u64(1_700_000_000);
        let mut query = build_query(7);
        let transaction =
            ClientTransaction::request(key.clone(), &mut query, now)
                .unwrap();
        let query = query.freeze();

        let server = ServerTransaction {
            key: key.clone(),
            request_mac: transaction.request_mac.clone(),
        };
        let mut response = build_response(&query);
        server.answer(&mut response, now).unwrap();
        let tsig = message_tsig(&response.freeze());

        // One octet below the permitted minimum.
        let keep = Algorithm::HmacSha256.min_mac_len() - 1;
        let truncated = Tsig::new(
            tsig.algorithm().clone(),
            tsig.time_signed(),
            tsig.fudge(),
            tsig.mac()[..keep].to_vec(),
            tsig.original_id(),
            tsig.error(),
            Vec::new(),
        );
        let mut response = build_response(&query);
        response
            .push_additional(key.name(), Class::ANY, 0, &truncated)
            .unwrap();
        assert_eq!(
            transaction.answer(&response.freeze(), now),
            Err(ValidationError::BadTrunc)
        );
    }

    #[test]
    fn validity_is_advisory() {
        let mut key = Key::new(
            Algorithm::HmacSha256,
            b"window",
            name("window.key"),
            true,
        );
        assert_eq!(key.validity(), None);
        assert!(!key.is_expired_at(u64::MAX));

        key.set_validity(1_700_000_000, 1_700_003_600);
        assert_eq!(key.validity(), Some((1_700_000_000, 1_700_003_600)));
        assert!(!key.is_expired_at(1_700_003_599));
        assert!(key.is_expired_at(1_700_003_600));
    }

    #[test]
    fn key_ring_duplicate_and_delete() {
        let ring = KeyRing::new();
        let make = || {
            Key::new(Algorithm::HmacMd5, b"abc", name("dup.key"), false)
        };
        let handle = ring.create(make(), None).unwrap();
        assert_eq!(
            ring.create(make(), None).unwrap_err(),
            KeyRingError::Duplicate
        );
        // Same name under a peer scope is a separate entry.
        let scope = Some("192.0.2.1".parse().unwrap());
        ring.create(make(), scope).unwrap();
        assert_eq!(ring.len(), 2);

        ring.delete(&name("dup.key"), None).unwrap();
        assert_eq!(
            ring.delete(&name("dup.key"), None).unwrap_err(),
            KeyRingError::NotFound
        );
        // The held handle keeps the key alive after deletion.
        assert_eq!(handle.name(), &name("dup.key"));
        // Scoped lookup falls back to unscoped entries only.
        assert!(ring.lookup(&name("dup.key"), scope).is_ok());
        assert_eq!(
            ring.lookup(&name("dup.key"), None).unwrap_err(),
            KeyRingError::NotFound
        );
    }
}
