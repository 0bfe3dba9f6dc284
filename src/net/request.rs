//! The lifecycle of an outstanding request.
//!
//! A [`Connection`] sends queries and returns a [`RequestHandle`] for
//! each. The handle resolves to the authenticated response or an error;
//! it can also be cancelled, which tears down the pending state so a
//! late response cannot complete the request anymore.
//!
//! Over UDP a request that times out is retransmitted exactly once, with
//! the same transaction ID, before failing. Over TCP a timeout fails the
//! request immediately. Transient send failures are retried up to a
//! bounded count. When a TSIG transaction is supplied, the response is
//! verified before the caller ever sees it; a response that fails
//! verification surfaces as an authentication error, never as a message.

use crate::base::message::Message;
use crate::net::dispatch::Dispatch;
use crate::precondition;
use crate::rdata::tsig::Time48;
use crate::tsig::{ClientTransaction, ValidationError};
use core::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

//------------ Configuration Constants ---------------------------------------

/// The default timeout per transmission.
const TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

/// The range the timeout can be set to.
const TIMEOUT_RANGE: (Duration, Duration) =
    (Duration::from_millis(1), Duration::from_secs(60));

/// The default number of transient send failures tolerated.
const SEND_RETRIES_DEFAULT: u8 = 2;

/// The most transient send failures a request can be told to tolerate.
const SEND_RETRIES_MAX: u8 = 10;

//------------ RequestOptions ------------------------------------------------

/// Per-request options.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// Use TCP instead of the datagram dispatch.
    force_tcp: bool,

    /// Local address to bind a TCP connection to.
    ///
    /// The datagram socket is shared and bound when its dispatch is
    /// created, so this only affects TCP requests.
    source: Option<SocketAddr>,

    /// Time to wait for a response per transmission.
    timeout: Duration,

    /// Number of transient send failures tolerated.
    send_retries: u8,
}

impl RequestOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns whether the request goes over TCP.
    pub fn force_tcp(&self) -> bool {
        self.force_tcp
    }

    /// Sets whether the request goes over TCP.
    pub fn set_force_tcp(&mut self, force_tcp: bool) {
        self.force_tcp = force_tcp
    }

    /// Returns the source address override for TCP requests.
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Sets the source address for TCP requests.
    pub fn set_source(&mut self, source: Option<SocketAddr>) {
        self.source = source
    }

    /// Returns the per-transmission timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the per-transmission timeout.
    ///
    /// Out-of-range values are silently trimmed to fit. The default is
    /// five seconds.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout.clamp(TIMEOUT_RANGE.0, TIMEOUT_RANGE.1)
    }

    /// Returns the number of transient send failures tolerated.
    pub fn send_retries(&self) -> u8 {
        self.send_retries
    }

    /// Sets the number of transient send failures tolerated.
    ///
    /// Out-of-range values are silently trimmed to fit.
    pub fn set_send_retries(&mut self, retries: u8) {
        self.send_retries = retries.min(SEND_RETRIES_MAX)
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            force_tcp: false,
            source: None,
            timeout: TIMEOUT_DEFAULT,
            send_retries: SEND_RETRIES_DEFAULT,
        }
    }
}

//------------ Connection ----------------------------------------------------

/// A request-sending endpoint bound to one worker loop.
#[derive(Debug)]
pub struct Connection {
    /// The dispatch demultiplexing datagram responses.
    dispatch: Arc<Dispatch>,

    /// The worker loop the connection belongs to.
    owner: ThreadId,
}

impl Connection {
    /// Creates a connection with a freshly bound dispatch socket.
    ///
    /// Must be called from within a runtime; the dispatch receive loop
    /// is spawned onto it.
    pub async fn new() -> Result<Self, Error> {
        let dispatch = Dispatch::bind(None).await?;
        dispatch.spawn_receiver();
        Ok(Self::with_dispatch(dispatch))
    }

    /// Creates a connection over an existing dispatch.
    ///
    /// The caller is responsible for the dispatch's receive loop
    /// running.
    pub fn with_dispatch(dispatch: Arc<Dispatch>) -> Self {
        Connection {
            dispatch,
            owner: thread::current().id(),
        }
    }

    /// Returns the dispatch of this connection.
    pub fn dispatch(&self) -> &Arc<Dispatch> {
        &self.dispatch
    }

    /// Starts a request.
    ///
    /// The query must be fully built and signed. For a datagram request
    /// its transaction ID should come from
    /// [`Dispatch::allocate_id`] so it cannot collide with another
    /// pending request to the same peer. If `verify` is given, the
    /// response is checked against it before being handed out.
    pub fn request(
        &self,
        target: SocketAddr,
        query: Message,
        verify: Option<ClientTransaction>,
        options: RequestOptions,
    ) -> RequestHandle {
        let (result_tx, result_rx) = oneshot::channel();
        let (registration, task) = if options.force_tcp {
            let task = tokio::spawn(async move {
                let res = stream_exchange(target, &query, &options)
                    .await
                    .and_then(|msg| finish(msg, verify));
                let _ = result_tx.send(res);
            });
            (None, task)
        } else {
            let id = query.header().id();
            let (tx, mut rx) = oneshot::channel();
            self.dispatch.register(id, target, tx);
            let dispatch = self.dispatch.clone();
            let task = tokio::spawn(async move {
                let res =
                    dgram_exchange(&dispatch, target, &query, &options, &mut rx)
                        .await
                        .and_then(|msg| finish(msg, verify));
                if res.is_err() {
                    dispatch.unregister(id, target);
                }
                let _ = result_tx.send(res);
            });
            (Some((self.dispatch.clone(), id, target)), task)
        };
        RequestHandle {
            result: result_rx,
            task,
            registration,
            owner: self.owner,
        }
    }
}

//------------ RequestHandle -------------------------------------------------

/// A handle on an outstanding request.
#[derive(Debug)]
pub struct RequestHandle {
    /// Receives the outcome of the request.
    result: oneshot::Receiver<Result<Message, Error>>,

    /// The task driving the request.
    task: JoinHandle<()>,

    /// The dispatch entry to tear down on cancellation, if any.
    registration: Option<(Arc<Dispatch>, u16, SocketAddr)>,

    /// The worker loop the request was created on.
    owner: ThreadId,
}

impl RequestHandle {
    /// Waits for the outcome of the request.
    pub async fn response(self) -> Result<Message, Error> {
        match self.result.await {
            Ok(res) => res,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Cancels the request.
    ///
    /// The dispatch registration is removed before this returns, so a
    /// response arriving afterwards is dropped like any other unmatched
    /// datagram.
    ///
    /// # Panics
    ///
    /// Cancelling from a different worker loop than the one the request
    /// was created on is a precondition violation.
    pub fn cancel(self) {
        precondition!(
            thread::current().id() == self.owner,
            "request cancelled from a foreign worker loop"
        );
        if let Some((dispatch, id, peer)) = self.registration {
            dispatch.unregister(id, peer);
        }
        self.task.abort();
    }
}

//------------ Exchange Drivers ----------------------------------------------

/// Verifies a received response and hands it out.
fn finish(
    message: Message,
    verify: Option<ClientTransaction>,
) -> Result<Message, Error> {
    if let Some(transaction) = verify {
        transaction
            .answer(&message, Time48::now())
            .map_err(Error::Authentication)?;
    }
    Ok(message)
}

/// Parses a response and checks it answers the query.
fn check_response(octets: Vec<u8>, query: &Message) -> Result<Message, Error> {
    let message =
        Message::from_octets(octets.into()).map_err(|_| Error::Malformed)?;
    if !message.is_answer(query) {
        return Err(Error::Malformed);
    }
    Ok(message)
}

/// Sends a datagram, tolerating a bounded number of transient failures.
async fn send_bounded(
    dispatch: &Dispatch,
    octets: &[u8],
    target: SocketAddr,
    retries: u8,
) -> Result<(), Error> {
    let mut attempt = 0;
    loop {
        match dispatch.send(octets, target).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt >= retries {
                    return Err(Error::Transport(Arc::new(err)));
                }
                attempt += 1;
                warn!(%target, error = %err, attempt, "send failed, retrying");
            }
        }
    }
}

/// Runs a request over the datagram dispatch.
///
/// A timeout triggers exactly one retransmission, carrying the same
/// transaction ID; a second timeout is terminal.
async fn dgram_exchange(
    dispatch: &Dispatch,
    target: SocketAddr,
    query: &Message,
    options: &RequestOptions,
    rx: &mut oneshot::Receiver<Vec<u8>>,
) -> Result<Message, Error> {
    let mut retransmitted = false;
    loop {
        send_bounded(
            dispatch,
            query.as_slice(),
            target,
            options.send_retries,
        )
        .await?;
        match timeout(options.timeout, &mut *rx).await {
            Ok(Ok(octets)) => return check_response(octets, query),
            Ok(Err(_)) => return Err(Error::Cancelled),
            Err(_) => {
                if retransmitted {
                    return Err(Error::Timeout);
                }
                retransmitted = true;
                debug!(%target, "timeout, retransmitting");
            }
        }
    }
}

/// Runs a request over a fresh TCP connection.
///
/// Messages are framed with a 16 bit length prefix. A timeout is
/// terminal; TCP retransmits on its own.
async fn stream_exchange(
    target: SocketAddr,
    query: &Message,
    options: &RequestOptions,
) -> Result<Message, Error> {
    let exchange = async {
        let mut stream = match options.source {
            Some(source) => {
                let socket = if target.is_ipv4() {
                    TcpSocket::new_v4()?
                } else {
                    TcpSocket::new_v6()?
                };
                socket.bind(source)?;
                socket.connect(target).await?
            }
            None => TcpStream::connect(target).await?,
        };
        let octets = query.as_slice();
        stream
            .write_all(&(octets.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(octets).await?;
        stream.flush().await?;

        let mut len = [0u8; 2];
        stream.read_exact(&mut len).await?;
        let mut octets = vec![0u8; usize::from(u16::from_be_bytes(len))];
        stream.read_exact(&mut octets).await?;
        Ok::<_, io::Error>(octets)
    };
    let octets = timeout(options.timeout, exchange)
        .await
        .map_err(|_| Error::Timeout)??;
    check_response(octets, query)
}

//============ Error Type ====================================================

/// An error happened while handling a request.
#[derive(Clone, Debug)]
pub enum Error {
    /// Sending or connecting failed even after retries.
    Transport(Arc<io::Error>),

    /// No response arrived in time.
    Timeout,

    /// The response did not parse or did not answer the query.
    Malformed,

    /// The response failed TSIG verification.
    Authentication(ValidationError),

    /// The request was cancelled.
    Cancelled,
}

//--- From

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(Arc::new(err))
    }
}

//--- Display and Error

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Transport(ref err) => {
                write!(f, "transport error: {}", err)
            }
            Error::Timeout => f.write_str("request timed out"),
            Error::Malformed => f.write_str("malformed response"),
            Error::Authentication(err) => {
                write!(f, "response failed verification: {}", err)
            }
            Error::Cancelled => f.write_str("request cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Transport(ref err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::iana::{Class, Rtype};
    use crate::base::message::MessageBuilder;
    use crate::base::name::Name;
    use tokio::net::{TcpListener, UdpSocket};

    fn build_query(id: u16) -> Message {
        let mut builder = MessageBuilder::new(512);
        builder.update_header(|header| header.set_id(id));
        builder
            .push_question(
                &Name::from_str("example.com").unwrap(),
                Rtype::TKEY,
                Class::ANY,
            )
            .unwrap();
        builder.freeze()
    }

    /// Turns received query octets into a matching response.
    fn echo_response(query: &[u8]) -> Vec<u8> {
        let mut octets = query.to_vec();
        octets[2] |= 0x80; // QR
        octets
    }

    fn short_timeout() -> RequestOptions {
        let mut options = RequestOptions::new();
        options.set_timeout(Duration::from_millis(100));
        options
    }

    #[tokio::test]
    async fn udp_retransmits_once_with_same_id() {
        let server =
            UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let conn = Connection::new().await.unwrap();
        let id = conn.dispatch().allocate_id(server_addr);
        let query = build_query(id);

        let handle =
            conn.request(server_addr, query.clone(), None, short_timeout());
        let server_side = async move {
            let mut buf = [0u8; 1500];
            // Ignore the first transmission.
            let (first_len, _) = server.recv_from(&mut buf).await.unwrap();
            let first = buf[..first_len].to_vec();
            // The retransmission must be byte-identical, same ID included.
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &first[..]);
            server
                .send_to(&echo_response(&buf[..len]), from)
                .await
                .unwrap();
        };
        let (response, ()) = tokio::join!(handle.response(), server_side);
        assert_eq!(response.unwrap().header().id(), id);
    }

    #[tokio::test]
    async fn second_udp_timeout_is_terminal() {
        let server =
            UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let conn = Connection::new().await.unwrap();
        let id = conn.dispatch().allocate_id(server_addr);

        let handle = conn.request(
            server_addr,
            build_query(id),
            None,
            short_timeout(),
        );
        assert!(matches!(handle.response().await, Err(Error::Timeout)));
        assert_eq!(conn.dispatch().pending_len(), 0);
    }

    #[tokio::test]
    async fn tcp_timeout_without_retransmit() {
        let listener =
            TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        let conn = Connection::new().await.unwrap();
        let mut options = short_timeout();
        options.set_force_tcp(true);

        let handle =
            conn.request(server_addr, build_query(7), None, options);
        let server_side = async {
            // Accept and read the request, then go silent.
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut len = [0u8; 2];
            stream.read_exact(&mut len).await.unwrap();
            let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len))];
            stream.read_exact(&mut buf).await.unwrap();
            stream
        };
        let (res, stream) = tokio::join!(handle.response(), server_side);
        assert!(matches!(res, Err(Error::Timeout)));

        // No reconnection happens after the timeout.
        assert!(timeout(Duration::from_millis(100), listener.accept())
            .await
            .is_err());
        drop(stream);
    }

    #[tokio::test]
    async fn mismatched_response_is_malformed() {
        let server =
            UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let conn = Connection::new().await.unwrap();
        let id = conn.dispatch().allocate_id(server_addr);

        let handle = conn.request(
            server_addr,
            build_query(id),
            None,
            short_timeout(),
        );
        let server_side = async move {
            let mut buf = [0u8; 1500];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let mut response = echo_response(&buf[..len]);
            // Corrupt the question class.
            let pos = response.len() - 1;
            response[pos] ^= 0xFF;
            server.send_to(&response, from).await.unwrap();
        };
        let (res, ()) = tokio::join!(handle.response(), server_side);
        assert!(matches!(res, Err(Error::Malformed)));
    }

    #[tokio::test]
    async fn cancel_tears_down_registration() {
        let server =
            UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let conn = Connection::new().await.unwrap();
        let id = conn.dispatch().allocate_id(server_addr);

        let handle = conn.request(
            server_addr,
            build_query(id),
            None,
            RequestOptions::new(),
        );
        assert_eq!(conn.dispatch().pending_len(), 1);
        handle.cancel();
        assert_eq!(conn.dispatch().pending_len(), 0);

        // A late response now falls on the floor.
        let mut datagram = id.to_be_bytes().to_vec();
        datagram.extend_from_slice(&[0; 10]);
        conn.dispatch().deliver(&datagram, server_addr);
        assert_eq!(conn.dispatch().pending_len(), 0);
    }

    #[tokio::test]
    async fn foreign_loop_cancel_panics() {
        let server =
            UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let conn = Connection::new().await.unwrap();
        let id = conn.dispatch().allocate_id(server_addr);
        let handle = conn.request(
            server_addr,
            build_query(id),
            None,
            RequestOptions::new(),
        );

        let res = std::thread::spawn(move || handle.cancel()).join();
        assert!(res.is_err());
    }

    #[test]
    fn options_are_clamped() {
        let mut options = RequestOptions::new();
        options.set_timeout(Duration::from_secs(600));
        assert_eq!(options.timeout(), Duration::from_secs(60));
        options.set_timeout(Duration::ZERO);
        assert_eq!(options.timeout(), Duration::from_millis(1));
        options.set_send_retries(200);
        assert_eq!(options.send_retries(), 10);
    }
}
