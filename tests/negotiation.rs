//! End-to-end key negotiation against an in-process mock peer.

use keynego::base::iana::{Class, Rcode, Rtype, TkeyMode, TsigRcode};
use keynego::base::message::{Message, MessageBuilder};
use keynego::base::name::Name;
use keynego::keyfile;
use keynego::net::request::Error as RequestError;
use keynego::net::{Connection, RequestOptions};
use keynego::rdata::tkey::Tkey;
use keynego::rdata::tsig::Time48;
use keynego::tkey::{
    derive_key, Config, DhKeyPair, Exchange, NegotiationError,
    DH_PUBLIC_LEN, NONCE_LEN,
};
use keynego::tsig::{Algorithm, Key, KeyRing, ServerTransaction};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

const BOOTSTRAP_SECRET: &[u8] = b"0123456789";

fn bootstrap_key() -> Key {
    Key::new(
        Algorithm::HmacMd5,
        BOOTSTRAP_SECRET,
        Name::from_str("tkeytest").unwrap(),
        false,
    )
}

/// How the mock peer treats the query.
#[derive(Clone, Copy)]
enum Behavior {
    /// Complete the negotiation normally.
    Normal,

    /// Answer correctly but without any TSIG signature.
    Unsigned,

    /// Sign correctly, then corrupt one octet of the answer.
    Tamper,

    /// Report the given error in the TKEY record.
    Reject(TsigRcode),

    /// Answer with the given non-zero rcode.
    Fail(Rcode),
}

/// Builds the peer's response to a TKEY query.
///
/// Returns the response and, when key material was exchanged, the secret
/// the peer derived.
fn respond(
    query: &Message,
    behavior: Behavior,
    now: Time48,
) -> (Message, Option<Vec<u8>>) {
    let ring = KeyRing::new();
    ring.create(bootstrap_key(), None).unwrap();
    let server = match behavior {
        Behavior::Unsigned => None,
        _ => Some(
            ServerTransaction::request(&ring, None, query, now)
                .unwrap()
                .unwrap(),
        ),
    };

    let record = query
        .additional()
        .unwrap()
        .map(Result::unwrap)
        .find(|record| record.rtype == Rtype::TKEY)
        .unwrap();
    let client_tkey = Tkey::parse_record(&record).unwrap();
    let client_public: [u8; 32] =
        client_tkey.key()[..DH_PUBLIC_LEN].try_into().unwrap();
    let client_nonce =
        &client_tkey.key()[DH_PUBLIC_LEN..DH_PUBLIC_LEN + NONCE_LEN];

    let server_dh = DhKeyPair::generate();
    let mut server_nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut server_nonce);
    let shared = server_dh.diffie_hellman(&client_public).unwrap();
    let secret = derive_key(
        &shared,
        client_nonce,
        &server_nonce,
        Algorithm::HmacMd5,
    );

    let mut key_data = Vec::new();
    key_data.extend_from_slice(&server_dh.public_bytes());
    key_data.extend_from_slice(&server_nonce);
    let (error, key_data) = match behavior {
        Behavior::Reject(error) => (error, Vec::new()),
        _ => (TsigRcode::NOERROR, key_data),
    };
    let tkey = Tkey::new(
        client_tkey.algorithm().clone(),
        client_tkey.inception(),
        client_tkey.expiration(),
        TkeyMode::DIFFIE_HELLMAN,
        error,
        key_data,
        Vec::new(),
    );

    let rcode = match behavior {
        Behavior::Fail(rcode) => rcode,
        _ => Rcode::NOERROR,
    };
    let question = query.first_question().unwrap().unwrap();
    let mut builder = MessageBuilder::new(4096);
    builder.update_header(|header| {
        header.set_id(query.header().id());
        header.set_qr(true);
        header.set_rcode(rcode);
    });
    builder
        .push_question(&question.qname, question.qtype, question.qclass)
        .unwrap();
    builder
        .push_answer(&question.qname, Class::ANY, 0, &tkey)
        .unwrap();
    if let Some(server) = server {
        server.answer(&mut builder, now).unwrap();
    }

    let response = match behavior {
        Behavior::Tamper => {
            let mut octets = builder.freeze().as_slice().to_vec();
            let pos = octets.len() - 100;
            octets[pos] ^= 0x01;
            Message::from_octets(octets.into()).unwrap()
        }
        _ => builder.freeze(),
    };
    let derived = match behavior {
        Behavior::Normal => Some(secret),
        _ => None,
    };
    (response, derived)
}

/// Serves exactly one query on a datagram socket.
async fn serve_udp(
    socket: UdpSocket,
    behavior: Behavior,
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 4096];
    let (len, from) = socket.recv_from(&mut buf).await.unwrap();
    let query =
        Message::from_octets(buf[..len].to_vec().into()).unwrap();
    let (response, secret) = respond(&query, behavior, Time48::now());
    socket.send_to(response.as_slice(), from).await.unwrap();
    secret
}

/// Serves exactly one query on a listening TCP socket.
async fn serve_tcp(
    listener: TcpListener,
    behavior: Behavior,
) -> Option<Vec<u8>> {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut len = [0u8; 2];
    stream.read_exact(&mut len).await.unwrap();
    let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len))];
    stream.read_exact(&mut buf).await.unwrap();
    let query = Message::from_octets(buf.into()).unwrap();
    let (response, secret) = respond(&query, behavior, Time48::now());
    let octets = response.as_slice();
    stream
        .write_all(&(octets.len() as u16).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(octets).await.unwrap();
    secret
}

/// Sets up a client exchange and its signed query.
fn client_exchange(id: u16) -> (Exchange, Message) {
    let mut exchange = Exchange::new(
        Arc::new(bootstrap_key()),
        DhKeyPair::generate(),
        &Name::from_str("example").unwrap(),
        Config::new(),
    )
    .unwrap();
    let query = exchange.build_query(id, Time48::now()).unwrap();
    (exchange, query)
}

fn short_timeout() -> RequestOptions {
    let mut options = RequestOptions::new();
    options.set_timeout(Duration::from_millis(500));
    options
}

#[tokio::test]
async fn negotiation_over_udp_installs_key_and_files() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = server.local_addr().unwrap();
    let conn = Connection::new().await.unwrap();
    let id = conn.dispatch().allocate_id(target);
    let (mut exchange, query) = client_exchange(id);
    let verify = exchange.transaction().cloned();

    let handle = conn.request(target, query, verify, short_timeout());
    let (response, server_secret) =
        tokio::join!(handle.response(), serve_udp(server, Behavior::Normal));
    let response = response.unwrap();

    let ring = KeyRing::new();
    let key = exchange
        .process_response(&ring, &response, Time48::now())
        .unwrap();
    assert_eq!(key.secret(), &server_secret.unwrap()[..]);
    assert_eq!(key.name(), exchange.key_name());
    assert!(key.is_ephemeral());
    assert!(ring.lookup(key.name(), None).is_ok());

    // The negotiated key lands in the three conventional files.
    let dir = tempfile::tempdir().unwrap();
    let base = keyfile::write_tsig_key(dir.path(), &key).unwrap();
    for extension in ["private", "public", "key"] {
        let mut path = base.clone().into_os_string();
        path.push(".");
        path.push(extension);
        assert!(std::path::PathBuf::from(path).exists());
    }
}

#[tokio::test]
async fn negotiation_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap();
    let conn = Connection::new().await.unwrap();
    let (mut exchange, query) = client_exchange(rand::random());
    let verify = exchange.transaction().cloned();

    let mut options = short_timeout();
    options.set_force_tcp(true);
    let handle = conn.request(target, query, verify, options);
    let (response, server_secret) = tokio::join!(
        handle.response(),
        serve_tcp(listener, Behavior::Normal)
    );

    let ring = KeyRing::new();
    let key = exchange
        .process_response(&ring, &response.unwrap(), Time48::now())
        .unwrap();
    assert_eq!(key.secret(), &server_secret.unwrap()[..]);
}

#[tokio::test]
async fn unsigned_response_never_reaches_the_caller() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = server.local_addr().unwrap();
    let conn = Connection::new().await.unwrap();
    let id = conn.dispatch().allocate_id(target);
    let (_exchange, query) = client_exchange(id);
    let verify = _exchange.transaction().cloned();

    let handle = conn.request(target, query, verify, short_timeout());
    let (response, _) = tokio::join!(
        handle.response(),
        serve_udp(server, Behavior::Unsigned)
    );
    assert!(matches!(
        response,
        Err(RequestError::Authentication(_))
    ));
}

#[tokio::test]
async fn tampered_response_never_reaches_the_caller() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = server.local_addr().unwrap();
    let conn = Connection::new().await.unwrap();
    let id = conn.dispatch().allocate_id(target);
    let (_exchange, query) = client_exchange(id);
    let verify = _exchange.transaction().cloned();

    let handle = conn.request(target, query, verify, short_timeout());
    let (response, _) = tokio::join!(
        handle.response(),
        serve_udp(server, Behavior::Tamper)
    );
    assert!(matches!(
        response,
        Err(RequestError::Authentication(_))
    ));
}

#[tokio::test]
async fn rejection_installs_nothing() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = server.local_addr().unwrap();
    let conn = Connection::new().await.unwrap();
    let id = conn.dispatch().allocate_id(target);
    let (mut exchange, query) = client_exchange(id);
    let verify = exchange.transaction().cloned();

    let handle = conn.request(target, query, verify, short_timeout());
    let (response, _) = tokio::join!(
        handle.response(),
        serve_udp(server, Behavior::Reject(TsigRcode::BADKEY))
    );
    let response = response.unwrap();

    let ring = KeyRing::new();
    assert!(matches!(
        exchange.process_response(&ring, &response, Time48::now()),
        Err(NegotiationError::Rejected(TsigRcode::BADKEY))
    ));
    assert!(ring.is_empty());
}

#[tokio::test]
async fn server_failure_rcode_installs_nothing() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = server.local_addr().unwrap();
    let conn = Connection::new().await.unwrap();
    let id = conn.dispatch().allocate_id(target);
    let (mut exchange, query) = client_exchange(id);
    let verify = exchange.transaction().cloned();

    let handle = conn.request(target, query, verify, short_timeout());
    let (response, _) = tokio::join!(
        handle.response(),
        serve_udp(server, Behavior::Fail(Rcode::SERVFAIL))
    );
    let response = response.unwrap();

    let ring = KeyRing::new();
    assert!(matches!(
        exchange.process_response(&ring, &response, Time48::now()),
        Err(NegotiationError::Server(Rcode::SERVFAIL))
    ));
    assert!(ring.is_empty());
}
