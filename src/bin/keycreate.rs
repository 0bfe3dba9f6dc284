//! Negotiates a shared key with a server and writes it to key files.
//!
//! Usage: `keycreate <ip> <port> <dh-key-file> [owner-name]`
//!
//! Loads the local Diffie-Hellman pair from `<dh-key-file>.private` and
//! `.public`, authenticates the exchange with the well-known test key
//! `tkeytest.`, and negotiates over TCP. On success the canonical base
//! name of the newly written key files is printed on stdout.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use keynego::base::name::Name;
use keynego::keyfile;
use keynego::net::{Connection, RequestOptions};
use keynego::rdata::tsig::Time48;
use keynego::tkey::{Config, DhKeyPair, Exchange};
use keynego::tsig::{Algorithm, Key, KeyRing};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// The name of the key authenticating the exchange.
const BOOTSTRAP_NAME: &str = "tkeytest.";

/// The well-known bootstrap secret, base64 encoded.
const BOOTSTRAP_SECRET: &str = "0123456789ab";

/// How long to wait for the server.
const TIMEOUT: Duration = Duration::from_secs(30);

struct Args {
    /// The server address.
    target: SocketAddr,

    /// Base path of the local Diffie-Hellman key files.
    dh_key_file: PathBuf,

    /// The name to negotiate the key under.
    owner: Name,
}

impl Args {
    /// Parses the command line.
    fn from_env() -> Option<Self> {
        let mut args = std::env::args().skip(1);
        let ip: IpAddr = args.next()?.parse().ok()?;
        let port: u16 = args.next()?.parse().ok()?;
        let dh_key_file = PathBuf::from(args.next()?);
        let owner = match args.next() {
            Some(name) => Name::from_str(&name).ok()?,
            None => Name::root(),
        };
        if args.next().is_some() {
            return None;
        }
        Some(Args {
            target: SocketAddr::new(ip, port),
            dh_key_file,
            owner,
        })
    }
}

/// Runs the negotiation and writes the key files.
async fn run(args: Args) -> Result<String, Box<dyn std::error::Error>> {
    let dh = keyfile::load_dh_pair(&args.dh_key_file)?;
    let secret = BASE64.decode(BOOTSTRAP_SECRET)?;
    let bootstrap = Arc::new(Key::new(
        Algorithm::HmacMd5,
        &secret,
        Name::from_str(BOOTSTRAP_NAME)?,
        false,
    ));

    let mut exchange =
        Exchange::new(bootstrap, dh, &args.owner, Config::new())?;
    let query = exchange.build_query(rand::random(), Time48::now())?;
    let transaction = exchange
        .transaction()
        .cloned()
        .ok_or("query not signed")?;

    let mut options = RequestOptions::new();
    options.set_force_tcp(true);
    options.set_timeout(TIMEOUT);
    let conn = Connection::new().await?;
    let handle =
        conn.request(args.target, query, Some(transaction), options);
    let response = handle.response().await?;

    let ring = KeyRing::new();
    let key = exchange.process_response(&ring, &response, Time48::now())?;
    let base = keyfile::write_tsig_key(Path::new("."), &key)?;
    let base = base
        .file_name()
        .ok_or("bad key file name")?
        .to_string_lossy()
        .into_owned();
    Ok(base)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::from_env() {
        Some(args) => args,
        None => {
            eprintln!("usage: keycreate <ip> <port> <dh-key-file> [owner-name]");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("keycreate: cannot start runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(base) => {
            println!("{}", base);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("keycreate: {}", err);
            ExitCode::FAILURE
        }
    }
}
