//! The on-disk key file convention.
//!
//! Keys are stored in files named after a canonical base
//! `K<name>+<alg>+<tag>`, where `<alg>` is the three-digit algorithm
//! number and `<tag>` a five-digit checksum over the key material.
//! A Diffie-Hellman pair occupies `<base>.private` and `<base>.public`;
//! a negotiated authentication key additionally gets `<base>.key`, a
//! one-line descriptor of name, algorithm, and secret.
//!
//! The private file carries a `Private-key-format` header line, the
//! algorithm, and the base64 key material, so other tooling following
//! the same convention can read it.

use crate::base::name::Name;
use crate::tkey::DhKeyPair;
use crate::tsig::Key;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use core::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// The algorithm number used for Diffie-Hellman pairs.
const DH_ALGORITHM_NUMBER: u8 = 2;

/// The format header of private key files.
const PRIVATE_FORMAT: &str = "Private-key-format: v1.0";

//------------ Base Names and Key Tags ---------------------------------------

/// Computes the key tag over the key material.
///
/// This is the ones-complement style checksum also used for DNSSEC key
/// tags: alternating octets weighted high and low, with the carry folded
/// back in.
pub fn key_tag(data: &[u8]) -> u16 {
    let mut acc: u32 = 0;
    for (i, octet) in data.iter().enumerate() {
        if i & 1 == 0 {
            acc += u32::from(*octet) << 8;
        } else {
            acc += u32::from(*octet);
        }
    }
    acc += (acc >> 16) & 0xFFFF;
    (acc & 0xFFFF) as u16
}

/// Returns the canonical file base name for a key.
pub fn base_name(
    name: &Name,
    algorithm: u8,
    tag: u16,
) -> String {
    format!("K{}+{:03}+{:05}", name, algorithm, tag)
}

//------------ Diffie-Hellman Pairs ------------------------------------------

/// Writes a Diffie-Hellman pair into `dir`.
///
/// Creates `<base>.private` and `<base>.public` and returns the base
/// path, extensions not included.
pub fn write_dh_pair(
    dir: &Path,
    name: &Name,
    pair: &DhKeyPair,
) -> Result<PathBuf, KeyFileError> {
    let public = pair.public_bytes();
    let base =
        dir.join(base_name(name, DH_ALGORITHM_NUMBER, key_tag(&public)));
    write_private(
        &with_extension(&base, "private"),
        DH_ALGORITHM_NUMBER,
        "DH",
        &pair.secret_bytes(),
    )?;
    std::fs::write(
        with_extension(&base, "public"),
        format!("{}\n", BASE64.encode(public)),
    )?;
    Ok(base)
}

/// Loads a Diffie-Hellman pair from `<base>.private` and `<base>.public`.
///
/// The public file must match the private key; a mismatch means the
/// files belong to different keys.
pub fn load_dh_pair(base: &Path) -> Result<DhKeyPair, KeyFileError> {
    let secret = read_private(
        &with_extension(base, "private"),
        DH_ALGORITHM_NUMBER,
    )?;
    let secret: [u8; 32] = secret
        .try_into()
        .map_err(|_| KeyFileError::Malformed("bad secret length"))?;
    let pair = DhKeyPair::from_bytes(secret);

    let public =
        std::fs::read_to_string(with_extension(base, "public"))?;
    let public = BASE64
        .decode(public.trim())
        .map_err(|_| KeyFileError::Malformed("bad base64 data"))?;
    if public != pair.public_bytes() {
        return Err(KeyFileError::Malformed(
            "public file does not match private key",
        ));
    }
    Ok(pair)
}

//------------ Authentication Keys -------------------------------------------

/// Writes a negotiated authentication key into `dir`.
///
/// Creates `<base>.private`, `<base>.public` and `<base>.key` and
/// returns the base path. The key is symmetric, so the public component
/// equals the secret; the tag is computed over it as well.
pub fn write_tsig_key(
    dir: &Path,
    key: &Key,
) -> Result<PathBuf, KeyFileError> {
    let base = dir.join(base_name(
        key.name(),
        key.algorithm().number(),
        key_tag(key.secret()),
    ));
    write_private(
        &with_extension(&base, "private"),
        key.algorithm().number(),
        &key.algorithm().to_string().to_uppercase(),
        key.secret(),
    )?;
    std::fs::write(
        with_extension(&base, "public"),
        format!("{}\n", BASE64.encode(key.secret())),
    )?;
    std::fs::write(
        with_extension(&base, "key"),
        format!(
            "{} {} {}\n",
            key.name(),
            key.algorithm(),
            BASE64.encode(key.secret())
        ),
    )?;
    Ok(base)
}

//------------ Private File Format -------------------------------------------

/// Appends an extension to a base path that may contain `+` characters.
fn with_extension(base: &Path, extension: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(".");
    os.push(extension);
    PathBuf::from(os)
}

/// Writes a private key file.
fn write_private(
    path: &Path,
    algorithm: u8,
    algorithm_name: &str,
    secret: &[u8],
) -> Result<(), KeyFileError> {
    let content = format!(
        "{}\nAlgorithm: {} ({})\nKey: {}\n",
        PRIVATE_FORMAT,
        algorithm,
        algorithm_name,
        BASE64.encode(secret)
    );
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(
            path,
            std::fs::Permissions::from_mode(0o600),
        )?;
    }
    Ok(())
}

/// Reads a private key file, checking format and algorithm.
fn read_private(
    path: &Path,
    algorithm: u8,
) -> Result<Vec<u8>, KeyFileError> {
    let content = std::fs::read_to_string(path)?;
    let mut lines = content.lines();
    if lines.next().map(str::trim) != Some(PRIVATE_FORMAT) {
        return Err(KeyFileError::Malformed("unknown private key format"));
    }
    let mut found_algorithm = None;
    let mut key = None;
    for line in lines {
        if let Some(rest) = line.strip_prefix("Algorithm:") {
            let number = rest
                .trim()
                .split_whitespace()
                .next()
                .and_then(|word| word.parse::<u8>().ok());
            found_algorithm = number;
        } else if let Some(rest) = line.strip_prefix("Key:") {
            key = Some(
                BASE64.decode(rest.trim()).map_err(|_| {
                    KeyFileError::Malformed("bad base64 data")
                })?,
            );
        }
    }
    if found_algorithm != Some(algorithm) {
        return Err(KeyFileError::Malformed("wrong key algorithm"));
    }
    key.ok_or(KeyFileError::Malformed("missing key data"))
}

//============ Error Type ====================================================

/// A key file could not be read or written.
#[derive(Debug)]
pub enum KeyFileError {
    /// The underlying file operation failed.
    Io(io::Error),

    /// The file exists but does not follow the convention.
    Malformed(&'static str),
}

//--- From

impl From<io::Error> for KeyFileError {
    fn from(err: io::Error) -> Self {
        KeyFileError::Io(err)
    }
}

//--- Display and Error

impl fmt::Display for KeyFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            KeyFileError::Io(ref err) => err.fmt(f),
            KeyFileError::Malformed(what) => f.write_str(what),
        }
    }
}

impl std::error::Error for KeyFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            KeyFileError::Io(ref err) => Some(err),
            KeyFileError::Malformed(_) => None,
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::name::Name;
    use crate::tsig::Algorithm;

    #[test]
    fn tag_is_stable() {
        assert_eq!(key_tag(b""), 0);
        assert_eq!(key_tag(&[0x01]), 0x0100);
        assert_eq!(key_tag(&[0x01, 0x02]), 0x0102);
        // The carry folds back into the low 16 bits.
        assert_eq!(key_tag(&[0xFF; 64]), key_tag(&[0xFF; 64]));
    }

    #[test]
    fn base_name_format() {
        let name = Name::from_str("client.example").unwrap();
        assert_eq!(base_name(&name, 157, 42), "Kclient.example.+157+00042");
    }

    #[test]
    fn dh_pair_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pair = DhKeyPair::generate();
        let name = Name::from_str("dh.example").unwrap();

        let base = write_dh_pair(dir.path(), &name, &pair).unwrap();
        assert!(with_extension(&base, "private").exists());
        assert!(with_extension(&base, "public").exists());

        let loaded = load_dh_pair(&base).unwrap();
        assert_eq!(loaded.secret_bytes(), pair.secret_bytes());
        assert_eq!(loaded.public_bytes(), pair.public_bytes());
    }

    #[test]
    fn mismatched_public_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let name = Name::from_str("dh.example").unwrap();
        let base =
            write_dh_pair(dir.path(), &name, &DhKeyPair::generate())
                .unwrap();
        // Overwrite the public file with some other pair's value.
        std::fs::write(
            with_extension(&base, "public"),
            format!(
                "{}\n",
                BASE64.encode(DhKeyPair::generate().public_bytes())
            ),
        )
        .unwrap();
        assert!(matches!(
            load_dh_pair(&base),
            Err(KeyFileError::Malformed(_))
        ));
    }

    #[test]
    fn tsig_key_files() {
        let dir = tempfile::tempdir().unwrap();
        let key = Key::new(
            Algorithm::HmacMd5,
            b"negotiated-secret",
            Name::from_str("abcd1234.example").unwrap(),
            true,
        );
        let base = write_tsig_key(dir.path(), &key).unwrap();

        for extension in ["private", "public", "key"] {
            assert!(with_extension(&base, extension).exists());
        }
        let descriptor = std::fs::read_to_string(
            with_extension(&base, "key"),
        )
        .unwrap();
        assert_eq!(
            descriptor,
            format!(
                "abcd1234.example. hmac-md5 {}\n",
                BASE64.encode(b"negotiated-secret")
            )
        );
        let file_name =
            base.file_name().unwrap().to_str().unwrap().to_string();
        assert!(file_name.starts_with("Kabcd1234.example.+157+"));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            load_dh_pair(Path::new("/nonexistent/key")),
            Err(KeyFileError::Io(_))
        ));
    }
}
