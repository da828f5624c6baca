//! Content digests for OCI blobs.
//!
//! A [`Digester`] streams bytes through one of the supported SHA-2
//! algorithms and yields a [`Digest`] in the canonical `<algorithm>:<hex>`
//! form used by descriptors, blob paths, and the registry protocol.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use ukpack_core::error::{PackError, Result};

/// Read buffer used by [`digest_file`] when no size is given: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    /// Every supported algorithm, canonical one first.
    pub const ALL: [Algorithm; 3] = [Algorithm::Sha256, Algorithm::Sha384, Algorithm::Sha512];

    /// Algorithm identifier as it appears in digests and blob paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded hash.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    /// Start a new streaming hash.
    pub fn digester(self) -> Digester {
        Digester::new(self)
    }

    /// Check an encoded hash against this algorithm's length and alphabet.
    pub fn validate_encoded(&self, encoded: &str) -> Result<()> {
        let well_formed = encoded.len() == self.hex_len()
            && encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(())
        } else {
            Err(PackError::InvalidDigestFormat(format!(
                "{}:{} (expected {} lowercase hex characters)",
                self.as_str(),
                encoded,
                self.hex_len()
            )))
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = PackError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(PackError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Start a new streaming hash for an algorithm given by name.
pub fn digester(algorithm: &str) -> Result<Digester> {
    Ok(algorithm.parse::<Algorithm>()?.digester())
}

enum HashState {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

/// Streaming hash bound to one algorithm.
///
/// Chunks must be fed in order; [`Digester::finalize`] consumes the
/// accumulator so it cannot be reused.
pub struct Digester {
    algorithm: Algorithm,
    state: HashState,
}

impl Digester {
    pub fn new(algorithm: Algorithm) -> Self {
        let state = match algorithm {
            Algorithm::Sha256 => HashState::Sha256(Sha256::new()),
            Algorithm::Sha384 => HashState::Sha384(Sha384::new()),
            Algorithm::Sha512 => HashState::Sha512(Sha512::new()),
        };
        Self { algorithm, state }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Feed the next chunk of data.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HashState::Sha256(h) => h.update(data),
            HashState::Sha384(h) => h.update(data),
            HashState::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Digest {
        let encoded = match self.state {
            HashState::Sha256(h) => hex::encode(h.finalize()),
            HashState::Sha384(h) => hex::encode(h.finalize()),
            HashState::Sha512(h) => hex::encode(h.finalize()),
        };
        Digest {
            algorithm: self.algorithm,
            encoded,
        }
    }
}

impl std::io::Write for Digester {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Algorithm-qualified content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    encoded: String,
}

impl Digest {
    /// Build a digest from its parts, validating the encoded portion.
    pub fn new(algorithm: Algorithm, encoded: impl Into<String>) -> Result<Self> {
        let digest = Self {
            algorithm,
            encoded: encoded.into(),
        };
        digest.validate()?;
        Ok(digest)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Hex portion, used as the blob file name.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Check the encoded portion against the algorithm's fixed-length pattern.
    pub fn validate(&self) -> Result<()> {
        self.algorithm.validate_encoded(&self.encoded)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = PackError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| PackError::InvalidDigestFormat(s.to_string()))?;
        Digest::new(algorithm.parse()?, encoded)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hash an in-memory buffer.
pub fn digest_bytes(algorithm: Algorithm, data: &[u8]) -> Digest {
    let mut digester = algorithm.digester();
    digester.update(data);
    digester.finalize()
}

/// Hash a file by streaming it through a fixed-size buffer.
///
/// The result does not depend on `buffer_size`.
pub fn digest_file(path: &Path, algorithm: Algorithm, buffer_size: usize) -> Result<Digest> {
    if buffer_size == 0 {
        return Err(PackError::Validation(
            "digest buffer size must be greater than zero".to_string(),
        ));
    }

    let mut file = std::fs::File::open(path).map_err(|e| {
        PackError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open {} for hashing: {}", path.display(), e),
        ))
    })?;

    let mut digester = algorithm.digester();
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        digester.update(&buf[..n]);
    }

    let digest = digester.finalize();
    digest.validate()?;
    Ok(digest)
}
