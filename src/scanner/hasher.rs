//! Streaming file hasher with prefix and full-content modes.
//!
//! # Overview
//!
//! [`Hasher`] computes a [`Digest`] over either the first `prefix_size`
//! bytes of a file ([`HashMode::Prefix`]) or its whole content
//! ([`HashMode::Full`]). Prefix digests are cheap and only group candidates;
//! two files with equal prefix digests can still differ after the prefix.
//!
//! Only the bytes actually read are hashed: a file shorter than the prefix
//! limit is hashed over its real length, never zero-padded. Prefix mode
//! refuses empty files with [`HashError::EmptyFile`].

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use super::HashError;

/// Default number of bytes read in prefix mode (64 KiB).
pub const DEFAULT_PREFIX_SIZE: u64 = 64 * 1024;

/// Read buffer size used for streaming.
const BUFFER_SIZE: usize = 64 * 1024;

/// Which byte range of a file to hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
    /// Hash at most the configured prefix size from the start of the file.
    Prefix,
    /// Hash the entire file content.
    Full,
}

/// Supported digest algorithms.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// BLAKE3 with 256-bit output.
    #[default]
    Blake3,
    /// SHA-256.
    Sha256,
}

impl Algorithm {
    /// Stable name stored in the index.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }

    /// Parse a stored algorithm name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blake3" => Some(Self::Blake3),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    fn state(self) -> DigestState {
        match self {
            Self::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
            Self::Sha256 => DigestState::Sha256(sha2::Sha256::new()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-progress digest computation.
enum DigestState {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
}

impl DigestState {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Blake3(h) => {
                h.update(data);
            }
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> Digest {
        match self {
            Self::Blake3(h) => Digest(h.finalize().to_hex().to_string()),
            Self::Sha256(h) => Digest(format!("{:x}", h.finalize())),
        }
    }
}

/// A content digest as a lowercase hexadecimal string.
///
/// "No digest yet" is modelled as `Option<Digest>`, never as an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Parse a digest from its hex form.
    ///
    /// Returns `None` for empty strings or anything that is not lowercase hex.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = !hex.is_empty()
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    /// The hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest of an in-memory buffer.
    #[must_use]
    pub fn of_bytes(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut state = algorithm.state();
        state.update(data);
        state.finalize()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File hasher for prefix and full-content digests.
///
/// Cheap to clone and safe to share across worker threads.
#[derive(Debug, Clone)]
pub struct Hasher {
    algorithm: Algorithm,
    prefix_size: u64,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(Algorithm::default(), DEFAULT_PREFIX_SIZE)
    }
}

impl Hasher {
    /// Create a hasher.
    ///
    /// # Arguments
    ///
    /// * `algorithm` - Digest algorithm
    /// * `prefix_size` - Bytes read in [`HashMode::Prefix`]; clamped to at least 1
    #[must_use]
    pub fn new(algorithm: Algorithm, prefix_size: u64) -> Self {
        Self {
            algorithm,
            prefix_size: prefix_size.max(1),
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag checked between read chunks.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// The configured digest algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The configured prefix size in bytes.
    #[must_use]
    pub fn prefix_size(&self) -> u64 {
        self.prefix_size
    }

    /// Compute the digest of `path` in the given mode.
    ///
    /// # Errors
    ///
    /// - [`HashError::EmptyFile`] if no bytes were available in prefix mode
    /// - [`HashError::NotFound`], [`HashError::PermissionDenied`] or
    ///   [`HashError::Io`] on read failures
    /// - [`HashError::Interrupted`] if shutdown was requested mid-read
    pub fn digest(&self, path: &Path, mode: HashMode) -> Result<Digest, HashError> {
        self.digest_with_len(path, mode).map(|(digest, _)| digest)
    }

    /// Like [`Hasher::digest`], also returning the number of bytes hashed.
    pub fn digest_with_len(&self, path: &Path, mode: HashMode) -> Result<(Digest, u64), HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path.to_path_buf(), e))?;

        let (digest, len) = match mode {
            HashMode::Prefix => self.hash_reader(path, file.take(self.prefix_size))?,
            HashMode::Full => self.hash_reader(path, file)?,
        };

        if mode == HashMode::Prefix && len == 0 {
            return Err(HashError::EmptyFile(path.to_path_buf()));
        }

        log::trace!(
            "{} {:?} digest over {} bytes: {}",
            self.algorithm,
            mode,
            len,
            path.display()
        );
        Ok((digest, len))
    }

    fn hash_reader<R: Read>(&self, path: &Path, mut reader: R) -> Result<(Digest, u64), HashError> {
        let mut state = self.algorithm.state();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total: u64 = 0;

        loop {
            if self.is_shutdown_requested() {
                return Err(HashError::Interrupted(path.to_path_buf()));
            }

            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(HashError::from_io(path.to_path_buf(), e)),
            };
            state.update(&buffer[..n]);
            total += n as u64;
        }

        Ok((state.finalize(), total))
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}
