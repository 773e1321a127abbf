//! Digest types and the salted hash engine
//!
//! Action keys are produced by [`Hash`], which seeds every digest with a
//! salt derived from this crate's version. Entries written by incompatible
//! versions of the computation logic therefore never collide, even when
//! their literal inputs match. Output identities are *unsalted* SHA-256 of
//! the output bytes themselves, so identical outputs share one blob across
//! versions.
//!
//! The two process-scoped side tables the engine carries — the debug
//! recorder mapping digests back to the bytes that produced them, and the
//! file-content hash memo — are explicit components with their own locks,
//! so tests can construct and reset them independently of the process-wide
//! defaults.

use crate::{Error, Result};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Width in bytes of every digest used by the cache
pub const HASH_SIZE: usize = 32;

/// A raw fixed-width digest
pub type Digest = [u8; HASH_SIZE];

/// Salt mixed into every action hash, derived from the crate version
const HASH_SALT: &[u8] = concat!("recache/", env!("CARGO_PKG_VERSION")).as_bytes();

fn parse_hex(s: &str) -> std::result::Result<Digest, hex::FromHexError> {
    let mut out = [0u8; HASH_SIZE];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

/// An action key: the digest of a complete description of a repeatable
/// computation (inputs, configuration, file contents). Opaque to the cache;
/// uniqueness is the caller's responsibility.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub Digest);

impl ActionId {
    /// Parse from 64 lowercase hex characters
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not exactly 64 hex digits
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        parse_hex(s).map(Self)
    }

    /// The raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId({})", hex::encode(self.0))
    }
}

/// An output identity: the unsalted SHA-256 of the output bytes themselves.
/// Two outputs with identical content always share one `OutputId` and
/// therefore one stored blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub Digest);

impl OutputId {
    /// Compute the identity of a byte slice
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parse from 64 lowercase hex characters
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not exactly 64 hex digits
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        parse_hex(s).map(Self)
    }

    /// The raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({})", hex::encode(self.0))
    }
}

/// Records the exact bytes behind every digest it sees, so a cache entry
/// mismatch can later be explained by reproducing what was hashed.
///
/// Append-only, guarded by a single mutex, diagnostics only: nothing in the
/// cache's correctness depends on it.
#[derive(Debug, Default)]
pub struct HashRecorder {
    inputs: Mutex<HashMap<Digest, Vec<u8>>>,
}

impl HashRecorder {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, digest: Digest, input: Vec<u8>) {
        let mut m = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        m.insert(digest, input);
    }

    /// The bytes that hashed to `digest`, if this recorder saw them
    #[must_use]
    pub fn input_for(&self, digest: &Digest) -> Option<Vec<u8>> {
        let m = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        m.get(digest).cloned()
    }

    /// Drop all recorded inputs (between test cases)
    pub fn clear(&self) {
        let mut m = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        m.clear();
    }
}

/// The process-wide recorder used when no explicit one is injected
pub fn debug_recorder() -> Arc<HashRecorder> {
    static RECORDER: OnceLock<Arc<HashRecorder>> = OnceLock::new();
    Arc::clone(RECORDER.get_or_init(|| Arc::new(HashRecorder::new())))
}

/// The canonical hash used to derive action keys.
///
/// Callers write the complete description of their computation and then
/// consume the state with [`sum`](Self::sum); ownership makes writing after
/// the final digest impossible. The current implementation is salted
/// SHA-256, but callers must not assume this.
pub struct Hash {
    inner: Sha256,
    name: String,
    buf: Option<Vec<u8>>,
    recorder: Option<Arc<HashRecorder>>,
}

impl Hash {
    /// Start a new salted hash. `name` identifies the computation in traces.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut h = Self {
            inner: Sha256::new(),
            name: name.into(),
            buf: None,
            recorder: None,
        };
        h.write(HASH_SALT);
        h
    }

    /// Like [`new`](Self::new), but mirrors every written byte into
    /// `recorder` so the final digest can be explained after the fact.
    #[must_use]
    pub fn with_recorder(name: impl Into<String>, recorder: Arc<HashRecorder>) -> Self {
        let mut h = Self {
            inner: Sha256::new(),
            name: name.into(),
            buf: Some(Vec::new()),
            recorder: Some(recorder),
        };
        h.write(HASH_SALT);
        h
    }

    /// Feed data to the running hash
    pub fn write(&mut self, bytes: &[u8]) {
        tracing::trace!(name = %self.name, len = bytes.len(), "hash write");
        if let Some(buf) = self.buf.as_mut() {
            buf.extend_from_slice(bytes);
        }
        self.inner.update(bytes);
    }

    /// Finish and return the digest, consuming the hash state
    #[must_use]
    pub fn sum(self) -> Digest {
        let digest: Digest = self.inner.finalize().into();
        if let (Some(recorder), Some(buf)) = (self.recorder, self.buf) {
            recorder.record(digest, buf);
        }
        digest
    }
}

impl std::io::Write for Hash {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Self::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Memoizes unsalted SHA-256 digests of external files.
///
/// Hashing the same input file for many actions in one process is common;
/// this avoids re-reading it. Purely an optimization with no correctness
/// impact on the cache: entries can be pre-seeded with [`set`](Self::set)
/// when the caller already knows a file's digest.
#[derive(Debug, Default)]
pub struct FileHasher {
    memo: Mutex<HashMap<PathBuf, Digest>>,
}

impl FileHasher {
    /// Create an empty memo
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The unsalted content digest of `path`, memoized per process
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or read
    pub fn hash_file(&self, path: &Path) -> Result<Digest> {
        {
            let m = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(d) = m.get(path) {
                return Ok(*d);
            }
        }
        let mut f = std::fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut f, &mut hasher).map_err(|e| Error::io(e, path, "read"))?;
        let digest: Digest = hasher.finalize().into();
        self.set(path, digest);
        Ok(digest)
    }

    /// Pre-seed (or overwrite) the memoized digest for `path`
    pub fn set(&self, path: &Path, digest: Digest) {
        let mut m = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        m.insert(path.to_path_buf(), digest);
    }

    /// Forget all memoized digests (between test cases)
    pub fn clear(&self) {
        let mut m = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        m.clear();
    }
}

/// The process-wide file-hash memo used when no explicit one is injected
pub fn file_hasher() -> &'static FileHasher {
    static HASHER: OnceLock<FileHasher> = OnceLock::new();
    HASHER.get_or_init(FileHasher::new)
}
