//! The cache handle: Get/Put over a sharded on-disk layout
//!
//! A [`Cache`] owns a root directory holding 256 shard subdirectories named
//! by two lowercase hex digits. A digest's first byte picks its shard; an
//! action key `k` stores its index record at `<shard>/<hex k>-a` and an
//! output `o` stores its blob at `<shard>/<hex o>-d`.
//!
//! No entries are cached in memory across calls. The filesystem is the
//! source of truth, which is what makes it safe for multiple independent
//! processes on one machine to share a cache directory: they may duplicate
//! effort but will not corrupt each other. Sharing across machines (network
//! filesystems) is out of scope.

use crate::entry::{self, ENTRY_SIZE, Entry};
use crate::error::MissReason;
use crate::hash::{ActionId, Digest, HashRecorder, OutputId};
use crate::trim::MTIME_INTERVAL;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};
use std::fs;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Injectable clock, so tests control time
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A handle to an on-disk action cache.
///
/// Opened once per process against a root directory and held for the
/// process's lifetime; there is no teardown because all state lives in the
/// filesystem.
pub struct Cache {
    dir: PathBuf,
    now: Clock,
    verify: bool,
    recorder: Option<Arc<HashRecorder>>,
}

impl Cache {
    /// Open the cache rooted at `dir`, creating the shard layout if absent.
    ///
    /// `dir` must be an absolute path to an existing directory. A cache that
    /// cannot guarantee its own layout cannot be trusted, so any violation
    /// is a fatal [`Error::Init`], never a silent degradation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Init`] if `dir` is relative, missing, or not a
    /// directory, or if a shard subdirectory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_absolute() {
            return Err(Error::init(&dir, "cache root must be an absolute path"));
        }
        let info = fs::metadata(&dir)
            .map_err(|e| Error::init_io(&dir, "cache root does not exist", e))?;
        if !info.is_dir() {
            return Err(Error::init(&dir, "cache root is not a directory"));
        }
        for i in 0..=255u8 {
            let shard = dir.join(format!("{i:02x}"));
            fs::create_dir_all(&shard)
                .map_err(|e| Error::init_io(&shard, "creating shard directory", e))?;
        }
        Ok(Self {
            dir,
            now: Box::new(Utc::now),
            verify: false,
            recorder: None,
        })
    }

    /// Run in verify mode: every [`get`](Self::get) misses, and
    /// [`put`](Self::put) double-checks reproducibility against any
    /// pre-existing entry. A consistency auditor, not a normal operating
    /// mode.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Attach a [`HashRecorder`] so verify-mode mismatch reports can include
    /// the exact bytes that were hashed into the offending action key
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<HashRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Replace the clock (for tests)
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.now = Box::new(clock);
        self
    }

    /// The cache root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }

    /// Path of the file for `digest` with the given kind suffix
    /// (`a` = action index record, `d` = data blob)
    fn file_name(&self, digest: &Digest, kind: char) -> PathBuf {
        self.dir
            .join(format!("{:02x}", digest[0]))
            .join(format!("{}-{kind}", hex::encode(digest)))
    }

    /// Look up an action key, returning its latest recorded entry.
    ///
    /// Finding an entry does not guarantee the blob for its output id is
    /// still readable; use [`output_file`](Self::output_file) or
    /// [`get_bytes`](Self::get_bytes) to reach the bytes. Any missing,
    /// truncated, or corrupt record is an [`Error::NotFound`] carrying the
    /// reason, never a hard failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] on any form of miss, including forced
    /// misses in verify mode.
    pub fn get(&self, action: ActionId) -> Result<Entry> {
        if self.verify {
            return Err(Error::NotFound {
                action,
                reason: MissReason::VerifyMode,
            });
        }
        self.get_raw(action)
    }

    /// `get` without the verify-mode override, so `put` can audit against
    /// existing entries
    fn get_raw(&self, action: ActionId) -> Result<Entry> {
        let miss = |reason: MissReason| Error::NotFound { action, reason };
        let path = self.file_name(action.as_bytes(), 'a');
        let file = fs::File::open(&path).map_err(|e| miss(MissReason::Read(e)))?;

        // One extra byte so a too-long file is distinguishable from a valid
        // record.
        let mut buf = Vec::with_capacity(ENTRY_SIZE + 1);
        file.take(ENTRY_SIZE as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(|e| miss(MissReason::Read(e)))?;
        let parsed = entry::decode(&buf, action).map_err(|e| miss(MissReason::Record(e)))?;

        self.used(&path);
        Ok(parsed)
    }

    /// Look up an action key and read its whole output into memory.
    ///
    /// Only for outputs expected to fit in memory. The bytes are re-hashed
    /// on the way in; silent external corruption of the blob surfaces as
    /// [`Error::Integrity`] rather than wrong bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] on a miss or unreadable blob and
    /// [`Error::Integrity`] if the on-disk bytes no longer match the
    /// recorded output id.
    pub fn get_bytes(&self, action: ActionId) -> Result<(Vec<u8>, Entry)> {
        let found = self.get(action)?;
        let data = fs::read(self.output_file(found.output)).map_err(|e| Error::NotFound {
            action,
            reason: MissReason::Read(e),
        })?;
        let actual = OutputId::from_data(&data);
        if actual != found.output {
            return Err(Error::Integrity {
                output: found.output,
                actual,
            });
        }
        Ok((data, found))
    }

    /// The path of the blob holding the given output, refreshing its access
    /// time
    #[must_use]
    pub fn output_file(&self, output: OutputId) -> PathBuf {
        let file = self.file_name(output.as_bytes(), 'd');
        self.used(&file);
        file
    }

    /// Store the output read from `file` as the result of `action`.
    ///
    /// The source may be read twice (once to hash, once to copy), so it
    /// must be re-readable from the start and its content must not change
    /// between the passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on filesystem failures, [`Error::Integrity`]
    /// if the source changed between passes, and [`Error::Verify`] for a
    /// reproducibility mismatch in verify mode.
    pub fn put<F: Read + Seek>(&self, action: ActionId, file: &mut F) -> Result<(OutputId, u64)> {
        // First pass: compute the output identity and size.
        file.rewind().map_err(|e| Error::io_no_path(e, "rewind"))?;
        let mut hasher = Sha256::new();
        let size = std::io::copy(file, &mut hasher).map_err(|e| Error::io_no_path(e, "hash"))?;
        let output = OutputId(hasher.finalize().into());

        self.copy_file(file, output, size)?;
        self.put_index_entry(action, output, size)?;
        Ok((output, size))
    }

    /// [`put`](Self::put) for an in-memory payload
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub fn put_bytes(&self, action: ActionId, data: &[u8]) -> Result<(OutputId, u64)> {
        let mut cursor = std::io::Cursor::new(data);
        self.put(action, &mut cursor)
    }

    /// Copy `file` into the blob store under `output`, unless an identical
    /// blob is already present.
    ///
    /// A half-written blob is worse than no blob, so every failure path
    /// makes a best-effort attempt to truncate the destination before
    /// returning.
    fn copy_file<F: Read + Seek>(&self, file: &mut F, output: OutputId, size: u64) -> Result<()> {
        let name = self.file_name(output.as_bytes(), 'd');

        let existing = fs::metadata(&name).ok();
        if let Some(info) = &existing {
            if info.len() == size && self.blob_matches(&name, output) {
                tracing::debug!(output = %output, "blob already present, skipping write");
                return Ok(());
            }
            // Size or hash mismatch: fall through and rewrite in place. This
            // is the only in-place rewrite the store performs, and only
            // because the file does not yet match its expected identity.
        }

        let mut opts = fs::OpenOptions::new();
        opts.read(true).write(true).create(true);
        if existing.is_some_and(|info| info.len() > size) {
            opts.truncate(true);
        }
        let mut dest = opts.open(&name).map_err(|e| Error::io(e, &name, "create"))?;
        if size == 0 {
            // Only one possible zero-length content, so the file is already
            // correct. Early return also guarantees a held-back last byte
            // below.
            return Ok(());
        }

        // Second pass: copy into the blob while re-hashing what is actually
        // written, holding back the final byte. Other processes treat a
        // file of the expected size as committed, so the last byte lands
        // only after the hash has been proven.
        let wipe = |dest: &fs::File| {
            let _ = dest.set_len(0);
        };
        if let Err(e) = file.rewind() {
            wipe(&dest);
            return Err(Error::io_no_path(e, "rewind"));
        }
        let mut hasher = Sha256::new();
        let mut remaining = size - 1;
        let mut buf = [0u8; 64 * 1024];
        while remaining > 0 {
            let want = usize::try_from(remaining.min(buf.len() as u64)).unwrap_or(buf.len());
            let n = match file.read(&mut buf[..want]) {
                Ok(0) => {
                    wipe(&dest);
                    return Err(Error::io_no_path(
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "source ended early",
                        ),
                        "read",
                    ));
                }
                Ok(n) => n,
                Err(e) => {
                    wipe(&dest);
                    return Err(Error::io_no_path(e, "read"));
                }
            };
            hasher.update(&buf[..n]);
            if let Err(e) = dest.write_all(&buf[..n]) {
                wipe(&dest);
                return Err(Error::io(e, &name, "write"));
            }
            remaining -= n as u64;
        }

        let mut last = [0u8; 1];
        if let Err(e) = file.read_exact(&mut last) {
            wipe(&dest);
            return Err(Error::io_no_path(e, "read"));
        }
        hasher.update(last);
        let sum: Digest = hasher.finalize().into();
        if sum != *output.as_bytes() {
            // The source changed between the hashing pass and this one.
            wipe(&dest);
            return Err(Error::Integrity {
                output,
                actual: OutputId(sum),
            });
        }

        if let Err(e) = dest.write_all(&last) {
            wipe(&dest);
            return Err(Error::io(e, &name, "write"));
        }
        if let Err(e) = dest.sync_all() {
            // The file may look complete without its data being durable;
            // remove it entirely.
            drop(dest);
            let _ = fs::remove_file(&name);
            return Err(Error::io(e, &name, "sync"));
        }
        drop(dest);
        self.set_mtime(&name);
        Ok(())
    }

    /// Whether the file at `name` re-hashes to `output`
    fn blob_matches(&self, name: &Path, output: OutputId) -> bool {
        let Ok(mut f) = fs::File::open(name) else {
            return false;
        };
        let mut hasher = Sha256::new();
        if std::io::copy(&mut f, &mut hasher).is_err() {
            return false;
        }
        let sum: Digest = hasher.finalize().into();
        sum == *output.as_bytes()
    }

    /// Record that `action` produced `output` at `size` bytes.
    ///
    /// Index entries are deliberately left writable: repeating an action may
    /// legitimately produce different bytes (embedded timestamps, temp dir
    /// names), and the cache only promises the latest entry. The file is
    /// truncated to record length only *after* the write, so rewriting
    /// identical content is a true no-op that never transiently destroys a
    /// previously valid entry.
    fn put_index_entry(&self, action: ActionId, output: OutputId, size: u64) -> Result<()> {
        if self.verify {
            if let Ok(old) = self.get_raw(action) {
                if old.output != output || old.size != size {
                    let hashed_input = self
                        .recorder
                        .as_ref()
                        .and_then(|r| r.input_for(action.as_bytes()))
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
                    return Err(Error::Verify {
                        action,
                        old_output: old.output,
                        old_size: old.size,
                        new_output: output,
                        new_size: size,
                        hashed_input,
                    });
                }
            }
        }

        let record = entry::encode(action, output, size, self.now());
        let path = self.file_name(action.as_bytes(), 'a');
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::io(e, &path, "create"))?;
        let written = (|| {
            file.write_all(&record)?;
            // Truncate only after writing, in case a previous record was
            // longer than one entry.
            file.set_len(ENTRY_SIZE as u64)?;
            file.sync_data()
        })();
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(Error::io(e, &path, "write"));
        }
        drop(file);
        self.set_mtime(&path);
        Ok(())
    }

    /// Best-effort refresh of `path`'s modification time so it tracks last
    /// access.
    ///
    /// Skipped when the current mtime is already within [`MTIME_INTERVAL`]
    /// of now, which bounds metadata writes from cache reads to roughly one
    /// per file per interval while keeping mtimes a usable proxy for the
    /// expiry sweep. Failures are ignored; this is an optimization, not a
    /// correctness obligation, so the contract returns nothing.
    pub fn used(&self, path: &Path) {
        if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
            let mtime: DateTime<Utc> = modified.into();
            match self.now().signed_duration_since(mtime).to_std() {
                Ok(age) if age >= MTIME_INTERVAL => {}
                // Fresh enough, or mtime in the future (clock skew): leave it.
                _ => return,
            }
        }
        self.set_mtime(path);
    }

    /// Best-effort set of `path`'s mtime to the cache clock's now
    fn set_mtime(&self, path: &Path) {
        let stamp = SystemTime::from(self.now());
        if let Ok(file) = fs::OpenOptions::new().write(true).open(path) {
            if let Err(e) = file.set_modified(stamp) {
                tracing::debug!(path = %path.display(), "mtime refresh failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("dir", &self.dir)
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}
