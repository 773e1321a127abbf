//! Access-time bookkeeping constants and the expiry sweep
//!
//! Mtimes on cache files are refreshed on use, but at most once per
//! [`MTIME_INTERVAL`], so they roughly reflect time of last use while
//! keeping inode updates rare. The sweep deletes files not used for
//! [`TRIM_LIMIT`], and runs at most once per [`TRIM_INTERVAL`] to bound its
//! own cost; a `trim.txt` marker at the cache root records the last sweep.
//!
//! Deleting files concurrent with readers in other processes is safe
//! because readers re-validate everything they touch: index records are
//! decoded defensively and blobs are re-hashed against their names. A
//! reader racing a deletion sees an ordinary miss.

use crate::cache::Cache;
use crate::{Error, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{Duration, SystemTime};

/// Minimum mtime age before a cache read refreshes it (1 hour)
pub const MTIME_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Minimum gap between expiry sweeps (1 day)
pub const TRIM_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Unused age at which entries and blobs become eligible for removal
/// (5 days: in practice essentially all reuse happens well inside this)
pub const TRIM_LIMIT: Duration = Duration::from_secs(5 * 24 * 60 * 60);

/// Marker file at the cache root holding the unix time of the last sweep
const TRIM_MARKER: &str = "trim.txt";

/// Expiry sweep parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimPolicy {
    /// Minimum gap between sweeps; calls inside it are skipped
    pub interval: Duration,
    /// Unused age at which files are removed
    pub limit: Duration,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            interval: TRIM_INTERVAL,
            limit: TRIM_LIMIT,
        }
    }
}

/// What a sweep did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrimStats {
    /// Index records and blobs removed
    pub files_removed: usize,
    /// Bytes those files occupied
    pub bytes_freed: u64,
    /// True when the sweep was skipped because one ran recently
    pub skipped: bool,
}

/// Sweep the cache, removing files whose tracked access time is older than
/// the policy's limit.
///
/// Uses the cache's clock, so tests can age entries without sleeping. The
/// sweep is caller-invoked; nothing in the cache schedules it.
///
/// # Errors
///
/// Returns [`Error::Io`] if a shard directory cannot be scanned. Individual
/// file removals and the marker rewrite are best-effort.
pub fn trim(cache: &Cache, policy: &TrimPolicy) -> Result<TrimStats> {
    let now = cache.now();
    let marker = cache.dir().join(TRIM_MARKER);

    if let Some(last) = read_marker(&marker) {
        let age = now.signed_duration_since(last).to_std();
        if age.is_ok_and(|age| age < policy.interval) || age.is_err() {
            tracing::debug!(dir = %cache.dir().display(), "trim ran recently, skipping");
            return Ok(TrimStats {
                skipped: true,
                ..TrimStats::default()
            });
        }
    }

    let Some(cutoff) = SystemTime::from(now).checked_sub(policy.limit) else {
        return Ok(TrimStats {
            skipped: true,
            ..TrimStats::default()
        });
    };

    let mut stats = TrimStats::default();
    for i in 0..=255u8 {
        let shard = cache.dir().join(format!("{i:02x}"));
        let entries = fs::read_dir(&shard).map_err(|e| Error::io(e, &shard, "read_dir"))?;
        for dent in entries.flatten() {
            let Ok(meta) = dent.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let Ok(mtime) = meta.modified() else { continue };
            if mtime >= cutoff {
                continue;
            }
            let path = dent.path();
            let size = meta.len();
            if fs::remove_file(&path).is_ok() {
                stats.files_removed += 1;
                stats.bytes_freed += size;
                tracing::debug!(path = %path.display(), size, "removed expired cache file");
            }
        }
    }

    if let Err(e) = fs::write(&marker, now.timestamp().to_string()) {
        // Worst case the next sweep runs early.
        tracing::warn!(path = %marker.display(), "failed to record trim time: {e}");
    }
    Ok(stats)
}

fn read_marker(path: &std::path::Path) -> Option<chrono::DateTime<chrono::Utc>> {
    let text = fs::read_to_string(path).ok()?;
    let secs = text.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp(secs, 0)
}
