//! Content-addressable action cache
//!
//! recache memoizes the results of deterministic computations on disk:
//! given a fixed-width action key describing a computation, it stores and
//! retrieves the output bytes that computation produced, across independent
//! concurrent processes on one machine, without corruption.
//!
//! # Overview
//!
//! - [`Hash`] derives salted action keys; [`OutputId`] is the unsalted
//!   content hash of output bytes, deduplicating identical outputs into one
//!   stored blob
//! - [`Cache`] is the Get/Put façade over a sharded directory layout; the
//!   filesystem is the only shared state
//! - [`entry`] is the fixed-width, human-inspectable index record format
//! - [`trim`](trim()) expires entries that have gone unused
//!
//! # Example
//!
//! ```no_run
//! use recache::{Hash, ActionId};
//!
//! # fn main() -> recache::Result<()> {
//! let cache = recache::default_cache()?;
//!
//! let mut hash = Hash::new("analyze");
//! hash.write(b"everything that describes the computation");
//! let action = ActionId(hash.sum());
//!
//! let payload = match cache.get_bytes(action) {
//!     Ok((data, _entry)) => data,
//!     Err(e) if e.is_not_found() => {
//!         let data = b"...the real computation...".to_vec();
//!         cache.put_bytes(action, &data)?;
//!         data
//!     }
//!     Err(e) => return Err(e),
//! };
//! # let _ = payload;
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod entry;
mod error;
pub mod hash;
mod paths;
mod trim;

pub use cache::{Cache, Clock};
pub use entry::{ENTRY_SIZE, Entry, RecordError};
pub use error::{Error, MissReason, Result};
pub use hash::{
    ActionId, Digest, FileHasher, HASH_SIZE, Hash, HashRecorder, OutputId, debug_recorder,
    file_hasher,
};
pub use paths::{ROOT_ENV, RootInputs, default_cache, default_dir, root_from_inputs};
pub use trim::{MTIME_INTERVAL, TRIM_INTERVAL, TRIM_LIMIT, TrimPolicy, TrimStats, trim};
