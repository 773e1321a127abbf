//! Default cache root resolution
//!
//! Which directory to cache under is policy, not engine: the engine only
//! requires an absolute, existing directory. This module supplies the usual
//! resolution for callers that do not bring their own root, first writable
//! candidate wins:
//!
//! 1. `RECACHE_DIR` (explicit override; must be absolute)
//! 2. `XDG_CACHE_HOME/recache`
//! 3. OS cache dir `/recache`
//! 4. temp dir `/recache` (fallback)

use crate::cache::Cache;
use crate::{Error, Result};
use std::fs;
use std::path::PathBuf;

/// Message stored in a README at the cache root, as a courtesy to anyone
/// who finds the directory and wonders where it came from
const CACHE_README: &str = "\
This directory holds cached outputs of previously executed computations,
keyed by a hash of their complete description. It is managed by recache;
entries not used for a few days are expired automatically, and the whole
directory can be deleted safely at the cost of recomputation.
";

/// Name of the environment variable overriding the cache root
pub const ROOT_ENV: &str = "RECACHE_DIR";

/// Inputs for determining the cache root directory, explicit so tests can
/// inject them
#[derive(Debug, Clone)]
pub struct RootInputs {
    /// Explicit override (`RECACHE_DIR`)
    pub override_dir: Option<PathBuf>,
    /// `XDG_CACHE_HOME`, if set
    pub xdg_cache_home: Option<PathBuf>,
    /// The platform cache directory
    pub os_cache_dir: Option<PathBuf>,
    /// Last-resort location
    pub temp_dir: PathBuf,
}

impl RootInputs {
    /// Read the inputs from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        let non_empty = |v: std::result::Result<String, std::env::VarError>| {
            v.ok().filter(|s| !s.trim().is_empty()).map(PathBuf::from)
        };
        Self {
            override_dir: non_empty(std::env::var(ROOT_ENV)),
            xdg_cache_home: non_empty(std::env::var("XDG_CACHE_HOME")),
            os_cache_dir: dirs::cache_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Resolve the cache root from explicit inputs.
///
/// An override is authoritative: it is used (created if needed) or the
/// resolution fails, with no fallback, so a misconfigured override never
/// silently caches somewhere else. The remaining candidates are probed in
/// order and the first writable one wins.
///
/// # Errors
///
/// Returns [`Error::Init`] for a relative override, an unusable override,
/// or when no candidate is writable.
pub fn root_from_inputs(inputs: RootInputs) -> Result<PathBuf> {
    if let Some(dir) = inputs.override_dir {
        if !dir.is_absolute() {
            return Err(Error::init(&dir, format!("{ROOT_ENV} must be an absolute path")));
        }
        fs::create_dir_all(&dir)
            .map_err(|e| Error::init_io(&dir, "creating configured cache root", e))?;
        return Ok(dir);
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("recache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("recache"));
    }
    candidates.push(inputs.temp_dir.join("recache"));

    for path in candidates {
        // An existing candidate may still be read-only (CI caches often
        // are); probe before committing to it.
        if path.exists() {
            let probe = path.join(".write_probe");
            match fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::init(
        inputs.temp_dir,
        "failed to determine a writable cache directory",
    ))
}

/// The default cache root for this process's environment
///
/// # Errors
///
/// See [`root_from_inputs`].
pub fn default_dir() -> Result<PathBuf> {
    root_from_inputs(RootInputs::from_env())
}

/// Open the cache at the default root, creating it on first use.
///
/// Writes the README marker once, best-effort; a cache that works but
/// lacks its README is not an error.
///
/// # Errors
///
/// Returns [`Error::Init`] if no usable root can be resolved or the cache
/// layout cannot be created.
pub fn default_cache() -> Result<Cache> {
    let dir = default_dir()?;
    fs::create_dir_all(&dir).map_err(|e| Error::init_io(&dir, "creating cache root", e))?;
    let readme = dir.join("README");
    if !readme.exists() {
        if let Err(e) = fs::write(&readme, CACHE_README) {
            tracing::debug!(path = %readme.display(), "failed to write cache README: {e}");
        }
    }
    Cache::open(dir)
}
