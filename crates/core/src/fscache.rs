// SPDX-License-Identifier: MIT

//! Per-process memoization of filesystem calls, grounded on the original
//! implementation's `FSCache` (`fscache.py`): the same `stat`/`exists`/
//! `sha256`/YAML-load call with the same arguments is served from an
//! in-memory cache after the first hit. `fscache.py` dispatches dynamically
//! through `__getattr__`; Rust has no equivalent, so each cached operation
//! gets its own typed method instead.

use crate::sha256::sha256sum_of;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Default)]
struct Cache {
    exists: HashMap<PathBuf, bool>,
    size: HashMap<PathBuf, u64>,
    mtime: HashMap<PathBuf, std::time::SystemTime>,
    sha256: HashMap<PathBuf, String>,
}

/// A per-run (or per-process) memoizing cache over `stat`-like filesystem
/// calls and SHA-256 hashing.
///
/// Cheap to clone: the underlying cache is shared (`Arc`-free here since the
/// cache is only ever accessed from the single driver task that owns a run;
/// `Mutex` is used purely for interior mutability through `&self`, not for
/// cross-thread sharing).
#[derive(Default)]
pub struct FsCache {
    cache: Mutex<Cache>,
}

impl FsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized `Path::exists`.
    pub fn exists(&self, path: &Path) -> bool {
        let mut cache = self.cache.lock();
        if let Some(v) = cache.exists.get(path) {
            return *v;
        }
        let v = path.exists();
        cache.exists.insert(path.to_path_buf(), v);
        v
    }

    /// Memoized file size in bytes.
    pub fn getsize(&self, path: &Path) -> io::Result<u64> {
        {
            let cache = self.cache.lock();
            if let Some(v) = cache.size.get(path) {
                return Ok(*v);
            }
        }
        let size = std::fs::metadata(path)?.len();
        self.cache.lock().size.insert(path.to_path_buf(), size);
        Ok(size)
    }

    /// Memoized modification time.
    pub fn getmtime(&self, path: &Path) -> io::Result<std::time::SystemTime> {
        {
            let cache = self.cache.lock();
            if let Some(v) = cache.mtime.get(path) {
                return Ok(*v);
            }
        }
        let mtime = std::fs::metadata(path)?.modified()?;
        self.cache.lock().mtime.insert(path.to_path_buf(), mtime);
        Ok(mtime)
    }

    /// Memoized SHA-256 hex digest. If `value` is supplied, it seeds the
    /// cache instead of recomputing (mirrors `fscache.py`'s
    /// `sha256sum_of(path, value=hashsum)` call used right after the hashing
    /// pool computes a digest out-of-band).
    pub fn sha256sum_of(&self, path: &Path, value: Option<String>) -> io::Result<String> {
        if let Some(v) = value {
            self.cache.lock().sha256.insert(path.to_path_buf(), v.clone());
            return Ok(v);
        }
        {
            let cache = self.cache.lock();
            if let Some(v) = cache.sha256.get(path) {
                return Ok(v.clone());
            }
        }
        let digest = sha256sum_of(path)?;
        self.cache
            .lock()
            .sha256
            .insert(path.to_path_buf(), digest.clone());
        Ok(digest)
    }

    /// Load and memoize a YAML file's deserialized content. Unlike the other
    /// caches this one is not invalidated by `clear()` keyed per-path — the
    /// whole cache is cleared together, matching `fscache.py::clear`.
    pub fn load_yaml_from_file<T: DeserializeOwned>(&self, path: &Path) -> io::Result<T> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Invalidate every cached entry. Called once a run's temp directory has
    /// been renamed away, since every previously cached `stat` is now stale
    /// (`abstract_step.py::run`'s `run.reset_fsc()` call).
    pub fn clear(&self) {
        *self.cache.lock() = Cache::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_is_memoized_across_deletes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"x").expect("write");
        let fsc = FsCache::new();
        assert!(fsc.exists(&path));
        std::fs::remove_file(&path).expect("remove");
        // Stale cached value still returned until clear().
        assert!(fsc.exists(&path));
        fsc.clear();
        assert!(!fsc.exists(&path));
    }

    #[test]
    fn sha256_can_be_seeded_without_recompute() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello world").expect("write");
        let fsc = FsCache::new();
        let seeded = fsc
            .sha256sum_of(&path, Some("seeded-value".to_string()))
            .expect("seed");
        assert_eq!(seeded, "seeded-value");
        let again = fsc.sha256sum_of(&path, None).expect("cached");
        assert_eq!(again, "seeded-value");
    }

    #[test]
    fn sha256_computes_when_not_seeded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello world").expect("write");
        let fsc = FsCache::new();
        let digest = fsc.sha256sum_of(&path, None).expect("hash");
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn load_yaml_deserializes() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Doc {
            a: u32,
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.yaml");
        std::fs::write(&path, "a: 7\n").expect("write");
        let fsc = FsCache::new();
        let doc: Doc = fsc.load_yaml_from_file(&path).expect("load");
        assert_eq!(doc, Doc { a: 7 });
    }
}
