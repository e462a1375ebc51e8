//! Persistent dedup cache: fingerprint → output reference.
//!
//! Loaded once at startup, written through to disk on every `record`.
//! The on-disk form is a flat JSON object. Writes go to a sibling temp
//! file which is then renamed over the store, so a crash mid-flush leaves
//! either the old or the new map on disk, never a torn one.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Dedup cache shared by submission handling and the worker.
#[derive(Debug)]
pub struct DedupCache {
    path: PathBuf,
    entries: Mutex<HashMap<Fingerprint, String>>,
}

impl DedupCache {
    /// Load the cache from `path`.
    ///
    /// A missing file yields an empty cache. A file that exists but does not
    /// parse is reported as [`Error::CorruptCache`]; callers treat that as fatal.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<HashMap<Fingerprint, String>>(&bytes)
                .map_err(|source| Error::CorruptCache {
                    path: path.clone(),
                    source,
                })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no dedup cache on disk, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), entries = entries.len(), "dedup cache loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the output previously produced for `fingerprint`.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.lock().get(fingerprint).cloned()
    }

    /// Insert or overwrite an entry and flush the whole map to disk.
    ///
    /// The in-memory entry is kept even when the flush fails; the error is
    /// returned so the caller can log it. The next successful flush (or a
    /// restart) reconciles memory and disk.
    pub fn record(&self, fingerprint: Fingerprint, output: impl Into<String>) -> Result<()> {
        let output = output.into();
        let mut entries = self.lock();
        entries.insert(fingerprint.clone(), output.clone());
        // Flush while still holding the lock so concurrent writers land on
        // disk in the same order they landed in memory.
        self.flush(&entries)?;
        debug!(fingerprint = %fingerprint, output = %output, "dedup cache entry recorded");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted snapshot of all entries.
    pub fn entries(&self) -> Vec<(Fingerprint, String)> {
        let sorted: BTreeMap<_, _> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        sorted.into_iter().collect()
    }

    fn flush(&self, entries: &HashMap<Fingerprint, String>) -> Result<()> {
        let sorted: BTreeMap<&Fingerprint, &String> = entries.iter().collect();
        let data = serde_json::to_vec_pretty(&sorted)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, String>> {
        // A panic while holding the lock cannot leave a half-written entry:
        // every mutation is a single HashMap::insert.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
