use super::{CacheCounters, CacheDir, CacheStats, DiskUsage, KeyedLocks};
use crate::content_key::ContentKey;
use crate::detect::Detection;
use crate::error::{CoverCropError, Result};
use crate::tracing_config::{events, spans};
use bincode::Options;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, Instrument};

const DETECTION_EXTENSION: &str = "bin";

/// Upper bound on a decoded record list
const MAX_RECORD_BYTES: u64 = 16 * 1024 * 1024;

/// Fixed-width little-endian records, rejecting trailing bytes
fn record_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_RECORD_BYTES)
}

/// Serialize raw detections for storage
///
/// # Errors
/// Fails only when the list exceeds the record size limit.
pub fn encode_records(detections: &[Detection]) -> Result<Vec<u8>> {
    record_options()
        .serialize(detections)
        .map_err(|e| CoverCropError::invalid_config(format!("Failed to encode detections: {}", e)))
}

/// Parse stored detections
///
/// # Errors
/// Returns the bincode error for truncated, oversized or trailing data.
pub fn decode_records(bytes: &[u8]) -> std::result::Result<Vec<Detection>, bincode::Error> {
    record_options().deserialize(bytes)
}

/// Content-addressed store of raw (unclustered) detections
///
/// An entry is a length-prefixed list of `(row, col, scale, score)` records.
/// Clustering is not persisted so that the threshold can change without
/// invalidating the store.
#[derive(Debug)]
pub struct DetectionCache {
    dir: CacheDir,
    locks: KeyedLocks,
    counters: CacheCounters,
}

impl DetectionCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            dir: CacheDir::new(root, DETECTION_EXTENSION),
            locks: KeyedLocks::new(),
            counters: CacheCounters::default(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn entry_path(&self, key: &ContentKey) -> PathBuf {
        self.dir.entry_path(key)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// # Errors
    /// Failure to list the cache directory.
    pub fn disk_usage(&self) -> Result<DiskUsage> {
        self.dir.disk_usage()
    }

    /// Load the stored detections for `key`, `None` on a miss
    ///
    /// # Errors
    /// - I/O failure reading the entry
    /// - [`CoverCropError::CorruptCacheEntry`] when the entry cannot be parsed
    pub async fn load(&self, key: &ContentKey) -> Result<Option<Vec<Detection>>> {
        let Some(bytes) = self.dir.read(key).await? else {
            return Ok(None);
        };

        decode_records(&bytes).map(Some).map_err(|e| {
            self.counters.corrupt_entry();
            CoverCropError::corrupt_entry(self.dir.entry_path(key), e)
        })
    }

    /// Persist detections for `key`
    ///
    /// # Errors
    /// [`CoverCropError::CacheWrite`] when the entry cannot be written.
    pub async fn store(&self, key: &ContentKey, detections: &[Detection]) -> Result<PathBuf> {
        let bytes = encode_records(detections)
            .map_err(|e| CoverCropError::cache_write(self.dir.entry_path(key), e))?;
        self.dir.write_atomic(key, bytes).await
    }

    /// Return stored detections for `key`, computing and storing them on a miss
    ///
    /// `compute` is not invoked on a hit. Its errors propagate and nothing is
    /// stored; a failed write is logged and counted only.
    ///
    /// # Errors
    /// - Whatever `compute` returns
    /// - [`CoverCropError::CorruptCacheEntry`] for an unreadable entry
    pub async fn get_or_compute<F, Fut>(&self, key: &ContentKey, compute: F) -> Result<Vec<Detection>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Detection>>>,
    {
        let span = spans::cache_operation("detections", key.as_str());

        async {
            let _guard = self.locks.lock(key).await;

            if let Some(detections) = self.load(key).await? {
                self.counters.hit();
                events::cache_hit(key.as_str(), "detections");
                return Ok(detections);
            }

            self.counters.miss();
            events::cache_miss(key.as_str(), "detections");

            let detections = compute().await?;
            match self.store(key, &detections).await {
                Ok(path) => debug!(path = %path.display(), count = detections.len(), "Stored detections"),
                Err(e) => {
                    self.counters.write_error();
                    events::cache_write_failed(&self.dir.entry_path(key), &e);
                },
            }
            Ok(detections)
        }
        .instrument(span)
        .await
    }
}
