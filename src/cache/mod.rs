//! On-disk caches for fetched images and face detections
//!
//! Both stores are flat directories of `<content-key>.<ext>` files. Entries
//! are written to a temporary file in the same directory and renamed into
//! place, so readers never observe a partial entry. Concurrent requests for
//! the same key are serialized through [`KeyedLocks`]; different keys never
//! block each other.

mod detection_cache;
mod image_cache;
mod keyed_locks;

pub use detection_cache::{decode_records, encode_records, DetectionCache};
pub use image_cache::{encode_jpeg, ImageCache};
pub use keyed_locks::KeyedLocks;

use crate::content_key::ContentKey;
use crate::error::{CoverCropError, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a store's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from disk
    pub hits: u64,
    /// Lookups that had to fetch or compute
    pub misses: u64,
    /// Entries that could not be persisted
    pub write_errors: u64,
    /// Entries that existed but could not be decoded
    pub corrupt_entries: u64,
}

impl CacheStats {
    /// Hit ratio as a percentage of all lookups
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    write_errors: AtomicU64,
    corrupt_entries: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn corrupt_entry(&self) {
        self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
        }
    }
}

/// Disk usage of a cache directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub entries: usize,
    pub size_bytes: u64,
}

/// A flat directory of content-addressed files
#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
    extension: &'static str,
}

impl CacheDir {
    pub fn new<P: Into<PathBuf>>(root: P, extension: &'static str) -> Self {
        Self {
            root: root.into(),
            extension,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Location of the entry for `key`; the file may not exist
    #[must_use]
    pub fn entry_path(&self, key: &ContentKey) -> PathBuf {
        self.root.join(key.file_name(self.extension))
    }

    /// Read an entry, `None` when it does not exist
    ///
    /// # Errors
    /// Any I/O failure other than a missing file or store directory.
    pub async fn read(&self, key: &ContentKey) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            // An unusable store directory behaves like an empty one; writes report it
            Err(_) if !self.root.is_dir() => Ok(None),
            Err(e) => Err(CoverCropError::file_io_error("read cache entry", &path, &e)),
        }
    }

    /// Persist an entry atomically, creating the directory on first use
    ///
    /// # Errors
    /// [`CoverCropError::CacheWrite`] when the directory, the temporary file
    /// or the final rename fails.
    pub async fn write_atomic(&self, key: &ContentKey, bytes: Vec<u8>) -> Result<PathBuf> {
        let root = self.root.clone();
        let target = self.entry_path(key);

        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&root).map_err(|e| CoverCropError::cache_write(&root, e))?;

            let mut temp = tempfile::NamedTempFile::new_in(&root)
                .map_err(|e| CoverCropError::cache_write(&target, e))?;
            temp.write_all(&bytes)
                .and_then(|()| temp.flush())
                .map_err(|e| CoverCropError::cache_write(&target, e))?;
            temp.persist(&target)
                .map_err(|e| CoverCropError::cache_write(&target, e.error))?;

            Ok(target)
        })
        .await
        .map_err(|e| CoverCropError::cache_write(self.entry_path(key), e))?
    }

    /// Count entries and their total size; a missing directory is empty
    ///
    /// # Errors
    /// Failure to list the directory or stat an entry.
    pub fn disk_usage(&self) -> Result<DiskUsage> {
        let mut usage = DiskUsage::default();
        if !self.root.exists() {
            return Ok(usage);
        }

        let entries = fs::read_dir(&self.root)
            .map_err(|e| CoverCropError::file_io_error("read cache directory", &self.root, &e))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| CoverCropError::file_io_error("read cache directory", &self.root, &e))?;
            let path = entry.path();
            let is_entry = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(self.extension));
            if is_entry {
                let metadata = entry
                    .metadata()
                    .map_err(|e| CoverCropError::file_io_error("stat cache entry", &path, &e))?;
                usage.entries += 1;
                usage.size_bytes += metadata.len();
            }
        }
        Ok(usage)
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}
