use super::{CacheCounters, CacheDir, CacheStats, DiskUsage, KeyedLocks};
use crate::content_key::{address_of, ContentKey};
use crate::error::{CoverCropError, Result};
use crate::tracing_config::{events, spans};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError, ImageFormat};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, Instrument};

const IMAGE_EXTENSION: &str = "jpg";

/// Encode an image as baseline JPEG over its RGB8 representation
///
/// # Errors
/// Propagates encoder failures.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> std::result::Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    let rgb = image.to_rgb8();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(buffer)
}

/// Content-addressed store of fetched images
///
/// Entries are JPEG files named after the source URL's content key. JPEG
/// sources are stored byte-for-byte; anything else is re-encoded. A miss
/// returns the image decoded from the persisted bytes, so a later hit yields
/// the same pixels.
#[derive(Debug)]
pub struct ImageCache {
    dir: CacheDir,
    jpeg_quality: u8,
    locks: KeyedLocks,
    counters: CacheCounters,
}

/// Decoded image plus the bytes to persist for it
struct PreparedEntry {
    image: DynamicImage,
    encoded: Option<Vec<u8>>,
}

impl ImageCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            dir: CacheDir::new(root, IMAGE_EXTENSION),
            jpeg_quality: 100,
            locks: KeyedLocks::new(),
            counters: CacheCounters::default(),
        }
    }

    /// Set the quality used when re-encoding non-JPEG sources
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the entry for `url` lives; the file may not exist
    #[must_use]
    pub fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.entry_path(&address_of(url))
    }

    /// Whether an entry for `url` exists on disk
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.entry_path(url).is_file()
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

    /// Return the cached image for `url`, fetching it on a miss
    ///
    /// `fetch` receives the URL and is only invoked on a miss. Failing to
    /// persist the entry is logged and counted but does not fail the call.
    ///
    /// # Errors
    /// - Whatever `fetch` returns
    /// - [`CoverCropError::Decode`] when the fetched bytes are not an image
    /// - [`CoverCropError::CorruptCacheEntry`] when the stored entry cannot be decoded
    pub async fn get_or_fetch<F, Fut>(&self, url: &str, fetch: F) -> Result<DynamicImage>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let key = address_of(url);
        let span = spans::cache_operation("image", key.as_str());

        async {
            let _guard = self.locks.lock(&key).await;

            if let Some(bytes) = self.dir.read(&key).await? {
                let image = self.decode_entry(&key, bytes).await?;
                self.counters.hit();
                events::cache_hit(key.as_str(), "image");
                return Ok(image);
            }

            self.counters.miss();
            events::cache_miss(key.as_str(), "image");

            let fetched = fetch(url.to_string()).await?;
            let quality = self.jpeg_quality;
            let context = format!("image fetched from '{}'", url);
            let prepared = tokio::task::spawn_blocking(move || prepare_entry(&fetched, quality, &context))
                .await
                .map_err(|e| {
                    CoverCropError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("Image decoder task failed: {}", e),
                    ))
                })??;

            if let Some(encoded) = prepared.encoded {
                match self.dir.write_atomic(&key, encoded).await {
                    Ok(path) => debug!(path = %path.display(), "Stored image entry"),
                    Err(e) => {
                        self.counters.write_error();
                        events::cache_write_failed(&self.dir.entry_path(&key), &e);
                    },
                }
            }

            Ok(prepared.image)
        }
        .instrument(span)
        .await
    }

    async fn decode_entry(&self, key: &ContentKey, bytes: Vec<u8>) -> Result<DynamicImage> {
        let path = self.dir.entry_path(key);
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| CoverCropError::corrupt_entry(&path, e))?;

        decoded.map_err(|e| {
            self.counters.corrupt_entry();
            CoverCropError::corrupt_entry(&path, e)
        })
    }
}

/// Decode fetched bytes and pick what to persist
fn prepare_entry(bytes: &[u8], quality: u8, context: &str) -> Result<PreparedEntry> {
    let format = image::guess_format(bytes).map_err(|e| CoverCropError::decode_error(context, e))?;
    let image =
        image::load_from_memory_with_format(bytes, format).map_err(|e| CoverCropError::decode_error(context, e))?;

    if format == ImageFormat::Jpeg {
        return Ok(PreparedEntry {
            image,
            encoded: Some(bytes.to_vec()),
        });
    }

    // Re-encode, then hand back what a later hit will decode
    let reencoded = encode_jpeg(&image, quality)
        .and_then(|encoded| image::load_from_memory_with_format(&encoded, ImageFormat::Jpeg).map(|img| (img, encoded)));
    match reencoded {
        Ok((image, encoded)) => Ok(PreparedEntry {
            image,
            encoded: Some(encoded),
        }),
        Err(e) => {
            debug!(error = %e, "JPEG re-encode failed, serving without caching");
            Ok(PreparedEntry {
                image,
                encoded: None,
            })
        },
    }
}
