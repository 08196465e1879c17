#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Cover Crop Library
//!
//! Fetches remote cover artwork, finds faces with a PICO pixel-comparison
//! cascade and crops the image to a target aspect ratio around the most
//! prominent face.
//!
//! ## Features
//!
//! - **Content-addressed caches**: fetched images and raw detections are kept
//!   on disk under a key derived from the source URL
//! - **PICO cascade**: multi-scale scan on the blocking pool with IoU clustering
//! - **Per-kind defaults**: actor and movie primaries, thumbnails and backdrops
//!   each carry their own ratio and fallback position
//! - **Provider fetch profiles**: per-provider headers, cookies, user agent and proxy
//! - **CLI Integration**: Optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use covercrop::{
//!     CascadeFaceDetector, CoverCropError, FetcherRegistry, FetchProfile, HttpFetcher,
//!     ImageEngine, PipelineConfig,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> covercrop::Result<()> {
//! let config = PipelineConfig::builder()
//!     .cascade_model("models/facefinder")
//!     .build()?;
//!
//! let fetcher = Arc::new(HttpFetcher::new(&FetchProfile::new().with_user_agent("covercrop"))?);
//! let engine = ImageEngine::builder(&config)
//!     .fetchers(FetcherRegistry::new().with_fallback(fetcher))
//!     .detector(Arc::new(CascadeFaceDetector::from_config(&config)?))
//!     .build();
//!
//! // Position the 0.7 crop on the most prominent face, right edge when none
//! let image = engine
//!     .get_image_by_url("any", "https://example.com/cover.jpg", 0.7, 1.0, true, &CancellationToken::new())
//!     .await?;
//! image
//!     .save("primary.jpg")
//!     .map_err(|e| CoverCropError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): Command-line interface and tracing subscriber setup
//! - `tracing-json`: JSON log output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! covercrop = { version = "0.1", default-features = false }
//! ```

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod content_key;
pub mod crop;
pub mod detect;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod position;
pub mod tracing_config;

// Public API exports
pub use cache::{format_size, CacheStats, DetectionCache, DiskUsage, ImageCache};
pub use config::{
    CascadeParams, DefaultPositions, FacePolicyConfig, ImageRatios, PipelineConfig,
    PipelineConfigBuilder,
};
pub use content_key::{address_of, ContentKey};
pub use crop::{crop, crop_region, CropRegion};
pub use detect::{
    cluster_detections, iou, Cascade, CascadeFaceDetector, CascadeTree, Detection, FaceDetector,
};
pub use engine::{
    normalize_number, FacePolicy, ImageEngine, ImageEngineBuilder, ImageKind, ImageRequest,
    MetadataSource, MovieImageInfo, PrefixFacePolicy,
};
pub use error::{CoverCropError, Result};
pub use fetch::{FetchProfile, FetcherRegistry, HttpFetcher, ImageFetcher};
pub use position::{crop_axis, plan_crop, select_position, CropAxis, CropPlan};
pub use tracing_config::{TracingConfig, TracingFormat};

/// Decode `image_bytes` and crop the result to `ratio` at `position`
///
/// Convenience for callers that already hold the image bytes and need no
/// caching or face detection.
///
/// # Examples
/// ```rust,no_run
/// # fn example(upload: Vec<u8>) -> covercrop::Result<()> {
/// let thumb = covercrop::crop_image_from_bytes(&upload, 16.0 / 9.0, 0.5)?;
/// thumb.save("thumb.jpg").map_err(|e| covercrop::CoverCropError::decode_error("save", e))?;
/// # Ok(())
/// # }
/// ```
pub fn crop_image_from_bytes(image_bytes: &[u8], ratio: f64, position: f64) -> Result<image::DynamicImage> {
    engine::validate_ratio(ratio)?;
    engine::validate_position(position)?;
    let image = image::load_from_memory(image_bytes)
        .map_err(|e| CoverCropError::decode_error("Failed to decode image from bytes", e))?;
    Ok(crop::crop(&image, ratio, position))
}
