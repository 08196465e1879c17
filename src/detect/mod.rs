//! Face detection
//!
//! [`CascadeFaceDetector`] runs the PICO cascade over a grayscale copy of the
//! image on the blocking pool, persists the raw detections per content key and
//! clusters them on every call.

pub mod cascade;
pub mod cluster;

pub use cascade::{Cascade, CascadeTree};
pub use cluster::{cluster_detections, iou};

use crate::cache::DetectionCache;
use crate::config::{CascadeParams, PipelineConfig};
use crate::content_key::ContentKey;
use crate::error::{CoverCropError, Result};
use crate::tracing_config::events;
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// A square window the classifier accepted
///
/// `row`/`col` locate the window centre in pixels, `scale` is its side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub row: i32,
    pub col: i32,
    pub scale: i32,
    pub score: f32,
}

/// Anything that can locate faces in an image
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Return clustered detections for `image`, identified by `key`
    async fn detect(
        &self,
        image: &DynamicImage,
        key: &ContentKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<Detection>>;
}

/// Convert to 8-bit luminance with 0.299 R + 0.587 G + 0.114 B
#[must_use]
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// PICO-cascade detector backed by the detection cache
pub struct CascadeFaceDetector {
    cascade: Arc<Cascade>,
    params: CascadeParams,
    iou_threshold: f64,
    timeout: Duration,
    cache: DetectionCache,
}

impl CascadeFaceDetector {
    pub fn new(cascade: Cascade, cache: DetectionCache) -> Self {
        Self {
            cascade: Arc::new(cascade),
            params: CascadeParams::default(),
            iou_threshold: 0.2,
            timeout: Duration::from_secs(20),
            cache,
        }
    }

    /// Build a detector from the pipeline configuration
    ///
    /// # Errors
    /// - [`CoverCropError::ClassifierUnavailable`] when no model path is
    ///   configured or the model cannot be loaded
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let model = config.cascade_model.as_ref().ok_or_else(|| {
            CoverCropError::classifier("No cascade model configured (set cascade_model)")
        })?;
        let cascade = Cascade::from_path(model)?;
        debug!(
            model = %model.display(),
            depth = cascade.depth(),
            trees = cascade.tree_count(),
            "Loaded cascade model"
        );

        Ok(Self::new(cascade, DetectionCache::new(config.detection_cache_path()))
            .with_params(config.cascade)
            .with_iou_threshold(config.iou_threshold)
            .with_timeout(config.detect_timeout()))
    }

    #[must_use]
    pub fn with_params(mut self, params: CascadeParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_iou_threshold(mut self, threshold: f64) -> Self {
        self.iou_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Run the cascade on the blocking pool, bounded by the detector timeout
    async fn scan(&self, image: &DynamicImage, cancel: &CancellationToken) -> Result<Vec<Detection>> {
        let gray = to_grayscale(image);
        let cascade = Arc::clone(&self.cascade);
        let params = self.params;
        let token = cancel.child_token();
        let worker_token = token.clone();
        let start = Instant::now();

        let worker =
            tokio::task::spawn_blocking(move || cascade.run(&gray, &params, &worker_token));

        let detections = match tokio::time::timeout(self.timeout, worker).await {
            Ok(joined) => joined.map_err(|e| {
                CoverCropError::classifier(format!("Cascade worker failed: {}", e))
            })??,
            Err(_) => {
                token.cancel();
                return Err(CoverCropError::timeout("face detection", self.timeout));
            },
        };

        events::performance_metric(
            "cascade_scan",
            start.elapsed().as_secs_f64() * 1000.0,
            Some(&format!("{} raw detections", detections.len())),
        );
        Ok(detections)
    }
}

#[async_trait]
impl FaceDetector for CascadeFaceDetector {
    #[instrument(skip(self, image, key, cancel), fields(key = %key, width = image.width(), height = image.height()))]
    async fn detect(
        &self,
        image: &DynamicImage,
        key: &ContentKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<Detection>> {
        let raw = self
            .cache
            .get_or_compute(key, || self.scan(image, cancel))
            .await?;
        let clusters = cluster_detections(&raw, self.iou_threshold);
        debug!(raw = raw.len(), clusters = clusters.len(), "Clustered detections");
        Ok(clusters)
    }
}
