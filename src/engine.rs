//! Image orchestration per image kind
//!
//! [`ImageEngine`] resolves a candidate URL through a [`MetadataSource`],
//! fetches it through the image cache, optionally positions the crop on the
//! most prominent face and crops to the kind's ratio.

use crate::cache::ImageCache;
use crate::config::{DefaultPositions, FacePolicyConfig, ImageRatios, PipelineConfig};
use crate::content_key::address_of;
use crate::crop::crop;
use crate::detect::FaceDetector;
use crate::error::{CoverCropError, Result};
use crate::fetch::FetcherRegistry;
use crate::position::plan_crop;
use crate::tracing_config::{events, spans};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

/// Largest accepted target ratio; anything wider is treated as a caller error
pub const MAX_RATIO: f64 = 100.0;

/// Kinds of artwork the engine produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageKind {
    ActorPrimary,
    MoviePrimary,
    MovieThumb,
    MovieBackdrop,
}

impl ImageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActorPrimary => "actor_primary",
            Self::MoviePrimary => "movie_primary",
            Self::MovieThumb => "movie_thumb",
            Self::MovieBackdrop => "movie_backdrop",
        }
    }

    /// Configured ratio for this kind
    #[must_use]
    pub fn default_ratio(self, ratios: &ImageRatios) -> f64 {
        match self {
            Self::ActorPrimary | Self::MoviePrimary => ratios.primary,
            Self::MovieThumb => ratios.thumb,
            Self::MovieBackdrop => ratios.backdrop,
        }
    }

    /// Configured fallback position for this kind
    #[must_use]
    pub fn default_position(self, positions: &DefaultPositions) -> f64 {
        match self {
            Self::ActorPrimary => positions.actor_primary,
            Self::MoviePrimary => positions.movie_primary,
            Self::MovieThumb => positions.movie_thumb,
            Self::MovieBackdrop => positions.movie_backdrop,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request for a cropped image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    provider_name: String,
    external_id: String,
    kind: ImageKind,
    target_ratio: Option<f64>,
    explicit_position: Option<f64>,
}

impl ImageRequest {
    pub fn new<P: Into<String>, I: Into<String>>(provider_name: P, external_id: I, kind: ImageKind) -> Self {
        Self {
            provider_name: provider_name.into(),
            external_id: external_id.into(),
            kind,
            target_ratio: None,
            explicit_position: None,
        }
    }

    /// Build a request where negative ratio or position mean "use the default"
    pub fn from_sentinels<P: Into<String>, I: Into<String>>(
        provider_name: P,
        external_id: I,
        kind: ImageKind,
        ratio: f64,
        position: f64,
    ) -> Self {
        Self {
            target_ratio: (ratio >= 0.0 || ratio.is_nan()).then_some(ratio),
            explicit_position: (position >= 0.0 || position.is_nan()).then_some(position),
            ..Self::new(provider_name, external_id, kind)
        }
    }

    #[must_use]
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.target_ratio = Some(ratio);
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: f64) -> Self {
        self.explicit_position = Some(position);
        self
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn target_ratio(&self) -> Option<f64> {
        self.target_ratio
    }

    pub fn explicit_position(&self) -> Option<f64> {
        self.explicit_position
    }

    /// Check the explicit overrides, if any
    ///
    /// # Errors
    /// [`CoverCropError::InvalidRatio`] or [`CoverCropError::InvalidPosition`].
    pub fn validate(&self) -> Result<()> {
        if let Some(ratio) = self.target_ratio {
            validate_ratio(ratio)?;
        }
        if let Some(position) = self.explicit_position {
            validate_position(position)?;
        }
        Ok(())
    }
}

/// # Errors
/// [`CoverCropError::InvalidRatio`] unless `0 < ratio <= MAX_RATIO`.
pub fn validate_ratio(ratio: f64) -> Result<()> {
    if ratio.is_finite() && ratio > 0.0 && ratio <= MAX_RATIO {
        Ok(())
    } else {
        Err(CoverCropError::InvalidRatio(format!(
            "{} (expected a finite value in (0, {}])",
            ratio, MAX_RATIO
        )))
    }
}

/// # Errors
/// [`CoverCropError::InvalidPosition`] unless `0 <= position <= 1`.
pub fn validate_position(position: f64) -> Result<()> {
    if (0.0..=1.0).contains(&position) {
        Ok(())
    } else {
        Err(CoverCropError::InvalidPosition(format!(
            "{} (expected a value in [0, 1])",
            position
        )))
    }
}

/// Image URLs a provider knows for a movie
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovieImageInfo {
    /// Content number, e.g. `ABC-123`
    pub number: String,
    pub cover_url: String,
    pub big_cover_url: String,
    pub big_thumb_url: String,
}

impl MovieImageInfo {
    /// URL to use for `kind`; empty when the provider has none
    ///
    /// Primary images prefer the big thumbnail, thumbnails and backdrops the
    /// big cover; both fall back to the cover.
    #[must_use]
    pub fn preferred_url(&self, kind: ImageKind) -> &str {
        let preferred = match kind {
            ImageKind::MoviePrimary | ImageKind::ActorPrimary => &self.big_thumb_url,
            ImageKind::MovieThumb | ImageKind::MovieBackdrop => &self.big_cover_url,
        };
        if preferred.is_empty() {
            &self.cover_url
        } else {
            preferred
        }
    }
}

/// Metadata lookups the engine depends on
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Candidate image URLs for an actor, best first
    async fn actor_image_urls(&self, provider: &str, id: &str) -> Result<Vec<String>>;

    /// Image URLs and content number of a movie
    async fn movie_image_info(&self, provider: &str, id: &str) -> Result<MovieImageInfo>;
}

/// Decides whether a movie's primary image is positioned on a face
pub trait FacePolicy: Send + Sync {
    /// `number` is already normalized by [`normalize_number`]
    fn requires_face_detection(&self, number: &str) -> bool;
}

/// Canonical form of a content number: trimmed, upper-case, `_` replaced by `-`
#[must_use]
pub fn normalize_number(number: &str) -> String {
    number.trim().to_uppercase().replace('_', "-")
}

/// Prefix-based face policy
///
/// Uncensored and amateur releases are shot with the subject off-centre, so
/// their numbers opt into face positioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixFacePolicy {
    prefixes: Vec<String>,
    numeric_ids: bool,
}

impl PrefixFacePolicy {
    pub fn new<I, S>(prefixes: I, numeric_ids: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| normalize_number(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
            numeric_ids,
        }
    }

    #[must_use]
    pub fn from_config(config: &FacePolicyConfig) -> Self {
        Self::new(&config.prefixes, config.numeric_ids)
    }
}

impl Default for PrefixFacePolicy {
    fn default() -> Self {
        Self::from_config(&FacePolicyConfig::default())
    }
}

impl FacePolicy for PrefixFacePolicy {
    fn requires_face_detection(&self, number: &str) -> bool {
        if number.is_empty() {
            return false;
        }
        if self.prefixes.iter().any(|prefix| number.starts_with(prefix.as_str())) {
            return true;
        }
        // e.g. 010120-001, 120415_01
        self.numeric_ids
            && number.chars().any(|c| c.is_ascii_digit())
            && number.chars().all(|c| c.is_ascii_digit() || c == '-')
    }
}

/// Orchestrates fetch, detection and crop for every image kind
pub struct ImageEngine {
    metadata: Option<Arc<dyn MetadataSource>>,
    fetchers: FetcherRegistry,
    images: ImageCache,
    detector: Option<Arc<dyn FaceDetector>>,
    face_policy: Arc<dyn FacePolicy>,
    ratios: ImageRatios,
    positions: DefaultPositions,
    fetch_timeout: Duration,
}

impl fmt::Debug for ImageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageEngine")
            .field("metadata", &self.metadata.is_some())
            .field("fetchers", &self.fetchers)
            .field("images", &self.images)
            .field("detector", &self.detector.is_some())
            .field("ratios", &self.ratios)
            .field("positions", &self.positions)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl ImageEngine {
    /// Start building an engine from a validated configuration
    #[must_use]
    pub fn builder(config: &PipelineConfig) -> ImageEngineBuilder {
        ImageEngineBuilder::new(config)
    }

    pub fn image_cache(&self) -> &ImageCache {
        &self.images
    }

    /// Produce the actor's primary image
    ///
    /// # Errors
    /// See [`ImageEngine::get_image`].
    pub async fn get_actor_primary_image(
        &self,
        provider: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DynamicImage> {
        self.get_image(&ImageRequest::new(provider, id, ImageKind::ActorPrimary), cancel)
            .await
    }

    /// Produce a movie's primary image
    ///
    /// Negative `ratio` or `position` select the defaults; a default position
    /// may be replaced by a face-driven one according to the face policy.
    ///
    /// # Errors
    /// See [`ImageEngine::get_image`].
    pub async fn get_movie_primary_image(
        &self,
        provider: &str,
        id: &str,
        ratio: f64,
        position: f64,
        cancel: &CancellationToken,
    ) -> Result<DynamicImage> {
        let request = ImageRequest::from_sentinels(provider, id, ImageKind::MoviePrimary, ratio, position);
        self.get_image(&request, cancel).await
    }

    /// # Errors
    /// See [`ImageEngine::get_image`].
    pub async fn get_movie_thumb_image(
        &self,
        provider: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DynamicImage> {
        self.get_image(&ImageRequest::new(provider, id, ImageKind::MovieThumb), cancel)
            .await
    }

    /// # Errors
    /// See [`ImageEngine::get_image`].
    pub async fn get_movie_backdrop_image(
        &self,
        provider: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DynamicImage> {
        self.get_image(&ImageRequest::new(provider, id, ImageKind::MovieBackdrop), cancel)
            .await
    }

    /// Resolve and produce the image for `request`
    ///
    /// # Errors
    /// - [`CoverCropError::InvalidRatio`] / [`CoverCropError::InvalidPosition`] for bad overrides
    /// - [`CoverCropError::NotFound`] when the provider has no image URL
    /// - Metadata, fetch, decode, cache and classifier errors unchanged
    pub async fn get_image(&self, request: &ImageRequest, cancel: &CancellationToken) -> Result<DynamicImage> {
        request.validate()?;
        let kind = request.kind();
        let span = spans::image_request(request.provider_name(), kind.as_str());

        async {
            let metadata = self.metadata.as_ref().ok_or_else(|| {
                CoverCropError::invalid_config("No metadata source configured")
            })?;
            let provider = request.provider_name();
            let id = request.external_id();

            let (url, number) = match kind {
                ImageKind::ActorPrimary => {
                    let urls = metadata.actor_image_urls(provider, id).await?;
                    let url = urls.into_iter().find(|u| !u.is_empty()).ok_or_else(|| {
                        CoverCropError::not_found(format!("no images for actor {}:{}", provider, id))
                    })?;
                    (url, None)
                },
                ImageKind::MoviePrimary | ImageKind::MovieThumb | ImageKind::MovieBackdrop => {
                    let info = metadata.movie_image_info(provider, id).await?;
                    let url = info.preferred_url(kind).to_string();
                    if url.is_empty() {
                        return Err(CoverCropError::not_found(format!(
                            "no {} image for movie {}:{}",
                            kind, provider, id
                        )));
                    }
                    (url, Some(info.number))
                },
            };

            let ratio = request
                .target_ratio()
                .unwrap_or_else(|| kind.default_ratio(&self.ratios));
            let (position, auto) = match request.explicit_position() {
                Some(position) => (position, false),
                None => {
                    let auto = kind == ImageKind::MoviePrimary
                        && number.as_deref().is_some_and(|n| {
                            self.face_policy
                                .requires_face_detection(&normalize_number(n))
                        });
                    (kind.default_position(&self.positions), auto)
                },
            };

            debug!(url = %url, ratio, position, auto, "Resolved image request");
            self.get_image_by_url(provider, &url, ratio, position, auto, cancel)
                .await
        }
        .instrument(span)
        .await
    }

    /// Fetch `url` through `provider`'s fetcher and crop it
    ///
    /// With `auto` set, `position` is only the fallback used when no face is
    /// found.
    ///
    /// # Errors
    /// - [`CoverCropError::InvalidRatio`] / [`CoverCropError::InvalidPosition`]
    /// - [`CoverCropError::ProviderNotFound`] for an unregistered provider
    /// - [`CoverCropError::ClassifierUnavailable`] when `auto` is set without a detector
    /// - [`CoverCropError::Cancelled`] when `cancel` fires first
    /// - Fetch, decode, cache and detection errors unchanged
    pub async fn get_image_by_url(
        &self,
        provider: &str,
        url: &str,
        ratio: f64,
        position: f64,
        auto: bool,
        cancel: &CancellationToken,
    ) -> Result<DynamicImage> {
        validate_ratio(ratio)?;
        validate_position(position)?;
        let fetcher = self.fetchers.get(provider)?;
        let fetch_timeout = self.fetch_timeout;

        let pipeline = async {
            let image = self
                .images
                .get_or_fetch(url, |url| async move {
                    tokio::time::timeout(fetch_timeout, fetcher.fetch(&url, cancel))
                        .await
                        .map_err(|_| CoverCropError::timeout(format!("fetch of '{}'", url), fetch_timeout))?
                })
                .await?;

            let position = if auto {
                self.face_position(&image, url, ratio, position, cancel).await?
            } else {
                position
            };

            let start = Instant::now();
            let cropped = {
                let _span = spans::crop((image.width(), image.height()), ratio, position).entered();
                crop(&image, ratio, position)
            };
            events::performance_metric(
                "crop",
                start.elapsed().as_secs_f64() * 1000.0,
                Some(&format!("{}x{}", cropped.width(), cropped.height())),
            );
            Ok::<_, CoverCropError>(cropped)
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoverCropError::cancelled(format!("image request for '{}'", url))),
            result = pipeline => result,
        }
    }

    async fn face_position(
        &self,
        image: &DynamicImage,
        url: &str,
        ratio: f64,
        fallback: f64,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        let detector = self.detector.as_ref().ok_or_else(|| {
            CoverCropError::classifier("Face positioning requested but no detector is configured")
        })?;

        let start = Instant::now();
        let detections = detector.detect(image, &address_of(url), cancel).await?;
        let plan = plan_crop(&detections, image.width(), image.height(), ratio, fallback);
        events::performance_metric(
            "face_position",
            start.elapsed().as_secs_f64() * 1000.0,
            Some(&format!(
                "{} clusters, position {:.3} ({:?})",
                detections.len(),
                plan.position,
                plan.axis
            )),
        );

        validate_position(plan.position)?;
        Ok(plan.position)
    }
}

/// Builder for [`ImageEngine`]
pub struct ImageEngineBuilder {
    metadata: Option<Arc<dyn MetadataSource>>,
    fetchers: FetcherRegistry,
    images: ImageCache,
    detector: Option<Arc<dyn FaceDetector>>,
    face_policy: Arc<dyn FacePolicy>,
    ratios: ImageRatios,
    positions: DefaultPositions,
    fetch_timeout: Duration,
}

impl ImageEngineBuilder {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            metadata: None,
            fetchers: FetcherRegistry::new(),
            images: ImageCache::new(config.image_cache_path()).with_jpeg_quality(config.jpeg_quality),
            detector: None,
            face_policy: Arc::new(PrefixFacePolicy::from_config(&config.face_policy)),
            ratios: config.ratios,
            positions: config.positions,
            fetch_timeout: config.fetch_timeout(),
        }
    }

    #[must_use]
    pub fn metadata(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.metadata = Some(source);
        self
    }

    #[must_use]
    pub fn fetchers(mut self, fetchers: FetcherRegistry) -> Self {
        self.fetchers = fetchers;
        self
    }

    #[must_use]
    pub fn detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    #[must_use]
    pub fn face_policy(mut self, policy: Arc<dyn FacePolicy>) -> Self {
        self.face_policy = policy;
        self
    }

    #[must_use]
    pub fn build(self) -> ImageEngine {
        ImageEngine {
            metadata: self.metadata,
            fetchers: self.fetchers,
            images: self.images,
            detector: self.detector,
            face_policy: self.face_policy,
            ratios: self.ratios,
            positions: self.positions,
            fetch_timeout: self.fetch_timeout,
        }
    }
}
