//! Configuration types for the image pipeline

use crate::engine::{validate_ratio, MAX_RATIO};
use crate::error::{CoverCropError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "COVERCROP_CACHE_DIR";

/// Multi-scale cascade scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeParams {
    /// Smallest window size in pixels
    pub min_size: u32,
    /// Largest window size in pixels
    pub max_size: u32,
    /// Scan stride as a fraction of the window size
    pub shift_factor: f64,
    /// Geometric step between successive window sizes
    pub scale_factor: f64,
    /// Windows scoring at or below this value are discarded
    pub score_threshold: f32,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            min_size: 20,
            max_size: 2000,
            shift_factor: 0.1,
            scale_factor: 1.1,
            score_threshold: 0.0,
        }
    }
}

impl CascadeParams {
    /// Validate scan bounds and step factors
    ///
    /// # Errors
    /// - `min_size` is zero or larger than `max_size`
    /// - `shift_factor` outside (0, 1]
    /// - `scale_factor` not greater than 1
    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 || self.min_size > self.max_size {
            return Err(CoverCropError::invalid_config(format!(
                "Cascade window bounds must satisfy 0 < min_size <= max_size, got {}..{}",
                self.min_size, self.max_size
            )));
        }
        if !(self.shift_factor > 0.0 && self.shift_factor <= 1.0) {
            return Err(CoverCropError::config_value_error(
                "shift factor",
                self.shift_factor,
                "(0, 1]",
                Some(0.1),
            ));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 1.0) {
            return Err(CoverCropError::config_value_error(
                "scale factor",
                self.scale_factor,
                "> 1",
                Some(1.1),
            ));
        }
        Ok(())
    }
}

/// Target aspect ratios (width / height) per image kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRatios {
    /// Actor and movie primary images (portrait posters)
    pub primary: f64,
    /// Movie thumbnails
    pub thumb: f64,
    /// Movie backdrops
    pub backdrop: f64,
}

impl Default for ImageRatios {
    fn default() -> Self {
        Self {
            primary: 0.7,
            thumb: 16.0 / 9.0,
            backdrop: 100.0 / 37.0,
        }
    }
}

/// Fallback crop positions per image kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultPositions {
    pub actor_primary: f64,
    pub movie_primary: f64,
    pub movie_thumb: f64,
    pub movie_backdrop: f64,
}

impl Default for DefaultPositions {
    fn default() -> Self {
        Self {
            actor_primary: 0.5,
            movie_primary: 1.0,
            movie_thumb: 0.5,
            movie_backdrop: 0.0,
        }
    }
}

/// Which content numbers get face-driven positioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacePolicyConfig {
    /// Normalized number prefixes that require face detection
    pub prefixes: Vec<String>,
    /// Treat numbers made only of digits and separators as requiring detection
    pub numeric_ids: bool,
}

impl Default for FacePolicyConfig {
    fn default() -> Self {
        Self {
            prefixes: ["FC2", "HEYZO", "SIRO", "200GANA", "259LUXU", "300MIUM", "300MAAN"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            numeric_ids: true,
        }
    }
}

/// Configuration for the whole fetch → detect → crop pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory holding both cache stores
    pub cache_root: PathBuf,
    /// Image cache sub-directory name
    pub image_cache_dir: String,
    /// Detection cache sub-directory name
    pub detection_cache_dir: String,
    /// Path to the PICO cascade model
    pub cascade_model: Option<PathBuf>,
    /// Cascade scan parameters
    pub cascade: CascadeParams,
    /// IoU threshold used when clustering detections
    pub iou_threshold: f64,
    /// Target ratios per image kind
    pub ratios: ImageRatios,
    /// Fallback positions per image kind
    pub positions: DefaultPositions,
    /// Face-detection policy
    pub face_policy: FacePolicyConfig,
    /// Upper bound for a single image fetch, in milliseconds
    pub fetch_timeout_ms: u64,
    /// Upper bound for a single classifier run, in milliseconds
    pub detect_timeout_ms: u64,
    /// Quality used when re-encoding images for the cache (1-100)
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_root: Self::default_cache_root(),
            image_cache_dir: "image_cache".to_string(),
            detection_cache_dir: "face_cache".to_string(),
            cascade_model: None,
            cascade: CascadeParams::default(),
            iou_threshold: 0.2,
            ratios: ImageRatios::default(),
            positions: DefaultPositions::default(),
            face_policy: FacePolicyConfig::default(),
            fetch_timeout_ms: 30_000,
            detect_timeout_ms: 20_000,
            jpeg_quality: 100,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Resolve the default cache root
    ///
    /// `COVERCROP_CACHE_DIR` wins; otherwise the platform cache directory
    /// (`~/.cache/covercrop` on Linux), falling back to the temp directory.
    #[must_use]
    pub fn default_cache_root() -> PathBuf {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return PathBuf::from(cache_override);
        }

        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("covercrop")
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    ///
    /// # Errors
    /// - The file cannot be read
    /// - The JSON is malformed
    /// - The resulting configuration fails validation
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoverCropError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            CoverCropError::invalid_config(format!(
                "Failed to parse config '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Directory of the image cache store
    #[must_use]
    pub fn image_cache_path(&self) -> PathBuf {
        self.cache_root.join(&self.image_cache_dir)
    }

    /// Directory of the detection cache store
    #[must_use]
    pub fn detection_cache_path(&self) -> PathBuf {
        self.cache_root.join(&self.detection_cache_dir)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    #[must_use]
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Invalid cascade parameters
    /// - IoU threshold outside (0, 1]
    /// - Ratios outside (0, MAX_RATIO] or non-finite
    /// - Default positions outside [0, 1]
    /// - Zero timeouts or JPEG quality outside 1-100
    /// - Empty cache sub-directory names
    pub fn validate(&self) -> Result<()> {
        self.cascade.validate()?;

        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(CoverCropError::config_value_error(
                "IoU threshold",
                self.iou_threshold,
                "(0, 1]",
                Some(0.2),
            ));
        }

        for (name, ratio) in [
            ("primary ratio", self.ratios.primary),
            ("thumb ratio", self.ratios.thumb),
            ("backdrop ratio", self.ratios.backdrop),
        ] {
            if validate_ratio(ratio).is_err() {
                return Err(CoverCropError::config_value_error(
                    name,
                    ratio,
                    &format!("(0, {}]", MAX_RATIO),
                    None,
                ));
            }
        }

        for (name, position) in [
            ("actor primary position", self.positions.actor_primary),
            ("movie primary position", self.positions.movie_primary),
            ("movie thumb position", self.positions.movie_thumb),
            ("movie backdrop position", self.positions.movie_backdrop),
        ] {
            if !(0.0..=1.0).contains(&position) {
                return Err(CoverCropError::config_value_error(
                    name, position, "0.0-1.0", None,
                ));
            }
        }

        if self.fetch_timeout_ms == 0 || self.detect_timeout_ms == 0 {
            return Err(CoverCropError::invalid_config(
                "Timeouts must be greater than zero",
            ));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(CoverCropError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
                Some(100),
            ));
        }

        if self.image_cache_dir.is_empty() || self.detection_cache_dir.is_empty() {
            return Err(CoverCropError::invalid_config(
                "Cache sub-directory names cannot be empty",
            ));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn cache_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.cache_root = root.into();
        self
    }

    #[must_use]
    pub fn cascade_model<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.cascade_model = Some(path.into());
        self
    }

    #[must_use]
    pub fn cascade(mut self, params: CascadeParams) -> Self {
        self.config.cascade = params;
        self
    }

    #[must_use]
    pub fn iou_threshold(mut self, threshold: f64) -> Self {
        self.config.iou_threshold = threshold;
        self
    }

    #[must_use]
    pub fn ratios(mut self, ratios: ImageRatios) -> Self {
        self.config.ratios = ratios;
        self
    }

    #[must_use]
    pub fn positions(mut self, positions: DefaultPositions) -> Self {
        self.config.positions = positions;
        self
    }

    #[must_use]
    pub fn face_policy(mut self, policy: FacePolicyConfig) -> Self {
        self.config.face_policy = policy;
        self
    }

    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn detect_timeout(mut self, timeout: Duration) -> Self {
        self.config.detect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set JPEG quality; values above 100 are clamped
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.min(100);
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Any failure reported by [`PipelineConfig::validate`].
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.cascade.min_size, 20);
        assert_eq!(config.cascade.max_size, 2000);
        assert!((config.cascade.shift_factor - 0.1).abs() < f64::EPSILON);
        assert!((config.cascade.scale_factor - 1.1).abs() < f64::EPSILON);
        assert!((config.iou_threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.jpeg_quality, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_positions_per_kind() {
        let positions = DefaultPositions::default();
        assert!((positions.actor_primary - 0.5).abs() < f64::EPSILON);
        assert!((positions.movie_primary - 1.0).abs() < f64::EPSILON);
        assert!((positions.movie_thumb - 0.5).abs() < f64::EPSILON);
        assert!(positions.movie_backdrop.abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_paths() {
        let config = PipelineConfig::builder()
            .cache_root("/srv/covercrop")
            .build()
            .unwrap();
        assert_eq!(
            config.image_cache_path(),
            PathBuf::from("/srv/covercrop/image_cache")
        );
        assert_eq!(
            config.detection_cache_path(),
            PathBuf::from("/srv/covercrop/face_cache")
        );
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(PipelineConfig::builder().iou_threshold(0.0).build().is_err());
        assert!(PipelineConfig::builder().iou_threshold(1.5).build().is_err());
        assert!(PipelineConfig::builder()
            .ratios(ImageRatios {
                primary: -1.0,
                ..ImageRatios::default()
            })
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .ratios(ImageRatios {
                backdrop: 150.0,
                ..ImageRatios::default()
            })
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .ratios(ImageRatios {
                thumb: MAX_RATIO,
                ..ImageRatios::default()
            })
            .build()
            .is_ok());
        assert!(PipelineConfig::builder()
            .positions(DefaultPositions {
                movie_thumb: 1.5,
                ..DefaultPositions::default()
            })
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .fetch_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(PipelineConfig::builder().jpeg_quality(0).build().is_err());
    }

    #[test]
    fn test_jpeg_quality_clamped() {
        let config = PipelineConfig::builder().jpeg_quality(250).build().unwrap();
        assert_eq!(config.jpeg_quality, 100);
    }

    #[test]
    fn test_cascade_params_validation() {
        let mut params = CascadeParams::default();
        assert!(params.validate().is_ok());

        params.min_size = 3000;
        assert!(params.validate().is_err());

        params = CascadeParams {
            scale_factor: 1.0,
            ..CascadeParams::default()
        };
        assert!(params.validate().is_err());

        params = CascadeParams {
            shift_factor: 0.0,
            ..CascadeParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_from_json_file_partial() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("covercrop.json");
        std::fs::write(
            &path,
            r#"{ "cache_root": "/data/cache", "iou_threshold": 0.3, "ratios": { "primary": 0.75 } }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/data/cache"));
        assert!((config.iou_threshold - 0.3).abs() < f64::EPSILON);
        assert!((config.ratios.primary - 0.75).abs() < f64::EPSILON);
        // Unspecified fields keep their defaults
        assert!((config.ratios.thumb - 16.0 / 9.0).abs() < f64::EPSILON);
        assert_eq!(config.image_cache_dir, "image_cache");
    }

    #[test]
    fn test_from_json_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.json");
        assert!(PipelineConfig::from_json_file(&missing).is_err());

        let bad = temp_dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        let err = PipelineConfig::from_json_file(&bad).unwrap_err();
        assert!(matches!(err, CoverCropError::InvalidConfig(_)));

        let invalid = temp_dir.path().join("invalid.json");
        std::fs::write(&invalid, r#"{ "jpeg_quality": 0 }"#).unwrap();
        assert!(PipelineConfig::from_json_file(&invalid).is_err());

        let steep = temp_dir.path().join("steep.json");
        std::fs::write(&steep, r#"{ "ratios": { "backdrop": 150.0 } }"#).unwrap();
        let err = PipelineConfig::from_json_file(&steep).unwrap_err();
        assert!(matches!(err, CoverCropError::InvalidConfig(_)));
    }

    #[test]
    fn test_serde_roundtrip_preserves_config() {
        let config = PipelineConfig::builder()
            .cache_root("/tmp/cc")
            .cascade_model("/models/facefinder")
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
