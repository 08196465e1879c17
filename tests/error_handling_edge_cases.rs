//! Error conditions and boundary cases across the pipeline
//!
//! Every failure must surface as a typed error; no degraded image is returned
//! and nothing is cached for a failed request.

mod common;

use async_trait::async_trait;
use common::{blob_detector, blob_image, png_bytes, test_config, uniform_image, StaticMetadata};
use covercrop::{
    Cascade, CascadeFaceDetector, CascadeParams, ContentKey, CoverCropError, Detection,
    FaceDetector, FetchProfile, FetcherRegistry, HttpFetcher, ImageCache, ImageEngine,
    MovieImageInfo, PipelineConfig, Result,
};
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROVIDER: &str = "dmm";

fn bare_engine(config: &PipelineConfig) -> ImageEngine {
    let fetcher = Arc::new(HttpFetcher::new(&FetchProfile::new()).unwrap());
    ImageEngine::builder(config)
        .fetchers(FetcherRegistry::new().with_provider(PROVIDER, fetcher))
        .build()
}

fn cache_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).map_or(true, |mut entries| entries.next().is_none())
}

#[tokio::test]
async fn test_unregistered_provider() {
    let temp_dir = TempDir::new().unwrap();
    let engine = bare_engine(&test_config(temp_dir.path()));

    let err = engine
        .get_image_by_url("nope", "https://example.com/a.jpg", 0.7, 0.5, false, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::ProviderNotFound(_)));
}

#[tokio::test]
async fn test_invalid_overrides_are_rejected_before_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let engine = bare_engine(&test_config(temp_dir.path()));
    let url = format!("{}/cover.png", server.uri());
    let cancel = CancellationToken::new();

    for ratio in [0.0, -0.5, f64::NAN, f64::INFINITY, 1e6] {
        let err = engine
            .get_image_by_url(PROVIDER, &url, ratio, 0.5, false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CoverCropError::InvalidRatio(_)), "ratio {}", ratio);
    }
    for position in [-0.01, 1.01, f64::NAN] {
        let err = engine
            .get_image_by_url(PROVIDER, &url, 0.7, position, false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CoverCropError::InvalidPosition(_)), "position {}", position);
    }
}

#[tokio::test]
async fn test_http_error_status_is_a_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let engine = bare_engine(&config);

    let err = engine
        .get_image_by_url(
            PROVIDER,
            &format!("{}/missing.jpg", server.uri()),
            0.7,
            0.5,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CoverCropError::Fetch { .. }), "got {:?}", err);
    assert!(cache_is_empty(&config.image_cache_path()));
}

#[tokio::test]
async fn test_undecodable_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>age check</html>"))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let engine = bare_engine(&config);

    let err = engine
        .get_image_by_url(
            PROVIDER,
            &format!("{}/page.html", server.uri()),
            0.7,
            0.5,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(err.is_decode(), "got {:?}", err);
    assert!(cache_is_empty(&config.image_cache_path()));
}

#[tokio::test]
async fn test_slow_fetch_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png_bytes(&uniform_image(10, 10)))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let config = PipelineConfig::builder()
        .cache_root(temp_dir.path())
        .fetch_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let engine = bare_engine(&config);

    let err = engine
        .get_image_by_url(
            PROVIDER,
            &format!("{}/slow.png", server.uri()),
            0.7,
            0.5,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::Timeout { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_cancelled_request() {
    let temp_dir = TempDir::new().unwrap();
    let engine = bare_engine(&test_config(temp_dir.path()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .get_image_by_url(PROVIDER, "http://127.0.0.1:9/never.jpg", 0.7, 0.5, false, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::Cancelled(_)));
}

#[tokio::test]
async fn test_auto_position_without_detector() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(&blob_image())))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let engine = bare_engine(&test_config(temp_dir.path()));

    let err = engine
        .get_image_by_url(
            PROVIDER,
            &format!("{}/cover.png", server.uri()),
            0.7,
            1.0,
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::ClassifierUnavailable(_)));
}

#[tokio::test]
async fn test_faceless_image_keeps_fallback_position() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(&uniform_image(400, 200))))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let fetcher = Arc::new(HttpFetcher::new(&FetchProfile::new()).unwrap());
    let detector = blob_detector(&config);
    let engine = ImageEngine::builder(&config)
        .fetchers(FetcherRegistry::new().with_fallback(fetcher))
        .detector(Arc::new(detector))
        .build();

    let image = engine
        .get_image_by_url(
            "any",
            &format!("{}/plain.png", server.uri()),
            1.0,
            1.0,
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!((image.width(), image.height()), (200, 200));

    // The empty result was persisted and counts as a hit next time
    let detections_dir = config.detection_cache_path();
    assert!(!cache_is_empty(&detections_dir));
}

/// Detector reporting one fixed window regardless of the image
struct FixedDetector(Detection);

#[async_trait]
impl FaceDetector for FixedDetector {
    async fn detect(
        &self,
        _image: &DynamicImage,
        _key: &ContentKey,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Detection>> {
        Ok(vec![self.0])
    }
}

#[tokio::test]
async fn test_out_of_frame_detection_is_an_invalid_position() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(&blob_image())))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let fetcher = Arc::new(HttpFetcher::new(&FetchProfile::new()).unwrap());
    let detector = FixedDetector(Detection {
        row: -40,
        col: -40,
        scale: 50,
        score: 10.0,
    });
    let engine = ImageEngine::builder(&config)
        .fetchers(FetcherRegistry::new().with_provider(PROVIDER, fetcher))
        .detector(Arc::new(detector))
        .build();

    let err = engine
        .get_image_by_url(
            PROVIDER,
            &format!("{}/cover.png", server.uri()),
            0.7,
            1.0,
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::InvalidPosition(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_missing_metadata_source() {
    let temp_dir = TempDir::new().unwrap();
    let engine = bare_engine(&test_config(temp_dir.path()));

    let err = engine
        .get_movie_thumb_image(PROVIDER, "x", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_movie_without_urls_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let metadata = StaticMetadata::new().with_movie(
        PROVIDER,
        "empty",
        MovieImageInfo {
            number: "FC2-1".to_string(),
            ..MovieImageInfo::default()
        },
    );
    let engine = ImageEngine::builder(&config)
        .metadata(Arc::new(metadata))
        .build();
    let cancel = CancellationToken::new();

    let err = engine
        .get_movie_primary_image(PROVIDER, "empty", -1.0, -1.0, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::NotFound(_)));

    // Metadata errors propagate unchanged
    let err = engine
        .get_movie_backdrop_image(PROVIDER, "unknown", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::NotFound(_)));
}

#[tokio::test]
async fn test_corrupt_image_entry() {
    let temp_dir = TempDir::new().unwrap();
    let cache = ImageCache::new(temp_dir.path());
    let url = "https://example.com/corrupt.jpg";
    std::fs::write(cache.entry_path(url), b"\xFF\xD8 truncated").unwrap();

    let err = cache
        .get_or_fetch(url, |_| async { Ok(Vec::new()) })
        .await
        .unwrap_err();
    assert!(matches!(err, CoverCropError::CorruptCacheEntry { .. }));
    assert_eq!(cache.stats().corrupt_entries, 1);
}

#[test]
fn test_classifier_unavailable() {
    let temp_dir = TempDir::new().unwrap();

    let err = Cascade::from_path(&temp_dir.path().join("facefinder")).unwrap_err();
    assert!(matches!(err, CoverCropError::ClassifierUnavailable(_)));

    let garbage = temp_dir.path().join("garbage");
    std::fs::write(&garbage, [0u8; 5]).unwrap();
    assert!(matches!(
        Cascade::from_path(&garbage),
        Err(CoverCropError::ClassifierUnavailable(_))
    ));

    let config = test_config(temp_dir.path());
    assert!(matches!(
        CascadeFaceDetector::from_config(&config),
        Err(CoverCropError::ClassifierUnavailable(_))
    ));
}

#[test]
fn test_config_validation_edge_cases() {
    let inverted = CascadeParams {
        min_size: 100,
        max_size: 50,
        ..CascadeParams::default()
    };
    assert!(matches!(
        PipelineConfig::builder().cascade(inverted).build(),
        Err(CoverCropError::InvalidConfig(_))
    ));

    let no_growth = CascadeParams {
        scale_factor: 1.0,
        ..CascadeParams::default()
    };
    assert!(PipelineConfig::builder().cascade(no_growth).build().is_err());
    assert!(PipelineConfig::builder().iou_threshold(1.5).build().is_err());
    assert!(PipelineConfig::builder().jpeg_quality(0).build().is_err());
}
