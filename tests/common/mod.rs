//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use covercrop::{
    Cascade, CascadeFaceDetector, CascadeParams, CascadeTree, CoverCropError, DetectionCache,
    MetadataSource, MovieImageInfo, PipelineConfig, Result,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

pub const DARK: u8 = 20;
pub const BRIGHT: u8 = 230;

/// Bright square position; aligned to 8px blocks so JPEG re-encoding stays exact
pub const BLOB_START: u32 = 64;
pub const BLOB_END: u32 = 128;

/// Two-tree cascade accepting windows whose centre is brighter than the
/// pixels above and to the left of it
pub fn blob_cascade() -> Cascade {
    Cascade::new(
        1,
        vec![
            CascadeTree::new(vec![[0, 0, -100, 0]], vec![1.0, -1.0], 0.0),
            CascadeTree::new(vec![[0, 0, 0, -100]], vec![1.0, -1.0], 0.5),
        ],
    )
    .expect("valid test cascade")
}

pub fn scan_params() -> CascadeParams {
    CascadeParams {
        min_size: 20,
        max_size: 60,
        ..CascadeParams::default()
    }
}

/// 400x200 dark image with a bright square near the left edge
pub fn blob_image() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(400, 200, |x, y| {
        let inside = (BLOB_START..BLOB_END).contains(&x) && (BLOB_START..BLOB_END).contains(&y);
        Luma([if inside { BRIGHT } else { DARK }])
    }))
}

pub fn uniform_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([DARK])))
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode test image");
    bytes
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    encode(image, ImageFormat::Png)
}

/// Brightest luminance value in the image
pub fn max_luma(image: &DynamicImage) -> u8 {
    image.to_luma8().pixels().map(|p| p.0[0]).max().unwrap_or(0)
}

pub fn test_config(cache_root: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .cache_root(cache_root)
        .cascade(scan_params())
        .build()
        .expect("valid test config")
}

pub fn blob_detector(config: &PipelineConfig) -> CascadeFaceDetector {
    CascadeFaceDetector::new(blob_cascade(), DetectionCache::new(config.detection_cache_path()))
        .with_params(config.cascade)
        .with_iou_threshold(config.iou_threshold)
}

/// In-memory metadata keyed by `provider:id`
#[derive(Debug, Default)]
pub struct StaticMetadata {
    actors: HashMap<String, Vec<String>>,
    movies: HashMap<String, MovieImageInfo>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, provider: &str, id: &str, urls: Vec<String>) -> Self {
        self.actors.insert(format!("{}:{}", provider, id), urls);
        self
    }

    pub fn with_movie(mut self, provider: &str, id: &str, info: MovieImageInfo) -> Self {
        self.movies.insert(format!("{}:{}", provider, id), info);
        self
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn actor_image_urls(&self, provider: &str, id: &str) -> Result<Vec<String>> {
        self.actors
            .get(&format!("{}:{}", provider, id))
            .cloned()
            .ok_or_else(|| CoverCropError::not_found(format!("actor {}:{}", provider, id)))
    }

    async fn movie_image_info(&self, provider: &str, id: &str) -> Result<MovieImageInfo> {
        self.movies
            .get(&format!("{}:{}", provider, id))
            .cloned()
            .ok_or_else(|| CoverCropError::not_found(format!("movie {}:{}", provider, id)))
    }
}
