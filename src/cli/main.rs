//! Cover crop CLI tool
//!
//! Fetches one image URL through the on-disk cache, optionally positions the
//! crop on the most prominent face and writes the cropped result.

use super::config::{describe_timeout, CliConfigBuilder};
use crate::{
    cache::{encode_jpeg, format_size, DetectionCache, DiskUsage, ImageCache},
    config::{PipelineConfig, CACHE_DIR_ENV},
    content_key::address_of,
    detect::{CascadeFaceDetector, FaceDetector},
    engine::{ImageEngine, ImageKind},
    error::CoverCropError,
    fetch::{FetcherRegistry, HttpFetcher, ImageFetcher},
    tracing_config::{events, init_cli_tracing, spans},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use image::DynamicImage;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Provider name the CLI registers its fetcher under
const CLI_PROVIDER: &str = "cli";

/// Fetch a remote image and crop it to a target aspect ratio
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "covercrop")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Image URL to fetch
    #[arg(value_name = "URL", required_unless_present = "show_cache_dir")]
    pub url: Option<String>,

    /// Output file. Use "-" for stdout (JPEG). [default: <url file stem>_cropped.jpg]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Image kind whose default ratio and position apply
    #[arg(short, long, value_enum, default_value_t = CliKind::Primary)]
    pub kind: CliKind,

    /// Target width/height ratio [default: configured ratio of --kind]
    #[arg(short, long)]
    pub ratio: Option<f64>,

    /// Explicit crop position in [0, 1] along the cut axis
    #[arg(short, long)]
    pub position: Option<f64>,

    /// Position the crop on the most prominent face (requires a cascade model)
    #[arg(short, long)]
    pub auto: bool,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<String>,

    /// Path to the PICO cascade model
    #[arg(long, value_name = "PATH")]
    pub cascade: Option<String>,

    /// JSON pipeline configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// User-Agent header sent with the request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Extra request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Cookie as "name=value" (repeatable)
    #[arg(long = "cookie", value_name = "COOKIE")]
    pub cookies: Vec<String>,

    /// Proxy URL for the request
    #[arg(long)]
    pub proxy: Option<String>,

    /// Fetch timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// JPEG quality (1-100) for cached re-encodes and JPEG output
    #[arg(short, long)]
    pub quality: Option<u8>,

    /// Print the clustered detections as JSON to stdout
    #[arg(long)]
    pub print_detections: bool,

    /// Show current cache directory
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliKind {
    Actor,
    Primary,
    Thumb,
    Backdrop,
}

impl From<CliKind> for ImageKind {
    fn from(kind: CliKind) -> Self {
        match kind {
            CliKind::Actor => ImageKind::ActorPrimary,
            CliKind::Primary => ImageKind::MoviePrimary,
            CliKind::Thumb => ImageKind::MovieThumb,
            CliKind::Backdrop => ImageKind::MovieBackdrop,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.show_cache_dir {
        show_current_cache_dir(&cli, &config);
        return Ok(());
    }

    let Some(url) = cli.url.as_deref() else {
        anyhow::bail!("An image URL is required");
    };

    let span = spans::session(&session_id, url);
    async {
        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling request");
                ctrl_c.cancel();
            }
        });

        process_url(&cli, &config, url, &cancel).await
    }
    .instrument(span)
    .await
}

async fn process_url(cli: &Cli, config: &PipelineConfig, url: &str, cancel: &CancellationToken) -> Result<()> {
    let start = Instant::now();
    let kind = ImageKind::from(cli.kind);
    let ratio = cli.ratio.unwrap_or_else(|| kind.default_ratio(&config.ratios));
    let position = cli.position.unwrap_or_else(|| kind.default_position(&config.positions));

    let profile = CliConfigBuilder::fetch_profile(cli, config)?;
    let fetcher: Arc<dyn ImageFetcher> =
        Arc::new(HttpFetcher::new(&profile).context("Failed to create HTTP client")?);

    let mut builder = ImageEngine::builder(config)
        .fetchers(FetcherRegistry::new().with_provider(CLI_PROVIDER, fetcher));
    let detector = if cli.auto || cli.print_detections {
        let detector = CascadeFaceDetector::from_config(config).map_err(|e| {
            events::warning_with_recommendation(
                &e.to_string(),
                "pass --cascade or set cascade_model in the config file",
            );
            e
        });
        let detector: Arc<dyn FaceDetector> =
            Arc::new(detector.context("Face detection needs --cascade or cascade_model")?);
        builder = builder.detector(Arc::clone(&detector));
        Some(detector)
    } else {
        None
    };
    let engine = builder.build();

    info!(
        url,
        kind = %kind,
        ratio,
        position,
        auto = cli.auto,
        timeout = %describe_timeout(config.fetch_timeout()),
        "Starting covercrop"
    );

    let cropped = engine
        .get_image_by_url(CLI_PROVIDER, url, ratio, position, cli.auto, cancel)
        .await
        .map_err(|e| {
            events::error_with_context(&e, "image pipeline");
            e
        })
        .with_context(|| format!("Failed to produce image for {}", url))?;

    if let Some(detector) = detector {
        print_detections(&engine, detector.as_ref(), url, cancel).await?;
    }

    let quality = config.jpeg_quality;
    match cli.output.as_deref() {
        Some("-") => {
            let bytes = encode_jpeg(&cropped, quality).context("Failed to encode output")?;
            write_stdout(&bytes)?;
        },
        Some(target) => save_image(&cropped, Path::new(target), quality)?,
        None => save_image(&cropped, &generate_output_path(url), quality)?,
    }

    info!(
        width = cropped.width(),
        height = cropped.height(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Done"
    );
    Ok(())
}

/// Print the clustered detections of the cached source image as JSON
async fn print_detections(
    engine: &ImageEngine,
    detector: &dyn FaceDetector,
    url: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    // The source was cached by the crop request; a miss here means the write failed
    let image = engine
        .image_cache()
        .get_or_fetch(url, |url| async move {
            Err(CoverCropError::not_found(format!("{} is not cached", url)))
        })
        .await
        .context("Source image is not available in the cache")?;

    let detections = detector
        .detect(&image, &address_of(url), cancel)
        .await
        .context("Face detection failed")?;
    debug!(count = detections.len(), "Detections for {}", url);

    println!(
        "{}",
        serde_json::to_string_pretty(&detections).context("Failed to serialize detections")?
    );
    Ok(())
}

/// Save `image`, as JPEG with `quality` when the extension asks for it
fn save_image(image: &DynamicImage, path: &Path, quality: u8) -> Result<()> {
    if is_jpeg_path(path) {
        let bytes = encode_jpeg(image, quality).context("Failed to encode output")?;
        std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        image
            .save(path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
    }
    info!("Saved {}", path.display());
    Ok(())
}

fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
}

/// Derive `<file stem>_cropped.jpg` from the last URL path segment
fn generate_output_path(url: &str) -> PathBuf {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let stem = path
        .rsplit('/')
        .next()
        .map(|segment| Path::new(segment).file_stem().and_then(|s| s.to_str()).unwrap_or(""))
        .filter(|stem| !stem.is_empty() && !path.ends_with('/'))
        .unwrap_or("image");
    PathBuf::from(format!("{}_cropped.jpg", stem))
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(data).context("Failed to write to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

/// Show the current cache directory
fn show_current_cache_dir(cli: &Cli, config: &PipelineConfig) {
    println!("📁 Current cache directory:");
    println!("   Path: {}", config.cache_root.display());
    println!("   Source: {}", CliConfigBuilder::cache_root_source(cli, config));

    print_usage("Images", ImageCache::new(config.image_cache_path()).disk_usage());
    print_usage(
        "Detections",
        DetectionCache::new(config.detection_cache_path()).disk_usage(),
    );

    println!("\n💡 To use a custom cache directory:");
    println!("   covercrop --cache-dir /path/to/custom/cache URL");
    println!("   or set {} environment variable", CACHE_DIR_ENV);
}

fn print_usage(label: &str, usage: crate::Result<DiskUsage>) {
    match usage {
        Ok(usage) => println!(
            "   {}: {} entries, {}",
            label,
            usage.entries,
            format_size(usage.size_bytes)
        ),
        Err(e) => println!("   {}: unavailable ({})", label, e),
    }
}
