//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::config::{PipelineConfig, CACHE_DIR_ENV};
use crate::engine::{validate_position, validate_ratio};
use crate::fetch::FetchProfile;
use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Where the effective cache root came from, highest precedence first
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CacheRootSource {
    Flag,
    ConfigFile(String),
    Environment,
    Platform,
}

impl fmt::Display for CacheRootSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag => write!(f, "--cache-dir flag"),
            Self::ConfigFile(path) => write!(f, "config file {}", path),
            Self::Environment => write!(f, "{} environment variable", CACHE_DIR_ENV),
            Self::Platform => write!(f, "platform cache directory"),
        }
    }
}

/// Convert CLI arguments to a [`PipelineConfig`] and a [`FetchProfile`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration, starting from `--config` when given
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(Path::new(path))
                .with_context(|| format!("Failed to load configuration from {}", path))?,
            None => PipelineConfig::default(),
        };

        if let Some(cache_dir) = &cli.cache_dir {
            config.cache_root = cache_dir.into();
        }
        if let Some(cascade) = &cli.cascade {
            config.cascade_model = Some(cascade.into());
        }
        if let Some(quality) = cli.quality {
            config.jpeg_quality = quality;
        }
        if let Some(timeout_ms) = cli.timeout_ms {
            config.fetch_timeout_ms = timeout_ms;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Build the request profile for the single fetch the CLI performs
    pub(crate) fn fetch_profile(cli: &Cli, config: &PipelineConfig) -> Result<FetchProfile> {
        let mut profile = FetchProfile::new().with_timeout(config.fetch_timeout());

        if let Some(user_agent) = &cli.user_agent {
            profile = profile.with_user_agent(user_agent);
        }
        for header in &cli.headers {
            let (name, value) = parse_pair(header, ':').context("Invalid --header")?;
            profile = profile.with_header(name, value);
        }
        for cookie in &cli.cookies {
            let (name, value) = parse_pair(cookie, '=').context("Invalid --cookie")?;
            profile = profile.with_cookie(name, value);
        }
        if let Some(proxy) = &cli.proxy {
            profile = profile.with_proxy(proxy);
        }

        // Surface bad header text before any request is made
        profile.header_map().context("Invalid request headers")?;
        Ok(profile)
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(ratio) = cli.ratio {
            validate_ratio(ratio).context("Invalid --ratio")?;
        }
        if let Some(position) = cli.position {
            validate_position(position).context("Invalid --position")?;
        }
        if cli.auto && cli.position.is_some() {
            anyhow::bail!("--auto and --position are mutually exclusive");
        }
        if cli.print_detections && cli.output.as_deref() == Some("-") {
            anyhow::bail!("--print-detections cannot be combined with output to stdout");
        }
        if let Some(quality) = cli.quality {
            if quality == 0 || quality > 100 {
                anyhow::bail!("JPEG quality must be between 1 and 100, got {}", quality);
            }
        }
        Ok(())
    }

    /// Report which layer decided `config.cache_root`
    pub(crate) fn cache_root_source(cli: &Cli, config: &PipelineConfig) -> CacheRootSource {
        if cli.cache_dir.is_some() {
            return CacheRootSource::Flag;
        }
        if let Some(path) = &cli.config {
            if config.cache_root != PipelineConfig::default_cache_root() {
                return CacheRootSource::ConfigFile(path.clone());
            }
        }
        if std::env::var_os(CACHE_DIR_ENV).is_some() {
            CacheRootSource::Environment
        } else {
            CacheRootSource::Platform
        }
    }
}

/// Split `name<sep>value`, trimming both halves
fn parse_pair(raw: &str, separator: char) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(separator)
        .with_context(|| format!("expected NAME{}VALUE, got '{}'", separator, raw))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("empty name in '{}'", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Fetch timeout reported in the startup log line
pub(crate) fn describe_timeout(timeout: Duration) -> String {
    format!("{:.1}s", timeout.as_secs_f64())
}
