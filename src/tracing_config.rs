//! Tracing configuration module for structured logging and observability
//!
//! The library only emits spans and events; binaries decide how they are
//! rendered by installing a subscriber through [`TracingConfig::init`].

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default for CLI)
    Console,
    /// Compact console output for CI environments
    Compact,
    /// JSON structured logging for production environments
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set output format
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Set session ID for request correlation
    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",  // Default: informational messages and above
            1 => "debug", // -v: cache decisions, detection counts, timings
            _ => "trace", // -vv+: everything
        }
    }

    /// Initialize the global tracing subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = if let Some(env_filter) = &self.env_filter {
            EnvFilter::try_new(env_filter)?
        } else {
            EnvFilter::try_new(self.verbosity_to_filter())?
        };

        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr);

                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "🚀 covercrop session started");
        }

        Ok(())
    }
}

/// Initialize tracing with CLI-friendly defaults
///
/// `RUST_LOG`, when set, takes precedence over the verbosity flag.
///
/// # Errors
/// See [`TracingConfig::init`].
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<String> {
    let session_id = uuid::Uuid::new_v4().to_string();

    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(TracingFormat::Console)
        .with_session_id(session_id.clone());
    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }
    config.init()?;

    Ok(session_id)
}

/// Span creation helpers for common operations
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering one CLI invocation
    pub fn session(session_id: &str, url: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            url = %url
        )
    }

    /// Span covering one image request through the engine
    pub fn image_request(provider: &str, kind: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "image_request",
            provider = %provider,
            kind = %kind
        )
    }

    /// Span for a network fetch
    pub fn fetch(url: &str) -> Span {
        tracing::span!(Level::DEBUG, "fetch", url = %url)
    }

    /// Span for cache operations
    pub fn cache_operation(operation: &str, cache_key: &str) -> Span {
        tracing::span!(
            Level::DEBUG,
            "cache_operation",
            operation = %operation,
            cache_key = %cache_key
        )
    }

    /// Span for the crop step
    pub fn crop(dimensions: (u32, u32), ratio: f64, position: f64) -> Span {
        tracing::span!(
            Level::DEBUG,
            "crop",
            width = %dimensions.0,
            height = %dimensions.1,
            ratio = %ratio,
            position = %position
        )
    }
}

/// Event helpers for common logging patterns
pub mod events {
    use std::path::Path;
    use tracing::{debug, error, warn};

    /// Log an error with context
    pub fn error_with_context(error: &dyn std::error::Error, context: &str) {
        error!(
            error = %error,
            context = %context,
            "❌ Operation failed"
        );
    }

    /// Log a warning with recommendation
    pub fn warning_with_recommendation(message: &str, recommendation: &str) {
        warn!(
            message = %message,
            recommendation = %recommendation,
            "⚠️  Warning"
        );
    }

    /// Log performance metrics
    pub fn performance_metric(operation: &str, duration_ms: f64, details: Option<&str>) {
        match details {
            Some(details) => debug!(
                operation = %operation,
                duration_ms = %format!("{:.2}", duration_ms),
                details = %details,
                "⏱️  Performance metric"
            ),
            None => debug!(
                operation = %operation,
                duration_ms = %format!("{:.2}", duration_ms),
                "⏱️  Performance metric"
            ),
        }
    }

    /// Log cache operations
    pub fn cache_hit(cache_key: &str, operation: &str) {
        debug!(
            cache_key = %cache_key,
            operation = %operation,
            "💾 Cache hit"
        );
    }

    pub fn cache_miss(cache_key: &str, operation: &str) {
        debug!(
            cache_key = %cache_key,
            operation = %operation,
            "🔍 Cache miss"
        );
    }

    /// A cache entry could not be persisted; the request carries on
    pub fn cache_write_failed(path: &Path, error: &dyn std::error::Error) {
        warn!(
            path = %path.display(),
            error = %error,
            "⚠️  Failed to persist cache entry"
        );
    }

    /// Log fetch progress
    pub fn fetch_progress(url: &str, bytes_received: u64, total_bytes: Option<u64>) {
        match total_bytes {
            Some(total) if total > 0 => debug!(
                url = %url,
                bytes_received = %bytes_received,
                total_bytes = %total,
                progress_percent = %(bytes_received as f64 / total as f64 * 100.0),
                "📥 Fetch progress"
            ),
            _ => debug!(
                url = %url,
                bytes_received = %bytes_received,
                "📥 Fetch progress"
            ),
        }
    }
}
