//! Structured JSONL logging with OpenTelemetry support for Clowdr services
//!
//! Every Clowdr binary installs its subscriber through this crate so that
//! logs share one shape regardless of which service emitted them.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines format for log aggregation (default)
//! - **Request Context Injection**: Room, conference and caller ids on every span
//! - **OpenTelemetry Integration**: OTLP export of request spans
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use clowdr_logging::{ClowdrSubscriberBuilder, LogConfig};
//!
//! // Settings from CLOWDR_LOG_* and OTEL_* variables
//! let _guard = ClowdrSubscriberBuilder::new()
//!     .with_config(LogConfig::from_env("clowdr-actions")?)
//!     .init();
//!
//! // Development mode with pretty human-readable output
//! let _guard = ClowdrSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Request Context
//!
//! ```ignore
//! use clowdr_logging::context::{RequestContext, RequestContextGuard};
//!
//! let _guard = RequestContextGuard::new(RequestContext::new().with_room(room_id));
//! // Spans opened in this scope carry room_id
//! ```

pub mod config;
pub mod context;
pub mod layers;
pub mod otel;

pub use config::{FileConfig, InvalidSetting, LogConfig, LogFormat, OtelConfig, RotationStrategy};
pub use context::{RequestContext, RequestContextGuard};
pub use layers::{RequestContextExtension, RequestContextLayer};

use std::fs::{self, File};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation as AppenderRotation};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
    Registry,
};

/// Errors raised while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to prepare log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Builder for configuring and initializing the Clowdr logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
pub struct ClowdrSubscriberBuilder {
    config: LogConfig,
}

impl ClowdrSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console = enabled;
        self
    }

    /// Switch the console between pretty and JSONL output
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.config.format = if pretty { LogFormat::Pretty } else { LogFormat::Json };
        self.config.ansi = pretty;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Enable OpenTelemetry with the given configuration
    pub fn with_opentelemetry(mut self, config: OtelConfig) -> Self {
        self.config.otel = Some(config);
        self
    }

    fn json_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .flatten_event(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    }

    fn file_writer(file_config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
        let rotation = match file_config.rotation {
            RotationStrategy::Never => {
                fs::create_dir_all(&file_config.directory)?;
                let path = file_config
                    .directory
                    .join(format!("{}.log", file_config.prefix));
                return Ok(tracing_appender::non_blocking(File::create(path)?));
            }
            RotationStrategy::Daily => AppenderRotation::DAILY,
            RotationStrategy::Hourly => AppenderRotation::HOURLY,
        };
        let appender =
            RollingFileAppender::new(rotation, &file_config.directory, &file_config.prefix);
        Ok(tracing_appender::non_blocking(appender))
    }

    /// Try to initialize the subscriber globally
    ///
    /// The returned guard keeps the file writer alive and must be held for
    /// the lifetime of the program when file output is enabled.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.level));

        let mut layers: Vec<BoxedLayer> = vec![RequestContextLayer::new().boxed()];
        let mut guard = None;

        if self.config.console {
            match self.config.format {
                LogFormat::Pretty => layers.push(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(self.config.ansi)
                        .with_target(true)
                        .boxed(),
                ),
                LogFormat::Json => layers.push(self.json_layer(std::io::stdout)),
            }
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = Self::file_writer(file_config)?;
            layers.push(self.json_layer(writer));
            guard = Some(file_guard);
        }

        if let Some(otel_config) = &self.config.otel {
            match otel::init_otel_layer::<Registry>(otel_config) {
                Ok(otel_layer) => layers.push(otel_layer.boxed()),
                Err(e) => eprintln!("Warning: Failed to initialize OpenTelemetry: {}", e),
            }
        }

        Registry::default().with(layers).with(env_filter).try_init()?;

        Ok(guard)
    }

    /// Initialize the subscriber globally, reporting failures on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {}", e);
                None
            }
        }
    }
}

impl Default for ClowdrSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    ClowdrSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    ClowdrSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for testing (minimal output, safe to call repeatedly)
pub fn init_testing() {
    let _ = ClowdrSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

/// Shutdown OpenTelemetry gracefully
///
/// Call this before your application exits to ensure all traces are exported.
pub fn shutdown() {
    otel::shutdown_otel();
}
