//! Layered OpenTelemetry trace and metric pipeline configuration.
//!
//! This crate resolves exporter settings from several layers, assembles a
//! resource, and starts OTLP trace and metric pipelines. The returned
//! [`OtelGuard`] stops everything on shutdown or drop.
//!
//! # Features
//!
//! - **Layered configuration** - Built-in defaults, an optional [`Vendor`], a
//!   TOML file read with [figment](https://docs.rs/figment), caller options
//!   and the standard `OTEL_*` environment variables, later layers winning
//! - **Per-signal endpoints** - Trace and metric endpoints, protocols,
//!   insecure flags and headers fall back to the generic ones, with
//!   protocol-specific default ports (4317 for gRPC, 4318 for HTTP)
//! - **Resource precedence** - Code attributes, resource options, detected
//!   host and SDK identity, then `OTEL_RESOURCE_ATTRIBUTES` and
//!   `OTEL_SERVICE_NAME` on top
//! - **Propagators** - `tracecontext`, `baggage`, `b3` and `ottrace`, installed
//!   as one composite
//! - **Drop-based lifecycle** - Shutdown hooks then pipelines are stopped when
//!   the guard goes out of scope
//!
//! # Example
//!
//! ```no_run
//! use otelconfig::{OtelConfigBuilder, Protocol, SdkError, configure, options};
//!
//! fn main() -> Result<(), SdkError> {
//!     // Simple case - defaults plus OTEL_* variables
//!     let _guard = configure([options::service_name("my-service")])?;
//!
//!     // Full configuration
//!     let _guard = OtelConfigBuilder::new()
//!         .with_file("/etc/otelconfig.toml")
//!         .with(options::service_name("my-service"))
//!         .with(options::exporter_endpoint("collector:4318"))
//!         .with(options::exporter_protocol(Protocol::HttpProtobuf))
//!         .with(options::exporter_insecure(true))
//!         .with_tracing_subscriber()
//!         .build()?;
//!
//!     tracing::info!("Application running");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
pub mod endpoint;
pub mod env;
mod error;
mod file;
mod guard;
mod logger;
pub mod options;
mod otlp;
mod pipeline;
pub mod propagation;
pub mod resource;

pub use builder::OtelConfigBuilder;
pub use config::{
    Config, DEFAULT_EXPORTER_ENDPOINT, DEFAULT_METRICS_REPORTING_PERIOD, DEFAULT_SERVICE_VERSION,
    EnvResource, Enablement, LogLevel, Protocol, ShutdownHook,
};
pub use endpoint::ResolvedEndpoint;
pub use env::{EnvSource, ProcessEnv};
pub use error::{BoxError, ResourceError, Result, SdkError, SetupError};
pub use file::FileConfig;
pub use guard::OtelGuard;
pub use logger::{
    ErrorHandler, Logger, LoggingErrorHandler, SharedErrorHandler, SharedLogger, TracingLogger,
};
pub use options::{ConfigOption, Vendor};
pub use otlp::OtlpPipelineFactory;
pub use pipeline::{
    MetricPipelineConfig, Pipeline, PipelineFactory, SamplerSetting, ShutdownFn,
    SpanProcessorSetting, TraceExtras, TracePipelineConfig,
};
pub use propagation::PropagatorRegistry;
pub use resource::ResourceOption;

// Re-export figment for callers layering their own providers
pub use figment;

/// Resolves configuration from `options` and the process environment, then
/// starts the enabled OTLP pipelines.
///
/// Equivalent to [`OtelConfigBuilder::new`] with every option added.
///
/// # Errors
///
/// See [`OtelConfigBuilder::build`].
pub fn configure(options: impl IntoIterator<Item = ConfigOption>) -> Result<OtelGuard> {
    OtelConfigBuilder::new().options(options).build()
}
