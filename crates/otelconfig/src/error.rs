//! Error types for configuration resolution and pipeline bootstrap.

use thiserror::Error;

/// Boxed error used at collaborator boundaries (detectors, shutdown hooks,
/// pipeline shutdown callbacks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialised Result type for configuration operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Errors returned by [`configure`](crate::configure) and
/// [`OtelConfigBuilder::build`](crate::OtelConfigBuilder::build).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SdkError {
    /// An environment variable held a value that could not be parsed.
    #[error("environment error: {variable}={value:?}: {reason}")]
    Environment {
        /// Name of the offending variable.
        variable: &'static str,
        /// The raw value found in the environment.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The resource could not be assembled.
    #[error(transparent)]
    ResourceConflict(#[from] ResourceError),

    /// The resolved configuration cannot be bootstrapped.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A pipeline failed to start.
    #[error("setup error: {0}")]
    Setup(#[from] SetupError),

    /// The configuration file layer could not be read.
    #[error("configuration error")]
    Config(#[source] Box<figment::Error>),

    /// A vendor validator rejected the resolved configuration.
    #[error("configuration rejected by vendor validation")]
    Validation(#[source] BoxError),

    /// Tracing subscriber initialisation failed.
    #[error("failed to initialise tracing")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),
}

impl From<figment::Error> for SdkError {
    fn from(err: figment::Error) -> Self {
        SdkError::Config(Box::new(err))
    }
}

/// Errors raised while merging resource contributions.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Two contributions declared different schema URLs.
    #[error("cannot merge resource due to conflicting Schema URL: {existing} != {incoming}")]
    ConflictingSchemaUrl {
        /// Schema URL accumulated so far.
        existing: String,
        /// Schema URL of the contribution being merged.
        incoming: String,
    },

    /// A detector reported a failure.
    #[error("resource detector failed: {0}")]
    Detector(#[source] BoxError),
}

/// Errors raised while constructing a signal pipeline.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SetupError {
    /// The metrics reporting period is not a positive duration.
    #[error("invalid metric reporting period: {period:?}: {reason}")]
    InvalidReportingPeriod {
        /// The configured period text.
        period: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The OTLP span exporter could not be built.
    #[error("failed to create span exporter")]
    TraceExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// The OTLP metric exporter could not be built.
    #[error("failed to create metric exporter")]
    MetricExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// A custom pipeline factory failed.
    #[error("pipeline construction failed")]
    Other(#[source] BoxError),
}
