//! Pipeline lifecycle management.
//!
//! The [`OtelGuard`] owns the started pipelines and the resolved record.
//! Shutting it down (explicitly or on drop) runs the caller's shutdown hooks
//! in registration order, then stops the pipelines in construction order.
//! Failures are reported to the logger's fatal sink and never stop the
//! remaining steps.

use crate::config::{Config, LogLevel};
use crate::pipeline::Pipeline;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::mem;
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Guard returned by [`configure`](crate::configure).
///
/// # Example
///
/// ```no_run
/// use otelconfig::{SdkError, configure, options};
///
/// fn main() -> Result<(), SdkError> {
///     let guard = configure([
///         options::service_name("checkout"),
///         options::exporter_endpoint("collector:4317"),
///         options::exporter_insecure(true),
///     ])?;
///
///     tracing::info!("Application running");
///
///     guard.shutdown();
///     Ok(())
/// }
/// ```
pub struct OtelGuard {
    config: Config,
    pipelines: Vec<Pipeline>,
}

impl OtelGuard {
    pub(crate) fn new(config: Config, pipelines: Vec<Pipeline>) -> Self {
        Self { config, pipelines }
    }

    /// The resolved configuration record.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of started pipelines still awaiting shutdown.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// The trace pipeline's provider, if one was started.
    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.pipelines.iter().find_map(Pipeline::tracer_provider)
    }

    /// The metric pipeline's provider, if one was started.
    pub fn meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.pipelines.iter().find_map(Pipeline::meter_provider)
    }

    /// Flushes every started provider.
    ///
    /// Flush failures go to the configured error handler.
    pub fn flush(&self) {
        let handler = self.config.error_handler();

        if let Some(provider) = self.tracer_provider()
            && let Err(e) = provider.force_flush()
        {
            handler.handle(&e);
        }

        if let Some(provider) = self.meter_provider()
            && let Err(e) = provider.force_flush()
        {
            handler.handle(&e);
        }
    }

    /// Runs shutdown hooks, then stops every pipeline.
    pub fn shutdown(mut self) {
        self.shutdown_all();
    }

    fn shutdown_all(&mut self) {
        let logger = self.config.logger();

        for hook in mem::take(&mut self.config.shutdown_hooks) {
            if let Err(e) = hook(&self.config) {
                logger.fatal(&format!(
                    "failed to stop exporter while calling config shutdown: {e}"
                ));
            }
        }

        for pipeline in self.pipelines.drain(..) {
            if let Err(e) = pipeline.shutdown() {
                logger.fatal(&format!("failed to stop exporter: {e}"));
            }
        }
    }
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

impl std::fmt::Debug for OtelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelGuard")
            .field("config", &self.config)
            .field("pipelines", &self.pipelines)
            .finish()
    }
}

/// Stops pipelines started before a later one failed.
pub(crate) fn abandon(pipelines: Vec<Pipeline>, config: &Config) {
    let logger = config.logger();
    for pipeline in pipelines {
        if let Err(e) = pipeline.shutdown() {
            logger.debug(&format!("failed to stop exporter after setup error: {e}"));
        }
    }
}

const DEBUG_DIRECTIVE: &str = "otelconfig=debug";

/// `RUST_LOG`, or `info` when unset. [`LogLevel::Debug`] also lets this
/// crate's own debug events through.
fn env_filter(level: LogLevel) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match (level, DEBUG_DIRECTIVE.parse::<Directive>()) {
        (LogLevel::Debug, Ok(directive)) => filter.add_directive(directive),
        _ => filter,
    }
}

/// A fmt-only dispatcher for diagnostics emitted while pipelines are still
/// being built, before the global subscriber can exist.
pub(crate) fn diagnostics_dispatch<W>(level: LogLevel, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(writer);

    Dispatch::new(
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt_layer),
    )
}

/// Installs `tracing-subscriber` with an env filter, a fmt layer and, when
/// a trace pipeline exists, a `tracing-opentelemetry` layer.
pub(crate) fn init_subscriber(
    tracer_provider: Option<&SdkTracerProvider>,
    level: LogLevel,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let telemetry_layer = tracer_provider.map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer("otelconfig"))
    });

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt_layer)
        .with(telemetry_layer)
        .try_init()
}
