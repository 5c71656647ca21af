//! Programmatic options.
//!
//! Each function returns a [`ConfigOption`] that mutates one field of the
//! configuration record. Options cannot fail; bad values are caught when the
//! record is resolved or bootstrapped.
//!
//! ```
//! use otelconfig::options;
//!
//! let opts = vec![
//!     options::service_name("checkout"),
//!     options::exporter_endpoint("collector:4317"),
//!     options::headers([("api-key", "secret")]),
//! ];
//! # let _ = opts;
//! ```

use crate::config::{Config, Enablement, LogLevel, Protocol, ShutdownHook};
use crate::error::BoxError;
use crate::logger::{ErrorHandler, Logger};
use crate::pipeline::{SamplerSetting, SpanProcessorSetting};
use crate::resource::ResourceOption;
use opentelemetry_sdk::trace::{ShouldSample, SpanProcessor};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A single mutation of the configuration record.
pub struct ConfigOption(Box<dyn FnOnce(&mut Config)>);

impl ConfigOption {
    /// Wraps an arbitrary mutation.
    pub fn new(apply: impl FnOnce(&mut Config) + 'static) -> Self {
        Self(Box::new(apply))
    }

    /// Applies the mutation.
    pub fn apply(self, config: &mut Config) {
        (self.0)(config)
    }
}

impl fmt::Debug for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConfigOption")
    }
}

/// Defaults contributed by an observability vendor.
///
/// A vendor's options run before the file layer and caller options, so
/// anything it sets can still be overridden.
pub trait Vendor {
    /// Options applied first.
    fn options(&self) -> Vec<ConfigOption> {
        Vec::new()
    }

    /// Generic endpoint replacing `localhost`.
    fn default_endpoint(&self) -> Option<String> {
        None
    }

    /// Inspects the resolved record before any pipeline starts.
    ///
    /// # Errors
    ///
    /// An error aborts bootstrap and is returned from
    /// [`OtelConfigBuilder::build`](crate::OtelConfigBuilder::build).
    fn validate(&self, _config: &Config) -> Result<(), BoxError> {
        Ok(())
    }
}

fn to_map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> BTreeMap<String, String>
where
    K: Into<String>,
    V: Into<String>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Sets `service.name`.
pub fn service_name(name: impl Into<String>) -> ConfigOption {
    let name = name.into();
    ConfigOption::new(move |c| c.service_name = name)
}

/// Sets `service.version`.
pub fn service_version(version: impl Into<String>) -> ConfigOption {
    let version = version.into();
    ConfigOption::new(move |c| c.service_version = version)
}

/// Sets the endpoint shared by both signals.
pub fn exporter_endpoint(endpoint: impl Into<String>) -> ConfigOption {
    let endpoint = endpoint.into();
    ConfigOption::new(move |c| c.exporter_endpoint = endpoint)
}

/// Sets the trace endpoint.
pub fn traces_exporter_endpoint(endpoint: impl Into<String>) -> ConfigOption {
    let endpoint = endpoint.into();
    ConfigOption::new(move |c| c.traces_exporter_endpoint = endpoint)
}

/// Sets the metric endpoint.
pub fn metrics_exporter_endpoint(endpoint: impl Into<String>) -> ConfigOption {
    let endpoint = endpoint.into();
    ConfigOption::new(move |c| c.metrics_exporter_endpoint = endpoint)
}

/// Disables TLS for the generic endpoint.
pub fn exporter_insecure(insecure: bool) -> ConfigOption {
    ConfigOption::new(move |c| c.exporter_endpoint_insecure = insecure)
}

/// Disables TLS for the trace endpoint.
pub fn traces_exporter_insecure(insecure: bool) -> ConfigOption {
    ConfigOption::new(move |c| c.traces_exporter_endpoint_insecure = insecure)
}

/// Disables TLS for the metric endpoint.
pub fn metrics_exporter_insecure(insecure: bool) -> ConfigOption {
    ConfigOption::new(move |c| c.metrics_exporter_endpoint_insecure = insecure)
}

/// Adds headers sent with every export.
pub fn headers<K, V>(headers: impl IntoIterator<Item = (K, V)>) -> ConfigOption
where
    K: Into<String>,
    V: Into<String>,
{
    let headers = to_map(headers);
    ConfigOption::new(move |c| c.headers.extend(headers))
}

/// Adds headers sent with trace exports.
pub fn traces_headers<K, V>(headers: impl IntoIterator<Item = (K, V)>) -> ConfigOption
where
    K: Into<String>,
    V: Into<String>,
{
    let headers = to_map(headers);
    ConfigOption::new(move |c| c.traces_headers.extend(headers))
}

/// Adds headers sent with metric exports.
pub fn metrics_headers<K, V>(headers: impl IntoIterator<Item = (K, V)>) -> ConfigOption
where
    K: Into<String>,
    V: Into<String>,
{
    let headers = to_map(headers);
    ConfigOption::new(move |c| c.metrics_headers.extend(headers))
}

/// Sets the protocol shared by both signals. Blank text selects gRPC.
pub fn exporter_protocol(protocol: impl Into<Protocol>) -> ConfigOption {
    let protocol = protocol.into().specified().unwrap_or_default();
    ConfigOption::new(move |c| c.exporter_protocol = protocol)
}

/// Sets the trace protocol. Blank text inherits the generic protocol.
pub fn traces_exporter_protocol(protocol: impl Into<Protocol>) -> ConfigOption {
    let protocol = protocol.into().specified();
    ConfigOption::new(move |c| c.traces_exporter_protocol = protocol)
}

/// Sets the metric protocol. Blank text inherits the generic protocol.
pub fn metrics_exporter_protocol(protocol: impl Into<Protocol>) -> ConfigOption {
    let protocol = protocol.into().specified();
    ConfigOption::new(move |c| c.metrics_exporter_protocol = protocol)
}

/// Adds resource attributes. Empty values are dropped when the resource is
/// built.
pub fn resource_attributes<K, V>(attributes: impl IntoIterator<Item = (K, V)>) -> ConfigOption
where
    K: Into<String>,
    V: Into<String>,
{
    let attributes = to_map(attributes);
    ConfigOption::new(move |c| c.resource_attributes.extend(attributes))
}

/// Appends a resource contribution.
pub fn resource_option(option: ResourceOption) -> ConfigOption {
    ConfigOption::new(move |c| c.resource_options.push(option))
}

/// Replaces the propagator list.
pub fn propagators<S: Into<String>>(propagators: impl IntoIterator<Item = S>) -> ConfigOption {
    let propagators: Vec<String> = propagators.into_iter().map(Into::into).collect();
    ConfigOption::new(move |c| c.propagators = propagators)
}

/// Sets the diagnostics level.
pub fn log_level(level: LogLevel) -> ConfigOption {
    ConfigOption::new(move |c| c.log_level = level)
}

/// Enables or disables metrics.
pub fn metrics_enabled(enabled: bool) -> ConfigOption {
    ConfigOption::new(move |c| c.metrics_enabled = Enablement::from(enabled))
}

/// Enables or disables traces.
pub fn traces_enabled(enabled: bool) -> ConfigOption {
    ConfigOption::new(move |c| c.traces_enabled = Enablement::from(enabled))
}

/// Sets the interval between metric exports.
pub fn metrics_reporting_period(period: Duration) -> ConfigOption {
    let text = if period.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", period.as_millis())
    } else {
        format!("{}ns", period.as_nanos())
    };
    ConfigOption::new(move |c| c.metrics_reporting_period = text)
}

/// Replaces the sampler.
pub fn sampler(sampler: impl ShouldSample + 'static) -> ConfigOption {
    let setting = SamplerSetting::new(sampler);
    ConfigOption::new(move |c| c.sampler = Some(setting))
}

/// Adds a span processor. Processors run in the order they were added.
pub fn span_processor(processor: impl SpanProcessor + 'static) -> ConfigOption {
    let setting = SpanProcessorSetting::new(processor);
    ConfigOption::new(move |c| c.span_processors.push(setting))
}

/// Adds a hook run at shutdown, before the pipelines stop.
pub fn shutdown_hook(
    hook: impl FnOnce(&Config) -> Result<(), BoxError> + Send + 'static,
) -> ConfigOption {
    let hook: ShutdownHook = Box::new(hook);
    ConfigOption::new(move |c| c.shutdown_hooks.push(hook))
}

/// Routes pipeline errors to `handler`.
pub fn error_handler(handler: impl ErrorHandler + 'static) -> ConfigOption {
    let handler = Arc::new(handler);
    ConfigOption::new(move |c| c.error_handler = Some(handler))
}

/// Skips the exporter-backed span processor. At least one
/// [`span_processor`] must then be supplied.
pub fn disable_default_span_processor() -> ConfigOption {
    ConfigOption::new(|c| c.disable_default_span_processor = true)
}

/// Sends diagnostics to `logger`.
pub fn logger(logger: Arc<dyn Logger>) -> ConfigOption {
    ConfigOption::new(move |c| c.logger = Some(logger))
}
