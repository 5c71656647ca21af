//! The configuration record.
//!
//! [`Config`] is the mutable aggregate every layer writes into: vendor
//! options, the file layer, caller options and finally the environment.
//! Once resolved it carries the built [`Resource`] and per-signal endpoints,
//! and it is handed to shutdown hooks when the guard is released.

use crate::endpoint::{
    GRPC_DEFAULT_PORT, GenericFields, HTTP_DEFAULT_PORT, ResolvedEndpoint, SignalFields,
    resolve_signal,
};
use crate::error::BoxError;
use crate::logger::{LoggingErrorHandler, SharedErrorHandler, SharedLogger, TracingLogger};
use crate::pipeline::{SamplerSetting, SpanProcessorSetting};
use crate::resource::ResourceOption;
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Generic endpoint used when neither a vendor nor the caller names one.
pub const DEFAULT_EXPORTER_ENDPOINT: &str = "localhost";
/// Service version reported when none is configured.
pub const DEFAULT_SERVICE_VERSION: &str = "unknown";
/// Default interval between metric exports.
pub const DEFAULT_METRICS_REPORTING_PERIOD: &str = "30s";

/// Callback run when the guard shuts down, before the pipelines stop.
pub type ShutdownHook = Box<dyn FnOnce(&Config) -> Result<(), BoxError> + Send>;

/// OTLP wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Protocol {
    /// OTLP over gRPC (port 4317).
    #[default]
    Grpc,
    /// OTLP over HTTP with protobuf bodies (port 4318).
    HttpProtobuf,
    /// OTLP over HTTP with JSON bodies. Recognised but not supported.
    HttpJson,
    /// Any other value, kept verbatim so bootstrap can reject it by name.
    Unsupported(String),
}

impl Protocol {
    /// The protocol identifier as used by `OTEL_EXPORTER_OTLP_PROTOCOL`.
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::HttpProtobuf => "http/protobuf",
            Protocol::HttpJson => "http/json",
            Protocol::Unsupported(other) => other,
        }
    }

    /// `None` for blank text, which leaves the choice to the next layer
    /// down: a signal inherits the generic protocol and the generic
    /// protocol falls back to gRPC.
    pub fn specified(self) -> Option<Protocol> {
        match self {
            Protocol::Unsupported(text) if text.is_empty() => None,
            other => Some(other),
        }
    }

    /// Port appended when an endpoint names none.
    pub fn default_port(&self) -> &'static str {
        match self {
            Protocol::Grpc => GRPC_DEFAULT_PORT,
            _ => HTTP_DEFAULT_PORT,
        }
    }
}

impl From<&str> for Protocol {
    fn from(value: &str) -> Self {
        match value.trim() {
            "grpc" => Protocol::Grpc,
            "http/protobuf" => Protocol::HttpProtobuf,
            "http/json" => Protocol::HttpJson,
            other => Protocol::Unsupported(other.to_string()),
        }
    }
}

impl FromStr for Protocol {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Protocol::from(s))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Protocol::from(value.as_str()))
    }
}

/// Whether a signal should be exported.
///
/// An unspecified signal is exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enablement {
    /// Nobody has said either way.
    #[default]
    Unspecified,
    /// Explicitly enabled.
    Enabled,
    /// Explicitly disabled.
    Disabled,
}

impl Enablement {
    /// Returns `false` only for [`Enablement::Disabled`].
    pub fn is_enabled(self) -> bool {
        !matches!(self, Enablement::Disabled)
    }
}

impl From<bool> for Enablement {
    fn from(enabled: bool) -> Self {
        if enabled {
            Enablement::Enabled
        } else {
            Enablement::Disabled
        }
    }
}

/// Verbosity of configuration diagnostics.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only fatal diagnostics.
    #[default]
    Info,
    /// Fatal and debug diagnostics, plus a dump of the resolved record.
    Debug,
}

impl LogLevel {
    /// Parses `OTEL_LOG_LEVEL` text. Only `debug` (any case) selects
    /// [`LogLevel::Debug`].
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("debug") {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

/// Raw resource-related values captured from the environment.
///
/// These feed the last two resource steps, so the environment wins over
/// every code-supplied attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvResource {
    /// Raw `OTEL_RESOURCE_ATTRIBUTES`. `Some("")` is kept distinct from unset.
    pub attributes: Option<String>,
    /// Raw `OTEL_SERVICE_NAME`.
    pub service_name: Option<String>,
    /// Raw `OTEL_SERVICE_VERSION`.
    pub service_version: Option<String>,
}

/// All settings that drive pipeline bootstrap.
#[derive(Serialize)]
pub struct Config {
    /// `service.name` resource attribute. May be empty.
    pub service_name: String,
    /// `service.version` resource attribute.
    pub service_version: String,

    /// Endpoint shared by both signals unless they override it.
    pub exporter_endpoint: String,
    /// Skip TLS for the generic endpoint.
    pub exporter_endpoint_insecure: bool,
    /// Protocol shared by both signals unless they override it.
    pub exporter_protocol: Protocol,
    /// Headers sent with every export.
    pub headers: BTreeMap<String, String>,

    /// Trace-specific endpoint. Empty means "use the generic endpoint".
    pub traces_exporter_endpoint: String,
    /// Skip TLS for the trace endpoint.
    pub traces_exporter_endpoint_insecure: bool,
    /// Trace-specific protocol.
    pub traces_exporter_protocol: Option<Protocol>,
    /// Headers sent with trace exports only.
    pub traces_headers: BTreeMap<String, String>,
    /// Whether traces are exported.
    pub traces_enabled: Enablement,

    /// Metric-specific endpoint. Empty means "use the generic endpoint".
    pub metrics_exporter_endpoint: String,
    /// Skip TLS for the metric endpoint.
    pub metrics_exporter_endpoint_insecure: bool,
    /// Metric-specific protocol.
    pub metrics_exporter_protocol: Option<Protocol>,
    /// Headers sent with metric exports only.
    pub metrics_headers: BTreeMap<String, String>,
    /// Whether metrics are exported.
    pub metrics_enabled: Enablement,
    /// Interval between metric exports, e.g. `"30s"`.
    pub metrics_reporting_period: String,

    /// Diagnostics verbosity.
    pub log_level: LogLevel,
    /// Propagator identifiers, in priority order.
    pub propagators: Vec<String>,
    /// Attributes set from code.
    pub resource_attributes: BTreeMap<String, String>,
    /// Resource values seen in the environment.
    #[serde(rename = "resource_from_env")]
    pub env_resource: EnvResource,
    /// Skip the exporter-backed batch span processor.
    pub disable_default_span_processor: bool,

    #[serde(rename = "sampler", serialize_with = "serialize_sampler")]
    pub(crate) sampler: Option<SamplerSetting>,
    #[serde(rename = "span_processors", serialize_with = "serialize_span_processors")]
    pub(crate) span_processors: Vec<SpanProcessorSetting>,
    #[serde(rename = "resource", serialize_with = "serialize_resource")]
    pub(crate) resource: Option<Resource>,

    #[serde(skip)]
    pub(crate) resource_options: Vec<ResourceOption>,
    #[serde(skip)]
    pub(crate) logger: Option<SharedLogger>,
    #[serde(skip)]
    pub(crate) error_handler: Option<SharedErrorHandler>,
    #[serde(skip)]
    pub(crate) shutdown_hooks: Vec<ShutdownHook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            service_version: DEFAULT_SERVICE_VERSION.to_string(),
            exporter_endpoint: DEFAULT_EXPORTER_ENDPOINT.to_string(),
            exporter_endpoint_insecure: false,
            exporter_protocol: Protocol::Grpc,
            headers: BTreeMap::new(),
            traces_exporter_endpoint: String::new(),
            traces_exporter_endpoint_insecure: false,
            traces_exporter_protocol: None,
            traces_headers: BTreeMap::new(),
            traces_enabled: Enablement::Unspecified,
            metrics_exporter_endpoint: String::new(),
            metrics_exporter_endpoint_insecure: false,
            metrics_exporter_protocol: None,
            metrics_headers: BTreeMap::new(),
            metrics_enabled: Enablement::Unspecified,
            metrics_reporting_period: DEFAULT_METRICS_REPORTING_PERIOD.to_string(),
            log_level: LogLevel::Info,
            propagators: vec!["tracecontext".to_string(), "baggage".to_string()],
            resource_attributes: BTreeMap::new(),
            env_resource: EnvResource::default(),
            disable_default_span_processor: false,
            sampler: None,
            span_processors: Vec::new(),
            resource: None,
            resource_options: Vec::new(),
            logger: None,
            error_handler: None,
            shutdown_hooks: Vec::new(),
        }
    }
}

impl Config {
    /// Resolves the trace endpoint, caching fallbacks into the trace fields.
    ///
    /// Returns `None` when no endpoint is configured anywhere.
    pub fn resolve_traces_endpoint(&mut self) -> Option<ResolvedEndpoint> {
        resolve_signal(
            GenericFields {
                endpoint: &self.exporter_endpoint,
                insecure: self.exporter_endpoint_insecure,
                protocol: &self.exporter_protocol,
            },
            SignalFields {
                endpoint: &mut self.traces_exporter_endpoint,
                insecure: &mut self.traces_exporter_endpoint_insecure,
                protocol: &mut self.traces_exporter_protocol,
            },
        )
    }

    /// Resolves the metric endpoint, caching fallbacks into the metric fields.
    ///
    /// Returns `None` when no endpoint is configured anywhere.
    pub fn resolve_metrics_endpoint(&mut self) -> Option<ResolvedEndpoint> {
        resolve_signal(
            GenericFields {
                endpoint: &self.exporter_endpoint,
                insecure: self.exporter_endpoint_insecure,
                protocol: &self.exporter_protocol,
            },
            SignalFields {
                endpoint: &mut self.metrics_exporter_endpoint,
                insecure: &mut self.metrics_exporter_endpoint_insecure,
                protocol: &mut self.metrics_exporter_protocol,
            },
        )
    }

    /// Generic headers overlaid with trace headers.
    pub fn merged_traces_headers(&self) -> BTreeMap<String, String> {
        merge_headers(&self.headers, &self.traces_headers)
    }

    /// Generic headers overlaid with metric headers.
    pub fn merged_metrics_headers(&self) -> BTreeMap<String, String> {
        merge_headers(&self.headers, &self.metrics_headers)
    }

    /// The resource built during resolution.
    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    /// Description of the configured sampler.
    pub fn sampler_description(&self) -> String {
        self.sampler
            .as_ref()
            .map_or_else(|| "AlwaysOn".to_string(), |s| s.description().to_string())
    }

    /// Number of caller-supplied span processors.
    pub fn span_processor_count(&self) -> usize {
        self.span_processors.len()
    }

    /// The logger diagnostics are written to.
    ///
    /// Falls back to a [`TracingLogger`] at the configured level.
    pub fn logger(&self) -> SharedLogger {
        self.logger
            .clone()
            .unwrap_or_else(|| Arc::new(TracingLogger::new(self.log_level)))
    }

    /// The handler pipeline errors are routed to.
    ///
    /// Falls back to forwarding errors to [`Config::logger`].
    pub fn error_handler(&self) -> SharedErrorHandler {
        self.error_handler
            .clone()
            .unwrap_or_else(|| Arc::new(LoggingErrorHandler::new(self.logger())))
    }

    /// Serialises the record for the debug dump.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("service_name", &self.service_name)
            .field("service_version", &self.service_version)
            .field("exporter_endpoint", &self.exporter_endpoint)
            .field("exporter_protocol", &self.exporter_protocol)
            .field("traces_exporter_endpoint", &self.traces_exporter_endpoint)
            .field("traces_enabled", &self.traces_enabled)
            .field("metrics_exporter_endpoint", &self.metrics_exporter_endpoint)
            .field("metrics_enabled", &self.metrics_enabled)
            .field("propagators", &self.propagators)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

fn merge_headers(
    generic: &BTreeMap<String, String>,
    signal: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = generic.clone();
    merged.extend(signal.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn serialize_sampler<S: Serializer>(
    sampler: &Option<SamplerSetting>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match sampler {
        Some(setting) => serializer.serialize_str(setting.description()),
        None => serializer.serialize_str("AlwaysOn"),
    }
}

fn serialize_span_processors<S: Serializer>(
    processors: &[SpanProcessorSetting],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(processors.iter().map(SpanProcessorSetting::description))
}

fn serialize_resource<S: Serializer>(
    resource: &Option<Resource>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct View<'a> {
        schema_url: Option<&'a str>,
        attributes: BTreeMap<String, String>,
    }

    match resource {
        Some(resource) => View {
            schema_url: resource.schema_url(),
            attributes: resource
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_string()))
                .collect(),
        }
        .serialize(serializer),
        None => serializer.serialize_none(),
    }
}
