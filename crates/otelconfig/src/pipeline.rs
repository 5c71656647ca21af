//! The boundary between resolved settings and the SDK.
//!
//! A [`PipelineFactory`] receives fully resolved per-signal settings and
//! returns a [`Pipeline`]: a shutdown callback plus whichever provider it
//! installed. [`OtlpPipelineFactory`](crate::OtlpPipelineFactory) is the
//! default; tests substitute a recording factory.

use crate::endpoint::ResolvedEndpoint;
use crate::error::{BoxError, SetupError};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{
    SdkTracerProvider, ShouldSample, SpanProcessor, TracerProviderBuilder,
};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

type ProviderHook = Box<dyn FnOnce(TracerProviderBuilder) -> TracerProviderBuilder + Send>;

/// Shutdown callback returned by a pipeline.
pub type ShutdownFn = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// A sampler waiting to be installed on the tracer provider.
pub struct SamplerSetting {
    description: String,
    install: ProviderHook,
}

impl SamplerSetting {
    /// Wraps any SDK sampler.
    pub fn new<S: ShouldSample + 'static>(sampler: S) -> Self {
        Self {
            description: format!("{sampler:?}"),
            install: Box::new(move |builder| builder.with_sampler(sampler)),
        }
    }

    /// Debug rendering of the wrapped sampler.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Installs the sampler on `builder`.
    pub fn install(self, builder: TracerProviderBuilder) -> TracerProviderBuilder {
        (self.install)(builder)
    }
}

impl fmt::Debug for SamplerSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SamplerSetting").field(&self.description).finish()
    }
}

/// A caller-supplied span processor waiting to be registered.
pub struct SpanProcessorSetting {
    description: &'static str,
    install: ProviderHook,
}

impl SpanProcessorSetting {
    /// Wraps any SDK span processor.
    pub fn new<P: SpanProcessor + 'static>(processor: P) -> Self {
        let type_name = std::any::type_name::<P>();
        Self {
            description: type_name.rsplit("::").next().unwrap_or(type_name),
            install: Box::new(move |builder| builder.with_span_processor(processor)),
        }
    }

    /// Short type name of the wrapped processor.
    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Registers the processor on `builder`.
    pub fn install(self, builder: TracerProviderBuilder) -> TracerProviderBuilder {
        (self.install)(builder)
    }
}

impl fmt::Debug for SpanProcessorSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SpanProcessorSetting").field(&self.description).finish()
    }
}

/// Trace-only settings handed to the factory.
#[derive(Debug, Default)]
pub struct TraceExtras {
    /// Sampler; `None` keeps the SDK default (always on).
    pub sampler: Option<SamplerSetting>,
    /// Caller processors, in registration order.
    pub span_processors: Vec<SpanProcessorSetting>,
    /// Register the exporter-backed batch processor after the caller's ones.
    pub default_span_processor: bool,
}

impl TraceExtras {
    /// Installs the sampler and caller processors on `builder`.
    pub fn install(self, mut builder: TracerProviderBuilder) -> TracerProviderBuilder {
        if let Some(sampler) = self.sampler {
            builder = sampler.install(builder);
        }
        for processor in self.span_processors {
            builder = processor.install(builder);
        }
        builder
    }
}

/// Everything needed to build the trace pipeline.
#[derive(Debug)]
pub struct TracePipelineConfig {
    /// Resolved endpoint and protocol.
    pub endpoint: ResolvedEndpoint,
    /// Generic headers overlaid with trace headers.
    pub headers: BTreeMap<String, String>,
    /// Resource attached to every span.
    pub resource: Resource,
    /// Sampler and processors.
    pub extras: TraceExtras,
}

/// Everything needed to build the metric pipeline.
#[derive(Debug)]
pub struct MetricPipelineConfig {
    /// Resolved endpoint and protocol.
    pub endpoint: ResolvedEndpoint,
    /// Generic headers overlaid with metric headers.
    pub headers: BTreeMap<String, String>,
    /// Resource attached to every metric.
    pub resource: Resource,
    /// Interval between exports. Always positive.
    pub reporting_period: Duration,
}

/// A started signal pipeline.
pub struct Pipeline {
    shutdown: ShutdownFn,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Pipeline {
    /// Creates a pipeline that runs `shutdown` when released.
    pub fn new(shutdown: impl FnOnce() -> Result<(), BoxError> + Send + 'static) -> Self {
        Self {
            shutdown: Box::new(shutdown),
            tracer_provider: None,
            meter_provider: None,
        }
    }

    /// Creates a pipeline owning a tracer provider; shutdown stops it.
    pub fn from_tracer_provider(provider: SdkTracerProvider) -> Self {
        let owned = provider.clone();
        Self::new(move || owned.shutdown().map_err(Into::into)).with_tracer_provider(provider)
    }

    /// Creates a pipeline owning a meter provider; shutdown stops it.
    pub fn from_meter_provider(provider: SdkMeterProvider) -> Self {
        let owned = provider.clone();
        Self::new(move || owned.shutdown().map_err(Into::into)).with_meter_provider(provider)
    }

    /// Attaches the tracer provider this pipeline installed.
    pub fn with_tracer_provider(mut self, provider: SdkTracerProvider) -> Self {
        self.tracer_provider = Some(provider);
        self
    }

    /// Attaches the meter provider this pipeline installed.
    pub fn with_meter_provider(mut self, provider: SdkMeterProvider) -> Self {
        self.meter_provider = Some(provider);
        self
    }

    /// The tracer provider, if this is a trace pipeline.
    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer_provider.as_ref()
    }

    /// The meter provider, if this is a metric pipeline.
    pub fn meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.meter_provider.as_ref()
    }

    pub(crate) fn shutdown(self) -> Result<(), BoxError> {
        (self.shutdown)()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("tracer_provider", &self.tracer_provider.is_some())
            .field("meter_provider", &self.meter_provider.is_some())
            .finish_non_exhaustive()
    }
}

/// Constructs signal pipelines from resolved settings.
pub trait PipelineFactory {
    /// Builds and starts the trace pipeline.
    fn traces(&self, config: TracePipelineConfig) -> Result<Pipeline, SetupError>;

    /// Builds and starts the metric pipeline.
    fn metrics(&self, config: MetricPipelineConfig) -> Result<Pipeline, SetupError>;
}

/// Units accepted in a reporting period, with their length in nanoseconds.
const PERIOD_UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("\u{b5}s", 1_000),
    ("\u{3bc}s", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60_000_000_000),
    ("h", 3_600_000_000_000),
];

/// Parses a reporting period such as `30s`, `1.5s` or `1h30m`, rejecting
/// zero and negative values.
///
/// Each term must carry one of `ns`, `us`, `µs`, `ms`, `s`, `m` or `h`.
/// Terms are rewritten as whole nanoseconds and summed by `duration-str`.
pub(crate) fn parse_reporting_period(period: &str) -> Result<Duration, SetupError> {
    let invalid = |reason: String| SetupError::InvalidReportingPeriod {
        period: period.to_string(),
        reason,
    };

    let text = period.trim();
    let (negative, terms) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let normalized = normalize_terms(terms).map_err(invalid)?;
    let parsed = duration_str::parse(&normalized).map_err(invalid)?;

    if parsed.is_zero() || negative {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(parsed)
}

/// Rewrites `1.5s2ms` as `1500000000ns+2000000ns`.
fn normalize_terms(mut rest: &str) -> Result<String, String> {
    if rest == "0" {
        return Ok("0ns".to_string());
    }
    if rest.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut terms = Vec::new();
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let scale = PERIOD_UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| match unit {
                "" => format!("missing unit after '{number}'"),
                other => format!("unknown unit '{other}'"),
            })?;
        terms.push(format!("{}ns", term_nanos(number, scale)?));
        rest = next;
    }
    Ok(terms.join("+"))
}

fn term_nanos(number: &str, scale: u128) -> Result<u128, String> {
    let malformed = || format!("malformed number '{number}'");
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(malformed());
    }

    let whole = match whole {
        "" => 0,
        digits => digits.parse::<u128>().map_err(|_| malformed())?,
    };
    let mut nanos = whole.checked_mul(scale).ok_or_else(malformed)?;

    // Digits past the eighteenth are below nanosecond resolution.
    let fraction = &fraction[..fraction.len().min(18)];
    if !fraction.is_empty() {
        let numerator = fraction.parse::<u128>().map_err(|_| malformed())?;
        let denominator = 10u128.pow(fraction.len() as u32);
        nanos += numerator * scale / denominator;
    }
    Ok(nanos)
}
