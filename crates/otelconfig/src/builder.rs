//! Builder for resolving configuration and starting pipelines.

use crate::config::{Config, LogLevel, Protocol};
use crate::endpoint::ResolvedEndpoint;
use crate::env::{EnvSource, ProcessEnv, apply_environment};
use crate::error::{Result, SdkError};
use crate::file::FileConfig;
use crate::guard::{OtelGuard, abandon, diagnostics_dispatch, init_subscriber};
use crate::logger::SharedLogger;
use crate::options::{ConfigOption, Vendor};
use crate::otlp::OtlpPipelineFactory;
use crate::pipeline::{
    MetricPipelineConfig, Pipeline, PipelineFactory, TraceExtras, TracePipelineConfig,
    parse_reporting_period,
};
use crate::propagation::PropagatorRegistry;
use crate::resource::build_resource;
use opentelemetry_sdk::Resource;
use std::io;
use std::mem;
use std::path::PathBuf;

type SetupFn = fn(&OtelConfigBuilder, &mut Config, &SharedLogger) -> Result<Option<Pipeline>>;

/// Builder for configuring OpenTelemetry pipelines.
///
/// Layers are applied in this order, later layers winning:
///
/// 1. built-in defaults
/// 2. the [`Vendor`], if one is registered
/// 3. the configuration file, if one is given and exists
/// 4. caller options, in the order they were added
/// 5. standard `OTEL_*` environment variables
///
/// # Example
///
/// ```no_run
/// use otelconfig::{OtelConfigBuilder, SdkError, options};
///
/// fn main() -> Result<(), SdkError> {
///     let _guard = OtelConfigBuilder::new()
///         .with_file("/etc/otelconfig.toml")
///         .with(options::service_name("checkout"))
///         .with(options::propagators(["tracecontext", "baggage", "b3"]))
///         .with_tracing_subscriber()
///         .build()?;
///
///     tracing::info!("Application running");
///     Ok(())
/// }
/// ```
pub struct OtelConfigBuilder {
    vendor: Option<Box<dyn Vendor>>,
    file: Option<PathBuf>,
    options: Vec<ConfigOption>,
    env: Box<dyn EnvSource>,
    factory: Box<dyn PipelineFactory>,
    propagators: PropagatorRegistry,
    init_tracing_subscriber: bool,
}

impl Default for OtelConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OtelConfigBuilder {
    /// Creates a builder reading the process environment and exporting
    /// over OTLP.
    pub fn new() -> Self {
        Self {
            vendor: None,
            file: None,
            options: Vec::new(),
            env: Box::new(ProcessEnv),
            factory: Box::new(OtlpPipelineFactory),
            propagators: PropagatorRegistry::default(),
            init_tracing_subscriber: false,
        }
    }

    /// Registers vendor defaults and validation.
    pub fn vendor(mut self, vendor: impl Vendor + 'static) -> Self {
        self.vendor = Some(Box::new(vendor));
        self
    }

    /// Layers a TOML file between vendor defaults and caller options.
    ///
    /// A missing file is skipped.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Adds one option.
    pub fn with(mut self, option: ConfigOption) -> Self {
        self.options.push(option);
        self
    }

    /// Adds several options, in order.
    pub fn options(mut self, options: impl IntoIterator<Item = ConfigOption>) -> Self {
        self.options.extend(options);
        self
    }

    /// Reads environment variables from `env` instead of the process.
    pub fn env_source(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    /// Builds pipelines with `factory` instead of OTLP.
    pub fn pipeline_factory(mut self, factory: impl PipelineFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    /// Resolves propagator identifiers through `registry`.
    pub fn propagator_registry(mut self, registry: PropagatorRegistry) -> Self {
        self.propagators = registry;
        self
    }

    /// Installs a `tracing-subscriber` registry bound to the trace pipeline.
    pub fn with_tracing_subscriber(mut self) -> Self {
        self.init_tracing_subscriber = true;
        self
    }

    /// Applies every layer and builds the resource, without starting
    /// anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed, an environment variable
    /// is malformed, or the resource cannot be assembled.
    pub fn resolve(mut self) -> Result<Config> {
        self.resolve_config()
    }

    /// Resolves the configuration and starts the enabled pipelines.
    ///
    /// # Errors
    ///
    /// Returns the first resolution, validation or setup error. Pipelines
    /// started before a setup error are shut down again.
    pub fn build(mut self) -> Result<OtelGuard> {
        let config = self.resolve_config()?;

        if self.init_tracing_subscriber {
            let dispatch = diagnostics_dispatch(config.log_level, io::stdout);
            tracing::dispatcher::with_default(&dispatch, || self.start(config))
        } else {
            self.start(config)
        }
    }

    fn start(self, mut config: Config) -> Result<OtelGuard> {
        let logger = config.logger();

        if config.log_level == LogLevel::Debug {
            logger.debug("debug logging enabled");
            logger.debug("configuration");
            match config.to_json() {
                Ok(json) => logger.debug(&json),
                Err(e) => logger.debug(&format!("failed to serialise configuration: {e}")),
            }
        }

        if let Some(vendor) = &self.vendor {
            vendor.validate(&config).map_err(SdkError::Validation)?;
        }

        let mut pipelines = Vec::new();
        let setups: [SetupFn; 2] = [Self::setup_traces, Self::setup_metrics];
        for setup in setups {
            match setup(&self, &mut config, &logger) {
                Ok(Some(pipeline)) => pipelines.push(pipeline),
                Ok(None) => {}
                Err(e) => {
                    abandon(pipelines, &config);
                    return Err(e);
                }
            }
        }

        if self.init_tracing_subscriber {
            let tracer_provider = pipelines.iter().find_map(Pipeline::tracer_provider);
            if let Err(e) = init_subscriber(tracer_provider, config.log_level) {
                abandon(pipelines, &config);
                return Err(e.into());
            }
        }

        Ok(OtelGuard::new(config, pipelines))
    }

    fn resolve_config(&mut self) -> Result<Config> {
        let mut config = Config::default();

        if let Some(vendor) = &self.vendor {
            if let Some(endpoint) = vendor.default_endpoint() {
                config.exporter_endpoint = endpoint;
            }
            for option in vendor.options() {
                option.apply(&mut config);
            }
        }

        if let Some(path) = &self.file
            && let Some(file) = FileConfig::load(path)?
        {
            file.apply(&mut config);
        }

        for option in self.options.drain(..) {
            option.apply(&mut config);
        }

        let logger = config.logger();
        apply_environment(&mut config, &*self.env, &*logger)?;

        config.resource = Some(build_resource(&config)?);
        Ok(config)
    }

    fn setup_traces(&self, config: &mut Config, logger: &SharedLogger) -> Result<Option<Pipeline>> {
        if !config.traces_enabled.is_enabled() {
            logger.debug("tracing is disabled by configuration: enabled set to false");
            return Ok(None);
        }
        let Some(endpoint) = config.resolve_traces_endpoint() else {
            logger.debug("tracing is disabled by configuration: no endpoint set");
            return Ok(None);
        };
        check_protocol(&endpoint)?;

        if config.disable_default_span_processor && config.span_processors.is_empty() {
            return Err(SdkError::InvalidConfiguration(
                "must provide at least one span processor if the default span processor is disabled"
                    .to_string(),
            ));
        }

        self.propagators.install(&config.propagators)?;

        let pipeline = self.factory.traces(TracePipelineConfig {
            endpoint,
            headers: config.merged_traces_headers(),
            resource: resolved_resource(config),
            extras: TraceExtras {
                sampler: config.sampler.take(),
                span_processors: mem::take(&mut config.span_processors),
                default_span_processor: !config.disable_default_span_processor,
            },
        })?;
        Ok(Some(pipeline))
    }

    fn setup_metrics(
        &self,
        config: &mut Config,
        logger: &SharedLogger,
    ) -> Result<Option<Pipeline>> {
        if !config.metrics_enabled.is_enabled() {
            logger.debug("metrics are disabled by configuration: enabled set to false");
            return Ok(None);
        }
        let Some(endpoint) = config.resolve_metrics_endpoint() else {
            logger.debug("metrics are disabled by configuration: no endpoint set");
            return Ok(None);
        };
        check_protocol(&endpoint)?;

        let reporting_period = parse_reporting_period(&config.metrics_reporting_period)?;

        let pipeline = self.factory.metrics(MetricPipelineConfig {
            endpoint,
            headers: config.merged_metrics_headers(),
            resource: resolved_resource(config),
            reporting_period,
        })?;
        Ok(Some(pipeline))
    }
}

fn check_protocol(endpoint: &ResolvedEndpoint) -> Result<()> {
    match &endpoint.protocol {
        Protocol::Grpc | Protocol::HttpProtobuf => Ok(()),
        Protocol::HttpJson => Err(SdkError::InvalidConfiguration(
            "http/json is currently unsupported".to_string(),
        )),
        Protocol::Unsupported(other) => Err(SdkError::InvalidConfiguration(format!(
            "'{other}' is not a supported protocol"
        ))),
    }
}

fn resolved_resource(config: &Config) -> Resource {
    config
        .resource
        .clone()
        .unwrap_or_else(|| Resource::builder_empty().build())
}

impl std::fmt::Debug for OtelConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelConfigBuilder")
            .field("file", &self.file)
            .field("options", &self.options.len())
            .field("propagators", &self.propagators)
            .field("init_tracing_subscriber", &self.init_tracing_subscriber)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::SetupError;
    use std::sync::{Arc, Mutex};

    /// What a [`RecordingFactory`] was asked to build.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Built {
        Traces {
            endpoint: ResolvedEndpoint,
            headers: Vec<(String, String)>,
            span_processors: usize,
            default_span_processor: bool,
        },
        Metrics {
            endpoint: ResolvedEndpoint,
            headers: Vec<(String, String)>,
            period: std::time::Duration,
        },
    }

    /// Factory that records requests and starts nothing.
    #[derive(Clone, Default)]
    pub struct RecordingFactory {
        pub built: Arc<Mutex<Vec<Built>>>,
        pub shutdowns: Arc<Mutex<Vec<&'static str>>>,
        pub fail_metrics: bool,
    }

    impl RecordingFactory {
        pub fn built(&self) -> Vec<Built> {
            self.built.lock().unwrap().clone()
        }
    }

    impl PipelineFactory for RecordingFactory {
        fn traces(&self, config: TracePipelineConfig) -> std::result::Result<Pipeline, SetupError> {
            self.built.lock().unwrap().push(Built::Traces {
                endpoint: config.endpoint,
                headers: config.headers.into_iter().collect(),
                span_processors: config.extras.span_processors.len(),
                default_span_processor: config.extras.default_span_processor,
            });
            let shutdowns = self.shutdowns.clone();
            Ok(Pipeline::new(move || {
                shutdowns.lock().unwrap().push("traces");
                Ok(())
            }))
        }

        fn metrics(
            &self,
            config: MetricPipelineConfig,
        ) -> std::result::Result<Pipeline, SetupError> {
            if self.fail_metrics {
                return Err(SetupError::Other("collector unreachable".into()));
            }
            self.built.lock().unwrap().push(Built::Metrics {
                endpoint: config.endpoint,
                headers: config.headers.into_iter().collect(),
                period: config.reporting_period,
            });
            let shutdowns = self.shutdowns.clone();
            Ok(Pipeline::new(move || {
                shutdowns.lock().unwrap().push("metrics");
                Ok(())
            }))
        }
    }
}
