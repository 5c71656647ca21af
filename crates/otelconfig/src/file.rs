//! Configuration file layer.
//!
//! A TOML file whose keys mirror the scalar and map fields of [`Config`].
//! It is applied after vendor options and before caller options, so code can
//! still override it and the environment overrides both.
//!
//! ```toml
//! service_name = "checkout"
//! exporter_endpoint = "https://collector.internal"
//! propagators = ["tracecontext", "baggage", "b3"]
//! metrics_reporting_period = "10s"
//!
//! [headers]
//! api-key = "secret"
//! ```

use crate::config::{Config, Enablement, LogLevel, Protocol};
use figment::Figment;
use figment::providers::{Format, Toml};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Contents of a configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// `service.name`.
    pub service_name: Option<String>,
    /// `service.version`.
    pub service_version: Option<String>,
    /// Generic endpoint.
    pub exporter_endpoint: Option<String>,
    /// Generic insecure flag.
    pub exporter_endpoint_insecure: Option<bool>,
    /// Generic protocol.
    pub exporter_protocol: Option<Protocol>,
    /// Generic headers, merged into existing ones.
    pub headers: BTreeMap<String, String>,
    /// Trace endpoint.
    pub traces_exporter_endpoint: Option<String>,
    /// Trace insecure flag.
    pub traces_exporter_endpoint_insecure: Option<bool>,
    /// Trace protocol.
    pub traces_exporter_protocol: Option<Protocol>,
    /// Trace headers, merged into existing ones.
    pub traces_headers: BTreeMap<String, String>,
    /// Trace enablement.
    pub traces_enabled: Option<bool>,
    /// Metric endpoint.
    pub metrics_exporter_endpoint: Option<String>,
    /// Metric insecure flag.
    pub metrics_exporter_endpoint_insecure: Option<bool>,
    /// Metric protocol.
    pub metrics_exporter_protocol: Option<Protocol>,
    /// Metric headers, merged into existing ones.
    pub metrics_headers: BTreeMap<String, String>,
    /// Metric enablement.
    pub metrics_enabled: Option<bool>,
    /// Metric reporting period, e.g. `"30s"`.
    pub metrics_reporting_period: Option<String>,
    /// `info` or `debug`.
    pub log_level: Option<String>,
    /// Propagator identifiers.
    pub propagators: Option<Vec<String>>,
    /// Resource attributes, merged into existing ones.
    pub resource_attributes: BTreeMap<String, String>,
    /// Skip the exporter-backed span processor.
    pub disable_default_span_processor: Option<bool>,
}

impl FileConfig {
    /// Reads `path`. A missing file yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid TOML or holds
    /// unknown keys or mistyped values.
    #[allow(clippy::result_large_err)]
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, figment::Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        Figment::from(Toml::file(path)).extract().map(Some)
    }

    /// Writes every key present in the file into `config`.
    pub fn apply(self, config: &mut Config) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut config.service_name, self.service_name);
        set(&mut config.service_version, self.service_version);
        set(&mut config.exporter_endpoint, self.exporter_endpoint);
        set(
            &mut config.exporter_endpoint_insecure,
            self.exporter_endpoint_insecure,
        );
        set(
            &mut config.exporter_protocol,
            self.exporter_protocol
                .map(|protocol| protocol.specified().unwrap_or_default()),
        );
        config.headers.extend(self.headers);

        set(
            &mut config.traces_exporter_endpoint,
            self.traces_exporter_endpoint,
        );
        set(
            &mut config.traces_exporter_endpoint_insecure,
            self.traces_exporter_endpoint_insecure,
        );
        if let Some(protocol) = self.traces_exporter_protocol {
            config.traces_exporter_protocol = protocol.specified();
        }
        config.traces_headers.extend(self.traces_headers);
        set(
            &mut config.traces_enabled,
            self.traces_enabled.map(Enablement::from),
        );

        set(
            &mut config.metrics_exporter_endpoint,
            self.metrics_exporter_endpoint,
        );
        set(
            &mut config.metrics_exporter_endpoint_insecure,
            self.metrics_exporter_endpoint_insecure,
        );
        if let Some(protocol) = self.metrics_exporter_protocol {
            config.metrics_exporter_protocol = protocol.specified();
        }
        config.metrics_headers.extend(self.metrics_headers);
        set(
            &mut config.metrics_enabled,
            self.metrics_enabled.map(Enablement::from),
        );
        set(
            &mut config.metrics_reporting_period,
            self.metrics_reporting_period,
        );

        set(
            &mut config.log_level,
            self.log_level.as_deref().map(LogLevel::parse_lenient),
        );
        set(&mut config.propagators, self.propagators);
        config.resource_attributes.extend(self.resource_attributes);
        set(
            &mut config.disable_default_span_processor,
            self.disable_default_span_processor,
        );
    }
}
