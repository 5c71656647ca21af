//! Environment overlay.
//!
//! Standard `OTEL_*` variables are the highest-precedence layer. Each
//! recognised variable is bound to one field of [`Config`] through
//! [`ENV_BINDINGS`]; a variable that is present and not blank replaces
//! whatever vendor, file or caller options put there.
//!
//! | Kind | Format |
//! |------|--------|
//! | text | taken verbatim |
//! | bool | `1 t T TRUE true True 0 f F FALSE false False` |
//! | map | `key=value` pairs separated by `,` |
//! | list | values separated by `,` |

use crate::config::{Config, Enablement, LogLevel, Protocol};
use crate::error::SdkError;
use crate::logger::Logger;
use crate::resource::parse_resource_attributes;
use std::collections::{BTreeMap, HashMap};

/// Read access to environment variables.
pub trait EnvSource {
    /// Returns the variable's value, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvSource for HashMap<&str, &str> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.to_string())
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// How a variable's text is parsed and stored.
#[derive(Clone, Copy)]
pub enum Setter {
    /// Stored as text.
    Text(fn(&mut Config, String)),
    /// Parsed as a boolean; malformed text is an error.
    Bool(fn(&mut Config, bool)),
    /// Parsed as `key=value` pairs.
    Map(fn(&mut Config, BTreeMap<String, String>)),
    /// Parsed as a comma-separated list.
    List(fn(&mut Config, Vec<String>)),
}

/// One recognised environment variable.
#[derive(Clone, Copy)]
pub struct Binding {
    /// Variable name.
    pub variable: &'static str,
    /// Target field.
    pub setter: Setter,
}

/// Every variable the overlay reads, in application order.
pub static ENV_BINDINGS: &[Binding] = &[
    Binding {
        variable: "OTEL_SERVICE_NAME",
        setter: Setter::Text(|c, v| {
            c.env_resource.service_name = Some(v.clone());
            c.service_name = v;
        }),
    },
    Binding {
        variable: "OTEL_SERVICE_VERSION",
        setter: Setter::Text(|c, v| {
            c.env_resource.service_version = Some(v.clone());
            c.service_version = v;
        }),
    },
    Binding {
        variable: "OTEL_RESOURCE_ATTRIBUTES",
        setter: Setter::Text(|c, v| {
            c.resource_attributes = parse_resource_attributes(&v).into_iter().collect();
            c.env_resource.attributes = Some(v);
        }),
    },
    Binding {
        variable: "OTEL_LOG_LEVEL",
        setter: Setter::Text(|c, v| c.log_level = LogLevel::parse_lenient(&v)),
    },
    Binding {
        variable: "OTEL_PROPAGATORS",
        setter: Setter::List(|c, v| c.propagators = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_ENDPOINT",
        setter: Setter::Text(|c, v| c.exporter_endpoint = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_INSECURE",
        setter: Setter::Bool(|c, v| c.exporter_endpoint_insecure = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_PROTOCOL",
        setter: Setter::Text(|c, v| {
            c.exporter_protocol = Protocol::from(v.as_str()).specified().unwrap_or_default();
        }),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_HEADERS",
        setter: Setter::Map(|c, v| c.headers = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
        setter: Setter::Text(|c, v| c.traces_exporter_endpoint = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_TRACES_INSECURE",
        setter: Setter::Bool(|c, v| c.traces_exporter_endpoint_insecure = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_TRACES_PROTOCOL",
        setter: Setter::Text(|c, v| {
            c.traces_exporter_protocol = Protocol::from(v.as_str()).specified();
        }),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_TRACES_HEADERS",
        setter: Setter::Map(|c, v| c.traces_headers = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT",
        setter: Setter::Text(|c, v| c.metrics_exporter_endpoint = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_METRICS_INSECURE",
        setter: Setter::Bool(|c, v| c.metrics_exporter_endpoint_insecure = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_METRICS_PROTOCOL",
        setter: Setter::Text(|c, v| {
            c.metrics_exporter_protocol = Protocol::from(v.as_str()).specified();
        }),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_METRICS_HEADERS",
        setter: Setter::Map(|c, v| c.metrics_headers = v),
    },
    Binding {
        variable: "OTEL_EXPORTER_OTLP_METRICS_PERIOD",
        setter: Setter::Text(|c, v| c.metrics_reporting_period = v),
    },
    Binding {
        variable: "OTEL_METRICS_ENABLED",
        setter: Setter::Bool(|c, v| c.metrics_enabled = Enablement::from(v)),
    },
    Binding {
        variable: "OTEL_TRACES_ENABLED",
        setter: Setter::Bool(|c, v| c.traces_enabled = Enablement::from(v)),
    },
];

/// Applies every recognised variable from `env` to `config`.
///
/// Malformed booleans are reported to `logger`'s fatal sink; the first one
/// is returned after all other variables have been applied.
///
/// # Errors
///
/// Returns [`SdkError::Environment`] for a malformed boolean.
pub fn apply_environment(
    config: &mut Config,
    env: &dyn EnvSource,
    logger: &dyn Logger,
) -> Result<(), SdkError> {
    let mut first_error = None;

    for binding in ENV_BINDINGS {
        let Some(raw) = env.var(binding.variable) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }

        match binding.setter {
            Setter::Text(set) => set(config, raw.trim().to_string()),
            Setter::Map(set) => set(config, parse_map(&raw)),
            Setter::List(set) => set(config, parse_list(&raw)),
            Setter::Bool(set) => match parse_bool(&raw) {
                Some(value) => set(config, value),
                None => {
                    let err = SdkError::Environment {
                        variable: binding.variable,
                        value: raw,
                        reason: "expected a boolean".to_string(),
                    };
                    logger.fatal(&err.to_string());
                    first_error.get_or_insert(err);
                }
            },
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Parses boolean text the way `OTEL_*` flags are written.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Parses `key=value,key=value` text, skipping entries without `=`.
pub fn parse_map(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, _)| !k.trim().is_empty())
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Parses comma-separated text, dropping blank entries.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::testing::RecordingLogger;

    fn env(vars: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        vars.iter().copied().collect()
    }

    fn apply(
        vars: &[(&'static str, &'static str)],
    ) -> (Config, Result<(), SdkError>, RecordingLogger) {
        let mut config = Config::default();
        let logger = RecordingLogger::default();
        let result = apply_environment(&mut config, &env(vars), &logger);
        (config, result, logger)
    }

    #[test]
    fn test_parse_bool() {
        for text in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(text), Some(true), "{text}");
        }
        for text in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(text), Some(false), "{text}");
        }
        assert_eq!(parse_bool("yes"), None);
        assert_eq!(parse_bool("bleargh"), None);
    }

    #[test]
    fn test_parse_map() {
        let map = parse_map("api-key=secret, x-team = core,malformed,=empty-key");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("api-key").map(String::as_str), Some("secret"));
        assert_eq!(map.get("x-team").map(String::as_str), Some("core"));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("b3, baggage,,tracecontext "), vec!["b3", "baggage", "tracecontext"]);
    }

    #[test]
    fn test_environment_overwrites_options() {
        let mut config = Config {
            service_name: "from-code".to_string(),
            exporter_endpoint: "code-url".to_string(),
            ..Default::default()
        };
        let logger = RecordingLogger::default();
        let vars = env(&[
            ("OTEL_SERVICE_NAME", "from-env"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "env-url"),
        ]);

        apply_environment(&mut config, &vars, &logger).unwrap();

        assert_eq!(config.service_name, "from-env");
        assert_eq!(config.exporter_endpoint, "env-url");
        assert_eq!(config.env_resource.service_name.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let (config, result, _) = apply(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "  ")]);
        result.unwrap();
        assert_eq!(config.exporter_endpoint, "localhost");
    }

    #[test]
    fn test_malformed_bool_is_reported_and_returned() {
        let (config, result, logger) = apply(&[
            ("OTEL_EXPORTER_OTLP_METRICS_INSECURE", "bleargh"),
            ("OTEL_SERVICE_NAME", "still-applied"),
        ]);

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            SdkError::Environment {
                variable: "OTEL_EXPORTER_OTLP_METRICS_INSECURE",
                ..
            }
        ));
        assert!(logger.contains("environment error"));
        assert!(logger.contains("bleargh"));
        assert_eq!(config.service_name, "still-applied");
    }

    #[test]
    fn test_enablement_flags() {
        let (config, result, _) = apply(&[
            ("OTEL_TRACES_ENABLED", "false"),
            ("OTEL_METRICS_ENABLED", "True"),
        ]);
        result.unwrap();
        assert_eq!(config.traces_enabled, Enablement::Disabled);
        assert_eq!(config.metrics_enabled, Enablement::Enabled);
    }

    #[test]
    fn test_signal_protocols_and_headers() {
        let (config, result, _) = apply(&[
            ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"),
            ("OTEL_EXPORTER_OTLP_TRACES_PROTOCOL", "grpc"),
            ("OTEL_EXPORTER_OTLP_METRICS_PROTOCOL", "http/json"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "env-headers=present"),
            ("OTEL_EXPORTER_OTLP_TRACES_HEADERS", "env-traces-headers=present"),
            ("OTEL_EXPORTER_OTLP_METRICS_HEADERS", "env-metrics-headers=present"),
        ]);
        result.unwrap();

        assert_eq!(config.exporter_protocol, Protocol::HttpProtobuf);
        assert_eq!(config.traces_exporter_protocol, Some(Protocol::Grpc));
        assert_eq!(config.metrics_exporter_protocol, Some(Protocol::HttpJson));
        assert!(config.headers.contains_key("env-headers"));
        assert!(config.traces_headers.contains_key("env-traces-headers"));
        assert!(config.metrics_headers.contains_key("env-metrics-headers"));
    }

    #[test]
    fn test_blank_protocol_variables_are_ignored() {
        let mut config = Config {
            traces_exporter_protocol: Some(Protocol::HttpProtobuf),
            ..Default::default()
        };
        let logger = RecordingLogger::default();
        let vars = env(&[
            ("OTEL_EXPORTER_OTLP_PROTOCOL", ""),
            ("OTEL_EXPORTER_OTLP_TRACES_PROTOCOL", ""),
        ]);

        apply_environment(&mut config, &vars, &logger).unwrap();

        assert_eq!(config.exporter_protocol, Protocol::Grpc);
        assert_eq!(config.traces_exporter_protocol, Some(Protocol::HttpProtobuf));
        assert_eq!(config.metrics_exporter_protocol, None);
        assert_eq!(
            config.resolve_metrics_endpoint().unwrap().protocol,
            Protocol::Grpc
        );
    }

    #[test]
    fn test_resource_attributes_replace_code_map_and_are_captured() {
        let mut config = Config::default();
        config
            .resource_attributes
            .insert("from-code".to_string(), "value".to_string());
        let logger = RecordingLogger::default();
        let vars = env(&[(
            "OTEL_RESOURCE_ATTRIBUTES",
            "resource.clashing=env,resource.env=present",
        )]);

        apply_environment(&mut config, &vars, &logger).unwrap();

        assert!(!config.resource_attributes.contains_key("from-code"));
        assert_eq!(
            config.resource_attributes.get("resource.env").map(String::as_str),
            Some("present")
        );
        assert_eq!(
            config.env_resource.attributes.as_deref(),
            Some("resource.clashing=env,resource.env=present")
        );
    }

    #[test]
    fn test_log_level_and_propagators() {
        let (config, result, _) = apply(&[
            ("OTEL_LOG_LEVEL", "debug"),
            ("OTEL_PROPAGATORS", "b3,ottrace"),
            ("OTEL_EXPORTER_OTLP_METRICS_PERIOD", "5s"),
        ]);
        result.unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.propagators, vec!["b3", "ottrace"]);
        assert_eq!(config.metrics_reporting_period, "5s");
    }

    #[test]
    fn test_process_env_source() {
        temp_env::with_var("OTEL_SERVICE_NAME", Some("process-env"), || {
            assert_eq!(ProcessEnv.var("OTEL_SERVICE_NAME").as_deref(), Some("process-env"));
        });
        temp_env::with_var("OTEL_SERVICE_NAME", None::<&str>, || {
            assert!(ProcessEnv.var("OTEL_SERVICE_NAME").is_none());
        });
    }
}
