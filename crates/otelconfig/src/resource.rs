//! Resource assembly.
//!
//! The resource is folded from nine ordered contributions; a later
//! contribution wins on key collision. Every contribution may carry a schema
//! URL, and two different non-empty schema URLs cannot be merged.
//!
//! | Step | Contribution |
//! |------|--------------|
//! | 1 | semantic conventions schema URL |
//! | 2 | code resource attributes (non-empty values only) |
//! | 3 | caller [`ResourceOption`]s, in order |
//! | 4 | `service.name` when non-empty |
//! | 5 | `service.version` when non-empty |
//! | 6 | `host.name` |
//! | 7 | `telemetry.sdk.*` identity |
//! | 8 | `OTEL_RESOURCE_ATTRIBUTES` and `OTEL_SERVICE_NAME`, empty values included |
//! | 9 | `OTEL_SERVICE_VERSION` when non-blank |

use crate::config::Config;
use crate::error::{BoxError, ResourceError};
use opentelemetry::{Key, KeyValue, Value};
use opentelemetry_sdk::resource::{Resource, ResourceDetector};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use opentelemetry_semantic_conventions::resource as semconv;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Value of `telemetry.sdk.name`.
pub const SDK_NAME: &str = "otelconfig";
/// Value of `telemetry.sdk.language`.
pub const SDK_LANGUAGE: &str = "rust";
/// Value of `telemetry.sdk.version`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A fallible resource detector.
pub trait Detect: Send + Sync {
    /// Returns the attributes this detector contributes.
    fn detect(&self) -> Result<Resource, BoxError>;
}

impl<F> Detect for F
where
    F: Fn() -> Result<Resource, BoxError> + Send + Sync,
{
    fn detect(&self) -> Result<Resource, BoxError> {
        self()
    }
}

enum Source {
    Attributes(Vec<KeyValue>),
    SchemaUrl(String),
    Detector(Box<dyn Detect>),
    Sdk(Box<dyn ResourceDetector + Send + Sync>),
}

/// One caller contribution to the resource.
pub struct ResourceOption(Source);

impl ResourceOption {
    /// Static attributes.
    pub fn attributes(attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        Self(Source::Attributes(attributes.into_iter().collect()))
    }

    /// A schema URL with no attributes.
    pub fn schema_url(url: impl Into<String>) -> Self {
        Self(Source::SchemaUrl(url.into()))
    }

    /// A detector that may fail; failure aborts resolution.
    pub fn detector(detector: impl Detect + 'static) -> Self {
        Self(Source::Detector(Box::new(detector)))
    }

    /// An SDK [`ResourceDetector`], which cannot fail.
    pub fn sdk_detector(detector: impl ResourceDetector + Send + Sync + 'static) -> Self {
        Self(Source::Sdk(Box::new(detector)))
    }

    fn contribute(&self) -> Result<Contribution, ResourceError> {
        match &self.0 {
            Source::Attributes(attributes) => Ok(Contribution::attributes(attributes.clone())),
            Source::SchemaUrl(url) => Ok(Contribution {
                schema_url: Some(url.clone()),
                attributes: Vec::new(),
            }),
            Source::Detector(detector) => detector
                .detect()
                .map(|resource| Contribution::from_resource(&resource))
                .map_err(ResourceError::Detector),
            Source::Sdk(detector) => Ok(Contribution::from_resource(&detector.detect())),
        }
    }
}

impl fmt::Debug for ResourceOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Source::Attributes(attributes) => {
                f.debug_tuple("Attributes").field(attributes).finish()
            }
            Source::SchemaUrl(url) => f.debug_tuple("SchemaUrl").field(url).finish(),
            Source::Detector(_) => f.write_str("Detector"),
            Source::Sdk(_) => f.write_str("SdkDetector"),
        }
    }
}

struct Contribution {
    schema_url: Option<String>,
    attributes: Vec<KeyValue>,
}

impl Contribution {
    fn attributes(attributes: Vec<KeyValue>) -> Self {
        Self {
            schema_url: None,
            attributes,
        }
    }

    fn from_resource(resource: &Resource) -> Self {
        Self {
            schema_url: resource.schema_url().map(str::to_string),
            attributes: resource
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
                .collect(),
        }
    }
}

#[derive(Default)]
struct Accumulator {
    schema_url: Option<String>,
    order: Vec<Key>,
    values: HashMap<Key, Value>,
}

impl Accumulator {
    fn merge(&mut self, contribution: Contribution) -> Result<(), ResourceError> {
        if let Some(incoming) = contribution.schema_url.filter(|url| !url.is_empty()) {
            match &self.schema_url {
                Some(existing) if *existing != incoming => {
                    return Err(ResourceError::ConflictingSchemaUrl {
                        existing: existing.clone(),
                        incoming,
                    });
                }
                Some(_) => {}
                None => self.schema_url = Some(incoming),
            }
        }

        for KeyValue { key, value, .. } in contribution.attributes {
            if self.values.insert(key.clone(), value).is_none() {
                self.order.push(key);
            }
        }
        Ok(())
    }

    fn build(mut self) -> Resource {
        let attributes: Vec<KeyValue> = self
            .order
            .into_iter()
            .filter_map(|key| {
                let value = self.values.remove(&key)?;
                Some(KeyValue::new(key, value))
            })
            .collect();

        match self.schema_url {
            Some(url) => Resource::builder_empty()
                .with_schema_url(attributes, Cow::Owned(url))
                .build(),
            None => Resource::builder_empty().with_attributes(attributes).build(),
        }
    }
}

/// Builds the resource for a configuration record.
///
/// # Errors
///
/// Returns [`ResourceError`] when a detector fails or two contributions
/// declare different schema URLs.
pub fn build_resource(config: &Config) -> Result<Resource, ResourceError> {
    let mut acc = Accumulator::default();

    acc.merge(Contribution {
        schema_url: Some(SCHEMA_URL.to_string()),
        attributes: Vec::new(),
    })?;

    acc.merge(Contribution::attributes(
        config
            .resource_attributes
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
            .collect(),
    ))?;

    for option in &config.resource_options {
        acc.merge(option.contribute()?)?;
    }

    let mut identity = Vec::new();
    if !config.service_name.is_empty() {
        identity.push(KeyValue::new(semconv::SERVICE_NAME, config.service_name.clone()));
    }
    if !config.service_version.is_empty() {
        identity.push(KeyValue::new(
            semconv::SERVICE_VERSION,
            config.service_version.clone(),
        ));
    }
    acc.merge(Contribution::attributes(identity))?;

    acc.merge(Contribution::attributes(detect_host()))?;

    acc.merge(Contribution::attributes(vec![
        KeyValue::new(semconv::TELEMETRY_SDK_NAME, SDK_NAME),
        KeyValue::new(semconv::TELEMETRY_SDK_LANGUAGE, SDK_LANGUAGE),
        KeyValue::new(semconv::TELEMETRY_SDK_VERSION, SDK_VERSION),
    ]))?;

    let env = &config.env_resource;
    let mut from_env: Vec<KeyValue> = env
        .attributes
        .as_deref()
        .map(parse_resource_attributes)
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| KeyValue::new(k, v))
        .collect();
    if let Some(name) = non_blank(env.service_name.as_deref()) {
        from_env.push(KeyValue::new(semconv::SERVICE_NAME, name.to_string()));
    }
    acc.merge(Contribution::attributes(from_env))?;

    if let Some(version) = non_blank(env.service_version.as_deref()) {
        acc.merge(Contribution::attributes(vec![KeyValue::new(
            semconv::SERVICE_VERSION,
            version.to_string(),
        )]))?;
    }

    Ok(acc.build())
}

/// Parses `OTEL_RESOURCE_ATTRIBUTES` text.
///
/// Entries are `key=value` pairs separated by `,`. Values are
/// percent-decoded and may be empty; entries without `=` or with an empty
/// key are skipped.
pub fn parse_resource_attributes(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = percent_decode_str(value.trim()).decode_utf8_lossy();
            Some((key.to_string(), value.into_owned()))
        })
        .collect()
}

fn detect_host() -> Vec<KeyValue> {
    sysinfo::System::host_name()
        .filter(|name| !name.is_empty())
        .map(|name| vec![KeyValue::new(semconv::HOST_NAME, name)])
        .unwrap_or_default()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvResource;
    use std::collections::BTreeMap;

    fn get_string_value(resource: &Resource, key: &'static str) -> Option<String> {
        resource.get(&Key::from_static_str(key)).map(|v| v.to_string())
    }

    fn config_with_attributes(attributes: &[(&str, &str)]) -> Config {
        Config {
            resource_attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sdk_identity_and_schema() {
        let resource = build_resource(&Config::default()).unwrap();

        assert_eq!(resource.schema_url(), Some(SCHEMA_URL));
        assert_eq!(
            get_string_value(&resource, semconv::TELEMETRY_SDK_NAME),
            Some("otelconfig".to_string())
        );
        assert_eq!(
            get_string_value(&resource, semconv::TELEMETRY_SDK_LANGUAGE),
            Some("rust".to_string())
        );
        assert_eq!(
            get_string_value(&resource, semconv::TELEMETRY_SDK_VERSION),
            Some(SDK_VERSION.to_string())
        );
        assert_eq!(
            get_string_value(&resource, semconv::SERVICE_VERSION),
            Some("unknown".to_string())
        );
    }

    #[test]
    fn test_empty_service_name_is_omitted() {
        let resource = build_resource(&Config::default()).unwrap();
        assert!(get_string_value(&resource, semconv::SERVICE_NAME).is_none());
    }

    #[test]
    fn test_code_attributes_drop_empty_values() {
        let config = config_with_attributes(&[("attr1", "value1"), ("attr2", "")]);
        let resource = build_resource(&config).unwrap();

        assert_eq!(
            get_string_value(&resource, "attr1"),
            Some("value1".to_string())
        );
        assert!(get_string_value(&resource, "attr2").is_none());
    }

    #[test]
    fn test_options_override_code_attributes_in_order() {
        let mut config = config_with_attributes(&[("shared", "code")]);
        config.resource_options = vec![
            ResourceOption::attributes([KeyValue::new("shared", "first")]),
            ResourceOption::attributes([KeyValue::new("shared", "second")]),
        ];

        let resource = build_resource(&config).unwrap();
        assert_eq!(
            get_string_value(&resource, "shared"),
            Some("second".to_string())
        );
    }

    #[test]
    fn test_service_name_beats_option_attribute() {
        let config = Config {
            service_name: "from-code".to_string(),
            resource_options: vec![ResourceOption::attributes([KeyValue::new(
                semconv::SERVICE_NAME,
                "from-option",
            )])],
            ..Default::default()
        };

        let resource = build_resource(&config).unwrap();
        assert_eq!(
            get_string_value(&resource, semconv::SERVICE_NAME),
            Some("from-code".to_string())
        );
    }

    #[test]
    fn test_env_attribute_wins_even_when_empty() {
        let mut config = config_with_attributes(&[("attr1", "code-value")]);
        config.env_resource = EnvResource {
            attributes: Some("attr1=,attr2=env-value".to_string()),
            ..Default::default()
        };

        let resource = build_resource(&config).unwrap();
        assert_eq!(get_string_value(&resource, "attr1"), Some(String::new()));
        assert_eq!(
            get_string_value(&resource, "attr2"),
            Some("env-value".to_string())
        );
    }

    #[test]
    fn test_env_service_name_overrides_attribute_string() {
        let config = Config {
            service_name: "from-code".to_string(),
            env_resource: EnvResource {
                attributes: Some("service.name=from-attributes".to_string()),
                service_name: Some("from-env".to_string()),
                service_version: None,
            },
            ..Default::default()
        };

        let resource = build_resource(&config).unwrap();
        assert_eq!(
            get_string_value(&resource, semconv::SERVICE_NAME),
            Some("from-env".to_string())
        );
    }

    #[test]
    fn test_env_service_version_wins_over_attribute_string() {
        let config = Config {
            env_resource: EnvResource {
                attributes: Some("service.version=1.0.0".to_string()),
                service_name: None,
                service_version: Some("2.0.0".to_string()),
            },
            ..Default::default()
        };

        let resource = build_resource(&config).unwrap();
        assert_eq!(
            get_string_value(&resource, semconv::SERVICE_VERSION),
            Some("2.0.0".to_string())
        );
    }

    #[test]
    fn test_blank_env_service_version_is_ignored() {
        let config = Config {
            service_version: "1.2.3".to_string(),
            env_resource: EnvResource {
                service_version: Some("  ".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let resource = build_resource(&config).unwrap();
        assert_eq!(
            get_string_value(&resource, semconv::SERVICE_VERSION),
            Some("1.2.3".to_string())
        );
    }

    #[test]
    fn test_conflicting_schema_url() {
        let config = Config {
            resource_options: vec![ResourceOption::schema_url(
                "https://opentelemetry.io/schemas/0.0.1",
            )],
            ..Default::default()
        };

        let err = build_resource(&config).unwrap_err();
        assert!(err.to_string().contains("conflicting Schema URL"));
    }

    #[test]
    fn test_matching_schema_url_merges() {
        let config = Config {
            resource_options: vec![ResourceOption::schema_url(SCHEMA_URL)],
            ..Default::default()
        };
        assert!(build_resource(&config).is_ok());
    }

    #[test]
    fn test_faulty_detector() {
        let config = Config {
            resource_options: vec![ResourceOption::detector(|| -> Result<Resource, BoxError> {
                Err("detector unavailable".into())
            })],
            ..Default::default()
        };

        let err = build_resource(&config).unwrap_err();
        assert!(matches!(err, ResourceError::Detector(_)));
        assert!(err.to_string().contains("detector unavailable"));
    }

    #[derive(Debug)]
    struct StaticDetector;

    impl ResourceDetector for StaticDetector {
        fn detect(&self) -> Resource {
            Resource::builder_empty()
                .with_attributes([KeyValue::new("detected", "yes")])
                .build()
        }
    }

    #[test]
    fn test_sdk_detector_contributes() {
        let config = Config {
            resource_options: vec![ResourceOption::sdk_detector(StaticDetector)],
            ..Default::default()
        };

        let resource = build_resource(&config).unwrap();
        assert_eq!(
            get_string_value(&resource, "detected"),
            Some("yes".to_string())
        );
    }

    #[test]
    fn test_parse_resource_attributes() {
        let parsed = parse_resource_attributes("a=1, b = two ,malformed,=skip,c=hello%20world,d=");
        assert_eq!(
            parsed,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string()),
                ("c".to_string(), "hello world".to_string()),
                ("d".to_string(), String::new()),
            ]
        );
    }
}
