//! OTLP pipelines.
//!
//! Builds gRPC (tonic) or HTTP/protobuf exporters from resolved settings and
//! installs the resulting providers globally. Every export is gzip-compressed.

use crate::config::Protocol;
use crate::endpoint::ResolvedEndpoint;
use crate::error::SetupError;
use crate::pipeline::{MetricPipelineConfig, Pipeline, PipelineFactory, TracePipelineConfig};
use opentelemetry::global;
use opentelemetry_otlp::{
    Compression, MetricExporter, SpanExporter, WithExportConfig, WithHttpConfig, WithTonicConfig,
};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::collections::{BTreeMap, HashMap};
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::ClientTlsConfig;
use url::Url;

const TRACES_PATH: &str = "/v1/traces";
const METRICS_PATH: &str = "/v1/metrics";

/// Default [`PipelineFactory`] exporting over OTLP.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtlpPipelineFactory;

impl PipelineFactory for OtlpPipelineFactory {
    fn traces(&self, config: TracePipelineConfig) -> Result<Pipeline, SetupError> {
        let TracePipelineConfig {
            endpoint,
            headers,
            resource,
            extras,
        } = config;

        let with_default_processor = extras.default_span_processor;
        let mut builder = extras.install(SdkTracerProvider::builder().with_resource(resource));
        if with_default_processor {
            builder = builder.with_batch_exporter(build_span_exporter(&endpoint, &headers)?);
        }

        let provider = builder.build();
        global::set_tracer_provider(provider.clone());
        tracing::debug!(
            target: "otelconfig",
            endpoint = %endpoint.endpoint,
            protocol = %endpoint.protocol,
            "trace pipeline started"
        );
        Ok(Pipeline::from_tracer_provider(provider))
    }

    fn metrics(&self, config: MetricPipelineConfig) -> Result<Pipeline, SetupError> {
        let exporter = build_metric_exporter(&config.endpoint, &config.headers)?;
        let reader = PeriodicReader::builder(exporter)
            .with_interval(config.reporting_period)
            .build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(config.resource)
            .build();
        global::set_meter_provider(provider.clone());
        tracing::debug!(
            target: "otelconfig",
            endpoint = %config.endpoint.endpoint,
            protocol = %config.endpoint.protocol,
            period = ?config.reporting_period,
            "metric pipeline started"
        );
        Ok(Pipeline::from_meter_provider(provider))
    }
}

fn build_span_exporter(
    endpoint: &ResolvedEndpoint,
    headers: &BTreeMap<String, String>,
) -> Result<SpanExporter, SetupError> {
    match &endpoint.protocol {
        Protocol::Grpc => {
            let mut builder = SpanExporter::builder()
                .with_tonic()
                .with_endpoint(grpc_url(endpoint))
                .with_compression(Compression::Gzip);
            if !headers.is_empty() {
                builder = builder.with_metadata(metadata(headers));
            }
            if !endpoint.insecure {
                builder = builder.with_tls_config(ClientTlsConfig::new().with_enabled_roots());
            }
            builder.build().map_err(SetupError::TraceExporter)
        }
        Protocol::HttpProtobuf => {
            let mut builder = SpanExporter::builder()
                .with_http()
                .with_endpoint(http_url(endpoint, TRACES_PATH))
                .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                .with_compression(Compression::Gzip);
            if !headers.is_empty() {
                builder = builder.with_headers(to_hash_map(headers));
            }
            builder.build().map_err(SetupError::TraceExporter)
        }
        other => Err(unsupported(other)),
    }
}

fn build_metric_exporter(
    endpoint: &ResolvedEndpoint,
    headers: &BTreeMap<String, String>,
) -> Result<MetricExporter, SetupError> {
    match &endpoint.protocol {
        Protocol::Grpc => {
            let mut builder = MetricExporter::builder()
                .with_tonic()
                .with_endpoint(grpc_url(endpoint))
                .with_compression(Compression::Gzip);
            if !headers.is_empty() {
                builder = builder.with_metadata(metadata(headers));
            }
            if !endpoint.insecure {
                builder = builder.with_tls_config(ClientTlsConfig::new().with_enabled_roots());
            }
            builder.build().map_err(SetupError::MetricExporter)
        }
        Protocol::HttpProtobuf => {
            let mut builder = MetricExporter::builder()
                .with_http()
                .with_endpoint(http_url(endpoint, METRICS_PATH))
                .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                .with_compression(Compression::Gzip);
            if !headers.is_empty() {
                builder = builder.with_headers(to_hash_map(headers));
            }
            builder.build().map_err(SetupError::MetricExporter)
        }
        other => Err(unsupported(other)),
    }
}

fn unsupported(protocol: &Protocol) -> SetupError {
    SetupError::Other(format!("'{protocol}' is not a supported protocol").into())
}

/// Tonic needs a scheme to pick between plaintext and TLS.
fn grpc_url(endpoint: &ResolvedEndpoint) -> String {
    let scheme = if endpoint.insecure { "http" } else { "https" };
    format!("{scheme}://{}", endpoint.endpoint)
}

/// Full signal URL for the HTTP exporter.
///
/// An endpoint that already names a path is used verbatim.
fn http_url(endpoint: &ResolvedEndpoint, signal_path: &str) -> String {
    let with_scheme = if endpoint.endpoint.contains("://") {
        endpoint.endpoint.clone()
    } else {
        let scheme = if endpoint.insecure { "http" } else { "https" };
        format!("{scheme}://{}", endpoint.endpoint)
    };

    match Url::parse(&with_scheme) {
        Ok(url) if url.path() == "/" || url.path().is_empty() => {
            format!("{}{signal_path}", with_scheme.trim_end_matches('/'))
        }
        _ => with_scheme,
    }
}

fn metadata(headers: &BTreeMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (key, value) in headers {
        if let (Ok(k), Ok(v)) = (
            key.parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            metadata.insert(k, v);
        } else {
            tracing::warn!(
                target: "otelconfig",
                header = %key,
                "skipping header that is not valid gRPC metadata"
            );
        }
    }
    metadata
}

fn to_hash_map(headers: &BTreeMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
