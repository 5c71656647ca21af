//! Integration test harness that runs a real export round trip:
//! - An OTLP/HTTP receiver on a loopback port
//! - Pipelines configured from options and `OTEL_*` variables
//!
//! The receiver only counts requests and checks their encoding; payload
//! decoding is left to the SDK's own tests.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use opentelemetry::KeyValue;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::{Span, Tracer, TracerProvider as _};
use otelconfig::{OtelConfigBuilder, Protocol, options};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use temp_env::with_vars_unset;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Received {
    traces: AtomicUsize,
    metrics: AtomicUsize,
    trace_bytes: AtomicUsize,
    uncompressed: AtomicUsize,
}

impl Received {
    fn record_encoding(&self, headers: &HeaderMap) {
        let gzip = headers
            .get(header::CONTENT_ENCODING)
            .is_some_and(|value| value == "gzip");
        if !gzip {
            self.uncompressed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn receive_traces(
    State(received): State<Arc<Received>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    received.traces.fetch_add(1, Ordering::SeqCst);
    received.trace_bytes.fetch_add(body.len(), Ordering::SeqCst);
    received.record_encoding(&headers);
    StatusCode::OK
}

async fn receive_metrics(
    State(received): State<Arc<Received>>,
    headers: HeaderMap,
    _body: Bytes,
) -> StatusCode {
    received.metrics.fetch_add(1, Ordering::SeqCst);
    received.record_encoding(&headers);
    StatusCode::OK
}

async fn start_receiver() -> (SocketAddr, Arc<Received>, JoinHandle<()>) {
    let received = Arc::new(Received::default());
    let app = Router::new()
        .route("/v1/traces", post(receive_traces))
        .route("/v1/metrics", post(receive_metrics))
        .with_state(received.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind receiver");
    let addr = listener.local_addr().expect("Receiver has no address");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, received, handle)
}

const CLEARED: [&str; 20] = [
    "OTEL_SERVICE_NAME",
    "OTEL_SERVICE_VERSION",
    "OTEL_RESOURCE_ATTRIBUTES",
    "OTEL_LOG_LEVEL",
    "OTEL_PROPAGATORS",
    "OTEL_EXPORTER_OTLP_ENDPOINT",
    "OTEL_EXPORTER_OTLP_INSECURE",
    "OTEL_EXPORTER_OTLP_PROTOCOL",
    "OTEL_EXPORTER_OTLP_HEADERS",
    "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
    "OTEL_EXPORTER_OTLP_TRACES_INSECURE",
    "OTEL_EXPORTER_OTLP_TRACES_PROTOCOL",
    "OTEL_EXPORTER_OTLP_TRACES_HEADERS",
    "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT",
    "OTEL_EXPORTER_OTLP_METRICS_INSECURE",
    "OTEL_EXPORTER_OTLP_METRICS_PROTOCOL",
    "OTEL_EXPORTER_OTLP_METRICS_HEADERS",
    "OTEL_EXPORTER_OTLP_METRICS_PERIOD",
    "OTEL_TRACES_ENABLED",
    "OTEL_METRICS_ENABLED",
];

#[tokio::test(flavor = "multi_thread")]
async fn test_http_protobuf_export_round_trip() {
    let (addr, received, server) = start_receiver().await;

    tokio::task::spawn_blocking(move || {
        with_vars_unset(CLEARED, || {
            let guard = OtelConfigBuilder::new()
                .with(options::service_name("harness"))
                .with(options::exporter_endpoint(format!("http://{addr}")))
                .with(options::exporter_protocol(Protocol::HttpProtobuf))
                .with(options::exporter_insecure(true))
                .with(options::metrics_reporting_period(Duration::from_secs(60)))
                .build()
                .expect("Failed to configure pipelines");

            assert_eq!(guard.pipeline_count(), 2);

            let tracer = guard
                .tracer_provider()
                .expect("Trace pipeline not started")
                .tracer("harness");
            let mut span = tracer.start("checkout");
            span.set_attribute(KeyValue::new("order.id", 42));
            span.end();

            let counter = guard
                .meter_provider()
                .expect("Metric pipeline not started")
                .meter("harness")
                .u64_counter("orders")
                .build();
            counter.add(1, &[KeyValue::new("status", "paid")]);

            guard.shutdown();
        });
    })
    .await
    .expect("Export task panicked");

    assert!(received.traces.load(Ordering::SeqCst) >= 1);
    assert!(received.trace_bytes.load(Ordering::SeqCst) > 0);
    assert!(received.metrics.load(Ordering::SeqCst) >= 1);
    assert_eq!(received.uncompressed.load(Ordering::SeqCst), 0);

    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_signal_sends_nothing() {
    let (addr, received, server) = start_receiver().await;

    tokio::task::spawn_blocking(move || {
        with_vars_unset(CLEARED, || {
            let guard = OtelConfigBuilder::new()
                .with(options::exporter_endpoint(format!("http://{addr}")))
                .with(options::exporter_protocol("http/protobuf"))
                .with(options::exporter_insecure(true))
                .with(options::traces_enabled(false))
                .build()
                .expect("Failed to configure pipelines");

            assert!(guard.tracer_provider().is_none());
            let counter = guard
                .meter_provider()
                .expect("Metric pipeline not started")
                .meter("harness")
                .u64_counter("ticks")
                .build();
            counter.add(3, &[]);

            guard.shutdown();
        });
    })
    .await
    .expect("Export task panicked");

    assert_eq!(received.traces.load(Ordering::SeqCst), 0);
    assert!(received.metrics.load(Ordering::SeqCst) >= 1);

    server.abort();
}
