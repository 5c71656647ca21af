//! otelconfig workspace - end-to-end tests for layered OpenTelemetry configuration.
//!
//! This is a virtual package that provides workspace-level integration tests.
//! The actual functionality is provided by the workspace member crates:
//!
//! - `otelconfig`: Resolves exporter settings and starts OTLP trace and metric pipelines
