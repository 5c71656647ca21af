//! Propagator selection.
//!
//! Propagators are named by the identifiers used in `OTEL_PROPAGATORS`. The
//! [`PropagatorRegistry`] maps identifiers to constructors and composes the
//! selected ones, in list order, into the process-wide propagator.
//!
//! `b3` is Zipkin's propagator injecting the multi-header form; it extracts
//! either form. `ottrace` has no upstream crate and lives here.

use crate::error::SdkError;
use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::{Context, global};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_zipkin::{B3Encoding, Propagator as B3Propagator};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A type-erased propagator.
pub type BoxedPropagator = Box<dyn TextMapPropagator + Send + Sync>;

type Constructor = Arc<dyn Fn() -> BoxedPropagator + Send + Sync>;

/// Identifier → propagator lookup.
#[derive(Clone)]
pub struct PropagatorRegistry {
    entries: Vec<(String, Constructor)>,
}

impl Default for PropagatorRegistry {
    fn default() -> Self {
        Self::empty()
            .register("b3", || {
                Box::new(B3Propagator::with_encoding(B3Encoding::MultipleHeader))
            })
            .register("baggage", || Box::new(BaggagePropagator::new()))
            .register("tracecontext", || Box::new(TraceContextPropagator::new()))
            .register("ottrace", || Box::new(OtTracePropagator::new()))
    }
}

impl PropagatorRegistry {
    /// A registry with no identifiers.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds or replaces an identifier.
    pub fn register(
        mut self,
        id: impl Into<String>,
        constructor: impl Fn() -> BoxedPropagator + Send + Sync + 'static,
    ) -> Self {
        let id = id.into();
        let constructor: Constructor = Arc::new(constructor);
        match self.entries.iter_mut().find(|(name, _)| *name == id) {
            Some(entry) => entry.1 = constructor,
            None => self.entries.push((id, constructor)),
        }
        self
    }

    /// Registered identifiers, comma-separated, in registration order.
    pub fn supported(&self) -> String {
        self.entries
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Builds the propagators named by `ids`.
    ///
    /// Unknown identifiers are skipped and repeats collapse to their first
    /// occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::InvalidConfiguration`] when nothing is left.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<BoxedPropagator>, SdkError> {
        let mut seen = HashSet::new();
        let propagators: Vec<BoxedPropagator> = ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| seen.insert(*id))
            .filter_map(|id| {
                self.entries
                    .iter()
                    .find(|(name, _)| name == id)
                    .map(|(_, constructor)| constructor())
            })
            .collect();

        if propagators.is_empty() {
            return Err(SdkError::InvalidConfiguration(format!(
                "unsupported propagators. Supported options: {}",
                self.supported()
            )));
        }
        Ok(propagators)
    }

    /// Composes the propagators named by `ids`.
    ///
    /// # Errors
    ///
    /// See [`PropagatorRegistry::resolve`].
    pub fn composite(&self, ids: &[String]) -> Result<TextMapCompositePropagator, SdkError> {
        self.resolve(ids).map(TextMapCompositePropagator::new)
    }

    /// Installs the composite as the global propagator.
    ///
    /// # Errors
    ///
    /// See [`PropagatorRegistry::resolve`].
    pub fn install(&self, ids: &[String]) -> Result<(), SdkError> {
        global::set_text_map_propagator(self.composite(ids)?);
        Ok(())
    }
}

impl fmt::Debug for PropagatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagatorRegistry")
            .field("supported", &self.supported())
            .finish()
    }
}

fn parse_trace_id(hex: &str) -> Option<TraceId> {
    if !(hex.len() == 16 || hex.len() == 32) || hex.to_ascii_lowercase() != hex {
        return None;
    }
    let value = u128::from_str_radix(hex, 16).ok()?;
    let id = TraceId::from_bytes(value.to_be_bytes());
    (id != TraceId::INVALID).then_some(id)
}

fn parse_span_id(hex: &str) -> Option<SpanId> {
    if hex.len() != 16 || hex.to_ascii_lowercase() != hex {
        return None;
    }
    let value = u64::from_str_radix(hex, 16).ok()?;
    let id = SpanId::from_bytes(value.to_be_bytes());
    (id != SpanId::INVALID).then_some(id)
}

fn remote_context(trace_id: TraceId, span_id: SpanId, flags: TraceFlags) -> SpanContext {
    SpanContext::new(trace_id, span_id, flags, true, TraceState::default())
}

const OT_TRACE_ID_HEADER: &str = "ot-tracer-traceid";
const OT_SPAN_ID_HEADER: &str = "ot-tracer-spanid";
const OT_SAMPLED_HEADER: &str = "ot-tracer-sampled";

/// OpenTracing (`ot-tracer-*`) propagation.
///
/// Trace ids are injected as their low 64 bits; 16-character ids are
/// zero-extended on extraction.
#[derive(Debug, Clone)]
pub struct OtTracePropagator {
    fields: [String; 3],
}

impl Default for OtTracePropagator {
    fn default() -> Self {
        Self::new()
    }
}

impl OtTracePropagator {
    /// Creates an OpenTracing propagator.
    pub fn new() -> Self {
        Self {
            fields: [
                OT_TRACE_ID_HEADER.to_string(),
                OT_SPAN_ID_HEADER.to_string(),
                OT_SAMPLED_HEADER.to_string(),
            ],
        }
    }

    fn extract_span_context(extractor: &dyn Extractor) -> Option<SpanContext> {
        let trace_id = parse_trace_id(extractor.get(OT_TRACE_ID_HEADER)?)?;
        let span_id = parse_span_id(extractor.get(OT_SPAN_ID_HEADER)?)?;
        let flags = match extractor.get(OT_SAMPLED_HEADER) {
            Some("true") => TraceFlags::SAMPLED,
            Some("false") | None => TraceFlags::default(),
            Some(_) => return None,
        };
        Some(remote_context(trace_id, span_id, flags))
    }
}

impl TextMapPropagator for OtTracePropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let span = cx.span();
        let span_context = span.span_context();
        if !span_context.is_valid() {
            return;
        }

        let trace_id = span_context.trace_id().to_string();
        let low_bits = &trace_id[trace_id.len() - 16..];
        injector.set(OT_TRACE_ID_HEADER, low_bits.to_string());
        injector.set(OT_SPAN_ID_HEADER, span_context.span_id().to_string());
        injector.set(
            OT_SAMPLED_HEADER,
            span_context.is_sampled().to_string(),
        );
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        match Self::extract_span_context(extractor) {
            Some(span_context) => cx.with_remote_span_context(span_context),
            None => cx.clone(),
        }
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&self.fields)
    }
}
