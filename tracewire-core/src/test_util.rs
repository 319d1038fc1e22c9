//! Fixtures shared by unit tests.

use crate::exporter::InMemoryExporter;
use crate::instrumentation::Interceptor;
use crate::trace::{
    Attributes, FinishedSpan, InstrumentationScope, Resource, SimpleSpanProcessor, SpanId,
    SpanKind, SpanLimits, SpanStatus, TraceId, Tracer, TracerProvider,
};

pub fn tracer() -> (TracerProvider, Tracer, InMemoryExporter) {
    tracer_with_limits(SpanLimits::default())
}

pub fn tracer_with_limits(limits: SpanLimits) -> (TracerProvider, Tracer, InMemoryExporter) {
    let exporter = InMemoryExporter::default();
    let provider = TracerProvider::builder()
        .with_processor(SimpleSpanProcessor::new(exporter.clone()))
        .with_limits(limits)
        .build();
    let tracer = provider.tracer("tracewire-test");
    (provider, tracer, exporter)
}

pub fn interceptor() -> (TracerProvider, Interceptor, InMemoryExporter) {
    let (provider, tracer, exporter) = tracer();
    (provider, Interceptor::new(tracer), exporter)
}

/// A finished span as exporters receive it.
pub fn finished_span(name: &str) -> FinishedSpan {
    let mut attributes = Attributes::new();
    attributes.insert("llm.model".into(), "gpt-4o".into());
    FinishedSpan {
        trace_id: TraceId::random(),
        span_id: SpanId::random(),
        parent_span_id: None,
        name: name.to_string(),
        kind: SpanKind::Client,
        start_time_unix_nano: 1_700_000_000_000_000_000,
        end_time_unix_nano: 1_700_000_000_250_000_000,
        duration_nanos: 250_000_000,
        attributes,
        status: SpanStatus::Ok,
        events: Vec::new(),
        links: Vec::new(),
        resource: Resource::default(),
        instrumentation_scope: InstrumentationScope {
            name: "tracewire-test".into(),
            version: None,
        },
        dropped_attributes_count: 0,
        dropped_events_count: 0,
        dropped_links_count: 0,
        ended: true,
    }
}
