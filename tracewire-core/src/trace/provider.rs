use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::TraceContext;
use crate::error::CoreResult;

use super::processor::SpanProcessor;
use super::sampler::{AlwaysOn, Sampler, SamplingDecision};
use super::span::Span;
use super::types::{
    Attributes, FinishedSpan, InstrumentationScope, Resource, SpanContext, SpanId, SpanKind,
    SpanLimits, TraceId,
};

/// State shared by a provider, its tracers and every span they create.
pub(crate) struct TracerShared {
    processors: Vec<Arc<dyn SpanProcessor>>,
    sampler: Box<dyn Sampler>,
    pub(crate) resource: Resource,
    pub(crate) limits: SpanLimits,
    shut_down: AtomicBool,
}

impl TracerShared {
    pub(crate) fn on_end(&self, span: FinishedSpan) {
        if self.shut_down.load(Ordering::Acquire) {
            tracing::debug!(span = %span.name, "provider shut down; dropping finished span");
            return;
        }
        match self.processors.split_last() {
            Some((last, rest)) => {
                for p in rest {
                    p.on_end(span.clone());
                }
                last.on_end(span);
            }
            None => tracing::debug!(span = %span.name, "no span processor installed"),
        }
    }
}

/// Owns the tracing pipeline (sampler, processors, resource) and hands out tracers.
#[derive(Clone)]
pub struct TracerProvider {
    shared: Arc<TracerShared>,
}

pub struct TracerProviderBuilder {
    processors: Vec<Arc<dyn SpanProcessor>>,
    sampler: Option<Box<dyn Sampler>>,
    resource: Resource,
    limits: SpanLimits,
}

impl TracerProviderBuilder {
    pub fn with_processor(mut self, processor: impl SpanProcessor) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn with_shared_processor(mut self, processor: Arc<dyn SpanProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn with_sampler(mut self, sampler: impl Sampler) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_limits(mut self, limits: SpanLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> TracerProvider {
        TracerProvider {
            shared: Arc::new(TracerShared {
                processors: self.processors,
                sampler: self.sampler.unwrap_or_else(|| Box::new(AlwaysOn)),
                resource: self.resource,
                limits: self.limits,
                shut_down: AtomicBool::new(false),
            }),
        }
    }
}

impl TracerProvider {
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder {
            processors: Vec::new(),
            sampler: None,
            resource: Resource::default(),
            limits: SpanLimits::default(),
        }
    }

    pub fn tracer(&self, name: impl Into<String>) -> Tracer {
        self.scoped_tracer(InstrumentationScope {
            name: name.into(),
            version: None,
        })
    }

    pub fn versioned_tracer(&self, name: impl Into<String>, version: impl Into<String>) -> Tracer {
        self.scoped_tracer(InstrumentationScope {
            name: name.into(),
            version: Some(version.into()),
        })
    }

    fn scoped_tracer(&self, scope: InstrumentationScope) -> Tracer {
        Tracer {
            scope: Arc::new(scope),
            shared: self.shared.clone(),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.shared.resource
    }

    /// Push buffered spans to the exporters. Returns the first processor error.
    pub async fn force_flush(&self) -> CoreResult<()> {
        let mut first_err = None;
        for p in &self.shared.processors {
            if let Err(e) = p.force_flush().await {
                tracing::warn!(error = %e, "span processor flush failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Flush and shut down every processor. Later calls are no-ops.
    pub async fn shutdown(&self) -> CoreResult<()> {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_err = None;
        for p in &self.shared.processors {
            if let Err(e) = p.shutdown().await {
                tracing::warn!(error = %e, "span processor shutdown failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Cheap-clone span factory tagged with an instrumentation scope.
#[derive(Clone)]
pub struct Tracer {
    scope: Arc<InstrumentationScope>,
    shared: Arc<TracerShared>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer").field("scope", &self.scope).finish()
    }
}

impl Tracer {
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Start a span parented to the span active in the current context (root if none).
    pub fn start_span(&self, name: impl Into<String>, kind: SpanKind, attributes: Attributes) -> Span {
        let parent = TraceContext::current().active_span().copied();
        self.start_span_with_parent(name, kind, attributes, parent.as_ref())
    }

    pub fn start_span_with_parent(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Attributes,
        parent: Option<&SpanContext>,
    ) -> Span {
        let name = name.into();
        let trace_id = parent.map(|p| p.trace_id).unwrap_or_else(TraceId::random);
        let sampled = !self.shared.shut_down.load(Ordering::Acquire)
            && self
                .shared
                .sampler
                .should_sample(parent, trace_id, &name, kind, &attributes)
                == SamplingDecision::RecordAndSample;
        let context = SpanContext {
            trace_id,
            span_id: SpanId::random(),
            sampled,
        };
        tracing::debug!(
            span = %name,
            trace_id = %trace_id,
            span_id = %context.span_id,
            parent_span_id = ?parent.map(|p| p.span_id.to_string()),
            sampled,
            "span started"
        );
        let span = Span::start(
            name,
            kind,
            context,
            parent.map(|p| p.span_id),
            attributes,
            self.scope.clone(),
            self.shared.clone(),
        );
        if sampled {
            for p in &self.shared.processors {
                p.on_start(&span);
            }
        }
        span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::InMemoryExporter;
    use crate::test_util;
    use crate::trace::processor::SimpleSpanProcessor;
    use crate::trace::sampler::AlwaysOff;

    #[tokio::test]
    async fn child_inherits_trace_and_links_parent_id() {
        let (provider, tracer, exporter) = test_util::tracer();
        let root = tracer.start_span("root", SpanKind::Internal, Attributes::new());
        let child = tracer.start_span_with_parent(
            "child",
            SpanKind::Internal,
            Attributes::new(),
            Some(&root.context()),
        );
        assert_eq!(child.context().trace_id, root.context().trace_id);
        assert_eq!(child.parent_span_id(), Some(root.context().span_id));
        child.end();
        root.end();
        provider.force_flush().await.unwrap();
        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "child");
        assert_eq!(spans[0].parent_span_id, Some(spans[1].span_id));
        assert_eq!(spans[1].parent_span_id, None);
    }

    #[tokio::test]
    async fn unsampled_spans_are_not_exported() {
        let exporter = InMemoryExporter::default();
        let provider = TracerProvider::builder()
            .with_processor(SimpleSpanProcessor::new(exporter.clone()))
            .with_sampler(AlwaysOff)
            .build();
        let tracer = provider.tracer("test");
        let span = tracer.start_span("dropped", SpanKind::Client, Attributes::new());
        assert!(!span.is_recording());
        span.set_attribute("k", "v");
        span.end();
        assert!(span.is_ended());
        provider.force_flush().await.unwrap();
        assert!(exporter.finished_spans().is_empty());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_stops_export() {
        let (provider, tracer, exporter) = test_util::tracer();
        provider.shutdown().await.unwrap();
        provider.shutdown().await.unwrap();
        let span = tracer.start_span("late", SpanKind::Internal, Attributes::new());
        assert!(!span.is_recording());
        span.end();
        assert!(exporter.finished_spans().is_empty());
    }

    #[test]
    fn versioned_tracer_carries_scope() {
        let provider = TracerProvider::builder().build();
        let tracer = provider.versioned_tracer("tracewire-openai", "4.28.0");
        assert_eq!(tracer.scope().name, "tracewire-openai");
        assert_eq!(tracer.scope().version.as_deref(), Some("4.28.0"));
    }
}
