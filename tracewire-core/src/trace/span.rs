use std::sync::Arc;

use parking_lot::Mutex;

use super::keys;
use super::provider::TracerShared;
use super::types::{
    AttributeValue, Attributes, FinishedSpan, InstrumentationScope, Link, SpanContext,
    SpanEvent, SpanId, SpanKind, SpanLimits, SpanStatus, now_unix_nanos,
};

/// Handle to an in-flight span. Clones share the same span.
///
/// Mutation is ignored once the span has ended or when the span was not sampled.
/// `end` hands the span to the pipeline on its first call only.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

struct SpanInner {
    context: SpanContext,
    parent_span_id: Option<SpanId>,
    kind: SpanKind,
    start_time: u64,
    scope: Arc<InstrumentationScope>,
    shared: Arc<TracerShared>,
    state: Mutex<SpanState>,
}

#[derive(Default)]
struct SpanState {
    name: String,
    ended: bool,
    status: SpanStatus,
    attributes: Attributes,
    events: Vec<SpanEvent>,
    links: Vec<Link>,
    dropped_attributes: u32,
    dropped_events: u32,
    dropped_links: u32,
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("context", &self.inner.context)
            .field("parent_span_id", &self.inner.parent_span_id)
            .field("kind", &self.inner.kind)
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl Span {
    pub(crate) fn start(
        name: String,
        kind: SpanKind,
        context: SpanContext,
        parent_span_id: Option<SpanId>,
        attributes: Attributes,
        scope: Arc<InstrumentationScope>,
        shared: Arc<TracerShared>,
    ) -> Self {
        let span = Self {
            inner: Arc::new(SpanInner {
                context,
                parent_span_id,
                kind,
                start_time: now_unix_nanos(),
                scope,
                shared,
                state: Mutex::new(SpanState {
                    name,
                    ..Default::default()
                }),
            }),
        };
        span.set_attributes(attributes);
        span
    }

    pub fn context(&self) -> SpanContext {
        self.inner.context
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.parent_span_id
    }

    pub fn is_recording(&self) -> bool {
        self.inner.context.sampled
    }

    pub fn is_ended(&self) -> bool {
        self.inner.state.lock().ended
    }

    pub fn status(&self) -> SpanStatus {
        self.inner.state.lock().status.clone()
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.inner.state.lock().attributes.get(key).cloned()
    }

    pub fn update_name(&self, name: impl Into<String>) {
        self.mutate(|state, _| state.name = name.into());
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        self.mutate(|state, limits| {
            if state.attributes.len() >= limits.max_attributes && !state.attributes.contains_key(&key) {
                state.dropped_attributes = state.dropped_attributes.saturating_add(1);
                return;
            }
            state.attributes.insert(key, value);
        });
    }

    /// Merge attributes; later keys overwrite earlier ones.
    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = (String, AttributeValue)>) {
        for (k, v) in attributes {
            self.set_attribute(k, v);
        }
    }

    pub fn add_event(&self, name: impl Into<String>, attributes: Attributes) {
        let event = SpanEvent {
            name: name.into(),
            time_unix_nano: now_unix_nanos(),
            attributes,
        };
        self.mutate(|state, limits| {
            if state.events.len() >= limits.max_events {
                state.dropped_events = state.dropped_events.saturating_add(1);
                return;
            }
            state.events.push(event);
        });
    }

    pub fn add_link(&self, context: SpanContext, attributes: Attributes) {
        self.mutate(|state, limits| {
            if state.links.len() >= limits.max_links {
                state.dropped_links = state.dropped_links.saturating_add(1);
                return;
            }
            state.links.push(Link {
                trace_id: context.trace_id,
                span_id: context.span_id,
                attributes,
            });
        });
    }

    /// Record an `exception` event carrying the error's type and message.
    pub fn record_exception<E>(&self, error: &E)
    where
        E: std::error::Error + ?Sized,
    {
        self.record_exception_message(std::any::type_name::<E>(), &error.to_string());
    }

    /// Same as `record_exception` for error values that only implement `Display`.
    pub fn record_exception_message(&self, error_type: &str, message: &str) {
        let mut attributes = Attributes::new();
        attributes.insert(keys::EXCEPTION_TYPE.into(), error_type.into());
        attributes.insert(keys::EXCEPTION_MESSAGE.into(), message.into());
        self.add_event(keys::EVENT_EXCEPTION, attributes);
    }

    /// Only the first transition out of `Unset` takes effect.
    pub fn set_status(&self, status: SpanStatus) {
        self.mutate(|state, _| {
            if state.status == SpanStatus::Unset {
                state.status = status;
            }
        });
    }

    /// Finalize the span. Subsequent calls are no-ops.
    pub fn end(&self) {
        let finished = {
            let mut state = self.inner.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
            if !self.is_recording() {
                return;
            }
            let end_time = now_unix_nanos().max(self.inner.start_time);
            FinishedSpan {
                trace_id: self.inner.context.trace_id,
                span_id: self.inner.context.span_id,
                parent_span_id: self.inner.parent_span_id,
                name: std::mem::take(&mut state.name),
                kind: self.inner.kind,
                start_time_unix_nano: self.inner.start_time,
                end_time_unix_nano: end_time,
                duration_nanos: end_time - self.inner.start_time,
                attributes: std::mem::take(&mut state.attributes),
                status: state.status.clone(),
                events: std::mem::take(&mut state.events),
                links: std::mem::take(&mut state.links),
                resource: self.inner.shared.resource.clone(),
                instrumentation_scope: (*self.inner.scope).clone(),
                dropped_attributes_count: state.dropped_attributes,
                dropped_events_count: state.dropped_events,
                dropped_links_count: state.dropped_links,
                ended: true,
            }
        };
        tracing::debug!(
            span = %finished.name,
            span_id = %finished.span_id,
            status = ?finished.status,
            "span ended"
        );
        self.inner.shared.on_end(finished);
    }

    fn mutate(&self, f: impl FnOnce(&mut SpanState, &SpanLimits)) {
        if !self.is_recording() {
            return;
        }
        let mut state = self.inner.state.lock();
        if state.ended {
            return;
        }
        f(&mut state, &self.inner.shared.limits);
    }
}

/// Ends the held span when dropped unless disarmed.
pub(crate) struct EndOnDrop {
    span: Option<Span>,
}

impl EndOnDrop {
    pub(crate) fn new(span: Span) -> Self {
        Self { span: Some(span) }
    }

    /// Release the span without ending it; finalization moves elsewhere.
    pub(crate) fn disarm(mut self) {
        self.span = None;
    }
}

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            span.end();
        }
    }
}
