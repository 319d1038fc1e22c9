//! Ambient trace context carried across `.await` points.
//!
//! Context lives in a tokio task-local scope. A scope is entered by wrapping a future
//! and is restored when that future completes, fails or is dropped. Futures spawned
//! onto a new task start with an empty context unless wrapped with `with_context`.

use std::future::Future;
use std::sync::Arc;

use crate::trace::{Attributes, Span, SpanContext};

tokio::task_local! {
    static CURRENT: TraceContext;
}

#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    active: Option<SpanContext>,
    attributes: Arc<Attributes>,
}

impl TraceContext {
    /// Snapshot of the context in scope, or the empty context outside any scope.
    pub fn current() -> Self {
        CURRENT.try_with(Clone::clone).unwrap_or_default()
    }

    pub fn active_span(&self) -> Option<&SpanContext> {
        self.active.as_ref()
    }

    /// Custom attributes applied to every span created in this context.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn with_span_context(&self, span: SpanContext) -> Self {
        Self {
            active: Some(span),
            attributes: self.attributes.clone(),
        }
    }

    /// Merge `extra` over the inherited attributes; `extra` wins on collision.
    pub fn with_attributes(&self, extra: Attributes) -> Self {
        if extra.is_empty() {
            return self.clone();
        }
        let mut merged = (*self.attributes).clone();
        merged.extend(extra);
        Self {
            active: self.active,
            attributes: Arc::new(merged),
        }
    }
}

/// Run `fut` with `ctx` as the current context.
pub async fn with_context<F: Future>(ctx: TraceContext, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}

/// Run `fut` with `span` active, so spans started inside become its children.
pub async fn with_span<F: Future>(span: &Span, fut: F) -> F::Output {
    let ctx = TraceContext::current().with_span_context(span.context());
    with_context(ctx, fut).await
}

/// Run `fut` with `attributes` merged into the ambient custom attributes.
pub async fn with_additional_attributes<F: Future>(attributes: Attributes, fut: F) -> F::Output {
    let ctx = TraceContext::current().with_attributes(attributes);
    with_context(ctx, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use crate::trace::SpanKind;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), (*v).into()))
            .collect()
    }

    #[tokio::test]
    async fn outside_any_scope_context_is_empty() {
        let ctx = TraceContext::current();
        assert!(ctx.active_span().is_none());
        assert!(ctx.attributes().is_empty());
    }

    #[tokio::test]
    async fn nested_attributes_merge_and_restore() {
        with_additional_attributes(attrs(&[("user", "a"), ("team", "x")]), async {
            with_additional_attributes(attrs(&[("user", "b")]), async {
                let ctx = TraceContext::current();
                assert_eq!(ctx.attributes().get("user").and_then(|v| v.as_str()), Some("b"));
                assert_eq!(ctx.attributes().get("team").and_then(|v| v.as_str()), Some("x"));
            })
            .await;
            let ctx = TraceContext::current();
            assert_eq!(ctx.attributes().get("user").and_then(|v| v.as_str()), Some("a"));
        })
        .await;
        assert!(TraceContext::current().attributes().is_empty());
    }

    #[tokio::test]
    async fn spans_started_in_scope_are_children() {
        let (provider, tracer, exporter) = test_util::tracer();
        let parent = tracer.start_span("parent", SpanKind::Internal, Attributes::new());
        with_span(&parent, async {
            tracer.start_span("child", SpanKind::Internal, Attributes::new()).end();
        })
        .await;
        tracer.start_span("sibling", SpanKind::Internal, Attributes::new()).end();
        parent.end();
        provider.force_flush().await.unwrap();

        let spans = exporter.finished_spans();
        let parent_id = parent.context().span_id;
        let child = spans.iter().find(|s| s.name == "child").unwrap();
        let sibling = spans.iter().find(|s| s.name == "sibling").unwrap();
        assert_eq!(child.parent_span_id, Some(parent_id));
        assert_eq!(child.trace_id, parent.context().trace_id);
        assert_eq!(sibling.parent_span_id, None);
    }

    #[tokio::test]
    async fn interleaved_futures_do_not_cross_contaminate() {
        let a = with_additional_attributes(attrs(&[("who", "a")]), async {
            tokio::task::yield_now().await;
            TraceContext::current().attributes().get("who").cloned()
        });
        let b = with_additional_attributes(attrs(&[("who", "b")]), async {
            tokio::task::yield_now().await;
            TraceContext::current().attributes().get("who").cloned()
        });
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.as_ref().and_then(|v| v.as_str()), Some("a"));
        assert_eq!(rb.as_ref().and_then(|v| v.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn spawned_task_starts_empty_unless_wrapped() {
        with_additional_attributes(attrs(&[("k", "v")]), async {
            let bare = tokio::spawn(async { TraceContext::current().attributes().len() })
                .await
                .unwrap();
            assert_eq!(bare, 0);

            let ctx = TraceContext::current();
            let wrapped = tokio::spawn(with_context(ctx, async {
                TraceContext::current().attributes().len()
            }))
            .await
            .unwrap();
            assert_eq!(wrapped, 1);
        })
        .await;
    }

    #[tokio::test]
    async fn scope_is_restored_after_error() {
        let result: Result<(), &str> =
            with_additional_attributes(attrs(&[("k", "v")]), async { Err("boom") }).await;
        assert!(result.is_err());
        assert!(TraceContext::current().attributes().is_empty());
    }
}
