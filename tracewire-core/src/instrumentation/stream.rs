//! Span accumulation over a streamed response.
//!
//! `TracedStream` forwards every upstream item unchanged and in order while
//! annotating the open span. It ends the span exactly once:
//! - on exhaustion, with status OK and the final token counts and response;
//! - on the first upstream error, with status ERROR (later items pass through bare);
//! - on drop before either, with the partial attributes and status unset.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::json;

use crate::model::ChatCompletionChunk;
use crate::token::TokenEstimator;
use crate::trace::{AttributeValue, Attributes, Span, SpanStatus, keys};

use super::{fail_span, guarded};

/// A response fragment the accumulator can read.
pub trait StreamFragment {
    /// Model name reported by the fragment, if any.
    fn model(&self) -> Option<&str>;

    /// Incremental text carried by the fragment: function-call arguments in
    /// function-call mode, content otherwise. Missing text is `""`.
    fn text(&self, function_call: bool) -> &str;
}

impl StreamFragment for ChatCompletionChunk {
    fn model(&self) -> Option<&str> {
        Some(self.model.as_str()).filter(|m| !m.is_empty())
    }

    fn text(&self, function_call: bool) -> &str {
        let Some(choice) = self.choices.first() else {
            return "";
        };
        if function_call {
            choice
                .delta
                .function_call
                .as_ref()
                .and_then(|f| f.arguments.as_deref())
                .unwrap_or("")
        } else {
            choice.delta.content.as_deref().unwrap_or("")
        }
    }
}

/// Running totals for one streamed response.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    model: String,
    prompt_tokens: u64,
    completion_tokens: u64,
    response: String,
    fragments: usize,
    function_call: bool,
}

impl StreamState {
    /// `prompt_tokens` is estimated once before the stream is consumed.
    pub fn new(prompt_tokens: u64, function_call: bool) -> Self {
        Self {
            prompt_tokens,
            function_call,
            ..Default::default()
        }
    }

    /// Model captured from the first fragment; empty if none was observed.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens
    }

    /// Concatenation of every fragment's text so far.
    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Fold one fragment in and return its token estimate and text.
    fn record<F: StreamFragment>(
        &mut self,
        fragment: &F,
        estimator: &dyn TokenEstimator,
    ) -> (u64, String) {
        if self.fragments == 0 {
            self.model = fragment.model().unwrap_or_default().to_string();
        }
        self.fragments += 1;
        let text = fragment.text(self.function_call).to_string();
        let tokens = guarded("token estimate", || estimator.estimate(&text, &self.model)).unwrap_or(0);
        self.completion_tokens = self.completion_tokens.saturating_add(tokens);
        self.response.push_str(&text);
        (tokens, text)
    }

    fn span_attributes(&self) -> Attributes {
        let total = self.prompt_tokens.saturating_add(self.completion_tokens);
        let counts = json!({
            "prompt_tokens": self.prompt_tokens,
            "completion_tokens": self.completion_tokens,
            "total_tokens": total,
        });
        let message = if self.function_call {
            json!({"role": "assistant", "function_call": self.response})
        } else {
            json!({"role": "assistant", "content": self.response})
        };
        let mut attrs = Attributes::new();
        attrs.insert(keys::LLM_MODEL.into(), self.model.as_str().into());
        attrs.insert(keys::LLM_TOKEN_COUNTS.into(), counts.to_string().into());
        attrs.insert(
            keys::LLM_RESPONSES.into(),
            json!([{ "message": message }]).to_string().into(),
        );
        attrs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Failed,
    Done,
}

/// Pass-through stream that accumulates span attributes from the items it forwards.
pub struct TracedStream<F, E> {
    inner: BoxStream<'static, Result<F, E>>,
    span: Span,
    state: StreamState,
    estimator: Arc<dyn TokenEstimator>,
    phase: Phase,
}

impl<F, E> TracedStream<F, E>
where
    F: StreamFragment,
    E: std::fmt::Display,
{
    /// Takes ownership of `span`; emits `stream.start` immediately.
    pub fn new(
        inner: BoxStream<'static, Result<F, E>>,
        span: Span,
        state: StreamState,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        span.add_event(keys::EVENT_STREAM_START, Attributes::new());
        Self {
            inner,
            span,
            state,
            estimator,
            phase: Phase::Active,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    fn observe(&mut self, fragment: &F) {
        let (tokens, text) = self.state.record(fragment, self.estimator.as_ref());
        let mut attrs = Attributes::new();
        attrs.insert("tokens".into(), tokens.into());
        attrs.insert(
            "response".into(),
            AttributeValue::String(serde_json::Value::String(text).to_string()),
        );
        self.span.add_event(keys::EVENT_STREAM_OUTPUT, attrs);
    }

    fn complete(&mut self) {
        self.phase = Phase::Done;
        if let Some(attrs) = guarded("stream completion", || self.state.span_attributes()) {
            self.span.set_attributes(attrs);
        }
        self.span.set_status(SpanStatus::Ok);
        self.span.add_event(keys::EVENT_STREAM_END, Attributes::new());
        self.span.end();
    }

    fn fail(&mut self, err: &E) {
        self.phase = Phase::Failed;
        fail_span(&self.span, err);
        self.span.end();
    }
}

impl<F, E> Stream for TracedStream<F, E>
where
    F: StreamFragment,
    E: std::fmt::Display,
{
    type Item = Result<F, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.phase == Phase::Done {
            return Poll::Ready(None);
        }
        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(fragment)) => {
                if this.phase == Phase::Active {
                    this.observe(&fragment);
                }
                Poll::Ready(Some(Ok(fragment)))
            }
            Some(Err(err)) => {
                if this.phase == Phase::Active {
                    this.fail(&err);
                }
                Poll::Ready(Some(Err(err)))
            }
            None => {
                if this.phase == Phase::Active {
                    this.complete();
                }
                this.phase = Phase::Done;
                Poll::Ready(None)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.phase {
            Phase::Done => (0, Some(0)),
            _ => self.inner.size_hint(),
        }
    }
}

impl<F, E> Drop for TracedStream<F, E> {
    fn drop(&mut self) {
        if self.phase != Phase::Active {
            return;
        }
        tracing::debug!(fragments = self.state.fragments, "stream dropped before completion");
        if let Some(attrs) = guarded("stream abandonment", || self.state.span_attributes()) {
            self.span.set_attributes(attrs);
        }
        self.span
            .add_event(keys::EVENT_STREAM_ABANDONED, Attributes::new());
        self.span.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkChoice, ChunkDelta, FunctionCallDelta};
    use crate::test_util;
    use crate::token::CharHeuristic;
    use crate::trace::FinishedSpan;
    use futures::stream;

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    #[error("connection reset")]
    struct Reset;

    fn chunks(texts: &[&str]) -> Vec<Result<ChatCompletionChunk, Reset>> {
        texts
            .iter()
            .map(|t| Ok(ChatCompletionChunk::text("c", "gpt-4o", *t)))
            .collect()
    }

    async fn run(
        items: Vec<Result<ChatCompletionChunk, Reset>>,
        state: StreamState,
    ) -> (Vec<Result<ChatCompletionChunk, Reset>>, FinishedSpan) {
        let (provider, tracer, exporter) = test_util::tracer();
        let span = tracer.start_span("openai.chat.completion.create", crate::trace::SpanKind::Client, Attributes::new());
        let traced = TracedStream::new(stream::iter(items).boxed(), span, state, Arc::new(CharHeuristic));
        let out: Vec<_> = traced.collect().await;
        provider.force_flush().await.unwrap();
        let mut spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1, "span must end exactly once");
        (out, spans.remove(0))
    }

    fn attr<'a>(span: &'a FinishedSpan, key: &str) -> &'a str {
        span.attribute(key).and_then(|v| v.as_str()).unwrap_or_default()
    }

    #[tokio::test]
    async fn forwards_fragments_and_reconstructs_response() {
        let items = chunks(&["Hello", " world", "!"]);
        let (out, span) = run(items.clone(), StreamState::new(5, false)).await;
        assert_eq!(out, items);

        assert_eq!(span.status, SpanStatus::Ok);
        assert_eq!(span.events_named(keys::EVENT_STREAM_START).count(), 1);
        assert_eq!(span.events_named(keys::EVENT_STREAM_OUTPUT).count(), 3);
        assert_eq!(span.events_named(keys::EVENT_STREAM_END).count(), 1);
        assert_eq!(attr(&span, keys::LLM_MODEL), "gpt-4o");

        let responses: serde_json::Value = serde_json::from_str(attr(&span, keys::LLM_RESPONSES)).unwrap();
        assert_eq!(
            responses,
            json!([{"message": {"role": "assistant", "content": "Hello world!"}}])
        );
        // "Hello" = 2, " world" = 2, "!" = 1
        let counts: serde_json::Value = serde_json::from_str(attr(&span, keys::LLM_TOKEN_COUNTS)).unwrap();
        assert_eq!(
            counts,
            json!({"prompt_tokens": 5, "completion_tokens": 5, "total_tokens": 10})
        );
    }

    #[tokio::test]
    async fn output_events_carry_tokens_and_json_text() {
        let (_, span) = run(chunks(&["Hi \"there\""]), StreamState::new(0, false)).await;
        let event = span.events_named(keys::EVENT_STREAM_OUTPUT).next().unwrap();
        assert_eq!(event.attributes.get("tokens").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(
            event.attributes.get("response").and_then(|v| v.as_str()),
            Some(r#""Hi \"there\"""#)
        );
    }

    #[tokio::test]
    async fn empty_stream_starts_and_ends_with_zero_counts() {
        let (out, span) = run(Vec::new(), StreamState::new(0, false)).await;
        assert!(out.is_empty());
        assert_eq!(span.status, SpanStatus::Ok);
        assert_eq!(span.events.len(), 2);
        assert_eq!(span.events[0].name, keys::EVENT_STREAM_START);
        assert_eq!(span.events[1].name, keys::EVENT_STREAM_END);
        assert_eq!(attr(&span, keys::LLM_MODEL), "");
        let counts: serde_json::Value = serde_json::from_str(attr(&span, keys::LLM_TOKEN_COUNTS)).unwrap();
        assert_eq!(counts["total_tokens"], 0);
    }

    #[tokio::test]
    async fn error_is_forwarded_in_place_and_later_items_pass_through() {
        let mut items = chunks(&["a", "b"]);
        items.insert(1, Err(Reset));
        let (out, span) = run(items.clone(), StreamState::new(0, false)).await;
        assert_eq!(out, items);

        assert_eq!(span.status, SpanStatus::error("connection reset"));
        assert_eq!(span.events_named(keys::EVENT_EXCEPTION).count(), 1);
        assert_eq!(span.events_named(keys::EVENT_STREAM_END).count(), 0);
        // only the fragment before the error was annotated
        assert_eq!(span.events_named(keys::EVENT_STREAM_OUTPUT).count(), 1);
    }

    #[tokio::test]
    async fn model_is_taken_from_first_fragment_only() {
        let items = vec![
            Ok(ChatCompletionChunk::text("c", "gpt-4o-2024", "x")),
            Ok(ChatCompletionChunk::text("c", "other-model", "y")),
        ];
        let (_, span) = run(items, StreamState::new(0, false)).await;
        assert_eq!(attr(&span, keys::LLM_MODEL), "gpt-4o-2024");
    }

    #[tokio::test]
    async fn function_call_mode_accumulates_arguments() {
        let frag = |args: &str| {
            Ok(ChatCompletionChunk {
                id: "c".into(),
                model: "gpt-4o".into(),
                choices: vec![ChunkChoice {
                    index: 0,
                    delta: ChunkDelta {
                        function_call: Some(FunctionCallDelta {
                            name: None,
                            arguments: Some(args.into()),
                        }),
                        ..Default::default()
                    },
                    finish_reason: None,
                }],
            })
        };
        let (_, span) = run(vec![frag("{\"q\":"), frag("\"rust\"}")], StreamState::new(0, true)).await;
        let responses: serde_json::Value = serde_json::from_str(attr(&span, keys::LLM_RESPONSES)).unwrap();
        assert_eq!(
            responses,
            json!([{"message": {"role": "assistant", "function_call": "{\"q\":\"rust\"}"}}])
        );
    }

    #[tokio::test]
    async fn dropping_early_ends_span_with_partial_attributes() {
        let (provider, tracer, exporter) = test_util::tracer();
        let span = tracer.start_span("op", crate::trace::SpanKind::Client, Attributes::new());
        let mut traced = TracedStream::new(
            stream::iter(chunks(&["Hello", " world"])).boxed(),
            span,
            StreamState::new(1, false),
            Arc::new(CharHeuristic),
        );
        let first = traced.next().await;
        assert!(matches!(first, Some(Ok(_))));
        assert_eq!(traced.state().response(), "Hello");
        drop(traced);

        provider.force_flush().await.unwrap();
        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Unset);
        assert_eq!(spans[0].events_named(keys::EVENT_STREAM_ABANDONED).count(), 1);
        assert!(attr(&spans[0], keys::LLM_RESPONSES).contains("Hello"));
    }

    #[tokio::test]
    async fn exhausted_stream_stays_exhausted() {
        let (provider, tracer, exporter) = test_util::tracer();
        let span = tracer.start_span("op", crate::trace::SpanKind::Client, Attributes::new());
        let mut traced = TracedStream::new(
            stream::iter(chunks(&["x"])).boxed(),
            span,
            StreamState::new(0, false),
            Arc::new(CharHeuristic),
        );
        while traced.next().await.is_some() {}
        assert!(traced.next().await.is_none());
        drop(traced);
        provider.force_flush().await.unwrap();
        assert_eq!(exporter.finished_spans().len(), 1);
    }

    #[tokio::test]
    async fn panicking_estimator_keeps_accumulating() {
        struct Exploding;
        impl TokenEstimator for Exploding {
            fn estimate(&self, _text: &str, _model: &str) -> u64 {
                panic!("tokenizer missing")
            }
        }
        let (provider, tracer, exporter) = test_util::tracer();
        let span = tracer.start_span("op", crate::trace::SpanKind::Client, Attributes::new());
        let items = chunks(&["Hello", " world", "!"]);
        let out: Vec<_> = TracedStream::new(
            stream::iter(items.clone()).boxed(),
            span,
            StreamState::new(0, false),
            Arc::new(Exploding),
        )
        .collect()
        .await;
        assert_eq!(out, items);
        provider.force_flush().await.unwrap();
        let span = &exporter.finished_spans()[0];
        assert_eq!(span.status, SpanStatus::Ok);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(attr(span, keys::LLM_RESPONSES)).unwrap(),
            json!([{"message": {"role": "assistant", "content": "Hello world!"}}])
        );
        let outputs: Vec<_> = span.events_named(keys::EVENT_STREAM_OUTPUT).collect();
        assert_eq!(outputs.len(), 3);
        assert!(outputs
            .iter()
            .all(|e| e.attributes.get("tokens") == Some(&AttributeValue::Int(0))));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(attr(span, keys::LLM_TOKEN_COUNTS)).unwrap(),
            json!({"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0})
        );
    }
}
