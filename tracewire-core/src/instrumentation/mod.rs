//! Span-emitting wrappers around provider clients and arbitrary async calls.
//!
//! The wrappers never alter what the caller observes: return values, error values
//! and stream elements pass through unchanged. Failures while building span
//! annotations are logged and swallowed.

pub mod framework;
pub mod openai;
pub mod stream;

pub use openai::{Instrumented, OpenAiApi};
pub use stream::{StreamFragment, StreamState, TracedStream};

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;

use crate::context::{TraceContext, with_context};
use crate::provider::ClientOptions;
use crate::router::ProviderResolver;
use crate::token::{CharHeuristic, TokenEstimator};
use crate::trace::span::EndOnDrop;
use crate::trace::{Attributes, Span, SpanKind, SpanStatus, Tracer, keys};

/// Shared span-creation settings for one instrumented integration.
#[derive(Clone)]
pub struct Interceptor {
    tracer: Tracer,
    estimator: Arc<dyn TokenEstimator>,
    providers: Arc<ProviderResolver>,
    version: String,
    enabled: bool,
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("tracer", &self.tracer)
            .field("version", &self.version)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Interceptor {
    pub fn new(tracer: Tracer) -> Self {
        Self {
            tracer,
            estimator: Arc::new(CharHeuristic),
            providers: Arc::new(ProviderResolver::default()),
            version: String::new(),
            enabled: true,
        }
    }

    pub fn with_estimator(mut self, estimator: impl TokenEstimator) -> Self {
        self.estimator = Arc::new(estimator);
        self
    }

    pub fn with_providers(mut self, providers: Arc<ProviderResolver>) -> Self {
        self.providers = providers;
        self
    }

    /// Version tag of the wrapped client library, reported as `tracewire.service.version`.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// A disabled interceptor forwards every call without creating spans.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn wrap<C>(&self, client: C) -> Instrumented<C> {
        Instrumented::new(client, self.clone())
    }

    /// Run `fut` inside a new span named `name`.
    ///
    /// `Ok` sets status OK; `Err` records an exception event and sets status ERROR.
    /// The result is returned unchanged. Spans started inside `fut` become children.
    /// Dropping the returned future before completion ends the span with status unset.
    pub async fn trace<T, E, F>(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Attributes,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.enabled {
            return fut.await;
        }
        let ctx = TraceContext::current();
        let span = self.start(name, kind, attributes, &ctx);
        let _guard = EndOnDrop::new(span.clone());
        let result = with_context(ctx.with_span_context(span.context()), fut).await;
        match &result {
            Ok(_) => span.set_status(SpanStatus::Ok),
            Err(e) => fail_span(&span, e),
        }
        result
    }

    /// Start a span parented to the context's active span, with the context's custom
    /// attributes merged last.
    pub(crate) fn start(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        mut attributes: Attributes,
        ctx: &TraceContext,
    ) -> Span {
        attributes.extend(ctx.attributes().clone());
        self.tracer
            .start_span_with_parent(name, kind, attributes, ctx.active_span())
    }

    /// `tracewire.*` service metadata plus the client's transport settings.
    pub(crate) fn service_attributes(
        &self,
        service_type: &str,
        options: &ClientOptions,
    ) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(
            keys::SERVICE_NAME.into(),
            self.providers.resolve(options.base_url.as_deref()).into(),
        );
        attrs.insert(keys::SERVICE_TYPE.into(), service_type.into());
        attrs.insert(keys::SERVICE_VERSION.into(), self.version.as_str().into());
        attrs.insert(keys::SDK_VERSION.into(), env!("CARGO_PKG_VERSION").into());
        if let Some(url) = &options.base_url {
            attrs.insert(keys::URL_FULL.into(), url.as_str().into());
        }
        if let Some(retries) = options.max_retries {
            attrs.insert(keys::HTTP_MAX_RETRIES.into(), retries.into());
        }
        if let Some(timeout) = options.timeout_ms {
            attrs.insert(keys::HTTP_TIMEOUT.into(), timeout.into());
        }
        attrs
    }

    /// Token estimate, or 0 if the estimator panics.
    pub(crate) fn estimate(&self, text: &str, model: &str) -> u64 {
        let estimator = self.estimator.as_ref();
        guarded("token estimate", || estimator.estimate(text, model)).unwrap_or(0)
    }

    pub(crate) fn estimator(&self) -> Arc<dyn TokenEstimator> {
        self.estimator.clone()
    }
}

/// Record `err` on the span and mark it failed.
pub(crate) fn fail_span<E: std::fmt::Display + ?Sized>(span: &Span, err: &E) {
    let message = err.to_string();
    span.record_exception_message(std::any::type_name::<E>(), &message);
    span.set_status(SpanStatus::error(message));
}

/// Run an annotation step, logging instead of propagating a panic.
pub(crate) fn guarded<T>(what: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => Some(v),
        Err(panic) => {
            tracing::warn!(annotation = what, panic = %panic_message(&panic), "span annotation failed");
            None
        }
    }
}

/// JSON text of `value`; serialization failures are logged and yield `None`.
pub(crate) fn to_json<T: Serialize + ?Sized>(what: &'static str, value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(annotation = what, error = %e, "span attribute serialization failed");
            None
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
