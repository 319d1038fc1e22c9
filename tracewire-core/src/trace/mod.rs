//! Span model and tracing pipeline.
//!
//! No spans are exported unless a provider with at least one processor is built.
//! A process-wide provider can be installed once via `set_global_provider`.

pub mod keys;
pub mod processor;
pub mod provider;
pub mod sampler;
pub mod span;
pub mod types;

pub use processor::{BatchSpanProcessor, SimpleSpanProcessor, SpanProcessor};
pub use provider::{Tracer, TracerProvider, TracerProviderBuilder};
pub use sampler::{AlwaysOff, AlwaysOn, ParentBased, Sampler, SamplingDecision};
pub use span::Span;
pub use types::*;

use once_cell::sync::OnceCell;

static GLOBAL_PROVIDER: OnceCell<TracerProvider> = OnceCell::new();
static NOOP_PROVIDER: OnceCell<TracerProvider> = OnceCell::new();

/// Install the process-wide provider. Returns `false` if one is already installed.
///
/// This is a write-once global for the process lifetime (backed by `OnceCell`).
pub fn set_global_provider(provider: TracerProvider) -> bool {
    GLOBAL_PROVIDER.set(provider).is_ok()
}

pub fn global_provider() -> Option<&'static TracerProvider> {
    GLOBAL_PROVIDER.get()
}

/// Tracer from the global provider, or a non-exporting tracer when none is installed.
pub fn global_tracer(name: impl Into<String>) -> Tracer {
    match GLOBAL_PROVIDER.get() {
        Some(provider) => provider.tracer(name),
        None => NOOP_PROVIDER
            .get_or_init(|| TracerProvider::builder().with_sampler(AlwaysOff).build())
            .tracer(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_tracer_without_provider_does_not_record() {
        // other tests never install a global provider
        if global_provider().is_none() {
            let span = global_tracer("noop").start_span("x", SpanKind::Internal, Attributes::new());
            assert!(!span.is_recording());
            span.end();
        }
    }
}
