//! Boundary components delivering finished spans to a sink.
//!
//! Contract shared by every exporter:
//! - `export` resolves to exactly one `ExportResult` per batch and never panics.
//! - Delivery failures are reported through the result, never as an `Err`.
//! - `shutdown` is idempotent and safe to call before any export.

pub mod console;
pub mod memory;
pub mod remote;

pub use console::ConsoleExporter;
pub use memory::InMemoryExporter;
pub use remote::RemoteExporter;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CoreResult;
use crate::trace::FinishedSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportCode {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResult {
    pub code: ExportCode,
    /// Error payload from the sink (response body) or transport, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl ExportResult {
    pub fn success() -> Self {
        Self {
            code: ExportCode::Success,
            error: None,
        }
    }

    pub fn failure(error: Option<serde_json::Value>) -> Self {
        Self {
            code: ExportCode::Failure,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ExportCode::Success
    }
}

/// Completion callback for `SpanExporter::export_with`.
pub type ExportCallback = Box<dyn FnOnce(ExportResult) + Send + 'static>;

#[async_trait]
pub trait SpanExporter: Send + Sync + 'static {
    async fn export(&self, batch: Vec<FinishedSpan>) -> ExportResult;

    /// Callback form of `export`: `callback` runs exactly once with the batch outcome.
    async fn export_with(&self, batch: Vec<FinishedSpan>, callback: ExportCallback) {
        let result = self.export(batch).await;
        callback(result);
    }

    async fn shutdown(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: SpanExporter + ?Sized> SpanExporter for std::sync::Arc<T> {
    async fn export(&self, batch: Vec<FinishedSpan>) -> ExportResult {
        (**self).export(batch).await
    }

    async fn shutdown(&self) -> CoreResult<()> {
        (**self).shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Rejecting;

    #[async_trait]
    impl SpanExporter for Rejecting {
        async fn export(&self, _batch: Vec<FinishedSpan>) -> ExportResult {
            ExportResult::failure(Some(serde_json::json!({"error": "nope"})))
        }
    }

    #[tokio::test]
    async fn export_with_invokes_callback_once_on_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        Rejecting
            .export_with(
                Vec::new(),
                Box::new(move |result| {
                    assert!(!result.is_success());
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn result_serializes_code() {
        let v = serde_json::to_value(ExportResult::success()).unwrap();
        assert_eq!(v, serde_json::json!({"code": "success"}));
    }
}
