use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::trace::FinishedSpan;

use super::{ExportResult, SpanExporter};

#[derive(Default)]
struct Recorded {
    spans: Vec<FinishedSpan>,
    batch_sizes: Vec<usize>,
}

/// Keeps exported spans in memory. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    recorded: Arc<Mutex<Recorded>>,
}

impl InMemoryExporter {
    /// Every span exported so far, in export order.
    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.recorded.lock().spans.clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.recorded.lock().batch_sizes.clone()
    }

    pub fn reset(&self) {
        let mut recorded = self.recorded.lock();
        recorded.spans.clear();
        recorded.batch_sizes.clear();
    }
}

impl std::fmt::Debug for InMemoryExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryExporter")
            .field("spans", &self.recorded.lock().spans.len())
            .finish()
    }
}

#[async_trait]
impl SpanExporter for InMemoryExporter {
    async fn export(&self, batch: Vec<FinishedSpan>) -> ExportResult {
        let mut recorded = self.recorded.lock();
        recorded.batch_sizes.push(batch.len());
        recorded.spans.extend(batch);
        ExportResult::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;

    #[tokio::test]
    async fn records_batches_and_resets() {
        let exporter = InMemoryExporter::default();
        let shared = exporter.clone();
        assert!(
            exporter
                .export(vec![test_util::finished_span("a"), test_util::finished_span("b")])
                .await
                .is_success()
        );
        exporter.export(vec![test_util::finished_span("c")]).await;

        assert_eq!(shared.batch_sizes(), vec![2, 1]);
        let names: Vec<_> = shared.finished_spans().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        shared.reset();
        assert!(exporter.finished_spans().is_empty());
        assert!(exporter.batch_sizes().is_empty());
    }
}
