use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::trace::FinishedSpan;

use super::{ExportResult, SpanExporter};

/// Writes each span as pretty-printed JSON, one document per span.
pub struct ConsoleExporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleExporter {
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    fn write_batch(&self, batch: &[FinishedSpan]) -> std::io::Result<()> {
        let mut out = self.out.lock();
        for span in batch {
            serde_json::to_writer_pretty(&mut *out, span)?;
            out.write_all(b"\n")?;
        }
        out.flush()
    }
}

impl Default for ConsoleExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConsoleExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConsoleExporter")
    }
}

#[async_trait]
impl SpanExporter for ConsoleExporter {
    async fn export(&self, batch: Vec<FinishedSpan>) -> ExportResult {
        match self.write_batch(&batch) {
            Ok(()) => ExportResult::success(),
            Err(e) => ExportResult::failure(Some(e.to_string().into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_one_json_document_per_span() {
        let buf = SharedBuf::default();
        let exporter = ConsoleExporter::with_writer(buf.clone());
        let result = exporter
            .export(vec![test_util::finished_span("one"), test_util::finished_span("two")])
            .await;
        assert!(result.is_success());

        let text = String::from_utf8(buf.0.lock().clone()).unwrap();
        let docs: Vec<serde_json::Value> = serde_json::Deserializer::from_str(&text)
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["name"], "one");
        assert_eq!(docs[1]["name"], "two");
    }

    #[tokio::test]
    async fn write_errors_become_failures() {
        let exporter = ConsoleExporter::with_writer(Broken);
        let result = exporter.export(vec![test_util::finished_span("x")]).await;
        assert!(!result.is_success());
    }
}
