//! Pipeline stage between `Span::end` and the exporter.
//!
//! Both processors run their exports on a tokio task, so `on_end` never blocks the
//! instrumented call. Export outcomes are logged; retry is not attempted here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::config::BatchCfg;
use crate::error::{CoreResult, TracewireError};
use crate::exporter::{ExportResult, SpanExporter};

use super::span::Span;
use super::types::FinishedSpan;

#[async_trait]
pub trait SpanProcessor: Send + Sync + 'static {
    fn on_start(&self, _span: &Span) {}

    /// Must not block; called inline from `Span::end`.
    fn on_end(&self, span: FinishedSpan);

    async fn force_flush(&self) -> CoreResult<()>;

    async fn shutdown(&self) -> CoreResult<()>;
}

enum Command {
    Export(FinishedSpan),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

fn log_result(result: &ExportResult, count: usize) {
    if result.is_success() {
        tracing::debug!(count, "span batch exported");
    } else {
        tracing::warn!(count, error = ?result.error, "span batch export failed");
    }
}

/// Exports every span as soon as it ends, one span per batch, in end order.
pub struct SimpleSpanProcessor {
    exporter: Arc<dyn SpanExporter>,
    worker: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    shut_down: AtomicBool,
}

impl SimpleSpanProcessor {
    pub fn new(exporter: impl SpanExporter) -> Self {
        Self::from_shared(Arc::new(exporter))
    }

    pub fn from_shared(exporter: Arc<dyn SpanExporter>) -> Self {
        Self {
            exporter,
            worker: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// The worker is spawned on first use so the processor can be built outside a runtime.
    fn sender(&self) -> Option<mpsc::UnboundedSender<Command>> {
        let mut worker = self.worker.lock();
        if let Some(tx) = worker.as_ref()
            && !tx.is_closed()
        {
            return Some(tx.clone());
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run_simple(self.exporter.clone(), rx));
        *worker = Some(tx.clone());
        Some(tx)
    }

    fn running_sender(&self) -> Option<mpsc::UnboundedSender<Command>> {
        self.worker.lock().as_ref().filter(|tx| !tx.is_closed()).cloned()
    }
}

async fn run_simple(exporter: Arc<dyn SpanExporter>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Export(span) => {
                let result = exporter.export(vec![span]).await;
                log_result(&result, 1);
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }
}

#[async_trait]
impl SpanProcessor for SimpleSpanProcessor {
    fn on_end(&self, span: FinishedSpan) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        match self.sender() {
            Some(tx) => {
                if tx.send(Command::Export(span)).is_err() {
                    tracing::warn!("span export worker stopped; span dropped");
                }
            }
            None => tracing::warn!("no tokio runtime available; span dropped"),
        }
    }

    async fn force_flush(&self) -> CoreResult<()> {
        if let Some(tx) = self.running_sender() {
            let (ack, done) = oneshot::channel();
            if tx.send(Command::Flush(ack)).is_ok() {
                let _ = done.await;
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> CoreResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(tx) = self.running_sender() {
            let (ack, done) = oneshot::channel();
            if tx.send(Command::Shutdown(ack)).is_ok() {
                let _ = done.await;
            }
        }
        self.exporter.shutdown().await
    }
}

/// Buffers finished spans and exports them in batches.
///
/// A batch is sent when `max_export_batch_size` spans are buffered, when
/// `scheduled_delay_ms` elapses, or on flush/shutdown. Spans arriving while the queue
/// holds `max_queue_size` entries are dropped.
pub struct BatchSpanProcessor {
    tx: mpsc::Sender<Command>,
    dropped: AtomicU64,
    shut_down: AtomicBool,
}

impl BatchSpanProcessor {
    /// Must be called from within a tokio runtime; the export worker is spawned here.
    pub fn new(exporter: impl SpanExporter, cfg: &BatchCfg) -> CoreResult<Self> {
        Self::from_shared(Arc::new(exporter), cfg)
    }

    pub fn from_shared(exporter: Arc<dyn SpanExporter>, cfg: &BatchCfg) -> CoreResult<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            TracewireError::Configuration(
                "batch span processor requires a running tokio runtime".into(),
            )
        })?;
        if cfg.max_export_batch_size == 0 || cfg.max_queue_size == 0 {
            return Err(TracewireError::Configuration(
                "batch sizes must be greater than zero".into(),
            ));
        }
        let (tx, rx) = mpsc::channel(cfg.max_queue_size);
        handle.spawn(run_batch(
            exporter,
            rx,
            cfg.max_export_batch_size,
            Duration::from_millis(cfg.scheduled_delay_ms.max(1)),
        ));
        Ok(Self {
            tx,
            dropped: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn dropped_spans(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn export_buffer(exporter: &dyn SpanExporter, buffer: &mut Vec<FinishedSpan>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let count = batch.len();
    let result = exporter.export(batch).await;
    log_result(&result, count);
}

async fn run_batch(
    exporter: Arc<dyn SpanExporter>,
    mut rx: mpsc::Receiver<Command>,
    max_batch: usize,
    delay: Duration,
) {
    let mut buffer = Vec::with_capacity(max_batch);
    let mut ticker = tokio::time::interval(delay);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Export(span)) => {
                    buffer.push(span);
                    if buffer.len() >= max_batch {
                        export_buffer(exporter.as_ref(), &mut buffer).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    export_buffer(exporter.as_ref(), &mut buffer).await;
                    let _ = ack.send(());
                }
                Some(Command::Shutdown(ack)) => {
                    export_buffer(exporter.as_ref(), &mut buffer).await;
                    let _ = ack.send(());
                    break;
                }
                None => {
                    export_buffer(exporter.as_ref(), &mut buffer).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                export_buffer(exporter.as_ref(), &mut buffer).await;
            }
        }
    }
    if let Err(e) = exporter.shutdown().await {
        tracing::warn!(error = %e, "span exporter shutdown failed");
    }
}

#[async_trait]
impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: FinishedSpan) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(Command::Export(span)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "span queue full; span dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("batch worker stopped; span dropped");
            }
        }
    }

    async fn force_flush(&self) -> CoreResult<()> {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
        Ok(())
    }

    async fn shutdown(&self) -> CoreResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
        Ok(())
    }
}
