use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

use crate::storage::LogManager;
use crate::LogEntry;

const BATCH_SIZE: usize = 100;
const FLUSH_TIMEOUT: Duration = Duration::from_millis(50);

/// Buffers entries and writes them to [`LogManager`] in batches on a
/// background task. Submitting never blocks the caller.
pub struct Batcher {
    tx: mpsc::UnboundedSender<LogEntry>,
    handle: JoinHandle<()>,
}

impl Batcher {
    /// Spawns the flush loop; must be called inside a tokio runtime.
    pub fn new(storage: Arc<LogManager>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_loop(rx, storage));
        Self { tx, handle }
    }

    pub fn submit(&self, entry: LogEntry) {
        if self.tx.send(entry).is_err() {
            debug!("Batcher closed, dropping log entry");
        }
    }

    /// Close the channel and wait until every submitted entry is flushed.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!("Batcher task failed: {e}");
        }
    }
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<LogEntry>, storage: Arc<LogManager>) {
    loop {
        let first = match rx.recv().await {
            Some(e) => e,
            None => break,
        };

        let mut batch = Vec::with_capacity(BATCH_SIZE);
        batch.push(first);

        loop {
            if batch.len() >= BATCH_SIZE {
                break;
            }
            match timeout(FLUSH_TIMEOUT, rx.recv()).await {
                Ok(Some(entry)) => batch.push(entry),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let len = batch.len();
        let s = storage.clone();
        match tokio::task::spawn_blocking(move || s.append_batch(batch)).await {
            Ok(Ok(())) => debug!("Flushed {len} log entries"),
            Ok(Err(e)) => error!("Batch flush failed: {e:#}"),
            Err(e) => error!("Batch flush task panicked: {e}"),
        }

        if rx.is_closed() && rx.is_empty() {
            break;
        }
    }

    info!("Batcher shutdown");
}
