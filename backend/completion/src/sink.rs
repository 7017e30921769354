//! Per-execution output channel.
//!
//! Every orchestrator call gets its own bounded channel: the orchestrator
//! owns the [`OutputSink`] and the transport owns the [`OutputStream`].
//! Records arrive in publication order. A full buffer blocks the producer,
//! so a slow consumer throttles the provider loop instead of being skipped.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use chatloom_core::ChatError;

use crate::dto::CompletionOutput;

/// Default buffer size for an output channel.
pub const DEFAULT_BUFFER_SIZE: usize = 32;

/// Create a connected sink/stream pair with the given buffer size.
pub fn output_channel(buffer: usize) -> (OutputSink, OutputStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    debug!(buffer_size = buffer.max(1), "Output channel created");
    (OutputSink { tx }, OutputStream { rx })
}

/// Producer half. Not `Clone`: there is exactly one producer per execution.
#[derive(Debug)]
pub struct OutputSink {
    tx: mpsc::Sender<CompletionOutput>,
}

impl OutputSink {
    /// Publish a record, waiting for buffer space if the consumer lags.
    pub async fn publish(&self, record: CompletionOutput) -> Result<(), ChatError> {
        self.tx.send(record).await.map_err(|_| ChatError::SinkClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half. Ends once the sink is dropped and the buffer is drained.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::Receiver<CompletionOutput>,
}

impl OutputStream {
    pub async fn recv(&mut self) -> Option<CompletionOutput> {
        self.rx.recv().await
    }

    /// Consume every remaining record.
    pub async fn collect(mut self) -> Vec<CompletionOutput> {
        let mut records = Vec::new();
        while let Some(record) = self.rx.recv().await {
            records.push(record);
        }
        records
    }

    pub fn into_stream(self) -> ReceiverStream<CompletionOutput> {
        ReceiverStream::new(self.rx)
    }
}
