//! Bounded message pipe between a run and its caller

use crate::entity::Message;
use crate::error::{OrchestratorError, Result};
use tokio::sync::mpsc;

/// Default pipe capacity
pub const DEFAULT_STREAM_BUFFER: usize = 10;

/// Create a bounded pipe; a zero capacity falls back to the default
pub fn pipe(capacity: usize) -> (MessageWriter, MessageStream) {
    let capacity = if capacity == 0 {
        DEFAULT_STREAM_BUFFER
    } else {
        capacity
    };
    let (tx, rx) = mpsc::channel(capacity);
    (MessageWriter { tx }, MessageStream { rx })
}

/// Write side handed to the run
#[derive(Debug, Clone)]
pub struct MessageWriter {
    tx: mpsc::Sender<Message>,
}

impl MessageWriter {
    /// Send a message, waiting while the buffer is full
    pub async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| OrchestratorError::StreamClosed)
    }

    /// The reader went away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read side returned to the caller
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Message>,
}

impl MessageStream {
    /// Next message; `None` once the run closed the pipe
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Stop reading; pending and future writes fail
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Drain every remaining message
    pub async fn collect(mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.rx.recv().await {
            messages.push(message);
        }
        messages
    }
}
