//! Channel-backed response sink for HTTP streaming

use super::{ResponseSink, SinkClosed};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// One frame of a streamed response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chunk(String),
    Done,
    Error(String),
}

/// Sink that hands frames to the HTTP body through a bounded channel
///
/// `open` fires a one-shot signal instead of writing a frame, so the handler
/// knows when to commit to a streaming response. Until then a failure can
/// still be reported as a plain error status.
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
    opened: Option<oneshot::Sender<()>>,
}

impl ChannelSink {
    /// Build a sink with its frame receiver and open signal
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>, oneshot::Receiver<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (opened_tx, opened_rx) = oneshot::channel();
        let sink = Self {
            tx,
            opened: Some(opened_tx),
        };
        (sink, rx, opened_rx)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), SinkClosed> {
        self.tx.send(frame).await.map_err(|_| SinkClosed)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn open(&mut self) -> Result<(), SinkClosed> {
        match self.opened.take() {
            Some(signal) => signal.send(()).map_err(|_| SinkClosed),
            None => Ok(()),
        }
    }

    async fn write(&mut self, chunk: String) -> Result<(), SinkClosed> {
        self.send(Frame::Chunk(chunk)).await
    }

    async fn finish(&mut self) -> Result<(), SinkClosed> {
        self.send(Frame::Done).await
    }

    async fn fail(&mut self, message: &str) -> Result<(), SinkClosed> {
        self.send(Frame::Error(message.to_string())).await
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
