//! Cancelable stream of generated output
//!
//! A producer task pushes events into a bounded channel; the consumer pulls
//! them in order. Dropping or cancelling the stream aborts the producer, so
//! nothing is generated or buffered after the consumer goes away.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One unit of generated output or a terminal marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token(_))
    }
}

/// Receiving half of a generation, owning its producer task
pub struct GenerationStream {
    rx: mpsc::Receiver<StreamEvent>,
    producer: Option<JoinHandle<()>>,
}

impl GenerationStream {
    /// Spawn `produce` with the sending half of a channel of `capacity`
    pub fn spawn<F, Fut>(capacity: usize, produce: F) -> Self
    where
        F: FnOnce(mpsc::Sender<StreamEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let producer = tokio::spawn(produce(tx));
        Self {
            rx,
            producer: Some(producer),
        }
    }

    /// Stream that replays a fixed list of events
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        Self::spawn(1, move |tx| async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        })
    }

    /// Wait for the next event; `None` once the producer is gone
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Stop consuming and abort the producer
    pub fn cancel(&mut self) {
        self.rx.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.producer.is_none()
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.cancel();
    }
}
