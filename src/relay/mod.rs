//! Streaming relay from the generation oracle to the caller
//!
//! The relay pulls [`StreamEvent`]s from a [`GenerationStream`] and forwards
//! them to a [`ResponseSink`] in the order they were produced. It watches the
//! sink for caller disconnect while waiting on the producer, and aborts the
//! producer as soon as the caller goes away.
//!
//! ```text
//! Idle --first event--> Streaming --Done--> Completed
//!   |                       |
//!   +--Error / vanished-----+--Error / vanished / disconnect--> Failed
//! ```

pub mod channel;

pub use channel::{ChannelSink, Frame};

use crate::generation::{GenerationStream, StreamEvent};
use crate::metrics::METRICS;
use async_trait::async_trait;
use tracing::{debug, warn};

/// The caller side of the response is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Response sink closed")]
pub struct SinkClosed;

/// Transport the relay writes to
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Start the response; called at most once, before any write
    async fn open(&mut self) -> Result<(), SinkClosed>;

    async fn write(&mut self, chunk: String) -> Result<(), SinkClosed>;

    /// Finalize a successful response
    async fn finish(&mut self) -> Result<(), SinkClosed>;

    /// Terminate an opened response with an error frame
    async fn fail(&mut self, message: &str) -> Result<(), SinkClosed>;

    /// Resolves once the caller has gone away
    async fn closed(&self);
}

/// Relay lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

impl RelayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayState::Completed | RelayState::Failed)
    }
}

/// How a relayed stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed { chunks: usize },
    ProducerFailed { chunks: usize, error: String },
    Disconnected { chunks: usize },
}

impl RelayOutcome {
    pub fn chunks(&self) -> usize {
        match self {
            RelayOutcome::Completed { chunks }
            | RelayOutcome::ProducerFailed { chunks, .. }
            | RelayOutcome::Disconnected { chunks } => *chunks,
        }
    }

    pub fn state(&self) -> RelayState {
        match self {
            RelayOutcome::Completed { .. } => RelayState::Completed,
            _ => RelayState::Failed,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Completed { .. } => "completed",
            RelayOutcome::ProducerFailed { .. } => "producer_failed",
            RelayOutcome::Disconnected { .. } => "disconnected",
        }
    }
}

/// Forwards one generation stream to one response
pub struct StreamRelay {
    state: RelayState,
    chunks: usize,
}

impl Default for StreamRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRelay {
    pub fn new() -> Self {
        Self {
            state: RelayState::Idle,
            chunks: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Drive `stream` into `sink` until a terminal state
    pub async fn run<S>(mut self, mut stream: GenerationStream, sink: &mut S) -> RelayOutcome
    where
        S: ResponseSink + ?Sized,
    {
        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = sink.closed() => break self.disconnected(&mut stream),
                event = stream.next_event() => event,
            };

            match event {
                Some(StreamEvent::Token(text)) => {
                    if self.state == RelayState::Idle {
                        if sink.open().await.is_err() {
                            break self.disconnected(&mut stream);
                        }
                        self.state = RelayState::Streaming;
                    }
                    if sink.write(text).await.is_err() {
                        break self.disconnected(&mut stream);
                    }
                    self.chunks += 1;
                    METRICS.record_stream_chunk();
                }
                Some(StreamEvent::Done) => {
                    if self.state == RelayState::Idle {
                        if sink.open().await.is_err() {
                            break self.disconnected(&mut stream);
                        }
                    }
                    if sink.finish().await.is_err() {
                        break self.disconnected(&mut stream);
                    }
                    self.state = RelayState::Completed;
                    break RelayOutcome::Completed {
                        chunks: self.chunks,
                    };
                }
                Some(StreamEvent::Error(error)) => {
                    break self.producer_failed(error, &mut stream, sink).await;
                }
                None => {
                    let error = "Generation ended without a terminal event".to_string();
                    break self.producer_failed(error, &mut stream, sink).await;
                }
            }
        };

        METRICS.record_stream_outcome(outcome.label());
        debug!("Relay finished: {:?}", outcome);
        outcome
    }

    fn disconnected(&mut self, stream: &mut GenerationStream) -> RelayOutcome {
        debug!("Caller disconnected after {} chunks", self.chunks);
        stream.cancel();
        self.state = RelayState::Failed;
        RelayOutcome::Disconnected {
            chunks: self.chunks,
        }
    }

    async fn producer_failed<S>(
        &mut self,
        error: String,
        stream: &mut GenerationStream,
        sink: &mut S,
    ) -> RelayOutcome
    where
        S: ResponseSink + ?Sized,
    {
        warn!("Generation failed after {} chunks: {}", self.chunks, error);
        stream.cancel();
        // Before the response opens, the caller still gets a status code
        if self.state == RelayState::Streaming {
            let _ = sink.fail(&error).await;
        }
        self.state = RelayState::Failed;
        RelayOutcome::ProducerFailed {
            chunks: self.chunks,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Open,
        Write(String),
        Finish,
        Fail(String),
    }

    /// Records calls; closes itself after `close_after` writes
    struct RecordingSink {
        calls: Vec<Call>,
        close_after: Option<usize>,
        closed_tx: watch::Sender<bool>,
        closed_rx: watch::Receiver<bool>,
    }

    impl RecordingSink {
        fn new(close_after: Option<usize>) -> Self {
            let (closed_tx, closed_rx) = watch::channel(false);
            Self {
                calls: Vec::new(),
                close_after,
                closed_tx,
                closed_rx,
            }
        }

        fn writes(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, Call::Write(_)))
                .count()
        }
    }

    #[async_trait]
    impl ResponseSink for RecordingSink {
        async fn open(&mut self) -> Result<(), SinkClosed> {
            self.calls.push(Call::Open);
            Ok(())
        }

        async fn write(&mut self, chunk: String) -> Result<(), SinkClosed> {
            if *self.closed_rx.borrow() {
                return Err(SinkClosed);
            }
            self.calls.push(Call::Write(chunk));
            if Some(self.writes()) == self.close_after {
                let _ = self.closed_tx.send(true);
            }
            Ok(())
        }

        async fn finish(&mut self) -> Result<(), SinkClosed> {
            self.calls.push(Call::Finish);
            Ok(())
        }

        async fn fail(&mut self, message: &str) -> Result<(), SinkClosed> {
            self.calls.push(Call::Fail(message.to_string()));
            Ok(())
        }

        async fn closed(&self) {
            let mut rx = self.closed_rx.clone();
            loop {
                let closed = *rx.borrow_and_update();
                if closed || rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    fn tokens(words: &[&str]) -> Vec<StreamEvent> {
        words
            .iter()
            .map(|w| StreamEvent::Token(w.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_chunks_forwarded_in_order() {
        let mut events = tokens(&["The", " answer", " is", " 4."]);
        events.push(StreamEvent::Done);

        let mut sink = RecordingSink::new(None);
        let outcome = StreamRelay::new()
            .run(GenerationStream::from_events(events), &mut sink)
            .await;

        assert_eq!(outcome, RelayOutcome::Completed { chunks: 4 });
        assert_eq!(
            sink.calls,
            vec![
                Call::Open,
                Call::Write("The".to_string()),
                Call::Write(" answer".to_string()),
                Call::Write(" is".to_string()),
                Call::Write(" 4.".to_string()),
                Call::Finish,
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_cancels_producer() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let stream = GenerationStream::spawn(1, move |tx| async move {
            for word in ["The", " answer", " is", " 4."] {
                if tx.send(StreamEvent::Token(word.to_string())).await.is_err() {
                    return;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            let _ = tx.send(StreamEvent::Done).await;
        });

        let mut sink = RecordingSink::new(Some(1));
        let outcome = StreamRelay::new().run(stream, &mut sink).await;

        assert_eq!(outcome, RelayOutcome::Disconnected { chunks: 1 });
        assert_eq!(sink.writes(), 1);
        assert!(!sink.calls.contains(&Call::Finish));

        // At most the chunk already in the channel when the caller left
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(produced.load(Ordering::SeqCst) <= 2);
        assert_eq!(
            sink.calls,
            vec![Call::Open, Call::Write("The".to_string())]
        );
    }

    #[tokio::test]
    async fn test_producer_error_mid_stream() {
        let mut events = tokens(&["partial"]);
        events.push(StreamEvent::Error("upstream reset".to_string()));

        let mut sink = RecordingSink::new(None);
        let outcome = StreamRelay::new()
            .run(GenerationStream::from_events(events), &mut sink)
            .await;

        assert_eq!(outcome.state(), RelayState::Failed);
        assert_eq!(outcome.chunks(), 1);
        assert_eq!(
            sink.calls.last(),
            Some(&Call::Fail("upstream reset".to_string()))
        );
    }

    #[tokio::test]
    async fn test_error_before_first_chunk_never_opens() {
        let mut sink = RecordingSink::new(None);
        let outcome = StreamRelay::new()
            .run(
                GenerationStream::from_events(vec![StreamEvent::Error("rejected".to_string())]),
                &mut sink,
            )
            .await;

        assert!(matches!(outcome, RelayOutcome::ProducerFailed { chunks: 0, .. }));
        assert!(sink.calls.is_empty());
    }

    #[tokio::test]
    async fn test_producer_vanishing_is_failure() {
        let mut sink = RecordingSink::new(None);
        let outcome = StreamRelay::new()
            .run(GenerationStream::from_events(tokens(&["a", "b"])), &mut sink)
            .await;

        assert!(matches!(outcome, RelayOutcome::ProducerFailed { chunks: 2, .. }));
        assert!(matches!(sink.calls.last(), Some(Call::Fail(_))));
    }

    #[tokio::test]
    async fn test_empty_completion_opens_and_finishes() {
        let mut sink = RecordingSink::new(None);
        let outcome = StreamRelay::new()
            .run(GenerationStream::from_events(vec![StreamEvent::Done]), &mut sink)
            .await;

        assert_eq!(outcome, RelayOutcome::Completed { chunks: 0 });
        assert_eq!(sink.calls, vec![Call::Open, Call::Finish]);
    }
}
