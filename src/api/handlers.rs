//! HTTP handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn, Instrument};

use crate::api::models::{ApiError, ChatRequest, HealthResponse};
use crate::chat::ChatPipeline;
use crate::error::ChatError;
use crate::metrics::METRICS;
use crate::relay::{ChannelSink, Frame, RelayOutcome};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
    /// Frames buffered between the relay and the response body
    pub stream_buffer: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<ChatPipeline>, stream_buffer: usize) -> Self {
        Self {
            pipeline,
            stream_buffer,
        }
    }
}

/// Status code for a failure reported before streaming starts
pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::UnsupportedModel { .. } | ChatError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        ChatError::RetrievalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ChatError::Summarization(_) | ChatError::GenerationStream(_) => StatusCode::BAD_GATEWAY,
        ChatError::Configuration(_) | ChatError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        (status, Json(ApiError::new(self.code(), self.to_string()))).into_response()
    }
}

/// Aborts the spawned pipeline if the handler is dropped before the
/// response has been handed to the stream body
struct AbortOnDrop<T> {
    handle: JoinHandle<T>,
    armed: bool,
}

impl<T> AbortOnDrop<T> {
    fn new(handle: JoinHandle<T>) -> Self {
        Self {
            handle,
            armed: true,
        }
    }

    /// Let the task outlive the handler
    fn disarm(mut self) {
        self.armed = false;
    }

    async fn join(&mut self) -> Result<T, JoinError> {
        (&mut self.handle).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        if self.armed {
            self.handle.abort();
        }
    }
}

fn reject(err: ChatError) -> Response {
    let response = err.into_response();
    METRICS.record_chat_request(response.status().as_str());
    response
}

/// Answer a question as a server-sent event stream
///
/// POST /api/v1/chat
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let start = Instant::now();

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected chat body: {}", rejection.body_text());
            return reject(ChatError::InvalidRequest(rejection.body_text()));
        }
    };

    let query = match request.into_query() {
        Ok(query) => query,
        Err(e) => {
            warn!("Rejected chat request: {}", e);
            return reject(e);
        }
    };

    let span = query.span();
    span.in_scope(|| info!("Chat request: {} turns", query.turns.len()));

    let (mut sink, frames, opened) = ChannelSink::new(state.stream_buffer);
    let pipeline = state.pipeline.clone();
    let mut task = AbortOnDrop::new(tokio::spawn(
        async move { pipeline.respond(&query, &mut sink).await }.instrument(span.clone()),
    ));

    // The relay signals once the first output is ready; until then failures
    // still map to a status code
    if opened.await.is_ok() {
        // From here the relay watches the body for disconnect
        task.disarm();
        METRICS.record_chat_request("200");
        METRICS.observe_stage("time_to_first_chunk", start.elapsed());
        return Sse::new(frame_stream(frames))
            .keep_alive(KeepAlive::default())
            .into_response();
    }

    let err = match task.join().await {
        Ok(Ok(RelayOutcome::ProducerFailed { error, .. })) => ChatError::GenerationStream(error),
        Ok(Ok(outcome)) => {
            ChatError::Internal(format!("Stream ended before opening: {:?}", outcome))
        }
        Ok(Err(e)) => e,
        Err(e) => ChatError::Internal(format!("Chat task failed: {}", e)),
    };
    reject(err)
}

fn frame_stream(frames: mpsc::Receiver<Frame>) -> impl Stream<Item = Result<Event, axum::Error>> {
    futures::stream::unfold(frames, |mut frames| async move {
        let frame = frames.recv().await?;
        Some((frame_event(frame), frames))
    })
}

fn frame_event(frame: Frame) -> Result<Event, axum::Error> {
    match frame {
        Frame::Chunk(content) => Event::default().json_data(serde_json::json!({ "content": content })),
        Frame::Done => Ok(Event::default().event("done").data("[DONE]")),
        Frame::Error(message) => Event::default()
            .event("error")
            .json_data(serde_json::json!({ "message": message })),
    }
}

/// Liveness probe
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Prometheus scrape endpoint
///
/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ChatError::UnsupportedModel {
                model: "x".to_string()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ChatError::RetrievalUnavailable("down".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ChatError::Summarization("empty".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ChatError::GenerationStream("401".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ChatError::Internal("bug".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_abort_on_drop_cancels_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = AbortOnDrop::new(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            let _ = tx.send(());
        }));
        drop(task);
        // The sender is dropped without sending once the task is aborted
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_disarmed_task_runs_to_completion() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let task = AbortOnDrop::new(tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = tx.send(7);
        }));
        task.disarm();
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_frame_stream_ends_with_channel() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel(4);
        tx.send(Frame::Chunk("a\r\nb".to_string())).await.unwrap();
        tx.send(Frame::Done).await.unwrap();
        drop(tx);

        let events: Vec<_> = frame_stream(rx).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_ok()));
    }
}
