//! OpenAI-compatible completion client

use super::models::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use super::sse::{SseData, SseLineDecoder};
use super::stream::{GenerationStream, StreamEvent};
use super::{CompletionOracle, CompletionRequest, OracleError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Completion oracle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Base URL; `/v1/chat/completions` is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Deadline for non-streaming completions
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Events buffered between the producer task and the relay
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_stream_buffer() -> usize {
    16
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Client for `/v1/chat/completions`
pub struct OpenAiClient {
    http: Client,
    config: OracleConfig,
}

impl OpenAiClient {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        // No overall timeout here: it would cut long-running streams
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| OracleError::RequestFailed(e.to_string()))?;

        Ok(Self { http, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send(
        &self,
        body: &ChatCompletionRequest<'_>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, OracleError> {
        let mut req = self.http.post(self.completions_url()).json(body);

        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(e.to_string())
            } else {
                OracleError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OracleError::UpstreamError(format!(
                "Status {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionOracle for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError> {
        debug!("Requesting completion from model {}", request.model);

        let body = ChatCompletionRequest::from_request(request, false);
        let response = self.send(&body, Some(self.config.timeout())).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OracleError::InvalidResponse("No choices in response".to_string()))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<GenerationStream, OracleError> {
        debug!("Opening completion stream for model {}", request.model);

        let body = ChatCompletionRequest::from_request(request, true);
        let response = self.send(&body, None).await?;

        Ok(GenerationStream::spawn(self.config.stream_buffer, move |tx| {
            pump_events(response, tx)
        }))
    }
}

/// Decode an SSE completion body into stream events until a terminal event
async fn pump_events(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut body = Box::pin(response.bytes_stream());
    let mut decoder = SseLineDecoder::new();
    let mut finished = false;

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!("Stream consumer went away, stopping producer");
                return;
            }
            next = body.next() => next,
        };

        let (lines, at_eof) = match next {
            Some(Ok(bytes)) => (decoder.push(&bytes), false),
            Some(Err(e)) => {
                warn!("Completion stream read failed: {}", e);
                let _ = tx
                    .send(StreamEvent::Error(format!("Stream read failed: {}", e)))
                    .await;
                return;
            }
            None => (decoder.finish(), true),
        };

        for line in lines {
            let payload = match line {
                SseData::Done => {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
                SseData::Payload(payload) => payload,
            };

            match interpret_chunk(&payload) {
                Ok((content, done)) => {
                    finished |= done;
                    if let Some(text) = content {
                        if tx.send(StreamEvent::Token(text)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(message) => {
                    let _ = tx.send(StreamEvent::Error(message)).await;
                    return;
                }
            }
        }

        if at_eof {
            let last = if finished {
                StreamEvent::Done
            } else {
                StreamEvent::Error("Upstream closed the stream before completion".to_string())
            };
            let _ = tx.send(last).await;
            return;
        }
    }
}

/// Extract the text delta and whether the choice finished
fn interpret_chunk(payload: &str) -> Result<(Option<String>, bool), String> {
    let chunk: ChatCompletionChunk =
        serde_json::from_str(payload).map_err(|e| format!("Invalid stream chunk: {}", e))?;

    if let Some(error) = chunk.error {
        return Err(error.message);
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok((None, false));
    };
    let content = choice.delta.content.filter(|c| !c.is_empty());
    Ok((content, choice.finish_reason.is_some()))
}
