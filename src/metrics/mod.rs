//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry, Counter, CounterVec,
    Histogram, HistogramVec, Opts, Registry,
};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Chat API metrics
    pub chat_requests: CounterVec,
    pub stage_duration: HistogramVec,

    // Token budget metrics
    pub token_budget_used: Histogram,
    pub token_budget_remaining: Histogram,
    pub token_budget_overflows: Counter,
    pub token_budget_summarizations: Counter,
    pub admitted_turns: Histogram,

    // Streaming metrics
    pub stream_chunks: Counter,
    pub stream_outcomes: CounterVec,

    // Retrieval metrics
    pub embedding_cache: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let chat_requests = register_counter_vec_with_registry!(
            Opts::new("chat_requests_total", "Total chat requests"),
            &["status"],
            registry
        )?;

        let stage_duration = register_histogram_vec_with_registry!(
            "chat_stage_duration_seconds",
            "Duration of each chat pipeline stage in seconds",
            &["stage"],
            registry
        )?;

        // Token budget metrics
        let token_budget_used = register_histogram_with_registry!(
            "token_budget_used",
            "Tokens used per request",
            registry
        )?;

        let token_budget_remaining = register_histogram_with_registry!(
            "token_budget_remaining",
            "Tokens remaining per request",
            registry
        )?;

        let token_budget_overflows = register_counter_with_registry!(
            Opts::new("token_budget_overflows_total", "Total token budget overflows"),
            registry
        )?;

        let token_budget_summarizations = register_counter_with_registry!(
            Opts::new("token_budget_summarizations_total", "Total summarizations performed"),
            registry
        )?;

        let admitted_turns = register_histogram_with_registry!(
            "token_budget_admitted_turns",
            "Conversation turns admitted per request",
            vec![0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0],
            registry
        )?;

        // Streaming metrics
        let stream_chunks = register_counter_with_registry!(
            Opts::new("stream_chunks_total", "Total chunks forwarded to callers"),
            registry
        )?;

        let stream_outcomes = register_counter_vec_with_registry!(
            Opts::new("stream_outcomes_total", "Finished streams by outcome"),
            &["outcome"],
            registry
        )?;

        let embedding_cache = register_counter_vec_with_registry!(
            Opts::new("embedding_cache_lookups_total", "Embedding cache lookups"),
            &["result"],
            registry
        )?;

        Ok(Self {
            registry,
            chat_requests,
            stage_duration,
            token_budget_used,
            token_budget_remaining,
            token_budget_overflows,
            token_budget_summarizations,
            admitted_turns,
            stream_chunks,
            stream_outcomes,
            embedding_cache,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a chat request by response status
    pub fn record_chat_request(&self, status: &str) {
        self.chat_requests.with_label_values(&[status]).inc();
    }

    /// Record how long a pipeline stage took
    pub fn observe_stage(&self, stage: &str, elapsed: Duration) {
        self.stage_duration
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64());
    }

    /// Record token budget usage
    pub fn record_token_budget(&self, used: usize, remaining: usize, overflow: bool) {
        self.token_budget_used.observe(used as f64);
        self.token_budget_remaining.observe(remaining as f64);
        if overflow {
            self.token_budget_overflows.inc();
        }
    }

    /// Record a summarization event
    pub fn record_summarization(&self) {
        self.token_budget_summarizations.inc();
    }

    pub fn record_admitted_turns(&self, turns: usize) {
        self.admitted_turns.observe(turns as f64);
    }

    pub fn record_stream_chunk(&self) {
        self.stream_chunks.inc();
    }

    /// Record how a relayed stream ended
    pub fn record_stream_outcome(&self, outcome: &str) {
        self.stream_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_embedding_cache(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.embedding_cache.with_label_values(&[result]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_record_token_budget() {
        let metrics = Metrics::new().unwrap();
        metrics.record_token_budget(5000, 3000, false);
        metrics.record_token_budget(8100, 0, true);
        assert_eq!(metrics.token_budget_overflows.get(), 1.0);
    }

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_chat_request("200");
        metrics.record_stream_outcome("completed");
        metrics.observe_stage("retrieval", Duration::from_millis(12));

        let text = metrics.export_prometheus();
        assert!(text.contains("chat_requests_total"));
        assert!(text.contains("stream_outcomes_total"));
        assert!(text.contains("chat_stage_duration_seconds"));
    }
}
