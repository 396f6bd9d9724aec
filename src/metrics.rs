//! Prometheus metrics for the LLM broker.

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for broker metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total requests counter with provider and status labels
    pub static ref REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("requests_total", "Total number of brokered requests")
            .namespace("llm_broker"),
        &["provider", "status"]
    ).expect("metric can be created");

    /// Request duration histogram with provider label
    pub static ref REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "request_duration_seconds",
            "End-to-end request duration in seconds"
        )
        .namespace("llm_broker")
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["provider"]
    ).expect("metric can be created");

    /// Current queue depth gauge with queue label
    pub static ref QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new("queue_depth", "Current number of items waiting per queue")
            .namespace("llm_broker"),
        &["queue"]
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once before starting the server.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    Ok(())
}

/// Encode the current metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_encode() {
        // Registration may race with other tests; either outcome is fine
        let _ = register_metrics();
        REQUESTS_TOTAL.with_label_values(&["mistral", "success"]).inc();
        let text = gather_metrics();
        assert!(text.contains("llm_broker_requests_total"));
    }
}
