//! Prometheus metrics for the Aterges gateway.
//!
//! Metrics live in a crate-owned `Registry` so several app instances (tests)
//! can coexist in one process. `/metrics` renders it in text format.

use prometheus::{
    histogram_opts, opts, CounterVec, Encoder, HistogramVec, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    integration_ops_total: CounterVec,
    verifications_total: CounterVec,
    verification_duration_seconds: HistogramVec,
    chat_requests_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let integration_ops_total = CounterVec::new(
            opts!(
                "aterges_integration_ops_total",
                "Integration API operations by outcome"
            ),
            &["op", "outcome"],
        )?;
        let verifications_total = CounterVec::new(
            opts!(
                "aterges_verifications_total",
                "Credential verifications by provider and result"
            ),
            &["provider", "result"],
        )?;
        let verification_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "aterges_verification_duration_seconds",
                "Provider check latency in seconds",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            ),
            &["provider"],
        )?;
        let chat_requests_total = CounterVec::new(
            opts!("aterges_chat_requests_total", "Chat proxy requests by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(integration_ops_total.clone()))?;
        registry.register(Box::new(verifications_total.clone()))?;
        registry.register(Box::new(verification_duration_seconds.clone()))?;
        registry.register(Box::new(chat_requests_total.clone()))?;

        Ok(Self {
            registry,
            integration_ops_total,
            verifications_total,
            verification_duration_seconds,
            chat_requests_total,
        })
    }

    pub fn integration_op(&self, op: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.integration_ops_total
            .with_label_values(&[op, outcome])
            .inc();
    }

    pub fn verification(&self, provider: &str, success: bool, elapsed_secs: f64) {
        let result = if success { "connected" } else { "error" };
        self.verifications_total
            .with_label_values(&[provider, result])
            .inc();
        self.verification_duration_seconds
            .with_label_values(&[provider])
            .observe(elapsed_secs);
    }

    pub fn chat(&self, outcome: &str) {
        self.chat_requests_total.with_label_values(&[outcome]).inc();
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
