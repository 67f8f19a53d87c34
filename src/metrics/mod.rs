//! Prometheus metrics for the routing core
//!
//! Counters for persistence activity and for accounting repairs, so a
//! drifting QoS byte counter shows up on a dashboard instead of being
//! silently clamped.

use std::sync::OnceLock;

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tracing::error;

/// All core metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // QoS queue
    pub qos_queue_byte_drift: IntCounter,

    // Retained messages
    pub retained_messages_current: IntGauge,
    pub retained_bytes_current: IntGauge,
    pub retained_messages_saved: IntCounter,
    pub retained_messages_loaded: IntCounter,

    // Checkpoints
    pub checkpoints_total: IntCounter,
    pub checkpoint_failures_total: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let qos_queue_byte_drift = IntCounter::with_opts(Opts::new(
            "vibemq_qos_queue_byte_drift_total",
            "Times a QoS queue byte counter would have gone negative and was clamped",
        ))?;

        let retained_messages_current = IntGauge::with_opts(Opts::new(
            "vibemq_retained_messages_current",
            "Current number of retained messages",
        ))?;

        let retained_bytes_current = IntGauge::with_opts(Opts::new(
            "vibemq_retained_bytes_current",
            "Current bytes held by retained messages (topic + payload)",
        ))?;

        let retained_messages_saved = IntCounter::with_opts(Opts::new(
            "vibemq_retained_messages_saved_total",
            "Retained messages written to disk",
        ))?;

        let retained_messages_loaded = IntCounter::with_opts(Opts::new(
            "vibemq_retained_messages_loaded_total",
            "Retained messages read back from disk",
        ))?;

        let checkpoints_total = IntCounter::with_opts(Opts::new(
            "vibemq_checkpoints_total",
            "Retained message checkpoints completed",
        ))?;

        let checkpoint_failures_total = IntCounter::with_opts(Opts::new(
            "vibemq_checkpoint_failures_total",
            "Retained message checkpoints that failed",
        ))?;

        registry.register(Box::new(qos_queue_byte_drift.clone()))?;
        registry.register(Box::new(retained_messages_current.clone()))?;
        registry.register(Box::new(retained_bytes_current.clone()))?;
        registry.register(Box::new(retained_messages_saved.clone()))?;
        registry.register(Box::new(retained_messages_loaded.clone()))?;
        registry.register(Box::new(checkpoints_total.clone()))?;
        registry.register(Box::new(checkpoint_failures_total.clone()))?;

        Ok(Self {
            registry,
            qos_queue_byte_drift,
            retained_messages_current,
            retained_bytes_current,
            retained_messages_saved,
            retained_messages_loaded,
            checkpoints_total,
            checkpoint_failures_total,
        })
    }

    pub fn retained_message_stored(&self, bytes: usize) {
        self.retained_messages_current.inc();
        self.retained_bytes_current.add(bytes as i64);
    }

    pub fn retained_message_removed(&self, bytes: usize) {
        self.retained_messages_current.dec();
        self.retained_bytes_current.sub(bytes as i64);
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

static GLOBAL: OnceLock<Option<Metrics>> = OnceLock::new();

/// Process-wide metrics, created on first use.
///
/// `None` only if the metrics could not be registered, which is logged once.
pub fn global() -> Option<&'static Metrics> {
    GLOBAL
        .get_or_init(|| match Metrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                error!("Failed to initialize metrics: {}", e);
                None
            }
        })
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.qos_queue_byte_drift.inc();
        metrics.retained_message_stored(10);
        metrics.retained_message_stored(5);
        metrics.retained_message_removed(10);

        assert_eq!(metrics.retained_messages_current.get(), 1);
        assert_eq!(metrics.retained_bytes_current.get(), 5);

        let text = metrics.render().unwrap();
        assert!(text.contains("vibemq_qos_queue_byte_drift_total 1"));
        assert!(text.contains("vibemq_retained_messages_current 1"));
        assert!(text.contains("vibemq_checkpoints_total 0"));
    }

    #[test]
    fn test_global_is_shared() {
        let a = global().unwrap() as *const Metrics;
        let b = global().unwrap() as *const Metrics;
        assert_eq!(a, b);
    }
}
