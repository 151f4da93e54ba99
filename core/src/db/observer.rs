//! Query latency observability
//!
//! Every executed statement reports `(operation, write, seconds)`.

use prometheus::{HistogramOpts, HistogramVec, Registry};

use crate::config::DatabaseSettings;

#[cfg_attr(test, mockall::automock)]
pub trait QueryObserver: Send + Sync {
    fn observe(&self, operation: &str, write: bool, seconds: f64);
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl QueryObserver for NoopObserver {
    fn observe(&self, _operation: &str, _write: bool, _seconds: f64) {}
}

/// Latency histogram labelled by query name and write flag.
#[derive(Clone)]
pub struct PrometheusObserver {
    latency: HistogramVec,
}

impl PrometheusObserver {
    /// Create `{namespace}_query_latency_seconds` and register it on `registry`.
    pub fn register(namespace: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
        let latency = HistogramVec::new(
            HistogramOpts::new(
                format!("{}_query_latency_seconds", namespace),
                "database query latency in seconds.",
            ),
            &["query", "write"],
        )?;
        registry.register(Box::new(latency.clone()))?;
        Ok(Self { latency })
    }

    /// Register under the namespace configured in `settings`.
    pub fn for_settings(settings: &DatabaseSettings, registry: &Registry) -> Result<Self, prometheus::Error> {
        Self::register(&settings.metrics_namespace, registry)
    }
}

impl QueryObserver for PrometheusObserver {
    fn observe(&self, operation: &str, write: bool, seconds: f64) {
        let write = if write { "true" } else { "false" };
        self.latency
            .with_label_values(&[operation, write])
            .observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_observer_records_per_label() {
        let registry = Registry::new();
        let observer = PrometheusObserver::register("pstate_test", &registry).unwrap();

        observer.observe("sender_key_shared_get_recipients", false, 0.002);
        observer.observe("sender_key_shared_get_recipients", false, 0.004);
        observer.observe("sender_key_shared_mark_distributed", true, 0.010);

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        let family = &families[0];
        assert_eq!(family.get_name(), "pstate_test_query_latency_seconds");

        let read = family
            .get_metric()
            .iter()
            .find(|m| {
                m.get_label()
                    .iter()
                    .any(|l| l.get_name() == "write" && l.get_value() == "false")
            })
            .unwrap();
        assert_eq!(read.get_histogram().get_sample_count(), 2);
    }

    #[test]
    fn test_namespace_taken_from_settings() {
        let registry = Registry::new();
        let settings = DatabaseSettings {
            metrics_namespace: "signal_state".to_string(),
            ..DatabaseSettings::default()
        };
        let observer = PrometheusObserver::for_settings(&settings, &registry).unwrap();
        observer.observe("sender_key_shared_revoke", true, 0.001);

        let families = registry.gather();
        assert_eq!(families[0].get_name(), "signal_state_query_latency_seconds");
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        PrometheusObserver::register("pstate_dup", &registry).unwrap();
        assert!(PrometheusObserver::register("pstate_dup", &registry).is_err());
    }
}
