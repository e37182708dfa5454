//! Prometheus metrics for the secrets manager.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! All metrics live in the global default registry and are registered on
//! first use.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec,
    TextEncoder,
};

pub struct Recorder {
    secret_operations_total: CounterVec,
    rotations_total: CounterVec,
    lock_operations_total: CounterVec,
    configuration_operations_total: CounterVec,
    notifications_total: CounterVec,
    rotation_duration_seconds: HistogramVec,
}

static RECORDER: Lazy<Recorder> = Lazy::new(Recorder::register);

pub fn recorder() -> &'static Recorder {
    &RECORDER
}

impl Recorder {
    fn register() -> Self {
        let secret_operations_total = register_counter_vec!(
            opts!("smgr_secret_operations_total", "Secret operations by kind and type"),
            &["operation", "secret_type"]
        )
        .expect("failed to register smgr_secret_operations_total");

        let rotations_total = register_counter_vec!(
            opts!("smgr_rotations_total", "Rotations by trigger and outcome"),
            &["trigger", "secret_type", "outcome"]
        )
        .expect("failed to register smgr_rotations_total");

        let lock_operations_total = register_counter_vec!(
            opts!("smgr_lock_operations_total", "Locks attached or detached"),
            &["operation"]
        )
        .expect("failed to register smgr_lock_operations_total");

        let configuration_operations_total = register_counter_vec!(
            opts!("smgr_configuration_operations_total", "Configuration registry changes"),
            &["operation", "config_type"]
        )
        .expect("failed to register smgr_configuration_operations_total");

        let notifications_total = register_counter_vec!(
            opts!("smgr_notifications_total", "Notification deliveries by outcome"),
            &["event_type", "outcome"]
        )
        .expect("failed to register smgr_notifications_total");

        let rotation_duration_seconds = register_histogram_vec!(
            prometheus::histogram_opts!(
                "smgr_rotation_duration_seconds",
                "Time spent producing a rotated version",
                vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
            ),
            &["secret_type"]
        )
        .expect("failed to register smgr_rotation_duration_seconds");

        Self {
            secret_operations_total,
            rotations_total,
            lock_operations_total,
            configuration_operations_total,
            notifications_total,
            rotation_duration_seconds,
        }
    }

    pub fn secret_operation(&self, operation: &str, secret_type: &str) {
        self.secret_operations_total
            .with_label_values(&[operation, secret_type])
            .inc();
    }

    pub fn rotation(&self, trigger: &str, secret_type: &str, outcome: &str, seconds: f64) {
        self.rotations_total
            .with_label_values(&[trigger, secret_type, outcome])
            .inc();
        self.rotation_duration_seconds
            .with_label_values(&[secret_type])
            .observe(seconds);
    }

    pub fn locks(&self, operation: &str, count: usize) {
        self.lock_operations_total
            .with_label_values(&[operation])
            .inc_by(count as f64);
    }

    pub fn configuration(&self, operation: &str, config_type: &str) {
        self.configuration_operations_total
            .with_label_values(&[operation, config_type])
            .inc();
    }

    pub fn notification(&self, event_type: &str, outcome: &str) {
        self.notifications_total
            .with_label_values(&[event_type, outcome])
            .inc();
    }
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    Lazy::force(&RECORDER);
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_operations_are_exported() {
        recorder().secret_operation("create", "kv");
        recorder().locks("attach", 2);
        let output = encode_metrics();
        assert!(output.contains("smgr_secret_operations_total"));
        assert!(output.contains("smgr_lock_operations_total"));
    }
}
