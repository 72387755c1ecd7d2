//! Federated learning metrics on the default prometheus registry.
//!
//! Exposed by the `/metrics` route of [`crate::health_router`].

use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter, Histogram, IntCounter};

pub struct FederatedLearningMetrics {
    pub rounds_started_total: IntCounter,
    pub rounds_completed_total: IntCounter,
    pub rounds_failed_total: IntCounter,
    pub updates_accepted_total: IntCounter,
    pub participants_skipped_total: IntCounter,
    pub models_published_total: IntCounter,
    pub aggregation_latency_ms: Histogram,
}

// Registration only fails on duplicate names, which would be a bug in this file.
pub static FL_METRICS: Lazy<FederatedLearningMetrics> = Lazy::new(|| FederatedLearningMetrics {
    rounds_started_total: register_int_counter!("fedbank_rounds_started_total", "Training rounds opened")
        .expect("register fedbank_rounds_started_total"),
    rounds_completed_total: register_int_counter!("fedbank_rounds_completed_total", "Training rounds completed")
        .expect("register fedbank_rounds_completed_total"),
    rounds_failed_total: register_int_counter!("fedbank_rounds_failed_total", "Training rounds failed")
        .expect("register fedbank_rounds_failed_total"),
    updates_accepted_total: register_int_counter!("fedbank_updates_accepted_total", "Gradient updates recorded in a round")
        .expect("register fedbank_updates_accepted_total"),
    participants_skipped_total: register_int_counter!(
        "fedbank_participants_skipped_total",
        "Participants skipped after a local training failure"
    )
    .expect("register fedbank_participants_skipped_total"),
    models_published_total: register_int_counter!("fedbank_models_published_total", "Global model versions published")
        .expect("register fedbank_models_published_total"),
    aggregation_latency_ms: register_histogram!(
        "fedbank_aggregation_latency_ms",
        "Aggregation latency ms",
        vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0]
    )
    .expect("register fedbank_aggregation_latency_ms"),
});
