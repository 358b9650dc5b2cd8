//! Prometheus registry for the whole process: counters, gauges, and
//! millisecond histograms, plus text and JSON expositions.

use std::sync::Arc;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

use crate::breaker::BreakerEvent;

/// Millisecond buckets shared by every duration histogram.
const MS_BUCKETS: &[f64] = &[
    50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0,
];

pub struct Telemetry {
    registry: Registry,

    pub requests_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub cache_events_total: IntCounterVec,
    pub feedback_total: IntCounterVec,

    pub queue_depth: IntGauge,
    pub active_jobs: IntGauge,
    pub active_sessions: IntGauge,
    pub breaker_state: IntGaugeVec,

    pub ingress_duration_ms: Histogram,
    pub job_duration_ms: Histogram,
    pub generator_duration_ms: Histogram,
    pub analysis_duration_ms: Histogram,
}

fn histogram(name: &str, help: &str) -> Histogram {
    Histogram::with_opts(HistogramOpts::new(name, help).buckets(MS_BUCKETS.to_vec()))
        .expect("valid histogram opts")
}

impl Telemetry {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("scriptflow_requests_total", "Requests by endpoint"),
            &["endpoint"],
        )
        .expect("valid counter opts");
        let errors_total = IntCounterVec::new(
            Opts::new("scriptflow_errors_total", "Errors by class"),
            &["type"],
        )
        .expect("valid counter opts");
        let cache_events_total = IntCounterVec::new(
            Opts::new("scriptflow_cache_events_total", "Cache hits/misses by tier"),
            &["tier", "outcome"],
        )
        .expect("valid counter opts");
        let feedback_total = IntCounterVec::new(
            Opts::new("scriptflow_feedback_total", "Feedback events by polarity"),
            &["polarity"],
        )
        .expect("valid counter opts");

        let queue_depth =
            IntGauge::new("scriptflow_queue_depth", "Queued jobs").expect("valid gauge opts");
        let active_jobs =
            IntGauge::new("scriptflow_active_jobs", "Jobs currently processing")
                .expect("valid gauge opts");
        let active_sessions =
            IntGauge::new("scriptflow_active_sessions", "Live conversational sessions")
                .expect("valid gauge opts");
        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "scriptflow_breaker_state",
                "Circuit state per service (0=closed, 1=half-open, 2=open)",
            ),
            &["service"],
        )
        .expect("valid gauge opts");

        let ingress_duration_ms =
            histogram("scriptflow_ingress_duration_ms", "Ingress handling duration");
        let job_duration_ms = histogram("scriptflow_job_duration_ms", "Whole-job duration");
        let generator_duration_ms =
            histogram("scriptflow_generator_duration_ms", "Script generation duration");
        let analysis_duration_ms =
            histogram("scriptflow_analysis_duration_ms", "Reel analysis duration");

        for collector in [
            Box::new(requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(errors_total.clone()),
            Box::new(cache_events_total.clone()),
            Box::new(feedback_total.clone()),
            Box::new(queue_depth.clone()),
            Box::new(active_jobs.clone()),
            Box::new(active_sessions.clone()),
            Box::new(breaker_state.clone()),
            Box::new(ingress_duration_ms.clone()),
            Box::new(job_duration_ms.clone()),
            Box::new(generator_duration_ms.clone()),
            Box::new(analysis_duration_ms.clone()),
        ] {
            registry.register(collector).expect("unique collector");
        }

        Arc::new(Self {
            registry,
            requests_total,
            errors_total,
            cache_events_total,
            feedback_total,
            queue_depth,
            active_jobs,
            active_sessions,
            breaker_state,
            ingress_duration_ms,
            job_duration_ms,
            generator_duration_ms,
            analysis_duration_ms,
        })
    }

    /// Prometheus text exposition.
    pub fn render_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            warn!(error = %e, "Metric encoding failed");
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    /// JSON debug exposition: family name → flat metric list.
    pub fn render_json(&self) -> serde_json::Value {
        let families = self.registry.gather();
        let mut out = serde_json::Map::new();
        for family in families {
            let metrics: Vec<serde_json::Value> = family
                .get_metric()
                .iter()
                .map(|m| {
                    let labels: serde_json::Map<String, serde_json::Value> = m
                        .get_label()
                        .iter()
                        .map(|l| {
                            (
                                l.get_name().to_string(),
                                serde_json::Value::String(l.get_value().to_string()),
                            )
                        })
                        .collect();
                    let value = if m.has_counter() {
                        serde_json::json!(m.get_counter().get_value())
                    } else if m.has_gauge() {
                        serde_json::json!(m.get_gauge().get_value())
                    } else if m.has_histogram() {
                        serde_json::json!({
                            "count": m.get_histogram().get_sample_count(),
                            "sum_ms": m.get_histogram().get_sample_sum(),
                        })
                    } else {
                        serde_json::Value::Null
                    };
                    serde_json::json!({ "labels": labels, "value": value })
                })
                .collect();
            out.insert(family.get_name().to_string(), serde_json::json!(metrics));
        }
        serde_json::Value::Object(out)
    }

    /// Keep the per-service breaker gauge in sync with transition events.
    pub fn watch_breakers(
        self: Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<BreakerEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                self.breaker_state
                    .with_label_values(&[&event.service])
                    .set(event.to.gauge_value());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_text_exposition() {
        let telemetry = Telemetry::new();
        telemetry.requests_total.with_label_values(&["generate"]).inc();
        telemetry.errors_total.with_label_values(&["timeout"]).inc();
        let text = telemetry.render_text();
        assert!(text.contains("scriptflow_requests_total"));
        assert!(text.contains("scriptflow_errors_total"));
        assert!(text.contains("timeout"));
    }

    #[test]
    fn histogram_buckets_match_contract() {
        let telemetry = Telemetry::new();
        telemetry.job_duration_ms.observe(1_200.0);
        let text = telemetry.render_text();
        assert!(text.contains("le=\"2500\""));
        assert!(text.contains("le=\"60000\""));
    }

    #[test]
    fn json_exposition_includes_gauges() {
        let telemetry = Telemetry::new();
        telemetry.queue_depth.set(3);
        let json = telemetry.render_json();
        let depth = &json["scriptflow_queue_depth"][0]["value"];
        assert_eq!(depth.as_f64(), Some(3.0));
    }
}
