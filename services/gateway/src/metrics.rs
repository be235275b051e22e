//! Prometheus metrics exposition.
//!
//! - `gateway_requests_total` (counter): labels `protocol`, `status`
//! - `gateway_request_duration_seconds` (histogram): label `protocol`
//! - `gateway_upstream_errors_total` (counter): label `error_kind`
//! - `gateway_account_selections_total` (counter): label `outcome`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "gateway_request_duration_seconds";
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(DURATION_METRIC.to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request with its protocol and outcome status.
pub fn record_request(protocol: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "protocol" => protocol.to_string(), "status" => status_str)
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "protocol" => protocol.to_string()).record(duration_secs);
}

/// Record an upstream call failure by its `ErrorCategory` label.
pub fn record_upstream_error(error_kind: &str) {
    metrics::counter!("gateway_upstream_errors_total", "error_kind" => error_kind.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("openai", 200, 0.05);
        record_upstream_error("rate_limited");
    }

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(DURATION_METRIC.to_string()),
                DURATION_BUCKETS,
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("openai", 200, 0.042);
        record_request("anthropic", 500, 1.5);

        let output = handle.render();
        assert!(output.contains("gateway_requests_total"));
        assert!(output.contains("protocol=\"openai\""));
        assert!(output.contains("status=\"200\""));
        assert!(output.contains("protocol=\"anthropic\""));
        assert!(output.contains("status=\"500\""));
        assert!(output.contains("gateway_request_duration_seconds_bucket"));
    }

    #[test]
    fn record_upstream_error_increments_counter_with_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_upstream_error("rate_limited");
        record_upstream_error("auth_failed");

        let output = handle.render();
        assert!(output.contains("gateway_upstream_errors_total"));
        assert!(output.contains("error_kind=\"rate_limited\""));
        assert!(output.contains("error_kind=\"auth_failed\""));
    }

    #[test]
    fn account_selection_counter_carries_outcome_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::counter!("gateway_account_selections_total", "outcome" => "sticky").increment(1);
        let output = handle.render();
        assert!(output.contains("gateway_account_selections_total"));
        assert!(output.contains("outcome=\"sticky\""));
    }

    #[test]
    fn histogram_buckets_cover_configured_range() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("openai", 200, 0.003);

        let output = handle.render();
        assert!(output.contains("le=\"0.005\""));
        assert!(output.contains("le=\"60\""));
        assert!(output.contains("le=\"+Inf\""));
    }
}
