//! Prometheus metrics recording and endpoint.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder on first use and return the handle for
/// rendering. `None` if another recorder was already installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(%e, "Failed to install Prometheus recorder");
                None
            }
        })
        .as_ref()
}

/// Record a start webhook that created a session.
pub fn record_call_started() {
    metrics::counter!("voxbridge_calls_started_total").increment(1);
}

/// Record a media-stream connection opening.
pub fn record_media_session_start() {
    metrics::gauge!("voxbridge_media_sessions_active").increment(1.0);
}

/// Record a media-stream connection closing.
pub fn record_media_session_end() {
    metrics::gauge!("voxbridge_media_sessions_active").decrement(1.0);
}

/// Record a spoken response handed to the telephony leg.
pub fn record_response_delivered() {
    metrics::counter!("voxbridge_responses_delivered_total").increment(1);
}

/// Record a media session that ended on an error of the given kind.
pub fn record_session_aborted(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("voxbridge_sessions_aborted_total", &labels).increment(1);
}
