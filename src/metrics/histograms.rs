//! Histogram helpers

use super::labels;
use metrics::histogram;

/// Milliseconds a `fetch` call waited before returning
pub fn fetch_wait(millis: u64) {
    histogram!(labels::FETCH_WAIT_MS).record(millis as f64);
}

/// Milliseconds spent in a TLS handshake
pub fn tls_handshake(millis: u64) {
    histogram!(labels::TLS_HANDSHAKE_MS).record(millis as f64);
}
