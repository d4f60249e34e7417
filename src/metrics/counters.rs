//! Counter helpers

use super::labels;
use metrics::counter;

/// Request written to the transport
pub fn operation_dispatched(kind: &'static str) {
    counter!(labels::OPERATIONS_DISPATCHED, labels::KIND => kind).increment(1);
}

/// Response queued for a live operation
pub fn message_received(kind: &'static str) {
    counter!(labels::MESSAGES_RECEIVED, labels::KIND => kind).increment(1);
}

/// Response dropped by the router
pub fn message_discarded() {
    counter!(labels::MESSAGES_DISCARDED).increment(1);
}

/// `fetch` deadline passed
pub fn fetch_timeout() {
    counter!(labels::FETCH_TIMEOUTS).increment(1);
}

/// Operation abandoned
pub fn abandon() {
    counter!(labels::ABANDONS).increment(1);
}

/// Connect failure or loss of the server
pub fn connection_error(reason: &'static str) {
    counter!(labels::CONNECTION_ERRORS, labels::REASON => reason).increment(1);
}

/// TLS upgrade attempt finished
pub fn tls_upgrade(result: &'static str) {
    counter!(labels::TLS_UPGRADES, labels::RESULT => result).increment(1);
}
