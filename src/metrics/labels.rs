//! Metric names and label values

/// Requests written, labelled by `kind`
pub const OPERATIONS_DISPATCHED: &str = "ldap_wire_operations_dispatched_total";
/// Responses routed to a live operation, labelled by `kind`
pub const MESSAGES_RECEIVED: &str = "ldap_wire_messages_received_total";
/// Responses discarded (unknown, released, or abandoned id)
pub const MESSAGES_DISCARDED: &str = "ldap_wire_messages_discarded_total";
/// Fetches that hit their deadline
pub const FETCH_TIMEOUTS: &str = "ldap_wire_fetch_timeouts_total";
/// Abandon requests
pub const ABANDONS: &str = "ldap_wire_abandons_total";
/// Connect failures and server-down events, labelled by `reason`
pub const CONNECTION_ERRORS: &str = "ldap_wire_connection_errors_total";
/// TLS upgrades, labelled by `result`
pub const TLS_UPGRADES: &str = "ldap_wire_tls_upgrades_total";
/// Time spent waiting in `fetch`
pub const FETCH_WAIT_MS: &str = "ldap_wire_fetch_wait_ms";
/// TLS handshake time
pub const TLS_HANDSHAKE_MS: &str = "ldap_wire_tls_handshake_ms";

/// Label key for the operation or message kind
pub const KIND: &str = "kind";
/// Label key for an error reason
pub const REASON: &str = "reason";
/// Label key for an outcome
pub const RESULT: &str = "result";

/// Outcome: success
pub const RESULT_OK: &str = "ok";
/// Outcome: server refused
pub const RESULT_REFUSED: &str = "refused";
/// Outcome: handshake failed
pub const RESULT_FAILED: &str = "failed";

/// Reason: TCP or socket connect failed
pub const REASON_CONNECT: &str = "connect";
/// Reason: peer closed the stream
pub const REASON_EOF: &str = "eof";
/// Reason: read or decode error
pub const REASON_READ: &str = "read";
/// Reason: notice of disconnection
pub const REASON_NOTICE: &str = "notice_of_disconnection";
/// Reason: write to the transport failed
pub const REASON_WRITE: &str = "write";
