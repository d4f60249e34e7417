//! Library introspection

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the LDAP C API this library's option and result-code
/// numbering follows
pub const API_VERSION: i32 = 3001;

/// Vendor name reported by [`api_info`]
pub const VENDOR_NAME: &str = "ldap-wire";

/// Optional capabilities and the revision of each
const FEATURES: &[(&str, i32)] = &[
    ("THREAD_SAFE", 1),
    ("X_ASYNC_RESULTS", 1),
    ("X_LDAPI", 1),
    ("X_STARTTLS", 1),
    ("X_TLS", 1),
];

/// What [`api_info`] reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiInfo {
    /// C API version the numbering follows
    pub api_version: i32,
    /// Highest LDAP protocol version spoken
    pub protocol_version: i32,
    /// Supported extension names
    pub extensions: Vec<String>,
    /// Vendor name
    pub vendor_name: String,
    /// Vendor version as `major * 10000 + minor * 100 + patch`
    pub vendor_version: i32,
}

/// API version, protocol version, extensions and vendor of this library
pub fn api_info() -> ApiInfo {
    ApiInfo {
        api_version: API_VERSION,
        protocol_version: crate::protocol::constants::PROTOCOL_VERSION,
        extensions: FEATURES.iter().map(|(name, _)| name.to_string()).collect(),
        vendor_name: VENDOR_NAME.to_string(),
        vendor_version: vendor_version(),
    }
}

/// Revision of each extension named in [`api_info`]
pub fn api_feature_info() -> BTreeMap<String, i32> {
    FEATURES
        .iter()
        .map(|(name, version)| (name.to_string(), *version))
        .collect()
}

/// `"<vendor> <version>"`
pub fn version_string() -> String {
    format!("{} {}", VENDOR_NAME, env!("CARGO_PKG_VERSION"))
}

fn vendor_version() -> i32 {
    let part = |s: &str| s.parse::<i32>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) * 10_000
        + part(env!("CARGO_PKG_VERSION_MINOR")) * 100
        + part(env!("CARGO_PKG_VERSION_PATCH"))
}
