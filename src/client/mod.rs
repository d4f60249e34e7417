//! Client-facing helpers
//!
//! LDAP URL parsing and classification.

pub mod url;

pub use url::{is_ldap_url, split_url, LdapUrl, UrlScheme};
