//! Asynchronous LDAPv3 client
//!
//! `ldap-wire` speaks LDAPv3 directly over TCP, TLS or Unix sockets. A
//! single [`Connection`] multiplexes any number of outstanding requests by
//! message id; each request returns an [`Operation`] handle whose `fetch`
//! hands back responses as they arrive, so search entries can be consumed
//! while the server is still producing them.
//!
//! ```ignore
//! use ldap_wire::{Connection, Options, Scope};
//! use std::time::Duration;
//!
//! let options = Options::builder()
//!     .network_timeout(Duration::from_secs(5))
//!     .build()?;
//! let conn = Connection::open(["ldap://ldap.example.com"], options).await?;
//! conn.start_tls().await?;
//! conn.bind_and_wait(Some("cn=reader,dc=example,dc=com"), Some("secret")).await?;
//!
//! let op = conn.search("dc=example,dc=com", Scope::Subtree, Some("(mail=*)")).await?;
//! let mut total = 0;
//! loop {
//!     let msg = op.fetch(Some(Duration::from_secs(10))).await?;
//!     total += msg.entry_count()?;
//!     if msg.is_terminal() {
//!         msg.check()?;
//!         break;
//!     }
//! }
//! ```
//!
//! The library installs no `tracing` subscriber and no `metrics` recorder.

#![warn(missing_docs)]

pub mod client;
pub mod connection;
pub mod error;
pub mod info;
pub mod metrics;
pub mod protocol;
pub mod result;

pub use client::{is_ldap_url, split_url, LdapUrl, UrlScheme};
pub use connection::{
    Connection, ConnectionState, CrlCheck, DerefAliases, LdapOption, OptionValue, Options,
    RequireCert, Scope, SearchOptions, Timeval, TlsOptions,
};
pub use error::{error_to_string, Error, ErrorCategory, LdapError, Result, ResultCode};
pub use info::{api_feature_info, api_info, version_string, ApiInfo};
pub use protocol::{Control, Filter, SearchEntry};
pub use result::{Message, MessageKind, Operation, OperationKind, OperationState};
