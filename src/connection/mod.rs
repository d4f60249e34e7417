//! Connection management
//!
//! This module handles:
//! * Transport abstraction (TCP, TLS, Unix socket)
//! * Connection lifecycle (connect, StartTLS, unbind)
//! * Message-id multiplexing and the background reader
//! * Options and TLS configuration

mod conn;
pub(crate) mod dispatch;
mod options;
mod reader;
mod search;
mod state;
mod tls;
mod transport;

pub use conn::Connection;
pub(crate) use conn::Shared;
pub use options::{
    CrlCheck, LdapOption, OptionValue, Options, OptionsBuilder, RequireCert, Timeval, TlsOptions,
    TLS_PACKAGE,
};
pub use search::{DerefAliases, Scope, SearchOptions};
pub use state::ConnectionState;
pub use tls::{parse_server_name, TlsConfig};
pub use transport::Transport;
