//! Background read loop

use super::dispatch::{Dispatcher, Routed};
use super::transport::Transport;
use crate::error::{LdapError, ResultCode};
use crate::metrics::{counters, labels};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, ReadHalf};

const READ_CHUNK: usize = 8 * 1024;

/// How the read loop ended
pub(crate) enum ReaderExit {
    /// A handoff operation completed; the read half is returned untouched
    /// past its terminal response
    Handoff {
        read_half: ReadHalf<Transport>,
        leftover: BytesMut,
    },
    /// Connection is gone; the dispatcher has been closed
    Closed,
}

/// Read frames until EOF, an error, or a handoff.
///
/// Every failure closes the dispatcher with `ServerDown` so pending and
/// future fetches fail instead of waiting.
pub(crate) async fn run(
    mut read_half: ReadHalf<Transport>,
    mut buf: BytesMut,
    dispatcher: Arc<Dispatcher>,
) -> ReaderExit {
    loop {
        match dispatcher.route(&mut buf) {
            Ok(Routed::NeedMore) => {}
            Ok(Routed::Handoff) => {
                tracing::debug!(leftover = buf.len(), "reader handing off transport");
                return ReaderExit::Handoff {
                    read_half,
                    leftover: buf,
                };
            }
            Ok(Routed::Disconnected) => return ReaderExit::Closed,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable data from server");
                counters::connection_error(labels::REASON_READ);
                dispatcher.close(LdapError::new(
                    ResultCode::ServerDown,
                    format!("protocol error: {}", e),
                ));
                return ReaderExit::Closed;
            }
        }

        buf.reserve(READ_CHUNK);
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                tracing::info!("server closed the connection");
                counters::connection_error(labels::REASON_EOF);
                dispatcher.close(LdapError::new(
                    ResultCode::ServerDown,
                    "connection closed by server",
                ));
                return ReaderExit::Closed;
            }
            Ok(n) => tracing::trace!(bytes = n, "read"),
            Err(e) => {
                tracing::warn!(error = %e, "read failed");
                counters::connection_error(labels::REASON_READ);
                dispatcher.close(LdapError::new(ResultCode::ServerDown, e.to_string()));
                return ReaderExit::Closed;
            }
        }
    }
}
