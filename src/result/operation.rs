//! Handles for outstanding requests

use super::message::Message;
use super::state::OperationState;
use crate::connection::dispatch::Fetched;
use crate::connection::Shared;
use crate::protocol::Control;
use crate::{Error, Result};
use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

/// Request type behind an [`Operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Simple or SASL bind
    Bind,
    /// Search
    Search,
    /// Extended operation (including StartTLS)
    Extended,
}

impl OperationKind {
    /// Short name, used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Search => "search",
            Self::Extended => "extended",
        }
    }
}

/// One outstanding request, identified by its message id.
///
/// Holds a weak reference to the connection: it never keeps the connection
/// alive, and fails with [`Error::ConnectionClosed`] once the connection is
/// dropped. Dropping the handle releases the message id; responses that
/// arrive later are discarded.
pub struct Operation {
    msgid: i32,
    kind: OperationKind,
    conn: Weak<Shared>,
    abandoned: AtomicBool,
}

impl Operation {
    pub(crate) fn new(msgid: i32, kind: OperationKind, conn: Weak<Shared>) -> Self {
        Self {
            msgid,
            kind,
            conn,
            abandoned: AtomicBool::new(false),
        }
    }

    /// Message id of the request
    pub fn msgid(&self) -> i32 {
        self.msgid
    }

    /// Request type
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Whether `abandon` was called on this handle
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Current progress
    pub fn state(&self) -> OperationState {
        if self.is_abandoned() {
            return OperationState::Abandoned;
        }
        match self.conn.upgrade() {
            Some(shared) => shared.dispatcher().state(self.msgid),
            None => OperationState::Abandoned,
        }
    }

    /// Wait for the next responses to this request.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` polls. Queued
    /// non-terminal responses are returned together; the terminal response
    /// is returned on its own.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationAbandoned`] after [`Operation::abandon`]
    /// - [`Error::Timeout`] if nothing arrived before the deadline
    /// - [`Error::Library`] with `ServerDown` once the connection is lost
    /// - [`Error::ConnectionClosed`] if the connection was dropped
    pub async fn fetch(&self, timeout: Option<Duration>) -> Result<Message> {
        if self.is_abandoned() {
            return Err(Error::OperationAbandoned { msgid: self.msgid });
        }

        let started = Instant::now();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let fetched = {
                let shared = self.conn.upgrade().ok_or(Error::ConnectionClosed)?;
                shared.dispatcher().poll(self.msgid)
            };

            let notify = match fetched {
                Fetched::Ready(frames) => {
                    crate::metrics::histograms::fetch_wait(started.elapsed().as_millis() as u64);
                    tracing::debug!(msgid = self.msgid, count = frames.len(), "fetched");
                    return Ok(Message::new(self.conn.clone(), self.msgid, frames));
                }
                Fetched::Abandoned => return Err(Error::OperationAbandoned { msgid: self.msgid }),
                Fetched::Closed(err) => return Err(Error::Library(err)),
                Fetched::Pending(notify) => notify,
            };

            let notified = notify.notified();
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        crate::metrics::counters::fetch_timeout();
                        return Err(Error::Timeout { msgid: self.msgid });
                    }
                }
            }

            if self.is_abandoned() {
                return Err(Error::OperationAbandoned { msgid: self.msgid });
            }
        }
    }

    /// Stop the request.
    ///
    /// The handle is marked abandoned before anything is sent, so later
    /// fetches fail with [`Error::OperationAbandoned`] even if notifying the
    /// server fails; that failure is still returned. Calling it again is a
    /// no-op.
    pub async fn abandon(&self) -> Result<()> {
        self.abandon_with_controls(&[]).await
    }

    /// [`Operation::abandon`] with request controls
    pub async fn abandon_with_controls(&self, controls: &[Control]) -> Result<()> {
        if self.abandoned.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let shared = self.conn.upgrade().ok_or(Error::ConnectionClosed)?;
        shared.abandon(self.msgid, controls).await
    }

    /// Drain to the terminal response and check its result code
    pub async fn wait_done(&self) -> Result<Message> {
        loop {
            let msg = self.fetch(None).await?;
            if msg.is_terminal() {
                msg.check()?;
                return Ok(msg);
            }
        }
    }

    /// Responses as a stream, ending after the terminal one or the first
    /// error
    pub fn into_stream(self) -> impl Stream<Item = Result<Message>> {
        futures::stream::unfold(Some(self), |op| async move {
            let op = op?;
            match op.fetch(None).await {
                Ok(msg) => {
                    let next = if msg.is_terminal() { None } else { Some(op) };
                    Some((Ok(msg), next))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("msgid", &self.msgid)
            .field("kind", &self.kind)
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        if let Some(shared) = self.conn.upgrade() {
            shared.dispatcher().release(self.msgid);
        }
    }
}
