//! Message-id allocation and response routing
//!
//! One table per connection maps live message ids to response queues. The
//! reader task routes every complete frame it reads while holding the table
//! lock once per read; `fetch` callers drain their own queue.

use crate::error::{LdapError, ResultCode};
use crate::protocol::constants::{oid, tags};
use crate::protocol::{decode_frame, frame_length, peek_envelope, ProtocolOp};
use crate::result::{MessageKind, OperationState};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// One undecoded response
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) tag: u8,
    pub(crate) bytes: Bytes,
}

impl Frame {
    pub(crate) fn is_terminal(&self) -> bool {
        tags::is_terminal(self.tag)
    }
}

struct Slot {
    queue: VecDeque<Frame>,
    notify: Arc<Notify>,
    state: OperationState,
    /// Reader hands the socket back after this operation's terminal frame
    handoff: bool,
}

struct Table {
    next_id: i32,
    slots: HashMap<i32, Slot>,
    closed: Option<LdapError>,
}

/// What a poll of one message id found
#[derive(Debug)]
pub(crate) enum Fetched {
    /// Frames in arrival order; never empty
    Ready(Vec<Frame>),
    /// Nothing queued yet; wait on the notifier and poll again
    Pending(Arc<Notify>),
    /// Operation was abandoned or released
    Abandoned,
    /// Connection is gone and nothing is left queued
    Closed(LdapError),
}

/// Why the reader stopped routing a buffer
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Buffer drained of complete frames
    NeedMore,
    /// Terminal response for a handoff operation was queued
    Handoff,
    /// Server sent a notice of disconnection
    Disconnected,
}

/// Routing table shared by the connection, its reader task, and operations
pub(crate) struct Dispatcher {
    table: Mutex<Table>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: 1,
                slots: HashMap::new(),
                closed: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next free message id and open its queue
    pub(crate) fn register(&self, handoff: bool) -> Result<i32> {
        let mut table = self.lock();
        if let Some(err) = &table.closed {
            return Err(Error::Library(err.clone()));
        }

        let mut id = table.next_id;
        while table.slots.contains_key(&id) {
            id = if id == i32::MAX { 1 } else { id + 1 };
        }
        table.next_id = if id == i32::MAX { 1 } else { id + 1 };

        table.slots.insert(
            id,
            Slot {
                queue: VecDeque::new(),
                notify: Arc::new(Notify::new()),
                state: OperationState::Pending,
                handoff,
            },
        );
        Ok(id)
    }

    /// Route every complete frame at the front of `buf`.
    ///
    /// Consumed bytes are split off `buf`; a partial frame stays for the next
    /// read. Routing stops early after a handoff terminal so the bytes that
    /// follow are left to the caller.
    pub(crate) fn route(&self, buf: &mut BytesMut) -> io::Result<Routed> {
        let mut table = self.lock();
        loop {
            let Some(len) = frame_length(buf)? else {
                return Ok(Routed::NeedMore);
            };
            if buf.len() < len {
                return Ok(Routed::NeedMore);
            }
            let bytes = buf.split_to(len).freeze();
            let (msgid, tag) = peek_envelope(&bytes)?;

            if msgid == 0 {
                if let Some(err) = unsolicited(&bytes)? {
                    tracing::warn!(code = err.code.code(), diagnostic = %err.diagnostic, "notice of disconnection");
                    crate::metrics::counters::connection_error(crate::metrics::labels::REASON_NOTICE);
                    table.close(err);
                    return Ok(Routed::Disconnected);
                }
                continue;
            }

            let frame = Frame { tag, bytes };
            let kind = MessageKind::from_tag(tag);
            match table.slots.get_mut(&msgid) {
                Some(slot) if slot.state.accepts_responses() => {
                    let terminal = frame.is_terminal();
                    slot.state = if terminal {
                        OperationState::Done
                    } else {
                        OperationState::Draining
                    };
                    slot.queue.push_back(frame);
                    slot.notify.notify_one();
                    tracing::debug!(msgid, kind = kind.as_str(), "routed");
                    crate::metrics::counters::message_received(kind.as_str());
                    if terminal && slot.handoff {
                        return Ok(Routed::Handoff);
                    }
                }
                Some(slot) => {
                    tracing::debug!(msgid, kind = kind.as_str(), state = %slot.state, "discarding response");
                    crate::metrics::counters::message_discarded();
                }
                None => {
                    tracing::debug!(msgid, kind = kind.as_str(), "discarding response for unknown message id");
                    crate::metrics::counters::message_discarded();
                }
            }
        }
    }

    /// Take queued frames for `msgid`.
    ///
    /// Non-terminal frames are returned together up to, but excluding, a
    /// terminal one; a terminal frame is always returned alone.
    pub(crate) fn poll(&self, msgid: i32) -> Fetched {
        let mut table = self.lock();
        let closed = table.closed.clone();
        let Some(slot) = table.slots.get_mut(&msgid) else {
            return Fetched::Abandoned;
        };
        if slot.state == OperationState::Abandoned {
            return Fetched::Abandoned;
        }

        match slot.queue.front() {
            Some(front) if front.is_terminal() => {
                Fetched::Ready(slot.queue.pop_front().into_iter().collect())
            }
            Some(_) => {
                let mut batch = Vec::new();
                while slot.queue.front().is_some_and(|f| !f.is_terminal()) {
                    batch.extend(slot.queue.pop_front());
                }
                Fetched::Ready(batch)
            }
            None => match closed {
                Some(err) => Fetched::Closed(err),
                None => Fetched::Pending(slot.notify.clone()),
            },
        }
    }

    /// Mark `msgid` abandoned and drop anything queued; returns false if it
    /// already was
    pub(crate) fn abandon(&self, msgid: i32) -> bool {
        let mut table = self.lock();
        match table.slots.get_mut(&msgid) {
            Some(slot) if slot.state != OperationState::Abandoned => {
                slot.state = OperationState::Abandoned;
                slot.queue.clear();
                slot.notify.notify_waiters();
                slot.notify.notify_one();
                true
            }
            _ => false,
        }
    }

    /// Stop a handoff operation from handing off.
    ///
    /// Returns true if its terminal response was already routed, in which
    /// case the reader has stopped (or is stopping) and must be rejoined.
    pub(crate) fn cancel_handoff(&self, msgid: i32) -> bool {
        let mut table = self.lock();
        match table.slots.get_mut(&msgid) {
            Some(slot) if slot.state == OperationState::Done => true,
            Some(slot) => {
                slot.state = OperationState::Abandoned;
                slot.queue.clear();
                false
            }
            None => false,
        }
    }

    /// Forget `msgid` so the id can be reused
    pub(crate) fn release(&self, msgid: i32) {
        self.lock().slots.remove(&msgid);
    }

    /// Current progress of `msgid`
    pub(crate) fn state(&self, msgid: i32) -> OperationState {
        self.lock()
            .slots
            .get(&msgid)
            .map_or(OperationState::Abandoned, |s| s.state)
    }

    /// Fail every waiting and future operation with `err`
    pub(crate) fn close(&self, err: LdapError) {
        self.lock().close(err);
    }

    /// Error recorded when the connection went down
    pub(crate) fn closed(&self) -> Option<LdapError> {
        self.lock().closed.clone()
    }

    /// Number of live message ids
    pub(crate) fn outstanding(&self) -> usize {
        self.lock().slots.len()
    }
}

impl Table {
    fn close(&mut self, err: LdapError) {
        if self.closed.is_none() {
            self.closed = Some(err);
        }
        for slot in self.slots.values() {
            slot.notify.notify_waiters();
            slot.notify.notify_one();
        }
    }
}

/// Decode a message-id-0 frame; a notice of disconnection becomes an error
fn unsolicited(bytes: &[u8]) -> io::Result<Option<LdapError>> {
    let msg = decode_frame(bytes)?;
    match msg.op {
        ProtocolOp::ExtendedResponse(resp)
            if resp.name.as_deref() == Some(oid::NOTICE_OF_DISCONNECTION) =>
        {
            let code = ResultCode::from_code(resp.result.code);
            let code = if code.is_success() {
                ResultCode::ServerDown
            } else {
                code
            };
            Ok(Some(LdapError::new(code, resp.result.diagnostic)))
        }
        other => {
            tracing::warn!(tag = other.tag(), "ignoring unsolicited notification");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_message, ExtendedResponse, LdapMessage, ResultInfo, SearchEntry};

    fn frame(msgid: i32, op: ProtocolOp) -> BytesMut {
        encode_message(&LdapMessage::new(msgid, op)).unwrap()
    }

    fn entry(msgid: i32) -> BytesMut {
        frame(
            msgid,
            ProtocolOp::SearchResultEntry(SearchEntry {
                dn: format!("cn=e{},dc=example", msgid),
                attributes: vec![],
            }),
        )
    }

    fn done(msgid: i32) -> BytesMut {
        frame(msgid, ProtocolOp::SearchResultDone(ResultInfo::default()))
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let d = Dispatcher::new();
        assert_eq!(d.register(false).unwrap(), 1);
        assert_eq!(d.register(false).unwrap(), 2);
        assert_eq!(d.outstanding(), 2);
    }

    #[test]
    fn test_ids_wrap_and_skip_live() {
        let d = Dispatcher::new();
        let first = d.register(false).unwrap();
        d.lock().next_id = i32::MAX;
        assert_eq!(d.register(false).unwrap(), i32::MAX);
        // 1 is still live, so wrap lands on 2
        assert_eq!(d.register(false).unwrap(), 2);
        d.release(first);
        d.lock().next_id = 1;
        assert_eq!(d.register(false).unwrap(), 1);
    }

    #[test]
    fn test_batch_stops_before_terminal() {
        let d = Dispatcher::new();
        let id = d.register(false).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&entry(id));
        buf.extend_from_slice(&entry(id));
        buf.extend_from_slice(&done(id));
        assert_eq!(d.route(&mut buf).unwrap(), Routed::NeedMore);
        assert!(buf.is_empty());
        assert_eq!(d.state(id), OperationState::Done);

        match d.poll(id) {
            Fetched::Ready(frames) => {
                assert_eq!(frames.len(), 2);
                assert!(frames.iter().all(|f| !f.is_terminal()));
            }
            other => panic!("unexpected {:?}", other),
        }
        match d.poll(id) {
            Fetched::Ready(frames) => {
                assert_eq!(frames.len(), 1);
                assert!(frames[0].is_terminal());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(d.poll(id), Fetched::Pending(_)));
    }

    #[test]
    fn test_no_cross_talk() {
        let d = Dispatcher::new();
        let a = d.register(false).unwrap();
        let b = d.register(false).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&entry(b));
        buf.extend_from_slice(&entry(a));
        buf.extend_from_slice(&done(b));
        d.route(&mut buf).unwrap();

        match d.poll(a) {
            Fetched::Ready(frames) => {
                assert_eq!(frames.len(), 1);
                assert_eq!(peek_envelope(&frames[0].bytes).unwrap().0, a);
            }
            other => panic!("unexpected {:?}", other),
        }
        match d.poll(b) {
            Fetched::Ready(frames) => assert_eq!(frames.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_partial_frame_stays_buffered() {
        let d = Dispatcher::new();
        let id = d.register(false).unwrap();
        let full = done(id);
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(d.route(&mut buf).unwrap(), Routed::NeedMore);
        assert_eq!(buf.len(), full.len() - 1);
        assert!(matches!(d.poll(id), Fetched::Pending(_)));

        buf.extend_from_slice(&full[full.len() - 1..]);
        d.route(&mut buf).unwrap();
        assert!(matches!(d.poll(id), Fetched::Ready(_)));
    }

    #[test]
    fn test_abandoned_and_unknown_ids_are_discarded() {
        let d = Dispatcher::new();
        let id = d.register(false).unwrap();
        assert!(d.abandon(id));
        assert!(!d.abandon(id));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&entry(id));
        buf.extend_from_slice(&done(999));
        d.route(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert!(matches!(d.poll(id), Fetched::Abandoned));
        assert_eq!(d.state(id), OperationState::Abandoned);
    }

    #[test]
    fn test_handoff_stops_routing() {
        let d = Dispatcher::new();
        let id = d.register(true).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame(
            id,
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: ResultInfo::default(),
                name: Some(oid::START_TLS.to_string()),
                value: None,
            }),
        ));
        buf.extend_from_slice(b"\x16\x03\x01");
        assert_eq!(d.route(&mut buf).unwrap(), Routed::Handoff);
        assert_eq!(&buf[..], b"\x16\x03\x01");
    }

    #[test]
    fn test_cancel_handoff() {
        let d = Dispatcher::new();
        let pending = d.register(true).unwrap();
        assert!(!d.cancel_handoff(pending));
        assert_eq!(d.state(pending), OperationState::Abandoned);

        let done_id = d.register(true).unwrap();
        let mut buf = done(done_id);
        assert_eq!(d.route(&mut buf).unwrap(), Routed::Handoff);
        assert!(d.cancel_handoff(done_id));
    }

    #[test]
    fn test_close_delivers_queue_then_error() {
        let d = Dispatcher::new();
        let id = d.register(false).unwrap();
        let mut buf = entry(id);
        d.route(&mut buf).unwrap();
        d.close(LdapError::new(ResultCode::ServerDown, "eof"));

        assert!(matches!(d.poll(id), Fetched::Ready(_)));
        match d.poll(id) {
            Fetched::Closed(err) => assert_eq!(err.code, ResultCode::ServerDown),
            other => panic!("unexpected {:?}", other),
        }
        let err = d.register(false).unwrap_err();
        assert!(err.is_server_down());
    }

    #[test]
    fn test_notice_of_disconnection_closes() {
        let d = Dispatcher::new();
        let id = d.register(false).unwrap();
        let mut buf = frame(
            0,
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: ResultInfo::with_diagnostic(ResultCode::Unavailable.code(), "shutting down"),
                name: Some(oid::NOTICE_OF_DISCONNECTION.to_string()),
                value: None,
            }),
        );
        assert_eq!(d.route(&mut buf).unwrap(), Routed::Disconnected);
        match d.poll(id) {
            Fetched::Closed(err) => {
                assert_eq!(err.code, ResultCode::Unavailable);
                assert_eq!(err.diagnostic, "shutting down");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_route_wakes_pending_fetch() {
        let d = Dispatcher::new();
        let id = d.register(false).unwrap();
        let Fetched::Pending(notify) = d.poll(id) else {
            panic!("expected an empty queue");
        };
        let mut waiter = tokio_test::task::spawn(notify.notified());
        tokio_test::assert_pending!(waiter.poll());

        let mut buf = entry(id);
        d.route(&mut buf).unwrap();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
        assert!(matches!(d.poll(id), Fetched::Ready(frames) if frames.len() == 1));
    }

    #[test]
    fn test_abandon_wakes_pending_fetch() {
        let d = Dispatcher::new();
        let id = d.register(false).unwrap();
        let Fetched::Pending(notify) = d.poll(id) else {
            panic!("expected an empty queue");
        };
        let mut waiter = tokio_test::task::spawn(notify.notified());
        tokio_test::assert_pending!(waiter.poll());

        assert!(d.abandon(id));
        assert!(waiter.is_woken());
        assert!(matches!(d.poll(id), Fetched::Abandoned));
        assert!(!d.abandon(id));
    }
}
