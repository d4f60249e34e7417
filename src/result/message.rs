//! Messages returned by `fetch`

use crate::connection::dispatch::Frame;
use crate::connection::Shared;
use crate::error::{LdapError, ResultCode};
use crate::protocol::constants::tags;
use crate::protocol::{
    decode_frame, ExtendedResponse, IntermediateResponse, LdapMessage, ProtocolOp, ResultInfo,
    SearchEntry,
};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::{OnceLock, Weak};

/// Response type, from the protocol tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// BindResponse
    BindResult,
    /// SearchResultEntry
    SearchEntry,
    /// SearchResultReference
    SearchReference,
    /// SearchResultDone
    SearchResult,
    /// ModifyResponse
    ModifyResult,
    /// AddResponse
    AddResult,
    /// DelResponse
    DeleteResult,
    /// ModifyDNResponse
    ModifyDnResult,
    /// CompareResponse
    CompareResult,
    /// ExtendedResponse
    ExtendedResult,
    /// IntermediateResponse
    Intermediate,
    /// Anything else
    Unknown(u8),
}

impl MessageKind {
    /// Classify a protocol tag
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            tags::BIND_RESPONSE => Self::BindResult,
            tags::SEARCH_RESULT_ENTRY => Self::SearchEntry,
            tags::SEARCH_RESULT_REFERENCE => Self::SearchReference,
            tags::SEARCH_RESULT_DONE => Self::SearchResult,
            tags::MODIFY_RESPONSE => Self::ModifyResult,
            tags::ADD_RESPONSE => Self::AddResult,
            tags::DEL_RESPONSE => Self::DeleteResult,
            tags::MODIFY_DN_RESPONSE => Self::ModifyDnResult,
            tags::COMPARE_RESPONSE => Self::CompareResult,
            tags::EXTENDED_RESPONSE => Self::ExtendedResult,
            tags::INTERMEDIATE_RESPONSE => Self::Intermediate,
            other => Self::Unknown(other),
        }
    }

    /// Short name, used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BindResult => "bind_result",
            Self::SearchEntry => "search_entry",
            Self::SearchReference => "search_reference",
            Self::SearchResult => "search_result",
            Self::ModifyResult => "modify_result",
            Self::AddResult => "add_result",
            Self::DeleteResult => "delete_result",
            Self::ModifyDnResult => "modify_dn_result",
            Self::CompareResult => "compare_result",
            Self::ExtendedResult => "extended_result",
            Self::Intermediate => "intermediate",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Whether this kind ends its operation
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::SearchEntry | Self::SearchReference | Self::Intermediate
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `fetch` worth of responses for a single message id.
///
/// Either a run of non-terminal responses (entries, references,
/// intermediates) in arrival order, or exactly one terminal response.
/// Frames are decoded on first access and the result kept.
pub struct Message {
    conn: Weak<Shared>,
    msgid: i32,
    frames: Vec<Frame>,
    decoded: OnceLock<std::result::Result<Vec<LdapMessage>, String>>,
}

impl Message {
    pub(crate) fn new(conn: Weak<Shared>, msgid: i32, frames: Vec<Frame>) -> Self {
        debug_assert!(!frames.is_empty());
        Self {
            conn,
            msgid,
            frames,
            decoded: OnceLock::new(),
        }
    }

    /// Message id these responses belong to
    pub fn msgid(&self) -> i32 {
        self.msgid
    }

    /// Kind of the first response
    pub fn kind(&self) -> MessageKind {
        self.frames
            .first()
            .map_or(MessageKind::Unknown(0), |f| MessageKind::from_tag(f.tag))
    }

    /// Whether this is the operation's final response
    pub fn is_terminal(&self) -> bool {
        self.frames.last().is_some_and(|f| f.is_terminal())
    }

    /// Number of protocol messages held
    pub fn message_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of search entries held; zero for non-search responses.
    ///
    /// Fails with [`Error::ConnectionClosed`] once the owning connection has
    /// been dropped.
    pub fn entry_count(&self) -> Result<usize> {
        if self.conn.strong_count() == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(self
            .frames
            .iter()
            .filter(|f| f.tag == tags::SEARCH_RESULT_ENTRY)
            .count())
    }

    /// Raw encoded responses
    pub fn raw(&self) -> impl Iterator<Item = &Bytes> {
        self.frames.iter().map(|f| &f.bytes)
    }

    /// Decoded responses
    pub fn messages(&self) -> Result<&[LdapMessage]> {
        let decoded = self.decoded.get_or_init(|| {
            self.frames
                .iter()
                .map(|f| decode_frame(&f.bytes))
                .collect::<std::io::Result<Vec<_>>>()
                .map_err(|e| e.to_string())
        });
        match decoded {
            Ok(messages) => Ok(messages.as_slice()),
            Err(reason) => Err(Error::Protocol(reason.clone())),
        }
    }

    /// Search entries, in arrival order
    pub fn entries(&self) -> Result<Vec<&SearchEntry>> {
        Ok(self
            .messages()?
            .iter()
            .filter_map(|m| match &m.op {
                ProtocolOp::SearchResultEntry(entry) => Some(entry),
                _ => None,
            })
            .collect())
    }

    /// Continuation references (URLs), flattened
    pub fn references(&self) -> Result<Vec<&str>> {
        Ok(self
            .messages()?
            .iter()
            .filter_map(|m| match &m.op {
                ProtocolOp::SearchResultReference(urls) => Some(urls),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
            .collect())
    }

    /// Intermediate responses
    pub fn intermediates(&self) -> Result<Vec<&IntermediateResponse>> {
        Ok(self
            .messages()?
            .iter()
            .filter_map(|m| match &m.op {
                ProtocolOp::IntermediateResponse(resp) => Some(resp),
                _ => None,
            })
            .collect())
    }

    /// LDAPResult of a terminal response
    pub fn result(&self) -> Result<Option<&ResultInfo>> {
        if !self.is_terminal() {
            return Ok(None);
        }
        Ok(self.messages()?.last().and_then(|m| m.op.result()))
    }

    /// Turn a non-success result into [`Error::Library`].
    ///
    /// Success, compare true/false, and SASL bind in progress pass;
    /// non-terminal messages always pass.
    pub fn check(&self) -> Result<()> {
        let Some(result) = self.result()? else {
            return Ok(());
        };
        let code = ResultCode::from_code(result.code);
        if code.is_success() || code == ResultCode::SaslBindInProgress {
            return Ok(());
        }
        Err(Error::Library(LdapError::from_server(
            result.code,
            &result.matched_dn,
            &result.diagnostic,
        )))
    }

    /// serverSaslCreds of a BindResponse
    pub fn server_sasl_credentials(&self) -> Result<Option<&Bytes>> {
        Ok(self.messages()?.iter().find_map(|m| match &m.op {
            ProtocolOp::BindResponse(resp) => resp.server_sasl_creds.as_ref(),
            _ => None,
        }))
    }

    /// ExtendedResponse body
    pub fn extended_response(&self) -> Result<Option<&ExtendedResponse>> {
        Ok(self.messages()?.iter().find_map(|m| match &m.op {
            ProtocolOp::ExtendedResponse(resp) => Some(resp),
            _ => None,
        }))
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("msgid", &self.msgid)
            .field("kind", &self.kind())
            .field("message_count", &self.frames.len())
            .field("terminal", &self.is_terminal())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_message, PartialAttribute};

    fn frame(op: ProtocolOp) -> Frame {
        let tag = op.tag();
        let bytes = encode_message(&LdapMessage::new(7, op)).unwrap().freeze();
        Frame { tag, bytes }
    }

    fn entry(dn: &str) -> Frame {
        frame(ProtocolOp::SearchResultEntry(SearchEntry {
            dn: dn.to_string(),
            attributes: vec![PartialAttribute {
                name: "cn".into(),
                values: vec![Bytes::from_static(b"x")],
            }],
        }))
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(MessageKind::from_tag(0x64), MessageKind::SearchEntry);
        assert_eq!(MessageKind::from_tag(0x65), MessageKind::SearchResult);
        assert!(MessageKind::SearchResult.is_terminal());
        assert!(!MessageKind::SearchReference.is_terminal());
        assert_eq!(MessageKind::from_tag(0x01), MessageKind::Unknown(1));
    }

    #[test]
    fn test_entry_batch() {
        let msg = Message::new(
            Weak::new(),
            7,
            vec![
                entry("cn=a"),
                frame(ProtocolOp::SearchResultReference(vec!["ldap://b/".into()])),
                entry("cn=c"),
            ],
        );
        assert_eq!(msg.kind(), MessageKind::SearchEntry);
        assert!(!msg.is_terminal());
        assert_eq!(msg.message_count(), 3);
        let dns: Vec<_> = msg.entries().unwrap().iter().map(|e| e.dn.clone()).collect();
        assert_eq!(dns, vec!["cn=a", "cn=c"]);
        assert_eq!(msg.references().unwrap(), vec!["ldap://b/"]);
        assert!(msg.result().unwrap().is_none());
        assert!(msg.check().is_ok());
    }

    #[test]
    fn test_entry_count_needs_connection() {
        let msg = Message::new(Weak::new(), 7, vec![entry("cn=a")]);
        assert!(matches!(msg.entry_count(), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_check_maps_result_code() {
        let msg = Message::new(
            Weak::new(),
            7,
            vec![frame(ProtocolOp::SearchResultDone(ResultInfo {
                code: 32,
                matched_dn: "dc=example".into(),
                diagnostic: "no such object".into(),
                referrals: vec![],
            }))],
        );
        assert!(msg.is_terminal());
        assert_eq!(msg.result().unwrap().unwrap().code, 32);
        let err = msg.check().unwrap_err();
        assert_eq!(err.result_code(), Some(ResultCode::NoSuchObject));
    }

    #[test]
    fn test_corrupt_frame_is_protocol_error() {
        let msg = Message::new(
            Weak::new(),
            7,
            vec![Frame {
                tag: tags::SEARCH_RESULT_DONE,
                bytes: Bytes::from_static(&[0x30, 0x03, 0x02, 0x01]),
            }],
        );
        assert!(matches!(msg.messages(), Err(Error::Protocol(_))));
        // memoized: same answer the second time
        assert!(matches!(msg.result(), Err(Error::Protocol(_))));
    }
}
