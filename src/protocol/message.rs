//! Protocol message types

use super::constants::tags;
use super::filter::Filter;
use bytes::Bytes;
use zeroize::Zeroize;

/// One LDAPMessage envelope
#[derive(Debug, Clone, PartialEq)]
pub struct LdapMessage {
    /// Correlates requests with their responses
    pub message_id: i32,
    /// The protocol operation
    pub op: ProtocolOp,
    /// Request or response controls
    pub controls: Vec<Control>,
}

impl LdapMessage {
    /// Message without controls
    pub fn new(message_id: i32, op: ProtocolOp) -> Self {
        Self {
            message_id,
            op,
            controls: Vec::new(),
        }
    }

    /// Attach controls
    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }

    /// Overwrite any credentials carried by this message
    pub fn clear_secrets(&mut self) {
        if let ProtocolOp::BindRequest(req) = &mut self.op {
            req.auth.zeroize();
        }
    }
}

/// LDAP control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    /// Control type OID
    pub oid: String,
    /// Criticality
    pub critical: bool,
    /// Optional BER-encoded value
    pub value: Option<Bytes>,
}

impl Control {
    /// Non-critical control without a value
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            critical: false,
            value: None,
        }
    }

    /// Mark as critical
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Attach a value
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Protocol operation carried in an [`LdapMessage`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolOp {
    /// BindRequest
    BindRequest(BindRequest),

    /// BindResponse
    BindResponse(BindResponse),

    /// UnbindRequest
    UnbindRequest,

    /// SearchRequest
    SearchRequest(SearchRequest),

    /// SearchResultEntry
    SearchResultEntry(SearchEntry),

    /// SearchResultDone
    SearchResultDone(ResultInfo),

    /// SearchResultReference
    SearchResultReference(Vec<String>),

    /// AbandonRequest carrying the id to abandon
    AbandonRequest(i32),

    /// ExtendedRequest
    ExtendedRequest(ExtendedRequest),

    /// ExtendedResponse
    ExtendedResponse(ExtendedResponse),

    /// IntermediateResponse
    IntermediateResponse(IntermediateResponse),

    /// Any other PDU, kept as raw contents
    Other {
        /// Application tag
        tag: u8,
        /// Contents octets
        body: Bytes,
    },
}

impl ProtocolOp {
    /// Application tag of this operation
    pub fn tag(&self) -> u8 {
        match self {
            ProtocolOp::BindRequest(_) => tags::BIND_REQUEST,
            ProtocolOp::BindResponse(_) => tags::BIND_RESPONSE,
            ProtocolOp::UnbindRequest => tags::UNBIND_REQUEST,
            ProtocolOp::SearchRequest(_) => tags::SEARCH_REQUEST,
            ProtocolOp::SearchResultEntry(_) => tags::SEARCH_RESULT_ENTRY,
            ProtocolOp::SearchResultDone(_) => tags::SEARCH_RESULT_DONE,
            ProtocolOp::SearchResultReference(_) => tags::SEARCH_RESULT_REFERENCE,
            ProtocolOp::AbandonRequest(_) => tags::ABANDON_REQUEST,
            ProtocolOp::ExtendedRequest(_) => tags::EXTENDED_REQUEST,
            ProtocolOp::ExtendedResponse(_) => tags::EXTENDED_RESPONSE,
            ProtocolOp::IntermediateResponse(_) => tags::INTERMEDIATE_RESPONSE,
            ProtocolOp::Other { tag, .. } => *tag,
        }
    }

    /// The LDAPResult part of a response, if this operation has one
    pub fn result(&self) -> Option<&ResultInfo> {
        match self {
            ProtocolOp::BindResponse(resp) => Some(&resp.result),
            ProtocolOp::SearchResultDone(result) => Some(result),
            ProtocolOp::ExtendedResponse(resp) => Some(&resp.result),
            _ => None,
        }
    }
}

/// LDAPResult components
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultInfo {
    /// resultCode
    pub code: i32,
    /// matchedDN
    pub matched_dn: String,
    /// diagnosticMessage
    pub diagnostic: String,
    /// Referral URIs
    pub referrals: Vec<String>,
}

impl ResultInfo {
    /// Result with the given code and empty strings
    pub fn with_code(code: i32) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    /// Result with a diagnostic message
    pub fn with_diagnostic(code: i32, diagnostic: impl Into<String>) -> Self {
        Self {
            code,
            diagnostic: diagnostic.into(),
            ..Self::default()
        }
    }
}

/// BindRequest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    /// Protocol version
    pub version: i32,
    /// Bind DN (empty for anonymous)
    pub name: String,
    /// Credentials
    pub auth: BindAuth,
}

/// AuthenticationChoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuth {
    /// Simple password
    Simple(Vec<u8>),
    /// SASL mechanism with optional credentials
    Sasl {
        /// Mechanism name
        mechanism: String,
        /// Mechanism-specific credentials
        credentials: Option<Vec<u8>>,
    },
}

impl Zeroize for BindAuth {
    fn zeroize(&mut self) {
        match self {
            BindAuth::Simple(password) => password.zeroize(),
            BindAuth::Sasl { credentials, .. } => credentials.zeroize(),
        }
    }
}

/// BindResponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResponse {
    /// LDAPResult
    pub result: ResultInfo,
    /// serverSaslCreds
    pub server_sasl_creds: Option<Bytes>,
}

/// SearchRequest
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// baseObject
    pub base: String,
    /// Scope integer
    pub scope: i32,
    /// derefAliases integer
    pub deref: i32,
    /// sizeLimit (0 = none)
    pub size_limit: i32,
    /// timeLimit in seconds (0 = none)
    pub time_limit: i32,
    /// typesOnly
    pub types_only: bool,
    /// Filter
    pub filter: Filter,
    /// Requested attributes (empty = all user attributes)
    pub attributes: Vec<String>,
}

/// SearchResultEntry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchEntry {
    /// objectName
    pub dn: String,
    /// Attributes in server order
    pub attributes: Vec<PartialAttribute>,
}

impl SearchEntry {
    /// Values of the first attribute named `name` (case-insensitive)
    pub fn values(&self, name: &str) -> Option<&[Bytes]> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.values.as_slice())
    }
}

/// PartialAttribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAttribute {
    /// Attribute description
    pub name: String,
    /// Values (empty when typesOnly was requested)
    pub values: Vec<Bytes>,
}

/// ExtendedRequest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    /// requestName OID
    pub name: String,
    /// requestValue
    pub value: Option<Bytes>,
}

/// ExtendedResponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResponse {
    /// LDAPResult
    pub result: ResultInfo,
    /// responseName OID
    pub name: Option<String>,
    /// responseValue
    pub value: Option<Bytes>,
}

/// IntermediateResponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateResponse {
    /// responseName OID
    pub name: Option<String>,
    /// responseValue
    pub value: Option<Bytes>,
}
