//! Error types and the LDAP result-code table

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// URL does not use an LDAP scheme (`ldap`, `ldaps`, `ldapi`)
    #[error("not an LDAP URL: {url} ({reason})")]
    InvalidUrl {
        /// Offending input
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// URL has an LDAP scheme but violates the LDAP URL grammar
    #[error("malformed LDAP URL: {url} ({reason})")]
    MalformedUrl {
        /// Offending input
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// Getting or setting a named option failed
    #[error("couldn't {action} option: {name}")]
    Option {
        /// libldap-style option name, e.g. `LDAP_OPT_NETWORK_TIMEOUT`
        name: &'static str,
        /// `get` or `set`
        action: &'static str,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Non-success LDAP result code, from the server or raised locally
    #[error(transparent)]
    Library(#[from] LdapError),

    /// `fetch` deadline passed with nothing queued
    #[error("timed out waiting for message {msgid}")]
    Timeout {
        /// Message id being fetched
        msgid: i32,
    },

    /// `fetch` on an operation that was abandoned
    #[error("operation {msgid} was abandoned")]
    OperationAbandoned {
        /// Message id of the abandoned operation
        msgid: i32,
    },

    /// Feature not available in this build
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Bad argument supplied by the caller
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Call not permitted in the current lifecycle state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Malformed data on the wire
    #[error("protocol error: {0}")]
    Protocol(String),

    /// TLS or transport configuration error
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Connection was dropped while a handle still referenced it
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Wrap `source` as a failed option access
    pub(crate) fn option(name: &'static str, action: &'static str, source: Error) -> Self {
        Error::Option {
            name,
            action,
            source: Box::new(source),
        }
    }

    /// LDAP result code carried by this error, if any
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            Error::Library(e) => Some(e.code),
            Error::Option { source, .. } => source.result_code(),
            _ => None,
        }
    }

    /// Check if the transport is gone and the caller has to reconnect
    pub fn is_server_down(&self) -> bool {
        match self {
            Error::Library(e) => matches!(e.code, ResultCode::ServerDown | ResultCode::ConnectError),
            Error::Io(_) | Error::ConnectionClosed => true,
            _ => false,
        }
    }

    /// Category of the failure, for metrics labels and coarse matching
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidUrl { .. } | Error::MalformedUrl { .. } => "url",
            Error::Option { .. } => "option",
            Error::Library(e) => e.code.category().as_str(),
            Error::Timeout { .. } => "timeout",
            Error::OperationAbandoned { .. } => "abandoned",
            Error::NotImplemented(_) => "not_implemented",
            Error::InvalidArgument(_) => "argument",
            Error::IllegalState(_) => "state",
            Error::Io(_) => "io",
            Error::Protocol(_) => "protocol",
            Error::Config(_) => "config",
            Error::ConnectionClosed => "connection_closed",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// A non-success LDAP result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapError {
    /// Result code
    pub code: ResultCode,
    /// matchedDN from the server, empty for locally raised errors
    pub matched_dn: String,
    /// diagnosticMessage from the server, or local context
    pub diagnostic: String,
}

impl LdapError {
    /// Error raised locally with a short context message
    pub fn new(code: ResultCode, diagnostic: impl Into<String>) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Error reported by the server in an LDAPResult
    pub fn from_server(code: i32, matched_dn: &str, diagnostic: &str) -> Self {
        Self {
            code: ResultCode::from_code(code),
            matched_dn: matched_dn.to_string(),
            diagnostic: diagnostic.to_string(),
        }
    }
}

impl fmt::Display for LdapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code.description(), self.code.code())?;
        if !self.diagnostic.is_empty() {
            write!(f, ": {}", self.diagnostic)?;
        }
        if !self.matched_dn.is_empty() {
            write!(f, " [matched: {}]", self.matched_dn)?;
        }
        Ok(())
    }
}

impl std::error::Error for LdapError {}

/// Families of result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Success and the non-error "compare" outcomes
    Success,
    /// Problems with attributes or values
    Attribute,
    /// Problems with DNs
    Name,
    /// Authentication and access control
    Security,
    /// Server availability and limits
    Service,
    /// Update rejected by the directory
    Update,
    /// Referrals and continuation
    Referral,
    /// Raised by the client library itself
    Api,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Attribute => "attribute",
            Self::Name => "name",
            Self::Security => "security",
            Self::Service => "service",
            Self::Update => "update",
            Self::Referral => "referral",
            Self::Api => "api",
            Self::Other => "other",
        }
    }
}

macro_rules! result_codes {
    ($($variant:ident = $code:literal, $text:expr, $cat:ident;)*) => {
        /// LDAP result codes (RFC 4511 plus the libldap API codes)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResultCode {
            $(
                #[doc = $text]
                $variant,
            )*
            /// Code not in the table
            Unknown(i32),
        }

        impl ResultCode {
            /// Map an integer code to its variant
            pub fn from_code(code: i32) -> Self {
                match code {
                    $($code => Self::$variant,)*
                    other => Self::Unknown(other),
                }
            }

            /// Integer value of this code
            pub fn code(&self) -> i32 {
                match self {
                    $(Self::$variant => $code,)*
                    Self::Unknown(code) => *code,
                }
            }

            /// Human-readable description
            pub fn description(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)*
                    Self::Unknown(_) => "Unknown error",
                }
            }

            /// Family this code belongs to
            pub fn category(&self) -> ErrorCategory {
                match self {
                    $(Self::$variant => ErrorCategory::$cat,)*
                    Self::Unknown(_) => ErrorCategory::Other,
                }
            }
        }
    };
}

result_codes! {
    Success = 0, "Success", Success;
    OperationsError = 1, "Operations error", Other;
    ProtocolError = 2, "Protocol error", Other;
    TimeLimitExceeded = 3, "Time limit exceeded", Service;
    SizeLimitExceeded = 4, "Size limit exceeded", Service;
    CompareFalse = 5, "Compare False", Success;
    CompareTrue = 6, "Compare True", Success;
    AuthMethodNotSupported = 7, "Authentication method not supported", Security;
    StrongerAuthRequired = 8, "Strong(er) authentication required", Security;
    PartialResults = 9, "Partial results and referral received", Referral;
    Referral = 10, "Referral", Referral;
    AdminLimitExceeded = 11, "Administrative limit exceeded", Service;
    UnavailableCriticalExtension = 12, "Critical extension is unavailable", Service;
    ConfidentialityRequired = 13, "Confidentiality required", Security;
    SaslBindInProgress = 14, "SASL bind in progress", Security;
    NoSuchAttribute = 16, "No such attribute", Attribute;
    UndefinedAttributeType = 17, "Undefined attribute type", Attribute;
    InappropriateMatching = 18, "Inappropriate matching", Attribute;
    ConstraintViolation = 19, "Constraint violation", Attribute;
    AttributeOrValueExists = 20, "Type or value exists", Attribute;
    InvalidAttributeSyntax = 21, "Invalid syntax", Attribute;
    NoSuchObject = 32, "No such object", Name;
    AliasProblem = 33, "Alias problem", Name;
    InvalidDnSyntax = 34, "Invalid DN syntax", Name;
    IsLeaf = 35, "Entry is a leaf", Name;
    AliasDereferencingProblem = 36, "Alias dereferencing problem", Name;
    XProxyAuthzFailure = 47, "Proxy Authorization Failure", Security;
    InappropriateAuth = 48, "Inappropriate authentication", Security;
    InvalidCredentials = 49, "Invalid credentials", Security;
    InsufficientAccess = 50, "Insufficient access", Security;
    Busy = 51, "Server is busy", Service;
    Unavailable = 52, "Server is unavailable", Service;
    UnwillingToPerform = 53, "Server is unwilling to perform", Service;
    LoopDetect = 54, "Loop detected", Service;
    NamingViolation = 64, "Naming violation", Update;
    ObjectClassViolation = 65, "Object class violation", Update;
    NotAllowedOnNonLeaf = 66, "Operation not allowed on non-leaf", Update;
    NotAllowedOnRdn = 67, "Operation not allowed on RDN", Update;
    AlreadyExists = 68, "Already exists", Update;
    NoObjectClassMods = 69, "Cannot modify object class", Update;
    ResultsTooLarge = 70, "Results too large", Update;
    AffectsMultipleDsas = 71, "Operation affects multiple DSAs", Update;
    Other = 80, "Internal (implementation specific) error", Other;
    ServerDown = -1, "Can't contact LDAP server", Api;
    LocalError = -2, "Local error", Api;
    EncodingError = -3, "Encoding error", Api;
    DecodingError = -4, "Decoding error", Api;
    Timeout = -5, "Timed out", Api;
    AuthUnknown = -6, "Unknown authentication method", Api;
    FilterError = -7, "Bad search filter", Api;
    UserCancelled = -8, "User cancelled operation", Api;
    ParamError = -9, "Bad parameter to an ldap routine", Api;
    NoMemory = -10, "Out of memory", Api;
    ConnectError = -11, "Connect error", Api;
    NotSupported = -12, "Not Supported", Api;
    ControlNotFound = -13, "Control not found", Api;
    NoResultsReturned = -14, "No results returned", Api;
    MoreResultsToReturn = -15, "More results to return", Api;
    ClientLoop = -16, "Client Loop", Api;
    ReferralLimitExceeded = -17, "Referral Limit Exceeded", Api;
    XConnecting = -18, "Connecting (X)", Api;
}

impl ResultCode {
    /// Whether the code reports a successful outcome
    pub fn is_success(&self) -> bool {
        self.category() == ErrorCategory::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Describe an integer result code. Never fails.
pub fn error_to_string(code: i32) -> &'static str {
    ResultCode::from_code(code).description()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_roundtrip() {
        for code in [0, 2, 32, 49, 50, 51, 80, -1, -5, -7, -12] {
            assert_eq!(ResultCode::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_unmapped_code_is_generic() {
        let code = ResultCode::from_code(4242);
        assert_eq!(code, ResultCode::Unknown(4242));
        assert_eq!(code.code(), 4242);
        assert_eq!(code.category(), ErrorCategory::Other);
    }

    #[test]
    fn test_error_to_string() {
        assert_eq!(error_to_string(49), "Invalid credentials");
        assert_eq!(error_to_string(-1), "Can't contact LDAP server");
        assert_eq!(error_to_string(123_456), "Unknown error");
    }

    #[test]
    fn test_categories() {
        assert_eq!(ResultCode::InvalidCredentials.category(), ErrorCategory::Security);
        assert_eq!(ResultCode::NoSuchObject.category(), ErrorCategory::Name);
        assert_eq!(ResultCode::Busy.category(), ErrorCategory::Service);
        assert_eq!(ResultCode::AlreadyExists.category(), ErrorCategory::Update);
        assert_eq!(ResultCode::UndefinedAttributeType.category(), ErrorCategory::Attribute);
        assert_eq!(ResultCode::Timeout.category(), ErrorCategory::Api);
        assert!(ResultCode::CompareTrue.is_success());
    }

    #[test]
    fn test_server_down_detection() {
        let err = Error::Library(LdapError::new(ResultCode::ServerDown, "eof"));
        assert!(err.is_server_down());
        let err = Error::Library(LdapError::new(ResultCode::InvalidCredentials, ""));
        assert!(!err.is_server_down());
        assert!(!Error::Timeout { msgid: 1 }.is_server_down());
    }

    #[test]
    fn test_option_error_carries_result_code() {
        let inner = Error::Library(LdapError::new(ResultCode::ParamError, "bad"));
        let err = Error::option("LDAP_OPT_PROTOCOL_VERSION", "set", inner);
        assert_eq!(err.result_code(), Some(ResultCode::ParamError));
        assert_eq!(
            err.to_string(),
            "couldn't set option: LDAP_OPT_PROTOCOL_VERSION"
        );
    }

    #[test]
    fn test_ldap_error_display() {
        let err = LdapError::from_server(32, "dc=example,dc=com", "no such entry");
        let text = err.to_string();
        assert!(text.contains("No such object (32)"));
        assert!(text.contains("no such entry"));
        assert!(text.contains("dc=example,dc=com"));
    }
}
