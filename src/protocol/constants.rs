//! LDAPv3 protocol constants

/// LDAP protocol version this client speaks
pub const PROTOCOL_VERSION: i32 = 3;

/// Default port for `ldap://`
pub const LDAP_PORT: u16 = 389;

/// Default port for `ldaps://`
pub const LDAPS_PORT: u16 = 636;

/// Socket used for `ldapi://` URLs without a host component
pub const LDAPI_DEFAULT_PATH: &str = "/var/run/ldapi";

/// Universal BER tags
pub mod ber {
    /// BOOLEAN
    pub const BOOLEAN: u8 = 0x01;

    /// INTEGER
    pub const INTEGER: u8 = 0x02;

    /// OCTET STRING
    pub const OCTET_STRING: u8 = 0x04;

    /// NULL
    pub const NULL: u8 = 0x05;

    /// ENUMERATED
    pub const ENUMERATED: u8 = 0x0A;

    /// SEQUENCE / SEQUENCE OF (constructed)
    pub const SEQUENCE: u8 = 0x30;

    /// SET / SET OF (constructed)
    pub const SET: u8 = 0x31;

    /// Constructed bit
    pub const CONSTRUCTED: u8 = 0x20;
}

/// Protocol operation tags ([APPLICATION n])
pub mod tags {
    /// BindRequest
    pub const BIND_REQUEST: u8 = 0x60;

    /// BindResponse
    pub const BIND_RESPONSE: u8 = 0x61;

    /// UnbindRequest (primitive NULL)
    pub const UNBIND_REQUEST: u8 = 0x42;

    /// SearchRequest
    pub const SEARCH_REQUEST: u8 = 0x63;

    /// SearchResultEntry
    pub const SEARCH_RESULT_ENTRY: u8 = 0x64;

    /// SearchResultDone
    pub const SEARCH_RESULT_DONE: u8 = 0x65;

    /// ModifyResponse
    pub const MODIFY_RESPONSE: u8 = 0x67;

    /// AddResponse
    pub const ADD_RESPONSE: u8 = 0x69;

    /// DelResponse
    pub const DEL_RESPONSE: u8 = 0x6B;

    /// ModifyDNResponse
    pub const MODIFY_DN_RESPONSE: u8 = 0x6D;

    /// CompareResponse
    pub const COMPARE_RESPONSE: u8 = 0x6F;

    /// AbandonRequest (primitive INTEGER)
    pub const ABANDON_REQUEST: u8 = 0x50;

    /// SearchResultReference
    pub const SEARCH_RESULT_REFERENCE: u8 = 0x73;

    /// ExtendedRequest
    pub const EXTENDED_REQUEST: u8 = 0x77;

    /// ExtendedResponse
    pub const EXTENDED_RESPONSE: u8 = 0x78;

    /// IntermediateResponse
    pub const INTERMEDIATE_RESPONSE: u8 = 0x79;

    /// Controls ([0] in LDAPMessage)
    pub const CONTROLS: u8 = 0xA0;

    /// Whether a response with this tag ends its operation
    pub fn is_terminal(tag: u8) -> bool {
        !matches!(
            tag,
            SEARCH_RESULT_ENTRY | SEARCH_RESULT_REFERENCE | INTERMEDIATE_RESPONSE
        )
    }
}

/// Context-specific tags inside PDUs
pub mod context {
    /// BindRequest simple authentication [0]
    pub const AUTH_SIMPLE: u8 = 0x80;

    /// BindRequest SASL authentication [3]
    pub const AUTH_SASL: u8 = 0xA3;

    /// LDAPResult referral [3]
    pub const REFERRAL: u8 = 0xA3;

    /// BindResponse serverSaslCreds [7]
    pub const SERVER_SASL_CREDS: u8 = 0x87;

    /// ExtendedRequest requestName [0]
    pub const EXT_REQUEST_NAME: u8 = 0x80;

    /// ExtendedRequest requestValue [1]
    pub const EXT_REQUEST_VALUE: u8 = 0x81;

    /// ExtendedResponse responseName [10]
    pub const EXT_RESPONSE_NAME: u8 = 0x8A;

    /// ExtendedResponse responseValue [11]
    pub const EXT_RESPONSE_VALUE: u8 = 0x8B;

    /// IntermediateResponse responseName [0]
    pub const INTERMEDIATE_NAME: u8 = 0x80;

    /// IntermediateResponse responseValue [1]
    pub const INTERMEDIATE_VALUE: u8 = 0x81;
}

/// Filter CHOICE tags
pub mod filter {
    /// and [0]
    pub const AND: u8 = 0xA0;
    /// or [1]
    pub const OR: u8 = 0xA1;
    /// not [2]
    pub const NOT: u8 = 0xA2;
    /// equalityMatch [3]
    pub const EQUALITY: u8 = 0xA3;
    /// substrings [4]
    pub const SUBSTRINGS: u8 = 0xA4;
    /// greaterOrEqual [5]
    pub const GREATER_OR_EQUAL: u8 = 0xA5;
    /// lessOrEqual [6]
    pub const LESS_OR_EQUAL: u8 = 0xA6;
    /// present [7], primitive
    pub const PRESENT: u8 = 0x87;
    /// approxMatch [8]
    pub const APPROX: u8 = 0xA8;
    /// extensibleMatch [9]
    pub const EXTENSIBLE: u8 = 0xA9;

    /// SubstringFilter initial [0]
    pub const SUB_INITIAL: u8 = 0x80;
    /// SubstringFilter any [1]
    pub const SUB_ANY: u8 = 0x81;
    /// SubstringFilter final [2]
    pub const SUB_FINAL: u8 = 0x82;

    /// MatchingRuleAssertion matchingRule [1]
    pub const MATCHING_RULE: u8 = 0x81;
    /// MatchingRuleAssertion type [2]
    pub const MATCH_TYPE: u8 = 0x82;
    /// MatchingRuleAssertion matchValue [3]
    pub const MATCH_VALUE: u8 = 0x83;
    /// MatchingRuleAssertion dnAttributes [4]
    pub const DN_ATTRIBUTES: u8 = 0x84;
}

/// Search scope integers
pub mod scope {
    /// Base object only
    pub const BASE: i32 = 0;

    /// Immediate children of the base
    pub const ONE_LEVEL: i32 = 1;

    /// Base and all descendants
    pub const SUBTREE: i32 = 2;

    /// All descendants, excluding the base (draft-sermersheim-ldap-subordinate-scope)
    pub const SUBORDINATE: i32 = 3;
}

/// derefAliases integers
pub mod deref {
    /// neverDerefAliases
    pub const NEVER: i32 = 0;
    /// derefInSearching
    pub const IN_SEARCHING: i32 = 1;
    /// derefFindingBaseObj
    pub const FINDING_BASE: i32 = 2;
    /// derefAlways
    pub const ALWAYS: i32 = 3;
}

/// Well-known OIDs
pub mod oid {
    /// StartTLS extended operation
    pub const START_TLS: &str = "1.3.6.1.4.1.1466.20037";

    /// Notice of disconnection (unsolicited notification)
    pub const NOTICE_OF_DISCONNECTION: &str = "1.3.6.1.4.1.1466.20036";
}
