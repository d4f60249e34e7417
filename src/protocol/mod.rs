//! LDAPv3 wire protocol
//!
//! This module handles:
//! * BER primitives shared by every PDU
//! * Encoding and decoding of LDAPMessage envelopes in both directions
//! * RFC 4515 search filters
//! * Protocol constants (tags, OIDs, scope integers)

pub mod ber;
pub mod constants;
mod decode;
mod encode;
pub mod filter;
mod message;

pub use decode::{decode_frame, decode_message, frame_length, peek_envelope, MAX_MESSAGE_LENGTH};
pub use encode::encode_message;
pub use filter::{Filter, MAX_FILTER_DEPTH};
pub use message::{
    BindAuth, BindRequest, BindResponse, Control, ExtendedRequest, ExtendedResponse,
    IntermediateResponse, LdapMessage, PartialAttribute, ProtocolOp, ResultInfo, SearchEntry,
    SearchRequest,
};
