//! Protocol message decoding

use super::ber::{read_header, BerReader};
use super::constants::{ber, context, tags};
use super::filter::Filter;
use super::message::{
    BindAuth, BindRequest, BindResponse, Control, ExtendedRequest, ExtendedResponse,
    IntermediateResponse, LdapMessage, PartialAttribute, ProtocolOp, ResultInfo, SearchEntry,
    SearchRequest,
};
use bytes::{Bytes, BytesMut};
use std::io;

/// Maximum accepted LDAPMessage size (16 MiB).
///
/// Frames whose length header exceeds this are rejected before any buffering,
/// so a hostile length cannot force a large allocation.
pub const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Total size of the LDAPMessage at the start of `data`
///
/// Returns `Ok(None)` until the tag and length octets are available. The
/// returned length may exceed `data.len()`; callers wait for more bytes.
pub fn frame_length(data: &[u8]) -> io::Result<Option<usize>> {
    let Some(header) = read_header(data)? else {
        return Ok(None);
    };
    if header.tag != ber::SEQUENCE {
        return Err(invalid(format!(
            "LDAPMessage must start with SEQUENCE, found 0x{:02x}",
            header.tag
        )));
    }
    if header.content_len > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            header.content_len, MAX_MESSAGE_LENGTH
        )));
    }
    Ok(Some(header.total_len()))
}

/// Message id and operation tag of a complete frame, without decoding the body
pub fn peek_envelope(frame: &[u8]) -> io::Result<(i32, u8)> {
    let mut outer = BerReader::new(frame);
    let mut envelope = outer.read_constructed(ber::SEQUENCE)?;
    let message_id = envelope.read_i32(ber::INTEGER)?;
    let tag = envelope
        .peek_tag()
        .ok_or_else(|| invalid("LDAPMessage without protocolOp"))?;
    Ok((message_id, tag))
}

/// Decode one message from the front of `data`
///
/// # Returns
/// `Ok((msg, consumed))` - Message and number of bytes consumed; the caller
/// advances the buffer.
/// `Err(e)` with `UnexpectedEof` if the frame is incomplete, `InvalidData` if
/// it is malformed.
pub fn decode_message(data: &mut BytesMut) -> io::Result<(LdapMessage, usize)> {
    let len = frame_length(data)?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::UnexpectedEof, "incomplete message header")
    })?;
    if data.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message body",
        ));
    }
    let msg = decode_frame(&data[..len])?;
    Ok((msg, len))
}

/// Decode a complete frame
pub fn decode_frame(frame: &[u8]) -> io::Result<LdapMessage> {
    let mut outer = BerReader::new(frame);
    let mut envelope = outer.read_constructed(ber::SEQUENCE)?;
    if !outer.is_empty() {
        return Err(invalid("trailing bytes after LDAPMessage"));
    }

    let message_id = envelope.read_i32(ber::INTEGER)?;
    let (tag, body) = envelope.read_tlv()?;
    let op = decode_op(tag, body)?;

    let mut controls = Vec::new();
    if let Some(raw) = envelope.read_optional(tags::CONTROLS)? {
        let mut r = BerReader::new(raw);
        while !r.is_empty() {
            controls.push(decode_control(&mut r.read_constructed(ber::SEQUENCE)?)?);
        }
    }

    Ok(LdapMessage {
        message_id,
        op,
        controls,
    })
}

fn decode_op(tag: u8, body: &[u8]) -> io::Result<ProtocolOp> {
    let mut r = BerReader::new(body);
    let op = match tag {
        tags::BIND_REQUEST => ProtocolOp::BindRequest(decode_bind_request(&mut r)?),
        tags::BIND_RESPONSE => {
            let result = decode_result(&mut r)?;
            let server_sasl_creds = r
                .read_optional(context::SERVER_SASL_CREDS)?
                .map(Bytes::copy_from_slice);
            ProtocolOp::BindResponse(BindResponse {
                result,
                server_sasl_creds,
            })
        }
        tags::UNBIND_REQUEST => ProtocolOp::UnbindRequest,
        tags::SEARCH_REQUEST => ProtocolOp::SearchRequest(decode_search_request(&mut r)?),
        tags::SEARCH_RESULT_ENTRY => ProtocolOp::SearchResultEntry(decode_search_entry(&mut r)?),
        tags::SEARCH_RESULT_DONE => ProtocolOp::SearchResultDone(decode_result(&mut r)?),
        tags::SEARCH_RESULT_REFERENCE => {
            let mut uris = Vec::new();
            while !r.is_empty() {
                uris.push(r.read_string(ber::OCTET_STRING)?);
            }
            ProtocolOp::SearchResultReference(uris)
        }
        tags::ABANDON_REQUEST => {
            let id = super::ber::decode_integer(body)?;
            let id = i32::try_from(id).map_err(|_| invalid("abandon id out of range"))?;
            ProtocolOp::AbandonRequest(id)
        }
        tags::EXTENDED_REQUEST => {
            let name = r.read_string(context::EXT_REQUEST_NAME)?;
            let value = r
                .read_optional(context::EXT_REQUEST_VALUE)?
                .map(Bytes::copy_from_slice);
            ProtocolOp::ExtendedRequest(ExtendedRequest { name, value })
        }
        tags::EXTENDED_RESPONSE => {
            let result = decode_result(&mut r)?;
            let name = r
                .read_optional(context::EXT_RESPONSE_NAME)?
                .map(super::ber::bytes_to_string)
                .transpose()?;
            let value = r
                .read_optional(context::EXT_RESPONSE_VALUE)?
                .map(Bytes::copy_from_slice);
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result,
                name,
                value,
            })
        }
        tags::INTERMEDIATE_RESPONSE => {
            let name = r
                .read_optional(context::INTERMEDIATE_NAME)?
                .map(super::ber::bytes_to_string)
                .transpose()?;
            let value = r
                .read_optional(context::INTERMEDIATE_VALUE)?
                .map(Bytes::copy_from_slice);
            ProtocolOp::IntermediateResponse(IntermediateResponse { name, value })
        }
        other => ProtocolOp::Other {
            tag: other,
            body: Bytes::copy_from_slice(body),
        },
    };
    Ok(op)
}

fn decode_bind_request(r: &mut BerReader<'_>) -> io::Result<BindRequest> {
    let version = r.read_i32(ber::INTEGER)?;
    let name = r.read_string(ber::OCTET_STRING)?;
    let auth = match r.read_tlv()? {
        (context::AUTH_SIMPLE, password) => BindAuth::Simple(password.to_vec()),
        (context::AUTH_SASL, sasl) => {
            let mut s = BerReader::new(sasl);
            let mechanism = s.read_string(ber::OCTET_STRING)?;
            let credentials = s.read_optional(ber::OCTET_STRING)?.map(<[u8]>::to_vec);
            BindAuth::Sasl {
                mechanism,
                credentials,
            }
        }
        (other, _) => {
            return Err(invalid(format!(
                "unsupported authentication choice 0x{:02x}",
                other
            )))
        }
    };
    Ok(BindRequest {
        version,
        name,
        auth,
    })
}

fn decode_search_request(r: &mut BerReader<'_>) -> io::Result<SearchRequest> {
    let base = r.read_string(ber::OCTET_STRING)?;
    let scope = r.read_i32(ber::ENUMERATED)?;
    let deref = r.read_i32(ber::ENUMERATED)?;
    let size_limit = r.read_i32(ber::INTEGER)?;
    let time_limit = r.read_i32(ber::INTEGER)?;
    let types_only = r.read_bool(ber::BOOLEAN)?;
    let filter = Filter::decode(r)?;
    let mut attrs = r.read_constructed(ber::SEQUENCE)?;
    let mut attributes = Vec::new();
    while !attrs.is_empty() {
        attributes.push(attrs.read_string(ber::OCTET_STRING)?);
    }
    Ok(SearchRequest {
        base,
        scope,
        deref,
        size_limit,
        time_limit,
        types_only,
        filter,
        attributes,
    })
}

fn decode_search_entry(r: &mut BerReader<'_>) -> io::Result<SearchEntry> {
    let dn = r.read_string(ber::OCTET_STRING)?;
    let mut list = r.read_constructed(ber::SEQUENCE)?;
    let mut attributes = Vec::new();
    while !list.is_empty() {
        let mut attr = list.read_constructed(ber::SEQUENCE)?;
        let name = attr.read_string(ber::OCTET_STRING)?;
        let mut set = attr.read_constructed(ber::SET)?;
        let mut values = Vec::new();
        while !set.is_empty() {
            values.push(Bytes::copy_from_slice(set.read_expected(ber::OCTET_STRING)?));
        }
        attributes.push(PartialAttribute { name, values });
    }
    Ok(SearchEntry { dn, attributes })
}

fn decode_result(r: &mut BerReader<'_>) -> io::Result<ResultInfo> {
    let code = r.read_i32(ber::ENUMERATED)?;
    let matched_dn = r.read_string(ber::OCTET_STRING)?;
    let diagnostic = r.read_string(ber::OCTET_STRING)?;
    let mut referrals = Vec::new();
    if let Some(raw) = r.read_optional(context::REFERRAL)? {
        let mut refs = BerReader::new(raw);
        while !refs.is_empty() {
            referrals.push(refs.read_string(ber::OCTET_STRING)?);
        }
    }
    Ok(ResultInfo {
        code,
        matched_dn,
        diagnostic,
        referrals,
    })
}

fn decode_control(r: &mut BerReader<'_>) -> io::Result<Control> {
    let oid = r.read_string(ber::OCTET_STRING)?;
    let critical = match r.peek_tag() {
        Some(ber::BOOLEAN) => r.read_bool(ber::BOOLEAN)?,
        _ => false,
    };
    let value = r
        .read_optional(ber::OCTET_STRING)?
        .map(Bytes::copy_from_slice);
    Ok(Control {
        oid,
        critical,
        value,
    })
}
