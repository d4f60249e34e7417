//! Protocol message encoding

use super::ber::BerWriter;
use super::constants::{ber, context, tags};
use super::message::{
    BindAuth, BindRequest, Control, LdapMessage, ProtocolOp, ResultInfo, SearchEntry,
    SearchRequest,
};
use bytes::BytesMut;
use std::io;

/// Encode an LDAPMessage into bytes
///
/// Scratch buffers that held the body are zeroed before they are released, so
/// the returned buffer is the only copy of any bind credentials. Callers
/// sending a bind should scrub it after the write.
pub fn encode_message(msg: &LdapMessage) -> io::Result<BytesMut> {
    let mut body = BerWriter::new();
    body.write_integer(ber::INTEGER, msg.message_id as i64);
    encode_op(&mut body, &msg.op)?;
    if !msg.controls.is_empty() {
        body.write_constructed(tags::CONTROLS, |w| encode_controls(w, &msg.controls))?;
    }

    let mut out = BerWriter::new();
    out.write_tlv(ber::SEQUENCE, body.as_slice());
    body.scrub();
    Ok(out.into_bytes())
}

fn encode_op(w: &mut BerWriter, op: &ProtocolOp) -> io::Result<()> {
    match op {
        ProtocolOp::BindRequest(req) => encode_bind_request(w, req),
        ProtocolOp::BindResponse(resp) => w.write_constructed(tags::BIND_RESPONSE, |w| {
            encode_result(w, &resp.result)?;
            if let Some(creds) = &resp.server_sasl_creds {
                w.write_octets(context::SERVER_SASL_CREDS, creds);
            }
            Ok(())
        }),
        ProtocolOp::UnbindRequest => {
            w.write_null(tags::UNBIND_REQUEST);
            Ok(())
        }
        ProtocolOp::SearchRequest(req) => encode_search_request(w, req),
        ProtocolOp::SearchResultEntry(entry) => encode_search_entry(w, entry),
        ProtocolOp::SearchResultDone(result) => {
            w.write_constructed(tags::SEARCH_RESULT_DONE, |w| encode_result(w, result))
        }
        ProtocolOp::SearchResultReference(uris) => {
            w.write_constructed(tags::SEARCH_RESULT_REFERENCE, |w| {
                for uri in uris {
                    w.write_octets(ber::OCTET_STRING, uri.as_bytes());
                }
                Ok(())
            })
        }
        ProtocolOp::AbandonRequest(id) => {
            w.write_integer(tags::ABANDON_REQUEST, *id as i64);
            Ok(())
        }
        ProtocolOp::ExtendedRequest(req) => w.write_constructed(tags::EXTENDED_REQUEST, |w| {
            w.write_octets(context::EXT_REQUEST_NAME, req.name.as_bytes());
            if let Some(value) = &req.value {
                w.write_octets(context::EXT_REQUEST_VALUE, value);
            }
            Ok(())
        }),
        ProtocolOp::ExtendedResponse(resp) => w.write_constructed(tags::EXTENDED_RESPONSE, |w| {
            encode_result(w, &resp.result)?;
            if let Some(name) = &resp.name {
                w.write_octets(context::EXT_RESPONSE_NAME, name.as_bytes());
            }
            if let Some(value) = &resp.value {
                w.write_octets(context::EXT_RESPONSE_VALUE, value);
            }
            Ok(())
        }),
        ProtocolOp::IntermediateResponse(resp) => {
            w.write_constructed(tags::INTERMEDIATE_RESPONSE, |w| {
                if let Some(name) = &resp.name {
                    w.write_octets(context::INTERMEDIATE_NAME, name.as_bytes());
                }
                if let Some(value) = &resp.value {
                    w.write_octets(context::INTERMEDIATE_VALUE, value);
                }
                Ok(())
            })
        }
        ProtocolOp::Other { tag, body } => {
            w.write_tlv(*tag, body);
            Ok(())
        }
    }
}

fn encode_bind_request(w: &mut BerWriter, req: &BindRequest) -> io::Result<()> {
    let mut body = BerWriter::new();
    body.write_integer(ber::INTEGER, req.version as i64);
    body.write_octets(ber::OCTET_STRING, req.name.as_bytes());
    match &req.auth {
        BindAuth::Simple(password) => body.write_octets(context::AUTH_SIMPLE, password),
        BindAuth::Sasl {
            mechanism,
            credentials,
        } => {
            let mut sasl = BerWriter::new();
            sasl.write_octets(ber::OCTET_STRING, mechanism.as_bytes());
            if let Some(creds) = credentials {
                sasl.write_octets(ber::OCTET_STRING, creds);
            }
            body.write_tlv(context::AUTH_SASL, sasl.as_slice());
            sasl.scrub();
        }
    }
    w.write_tlv(tags::BIND_REQUEST, body.as_slice());
    body.scrub();
    Ok(())
}

fn encode_search_request(w: &mut BerWriter, req: &SearchRequest) -> io::Result<()> {
    w.write_constructed(tags::SEARCH_REQUEST, |w| {
        w.write_octets(ber::OCTET_STRING, req.base.as_bytes());
        w.write_integer(ber::ENUMERATED, req.scope as i64);
        w.write_integer(ber::ENUMERATED, req.deref as i64);
        w.write_integer(ber::INTEGER, req.size_limit as i64);
        w.write_integer(ber::INTEGER, req.time_limit as i64);
        w.write_bool(ber::BOOLEAN, req.types_only);
        req.filter.encode(w)?;
        w.write_sequence(|w| {
            for attr in &req.attributes {
                w.write_octets(ber::OCTET_STRING, attr.as_bytes());
            }
            Ok(())
        })
    })
}

fn encode_search_entry(w: &mut BerWriter, entry: &SearchEntry) -> io::Result<()> {
    w.write_constructed(tags::SEARCH_RESULT_ENTRY, |w| {
        w.write_octets(ber::OCTET_STRING, entry.dn.as_bytes());
        w.write_sequence(|w| {
            for attr in &entry.attributes {
                w.write_sequence(|w| {
                    w.write_octets(ber::OCTET_STRING, attr.name.as_bytes());
                    w.write_constructed(ber::SET, |w| {
                        for value in &attr.values {
                            w.write_octets(ber::OCTET_STRING, value);
                        }
                        Ok(())
                    })
                })?;
            }
            Ok(())
        })
    })
}

fn encode_result(w: &mut BerWriter, result: &ResultInfo) -> io::Result<()> {
    w.write_integer(ber::ENUMERATED, result.code as i64);
    w.write_octets(ber::OCTET_STRING, result.matched_dn.as_bytes());
    w.write_octets(ber::OCTET_STRING, result.diagnostic.as_bytes());
    if !result.referrals.is_empty() {
        w.write_constructed(context::REFERRAL, |w| {
            for uri in &result.referrals {
                w.write_octets(ber::OCTET_STRING, uri.as_bytes());
            }
            Ok(())
        })?;
    }
    Ok(())
}

fn encode_controls(w: &mut BerWriter, controls: &[Control]) -> io::Result<()> {
    for control in controls {
        w.write_sequence(|w| {
            w.write_octets(ber::OCTET_STRING, control.oid.as_bytes());
            if control.critical {
                w.write_bool(ber::BOOLEAN, true);
            }
            if let Some(value) = &control.value {
                w.write_octets(ber::OCTET_STRING, value);
            }
            Ok(())
        })?;
    }
    Ok(())
}
