#![no_main]

use bytes::BytesMut;
use ldap_wire::protocol::{decode_message, encode_message, peek_envelope};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // Several LDAPMessages may arrive in one TCP segment.
    while !buf.is_empty() {
        match decode_message(&mut buf) {
            Ok((msg, consumed)) => {
                let frame = buf.split_to(consumed);

                // routing must agree with the full decode
                let (msgid, tag) = peek_envelope(&frame).expect("peek after decode");
                assert_eq!(msgid, msg.message_id);
                assert_eq!(tag, msg.op.tag());

                // whatever decodes must encode again
                let _ = encode_message(&msg);
            }
            Err(_) => break,
        }
    }
});
