#![no_main]

use bytes::BytesMut;
use ldap_wire::protocol::{decode_message, frame_length};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
struct StreamingInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for StreamingInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        let data: Vec<u8> = u.arbitrary()?;
        let split_points: Vec<u8> = u.arbitrary()?;
        Ok(Self { data, split_points })
    }
}

/// Decode every complete message at the front of `buf`
fn drain(buf: &mut BytesMut, out: &mut Vec<i32>) -> bool {
    loop {
        match frame_length(buf) {
            Ok(Some(len)) if buf.len() >= len => match decode_message(buf) {
                Ok((msg, consumed)) => {
                    let _ = buf.split_to(consumed);
                    out.push(msg.message_id);
                }
                Err(_) => return false,
            },
            Ok(_) => return true,
            Err(_) => return false,
        }
    }
}

fuzz_target!(|input: StreamingInput| {
    if input.data.is_empty() {
        return;
    }

    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Chunked arrival must yield the same messages as one big read.
    let mut chunked = Vec::new();
    let mut buf = BytesMut::new();
    let mut healthy = true;
    for window in splits.windows(2) {
        buf.extend_from_slice(&input.data[window[0]..window[1]]);
        if !drain(&mut buf, &mut chunked) {
            healthy = false;
            break;
        }
    }

    let mut whole = Vec::new();
    let mut all = BytesMut::from(&input.data[..]);
    let whole_healthy = drain(&mut all, &mut whole);

    if healthy && whole_healthy {
        assert_eq!(chunked, whole);
    }
});
