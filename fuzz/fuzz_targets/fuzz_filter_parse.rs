#![no_main]

use ldap_wire::protocol::ber::{BerReader, BerWriter};
use ldap_wire::protocol::Filter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(filter) = Filter::parse(text) else {
        return;
    };

    // the string form of a parsed filter parses to the same filter
    let printed = filter.to_string();
    let reparsed = Filter::parse(&printed).expect("reparse of printed filter");
    assert_eq!(filter, reparsed);

    // and survives a BER round trip
    let mut w = BerWriter::new();
    filter.encode(&mut w).expect("encode");
    let bytes = w.into_bytes();
    let decoded = Filter::decode(&mut BerReader::new(&bytes)).expect("decode");
    assert_eq!(filter, decoded);
});
