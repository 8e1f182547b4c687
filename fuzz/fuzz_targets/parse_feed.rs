#![no_main]

use libfuzzer_sys::fuzz_target;
use roadpulse_core::feed::{parse_feed, write_feed};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(batches) = parse_feed(text) else {
        return;
    };
    assert!(batches.iter().all(|b| !b.is_empty()));
    let written = write_feed(&batches).expect("parsed feed writes back");
    let again = parse_feed(&written).expect("written feed parses");
    assert_eq!(again, batches);
});
