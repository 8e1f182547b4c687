#![no_main]

use libfuzzer_sys::fuzz_target;
use roadpulse_core::feed::{FeedLine, WireChange, parse_line};

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(FeedLine::Event(event)) = parse_line(line) {
        // Whatever parses must serialize back to a line that parses the same.
        let wire = WireChange::from(&event);
        let text = serde_json::to_string(&wire).expect("wire change serializes");
        match parse_line(&text) {
            Ok(FeedLine::Event(again)) => assert_eq!(again, event),
            other => panic!("re-parse of {text} gave {other:?}"),
        }
    }
});
