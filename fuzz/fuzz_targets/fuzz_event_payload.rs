#![no_main]

use libfuzzer_sys::fuzz_target;
use nosgraph::event_store::InMemoryRepository;
use nosgraph::{EventProcessor, FixedClock};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let processor = EventProcessor::new(Arc::new(InMemoryRepository::new()))
        .with_clock(Arc::new(FixedClock(1_700_000_000.0)));
    // Rejections are expected; panics are not.
    let _ = processor.process(text, Some("wss://fuzz"));
    if let Ok(event) = nosgraph::nostr_core::RawEvent::from_json(text) {
        let _ = nosgraph::nostr_core::verify(&event);
        let _ = nosgraph::nostr_core::canonical_serialize(&event);
    }
});
