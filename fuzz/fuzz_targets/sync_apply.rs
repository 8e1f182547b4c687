#![no_main]

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use roadpulse_core::feed::{Change, ChangeEvent};
use roadpulse_core::model::RecordId;
use roadpulse_core::sync::SnapshotMirror;

// Each 3-byte chunk is one event: kind, identity, payload. A kind byte
// with the high bit set also closes the batch.
fuzz_target!(|data: &[u8]| {
    let mut mirror = SnapshotMirror::<u8>::mirror();
    let mut expected: BTreeMap<RecordId, u8> = BTreeMap::new();
    let mut batch = Vec::new();

    for chunk in data.chunks_exact(3) {
        let id = RecordId::new(format!("id-{}", chunk[1] % 16));
        let event = match chunk[0] % 3 {
            0 => ChangeEvent::added(id, chunk[2]),
            1 => ChangeEvent::modified(id, chunk[2]),
            _ => ChangeEvent::removed(id),
        };
        match &event.change {
            Change::Added(v) | Change::Modified(v) => {
                expected.insert(event.id.clone(), *v);
            }
            Change::Removed => {
                expected.remove(&event.id);
            }
        }
        batch.push(event);
        if chunk[0] & 0x80 != 0 {
            mirror.apply(&batch);
            batch.clear();
        }
    }
    mirror.apply(&batch);

    let actual: BTreeMap<RecordId, u8> = mirror
        .projection()
        .iter()
        .map(|(id, v)| (id.clone(), *v))
        .collect();
    assert_eq!(actual, expected);

    let torn = mirror.teardown();
    assert_eq!(torn.destroyed, expected.len());
    assert!(mirror.projection().is_empty());
});
