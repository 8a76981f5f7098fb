//! Property-based codec tests.
//!
//! Uses proptest to verify:
//! 1. Any snapshot survives the persisted JSON layout unchanged.
//! 2. Random bytes never cause a panic in the record or frame decoders.
//! 3. Random text never causes a panic in the snapshot decoder.

use proptest::prelude::*;
use todosync_proto::codec;
use todosync_proto::relay;
use todosync_proto::task::{Category, RemoteRecord, SessionId, Snapshot, Task, TaskId};

/// Strategy for generating arbitrary tasks with non-empty text.
fn arb_task() -> impl Strategy<Value = Task> {
    ("[a-z0-9-]{1,36}", "[^\x00]{1,64}", any::<bool>()).prop_map(|(id, text, completed)| Task {
        id: TaskId::from(id),
        text,
        completed,
    })
}

/// Strategy for generating snapshots with up to eight tasks per category.
fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
    (
        prop::collection::vec(arb_task(), 0..8),
        prop::collection::vec(arb_task(), 0..8),
        prop::collection::vec(arb_task(), 0..8),
    )
        .prop_map(|(a, b, c)| {
            Snapshot::new()
                .with_tasks(Category::NonUrgent, a)
                .with_tasks(Category::School, b)
                .with_tasks(Category::ClubWork, c)
        })
}

proptest! {
    #[test]
    fn snapshot_survives_persisted_layout(snapshot in arb_snapshot()) {
        let text = codec::encode_snapshot(&snapshot).unwrap();
        let decoded = codec::decode_snapshot(&text).unwrap();
        prop_assert_eq!(decoded, snapshot);
    }

    #[test]
    fn record_survives_encoding(snapshot in arb_snapshot(), revision in any::<u64>()) {
        let record = RemoteRecord::new(SessionId::new(), revision, snapshot);
        let bytes = codec::encode_record(&record).unwrap();
        prop_assert_eq!(codec::decode_record(&bytes).unwrap(), record);
    }

    #[test]
    fn random_bytes_never_panic_record_decode(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_record(&bytes);
    }

    #[test]
    fn random_bytes_never_panic_frame_decode(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = relay::decode(&bytes);
    }

    #[test]
    fn random_text_never_panics_snapshot_decode(text in ".{0,256}") {
        let _ = codec::decode_snapshot(&text);
    }
}
