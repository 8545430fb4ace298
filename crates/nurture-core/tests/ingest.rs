mod common;

use common::{T0, engine_over};
use nurture_core::dispatch::RecordingDispatcher;
use nurture_core::models::{IngestOutcome, StoredEvent};
use nurture_core::storage::{Storage, SystemConfig};
use std::sync::Arc;

fn event(id: &str) -> StoredEvent {
    StoredEvent::new(id, "u1", "page_viewed", T0)
}

#[test]
fn replayed_message_id_is_stored_once() {
    let storage = Arc::new(Storage::in_memory().unwrap());
    let engine = engine_over(&storage, &Arc::new(RecordingDispatcher::new()), SystemConfig::default());

    assert_eq!(engine.ingest_event(event("m1"), T0).unwrap(), IngestOutcome::Ingested);
    assert_eq!(engine.ingest_event(event("m1"), T0).unwrap(), IngestOutcome::Duplicate);
    assert_eq!(storage.events.len().unwrap(), 1);

    let batch = ["m1", "m2", "m3", "m2", "m4", "m3"].into_iter().map(event).collect();
    let report = engine.ingest_events(batch, T0).unwrap();
    assert_eq!(report.ingested, 3);
    assert_eq!(report.duplicates, 3);
    assert_eq!(storage.events.len().unwrap(), 4);
}

#[test]
fn event_log_is_a_sliding_window() {
    let max = 20;
    let bootstrap = Storage::in_memory().unwrap();
    bootstrap
        .config
        .update_config(SystemConfig {
            event_log_capacity: max,
            ..SystemConfig::default()
        })
        .unwrap();
    let storage = Arc::new(Storage::from_db(bootstrap.get_db()).unwrap());
    let engine = engine_over(&storage, &Arc::new(RecordingDispatcher::new()), SystemConfig::default());

    let k = 7;
    for index in 0..max + k {
        engine.ingest_event(event(&format!("m{index}")), T0).unwrap();
    }

    assert_eq!(storage.events.len().unwrap(), max);
    for index in 0..k {
        assert!(!storage.events.contains(&format!("m{index}")).unwrap());
    }
    for index in k..max + k {
        assert!(storage.events.contains(&format!("m{index}")).unwrap());
    }

    // Evicted ids are forgotten, so a late replay counts as new.
    assert_eq!(engine.ingest_event(event("m0"), T0).unwrap(), IngestOutcome::Ingested);
    assert_eq!(
        engine.ingest_event(event(&format!("m{}", max + k - 1)), T0).unwrap(),
        IngestOutcome::Duplicate
    );
    assert_eq!(storage.events.len().unwrap(), max);
}

#[test]
fn concurrent_writers_dedup_on_message_id() {
    let storage = Arc::new(Storage::in_memory().unwrap());
    let recorder = Arc::new(RecordingDispatcher::new());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine_over(&storage, &recorder, SystemConfig::default());
            std::thread::spawn(move || {
                (0..50)
                    .filter(|index| {
                        engine.ingest_event(event(&format!("m{index}")), T0).unwrap()
                            == IngestOutcome::Ingested
                    })
                    .count()
            })
        })
        .collect();

    let ingested: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(ingested, 50);
    assert_eq!(storage.events.len().unwrap(), 50);
}
