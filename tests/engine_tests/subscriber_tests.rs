use crossbeam::channel;
use layerkv::engine::Engine;
use layerkv::events::{ChangeEvent, EventKind, SubscriberRegistry};
use tempfile::TempDir;

use crate::common::{entries_config, setup_temp_engine};

// =============================================================================
// Engine Change Feed Tests
// =============================================================================

#[test]
fn test_set_and_delete_events() {
    let (_temp, engine) = setup_temp_engine();
    let events = engine.subscribe_bounded();

    engine.set("a", "1").unwrap();
    engine.delete("a").unwrap();

    let set = events.try_recv().unwrap();
    assert_eq!(set.kind, EventKind::Set);
    assert_eq!(set.key, b"a");
    assert_eq!(set.value, Some(b"1".to_vec()));
    assert_eq!(set.sequence, Some(1));

    let delete = events.try_recv().unwrap();
    assert_eq!(delete.kind, EventKind::Delete);
    assert_eq!(delete.value, None);
    assert_eq!(delete.sequence, Some(2));

    assert!(events.try_recv().is_err());
}

#[test]
fn test_events_arrive_in_sequence_order() {
    let (_temp, engine) = setup_temp_engine();
    let events = engine.subscribe_bounded();

    for i in 0..50 {
        engine.set(format!("k{}", i), "v").unwrap();
    }

    let sequences: Vec<u64> = events.try_iter().filter_map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=50).collect::<Vec<_>>());
}

#[test]
fn test_full_subscriber_drops_events() {
    let (_temp, engine) = setup_temp_engine();
    let (tx, rx) = channel::bounded(1);
    engine.subscribe(tx);

    engine.set("a", "1").unwrap();
    engine.set("b", "2").unwrap();
    engine.set("c", "3").unwrap();

    // Writes were not held back by the slow subscriber
    assert_eq!(engine.get_string("c").unwrap(), "3");
    assert_eq!(rx.try_recv().unwrap().key, b"a");
    assert!(rx.try_recv().is_err());

    let stats = engine.stats();
    assert_eq!(stats.events_delivered, 1);
    assert_eq!(stats.events_dropped, 2);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let (_temp, engine) = setup_temp_engine();
    let (tx, rx) = channel::unbounded();
    engine.subscribe(tx.clone());

    engine.set("a", "1").unwrap();
    assert!(engine.unsubscribe(&tx));
    assert!(!engine.unsubscribe(&tx));
    engine.set("b", "2").unwrap();

    let keys: Vec<Vec<u8>> = rx.try_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec![b"a".to_vec()]);
}

#[test]
fn test_disconnected_subscriber_is_pruned() {
    let (_temp, engine) = setup_temp_engine();
    drop(engine.subscribe_bounded());
    assert_eq!(engine.stats().subscribers, 1);

    engine.set("a", "1").unwrap();
    assert_eq!(engine.stats().subscribers, 0);
}

#[test]
fn test_compaction_event_published() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(entries_config(&temp_dir, 1000)).unwrap();

    engine.set("a", "1").unwrap();
    engine.flush().unwrap();
    engine.set("b", "2").unwrap();
    engine.flush().unwrap();

    let events = engine.subscribe_bounded();
    engine.compact_level(0).unwrap().unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::Compaction);
    assert_eq!(event.key, b"compaction");
    assert_eq!(event.sequence, None);
    assert!(event.value.is_some());
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_duplicate_subscribe_is_ignored() {
    let registry = SubscriberRegistry::new(4);
    let (tx, rx) = channel::unbounded();
    registry.subscribe(tx.clone());
    registry.subscribe(tx);
    assert_eq!(registry.subscriber_count(), 1);

    registry.publish(&ChangeEvent::compaction("done"));
    assert_eq!(rx.try_iter().count(), 1);
}

#[test]
fn test_bounded_subscriber_uses_capacity() {
    let registry = SubscriberRegistry::new(2);
    let rx = registry.subscribe_bounded();

    for _ in 0..5 {
        registry.publish(&ChangeEvent::compaction("done"));
    }

    assert_eq!(rx.try_iter().count(), 2);
    assert_eq!(registry.delivered(), 2);
    assert_eq!(registry.dropped(), 3);
}
