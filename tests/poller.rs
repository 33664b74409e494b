//! Outbox Poller Tests
//!
//! Covers the backoff schedule and the bounded dedup set.

use std::time::Duration;
use uuid::Uuid;

use courier::jobs::outbox_poller::{backoff, DedupSet};

// ===========================================================================
// Backoff
// ===========================================================================

#[test]
fn backoff_nominal_interval() {
    assert_eq!(backoff(0), Duration::from_millis(2_000));
}

#[test]
fn backoff_doubles_per_error() {
    assert_eq!(backoff(1), Duration::from_millis(4_000));
    assert_eq!(backoff(2), Duration::from_millis(8_000));
    assert_eq!(backoff(3), Duration::from_millis(16_000));
}

#[test]
fn backoff_is_capped() {
    assert_eq!(backoff(4), Duration::from_millis(30_000));
    assert_eq!(backoff(10), Duration::from_millis(30_000));
    assert_eq!(backoff(u32::MAX), Duration::from_millis(30_000));
}

#[test]
fn backoff_is_non_decreasing() {
    let mut previous = backoff(0);
    for errors in 1..32 {
        let current = backoff(errors);
        assert!(current >= previous, "backoff decreased at {}", errors);
        assert!(current <= Duration::from_millis(30_000));
        previous = current;
    }
}

// ===========================================================================
// Dedup set
// ===========================================================================

#[test]
fn dedup_tracks_inserted_ids() {
    let mut set = DedupSet::new(500);
    let id = Uuid::new_v4();
    assert!(!set.contains(&id));
    set.insert(id);
    assert!(set.contains(&id));
    assert_eq!(set.len(), 1);
}

#[test]
fn dedup_insert_is_idempotent() {
    let mut set = DedupSet::new(500);
    let id = Uuid::new_v4();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

#[test]
fn dedup_removal_allows_retry() {
    let mut set = DedupSet::new(500);
    let id = Uuid::new_v4();
    set.insert(id);
    set.remove(&id);
    assert!(!set.contains(&id));
    assert!(set.is_empty());

    // A retried id re-enters the set cleanly.
    set.insert(id);
    assert!(set.contains(&id));
}

#[test]
fn dedup_evicts_oldest_beyond_high_water_mark() {
    let mut set = DedupSet::new(3);
    let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        set.insert(*id);
    }

    assert_eq!(set.len(), 3);
    assert!(!set.contains(&ids[0]));
    assert!(!set.contains(&ids[1]));
    assert!(set.contains(&ids[2]));
    assert!(set.contains(&ids[3]));
    assert!(set.contains(&ids[4]));
}

#[test]
fn dedup_remove_frees_internal_queue_entries() {
    let mut set = DedupSet::new(500);
    let id = Uuid::new_v4();

    // A persistently failing dispatcher produces this exact cycle every
    // poll: the id is inserted before dispatch and rolled back after.
    for _ in 0..10_000 {
        set.insert(id);
        set.remove(&id);
    }

    assert!(set.is_empty());
    let rendered = format!("{:?}", set);
    assert_eq!(
        rendered.matches(&id.to_string()).count(),
        0,
        "rolled-back id left entries in the eviction queue"
    );
}

#[test]
fn dedup_reinserted_id_survives_eviction_of_older_entries() {
    let mut set = DedupSet::new(2);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();

    set.insert(a);
    set.remove(&a);
    set.insert(b);
    set.insert(a);
    set.insert(c);

    // b is now the oldest live entry; the re-inserted a must outlive it.
    assert_eq!(set.len(), 2);
    assert!(set.contains(&a));
    assert!(set.contains(&c));
    assert!(!set.contains(&b));
}

#[test]
fn dedup_eviction_skips_explicitly_removed_ids() {
    let mut set = DedupSet::new(2);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let d = Uuid::new_v4();

    set.insert(a);
    set.insert(b);
    set.remove(&a);
    set.insert(c);
    set.insert(d);

    assert_eq!(set.len(), 2);
    assert!(set.contains(&c));
    assert!(set.contains(&d));
    assert!(!set.contains(&a));
    assert!(!set.contains(&b));
}
