//! Heavy contention runs. The serialized tests saturate every core on
//! purpose; running them in parallel with each other only measures the
//! scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use minnow::SkipQueue;
use minnow::common_tests::queue_stress_tests;
use serial_test::serial;

#[test]
#[serial]
fn multiset_preservation() {
    queue_stress_tests::test_multiset_preservation(8, 20_000, 8);
}

#[test]
#[serial]
fn multiset_preservation_tiny_batches() {
    // max_offset 1 restructures on nearly every delete, hammering the
    // head-swing path.
    queue_stress_tests::test_multiset_preservation(8, 10_000, 1);
}

#[test]
#[serial]
fn disjoint_claims() {
    queue_stress_tests::test_disjoint_claims(16, 50_000);
}

#[test]
#[serial]
fn insert_race_with_head_deletion() {
    queue_stress_tests::test_insert_race_with_head_deletion(4, 10_000);
}

#[test]
#[serial]
fn progress_under_contention() {
    queue_stress_tests::test_progress_under_contention(Duration::from_secs(2));
}

#[test]
fn stale_cursor_recovery() {
    queue_stress_tests::test_stale_cursor_recovery();
}

#[test]
#[serial]
fn remove_claims_are_exclusive() {
    // Every key is fought over by every thread; each must be won exactly
    // once.
    let q = Arc::new(SkipQueue::<u64>::with_config(8, 16).unwrap());
    let num_threads = 8;
    let num_keys = 2_000u64;

    for k in 1..=num_keys {
        q.insert(k, k * 10).unwrap();
    }

    let wins = Arc::new(parking_lot::Mutex::new(HashMap::<u64, usize>::new()));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let q = Arc::clone(&q);
            let wins = Arc::clone(&wins);
            thread::spawn(move || {
                let mut mine = Vec::new();
                for k in 1..=num_keys {
                    if let Some(v) = q.remove(k) {
                        mine.push((k, v));
                    }
                }
                let mut wins = wins.lock();
                for (k, v) in mine {
                    assert_eq!(v, k * 10);
                    *wins.entry(k).or_insert(0) += 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let wins = wins.lock();
    assert_eq!(wins.len() as u64, num_keys, "some keys were never won");
    for (k, count) in wins.iter() {
        assert_eq!(*count, 1, "key {k} was removed {count} times");
    }
    assert_eq!(q.delete_min(), None);
}
