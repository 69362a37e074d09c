//! Contention suites: these verify concurrent correctness under load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use crate::queue::{Key, SkipQueue};

fn queue(max_offset: usize, max_level: usize) -> SkipQueue<u64> {
    SkipQueue::with_config(max_offset, max_level).expect("queue allocation")
}

fn count_keys(keys: impl IntoIterator<Item = Key>) -> HashMap<Key, isize> {
    let mut counts = HashMap::new();
    for k in keys {
        *counts.entry(k).or_insert(0) += 1;
    }
    counts
}

/// The load-bearing law: after a mixed concurrent workload quiesces and the
/// queue drains, the multiset of keys returned by delete_min equals the
/// multiset of keys ever inserted (prefill included). Keys collide across
/// threads on purpose.
pub fn test_multiset_preservation(num_threads: usize, ops_per_thread: usize, max_offset: usize) {
    let q = Arc::new(queue(max_offset, 16));
    let key_space = 500u64;

    let mut prefill = Vec::new();
    for i in 0..1000u64 {
        let key = (i % key_space) + 1;
        q.insert(key, key).unwrap();
        prefill.push(key);
    }

    let inserted = Arc::new(Mutex::new(prefill));
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let q = Arc::clone(&q);
            let inserted = Arc::clone(&inserted);
            let deleted = Arc::clone(&deleted);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut my_inserted = Vec::with_capacity(ops_per_thread);
                let mut my_deleted = Vec::with_capacity(ops_per_thread);
                barrier.wait();

                for _ in 0..ops_per_thread {
                    if fastrand::bool() {
                        let key = fastrand::u64(1..=key_space);
                        q.insert(key, key).unwrap();
                        my_inserted.push(key);
                    } else if let Some((key, value)) = q.delete_min() {
                        assert_eq!(key, value);
                        my_deleted.push(key);
                    }
                }

                inserted.lock().unwrap().extend(my_inserted);
                deleted.lock().unwrap().extend(my_deleted);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut drained = deleted.lock().unwrap().clone();
    while let Some((key, _)) = q.delete_min() {
        drained.push(key);
    }

    let inserted = count_keys(inserted.lock().unwrap().iter().copied());
    let drained = count_keys(drained);
    assert_eq!(
        inserted, drained,
        "multiset of inserted keys diverged from multiset of deleted keys"
    );
}

/// Concurrent delete_min callers claim disjoint entries: with n unique keys
/// and any number of racing threads, every key comes out exactly once.
pub fn test_disjoint_claims(num_threads: usize, n: u64) {
    let q = Arc::new(queue(8, 16));
    for k in 1..=n {
        q.insert(k, k).unwrap();
    }

    let claimed = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let q = Arc::clone(&q);
            let claimed = Arc::clone(&claimed);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut mine = Vec::new();
                barrier.wait();
                while let Some((key, _)) = q.delete_min() {
                    mine.push(key);
                }
                claimed.lock().unwrap().extend(mine);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut all = claimed.lock().unwrap().clone();
    all.sort_unstable();
    let expect: Vec<u64> = (1..=n).collect();
    assert_eq!(all, expect, "claims were lost or duplicated");
}

/// Inserters aim below the current minimum while a deleter churns the head,
/// forcing inserts whose chosen predecessor gets claimed mid-flight. Nothing
/// may be lost.
pub fn test_insert_race_with_head_deletion(num_inserters: usize, per_thread: usize) {
    let q = Arc::new(queue(4, 16));
    let top = 1_000_000u64;
    for i in 0..256u64 {
        q.insert(top + i, 0).unwrap();
    }

    let inserted_count = Arc::new(AtomicUsize::new(256));
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let stop = Arc::new(AtomicBool::new(false));

    let deleter = {
        let q = Arc::clone(&q);
        let deleted = Arc::clone(&deleted);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut mine = Vec::new();
            while !stop.load(Ordering::Relaxed) {
                if let Some((key, _)) = q.delete_min() {
                    mine.push(key);
                }
            }
            deleted.lock().unwrap().extend(mine);
        })
    };

    let handles: Vec<_> = (0..num_inserters)
        .map(|t| {
            let q = Arc::clone(&q);
            let inserted_count = Arc::clone(&inserted_count);
            thread::spawn(move || {
                // Descending keys per thread keep each insert near the head,
                // where the deleter is claiming predecessors.
                for i in 0..per_thread {
                    let key = top - 1 - (t * per_thread + i) as u64;
                    q.insert(key, 0).unwrap();
                    inserted_count.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    deleter.join().unwrap();

    let mut total = deleted.lock().unwrap().len();
    while q.delete_min().is_some() {
        total += 1;
    }
    assert_eq!(
        total,
        inserted_count.load(Ordering::Relaxed),
        "entries were lost to the head race"
    );
}

/// Lock-freedom smoke test: under sustained contention most threads keep
/// completing operations.
pub fn test_progress_under_contention(run_for: Duration) {
    let q = Arc::new(queue(8, 16));
    let num_threads = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let counters: Vec<_> = (0..num_threads)
        .map(|_| Arc::new(AtomicUsize::new(0)))
        .collect();
    let stop = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let q = Arc::clone(&q);
            let counter = Arc::clone(&counters[t]);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let key = (i * 31 + t as u64) % 512 + 1;
                    if i % 2 == 0 {
                        q.insert(key, key).unwrap();
                    } else {
                        q.delete_min();
                    }
                    counter.fetch_add(1, Ordering::Relaxed);
                    i += 1;
                }
            })
        })
        .collect();

    thread::sleep(run_for);
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    let progressed = counters
        .iter()
        .filter(|c| c.load(Ordering::Relaxed) > 0)
        .count();
    let max = counters
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .max()
        .unwrap();

    println!("progress: {progressed}/{num_threads} threads, max {max} ops");
    assert!(max > 1000, "no thread made sufficient progress (max: {max})");
    assert!(
        progressed > num_threads / 2,
        "too few threads made progress: {progressed}/{num_threads}"
    );
}

/// A thread whose cached position predates a restructure must reset to the
/// head and continue claiming correctly.
pub fn test_stale_cursor_recovery() {
    let max_offset = 4usize;
    let q = Arc::new(queue(max_offset, 8));
    for k in 1..=64u64 {
        q.insert(k, k).unwrap();
    }

    let (to_worker, worker_inbox) = mpsc::channel::<()>();
    let (to_main, main_inbox) = mpsc::channel::<Vec<u64>>();

    let worker = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            // Round 1: claim a couple of entries, caching a head-region
            // position.
            let mut mine = vec![
                q.delete_min().unwrap().0,
                q.delete_min().unwrap().0,
            ];
            to_main.send(mine.clone()).unwrap();

            // Round 2 happens after the main thread has restructured; the
            // cached observation is stale now.
            worker_inbox.recv().unwrap();
            mine.push(q.delete_min().unwrap().0);
            to_main.send(mine).unwrap();
        })
    };

    let round1 = main_inbox.recv().unwrap();
    assert_eq!(round1, vec![1, 2]);

    // Enough claims on this thread to trip the restructure threshold and
    // swing the head past the worker's cached region.
    let mut main_claims = Vec::new();
    for _ in 0..(max_offset as u64 + 2) {
        main_claims.push(q.delete_min().unwrap().0);
    }

    to_worker.send(()).unwrap();
    let worker_claims = main_inbox.recv().unwrap();
    worker.join().unwrap();

    let mut all = worker_claims;
    all.extend(main_claims);
    while let Some((key, _)) = q.delete_min() {
        all.push(key);
    }
    all.sort_unstable();
    let expect: Vec<u64> = (1..=64).collect();
    assert_eq!(all, expect, "stale cursor lost or duplicated a claim");
}
