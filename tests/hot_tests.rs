//! Tests for the hot tier
//!
//! These tests verify:
//! - Insert ordering, restamping and batch boundaries
//! - Slice semantics of range reads and the hot floor
//! - Delete, size accounting and limits
//! - Batch queue leases and shutdown
//! - Recovery from WAL and checkpoint
//! - Stream generations across delete and recreate

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use tierstream::config::{Config, WalSyncStrategy};
use tierstream::datapoint::codec::encoded_size;
use tierstream::hot::{BatchRef, HotCache, HotRange, TimeLookup, RESTAMP_EPSILON};
use tierstream::{Datapoint, Scope, StreamKey, TierError};

// =============================================================================
// Helper Functions
// =============================================================================

fn memory_cache(batch_size: u64) -> HotCache {
    let config = Config::builder()
        .hot_durability(false)
        .batch_size(batch_size)
        .build();
    HotCache::open(&config).unwrap()
}

fn durable_config(dir: &TempDir, batch_size: u64) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .batch_size(batch_size)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build()
}

fn key() -> StreamKey {
    StreamKey::primary("dev1", "temp")
}

fn dps(ts: &[f64]) -> Vec<Datapoint> {
    ts.iter().map(|&t| Datapoint::new(t, format!("v{}", t))).collect()
}

fn timestamps(points: &[Datapoint]) -> Vec<f64> {
    points.iter().map(|dp| dp.timestamp).collect()
}

fn hot_data(cache: &HotCache, key: &StreamKey, i1: i64, i2: i64) -> Vec<Datapoint> {
    match cache.range(key, i1, i2).unwrap().0 {
        HotRange::Data(points) => points,
        HotRange::Cold => panic!("expected hot data for [{}, {})", i1, i2),
    }
}

// =============================================================================
// Insert Tests
// =============================================================================

#[test]
fn test_insert_returns_new_length() {
    let cache = memory_cache(250);

    assert_eq!(cache.insert(&key(), dps(&[1.0, 2.0]), false).unwrap(), 2);
    assert_eq!(cache.insert(&key(), dps(&[3.0]), false).unwrap(), 3);

    let meta = cache.metadata(&key()).unwrap();
    assert_eq!(meta.length, 3);
    assert_eq!(meta.start_time, 1.0);
    assert_eq!(meta.end_time, 3.0);
}

#[test]
fn test_empty_insert_is_noop() {
    let cache = memory_cache(250);
    assert_eq!(cache.insert(&key(), vec![], false).unwrap(), 0);
    assert!(!cache.contains(&key()));

    cache.insert(&key(), dps(&[1.0]), false).unwrap();
    assert_eq!(cache.insert(&key(), vec![], false).unwrap(), 1);
}

#[test]
fn test_unordered_input_rejected() {
    let cache = memory_cache(250);
    let result = cache.insert(&key(), dps(&[2.0, 1.0]), true);

    assert!(matches!(result, Err(TierError::UnorderedInput)));
    assert!(!cache.contains(&key()));
}

#[test]
fn test_out_of_order_insert_rejected_without_change() {
    let cache = memory_cache(2);
    cache.insert(&key(), dps(&[8.0, 10.0]), false).unwrap();
    let before = cache.metadata(&key()).unwrap();
    let pending_before = cache.queue().pending();

    let result = cache.insert(&key(), dps(&[5.0]), false);

    assert!(matches!(result, Err(TierError::TimestampOrder)));
    assert_eq!(cache.length(&key()), 2);
    assert_eq!(cache.metadata(&key()).unwrap(), before);
    assert_eq!(cache.queue().pending(), pending_before);
    assert_eq!(timestamps(&hot_data(&cache, &key(), 0, 0)), vec![8.0, 10.0]);
}

#[test]
fn test_non_finite_timestamps_rejected() {
    let cache = memory_cache(250);
    cache.insert(&key(), dps(&[10.0]), false).unwrap();

    let result = cache.insert(&key(), dps(&[11.0, f64::NAN]), true);
    assert!(matches!(result, Err(TierError::InvalidTimestamp(t)) if t.is_nan()));
    assert!(result.unwrap_err().is_caller_error());

    let result = cache.insert(&key(), dps(&[f64::INFINITY]), false);
    assert!(matches!(result, Err(TierError::InvalidTimestamp(t)) if t == f64::INFINITY));

    // rejected before touching the stream, so a fresh key is not created
    let other = StreamKey::primary("dev1", "gps");
    assert!(cache.insert(&other, dps(&[f64::NEG_INFINITY]), false).is_err());
    assert!(!cache.contains(&other));

    // ordering against the stored end time still holds
    assert!(matches!(
        cache.insert(&key(), dps(&[5.0]), false),
        Err(TierError::TimestampOrder)
    ));
    assert_eq!(timestamps(&hot_data(&cache, &key(), 0, 0)), vec![10.0]);
    assert_eq!(cache.metadata(&key()).unwrap().end_time, 10.0);
}

#[test]
fn test_equal_timestamp_is_accepted() {
    let cache = memory_cache(250);
    cache.insert(&key(), dps(&[10.0]), false).unwrap();

    assert_eq!(cache.insert(&key(), dps(&[10.0, 11.0]), false).unwrap(), 3);
}

#[test]
fn test_restamp_leading_run_after_integral_end() {
    let cache = memory_cache(250);
    cache.insert(&key(), dps(&[9.0, 10.0]), false).unwrap();

    cache.insert(&key(), dps(&[5.0, 7.0, 12.0]), true).unwrap();

    let stamp = 10.0 + RESTAMP_EPSILON;
    let points = hot_data(&cache, &key(), 2, 0);
    assert_eq!(timestamps(&points), vec![stamp, stamp, 12.0]);
    // payloads are untouched
    assert_eq!(points[0].payload.as_str(), Some("v5"));
    assert_eq!(cache.metadata(&key()).unwrap().end_time, 12.0);
}

#[test]
fn test_restamp_all_older_keeps_end_time_non_decreasing() {
    let cache = memory_cache(250);
    cache.insert(&key(), dps(&[10.5]), false).unwrap();

    cache.insert(&key(), dps(&[1.0, 2.0, 3.0]), true).unwrap();

    assert_eq!(timestamps(&hot_data(&cache, &key(), 1, 0)), vec![10.5, 10.5, 10.5]);
    assert_eq!(cache.metadata(&key()).unwrap().end_time, 10.5);
}

#[test]
fn test_restamp_not_needed_leaves_points() {
    let cache = memory_cache(250);
    cache.insert(&key(), dps(&[1.0]), false).unwrap();
    cache.insert(&key(), dps(&[2.0, 3.0]), true).unwrap();

    assert_eq!(timestamps(&hot_data(&cache, &key(), 0, 0)), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_batch_references_on_boundary() {
    let cache = memory_cache(2);
    cache
        .insert(&key(), dps(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
        .unwrap();

    assert_eq!(
        cache.queue().pending(),
        vec![BatchRef::new(key(), 0, 2), BatchRef::new(key(), 2, 4)]
    );
    assert_eq!(cache.metadata(&key()).unwrap().batch_cursor, 4);

    cache.insert(&key(), dps(&[6.0]), false).unwrap();
    assert_eq!(cache.queue().pending_len(), 3);
    assert_eq!(cache.metadata(&key()).unwrap().batch_cursor, 6);
}

#[test]
fn test_concurrent_inserts_keep_order() {
    let cache = Arc::new(memory_cache(16));
    let clock = Arc::new(AtomicU64::new(1));
    let mut handles = vec![];

    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let clock = Arc::clone(&clock);
        handles.push(thread::spawn(move || {
            let mut accepted = 0;
            for _ in 0..100 {
                let t = clock.fetch_add(1, Ordering::SeqCst) as f64;
                match cache.insert(&key(), dps(&[t]), false) {
                    Ok(_) => accepted += 1,
                    Err(TierError::TimestampOrder) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            accepted
        }));
    }

    let accepted: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let points = hot_data(&cache, &key(), 0, 0);

    assert_eq!(cache.length(&key()), accepted);
    assert_eq!(points.len() as i64, accepted);
    assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn test_concurrent_inserts_different_keys() {
    let cache = Arc::new(memory_cache(10));
    let mut handles = vec![];

    for i in 0..8 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            let key = StreamKey::primary("dev1", format!("s{}", i));
            for t in 0..50 {
                cache.insert(&key, dps(&[t as f64 + 1.0]), false).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..8 {
        assert_eq!(cache.length(&StreamKey::primary("dev1", format!("s{}", i))), 50);
    }
    assert_eq!(cache.queue().pending_len(), 8 * 5);
}

// =============================================================================
// Range Tests
// =============================================================================

#[test]
fn test_range_slice_semantics() {
    let cache = memory_cache(250);
    cache
        .insert(&key(), dps(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
        .unwrap();

    assert_eq!(timestamps(&hot_data(&cache, &key(), -1, 0)), vec![5.0]);
    assert_eq!(hot_data(&cache, &key(), 0, 0).len(), 5);
    assert_eq!(timestamps(&hot_data(&cache, &key(), -3, -1)), vec![3.0, 4.0]);
    assert_eq!(cache.resolve(&key(), 3, 1000).unwrap(), (3, 5));
    assert!(matches!(cache.range(&key(), 4, 2), Err(TierError::InvalidRange(_))));
}

#[test]
fn test_range_unknown_stream() {
    let cache = memory_cache(250);

    let (answer, r1, r2) = cache.range(&key(), 0, 0).unwrap();
    assert_eq!(answer, HotRange::Data(vec![]));
    assert_eq!((r1, r2), (0, 0));

    assert!(matches!(cache.range(&key(), 1, 0), Err(TierError::InvalidRange(_))));
    assert_eq!(cache.length(&key()), 0);
}

#[test]
fn test_trim_moves_floor_and_range_goes_cold() {
    let cache = memory_cache(2);
    cache
        .insert(&key(), dps(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
        .unwrap();

    assert_eq!(cache.trim(&key(), 2).unwrap(), 2);
    assert_eq!(cache.hot_floor(&key()), 2);
    assert_eq!(cache.hot_len(&key()), 3);
    assert_eq!(cache.length(&key()), 5);

    assert_eq!(cache.range(&key(), 0, 0).unwrap().0, HotRange::Cold);
    assert_eq!(timestamps(&hot_data(&cache, &key(), 2, 0)), vec![3.0, 4.0, 5.0]);

    // trimming below the floor again is a no-op
    assert_eq!(cache.trim(&key(), 1).unwrap(), 0);
    assert_eq!(cache.trim(&key(), 2).unwrap(), 0);
}

#[test]
fn test_find_time() {
    let cache = memory_cache(2);
    cache
        .insert(&key(), dps(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
        .unwrap();

    assert_eq!(cache.find_time(&key(), 2.5), Some(TimeLookup::Index(2)));
    assert_eq!(cache.find_time(&key(), 9.0), Some(TimeLookup::Index(5)));
    assert_eq!(cache.find_time(&key(), 0.5), Some(TimeLookup::BeforeFloor { floor: 0 }));

    cache.trim(&key(), 4).unwrap();
    assert_eq!(cache.find_time(&key(), 1.0), Some(TimeLookup::BeforeFloor { floor: 4 }));
    assert_eq!(cache.find_time(&StreamKey::primary("x", "y"), 1.0), None);
}

// =============================================================================
// Delete & Size Tests
// =============================================================================

#[test]
fn test_delete_scopes() {
    let cache = memory_cache(2);
    let primary = StreamKey::primary("dev1", "temp");
    let downlink = StreamKey::downlink("dev1", "temp");
    let other = StreamKey::primary("dev1", "gps");
    for k in [&primary, &downlink, &other] {
        cache.insert(k, dps(&[1.0, 2.0, 3.0]), false).unwrap();
    }
    assert_eq!(cache.queue().pending_len(), 3);

    let removed = cache
        .delete(&Scope::Stream {
            owner: "dev1".to_string(),
            stream: "temp".to_string(),
        })
        .unwrap();

    assert_eq!(removed, 2);
    assert!(!cache.contains(&primary));
    assert!(!cache.contains(&downlink));
    assert!(cache.contains(&other));
    assert_eq!(cache.queue().pending(), vec![BatchRef::new(other.clone(), 0, 2)]);

    assert_eq!(cache.delete(&Scope::Owner("dev1".to_string())).unwrap(), 1);
    assert!(cache.keys(None).is_empty());
    assert_eq!(cache.queue().pending_len(), 0);
}

#[test]
fn test_insert_after_delete_starts_fresh() {
    let cache = memory_cache(250);
    cache.insert(&key(), dps(&[5.0, 6.0]), false).unwrap();
    cache.delete(&Scope::Substream(key())).unwrap();

    assert_eq!(cache.insert(&key(), dps(&[1.0]), false).unwrap(), 1);
}

#[test]
fn test_recreated_stream_gets_next_generation() {
    let cache = memory_cache(2);
    assert_eq!(cache.next_generation(&key()), 0);
    cache.insert(&key(), dps(&[1.0, 2.0]), false).unwrap();
    assert_eq!(cache.generation(&key()), Some(0));

    cache.delete(&Scope::Substream(key())).unwrap();
    assert_eq!(cache.generation(&key()), None);
    assert_eq!(cache.next_generation(&key()), 1);

    cache.insert(&key(), dps(&[3.0, 4.0]), false).unwrap();
    assert_eq!(cache.generation(&key()), Some(1));
    assert_eq!(
        cache.queue().pending(),
        vec![BatchRef::new(key(), 0, 2).in_generation(1)]
    );

    // a reference of the deleted incarnation no longer matches anything
    let stale = BatchRef::new(key(), 0, 2);
    assert!(cache.read_batch(&stale).unwrap().is_none());
    assert!(cache.trim_batch(&stale).unwrap().is_none());
    assert_eq!(cache.hot_floor(&key()), 0);
    assert_eq!(cache.while_current(&stale, || Ok(())).unwrap(), None);
    assert_eq!(
        cache.while_current(&stale.clone().in_generation(1), || Ok(7)).unwrap(),
        Some(7)
    );
}

#[test]
fn test_size_accounting() {
    let cache = memory_cache(250);
    let points = dps(&[1.0, 2.0]);
    let expected: u64 = points.iter().map(|dp| encoded_size(dp).unwrap()).sum();
    let other = StreamKey::primary("dev1", "gps");

    cache.insert(&key(), points.clone(), false).unwrap();
    cache.insert(&other, points, false).unwrap();

    assert_eq!(cache.stream_size(&key()), expected);
    assert_eq!(cache.owner_size("dev1"), expected * 2);

    cache.delete(&Scope::Substream(key())).unwrap();
    assert_eq!(cache.stream_size(&key()), 0);
    assert_eq!(cache.owner_size("dev1"), expected);
}

#[test]
fn test_owner_limit() {
    let one = encoded_size(&dps(&[1.0])[0]).unwrap();
    let config = Config::builder()
        .hot_durability(false)
        .max_owner_bytes(one * 3)
        .build();
    let cache = HotCache::open(&config).unwrap();
    let other = StreamKey::primary("dev1", "gps");

    cache.insert(&key(), dps(&[1.0, 2.0]), false).unwrap();
    let result = cache.insert(&other, dps(&[1.0, 2.0]), false);

    assert!(matches!(result, Err(TierError::SizeLimit(_))));
    assert!(!cache.contains(&other));
    assert_eq!(cache.owner_size("dev1"), one * 2);
}

#[test]
fn test_stream_limit() {
    let one = encoded_size(&dps(&[1.0])[0]).unwrap();
    let config = Config::builder()
        .hot_durability(false)
        .max_stream_bytes(one * 2)
        .build();
    let cache = HotCache::open(&config).unwrap();

    cache.insert(&key(), dps(&[1.0, 2.0]), false).unwrap();
    let result = cache.insert(&key(), dps(&[3.0]), false);

    assert!(matches!(result, Err(TierError::SizeLimit(_))));
    assert_eq!(cache.length(&key()), 2);
    assert_eq!(cache.owner_size("dev1"), one * 2);
}

// =============================================================================
// Batch Queue Tests
// =============================================================================

#[test]
fn test_one_reference_in_flight_per_stream() {
    let cache = memory_cache(1);
    let other = StreamKey::primary("dev2", "temp");
    cache.insert(&key(), dps(&[1.0, 2.0]), false).unwrap();
    cache.insert(&other, dps(&[1.0]), false).unwrap();

    let first = cache.dequeue(Some(Duration::from_millis(10))).unwrap();
    assert_eq!(first, BatchRef::new(key(), 0, 1));

    // the second batch of the same stream waits for the first
    let second = cache.dequeue(Some(Duration::from_millis(10))).unwrap();
    assert_eq!(second.key, other);
    assert!(cache.dequeue(Some(Duration::from_millis(10))).is_none());

    assert!(cache.ack(&first).unwrap());
    assert!(!cache.ack(&first).unwrap());
    assert_eq!(
        cache.dequeue(Some(Duration::from_millis(10))).unwrap(),
        BatchRef::new(key(), 1, 2)
    );
}

#[test]
fn test_stale_lease_requeued() {
    let cache = memory_cache(1);
    cache.insert(&key(), dps(&[1.0]), false).unwrap();
    let reference = cache.dequeue(Some(Duration::from_millis(10))).unwrap();
    assert_eq!(cache.queue().processing_len(), 1);

    assert_eq!(cache.requeue_stale(Duration::from_secs(60)), 0);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(cache.requeue_stale(Duration::from_millis(5)), 1);

    assert_eq!(cache.queue().processing_len(), 0);
    assert_eq!(cache.queue().pending(), vec![reference.clone()]);
    assert!(!cache.heartbeat(&reference));
}

#[test]
fn test_shutdown_unblocks_dequeue() {
    let cache = Arc::new(memory_cache(250));
    let waiter = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.dequeue(None))
    };

    thread::sleep(Duration::from_millis(50));
    cache.shutdown();

    assert!(waiter.join().unwrap().is_none());
    assert!(cache.queue().is_shut_down());
}

#[test]
fn test_dequeue_wakes_on_insert() {
    let cache = Arc::new(memory_cache(1));
    let waiter = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.dequeue(Some(Duration::from_secs(5))))
    };

    thread::sleep(Duration::from_millis(50));
    cache.insert(&key(), dps(&[1.0]), false).unwrap();

    assert_eq!(waiter.join().unwrap(), Some(BatchRef::new(key(), 0, 1)));
}

// =============================================================================
// Durability Tests
// =============================================================================

#[test]
fn test_reopen_replays_wal() {
    let temp = TempDir::new().unwrap();
    let config = durable_config(&temp, 2);
    {
        let cache = HotCache::open(&config).unwrap();
        cache
            .insert(&key(), dps(&[1.0, 2.0, 3.0, 4.0, 5.0]), false)
            .unwrap();
        let first = cache.dequeue(Some(Duration::from_millis(10))).unwrap();
        cache.trim(&key(), first.end).unwrap();
        cache.ack(&first).unwrap();
    }

    let cache = HotCache::open(&config).unwrap();

    assert_eq!(cache.length(&key()), 5);
    assert_eq!(cache.hot_floor(&key()), 2);
    assert_eq!(timestamps(&hot_data(&cache, &key(), 2, 0)), vec![3.0, 4.0, 5.0]);
    assert_eq!(cache.queue().pending(), vec![BatchRef::new(key(), 2, 4)]);
    assert_eq!(cache.queue().processing_len(), 0);
}

#[test]
fn test_reopen_requeues_in_flight_first() {
    let temp = TempDir::new().unwrap();
    let config = durable_config(&temp, 1);
    let other = StreamKey::primary("dev2", "temp");
    {
        let cache = HotCache::open(&config).unwrap();
        cache.insert(&other, dps(&[1.0, 2.0]), false).unwrap();
        cache.insert(&key(), dps(&[1.0]), false).unwrap();

        // both streams get a reference in flight; other:1:2 stays pending
        assert_eq!(cache.dequeue(Some(Duration::from_millis(10))).unwrap().key, other);
        assert_eq!(cache.dequeue(Some(Duration::from_millis(10))).unwrap().key, key());
        cache.checkpoint().unwrap();
    }

    let cache = HotCache::open(&config).unwrap();
    assert_eq!(
        cache.queue().pending(),
        vec![
            BatchRef::new(key(), 0, 1),
            BatchRef::new(other.clone(), 0, 1),
            BatchRef::new(other, 1, 2),
        ]
    );
    assert_eq!(cache.queue().processing_len(), 0);
}

#[test]
fn test_reopen_after_delete() {
    let temp = TempDir::new().unwrap();
    let config = durable_config(&temp, 2);
    {
        let cache = HotCache::open(&config).unwrap();
        cache.insert(&key(), dps(&[1.0, 2.0, 3.0]), false).unwrap();
        cache.insert(&StreamKey::primary("dev1", "gps"), dps(&[1.0]), false).unwrap();
        cache.delete(&Scope::Substream(key())).unwrap();
    }

    let cache = HotCache::open(&config).unwrap();

    assert!(!cache.contains(&key()));
    assert_eq!(cache.keys(None), vec![StreamKey::primary("dev1", "gps")]);
    assert_eq!(cache.queue().pending_len(), 0);
    assert_eq!(
        cache.owner_size("dev1"),
        cache.stream_size(&StreamKey::primary("dev1", "gps"))
    );
}

#[test]
fn test_generations_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let config = durable_config(&temp, 2);
    {
        let cache = HotCache::open(&config).unwrap();
        cache.insert(&key(), dps(&[1.0]), false).unwrap();
        cache.delete(&Scope::Substream(key())).unwrap();
    }

    // replayed from the WAL
    {
        let cache = HotCache::open(&config).unwrap();
        assert_eq!(cache.next_generation(&key()), 1);
        cache.insert(&key(), dps(&[5.0, 6.0]), false).unwrap();
        assert_eq!(cache.generation(&key()), Some(1));
        cache.checkpoint().unwrap();
    }

    // loaded from the snapshot
    {
        let cache = HotCache::open(&config).unwrap();
        assert_eq!(cache.generation(&key()), Some(1));
        assert_eq!(
            cache.queue().pending(),
            vec![BatchRef::new(key(), 0, 2).in_generation(1)]
        );
        cache.delete(&Scope::Substream(key())).unwrap();
        cache.checkpoint().unwrap();
    }

    let cache = HotCache::open(&config).unwrap();
    assert!(!cache.contains(&key()));
    assert_eq!(cache.next_generation(&key()), 2);
}

#[test]
fn test_checkpoint_truncates_wal_and_reopens() {
    let temp = TempDir::new().unwrap();
    let config = durable_config(&temp, 3);
    {
        let cache = HotCache::open(&config).unwrap();
        cache.insert(&key(), dps(&[1.0, 2.0]), false).unwrap();
        assert!(cache.wal_size() > 0);

        cache.checkpoint().unwrap();
        assert_eq!(cache.wal_size(), 0);
        assert!(temp.path().join("hot.snapshot").exists());

        cache.insert(&key(), dps(&[3.0, 4.0]), false).unwrap();
    }

    let cache = HotCache::open(&config).unwrap();

    assert_eq!(timestamps(&hot_data(&cache, &key(), 0, 0)), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(cache.queue().pending(), vec![BatchRef::new(key(), 0, 3)]);

    // numbering continues so new entries are not skipped on the next reopen
    cache.insert(&key(), dps(&[5.0]), false).unwrap();
    drop(cache);
    assert_eq!(HotCache::open(&config).unwrap().length(&key()), 5);
}

#[test]
fn test_automatic_checkpoint() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .wal_checkpoint_bytes(1)
        .build();
    {
        let cache = HotCache::open(&config).unwrap();
        for t in 1..=5 {
            cache.insert(&key(), dps(&[t as f64]), false).unwrap();
        }
        assert_eq!(cache.wal_size(), 0);
    }

    assert_eq!(HotCache::open(&config).unwrap().length(&key()), 5);
}

#[test]
fn test_torn_wal_tail_is_ignored() {
    use std::fs::OpenOptions;
    use std::io::Write;

    let temp = TempDir::new().unwrap();
    let config = durable_config(&temp, 250);
    {
        let cache = HotCache::open(&config).unwrap();
        cache.insert(&key(), dps(&[1.0, 2.0]), false).unwrap();
    }
    let mut wal = OpenOptions::new()
        .append(true)
        .open(temp.path().join("hot.wal"))
        .unwrap();
    wal.write_all(&[0x01, 0x02, 0x03]).unwrap();
    drop(wal);

    let cache = HotCache::open(&config).unwrap();
    assert_eq!(cache.length(&key()), 2);
    cache.insert(&key(), dps(&[3.0]), false).unwrap();
    drop(cache);

    assert_eq!(HotCache::open(&config).unwrap().length(&key()), 3);
}

#[test]
fn test_memory_mode_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path().join("unused"))
        .hot_durability(false)
        .build();
    let cache = HotCache::open(&config).unwrap();
    cache.insert(&key(), dps(&[1.0]), false).unwrap();
    cache.checkpoint().unwrap();

    assert!(!cache.is_durable());
    assert!(!temp.path().join("unused").exists());
}
