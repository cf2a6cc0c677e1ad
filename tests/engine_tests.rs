//! Tests for StreamDb
//!
//! These tests verify:
//! - The end-to-end path: insert, promote, read across tiers
//! - Index and time range semantics through the public API
//! - Deletes reaching both tiers
//! - Crash recovery of a data directory
//! - Concurrent writers and readers with the pipeline running

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tierstream::cold::{ColdStore, FileColdStore};
use tierstream::config::{Compression, WalSyncStrategy};
use tierstream::range::MergeRange;
use tierstream::{Config, DataRange, Datapoint, StreamDb, StreamKey, TierError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db(batch_size: u64) -> (TempDir, StreamDb) {
    let temp_dir = TempDir::new().unwrap();
    let db = StreamDb::open(durable_config(&temp_dir, batch_size)).unwrap();
    (temp_dir, db)
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

fn letters() -> Vec<Datapoint> {
    ["a", "b", "c", "d", "e"]
        .iter()
        .enumerate()
        .map(|(i, s)| Datapoint::new(i as f64 + 1.0, *s))
        .collect()
}

/// Datapoints with timestamps `from + 1 ..= to`
fn series(from: usize, to: usize) -> Vec<Datapoint> {
    (from..to)
        .map(|i| Datapoint::new(i as f64 + 1.0, i as i64))
        .collect()
}

fn collect(range: Box<dyn DataRange>) -> Vec<Datapoint> {
    range.map(|r| r.unwrap()).collect()
}

fn payloads(points: &[Datapoint]) -> Vec<String> {
    points
        .iter()
        .map(|dp| dp.payload.as_str().unwrap_or_default().to_string())
        .collect()
}

fn timestamps(points: &[Datapoint]) -> Vec<f64> {
    points.iter().map(|dp| dp.timestamp).collect()
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_open_creates_layout() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let db = StreamDb::open(Config::builder().data_dir(&data_dir).build()).unwrap();

    assert!(data_dir.join("hot.wal").exists());
    assert!(data_dir.join("cold").is_dir());
    assert_eq!(db.data_dir(), data_dir.as_path());
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .batch_size(0)
        .build();

    assert!(matches!(StreamDb::open(config), Err(TierError::Config(_))));
}

#[test]
fn test_open_path_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let db = StreamDb::open_path(temp_dir.path()).unwrap();

    assert_eq!(db.config().batch_size, 250);
    assert!(db.hot().is_durable());
}

// =============================================================================
// End-to-End Scenario
// =============================================================================

#[test]
fn test_batch_size_two_five_points() {
    let (_temp, db) = setup_temp_db(2);

    assert_eq!(db.insert(&key(), letters(), false).unwrap(), 5);
    assert_eq!(db.length_of(&key()).unwrap(), 5);
    assert_eq!(db.hot().queue().pending_len(), 2);

    assert_eq!(db.promoter().drain().unwrap(), 2);

    // [0, 4) now lives in the cold tier, [4, 5) in the hot tier
    assert_eq!(db.cold().end_index(&key()), 4);
    assert_eq!(db.hot().hot_floor(&key()), 4);

    let all = collect(db.get_index_range(&key(), 0, 5).unwrap());
    assert_eq!(payloads(&all), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(all, letters());
}

#[test]
fn test_rejected_out_of_order_insert() {
    let (_temp, db) = setup_temp_db(250);
    db.insert(&key(), vec![Datapoint::new(10.0, "z")], false).unwrap();

    let result = db.insert(&key(), vec![Datapoint::new(5.0, "x")], false);

    assert!(matches!(result, Err(TierError::TimestampOrder)));
    assert_eq!(db.length_of(&key()).unwrap(), 1);
}

#[test]
fn test_restamp_through_db() {
    let (_temp, db) = setup_temp_db(250);
    db.insert(&key(), vec![Datapoint::new(10.5, "z")], false).unwrap();

    db.insert(&key(), vec![Datapoint::new(5.0, "x"), Datapoint::new(6.0, "y")], true)
        .unwrap();

    let all = collect(db.get_index_range(&key(), 0, 0).unwrap());
    assert_eq!(timestamps(&all), vec![10.5, 10.5, 10.5]);
    assert_eq!(payloads(&all), vec!["z", "x", "y"]);
}

// =============================================================================
// Index Range Tests
// =============================================================================

#[test]
fn test_index_range_slice_semantics() {
    let (_temp, db) = setup_temp_db(2);
    db.insert(&key(), letters(), false).unwrap();
    db.promoter().drain().unwrap();

    assert_eq!(payloads(&collect(db.get_index_range(&key(), -1, 0).unwrap())), vec!["e"]);
    assert_eq!(collect(db.get_index_range(&key(), 0, 0).unwrap()).len(), 5);
    assert_eq!(
        payloads(&collect(db.get_index_range(&key(), -3, -1).unwrap())),
        vec!["c", "d"]
    );
    assert_eq!(
        payloads(&collect(db.get_index_range(&key(), 1, 3).unwrap())),
        vec!["b", "c"]
    );
    assert!(matches!(
        db.get_index_range(&key(), 3, 1),
        Err(TierError::InvalidRange(_))
    ));
}

#[test]
fn test_index_range_tracks_position() {
    let (_temp, db) = setup_temp_db(2);
    db.insert(&key(), letters(), false).unwrap();
    db.promoter().drain().unwrap();

    let mut range = db.get_index_range(&key(), 1, 0).unwrap();
    assert_eq!(range.index(), 1);
    range.next().unwrap().unwrap();
    range.next().unwrap().unwrap();
    assert_eq!(range.index(), 3);

    range.close();
    range.close();
    assert!(range.next().is_none());
}

#[test]
fn test_index_range_unknown_stream() {
    let (_temp, db) = setup_temp_db(2);
    let missing = StreamKey::primary("nobody", "nothing");

    assert_eq!(db.length_of(&missing).unwrap(), 0);
    assert!(collect(db.get_index_range(&missing, 0, 0).unwrap()).is_empty());
    assert!(matches!(
        db.get_index_range(&missing, 1, 0),
        Err(TierError::InvalidRange(_))
    ));
}

#[test]
fn test_range_started_before_promotion_stays_correct() {
    let (_temp, db) = setup_temp_db(2);
    db.insert(&key(), letters(), false).unwrap();

    // opened while everything is hot, read after promotion trimmed it
    let mut range = db.get_index_range(&key(), 0, 0).unwrap();
    let first = range.next().unwrap().unwrap();
    db.promoter().drain().unwrap();

    let mut all = vec![first];
    all.extend(range.map(|r| r.unwrap()));
    assert_eq!(all, letters());
}

// =============================================================================
// Time Range Tests
// =============================================================================

#[test]
fn test_time_to_index_across_tiers() {
    let (_temp, db) = setup_temp_db(10);
    db.insert(&key(), series(0, 35), false).unwrap();
    db.promoter().drain().unwrap();
    assert_eq!(db.hot().hot_floor(&key()), 30);

    assert_eq!(db.time_to_index(&key(), 0.0).unwrap(), 0);
    assert_eq!(db.time_to_index(&key(), 12.5).unwrap(), 12);
    assert_eq!(db.time_to_index(&key(), 30.0).unwrap(), 30);
    assert_eq!(db.time_to_index(&key(), 33.0).unwrap(), 33);
    assert_eq!(db.time_to_index(&key(), 99.0).unwrap(), 35);
    assert_eq!(
        db.time_to_index(&StreamKey::primary("x", "y"), 5.0).unwrap(),
        0
    );
}

#[test]
fn test_time_range_is_open_closed() {
    let (_temp, db) = setup_temp_db(10);
    db.insert(&key(), series(0, 35), false).unwrap();
    db.promoter().drain().unwrap();

    let points = collect(db.get_time_range(&key(), 8.0, 12.0, 0).unwrap());
    assert_eq!(timestamps(&points), vec![9.0, 10.0, 11.0, 12.0]);

    // crosses the cold/hot boundary at index 30
    let points = collect(db.get_time_range(&key(), 28.0, 32.0, 0).unwrap());
    assert_eq!(timestamps(&points), vec![29.0, 30.0, 31.0, 32.0]);
}

#[test]
fn test_time_range_unbounded_and_limited() {
    let (_temp, db) = setup_temp_db(10);
    db.insert(&key(), series(0, 35), false).unwrap();
    db.promoter().drain().unwrap();

    assert_eq!(collect(db.get_time_range(&key(), 30.0, 0.0, 0).unwrap()).len(), 5);

    let limited = collect(db.get_time_range(&key(), 0.0, 0.0, 3).unwrap());
    assert_eq!(timestamps(&limited), vec![1.0, 2.0, 3.0]);

    assert!(collect(db.get_time_range(&key(), 50.0, 0.0, 0).unwrap()).is_empty());
}

#[test]
fn test_merge_time_ranges_of_two_substreams() {
    let (_temp, db) = setup_temp_db(250);
    let uplink = StreamKey::primary("dev1", "chat");
    let downlink = StreamKey::downlink("dev1", "chat");
    db.insert(&uplink, vec![Datapoint::new(1.0, "u1"), Datapoint::new(3.0, "u3")], false)
        .unwrap();
    db.insert(
        &downlink,
        vec![Datapoint::new(2.0, "d2").with_origin("server")],
        false,
    )
    .unwrap();

    let merged = MergeRange::new(vec![
        db.get_time_range(&uplink, 0.0, 0.0, 0).unwrap(),
        db.get_time_range(&downlink, 0.0, 0.0, 0).unwrap(),
    ]);
    let points: Vec<Datapoint> = merged.map(|r| r.unwrap()).collect();

    assert_eq!(payloads(&points), vec!["u1", "d2", "u3"]);
    assert_eq!(points[1].origin.as_deref(), Some("server"));
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_reaches_both_tiers() {
    let (_temp, db) = setup_temp_db(2);
    let downlink = StreamKey::downlink("dev1", "temp");
    let other = StreamKey::primary("dev1", "gps");
    for k in [&key(), &downlink, &other] {
        db.insert(k, letters(), false).unwrap();
    }
    db.promoter().drain().unwrap();
    assert_eq!(db.cold().batch_count(), 6);

    db.delete_stream("dev1", "temp").unwrap();

    assert_eq!(db.length_of(&key()).unwrap(), 0);
    assert_eq!(db.length_of(&downlink).unwrap(), 0);
    assert_eq!(db.cold().batch_count(), 2);
    assert_eq!(collect(db.get_index_range(&other, 0, 0).unwrap()), letters());

    db.delete_owner("dev1").unwrap();
    assert_eq!(db.cold().batch_count(), 0);
    assert!(db.streams().is_empty());
    assert_eq!(db.owner_size("dev1"), 0);
}

#[test]
fn test_recreated_stream_does_not_see_old_batches() {
    let (_temp, db) = setup_temp_db(2);
    db.insert(&key(), letters(), false).unwrap();
    db.promoter().drain().unwrap();

    db.delete_substream(&key()).unwrap();
    db.insert(&key(), vec![Datapoint::new(1.0, "new")], false).unwrap();

    let all = collect(db.get_index_range(&key(), 0, 0).unwrap());
    assert_eq!(payloads(&all), vec!["new"]);
}

#[test]
fn test_volatile_hot_over_existing_archive() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .hot_durability(false)
        .batch_size(2)
        .build();
    let open_cold = || -> Arc<dyn ColdStore> {
        Arc::new(FileColdStore::open(&temp.path().join("cold"), Compression::Zstd { level: 3 }).unwrap())
    };
    {
        let db = StreamDb::with_cold_store(config.clone(), open_cold()).unwrap();
        db.insert(&key(), letters(), false).unwrap();
        db.promoter().drain().unwrap();
        assert_eq!(db.cold().batch_count(), 2);
    }

    // the hot tier starts empty; the key comes back one generation past the archive
    let db = StreamDb::with_cold_store(config, open_cold()).unwrap();
    assert_eq!(db.hot().next_generation(&key()), 1);
    db.insert(&key(), vec![Datapoint::new(1.0, "new"), Datapoint::new(2.0, "newer")], false).unwrap();
    assert_eq!(db.promoter().drain().unwrap(), 1);

    assert_eq!(db.cold().batch_count(), 1);
    let all = collect(db.get_index_range(&key(), 0, 0).unwrap());
    assert_eq!(payloads(&all), vec!["new", "newer"]);
}

#[test]
fn test_size_queries() {
    let (_temp, db) = setup_temp_db(2);
    db.insert(&key(), letters(), false).unwrap();
    let size = db.stream_size(&key());
    assert!(size > 0);

    // promotion moves data between tiers without changing accounted size
    db.promoter().drain().unwrap();
    assert_eq!(db.stream_size(&key()), size);
    assert_eq!(db.owner_size("dev1"), size);
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_reopen_without_close() {
    let temp_dir = TempDir::new().unwrap();
    let config = durable_config(&temp_dir, 2);
    {
        let db = StreamDb::open(config.clone()).unwrap();
        db.insert(&key(), letters(), false).unwrap();
        db.promoter().promote_one(&db.hot().dequeue(Some(Duration::from_millis(10))).unwrap())
            .unwrap();
        // dropped without close
    }

    let db = StreamDb::open(config).unwrap();

    assert_eq!(db.length_of(&key()).unwrap(), 5);
    assert_eq!(db.hot().hot_floor(&key()), 2);
    assert_eq!(db.hot().queue().pending_len(), 1);
    assert_eq!(collect(db.get_index_range(&key(), 0, 0).unwrap()), letters());

    db.promoter().drain().unwrap();
    assert_eq!(db.cold().batch_count(), 2);
    assert_eq!(collect(db.get_index_range(&key(), 0, 0).unwrap()), letters());
}

#[test]
fn test_close_then_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = durable_config(&temp_dir, 250);
    {
        let db = StreamDb::open(config.clone()).unwrap();
        db.insert(&key(), letters(), false).unwrap();
        db.close().unwrap();
    }

    let db = StreamDb::open(config).unwrap();
    assert_eq!(db.hot().wal_size(), 0);
    assert_eq!(collect(db.get_index_range(&key(), 0, 0).unwrap()), letters());
}

#[test]
fn test_in_memory_db() {
    let db = StreamDb::in_memory(Config::builder().batch_size(2).build()).unwrap();
    db.insert(&key(), letters(), false).unwrap();
    db.promoter().drain().unwrap();

    assert!(!db.hot().is_durable());
    assert_eq!(collect(db.get_index_range(&key(), 0, 0).unwrap()), letters());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_readers_and_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .batch_size(16)
        .pipeline_workers(2)
        .build();
    let db = Arc::new(StreamDb::open(config).unwrap());
    let mut pipeline = db.start_pipeline().unwrap();

    let mut writers = vec![];
    for w in 0..4 {
        let db = Arc::clone(&db);
        writers.push(thread::spawn(move || {
            let key = StreamKey::primary("dev1", format!("s{}", w));
            for chunk in 0..20 {
                db.insert(&key, series(chunk * 10, chunk * 10 + 10), false)
                    .unwrap();
            }
        }));
    }

    let reader = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            let key = StreamKey::primary("dev1", "s0");
            for _ in 0..50 {
                let points = collect(db.get_index_range(&key, 0, 0).unwrap());
                // whatever the reader sees is a gap-free prefix
                for (i, dp) in points.iter().enumerate() {
                    assert_eq!(dp.timestamp, i as f64 + 1.0);
                }
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while db.cold().batch_count() < 4 * 12 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    pipeline.shutdown();

    assert_eq!(db.cold().batch_count(), 4 * 12);
    for w in 0..4 {
        let key = StreamKey::primary("dev1", format!("s{}", w));
        assert_eq!(collect(db.get_index_range(&key, 0, 0).unwrap()), series(0, 200));
        assert_eq!(db.hot().hot_floor(&key), 192);
    }
}
