use proxima::prelude::*;
use proxima::{ApplyOutcome, IndexSynchronizer, SpatialIndex};
use std::sync::{Arc, mpsc};
use std::thread;

fn location(id: usize, version: u64) -> EntityRecord {
    EntityRecord::new(
        format!("courier-{id}"),
        -23.55 + id as f64 * 0.001,
        -46.63 + version as f64 * 0.001,
        "courier",
        version,
    )
}

/// Deterministic shuffle so every run sees the same interleaving.
fn scramble<T>(items: &mut [T], seed: u64) {
    let mut state = seed;
    for i in (1..items.len()).rev() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let j = (state >> 33) as usize % (i + 1);
        items.swap(i, j);
    }
}

#[test]
fn test_out_of_order_feed_converges() {
    let index = Arc::new(SpatialIndex::new(&Config::default()));
    let sync = IndexSynchronizer::new(Arc::clone(&index), 1);

    let mut events = Vec::new();
    for id in 0..25 {
        events.push(MutationEvent::created(&location(id, 1)));
        for version in 2..=5 {
            events.push(MutationEvent::updated(&location(id, version)));
        }
        // Duplicate delivery.
        events.push(MutationEvent::updated(&location(id, 3)));
    }
    for id in 20..25 {
        events.push(MutationEvent::deleted(format!("courier-{id}"), 6));
    }
    scramble(&mut events, 7);

    let stats = sync.apply_batch(events.clone());
    assert_eq!(stats.total(), events.len() as u64);
    assert_eq!(stats.rejected, 0);

    assert_eq!(index.len(), 20);
    for id in 0..20 {
        let record = index.get(&EntityId::new(format!("courier-{id}"))).unwrap();
        assert_eq!(record, location(id, 5));
    }
    for id in 20..25 {
        assert!(!index.contains(&EntityId::new(format!("courier-{id}"))));
    }

    // Replaying the whole feed changes nothing.
    let replay = sync.apply_batch(events);
    assert_eq!(replay.applied, 0);
    assert_eq!(index.len(), 20);
}

#[test]
fn test_background_workers_apply_feed() {
    let service = ProximityBuilder::new()
        .config(Config::default().with_sync_workers(4))
        .build()
        .unwrap();
    let (tx, rx) = crossbeam_channel::bounded(64);
    let handle = service.start_sync(rx).unwrap();

    for version in 1..=10 {
        for id in 0..50 {
            tx.send(MutationEvent::updated(&location(id, version))).unwrap();
        }
    }
    for id in 0..10 {
        tx.send(MutationEvent::deleted(format!("courier-{id}"), 11))
            .unwrap();
    }
    drop(tx);
    handle.join().unwrap();

    let index = service.index();
    assert_eq!(index.len(), 40);
    for id in 10..50 {
        assert_eq!(
            index.get(&EntityId::new(format!("courier-{id}"))).unwrap().version,
            10
        );
    }
    let stats = service.synchronizer().stats();
    assert_eq!(stats.applied, 510);
    assert_eq!(stats.rejected, 0);
}

#[test]
fn test_json_feed_lines() {
    let index = Arc::new(SpatialIndex::new(&Config::default()));
    let sync = IndexSynchronizer::new(Arc::clone(&index), 2);
    let feed = [
        r#"{"event_type":"created","entity_id":"kiosk","latitude":-33.87,"longitude":151.21,"category":"news","version":1}"#,
        r#"{"event_type":"updated","entity_id":"kiosk","latitude":-33.86,"longitude":151.20,"version":2}"#,
        r#"{"event_type":"deleted","entity_id":"ghost","version":1}"#,
        r#"{"event_type":"updated","entity_id":"kiosk""#,
    ];
    let outcomes: Vec<ApplyOutcome> = feed.iter().map(|line| sync.apply_json_line(line)).collect();
    assert_eq!(
        outcomes,
        [
            ApplyOutcome::Applied,
            ApplyOutcome::Applied,
            ApplyOutcome::NotFound,
            ApplyOutcome::Rejected,
        ]
    );
    // An update without a category keeps the one already indexed.
    let kiosk = index.get(&EntityId::new("kiosk")).unwrap();
    assert_eq!(kiosk.category, "news");
    assert_eq!(kiosk.latitude, -33.86);
}

/// A store whose full scan blocks until the test lets it finish.
struct GatedStore {
    records: Vec<EntityRecord>,
    started: mpsc::SyncSender<()>,
    release: std::sync::Mutex<mpsc::Receiver<()>>,
}

impl BackingStore for GatedStore {
    fn fetch_entities_by_region(&self, _bbox: &BoundingBox) -> Result<Vec<EntityRecord>> {
        let _ = self.started.try_send(());
        if let Ok(release) = self.release.lock() {
            let _ = release.recv();
        }
        Ok(self.records.clone())
    }
}

#[test]
fn test_events_during_rebuild_are_not_lost() {
    let (started_tx, started_rx) = mpsc::sync_channel(4);
    let (release_tx, release_rx) = mpsc::channel();
    // The scan lags behind the feed: it still has version 1 of "moved" and
    // still lists "gone".
    let store = Arc::new(GatedStore {
        records: vec![
            EntityRecord::new("moved", 10.0, 10.0, "", 1),
            EntityRecord::new("gone", 11.0, 11.0, "", 1),
            EntityRecord::new("steady", 12.0, 12.0, "", 1),
        ],
        started: started_tx,
        release: std::sync::Mutex::new(release_rx),
    });
    release_tx.send(()).unwrap();
    let service = Arc::new(
        ProximityBuilder::new()
            .backing_store(store.clone())
            .build()
            .unwrap(),
    );
    started_rx.recv().unwrap();
    assert_eq!(service.index().len(), 3);

    let rebuild = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.rebuild())
    };
    started_rx.recv().unwrap();

    let sync = service.synchronizer();
    assert_eq!(
        sync.apply(&MutationEvent::updated(&EntityRecord::new(
            "moved", 20.0, 20.0, "", 2
        ))),
        ApplyOutcome::Applied
    );
    assert_eq!(sync.apply(&MutationEvent::deleted("gone", 2)), ApplyOutcome::Applied);
    assert_eq!(
        sync.apply(&MutationEvent::created(&EntityRecord::new(
            "fresh", 13.0, 13.0, "", 1
        ))),
        ApplyOutcome::Applied
    );
    // Readers are not blocked while the scan runs.
    assert!(service.search(&SearchRequest::new(20.0, 20.0, 1_000.0)).is_ok());

    release_tx.send(()).unwrap();
    assert_eq!(rebuild.join().unwrap().unwrap(), 3);

    let index = service.index();
    assert_eq!(index.get(&EntityId::new("moved")).unwrap().version, 2);
    assert!(index.get(&EntityId::new("gone")).is_none());
    assert!(index.contains(&EntityId::new("fresh")));
    assert!(index.contains(&EntityId::new("steady")));
}
