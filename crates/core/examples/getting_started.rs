use geo::polygon;
use geo::Polygon;
use proxima::{
    Config, EntityRecord, MemoryStore, MutationEvent, ProximityBuilder, SearchRequest,
};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug to see detailed logs)
    env_logger::init();

    println!("=== Proxima - Getting Started ===\n");

    // The system of record; in production this is the database behind the
    // index. Here it lives in memory.
    let store = Arc::new(MemoryStore::with_records([
        EntityRecord::new("blue-bottle", 37.7764, -122.4172, "cafe", 1),
        EntityRecord::new("sightglass", 37.7751, -122.4087, "cafe", 1),
        EntityRecord::new("tartine", 37.7614, -122.4241, "bakery", 1),
        EntityRecord::new("point-reyes", 37.9000, -122.9000, "park", 1),
        EntityRecord::new("fiji-east", -16.80, 179.95, "harbour", 1),
        EntityRecord::new("fiji-west", -16.80, -179.97, "harbour", 1),
    ]));

    // === START-UP ===
    println!("1. Start-up");
    println!("-----------");

    let service = ProximityBuilder::new()
        .config(Config::default().with_cache_ttl(Duration::from_secs(30)))
        .backing_store(store.clone())
        .build()?;
    println!("   Loaded {} entities\n", service.index().len());

    // === CIRCLE SEARCH ===
    println!("2. Circle Search");
    println!("----------------");

    let request = SearchRequest::new(37.7749, -122.4194, 2_000.0);
    let response = service.search(&request)?;
    println!("   Within 2 km of Civic Center:");
    for hit in &response.results {
        println!("     - {:<12} {:>7.1} m", hit.id, hit.distance_m);
    }

    let again = service.search(&request)?;
    println!("   Second lookup served from cache: {}", again.cache_hit);

    let cafes = service.search(&request.clone().category("cafe").limit(1))?;
    println!(
        "   Nearest cafe: {} (more: {})\n",
        cafes.results[0].id, cafes.has_more
    );

    // === ANTIMERIDIAN ===
    println!("3. Across the Antimeridian");
    println!("--------------------------");

    let fiji = service.search(&SearchRequest::new(-16.80, 179.99, 10_000.0))?;
    for hit in &fiji.results {
        println!("     - {:<12} {:>7.1} m", hit.id, hit.distance_m);
    }
    println!();

    // === CHANGE FEED ===
    println!("4. Change Feed");
    println!("--------------");

    let (tx, rx) = crossbeam_channel::unbounded();
    let sync = service.start_sync(rx)?;
    tx.send(MutationEvent::updated(&EntityRecord::new(
        "sightglass", 37.7700, -122.4100, "cafe", 2,
    )))?;
    tx.send(MutationEvent::deleted("tartine", 2))?;
    // Redelivered out of order; ignored by version.
    tx.send(MutationEvent::created(&EntityRecord::new(
        "sightglass", 37.7751, -122.4087, "cafe", 1,
    )))?;
    drop(tx);
    sync.join()?;
    println!("   {:?}\n", service.synchronizer().stats());

    // === POLYGON SEARCH ===
    println!("5. Polygon Search");
    println!("-----------------");

    let mission: Polygon<f64> = geo::polygon![
        (x: -122.43, y: 37.75),
        (x: -122.40, y: 37.75),
        (x: -122.40, y: 37.78),
        (x: -122.43, y: 37.78),
    ];
    let inside = service.search_polygon(&mission, None, None, 0)?;
    println!("   {} entities inside the polygon\n", inside.results.len());

    // === REBUILD AND SHUTDOWN ===
    println!("6. Rebuild and Shutdown");
    println!("-----------------------");

    // The store catches up with the feed and gains a new cafe.
    store.put(EntityRecord::new("sightglass", 37.7700, -122.4100, "cafe", 2));
    store.delete(&"tartine".into());
    store.put(EntityRecord::new("ritual", 37.7564, -122.4212, "cafe", 1));
    let total = service.rebuild()?;
    println!("   Rebuilt from store: {} entities", total);

    let stats = service.stats();
    println!("   Cache hit rate: {:.1}%", stats.cache.hit_rate() * 100.0);
    println!("   {}", serde_json::to_string(&stats)?);

    service.shutdown();
    match service.search(&request) {
        Err(e) if e.is_retryable() => println!("   After shutdown: {}", e),
        other => println!("   Unexpected: {:?}", other),
    }

    println!("\n=== Done ===");
    Ok(())
}
