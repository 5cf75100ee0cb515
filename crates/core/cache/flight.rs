//! Per-key single-flight registry.
//!
//! The first request to miss on a key becomes the leader and computes the
//! value; concurrent requests for the same key join its flight and wait for
//! the published result instead of repeating the work.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
enum FlightState<V> {
    Pending,
    Done(V),
    /// The leader went away without publishing a result.
    Abandoned,
}

/// One in-flight computation.
#[derive(Debug)]
pub struct Flight<V> {
    state: Mutex<FlightState<V>>,
    ready: Condvar,
}

/// What a follower observed while waiting on a flight.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<V> {
    Ready(V),
    Abandoned,
    TimedOut,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, state: FlightState<V>) {
        *self.state.lock() = state;
        self.ready.notify_all();
    }

    /// Blocks until the leader publishes, abandons, or `until` passes.
    pub fn wait(&self, until: Instant) -> WaitOutcome<V> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                FlightState::Done(value) => return WaitOutcome::Ready(value.clone()),
                FlightState::Abandoned => return WaitOutcome::Abandoned,
                FlightState::Pending => {}
            }
            if self.ready.wait_until(&mut state, until).timed_out() {
                return match &*state {
                    FlightState::Done(value) => WaitOutcome::Ready(value.clone()),
                    FlightState::Abandoned => WaitOutcome::Abandoned,
                    FlightState::Pending => WaitOutcome::TimedOut,
                };
            }
        }
    }
}

/// Outcome of [`SingleFlight::join`].
pub enum Join<'a, K: Eq + Hash + Clone, V: Clone> {
    /// This caller must compute the value and [`complete`](FlightGuard::complete) the flight.
    Leader(FlightGuard<'a, K, V>),
    /// Another caller is computing; wait on the flight.
    Follower(Arc<Flight<V>>),
}

/// Leadership of one flight. Dropping it without completing marks the flight
/// abandoned so followers stop waiting immediately.
pub struct FlightGuard<'a, K: Eq + Hash + Clone, V: Clone> {
    registry: &'a SingleFlight<K, V>,
    key: K,
    flight: Arc<Flight<V>>,
    done: bool,
}

impl<K: Eq + Hash + Clone, V: Clone> FlightGuard<'_, K, V> {
    /// Publishes `value` to every follower and retires the flight.
    pub fn complete(mut self, value: V) {
        self.done = true;
        self.flight.finish(FlightState::Done(value));
        self.registry.retire(&self.key, &self.flight);
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.done {
            self.flight.finish(FlightState::Abandoned);
            self.registry.retire(&self.key, &self.flight);
        }
    }
}

/// Registry of in-flight computations keyed like the cache.
#[derive(Debug)]
pub struct SingleFlight<K: Eq + Hash + Clone, V: Clone> {
    flights: DashMap<K, Arc<Flight<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }

    /// Becomes leader for `key`, or joins the flight already running.
    pub fn join(&self, key: &K) -> Join<'_, K, V> {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => Join::Follower(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let flight = Arc::new(Flight::new());
                entry.insert(Arc::clone(&flight));
                Join::Leader(FlightGuard {
                    registry: self,
                    key: key.clone(),
                    flight,
                    done: false,
                })
            }
        }
    }

    /// Number of flights currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    fn retire(&self, key: &K, flight: &Arc<Flight<V>>) {
        self.flights
            .remove_if(key, |_, current| Arc::ptr_eq(current, flight));
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn test_first_caller_leads() {
        let registry: SingleFlight<&str, u32> = SingleFlight::new();
        let leader = match registry.join(&"k") {
            Join::Leader(guard) => guard,
            Join::Follower(_) => panic!("expected leader"),
        };
        let follower = match registry.join(&"k") {
            Join::Follower(flight) => flight,
            Join::Leader(_) => panic!("expected follower"),
        };
        assert_eq!(registry.in_flight(), 1);

        leader.complete(7);
        assert_eq!(follower.wait(soon(10)), WaitOutcome::Ready(7));
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_dropped_leader_abandons() {
        let registry: SingleFlight<&str, u32> = SingleFlight::new();
        let leader = registry.join(&"k");
        let Join::Follower(flight) = registry.join(&"k") else {
            panic!("expected follower");
        };
        drop(leader);
        assert_eq!(flight.wait(soon(1_000)), WaitOutcome::Abandoned);
        assert!(matches!(registry.join(&"k"), Join::Leader(_)));
    }

    #[test]
    fn test_wait_times_out() {
        let registry: SingleFlight<&str, u32> = SingleFlight::new();
        let _leader = registry.join(&"k");
        let Join::Follower(flight) = registry.join(&"k") else {
            panic!("expected follower");
        };
        assert_eq!(flight.wait(soon(5)), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_concurrent_callers_share_one_computation() {
        let registry: Arc<SingleFlight<u8, usize>> = Arc::new(SingleFlight::new());
        let computed = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let computed = Arc::clone(&computed);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    match registry.join(&1) {
                        Join::Leader(guard) => {
                            computed.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(100));
                            guard.complete(42);
                            42
                        }
                        Join::Follower(flight) => match flight.wait(soon(5_000)) {
                            WaitOutcome::Ready(v) => v,
                            other => panic!("unexpected {other:?}"),
                        },
                    }
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        // Stragglers arriving after completion start a new flight, so allow
        // a small bound rather than exactly one.
        assert!(computed.load(Ordering::SeqCst) <= 2);
    }
}
