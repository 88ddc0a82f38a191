//! "Wait until at least one of N conditions is set".
//!
//! An `EventMultiplexer` subscribes to each of its sources and recomputes its
//! derived `any` condition from inside every source `set()`/`clear()`. The
//! recomputation is serialized by a lock and always reads the *current* value
//! of every source, so the last recomputation after a burst of concurrent
//! mutations reflects the final source state.

use super::condition::{BinaryCondition, ConditionObserver};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Shared between the multiplexer handle and the sources' observer lists.
struct OrLink {
    sources: Vec<BinaryCondition>,
    any: BinaryCondition,
    recompute: Mutex<()>,
}

impl OrLink {
    fn rederive(&self) {
        let _guard = self.recompute.lock();
        if self.sources.iter().any(BinaryCondition::is_set) {
            if !self.any.is_set() {
                self.any.set();
            }
        } else if self.any.is_set() {
            self.any.clear();
        }
    }
}

impl ConditionObserver for OrLink {
    fn condition_changed(&self, _is_set: bool) {
        self.rederive();
    }
}

/// Derived condition that is set iff at least one source condition is set.
///
/// The multiplexer only holds handles to its sources; it does not control
/// their lifetime. Dropping the multiplexer unsubscribes it.
pub struct EventMultiplexer {
    link: Arc<OrLink>,
}

impl EventMultiplexer {
    /// Build a multiplexer over `sources` and derive its initial value.
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = BinaryCondition>,
    {
        let sources: Vec<BinaryCondition> = sources.into_iter().collect();
        let name = sources
            .iter()
            .map(BinaryCondition::name)
            .collect::<Vec<_>>()
            .join("|");

        let link = Arc::new(OrLink {
            sources,
            any: BinaryCondition::new(name),
            recompute: Mutex::new(()),
        });

        for source in &link.sources {
            let weak = Arc::downgrade(&link);
            source.subscribe(weak);
        }
        link.rederive();

        Self { link }
    }

    /// The derived condition. Waiting on it is equivalent to [`Self::wait`].
    pub fn any(&self) -> &BinaryCondition {
        &self.link.any
    }

    /// Sources in construction order.
    pub fn sources(&self) -> &[BinaryCondition] {
        &self.link.sources
    }

    /// Whether at least one source is set.
    pub fn is_set(&self) -> bool {
        self.link.any.is_set()
    }

    /// Block until at least one source is set or `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.link.any.wait(timeout)
    }
}

impl std::fmt::Debug for EventMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMultiplexer")
            .field("any", &self.link.any)
            .field("sources", &self.link.sources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Instant;

    fn conditions(n: usize) -> Vec<BinaryCondition> {
        (0..n).map(|i| BinaryCondition::new(format!("c{i}"))).collect()
    }

    #[test]
    fn test_initial_value_reflects_sources() {
        let sources = conditions(2);
        sources[1].set();
        let mux = EventMultiplexer::new(sources.clone());
        assert!(mux.is_set());

        let empty = EventMultiplexer::new(conditions(3));
        assert!(!empty.is_set());
    }

    #[test]
    fn test_follows_set_and_clear() {
        let sources = conditions(2);
        let mux = EventMultiplexer::new(sources.clone());

        sources[0].set();
        assert!(mux.is_set());
        sources[1].set();
        sources[0].clear();
        assert!(mux.is_set());
        sources[1].clear();
        assert!(!mux.is_set());
    }

    #[test]
    fn test_overlapping_multiplexers_are_independent() {
        let shared = BinaryCondition::new("close_requested");
        let a = BinaryCondition::new("connected");
        let b = BinaryCondition::new("disconnected");
        let connect = EventMultiplexer::new([a.clone(), shared.clone()]);
        let disconnect = EventMultiplexer::new([b.clone(), shared.clone()]);

        a.set();
        assert!(connect.is_set());
        assert!(!disconnect.is_set());

        shared.set();
        assert!(connect.is_set());
        assert!(disconnect.is_set());

        a.clear();
        assert!(connect.is_set(), "shared source keeps it set");
    }

    #[test]
    fn test_wait_woken_by_any_source() {
        let sources = conditions(3);
        let mux = EventMultiplexer::new(sources.clone());
        let setter = sources[2].clone();

        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        assert!(mux.wait(Some(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_when_nothing_set() {
        let mux = EventMultiplexer::new(conditions(2));
        assert!(!mux.wait(Some(Duration::from_millis(20))));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let sources = conditions(1);
        let mux = EventMultiplexer::new(sources.clone());
        assert_eq!(sources[0].observer_count(), 1);
        drop(mux);
        assert_eq!(sources[0].observer_count(), 0);
    }

    #[test]
    fn test_nested_multiplexer() {
        let sources = conditions(3);
        let inner = EventMultiplexer::new([sources[0].clone(), sources[1].clone()]);
        let outer = EventMultiplexer::new([inner.any().clone(), sources[2].clone()]);

        sources[1].set();
        assert!(outer.is_set());
        sources[1].clear();
        assert!(!outer.is_set());
        sources[2].set();
        assert!(outer.is_set());
    }

    #[test]
    fn test_concurrent_mutations_settle_on_final_state() {
        let sources = conditions(4);
        let mux = EventMultiplexer::new(sources.clone());

        let handles: Vec<_> = sources
            .iter()
            .cloned()
            .map(|c| {
                thread::spawn(move || {
                    for _ in 0..500 {
                        c.set();
                        c.clear();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!mux.is_set());

        sources[3].set();
        assert!(mux.is_set());
    }

    proptest! {
        #[test]
        fn prop_derived_matches_or_of_sources(
            n in 1usize..=5,
            ops in prop::collection::vec((0usize..5, any::<bool>()), 0..64),
        ) {
            let sources = conditions(n);
            let mux = EventMultiplexer::new(sources.clone());
            prop_assert!(!mux.is_set());

            for (index, set) in ops {
                let source = &sources[index % n];
                if set {
                    source.set();
                } else {
                    source.clear();
                }
                let expected = sources.iter().any(BinaryCondition::is_set);
                prop_assert_eq!(mux.is_set(), expected);
            }
        }
    }
}
