//! Settable/clearable boolean flag that other threads can block on.
//!
//! A `BinaryCondition` is a cheap, clonable handle: clones share the same
//! flag. Observers (see [`ConditionObserver`]) are notified synchronously from
//! inside `set()`/`clear()`, after the flag has changed and before the call
//! returns, which is what lets an [`EventMultiplexer`](super::EventMultiplexer)
//! keep its derived flag in step with its sources.

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Receives a callback every time a watched condition is set or cleared.
pub trait ConditionObserver: Send + Sync {
    /// Called after the watched condition changed. `is_set` is the value the
    /// mutating call just stored.
    fn condition_changed(&self, is_set: bool);
}

struct ConditionInner {
    name: String,
    flag: Mutex<bool>,
    cvar: Condvar,
    observers: Mutex<Vec<Weak<dyn ConditionObserver>>>,
}

/// A named boolean flag with blocking wait.
#[derive(Clone)]
pub struct BinaryCondition {
    inner: Arc<ConditionInner>,
}

impl BinaryCondition {
    /// Create a new, cleared condition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ConditionInner {
                name: name.into(),
                flag: Mutex::new(false),
                cvar: Condvar::new(),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Name given at construction, used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Set the flag and wake every waiter.
    pub fn set(&self) {
        {
            let mut flag = self.inner.flag.lock();
            *flag = true;
            self.inner.cvar.notify_all();
        }
        self.notify_observers(true);
    }

    /// Clear the flag.
    pub fn clear(&self) {
        {
            let mut flag = self.inner.flag.lock();
            *flag = false;
        }
        self.notify_observers(false);
    }

    /// Current value of the flag.
    pub fn is_set(&self) -> bool {
        *self.inner.flag.lock()
    }

    /// Block until the flag is set or `timeout` elapses.
    ///
    /// `None` waits forever. Returns the value of the flag when the wait
    /// ended, so `false` means the timeout elapsed.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut flag = self.inner.flag.lock();
        match timeout {
            None => {
                while !*flag {
                    self.inner.cvar.wait(&mut flag);
                }
                true
            }
            Some(timeout) => {
                let Some(deadline) = Instant::now().checked_add(timeout) else {
                    while !*flag {
                        self.inner.cvar.wait(&mut flag);
                    }
                    return true;
                };
                while !*flag {
                    if self.inner.cvar.wait_until(&mut flag, deadline).timed_out() {
                        break;
                    }
                }
                *flag
            }
        }
    }

    /// Register an observer. Only a weak reference is kept; dropping the
    /// observer unregisters it.
    pub fn subscribe(&self, observer: Weak<dyn ConditionObserver>) {
        let mut observers = self.inner.observers.lock();
        observers.retain(|o| o.strong_count() > 0);
        observers.push(observer);
    }

    /// Number of live observers currently registered.
    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .lock()
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }

    /// Whether two handles refer to the same underlying flag.
    pub fn same_as(&self, other: &BinaryCondition) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify_observers(&self, is_set: bool) {
        // Snapshot so observers can subscribe/drop without deadlocking on us.
        let live: Vec<Arc<dyn ConditionObserver>> = {
            let mut observers = self.inner.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.condition_changed(is_set);
        }
    }
}

impl std::fmt::Debug for BinaryCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryCondition")
            .field("name", &self.inner.name)
            .field("is_set", &self.is_set())
            .finish()
    }
}
