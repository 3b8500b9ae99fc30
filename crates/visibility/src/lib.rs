use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Host hook that starts and stops intersection reporting for an element.
pub trait ElementObserver<E>: Send {
    fn observe(&mut self, element: &E);
    fn unobserve(&mut self, element: &E);
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionChange<E> {
    pub element: E,
    pub ratio: f64,
}

impl<E> IntersectionChange<E> {
    pub fn new(element: E, ratio: f64) -> Self {
        Self { element, ratio }
    }
}

struct Tracked<E> {
    element: E,
    ratio: f64,
    serial: u64,
}

struct TrackerState<K, E, O: ElementObserver<E>> {
    observer: O,
    threshold: f64,
    tracked: IndexMap<K, Tracked<E>>,
    next_serial: u64,
}

impl<K: Eq + Hash, E, O: ElementObserver<E>> TrackerState<K, E, O> {
    fn remove(&mut self, key: &K) -> bool {
        match self.tracked.shift_remove(key) {
            Some(tracked) => {
                self.observer.unobserve(&tracked.element);
                true
            }
            None => false,
        }
    }

    fn most_visible(&self) -> Option<&K> {
        let mut best: Option<(&K, f64)> = None;
        for (key, tracked) in &self.tracked {
            if tracked.ratio <= 0.0 || tracked.ratio < self.threshold {
                continue;
            }
            if best.is_none_or(|(_, ratio)| tracked.ratio > ratio) {
                best = Some((key, tracked.ratio));
            }
        }
        best.map(|(key, _)| key)
    }
}

impl<K, E, O: ElementObserver<E>> Drop for TrackerState<K, E, O> {
    fn drop(&mut self) {
        for tracked in self.tracked.values() {
            self.observer.unobserve(&tracked.element);
        }
    }
}

type Callback<K> = Box<dyn FnMut(&K) + Send>;

/// Picks the most visible of a set of keyed elements.
///
/// Elements are registered under caller-chosen keys; the host feeds
/// intersection ratios in through [`VisibilityTracker::handle_intersections`].
/// Among elements at or above the threshold the highest ratio wins, and the
/// earliest registration breaks ties.
pub struct VisibilityTracker<K, E, O: ElementObserver<E>> {
    state: Arc<Mutex<TrackerState<K, E, O>>>,
    on_most_visible: Mutex<Callback<K>>,
}

impl<K, E, O> VisibilityTracker<K, E, O>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + 'static,
    E: PartialEq + Send + 'static,
    O: ElementObserver<E> + 'static,
{
    pub fn new(
        observer: O,
        threshold: f64,
        on_most_visible: impl FnMut(&K) + Send + 'static,
    ) -> Self {
        let threshold = if threshold.is_nan() {
            0.0
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                observer,
                threshold,
                tracked: IndexMap::new(),
                next_serial: 0,
            })),
            on_most_visible: Mutex::new(Box::new(on_most_visible)),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.state.lock().threshold
    }

    pub fn len(&self) -> usize {
        self.state.lock().tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts tracking `element` under `key`. A previous element under the
    /// same key is unobserved first. Dropping the returned guard unregisters
    /// the key unless it has been registered again since.
    #[must_use = "dropping the registration unregisters the element"]
    pub fn register(&self, key: K, element: E) -> Registration<K> {
        let serial = {
            let mut state = self.state.lock();
            let serial = state.next_serial;
            state.next_serial += 1;

            let previous = state.tracked.insert(
                key.clone(),
                Tracked {
                    element,
                    ratio: 0.0,
                    serial,
                },
            );
            let state = &mut *state;
            if let Some(previous) = previous {
                debug!(?key, "replacing observed element");
                state.observer.unobserve(&previous.element);
            }
            if let Some(tracked) = state.tracked.get(&key) {
                state.observer.observe(&tracked.element);
            }
            serial
        };

        let weak = Arc::downgrade(&self.state);
        let release_key = key.clone();
        Registration {
            key,
            release: Some(Box::new(move || release(&weak, &release_key, serial))),
        }
    }

    /// Stops tracking `key`. Unknown keys are a no-op returning `false`.
    pub fn unregister(&self, key: &K) -> bool {
        let removed = self.state.lock().remove(key);
        if !removed {
            trace!(?key, "unregister for unknown key ignored");
        }
        removed
    }

    /// Records new ratios, then reports the most visible key (if any) to the
    /// callback and returns it. Changes for unknown elements are ignored.
    pub fn handle_intersections(
        &self,
        changes: impl IntoIterator<Item = IntersectionChange<E>>,
    ) -> Option<K> {
        let winner = {
            let mut state = self.state.lock();
            for change in changes {
                let ratio = if change.ratio.is_nan() {
                    0.0
                } else {
                    change.ratio.clamp(0.0, 1.0)
                };
                match state
                    .tracked
                    .values_mut()
                    .find(|tracked| tracked.element == change.element)
                {
                    Some(tracked) => tracked.ratio = ratio,
                    None => trace!("intersection change for unregistered element ignored"),
                }
            }
            state.most_visible().cloned()
        };

        if let Some(key) = &winner {
            let mut callback = self.on_most_visible.lock();
            (*callback)(key);
        }
        winner
    }

    pub fn most_visible(&self) -> Option<K> {
        self.state.lock().most_visible().cloned()
    }
}

/// Keeps a key registered; unregisters on drop.
pub struct Registration<K> {
    key: K,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl<K> Registration<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Leaves the element registered until the tracker is dropped or the key
    /// is unregistered explicitly.
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl<K> Drop for Registration<K> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for Registration<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("attached", &self.release.is_some())
            .finish()
    }
}

fn release<K, E, O>(state: &Weak<Mutex<TrackerState<K, E, O>>>, key: &K, serial: u64)
where
    K: Eq + Hash,
    O: ElementObserver<E>,
{
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock();
    if state.tracked.get(key).is_some_and(|t| t.serial == serial) {
        state.remove(key);
    }
}
