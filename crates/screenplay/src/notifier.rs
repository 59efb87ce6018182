// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle observers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Timeline cued without playing
    Init,
    /// Playback started or resumed
    Play,
    /// Playback paused
    Pause,
    /// Playback stopped
    Stop,
    /// Cursor wrapped across a boundary
    Loop,
    /// A step is about to be dispatched
    Before,
    /// A step and its wait finished
    After,
}

impl LifecycleEvent {
    /// Get the event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Loop => "loop",
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// Identity of a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub Uuid);

impl ObserverId {
    /// Create a new random observer ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer callback, receiving the object that emitted the event
pub type Observer<R> = Arc<dyn Fn(&R) + Send + Sync>;

/// Ordered observer lists per lifecycle event
pub struct Notifier<R> {
    observers: IndexMap<LifecycleEvent, Vec<(ObserverId, Observer<R>)>>,
}

impl<R> Notifier<R> {
    /// Create a notifier with no observers
    pub fn new() -> Self {
        Self {
            observers: IndexMap::new(),
        }
    }

    /// Append an observer; delivery follows registration order
    pub fn on(&mut self, event: LifecycleEvent, observer: Observer<R>) -> ObserverId {
        let id = ObserverId::new();
        self.observers.entry(event).or_default().push((id, observer));
        id
    }

    /// Remove one observer, or all observers of `event` when `id` is `None`.
    /// Returns how many were removed.
    pub fn off(&mut self, event: LifecycleEvent, id: Option<ObserverId>) -> usize {
        let Some(list) = self.observers.get_mut(&event) else {
            return 0;
        };

        let before = list.len();
        match id {
            Some(id) => list.retain(|(observer_id, _)| *observer_id != id),
            None => list.clear(),
        }
        before - list.len()
    }

    /// Observers currently registered for `event`, in delivery order
    pub fn snapshot(&self, event: LifecycleEvent) -> Vec<Observer<R>> {
        self.observers
            .get(&event)
            .map(|list| list.iter().map(|(_, observer)| observer.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliver `event` synchronously to every observer
    ///
    /// Observer panics are not caught.
    pub fn emit(&self, event: LifecycleEvent, receiver: &R) {
        for observer in self.snapshot(event) {
            observer(receiver);
        }
    }

    /// Number of observers for `event`
    pub fn count(&self, event: LifecycleEvent) -> usize {
        self.observers.get(&event).map_or(0, Vec::len)
    }
}

impl<R> Default for Notifier<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Log = Mutex<Vec<&'static str>>;

    fn record(tag: &'static str) -> Observer<Log> {
        Arc::new(move |log: &Log| log.lock().push(tag))
    }

    #[test]
    fn test_registration_order_is_delivery_order() {
        let mut notifier = Notifier::new();
        notifier.on(LifecycleEvent::Before, record("first"));
        notifier.on(LifecycleEvent::Before, record("second"));
        notifier.on(LifecycleEvent::After, record("other"));

        let log = Log::default();
        notifier.emit(LifecycleEvent::Before, &log);

        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_off_by_identity() {
        let mut notifier = Notifier::new();
        let keep = notifier.on(LifecycleEvent::Stop, record("keep"));
        let gone = notifier.on(LifecycleEvent::Stop, record("drop"));

        assert_eq!(notifier.off(LifecycleEvent::Stop, Some(gone)), 1);
        assert_eq!(notifier.off(LifecycleEvent::Stop, Some(gone)), 0);
        assert_ne!(keep, gone);

        let log = Log::default();
        notifier.emit(LifecycleEvent::Stop, &log);
        assert_eq!(*log.lock(), vec!["keep"]);
    }

    #[test]
    fn test_off_without_id_clears_event() {
        let mut notifier = Notifier::new();
        notifier.on(LifecycleEvent::Loop, record("a"));
        notifier.on(LifecycleEvent::Loop, record("b"));
        notifier.on(LifecycleEvent::Play, record("c"));

        assert_eq!(notifier.off(LifecycleEvent::Loop, None), 2);
        assert_eq!(notifier.count(LifecycleEvent::Loop), 0);
        assert_eq!(notifier.count(LifecycleEvent::Play), 1);
        assert_eq!(notifier.off(LifecycleEvent::Pause, None), 0);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(LifecycleEvent::Before.name(), "before");
        assert_eq!(LifecycleEvent::Init.name(), "init");
    }
}
