// SPDX-License-Identifier: MIT OR Apache-2.0
//! Completion signals.
//!
//! A step finishes by settling its [`Completion`]: right away, or once one or
//! more [`Awaitable`]s resolve. Awaitables come in two shapes:
//! - event-style sources ([`EventSource`]) that emit a finished notification
//! - future-style sources that settle once, successfully or not
//!
//! A failed future counts as finished. Playback never branches on step failure.

use crate::ledger::Settler;
use crate::scheduler::Runtime;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Finished notifications an event-style source can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionEvent {
    /// An animation ran to its end
    AnimationEnd,
    /// A transition ran to its end
    TransitionEnd,
    /// Media playback reached its end
    MediaEnded,
}

/// Identifier of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    /// Create a new random listener ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback invoked with the notification that fired
pub type Listener = Arc<dyn Fn(CompletionEvent) + Send + Sync>;

/// Event-style completion source
pub trait EventSource: Send + Sync {
    /// Notifications this source emits
    fn completion_events(&self) -> Vec<CompletionEvent> {
        vec![CompletionEvent::AnimationEnd, CompletionEvent::TransitionEnd]
    }

    /// Register a listener for one notification
    fn subscribe(&self, event: CompletionEvent, listener: Listener) -> ListenerId;

    /// Remove a listener
    fn unsubscribe(&self, event: CompletionEvent, id: ListenerId);
}

/// Result of a future-style source; the error is only logged
pub type FutureOutcome = Result<(), String>;

/// Something a step can hand to its completion to finish later
pub enum Awaitable {
    /// Finishes on the first notification of an event-style source
    Event(Arc<dyn EventSource>),
    /// Finishes when the future settles, successfully or not
    Future(BoxFuture<'static, FutureOutcome>),
}

impl Awaitable {
    /// Wrap an event-style source
    pub fn event<S: EventSource + 'static>(source: Arc<S>) -> Self {
        Awaitable::Event(source)
    }

    /// Wrap a fallible future
    pub fn future<F, T, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display,
    {
        Awaitable::Future(future.map(|result| result.map(|_| ()).map_err(|e| e.to_string())).boxed())
    }

    /// Wrap a future that cannot fail
    pub fn settled<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Awaitable::Future(future.map(Ok).boxed())
    }
}

impl fmt::Debug for Awaitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Awaitable::Event(_) => f.write_str("Awaitable::Event"),
            Awaitable::Future(_) => f.write_str("Awaitable::Future"),
        }
    }
}

impl From<Arc<Signal>> for Awaitable {
    fn from(signal: Arc<Signal>) -> Self {
        Awaitable::Event(signal)
    }
}

/// Completion handle passed to every step
///
/// Clones share one claim: the first of [`done`](Self::done),
/// [`wait_for`](Self::wait_for) or [`wait_all`](Self::wait_all) counts,
/// later calls are ignored.
#[derive(Clone)]
pub struct Completion {
    settler: Settler,
    claimed: Arc<AtomicBool>,
    runtime: Runtime,
}

impl Completion {
    pub(crate) fn new(settler: Settler, runtime: Runtime) -> Self {
        Self {
            settler,
            claimed: Arc::new(AtomicBool::new(false)),
            runtime,
        }
    }

    fn claim(&self) -> bool {
        let first = !self.claimed.swap(true, Ordering::AcqRel);
        if !first {
            tracing::trace!("Redundant completion ignored");
        }
        first
    }

    /// Whether the step already settled (or started waiting)
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// The step is finished
    pub fn done(&self) {
        if self.claim() {
            self.settler.settle();
        }
    }

    /// The step is finished once `awaitable` resolves
    pub fn wait_for(&self, awaitable: impl Into<Awaitable>) {
        self.wait_all(std::iter::once(awaitable.into()));
    }

    /// The step is finished once every awaitable resolves
    pub fn wait_all<I>(&self, awaitables: I)
    where
        I: IntoIterator<Item = Awaitable>,
    {
        if !self.claim() {
            return;
        }

        let awaitables: Vec<Awaitable> = awaitables.into_iter().collect();
        if awaitables.is_empty() {
            self.settler.settle();
            return;
        }

        self.settler.expand(awaitables.len() - 1);
        for awaitable in awaitables {
            self.watch(awaitable);
        }
    }

    fn watch(&self, awaitable: Awaitable) {
        let settler = self.settler.clone();
        match awaitable {
            Awaitable::Event(source) => subscribe_once(source, settler),
            Awaitable::Future(future) => {
                self.runtime.spawn(async move {
                    if let Err(e) = future.await {
                        tracing::warn!("Awaitable failed, continuing: {}", e);
                    }
                    settler.settle();
                });
            }
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("claimed", &self.is_claimed())
            .finish()
    }
}

/// Subscribe to every notification of `source`; the first one settles and
/// removes all subscriptions. Abandoning the dispatch removes them too.
fn subscribe_once(source: Arc<dyn EventSource>, settler: Settler) {
    let fired = Arc::new(AtomicBool::new(false));
    let subscriptions: Arc<Mutex<Vec<(CompletionEvent, ListenerId)>>> = Arc::default();
    let weak_source: Weak<dyn EventSource> = Arc::downgrade(&source);

    for event in source.completion_events() {
        let fired = fired.clone();
        let subs = subscriptions.clone();
        let weak_source = weak_source.clone();
        let settler = settler.clone();

        let listener: Listener = Arc::new(move |_: CompletionEvent| {
            if fired.swap(true, Ordering::AcqRel) {
                return;
            }
            unsubscribe_all(&weak_source, &subs);
            settler.settle();
        });

        let id = source.subscribe(event, listener);
        subscriptions.lock().push((event, id));
    }

    // Fired while subscribing: drop the subscriptions made after it
    if fired.load(Ordering::Acquire) {
        unsubscribe_all(&weak_source, &subscriptions);
        return;
    }

    settler.on_abandon(Box::new(move || {
        if !fired.swap(true, Ordering::AcqRel) {
            unsubscribe_all(&weak_source, &subscriptions);
        }
    }));
}

fn unsubscribe_all(source: &Weak<dyn EventSource>, subscriptions: &Mutex<Vec<(CompletionEvent, ListenerId)>>) {
    let drained: Vec<_> = subscriptions.lock().drain(..).collect();
    if let Some(source) = source.upgrade() {
        for (event, id) in drained {
            source.unsubscribe(event, id);
        }
    }
}

/// In-process event-style source
///
/// Fire it with [`emit`](Self::emit) from any thread.
pub struct Signal {
    events: Vec<CompletionEvent>,
    listeners: Mutex<Vec<(ListenerId, CompletionEvent, Listener)>>,
}

impl Signal {
    /// Signal emitting animation and transition notifications
    pub fn new() -> Arc<Self> {
        Self::with_events(vec![CompletionEvent::AnimationEnd, CompletionEvent::TransitionEnd])
    }

    /// Signal that also emits the media-ended notification
    pub fn media() -> Arc<Self> {
        Self::with_events(vec![
            CompletionEvent::AnimationEnd,
            CompletionEvent::TransitionEnd,
            CompletionEvent::MediaEnded,
        ])
    }

    /// Signal emitting exactly `events`
    pub fn with_events(events: Vec<CompletionEvent>) -> Arc<Self> {
        Arc::new(Self {
            events,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Deliver `event` to its listeners
    pub fn emit(&self, event: CompletionEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, e, _)| *e == event)
            .map(|(_, _, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl EventSource for Signal {
    fn completion_events(&self) -> Vec<CompletionEvent> {
        self.events.clone()
    }

    fn subscribe(&self, event: CompletionEvent, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.lock().push((id, event, listener));
        id
    }

    fn unsubscribe(&self, event: CompletionEvent, id: ListenerId) {
        self.listeners
            .lock()
            .retain(|(listener_id, e, _)| !(*listener_id == id && *e == event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Cleanup, SettleSink};
    use std::time::Duration;

    #[derive(Default)]
    struct Tally {
        settled: Mutex<usize>,
        expanded: Mutex<usize>,
        cleanups: Mutex<Vec<Cleanup>>,
    }

    impl Tally {
        /// Abandon the dispatch, as the engine does when it moves on
        fn abandon(&self) {
            let cleanups: Vec<Cleanup> = self.cleanups.lock().drain(..).collect();
            for cleanup in cleanups {
                cleanup();
            }
        }
    }

    impl SettleSink for Tally {
        fn settle(self: Arc<Self>, _generation: u64) {
            *self.settled.lock() += 1;
        }

        fn expand(self: Arc<Self>, _generation: u64, extra: usize) {
            *self.expanded.lock() += extra;
        }

        fn on_abandon(self: Arc<Self>, _generation: u64, cleanup: Cleanup) {
            self.cleanups.lock().push(cleanup);
        }
    }

    fn completion(tally: &Arc<Tally>) -> Completion {
        let sink: Arc<dyn SettleSink> = tally.clone();
        Completion::new(Settler::new(Arc::downgrade(&sink), 1), Runtime::detect())
    }

    #[test]
    fn test_done_counts_once_across_clones() {
        let tally = Arc::new(Tally::default());
        let complete = completion(&tally);
        let copy = complete.clone();

        complete.done();
        copy.done();
        copy.wait_all(Vec::new());

        assert_eq!(*tally.settled.lock(), 1);
        assert!(copy.is_claimed());
    }

    #[test]
    fn test_signal_settles_on_first_notification_only() {
        let tally = Arc::new(Tally::default());
        let signal = Signal::media();

        completion(&tally).wait_for(signal.clone());
        assert_eq!(signal.listener_count(), 3);

        signal.emit(CompletionEvent::TransitionEnd);
        signal.emit(CompletionEvent::AnimationEnd);

        assert_eq!(*tally.settled.lock(), 1);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_abandoned_wait_unsubscribes() {
        let tally = Arc::new(Tally::default());
        let signal = Signal::media();

        completion(&tally).wait_for(signal.clone());
        assert_eq!(signal.listener_count(), 3);

        tally.abandon();
        assert_eq!(signal.listener_count(), 0);

        signal.emit(CompletionEvent::MediaEnded);
        assert_eq!(*tally.settled.lock(), 0);
    }

    #[test]
    fn test_settled_wait_leaves_nothing_to_abandon() {
        let tally = Arc::new(Tally::default());
        let signal = Signal::new();

        completion(&tally).wait_for(signal.clone());
        signal.emit(CompletionEvent::AnimationEnd);
        tally.abandon();

        assert_eq!(*tally.settled.lock(), 1);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_unlisted_event_is_not_subscribed() {
        let tally = Arc::new(Tally::default());
        let signal = Signal::new();

        completion(&tally).wait_for(signal.clone());
        signal.emit(CompletionEvent::MediaEnded);

        assert_eq!(*tally.settled.lock(), 0);
        assert_eq!(signal.listener_count(), 2);
    }

    #[test]
    fn test_wait_all_expands_by_extra_members() {
        let tally = Arc::new(Tally::default());
        let (a, b, c) = (Signal::new(), Signal::new(), Signal::new());

        completion(&tally).wait_all(vec![
            Awaitable::from(a.clone()),
            Awaitable::from(b.clone()),
            Awaitable::from(c.clone()),
        ]);
        assert_eq!(*tally.expanded.lock(), 2);

        a.emit(CompletionEvent::AnimationEnd);
        c.emit(CompletionEvent::TransitionEnd);
        b.emit(CompletionEvent::AnimationEnd);
        assert_eq!(*tally.settled.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_future_still_settles() {
        let tally = Arc::new(Tally::default());
        let failing = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<(), _>("decode error")
        };

        completion(&tally).wait_for(Awaitable::future(failing));
        assert_eq!(*tally.settled.lock(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*tally.settled.lock(), 1);
    }

    struct EagerSource {
        inner: Arc<Signal>,
    }

    impl EventSource for EagerSource {
        fn subscribe(&self, event: CompletionEvent, listener: Listener) -> ListenerId {
            let id = self.inner.subscribe(event, listener);
            // Already finished: notify on the first subscription
            self.inner.emit(CompletionEvent::AnimationEnd);
            id
        }

        fn unsubscribe(&self, event: CompletionEvent, id: ListenerId) {
            self.inner.unsubscribe(event, id);
        }
    }

    #[test]
    fn test_source_firing_during_subscribe() {
        let tally = Arc::new(Tally::default());
        let inner = Signal::new();
        let source = Arc::new(EagerSource { inner: inner.clone() });

        completion(&tally).wait_for(Awaitable::event(source));

        assert_eq!(*tally.settled.lock(), 1);
        assert_eq!(inner.listener_count(), 0);
    }
}
