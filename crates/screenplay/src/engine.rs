// SPDX-License-Identifier: MIT OR Apache-2.0
//! Playback engine.
//!
//! [`Screenplay`] plays a [`Timeline`] one offset at a time. Engine work is
//! queued and drained by one caller at a time, and no lock is held while
//! steps, observers or the finalizer run. Every dispatch gets a new
//! generation; queued tasks, settlements and timers from an older generation
//! are dropped when they arrive.

use crate::config::ScreenplayConfig;
use crate::error::Result;
use crate::ledger::{Cleanup, Ledger, SettleOutcome, SettleSink, Settler};
use crate::notifier::{LifecycleEvent, Notifier, ObserverId};
use crate::playback::{Boundary, Cursor, Direction, Loops, PlaybackState};
use crate::scheduler::{DelaySlot, Runtime};
use crate::signal::Completion;
use crate::timeline::{Seek, Timeline};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;

/// End-of-playback callback
type Finalizer = Arc<dyn Fn(&Screenplay) + Send + Sync>;

/// Progress of the dispatch in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing dispatched
    Idle,
    /// Dispatched, steps not invoked yet
    Scheduled,
    /// Steps invoked, ledger open
    InFlight,
    /// Settled while paused; the wait runs on resume
    AwaitingDelay,
    /// Wait timer armed
    Delaying,
    /// `after` fired; advances once running
    Completed,
}

/// Queued engine work
#[derive(Debug, Clone, Copy)]
enum Task {
    Emit(LifecycleEvent),
    Finalize,
    Invoke { generation: u64 },
    Settled { generation: u64 },
    DelayElapsed { generation: u64, ticket: u64 },
    Advance { generation: u64 },
}

struct EngineState {
    timeline: Timeline,
    deferred: bool,
    cursor: Cursor,
    playback: PlaybackState,
    phase: Phase,
    generation: u64,
    ledger: Ledger,
    delay: DelaySlot,
    queue: VecDeque<Task>,
    /// Teardown of abandoned dispatches, run by the drainer outside the lock
    retired: Vec<Cleanup>,
    draining: bool,
    watch: watch::Sender<PlaybackState>,
}

struct Inner {
    state: Mutex<EngineState>,
    notifier: Mutex<Notifier<Screenplay>>,
    finalizer: Mutex<Option<Finalizer>>,
    runtime: Runtime,
}

/// Releases queue ownership if a step or observer panics mid-drain
struct DrainGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().draining = false;
        }
    }
}

impl Inner {
    fn handle(self: &Arc<Self>) -> Screenplay {
        Screenplay {
            inner: Arc::clone(self),
        }
    }

    fn schedule(self: &Arc<Self>, task: Task) {
        self.state.lock().queue.push_back(task);
        self.run();
    }

    /// Drain the queue, unless another caller already is
    fn run(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            if st.draining {
                return;
            }
            st.draining = true;
        }

        let mut guard = DrainGuard {
            inner: self,
            armed: true,
        };

        loop {
            let (retired, task) = {
                let mut st = self.state.lock();
                let retired = std::mem::take(&mut st.retired);
                let task = st.queue.pop_front();
                if task.is_none() && retired.is_empty() {
                    st.draining = false;
                    guard.armed = false;
                    return;
                }
                (retired, task)
            };

            for cleanup in retired {
                cleanup();
            }
            if let Some(task) = task {
                self.perform(task);
            }
        }
    }

    fn perform(self: &Arc<Self>, task: Task) {
        match task {
            Task::Emit(event) => {
                self.emit(event);
                if matches!(
                    event,
                    LifecycleEvent::Init | LifecycleEvent::Play | LifecycleEvent::Pause | LifecycleEvent::Stop
                ) {
                    let st = self.state.lock();
                    st.watch.send_replace(st.playback);
                }
            }
            Task::Finalize => {
                let finalizer = self.finalizer.lock().clone();
                if let Some(finalizer) = finalizer {
                    finalizer(&self.handle());
                }
            }
            Task::Invoke { generation } => self.invoke(generation),
            Task::Settled { generation } => self.settled(generation),
            Task::DelayElapsed { generation, ticket } => {
                let fired = {
                    let mut st = self.state.lock();
                    st.generation == generation && st.delay.fire(ticket)
                };
                if fired {
                    self.complete(generation);
                }
            }
            Task::Advance { generation } => self.advance(generation),
        }
    }

    fn emit(self: &Arc<Self>, event: LifecycleEvent) {
        let observers = self.notifier.lock().snapshot(event);
        if observers.is_empty() {
            return;
        }

        let handle = self.handle();
        for observer in observers {
            observer(&handle);
        }
    }

    /// Run the steps at the current offset
    fn invoke(self: &Arc<Self>, generation: u64) {
        if self.state.lock().generation != generation {
            tracing::trace!(generation, "Abandoned dispatch skipped");
            return;
        }

        self.emit(LifecycleEvent::Before);

        let members = {
            let mut st = self.state.lock();
            // An observer may have moved or stopped playback
            if st.generation != generation || st.playback.is_idle() {
                return;
            }
            let Some(offset) = st.cursor.offset else {
                return;
            };
            let Some(step) = st.timeline.get(offset) else {
                return;
            };

            let members = step.members().to_vec();
            st.ledger.open(generation, members.len());
            st.phase = Phase::InFlight;
            if members.is_empty() {
                st.queue.push_back(Task::Settled { generation });
            }
            tracing::debug!(offset, generation, group = members.len(), "Dispatching step");
            members
        };

        let weak: Weak<Inner> = Arc::downgrade(self);
        let sink: Weak<dyn SettleSink> = weak;
        for step in members {
            step(Completion::new(
                Settler::new(sink.clone(), generation),
                self.runtime.clone(),
            ));
        }
    }

    /// The whole group settled: start the wait, or complete right away
    fn settled(self: &Arc<Self>, generation: u64) {
        let mut st = self.state.lock();
        if st.generation != generation || !matches!(st.phase, Phase::InFlight | Phase::AwaitingDelay) {
            return;
        }

        let wait = st
            .cursor
            .offset
            .and_then(|offset| st.timeline.wait_at(offset))
            .filter(|wait| !wait.is_zero());

        match wait {
            Some(wait) if st.playback.is_running() => {
                let ticket = st.delay.reserve();
                let weak = Arc::downgrade(self);
                let task = self.runtime.delay(wait, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.schedule(Task::DelayElapsed { generation, ticket });
                    }
                });
                st.delay.attach(ticket, task);
                st.phase = Phase::Delaying;
                tracing::debug!(generation, ?wait, "Holding before advance");
            }
            Some(_) => st.phase = Phase::AwaitingDelay,
            None => {
                drop(st);
                self.complete(generation);
            }
        }
    }

    /// Fire `after` and queue the advancement
    fn complete(self: &Arc<Self>, generation: u64) {
        {
            let mut st = self.state.lock();
            if st.generation != generation {
                return;
            }
            st.phase = Phase::Completed;
        }

        self.emit(LifecycleEvent::After);
        self.state.lock().queue.push_back(Task::Advance { generation });
    }

    fn advance(self: &Arc<Self>, generation: u64) {
        let mut st = self.state.lock();
        if st.generation != generation || st.phase != Phase::Completed {
            return;
        }
        if !st.playback.is_running() {
            tracing::trace!(generation, "Advance held until resumed");
            return;
        }
        if let Some(target) = st.cursor.relative_target(1) {
            self.seek_locked(&mut st, target);
        }
    }

    /// Move to `target` through the boundary rule
    fn seek_locked(self: &Arc<Self>, st: &mut EngineState, target: isize) {
        let len = st.timeline.len();
        match st.cursor.resolve(target, len) {
            Boundary::Within(offset) => self.dispatch_locked(st, offset),
            Boundary::Wrapped(offset) => {
                tracing::debug!(remaining = %st.cursor.remaining, "Timeline looped");
                st.queue.push_back(Task::Emit(LifecycleEvent::Loop));
                self.dispatch_locked(st, offset);
            }
            Boundary::Exhausted => {
                Self::stop_locked(st);
            }
        }
    }

    /// Start a new dispatch at `offset`, abandoning the previous one
    fn dispatch_locked(self: &Arc<Self>, st: &mut EngineState, offset: usize) {
        st.generation += 1;
        let generation = st.generation;
        st.delay.cancel();
        let cleanups = st.ledger.discard();
        st.retired.extend(cleanups);
        st.cursor.offset = Some(offset);
        st.phase = Phase::Scheduled;

        if st.deferred {
            let weak = Arc::downgrade(self);
            self.runtime.spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.schedule(Task::Invoke { generation });
                }
            });
        } else {
            st.queue.push_back(Task::Invoke { generation });
        }
    }

    fn resume_locked(st: &mut EngineState) {
        let generation = st.generation;
        match st.phase {
            Phase::AwaitingDelay => st.queue.push_back(Task::Settled { generation }),
            Phase::Completed => st.queue.push_back(Task::Advance { generation }),
            _ => {}
        }
    }

    fn stop_locked(st: &mut EngineState) -> bool {
        if st.playback.is_idle() {
            return false;
        }

        st.generation += 1;
        st.delay.cancel();
        let cleanups = st.ledger.discard();
        st.retired.extend(cleanups);
        st.cursor.reset();
        st.phase = Phase::Idle;
        st.playback = PlaybackState::Idle;
        st.queue.push_back(Task::Finalize);
        st.queue.push_back(Task::Emit(LifecycleEvent::Stop));
        tracing::debug!("Playback stopped");
        true
    }

    /// Enter `playback` from idle at the start boundary (or the pending seek)
    fn begin_locked(self: &Arc<Self>, st: &mut EngineState, playback: PlaybackState, event: LifecycleEvent) {
        st.playback = playback;
        st.cursor.remaining = st.cursor.configured;
        st.queue.push_back(Task::Emit(event));

        if st.cursor.is_exhausted() {
            Self::stop_locked(st);
            return;
        }

        let target = match st.cursor.pending_start.take() {
            Some(offset) => offset as isize,
            None => st.cursor.start_target(st.timeline.len()),
        };
        self.seek_locked(st, target);
    }
}

impl SettleSink for Inner {
    fn settle(self: Arc<Self>, generation: u64) {
        let outcome = self.state.lock().ledger.settle(generation);
        match outcome {
            SettleOutcome::GroupComplete => self.schedule(Task::Settled { generation }),
            SettleOutcome::Pending => {}
            SettleOutcome::Redundant => tracing::trace!(generation, "Redundant settlement ignored"),
            SettleOutcome::Stale => tracing::trace!(generation, "Stale settlement ignored"),
        }
    }

    fn expand(self: Arc<Self>, generation: u64, extra: usize) {
        let outcome = self.state.lock().ledger.expand(generation, extra);
        if outcome == SettleOutcome::Stale {
            tracing::trace!(generation, "Stale awaitables ignored");
        }
    }

    fn on_abandon(self: Arc<Self>, generation: u64, cleanup: Cleanup) {
        let rejected = self.state.lock().ledger.retain(generation, cleanup);
        if let Some(cleanup) = rejected {
            cleanup();
        }
    }
}

/// Timeline player
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Screenplay {
    inner: Arc<Inner>,
}

impl Screenplay {
    /// Create a player, using the ambient tokio runtime (if any) for deferred work
    pub fn new(timeline: Timeline, config: ScreenplayConfig) -> Self {
        Self::build(timeline, config, Runtime::detect())
    }

    /// Create a player that schedules deferred work on `handle`
    pub fn with_handle(timeline: Timeline, config: ScreenplayConfig, handle: Handle) -> Self {
        Self::build(timeline, config, Runtime::from_handle(handle))
    }

    fn build(timeline: Timeline, config: ScreenplayConfig, runtime: Runtime) -> Self {
        let (watch, _) = watch::channel(PlaybackState::Idle);
        let state = EngineState {
            timeline,
            deferred: config.deferred,
            cursor: Cursor::new(config.direction, config.loops, config.loop_backward),
            playback: PlaybackState::Idle,
            phase: Phase::Idle,
            generation: 0,
            ledger: Ledger::default(),
            delay: DelaySlot::default(),
            queue: VecDeque::new(),
            retired: Vec::new(),
            draining: false,
            watch,
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                notifier: Mutex::new(Notifier::new()),
                finalizer: Mutex::new(None),
                runtime,
            }),
        }
    }

    fn command<T>(&self, f: impl FnOnce(&Arc<Inner>, &mut EngineState) -> T) -> T {
        let result = {
            let mut st = self.inner.state.lock();
            f(&self.inner, &mut *st)
        };
        self.inner.run();
        result
    }

    /// Start, or resume, with the configured loop count.
    /// Returns false if already running.
    pub fn play(&self) -> bool {
        self.start(None)
    }

    /// Like [`play`](Self::play), replacing the loop count first
    pub fn play_with(&self, loops: Loops) -> bool {
        self.start(Some(loops))
    }

    fn start(&self, loops: Option<Loops>) -> bool {
        self.command(|inner, st| {
            if let Some(loops) = loops {
                st.cursor.set_loops(loops);
            }

            match st.playback {
                PlaybackState::Running => false,
                PlaybackState::Paused => {
                    st.playback = PlaybackState::Running;
                    st.queue.push_back(Task::Emit(LifecycleEvent::Play));
                    Inner::resume_locked(st);
                    tracing::debug!("Playback resumed");
                    true
                }
                PlaybackState::Idle => {
                    tracing::debug!(loops = %st.cursor.configured, "Playback started");
                    inner.begin_locked(st, PlaybackState::Running, LifecycleEvent::Play);
                    true
                }
            }
        })
    }

    /// Cue the first step without auto-advancing; playback enters `Paused`
    pub fn init(&self) -> bool {
        self.command(|inner, st| {
            if !st.playback.is_idle() {
                return false;
            }
            inner.begin_locked(st, PlaybackState::Paused, LifecycleEvent::Init);
            true
        })
    }

    /// Stop advancing; work in flight still completes
    pub fn pause(&self) -> bool {
        self.command(|_, st| {
            if !st.playback.is_running() {
                return false;
            }
            st.playback = PlaybackState::Paused;
            if st.delay.cancel() {
                st.phase = Phase::AwaitingDelay;
            }
            st.queue.push_back(Task::Emit(LifecycleEvent::Pause));
            tracing::debug!("Playback paused");
            true
        })
    }

    /// Pause if running, play otherwise
    pub fn toggle(&self) -> bool {
        if self.state().is_running() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Return to idle and run the finalizer. Returns false if already idle.
    pub fn stop(&self) -> bool {
        self.command(|_, st| Inner::stop_locked(st))
    }

    /// Dispatch the next step in the current direction
    pub fn next(&self) -> bool {
        self.scrub(1)
    }

    /// Dispatch the step `n` offsets ahead
    pub fn next_by(&self, n: usize) -> bool {
        self.scrub(isize::try_from(n).unwrap_or(isize::MAX))
    }

    /// Dispatch the previous step in the current direction
    pub fn previous(&self) -> bool {
        self.scrub(-1)
    }

    /// Dispatch the step `n` offsets back
    pub fn previous_by(&self, n: usize) -> bool {
        self.scrub(-isize::try_from(n).unwrap_or(isize::MAX))
    }

    fn scrub(&self, delta: isize) -> bool {
        self.command(|inner, st| {
            if st.playback.is_idle() {
                return false;
            }
            match st.cursor.relative_target(delta) {
                Some(target) => {
                    inner.seek_locked(st, target);
                    true
                }
                None => false,
            }
        })
    }

    /// Dispatch the current step again
    pub fn same(&self) -> bool {
        self.command(|inner, st| match (st.playback, st.cursor.offset) {
            (PlaybackState::Idle, _) | (_, None) => false,
            (_, Some(offset)) => {
                inner.dispatch_locked(st, offset);
                true
            }
        })
    }

    /// Jump back to the start boundary of the current direction
    pub fn rewind(&self) -> bool {
        self.command(|inner, st| {
            if st.playback.is_idle() {
                st.cursor.pending_start = None;
                return false;
            }
            let target = st.cursor.start_target(st.timeline.len());
            inner.seek_locked(st, target);
            true
        })
    }

    /// Jump to a marker or offset and dispatch it.
    ///
    /// While idle the target becomes the start position of the next `play`.
    /// An unknown target leaves the cursor unchanged.
    pub fn goto(&self, target: impl Into<Seek>) -> Result<usize> {
        let target = target.into();
        self.command(|inner, st| {
            let offset = match st.timeline.resolve(&target) {
                Ok(offset) => offset,
                Err(e) => {
                    tracing::debug!("goto ignored: {}", e);
                    return Err(e);
                }
            };

            if st.playback.is_idle() {
                st.cursor.pending_start = Some(offset);
            } else {
                inner.seek_locked(st, offset as isize);
            }
            Ok(offset)
        })
    }

    /// Flip the direction for the next advancement
    pub fn reverse(&self) {
        let mut st = self.inner.state.lock();
        st.cursor.direction = st.cursor.direction.reversed();
    }

    /// Set the direction for the next advancement
    pub fn set_direction(&self, direction: Direction) {
        self.inner.state.lock().cursor.direction = direction;
    }

    /// Set the loop count
    pub fn set_loops(&self, loops: Loops) {
        self.inner.state.lock().cursor.set_loops(loops);
    }

    /// Loop until stopped
    pub fn loop_forever(&self) {
        self.set_loops(Loops::Infinite);
    }

    /// Allow wrapping at the boundary behind the playing direction
    pub fn set_loop_backward(&self, loop_backward: bool) {
        self.inner.state.lock().cursor.loop_backward = loop_backward;
    }

    /// Set the callback run on every transition to idle
    pub fn done<F>(&self, finalizer: F)
    where
        F: Fn(&Screenplay) + Send + Sync + 'static,
    {
        *self.inner.finalizer.lock() = Some(Arc::new(finalizer));
    }

    /// Register an observer
    pub fn on<F>(&self, event: LifecycleEvent, observer: F) -> ObserverId
    where
        F: Fn(&Screenplay) + Send + Sync + 'static,
    {
        self.inner.notifier.lock().on(event, Arc::new(observer))
    }

    /// Remove one observer, or every observer of `event`
    pub fn off(&self, event: LifecycleEvent, id: Option<ObserverId>) -> usize {
        self.inner.notifier.lock().off(event, id)
    }

    /// Get the playback state
    pub fn state(&self) -> PlaybackState {
        self.inner.state.lock().playback
    }

    /// Offset of the current (or last) dispatched step
    pub fn offset(&self) -> Option<usize> {
        self.inner.state.lock().cursor.offset
    }

    /// Get the direction
    pub fn direction(&self) -> Direction {
        self.inner.state.lock().cursor.direction
    }

    /// Configured loop count
    pub fn loops(&self) -> Loops {
        self.inner.state.lock().cursor.configured
    }

    /// Passes left in the current playback
    pub fn remaining_loops(&self) -> Loops {
        self.inner.state.lock().cursor.remaining
    }

    /// Whether wrapping behind the playing direction is allowed
    pub fn loop_backward(&self) -> bool {
        self.inner.state.lock().cursor.loop_backward
    }

    /// Number of timeline offsets
    pub fn len(&self) -> usize {
        self.inner.state.lock().timeline.len()
    }

    /// Whether the timeline has no steps
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a marker or offset against the timeline
    pub fn resolve(&self, target: impl Into<Seek>) -> Result<usize> {
        self.inner.state.lock().timeline.resolve(&target.into())
    }

    /// Receiver of playback state changes
    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state.lock().watch.subscribe()
    }

    /// Resolve once playback is idle
    pub async fn finished(&self) {
        let mut state = self.watch_state();
        let _ = state.wait_for(PlaybackState::is_idle).await;
    }
}

impl fmt::Debug for Screenplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Screenplay")
            .field("state", &st.playback)
            .field("offset", &st.cursor.offset)
            .field("direction", &st.cursor.direction)
            .field("remaining", &st.cursor.remaining)
            .field("steps", &st.timeline.len())
            .finish()
    }
}
