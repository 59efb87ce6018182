// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concurrency ledger for the dispatch in flight.
//!
//! Each dispatch opens the ledger with its fan-out and a fresh generation.
//! Settlements tagged with an older generation, or arriving after the count
//! already reached zero, are ignored.

use std::sync::{Arc, Weak};

/// Result of applying one settlement to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SettleOutcome {
    /// Accepted; other entries are still outstanding
    Pending,
    /// Accepted; this was the last outstanding entry
    GroupComplete,
    /// Settled more often than the dispatch fanned out
    Redundant,
    /// Belongs to a dispatch that was already abandoned
    Stale,
}

/// Teardown run when a dispatch is abandoned before its work settled
pub(crate) type Cleanup = Box<dyn FnOnce() + Send>;

/// Outstanding-work counter for one dispatch
#[derive(Default)]
pub(crate) struct Ledger {
    generation: u64,
    outstanding: usize,
    open: bool,
    cleanups: Vec<Cleanup>,
}

impl Ledger {
    /// Start tracking `group_size` entries for the dispatch `generation`
    pub fn open(&mut self, generation: u64, group_size: usize) {
        self.generation = generation;
        self.outstanding = group_size;
        self.open = true;
    }

    /// Drop the current dispatch; anything still settling becomes stale.
    /// Returns the cleanups registered for it.
    pub fn discard(&mut self) -> Vec<Cleanup> {
        self.open = false;
        self.outstanding = 0;
        std::mem::take(&mut self.cleanups)
    }

    /// Keep `cleanup` until the dispatch `generation` is discarded.
    /// Hands it back if that dispatch is no longer open.
    pub fn retain(&mut self, generation: u64, cleanup: Cleanup) -> Option<Cleanup> {
        if !self.open || self.generation != generation {
            return Some(cleanup);
        }
        self.cleanups.push(cleanup);
        None
    }

    fn check(&self, generation: u64) -> Option<SettleOutcome> {
        if !self.open || self.generation != generation {
            Some(SettleOutcome::Stale)
        } else if self.outstanding == 0 {
            Some(SettleOutcome::Redundant)
        } else {
            None
        }
    }

    /// Count one entry as done
    pub fn settle(&mut self, generation: u64) -> SettleOutcome {
        if let Some(ignored) = self.check(generation) {
            return ignored;
        }

        self.outstanding -= 1;
        if self.outstanding == 0 {
            SettleOutcome::GroupComplete
        } else {
            SettleOutcome::Pending
        }
    }

    /// Replace one outstanding entry by `extra + 1` entries
    pub fn expand(&mut self, generation: u64, extra: usize) -> SettleOutcome {
        if let Some(ignored) = self.check(generation) {
            return ignored;
        }

        self.outstanding += extra;
        SettleOutcome::Pending
    }
}

/// Receiver of settlements, implemented by the engine
pub(crate) trait SettleSink: Send + Sync {
    /// One entry of dispatch `generation` finished
    fn settle(self: Arc<Self>, generation: u64);

    /// One entry of dispatch `generation` split into `extra + 1` entries
    fn expand(self: Arc<Self>, generation: u64, extra: usize);

    /// Run `cleanup` once dispatch `generation` is abandoned
    fn on_abandon(self: Arc<Self>, generation: u64, cleanup: Cleanup);
}

/// Handle that settles one ledger entry of a specific dispatch
#[derive(Clone)]
pub(crate) struct Settler {
    sink: Weak<dyn SettleSink>,
    generation: u64,
}

impl Settler {
    pub fn new(sink: Weak<dyn SettleSink>, generation: u64) -> Self {
        Self { sink, generation }
    }

    pub fn settle(&self) {
        match self.sink.upgrade() {
            Some(sink) => sink.settle(self.generation),
            None => tracing::trace!(generation = self.generation, "Settlement after engine drop ignored"),
        }
    }

    pub fn expand(&self, extra: usize) {
        if extra == 0 {
            return;
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.expand(self.generation, extra);
        }
    }

    /// Register teardown for work that may outlive this dispatch
    pub fn on_abandon(&self, cleanup: Cleanup) {
        match self.sink.upgrade() {
            Some(sink) => sink.on_abandon(self.generation, cleanup),
            None => cleanup(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_group_completes_once() {
        let mut ledger = Ledger::default();
        ledger.open(1, 3);

        assert_eq!(ledger.settle(1), SettleOutcome::Pending);
        assert_eq!(ledger.settle(1), SettleOutcome::Pending);
        assert_eq!(ledger.settle(1), SettleOutcome::GroupComplete);
        assert_eq!(ledger.settle(1), SettleOutcome::Redundant);
    }

    #[test]
    fn test_stale_generation_ignored() {
        let mut ledger = Ledger::default();
        ledger.open(1, 1);
        ledger.open(2, 1);

        assert_eq!(ledger.settle(1), SettleOutcome::Stale);
        assert_eq!(ledger.settle(2), SettleOutcome::GroupComplete);
    }

    #[test]
    fn test_discarded_ledger_is_stale() {
        let mut ledger = Ledger::default();
        ledger.open(4, 2);
        ledger.discard();

        assert_eq!(ledger.settle(4), SettleOutcome::Stale);
        assert_eq!(ledger.expand(4, 1), SettleOutcome::Stale);
    }

    #[test]
    fn test_expand_holds_group_open() {
        let mut ledger = Ledger::default();
        ledger.open(1, 1);

        assert_eq!(ledger.expand(1, 2), SettleOutcome::Pending);
        assert_eq!(ledger.settle(1), SettleOutcome::Pending);
        assert_eq!(ledger.settle(1), SettleOutcome::Pending);
        assert_eq!(ledger.settle(1), SettleOutcome::GroupComplete);
    }

    #[derive(Default)]
    struct Recorder {
        settled: Mutex<Vec<u64>>,
    }

    impl SettleSink for Recorder {
        fn settle(self: Arc<Self>, generation: u64) {
            self.settled.lock().push(generation);
        }

        fn expand(self: Arc<Self>, _generation: u64, _extra: usize) {}

        fn on_abandon(self: Arc<Self>, _generation: u64, cleanup: Cleanup) {
            cleanup();
        }
    }

    #[test]
    fn test_settler_reaches_sink_while_alive() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn SettleSink> = recorder.clone();
        let settler = Settler::new(Arc::downgrade(&sink), 7);

        settler.settle();
        assert_eq!(*recorder.settled.lock(), vec![7]);

        drop(sink);
        drop(recorder);
        settler.settle();
    }

    #[test]
    fn test_cleanups_returned_on_discard() {
        let ran = Arc::new(Mutex::new(0));
        let mut ledger = Ledger::default();
        ledger.open(3, 1);

        let counter = ran.clone();
        assert!(ledger.retain(3, Box::new(move || *counter.lock() += 1)).is_none());
        // Not the open dispatch: handed straight back
        assert!(ledger.retain(2, Box::new(|| {})).is_some());

        for cleanup in ledger.discard() {
            cleanup();
        }
        assert_eq!(*ran.lock(), 1);
        assert!(ledger.discard().is_empty());
        assert!(ledger.retain(3, Box::new(|| {})).is_some());
    }

    #[test]
    fn test_abandon_after_engine_drop_runs_cleanup() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn SettleSink> = recorder.clone();
        let settler = Settler::new(Arc::downgrade(&sink), 1);
        drop(sink);
        drop(recorder);

        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        settler.on_abandon(Box::new(move || *flag.lock() = true));
        assert!(*ran.lock());
    }
}
