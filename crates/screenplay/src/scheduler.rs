// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deferred work: next-turn dispatch, awaitable drivers and the wait timer.

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Where deferred work runs
///
/// Uses the tokio runtime captured at construction. Without one, work runs on
/// a short-lived thread driven by `futures::executor`.
#[derive(Debug, Clone)]
pub(crate) struct Runtime {
    handle: Option<Handle>,
}

impl Runtime {
    /// Capture the ambient tokio runtime, if any
    pub fn detect() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle: Some(handle) }
    }

    /// Run a future to completion in the background
    pub fn spawn<F>(&self, future: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.handle {
            Some(handle) => Some(handle.spawn(future)),
            None => {
                std::thread::spawn(move || futures::executor::block_on(future));
                None
            }
        }
    }

    /// Run `task` after `delay`
    pub fn delay<F>(&self, delay: Duration, task: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.handle {
            Some(handle) => Some(handle.spawn(async move {
                tokio::time::sleep(delay).await;
                task();
            })),
            None => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    task();
                });
                None
            }
        }
    }
}

/// The single pending wait-delay timer
///
/// Arming replaces (and aborts) whatever was pending. A timer only counts if
/// its ticket is still the armed one when it fires.
#[derive(Debug, Default)]
pub(crate) struct DelaySlot {
    armed: Option<(u64, Option<JoinHandle<()>>)>,
    next_ticket: u64,
}

impl DelaySlot {
    /// Reserve a ticket for a new timer, cancelling any pending one
    pub fn reserve(&mut self) -> u64 {
        self.cancel();
        self.next_ticket += 1;
        self.armed = Some((self.next_ticket, None));
        self.next_ticket
    }

    /// Attach the task driving the timer for `ticket`
    pub fn attach(&mut self, ticket: u64, task: Option<JoinHandle<()>>) {
        match &mut self.armed {
            Some((armed, slot)) if *armed == ticket => *slot = task,
            _ => {
                if let Some(task) = task {
                    task.abort();
                }
            }
        }
    }

    /// Release the slot if `ticket` is the armed timer
    pub fn fire(&mut self, ticket: u64) -> bool {
        match &self.armed {
            Some((armed, _)) if *armed == ticket => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel the pending timer; returns whether one was pending
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((_, task)) => {
                if let Some(task) = task {
                    task.abort();
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_rearming_invalidates_previous_ticket() {
        let mut slot = DelaySlot::default();
        let first = slot.reserve();
        let second = slot.reserve();

        assert!(!slot.fire(first));
        assert!(slot.fire(second));
        assert!(!slot.cancel());
    }

    #[test]
    fn test_cancel_reports_pending() {
        let mut slot = DelaySlot::default();
        assert!(!slot.cancel());

        let ticket = slot.reserve();
        assert!(slot.cancel());
        assert!(!slot.fire(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_timer_task() {
        let runtime = Runtime::detect();
        let fired = Arc::new(AtomicBool::new(false));
        let mut slot = DelaySlot::default();

        let ticket = slot.reserve();
        let flag = fired.clone();
        let task = runtime.delay(Duration::from_millis(50), move || flag.store(true, Ordering::SeqCst));
        slot.attach(ticket, task);
        slot.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_without_runtime_uses_thread() {
        let runtime = Runtime { handle: None };
        let (tx, rx) = std::sync::mpsc::channel();

        assert!(runtime.spawn(async move { tx.send(1).unwrap() }).is_none());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }
}
