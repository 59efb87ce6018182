// SPDX-License-Identifier: MIT OR Apache-2.0
//! Step sequencer for timed playback.
//!
//! This crate plays an ordered timeline of steps:
//! - Single steps and parallel groups
//! - Named markers for seeking
//! - Per-offset wait delays
//! - Finite or infinite looping in either direction
//! - Lifecycle observers and a finalizer
//!
//! ## Architecture
//!
//! A step receives a [`Completion`] and settles it directly, or hands it
//! event sources and futures to wait on. The [`Screenplay`] engine counts
//! outstanding work per dispatch and advances once the whole group settled
//! and the wait elapsed. Deferred work runs on the tokio runtime.

pub mod config;
pub mod engine;
pub mod error;
mod ledger;
pub mod notifier;
pub mod playback;
mod scheduler;
pub mod signal;
pub mod timeline;

pub use config::ScreenplayConfig;
pub use engine::Screenplay;
pub use error::{Result, SequencerError};
pub use notifier::{LifecycleEvent, Notifier, Observer, ObserverId};
pub use playback::{Direction, Loops, PlaybackState};
pub use signal::{Awaitable, Completion, CompletionEvent, EventSource, Listener, ListenerId, Signal};
pub use timeline::{Seek, Step, StepFn, Timeline};
