// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timeline of steps, waits and markers.
//!
//! A [`Timeline`] is built up front and then moved into a
//! [`Screenplay`](crate::Screenplay). Waits and markers are addressed by
//! offset, so entries can only be appended.

use crate::error::{Result, SequencerError};
use crate::signal::Completion;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A step callable. It receives the [`Completion`] it must eventually settle.
pub type StepFn = Arc<dyn Fn(Completion) + Send + Sync>;

/// What occupies one timeline offset
#[derive(Clone)]
pub enum Step {
    /// A single callable
    Single(StepFn),
    /// Callables dispatched together; the offset completes when all of them do
    Parallel(Vec<StepFn>),
}

impl Step {
    /// Callables dispatched for this offset
    pub fn members(&self) -> &[StepFn] {
        match self {
            Step::Single(step) => std::slice::from_ref(step),
            Step::Parallel(steps) => steps,
        }
    }

    /// Number of callables the offset waits for
    pub fn group_size(&self) -> usize {
        self.members().len()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Single(_) => f.write_str("Single"),
            Step::Parallel(steps) => write!(f, "Parallel({})", steps.len()),
        }
    }
}

/// A step with its post-completion wait
#[derive(Debug, Clone)]
struct Entry {
    step: Step,
    wait: Option<Duration>,
}

/// Target of a seek: a marker name or a raw offset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Seek {
    /// Named marker
    Marker(String),
    /// Timeline offset
    Offset(usize),
}

impl From<&str> for Seek {
    fn from(name: &str) -> Self {
        Seek::Marker(name.to_string())
    }
}

impl From<String> for Seek {
    fn from(name: String) -> Self {
        Seek::Marker(name)
    }
}

impl From<usize> for Seek {
    fn from(offset: usize) -> Self {
        Seek::Offset(offset)
    }
}

/// Ordered, append-only list of steps
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<Entry>,
    /// Marker name to the offset it was bound at
    markers: IndexMap<String, usize>,
}

impl Timeline {
    /// Create an empty timeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn step<F>(&mut self, step: F) -> &mut Self
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.push(Step::Single(Arc::new(step)), 1)
    }

    /// Append the same step `repeat` times, each at its own offset
    pub fn step_repeated<F>(&mut self, step: F, repeat: usize) -> &mut Self
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.push(Step::Single(Arc::new(step)), repeat)
    }

    /// Append a parallel group at a single offset
    pub fn parallel(&mut self, steps: Vec<StepFn>) -> &mut Self {
        self.push(Step::Parallel(steps), 1)
    }

    /// Append an already-built [`Step`] `repeat` times
    pub fn push(&mut self, step: Step, repeat: usize) -> &mut Self {
        for _ in 0..repeat {
            self.entries.push(Entry {
                step: step.clone(),
                wait: None,
            });
        }
        self
    }

    /// Append the most recent step `repeat` more times
    pub fn repeat(&mut self, repeat: usize) -> &mut Self {
        match self.entries.last() {
            Some(last) => {
                let step = last.step.clone();
                self.push(step, repeat)
            }
            None => {
                tracing::warn!("repeat() on an empty timeline ignored");
                self
            }
        }
    }

    /// Hold for `duration` after the most recent step completes
    pub fn wait(&mut self, duration: Duration) -> &mut Self {
        match self.entries.last_mut() {
            Some(last) => last.wait = Some(duration),
            None => tracing::warn!("wait() on an empty timeline ignored"),
        }
        self
    }

    /// Bind `name` to the offset the next appended step will occupy
    pub fn mark(&mut self, name: impl Into<String>) -> &mut Self {
        self.markers.insert(name.into(), self.entries.len());
        self
    }

    /// Resolve a marker or offset
    pub fn resolve(&self, target: &Seek) -> Result<usize> {
        match target {
            Seek::Marker(name) => self
                .markers
                .get(name)
                .copied()
                .ok_or_else(|| SequencerError::UnknownMarker(name.clone())),
            Seek::Offset(offset) if *offset < self.entries.len() => Ok(*offset),
            Seek::Offset(offset) => Err(SequencerError::OffsetOutOfRange {
                offset: *offset,
                len: self.entries.len(),
            }),
        }
    }

    /// Step at an offset
    pub fn get(&self, offset: usize) -> Option<&Step> {
        self.entries.get(offset).map(|e| &e.step)
    }

    /// Wait configured after the step at an offset
    pub fn wait_at(&self, offset: usize) -> Option<Duration> {
        self.entries.get(offset).and_then(|e| e.wait)
    }

    /// Fan-out of the step at an offset
    pub fn group_size(&self, offset: usize) -> Option<usize> {
        self.get(offset).map(Step::group_size)
    }

    /// Markers in binding order
    pub fn markers(&self) -> impl Iterator<Item = (&str, usize)> {
        self.markers.iter().map(|(name, offset)| (name.as_str(), *offset))
    }

    /// Number of offsets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no step was appended
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
