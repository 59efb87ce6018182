// SPDX-License-Identifier: MIT OR Apache-2.0
//! Playback cursor, direction and loop bookkeeping.
//!
//! The cursor never rests outside the timeline: every move goes through
//! [`Cursor::resolve`], which either lands on an offset, wraps across a
//! boundary (consuming or restoring a loop) or reports that playback is over.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Never started, or stopped
    #[default]
    Idle,
    /// Advancing through the timeline
    Running,
    /// Cursor frozen; manual scrubbing still dispatches
    Paused,
}

impl PlaybackState {
    /// Check if playback is idle
    pub fn is_idle(&self) -> bool {
        matches!(self, PlaybackState::Idle)
    }

    /// Check if playback is advancing
    pub fn is_running(&self) -> bool {
        matches!(self, PlaybackState::Running)
    }

    /// Check if playback is paused
    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Paused)
    }
}

/// Direction the cursor moves on each advancement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Direction {
    /// Towards higher offsets (`1`)
    #[default]
    Forward,
    /// Towards lower offsets (`-1`)
    Backward,
}

impl Direction {
    /// Signed step applied to the cursor
    pub fn step(self) -> isize {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }

    /// The opposite direction
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

impl TryFrom<i8> for Direction {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::Forward),
            -1 => Ok(Direction::Backward),
            other => Err(format!("direction must be 1 or -1, got {other}")),
        }
    }
}

impl From<Direction> for i8 {
    fn from(direction: Direction) -> Self {
        direction.step() as i8
    }
}

/// Number of passes over the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LoopsRepr", into = "LoopsRepr")]
pub enum Loops {
    /// Play this many passes
    Finite(u32),
    /// Play until stopped
    Infinite,
}

impl Default for Loops {
    fn default() -> Self {
        Loops::Finite(1)
    }
}

impl Loops {
    /// One pass spent by crossing a boundary in the playing direction
    fn consume(self) -> Self {
        match self {
            Loops::Finite(n) => Loops::Finite(n.saturating_sub(1)),
            Loops::Infinite => Loops::Infinite,
        }
    }

    /// One pass given back by crossing a boundary against the playing direction
    fn restore(self) -> Self {
        match self {
            Loops::Finite(n) => Loops::Finite(n.saturating_add(1)),
            Loops::Infinite => Loops::Infinite,
        }
    }

    /// Whether no pass is left, or the cursor rewound before the first pass
    fn is_spent(self, configured: Loops) -> bool {
        match (self, configured) {
            (Loops::Finite(0), _) => true,
            (Loops::Finite(remaining), Loops::Finite(configured)) => remaining > configured,
            _ => false,
        }
    }
}

impl fmt::Display for Loops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loops::Finite(n) => write!(f, "{n}"),
            Loops::Infinite => f.write_str("infinite"),
        }
    }
}

/// Wire form of [`Loops`]: a count or the keyword `"infinite"`
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LoopsRepr {
    Count(u32),
    Keyword(String),
}

impl TryFrom<LoopsRepr> for Loops {
    type Error = String;

    fn try_from(repr: LoopsRepr) -> Result<Self, Self::Error> {
        match repr {
            LoopsRepr::Count(n) => Ok(Loops::Finite(n)),
            LoopsRepr::Keyword(word) if word == "infinite" => Ok(Loops::Infinite),
            LoopsRepr::Keyword(word) => Err(format!("expected a loop count or \"infinite\", got {word:?}")),
        }
    }
}

impl From<Loops> for LoopsRepr {
    fn from(loops: Loops) -> Self {
        match loops {
            Loops::Finite(n) => LoopsRepr::Count(n),
            Loops::Infinite => LoopsRepr::Keyword("infinite".to_string()),
        }
    }
}

/// Where a requested cursor move ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Boundary {
    /// Target is inside the timeline
    Within(usize),
    /// Target crossed a boundary and wrapped to this offset
    Wrapped(usize),
    /// Playback has no pass left (or may not wrap here)
    Exhausted,
}

/// Playback cursor
#[derive(Debug, Clone)]
pub(crate) struct Cursor {
    /// Offset of the step currently (or last) dispatched
    pub offset: Option<usize>,
    /// Offset requested by `goto` before playback started
    pub pending_start: Option<usize>,
    /// Current direction
    pub direction: Direction,
    /// Loop count set by configuration or `play`
    pub configured: Loops,
    /// Passes left
    pub remaining: Loops,
    /// Whether the boundary behind the playing direction may wrap too
    pub loop_backward: bool,
}

impl Cursor {
    pub fn new(direction: Direction, loops: Loops, loop_backward: bool) -> Self {
        Self {
            offset: None,
            pending_start: None,
            direction,
            configured: loops,
            remaining: loops,
            loop_backward,
        }
    }

    pub fn set_loops(&mut self, loops: Loops) {
        self.configured = loops;
        self.remaining = loops;
    }

    /// Forget position and refill the loop counter
    pub fn reset(&mut self) {
        self.offset = None;
        self.pending_start = None;
        self.remaining = self.configured;
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_spent(self.configured)
    }

    /// Boundary offset playback starts from in the current direction
    pub fn start_target(&self, len: usize) -> isize {
        match self.direction {
            Direction::Forward => 0,
            Direction::Backward => len as isize - 1,
        }
    }

    /// Offset `n` steps away from the current one, along the direction
    pub fn relative_target(&self, n: isize) -> Option<isize> {
        self.offset
            .map(|offset| (offset as isize).saturating_add(n.saturating_mul(self.direction.step())))
    }

    /// Apply the boundary rule to a requested target offset
    pub fn resolve(&mut self, target: isize, len: usize) -> Boundary {
        if len == 0 {
            return Boundary::Exhausted;
        }

        let last = len as isize - 1;
        let (wrapped, with_direction) = if target < 0 {
            match (self.direction, self.loop_backward) {
                (Direction::Backward, _) => (last, true),
                (Direction::Forward, true) => (last, false),
                (Direction::Forward, false) => return Boundary::Exhausted,
            }
        } else if target > last {
            match (self.direction, self.loop_backward) {
                (Direction::Forward, _) => (0, true),
                (Direction::Backward, true) => (0, false),
                (Direction::Backward, false) => return Boundary::Exhausted,
            }
        } else {
            return Boundary::Within(target as usize);
        };

        self.remaining = if with_direction {
            self.remaining.consume()
        } else {
            self.remaining.restore()
        };

        if self.is_exhausted() {
            Boundary::Exhausted
        } else {
            Boundary::Wrapped(wrapped as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_wraps_until_loops_spent() {
        let mut cursor = Cursor::new(Direction::Forward, Loops::Finite(2), false);

        assert_eq!(cursor.resolve(2, 3), Boundary::Within(2));
        assert_eq!(cursor.resolve(3, 3), Boundary::Wrapped(0));
        assert_eq!(cursor.remaining, Loops::Finite(1));
        assert_eq!(cursor.resolve(3, 3), Boundary::Exhausted);
    }

    #[test]
    fn test_backward_wraps_at_start() {
        let mut cursor = Cursor::new(Direction::Backward, Loops::Finite(2), false);

        assert_eq!(cursor.start_target(3), 2);
        assert_eq!(cursor.resolve(-1, 3), Boundary::Wrapped(2));
        assert_eq!(cursor.resolve(-1, 3), Boundary::Exhausted);
    }

    #[test]
    fn test_forward_below_start_needs_loop_backward() {
        let mut cursor = Cursor::new(Direction::Forward, Loops::Infinite, false);
        assert_eq!(cursor.resolve(-1, 3), Boundary::Exhausted);

        cursor.loop_backward = true;
        assert_eq!(cursor.resolve(-1, 3), Boundary::Wrapped(2));
        assert_eq!(cursor.remaining, Loops::Infinite);
    }

    #[test]
    fn test_rewinding_past_first_pass_stops() {
        let mut cursor = Cursor::new(Direction::Forward, Loops::Finite(3), true);

        // Second pass, then back across the start into the first pass
        assert_eq!(cursor.resolve(3, 3), Boundary::Wrapped(0));
        assert_eq!(cursor.resolve(-1, 3), Boundary::Wrapped(2));
        assert_eq!(cursor.remaining, Loops::Finite(3));

        // Back across the start again would be before the first pass
        assert_eq!(cursor.resolve(-1, 3), Boundary::Exhausted);
    }

    #[test]
    fn test_backward_past_end_with_loop_backward() {
        let mut cursor = Cursor::new(Direction::Backward, Loops::Finite(2), true);

        assert_eq!(cursor.resolve(-1, 3), Boundary::Wrapped(2));
        assert_eq!(cursor.resolve(3, 3), Boundary::Wrapped(0));
        assert_eq!(cursor.remaining, Loops::Finite(2));
    }

    #[test]
    fn test_empty_timeline_is_exhausted() {
        let mut cursor = Cursor::new(Direction::Forward, Loops::Infinite, true);
        assert_eq!(cursor.resolve(0, 0), Boundary::Exhausted);
    }

    #[test]
    fn test_zero_loops_is_exhausted() {
        let cursor = Cursor::new(Direction::Forward, Loops::Finite(0), false);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_relative_target_follows_direction() {
        let mut cursor = Cursor::new(Direction::Backward, Loops::Finite(1), false);
        assert_eq!(cursor.relative_target(1), None);

        cursor.offset = Some(2);
        assert_eq!(cursor.relative_target(1), Some(1));
        assert_eq!(cursor.relative_target(-2), Some(4));
    }

    #[test]
    fn test_relative_target_saturates() {
        let mut cursor = Cursor::new(Direction::Backward, Loops::Finite(1), false);
        cursor.offset = Some(2);

        assert_eq!(cursor.relative_target(isize::MIN), Some(isize::MAX));
        assert_eq!(cursor.relative_target(isize::MAX), Some(2 - isize::MAX));
        assert_eq!(cursor.resolve(isize::MAX, 3), Boundary::Exhausted);
    }

    #[test]
    fn test_direction_conversion() {
        assert_eq!(Direction::try_from(-1), Ok(Direction::Backward));
        assert!(Direction::try_from(0).is_err());
        assert_eq!(i8::from(Direction::Forward), 1);
        assert_eq!(Direction::Forward.reversed(), Direction::Backward);
    }
}
