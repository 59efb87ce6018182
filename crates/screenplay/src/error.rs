// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for the sequencer.

use thiserror::Error;

/// Errors surfaced by timeline and playback operations
#[derive(Debug, Error)]
pub enum SequencerError {
    /// No marker is bound under this name
    #[error("Unknown marker: {0}")]
    UnknownMarker(String),

    /// Offset does not address a step in the timeline
    #[error("Offset {offset} is out of range for a timeline of {len} steps")]
    OffsetOutOfRange {
        /// Requested offset
        offset: usize,
        /// Timeline length
        len: usize,
    },

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] ron::error::SpannedError),

    /// IO error while reading configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sequencer operations
pub type Result<T> = std::result::Result<T, SequencerError>;
