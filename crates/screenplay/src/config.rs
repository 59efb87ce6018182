// SPDX-License-Identifier: MIT OR Apache-2.0
//! Playback configuration.
//!
//! Stored as RON, e.g.:
//!
//! ```ron
//! (async: false, direction: -1, loops: "infinite", loop_backward: true)
//! ```

use crate::error::Result;
use crate::playback::{Direction, Loops};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings recognized at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenplayConfig {
    /// Dispatch each step on the next scheduling turn instead of inline
    #[serde(alias = "async")]
    pub deferred: bool,
    /// Initial direction
    pub direction: Direction,
    /// Passes over the timeline
    pub loops: Loops,
    /// Also wrap at the boundary behind the playing direction
    pub loop_backward: bool,
}

impl Default for ScreenplayConfig {
    fn default() -> Self {
        Self {
            deferred: true,
            direction: Direction::Forward,
            loops: Loops::Finite(1),
            loop_backward: false,
        }
    }
}

impl ScreenplayConfig {
    /// Inline dispatch; every synchronous step runs within the triggering call
    pub fn inline() -> Self {
        Self {
            deferred: false,
            ..Self::default()
        }
    }

    /// Parse from a RON string
    pub fn from_ron(source: &str) -> Result<Self> {
        Ok(ron::from_str(source)?)
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_ron(&content)?;
        tracing::debug!("Loaded playback config from {:?}", path);
        Ok(config)
    }

    /// Serialize to pretty RON
    pub fn to_ron(&self) -> std::result::Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SequencerError;

    #[test]
    fn test_defaults() {
        let config = ScreenplayConfig::default();
        assert!(config.deferred);
        assert_eq!(config.direction, Direction::Forward);
        assert_eq!(config.loops, Loops::Finite(1));
        assert!(!config.loop_backward);
    }

    #[test]
    fn test_parse_with_async_key() {
        let config = ScreenplayConfig::from_ron(
            r#"(async: false, direction: -1, loops: "infinite", loop_backward: true)"#,
        )
        .unwrap();

        assert!(!config.deferred);
        assert_eq!(config.direction, Direction::Backward);
        assert_eq!(config.loops, Loops::Infinite);
        assert!(config.loop_backward);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = ScreenplayConfig::from_ron("(loops: 3)").unwrap();
        assert!(config.deferred);
        assert_eq!(config.loops, Loops::Finite(3));
    }

    #[test]
    fn test_invalid_direction_rejected() {
        let err = ScreenplayConfig::from_ron("(direction: 2)").unwrap_err();
        assert!(matches!(err, SequencerError::Config(_)));
    }

    #[test]
    fn test_serialization() {
        let config = ScreenplayConfig {
            loops: Loops::Infinite,
            ..ScreenplayConfig::inline()
        };
        let ron_str = config.to_ron().unwrap();
        let loaded = ScreenplayConfig::from_ron(&ron_str).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ScreenplayConfig::load(Path::new("/nonexistent/screenplay.ron")).unwrap_err();
        assert!(matches!(err, SequencerError::Io(_)));
    }
}
