// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the tiered cache coordinator.

/// Cache lifecycle state.
///
/// Use [`super::TieredCache::state()`] to check the current state or
/// [`super::TieredCache::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, warmer not yet scheduled (reads already work)
    Created,
    /// Warmer scheduled, eviction pool accepting passes
    Running,
    /// Warmer stopping, eviction pool draining
    ShuttingDown,
    /// Background work finished
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Tier that served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Near,
    Distant,
    Backing,
}

impl Tier {
    /// Label used in spans and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Near => "near",
            Self::Distant => "distant",
            Self::Backing => "backing",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Created.to_string(), "Created");
        assert_eq!(EngineState::ShuttingDown.to_string(), "ShuttingDown");
        assert_eq!(EngineState::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_tier_labels() {
        assert_eq!(Tier::Near.as_str(), "near");
        assert_eq!(Tier::Distant.to_string(), "distant");
        assert_eq!(Tier::Backing.to_string(), "backing");
    }
}
