// src/config.rs
//
// Limit policy and limiter configuration
// Explicit settings always override the Auto heuristic

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Concurrency limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Limit {
    /// Cap at an explicit number of slots.
    Max(NonZeroUsize),
    /// Size the cap from available parallelism.
    Auto,
    /// No cap: the limiter becomes a pass-through.
    Unbounded,
}

impl Default for Limit {
    fn default() -> Self {
        Self::Auto
    }
}

impl Limit {
    /// Resolves the policy to a concrete slot count; `None` means
    /// unbounded.
    pub fn resolve(self) -> Option<NonZeroUsize> {
        match self {
            Limit::Max(n) => Some(n),
            Limit::Auto => Some(std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)),
            Limit::Unbounded => None,
        }
    }
}

impl From<usize> for Limit {
    /// Zero means unbounded, anything else an explicit cap.
    fn from(value: usize) -> Self {
        NonZeroUsize::new(value)
            .map(Limit::Max)
            .unwrap_or(Limit::Unbounded)
    }
}

/// Configuration for building a [`Limiter`](crate::Limiter).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Limit policy (default: `Auto`).
    pub limit: Limit,
}

impl LimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limit policy.
    pub fn with_limit(mut self, limit: impl Into<Limit>) -> Self {
        self.limit = limit.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usize_conversion() {
        assert_eq!(Limit::from(0), Limit::Unbounded);
        assert_eq!(Limit::from(3), Limit::Max(NonZeroUsize::new(3).unwrap()));
    }

    #[test]
    fn auto_resolves_to_available_parallelism() {
        let resolved = Limit::Auto.resolve().unwrap();
        assert!(resolved.get() >= 1);
    }

    #[test]
    fn unbounded_resolves_to_none() {
        assert_eq!(Limit::Unbounded.resolve(), None);
        assert_eq!(LimiterConfig::new().with_limit(0).limit, Limit::Unbounded);
    }

    #[test]
    fn default_is_auto() {
        assert_eq!(LimiterConfig::default().limit, Limit::Auto);
    }
}
