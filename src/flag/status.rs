//! Flag lifecycle status.

use serde::{Deserialize, Serialize};

/// Where a flag sits in its lifecycle (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Active,
    /// Always evaluates `false`/off regardless of value or targeting (P4).
    Inactive,
    /// Evaluates normally but emits a deprecation signal unless the caller
    /// opts in via `ctx.allow_deprecated`.
    Deprecated,
}

impl FlagStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FlagStatus::Active => "active",
            FlagStatus::Inactive => "inactive",
            FlagStatus::Deprecated => "deprecated",
        }
    }
}

impl Default for FlagStatus {
    fn default() -> Self {
        FlagStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_active() {
        assert_eq!(FlagStatus::default(), FlagStatus::Active);
    }

    #[test]
    fn as_str_matches_wire_names() {
        assert_eq!(FlagStatus::Active.as_str(), "active");
        assert_eq!(FlagStatus::Inactive.as_str(), "inactive");
        assert_eq!(FlagStatus::Deprecated.as_str(), "deprecated");
    }
}
