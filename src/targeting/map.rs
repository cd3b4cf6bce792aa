//! The Targeting Map: a mapping from targeting kind to its operand (§3).
//!
//! Modeled as a flat struct of optional rules rather than a generic
//! `HashMap<Kind, Operand>` -- each kind has a distinct, statically known
//! shape, so a struct gives the matcher exhaustive, typed access instead of
//! runtime downcasting.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::FlagValue;

/// Structured targeting rules for a flag. An empty `TargetingMap` means "no
/// filter; evaluate the global value" (§4.6 rule 3, `NO_RULES`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetingMap {
    pub user: Option<HashSet<String>>,
    pub group: Option<HashSet<String>>,
    pub role: Option<HashSet<String>>,
    pub tag: Option<HashSet<String>>,
    /// Float in (0, 100].
    pub percentage_users: Option<f64>,
    /// Float in (0, 100].
    pub percentage_requests: Option<f64>,
    pub date_range: Option<DateRange>,
    pub ip_address: Option<HashSet<String>>,
    pub custom_attributes: Option<HashMap<String, CustomAttributeRule>>,
    pub complex_conditions: Option<ComplexConditions>,
}

impl TargetingMap {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user.is_none()
            && self.group.is_none()
            && self.role.is_none()
            && self.tag.is_none()
            && self.percentage_users.is_none()
            && self.percentage_requests.is_none()
            && self.date_range.is_none()
            && self.ip_address.is_none()
            && self.custom_attributes.is_none()
            && self.complex_conditions.is_none()
    }

    /// Clears all rules, used by `disable()` per I2.
    pub fn clear(&mut self) {
        *self = TargetingMap::default();
    }
}

/// An RFC-3339 timestamp window. Active iff `start <= now < end` (`end` is
/// exclusive; an unset bound means unbounded on that side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let after_start = self.start.is_none_or(|start| now >= start);
        let before_end = self.end.is_none_or(|end| now < end);
        after_start && before_end
    }
}

/// Operator for a single custom-attribute predicate (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    In,
    NotIn,
    Gt,
    Lt,
}

/// A single `custom_attributes` predicate: attribute -> {values, operator}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomAttributeRule {
    pub values: Vec<FlagValue>,
    pub operator: ComparisonOperator,
}

impl CustomAttributeRule {
    /// Stringified operands, for comparison against a stringified context value.
    #[must_use]
    pub fn values_as_strings(&self) -> Vec<String> {
        self.values.iter().map(FlagValue::stringify).collect()
    }
}

/// Logical combinator for `complex_conditions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    And,
    Or,
}

/// `{operator, conditions: [{type, params}...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexConditions {
    pub operator: LogicalOperator,
    pub conditions: Vec<ConditionLeaf>,
}

/// A single leaf condition; mirrors a selection rule (§4.6: "each leaf
/// mirrors a selection rule").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionLeaf {
    User { values: HashSet<String> },
    Group { values: HashSet<String> },
    Role { values: HashSet<String> },
    Tag { values: HashSet<String> },
    CustomAttribute {
        attribute: String,
        rule: CustomAttributeRule,
    },
    PercentageUsers { percentage: f64 },
    PercentageRequests { percentage: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn empty_targeting_map_is_empty() {
        assert!(TargetingMap::default().is_empty());
    }

    #[test]
    fn non_empty_targeting_map_is_not_empty() {
        let mut map = TargetingMap::default();
        map.percentage_users = Some(50.0);
        assert!(!map.is_empty());
    }

    #[test]
    fn clear_resets_to_default() {
        let mut map = TargetingMap::default();
        map.role = Some(HashSet::from(["admin".to_string()]));
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn date_range_active_window() {
        let now = Utc::now();
        let range = DateRange {
            start: Some(now - Duration::hours(1)),
            end: Some(now + Duration::hours(1)),
        };
        assert!(range.is_active(now));
        assert!(!range.is_active(now - Duration::hours(2)));
        assert!(!range.is_active(now + Duration::hours(2)));
    }

    #[test]
    fn date_range_unbounded_sides() {
        let now = Utc::now();
        let only_start = DateRange {
            start: Some(now - Duration::hours(1)),
            end: None,
        };
        assert!(only_start.is_active(now + Duration::days(100)));

        let only_end = DateRange {
            start: None,
            end: Some(now + Duration::hours(1)),
        };
        assert!(only_end.is_active(now - Duration::days(100)));
    }
}
