//! The targeting matcher (C6): evaluates a [`TargetingMap`] against an
//! [`EvalContext`] (§4.6).
//!
//! Rules split into two families. Gating rules (`date_range`, `ip_address`,
//! `custom_attributes`, `complex_conditions`) must ALL pass before selection
//! is considered; any gating rule present and failing is an immediate
//! `NoMatch`. Selection rules (`user`, `group`, `role`, `tag`,
//! `percentage_users`, `percentage_requests`) are OR'd together: any one
//! matching yields `Match`. A non-empty map that has no selection rule (or
//! has selection rules but none matched) is `NoMatch` -- gating alone never
//! produces a match (§4.6 step 4). An empty map is `NoRules`, distinct from
//! `NoMatch`, so callers can fall back to the flag's global value (rule 3).

use chrono::Utc;

use super::bucketing::{in_percentage_of_requests, in_percentage_of_users};
use super::ip;
use super::map::{ComparisonOperator, ConditionLeaf, LogicalOperator, TargetingMap};
use crate::context::EvalContext;

/// The three-valued result of matching a [`TargetingMap`] against a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// At least one selection rule matched (with all gating rules passing).
    Match,
    /// Rules were present but none matched, or a gating rule failed.
    NoMatch,
    /// The targeting map had no rules at all.
    NoRules,
}

/// Evaluates `map` against `ctx` for a flag named `flag_name` (needed for
/// deterministic `percentage_users` bucketing).
#[must_use]
pub fn evaluate(flag_name: &str, map: &TargetingMap, ctx: &EvalContext) -> MatchOutcome {
    if map.is_empty() {
        return MatchOutcome::NoRules;
    }

    if !gating_passes(flag_name, map, ctx) {
        return MatchOutcome::NoMatch;
    }

    if selection_matches(flag_name, map, ctx).unwrap_or(false) {
        MatchOutcome::Match
    } else {
        MatchOutcome::NoMatch
    }
}

fn gating_passes(flag_name: &str, map: &TargetingMap, ctx: &EvalContext) -> bool {
    if let Some(range) = &map.date_range {
        if !range.is_active(Utc::now()) {
            return false;
        }
    }

    if let Some(cidrs) = &map.ip_address {
        let Some(addr) = ctx.ip_address else {
            return false;
        };
        if !ip::matches_any(addr, cidrs) {
            return false;
        }
    }

    if let Some(rules) = &map.custom_attributes {
        for (attribute, rule) in rules {
            let Some(value) = ctx.custom.get(attribute) else {
                return false;
            };
            if !compare(value.stringify().as_str(), rule.operator, &rule.values_as_strings()) {
                return false;
            }
        }
    }

    if let Some(conditions) = &map.complex_conditions {
        if !evaluate_complex(flag_name, conditions, ctx) {
            return false;
        }
    }

    true
}

/// `None` if the map has no selection rules at all.
fn selection_matches(flag_name: &str, map: &TargetingMap, ctx: &EvalContext) -> Option<bool> {
    let mut has_rule = false;
    let mut matched = false;

    if let Some(users) = &map.user {
        has_rule = true;
        if ctx.user_id.as_deref().is_some_and(|id| users.contains(id)) {
            matched = true;
        }
    }
    if let Some(groups) = &map.group {
        has_rule = true;
        if ctx.group.as_deref().is_some_and(|g| groups.contains(g)) {
            matched = true;
        }
    }
    if let Some(roles) = &map.role {
        has_rule = true;
        if ctx.role.as_deref().is_some_and(|r| roles.contains(r)) {
            matched = true;
        }
    }
    if let Some(tags) = &map.tag {
        has_rule = true;
        if ctx.tags.iter().any(|t| tags.contains(t)) {
            matched = true;
        }
    }
    if let Some(percentage) = map.percentage_users {
        has_rule = true;
        if let Some(user_id) = &ctx.user_id {
            if in_percentage_of_users(flag_name, user_id, percentage) {
                matched = true;
            }
        }
    }
    if let Some(percentage) = map.percentage_requests {
        has_rule = true;
        if in_percentage_of_requests(percentage) {
            matched = true;
        }
    }

    if has_rule {
        Some(matched)
    } else {
        None
    }
}

fn evaluate_complex(flag_name: &str, conditions: &super::map::ComplexConditions, ctx: &EvalContext) -> bool {
    let mut results = conditions.conditions.iter().map(|leaf| evaluate_leaf(flag_name, leaf, ctx));
    match conditions.operator {
        LogicalOperator::And => results.all(|r| r),
        LogicalOperator::Or => results.any(|r| r),
    }
}

fn evaluate_leaf(flag_name: &str, leaf: &ConditionLeaf, ctx: &EvalContext) -> bool {
    match leaf {
        ConditionLeaf::User { values } => ctx.user_id.as_deref().is_some_and(|v| values.contains(v)),
        ConditionLeaf::Group { values } => ctx.group.as_deref().is_some_and(|v| values.contains(v)),
        ConditionLeaf::Role { values } => ctx.role.as_deref().is_some_and(|v| values.contains(v)),
        ConditionLeaf::Tag { values } => ctx.tags.iter().any(|t| values.contains(t)),
        ConditionLeaf::CustomAttribute { attribute, rule } => ctx
            .custom
            .get(attribute)
            .is_some_and(|value| compare(value.stringify().as_str(), rule.operator, &rule.values_as_strings())),
        ConditionLeaf::PercentageUsers { percentage } => ctx
            .user_id
            .as_deref()
            .is_some_and(|user_id| in_percentage_of_users(flag_name, user_id, *percentage)),
        ConditionLeaf::PercentageRequests { percentage } => in_percentage_of_requests(*percentage),
    }
}

fn compare(actual: &str, operator: ComparisonOperator, values: &[String]) -> bool {
    match operator {
        ComparisonOperator::Eq => values.iter().any(|v| v == actual),
        ComparisonOperator::Ne => values.iter().all(|v| v != actual),
        ComparisonOperator::In => values.iter().any(|v| v == actual),
        ComparisonOperator::NotIn => values.iter().all(|v| v != actual),
        ComparisonOperator::Gt => numeric_compare(actual, values, |a, b| a > b),
        ComparisonOperator::Lt => numeric_compare(actual, values, |a, b| a < b),
    }
}

fn numeric_compare(actual: &str, values: &[String], op: impl Fn(f64, f64) -> bool) -> bool {
    let Ok(actual) = actual.parse::<f64>() else {
        return false;
    };
    values
        .iter()
        .filter_map(|v| v.parse::<f64>().ok())
        .any(|v| op(actual, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targeting::map::{CustomAttributeRule, DateRange};
    use crate::value::FlagValue;
    use chrono::Duration;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn empty_map_is_no_rules() {
        let ctx = EvalContext::new();
        assert_eq!(
            evaluate("f", &TargetingMap::default(), &ctx),
            MatchOutcome::NoRules
        );
    }

    #[test]
    fn user_selection_matches() {
        let mut map = TargetingMap::default();
        map.user = Some(HashSet::from(["u1".to_string()]));
        let ctx = EvalContext::new().with_user_id("u1");
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::Match);

        let ctx_other = EvalContext::new().with_user_id("u2");
        assert_eq!(evaluate("f", &map, &ctx_other), MatchOutcome::NoMatch);
    }

    #[test]
    fn gating_rule_blocks_selection() {
        let mut map = TargetingMap::default();
        map.date_range = Some(DateRange {
            start: Some(Utc::now() + Duration::days(1)),
            end: None,
        });
        map.user = Some(HashSet::from(["u1".to_string()]));
        let ctx = EvalContext::new().with_user_id("u1");
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::NoMatch);
    }

    #[test]
    fn gating_only_map_never_matches_even_when_gating_passes() {
        let mut map = TargetingMap::default();
        map.date_range = Some(DateRange {
            start: Some(Utc::now() - Duration::days(1)),
            end: None,
        });
        let ctx = EvalContext::new();
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::NoMatch);
    }

    #[test]
    fn custom_attribute_eq_gates_a_selection_rule() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "plan".to_string(),
            CustomAttributeRule {
                values: vec![FlagValue::String("enterprise".to_string())],
                operator: ComparisonOperator::Eq,
            },
        );
        let mut map = TargetingMap::default();
        map.custom_attributes = Some(attrs);
        map.group = Some(HashSet::from(["beta-testers".to_string()]));

        let ctx = EvalContext::new()
            .with_group("beta-testers")
            .with_custom("plan", FlagValue::String("enterprise".to_string()));
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::Match);

        // gating fails even though the selection rule alone would match.
        let ctx_wrong_plan = EvalContext::new()
            .with_group("beta-testers")
            .with_custom("plan", FlagValue::String("free".to_string()));
        assert_eq!(evaluate("f", &map, &ctx_wrong_plan), MatchOutcome::NoMatch);
    }

    #[test]
    fn custom_attribute_gt_gates_a_selection_rule() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "age".to_string(),
            CustomAttributeRule {
                values: vec![FlagValue::Number(18.0)],
                operator: ComparisonOperator::Gt,
            },
        );
        let mut map = TargetingMap::default();
        map.custom_attributes = Some(attrs);
        map.role = Some(HashSet::from(["member".to_string()]));

        let ctx = EvalContext::new()
            .with_role("member")
            .with_custom("age", FlagValue::Number(21.0));
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::Match);

        let ctx_under = EvalContext::new()
            .with_role("member")
            .with_custom("age", FlagValue::Number(10.0));
        assert_eq!(evaluate("f", &map, &ctx_under), MatchOutcome::NoMatch);
    }

    #[test]
    fn gating_rules_alone_never_match_without_a_selection_rule() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "plan".to_string(),
            CustomAttributeRule {
                values: vec![FlagValue::String("enterprise".to_string())],
                operator: ComparisonOperator::Eq,
            },
        );
        let mut map = TargetingMap::default();
        map.custom_attributes = Some(attrs);
        let ctx = EvalContext::new().with_custom("plan", FlagValue::String("enterprise".to_string()));
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::NoMatch);
    }

    #[test]
    fn missing_custom_attribute_fails_gating() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "plan".to_string(),
            CustomAttributeRule {
                values: vec![FlagValue::String("enterprise".to_string())],
                operator: ComparisonOperator::Eq,
            },
        );
        let mut map = TargetingMap::default();
        map.custom_attributes = Some(attrs);
        let ctx = EvalContext::new();
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::NoMatch);
    }

    #[test]
    fn complex_conditions_or_gates_a_selection_rule() {
        let map = TargetingMap {
            complex_conditions: Some(super::super::map::ComplexConditions {
                operator: LogicalOperator::Or,
                conditions: vec![
                    ConditionLeaf::Role {
                        values: HashSet::from(["admin".to_string()]),
                    },
                    ConditionLeaf::Tag {
                        values: HashSet::from(["beta".to_string()]),
                    },
                ],
            }),
            user: Some(HashSet::from(["u1".to_string()])),
            ..TargetingMap::default()
        };
        let ctx = EvalContext::new().with_user_id("u1").with_tags(["beta"]);
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::Match);

        let ctx_fails_complex = EvalContext::new().with_user_id("u1");
        assert_eq!(evaluate("f", &map, &ctx_fails_complex), MatchOutcome::NoMatch);
    }

    #[test]
    fn complex_conditions_support_percentage_leaf() {
        let map = TargetingMap {
            complex_conditions: Some(super::super::map::ComplexConditions {
                operator: LogicalOperator::Or,
                conditions: vec![
                    ConditionLeaf::Role {
                        values: HashSet::from(["admin".to_string()]),
                    },
                    ConditionLeaf::PercentageUsers { percentage: 100.0 },
                ],
            }),
            user: Some(HashSet::from(["u1".to_string()])),
            ..TargetingMap::default()
        };
        let ctx = EvalContext::new().with_user_id("u1");
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::Match);
    }

    #[test]
    fn ip_gating_requires_context_address() {
        let mut map = TargetingMap::default();
        map.ip_address = Some(HashSet::from(["10.0.0.0/8".to_string()]));
        let ctx = EvalContext::new();
        assert_eq!(evaluate("f", &map, &ctx), MatchOutcome::NoMatch);
    }
}
