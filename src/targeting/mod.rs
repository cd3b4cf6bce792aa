//! Targeting rules and the matcher that evaluates them against a context.

pub mod bucketing;
pub mod ip;
pub mod map;
pub mod matcher;

pub use map::{
    ComparisonOperator, ComplexConditions, ConditionLeaf, CustomAttributeRule, DateRange,
    LogicalOperator, TargetingMap,
};
pub use matcher::{evaluate, MatchOutcome};
