//! Weighted variant selection (§4.7 "Variants").

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::value::FlagValue;

/// One named alternative in a flag's variant list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub value: FlagValue,
    /// Non-negative selection weight; weights need not sum to any fixed total.
    pub weight: f64,
}

/// Draws one variant by weighted random selection.
///
/// If the variants are empty, returns `None`. If all weights sum to zero,
/// returns the first variant unconditionally (a degenerate but well-defined
/// choice per §4.7, rather than dividing by zero).
#[must_use]
pub fn select(variants: &[Variant]) -> Option<&Variant> {
    let first = variants.first()?;
    let total: f64 = variants.iter().map(|v| v.weight.max(0.0)).sum();
    if total <= 0.0 {
        return Some(first);
    }

    let draw = rand::rng().random_range(0.0..total);
    let mut running = 0.0;
    for variant in variants {
        running += variant.weight.max(0.0);
        if draw < running {
            return Some(variant);
        }
    }
    // Floating-point edge case: draw landed exactly at `total`.
    variants.last()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variants() -> Vec<Variant> {
        vec![
            Variant {
                name: "control".to_string(),
                value: FlagValue::String("control".to_string()),
                weight: 1.0,
            },
            Variant {
                name: "treatment".to_string(),
                value: FlagValue::String("treatment".to_string()),
                weight: 1.0,
            },
        ]
    }

    #[test]
    fn empty_variants_select_none() {
        assert!(select(&[]).is_none());
    }

    #[test]
    fn zero_total_weight_returns_first() {
        let vs = vec![
            Variant {
                name: "a".to_string(),
                value: FlagValue::Boolean(true),
                weight: 0.0,
            },
            Variant {
                name: "b".to_string(),
                value: FlagValue::Boolean(false),
                weight: 0.0,
            },
        ];
        assert_eq!(select(&vs).unwrap().name, "a");
    }

    #[test]
    fn single_variant_always_selected() {
        let vs = vec![Variant {
            name: "only".to_string(),
            value: FlagValue::Boolean(true),
            weight: 5.0,
        }];
        assert_eq!(select(&vs).unwrap().name, "only");
    }

    #[test]
    fn selection_distributes_across_weighted_variants() {
        let vs = variants();
        let mut counts = std::collections::HashMap::new();
        for _ in 0..1000 {
            let chosen = select(&vs).unwrap();
            *counts.entry(chosen.name.clone()).or_insert(0) += 1;
        }
        assert!(counts.contains_key("control"));
        assert!(counts.contains_key("treatment"));
    }
}
