//! Flag type/value domain and the type-binding invariant (I1).

use serde::{Deserialize, Serialize};

use crate::error::{FlagTypeError, FlagValueError};

/// The immutable declared type of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Boolean,
    String,
    Number,
}

impl FlagType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FlagType::Boolean => "boolean",
            FlagType::String => "string",
            FlagType::Number => "number",
        }
    }

    /// Parses a type name, as would be supplied by the registration API.
    ///
    /// # Errors
    /// Returns `FlagTypeError` for any name other than `boolean`/`string`/`number`.
    pub fn parse(name: &str) -> Result<Self, FlagTypeError> {
        match name {
            "boolean" => Ok(FlagType::Boolean),
            "string" => Ok(FlagType::String),
            "number" => Ok(FlagType::Number),
            other => Err(FlagTypeError(other.to_string())),
        }
    }
}

/// A concrete value bound to a [`FlagType`] (I1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
    Number(f64),
}

impl FlagValue {
    #[must_use]
    pub fn flag_type(&self) -> FlagType {
        match self {
            FlagValue::Boolean(_) => FlagType::Boolean,
            FlagValue::String(_) => FlagType::String,
            FlagValue::Number(_) => FlagType::Number,
        }
    }

    /// Validates that this value matches `expected`, and that a number is
    /// finite (I1: "number" is bound to finite reals).
    ///
    /// # Errors
    /// Returns `FlagValueError::TypeMismatch` on a type mismatch.
    pub fn validate(&self, expected: FlagType) -> Result<(), FlagValueError> {
        let actual = self.flag_type();
        if actual != expected {
            return Err(FlagValueError::TypeMismatch {
                name: String::new(),
                expected: expected.as_str(),
                actual: actual.as_str(),
            });
        }
        if let FlagValue::Number(n) = self {
            if !n.is_finite() {
                return Err(FlagValueError::TypeMismatch {
                    name: String::new(),
                    expected: "finite number",
                    actual: "non-finite number",
                });
            }
        }
        Ok(())
    }

    /// The "off" value for a type per I2: `false`/`""`/`0`.
    #[must_use]
    pub fn off_value(flag_type: FlagType) -> Self {
        match flag_type {
            FlagType::Boolean => FlagValue::Boolean(false),
            FlagType::String => FlagValue::String(String::new()),
            FlagType::Number => FlagValue::Number(0.0),
        }
    }

    /// The "on" value for boolean flags per I2. Non-boolean types have no
    /// well-defined "on" value; callers must use `set_value` instead.
    ///
    /// # Errors
    /// Returns `FlagValueError::NotBoolean` for non-boolean types.
    pub fn on_value(flag_type: FlagType) -> Result<Self, FlagValueError> {
        match flag_type {
            FlagType::Boolean => Ok(FlagValue::Boolean(true)),
            other => Err(FlagValueError::NotBoolean {
                name: String::new(),
                flag_type: other.as_str(),
            }),
        }
    }

    /// Truthiness used by `Flag::enabled` step 4: boolean == true, string
    /// non-empty, number > 0.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            FlagValue::Boolean(b) => *b,
            FlagValue::String(s) => !s.is_empty(),
            FlagValue::Number(n) => *n > 0.0,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Stringified form used for custom-attribute and set-membership
    /// comparisons (§4.6).
    #[must_use]
    pub fn stringify(&self) -> String {
        match self {
            FlagValue::Boolean(b) => b.to_string(),
            FlagValue::String(s) => s.clone(),
            FlagValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{n:.0}")
                } else {
                    n.to_string()
                }
            }
        }
    }
}

impl std::fmt::Display for FlagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_type_parse_round_trip() {
        for (name, ty) in [
            ("boolean", FlagType::Boolean),
            ("string", FlagType::String),
            ("number", FlagType::Number),
        ] {
            assert_eq!(FlagType::parse(name).unwrap(), ty);
            assert_eq!(ty.as_str(), name);
        }
    }

    #[test]
    fn flag_type_parse_rejects_unknown() {
        assert!(FlagType::parse("enum").is_err());
    }

    #[test]
    fn validate_matches_type() {
        assert!(FlagValue::Boolean(true).validate(FlagType::Boolean).is_ok());
        assert!(FlagValue::Boolean(true).validate(FlagType::String).is_err());
    }

    #[test]
    fn validate_rejects_non_finite_number() {
        assert!(FlagValue::Number(f64::NAN).validate(FlagType::Number).is_err());
        assert!(FlagValue::Number(f64::INFINITY)
            .validate(FlagType::Number)
            .is_err());
    }

    #[test]
    fn off_value_per_type() {
        assert_eq!(FlagValue::off_value(FlagType::Boolean), FlagValue::Boolean(false));
        assert_eq!(FlagValue::off_value(FlagType::String), FlagValue::String(String::new()));
        assert_eq!(FlagValue::off_value(FlagType::Number), FlagValue::Number(0.0));
    }

    #[test]
    fn on_value_only_for_boolean() {
        assert_eq!(FlagValue::on_value(FlagType::Boolean).unwrap(), FlagValue::Boolean(true));
        assert!(FlagValue::on_value(FlagType::String).is_err());
        assert!(FlagValue::on_value(FlagType::Number).is_err());
    }

    #[test]
    fn truthiness_per_type() {
        assert!(FlagValue::Boolean(true).is_truthy());
        assert!(!FlagValue::Boolean(false).is_truthy());
        assert!(FlagValue::String("v1".to_string()).is_truthy());
        assert!(!FlagValue::String(String::new()).is_truthy());
        assert!(FlagValue::Number(1.0).is_truthy());
        assert!(!FlagValue::Number(0.0).is_truthy());
        assert!(!FlagValue::Number(-1.0).is_truthy());
    }

    #[test]
    fn stringify_integral_number_has_no_decimal() {
        assert_eq!(FlagValue::Number(42.0).stringify(), "42");
        assert_eq!(FlagValue::Number(3.5).stringify(), "3.5");
    }
}
