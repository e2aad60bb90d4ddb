//! Value condition model
//!
//! Comparison predicates evaluated against a state string:
//! - eq/neq: literal string comparison
//! - lt/lte/gt/gte: numeric comparison on the state's leading magnitude
//!
//! All present bounds AND together; a condition with no bounds always
//! matches. Numeric bounds never error on a non-numeric state - they simply
//! do not match.

use hearth_registry::StateRegistry;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Comparison bounds evaluated against the triggering value
///
/// Conditions are configuration-shaped data: every field is optional and
/// independently combinable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueCondition {
    /// Literal string equality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq: Option<String>,

    /// Literal string inequality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neq: Option<String>,

    /// Numeric strictly-less-than bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,

    /// Numeric less-than-or-equal bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,

    /// Numeric strictly-greater-than bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,

    /// Numeric greater-than-or-equal bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
}

impl ValueCondition {
    /// Condition with no bounds - matches every state
    pub fn any() -> Self {
        Self::default()
    }

    /// String-equality condition
    pub fn eq(value: impl Into<String>) -> Self {
        Self {
            eq: Some(value.into()),
            ..Self::default()
        }
    }

    /// String-inequality condition
    pub fn neq(value: impl Into<String>) -> Self {
        Self {
            neq: Some(value.into()),
            ..Self::default()
        }
    }

    /// Add a strictly-less-than bound
    pub fn with_lt(mut self, bound: f64) -> Self {
        self.lt = Some(bound);
        self
    }

    /// Add a less-than-or-equal bound
    pub fn with_lte(mut self, bound: f64) -> Self {
        self.lte = Some(bound);
        self
    }

    /// Add a strictly-greater-than bound
    pub fn with_gt(mut self, bound: f64) -> Self {
        self.gt = Some(bound);
        self
    }

    /// Add a greater-than-or-equal bound
    pub fn with_gte(mut self, bound: f64) -> Self {
        self.gte = Some(bound);
        self
    }

    /// Whether no bound is set at all
    pub fn is_unconstrained(&self) -> bool {
        self.eq.is_none()
            && self.neq.is_none()
            && self.lt.is_none()
            && self.lte.is_none()
            && self.gt.is_none()
            && self.gte.is_none()
    }

    fn has_numeric_bounds(&self) -> bool {
        self.lt.is_some() || self.lte.is_some() || self.gt.is_some() || self.gte.is_some()
    }

    /// Evaluate all present bounds against a state string
    pub fn matches(&self, state: &str) -> bool {
        if let Some(eq) = &self.eq {
            if state != eq {
                return false;
            }
        }
        if let Some(neq) = &self.neq {
            if state == neq {
                return false;
            }
        }

        if self.has_numeric_bounds() {
            let Some(value) = leading_magnitude(state) else {
                // A non-numeric state never satisfies a numeric bound
                trace!(state = %state, "numeric bound on non-numeric state");
                return false;
            };
            if let Some(lt) = self.lt {
                if value >= lt {
                    return false;
                }
            }
            if let Some(lte) = self.lte {
                if value > lte {
                    return false;
                }
            }
            if let Some(gt) = self.gt {
                if value <= gt {
                    return false;
                }
            }
            if let Some(gte) = self.gte {
                if value < gte {
                    return false;
                }
            }
        }

        true
    }

    /// Compact condition string for logs (e.g. ">=49 && <=99")
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(eq) = &self.eq {
            parts.push(format!("=={}", eq));
        }
        if let Some(neq) = &self.neq {
            parts.push(format!("!={}", neq));
        }
        if let Some(lt) = self.lt {
            parts.push(format!("<{}", lt));
        }
        if let Some(lte) = self.lte {
            parts.push(format!("<={}", lte));
        }
        if let Some(gt) = self.gt {
            parts.push(format!(">{}", gt));
        }
        if let Some(gte) = self.gte {
            parts.push(format!(">={}", gte));
        }
        if parts.is_empty() {
            "*".to_string()
        } else {
            parts.join(" && ")
        }
    }
}

/// Parse the leading decimal magnitude of a state string
///
/// Strips any non-numeric suffix, so `"21.5 °C"` parses as `21.5`. There is
/// no unit normalization: comparisons across differing units of the same
/// quantity operate on the raw magnitude.
fn leading_magnitude(state: &str) -> Option<f64> {
    let s = state.trim();
    let mut end = 0;
    for (i, c) in s.char_indices() {
        let numeric = c.is_ascii_digit() || c == '.' || ((c == '+' || c == '-') && i == 0);
        if !numeric {
            break;
        }
        end = i + c.len_utf8();
    }
    s[..end].parse::<f64>().ok()
}

/// A condition against a *different* target's current state
///
/// Gates whether a matched trigger actually invokes its handler. The target
/// state is fetched at invocation time, not at event time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precondition {
    /// Name of the item/thing whose current state is checked
    pub target: String,

    /// Bounds the current state must satisfy
    #[serde(default)]
    pub condition: ValueCondition,
}

impl Precondition {
    pub fn new(target: impl Into<String>, condition: ValueCondition) -> Self {
        Self {
            target: target.into(),
            condition,
        }
    }

    /// Evaluate against the target's current state
    ///
    /// An unknown target or a registry failure answers false (fails closed).
    pub async fn holds(&self, registry: &dyn StateRegistry) -> bool {
        match registry.current_state(&self.target).await {
            Ok(Some(state)) => self.condition.matches(&state),
            Ok(None) => {
                debug!(target = %self.target, "precondition target not in registry");
                false
            },
            Err(e) => {
                debug!(target = %self.target, error = %e, "precondition state read failed");
                false
            },
        }
    }

    /// Compact form for logs: `target: bounds`
    pub fn describe(&self) -> String {
        format!("{}: {}", self.target, self.condition.describe())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use hearth_registry::MemoryRegistry;

    #[test]
    fn unconstrained_condition_matches_everything() {
        let cond = ValueCondition::any();
        assert!(cond.is_unconstrained());
        assert!(cond.matches("ON"));
        assert!(cond.matches(""));
        assert!(cond.matches("42"));
    }

    #[test]
    fn string_equality_bounds() {
        let cond = ValueCondition::eq("ON");
        assert!(cond.matches("ON"));
        assert!(!cond.matches("OFF"));

        let cond = ValueCondition::neq("OFF");
        assert!(cond.matches("ON"));
        assert!(!cond.matches("OFF"));
    }

    #[test]
    fn numeric_bounds_and_together() {
        // 49 <= x < 99
        let cond = ValueCondition::default().with_gte(49.0).with_lt(99.0);
        assert!(cond.matches("49"));
        assert!(cond.matches("50.5"));
        assert!(!cond.matches("48.9"));
        assert!(!cond.matches("99"));
        assert!(!cond.matches("120"));
    }

    #[test]
    fn strict_bounds_exclude_the_boundary() {
        let cond = ValueCondition::default().with_gt(5.0);
        assert!(!cond.matches("5"));
        assert!(cond.matches("5.1"));

        let cond = ValueCondition::default().with_lt(5.0);
        assert!(!cond.matches("5"));
        assert!(cond.matches("4.9"));
    }

    #[test]
    fn non_numeric_state_never_satisfies_numeric_bound() {
        let cond = ValueCondition::default().with_gte(0.0);
        assert!(!cond.matches("ON"));
        assert!(!cond.matches(""));
        assert!(!cond.matches("NULL"));
    }

    #[test]
    fn equality_and_numeric_bounds_combine() {
        let cond = ValueCondition::eq("2").with_gte(1.0);
        assert!(cond.matches("2"));
        // eq fails even though the numeric bound would hold
        assert!(!cond.matches("3"));
    }

    #[test]
    fn quantity_state_compares_raw_magnitude() {
        // Known surprising edge case: the unit suffix is stripped and the
        // raw magnitude compared, with no unit normalization. "2 kWh" vs a
        // bound meant in Wh compares 2 against the bound.
        let cond = ValueCondition::default().with_gte(21.0);
        assert!(cond.matches("21.5 °C"));
        assert!(!cond.matches("20.9 °C"));

        let wh_bound = ValueCondition::default().with_gt(100.0);
        assert!(!wh_bound.matches("2 kWh"));
    }

    #[test]
    fn leading_magnitude_parsing() {
        assert_eq!(leading_magnitude("42"), Some(42.0));
        assert_eq!(leading_magnitude(" -3.5 "), Some(-3.5));
        assert_eq!(leading_magnitude("12.7 W"), Some(12.7));
        assert_eq!(leading_magnitude("ON"), None);
        assert_eq!(leading_magnitude(""), None);
        assert_eq!(leading_magnitude("--1"), None);
    }

    #[test]
    fn describe_is_compact() {
        let cond = ValueCondition::default().with_gte(49.0).with_lt(99.0);
        assert_eq!(cond.describe(), "<99 && >=49");
        assert_eq!(ValueCondition::any().describe(), "*");
    }

    #[test]
    fn condition_deserializes_from_config_json() {
        let cond: ValueCondition =
            serde_json::from_str(r#"{"gte": 49, "lt": 99}"#).unwrap();
        assert_eq!(cond.gte, Some(49.0));
        assert_eq!(cond.lt, Some(99.0));
        assert!(cond.eq.is_none());
    }

    #[tokio::test]
    async fn precondition_reads_current_state() {
        let registry = MemoryRegistry::new();
        registry.set_state("mode", "HOME");

        let pre = Precondition::new("mode", ValueCondition::eq("HOME"));
        assert!(pre.holds(&registry).await);

        registry.set_state("mode", "AWAY");
        assert!(!pre.holds(&registry).await);
    }

    #[tokio::test]
    async fn precondition_fails_closed_on_unknown_target() {
        let registry = MemoryRegistry::new();
        let pre = Precondition::new("nothere", ValueCondition::any());
        assert!(!pre.holds(&registry).await);
    }
}
