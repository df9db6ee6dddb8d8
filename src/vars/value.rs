//! Typed value-or-variable references
//!
//! Content may give a literal, a named variable with a default, or (for
//! integers and durations) a `{"min": .., "max": ..}` range whose bounds are
//! themselves literals or variables. Raw forms are deserialized from JSON and
//! resolved once at load time.

use serde::Deserialize;
use std::fmt;

use super::{resolve_var, VarContext, VarRef, VarScope};
use crate::error::{DialogueError, Result};

// ============================================================================
// Time Durations
// ============================================================================

/// Game-time span measured in turns (one turn is one second)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeDuration {
    turns: i64,
}

impl TimeDuration {
    pub const fn from_turns(turns: i64) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> i64 {
        self.turns
    }

    /// Parse `"10 minutes"`, `"1h 30m"` and similar
    pub fn parse(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let parsed = humantime::parse_duration(&compact).map_err(|e| {
            DialogueError::content("duration", format!("invalid duration '{}': {}", text, e))
        })?;
        let turns = i64::try_from(parsed.as_secs()).map_err(|_| {
            DialogueError::content("duration", format!("duration '{}' is out of range", text))
        })?;
        Ok(Self::from_turns(turns))
    }
}

impl fmt::Display for TimeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} turns", self.turns)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDuration {
    Turns(i64),
    Text(String),
}

impl RawDuration {
    fn resolve(&self) -> Result<TimeDuration> {
        match self {
            RawDuration::Turns(t) => Ok(TimeDuration::from_turns(*t)),
            RawDuration::Text(s) => TimeDuration::parse(s),
        }
    }
}

// ============================================================================
// Raw Content Forms
// ============================================================================

/// `{"var": .., "scope": .., "default": ..}`
#[derive(Debug, Clone, Deserialize)]
pub struct RawVar<T> {
    pub var: String,
    #[serde(default)]
    pub scope: VarScope,
    pub var_type: Option<String>,
    pub context: Option<String>,
    pub default: Option<T>,
}

impl<T: Clone> RawVar<T> {
    fn resolve(&self) -> Result<(VarRef, T)> {
        let var = resolve_var(
            &self.var,
            self.scope,
            self.var_type.as_deref(),
            self.context.as_deref(),
        )?;
        let default = self
            .default
            .clone()
            .ok_or_else(|| DialogueError::MissingDefault(self.var.clone()))?;
        Ok((var, default))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawIntPart {
    Literal(i64),
    Var(RawVar<i64>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawIntOrVar {
    Single(RawIntPart),
    Range { min: RawIntPart, max: RawIntPart },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawStrOrVar {
    Literal(String),
    Var(RawVar<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDurationPart {
    Literal(RawDuration),
    Var(RawVar<RawDuration>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDurationOrVar {
    Single(RawDurationPart),
    Range {
        min: RawDurationPart,
        max: RawDurationPart,
    },
}

// ============================================================================
// Resolved References
// ============================================================================

fn read_stored(ctx: &impl VarContext, var: &VarRef) -> Result<Option<String>> {
    Ok(ctx.read_var(var)?.filter(|v| !v.is_empty()))
}

fn parse_stored_int(var: &VarRef, value: &str, expected: &'static str) -> Result<i64> {
    value.trim().parse::<i64>().map_err(|_| DialogueError::VarParse {
        name: var.name.clone(),
        value: value.to_string(),
        expected,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntPart {
    Literal(i64),
    Var { var: VarRef, default: i64 },
}

impl IntPart {
    fn from_raw(raw: &RawIntPart) -> Result<Self> {
        Ok(match raw {
            RawIntPart::Literal(v) => IntPart::Literal(*v),
            RawIntPart::Var(v) => {
                let (var, default) = v.resolve()?;
                IntPart::Var { var, default }
            }
        })
    }

    pub fn evaluate(&self, ctx: &impl VarContext) -> Result<i64> {
        match self {
            IntPart::Literal(v) => Ok(*v),
            IntPart::Var { var, default } => match read_stored(ctx, var)? {
                Some(stored) => parse_stored_int(var, &stored, "an integer"),
                None => Ok(*default),
            },
        }
    }

    fn var(&self) -> Option<&VarRef> {
        match self {
            IntPart::Var { var, .. } => Some(var),
            IntPart::Literal(_) => None,
        }
    }
}

/// Integer literal, variable, or uniformly sampled range
#[derive(Debug, Clone, PartialEq)]
pub enum IntOrVar {
    Single(IntPart),
    Range { min: IntPart, max: IntPart },
}

impl IntOrVar {
    pub fn literal(value: i64) -> Self {
        IntOrVar::Single(IntPart::Literal(value))
    }

    pub fn from_raw(raw: &RawIntOrVar) -> Result<Self> {
        Ok(match raw {
            RawIntOrVar::Single(p) => IntOrVar::Single(IntPart::from_raw(p)?),
            RawIntOrVar::Range { min, max } => IntOrVar::Range {
                min: IntPart::from_raw(min)?,
                max: IntPart::from_raw(max)?,
            },
        })
    }

    pub fn evaluate(&self, ctx: &impl VarContext) -> Result<i64> {
        match self {
            IntOrVar::Single(p) => p.evaluate(ctx),
            IntOrVar::Range { min, max } => {
                let lo = min.evaluate(ctx)?;
                let hi = max.evaluate(ctx)?;
                Ok(ctx.sample(lo.min(hi), lo.max(hi)))
            }
        }
    }

    /// True if any part reads from the npc-side actor
    pub fn is_npc(&self) -> bool {
        match self {
            IntOrVar::Single(p) => p.var().is_some_and(|v| v.scope.is_npc()),
            IntOrVar::Range { min, max } => [min, max]
                .iter()
                .any(|p| p.var().is_some_and(|v| v.scope.is_npc())),
        }
    }

    /// Best static guess without a context: the literal, a variable's
    /// default, or the lower bound of a range
    pub fn preview(&self) -> i64 {
        let part = |p: &IntPart| match p {
            IntPart::Literal(v) => *v,
            IntPart::Var { default, .. } => *default,
        };
        match self {
            IntOrVar::Single(p) => part(p),
            IntOrVar::Range { min, max } => part(min).min(part(max)),
        }
    }
}

/// String literal or variable
#[derive(Debug, Clone, PartialEq)]
pub enum StrOrVar {
    Literal(String),
    Var { var: VarRef, default: String },
}

impl StrOrVar {
    pub fn literal(value: impl Into<String>) -> Self {
        StrOrVar::Literal(value.into())
    }

    pub fn from_raw(raw: &RawStrOrVar) -> Result<Self> {
        Ok(match raw {
            RawStrOrVar::Literal(s) => StrOrVar::Literal(s.clone()),
            RawStrOrVar::Var(v) => {
                let (var, default) = v.resolve()?;
                StrOrVar::Var { var, default }
            }
        })
    }

    pub fn evaluate(&self, ctx: &impl VarContext) -> Result<String> {
        match self {
            StrOrVar::Literal(s) => Ok(s.clone()),
            StrOrVar::Var { var, default } => {
                Ok(read_stored(ctx, var)?.unwrap_or_else(|| default.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DurationPart {
    Literal(TimeDuration),
    Var { var: VarRef, default: TimeDuration },
}

impl DurationPart {
    fn from_raw(raw: &RawDurationPart) -> Result<Self> {
        Ok(match raw {
            RawDurationPart::Literal(d) => DurationPart::Literal(d.resolve()?),
            RawDurationPart::Var(v) => {
                let (var, default) = v.resolve()?;
                DurationPart::Var {
                    var,
                    default: default.resolve()?,
                }
            }
        })
    }

    fn evaluate(&self, ctx: &impl VarContext) -> Result<TimeDuration> {
        match self {
            DurationPart::Literal(d) => Ok(*d),
            DurationPart::Var { var, default } => match read_stored(ctx, var)? {
                Some(stored) => Ok(TimeDuration::from_turns(parse_stored_int(
                    var,
                    &stored,
                    "a duration in turns",
                )?)),
                None => Ok(*default),
            },
        }
    }
}

/// Duration literal, variable (stored as turns), or sampled range
#[derive(Debug, Clone, PartialEq)]
pub enum DurationOrVar {
    Single(DurationPart),
    Range { min: DurationPart, max: DurationPart },
}

impl DurationOrVar {
    pub fn literal(duration: TimeDuration) -> Self {
        DurationOrVar::Single(DurationPart::Literal(duration))
    }

    pub fn from_raw(raw: &RawDurationOrVar) -> Result<Self> {
        Ok(match raw {
            RawDurationOrVar::Single(p) => DurationOrVar::Single(DurationPart::from_raw(p)?),
            RawDurationOrVar::Range { min, max } => DurationOrVar::Range {
                min: DurationPart::from_raw(min)?,
                max: DurationPart::from_raw(max)?,
            },
        })
    }

    pub fn evaluate(&self, ctx: &impl VarContext) -> Result<TimeDuration> {
        match self {
            DurationOrVar::Single(p) => p.evaluate(ctx),
            DurationOrVar::Range { min, max } => {
                let lo = min.evaluate(ctx)?.turns();
                let hi = max.evaluate(ctx)?.turns();
                Ok(TimeDuration::from_turns(ctx.sample(lo.min(hi), lo.max(hi))))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Minimal context over a flat map, keyed by `scope:name`
    pub(crate) struct MapContext {
        pub values: HashMap<String, String>,
        pub rng: RefCell<StdRng>,
    }

    impl MapContext {
        pub(crate) fn new(seed: u64) -> Self {
            Self {
                values: HashMap::new(),
                rng: RefCell::new(StdRng::seed_from_u64(seed)),
            }
        }

        pub(crate) fn with(mut self, scope: VarScope, name: &str, value: &str) -> Self {
            self.values
                .insert(format!("{}:{}", scope.as_str(), name), value.to_string());
            self
        }
    }

    impl VarContext for MapContext {
        fn read_var(&self, var: &VarRef) -> Result<Option<String>> {
            var.scope.ensure_supported()?;
            Ok(self
                .values
                .get(&format!("{}:{}", var.scope.as_str(), var.name))
                .cloned())
        }

        fn sample(&self, min: i64, max: i64) -> i64 {
            self.rng.borrow_mut().gen_range(min..=max)
        }
    }

    fn int(json: &str) -> Result<IntOrVar> {
        let raw: RawIntOrVar = serde_json::from_str(json).unwrap();
        IntOrVar::from_raw(&raw)
    }

    #[test]
    fn test_literal_takes_precedence() {
        let ctx = MapContext::new(1);
        let v = int("7").unwrap();
        assert_eq!(v.evaluate(&ctx).unwrap(), 7);
        assert_eq!(v.evaluate(&ctx).unwrap(), 7);
        assert_eq!(v.preview(), 7);
    }

    #[test]
    fn test_var_default_and_stored() {
        let v = int(r#"{"var": "gold", "scope": "global", "default": 3}"#).unwrap();
        let empty = MapContext::new(1);
        assert_eq!(v.evaluate(&empty).unwrap(), 3);

        let stored = MapContext::new(1).with(VarScope::Global, "gold", "12");
        assert_eq!(v.evaluate(&stored).unwrap(), 12);

        // Empty stored values fall back to the default
        let blank = MapContext::new(1).with(VarScope::Global, "gold", "");
        assert_eq!(v.evaluate(&blank).unwrap(), 3);
    }

    #[test]
    fn test_missing_default_is_load_error() {
        assert!(matches!(
            int(r#"{"var": "gold"}"#),
            Err(DialogueError::MissingDefault(_))
        ));
    }

    #[test]
    fn test_unparseable_stored_value_is_error() {
        let v = int(r#"{"var": "gold", "default": 0}"#).unwrap();
        let ctx = MapContext::new(1).with(VarScope::U, "gold", "lots");
        assert!(matches!(
            v.evaluate(&ctx),
            Err(DialogueError::VarParse { .. })
        ));
    }

    #[test]
    fn test_npc_scope_detection() {
        assert!(int(r#"{"var": "x", "scope": "npc", "default": 1}"#).unwrap().is_npc());
        assert!(int(r#"{"min": 1, "max": {"var": "x", "scope": "npc", "default": 1}}"#)
            .unwrap()
            .is_npc());
        assert!(!int("1").unwrap().is_npc());
    }

    #[test]
    fn test_string_var() {
        let raw: RawStrOrVar =
            serde_json::from_str(r#"{"var": "title", "scope": "npc", "default": "stranger"}"#)
                .unwrap();
        let s = StrOrVar::from_raw(&raw).unwrap();
        assert_eq!(s.evaluate(&MapContext::new(1)).unwrap(), "stranger");
        let ctx = MapContext::new(1).with(VarScope::Npc, "title", "friend");
        assert_eq!(s.evaluate(&ctx).unwrap(), "friend");
    }

    #[test]
    fn test_duration_forms() {
        let raw: RawDurationOrVar = serde_json::from_str(r#""10 minutes""#).unwrap();
        let d = DurationOrVar::from_raw(&raw).unwrap();
        assert_eq!(d.evaluate(&MapContext::new(1)).unwrap().turns(), 600);

        let raw: RawDurationOrVar = serde_json::from_str("30").unwrap();
        let d = DurationOrVar::from_raw(&raw).unwrap();
        assert_eq!(d.evaluate(&MapContext::new(1)).unwrap().turns(), 30);

        let raw: RawDurationOrVar =
            serde_json::from_str(r#"{"var": "wait", "default": "1 h"}"#).unwrap();
        let d = DurationOrVar::from_raw(&raw).unwrap();
        assert_eq!(d.evaluate(&MapContext::new(1)).unwrap().turns(), 3600);
        let ctx = MapContext::new(1).with(VarScope::U, "wait", "45");
        assert_eq!(d.evaluate(&ctx).unwrap().turns(), 45);
    }

    #[test]
    fn test_duration_out_of_range_rejected() {
        assert!(matches!(
            TimeDuration::parse("400000000000 years"),
            Err(DialogueError::Content { .. })
        ));
        let raw: RawDurationOrVar = serde_json::from_str(r#""400000000000 years""#).unwrap();
        assert!(DurationOrVar::from_raw(&raw).is_err());
    }

    #[test]
    fn test_preview_uses_literal_default_or_range_min() {
        assert_eq!(int("4").unwrap().preview(), 4);
        assert_eq!(int(r#"{"var": "gold", "default": 9}"#).unwrap().preview(), 9);
        assert_eq!(int(r#"{"min": 2, "max": 5}"#).unwrap().preview(), 2);
        assert_eq!(
            int(r#"{"min": {"var": "lo", "default": 6}, "max": 3}"#).unwrap().preview(),
            3
        );
    }

    #[test]
    fn test_faction_var_rejected_at_load() {
        assert!(matches!(
            int(r#"{"var": "rep", "scope": "faction", "default": 0}"#),
            Err(DialogueError::UnsupportedScope(_))
        ));
    }

    #[test]
    fn test_range_deterministic_for_seed() {
        let v = int(r#"{"min": 0, "max": 1000}"#).unwrap();
        let a: Vec<i64> = {
            let ctx = MapContext::new(42);
            (0..5).map(|_| v.evaluate(&ctx).unwrap()).collect()
        };
        let b: Vec<i64> = {
            let ctx = MapContext::new(42);
            (0..5).map(|_| v.evaluate(&ctx).unwrap()).collect()
        };
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_range_within_bounds(lo in -500i64..500, span in 0i64..500, seed in any::<u64>()) {
            let hi = lo + span;
            let v = IntOrVar::Range {
                min: IntPart::Literal(lo),
                max: IntPart::Var {
                    var: VarRef::new(VarScope::Global, "hi"),
                    default: hi,
                },
            };
            let ctx = MapContext::new(seed);
            for _ in 0..4 {
                let x = v.evaluate(&ctx).unwrap();
                prop_assert!(x >= lo && x <= hi);
            }
        }

        #[test]
        fn prop_literal_idempotent(n in any::<i64>(), seed in any::<u64>()) {
            let v = IntOrVar::literal(n);
            let ctx = MapContext::new(seed);
            prop_assert_eq!(v.evaluate(&ctx).unwrap(), v.evaluate(&ctx).unwrap());
        }
    }
}
