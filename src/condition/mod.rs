//! Condition Evaluator
//!
//! Conditions are parsed once from JSON into a [`Condition`] tree and walked
//! against a [`DialogueView`] on every check. Evaluation never mutates actors;
//! range references still draw from the session RNG.

pub mod expr;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{DialogueError, Result};
use crate::talker::{Stat, Talker};
use crate::vars::{
    resolve_var, DurationOrVar, IntOrVar, RawDurationOrVar, RawIntOrVar, RawStrOrVar, StrOrVar,
    VarContext, VarRef, VarScope,
};

pub use expr::{Expr, ExprOp};

/// Read-only view of a running conversation
pub trait DialogueView: VarContext {
    fn alpha(&self) -> &dyn Talker;
    fn beta(&self) -> &dyn Talker;
    /// Missions the NPC has handed to the player
    fn missions_assigned(&self) -> &[String];
    fn reason(&self) -> &str;
    fn by_radio(&self) -> bool;
    /// Item type the current topic is about
    fn topic_item(&self) -> Option<&str>;

    fn actor(&self, target: Target) -> &dyn Talker {
        match target {
            Target::U => self.alpha(),
            Target::Npc => self.beta(),
        }
    }
}

// ============================================================================
// Shared Parameter Types
// ============================================================================

/// Which side of the conversation an actor condition or effect applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    #[default]
    U,
    Npc,
}

impl Target {
    pub fn is_npc(&self) -> bool {
        *self == Target::Npc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    pub fn apply<T: PartialOrd>(&self, lhs: &T, rhs: &T) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpinionField {
    Trust,
    Fear,
    Value,
    Anger,
    Owed,
}

// ============================================================================
// Raw Conditions (direct from JSON)
// ============================================================================

fn one() -> RawIntOrVar {
    RawIntOrVar::Single(crate::vars::value::RawIntPart::Literal(1))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawCondition {
    And {
        conditions: Vec<Value>,
    },
    Or {
        conditions: Vec<Value>,
    },
    Not {
        condition: Value,
    },
    HasTrait {
        #[serde(default)]
        target: Target,
        id: String,
    },
    HasEffect {
        #[serde(default)]
        target: Target,
        id: String,
    },
    HasBionic {
        #[serde(default)]
        target: Target,
        id: String,
    },
    HasItem {
        #[serde(default)]
        target: Target,
        item: String,
        #[serde(default = "one")]
        count: RawIntOrVar,
    },
    HasItemCategory {
        #[serde(default)]
        target: Target,
        category: String,
        #[serde(default = "one")]
        count: RawIntOrVar,
    },
    SkillAtLeast {
        #[serde(default)]
        target: Target,
        skill: String,
        level: RawIntOrVar,
    },
    StatAtLeast {
        #[serde(default)]
        target: Target,
        stat: Stat,
        value: RawIntOrVar,
    },
    FactionIs {
        #[serde(default)]
        target: Target,
        faction: String,
    },
    FactionTrustAtLeast {
        value: RawIntOrVar,
    },
    Opinion {
        field: OpinionField,
        op: CompareOp,
        value: RawIntOrVar,
    },
    HasCash {
        #[serde(default)]
        target: Target,
        amount: RawIntOrVar,
    },
    WithinDistance {
        distance: RawIntOrVar,
    },
    HasVar {
        var: String,
        #[serde(default)]
        scope: VarScope,
        var_type: Option<String>,
        context: Option<String>,
        value: String,
    },
    HasMission {
        #[serde(default)]
        target: Target,
        mission: String,
    },
    NpcRule {
        rule: String,
    },
    MoraleAtLeast {
        #[serde(default)]
        target: Target,
        value: RawIntOrVar,
    },
    TopicItemIs {
        item: String,
    },
    CompareInt {
        lhs: RawIntOrVar,
        op: CompareOp,
        rhs: RawIntOrVar,
    },
    CompareString {
        lhs: RawStrOrVar,
        op: CompareOp,
        rhs: RawStrOrVar,
    },
    CompareDuration {
        lhs: RawDurationOrVar,
        op: CompareOp,
        rhs: RawDurationOrVar,
    },
    Math {
        lhs: Value,
        op: CompareOp,
        rhs: Value,
    },
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Resolved Conditions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Const(bool),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    HasTrait { target: Target, id: String },
    HasEffect { target: Target, id: String },
    HasBionic { target: Target, id: String },
    HasItem { target: Target, item: String, count: IntOrVar },
    HasItemCategory { target: Target, category: String, count: IntOrVar },
    SkillAtLeast { target: Target, skill: String, level: IntOrVar },
    StatAtLeast { target: Target, stat: Stat, value: IntOrVar },
    FactionIs { target: Target, faction: String },
    FactionTrustAtLeast(IntOrVar),
    Opinion { field: OpinionField, op: CompareOp, value: IntOrVar },
    HasCash { target: Target, amount: IntOrVar },
    WithinDistance(IntOrVar),
    HasVar { var: VarRef, value: String },
    HasMission { target: Target, mission: String },
    NpcRule(String),
    MoraleAtLeast { target: Target, value: IntOrVar },
    TopicItemIs(String),
    CompareInt { lhs: IntOrVar, op: CompareOp, rhs: IntOrVar },
    CompareString { lhs: StrOrVar, op: CompareOp, rhs: StrOrVar },
    CompareDuration { lhs: DurationOrVar, op: CompareOp, rhs: DurationOrVar },
    Math { lhs: Expr, op: CompareOp, rhs: Expr },
    HasAssignedMission,
    HasManyAssignedMissions,
    HasReason,
    IsByRadio,
    UIsPlayer,
    NpcIsPlayer,
    NpcFollowing,
    NpcHostile,
    HasTopicItem,
}

impl Condition {
    /// Parse a condition from content: `true`/`false`, a simple name, or a typed object
    pub fn from_json(json: &Value) -> Result<Self> {
        match json {
            Value::Bool(b) => Ok(Condition::Const(*b)),
            Value::String(name) => Self::simple(name),
            Value::Object(map) => {
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DialogueError::content("condition", "missing \"type\""))?
                    .to_string();
                let raw: RawCondition = serde_json::from_value(json.clone())
                    .map_err(|e| DialogueError::content(format!("condition {}", kind), e.to_string()))?;
                Self::from_raw(raw, &kind)
            }
            other => Err(DialogueError::content(
                "condition",
                format!("expected bool, string or object, got {}", other),
            )),
        }
    }

    fn simple(name: &str) -> Result<Self> {
        Ok(match name {
            "has_assigned_mission" => Condition::HasAssignedMission,
            "has_many_assigned_missions" => Condition::HasManyAssignedMissions,
            "has_reason" => Condition::HasReason,
            "is_by_radio" => Condition::IsByRadio,
            "u_is_player" => Condition::UIsPlayer,
            "npc_is_player" => Condition::NpcIsPlayer,
            "npc_following" => Condition::NpcFollowing,
            "npc_hostile" => Condition::NpcHostile,
            "has_topic_item" => Condition::HasTopicItem,
            other => return Err(DialogueError::UnknownCondition(other.to_string())),
        })
    }

    fn from_raw(raw: RawCondition, kind: &str) -> Result<Self> {
        let list = |items: &[Value]| -> Result<Vec<Condition>> {
            items.iter().map(Condition::from_json).collect()
        };
        Ok(match raw {
            RawCondition::And { conditions } => Condition::And(list(&conditions)?),
            RawCondition::Or { conditions } => Condition::Or(list(&conditions)?),
            RawCondition::Not { condition } => {
                Condition::Not(Box::new(Condition::from_json(&condition)?))
            }
            RawCondition::HasTrait { target, id } => Condition::HasTrait { target, id },
            RawCondition::HasEffect { target, id } => Condition::HasEffect { target, id },
            RawCondition::HasBionic { target, id } => Condition::HasBionic { target, id },
            RawCondition::HasItem { target, item, count } => Condition::HasItem {
                target,
                item,
                count: IntOrVar::from_raw(&count)?,
            },
            RawCondition::HasItemCategory { target, category, count } => {
                Condition::HasItemCategory {
                    target,
                    category,
                    count: IntOrVar::from_raw(&count)?,
                }
            }
            RawCondition::SkillAtLeast { target, skill, level } => Condition::SkillAtLeast {
                target,
                skill,
                level: IntOrVar::from_raw(&level)?,
            },
            RawCondition::StatAtLeast { target, stat, value } => Condition::StatAtLeast {
                target,
                stat,
                value: IntOrVar::from_raw(&value)?,
            },
            RawCondition::FactionIs { target, faction } => Condition::FactionIs { target, faction },
            RawCondition::FactionTrustAtLeast { value } => {
                Condition::FactionTrustAtLeast(IntOrVar::from_raw(&value)?)
            }
            RawCondition::Opinion { field, op, value } => Condition::Opinion {
                field,
                op,
                value: IntOrVar::from_raw(&value)?,
            },
            RawCondition::HasCash { target, amount } => Condition::HasCash {
                target,
                amount: IntOrVar::from_raw(&amount)?,
            },
            RawCondition::WithinDistance { distance } => {
                Condition::WithinDistance(IntOrVar::from_raw(&distance)?)
            }
            RawCondition::HasVar { var, scope, var_type, context, value } => Condition::HasVar {
                var: resolve_var(&var, scope, var_type.as_deref(), context.as_deref())?,
                value,
            },
            RawCondition::HasMission { target, mission } => {
                Condition::HasMission { target, mission }
            }
            RawCondition::NpcRule { rule } => Condition::NpcRule(rule),
            RawCondition::MoraleAtLeast { target, value } => Condition::MoraleAtLeast {
                target,
                value: IntOrVar::from_raw(&value)?,
            },
            RawCondition::TopicItemIs { item } => Condition::TopicItemIs(item),
            RawCondition::CompareInt { lhs, op, rhs } => Condition::CompareInt {
                lhs: IntOrVar::from_raw(&lhs)?,
                op,
                rhs: IntOrVar::from_raw(&rhs)?,
            },
            RawCondition::CompareString { lhs, op, rhs } => Condition::CompareString {
                lhs: StrOrVar::from_raw(&lhs)?,
                op,
                rhs: StrOrVar::from_raw(&rhs)?,
            },
            RawCondition::CompareDuration { lhs, op, rhs } => Condition::CompareDuration {
                lhs: DurationOrVar::from_raw(&lhs)?,
                op,
                rhs: DurationOrVar::from_raw(&rhs)?,
            },
            RawCondition::Math { lhs, op, rhs } => Condition::Math {
                lhs: Expr::from_json(&lhs)?,
                op,
                rhs: Expr::from_json(&rhs)?,
            },
            RawCondition::Unknown => return Err(DialogueError::UnknownCondition(kind.to_string())),
        })
    }

    /// Evaluate against the conversation; `item` is the candidate item of a repeat response
    pub fn evaluate<V: DialogueView>(&self, view: &V, item: Option<&str>) -> Result<bool> {
        Ok(match self {
            Condition::Const(b) => *b,
            Condition::And(all) => {
                for c in all {
                    if !c.evaluate(view, item)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Or(any) => {
                for c in any {
                    if c.evaluate(view, item)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Not(inner) => !inner.evaluate(view, item)?,
            Condition::HasTrait { target, id } => view.actor(*target).has_trait(id),
            Condition::HasEffect { target, id } => view.actor(*target).has_effect(id),
            Condition::HasBionic { target, id } => view.actor(*target).has_bionic(id),
            Condition::HasItem { target, item: wanted, count } => {
                i64::from(view.actor(*target).item_count(wanted)) >= count.evaluate(view)?
            }
            Condition::HasItemCategory { target, category, count } => {
                i64::from(view.actor(*target).category_count(category)) >= count.evaluate(view)?
            }
            Condition::SkillAtLeast { target, skill, level } => {
                i64::from(view.actor(*target).skill_level(skill)) >= level.evaluate(view)?
            }
            Condition::StatAtLeast { target, stat, value } => {
                i64::from(view.actor(*target).stat(*stat)) >= value.evaluate(view)?
            }
            Condition::FactionIs { target, faction } => {
                view.actor(*target).faction_id() == *faction
            }
            Condition::FactionTrustAtLeast(value) => {
                i64::from(view.beta().faction_trust()) >= value.evaluate(view)?
            }
            Condition::Opinion { field, op, value } => {
                let opinion = view.beta().opinion();
                let current = match field {
                    OpinionField::Trust => opinion.trust,
                    OpinionField::Fear => opinion.fear,
                    OpinionField::Value => opinion.value,
                    OpinionField::Anger => opinion.anger,
                    OpinionField::Owed => opinion.owed,
                };
                op.apply(&i64::from(current), &value.evaluate(view)?)
            }
            Condition::HasCash { target, amount } => {
                view.actor(*target).cash() >= amount.evaluate(view)?
            }
            Condition::WithinDistance(distance) => {
                let d = view.alpha().position().distance(&view.beta().position());
                i64::from(d) <= distance.evaluate(view)?
            }
            Condition::HasVar { var, value } => view.read_var(var)?.as_deref() == Some(value.as_str()),
            Condition::HasMission { target, mission } => view.actor(*target).has_mission(mission),
            Condition::NpcRule(rule) => view.beta().has_rule(rule),
            Condition::MoraleAtLeast { target, value } => {
                i64::from(view.actor(*target).morale_level()) >= value.evaluate(view)?
            }
            Condition::TopicItemIs(wanted) => {
                item.or_else(|| view.topic_item()) == Some(wanted.as_str())
            }
            Condition::CompareInt { lhs, op, rhs } => {
                op.apply(&lhs.evaluate(view)?, &rhs.evaluate(view)?)
            }
            Condition::CompareString { lhs, op, rhs } => {
                op.apply(&lhs.evaluate(view)?, &rhs.evaluate(view)?)
            }
            Condition::CompareDuration { lhs, op, rhs } => {
                op.apply(&lhs.evaluate(view)?, &rhs.evaluate(view)?)
            }
            Condition::Math { lhs, op, rhs } => {
                op.apply(&lhs.evaluate(view)?, &rhs.evaluate(view)?)
            }
            Condition::HasAssignedMission => view.missions_assigned().len() == 1,
            Condition::HasManyAssignedMissions => view.missions_assigned().len() >= 2,
            Condition::HasReason => !view.reason().is_empty(),
            Condition::IsByRadio => view.by_radio(),
            Condition::UIsPlayer => view.alpha().is_player(),
            Condition::NpcIsPlayer => view.beta().is_player(),
            Condition::NpcFollowing => view.beta().is_following(),
            Condition::NpcHostile => view.beta().turned_hostile(),
            Condition::HasTopicItem => item.or_else(|| view.topic_item()).is_some(),
        })
    }

    /// Runtime check: evaluation errors are logged and count as false
    pub fn check<V: DialogueView>(&self, view: &V, item: Option<&str>) -> bool {
        self.evaluate(view, item).unwrap_or_else(|e| {
            warn!("Condition evaluation failed, treating as false: {}", e);
            false
        })
    }
}

/// Parse an optional condition field
pub fn parse_optional(json: Option<&Value>) -> Result<Option<Condition>> {
    json.map(Condition::from_json).transpose()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::talker::{Character, Item, NpcTalker, Opinion, PlayerTalker, Position};
    use crate::vars::GlobalVariables;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use std::cell::RefCell;

    /// Conversation view over owned actors, for evaluator tests
    pub(crate) struct TestView {
        pub u: PlayerTalker,
        pub npc: NpcTalker,
        pub globals: GlobalVariables,
        pub missions: Vec<String>,
        pub reason: String,
        pub radio: bool,
        pub item: Option<String>,
        pub rng: RefCell<StdRng>,
    }

    impl TestView {
        pub(crate) fn new() -> Self {
            Self {
                u: PlayerTalker::new(Character::new("Ava")),
                npc: NpcTalker::new(Character::new("Bo")),
                globals: GlobalVariables::new(),
                missions: Vec::new(),
                reason: String::new(),
                radio: false,
                item: None,
                rng: RefCell::new(StdRng::seed_from_u64(7)),
            }
        }
    }

    impl VarContext for TestView {
        fn read_var(&self, var: &VarRef) -> Result<Option<String>> {
            match var.scope {
                VarScope::Global => Ok(self.globals.get(&var.name)),
                VarScope::U => Ok(self.u.get_value(&var.name)),
                VarScope::Npc => Ok(self.npc.get_value(&var.name)),
                other => Err(DialogueError::UnsupportedScope(other.as_str().to_string())),
            }
        }

        fn sample(&self, min: i64, max: i64) -> i64 {
            self.rng.borrow_mut().gen_range(min..=max)
        }
    }

    impl DialogueView for TestView {
        fn alpha(&self) -> &dyn Talker {
            &self.u
        }
        fn beta(&self) -> &dyn Talker {
            &self.npc
        }
        fn missions_assigned(&self) -> &[String] {
            &self.missions
        }
        fn reason(&self) -> &str {
            &self.reason
        }
        fn by_radio(&self) -> bool {
            self.radio
        }
        fn topic_item(&self) -> Option<&str> {
            self.item.as_deref()
        }
    }

    fn cond(json: Value) -> Condition {
        Condition::from_json(&json).unwrap()
    }

    #[test]
    fn test_bool_and_simple_forms() {
        let mut view = TestView::new();
        assert!(cond(json!(true)).evaluate(&view, None).unwrap());
        assert!(!cond(json!("has_reason")).evaluate(&view, None).unwrap());
        view.reason = "You owe me.".to_string();
        assert!(cond(json!("has_reason")).evaluate(&view, None).unwrap());
        assert!(cond(json!("u_is_player")).evaluate(&view, None).unwrap());
        assert!(!cond(json!("npc_is_player")).evaluate(&view, None).unwrap());
    }

    #[test]
    fn test_unknown_conditions_rejected() {
        assert!(matches!(
            Condition::from_json(&json!("is_raining")),
            Err(DialogueError::UnknownCondition(_))
        ));
        assert!(matches!(
            Condition::from_json(&json!({"type": "is_raining"})),
            Err(DialogueError::UnknownCondition(_))
        ));
        assert!(Condition::from_json(&json!(3)).is_err());
    }

    #[test]
    fn test_actor_queries() {
        let mut view = TestView::new();
        view.u.character = Character::new("Ava")
            .with_skill("speech", 4)
            .with_trait("PRETTY")
            .with_cash(250)
            .with_item(Item::new("canteen", "container", 1)
                .with_contents(vec![Item::new("water", "drink", 2)]));
        view.npc.character.position = Position::new(3, 0, 0);

        assert!(cond(json!({"type": "skill_at_least", "skill": "speech", "level": 4}))
            .evaluate(&view, None)
            .unwrap());
        assert!(cond(json!({"type": "has_trait", "id": "PRETTY"})).evaluate(&view, None).unwrap());
        assert!(!cond(json!({"type": "has_trait", "target": "npc", "id": "PRETTY"}))
            .evaluate(&view, None)
            .unwrap());
        assert!(cond(json!({"type": "has_item", "item": "water", "count": 2}))
            .evaluate(&view, None)
            .unwrap());
        assert!(!cond(json!({"type": "has_cash", "amount": 300})).evaluate(&view, None).unwrap());
        assert!(cond(json!({"type": "within_distance", "distance": 3}))
            .evaluate(&view, None)
            .unwrap());
    }

    #[test]
    fn test_logic_and_opinion() {
        let mut view = TestView::new();
        view.npc.opinion = Opinion { trust: 5, ..Default::default() };
        let c = cond(json!({"type": "and", "conditions": [
            {"type": "opinion", "field": "trust", "op": ">=", "value": 5},
            {"type": "not", "condition": "npc_hostile"}
        ]}));
        assert!(c.evaluate(&view, None).unwrap());
        view.npc.hostile = true;
        assert!(!c.evaluate(&view, None).unwrap());
    }

    #[test]
    fn test_variable_comparisons() {
        let view = TestView::new();
        view.globals.set("trust", "7");
        let c = cond(json!({"type": "compare_int",
            "lhs": {"var": "trust", "scope": "global", "default": 0}, "op": ">", "rhs": 5}));
        assert!(c.evaluate(&view, None).unwrap());

        let c = cond(json!({"type": "has_var", "var": "trust", "scope": "global", "value": "7"}));
        assert!(c.evaluate(&view, None).unwrap());

        let c = cond(json!({"type": "compare_duration", "lhs": "2 minutes", "op": "<", "rhs": 600}));
        assert!(c.evaluate(&view, None).unwrap());
    }

    #[test]
    fn test_math_division_error_is_false_at_runtime() {
        let view = TestView::new();
        let c = cond(json!({"type": "math",
            "lhs": {"op": "/", "args": [10, 0]}, "op": "==", "rhs": 0}));
        assert!(matches!(c.evaluate(&view, None), Err(DialogueError::DivisionByZero)));
        assert!(!c.check(&view, None));
    }

    #[test]
    fn test_faction_var_rejected_at_load() {
        assert!(matches!(
            Condition::from_json(&json!({"type": "has_var", "var": "x", "scope": "faction", "value": "1"})),
            Err(DialogueError::UnsupportedScope(_))
        ));
    }

    #[test]
    fn test_topic_item_prefers_candidate() {
        let mut view = TestView::new();
        view.item = Some("rope".to_string());
        let c = cond(json!({"type": "topic_item_is", "item": "water"}));
        assert!(!c.evaluate(&view, None).unwrap());
        assert!(c.evaluate(&view, Some("water")).unwrap());
    }
}
