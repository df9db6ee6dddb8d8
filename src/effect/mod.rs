//! Effect Executor
//!
//! The closed vocabulary of side effects a response can trigger. Each effect
//! is parsed from JSON into an [`Effect`] carrying its resolved parameters and
//! replayed against the live actors through an [`EffectContext`].

pub mod talk;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::condition::{DialogueView, Expr, Target};
use crate::error::{DialogueError, Result};
use crate::talker::{Item, MessageKind, MoraleChange, NpcAction, Position, RuleSetting, Talker};
use crate::vars::value::{RawDuration, RawDurationPart, RawIntPart};
use crate::vars::{
    resolve_var, DurationOrVar, IntOrVar, RawDurationOrVar, RawIntOrVar, RawStrOrVar, StrOrVar,
    TimeDuration, VarRef, VarScope,
};

pub use talk::{Consequence, TalkEffect};

/// Control requests an effect hands back to whoever runs the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
    OpenDialogue { topic: Option<String> },
    TakeControl,
}

/// Mutable access to a conversation, used while effects run
pub trait EffectContext: DialogueView {
    fn actor_mut(&mut self, target: Target) -> &mut dyn Talker;
    /// Write a variable; `None` removes it
    fn write_var(&mut self, var: &VarRef, value: Option<&str>) -> Result<()>;
    /// Re-read the missions the NPC has assigned to the player
    fn refresh_missions(&mut self);
    fn handoff(&mut self, handoff: Handoff);
}

// ============================================================================
// Resolved Effects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AssignOp {
    #[serde(rename = "=")]
    Set,
    #[serde(rename = "+=")]
    Add,
    #[serde(rename = "-=")]
    Sub,
    #[serde(rename = "*=")]
    Mul,
    #[serde(rename = "/=")]
    Div,
    #[serde(rename = "%=")]
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffectKind {
    AddVar { var: VarRef, value: String },
    RemoveVar { var: VarRef },
    AdjustVar { var: VarRef, adjustment: IntOrVar },
    SetStringVar { var: VarRef, value: StrOrVar },
    Arithmetic { var: VarRef, op: AssignOp, expr: Expr },
    AddTrait(String),
    RemoveTrait(String),
    Mutate { category: Option<String>, use_vitamins: bool },
    AddEffect { id: String, duration: Option<DurationOrVar>, intensity: IntOrVar },
    RemoveEffect(String),
    AddBionic(String),
    RemoveBionic(String),
    SpawnItem { item: String, category: String, count: IntOrVar },
    BuyItem { item: String, category: String, count: IntOrVar, cost: IntOrVar },
    SellItem { item: String, count: IntOrVar, cost: IntOrVar },
    ConsumeItem { item: String, count: IntOrVar },
    RemoveItemWith(String),
    SpendCash(IntOrVar),
    ChangeFaction(String),
    AddFactionRep(IntOrVar),
    AddFactionTrust(IntOrVar),
    AssignMission(String),
    FinishMission { mission: String, success: bool },
    OfferMission(String),
    AddMission(String),
    ToggleRule(String),
    SetRule(String),
    ClearRule(String),
    RuleSetting { setting: RuleSetting, value: String },
    SetClass(String),
    AddDebt(IntOrVar),
    CastSpell { spell: String, targeted: bool },
    AddMorale(Box<MoraleParams>),
    LoseMorale(String),
    Message { text: StrOrVar, kind: MessageKind },
    Sound { text: String, volume: IntOrVar, ambient: bool },
    ModHealthy { amount: IntOrVar, cap: IntOrVar },
    ModFatigue(IntOrVar),
    AddWet(IntOrVar),
    AssignActivity { activity: String, duration: DurationOrVar },
    Teleport { location: Position, relative: bool },
    SpawnMonster { monster: String, count: IntOrVar, hostile: bool, radius: i32 },
    LearnRecipe(String),
    NpcFirstTopic(String),
    OpenDialogue(Option<String>),
    TakeControl,
    Action(NpcAction),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoraleParams {
    pub kind: String,
    pub bonus: IntOrVar,
    pub max_bonus: IntOrVar,
    pub duration: DurationOrVar,
    pub decay_start: DurationOrVar,
    pub capped: bool,
}

/// One effect plus the actor it acts on
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub kind: EffectKind,
    pub target: Target,
}

// ============================================================================
// Raw Effects (direct from JSON)
// ============================================================================

fn one() -> RawIntOrVar {
    RawIntOrVar::Single(RawIntPart::Literal(1))
}

fn zero() -> RawIntOrVar {
    RawIntOrVar::Single(RawIntPart::Literal(0))
}

fn default_true() -> bool {
    true
}

fn default_radius() -> i32 {
    3
}

fn duration_text(text: &str) -> RawDurationOrVar {
    RawDurationOrVar::Single(RawDurationPart::Literal(RawDuration::Text(text.to_string())))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawEffect {
    AddVar {
        var: String,
        #[serde(default)]
        scope: VarScope,
        var_type: Option<String>,
        context: Option<String>,
        value: String,
    },
    RemoveVar {
        var: String,
        #[serde(default)]
        scope: VarScope,
        var_type: Option<String>,
        context: Option<String>,
    },
    AdjustVar {
        var: String,
        #[serde(default)]
        scope: VarScope,
        var_type: Option<String>,
        context: Option<String>,
        adjustment: RawIntOrVar,
    },
    SetStringVar {
        var: String,
        #[serde(default)]
        scope: VarScope,
        var_type: Option<String>,
        context: Option<String>,
        value: RawStrOrVar,
    },
    Arithmetic {
        var: String,
        #[serde(default)]
        scope: VarScope,
        var_type: Option<String>,
        context: Option<String>,
        op: AssignOp,
        expr: Value,
    },
    AddTrait {
        #[serde(default)]
        target: Target,
        id: String,
    },
    RemoveTrait {
        #[serde(default)]
        target: Target,
        id: String,
    },
    Mutate {
        #[serde(default)]
        target: Target,
        category: Option<String>,
        #[serde(default)]
        use_vitamins: bool,
    },
    AddEffect {
        #[serde(default)]
        target: Target,
        id: String,
        duration: Option<RawDurationOrVar>,
        #[serde(default = "zero")]
        intensity: RawIntOrVar,
    },
    RemoveEffect {
        #[serde(default)]
        target: Target,
        id: String,
    },
    AddBionic {
        #[serde(default)]
        target: Target,
        id: String,
    },
    LoseBionic {
        #[serde(default)]
        target: Target,
        id: String,
    },
    SpawnItem {
        #[serde(default)]
        target: Target,
        item: String,
        #[serde(default)]
        category: String,
        #[serde(default = "one")]
        count: RawIntOrVar,
    },
    BuyItem {
        item: String,
        #[serde(default)]
        category: String,
        #[serde(default = "one")]
        count: RawIntOrVar,
        cost: RawIntOrVar,
    },
    SellItem {
        item: String,
        #[serde(default = "one")]
        count: RawIntOrVar,
        cost: RawIntOrVar,
    },
    ConsumeItem {
        #[serde(default)]
        target: Target,
        item: String,
        #[serde(default = "one")]
        count: RawIntOrVar,
    },
    RemoveItemWith {
        #[serde(default)]
        target: Target,
        item: String,
    },
    SpendCash {
        amount: RawIntOrVar,
    },
    ChangeFaction {
        faction: String,
    },
    AddFactionRep {
        value: RawIntOrVar,
    },
    AddFactionTrust {
        value: RawIntOrVar,
    },
    AssignMission {
        mission: String,
    },
    FinishMission {
        mission: String,
        #[serde(default = "default_true")]
        success: bool,
    },
    OfferMission {
        mission: String,
    },
    AddMission {
        mission: String,
    },
    ToggleNpcRule {
        rule: String,
    },
    SetNpcRule {
        rule: String,
    },
    ClearNpcRule {
        rule: String,
    },
    SetNpcEngagementRule {
        value: String,
    },
    SetNpcAimRule {
        value: String,
    },
    SetNpcCbmReserveRule {
        value: String,
    },
    SetNpcCbmRechargeRule {
        value: String,
    },
    SetClass {
        class: String,
    },
    AddDebt {
        amount: RawIntOrVar,
    },
    CastSpell {
        #[serde(default)]
        target: Target,
        spell: String,
        #[serde(default)]
        targeted: bool,
    },
    AddMorale {
        #[serde(default)]
        target: Target,
        morale_type: String,
        bonus: RawIntOrVar,
        max_bonus: Option<RawIntOrVar>,
        duration: Option<RawDurationOrVar>,
        decay_start: Option<RawDurationOrVar>,
        #[serde(default)]
        capped: bool,
    },
    LoseMorale {
        #[serde(default)]
        target: Target,
        morale_type: String,
    },
    Message {
        #[serde(default)]
        target: Target,
        message: RawStrOrVar,
        #[serde(default)]
        kind: MessageKind,
    },
    Sound {
        #[serde(default)]
        target: Target,
        message: String,
        volume: RawIntOrVar,
        #[serde(default)]
        ambient: bool,
    },
    ModHealthy {
        #[serde(default)]
        target: Target,
        amount: RawIntOrVar,
        #[serde(default = "zero")]
        cap: RawIntOrVar,
    },
    ModFatigue {
        #[serde(default)]
        target: Target,
        amount: RawIntOrVar,
    },
    AddWet {
        #[serde(default)]
        target: Target,
        amount: RawIntOrVar,
    },
    AssignActivity {
        #[serde(default)]
        target: Target,
        activity: String,
        duration: RawDurationOrVar,
    },
    Teleport {
        #[serde(default)]
        target: Target,
        location: Position,
        #[serde(default)]
        relative: bool,
    },
    SpawnMonster {
        #[serde(default)]
        target: Target,
        monster: String,
        #[serde(default = "one")]
        count: RawIntOrVar,
        #[serde(default = "default_true")]
        hostile: bool,
        #[serde(default = "default_radius")]
        radius: i32,
    },
    LearnRecipe {
        #[serde(default)]
        target: Target,
        recipe: String,
    },
    NpcFirstTopic {
        topic: String,
    },
    OpenDialogue {
        topic: Option<String>,
    },
    TakeControl,
    #[serde(other)]
    Unknown,
}

impl Effect {
    pub fn new(kind: EffectKind, target: Target) -> Self {
        Self { kind, target }
    }

    /// Parse a list entry: a named NPC action or a typed object
    pub fn from_json(json: &Value) -> Result<Self> {
        match json {
            Value::String(name) => Self::from_name(name),
            Value::Object(map) => {
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DialogueError::content("effect", "missing \"type\""))?
                    .to_string();
                let raw: RawEffect = serde_json::from_value(json.clone())
                    .map_err(|e| DialogueError::content(format!("effect {}", kind), e.to_string()))?;
                Self::from_raw(raw, &kind)
            }
            other => Err(DialogueError::content(
                "effect",
                format!("expected string or object, got {}", other),
            )),
        }
    }

    fn from_name(name: &str) -> Result<Self> {
        if name == "take_control_menu" {
            return Ok(Self::new(EffectKind::TakeControl, Target::Npc));
        }
        NpcAction::from_str(name)
            .map(|action| Self::new(EffectKind::Action(action), Target::Npc))
            .ok_or_else(|| DialogueError::UnknownEffect(name.to_string()))
    }

    fn from_raw(raw: RawEffect, kind: &str) -> Result<Self> {
        use EffectKind as K;
        let int = IntOrVar::from_raw;
        let var = |name: &str, scope, var_type: &Option<String>, context: &Option<String>| {
            resolve_var(name, scope, var_type.as_deref(), context.as_deref())
        };
        let npc = Target::Npc;
        let u = Target::U;
        let (kind, target) = match raw {
            RawEffect::AddVar { var: v, scope, var_type, context, value } => (
                K::AddVar { var: var(&v, scope, &var_type, &context)?, value },
                u,
            ),
            RawEffect::RemoveVar { var: v, scope, var_type, context } => {
                (K::RemoveVar { var: var(&v, scope, &var_type, &context)? }, u)
            }
            RawEffect::AdjustVar { var: v, scope, var_type, context, adjustment } => (
                K::AdjustVar {
                    var: var(&v, scope, &var_type, &context)?,
                    adjustment: int(&adjustment)?,
                },
                u,
            ),
            RawEffect::SetStringVar { var: v, scope, var_type, context, value } => (
                K::SetStringVar {
                    var: var(&v, scope, &var_type, &context)?,
                    value: StrOrVar::from_raw(&value)?,
                },
                u,
            ),
            RawEffect::Arithmetic { var: v, scope, var_type, context, op, expr } => (
                K::Arithmetic {
                    var: var(&v, scope, &var_type, &context)?,
                    op,
                    expr: Expr::from_json(&expr)?,
                },
                u,
            ),
            RawEffect::AddTrait { target, id } => (K::AddTrait(id), target),
            RawEffect::RemoveTrait { target, id } => (K::RemoveTrait(id), target),
            RawEffect::Mutate { target, category, use_vitamins } => {
                (K::Mutate { category, use_vitamins }, target)
            }
            RawEffect::AddEffect { target, id, duration, intensity } => (
                K::AddEffect {
                    id,
                    duration: duration.as_ref().map(DurationOrVar::from_raw).transpose()?,
                    intensity: int(&intensity)?,
                },
                target,
            ),
            RawEffect::RemoveEffect { target, id } => (K::RemoveEffect(id), target),
            RawEffect::AddBionic { target, id } => (K::AddBionic(id), target),
            RawEffect::LoseBionic { target, id } => (K::RemoveBionic(id), target),
            RawEffect::SpawnItem { target, item, category, count } => (
                K::SpawnItem { item, category, count: int(&count)? },
                target,
            ),
            RawEffect::BuyItem { item, category, count, cost } => (
                K::BuyItem { item, category, count: int(&count)?, cost: int(&cost)? },
                u,
            ),
            RawEffect::SellItem { item, count, cost } => (
                K::SellItem { item, count: int(&count)?, cost: int(&cost)? },
                u,
            ),
            RawEffect::ConsumeItem { target, item, count } => {
                (K::ConsumeItem { item, count: int(&count)? }, target)
            }
            RawEffect::RemoveItemWith { target, item } => (K::RemoveItemWith(item), target),
            RawEffect::SpendCash { amount } => (K::SpendCash(int(&amount)?), u),
            RawEffect::ChangeFaction { faction } => (K::ChangeFaction(faction), npc),
            RawEffect::AddFactionRep { value } => (K::AddFactionRep(int(&value)?), npc),
            RawEffect::AddFactionTrust { value } => (K::AddFactionTrust(int(&value)?), npc),
            RawEffect::AssignMission { mission } => (K::AssignMission(mission), npc),
            RawEffect::FinishMission { mission, success } => {
                (K::FinishMission { mission, success }, npc)
            }
            RawEffect::OfferMission { mission } => (K::OfferMission(mission), npc),
            RawEffect::AddMission { mission } => (K::AddMission(mission), npc),
            RawEffect::ToggleNpcRule { rule } => (K::ToggleRule(rule), npc),
            RawEffect::SetNpcRule { rule } => (K::SetRule(rule), npc),
            RawEffect::ClearNpcRule { rule } => (K::ClearRule(rule), npc),
            RawEffect::SetNpcEngagementRule { value } => {
                (K::RuleSetting { setting: RuleSetting::Engagement, value }, npc)
            }
            RawEffect::SetNpcAimRule { value } => {
                (K::RuleSetting { setting: RuleSetting::Aim, value }, npc)
            }
            RawEffect::SetNpcCbmReserveRule { value } => {
                (K::RuleSetting { setting: RuleSetting::CbmReserve, value }, npc)
            }
            RawEffect::SetNpcCbmRechargeRule { value } => {
                (K::RuleSetting { setting: RuleSetting::CbmRecharge, value }, npc)
            }
            RawEffect::SetClass { class } => (K::SetClass(class), npc),
            RawEffect::AddDebt { amount } => (K::AddDebt(int(&amount)?), npc),
            RawEffect::CastSpell { target, spell, targeted } => {
                (K::CastSpell { spell, targeted }, target)
            }
            RawEffect::AddMorale {
                target,
                morale_type,
                bonus,
                max_bonus,
                duration,
                decay_start,
                capped,
            } => {
                let max_bonus = max_bonus.unwrap_or_else(|| bonus.clone());
                let duration = duration.unwrap_or_else(|| duration_text("1 h"));
                let decay_start = decay_start.unwrap_or_else(|| duration_text("30 m"));
                let params = MoraleParams {
                    kind: morale_type,
                    bonus: int(&bonus)?,
                    max_bonus: int(&max_bonus)?,
                    duration: DurationOrVar::from_raw(&duration)?,
                    decay_start: DurationOrVar::from_raw(&decay_start)?,
                    capped,
                };
                (K::AddMorale(Box::new(params)), target)
            }
            RawEffect::LoseMorale { target, morale_type } => (K::LoseMorale(morale_type), target),
            RawEffect::Message { target, message, kind } => (
                K::Message { text: StrOrVar::from_raw(&message)?, kind },
                target,
            ),
            RawEffect::Sound { target, message, volume, ambient } => (
                K::Sound { text: message, volume: int(&volume)?, ambient },
                target,
            ),
            RawEffect::ModHealthy { target, amount, cap } => (
                K::ModHealthy { amount: int(&amount)?, cap: int(&cap)? },
                target,
            ),
            RawEffect::ModFatigue { target, amount } => (K::ModFatigue(int(&amount)?), target),
            RawEffect::AddWet { target, amount } => (K::AddWet(int(&amount)?), target),
            RawEffect::AssignActivity { target, activity, duration } => (
                K::AssignActivity { activity, duration: DurationOrVar::from_raw(&duration)? },
                target,
            ),
            RawEffect::Teleport { target, location, relative } => {
                (K::Teleport { location, relative }, target)
            }
            RawEffect::SpawnMonster { target, monster, count, hostile, radius } => (
                K::SpawnMonster { monster, count: int(&count)?, hostile, radius },
                target,
            ),
            RawEffect::LearnRecipe { target, recipe } => (K::LearnRecipe(recipe), target),
            RawEffect::NpcFirstTopic { topic } => (K::NpcFirstTopic(topic), npc),
            RawEffect::OpenDialogue { topic } => (K::OpenDialogue(topic), u),
            RawEffect::TakeControl => (K::TakeControl, npc),
            RawEffect::Unknown => return Err(DialogueError::UnknownEffect(kind.to_string())),
        };
        Ok(Self::new(kind, target))
    }

    /// Parse a single effect or an array of them
    pub fn list_from_json(json: &Value) -> Result<Vec<Effect>> {
        match json {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, e)| Effect::from_json(e).map_err(|err| err.in_context(&format!("effect[{}]", i))))
                .collect(),
            single => Ok(vec![Effect::from_json(single)?]),
        }
    }

    /// True when the effect acts on the npc side
    pub fn targets_other(&self) -> bool {
        self.target.is_npc()
    }

    pub fn name(&self) -> &'static str {
        use EffectKind as K;
        match &self.kind {
            K::AddVar { .. } => "add_var",
            K::RemoveVar { .. } => "remove_var",
            K::AdjustVar { .. } => "adjust_var",
            K::SetStringVar { .. } => "set_string_var",
            K::Arithmetic { .. } => "arithmetic",
            K::AddTrait(_) => "add_trait",
            K::RemoveTrait(_) => "remove_trait",
            K::Mutate { .. } => "mutate",
            K::AddEffect { .. } => "add_effect",
            K::RemoveEffect(_) => "remove_effect",
            K::AddBionic(_) => "add_bionic",
            K::RemoveBionic(_) => "lose_bionic",
            K::SpawnItem { .. } => "spawn_item",
            K::BuyItem { .. } => "buy_item",
            K::SellItem { .. } => "sell_item",
            K::ConsumeItem { .. } => "consume_item",
            K::RemoveItemWith(_) => "remove_item_with",
            K::SpendCash(_) => "spend_cash",
            K::ChangeFaction(_) => "change_faction",
            K::AddFactionRep(_) => "add_faction_rep",
            K::AddFactionTrust(_) => "add_faction_trust",
            K::AssignMission(_) => "assign_mission",
            K::FinishMission { .. } => "finish_mission",
            K::OfferMission(_) => "offer_mission",
            K::AddMission(_) => "add_mission",
            K::ToggleRule(_) => "toggle_npc_rule",
            K::SetRule(_) => "set_npc_rule",
            K::ClearRule(_) => "clear_npc_rule",
            K::RuleSetting { .. } => "set_npc_rule_setting",
            K::SetClass(_) => "set_class",
            K::AddDebt(_) => "add_debt",
            K::CastSpell { .. } => "cast_spell",
            K::AddMorale(_) => "add_morale",
            K::LoseMorale(_) => "lose_morale",
            K::Message { .. } => "message",
            K::Sound { .. } => "sound",
            K::ModHealthy { .. } => "mod_healthy",
            K::ModFatigue(_) => "mod_fatigue",
            K::AddWet(_) => "add_wet",
            K::AssignActivity { .. } => "assign_activity",
            K::Teleport { .. } => "teleport",
            K::SpawnMonster { .. } => "spawn_monster",
            K::LearnRecipe(_) => "learn_recipe",
            K::NpcFirstTopic(_) => "npc_first_topic",
            K::OpenDialogue(_) => "open_dialogue",
            K::TakeControl => "take_control",
            K::Action(action) => action.as_str(),
        }
    }

    /// Items this effect is likely to hand the player, with counts
    pub fn likely_rewards(&self) -> Option<(String, i32)> {
        match &self.kind {
            EffectKind::SpawnItem { item, count, .. } if self.target == Target::U => {
                Some((item.clone(), clamp_i32(count.preview())))
            }
            EffectKind::BuyItem { item, count, .. } => {
                Some((item.clone(), clamp_i32(count.preview())))
            }
            _ => None,
        }
    }

    /// Run the effect against the conversation
    pub fn execute<C: EffectContext>(&self, ctx: &mut C) -> Result<()> {
        use EffectKind as K;
        let target = self.target;
        let other = if target.is_npc() { Target::U } else { Target::Npc };
        match &self.kind {
            K::AddVar { var, value } => ctx.write_var(var, Some(value))?,
            K::RemoveVar { var } => ctx.write_var(var, None)?,
            K::AdjustVar { var, adjustment } => {
                let delta = adjustment.evaluate(&*ctx)?;
                let current = read_int(&*ctx, var)?;
                ctx.write_var(var, Some(&current.saturating_add(delta).to_string()))?;
            }
            K::SetStringVar { var, value } => {
                let value = value.evaluate(&*ctx)?;
                ctx.write_var(var, Some(&value))?;
            }
            K::Arithmetic { var, op, expr } => {
                let rhs = expr.evaluate(&*ctx)?;
                let current = read_int(&*ctx, var)?;
                let result = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => current.saturating_add(rhs),
                    AssignOp::Sub => current.saturating_sub(rhs),
                    AssignOp::Mul => current.saturating_mul(rhs),
                    AssignOp::Div | AssignOp::Rem if rhs == 0 => {
                        return Err(DialogueError::DivisionByZero);
                    }
                    AssignOp::Div => current.wrapping_div(rhs),
                    AssignOp::Rem => current.wrapping_rem(rhs),
                };
                ctx.write_var(var, Some(&result.to_string()))?;
            }
            K::AddTrait(id) => ctx.actor_mut(target).add_trait(id),
            K::RemoveTrait(id) => ctx.actor_mut(target).remove_trait(id),
            K::Mutate { category, use_vitamins } => {
                ctx.actor_mut(target).mutate(category.as_deref(), *use_vitamins)?
            }
            K::AddEffect { id, duration, intensity } => {
                let intensity = clamp_i32(intensity.evaluate(&*ctx)?);
                let (duration, permanent) = match duration {
                    Some(d) => (d.evaluate(&*ctx)?, false),
                    None => (TimeDuration::default(), true),
                };
                ctx.actor_mut(target).add_effect(id, duration, permanent, intensity);
            }
            K::RemoveEffect(id) => ctx.actor_mut(target).remove_effect(id),
            K::AddBionic(id) => ctx.actor_mut(target).add_bionic(id),
            K::RemoveBionic(id) => ctx.actor_mut(target).remove_bionic(id),
            K::SpawnItem { item, category, count } => {
                let count = positive_count(item, count.evaluate(&*ctx)?)?;
                ctx.actor_mut(target).add_item(Item::new(item, category, count))?;
            }
            K::BuyItem { item, category, count, cost } => {
                let count = positive_count(item, count.evaluate(&*ctx)?)?;
                let cost = cost.evaluate(&*ctx)?;
                let bought = Item::new(item, category, count);
                ensure_funds(ctx.alpha(), cost)?;
                ensure_accepts(ctx.alpha(), &bought)?;
                pay(ctx, cost)?;
                ctx.actor_mut(Target::U).add_item(bought)?;
            }
            K::SellItem { item, count, cost } => {
                let count = positive_count(item, count.evaluate(&*ctx)?)?;
                let cost = cost.evaluate(&*ctx)?;
                if ctx.alpha().item_count(item) < count {
                    return Err(DialogueError::lookup("item", item));
                }
                let sold = Item::new(item, &find_category(ctx.alpha(), item), count);
                ensure_funds(ctx.beta(), cost)?;
                ensure_accepts(ctx.beta(), &sold)?;
                ctx.actor_mut(Target::U).remove_items(item, count)?;
                ctx.actor_mut(Target::Npc).add_item(sold)?;
                ctx.actor_mut(Target::Npc).add_cash(cost.saturating_neg());
                ctx.actor_mut(Target::U).add_cash(cost);
            }
            K::ConsumeItem { item, count } => {
                let count = positive_count(item, count.evaluate(&*ctx)?)?;
                ctx.actor_mut(target).remove_items(item, count)?;
            }
            K::RemoveItemWith(item) => {
                let removed = ctx.actor_mut(target).remove_all_items(item);
                debug!("Removed {} x {}", removed, item);
            }
            K::SpendCash(amount) => {
                let amount = amount.evaluate(&*ctx)?;
                ensure_funds(ctx.alpha(), amount)?;
                ctx.actor_mut(Target::U).add_cash(amount.saturating_neg());
            }
            K::ChangeFaction(faction) => ctx.actor_mut(target).set_faction(faction),
            K::AddFactionRep(value) => {
                let value = clamp_i32(value.evaluate(&*ctx)?);
                ctx.actor_mut(target).change_faction_rep(value);
            }
            K::AddFactionTrust(value) => {
                let value = clamp_i32(value.evaluate(&*ctx)?);
                ctx.actor_mut(target).change_faction_trust(value);
            }
            K::AssignMission(mission) => {
                ctx.actor_mut(Target::Npc).assign_mission(mission)?;
                ctx.actor_mut(Target::U).assign_mission(mission)?;
            }
            K::FinishMission { mission, success } => {
                ctx.actor_mut(Target::Npc).finish_mission(mission, *success)?;
                ctx.actor_mut(Target::U).finish_mission(mission, *success)?;
            }
            K::OfferMission(mission) => ctx.actor_mut(target).offer_mission(mission)?,
            K::AddMission(mission) => {
                ctx.actor_mut(Target::Npc).add_mission(mission)?;
                ctx.actor_mut(Target::U).assign_mission(mission)?;
            }
            K::ToggleRule(rule) => ctx.actor_mut(target).toggle_rule(rule),
            K::SetRule(rule) => ctx.actor_mut(target).set_rule(rule),
            K::ClearRule(rule) => ctx.actor_mut(target).clear_rule(rule),
            K::RuleSetting { setting, value } => {
                ctx.actor_mut(target).set_rule_setting(*setting, value)
            }
            K::SetClass(class) => ctx.actor_mut(target).set_class(class),
            K::AddDebt(amount) => {
                let amount = clamp_i32(amount.evaluate(&*ctx)?);
                ctx.actor_mut(target).add_debt(amount);
            }
            K::CastSpell { spell, targeted } => {
                let at = targeted.then(|| ctx.actor(other).position());
                ctx.actor_mut(target).cast_spell(spell, at)?;
            }
            K::AddMorale(params) => {
                let change = MoraleChange {
                    kind: params.kind.clone(),
                    bonus: clamp_i32(params.bonus.evaluate(&*ctx)?),
                    max_bonus: clamp_i32(params.max_bonus.evaluate(&*ctx)?),
                    duration: params.duration.evaluate(&*ctx)?,
                    decay_start: params.decay_start.evaluate(&*ctx)?,
                    capped: params.capped,
                };
                ctx.actor_mut(target).add_morale(&change);
            }
            K::LoseMorale(kind) => ctx.actor_mut(target).remove_morale(kind),
            K::Message { text, kind } => {
                let text = text.evaluate(&*ctx)?;
                ctx.actor_mut(target).add_message(&text, *kind);
            }
            K::Sound { text, volume, ambient } => {
                let volume = clamp_i32(volume.evaluate(&*ctx)?);
                ctx.actor_mut(target).make_sound(text, volume, *ambient);
            }
            K::ModHealthy { amount, cap } => {
                let amount = clamp_i32(amount.evaluate(&*ctx)?);
                let cap = clamp_i32(cap.evaluate(&*ctx)?);
                ctx.actor_mut(target).mod_healthy(amount, cap);
            }
            K::ModFatigue(amount) => {
                let amount = clamp_i32(amount.evaluate(&*ctx)?);
                ctx.actor_mut(target).mod_fatigue(amount);
            }
            K::AddWet(amount) => {
                let amount = clamp_i32(amount.evaluate(&*ctx)?);
                ctx.actor_mut(target).add_wet(amount);
            }
            K::AssignActivity { activity, duration } => {
                let duration = duration.evaluate(&*ctx)?;
                ctx.actor_mut(target).assign_activity(activity, duration);
            }
            K::Teleport { location, relative } => {
                let to = if *relative {
                    ctx.actor(target).position().offset(location.x, location.y, location.z)
                } else {
                    *location
                };
                ctx.actor_mut(target).teleport(to)?;
            }
            K::SpawnMonster { monster, count, hostile, radius } => {
                let count = clamp_i32(count.evaluate(&*ctx)?);
                let spawned = ctx.actor_mut(target).spawn_monster(monster, count, *hostile, *radius)?;
                debug!("Spawned {}/{} {}", spawned, count, monster);
            }
            K::LearnRecipe(recipe) => ctx.actor_mut(target).learn_recipe(recipe)?,
            K::NpcFirstTopic(topic) => ctx.actor_mut(target).set_first_topic(topic),
            K::OpenDialogue(topic) => ctx.handoff(Handoff::OpenDialogue { topic: topic.clone() }),
            K::TakeControl => {
                ctx.actor_mut(target).take_control()?;
                ctx.handoff(Handoff::TakeControl);
            }
            K::Action(action) => ctx.actor_mut(target).perform_action(*action),
        }
        Ok(())
    }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Item transfers move at least one unit
fn positive_count(item: &str, count: i64) -> Result<i32> {
    if count <= 0 {
        return Err(DialogueError::invalid_count(item, count));
    }
    Ok(clamp_i32(count))
}

fn ensure_funds(payer: &dyn Talker, cost: i64) -> Result<()> {
    let available = payer.cash();
    if available < cost {
        return Err(DialogueError::InsufficientFunds { needed: cost, available });
    }
    Ok(())
}

fn ensure_accepts(receiver: &dyn Talker, item: &Item) -> Result<()> {
    if !receiver.can_accept_item(item) {
        return Err(DialogueError::ItemRejected {
            actor: receiver.name(),
            item: item.type_id.clone(),
        });
    }
    Ok(())
}

/// Stored integer, 0 when unset
fn read_int<C: EffectContext>(ctx: &C, var: &VarRef) -> Result<i64> {
    match ctx.read_var(var)?.filter(|v| !v.is_empty()) {
        None => Ok(0),
        Some(stored) => stored.trim().parse::<i64>().map_err(|_| DialogueError::VarParse {
            name: var.name.clone(),
            value: stored,
            expected: "an integer",
        }),
    }
}

/// Move cash from the player to the NPC
fn pay<C: EffectContext>(ctx: &mut C, cost: i64) -> Result<()> {
    ensure_funds(ctx.alpha(), cost)?;
    ctx.actor_mut(Target::U).add_cash(cost.saturating_neg());
    ctx.actor_mut(Target::Npc).add_cash(cost);
    Ok(())
}

fn find_category(actor: &dyn Talker, type_id: &str) -> String {
    let mut category = String::new();
    crate::talker::visit_items(actor.inventory(), &mut |it| {
        if category.is_empty() && it.type_id == type_id {
            category = it.category.clone();
        }
    });
    category
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::tests::TestView;
    use serde_json::json;

    impl EffectContext for TestView {
        fn actor_mut(&mut self, target: Target) -> &mut dyn Talker {
            match target {
                Target::U => &mut self.u,
                Target::Npc => &mut self.npc,
            }
        }

        fn write_var(&mut self, var: &VarRef, value: Option<&str>) -> Result<()> {
            let actor: &mut dyn Talker = match var.scope {
                VarScope::Global => {
                    match value {
                        Some(v) => self.globals.set(&var.name, v),
                        None => {
                            self.globals.remove(&var.name);
                        }
                    }
                    return Ok(());
                }
                VarScope::U => &mut self.u,
                VarScope::Npc => &mut self.npc,
                other => return Err(DialogueError::UnsupportedScope(other.as_str().to_string())),
            };
            match value {
                Some(v) => actor.set_value(&var.name, v),
                None => actor.remove_value(&var.name),
            }
            Ok(())
        }

        fn refresh_missions(&mut self) {
            self.missions = self.npc.assigned_missions();
        }

        fn handoff(&mut self, _handoff: Handoff) {}
    }

    fn run(view: &mut TestView, json: Value) -> Result<()> {
        Effect::from_json(&json)?.execute(view)
    }

    #[test]
    fn test_adjust_var_from_unset() {
        let mut view = TestView::new();
        run(&mut view, json!({"type": "adjust_var", "var": "trust", "scope": "global", "adjustment": 5}))
            .unwrap();
        assert_eq!(view.globals.get("trust"), Some("5".to_string()));
        run(&mut view, json!({"type": "adjust_var", "var": "trust", "scope": "global", "adjustment": -2}))
            .unwrap();
        assert_eq!(view.globals.get("trust"), Some("3".to_string()));
    }

    #[test]
    fn test_write_then_read_actor_vars() {
        let mut view = TestView::new();
        run(&mut view, json!({"type": "add_var", "var": "met", "scope": "npc", "value": "yes"})).unwrap();
        assert_eq!(view.npc.get_value("met"), Some("yes".to_string()));
        run(&mut view, json!({"type": "set_string_var", "var": "title", "value":
            {"var": "met", "scope": "npc", "default": "no"}}))
        .unwrap();
        assert_eq!(view.u.get_value("title"), Some("yes".to_string()));
        run(&mut view, json!({"type": "remove_var", "var": "met", "scope": "npc"})).unwrap();
        assert_eq!(view.npc.get_value("met"), None);
    }

    #[test]
    fn test_arithmetic_effect() {
        let mut view = TestView::new();
        view.globals.set("n", "10");
        run(&mut view, json!({"type": "arithmetic", "var": "n", "scope": "global", "op": "*=",
            "expr": {"op": "+", "args": [1, 2]}}))
        .unwrap();
        assert_eq!(view.globals.get("n"), Some("30".to_string()));
        assert!(matches!(
            run(&mut view, json!({"type": "arithmetic", "var": "n", "scope": "global", "op": "/=", "expr": 0})),
            Err(DialogueError::DivisionByZero)
        ));
        assert_eq!(view.globals.get("n"), Some("30".to_string()));
    }

    #[test]
    fn test_buy_and_sell() {
        let mut view = TestView::new();
        view.u.character.cash = 100;
        run(&mut view, json!({"type": "buy_item", "item": "rope", "category": "tools", "cost": 60})).unwrap();
        assert!(view.u.has_item("rope"));
        assert_eq!(view.u.cash(), 40);
        assert_eq!(view.npc.cash(), 60);

        assert!(matches!(
            run(&mut view, json!({"type": "buy_item", "item": "rope", "cost": 60})),
            Err(DialogueError::InsufficientFunds { needed: 60, available: 40 })
        ));

        run(&mut view, json!({"type": "sell_item", "item": "rope", "cost": 25})).unwrap();
        assert!(!view.u.has_item("rope"));
        assert!(view.npc.has_item("rope"));
        assert_eq!(view.u.cash(), 65);
    }

    #[test]
    fn test_sale_to_broke_npc_changes_nothing() {
        let mut view = TestView::new();
        view.u.character.inventory.push(Item::new("rope", "tools", 1));
        assert!(matches!(
            run(&mut view, json!({"type": "sell_item", "item": "rope", "cost": 500})),
            Err(DialogueError::InsufficientFunds { needed: 500, available: 0 })
        ));
        assert!(view.u.has_item("rope"));
        assert!(!view.npc.has_item("rope"));
        assert_eq!(view.u.cash(), 0);
        assert_eq!(view.npc.cash(), 0);

        // Selling more than the player carries fails before any cash moves
        view.npc.character.cash = 1000;
        assert!(run(&mut view, json!({"type": "sell_item", "item": "rope", "count": 2, "cost": 5})).is_err());
        assert_eq!(view.u.item_count("rope"), 1);
        assert_eq!(view.npc.cash(), 1000);
    }

    #[test]
    fn test_non_positive_counts_touch_nothing() {
        let mut view = TestView::new();
        view.u.character.inventory.push(Item::new("water", "drink", 1));
        view.u.character.cash = 50;
        view.npc.character.cash = 50;
        for effect in [
            json!({"type": "consume_item", "item": "water", "count": -3}),
            json!({"type": "consume_item", "item": "water", "count": 0}),
            json!({"type": "spawn_item", "item": "water", "count": -1}),
            json!({"type": "buy_item", "item": "water", "count": 0, "cost": 10}),
            json!({"type": "sell_item", "item": "water", "count": -2, "cost": 10}),
        ] {
            assert!(matches!(
                run(&mut view, effect),
                Err(DialogueError::InvalidCount { .. })
            ));
        }
        assert_eq!(view.u.item_count("water"), 1);
        assert!(!view.npc.has_item("water"));
        assert_eq!(view.u.cash(), 50);
        assert_eq!(view.npc.cash(), 50);
    }

    #[test]
    fn test_receiver_without_room_is_rejected() {
        struct NoPockets;
        impl Talker for NoPockets {
            fn name(&self) -> String {
                "ghost".to_string()
            }
        }
        assert!(matches!(
            ensure_accepts(&NoPockets, &Item::new("rope", "tools", 1)),
            Err(DialogueError::ItemRejected { .. })
        ));
        assert!(ensure_accepts(&TestView::new().npc, &Item::new("rope", "tools", 1)).is_ok());
    }

    #[test]
    fn test_mission_effects() {
        let mut view = TestView::new();
        view.npc = view.npc.clone().with_mission("find_dog", 30);
        run(&mut view, json!({"type": "assign_mission", "mission": "find_dog"})).unwrap();
        assert!(view.u.has_mission("find_dog"));
        assert_eq!(view.npc.assigned_missions(), vec!["find_dog".to_string()]);
        run(&mut view, json!({"type": "finish_mission", "mission": "find_dog"})).unwrap();
        assert!(!view.u.has_mission("find_dog"));
        assert!(run(&mut view, json!({"type": "assign_mission", "mission": "nope"})).is_err());
    }

    #[test]
    fn test_actor_targeting() {
        let mut view = TestView::new();
        let effect = Effect::from_json(&json!({"type": "add_trait", "target": "npc", "id": "SCARRED"})).unwrap();
        assert!(effect.targets_other());
        effect.execute(&mut view).unwrap();
        assert!(view.npc.has_trait("SCARRED"));
        assert!(!view.u.has_trait("SCARRED"));

        run(&mut view, json!({"type": "add_effect", "id": "drunk", "duration": "10 minutes", "intensity": 2}))
            .unwrap();
        assert!(view.u.has_effect("drunk"));
    }

    #[test]
    fn test_named_actions() {
        let mut view = TestView::new();
        let follow = Effect::from_json(&json!("follow")).unwrap();
        assert!(follow.targets_other());
        follow.execute(&mut view).unwrap();
        assert!(view.npc.is_following());
        assert!(matches!(
            Effect::from_json(&json!("dance")),
            Err(DialogueError::UnknownEffect(_))
        ));
        assert!(matches!(
            Effect::from_json(&json!({"type": "dance"})),
            Err(DialogueError::UnknownEffect(_))
        ));
    }

    #[test]
    fn test_list_errors_name_index() {
        let err = Effect::list_from_json(&json!(["follow", {"type": "add_trait"}])).unwrap_err();
        assert!(err.to_string().contains("effect[1]"));
    }

    #[test]
    fn test_likely_rewards() {
        let spawn = Effect::from_json(&json!({"type": "spawn_item", "item": "bandage", "count": 3})).unwrap();
        assert_eq!(spawn.likely_rewards(), Some(("bandage".to_string(), 3)));
        let to_npc = Effect::from_json(&json!({"type": "spawn_item", "target": "npc", "item": "bandage"})).unwrap();
        assert_eq!(to_npc.likely_rewards(), None);

        let ranged =
            Effect::from_json(&json!({"type": "spawn_item", "item": "arrow", "count": {"min": 2, "max": 5}}))
                .unwrap();
        assert_eq!(ranged.likely_rewards(), Some(("arrow".to_string(), 2)));
        let from_var = Effect::from_json(&json!({"type": "buy_item", "item": "arrow", "cost": 1,
            "count": {"var": "quiver", "default": 4}}))
        .unwrap();
        assert_eq!(from_var.likely_rewards(), Some(("arrow".to_string(), 4)));
    }

    #[test]
    fn test_failing_lookups() {
        let mut view = TestView::new();
        assert!(run(&mut view, json!({"type": "cast_spell", "spell": "fireball"})).is_err());
        assert!(run(&mut view, json!({"type": "learn_recipe", "recipe": "bread"})).is_err());
        assert!(run(&mut view, json!({"type": "spend_cash", "amount": 5})).is_err());
        assert!(run(&mut view, json!("take_control_menu")).is_err());
    }
}
