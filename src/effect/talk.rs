//! Effect lists attached to response outcomes

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Effect, EffectContext, EffectKind};
use crate::condition::Target;
use crate::error::Result;
use crate::talker::{NpcAction, Opinion, Talker};

pub const TALK_NONE: &str = "TALK_NONE";
pub const TALK_DONE: &str = "TALK_DONE";

/// What a response may lead to, worst first when compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Consequence {
    None,
    Action,
    Helpless,
    Hostile,
}

impl Consequence {
    fn of(effect: &Effect) -> Self {
        match &effect.kind {
            EffectKind::Action(NpcAction::Hostile | NpcAction::InsultCombat) => Consequence::Hostile,
            EffectKind::Action(
                NpcAction::PlayerWeaponDrop | NpcAction::PlayerWeaponAway | NpcAction::StartMugging,
            ) => Consequence::Helpless,
            EffectKind::AddVar { .. }
            | EffectKind::RemoveVar { .. }
            | EffectKind::AdjustVar { .. }
            | EffectKind::SetStringVar { .. }
            | EffectKind::Arithmetic { .. }
            | EffectKind::Message { .. } => Consequence::None,
            _ => Consequence::Action,
        }
    }
}

/// `{"topic": .., "effect": [..], "opinion": {..}, "mission_opinion": {..}}`
#[derive(Debug, Default, Deserialize)]
pub struct RawTalkEffect {
    pub topic: Option<String>,
    pub effect: Option<Value>,
    pub opinion: Option<Opinion>,
    pub mission_opinion: Option<Opinion>,
}

/// Everything that happens after one outcome of a response
#[derive(Debug, Clone, PartialEq)]
pub struct TalkEffect {
    pub next_topic: String,
    pub effects: Vec<Effect>,
    pub opinion: Opinion,
    /// Divisors applied to the selected mission's value
    pub mission_opinion: Opinion,
}

impl Default for TalkEffect {
    fn default() -> Self {
        Self::to_topic(TALK_NONE)
    }
}

impl TalkEffect {
    pub fn to_topic(topic: &str) -> Self {
        Self {
            next_topic: topic.to_string(),
            effects: Vec::new(),
            opinion: Opinion::default(),
            mission_opinion: Opinion::default(),
        }
    }

    pub fn from_raw(raw: &RawTalkEffect) -> Result<Self> {
        let effects = match &raw.effect {
            Some(json) => Effect::list_from_json(json)?,
            None => Vec::new(),
        };
        Ok(Self {
            next_topic: raw.topic.clone().unwrap_or_else(|| TALK_NONE.to_string()),
            effects,
            opinion: raw.opinion.unwrap_or_default(),
            mission_opinion: raw.mission_opinion.unwrap_or_default(),
        })
    }

    /// Worst consequence of running this list against `beta`
    pub fn consequence(&self, beta: &dyn Talker) -> Consequence {
        let from_opinion = if beta.check_hostile_response(self.opinion.anger) {
            Consequence::Hostile
        } else {
            Consequence::None
        };
        self.effects
            .iter()
            .map(Consequence::of)
            .fold(from_opinion, Consequence::max)
    }

    pub fn likely_rewards(&self) -> Vec<(String, i32)> {
        self.effects.iter().filter_map(Effect::likely_rewards).collect()
    }

    /// Run the effects in order and return the topic to go to next
    pub fn apply<C: EffectContext>(&self, ctx: &mut C) -> String {
        for effect in &self.effects {
            if let Err(e) = effect.execute(ctx) {
                warn!("Skipping effect {}: {}", effect.name(), e);
            }
        }

        let mut delta = self.opinion;
        if let Some(value) = ctx.beta().selected_mission_value() {
            let scaled = |divisor: i32| if divisor != 0 { value / divisor } else { 0 };
            let m = self.mission_opinion;
            delta.add(&Opinion {
                trust: scaled(m.trust),
                fear: scaled(m.fear),
                value: scaled(m.value),
                anger: scaled(m.anger),
                owed: scaled(m.owed),
            });
        }
        if !delta.is_zero() {
            ctx.actor_mut(Target::Npc).add_opinion(&delta);
        }
        if ctx.beta().turned_hostile() {
            debug!("{} turned hostile", ctx.beta().name());
            ctx.actor_mut(Target::Npc).make_angry();
            return TALK_DONE.to_string();
        }

        ctx.refresh_missions();
        self.next_topic.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::tests::TestView;
    use serde_json::json;

    fn talk(json: Value) -> TalkEffect {
        let raw: RawTalkEffect = serde_json::from_value(json).unwrap();
        TalkEffect::from_raw(&raw).unwrap()
    }

    #[test]
    fn test_consequence_priority() {
        let view = TestView::new();
        assert_eq!(talk(json!({"topic": "TALK_X"})).consequence(&view.npc), Consequence::None);
        assert_eq!(
            talk(json!({"effect": ["follow", "start_mugging"]})).consequence(&view.npc),
            Consequence::Helpless
        );
        assert_eq!(
            talk(json!({"effect": ["start_mugging", "hostile", "follow"]})).consequence(&view.npc),
            Consequence::Hostile
        );
        assert_eq!(
            talk(json!({"effect": [{"type": "adjust_var", "var": "x", "adjustment": 1}]}))
                .consequence(&view.npc),
            Consequence::None
        );
        assert_eq!(
            talk(json!({"opinion": {"anger": 50}})).consequence(&view.npc),
            Consequence::Hostile
        );
    }

    #[test]
    fn test_failed_effect_is_skipped() {
        let mut view = TestView::new();
        let t = talk(json!({"topic": "TALK_NEXT", "effect": [
            {"type": "consume_item", "item": "gold_ring"},
            {"type": "add_var", "var": "after", "scope": "global", "value": "1"}
        ]}));
        assert_eq!(t.apply(&mut view), "TALK_NEXT");
        assert_eq!(view.globals.get("after"), Some("1".to_string()));
    }

    #[test]
    fn test_mission_opinion_scaling() {
        let mut view = TestView::new();
        view.npc = view.npc.clone().with_mission("m", 40);
        view.npc.select_mission("m");
        let t = talk(json!({"opinion": {"trust": 1}, "mission_opinion": {"trust": 4, "value": 10}}));
        t.apply(&mut view);
        assert_eq!(view.npc.opinion.trust, 11);
        assert_eq!(view.npc.opinion.value, 4);
    }

    #[test]
    fn test_hostile_turn_ends_conversation() {
        let mut view = TestView::new();
        let t = talk(json!({"topic": "TALK_FRIEND", "opinion": {"anger": 25}}));
        assert_eq!(t.apply(&mut view), TALK_DONE);
        assert!(view.npc.hostile);
    }

    #[test]
    fn test_missions_refreshed_after_apply() {
        let mut view = TestView::new();
        view.npc = view.npc.clone().with_mission("m", 10);
        let t = talk(json!({"effect": [{"type": "assign_mission", "mission": "m"}]}));
        t.apply(&mut view);
        assert_eq!(view.missions, vec!["m".to_string()]);
    }
}
