//! Trial Resolver
//!
//! A trial turns a response into a gamble. The chance is computed from the
//! trial kind, its difficulty (0 is trivial, 100 is hopeless), the actors and
//! any named modifiers, clamped to `0..=100`, then rolled once.

use serde::Deserialize;
use serde_json::Value;

use crate::condition::{Condition, DialogueView};
use crate::error::{DialogueError, Result};
use crate::talker::SocialTrial;

/// Trait that makes every trial succeed
pub const MIND_CONTROL_TRAIT: &str = "DEBUG_MIND_CONTROL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialType {
    #[default]
    None,
    Lie,
    Persuade,
    Intimidate,
    SkillCheck,
    Condition,
}

impl TrialType {
    pub fn social(&self) -> Option<SocialTrial> {
        match self {
            TrialType::Lie => Some(SocialTrial::Lie),
            TrialType::Persuade => Some(SocialTrial::Persuade),
            TrialType::Intimidate => Some(SocialTrial::Intimidate),
            _ => None,
        }
    }
}

/// Named chance adjustments, each multiplied by its weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialModifier {
    Trust,
    Value,
    Fear,
    Anger,
    Owed,
    PosFear,
    MissionsAssigned,
    ULie,
    UPersuade,
    UIntimidate,
    Flat,
}

impl TrialModifier {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "TRUST" => TrialModifier::Trust,
            "VALUE" => TrialModifier::Value,
            "FEAR" => TrialModifier::Fear,
            "ANGER" => TrialModifier::Anger,
            "OWED" => TrialModifier::Owed,
            "POS_FEAR" => TrialModifier::PosFear,
            "MISSIONS_ASSIGNED" => TrialModifier::MissionsAssigned,
            "U_LIE" => TrialModifier::ULie,
            "U_PERSUADE" => TrialModifier::UPersuade,
            "U_INTIMIDATE" => TrialModifier::UIntimidate,
            "FLAT" => TrialModifier::Flat,
            other => return Err(DialogueError::UnknownModifier(other.to_string())),
        })
    }

    fn base<V: DialogueView>(&self, view: &V) -> i32 {
        let opinion = view.beta().opinion();
        match self {
            TrialModifier::Trust => opinion.trust,
            TrialModifier::Value => opinion.value,
            TrialModifier::Fear => opinion.fear,
            TrialModifier::Anger => opinion.anger,
            TrialModifier::Owed => opinion.owed,
            TrialModifier::PosFear => opinion.fear.max(0),
            TrialModifier::MissionsAssigned => {
                i32::try_from(view.missions_assigned().len()).unwrap_or(i32::MAX)
            }
            TrialModifier::ULie => view.alpha().trial_chance_mod(SocialTrial::Lie),
            TrialModifier::UPersuade => view.alpha().trial_chance_mod(SocialTrial::Persuade),
            TrialModifier::UIntimidate => view.alpha().trial_chance_mod(SocialTrial::Intimidate),
            TrialModifier::Flat => 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTrial {
    #[serde(rename = "type", default)]
    kind: TrialType,
    #[serde(default)]
    difficulty: i32,
    skill_required: Option<String>,
    #[serde(rename = "mod", default)]
    modifiers: Vec<(String, i32)>,
    condition: Option<Value>,
}

/// Outcome of a single roll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialRoll {
    pub success: bool,
    pub chance: i32,
    /// False when the outcome was decided without drawing
    pub rolled: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trial {
    pub kind: TrialType,
    pub difficulty: i32,
    pub skill_required: Option<String>,
    pub condition: Option<Condition>,
    pub modifiers: Vec<(TrialModifier, i32)>,
}

impl Trial {
    pub fn from_json(json: &Value) -> Result<Self> {
        let raw: RawTrial = serde_json::from_value(json.clone())
            .map_err(|e| DialogueError::content("trial", e.to_string()))?;
        if !(0..=100).contains(&raw.difficulty) {
            return Err(DialogueError::content(
                "trial",
                format!("difficulty {} outside 0..=100", raw.difficulty),
            ));
        }
        if raw.kind == TrialType::SkillCheck && raw.skill_required.is_none() {
            return Err(DialogueError::content("trial", "SKILL_CHECK needs skill_required"));
        }
        let condition = match (&raw.kind, &raw.condition) {
            (TrialType::Condition, Some(c)) => Some(Condition::from_json(c)?),
            (TrialType::Condition, None) => {
                return Err(DialogueError::content("trial", "CONDITION needs a condition"));
            }
            _ => None,
        };
        let modifiers = raw
            .modifiers
            .iter()
            .map(|(name, weight)| Ok((TrialModifier::from_name(name)?, *weight)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kind: raw.kind,
            difficulty: raw.difficulty,
            skill_required: raw.skill_required,
            condition,
            modifiers,
        })
    }

    pub fn is_active(&self) -> bool {
        self.kind != TrialType::None
    }

    /// Success chance in percent, clamped to `0..=100`
    pub fn calc_chance<V: DialogueView>(&self, view: &V) -> i32 {
        if self.kind == TrialType::None {
            return 100;
        }
        if view.alpha().has_trait(MIND_CONTROL_TRAIT) {
            return 100;
        }
        let base = match self.kind {
            TrialType::None => 100,
            TrialType::Condition => {
                let passed = self
                    .condition
                    .as_ref()
                    .is_some_and(|c| c.check(view, None));
                return if passed { 100 } else { 0 };
            }
            TrialType::Lie | TrialType::Persuade | TrialType::Intimidate => {
                let social = self.kind.social().unwrap_or(SocialTrial::Persuade);
                (100 - self.difficulty)
                    .saturating_add(view.alpha().trial_chance_mod(social))
                    .saturating_add(view.beta().trial_chance_mod(social))
            }
            TrialType::SkillCheck => {
                let skill = self
                    .skill_required
                    .as_deref()
                    .map(|s| view.alpha().skill_level(s))
                    .unwrap_or(0);
                100 - 2 * self.difficulty + 10 * skill.clamp(0, 10)
            }
        };
        let bonus = self
            .modifiers
            .iter()
            .map(|(m, weight)| m.base(view).saturating_mul(*weight))
            .fold(0i32, i32::saturating_add);
        base.saturating_add(bonus).clamp(0, 100)
    }

    /// Resolve the trial with at most one draw from the session RNG
    pub fn roll<V: DialogueView>(&self, view: &V) -> TrialRoll {
        let chance = self.calc_chance(view);
        match self.kind {
            TrialType::None | TrialType::Condition => TrialRoll {
                success: chance >= 100,
                chance,
                rolled: false,
            },
            _ => TrialRoll {
                success: view.sample(0, 99) < i64::from(chance),
                chance,
                rolled: true,
            },
        }
    }

    /// Label shown before the response text, e.g. `PERSUADE`
    pub fn name(&self) -> Option<String> {
        match self.kind {
            TrialType::None | TrialType::Condition => None,
            TrialType::Lie => Some("LIE".to_string()),
            TrialType::Persuade => Some("PERSUADE".to_string()),
            TrialType::Intimidate => Some("INTIMIDATE".to_string()),
            TrialType::SkillCheck => Some(
                self.skill_required
                    .as_deref()
                    .unwrap_or("SKILL")
                    .to_uppercase(),
            ),
        }
    }

    /// `[PERSUADE 45%] text`, or the text unchanged when nothing is at stake
    pub fn decorate<V: DialogueView>(&self, view: &V, text: &str) -> String {
        match self.name() {
            Some(name) => format!("[{} {}%] {}", name, self.calc_chance(view), text),
            None => text.to_string(),
        }
    }
}
