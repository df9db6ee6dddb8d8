//! Topic Definition Types
//!
//! Raw records deserialized from topic JSON and their resolved forms.

use serde::Deserialize;
use serde_json::Value;

use crate::condition::{parse_optional, Condition, DialogueView};
use crate::effect::talk::{RawTalkEffect, TALK_DONE, TALK_NONE};
use crate::effect::{Consequence, Effect, TalkEffect};
use crate::error::{DialogueError, Result};
use crate::talker::{Opinion, Talker, TrainingChoice};
use crate::trial::Trial;

// ============================================================================
// Dynamic Lines
// ============================================================================

/// What the NPC says on entering a topic
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicLine {
    Fixed(String),
    /// Sub-lines joined with a space, empty ones skipped
    Concat(Vec<DynamicLine>),
    Conditional {
        condition: Condition,
        yes: Box<DynamicLine>,
        no: Box<DynamicLine>,
    },
    /// First branch whose condition holds
    Cascade {
        branches: Vec<(Condition, DynamicLine)>,
        default: Option<Box<DynamicLine>>,
    },
}

impl DynamicLine {
    pub fn from_json(json: &Value) -> Result<Self> {
        match json {
            Value::String(s) => Ok(DynamicLine::Fixed(s.clone())),
            Value::Array(parts) => Ok(DynamicLine::Concat(
                parts.iter().map(DynamicLine::from_json).collect::<Result<_>>()?,
            )),
            Value::Object(map) if map.contains_key("branches") => {
                let branches = map
                    .get("branches")
                    .and_then(Value::as_array)
                    .ok_or_else(|| DialogueError::content("dynamic_line", "branches must be an array"))?
                    .iter()
                    .map(|b| {
                        let condition = b
                            .get("condition")
                            .ok_or_else(|| DialogueError::content("dynamic_line", "branch without condition"))?;
                        let line = b
                            .get("line")
                            .ok_or_else(|| DialogueError::content("dynamic_line", "branch without line"))?;
                        Ok((Condition::from_json(condition)?, DynamicLine::from_json(line)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let default = map
                    .get("default")
                    .map(|d| DynamicLine::from_json(d).map(Box::new))
                    .transpose()?;
                Ok(DynamicLine::Cascade { branches, default })
            }
            Value::Object(map) => {
                let part = |key: &str| {
                    map.get(key).ok_or_else(|| {
                        DialogueError::content("dynamic_line", format!("missing \"{}\"", key))
                    })
                };
                Ok(DynamicLine::Conditional {
                    condition: Condition::from_json(part("condition")?)?,
                    yes: Box::new(DynamicLine::from_json(part("yes")?)?),
                    no: Box::new(DynamicLine::from_json(part("no")?)?),
                })
            }
            other => Err(DialogueError::content(
                "dynamic_line",
                format!("unsupported line {}", other),
            )),
        }
    }

    /// Resolve the line; `None` when a cascade matches nothing
    pub fn render<V: DialogueView>(&self, view: &V) -> Option<String> {
        match self {
            DynamicLine::Fixed(s) => Some(s.clone()),
            DynamicLine::Concat(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .filter_map(|p| p.render(view))
                    .filter(|s| !s.is_empty())
                    .collect();
                Some(rendered.join(" "))
            }
            DynamicLine::Conditional { condition, yes, no } => {
                if condition.check(view, None) {
                    yes.render(view)
                } else {
                    no.render(view)
                }
            }
            DynamicLine::Cascade { branches, default } => branches
                .iter()
                .find(|(c, _)| c.check(view, None))
                .map(|(_, line)| line)
                .or(default.as_deref())
                .and_then(|line| line.render(view)),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TrueFalseText {
    pub condition: Condition,
    pub true_text: String,
    pub false_text: String,
}

#[derive(Debug, Deserialize)]
struct RawTrueFalse {
    condition: Value,
    #[serde(rename = "true")]
    true_text: String,
    #[serde(rename = "false")]
    false_text: String,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    text: Option<String>,
    truefalsetext: Option<RawTrueFalse>,
    condition: Option<Value>,
    #[serde(default)]
    switch: bool,
    #[serde(default)]
    default: bool,
    trial: Option<Value>,
    success: Option<RawTalkEffect>,
    failure: Option<RawTalkEffect>,
    topic: Option<String>,
    effect: Option<Value>,
    opinion: Option<Opinion>,
    mission: Option<String>,
    skill: Option<String>,
    style: Option<String>,
    spell: Option<String>,
    proficiency: Option<String>,
    item: Option<String>,
}

/// A player option within a topic
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub text: String,
    pub truefalse: Option<TrueFalseText>,
    pub condition: Option<Condition>,
    pub switch: bool,
    pub default: bool,
    pub trial: Trial,
    pub success: TalkEffect,
    pub failure: TalkEffect,
    pub mission: Option<String>,
    pub training: TrainingChoice,
    /// Item type the next topic will be about
    pub item: Option<String>,
}

impl Response {
    /// Plain response leading to `topic`
    pub fn new(text: &str, topic: &str) -> Self {
        Self {
            text: text.to_string(),
            truefalse: None,
            condition: None,
            switch: false,
            default: false,
            trial: Trial::default(),
            success: TalkEffect::to_topic(topic),
            failure: TalkEffect::default(),
            mission: None,
            training: TrainingChoice::default(),
            item: None,
        }
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        let raw: RawResponse = serde_json::from_value(json.clone())
            .map_err(|e| DialogueError::content("response", e.to_string()))?;

        let truefalse = match &raw.truefalsetext {
            Some(tf) => Some(TrueFalseText {
                condition: Condition::from_json(&tf.condition)?,
                true_text: tf.true_text.clone(),
                false_text: tf.false_text.clone(),
            }),
            None => None,
        };
        let text = match (&raw.text, &truefalse) {
            (Some(t), _) => t.clone(),
            (None, Some(tf)) => tf.true_text.clone(),
            (None, None) => {
                return Err(DialogueError::content("response", "needs text or truefalsetext"));
            }
        };

        let shorthand = raw.topic.is_some() || raw.effect.is_some() || raw.opinion.is_some();
        let success = match (&raw.success, shorthand) {
            (Some(_), true) => {
                return Err(DialogueError::content(
                    "response",
                    "give either \"success\" or topic/effect/opinion, not both",
                ));
            }
            (Some(s), false) => TalkEffect::from_raw(s)?,
            (None, _) => TalkEffect::from_raw(&RawTalkEffect {
                topic: raw.topic.clone(),
                effect: raw.effect.clone(),
                opinion: raw.opinion,
                mission_opinion: None,
            })?,
        };
        let failure = match &raw.failure {
            Some(f) => TalkEffect::from_raw(f).map_err(|e| e.in_context("failure"))?,
            None => TalkEffect::default(),
        };
        let trial = match &raw.trial {
            Some(t) => Trial::from_json(t)?,
            None => Trial::default(),
        };

        Ok(Self {
            text,
            truefalse,
            condition: parse_optional(raw.condition.as_ref())?,
            switch: raw.switch,
            default: raw.default,
            trial,
            success,
            failure,
            mission: raw.mission,
            training: TrainingChoice {
                skill: raw.skill,
                style: raw.style,
                spell: raw.spell,
                proficiency: raw.proficiency,
            },
            item: raw.item,
        })
    }

    /// Text after applying `truefalsetext`
    pub fn display_text<V: DialogueView>(&self, view: &V) -> String {
        match &self.truefalse {
            Some(tf) if tf.condition.check(view, None) => tf.true_text.clone(),
            Some(tf) => tf.false_text.clone(),
            None => self.text.clone(),
        }
    }

    /// Possible consequences given the success chance
    pub fn consequences(&self, chance: i32, beta: &dyn Talker) -> Vec<Consequence> {
        if chance >= 100 {
            vec![self.success.consequence(beta)]
        } else if chance <= 0 {
            vec![self.failure.consequence(beta)]
        } else {
            vec![self.success.consequence(beta), self.failure.consequence(beta)]
        }
    }

    /// Topics this response can lead to
    pub fn next_topics(&self) -> impl Iterator<Item = &str> {
        let failure = self.trial.is_active().then_some(self.failure.next_topic.as_str());
        std::iter::once(self.success.next_topic.as_str()).chain(failure)
    }

    pub fn ends_conversation(&self) -> bool {
        self.success.next_topic == TALK_DONE && !self.trial.is_active()
    }

    pub fn stays(&self) -> bool {
        self.success.next_topic == TALK_NONE
    }
}

// ============================================================================
// Repeat Responses and Speaker Effects
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawRepeatResponse {
    #[serde(default)]
    for_item: Vec<String>,
    #[serde(default)]
    for_category: Vec<String>,
    #[serde(default)]
    is_npc: bool,
    #[serde(default)]
    include_containers: bool,
    response: Value,
}

/// Template cloned once per matching item
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatResponse {
    pub for_item: Vec<String>,
    pub for_category: Vec<String>,
    /// Look in the npc's items instead of the player's
    pub is_npc: bool,
    pub include_containers: bool,
    pub response: Response,
}

impl RepeatResponse {
    pub fn from_json(json: &Value) -> Result<Self> {
        let raw: RawRepeatResponse = serde_json::from_value(json.clone())
            .map_err(|e| DialogueError::content("repeat_response", e.to_string()))?;
        if raw.for_item.is_empty() && raw.for_category.is_empty() {
            return Err(DialogueError::content(
                "repeat_response",
                "needs for_item or for_category",
            ));
        }
        Ok(Self {
            for_item: raw.for_item,
            for_category: raw.for_category,
            is_npc: raw.is_npc,
            include_containers: raw.include_containers,
            response: Response::from_json(&raw.response).map_err(|e| e.in_context("response"))?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawSpeakerEffect {
    condition: Option<Value>,
    effect: Value,
    sentinel: Option<String>,
}

/// Effects run when the NPC starts speaking on a topic
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEffect {
    pub condition: Option<Condition>,
    pub effects: Vec<Effect>,
    /// Once set on the NPC, the effect never runs again
    pub sentinel: Option<String>,
}

impl SpeakerEffect {
    pub fn from_json(json: &Value) -> Result<Self> {
        let raw: RawSpeakerEffect = serde_json::from_value(json.clone())
            .map_err(|e| DialogueError::content("speaker_effect", e.to_string()))?;
        Ok(Self {
            condition: parse_optional(raw.condition.as_ref())?,
            effects: Effect::list_from_json(&raw.effect)?,
            sentinel: raw.sentinel,
        })
    }

    /// NPC variable recording that the sentinel fired
    pub fn sentinel_var(&self) -> Option<String> {
        self.sentinel.as_ref().map(|s| format!("npctalk_var_sentinel_{}", s))
    }
}

// ============================================================================
// Topics
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
pub struct RawTopic {
    id: OneOrMany,
    dynamic_line: Option<Value>,
    replace_built_in_responses: Option<bool>,
    speaker_effect: Option<Value>,
    #[serde(default)]
    responses: Vec<Value>,
    #[serde(default)]
    repeat_responses: Vec<Value>,
}

impl RawTopic {
    pub fn ids(&self) -> Vec<String> {
        match &self.id {
            OneOrMany::One(id) => vec![id.clone()],
            OneOrMany::Many(ids) => ids.clone(),
        }
    }
}

/// A node in the conversation graph
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopicDef {
    pub id: String,
    pub line: Option<DynamicLine>,
    pub replace_built_in_responses: bool,
    pub speaker_effects: Vec<SpeakerEffect>,
    pub responses: Vec<Response>,
    pub repeat_responses: Vec<RepeatResponse>,
    /// Whether `replace_built_in_responses` was set explicitly
    replace_set: bool,
}

fn indexed<T>(items: &[Value], label: &str, parse: fn(&Value) -> Result<T>) -> Result<Vec<T>> {
    items
        .iter()
        .enumerate()
        .map(|(i, v)| parse(v).map_err(|e| e.in_context(&format!("{}[{}]", label, i))))
        .collect()
}

impl TopicDef {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_line(mut self, line: &str) -> Self {
        self.line = Some(DynamicLine::Fixed(line.to_string()));
        self
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.responses.push(response);
        self
    }

    /// Resolve one raw record for the given id
    pub fn from_raw(id: &str, raw: &RawTopic) -> Result<Self> {
        let build = || -> Result<Self> {
            let speaker_effects = match &raw.speaker_effect {
                Some(Value::Array(items)) => indexed(items, "speaker_effect", SpeakerEffect::from_json)?,
                Some(single) => vec![SpeakerEffect::from_json(single)?],
                None => Vec::new(),
            };
            Ok(Self {
                id: id.to_string(),
                line: raw
                    .dynamic_line
                    .as_ref()
                    .map(DynamicLine::from_json)
                    .transpose()?,
                replace_built_in_responses: raw.replace_built_in_responses.unwrap_or(false),
                speaker_effects,
                responses: indexed(&raw.responses, "responses", Response::from_json)?,
                repeat_responses: indexed(&raw.repeat_responses, "repeat_responses", RepeatResponse::from_json)?,
                replace_set: raw.replace_built_in_responses.is_some(),
            })
        };
        build().map_err(|e| e.in_context(id))
    }

    /// Fold a later definition of the same id into this one
    pub fn merge(&mut self, later: TopicDef) {
        if later.line.is_some() {
            self.line = later.line;
        }
        if later.replace_set {
            self.replace_built_in_responses = later.replace_built_in_responses;
            self.replace_set = true;
        }
        self.speaker_effects.extend(later.speaker_effects);
        self.responses.extend(later.responses);
        self.repeat_responses.extend(later.repeat_responses);
    }

    /// Every topic id a response here can lead to
    pub fn next_topics(&self) -> impl Iterator<Item = &str> {
        self.responses
            .iter()
            .chain(self.repeat_responses.iter().map(|r| &r.response))
            .flat_map(Response::next_topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::tests::TestView;
    use serde_json::json;

    fn topic(json: Value) -> Result<TopicDef> {
        let raw: RawTopic = serde_json::from_value(json).unwrap();
        TopicDef::from_raw(&raw.ids()[0], &raw)
    }

    #[test]
    fn test_parse_topic() {
        let t = topic(json!({
            "id": "TALK_START",
            "dynamic_line": "Hello.",
            "responses": [
                {"text": "Who are you?", "topic": "TALK_ABOUT_SELF"},
                {"text": "Convince me.", "trial": {"type": "PERSUADE", "difficulty": 30},
                 "success": {"topic": "TALK_AGREE"}, "failure": {"topic": "TALK_REFUSE"}}
            ]
        }))
        .unwrap();
        assert_eq!(t.responses.len(), 2);
        assert_eq!(t.responses[0].success.next_topic, "TALK_ABOUT_SELF");
        let next: Vec<&str> = t.next_topics().collect();
        assert_eq!(next, vec!["TALK_ABOUT_SELF", "TALK_AGREE", "TALK_REFUSE"]);
    }

    #[test]
    fn test_errors_name_topic_and_response_index() {
        let err = topic(json!({
            "id": "TALK_BAD",
            "responses": [
                {"text": "ok", "topic": "TALK_DONE"},
                {"text": "bad", "effect": [{"type": "summon_dragon"}]}
            ]
        }))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("TALK_BAD"), "{}", msg);
        assert!(msg.contains("responses[1]"), "{}", msg);
    }

    #[test]
    fn test_success_and_shorthand_conflict() {
        assert!(Response::from_json(&json!({
            "text": "x", "topic": "TALK_A", "success": {"topic": "TALK_B"}
        }))
        .is_err());
        assert!(Response::from_json(&json!({"topic": "TALK_A"})).is_err());
    }

    #[test]
    fn test_dynamic_line_forms() {
        let mut view = TestView::new();
        let line = DynamicLine::from_json(&json!(["Hi.", "", {"condition": "has_reason", "yes": "Because.", "no": ""}]))
            .unwrap();
        assert_eq!(line.render(&view).as_deref(), Some("Hi."));
        view.reason = "x".to_string();
        assert_eq!(line.render(&view).as_deref(), Some("Hi. Because."));

        let cascade = DynamicLine::from_json(&json!({"branches": [
            {"condition": "is_by_radio", "line": "Static..."},
            {"condition": "has_reason", "line": "Reasons."}
        ]}))
        .unwrap();
        assert_eq!(cascade.render(&view).as_deref(), Some("Reasons."));
        view.reason.clear();
        assert_eq!(cascade.render(&view), None);
    }

    #[test]
    fn test_truefalsetext() {
        let mut view = TestView::new();
        let r = Response::from_json(&json!({
            "truefalsetext": {"condition": "has_reason", "true": "Why?", "false": "Fine."},
            "topic": "TALK_NONE"
        }))
        .unwrap();
        assert_eq!(r.display_text(&view), "Fine.");
        view.reason = "x".to_string();
        assert_eq!(r.display_text(&view), "Why?");
    }

    #[test]
    fn test_consequences_by_chance() {
        let view = TestView::new();
        let r = Response::from_json(&json!({
            "text": "Hand it over.", "trial": {"type": "INTIMIDATE", "difficulty": 50},
            "success": {"topic": "TALK_DONE", "effect": ["player_weapon_drop"]},
            "failure": {"topic": "TALK_DONE", "effect": ["hostile"]}
        }))
        .unwrap();
        assert_eq!(r.consequences(100, &view.npc), vec![Consequence::Helpless]);
        assert_eq!(r.consequences(0, &view.npc), vec![Consequence::Hostile]);
        assert_eq!(r.consequences(50, &view.npc).len(), 2);
    }

    #[test]
    fn test_merge() {
        let mut a = topic(json!({"id": "T", "dynamic_line": "A", "replace_built_in_responses": true,
            "responses": [{"text": "1", "topic": "TALK_DONE"}]}))
        .unwrap();
        let b = topic(json!({"id": "T", "responses": [{"text": "2", "topic": "TALK_DONE"}]})).unwrap();
        a.merge(b);
        assert_eq!(a.responses.len(), 2);
        assert!(a.replace_built_in_responses);
        assert_eq!(a.line, Some(DynamicLine::Fixed("A".to_string())));

        let c = topic(json!({"id": "T", "dynamic_line": "C", "replace_built_in_responses": false})).unwrap();
        a.merge(c);
        assert!(!a.replace_built_in_responses);
        assert_eq!(a.line, Some(DynamicLine::Fixed("C".to_string())));
    }

    #[test]
    fn test_repeat_response_needs_selector() {
        assert!(RepeatResponse::from_json(&json!({"response": {"text": "x"}})).is_err());
        let r = RepeatResponse::from_json(&json!({"for_category": ["food"],
            "response": {"text": "Give food", "topic": "TALK_THANKS"}}))
        .unwrap();
        assert!(!r.include_containers);
    }

    #[test]
    fn test_speaker_effect_sentinel() {
        let s = SpeakerEffect::from_json(&json!({"effect": ["follow"], "sentinel": "greeted"})).unwrap();
        assert_eq!(s.sentinel_var().as_deref(), Some("npctalk_var_sentinel_greeted"));
        assert!(s.condition.is_none());
    }
}
