//! Dialogue Session
//!
//! A [`Dialogue`] binds the player-side actor (alpha, `u`) and the NPC
//! (beta, `npc`) for one conversation and walks the topic graph: enter a
//! topic, run its speaker effects, say its line, offer responses, and apply
//! whichever one the presenter picks.

pub mod presenter;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::condition::{DialogueView, Target};
use crate::config::DialogueConfig;
use crate::effect::talk::{TALK_DONE, TALK_NONE};
use crate::effect::{EffectContext, Handoff};
use crate::error::{DialogueError, Result};
use crate::talker::{visit_items, Talker};
use crate::topic::{RepeatResponse, Response, TopicRegistry};
use crate::trial::TrialRoll;
use crate::vars::{GlobalVariables, VarContext, VarRef, VarScope};

pub use presenter::{hotkey_for, Highlight, Presenter, ScriptedPresenter, TalkData};

/// Skill exercised by social trials
const SPEECH_SKILL: &str = "speech";

/// An entry on the topic stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkTopic {
    pub id: String,
    /// Item type the topic is about
    pub item_type: Option<String>,
    /// Why a request was refused, shown through `<reason>`
    pub reason: String,
}

impl TalkTopic {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            item_type: None,
            reason: String::new(),
        }
    }
}

/// One live conversation
pub struct Dialogue<'a> {
    alpha: &'a mut dyn Talker,
    beta: &'a mut dyn Talker,
    globals: &'a GlobalVariables,
    registry: Arc<TopicRegistry>,
    settings: DialogueConfig,
    rng: RefCell<StdRng>,
    topic_stack: Vec<TalkTopic>,
    missions_assigned: Vec<String>,
    by_radio: bool,
    responses: Vec<Response>,
    last_trial: Option<TrialRoll>,
    handoff: Option<Handoff>,
    pub done: bool,
}

impl<'a> Dialogue<'a> {
    pub fn new(
        alpha: &'a mut dyn Talker,
        beta: &'a mut dyn Talker,
        globals: &'a GlobalVariables,
        registry: Arc<TopicRegistry>,
        settings: DialogueConfig,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let missions_assigned = beta.assigned_missions();
        let seed_topic = TalkTopic::new(&settings.first_topic);
        debug!("Topic -> {}", seed_topic.id);
        Self {
            alpha,
            beta,
            globals,
            registry,
            settings,
            rng: RefCell::new(rng),
            topic_stack: vec![seed_topic],
            missions_assigned,
            by_radio: false,
            responses: Vec::new(),
            last_trial: None,
            handoff: None,
            done: false,
        }
    }

    /// Mark the conversation as held over the radio
    pub fn over_radio(mut self, by_radio: bool) -> Self {
        self.by_radio = by_radio;
        self
    }

    pub fn add_topic(&mut self, id: &str) {
        self.add_talk_topic(TalkTopic::new(id));
    }

    pub fn add_talk_topic(&mut self, topic: TalkTopic) {
        debug!("Topic -> {}", topic.id);
        self.topic_stack.push(topic);
    }

    pub fn current_topic(&self) -> &TalkTopic {
        let Some(topic) = self.topic_stack.last() else {
            panic!("dialogue topic stack is empty while the conversation is open");
        };
        topic
    }

    pub fn topic_stack(&self) -> &[TalkTopic] {
        &self.topic_stack
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    pub fn last_trial(&self) -> Option<TrialRoll> {
        self.last_trial
    }

    /// Control request raised by an effect, if any
    pub fn take_handoff(&mut self) -> Option<Handoff> {
        self.handoff.take()
    }

    /// Explain a refusal on the current topic
    pub fn set_reason(&mut self, reason: &str) {
        if let Some(topic) = self.topic_stack.last_mut() {
            topic.reason = reason.to_string();
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    // ========================================================================
    // Topic Entry
    // ========================================================================

    /// Run the current topic's speaker effects whose conditions hold
    pub fn apply_speaker_effects(&mut self) {
        let registry = Arc::clone(&self.registry);
        let Some(topic) = registry.get(&self.current_topic().id) else {
            return;
        };
        for speaker in &topic.speaker_effects {
            let sentinel = speaker.sentinel_var();
            if let Some(var) = &sentinel {
                if self.beta.get_value(var).as_deref() == Some("yes") {
                    continue;
                }
            }
            if speaker.condition.as_ref().is_some_and(|c| !c.check(&*self, None)) {
                continue;
            }
            for effect in &speaker.effects {
                if let Err(e) = effect.execute(self) {
                    warn!("Skipping speaker effect {}: {}", effect.name(), e);
                }
            }
            if let Some(var) = &sentinel {
                self.beta.set_value(var, "yes");
            }
        }
    }

    /// The NPC's line for `topic`, with tags filled in
    pub fn dynamic_line(&self, topic: &TalkTopic) -> String {
        let line = self
            .registry
            .get(&topic.id)
            .and_then(|t| t.line.as_ref())
            .and_then(|line| line.render(self));
        match line {
            Some(text) => self.substitute(&text),
            None => {
                warn!("No line for topic '{}'", topic.id);
                self.settings.placeholder_line.clone()
            }
        }
    }

    fn substitute(&self, text: &str) -> String {
        text.replace("<u_name>", &self.alpha.name())
            .replace("<npc_name>", &self.beta.name())
            .replace("<topic_item>", self.topic_item().unwrap_or(""))
            .replace("<reason>", self.reason())
    }

    // ========================================================================
    // Response Generation
    // ========================================================================

    /// Build the visible responses for the current topic
    pub fn gen_responses(&mut self) {
        let registry = Arc::clone(&self.registry);
        let mut responses = Vec::new();
        let topic = registry.get(&self.current_topic().id);

        let replace_built_in = match topic {
            Some(topic) => {
                for repeat in &topic.repeat_responses {
                    self.gen_repeat_responses(repeat, &mut responses);
                }
                let mut switch_done = false;
                for r in &topic.responses {
                    if r.switch && switch_done {
                        continue;
                    }
                    if r.condition.as_ref().is_none_or(|c| c.check(&*self, None)) {
                        responses.push(r.clone());
                        switch_done |= r.switch && !r.default;
                    }
                }
                topic.replace_built_in_responses
            }
            None => {
                warn!("Unknown topic '{}'", self.current_topic().id);
                false
            }
        };

        if !replace_built_in || responses.is_empty() {
            responses.push(Response::new(&self.settings.farewell_text, TALK_DONE));
        }
        self.responses = responses;
    }

    /// One response per matching item, in inventory order
    fn gen_repeat_responses(&self, repeat: &RepeatResponse, out: &mut Vec<Response>) {
        let owner: &dyn Talker = if repeat.is_npc { &*self.beta } else { &*self.alpha };
        let mut candidates: Vec<String> = repeat
            .for_item
            .iter()
            .filter(|id| owner.has_item(id))
            .cloned()
            .collect();
        if !repeat.for_category.is_empty() {
            visit_items(owner.inventory(), &mut |item| {
                if repeat.for_category.contains(&item.category)
                    && (repeat.include_containers || !item.is_container())
                {
                    candidates.push(item.type_id.clone());
                }
            });
        }

        for item in candidates {
            let template = &repeat.response;
            if template.condition.as_ref().is_some_and(|c| !c.check(self, Some(item.as_str()))) {
                continue;
            }
            let mut response = template.clone();
            response.text = response.text.replace("<topic_item>", &item);
            response.item = Some(item);
            out.push(response);
        }
    }

    /// Options ready for a presenter
    pub fn talk_data(&self) -> Vec<TalkData> {
        self.responses
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let chance = r.trial.calc_chance(self);
                let text = self.substitute(&r.display_text(self));
                TalkData {
                    text: r.trial.decorate(self, &text),
                    highlight: Highlight::from_consequences(&r.consequences(chance, &*self.beta)),
                    hotkey: hotkey_for(i),
                }
            })
            .collect()
    }

    /// Index of a response that ends the conversation without a gamble
    pub fn best_quit_response(&self) -> Option<usize> {
        if self.responses.len() == 1 {
            return Some(0);
        }
        self.responses
            .iter()
            .position(Response::ends_conversation)
            .or_else(|| {
                self.responses
                    .iter()
                    .position(|r| r.success.next_topic == TALK_DONE)
            })
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Apply response `index` and return the topic it led to
    pub fn select(&mut self, index: usize) -> String {
        assert!(
            index < self.responses.len(),
            "response index {} out of range ({} offered)",
            index,
            self.responses.len()
        );
        let response = self.responses[index].clone();

        if let Some(mission) = &response.mission {
            self.beta.select_mission(mission);
        }
        if !response.training.is_empty() {
            self.beta.store_chosen_training(&response.training);
        }

        let roll = response.trial.roll(&*self);
        self.last_trial = Some(roll);
        if roll.rolled && response.trial.kind.social().is_some() && self.alpha.is_player() {
            let divisor = if roll.success { 10 } else { 7 };
            self.alpha.practice_skill(SPEECH_SKILL, (100 - roll.chance) / divisor);
        }
        debug!(
            "Selected '{}' (chance {}%, {})",
            response.text,
            roll.chance,
            if roll.success { "success" } else { "failure" }
        );

        let outcome = if roll.success {
            &response.success
        } else {
            &response.failure
        };
        let next = outcome.apply(self);

        if next == TALK_DONE {
            self.done = true;
            self.responses.clear();
        } else if next != TALK_NONE {
            self.add_talk_topic(TalkTopic {
                id: next.clone(),
                item_type: response.item.clone(),
                reason: String::new(),
            });
        }
        next
    }

    /// Drive the conversation until it ends or the presenter asks to stop
    pub fn run<P: Presenter>(&mut self, presenter: &mut P) -> Option<Handoff> {
        info!("{} starts talking to {}", self.alpha.name(), self.beta.name());
        while !self.done {
            if presenter.should_stop() {
                info!("Conversation cancelled");
                break;
            }
            self.apply_speaker_effects();
            let line = self.dynamic_line(self.current_topic());
            self.gen_responses();
            let options = self.talk_data();
            let choice = presenter.present(&self.beta.name(), &line, &options);
            self.select(choice);
        }
        self.take_handoff()
    }
}

// ============================================================================
// Evaluation Context
// ============================================================================

impl VarContext for Dialogue<'_> {
    fn read_var(&self, var: &VarRef) -> Result<Option<String>> {
        match var.scope {
            VarScope::Global => Ok(self.globals.get(&var.name)),
            VarScope::U => Ok(self.alpha.get_value(&var.name)),
            VarScope::Npc => Ok(self.beta.get_value(&var.name)),
            other => Err(DialogueError::UnsupportedScope(other.as_str().to_string())),
        }
    }

    fn sample(&self, min: i64, max: i64) -> i64 {
        self.rng.borrow_mut().gen_range(min..=max)
    }
}

impl DialogueView for Dialogue<'_> {
    fn alpha(&self) -> &dyn Talker {
        &*self.alpha
    }

    fn beta(&self) -> &dyn Talker {
        &*self.beta
    }

    fn missions_assigned(&self) -> &[String] {
        &self.missions_assigned
    }

    fn reason(&self) -> &str {
        self.topic_stack.last().map_or("", |t| t.reason.as_str())
    }

    fn by_radio(&self) -> bool {
        self.by_radio
    }

    fn topic_item(&self) -> Option<&str> {
        self.topic_stack.last().and_then(|t| t.item_type.as_deref())
    }
}

impl EffectContext for Dialogue<'_> {
    fn actor_mut(&mut self, target: Target) -> &mut dyn Talker {
        match target {
            Target::U => &mut *self.alpha,
            Target::Npc => &mut *self.beta,
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
            VarScope::U => &mut *self.alpha,
            VarScope::Npc => &mut *self.beta,
            other => return Err(DialogueError::UnsupportedScope(other.as_str().to_string())),
        };
        match value {
            Some(v) => actor.set_value(&var.name, v),
            None => actor.remove_value(&var.name),
        }
        Ok(())
    }

    fn refresh_missions(&mut self) {
        self.missions_assigned = self.beta.assigned_missions();
    }

    fn handoff(&mut self, handoff: Handoff) {
        info!("Conversation requested {:?}", handoff);
        self.handoff = Some(handoff);
    }
}
