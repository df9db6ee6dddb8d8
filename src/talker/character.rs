//! In-memory actors
//!
//! [`PlayerTalker`] and [`NpcTalker`] share a [`Character`] sheet and add
//! side-specific state (active missions for the player; opinion, rules and
//! mission board for NPCs). They back the console runner and the tests; a
//! game would implement [`Talker`] over its own entities instead.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use super::{
    Item, MessageKind, MoraleChange, NpcAction, Opinion, Position, RuleSetting, SocialTrial, Stat,
    Talker, TrainingChoice,
};
use crate::error::{DialogueError, Result};
use crate::vars::TimeDuration;

// ============================================================================
// Character Sheet
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub strength: i32,
    pub dexterity: i32,
    pub intelligence: i32,
    pub perception: i32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            strength: 8,
            dexterity: 8,
            intelligence: 8,
            perception: 8,
        }
    }
}

/// State shared by both actor kinds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub traits: BTreeSet<String>,
    /// Active status effects: id -> intensity
    #[serde(default)]
    pub effects: BTreeMap<String, i32>,
    #[serde(default)]
    pub bionics: BTreeSet<String>,
    #[serde(default)]
    pub skills: BTreeMap<String, i32>,
    #[serde(default)]
    pub skill_practice: BTreeMap<String, i32>,
    #[serde(default)]
    pub stats: Stats,
    /// Flat trait-derived bonuses keyed by trial name (`lie`, `persuade`, `intimidate`)
    #[serde(default)]
    pub social_bonuses: BTreeMap<String, i32>,
    #[serde(default)]
    pub inventory: Vec<Item>,
    #[serde(default)]
    pub cash: i64,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub faction: String,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub known_spells: BTreeSet<String>,
    #[serde(default)]
    pub learnable_recipes: BTreeSet<String>,
    #[serde(default)]
    pub known_recipes: BTreeSet<String>,
    /// Mutation category -> traits that category can grant, in order
    #[serde(default)]
    pub mutation_pool: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub morale: BTreeMap<String, i32>,
    #[serde(default)]
    pub health: i32,
    #[serde(default)]
    pub fatigue: i32,
    #[serde(default)]
    pub wetness: i32,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub sounds: Vec<String>,
    #[serde(default)]
    pub spells_cast: Vec<String>,
    /// Monster ids this character can summon nearby
    #[serde(default)]
    pub spawnable_monsters: BTreeSet<String>,
    #[serde(default)]
    pub spawned_monsters: Vec<(String, i32)>,
}

impl Character {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_skill(mut self, skill: &str, level: i32) -> Self {
        self.skills.insert(skill.to_string(), level);
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.inventory.push(item);
        self
    }

    pub fn with_cash(mut self, cash: i64) -> Self {
        self.cash = cash;
        self
    }

    pub fn with_trait(mut self, id: &str) -> Self {
        self.traits.insert(id.to_string());
        self
    }

    fn social_mod(&self, trial: SocialTrial) -> i32 {
        let s = &self.stats;
        let base = match trial {
            SocialTrial::Lie => s.intelligence.saturating_sub(8).saturating_add(s.perception.saturating_sub(8)),
            SocialTrial::Persuade => s.intelligence.saturating_sub(8).saturating_mul(2),
            SocialTrial::Intimidate => s.strength.saturating_sub(8).saturating_mul(3),
        };
        base.saturating_add(self.social_bonuses.get(trial.as_str()).copied().unwrap_or(0))
    }

    /// Remove `count` units of a type across the whole item tree
    fn take_items(&mut self, type_id: &str, count: i32) -> Result<()> {
        if count <= 0 {
            return Err(DialogueError::invalid_count(type_id, count.into()));
        }
        let available: i32 = {
            let mut total = 0i32;
            super::visit_items(&self.inventory, &mut |it| {
                if it.type_id == type_id {
                    total = total.saturating_add(it.count);
                }
            });
            total
        };
        if available < count {
            return Err(DialogueError::lookup("item", type_id));
        }
        let mut remaining = count;
        take_from(&mut self.inventory, type_id, &mut remaining);
        Ok(())
    }

    fn mutate(&mut self, category: Option<&str>) -> Result<()> {
        let candidates: Vec<&String> = match category {
            Some(cat) => self
                .mutation_pool
                .get(cat)
                .ok_or_else(|| DialogueError::lookup("mutation category", cat))?
                .iter()
                .collect(),
            None => self.mutation_pool.values().flatten().collect(),
        };
        let next = candidates
            .into_iter()
            .find(|t| !self.traits.contains(*t))
            .cloned()
            .ok_or_else(|| DialogueError::lookup("mutation", category.unwrap_or("any")))?;
        self.traits.insert(next);
        Ok(())
    }
}

fn take_from(items: &mut Vec<Item>, type_id: &str, remaining: &mut i32) {
    for item in items.iter_mut() {
        if *remaining == 0 {
            break;
        }
        if item.type_id == type_id {
            let taken = item.count.clamp(0, *remaining);
            item.count -= taken;
            *remaining -= taken;
        }
        take_from(&mut item.contents, type_id, remaining);
    }
    items.retain(|it| it.count > 0 || !it.contents.is_empty());
}

/// Trait methods backed directly by the shared [`Character`] sheet
macro_rules! character_talker_methods {
    () => {
        fn name(&self) -> String {
            self.character.name.clone()
        }
        fn has_trait(&self, id: &str) -> bool {
            self.character.traits.contains(id)
        }
        fn add_trait(&mut self, id: &str) {
            self.character.traits.insert(id.to_string());
        }
        fn remove_trait(&mut self, id: &str) {
            self.character.traits.remove(id);
        }
        fn mutate(&mut self, category: Option<&str>, _use_vitamins: bool) -> Result<()> {
            self.character.mutate(category)
        }
        fn has_effect(&self, id: &str) -> bool {
            self.character.effects.contains_key(id)
        }
        fn add_effect(&mut self, id: &str, _duration: TimeDuration, _permanent: bool, intensity: i32) {
            self.character.effects.insert(id.to_string(), intensity.max(1));
        }
        fn remove_effect(&mut self, id: &str) {
            self.character.effects.remove(id);
        }
        fn has_bionic(&self, id: &str) -> bool {
            self.character.bionics.contains(id)
        }
        fn add_bionic(&mut self, id: &str) {
            self.character.bionics.insert(id.to_string());
        }
        fn remove_bionic(&mut self, id: &str) {
            self.character.bionics.remove(id);
        }
        fn skill_level(&self, skill: &str) -> i32 {
            self.character.skills.get(skill).copied().unwrap_or(0)
        }
        fn practice_skill(&mut self, skill: &str, amount: i32) {
            let practice = self.character.skill_practice.entry(skill.to_string()).or_default();
            *practice = practice.saturating_add(amount);
        }
        fn stat(&self, stat: Stat) -> i32 {
            let s = &self.character.stats;
            match stat {
                Stat::Strength => s.strength,
                Stat::Dexterity => s.dexterity,
                Stat::Intelligence => s.intelligence,
                Stat::Perception => s.perception,
            }
        }
        fn trial_chance_mod(&self, trial: SocialTrial) -> i32 {
            self.character.social_mod(trial)
        }
        fn inventory(&self) -> &[Item] {
            &self.character.inventory
        }
        fn can_accept_item(&self, item: &Item) -> bool {
            item.count > 0
        }
        fn add_item(&mut self, item: Item) -> Result<()> {
            if !self.can_accept_item(&item) {
                return Err(DialogueError::invalid_count(&item.type_id, item.count.into()));
            }
            self.character.inventory.push(item);
            Ok(())
        }
        fn remove_items(&mut self, type_id: &str, count: i32) -> Result<()> {
            self.character.take_items(type_id, count)
        }
        fn remove_all_items(&mut self, type_id: &str) -> i32 {
            let count = self.item_count(type_id);
            if count > 0 && self.character.take_items(type_id, count).is_ok() {
                count
            } else {
                0
            }
        }
        fn cash(&self) -> i64 {
            self.character.cash
        }
        fn add_cash(&mut self, delta: i64) {
            self.character.cash = self.character.cash.saturating_add(delta);
        }
        fn position(&self) -> Position {
            self.character.position
        }
        fn teleport(&mut self, to: Position) -> Result<()> {
            self.character.position = to;
            Ok(())
        }
        fn faction_id(&self) -> String {
            self.character.faction.clone()
        }
        fn set_faction(&mut self, faction: &str) {
            self.character.faction = faction.to_string();
        }
        fn get_value(&self, name: &str) -> Option<String> {
            self.character.vars.get(name).cloned()
        }
        fn set_value(&mut self, name: &str, value: &str) {
            self.character.vars.insert(name.to_string(), value.to_string());
        }
        fn remove_value(&mut self, name: &str) {
            self.character.vars.remove(name);
        }
        fn cast_spell(&mut self, spell: &str, _target: Option<Position>) -> Result<()> {
            if !self.character.known_spells.contains(spell) {
                return Err(DialogueError::lookup("spell", spell));
            }
            self.character.spells_cast.push(spell.to_string());
            Ok(())
        }
        fn learn_recipe(&mut self, recipe: &str) -> Result<()> {
            if !self.character.learnable_recipes.contains(recipe) {
                return Err(DialogueError::lookup("recipe", recipe));
            }
            self.character.known_recipes.insert(recipe.to_string());
            Ok(())
        }
        fn morale_level(&self) -> i32 {
            self.character.morale.values().fold(0i32, |acc, m| acc.saturating_add(*m))
        }
        fn add_morale(&mut self, change: &MoraleChange) {
            let entry = self.character.morale.entry(change.kind.clone()).or_default();
            let next = entry.saturating_add(change.bonus);
            *entry = if change.capped || change.max_bonus != 0 {
                let cap = change.max_bonus.saturating_abs();
                next.clamp(-cap, cap)
            } else {
                next
            };
        }
        fn remove_morale(&mut self, kind: &str) {
            self.character.morale.remove(kind);
        }
        fn mod_healthy(&mut self, amount: i32, cap: i32) {
            let next = self.character.health.saturating_add(amount);
            self.character.health = if cap > 0 { next.clamp(-cap, cap) } else { next };
        }
        fn mod_fatigue(&mut self, amount: i32) {
            self.character.fatigue = self.character.fatigue.saturating_add(amount).max(0);
        }
        fn add_wet(&mut self, amount: i32) {
            self.character.wetness = self.character.wetness.saturating_add(amount).clamp(0, 100);
        }
        fn assign_activity(&mut self, activity: &str, _duration: TimeDuration) {
            self.character.activity = Some(activity.to_string());
        }
        fn add_message(&mut self, text: &str, _kind: MessageKind) {
            self.character.messages.push(text.to_string());
        }
        fn make_sound(&mut self, text: &str, volume: i32, _ambient: bool) {
            self.character.sounds.push(format!("{} ({})", text, volume));
        }
        fn spawn_monster(&mut self, monster: &str, count: i32, _hostile: bool, _radius: i32) -> Result<i32> {
            if !self.character.spawnable_monsters.contains(monster) {
                return Err(DialogueError::lookup("monster", monster));
            }
            self.character.spawned_monsters.push((monster.to_string(), count));
            Ok(count)
        }
    };
}

// ============================================================================
// Player
// ============================================================================

/// The human-controlled side of a conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerTalker {
    #[serde(flatten)]
    pub character: Character,
    #[serde(default)]
    pub active_missions: BTreeSet<String>,
    #[serde(default)]
    pub completed_missions: Vec<(String, bool)>,
}

impl PlayerTalker {
    pub fn new(character: Character) -> Self {
        Self {
            character,
            ..Default::default()
        }
    }
}

impl Talker for PlayerTalker {
    character_talker_methods!();

    fn is_player(&self) -> bool {
        true
    }

    fn has_mission(&self, id: &str) -> bool {
        self.active_missions.contains(id)
    }

    fn assign_mission(&mut self, id: &str) -> Result<()> {
        self.active_missions.insert(id.to_string());
        Ok(())
    }

    fn finish_mission(&mut self, id: &str, success: bool) -> Result<()> {
        if !self.active_missions.remove(id) {
            return Err(DialogueError::lookup("mission", id));
        }
        self.completed_missions.push((id.to_string(), success));
        Ok(())
    }

    fn add_mission(&mut self, id: &str) -> Result<()> {
        self.assign_mission(id)
    }
}

// ============================================================================
// NPC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Available,
    Assigned,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    pub value: i32,
    pub status: MissionStatus,
}

fn default_anger_threshold() -> i32 {
    20
}

/// A non-player conversation partner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcTalker {
    #[serde(flatten)]
    pub character: Character,
    #[serde(default)]
    pub opinion: Opinion,
    /// Anger at or above this turns the NPC hostile
    #[serde(default = "default_anger_threshold")]
    pub anger_threshold: i32,
    #[serde(default)]
    pub hostile: bool,
    #[serde(default)]
    pub following: bool,
    #[serde(default)]
    pub rules: BTreeSet<String>,
    #[serde(skip)]
    pub rule_settings: HashMap<RuleSetting, String>,
    /// Mission board: id -> mission
    #[serde(default)]
    pub missions: BTreeMap<String, Mission>,
    /// Mission types this NPC can create on demand, with their value
    #[serde(default)]
    pub mission_types: BTreeMap<String, i32>,
    #[serde(default)]
    pub selected_mission: Option<String>,
    #[serde(default)]
    pub debt: i32,
    #[serde(default)]
    pub faction_rep: i32,
    #[serde(default)]
    pub faction_trust: i32,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub first_topic: Option<String>,
    #[serde(skip)]
    pub chosen_training: TrainingChoice,
    #[serde(skip)]
    pub actions: Vec<NpcAction>,
    #[serde(default)]
    pub controllable: bool,
    #[serde(default)]
    pub controlled: bool,
}

impl NpcTalker {
    pub fn new(character: Character) -> Self {
        Self {
            character,
            opinion: Opinion::default(),
            anger_threshold: default_anger_threshold(),
            hostile: false,
            following: false,
            rules: BTreeSet::new(),
            rule_settings: HashMap::new(),
            missions: BTreeMap::new(),
            mission_types: BTreeMap::new(),
            selected_mission: None,
            debt: 0,
            faction_rep: 0,
            faction_trust: 0,
            class: String::new(),
            first_topic: None,
            chosen_training: TrainingChoice::default(),
            actions: Vec::new(),
            controllable: false,
            controlled: false,
        }
    }

    pub fn with_mission(mut self, id: &str, value: i32) -> Self {
        self.missions.insert(
            id.to_string(),
            Mission {
                value,
                status: MissionStatus::Available,
            },
        );
        self
    }

    fn mission_mut(&mut self, id: &str) -> Result<&mut Mission> {
        self.missions
            .get_mut(id)
            .ok_or_else(|| DialogueError::lookup("mission", id))
    }
}

impl Talker for NpcTalker {
    character_talker_methods!();

    fn opinion(&self) -> Opinion {
        self.opinion
    }

    fn add_opinion(&mut self, delta: &Opinion) {
        self.opinion.add(delta);
    }

    fn check_hostile_response(&self, anger: i32) -> bool {
        anger > 0 && self.opinion.anger.saturating_add(anger) >= self.anger_threshold
    }

    fn turned_hostile(&self) -> bool {
        self.hostile || self.opinion.anger >= self.anger_threshold
    }

    fn make_angry(&mut self) {
        self.hostile = true;
        self.following = false;
    }

    fn add_debt(&mut self, amount: i32) {
        self.debt = self.debt.saturating_add(amount);
    }

    fn is_following(&self) -> bool {
        self.following
    }

    fn change_faction_rep(&mut self, delta: i32) {
        self.faction_rep = self.faction_rep.saturating_add(delta);
    }

    fn faction_trust(&self) -> i32 {
        self.faction_trust
    }

    fn change_faction_trust(&mut self, delta: i32) {
        self.faction_trust = self.faction_trust.saturating_add(delta);
    }

    fn set_class(&mut self, class: &str) {
        self.class = class.to_string();
    }

    fn has_mission(&self, id: &str) -> bool {
        self.missions.contains_key(id)
    }

    fn assign_mission(&mut self, id: &str) -> Result<()> {
        let mission = self.mission_mut(id)?;
        mission.status = MissionStatus::Assigned;
        Ok(())
    }

    fn finish_mission(&mut self, id: &str, success: bool) -> Result<()> {
        let mission = self.mission_mut(id)?;
        mission.status = if success {
            MissionStatus::Succeeded
        } else {
            MissionStatus::Failed
        };
        if self.selected_mission.as_deref() == Some(id) {
            self.selected_mission = None;
        }
        Ok(())
    }

    fn offer_mission(&mut self, id: &str) -> Result<()> {
        let value = *self
            .mission_types
            .get(id)
            .ok_or_else(|| DialogueError::lookup("mission type", id))?;
        self.missions.entry(id.to_string()).or_insert(Mission {
            value,
            status: MissionStatus::Available,
        });
        Ok(())
    }

    fn add_mission(&mut self, id: &str) -> Result<()> {
        self.offer_mission(id)?;
        self.assign_mission(id)
    }

    fn assigned_missions(&self) -> Vec<String> {
        self.missions
            .iter()
            .filter(|(_, m)| m.status == MissionStatus::Assigned)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn available_missions(&self) -> Vec<String> {
        self.missions
            .iter()
            .filter(|(_, m)| m.status == MissionStatus::Available)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn select_mission(&mut self, id: &str) {
        self.selected_mission = Some(id.to_string());
    }

    fn selected_mission_value(&self) -> Option<i32> {
        let id = self.selected_mission.as_ref()?;
        self.missions.get(id).map(|m| m.value)
    }

    fn has_rule(&self, rule: &str) -> bool {
        self.rules.contains(rule)
    }

    fn toggle_rule(&mut self, rule: &str) {
        if !self.rules.remove(rule) {
            self.rules.insert(rule.to_string());
        }
    }

    fn set_rule(&mut self, rule: &str) {
        self.rules.insert(rule.to_string());
    }

    fn clear_rule(&mut self, rule: &str) {
        self.rules.remove(rule);
    }

    fn set_rule_setting(&mut self, setting: RuleSetting, value: &str) {
        self.rule_settings.insert(setting, value.to_string());
    }

    fn store_chosen_training(&mut self, choice: &TrainingChoice) {
        self.chosen_training = choice.clone();
    }

    fn set_first_topic(&mut self, topic: &str) {
        self.first_topic = Some(topic.to_string());
    }

    fn perform_action(&mut self, action: NpcAction) {
        debug!("{} performs {}", self.character.name, action.as_str());
        match action {
            NpcAction::Hostile | NpcAction::InsultCombat => self.make_angry(),
            NpcAction::Follow => self.following = true,
            NpcAction::StopFollowing | NpcAction::Leave | NpcAction::Flee => {
                self.following = false
            }
            NpcAction::MakeNeutral => self.hostile = false,
            _ => {}
        }
        self.actions.push(action);
    }

    fn take_control(&mut self) -> Result<()> {
        if !self.controllable {
            return Err(DialogueError::lookup("controllable actor", &self.character.name));
        }
        self.controlled = true;
        Ok(())
    }
}
