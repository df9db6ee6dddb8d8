//! Actor Capability Interface
//!
//! The engine reaches the simulation only through [`Talker`]. Every method
//! has a default matching an actor that lacks the capability (no opinion, no
//! missions, no rules), so implementations override what they support.

pub mod character;

use serde::{Deserialize, Serialize};

use crate::error::{DialogueError, Result};
use crate::vars::TimeDuration;

pub use character::{Character, NpcTalker, PlayerTalker};

// ============================================================================
// Shared Value Types
// ============================================================================

/// Map position in tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Square (Chebyshev) distance, counting z levels as steps
    pub fn distance(&self, other: &Position) -> i32 {
        let axis = |a: i32, b: i32| a.saturating_sub(b).saturating_abs();
        axis(self.x, other.x)
            .max(axis(self.y, other.y))
            .max(axis(self.z, other.z))
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Position {
        Position::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }
}

/// An NPC's standing toward the other party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Opinion {
    #[serde(default)]
    pub trust: i32,
    #[serde(default)]
    pub fear: i32,
    #[serde(default)]
    pub value: i32,
    #[serde(default)]
    pub anger: i32,
    #[serde(default)]
    pub owed: i32,
}

impl Opinion {
    pub fn is_zero(&self) -> bool {
        *self == Opinion::default()
    }

    pub fn add(&mut self, delta: &Opinion) {
        self.trust = self.trust.saturating_add(delta.trust);
        self.fear = self.fear.saturating_add(delta.fear);
        self.value = self.value.saturating_add(delta.value);
        self.anger = self.anger.saturating_add(delta.anger);
        self.owed = self.owed.saturating_add(delta.owed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Strength,
    Dexterity,
    Intelligence,
    Perception,
}

/// Social trial kinds whose base chance depends on the actors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocialTrial {
    Lie,
    Persuade,
    Intimidate,
}

impl SocialTrial {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialTrial::Lie => "lie",
            SocialTrial::Persuade => "persuade",
            SocialTrial::Intimidate => "intimidate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Neutral,
    Good,
    Bad,
    Mixed,
    Warning,
    Info,
}

/// Behavior-rule settings with a value rather than an on/off flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleSetting {
    Engagement,
    Aim,
    CbmReserve,
    CbmRecharge,
}

/// Built-in NPC behaviors triggered by name from dialogue content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NpcAction {
    Hostile,
    InsultCombat,
    Follow,
    StopFollowing,
    Leave,
    Flee,
    StartTrade,
    LeadToSafety,
    PlayerWeaponAway,
    PlayerWeaponDrop,
    StartMugging,
    DropWeapon,
    EndConversation,
    MakeNeutral,
    GiveEquipment,
}

impl NpcAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hostile" => Some(NpcAction::Hostile),
            "insult_combat" => Some(NpcAction::InsultCombat),
            "follow" => Some(NpcAction::Follow),
            "stop_following" => Some(NpcAction::StopFollowing),
            "leave" => Some(NpcAction::Leave),
            "flee" => Some(NpcAction::Flee),
            "start_trade" => Some(NpcAction::StartTrade),
            "lead_to_safety" => Some(NpcAction::LeadToSafety),
            "player_weapon_away" => Some(NpcAction::PlayerWeaponAway),
            "player_weapon_drop" => Some(NpcAction::PlayerWeaponDrop),
            "start_mugging" => Some(NpcAction::StartMugging),
            "drop_weapon" => Some(NpcAction::DropWeapon),
            "end_conversation" => Some(NpcAction::EndConversation),
            "make_neutral" => Some(NpcAction::MakeNeutral),
            "give_equipment" => Some(NpcAction::GiveEquipment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NpcAction::Hostile => "hostile",
            NpcAction::InsultCombat => "insult_combat",
            NpcAction::Follow => "follow",
            NpcAction::StopFollowing => "stop_following",
            NpcAction::Leave => "leave",
            NpcAction::Flee => "flee",
            NpcAction::StartTrade => "start_trade",
            NpcAction::LeadToSafety => "lead_to_safety",
            NpcAction::PlayerWeaponAway => "player_weapon_away",
            NpcAction::PlayerWeaponDrop => "player_weapon_drop",
            NpcAction::StartMugging => "start_mugging",
            NpcAction::DropWeapon => "drop_weapon",
            NpcAction::EndConversation => "end_conversation",
            NpcAction::MakeNeutral => "make_neutral",
            NpcAction::GiveEquipment => "give_equipment",
        }
    }
}

/// Payload forwarded to the NPC when a response is chosen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingChoice {
    pub skill: Option<String>,
    pub style: Option<String>,
    pub spell: Option<String>,
    pub proficiency: Option<String>,
}

impl TrainingChoice {
    pub fn is_empty(&self) -> bool {
        self.skill.is_none()
            && self.style.is_none()
            && self.spell.is_none()
            && self.proficiency.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoraleChange {
    pub kind: String,
    pub bonus: i32,
    pub max_bonus: i32,
    pub duration: TimeDuration,
    pub decay_start: TimeDuration,
    pub capped: bool,
}

// ============================================================================
// Items
// ============================================================================

fn default_count() -> i32 {
    1
}

/// An item stack, possibly a container holding further items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub type_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_count")]
    pub count: i32,
    #[serde(default)]
    pub contents: Vec<Item>,
}

impl Item {
    pub fn new(type_id: &str, category: &str, count: i32) -> Self {
        Self {
            type_id: type_id.to_string(),
            category: category.to_string(),
            count,
            contents: Vec::new(),
        }
    }

    pub fn with_contents(mut self, contents: Vec<Item>) -> Self {
        self.contents = contents;
        self
    }

    pub fn is_container(&self) -> bool {
        !self.contents.is_empty()
    }

    /// Depth-first pre-order walk over this item and everything inside it
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Item)) {
        f(self);
        for inner in &self.contents {
            inner.visit(f);
        }
    }
}

/// Pre-order walk over an item list
pub fn visit_items<'a>(items: &'a [Item], f: &mut dyn FnMut(&'a Item)) {
    for item in items {
        item.visit(f);
    }
}

// ============================================================================
// Talker Trait
// ============================================================================

/// A conversation participant
pub trait Talker {
    fn name(&self) -> String;

    /// True for the human-controlled side
    fn is_player(&self) -> bool {
        false
    }

    // --- traits, mutations, effects, bionics ---

    fn has_trait(&self, _id: &str) -> bool {
        false
    }
    fn add_trait(&mut self, _id: &str) {}
    fn remove_trait(&mut self, _id: &str) {}
    /// Random mutation, optionally restricted to a category
    fn mutate(&mut self, _category: Option<&str>, _use_vitamins: bool) -> Result<()> {
        Err(DialogueError::lookup("mutation source", self.name()))
    }
    fn has_effect(&self, _id: &str) -> bool {
        false
    }
    fn add_effect(&mut self, _id: &str, _duration: TimeDuration, _permanent: bool, _intensity: i32) {}
    fn remove_effect(&mut self, _id: &str) {}
    fn has_bionic(&self, _id: &str) -> bool {
        false
    }
    fn add_bionic(&mut self, _id: &str) {}
    fn remove_bionic(&mut self, _id: &str) {}

    // --- skills and stats ---

    fn skill_level(&self, _skill: &str) -> i32 {
        0
    }
    fn practice_skill(&mut self, _skill: &str, _amount: i32) {}
    fn stat(&self, _stat: Stat) -> i32 {
        8
    }
    /// Actor-derived adjustment to social trial chances
    fn trial_chance_mod(&self, _trial: SocialTrial) -> i32 {
        0
    }

    // --- items and money ---

    fn inventory(&self) -> &[Item] {
        &[]
    }
    fn item_count(&self, type_id: &str) -> i32 {
        let mut total = 0i32;
        visit_items(self.inventory(), &mut |it| {
            if it.type_id == type_id {
                total = total.saturating_add(it.count);
            }
        });
        total
    }
    fn has_item(&self, type_id: &str) -> bool {
        self.item_count(type_id) > 0
    }
    fn category_count(&self, category: &str) -> i32 {
        let mut total = 0i32;
        visit_items(self.inventory(), &mut |it| {
            if it.category == category {
                total = total.saturating_add(it.count);
            }
        });
        total
    }
    /// Whether `add_item` would take this item
    fn can_accept_item(&self, _item: &Item) -> bool {
        false
    }
    fn add_item(&mut self, _item: Item) -> Result<()> {
        Err(DialogueError::lookup("inventory", self.name()))
    }
    /// Remove `count` units of a type; fails without removing anything if short
    fn remove_items(&mut self, type_id: &str, _count: i32) -> Result<()> {
        Err(DialogueError::lookup("item", type_id))
    }
    /// Remove every unit of a type, returning how many were removed
    fn remove_all_items(&mut self, _type_id: &str) -> i32 {
        0
    }
    fn cash(&self) -> i64 {
        0
    }
    fn add_cash(&mut self, _delta: i64) {}

    // --- position ---

    fn position(&self) -> Position {
        Position::default()
    }
    fn teleport(&mut self, _to: Position) -> Result<()> {
        Err(DialogueError::lookup("teleport target", self.name()))
    }

    // --- relationship ---

    fn opinion(&self) -> Opinion {
        Opinion::default()
    }
    fn add_opinion(&mut self, _delta: &Opinion) {}
    /// Whether an anger change of `anger` would push this actor into hostility
    fn check_hostile_response(&self, _anger: i32) -> bool {
        false
    }
    fn turned_hostile(&self) -> bool {
        false
    }
    fn make_angry(&mut self) {}
    fn add_debt(&mut self, _amount: i32) {}
    fn is_following(&self) -> bool {
        false
    }

    // --- faction and class ---

    fn faction_id(&self) -> String {
        String::new()
    }
    fn set_faction(&mut self, _faction: &str) {}
    fn change_faction_rep(&mut self, _delta: i32) {}
    fn faction_trust(&self) -> i32 {
        0
    }
    fn change_faction_trust(&mut self, _delta: i32) {}
    fn set_class(&mut self, _class: &str) {}

    // --- variables ---

    fn get_value(&self, _name: &str) -> Option<String> {
        None
    }
    fn set_value(&mut self, _name: &str, _value: &str) {}
    fn remove_value(&mut self, _name: &str) {}

    // --- missions ---

    fn has_mission(&self, _id: &str) -> bool {
        false
    }
    fn assign_mission(&mut self, id: &str) -> Result<()> {
        Err(DialogueError::lookup("mission", id))
    }
    fn finish_mission(&mut self, id: &str, _success: bool) -> Result<()> {
        Err(DialogueError::lookup("mission", id))
    }
    fn offer_mission(&mut self, id: &str) -> Result<()> {
        Err(DialogueError::lookup("mission", id))
    }
    /// Create a new mission from a mission type
    fn add_mission(&mut self, id: &str) -> Result<()> {
        Err(DialogueError::lookup("mission type", id))
    }
    /// Missions this actor has assigned to its conversation partner
    fn assigned_missions(&self) -> Vec<String> {
        Vec::new()
    }
    fn available_missions(&self) -> Vec<String> {
        Vec::new()
    }
    fn select_mission(&mut self, _id: &str) {}
    /// Reward value of the currently selected mission
    fn selected_mission_value(&self) -> Option<i32> {
        None
    }

    // --- behavior rules ---

    fn has_rule(&self, _rule: &str) -> bool {
        false
    }
    fn toggle_rule(&mut self, _rule: &str) {}
    fn set_rule(&mut self, _rule: &str) {}
    fn clear_rule(&mut self, _rule: &str) {}
    fn set_rule_setting(&mut self, _setting: RuleSetting, _value: &str) {}

    // --- magic, recipes, morale, body ---

    fn cast_spell(&mut self, spell: &str, _target: Option<Position>) -> Result<()> {
        Err(DialogueError::lookup("spell", spell))
    }
    fn learn_recipe(&mut self, recipe: &str) -> Result<()> {
        Err(DialogueError::lookup("recipe", recipe))
    }
    fn morale_level(&self) -> i32 {
        0
    }
    fn add_morale(&mut self, _change: &MoraleChange) {}
    fn remove_morale(&mut self, _kind: &str) {}
    fn mod_healthy(&mut self, _amount: i32, _cap: i32) {}
    fn mod_fatigue(&mut self, _amount: i32) {}
    fn add_wet(&mut self, _amount: i32) {}
    fn assign_activity(&mut self, _activity: &str, _duration: TimeDuration) {}

    // --- output and world ---

    fn add_message(&mut self, _text: &str, _kind: MessageKind) {}
    fn make_sound(&mut self, _text: &str, _volume: i32, _ambient: bool) {}
    /// Spawn monsters around this actor, returning how many appeared
    fn spawn_monster(&mut self, monster: &str, _count: i32, _hostile: bool, _radius: i32) -> Result<i32> {
        Err(DialogueError::lookup("monster", monster))
    }

    // --- conversation hooks ---

    fn store_chosen_training(&mut self, _choice: &TrainingChoice) {}
    fn set_first_topic(&mut self, _topic: &str) {}
    fn perform_action(&mut self, _action: NpcAction) {}
    /// Hand control of this actor to the player
    fn take_control(&mut self) -> Result<()> {
        Err(DialogueError::lookup("controllable actor", self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl Talker for Bare {
        fn name(&self) -> String {
            "bare".to_string()
        }
    }

    #[test]
    fn test_default_capabilities() {
        let mut t = Bare;
        assert!(!t.is_player());
        assert_eq!(t.skill_level("speech"), 0);
        assert!(t.opinion().is_zero());
        assert!(t.assign_mission("m1").is_err());
        assert!(!t.can_accept_item(&Item::new("rock", "junk", 1)));
        assert!(t.add_item(Item::new("rock", "junk", 1)).is_err());
    }

    #[test]
    fn test_item_visit_preorder() {
        let bag = Item::new("backpack", "container", 1).with_contents(vec![
            Item::new("apple", "food", 2),
            Item::new("tin", "container", 1).with_contents(vec![Item::new("bean", "food", 5)]),
        ]);
        let mut seen = Vec::new();
        bag.visit(&mut |it| seen.push(it.type_id.clone()));
        assert_eq!(seen, vec!["backpack", "apple", "tin", "bean"]);
    }

    #[test]
    fn test_distance_and_opinion_math() {
        let a = Position::new(0, 0, 0);
        assert_eq!(a.distance(&Position::new(3, -5, 0)), 5);
        assert_eq!(a.distance(&a.offset(1, 1, 2)), 2);

        let mut o = Opinion::default();
        o.add(&Opinion { trust: 2, anger: -1, ..Default::default() });
        o.add(&Opinion { trust: 1, ..Default::default() });
        assert_eq!(o.trust, 3);
        assert_eq!(o.anger, -1);
    }

    #[test]
    fn test_extreme_values_saturate() {
        let far = Position::new(i32::MAX, i32::MIN, 0);
        assert_eq!(far.distance(&Position::new(i32::MIN, i32::MAX, 0)), i32::MAX);
        assert_eq!(far.offset(1, -1, 0), far);

        let mut o = Opinion { trust: i32::MAX, anger: i32::MIN, ..Default::default() };
        o.add(&Opinion { trust: 1, anger: -1, owed: 4, ..Default::default() });
        assert_eq!(o.trust, i32::MAX);
        assert_eq!(o.anger, i32::MIN);
        assert_eq!(o.owed, 4);
    }

    #[test]
    fn test_npc_action_names_round_trip() {
        for name in ["hostile", "follow", "start_mugging", "give_equipment"] {
            assert_eq!(NpcAction::from_str(name).map(|a| a.as_str()), Some(name));
        }
        assert_eq!(NpcAction::from_str("dance"), None);
    }
}
