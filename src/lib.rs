//! NPC dialogue rule engine
//!
//! Talk topics are loaded from JSON content into a [`TopicRegistry`]. A
//! [`Dialogue`] walks that graph between a player-side actor and an NPC,
//! evaluating conditions, rolling trials and applying effects through the
//! [`Talker`] capability trait.

pub mod condition;
pub mod config;
pub mod dialogue;
pub mod effect;
pub mod error;
pub mod talker;
pub mod topic;
pub mod trial;
pub mod vars;

pub use condition::{Condition, DialogueView};
pub use config::EngineConfig;
pub use dialogue::{Dialogue, Presenter, ScriptedPresenter, TalkData, TalkTopic};
pub use effect::talk::{TALK_DONE, TALK_NONE};
pub use effect::{Effect, EffectContext, Handoff};
pub use error::{DialogueError, Result};
pub use talker::{Character, NpcTalker, PlayerTalker, Talker};
pub use topic::{SharedRegistry, TopicDef, TopicRegistry};
pub use trial::{Trial, TrialRoll};
pub use vars::{GlobalVariables, VarContext, VarRef, VarScope};
