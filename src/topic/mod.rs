//! Talk topics: definitions and the registry that loads them

pub mod definition;
pub mod registry;

pub use definition::{DynamicLine, RepeatResponse, Response, SpeakerEffect, TopicDef, TrueFalseText};
pub use registry::{HotReloadEvent, SharedRegistry, TopicRegistry};
