//! Presentation boundary
//!
//! The session hands a presenter the NPC's line and the ordered options and
//! gets back the index of the chosen one.

use std::collections::VecDeque;

use crate::effect::Consequence;

/// Colour class of an option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Highlight {
    Plain,
    Action,
    Helpless,
    Hostile,
}

impl Highlight {
    /// Most severe of the given consequences
    pub fn from_consequences(consequences: &[Consequence]) -> Self {
        match consequences.iter().max() {
            Some(Consequence::Hostile) => Highlight::Hostile,
            Some(Consequence::Helpless) => Highlight::Helpless,
            Some(Consequence::Action) => Highlight::Action,
            Some(Consequence::None) | None => Highlight::Plain,
        }
    }
}

/// One option as shown to the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkData {
    pub text: String,
    pub highlight: Highlight,
    pub hotkey: char,
}

/// Hotkey for the option at `index`: a-z, then A-Z, then none
pub fn hotkey_for(index: usize) -> char {
    const KEYS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    KEYS.chars().nth(index).unwrap_or(' ')
}

pub trait Presenter {
    /// Show `line` spoken by `speaker` and return the chosen option index
    fn present(&mut self, speaker: &str, line: &str, options: &[TalkData]) -> usize;

    /// Checked between response cycles
    fn should_stop(&self) -> bool {
        false
    }
}

/// Replays a fixed list of choices and records what it was shown
#[derive(Debug, Default)]
pub struct ScriptedPresenter {
    choices: VecDeque<usize>,
    pub transcript: Vec<(String, Vec<TalkData>)>,
}

impl ScriptedPresenter {
    pub fn new(choices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            choices: choices.into_iter().collect(),
            transcript: Vec::new(),
        }
    }
}

impl Presenter for ScriptedPresenter {
    fn present(&mut self, _speaker: &str, line: &str, options: &[TalkData]) -> usize {
        self.transcript.push((line.to_string(), options.to_vec()));
        // Out of script: take the last option, which is the exit when present
        self.choices
            .pop_front()
            .unwrap_or_else(|| options.len().saturating_sub(1))
    }

    fn should_stop(&self) -> bool {
        self.choices.is_empty() && self.transcript.len() > 64
    }
}
