//! Console runner: talk to the NPC described in `<data_dir>/cast.toml`.

use serde::Deserialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use dialogue_engine::dialogue::Highlight;
use dialogue_engine::topic::HotReloadEvent;
use dialogue_engine::{
    Character, Dialogue, DialogueError, EngineConfig, GlobalVariables, Handoff, NpcTalker,
    PlayerTalker, Presenter, SharedRegistry, TalkData, TopicRegistry,
};

/// The two actors of the sample conversation
#[derive(Debug, Deserialize)]
struct Cast {
    player: PlayerTalker,
    npc: NpcTalker,
}

impl Cast {
    fn load(data_dir: &Path) -> dialogue_engine::Result<Self> {
        let path = data_dir.join("cast.toml");
        if !path.exists() {
            warn!("No cast file at {:?}, using default actors", path);
            return Ok(Self {
                player: PlayerTalker::new(Character::new("You")),
                npc: NpcTalker::new(Character::new("Stranger")),
            });
        }
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| DialogueError::Config(format!("{:?}: {}", path, e)))
    }
}

/// Reads choices from stdin by hotkey or number
struct ConsolePresenter {
    closed: bool,
}

impl Presenter for ConsolePresenter {
    fn present(&mut self, speaker: &str, line: &str, options: &[TalkData]) -> usize {
        println!();
        println!("{}: {}", speaker, line);
        for option in options {
            let marker = match option.highlight {
                Highlight::Plain => "",
                Highlight::Action => " *",
                Highlight::Helpless => " (!)",
                Highlight::Hostile => " (!!)",
            };
            println!("  {}: {}{}", option.hotkey, option.text, marker);
        }

        let stdin = io::stdin();
        loop {
            print!("> ");
            let _ = io::stdout().flush();
            let mut input = String::new();
            match stdin.lock().read_line(&mut input) {
                Ok(0) | Err(_) => {
                    self.closed = true;
                    return options.len().saturating_sub(1);
                }
                Ok(_) => {}
            }
            let input = input.trim();
            let by_key = input
                .chars()
                .next()
                .filter(|_| input.chars().count() == 1)
                .and_then(|c| options.iter().position(|o| o.hotkey == c));
            let by_number = input.parse::<usize>().ok().filter(|n| *n < options.len());
            if let Some(choice) = by_key.or(by_number) {
                return choice;
            }
            println!("Pick one of the listed keys.");
        }
    }

    fn should_stop(&self) -> bool {
        self.closed
    }
}

fn ask_again() -> bool {
    print!("\nTalk again? [y/N] ");
    let _ = io::stdout().flush();
    let mut input = String::new();
    match io::stdin().lock().read_line(&mut input) {
        Ok(0) | Err(_) => false,
        Ok(_) => input.trim().eq_ignore_ascii_case("y"),
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("dialogue.toml"));
    let config = match EngineConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to read {:?}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    match config.logging.filter.parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring log filter '{}': {}", config.logging.filter, e),
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = config.content.data_dir.clone();
    let registry = match TopicRegistry::load_from_directory(&data_dir) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to load topics from {:?}: {}", data_dir, e);
            std::process::exit(1);
        }
    };
    info!("Loaded {} topics from {:?}", registry.len(), data_dir);
    let shared = Arc::new(SharedRegistry::new(&data_dir, registry));

    if config.content.hot_reload {
        match shared.start_file_watcher() {
            Ok(mut events) => {
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        match event {
                            HotReloadEvent::Reloaded(path) => info!("Topics reloaded after change to {}", path),
                            HotReloadEvent::Error(e) => warn!("Topic reload failed, keeping previous topics: {}", e),
                        }
                    }
                });
            }
            Err(e) => warn!("Hot reload disabled: {}", e),
        }
    }

    let Cast { mut player, mut npc } = match Cast::load(&data_dir) {
        Ok(cast) => cast,
        Err(e) => {
            error!("Failed to load cast: {}", e);
            std::process::exit(1);
        }
    };
    let globals = GlobalVariables::new();

    loop {
        let session_id = Uuid::new_v4();
        let registry = shared.snapshot().await;
        let mut settings = config.dialogue.clone();
        if let Some(topic) = &npc.first_topic {
            settings.first_topic = topic.clone();
        }
        info!(session = %session_id, topic = %settings.first_topic, "Starting conversation");

        let mut presenter = ConsolePresenter { closed: false };
        let handoff = {
            let mut dialogue = Dialogue::new(&mut player, &mut npc, &globals, registry, settings);
            dialogue.run(&mut presenter)
        };

        match handoff {
            Some(Handoff::OpenDialogue { topic: Some(topic) }) => {
                info!(session = %session_id, "Next conversation opens at {}", topic);
                npc.first_topic = Some(topic);
            }
            Some(Handoff::OpenDialogue { topic: None }) => {
                info!(session = %session_id, "{} wants to keep talking", npc.character.name);
            }
            Some(Handoff::TakeControl) => {
                info!(session = %session_id, "{} is now under player control", npc.character.name);
            }
            None => {}
        }
        info!(session = %session_id, "Conversation ended");

        if presenter.closed || !ask_again() {
            break;
        }
    }
}
