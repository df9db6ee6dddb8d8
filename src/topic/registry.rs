//! Topic Registry
//!
//! Loads talk topics from JSON files under `<data_dir>/topics`, merges
//! repeated ids, and checks the graph for dangling references. A loaded
//! registry is immutable; hot reload builds a fresh one and swaps the
//! [`Arc`] so running conversations keep the snapshot they started with.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::definition::{RawTopic, TopicDef};
use crate::effect::talk::{TALK_DONE, TALK_NONE};
use crate::error::{DialogueError, Result};

/// All known talk topics
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, TopicDef>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `.json` file below `<data_dir>/topics`
    pub fn load_from_directory(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("topics");
        let mut registry = Self::new();
        info!("Loading dialogue topics from {:?}", dir);

        if !dir.exists() {
            warn!("Topic directory does not exist: {:?}", dir);
            return Ok(registry);
        }

        let mut paths = Vec::new();
        collect_json_files(&dir, &mut paths)?;
        paths.sort();

        let mut loaded_files = 0;
        for path in &paths {
            match registry.load_file(path) {
                Ok(count) => {
                    debug!("Loaded {} topic record(s) from {:?}", count, path);
                    loaded_files += 1;
                }
                Err(e) => error!("Failed to load topic file {:?}: {}", path, e),
            }
        }

        info!(
            "Loaded {} dialogue topics from {}/{} files",
            registry.len(),
            loaded_files,
            paths.len()
        );
        for problem in registry.check_consistency() {
            warn!("{}", problem);
        }
        Ok(registry)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        self.load_json_str(&content, &path.to_string_lossy())
    }

    /// Load every record in a file; a malformed record is logged and skipped
    pub fn load_json_str(&mut self, content: &str, source: &str) -> Result<usize> {
        let json: Value = serde_json::from_str(content)
            .map_err(|e| DialogueError::content(source, e.to_string()))?;
        let records = match json {
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut count = 0;
        for (i, record) in records.into_iter().enumerate() {
            let kind = record.get("type").and_then(Value::as_str).unwrap_or("");
            if kind != "talk_topic" {
                debug!("Skipping record {} of type '{}' in {}", i, kind, source);
                continue;
            }
            let id = record_id(&record);
            match parse_record(record) {
                Ok(topics) => {
                    count += topics.len();
                    for topic in topics {
                        self.insert(topic);
                    }
                }
                Err(e) => warn!("Skipping topic '{}' ({}[{}]): {}", id, source, i, e),
            }
        }
        Ok(count)
    }

    /// Add a topic, merging into an existing one with the same id
    pub fn insert(&mut self, topic: TopicDef) {
        match self.topics.get_mut(&topic.id) {
            Some(existing) => {
                debug!("Merging additional definition of topic '{}'", topic.id);
                existing.merge(topic);
            }
            None => {
                self.topics.insert(topic.id.clone(), topic);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TopicDef> {
        self.topics.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.topics.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Sorted topic ids
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.topics.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Topics a single response step away from `id`
    pub fn directly_reachable_topics(&self, id: &str) -> BTreeSet<String> {
        self.get(id)
            .map(|t| {
                t.next_topics()
                    .filter(|next| *next != TALK_NONE && *next != TALK_DONE)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Responses that lead to topics nobody defined
    pub fn check_consistency(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for id in self.ids() {
            for next in self.directly_reachable_topics(&id) {
                if !self.contains(&next) {
                    problems.push(format!(
                        "Topic '{}' references undefined topic '{}'",
                        id, next
                    ));
                }
            }
        }
        problems
    }
}

/// Best-effort id for log lines about a record that may not parse
fn record_id(record: &Value) -> String {
    match record.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(","),
        _ => "?".to_string(),
    }
}

fn parse_record(record: Value) -> Result<Vec<TopicDef>> {
    let raw: RawTopic =
        serde_json::from_value(record).map_err(|e| DialogueError::content("talk_topic", e.to_string()))?;
    raw.ids().iter().map(|id| TopicDef::from_raw(id, &raw)).collect()
}

fn collect_json_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    Ok(())
}

// ============================================================================
// Hot Reload
// ============================================================================

/// Events from the hot-reload watcher
#[derive(Debug, Clone)]
pub enum HotReloadEvent {
    /// Topics were reloaded after a change to this file
    Reloaded(String),
    Error(String),
}

/// The current registry snapshot, replaceable at runtime
pub struct SharedRegistry {
    current: RwLock<Arc<TopicRegistry>>,
    data_dir: PathBuf,
}

impl SharedRegistry {
    pub fn new(data_dir: &Path, registry: TopicRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub async fn snapshot(&self) -> Arc<TopicRegistry> {
        Arc::clone(&*self.current.read().await)
    }

    /// Rebuild from disk and swap in the result
    pub async fn reload(&self) -> Result<usize> {
        let fresh = TopicRegistry::load_from_directory(&self.data_dir)?;
        let count = fresh.len();
        *self.current.write().await = Arc::new(fresh);
        Ok(count)
    }

    /// Watch the topic directory and reload on changes
    pub fn start_file_watcher(
        self: &Arc<Self>,
    ) -> Result<tokio::sync::mpsc::Receiver<HotReloadEvent>> {
        use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
        use std::time::Duration;

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let registry = Arc::clone(self);
        let topics_dir = self.data_dir.join("topics");
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| DialogueError::Config(format!("hot reload needs a tokio runtime: {}", e)))?;

        std::thread::spawn(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: std::result::Result<notify::Event, notify::Error>| {
                    if let Ok(event) = res {
                        let _ = notify_tx.send(event);
                    }
                },
                Config::default().with_poll_interval(Duration::from_secs(1)),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create topic watcher: {}", e);
                    return;
                }
            };

            if let Err(e) = watcher.watch(&topics_dir, RecursiveMode::Recursive) {
                error!("Failed to watch topic directory {:?}: {}", topics_dir, e);
                return;
            }
            info!("Topic hot-reload watcher started for {:?}", topics_dir);

            while let Ok(event) = notify_rx.recv() {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)) {
                    continue;
                }
                let Some(path) = event
                    .paths
                    .iter()
                    .find(|p| p.extension().is_some_and(|ext| ext == "json"))
                    .cloned()
                else {
                    continue;
                };
                info!("Detected change in {:?}, reloading topics", path);

                let reg = Arc::clone(&registry);
                let tx = tx.clone();
                rt.spawn(async move {
                    match reg.reload().await {
                        Ok(count) => {
                            info!("Topic hot-reload completed: {} topics", count);
                            let _ = tx
                                .send(HotReloadEvent::Reloaded(path.to_string_lossy().to_string()))
                                .await;
                        }
                        Err(e) => {
                            error!("Topic hot-reload failed: {}", e);
                            let _ = tx.send(HotReloadEvent::Error(e.to_string())).await;
                        }
                    }
                });
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GREETINGS: &str = r#"[
        {"type": "talk_topic", "id": "TALK_START", "dynamic_line": "Hello.",
         "responses": [{"text": "About you?", "topic": "TALK_ABOUT_SELF"},
                       {"text": "Bye.", "topic": "TALK_DONE"}]},
        {"type": "talk_topic", "id": "TALK_ABOUT_SELF", "dynamic_line": "Not much to say.",
         "responses": [{"text": "Back.", "topic": "TALK_START"}]},
        {"type": "item_group", "id": "ignored"}
    ]"#;

    fn write_topics(dir: &TempDir, name: &str, content: &str) {
        let topics = dir.path().join("topics").join("npcs");
        std::fs::create_dir_all(&topics).unwrap();
        std::fs::write(topics.join(name), content).unwrap();
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        write_topics(&dir, "greetings.json", GREETINGS);

        let registry = TopicRegistry::load_from_directory(dir.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("TALK_ABOUT_SELF"));
        assert!(registry.check_consistency().is_empty());
        assert_eq!(
            registry.directly_reachable_topics("TALK_START"),
            BTreeSet::from(["TALK_ABOUT_SELF".to_string()])
        );
    }

    #[test]
    fn test_bad_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        write_topics(&dir, "greetings.json", GREETINGS);
        write_topics(
            &dir,
            "mixed.json",
            r#"[{"type": "talk_topic", "id": "TALK_OK", "dynamic_line": "fine"},
                {"type": "talk_topic", "id": "TALK_BROKEN",
                 "responses": [{"text": "x", "condition": {"type": "has_var", "var": "v", "scope": "party", "value": "1"}}]},
                {"type": "talk_topic", "id": ["TALK_BAD_A", "TALK_BAD_B"], "responses": [{"topic": "TALK_DONE"}]},
                {"type": "talk_topic", "id": "TALK_AFTER", "dynamic_line": "still here"}]"#,
        );
        write_topics(&dir, "garbled.json", r#"[{"type": "talk_topic", "#);

        let registry = TopicRegistry::load_from_directory(dir.path()).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.contains("TALK_OK"));
        assert!(registry.contains("TALK_AFTER"));
        assert!(!registry.contains("TALK_BROKEN"));
        assert!(!registry.contains("TALK_BAD_A"));
        assert!(!registry.contains("TALK_BAD_B"));
    }

    #[test]
    fn test_load_count_excludes_skipped_records() {
        let mut registry = TopicRegistry::new();
        let count = registry
            .load_json_str(
                r#"[{"type": "talk_topic", "id": "TALK_X", "dynamic_line": "x",
                     "responses": [{"text": "go", "effect": [{"type": "dance"}]}]},
                    {"type": "talk_topic", "id": "TALK_Y", "dynamic_line": "y"}]"#,
                "y.json",
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(registry.ids(), vec!["TALK_Y".to_string()]);
        assert!(registry.load_json_str("not json", "z.json").is_err());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = TopicRegistry::load_from_directory(dir.path()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_merge_and_multi_id() {
        let mut registry = TopicRegistry::new();
        registry
            .load_json_str(
                r#"{"type": "talk_topic", "id": ["TALK_A", "TALK_B"], "dynamic_line": "Shared.",
                    "responses": [{"text": "Go", "topic": "TALK_MISSING"}]}"#,
                "a.json",
            )
            .unwrap();
        registry
            .load_json_str(
                r#"{"type": "talk_topic", "id": "TALK_A",
                    "responses": [{"text": "More", "topic": "TALK_DONE"}]}"#,
                "b.json",
            )
            .unwrap();
        assert_eq!(registry.get("TALK_A").unwrap().responses.len(), 2);
        assert_eq!(registry.get("TALK_B").unwrap().responses.len(), 1);
        assert_eq!(registry.check_consistency().len(), 2);
    }

    #[test]
    fn test_shipped_content_is_consistent() {
        let data_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        let registry = TopicRegistry::load_from_directory(&data_dir).unwrap();
        assert!(registry.contains("TALK_START"));
        assert!(registry.contains("TALK_TRADE_OFFER"));
        assert!(registry.check_consistency().is_empty());
        // defined in two files
        assert_eq!(registry.get("TALK_NOT_TRUSTED").unwrap().responses.len(), 2);
    }

    #[tokio::test]
    async fn test_reload_swaps_snapshot() {
        let dir = TempDir::new().unwrap();
        write_topics(&dir, "greetings.json", GREETINGS);
        let shared = SharedRegistry::new(
            dir.path(),
            TopicRegistry::load_from_directory(dir.path()).unwrap(),
        );
        let before = shared.snapshot().await;

        write_topics(
            &dir,
            "extra.json",
            r#"{"type": "talk_topic", "id": "TALK_NEW", "dynamic_line": "New."}"#,
        );
        assert_eq!(shared.reload().await.unwrap(), 3);

        assert!(!before.contains("TALK_NEW"));
        assert!(shared.snapshot().await.contains("TALK_NEW"));
    }

    #[tokio::test]
    async fn test_watcher_starts_inside_runtime() {
        let dir = TempDir::new().unwrap();
        write_topics(&dir, "greetings.json", GREETINGS);
        let shared = Arc::new(SharedRegistry::new(dir.path(), TopicRegistry::new()));
        assert!(shared.start_file_watcher().is_ok());
    }
}
