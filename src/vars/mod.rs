//! Scoped Variables
//!
//! Variable scopes, the process-wide global store, and the typed
//! value-or-variable references used by conditions and effects.

pub mod value;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{DialogueError, Result};

pub use value::{
    DurationOrVar, IntOrVar, RawDurationOrVar, RawIntOrVar, RawStrOrVar, StrOrVar, TimeDuration,
};

/// Namespace a named variable is stored under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarScope {
    Global,
    #[default]
    U,
    Npc,
    Faction,
    Party,
}

impl VarScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarScope::Global => "global",
            VarScope::U => "u",
            VarScope::Npc => "npc",
            VarScope::Faction => "faction",
            VarScope::Party => "party",
        }
    }

    pub fn is_npc(&self) -> bool {
        *self == VarScope::Npc
    }

    /// Faction and party stores do not exist; references to them are content errors.
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            VarScope::Faction | VarScope::Party => {
                Err(DialogueError::UnsupportedScope(self.as_str().to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// A resolved variable location: scope plus the full stored key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub scope: VarScope,
    pub name: String,
}

impl VarRef {
    pub fn new(scope: VarScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

/// Variable location as it appears in content
#[derive(Debug, Clone, Deserialize)]
pub struct RawVarRef {
    pub var: String,
    #[serde(default)]
    pub scope: VarScope,
    pub var_type: Option<String>,
    pub context: Option<String>,
}

impl RawVarRef {
    pub fn resolve(&self) -> Result<VarRef> {
        resolve_var(&self.var, self.scope, self.var_type.as_deref(), self.context.as_deref())
    }
}

/// Compose the stored key (`type_context_name`) and validate the scope
pub fn resolve_var(
    name: &str,
    scope: VarScope,
    var_type: Option<&str>,
    context: Option<&str>,
) -> Result<VarRef> {
    scope.ensure_supported()?;
    if name.is_empty() {
        return Err(DialogueError::content("var", "variable name is empty"));
    }
    let mut key = String::new();
    for part in [var_type, context].into_iter().flatten() {
        key.push_str(part);
        key.push('_');
    }
    key.push_str(name);
    Ok(VarRef::new(scope, key))
}

/// Read access to variables plus the session's sampling source
pub trait VarContext {
    /// Current stored value, `None` when unset
    fn read_var(&self, var: &VarRef) -> Result<Option<String>>;

    /// Uniform sample in `[min, max]`
    fn sample(&self, min: i64, max: i64) -> i64;
}

// ============================================================================
// Global Variable Store
// ============================================================================

/// Process-wide key/value store shared by all sessions
#[derive(Debug, Default)]
pub struct GlobalVariables {
    values: DashMap<String, String>,
}

impl GlobalVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).map(|v| v.value().clone())
    }

    pub fn set(&self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.values.remove(name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted copy of every stored value, for save systems
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn restore(&self, values: BTreeMap<String, String>) {
        self.values.clear();
        for (k, v) in values {
            self.values.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_scope_parsing() {
        let scope: VarScope = serde_json::from_str("\"global\"").unwrap();
        assert_eq!(scope, VarScope::Global);
        let raw: RawVarRef = serde_json::from_str(r#"{"var": "met"}"#).unwrap();
        assert_eq!(raw.scope, VarScope::U);
    }

    #[test]
    fn test_faction_and_party_scopes_rejected() {
        assert!(matches!(
            resolve_var("rep", VarScope::Faction, None, None),
            Err(DialogueError::UnsupportedScope(_))
        ));
        assert!(matches!(
            resolve_var("rep", VarScope::Party, None, None),
            Err(DialogueError::UnsupportedScope(_))
        ));
    }

    #[test]
    fn test_key_composition() {
        let var = resolve_var("visits", VarScope::Npc, Some("counter"), Some("inn")).unwrap();
        assert_eq!(var.name, "counter_inn_visits");
        let plain = resolve_var("trust", VarScope::Global, None, None).unwrap();
        assert_eq!(plain.name, "trust");
    }

    #[test]
    fn test_global_store_concurrent_writes() {
        let store = Arc::new(GlobalVariables::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.set(&format!("k{}_{}", i, j), "1");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 200);

        let snap = store.snapshot();
        store.restore(BTreeMap::new());
        assert!(store.is_empty());
        store.restore(snap);
        assert_eq!(store.get("k3_49"), Some("1".to_string()));
    }
}
