//! Error types for the dialogue engine.

use thiserror::Error;

/// Top-level error type for content loading and dialogue execution.
#[derive(Error, Debug)]
pub enum DialogueError {
    /// Malformed topic, response or effect definition.
    #[error("Content error in '{context}': {message}")]
    Content { context: String, message: String },

    /// A variable reference declares no default value.
    #[error("Variable '{0}' has no default value")]
    MissingDefault(String),

    /// Faction and party variables are declared but not supported.
    #[error("Variable scope '{0}' is not implemented")]
    UnsupportedScope(String),

    #[error("Unknown effect '{0}'")]
    UnknownEffect(String),

    #[error("Unknown condition '{0}'")]
    UnknownCondition(String),

    #[error("Unknown trial modifier '{0}'")]
    UnknownModifier(String),

    /// A stored variable could not be parsed as the expected kind.
    #[error("Variable '{name}' holds '{value}', expected {expected}")]
    VarParse {
        name: String,
        value: String,
        expected: &'static str,
    },

    /// Division or remainder by zero in an arithmetic expression.
    #[error("Division by zero")]
    DivisionByZero,

    /// A referenced mission/item/spell/recipe was not found at execution time.
    #[error("{kind} '{id}' not found")]
    Lookup { kind: &'static str, id: String },

    /// Item transfers need a positive count.
    #[error("Invalid count {count} for item '{item}'")]
    InvalidCount { item: String, count: i64 },

    /// The receiving actor has no room for an item.
    #[error("{actor} cannot take '{item}'")]
    ItemRejected { actor: String, item: String },

    #[error("Not enough cash: need {needed}, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DialogueError {
    pub fn content(context: impl Into<String>, message: impl Into<String>) -> Self {
        DialogueError::Content {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn lookup(kind: &'static str, id: impl Into<String>) -> Self {
        DialogueError::Lookup {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_count(item: impl Into<String>, count: i64) -> Self {
        DialogueError::InvalidCount {
            item: item.into(),
            count,
        }
    }

    /// Wrap a load-time error with the content unit it came from
    pub fn in_context(self, context: &str) -> Self {
        match self {
            DialogueError::Content { context: inner, message } => DialogueError::Content {
                context: format!("{}/{}", context, inner),
                message,
            },
            other => DialogueError::Content {
                context: context.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, DialogueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_context_nests_content_paths() {
        let err = DialogueError::content("responses[2]", "missing text")
            .in_context("TALK_START");
        assert_eq!(
            err.to_string(),
            "Content error in 'TALK_START/responses[2]': missing text"
        );

        let err = DialogueError::UnsupportedScope("faction".to_string()).in_context("TALK_X");
        assert!(err.to_string().contains("TALK_X"));
        assert!(err.to_string().contains("faction"));
    }
}
