use serde_json::{Value, json};
use thiserror::Error;

/// Expected failures of the probe operations and the dispatch layer.
/// Everything unexpected from a collaborator is carried as `Internal`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no project is open")]
    NoProjectOpen,
    #[error("the project is still indexing; retry once indexing finishes")]
    IndexBuilding,
    #[error("no declaration found for '{input}'")]
    NotFound { input: String, hints: Vec<String> },
    #[error("'{input}' matches {} declarations; use a qualified name", matches.len())]
    Ambiguous {
        input: String,
        matches: Vec<String>,
        suggestion: String,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProbeError {
    pub fn not_found(input: &str) -> Self {
        ProbeError::NotFound {
            input: input.to_string(),
            hints: vec![
                "qualified name, e.g. com.example.Main".to_string(),
                "simple name, e.g. Main".to_string(),
                "source file name, e.g. Main.java".to_string(),
                "for a file name, make sure the file is inside the project".to_string(),
            ],
        }
    }

    /// `matches` must already be sorted.
    pub fn ambiguous(input: &str, matches: Vec<String>) -> Self {
        let suggestion = format!("retry with one of: {}", matches.join(", "));
        ProbeError::Ambiguous {
            input: input.to_string(),
            matches,
            suggestion,
        }
    }

    /// Stable identifier for the dispatch layer.
    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::NoProjectOpen => "NO_PROJECT_OPEN",
            ProbeError::IndexBuilding => "INDEX_BUILDING",
            ProbeError::NotFound { .. } => "CLASS_NOT_FOUND",
            ProbeError::Ambiguous { .. } => "MULTIPLE_MATCHES",
            ProbeError::InvalidRequest(_) => "INVALID_REQUEST",
            ProbeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ProbeError::NotFound { input, hints } => Some(json!({
                "input": input,
                "hints": hints,
            })),
            ProbeError::Ambiguous {
                input,
                matches,
                suggestion,
            } => Some(json!({
                "input": input,
                "matches": matches,
                "suggestion": suggestion,
            })),
            ProbeError::Internal(err) => Some(json!({ "cause": format!("{err:#}") })),
            _ => None,
        }
    }
}

pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_carries_sorted_matches_and_suggestion() {
        let err = ProbeError::ambiguous(
            "Widget",
            vec!["com.acme.Widget".to_string(), "com.other.Widget".to_string()],
        );
        assert_eq!(err.code(), "MULTIPLE_MATCHES");
        let details = err.details().unwrap();
        assert_eq!(details["matches"][1], "com.other.Widget");
        assert!(
            details["suggestion"]
                .as_str()
                .unwrap()
                .contains("com.acme.Widget, com.other.Widget")
        );
    }

    #[test]
    fn internal_wraps_anyhow() {
        let err: ProbeError = anyhow::anyhow!("disk gone").into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.to_string(), "disk gone");
    }
}
