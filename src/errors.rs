// Error taxonomy and user-facing messages
//
// Library code returns `MatrixError`; the binary wraps it in anyhow and maps
// it back to an exit-code class so automation can branch on status alone.
//
// Localization: suggestion labels follow the LANG environment variable
// (English default, with es/fr/de labels).

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, MatrixError>;

/// Exit-code class for a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Anything not covered below (I/O, corrupt state files)
    General,
    /// The caller asked for something malformed or ambiguous
    Usage,
    /// A server, hub or endpoint could not be reached
    Connectivity,
    /// The alias is in the wrong runtime state for the request
    Conflict,
}

impl ExitClass {
    pub fn code(self) -> i32 {
        match self {
            ExitClass::General => 1,
            ExitClass::Usage => 2,
            ExitClass::Connectivity => 3,
            ExitClass::Conflict => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("alias '{alias}' is already running (pid {pid})")]
    AlreadyRunning { alias: String, pid: u32 },

    #[error("alias '{alias}' is not running")]
    NotRunning { alias: String },

    #[error("alias '{alias}' did not become ready within {}s", .waited.as_secs())]
    StartupTimeout { alias: String, waited: Duration },

    #[error("alias '{alias}' exited during startup ({status})")]
    ProcessExited { alias: String, status: String },

    #[error("startup of alias '{alias}' was interrupted")]
    Interrupted { alias: String },

    #[error("session with {url} was interrupted")]
    CallInterrupted { url: String },

    #[error("{}", unreachable_message(.first_url, .fallback_url.as_deref(), .reason))]
    TransportUnreachable {
        first_url: String,
        fallback_url: Option<String>,
        reason: String,
    },

    #[error("tool '{tool}' at {url} did not answer within {}s", .timeout.as_secs())]
    CallTimeout {
        tool: String,
        url: String,
        timeout: Duration,
    },

    #[error("tool '{tool}' failed: {message}")]
    ToolCallFailed { tool: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown tool '{tool}'; available tools: {}", .available.join(", "))]
    UnknownTool { tool: String, available: Vec<String> },

    #[error(
        "could not infer arguments ({strategy}): {detail}; pass a full JSON payload with --args instead"
    )]
    AmbiguousInput { strategy: String, detail: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid alias '{0}': use letters, digits, '.', '-' or '_'")]
    InvalidAlias(String),

    #[error("alias '{0}' is not installed")]
    UnknownAlias(String),

    #[error("invalid runner descriptor at {path}: {reason}")]
    InvalidDescriptor { path: String, reason: String },

    #[error("hub unreachable: {primary} and fallback {fallback} both failed")]
    HubUnreachable { primary: String, fallback: String },

    #[error("'{specifier}' not found on {hub}")]
    NotFound { specifier: String, hub: String },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn unreachable_message(first: &str, fallback: Option<&str>, reason: &str) -> String {
    match fallback {
        Some(second) => format!("could not reach {first} nor {second}: {reason}"),
        None => format!("could not reach {first}: {reason}"),
    }
}

impl MatrixError {
    /// Which exit-code class this error belongs to
    pub fn exit_class(&self) -> ExitClass {
        match self {
            MatrixError::AmbiguousInput { .. }
            | MatrixError::InvalidArguments(_)
            | MatrixError::InvalidAlias(_)
            | MatrixError::UnknownAlias(_)
            | MatrixError::UnknownTool { .. }
            | MatrixError::InvalidDescriptor { .. }
            | MatrixError::NotFound { .. } => ExitClass::Usage,
            MatrixError::TransportUnreachable { .. }
            | MatrixError::CallTimeout { .. }
            | MatrixError::HubUnreachable { .. }
            | MatrixError::StartupTimeout { .. }
            | MatrixError::ProcessExited { .. } => ExitClass::Connectivity,
            MatrixError::AlreadyRunning { .. } | MatrixError::NotRunning { .. } => {
                ExitClass::Conflict
            }
            _ => ExitClass::General,
        }
    }

    /// Follow-up hint shown under the error by the CLI
    pub fn suggestion(&self) -> Option<String> {
        match self {
            MatrixError::AlreadyRunning { alias, .. } => {
                Some(format!("Stop it first: matrix stop {alias}"))
            }
            MatrixError::NotRunning { alias } => Some(format!("Start it with: matrix run {alias}")),
            MatrixError::StartupTimeout { alias, .. } | MatrixError::ProcessExited { alias, .. } => {
                Some(format!("Check the server log: matrix logs {alias}"))
            }
            MatrixError::UnknownTool { available, .. } if !available.is_empty() => Some(format!(
                "Did you mean one of: {}?",
                available.join(", ")
            )),
            MatrixError::AmbiguousInput { .. } => {
                Some("matrix call <tool> --args '{\"field\": \"value\"}'".to_string())
            }
            MatrixError::TransportUnreachable { .. } => {
                Some("Check that the server is up: matrix ps / matrix doctor <alias>".to_string())
            }
            MatrixError::HubUnreachable { .. } => {
                Some("Set MATRIX_HUB_BASE to a reachable hub".to_string())
            }
            _ => None,
        }
    }
}

/// Get the current locale from environment
fn get_locale() -> &'static str {
    if let Ok(lang) = std::env::var("LANG") {
        if lang.starts_with("es") {
            return "es";
        } else if lang.starts_with("fr") {
            return "fr";
        } else if lang.starts_with("de") {
            return "de";
        }
    }
    "en"
}

/// Localized label
fn t(key: &str) -> &'static str {
    match (get_locale(), key) {
        ("es", "suggestion") => "Sugerencia",
        ("fr", "suggestion") => "Suggestion",
        ("de", "suggestion") => "Vorschlag",
        (_, "suggestion") => "Suggestion",
        _ => "",
    }
}

/// Wrap a generic error with suggestions
pub fn wrap_error_with_suggestion(error: impl fmt::Display, suggestion: &str) -> String {
    format!(
        "{}\n\n\
        \x1b[1;33m{}:\x1b[0m {}",
        error,
        t("suggestion"),
        suggestion
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_classes_are_distinct() {
        let usage = MatrixError::InvalidAlias("../x".into()).exit_class();
        let conn = MatrixError::HubUnreachable {
            primary: "a".into(),
            fallback: "b".into(),
        }
        .exit_class();
        let conflict = MatrixError::AlreadyRunning {
            alias: "x".into(),
            pid: 1,
        }
        .exit_class();

        assert_eq!(usage.code(), 2);
        assert_eq!(conn.code(), 3);
        assert_eq!(conflict.code(), 4);
    }

    #[test]
    fn test_transport_error_names_both_urls() {
        let err = MatrixError::TransportUnreachable {
            first_url: "http://h:1/messages/".into(),
            fallback_url: Some("http://h:1/sse/".into()),
            reason: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/messages/"));
        assert!(msg.contains("/sse/"));
    }

    #[test]
    fn test_unknown_tool_lists_everything() {
        let err = MatrixError::UnknownTool {
            tool: "chta".into(),
            available: vec!["chat".into(), "search".into()],
        };
        assert!(err.to_string().contains("chat, search"));
        assert!(err.suggestion().unwrap().contains("chat"));
    }

    #[test]
    fn test_ambiguous_input_points_to_args() {
        let err = MatrixError::AmbiguousInput {
            strategy: "text".into(),
            detail: "2 string fields".into(),
        };
        assert!(err.to_string().contains("--args"));
        assert_eq!(err.exit_class(), ExitClass::Usage);
    }

    #[test]
    fn test_wrap_error_with_suggestion() {
        let msg = wrap_error_with_suggestion("boom", "try again");
        assert!(msg.contains("boom"));
        assert!(msg.contains("try again"));
    }
}
