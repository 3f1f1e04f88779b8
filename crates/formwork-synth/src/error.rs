//! Error types for synthesis and template inspection

use std::fmt;
use std::path::PathBuf;

use formwork_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(
        "Unresolved reference from '{node}' in unit '{from_unit}' to '{target}'{}: {reason}",
        .to_unit.as_ref().map(|u| format!(" in unit '{}'", u)).unwrap_or_default()
    )]
    UnresolvedReference {
        node: String,
        target: String,
        from_unit: String,
        to_unit: Option<String>,
        reason: String,
    },

    #[error("Invalid payload at {location}: {message}")]
    InvalidPayload {
        location: ErrorLocation,
        message: String,
    },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Assertion failed: {0}")]
    Assertion(String),
}

impl SynthError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SynthError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Location context for where an error occurred
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLocation {
    /// Unit name (e.g., "CognitoStack")
    pub unit: Option<String>,
    /// Construct path below the application root (e.g., "CognitoStack/UserPool")
    pub node: Option<String>,
}

impl ErrorLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn at_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Node paths already start with the unit name
        match (&self.unit, &self.node) {
            (_, Some(n)) => write!(f, "{}", n),
            (Some(u), None) => write!(f, "{}", u),
            (None, None) => write!(f, "<unknown location>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let loc = ErrorLocation::new().in_unit("Stack").at_node("Stack/Queue");
        assert_eq!(loc.to_string(), "Stack/Queue");
        assert_eq!(ErrorLocation::new().in_unit("Stack").to_string(), "Stack");
        assert_eq!(ErrorLocation::new().to_string(), "<unknown location>");
    }

    #[test]
    fn test_unresolved_reference_message_names_both_units() {
        let err = SynthError::UnresolvedReference {
            node: "Consumer/Function".to_string(),
            target: "Roles/TestRole".to_string(),
            from_unit: "Consumer".to_string(),
            to_unit: Some("Roles".to_string()),
            reason: "no dependency declared".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("'Consumer/Function'"));
        assert!(message.contains("unit 'Consumer'"));
        assert!(message.contains("in unit 'Roles'"));
    }
}
