use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Duplicate construct name '{name}' under '{parent}'")]
    DuplicateName { parent: String, name: String },

    #[error("Invalid construct name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Cannot place '{path}': {reason}")]
    InvalidPlacement { path: String, reason: String },

    #[error("Unit '{0}' is already defined")]
    DuplicateUnit(String),

    #[error("Unit not found: {0}")]
    UnknownUnit(String),

    #[error("Node not found: {0}")]
    UnknownNode(String),

    #[error("Node '{0}' is not a unit")]
    NotAUnit(String),

    #[error("Node '{0}' is not a resource")]
    NotAResource(String),

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Invalid payload at '{path}': {message}")]
    InvalidPayload { path: String, message: String },
}

impl CoreError {
    /// The cycle carried by a [`CoreError::CyclicDependency`], if any
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            CoreError::CyclicDependency { cycle } => Some(cycle),
            _ => None,
        }
    }
}
