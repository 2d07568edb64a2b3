use super::action::ActionSpaceKind;

pub type NeatResult<T> = Result<T, NeatError>;

#[derive(Debug, thiserror::Error)]
pub enum NeatError {
    #[error("Action space mismatch: requested {requested:?} actions from a {actual:?} genome")]
    ActionSpaceMismatch {
        requested: ActionSpaceKind,
        actual: ActionSpaceKind,
    },

    #[error("Input length mismatch: expected {expected}, got {actual}")]
    InputLengthMismatch { expected: usize, actual: usize },

    #[error("No organism with index {0}")]
    UnknownOrganism(usize),

    #[error("Invalid action space: {0}")]
    InvalidActionSpace(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Could not read settings: {0}")]
    SettingsIo(#[from] std::io::Error),

    #[error("Could not parse settings: {0}")]
    SettingsFormat(#[from] serde_json::Error),
}
