//! Error types for progression-gate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown cohort: {0}")]
    UnknownCohort(u32),

    #[error("Identifiers not on the roster of cohort {cohort}: {identifiers:?}")]
    NotInRoster { cohort: u32, identifiers: Vec<String> },

    #[error("At least one identifier must be selected to activate cohort {0}")]
    EmptySelection(u32),

    #[error("Identifier already bound to learner {learner_id}")]
    IdentifierAlreadyBound { learner_id: String },

    #[error("Cohort {0} is not activated")]
    CohortNotActivated(u32),

    #[error("Lesson {0} cannot be attempted")]
    LessonNotEnterable(String),

    #[error("Signup not permitted: {0}")]
    SignupNotPermitted(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for GateError {
    fn from(e: rusqlite::Error) -> Self {
        GateError::Database(e.to_string())
    }
}
