//! Server error types.

use std::path::PathBuf;

/// Errors surfaced by the skill server's subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("skill not found: `{0}`")]
    SkillNotFound(String),

    #[error("invalid SKILL.md at `{path}`: {reason}")]
    InvalidSkill { path: PathBuf, reason: String },

    #[error("failed to load instructions for skill `{skill}`: {reason}")]
    DetailsUnavailable { skill: String, reason: String },

    #[error("failed to spawn skill process `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bus error: {0}")]
    Bus(#[from] skillscale_bus::BusError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the server crate.
pub type Result<T> = std::result::Result<T, ServerError>;
