//! Switch error types.

/// Errors surfaced by the switch.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    /// An environment variable held a value that does not parse.
    #[error("invalid value for `{var}`: {reason}")]
    InvalidConfig { var: &'static str, reason: String },

    /// Binding or accepting on a listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the switch crate.
pub type Result<T> = std::result::Result<T, SwitchError>;
