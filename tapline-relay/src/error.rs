use thiserror::Error;

/// Failure raised by a hook implementation. Hook authors produce these;
/// the pump treats them as fatal to the loop, `send` callers receive them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay hook error: {0}")]
    Hook(#[from] HookError),
    #[error("relay IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("relay pump is not running")]
    NotRunning,
    #[error("relay task error: {0}")]
    Task(String),
}
