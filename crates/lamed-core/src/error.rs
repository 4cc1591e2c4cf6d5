//! Lamed error types.

use thiserror::Error;

/// Errors surfaced at crate seams. Most of them are logged and swallowed
/// by the unit of work that produced them.
#[derive(Debug, Error)]
pub enum LamedError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Delivery error: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, LamedError>;
