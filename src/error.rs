//! Error types for the drydock front end

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid value for {field}: {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },

    #[error("state file {} belongs to stack '{found}', not '{expected}'", path.display())]
    StackMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
