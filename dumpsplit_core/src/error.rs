use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised before any job runs: bad filenames, bad file specs, missing
    /// last page, unusable sizes or directories.
    #[error("planning error: {0}")]
    Planning(String),

    #[error("format error: {0}")]
    Format(String),

    /// An external helper could not be started or produced unusable output.
    #[error("tool {tool:?} failed: {message}")]
    Tool { tool: PathBuf, message: String },
}

impl DumpError {
    pub fn planning(msg: impl Into<String>) -> Self {
        DumpError::Planning(msg.into())
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, DumpError>;
