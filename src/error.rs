//! Error handling for itemflow
//!
//! This module defines the crate-level error type and a Result alias used by
//! configuration and host code. Errors raised inside the item graph live in
//! [`crate::pipeline::error`] and convert into [`ItemFlowError`].

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for itemflow operations
#[derive(Error, Debug)]
pub enum ItemFlowError {
    /// Errors raised by the item graph
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ItemFlowError>,
    },
}

impl ItemFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ItemFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for ItemFlowError {
    fn from(err: serde_json::Error) -> Self {
        ItemFlowError::Serialization(err.to_string())
    }
}

/// Result type alias for itemflow operations
pub type Result<T> = std::result::Result<T, ItemFlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ItemFlowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ItemFlowError::from(e).with_context(f()))
    }
}
