//! Pipeline-specific error types.

use crate::pipeline::id::ItemId;
use thiserror::Error;

/// Errors that can occur within the item graph.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A typed view was requested over a stream object carrying another type.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A subscriber tried to publish on the output that is currently notifying it.
    #[error("Reentrant publish on output '{output}'")]
    ReentrantPublish { output: String },

    #[error("Unknown item {0:?}")]
    UnknownItem(ItemId),

    #[error("Item graph is full ({0} items)")]
    GraphFull(usize),

    #[error("Unknown item type '{0}'")]
    UnknownItemType(String),

    #[error("Item {item:?} has no port named '{port}'")]
    UnknownPort { item: ItemId, port: String },

    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParam(String),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("Failed to spawn item thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display() {
        let err = PipelineError::TypeMismatch {
            expected: "Image",
            found: "Sparse<Point>",
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch: expected Image, found Sparse<Point>"
        );
    }

    #[test]
    fn test_unknown_port_display() {
        let err = PipelineError::UnknownPort {
            item: ItemId(3),
            port: "in".into(),
        };
        assert!(err.to_string().contains("ItemId(3)"));
        assert!(err.to_string().contains("'in'"));
    }
}
