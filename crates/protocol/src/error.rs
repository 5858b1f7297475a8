//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Command verb code not understood by the device node
    #[error("Unknown command code {0:#010x}")]
    UnknownCommand(u32),

    /// Probe selector other than inner/outer
    #[error("Unknown probe '{0}', expected 'i' (inner) or 'o' (outer)")]
    UnknownProbe(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
