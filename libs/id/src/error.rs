//! Error types for identifier parsing and encoding.

use thiserror::Error;

/// Errors that can occur when building or parsing identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The identifier is not a non-negative integer.
    #[error("invalid ID '{0}': expected a non-negative integer")]
    NotANumber(String),

    /// A local instance id does not fit below the pool encoding base.
    #[error("local instance id {id} is out of range (must be below {base})")]
    LocalIdOutOfRange { id: u32, base: u32 },

    /// The encoded pool id would overflow.
    #[error("pool instance id overflow for node {node} and local id {local}")]
    Overflow { node: u32, local: u32 },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
