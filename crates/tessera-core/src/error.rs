//! Error types for core data validation.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// An index refers past the end of the vertex array
    #[error("Index {index} at position {position} is out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        index: u32,
        position: usize,
        vertex_count: usize,
    },

    /// Mesh has no vertices
    #[error("Mesh has no vertices")]
    EmptyMesh,

    /// Index count is not a whole number of triangles
    #[error("Index count {0} is not a multiple of 3")]
    IncompleteTriangle(usize),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
