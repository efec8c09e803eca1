#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Generic heap analysis error: {0}")]
    Generic(String),

    /// The heap source failed wholesale; per-item failures are skipped and
    /// never surface as this variant.
    #[error("Heap source error: {0}")]
    Source(String),

    /// Ingestion tripped the skip-ratio abort and the rest of the dump is
    /// considered unreliable.
    #[error("Corrupt dump: {0}")]
    CorruptDump(String),

    #[error("Object graph has {nodes} nodes, above the dominator cap of {cap}")]
    GraphTooLarge { nodes: usize, cap: usize },

    #[error("Dominator computation failed: {0}")]
    Dominators(String),

    #[error("Invalid type name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Map or interner inconsistency. Not recoverable.
    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

pub type HeapResult<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    pub fn source(msg: impl ToString) -> Self {
        Self::Source(msg.to_string())
    }
}
