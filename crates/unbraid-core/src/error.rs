//! Error types for unbraid-core.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The method has no basic blocks.
    #[error("method has no basic blocks")]
    NoBlocks,

    /// Invalid basic block reference.
    #[error("invalid basic block id: {0}")]
    InvalidBlockId(crate::BlockId),
}
