//! Error types for region building.

use thiserror::Error;
use unbraid_core::BlockId;

/// Fatal region-building errors.
///
/// Everything else recovers locally: recognition failures fall back to plain
/// sequences, malformed handler metadata is logged and skipped.
#[derive(Error, Debug)]
pub enum StructureError {
    /// The region count exceeded `blocks * 100`; the method CFG is likely
    /// malformed. Callers should fall back to raw-CFG emission.
    #[error("regions count limit reached ({limit})")]
    RegionsOverflow { limit: usize },

    /// Region scope nesting exceeded the stack limit.
    #[error("regions stack size limit reached")]
    StackOverflow,

    /// A loop exit block had no matching exit edge. Does not happen for
    /// well-formed loop metadata.
    #[error("no exit edge found for loop exit block {block}")]
    MissingLoopExit { block: BlockId },
}
