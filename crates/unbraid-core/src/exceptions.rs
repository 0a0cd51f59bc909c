//! Exception handler metadata.
//!
//! Filled in by the frontend alongside the CFG. The region builder only
//! reads this to scope handler regions and to keep loop bodies from
//! swallowing handler blocks.

use crate::BlockId;

/// Identifier of an exception handler within a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HandlerId(pub u32);

impl HandlerId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a try/catch group within a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TryId(pub u32);

impl TryId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single exception handler.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExcHandler {
    /// First block of the handler body. `None` for malformed input; the
    /// builder logs and skips such handlers.
    pub handler_block: Option<BlockId>,
    /// All blocks belonging to the handler body.
    pub blocks: Vec<BlockId>,
    /// The block immediately preceding divergence into the handler path.
    /// Used as the dominator for `finally` handlers.
    pub splitter: Option<BlockId>,
    /// True for `finally` handlers.
    pub is_finally: bool,
    /// Owning try/catch group.
    pub try_id: TryId,
}

impl ExcHandler {
    pub fn new(try_id: TryId, handler_block: Option<BlockId>) -> Self {
        Self {
            handler_block,
            blocks: Vec::new(),
            splitter: None,
            is_finally: false,
            try_id,
        }
    }
}

/// A try block with its attached handlers.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TryCatch {
    pub handlers: Vec<HandlerId>,
}
