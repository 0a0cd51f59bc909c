//! # unbraid-core
//!
//! Method-level IR for the unbraid decompiler backend. This crate defines
//! the basic block and instruction model, the per-method control flow graph
//! with its dominator, dominance-frontier and natural-loop analyses, the
//! exception-handler metadata, and the edge-instruction table that the
//! region builder mutates.

pub mod block;
pub mod cfg;
pub mod error;
pub mod exceptions;
pub mod insn;
pub mod loops;

pub use block::{BasicBlock, BlockFlags, BlockId};
pub use cfg::{BlockSet, EdgeInsn, MethodCfg, MethodFlags};
pub use error::Error;
pub use exceptions::{ExcHandler, HandlerId, TryCatch, TryId};
pub use insn::{Arg, Insn, InsnFlags, InsnKind, InsnKindTag};
pub use loops::{Edge, LoopId, NaturalLoop};
