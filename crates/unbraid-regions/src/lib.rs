//! # unbraid-regions
//!
//! Reconstructs structured control flow (loops, conditionals, switches,
//! synchronized sections, try/catch) from the unstructured basic-block
//! graph of a decompiled method.
//!
//! The input is a prepared [`unbraid_core::MethodCfg`]; the output is a
//! tree of nested [`Region`]s suitable for emitting high-level source
//! code, plus side effects on the CFG: block flags, synthesized
//! `break`/`continue` edge instructions and suppressed monitor exits.
//!
//! ```
//! use unbraid_core::{Insn, MethodCfg};
//! use unbraid_regions::Structurer;
//!
//! // if (b0) { b1 } else { b2 }; b3
//! let mut cfg = MethodCfg::new();
//! let b0 = cfg.add_block();
//! let b1 = cfg.add_block();
//! let b2 = cfg.add_block();
//! let b3 = cfg.add_block();
//! cfg.block_mut(b0).push(Insn::if_(b1, b2));
//! cfg.block_mut(b1).push(Insn::other());
//! cfg.block_mut(b2).push(Insn::other());
//! cfg.add_edge(b0, b1);
//! cfg.add_edge(b0, b2);
//! cfg.add_edge(b1, b3);
//! cfg.add_edge(b2, b3);
//! cfg.prepare().unwrap();
//!
//! let structured = Structurer::structure(&mut cfg).unwrap();
//! assert!(structured.region.contains_block(b1));
//! ```

pub mod condition;
mod error;
mod exc_handlers;
mod ifs;
mod loops;
pub mod region;
pub mod region_stack;
pub mod structurer;
mod switches;
mod sync;

pub use condition::{IfCondition, IfInfo};
pub use error::StructureError;
pub use region::{
    HandlerRegion, IfRegion, LoopRegion, Region, RegionNode, StructuredMethod, SwitchCase,
    SwitchRegion, SyncRegion,
};
pub use region_stack::RegionStack;
pub use structurer::Structurer;
