//! Basic block representation.

use bitflags::bitflags;

use crate::{Insn, InsnKind, LoopId};

/// Unique identifier for a basic block within a method.
///
/// Ids are dense: a method with `n` blocks uses ids `0..n`, which lets the
/// CFG keep every per-block table as a plain vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockId(pub u32);

impl BlockId {
    /// The entry block id (always 0).
    pub const ENTRY: Self = Self(0);

    /// Creates a new basic block id.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the id as a table index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

bitflags! {
    /// Mutable per-block flags.
    ///
    /// `LOOP_START`, `SYNTHETIC`, `RETURN`, `CATCH_BLOCK` and `EXC_HANDLER`
    /// describe the input CFG and are set by [`MethodCfg::prepare`] or by the
    /// frontend. The remaining flags are side effects of region building.
    ///
    /// [`MethodCfg::prepare`]: crate::MethodCfg::prepare
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BlockFlags: u16 {
        /// Header of at least one natural loop.
        const LOOP_START = 1 << 0;
        /// Trampoline block inserted by an earlier pass, no original code.
        const SYNTHETIC = 1 << 1;
        /// Block ends the method (return instruction).
        const RETURN = 1 << 2;
        /// Block was consumed into a region (merged condition headers etc).
        const ADDED_TO_REGION = 1 << 3;
        /// Block must not produce output code.
        const DONT_GENERATE = 1 << 4;
        /// Block is scheduled for removal.
        const REMOVE = 1 << 5;
        /// Switch case entered by falling through from the previous case.
        const FALL_THROUGH = 1 << 6;
        /// Block lies inside a try range (has exception edges).
        const CATCH_BLOCK = 1 << 7;
        /// Block belongs to an exception handler.
        const EXC_HANDLER = 1 << 8;
    }
}

/// A basic block: a maximal straight-line instruction sequence with one
/// entry and one exit.
///
/// Edges live in the owning [`MethodCfg`](crate::MethodCfg); the block only
/// carries its instructions and flags. The kind of the last instruction
/// determines how the block branches.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BasicBlock {
    /// Instructions in execution order.
    pub instructions: Vec<Insn>,
    /// Mutable flag set.
    pub flags: BlockFlags,
    /// Label attached to a loop header when a labelled `break` targets it.
    pub loop_label: Option<LoopId>,
}

impl BasicBlock {
    /// Creates a new empty basic block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction.
    pub fn push(&mut self, insn: Insn) {
        self.instructions.push(insn);
    }

    /// Returns true if this block has no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the last instruction, if any.
    pub fn last_insn(&self) -> Option<&Insn> {
        self.instructions.last()
    }

    /// Returns the kind of the last instruction, if any.
    pub fn last_insn_kind(&self) -> Option<&InsnKind> {
        self.instructions.last().map(|i| &i.kind)
    }

    /// Returns true if the block contains all given flags.
    pub fn contains(&self, flags: BlockFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Sets the given flags.
    pub fn add_flag(&mut self, flags: BlockFlags) {
        self.flags.insert(flags);
    }

    /// Clears the given flags.
    pub fn remove_flag(&mut self, flags: BlockFlags) {
        self.flags.remove(flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Arg;

    #[test]
    fn test_block_id_display() {
        assert_eq!(BlockId::new(7).to_string(), "bb7");
        assert_eq!(BlockId::ENTRY.to_string(), "bb0");
    }

    #[test]
    fn test_flags_add_remove() {
        let mut block = BasicBlock::new();
        assert!(!block.contains(BlockFlags::LOOP_START));

        block.add_flag(BlockFlags::LOOP_START | BlockFlags::SYNTHETIC);
        assert!(block.contains(BlockFlags::LOOP_START));
        assert!(block.contains(BlockFlags::SYNTHETIC));

        block.remove_flag(BlockFlags::SYNTHETIC);
        assert!(block.contains(BlockFlags::LOOP_START));
        assert!(!block.contains(BlockFlags::SYNTHETIC));
    }

    #[test]
    fn test_last_insn_kind() {
        let mut block = BasicBlock::new();
        assert!(block.last_insn_kind().is_none());

        block.push(Insn::other());
        block.push(Insn::ret(Some(Arg::Reg(0))));
        assert!(matches!(
            block.last_insn_kind(),
            Some(InsnKind::Return { .. })
        ));
    }
}
