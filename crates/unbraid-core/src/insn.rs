//! Instruction representation.
//!
//! The region builder only inspects the *kind* of an instruction (branch,
//! switch, monitor, return) and a small argument payload, so instructions
//! are modeled as a tagged kind plus flags rather than full operand lists.

use bitflags::bitflags;

use crate::{BlockId, LoopId};

/// An instruction argument.
///
/// Only what block structuring needs: lock arguments for monitor pairing
/// and return values for equal-return-block detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Arg {
    /// A register.
    Reg(u16),
    /// An integer literal.
    Lit(i64),
}

bitflags! {
    /// Mutable per-instruction flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct InsnFlags: u8 {
        /// Instruction must not produce output code.
        const DONT_GENERATE = 1 << 0;
        /// Instruction is scheduled for removal.
        const REMOVE = 1 << 1;
    }
}

/// Instruction kind. The last instruction of a block decides its branch
/// shape; everything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InsnKind {
    /// Conditional branch with explicit targets.
    If {
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Multi-way branch.
    Switch {
        /// Case keys, parallel to `targets`.
        keys: Vec<i64>,
        /// Case target blocks, parallel to `keys`.
        targets: Vec<BlockId>,
        /// Default target block.
        default_target: Option<BlockId>,
    },
    /// Lock acquire on `arg`.
    MonitorEnter { arg: Arg },
    /// Lock release on `arg`.
    MonitorExit { arg: Arg },
    /// Method return.
    Return { arg: Option<Arg> },
    /// Exception throw.
    Throw,
    /// Synthesized loop break. Carries the loop it exits and an optional
    /// label loop when the break must name an outer loop.
    Break {
        loop_id: LoopId,
        label: Option<LoopId>,
    },
    /// Synthesized loop continue.
    Continue,
    /// Straight-line instruction with no control-flow meaning.
    Other,
}

/// A single instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Insn {
    pub kind: InsnKind,
    pub flags: InsnFlags,
    /// Arguments consumed by this instruction. Cleared when the
    /// instruction is unbound.
    pub args: Vec<Arg>,
}

impl Insn {
    /// Creates an instruction of the given kind with no arguments.
    pub fn new(kind: InsnKind) -> Self {
        Self {
            kind,
            flags: InsnFlags::empty(),
            args: Vec::new(),
        }
    }

    /// A plain straight-line instruction.
    pub fn other() -> Self {
        Self::new(InsnKind::Other)
    }

    /// A conditional branch.
    pub fn if_(then_block: BlockId, else_block: BlockId) -> Self {
        Self::new(InsnKind::If {
            then_block,
            else_block,
        })
    }

    /// A multi-way branch.
    pub fn switch(cases: Vec<(i64, BlockId)>, default_target: Option<BlockId>) -> Self {
        let (keys, targets) = cases.into_iter().unzip();
        Self::new(InsnKind::Switch {
            keys,
            targets,
            default_target,
        })
    }

    /// A lock acquire.
    pub fn monitor_enter(arg: Arg) -> Self {
        let mut insn = Self::new(InsnKind::MonitorEnter { arg });
        insn.args.push(arg);
        insn
    }

    /// A lock release.
    pub fn monitor_exit(arg: Arg) -> Self {
        let mut insn = Self::new(InsnKind::MonitorExit { arg });
        insn.args.push(arg);
        insn
    }

    /// A method return.
    pub fn ret(arg: Option<Arg>) -> Self {
        let mut insn = Self::new(InsnKind::Return { arg });
        if let Some(a) = arg {
            insn.args.push(a);
        }
        insn
    }

    /// A synthesized break out of `loop_id`.
    pub fn break_(loop_id: LoopId) -> Self {
        Self::new(InsnKind::Break {
            loop_id,
            label: None,
        })
    }

    /// A synthesized continue.
    pub fn continue_() -> Self {
        Self::new(InsnKind::Continue)
    }

    /// Returns true if this instruction has the given kind discriminant.
    pub fn is_kind(&self, kind: InsnKindTag) -> bool {
        InsnKindTag::of(&self.kind) == kind
    }
}

/// Discriminant-only view of [`InsnKind`], used for last-instruction checks
/// without matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnKindTag {
    If,
    Switch,
    MonitorEnter,
    MonitorExit,
    Return,
    Throw,
    Break,
    Continue,
    Other,
}

impl InsnKindTag {
    /// Returns the tag of an instruction kind.
    pub fn of(kind: &InsnKind) -> Self {
        match kind {
            InsnKind::If { .. } => Self::If,
            InsnKind::Switch { .. } => Self::Switch,
            InsnKind::MonitorEnter { .. } => Self::MonitorEnter,
            InsnKind::MonitorExit { .. } => Self::MonitorExit,
            InsnKind::Return { .. } => Self::Return,
            InsnKind::Throw => Self::Throw,
            InsnKind::Break { .. } => Self::Break,
            InsnKind::Continue => Self::Continue,
            InsnKind::Other => Self::Other,
        }
    }
}
