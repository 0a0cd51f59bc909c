//! Region builder.
//!
//! Walks the prepared method CFG from the entry block and folds it into a
//! tree of structured regions. Dispatch is driven by block role (loop
//! header) and by the kind of each block's last instruction; each
//! recognizer builds its sub-regions through recursive calls to
//! [`Structurer::make_region`] bounded by the [`RegionStack`] exit sets.

use unbraid_core::{BlockFlags, BlockId, InsnKind, InsnKindTag, MethodCfg};

use crate::region::{Region, StructuredMethod};
use crate::region_stack::RegionStack;
use crate::StructureError;

/// Upper bound on created regions, per block: a malformed graph that keeps
/// producing regions is cut off instead of looping forever.
const REGIONS_PER_BLOCK_LIMIT: usize = 100;

/// Builds the region tree of one method.
///
/// One instance structures one method once; re-entry on already processed
/// blocks is refused with a warning.
pub struct Structurer<'m> {
    pub(crate) cfg: &'m mut MethodCfg,
    /// Blocks already used as a region start.
    pub(crate) processed: Vec<bool>,
    regions_count: usize,
    regions_limit: usize,
}

impl<'m> Structurer<'m> {
    pub fn new(cfg: &'m mut MethodCfg) -> Self {
        let blocks_count = cfg.blocks_count();
        Self {
            cfg,
            processed: vec![false; blocks_count],
            regions_count: 0,
            regions_limit: blocks_count * REGIONS_PER_BLOCK_LIMIT,
        }
    }

    /// Structures the whole method: the root region from the entry block,
    /// then the exception handler regions.
    pub fn structure(cfg: &'m mut MethodCfg) -> Result<StructuredMethod, StructureError> {
        let mut builder = Structurer::new(cfg);
        let mut stack = RegionStack::new();
        let entry = builder.cfg.entry();
        let region = builder.make_region(Some(entry), &mut stack)?;
        let (handlers, exc_out) = if builder.cfg.handlers_count() != 0 {
            builder.process_try_catch_blocks(&region)?
        } else {
            (Vec::new(), None)
        };
        Ok(StructuredMethod {
            region,
            handlers,
            exc_out,
        })
    }

    /// Builds a sequential region starting at `start`, traversing until a
    /// stack exit or the end of the graph.
    pub(crate) fn make_region(
        &mut self,
        start: Option<BlockId>,
        stack: &mut RegionStack,
    ) -> Result<Region, StructureError> {
        let mut region = Region::new();
        let Some(start) = start else {
            return Ok(region);
        };
        if self.processed[start.index()] {
            self.cfg
                .add_warn(format!("removed duplicated region for block: {start}"));
            return Ok(region);
        }
        self.processed[start.index()] = true;

        let mut next = Some(start);
        while let Some(block) = next {
            next = self.traverse(&mut region, block, stack)?;
            self.regions_count += 1;
            if self.regions_count > self.regions_limit {
                return Err(StructureError::RegionsOverflow {
                    limit: self.regions_limit,
                });
            }
        }
        Ok(region)
    }

    /// Handles one block: dispatches to a recognizer or appends it as a
    /// plain sub-block, and returns the continuation block unless it is an
    /// exit of the current scope.
    fn traverse(
        &mut self,
        region: &mut Region,
        block: BlockId,
        stack: &mut RegionStack,
    ) -> Result<Option<BlockId>, StructureError> {
        let mut next = None;
        let mut processed = false;

        let loop_attrs = self.cfg.loop_attrs(block).to_vec();
        if !loop_attrs.is_empty() && self.cfg.block(block).contains(BlockFlags::LOOP_START) {
            if loop_attrs.len() == 1 {
                next = self.process_loop(region, loop_attrs[0], stack)?;
                processed = true;
            } else {
                for loop_id in loop_attrs {
                    if self.cfg.loop_info(loop_id).start == block {
                        next = self.process_loop(region, loop_id, stack)?;
                        processed = true;
                        break;
                    }
                }
            }
        }

        if !processed {
            let last_kind = self.cfg.block(block).last_insn_kind().map(InsnKindTag::of);
            match last_kind {
                Some(InsnKindTag::If) => {
                    next = self.process_if(region, block, stack)?;
                    processed = true;
                }
                Some(InsnKindTag::Switch) => {
                    next = self.process_switch(region, block, stack)?;
                    processed = true;
                }
                Some(InsnKindTag::MonitorEnter) => {
                    next = self.process_monitor_enter(region, block, stack)?;
                    processed = true;
                }
                _ => {}
            }
        }
        if !processed {
            region.add_block(block);
            next = self.cfg.next_block(block);
        }
        match next {
            Some(n) if !stack.contains_exit(block) && !stack.contains_exit(n) => Ok(Some(n)),
            _ => Ok(None),
        }
    }
}

/// True if both blocks continue the same way: the same block, equal
/// single-return blocks, or synthetic paths converging on equal blocks.
pub(crate) fn is_equal_paths(cfg: &MethodCfg, b1: Option<BlockId>, b2: Option<BlockId>) -> bool {
    match (b1, b2) {
        (Some(b1), Some(b2)) => {
            b1 == b2 || is_equal_return_blocks(cfg, b1, b2) || is_synthetic_path(cfg, b1, b2)
        }
        (None, None) => true,
        _ => false,
    }
}

fn is_synthetic_path(cfg: &MethodCfg, b1: BlockId, b2: BlockId) -> bool {
    let n1 = cfg.skip_synthetic_successor(b1);
    let n2 = cfg.skip_synthetic_successor(b2);
    (n1 != b1 || n2 != b2) && is_equal_paths(cfg, Some(n1), Some(n2))
}

/// True if both blocks are single-instruction return blocks returning the
/// same value.
pub(crate) fn is_equal_return_blocks(cfg: &MethodCfg, b1: BlockId, b2: BlockId) -> bool {
    let block1 = cfg.block(b1);
    let block2 = cfg.block(b2);
    if !block1.contains(BlockFlags::RETURN) || !block2.contains(BlockFlags::RETURN) {
        return false;
    }
    if block1.instructions.len() != 1 || block2.instructions.len() != 1 {
        return false;
    }
    match (&block1.instructions[0].kind, &block2.instructions[0].kind) {
        (InsnKind::Return { arg: a1 }, InsnKind::Return { arg: a2 }) => a1 == a2,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unbraid_core::{Arg, Insn};

    #[test]
    fn test_equal_return_blocks() {
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        let b3 = cfg.add_block();
        cfg.block_mut(b1).push(Insn::ret(Some(Arg::Reg(0))));
        cfg.block_mut(b2).push(Insn::ret(Some(Arg::Reg(0))));
        cfg.block_mut(b3).push(Insn::ret(Some(Arg::Reg(1))));
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b2);
        cfg.add_edge(b0, b3);
        cfg.prepare().unwrap();

        assert!(is_equal_return_blocks(&cfg, b1, b2));
        assert!(!is_equal_return_blocks(&cfg, b1, b3));
        assert!(is_equal_paths(&cfg, Some(b1), Some(b2)));
        assert!(is_equal_paths(&cfg, None, None));
        assert!(!is_equal_paths(&cfg, Some(b1), None));
    }

    #[test]
    fn test_synthetic_path_equality() {
        // b1 (synthetic) -> b3, b2 -> b3: paths equal after skipping b1
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b3 = cfg.add_block();
        cfg.block_mut(b1).add_flag(BlockFlags::SYNTHETIC);
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b3);
        cfg.add_edge(b1, b3);
        cfg.prepare().unwrap();

        assert!(is_equal_paths(&cfg, Some(b1), Some(b3)));
    }
}
