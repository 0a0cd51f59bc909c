//! Synchronized section recognition.
//!
//! A `monitor-enter` is matched with every reaching `monitor-exit` on the
//! same lock argument. The exits are suppressed from output (the region
//! emits the lock release itself) and the section body runs up to the
//! common block behind all exits.

use unbraid_core::{Arg, BlockFlags, BlockId, BlockSet, InsnFlags, InsnKind, MethodCfg};

use crate::region::{Region, RegionNode, SyncRegion};
use crate::region_stack::RegionStack;
use crate::structurer::Structurer;
use crate::StructureError;

impl Structurer<'_> {
    pub(crate) fn process_monitor_enter(
        &mut self,
        region: &mut Region,
        block: BlockId,
        stack: &mut RegionStack,
    ) -> Result<Option<BlockId>, StructureError> {
        let arg = match self.cfg.block(block).last_insn_kind() {
            Some(InsnKind::MonitorEnter { arg }) => *arg,
            _ => return Ok(None),
        };
        let mut sync_region = SyncRegion {
            enter_block: block,
            arg,
            exit_insns: Vec::new(),
            body: Region::new(),
        };

        let mut exits = BlockSet::new();
        let mut visited = BlockSet::new();
        traverse_monitor_exits(self.cfg, &mut sync_region, arg, block, &mut exits, &mut visited);

        for &(exit_block, insn_index) in &sync_region.exit_insns {
            self.cfg
                .block_mut(exit_block)
                .add_flag(BlockFlags::DONT_GENERATE);
            self.cfg.block_mut(exit_block).instructions[insn_index]
                .flags
                .insert(InsnFlags::DONT_GENERATE | InsnFlags::REMOVE);
            self.cfg.unbind_insn(exit_block, insn_index);
        }

        let Some(body_start) = self.cfg.next_block(block) else {
            self.cfg.add_warn("unexpected end of synchronized block");
            region.add(RegionNode::Sync(Box::new(sync_region)));
            return Ok(None);
        };

        let mut exit = None;
        if exits.len() == 1 {
            if let Some(&only) = exits.first() {
                exit = self.cfg.next_block(only);
            }
        } else if exits.len() > 1 {
            let mut visited = BlockSet::new();
            exit = traverse_monitor_exits_cross(self.cfg, body_start, &exits, &mut visited);
        }

        stack.push()?;
        match exit {
            Some(e) => stack.add_exit(e),
            None => {
                for &exit_block in &exits {
                    // skip exits whose path runs straight into a method end
                    let path = self.cfg.build_simple_path(exit_block);
                    match path.last() {
                        Some(&last) if self.cfg.successors(last).is_empty() => {}
                        _ => stack.add_exit(exit_block),
                    }
                }
            }
        }
        sync_region.body = self.make_region(Some(body_start), stack)?;
        stack.pop();
        region.add(RegionNode::Sync(Box::new(sync_region)));
        Ok(exit)
    }
}

/// DFS from the monitor-enter block collecting every block holding a
/// `monitor-exit` on the same argument. Descent stops at each exit.
fn traverse_monitor_exits(
    cfg: &MethodCfg,
    region: &mut SyncRegion,
    arg: Arg,
    block: BlockId,
    exits: &mut BlockSet,
    visited: &mut BlockSet,
) {
    visited.insert(block);
    for (index, insn) in cfg.block(block).instructions.iter().enumerate() {
        if let InsnKind::MonitorExit { arg: exit_arg } = insn.kind {
            if exit_arg == arg {
                exits.insert(block);
                region.exit_insns.push((block, index));
                return;
            }
        }
    }
    for &succ in cfg.successors(block) {
        if !visited.contains(&succ) {
            traverse_monitor_exits(cfg, region, arg, succ, exits, visited);
        }
    }
}

/// DFS forward searching the first block reachable from every exit: the
/// point where all exit paths cross.
fn traverse_monitor_exits_cross(
    cfg: &MethodCfg,
    block: BlockId,
    exits: &BlockSet,
    visited: &mut BlockSet,
) -> Option<BlockId> {
    visited.insert(block);
    for &succ in cfg.clean_successors(block) {
        let cross = exits.iter().all(|&exit| cfg.is_path_exists(exit, succ));
        if cross {
            return Some(succ);
        }
        if !visited.contains(&succ) {
            if let Some(found) = traverse_monitor_exits_cross(cfg, succ, exits, visited) {
                return Some(found);
            }
        }
    }
    None
}
