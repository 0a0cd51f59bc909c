//! If/else recognition.

use unbraid_core::{BlockFlags, BlockId, InsnKind, MethodCfg};

use crate::condition::{
    confirm_merge, invert_info, make_if_info, merge_nested_if_nodes, restructure_if, IfInfo,
};
use crate::region::{IfRegion, Region, RegionNode};
use crate::region_stack::RegionStack;
use crate::structurer::Structurer;
use crate::StructureError;

impl Structurer<'_> {
    pub(crate) fn process_if(
        &mut self,
        region: &mut Region,
        block: BlockId,
        stack: &mut RegionStack,
    ) -> Result<Option<BlockId>, StructureError> {
        if self.cfg.block(block).contains(BlockFlags::ADDED_TO_REGION) {
            // block already merged into another 'if' condition
            return Ok(if_then_target(self.cfg, block));
        }

        let Some(first) = make_if_info(self.cfg, block) else {
            return Ok(None);
        };
        let mut current = match merge_nested_if_nodes(self.cfg, first.clone()) {
            Some(merged) => merged,
            // compilers usually emit the inverted condition
            None => invert_info(first),
        };
        match restructure_if(self.cfg, block, current.clone()) {
            Some(modified) => current = modified,
            None => {
                if current.merged_blocks.len() <= 1 {
                    return Ok(None);
                }
                // a merged condition can fail restructuring where the plain
                // one succeeds, retry without inversion
                let Some(fresh) = make_if_info(self.cfg, block) else {
                    return Ok(None);
                };
                match restructure_if(self.cfg, block, fresh) {
                    Some(modified) => current = modified,
                    // all attempts failed
                    None => return Ok(None),
                }
            }
        }
        confirm_merge(self.cfg, &current);

        let mut if_region = IfRegion {
            condition: current.condition.clone(),
            condition_blocks: current.merged_blocks.clone(),
            then_region: Region::new(),
            else_region: None,
        };
        let out_block = current.out_block;
        stack.push()?;
        if let Some(out) = out_block {
            stack.add_exit(out);
        }

        if_region.then_region = self.make_region(Some(current.then_block), stack)?;
        match current.else_block {
            Some(else_block) if !stack.contains_exit(else_block) => {
                if_region.else_region = Some(self.make_region(Some(else_block), stack)?);
            }
            _ => {}
        }

        // edge instructions targeting the out block from this condition
        // must be emitted on the missing else branch
        if if_region.else_region.is_none() {
            if let Some(out) = out_block {
                let origins: Vec<BlockId> = self
                    .cfg
                    .edge_insns_ending_at(out)
                    .map(|e| e.start)
                    .collect();
                if !origins.is_empty() {
                    let mut else_region = Region::new();
                    for start in origins {
                        add_edge_insn_origin(self.cfg, &current, &mut else_region, start);
                    }
                    if_region.else_region = Some(else_region);
                }
            }
        }

        stack.pop();
        region.add(RegionNode::If(Box::new(if_region)));
        Ok(out_block)
    }
}

fn if_then_target(cfg: &MethodCfg, block: BlockId) -> Option<BlockId> {
    match cfg.block(block).last_insn_kind() {
        Some(InsnKind::If { then_block, .. }) => Some(*then_block),
        _ => None,
    }
}

fn add_edge_insn_origin(cfg: &MethodCfg, info: &IfInfo, region: &mut Region, start: BlockId) {
    if cfg.block(start).contains(BlockFlags::ADDED_TO_REGION) {
        return;
    }
    let from_this_if = info
        .merged_blocks
        .iter()
        .any(|&if_block| cfg.successors(if_block).contains(&start));
    if from_this_if {
        region.add_block(start);
    }
}
