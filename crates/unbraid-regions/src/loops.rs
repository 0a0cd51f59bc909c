//! Loop recognition.
//!
//! A loop header block is turned into a while / do-while / endless loop
//! region. The condition-bearing exit is picked from the loop's exit nodes;
//! secondary exits get synthesized `break` edge instructions, and synthetic
//! trampolines jumping to the loop end get `continue` instructions.

use unbraid_core::{
    BlockFlags, BlockId, Edge, Insn, InsnKind, InsnKindTag, LoopId, NaturalLoop,
};

use crate::condition::{confirm_merge, invert_info, make_if_info, search_nested_if};
use crate::region::{LoopRegion, Region, RegionNode};
use crate::region_stack::RegionStack;
use crate::structurer::{is_equal_paths, Structurer};
use crate::StructureError;

impl Structurer<'_> {
    pub(crate) fn process_loop(
        &mut self,
        region: &mut Region,
        loop_id: LoopId,
        stack: &mut RegionStack,
    ) -> Result<Option<BlockId>, StructureError> {
        let loop_info = self.cfg.loop_info(loop_id).clone();
        let loop_start = loop_info.start;

        // exit block scan order: earlier candidates are tried first as the
        // condition-bearing exit
        let mut exit_set = loop_info.exit_nodes.clone();
        let mut exit_blocks = Vec::with_capacity(exit_set.len());
        if let Some(next_start) = self.cfg.next_block(loop_start) {
            if exit_set.remove(&next_start) {
                exit_blocks.push(next_start);
            }
        }
        if exit_set.remove(&loop_start) {
            exit_blocks.push(loop_start);
        }
        if exit_set.remove(&loop_info.end) {
            exit_blocks.push(loop_info.end);
        }
        exit_blocks.extend(exit_set.iter().copied());

        let Some(mut loop_region) = self.make_loop_region(&loop_info, &exit_blocks)? else {
            let out = self.make_endless_loop(region, stack, &loop_info)?;
            self.insert_continue(&loop_info);
            return Ok(out);
        };
        stack.push()?;

        let header = loop_region
            .header
            .ok_or(StructureError::MissingLoopExit { block: loop_start })?;
        let mut cond_info = make_if_info(self.cfg, header)
            .ok_or(StructureError::MissingLoopExit { block: header })?;
        cond_info = search_nested_if(self.cfg, cond_info);
        confirm_merge(self.cfg, &cond_info);
        if !loop_info.contains(cond_info.then_block) {
            // invert loop condition if 'then' points to the exit
            cond_info = invert_info(cond_info);
        }
        loop_region.condition = Some(cond_info.condition.clone());
        exit_blocks.retain(|b| !cond_info.merged_blocks.contains(b));

        if !exit_blocks.is_empty() {
            if let Some(loop_exit) = cond_info.else_block {
                // synthesize 'break' before the sub-exit path rejoins the
                // main exit
                for &exit_edge in &loop_info.exit_edges {
                    if exit_blocks.contains(&exit_edge.source) {
                        self.insert_loop_break(stack, &loop_info, loop_exit, exit_edge)?;
                    }
                }
            }
        }

        let out;
        if loop_region.condition_at_end {
            let then_block = cond_info.then_block;
            out = if then_block == loop_start {
                cond_info.else_block
            } else {
                Some(then_block)
            };
            let attrs = self.cfg.detach_loop_attrs(loop_start);
            self.cfg
                .block_mut(loop_info.end)
                .add_flag(BlockFlags::ADDED_TO_REGION);
            stack.add_exit(loop_info.end);
            self.processed[loop_start.index()] = false;
            loop_region.body = self.make_region(Some(loop_start), stack)?;
            self.cfg.attach_loop_attrs(loop_start, attrs);
            self.cfg
                .block_mut(loop_info.end)
                .remove_flag(BlockFlags::ADDED_TO_REGION);
        } else {
            let mut out_block = cond_info.else_block;
            if let Some(o) = out_block {
                if self.cfg.block(o).contains(BlockFlags::LOOP_START)
                    && !self.cfg.loop_attrs(o).contains(&loop_id)
                    && self.processed[o.index()]
                {
                    // exit leads back into an already processed outer loop
                    out_block = None;
                }
            }
            if let Some(o) = out_block {
                stack.add_exit(o);
            }
            let mut body = self.make_region(Some(cond_info.then_block), stack)?;
            // pull blocks between the loop start and the first condition
            // block into the body
            let condition_block = cond_info.if_block;
            if loop_start != condition_block {
                let mut blocks = self.cfg.all_paths_blocks(loop_start, condition_block);
                blocks.remove(&condition_block);
                for block in blocks {
                    if self.cfg.block(block).is_empty()
                        && !self.cfg.block(block).contains(BlockFlags::ADDED_TO_REGION)
                        && !body.contains_block(block)
                    {
                        body.add_block(block);
                    }
                }
            }
            loop_region.body = body;
            out = out_block;
        }
        stack.pop();
        self.insert_continue(&loop_info);
        region.add(RegionNode::Loop(Box::new(loop_region)));
        Ok(out)
    }

    /// Picks the condition-bearing exit and constructs the loop region.
    /// Returns `None` when no usable exit exists (endless loop).
    fn make_loop_region(
        &mut self,
        loop_info: &NaturalLoop,
        exit_blocks: &[BlockId],
    ) -> Result<Option<LoopRegion>, StructureError> {
        for &block in exit_blocks {
            if self.cfg.block(block).contains(BlockFlags::EXC_HANDLER) {
                continue;
            }
            if !self.cfg.check_last_insn_kind(block, InsnKindTag::If) {
                continue;
            }
            let attrs = self.cfg.loop_attrs(block);
            if !attrs.is_empty() && attrs[0] != loop_info.id {
                // nested loop condition
                continue;
            }
            let mut loop_region =
                LoopRegion::new(loop_info.id, Some(block), block == loop_info.end);
            let mut found;
            if block == loop_info.start
                || block == loop_info.end
                || self.cfg.is_empty_simple_path(loop_info.start, block)
            {
                found = true;
            } else if self.cfg.predecessors(block).contains(&loop_info.start) {
                loop_region.pre_condition = Some(loop_info.start);
                // a pre-condition that can't merge into the condition
                // position disqualifies this header
                found = self.check_pre_condition(loop_info.start);
            } else {
                found = false;
            }
            if found && self.cfg.all_loops_for_block(block).len() >= 2 {
                // reject if every clean successor leaves all containing
                // loops: the condition belongs to an outer loop
                let mut all_outer = true;
                for &succ in self.cfg.clean_successors(block) {
                    let mut out_loops = self.cfg.all_loops_for_block(succ);
                    out_loops.retain(|&l| l != loop_info.id);
                    if !out_loops.is_empty() {
                        all_outer = false;
                        break;
                    }
                }
                if all_outer {
                    found = false;
                }
            }
            if found && !self.check_loop_exits(loop_info, block)? {
                found = false;
            }
            if found {
                return Ok(Some(loop_region));
            }
        }
        // no exit found: endless loop
        Ok(None)
    }

    /// True if the pre-condition block's instructions can be hoisted into
    /// the loop condition position.
    fn check_pre_condition(&self, block: BlockId) -> bool {
        self.cfg
            .block(block)
            .instructions
            .iter()
            .all(|insn| insn.kind == InsnKind::Other)
    }

    /// With several exit edges, every secondary exit must either follow the
    /// same path as the main exit or stay clear of it; a path cross would
    /// make the chosen condition header ambiguous.
    fn check_loop_exits(
        &self,
        loop_info: &NaturalLoop,
        main_exit_block: BlockId,
    ) -> Result<bool, StructureError> {
        let exit_edges = &loop_info.exit_edges;
        if exit_edges.len() < 2 {
            return Ok(true);
        }
        let main_edge = exit_edges
            .iter()
            .find(|e| e.source == main_exit_block)
            .copied()
            .ok_or(StructureError::MissingLoopExit {
                block: main_exit_block,
            })?;
        let main_out = self.cfg.skip_synthetic_successor(main_edge.target);
        for &exit_edge in exit_edges {
            if exit_edge == main_edge {
                continue;
            }
            let out = self.cfg.skip_synthetic_successor(exit_edge.target);
            if !is_equal_paths(self.cfg, Some(main_out), Some(out))
                && self.cfg.path_cross(main_out, out).is_some()
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Builds a loop region with no condition. Exits become synthesized
    /// breaks where possible.
    fn make_endless_loop(
        &mut self,
        region: &mut Region,
        stack: &mut RegionStack,
        loop_info: &NaturalLoop,
    ) -> Result<Option<BlockId>, StructureError> {
        let mut loop_region = LoopRegion::new(loop_info.id, None, false);
        let loop_start = loop_info.start;

        let attrs = self.cfg.detach_loop_attrs(loop_start);
        self.processed[loop_start.index()] = false;
        stack.push()?;

        let mut out = None;
        let exit_edges = &loop_info.exit_edges;
        if exit_edges.len() == 1 {
            let exit_edge = exit_edges[0];
            let exit = exit_edge.target;
            if self.insert_loop_break(stack, loop_info, exit, exit_edge)? {
                if let Some(next_block) = self.cfg.next_block(exit) {
                    stack.add_exit(next_block);
                    out = Some(next_block);
                }
            }
        } else {
            for &exit_edge in exit_edges {
                let exit = exit_edge.target;
                let frontier: Vec<BlockId> =
                    self.cfg.dom_frontier(exit).iter().copied().collect();
                for block in frontier {
                    if self.cfg.is_path_exists(exit, block) {
                        stack.add_exit(block);
                        self.insert_loop_break(stack, loop_info, block, exit_edge)?;
                        out = Some(block);
                    } else {
                        self.insert_loop_break(stack, loop_info, exit, exit_edge)?;
                    }
                }
            }
        }

        let mut body = self.make_region(Some(loop_start), stack)?;
        let loop_end = loop_info.end;
        if !body.contains_block(loop_end)
            && !self.cfg.block(loop_end).contains(BlockFlags::EXC_HANDLER)
            && !self.in_exception_handler_blocks(loop_end)
        {
            body.add_block(loop_end);
        }

        if out.is_none() {
            out = match self.cfg.next_block(loop_end) {
                Some(next) if body.contains_block(next) => None,
                other => other,
            };
        }
        loop_region.body = body;
        stack.pop();
        self.cfg.attach_loop_attrs(loop_start, attrs);
        region.add(RegionNode::Loop(Box::new(loop_region)));
        Ok(out)
    }

    fn in_exception_handler_blocks(&self, block: BlockId) -> bool {
        if self.cfg.handlers_count() == 0 {
            return false;
        }
        self.cfg
            .exception_handlers()
            .iter()
            .any(|h| h.blocks.contains(&block))
    }

    /// Insertion is refused where a `break` would be ambiguous or dead:
    /// return paths, existing breaks, and anywhere below a switch header.
    fn can_insert_break(&self, exit: BlockId) -> bool {
        if self.cfg.block(exit).contains(BlockFlags::RETURN)
            || self.cfg.check_last_insn_kind(exit, InsnKindTag::Break)
        {
            return false;
        }
        let simple_path = self.cfg.build_simple_path(exit);
        if let Some(&last) = simple_path.last() {
            if self.cfg.block(last).contains(BlockFlags::RETURN)
                || self.cfg.successors(last).is_empty()
            {
                return false;
            }
        }
        // refuse when any path from the method entry runs through a switch
        let paths = self.cfg.all_paths_blocks(self.cfg.entry(), exit);
        for block in paths {
            if self.cfg.check_last_insn_kind(block, InsnKindTag::Switch) {
                return false;
            }
        }
        true
    }

    /// Walks forward from the exit edge's target until the path crosses the
    /// main loop exit, then attaches a `break` edge instruction just before
    /// the cross.
    pub(crate) fn insert_loop_break(
        &mut self,
        stack: &mut RegionStack,
        loop_info: &NaturalLoop,
        loop_exit: BlockId,
        exit_edge: Edge,
    ) -> Result<bool, StructureError> {
        let mut exit = Some(exit_edge.target);
        let mut insert_block: Option<BlockId> = None;
        let mut confirm = false;

        if loop_exit == exit_edge.target {
            // try/catch at loop end: break directly on the catch block when
            // its other successor leads into an exception handler
            let source = exit_edge.source;
            if self.cfg.block(source).contains(BlockFlags::CATCH_BLOCK)
                && self.cfg.successors(source).len() == 2
            {
                if let Some(other) = self.cfg.select_other(loop_exit, self.cfg.successors(source))
                {
                    let other = self.cfg.skip_synthetic_successor(other);
                    if self.cfg.block(other).contains(BlockFlags::EXC_HANDLER) {
                        insert_block = Some(source);
                        confirm = true;
                    }
                }
            }
        }
        if !confirm {
            while let Some(current) = exit {
                if let Some(insert) = insert_block {
                    if self.cfg.is_path_exists(loop_exit, current) {
                        // found cross
                        if self.can_insert_break(insert) {
                            confirm = true;
                            break;
                        }
                        return Ok(false);
                    }
                }
                insert_block = Some(current);
                let succs = self.cfg.clean_successors(current);
                exit = if succs.len() == 1 {
                    Some(succs[0])
                } else {
                    None
                };
            }
        }
        if !confirm && loop_exit == exit_edge.target {
            // terminal exit target: no downstream block to cross, attach
            // the break to the exit edge itself
            let source = exit_edge.source;
            if self.cfg.clean_successors(exit_edge.target).is_empty()
                && !self.cfg.block(source).contains(BlockFlags::RETURN)
                && !self.cfg.check_last_insn_kind(source, InsnKindTag::Break)
            {
                let mut break_insn = Insn::break_(loop_info.id);
                self.add_break_label(exit_edge, exit_edge.target, &mut break_insn);
                self.cfg
                    .add_edge_insn(source, exit_edge.target, break_insn);
                stack.add_exit(exit_edge.target);
                return Ok(true);
            }
        }
        if !confirm {
            return Ok(false);
        }
        let (Some(insert_block), Some(cross)) = (insert_block, exit) else {
            return Ok(false);
        };
        let Some(&succ) = self.cfg.successors(insert_block).first() else {
            return Ok(false);
        };
        let mut break_insn = Insn::break_(loop_info.id);
        self.add_break_label(exit_edge, cross, &mut break_insn);
        self.cfg.add_edge_insn(insert_block, succ, break_insn);
        stack.add_exit(cross);
        Ok(true)
    }

    /// Labels the break (and the loop header it names) when the break
    /// leaves more than the innermost loop.
    fn add_break_label(&mut self, exit_edge: Edge, exit: BlockId, break_insn: &mut Insn) {
        let Some(out_block) = self.cfg.next_block(exit_edge.target) else {
            return;
        };
        if !self.cfg.all_loops_for_block(out_block).is_empty() {
            return;
        }
        let in_loops = self.cfg.all_loops_for_block(exit_edge.source);
        if in_loops.len() < 2 {
            return;
        }
        let Some(parent) = in_loops
            .iter()
            .copied()
            .find(|&l| self.cfg.loop_info(l).parent.is_none())
        else {
            return;
        };
        let parent_info = self.cfg.loop_info(parent);
        let parent_start = parent_info.start;
        let needs_label =
            parent_info.end != exit && !parent_info.exit_nodes.contains(&exit);
        if needs_label {
            if let InsnKind::Break { label, .. } = &mut break_insn.kind {
                *label = Some(parent);
            }
            self.cfg.block_mut(parent_start).loop_label = Some(parent);
        }
    }

    /// Appends `continue` to synthetic trampolines jumping to the loop end
    /// from deep inside the body.
    pub(crate) fn insert_continue(&mut self, loop_info: &NaturalLoop) {
        let loop_end = loop_info.end;
        let predecessors = self.cfg.predecessors(loop_end).to_vec();
        if predecessors.len() <= 1 {
            return;
        }
        for &pred in &predecessors {
            if self.can_insert_continue(pred, &predecessors, loop_end, loop_info) {
                self.cfg.block_mut(pred).push(Insn::continue_());
            }
        }
    }

    fn can_insert_continue(
        &self,
        pred: BlockId,
        predecessors: &[BlockId],
        loop_end: BlockId,
        loop_info: &NaturalLoop,
    ) -> bool {
        if !self.cfg.block(pred).contains(BlockFlags::SYNTHETIC)
            || self.cfg.check_last_insn_kind(pred, InsnKindTag::Continue)
        {
            return false;
        }
        let Some(&code_pred) = self.cfg.predecessors(pred).first() else {
            return false;
        };
        if self.cfg.block(code_pred).contains(BlockFlags::ADDED_TO_REGION) {
            return false;
        }
        if self.cfg.dominates(code_pred, loop_end)
            || loop_info.exit_nodes.contains(&code_pred)
        {
            return false;
        }
        if predecessors
            .iter()
            .all(|&p| self.cfg.dominates(code_pred, p))
        {
            return false;
        }
        // only useful when a loop exit is still reachable from the source
        loop_info
            .exit_nodes
            .iter()
            .any(|&e| self.cfg.is_path_exists(code_pred, e))
    }
}
