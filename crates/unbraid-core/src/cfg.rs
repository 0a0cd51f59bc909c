//! Method control flow graph.
//!
//! [`MethodCfg`] owns the basic blocks of one method densely by id, plus the
//! side tables the region builder consumes: edges, dominator relations,
//! dominance frontiers, natural loops, exception metadata and the
//! edge-instruction table. [`MethodCfg::prepare`] runs the graph analyses
//! once after construction; everything after that is queries plus in-place
//! flag mutation.

use std::collections::BTreeSet;

use bitflags::bitflags;
use log::warn;

use crate::{
    BasicBlock, BlockFlags, BlockId, Edge, Error, ExcHandler, HandlerId, Insn, InsnKindTag,
    LoopId, NaturalLoop, TryCatch, TryId,
};

/// Ascending-ordered set of block ids.
///
/// Matches the iteration order of the bit sets the analyses are usually
/// expressed with, so downstream ordering stays deterministic.
pub type BlockSet = BTreeSet<BlockId>;

bitflags! {
    /// Per-method flags set by the region builder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct MethodFlags: u8 {
        /// Structure recovery hit an inconsistency it could not repair.
        const INCONSISTENT_CODE = 1 << 0;
    }
}

/// An instruction attached to a CFG edge instead of a block.
///
/// Emitted when code generation traverses the `start -> end` edge; used for
/// synthesized `break`/`continue` that must appear on one branch only.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeInsn {
    pub start: BlockId,
    pub end: BlockId,
    pub insn: Insn,
}

/// Control flow graph of a single method.
#[derive(Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodCfg {
    blocks: Vec<BasicBlock>,
    successors: Vec<Vec<BlockId>>,
    predecessors: Vec<Vec<BlockId>>,
    /// Successors with back edges and exception-handler targets filtered.
    clean_successors: Vec<Vec<BlockId>>,
    idom: Vec<Option<BlockId>>,
    dom_frontier: Vec<BlockSet>,
    rpo: Vec<BlockId>,
    rpo_index: Vec<usize>,
    loops: Vec<NaturalLoop>,
    /// Loop attributes attached to header blocks, innermost first.
    /// Detachable: the region builder removes them temporarily while
    /// recursing into a loop body.
    loop_attrs: Vec<Vec<LoopId>>,
    handlers: Vec<ExcHandler>,
    try_catches: Vec<TryCatch>,
    edge_insns: Vec<EdgeInsn>,
    warnings: Vec<String>,
    flags: MethodFlags,
}

impl MethodCfg {
    /// Creates an empty method CFG. Block 0 is the entry once added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new empty block and returns its id.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new());
        self.successors.push(Vec::new());
        self.predecessors.push(Vec::new());
        id
    }

    /// Adds a directed edge.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.successors[from.index()].push(to);
        self.predecessors[to.index()].push(from);
    }

    /// The method entry block.
    pub fn entry(&self) -> BlockId {
        BlockId::ENTRY
    }

    /// Number of blocks.
    pub fn blocks_count(&self) -> usize {
        self.blocks.len()
    }

    /// Iterator over all block ids in id order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId::new)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn successors(&self, id: BlockId) -> &[BlockId] {
        &self.successors[id.index()]
    }

    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        &self.predecessors[id.index()]
    }

    /// Successors with synthetic back edges and exception paths filtered.
    pub fn clean_successors(&self, id: BlockId) -> &[BlockId] {
        &self.clean_successors[id.index()]
    }

    /// True if the `from -> to` edge exists but was filtered from the clean
    /// successor list (a back edge).
    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.successors(from).contains(&to) && !self.clean_successors(from).contains(&to)
    }

    // ------------------------------------------------------------------
    // analyses
    // ------------------------------------------------------------------

    /// Runs the graph analyses: reverse post-order, dominators, dominance
    /// frontiers, clean successors and natural loops. Must be called once
    /// after all blocks, edges and exception metadata are in place.
    pub fn prepare(&mut self) -> Result<(), Error> {
        if self.blocks.is_empty() {
            return Err(Error::NoBlocks);
        }
        self.mark_handler_blocks();
        self.compute_rpo();
        self.compute_dominators();
        self.compute_dom_frontiers();
        self.compute_clean_successors();
        self.find_loops();
        self.mark_return_blocks();
        Ok(())
    }

    fn mark_handler_blocks(&mut self) {
        let mut handler_blocks = Vec::new();
        for handler in &self.handlers {
            handler_blocks.extend_from_slice(&handler.blocks);
        }
        for id in handler_blocks {
            self.blocks[id.index()].add_flag(BlockFlags::EXC_HANDLER);
        }
    }

    fn mark_return_blocks(&mut self) {
        for block in &mut self.blocks {
            if let Some(insn) = block.last_insn() {
                if insn.is_kind(InsnKindTag::Return) {
                    block.add_flag(BlockFlags::RETURN);
                }
            }
        }
    }

    fn compute_rpo(&mut self) {
        let count = self.blocks.len();
        let mut visited = vec![false; count];
        let mut post_order = Vec::with_capacity(count);
        // iterative post-order DFS, obfuscated methods can be deep
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry(), 0)];
        visited[self.entry().index()] = true;
        while let Some((block, next)) = stack.last_mut() {
            let block = *block;
            let succs = &self.successors[block.index()];
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                post_order.push(block);
                stack.pop();
            }
        }
        post_order.reverse();
        self.rpo = post_order;
        self.rpo_index = vec![usize::MAX; count];
        for (i, &b) in self.rpo.iter().enumerate() {
            self.rpo_index[b.index()] = i;
        }
    }

    /// Blocks in reverse post-order. Unreachable blocks are absent.
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.rpo
    }

    fn compute_dominators(&mut self) {
        let count = self.blocks.len();
        let mut idom: Vec<Option<BlockId>> = vec![None; count];
        idom[self.entry().index()] = Some(self.entry());

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &self.rpo {
                if block == self.entry() {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                for &pred in &self.predecessors[block.index()] {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => self.intersect(&idom, pred, cur),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }
        idom[self.entry().index()] = None;
        self.idom = idom;
    }

    fn intersect(&self, idom: &[Option<BlockId>], mut b1: BlockId, mut b2: BlockId) -> BlockId {
        while b1 != b2 {
            while self.rpo_index[b1.index()] > self.rpo_index[b2.index()] {
                b1 = idom[b1.index()].unwrap_or(self.entry());
            }
            while self.rpo_index[b2.index()] > self.rpo_index[b1.index()] {
                b2 = idom[b2.index()].unwrap_or(self.entry());
            }
        }
        b1
    }

    /// Immediate dominator of `block`. `None` for the entry and for
    /// unreachable blocks.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    /// True if `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(d) => current = d,
                None => return false,
            }
        }
    }

    fn compute_dom_frontiers(&mut self) {
        let count = self.blocks.len();
        let mut frontiers = vec![BlockSet::new(); count];
        for block in self.block_ids() {
            let preds = &self.predecessors[block.index()];
            if preds.len() < 2 {
                continue;
            }
            let Some(idom) = self.immediate_dominator(block) else {
                continue;
            };
            for &pred in preds {
                if self.rpo_index[pred.index()] == usize::MAX {
                    continue;
                }
                let mut runner = pred;
                while runner != idom {
                    frontiers[runner.index()].insert(block);
                    match self.immediate_dominator(runner) {
                        Some(d) => runner = d,
                        None => break,
                    }
                }
            }
        }
        self.dom_frontier = frontiers;
    }

    /// Dominance frontier of `block`.
    pub fn dom_frontier(&self, block: BlockId) -> &BlockSet {
        &self.dom_frontier[block.index()]
    }

    fn compute_clean_successors(&mut self) {
        let mut clean = Vec::with_capacity(self.blocks.len());
        for block in self.block_ids() {
            let list = self.successors[block.index()]
                .iter()
                .copied()
                .filter(|&succ| {
                    !self.dominates(succ, block)
                        && !self.blocks[succ.index()].contains(BlockFlags::EXC_HANDLER)
                })
                .collect();
            clean.push(list);
        }
        self.clean_successors = clean;
    }

    fn find_loops(&mut self) {
        let mut loops = Vec::new();
        for block in self.block_ids() {
            for &succ in self.successors(block) {
                if self.dominates(succ, block) {
                    // back edge block -> succ, succ is the header
                    let id = LoopId::new(loops.len() as u32);
                    loops.push(self.build_loop(id, succ, block));
                }
            }
        }
        // nesting: smallest strict superset wins
        for i in 0..loops.len() {
            let mut parent: Option<usize> = None;
            for j in 0..loops.len() {
                if i == j || !loops[j].blocks.is_superset(&loops[i].blocks) {
                    continue;
                }
                if loops[j].blocks.len() == loops[i].blocks.len() {
                    continue;
                }
                match parent {
                    Some(p) if loops[p].blocks.len() <= loops[j].blocks.len() => {}
                    _ => parent = Some(j),
                }
            }
            loops[i].parent = parent.map(|p| loops[p].id);
        }

        self.loop_attrs = vec![Vec::new(); self.blocks.len()];
        for lp in &loops {
            self.blocks[lp.start.index()].add_flag(BlockFlags::LOOP_START);
            self.loop_attrs[lp.start.index()].push(lp.id);
        }
        // innermost first on shared headers
        let sizes: Vec<usize> = loops.iter().map(|l| l.blocks.len()).collect();
        for attrs in &mut self.loop_attrs {
            attrs.sort_by_key(|l| sizes[l.index()]);
        }
        self.loops = loops;
    }

    fn build_loop(&self, id: LoopId, start: BlockId, end: BlockId) -> NaturalLoop {
        let mut blocks = BlockSet::new();
        blocks.insert(start);
        let mut worklist = vec![end];
        while let Some(block) = worklist.pop() {
            if blocks.insert(block) {
                for &pred in self.predecessors(block) {
                    worklist.push(pred);
                }
            }
        }
        let mut exit_edges = Vec::new();
        let mut exit_nodes = BlockSet::new();
        for &source in &blocks {
            for &target in self.successors(source) {
                if !blocks.contains(&target) {
                    exit_edges.push(Edge::new(source, target));
                    exit_nodes.insert(source);
                }
            }
        }
        NaturalLoop {
            id,
            start,
            end,
            blocks,
            exit_edges,
            exit_nodes,
            parent: None,
        }
    }

    // ------------------------------------------------------------------
    // loops
    // ------------------------------------------------------------------

    pub fn loops(&self) -> &[NaturalLoop] {
        &self.loops
    }

    pub fn loop_info(&self, id: LoopId) -> &NaturalLoop {
        &self.loops[id.index()]
    }

    /// Loop attributes attached to `block` (loops this block is header of),
    /// innermost first. Empty while detached.
    pub fn loop_attrs(&self, block: BlockId) -> &[LoopId] {
        &self.loop_attrs[block.index()]
    }

    /// Detaches all loop attributes from a header block, returning them for
    /// later reattachment.
    pub fn detach_loop_attrs(&mut self, block: BlockId) -> Vec<LoopId> {
        std::mem::take(&mut self.loop_attrs[block.index()])
    }

    /// Reattaches previously detached loop attributes.
    pub fn attach_loop_attrs(&mut self, block: BlockId, attrs: Vec<LoopId>) {
        self.loop_attrs[block.index()] = attrs;
    }

    /// The innermost loop containing `block`, if any.
    pub fn loop_for_block(&self, block: BlockId) -> Option<LoopId> {
        self.loops
            .iter()
            .filter(|l| l.contains(block))
            .min_by_key(|l| l.blocks.len())
            .map(|l| l.id)
    }

    /// All loops containing `block`, innermost first.
    pub fn all_loops_for_block(&self, block: BlockId) -> Vec<LoopId> {
        let mut list: Vec<&NaturalLoop> =
            self.loops.iter().filter(|l| l.contains(block)).collect();
        list.sort_by_key(|l| l.blocks.len());
        list.into_iter().map(|l| l.id).collect()
    }

    // ------------------------------------------------------------------
    // exceptions
    // ------------------------------------------------------------------

    /// Registers a try/catch group.
    pub fn add_try_catch(&mut self) -> TryId {
        let id = TryId::new(self.try_catches.len() as u32);
        self.try_catches.push(TryCatch::default());
        id
    }

    /// Registers an exception handler in its try/catch group.
    pub fn add_handler(&mut self, handler: ExcHandler) -> HandlerId {
        let id = HandlerId::new(self.handlers.len() as u32);
        self.try_catches[handler.try_id.index()].handlers.push(id);
        self.handlers.push(handler);
        id
    }

    pub fn exception_handlers(&self) -> &[ExcHandler] {
        &self.handlers
    }

    pub fn handler(&self, id: HandlerId) -> &ExcHandler {
        &self.handlers[id.index()]
    }

    pub fn handlers_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn try_catches(&self) -> &[TryCatch] {
        &self.try_catches
    }

    pub fn try_catch(&self, id: TryId) -> &TryCatch {
        &self.try_catches[id.index()]
    }

    // ------------------------------------------------------------------
    // edge instructions
    // ------------------------------------------------------------------

    /// Attaches an instruction to the `start -> end` edge.
    pub fn add_edge_insn(&mut self, start: BlockId, end: BlockId, insn: Insn) {
        self.edge_insns.push(EdgeInsn { start, end, insn });
    }

    pub fn edge_insns(&self) -> &[EdgeInsn] {
        &self.edge_insns
    }

    /// Edge instructions whose edge ends at `end`.
    pub fn edge_insns_ending_at(&self, end: BlockId) -> impl Iterator<Item = &EdgeInsn> {
        self.edge_insns.iter().filter(move |e| e.end == end)
    }

    /// Detaches an instruction from its uses and clears its arguments.
    pub fn unbind_insn(&mut self, block: BlockId, insn_index: usize) {
        self.blocks[block.index()].instructions[insn_index]
            .args
            .clear();
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    /// Records a method-level warning and logs it.
    pub fn add_warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{msg}");
        self.warnings.push(msg);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn add_flag(&mut self, flags: MethodFlags) {
        self.flags.insert(flags);
    }

    pub fn contains_flag(&self, flags: MethodFlags) -> bool {
        self.flags.contains(flags)
    }

    // ------------------------------------------------------------------
    // path helpers
    // ------------------------------------------------------------------

    /// The block control falls into next: the first clean successor.
    pub fn next_block(&self, block: BlockId) -> Option<BlockId> {
        self.clean_successors(block).first().copied()
    }

    /// Skips over a single-successor synthetic trampoline.
    pub fn skip_synthetic_successor(&self, block: BlockId) -> BlockId {
        if self.block(block).contains(BlockFlags::SYNTHETIC)
            && self.successors(block).len() == 1
        {
            return self.successors(block)[0];
        }
        block
    }

    /// Skips backwards over a single-predecessor synthetic trampoline.
    pub fn skip_synthetic_predecessor(&self, block: BlockId) -> BlockId {
        if self.block(block).contains(BlockFlags::SYNTHETIC)
            && self.predecessors(block).len() == 1
        {
            return self.predecessors(block)[0];
        }
        block
    }

    /// First element of `list` that is not `block`.
    pub fn select_other(&self, block: BlockId, list: &[BlockId]) -> Option<BlockId> {
        list.iter().copied().find(|&b| b != block)
    }

    /// True if a path `start -> end` exists over clean successors.
    pub fn is_path_exists(&self, start: BlockId, end: BlockId) -> bool {
        if start == end || self.dominates(start, end) {
            return true;
        }
        let mut visited = BlockSet::new();
        let mut worklist = vec![start];
        while let Some(block) = worklist.pop() {
            if !visited.insert(block) {
                continue;
            }
            for &succ in self.clean_successors(block) {
                if succ == end {
                    return true;
                }
                worklist.push(succ);
            }
        }
        false
    }

    /// The block where paths from `b1` and `b2` first rejoin, if any.
    ///
    /// Tries the intersection of the dominance frontiers first, then falls
    /// back to direct reachability between the two blocks.
    pub fn path_cross(&self, b1: BlockId, b2: BlockId) -> Option<BlockId> {
        let mut cross: BlockSet = self
            .dom_frontier(b1)
            .intersection(self.dom_frontier(b2))
            .copied()
            .collect();
        cross.remove(&b1);
        cross.remove(&b2);
        match cross.len() {
            0 => {}
            1 => return cross.first().copied(),
            _ => {
                for &candidate in &cross {
                    if self.is_path_exists(b1, candidate) && self.is_path_exists(b2, candidate) {
                        return Some(candidate);
                    }
                }
            }
        }
        if self.is_path_exists(b1, b2) {
            return Some(b2);
        }
        if self.is_path_exists(b2, b1) {
            return Some(b1);
        }
        None
    }

    /// All blocks lying on any path from `start` to `end`: `start` plus the
    /// transitive predecessors of `end` up to `start`.
    pub fn all_paths_blocks(&self, start: BlockId, end: BlockId) -> BlockSet {
        let mut set = BlockSet::new();
        set.insert(start);
        if start == end {
            return set;
        }
        let mut worklist = vec![end];
        while let Some(block) = worklist.pop() {
            if !set.insert(block) || block == start {
                continue;
            }
            for &pred in self.predecessors(block) {
                worklist.push(pred);
            }
        }
        set
    }

    /// Follows the unique-successor chain starting at `block` while every
    /// block on it has at most one clean successor and one predecessor.
    pub fn build_simple_path(&self, block: BlockId) -> Vec<BlockId> {
        let mut list = Vec::new();
        let mut visited = BlockSet::new();
        let mut current = Some(block);
        while let Some(cur) = current {
            if self.clean_successors(cur).len() >= 2
                || self.predecessors(cur).len() >= 2
                || !visited.insert(cur)
            {
                break;
            }
            list.push(cur);
            current = self.next_block(cur);
        }
        list
    }

    /// True if every block from `from` up to (excluding) `to` is empty and
    /// chains through single clean successors.
    pub fn is_empty_simple_path(&self, from: BlockId, to: BlockId) -> bool {
        if from == to {
            return self.block(from).is_empty();
        }
        let mut visited = BlockSet::new();
        let mut current = from;
        loop {
            if !self.block(current).is_empty()
                || self.clean_successors(current).len() != 1
                || !visited.insert(current)
            {
                return false;
            }
            let next = self.clean_successors(current)[0];
            if next == to {
                return true;
            }
            current = next;
        }
    }

    /// True if the last instruction of `block` has the given kind.
    pub fn check_last_insn_kind(&self, block: BlockId, tag: InsnKindTag) -> bool {
        self.block(block)
            .last_insn()
            .is_some_and(|insn| insn.is_kind(tag))
    }

    /// Blocks reachable from `start` over clean successors that are
    /// dominated by `dominator`.
    pub fn collect_blocks_dominated_by(&self, dominator: BlockId, start: BlockId) -> Vec<BlockId> {
        let mut result = Vec::new();
        let mut visited = BlockSet::new();
        let mut worklist = vec![start];
        while let Some(block) = worklist.pop() {
            for &succ in self.clean_successors(block) {
                if visited.insert(succ) && self.dominates(dominator, succ) {
                    result.push(succ);
                    worklist.push(succ);
                }
            }
        }
        result
    }

    /// Removes exception-handler blocks from a block set.
    pub fn clean_block_set(&self, set: &mut BlockSet) {
        set.retain(|&b| !self.block(b).contains(BlockFlags::EXC_HANDLER));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Insn;

    fn diamond() -> MethodCfg {
        //     bb0
        //    /   \
        //  bb1   bb2
        //    \   /
        //     bb3
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        let b3 = cfg.add_block();
        cfg.block_mut(b0).push(Insn::if_(b1, b2));
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b2);
        cfg.add_edge(b1, b3);
        cfg.add_edge(b2, b3);
        cfg.prepare().unwrap();
        cfg
    }

    fn simple_loop() -> MethodCfg {
        // bb0 -> bb1 -> bb2 -> bb1, bb1 -> bb3
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        let b3 = cfg.add_block();
        cfg.block_mut(b1).push(Insn::if_(b2, b3));
        cfg.add_edge(b0, b1);
        cfg.add_edge(b1, b2);
        cfg.add_edge(b2, b1);
        cfg.add_edge(b1, b3);
        cfg.prepare().unwrap();
        cfg
    }

    #[test]
    fn test_prepare_empty_method() {
        let mut cfg = MethodCfg::new();
        assert!(matches!(cfg.prepare(), Err(Error::NoBlocks)));
    }

    #[test]
    fn test_edges_symmetric() {
        let cfg = diamond();
        for block in cfg.block_ids() {
            for &succ in cfg.successors(block) {
                assert!(cfg.predecessors(succ).contains(&block));
            }
        }
    }

    #[test]
    fn test_dominators_diamond() {
        let cfg = diamond();
        let (b0, b1, b2, b3) = (
            BlockId::new(0),
            BlockId::new(1),
            BlockId::new(2),
            BlockId::new(3),
        );
        assert!(cfg.dominates(b0, b3));
        assert!(cfg.dominates(b0, b0));
        assert!(!cfg.dominates(b1, b3));
        assert!(!cfg.dominates(b2, b3));
        assert_eq!(cfg.immediate_dominator(b3), Some(b0));
        assert_eq!(cfg.immediate_dominator(b0), None);
    }

    #[test]
    fn test_dom_frontier_diamond() {
        let cfg = diamond();
        let b3 = BlockId::new(3);
        assert_eq!(
            cfg.dom_frontier(BlockId::new(1)),
            &BlockSet::from([b3])
        );
        assert_eq!(
            cfg.dom_frontier(BlockId::new(2)),
            &BlockSet::from([b3])
        );
        assert!(cfg.dom_frontier(BlockId::new(0)).is_empty());
    }

    #[test]
    fn test_path_cross_diamond() {
        let cfg = diamond();
        assert_eq!(
            cfg.path_cross(BlockId::new(1), BlockId::new(2)),
            Some(BlockId::new(3))
        );
    }

    #[test]
    fn test_path_cross_direct_successor() {
        // bb1 -> bb3 directly: cross of (1, 3) is 3 itself
        let cfg = diamond();
        assert_eq!(
            cfg.path_cross(BlockId::new(1), BlockId::new(3)),
            Some(BlockId::new(3))
        );
    }

    #[test]
    fn test_loop_detection() {
        let cfg = simple_loop();
        assert_eq!(cfg.loops().len(), 1);
        let lp = &cfg.loops()[0];
        assert_eq!(lp.start, BlockId::new(1));
        assert_eq!(lp.end, BlockId::new(2));
        assert!(lp.contains(BlockId::new(1)));
        assert!(lp.contains(BlockId::new(2)));
        assert!(!lp.contains(BlockId::new(3)));
        assert_eq!(lp.exit_nodes, BlockSet::from([BlockId::new(1)]));
        assert!(cfg.block(BlockId::new(1)).contains(BlockFlags::LOOP_START));
    }

    #[test]
    fn test_clean_successors_filter_back_edge() {
        let cfg = simple_loop();
        // bb2 -> bb1 is a back edge, filtered
        assert!(cfg.successors(BlockId::new(2)).contains(&BlockId::new(1)));
        assert!(cfg.clean_successors(BlockId::new(2)).is_empty());
        assert!(cfg.is_back_edge(BlockId::new(2), BlockId::new(1)));
    }

    #[test]
    fn test_loop_nesting() {
        // bb0 -> bb1 -> bb2 -> bb1 (inner), bb2 -> bb3 -> bb1? no:
        // outer: bb1 -> bb2 -> bb3 -> bb1, inner: bb2 -> bb2? use classic:
        // 0 -> 1 -> 2 -> 1 (inner back edge), 2 -> 3 -> 1 (outer back edge)
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        let b3 = cfg.add_block();
        let b4 = cfg.add_block();
        cfg.add_edge(b0, b1);
        cfg.add_edge(b1, b2);
        cfg.add_edge(b2, b1);
        cfg.add_edge(b2, b3);
        cfg.add_edge(b3, b1);
        cfg.add_edge(b3, b4);
        cfg.prepare().unwrap();

        assert_eq!(cfg.loops().len(), 2);
        let inner = cfg.loops().iter().find(|l| l.end == b2).unwrap();
        let outer = cfg.loops().iter().find(|l| l.end == b3).unwrap();
        assert_eq!(inner.parent, Some(outer.id));
        assert_eq!(outer.parent, None);
        // shared header: innermost attr first
        assert_eq!(cfg.loop_attrs(b1), &[inner.id, outer.id]);
        assert_eq!(cfg.loop_for_block(b2), Some(inner.id));
        assert_eq!(cfg.all_loops_for_block(b3), vec![outer.id]);
    }

    #[test]
    fn test_simple_path_helpers() {
        // bb0 -> bb1 -> bb2 (all single successor chains)
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        cfg.add_edge(b0, b1);
        cfg.add_edge(b1, b2);
        cfg.block_mut(b2).push(Insn::ret(None));
        cfg.prepare().unwrap();

        assert_eq!(cfg.build_simple_path(b0), vec![b0, b1, b2]);
        assert!(cfg.is_empty_simple_path(b0, b2));
        assert!(cfg.block(b2).contains(BlockFlags::RETURN));
    }

    #[test]
    fn test_all_paths_blocks() {
        let cfg = diamond();
        let set = cfg.all_paths_blocks(BlockId::new(0), BlockId::new(3));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_detach_attach_loop_attrs() {
        let mut cfg = simple_loop();
        let header = BlockId::new(1);
        let attrs = cfg.detach_loop_attrs(header);
        assert_eq!(attrs.len(), 1);
        assert!(cfg.loop_attrs(header).is_empty());
        cfg.attach_loop_attrs(header, attrs);
        assert_eq!(cfg.loop_attrs(header).len(), 1);
    }
}
