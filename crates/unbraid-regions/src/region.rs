//! The region tree produced by the structurer.
//!
//! A region is a structured construct suitable for emitting high-level
//! source code. Regions reference basic blocks by id into the method CFG;
//! the tree owns only its nested regions, so it stays acyclic while the
//! underlying graph is not.

use unbraid_core::{Arg, BlockId, BlockSet, HandlerId, LoopId, MethodCfg};

use crate::IfCondition;

/// One entry of a sequential region: a raw block or a nested construct.
#[derive(Debug)]
pub enum RegionNode {
    /// A basic block, by id.
    Block(BlockId),
    /// A nested plain sequence.
    Region(Region),
    Loop(Box<LoopRegion>),
    If(Box<IfRegion>),
    Switch(Box<SwitchRegion>),
    Sync(Box<SyncRegion>),
}

/// A sequential region: ordered sub-items executed one after another.
#[derive(Debug, Default)]
pub struct Region {
    pub nodes: Vec<RegionNode>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: RegionNode) {
        self.nodes.push(node);
    }

    pub fn add_block(&mut self, block: BlockId) {
        self.nodes.push(RegionNode::Block(block));
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if `block` appears anywhere in this region tree, including
    /// loop headers, pre-conditions and switch headers.
    pub fn contains_block(&self, block: BlockId) -> bool {
        self.nodes.iter().any(|n| n.contains_block(block))
    }

    /// Collects every block referenced by this region tree.
    pub fn collect_blocks(&self, out: &mut BlockSet) {
        for node in &self.nodes {
            node.collect_blocks(out);
        }
    }

    /// The last basic block of the region, following the last sub-item
    /// recursively.
    pub fn last_block(&self) -> Option<BlockId> {
        self.nodes.last().and_then(RegionNode::last_block)
    }

    /// True if any contained block carries instructions or any nested
    /// construct is present.
    pub fn has_insns(&self, cfg: &MethodCfg) -> bool {
        self.nodes.iter().any(|n| n.has_insns(cfg))
    }
}

impl RegionNode {
    fn contains_block(&self, block: BlockId) -> bool {
        match self {
            RegionNode::Block(b) => *b == block,
            RegionNode::Region(r) => r.contains_block(block),
            RegionNode::Loop(l) => {
                l.pre_condition == Some(block)
                    || l.header == Some(block)
                    || l.body.contains_block(block)
            }
            RegionNode::If(i) => {
                i.then_region.contains_block(block)
                    || i.else_region
                        .as_ref()
                        .is_some_and(|e| e.contains_block(block))
            }
            RegionNode::Switch(s) => {
                s.header == block
                    || s.cases.iter().any(|c| c.region.contains_block(block))
                    || s.default.as_ref().is_some_and(|d| d.contains_block(block))
            }
            RegionNode::Sync(s) => s.enter_block == block || s.body.contains_block(block),
        }
    }

    fn collect_blocks(&self, out: &mut BlockSet) {
        match self {
            RegionNode::Block(b) => {
                out.insert(*b);
            }
            RegionNode::Region(r) => r.collect_blocks(out),
            RegionNode::Loop(l) => {
                if let Some(p) = l.pre_condition {
                    out.insert(p);
                }
                if let Some(h) = l.header {
                    out.insert(h);
                }
                l.body.collect_blocks(out);
            }
            RegionNode::If(i) => {
                out.extend(i.condition_blocks.iter().copied());
                i.then_region.collect_blocks(out);
                if let Some(e) = &i.else_region {
                    e.collect_blocks(out);
                }
            }
            RegionNode::Switch(s) => {
                out.insert(s.header);
                for case in &s.cases {
                    case.region.collect_blocks(out);
                }
                if let Some(d) = &s.default {
                    d.collect_blocks(out);
                }
            }
            RegionNode::Sync(s) => {
                out.insert(s.enter_block);
                s.body.collect_blocks(out);
            }
        }
    }

    fn last_block(&self) -> Option<BlockId> {
        match self {
            RegionNode::Block(b) => Some(*b),
            RegionNode::Region(r) => r.last_block(),
            RegionNode::Loop(l) => l.body.last_block(),
            RegionNode::If(i) => match &i.else_region {
                Some(e) => e.last_block(),
                None => i.then_region.last_block(),
            },
            RegionNode::Switch(s) => match &s.default {
                Some(d) => d.last_block(),
                None => s.cases.last().and_then(|c| c.region.last_block()),
            },
            RegionNode::Sync(s) => s.body.last_block(),
        }
    }

    fn has_insns(&self, cfg: &MethodCfg) -> bool {
        match self {
            RegionNode::Block(b) => !cfg.block(*b).is_empty(),
            RegionNode::Region(r) => r.has_insns(cfg),
            // any structured construct counts as content
            RegionNode::Loop(_) | RegionNode::If(_) | RegionNode::Switch(_)
            | RegionNode::Sync(_) => true,
        }
    }
}

/// A recognized loop.
#[derive(Debug)]
pub struct LoopRegion {
    /// The underlying natural loop.
    pub loop_id: LoopId,
    /// Condition-bearing block. `None` for an endless loop.
    pub header: Option<BlockId>,
    /// Loop condition. `None` for an endless loop.
    pub condition: Option<IfCondition>,
    /// True for do-while shape (condition checked after the body).
    pub condition_at_end: bool,
    /// Block whose instructions run before the condition on every
    /// iteration, merged into the condition position.
    pub pre_condition: Option<BlockId>,
    pub body: Region,
}

impl LoopRegion {
    pub fn new(loop_id: LoopId, header: Option<BlockId>, condition_at_end: bool) -> Self {
        Self {
            loop_id,
            header,
            condition: None,
            condition_at_end,
            pre_condition: None,
            body: Region::new(),
        }
    }
}

/// A recognized if/else.
#[derive(Debug)]
pub struct IfRegion {
    pub condition: IfCondition,
    /// Header blocks consumed by the condition, in merge order.
    pub condition_blocks: Vec<BlockId>,
    pub then_region: Region,
    pub else_region: Option<Region>,
}

/// One case of a switch region.
#[derive(Debug)]
pub struct SwitchCase {
    /// Keys dispatching to this case, in first-seen order.
    pub keys: Vec<i64>,
    pub region: Region,
    /// True if this case flows into the next case instead of breaking.
    pub fall_through: bool,
}

/// A recognized switch.
#[derive(Debug)]
pub struct SwitchRegion {
    /// Block ending with the switch instruction.
    pub header: BlockId,
    /// Cases in emit order.
    pub cases: Vec<SwitchCase>,
    pub default: Option<Region>,
}

/// A recognized synchronized section.
#[derive(Debug)]
pub struct SyncRegion {
    /// Block ending with the monitor-enter instruction.
    pub enter_block: BlockId,
    /// The lock argument.
    pub arg: Arg,
    /// Matched monitor-exit instructions as `(block, instruction index)`.
    pub exit_insns: Vec<(BlockId, usize)>,
    pub body: Region,
}

/// A built exception handler region.
#[derive(Debug)]
pub struct HandlerRegion {
    /// The handler this region implements.
    pub handler: HandlerId,
    pub region: Region,
}

/// The full structuring result for one method.
#[derive(Debug)]
pub struct StructuredMethod {
    /// Root region rooted at the method entry.
    pub region: Region,
    /// Regions built for exception handlers.
    pub handlers: Vec<HandlerRegion>,
    /// Supplementary region for handler successors not covered by any
    /// other region.
    pub exc_out: Option<Region>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_collect() {
        let mut body = Region::new();
        body.add_block(BlockId::new(2));
        let lp = LoopRegion {
            loop_id: LoopId::new(0),
            header: Some(BlockId::new(1)),
            condition: None,
            condition_at_end: false,
            pre_condition: None,
            body,
        };
        let mut root = Region::new();
        root.add_block(BlockId::new(0));
        root.add(RegionNode::Loop(Box::new(lp)));

        assert!(root.contains_block(BlockId::new(0)));
        assert!(root.contains_block(BlockId::new(1)));
        assert!(root.contains_block(BlockId::new(2)));
        assert!(!root.contains_block(BlockId::new(3)));

        let mut all = BlockSet::new();
        root.collect_blocks(&mut all);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_last_block_recurses() {
        let mut inner = Region::new();
        inner.add_block(BlockId::new(5));
        let mut root = Region::new();
        root.add_block(BlockId::new(1));
        root.add(RegionNode::Region(inner));
        assert_eq!(root.last_block(), Some(BlockId::new(5)));
    }
}
