//! Abstract branch conditions.
//!
//! [`IfInfo`] describes one recognized conditional: the header block(s) the
//! condition was read from, the branch targets and the merge point. Nested
//! conditionals whose branches rejoin are merged into short-circuit
//! `&&`/`||` chains before region construction.

use log::debug;

use unbraid_core::{BlockFlags, BlockId, InsnKind, InsnKindTag, MethodCfg};

use crate::structurer::is_equal_return_blocks;

/// A branch condition tree.
///
/// `Compare` leaves reference the block whose trailing `if` instruction
/// carries the actual comparison; downstream emission resolves it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfCondition {
    /// The comparison of the `if` instruction ending `block`.
    Compare { block: BlockId, negated: bool },
    Not(Box<IfCondition>),
    And(Vec<IfCondition>),
    Or(Vec<IfCondition>),
}

impl IfCondition {
    /// The condition of the `if` instruction ending `block`, unnegated.
    pub fn compare(block: BlockId) -> Self {
        Self::Compare {
            block,
            negated: false,
        }
    }

    /// Logical negation, applying De Morgan to compound conditions.
    pub fn invert(self) -> Self {
        match self {
            Self::Compare { block, negated } => Self::Compare {
                block,
                negated: !negated,
            },
            Self::Not(inner) => *inner,
            Self::And(parts) => Self::Or(parts.into_iter().map(Self::invert).collect()),
            Self::Or(parts) => Self::And(parts.into_iter().map(Self::invert).collect()),
        }
    }

    /// Merges two conditions with `&&` (`and == true`) or `||`, flattening
    /// nested chains of the same operator.
    pub fn merge(and: bool, left: Self, right: Self) -> Self {
        let mut parts = Vec::new();
        let mut push = |cond: Self, parts: &mut Vec<Self>| match (and, cond) {
            (true, Self::And(inner)) => parts.extend(inner),
            (false, Self::Or(inner)) => parts.extend(inner),
            (_, other) => parts.push(other),
        };
        push(left, &mut parts);
        push(right, &mut parts);
        if and {
            Self::And(parts)
        } else {
            Self::Or(parts)
        }
    }
}

/// One recognized conditional: condition tree, consumed header blocks and
/// branch targets.
#[derive(Debug, Clone)]
pub struct IfInfo {
    pub condition: IfCondition,
    /// The first condition header block.
    pub if_block: BlockId,
    /// All header blocks consumed by the (possibly merged) condition, in
    /// merge order. The first entry is `if_block`.
    pub merged_blocks: Vec<BlockId>,
    /// Pass-through blocks skipped while chaining nested conditions; they
    /// are flagged `DONT_GENERATE` on confirm.
    pub skipped_blocks: Vec<BlockId>,
    pub then_block: BlockId,
    pub else_block: Option<BlockId>,
    /// Merge point where both branches rejoin, once restructured.
    pub out_block: Option<BlockId>,
}

/// Reads the conditional ending `block` into an [`IfInfo`].
///
/// Returns `None` if the block does not end with an `if` instruction.
pub fn make_if_info(cfg: &MethodCfg, block: BlockId) -> Option<IfInfo> {
    let (then_block, else_block) = match cfg.block(block).last_insn_kind() {
        Some(InsnKind::If {
            then_block,
            else_block,
        }) => (*then_block, *else_block),
        _ => return None,
    };
    Some(IfInfo {
        condition: IfCondition::compare(block),
        if_block: block,
        merged_blocks: vec![block],
        skipped_blocks: Vec::new(),
        then_block,
        else_block: Some(else_block),
        out_block: None,
    })
}

/// Inverts the condition and swaps the branches.
pub fn invert_info(mut info: IfInfo) -> IfInfo {
    let Some(else_block) = info.else_block else {
        // one-armed conditions are produced only by restructuring and are
        // never inverted afterwards
        return info;
    };
    info.condition = info.condition.invert();
    info.else_block = Some(info.then_block);
    info.then_block = else_block;
    info
}

/// Repeatedly merges nested conditionals; returns the input unchanged when
/// nothing merges.
pub fn search_nested_if(cfg: &MethodCfg, info: IfInfo) -> IfInfo {
    match merge_nested_if_nodes(cfg, info.clone()) {
        Some(merged) => merged,
        None => info,
    }
}

/// Tries to merge `current` with a conditional chained behind one of its
/// branches into a short-circuit condition.
///
/// Following the then branch produces `&&` (both conditions must hold to
/// reach the inner then), following the else branch produces `||`. The
/// branch not followed must lead to the same place in both conditionals,
/// otherwise the conditions are unrelated.
pub fn merge_nested_if_nodes(cfg: &MethodCfg, current: IfInfo) -> Option<IfInfo> {
    let cur_then = current.then_block;
    let cur_else = current.else_block?;
    if cur_then == cur_else {
        return None;
    }
    // never merge across a loop back edge
    if cfg.dominates(cur_then, current.if_block) || cfg.dominates(cur_else, current.if_block) {
        return None;
    }

    let mut skipped = Vec::new();
    let (next, follow_then) = match get_next_if(cfg, &current, cur_then, &mut skipped) {
        Some(next) => (next, true),
        None => {
            skipped.clear();
            let next = get_next_if(cfg, &current, cur_else, &mut skipped)?;
            (next, false)
        }
    };

    let mut next = next;
    if is_inversion_needed(cfg, &current, &next) {
        next = invert_info(next);
    }
    let next_then = next.then_block;
    let next_else = next.else_block?;
    if follow_then {
        // 'a && b': both else branches must take the same path
        if !crate::structurer::is_equal_paths(cfg, Some(cur_else), Some(next_else)) {
            return None;
        }
    } else {
        // 'a || b': both then branches must take the same path
        if !crate::structurer::is_equal_paths(cfg, Some(cur_then), Some(next_then)) {
            return None;
        }
    }

    let mut result = merge_if_info(cfg, current, next, follow_then);
    result.skipped_blocks.extend(skipped);
    // keep chaining
    Some(search_nested_if(cfg, result))
}

fn merge_if_info(cfg: &MethodCfg, first: IfInfo, second: IfInfo, follow_then: bool) -> IfInfo {
    let condition = IfCondition::merge(follow_then, first.condition.clone(), second.condition.clone());
    let mut merged_blocks = first.merged_blocks.clone();
    merged_blocks.extend(second.merged_blocks.iter().copied());
    let mut skipped_blocks = first.skipped_blocks.clone();
    skipped_blocks.extend(second.skipped_blocks.iter().copied());

    // the shared branch keeps the inner conditional's target; when the two
    // targets are distinct but equal return blocks, the outer copy becomes
    // dead and must be suppressed
    let other = if follow_then {
        first.else_block
    } else {
        Some(first.then_block)
    };
    let kept = if follow_then {
        second.else_block
    } else {
        Some(second.then_block)
    };
    if let (Some(other), Some(kept)) = (other, kept) {
        if other != kept && is_equal_return_blocks(cfg, other, kept) {
            skipped_blocks.push(other);
        }
    }

    IfInfo {
        condition,
        if_block: first.if_block,
        merged_blocks,
        skipped_blocks,
        then_block: second.then_block,
        else_block: second.else_block,
        out_block: None,
    }
}

fn is_inversion_needed(cfg: &MethodCfg, current: &IfInfo, next: &IfInfo) -> bool {
    crate::structurer::is_equal_paths(cfg, current.else_block, Some(next.then_block))
        || crate::structurer::is_equal_paths(cfg, Some(current.then_block), next.else_block)
}

fn get_next_if(
    cfg: &MethodCfg,
    info: &IfInfo,
    block: BlockId,
    skipped: &mut Vec<BlockId>,
) -> Option<IfInfo> {
    if !can_select_next(cfg, info, block) {
        return None;
    }
    let nested = get_next_if_node(cfg, block, skipped)?;
    make_if_info(cfg, nested)
}

fn can_select_next(cfg: &MethodCfg, info: &IfInfo, block: BlockId) -> bool {
    let preds = cfg.predecessors(block);
    if preds.len() == 1 {
        return true;
    }
    preds.iter().all(|p| info.merged_blocks.contains(p))
}

/// Finds the next conditional header reachable from `block` over empty
/// pass-through blocks, recording the blocks skipped on the way.
fn get_next_if_node(
    cfg: &MethodCfg,
    block: BlockId,
    skipped: &mut Vec<BlockId>,
) -> Option<BlockId> {
    let mut current = block;
    loop {
        if !cfg.loop_attrs(current).is_empty()
            || cfg.block(current).contains(BlockFlags::ADDED_TO_REGION)
        {
            return None;
        }
        if cfg.check_last_insn_kind(current, InsnKindTag::If) {
            return Some(current);
        }
        // skip an empty pass-through block
        if cfg.block(current).is_empty() && cfg.clean_successors(current).len() == 1 {
            let next = cfg.clean_successors(current)[0];
            if !cfg.is_back_edge(current, next) && !skipped.contains(&current) {
                skipped.push(current);
                current = next;
                continue;
            }
        }
        return None;
    }
}

/// Chooses and validates the then/else/out blocks of a conditional.
///
/// A branch is unusable when it can be entered from outside this
/// conditional; such a branch becomes the merge point instead. Returns
/// `None` when both branches are unusable.
pub fn restructure_if(cfg: &MethodCfg, block: BlockId, mut info: IfInfo) -> Option<IfInfo> {
    let then_block = info.then_block;
    let Some(else_block) = info.else_block else {
        return Some(info);
    };

    // both branches return: no merge point to find
    if cfg.block(then_block).contains(BlockFlags::RETURN)
        && cfg.block(else_block).contains(BlockFlags::RETURN)
    {
        info.out_block = None;
        return Some(info);
    }

    let bad_then = !all_paths_from_if(cfg, &info, then_block);
    let bad_else = !all_paths_from_if(cfg, &info, else_block);
    match (bad_then, bad_else) {
        (true, true) => {
            debug!("stop processing blocks after 'if': {block}");
            None
        }
        (false, true) => {
            info.else_block = None;
            info.out_block = Some(else_block);
            Some(info)
        }
        (true, false) => {
            let mut inverted = invert_info(info);
            inverted.else_block = None;
            inverted.out_block = Some(then_block);
            Some(inverted)
        }
        (false, false) => {
            info.out_block = cfg.path_cross(then_block, else_block);
            Some(info)
        }
    }
}

/// True if every predecessor of `block` is one of the conditional's header
/// blocks (skipping synthetic trampolines).
fn all_paths_from_if(cfg: &MethodCfg, info: &IfInfo, block: BlockId) -> bool {
    cfg.predecessors(block).iter().all(|&pred| {
        info.merged_blocks.contains(&pred)
            || info
                .merged_blocks
                .contains(&cfg.skip_synthetic_predecessor(pred))
    })
}

/// Commits a merge: consumed header blocks are excluded from further
/// traversal and skipped pass-through blocks are suppressed.
pub fn confirm_merge(cfg: &mut MethodCfg, info: &IfInfo) {
    if info.merged_blocks.len() > 1 {
        for &block in &info.merged_blocks {
            if block != info.if_block {
                cfg.block_mut(block).add_flag(BlockFlags::ADDED_TO_REGION);
            }
        }
    }
    for &block in &info.skipped_blocks {
        cfg.block_mut(block).add_flag(BlockFlags::DONT_GENERATE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unbraid_core::Insn;

    #[test]
    fn test_invert_compare() {
        let cond = IfCondition::compare(BlockId::new(0));
        let inv = cond.clone().invert();
        assert_eq!(
            inv,
            IfCondition::Compare {
                block: BlockId::new(0),
                negated: true
            }
        );
        assert_eq!(inv.invert(), cond);
    }

    #[test]
    fn test_invert_de_morgan() {
        let a = IfCondition::compare(BlockId::new(0));
        let b = IfCondition::compare(BlockId::new(1));
        let and = IfCondition::merge(true, a.clone(), b.clone());
        let inverted = and.invert();
        assert_eq!(
            inverted,
            IfCondition::Or(vec![a.invert(), b.invert()])
        );
    }

    #[test]
    fn test_merge_flattens_chains() {
        let a = IfCondition::compare(BlockId::new(0));
        let b = IfCondition::compare(BlockId::new(1));
        let c = IfCondition::compare(BlockId::new(2));
        let ab = IfCondition::merge(true, a.clone(), b.clone());
        let abc = IfCondition::merge(true, ab, c.clone());
        assert_eq!(abc, IfCondition::And(vec![a, b, c]));
    }

    fn diamond_cfg() -> MethodCfg {
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        let b3 = cfg.add_block();
        cfg.block_mut(b0).push(Insn::if_(b1, b2));
        cfg.block_mut(b1).push(Insn::other());
        cfg.block_mut(b2).push(Insn::other());
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b2);
        cfg.add_edge(b1, b3);
        cfg.add_edge(b2, b3);
        cfg.prepare().unwrap();
        cfg
    }

    #[test]
    fn test_make_if_info() {
        let cfg = diamond_cfg();
        let info = make_if_info(&cfg, BlockId::new(0)).unwrap();
        assert_eq!(info.then_block, BlockId::new(1));
        assert_eq!(info.else_block, Some(BlockId::new(2)));
        assert_eq!(info.merged_blocks, vec![BlockId::new(0)]);

        assert!(make_if_info(&cfg, BlockId::new(1)).is_none());
    }

    #[test]
    fn test_restructure_diamond() {
        let cfg = diamond_cfg();
        let info = make_if_info(&cfg, BlockId::new(0)).unwrap();
        let restructured = restructure_if(&cfg, BlockId::new(0), info).unwrap();
        assert_eq!(restructured.out_block, Some(BlockId::new(3)));
        assert_eq!(restructured.then_block, BlockId::new(1));
        assert_eq!(restructured.else_block, Some(BlockId::new(2)));
    }

    #[test]
    fn test_merge_nested_and() {
        // if (a) { if (b) { body } } -> a && b
        //
        // bb0(if) -> bb1(if), bb0 -> bb3(else)
        // bb1 -> bb2(body), bb1 -> bb3
        // bb2 -> bb3
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        let b3 = cfg.add_block();
        cfg.block_mut(b0).push(Insn::if_(b1, b3));
        cfg.block_mut(b1).push(Insn::if_(b2, b3));
        cfg.block_mut(b2).push(Insn::other());
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b3);
        cfg.add_edge(b1, b2);
        cfg.add_edge(b1, b3);
        cfg.add_edge(b2, b3);
        cfg.prepare().unwrap();

        let info = make_if_info(&cfg, b0).unwrap();
        let merged = merge_nested_if_nodes(&cfg, info).unwrap();
        assert_eq!(merged.merged_blocks, vec![b0, b1]);
        assert_eq!(merged.then_block, b2);
        assert_eq!(merged.else_block, Some(b3));
        assert!(matches!(merged.condition, IfCondition::And(_)));
    }

    #[test]
    fn test_merge_refuses_unrelated_branches() {
        // bb1's else goes somewhere unrelated to bb0's else
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        let b3 = cfg.add_block();
        let b4 = cfg.add_block();
        let b5 = cfg.add_block();
        cfg.block_mut(b0).push(Insn::if_(b1, b3));
        cfg.block_mut(b1).push(Insn::if_(b2, b4));
        cfg.block_mut(b3).push(Insn::ret(None));
        cfg.block_mut(b4).push(Insn::other());
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b3);
        cfg.add_edge(b1, b2);
        cfg.add_edge(b1, b4);
        cfg.add_edge(b2, b5);
        cfg.add_edge(b4, b5);
        cfg.add_edge(b3, b5);
        cfg.prepare().unwrap();

        let info = make_if_info(&cfg, b0).unwrap();
        assert!(merge_nested_if_nodes(&cfg, info).is_none());
    }

    #[test]
    fn test_confirm_merge_marks_blocks() {
        let mut cfg = MethodCfg::new();
        let b0 = cfg.add_block();
        let b1 = cfg.add_block();
        let b2 = cfg.add_block();
        cfg.add_edge(b0, b1);
        cfg.add_edge(b1, b2);
        cfg.prepare().unwrap();

        let info = IfInfo {
            condition: IfCondition::compare(b0),
            if_block: b0,
            merged_blocks: vec![b0, b1],
            skipped_blocks: vec![b2],
            then_block: b1,
            else_block: None,
            out_block: None,
        };
        confirm_merge(&mut cfg, &info);
        assert!(!cfg.block(b0).contains(BlockFlags::ADDED_TO_REGION));
        assert!(cfg.block(b1).contains(BlockFlags::ADDED_TO_REGION));
        assert!(cfg.block(b2).contains(BlockFlags::DONT_GENERATE));
    }
}
