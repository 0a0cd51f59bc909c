//! Switch recognition.
//!
//! Cases are grouped by target block in first-seen order. Fallthrough
//! chains are detected from dominance frontiers and the case order is
//! repaired when it contradicts a chain. The out block is narrowed from
//! the header's and cases' dominance frontiers; multi-exit switches outside
//! loops are left without an out block, with a warning.

use indexmap::IndexMap;
use log::{debug, error, warn};

use unbraid_core::{BlockFlags, BlockId, BlockSet, Insn, InsnKind, MethodFlags};

use crate::region::{Region, RegionNode, SwitchCase, SwitchRegion};
use crate::region_stack::RegionStack;
use crate::structurer::Structurer;
use crate::StructureError;

impl Structurer<'_> {
    pub(crate) fn process_switch(
        &mut self,
        region: &mut Region,
        block: BlockId,
        stack: &mut RegionStack,
    ) -> Result<Option<BlockId>, StructureError> {
        let (keys, targets, default_target) = match self.cfg.block(block).last_insn_kind() {
            Some(InsnKind::Switch {
                keys,
                targets,
                default_target,
            }) => (keys.clone(), targets.clone(), *default_target),
            _ => return Ok(None),
        };

        // group keys by target, preserving first-seen order
        let mut blocks_map: IndexMap<BlockId, Vec<i64>> = IndexMap::with_capacity(keys.len());
        for (&key, &target) in keys.iter().zip(&targets) {
            blocks_map.entry(target).or_default().push(key);
        }
        if let Some(default) = default_target {
            blocks_map.shift_remove(&default);
        }
        let loop_id = self.cfg.loop_for_block(block);

        let mut fall_through_cases: IndexMap<BlockId, BlockId> = IndexMap::new();

        let mut outs: BlockSet = self.cfg.dom_frontier(block).clone();
        for &succ in self.cfg.clean_successors(block) {
            let mut df = self.cfg.dom_frontier(succ).clone();
            if df.len() > 1 {
                if df.len() > 2 {
                    debug!("unexpected case pattern, block: {succ}");
                } else {
                    let pair: Vec<BlockId> = df.iter().copied().collect();
                    let (first, second) = (pair[0], pair[1]);
                    if self.cfg.dom_frontier(second).contains(&first) {
                        // succ falls through into the case starting the
                        // chain at `second`
                        fall_through_cases.insert(succ, second);
                        df = BlockSet::from([first]);
                    } else if self.cfg.dom_frontier(first).contains(&second) {
                        fall_through_cases.insert(succ, first);
                        df = BlockSet::from([second]);
                    }
                }
            }
            outs.extend(df);
        }
        outs.remove(&block);
        if let Some(lp) = loop_id {
            outs.remove(&self.cfg.loop_info(lp).start);
        }

        stack.push()?;
        stack.add_exits(outs.iter().copied());

        // repair case order broken by a fallthrough chain
        if !fall_through_cases.is_empty() && is_bad_cases_order(&blocks_map, &fall_through_cases)
        {
            debug!("fixing incorrect switch cases order, header: {block}");
            blocks_map = reorder_switch_cases(blocks_map, &fall_through_cases);
            if is_bad_cases_order(&blocks_map, &fall_through_cases) {
                error!("can't fix incorrect switch cases order, header: {block}");
                self.cfg.add_flag(MethodFlags::INCONSISTENT_CODE);
            }
        }

        // narrow the out candidates
        if outs.len() > 1 {
            self.cfg.clean_block_set(&mut outs);
        }
        if outs.len() > 1 {
            for candidate in outs.clone() {
                if !outs.contains(&candidate) {
                    continue;
                }
                let frontier = self.cfg.dom_frontier(candidate).clone();
                outs.retain(|b| !frontier.contains(b));
                if self.cfg.block(candidate).contains(BlockFlags::LOOP_START) {
                    outs.remove(&candidate);
                } else {
                    for &succ in self.cfg.clean_successors(candidate) {
                        outs.remove(&succ);
                    }
                }
            }
        }
        if outs.len() > 1 {
            if let Some(lp) = loop_id {
                outs.remove(&self.cfg.loop_info(lp).end);
            }
        }
        if outs.is_empty() {
            // some case blocks are empty: search a successor reachable
            // from all other successors
            let succs = self.cfg.successors(block).to_vec();
            for &maybe_out in &succs {
                if succs.iter().all(|&s| self.cfg.is_path_exists(s, maybe_out)) {
                    outs.insert(maybe_out);
                    break;
                }
            }
        }
        let mut out = None;
        if outs.len() == 1 {
            out = outs.first().copied();
            if let Some(o) = out {
                stack.add_exit(o);
            }
        } else if loop_id.is_none() && outs.len() > 1 {
            warn!("can't detect out node for switch block: {block}");
        }

        if let Some(lp) = loop_id {
            let end = self.cfg.loop_info(lp).end;
            if let Some(o) = out {
                if o != end {
                    self.insert_continue_in_switch(block, o, end);
                }
            }
        }

        let mut switch_region = SwitchRegion {
            header: block,
            cases: Vec::with_capacity(blocks_map.len()),
            default: None,
        };

        if let Some(default) = default_target {
            if !stack.contains_exit(default) {
                let default_region = self.make_region(Some(default), stack)?;
                if default_region.has_insns(self.cfg) {
                    switch_region.default = Some(default_region);
                }
            }
        }

        for (case_block, case_keys) in blocks_map {
            if stack.contains_exit(case_block) {
                // empty case
                switch_region.cases.push(SwitchCase {
                    keys: case_keys,
                    region: Region::new(),
                    fall_through: false,
                });
                continue;
            }
            let next = fall_through_cases.get(&case_block).copied();
            if let Some(n) = next {
                stack.add_exit(n);
            }
            let case_region = self.make_region(Some(case_block), stack)?;
            if let Some(n) = next {
                stack.remove_exit(n);
                self.cfg.block_mut(n).add_flag(BlockFlags::FALL_THROUGH);
            }
            switch_region.cases.push(SwitchCase {
                keys: case_keys,
                region: case_region,
                fall_through: next.is_some(),
            });
            // 'break' insertion for non-fallthrough cases happens in a
            // later emission pass
        }

        stack.pop();
        region.add(RegionNode::Switch(Box::new(switch_region)));
        Ok(out)
    }

    /// Inside a loop, case paths reaching the loop end without passing the
    /// out block need an explicit `continue` on their synthetic tail.
    fn insert_continue_in_switch(&mut self, block: BlockId, out: BlockId, end: BlockId) {
        let end_preds = self.cfg.predecessors(end).to_vec();
        let succs = self.cfg.clean_successors(block).to_vec();
        for &succ in &succs {
            if self.cfg.dom_frontier(succ).contains(&end) && succ != out {
                let dominated = self.cfg.collect_blocks_dominated_by(succ, succ);
                for &pred in &end_preds {
                    if dominated.contains(&pred) {
                        if self.cfg.block(pred).contains(BlockFlags::SYNTHETIC) {
                            self.cfg.block_mut(pred).push(Insn::continue_());
                        }
                        break;
                    }
                }
            }
        }
    }
}

/// True if the insertion order contradicts a fallthrough chain: every case
/// with a fallthrough must be immediately followed by its chain target.
fn is_bad_cases_order(
    blocks_map: &IndexMap<BlockId, Vec<i64>>,
    fall_through_cases: &IndexMap<BlockId, BlockId>,
) -> bool {
    let mut expected_next: Option<BlockId> = None;
    for &case_block in blocks_map.keys() {
        if let Some(next) = expected_next {
            if case_block != next {
                return true;
            }
        }
        expected_next = fall_through_cases.get(&case_block).copied();
    }
    expected_next.is_some()
}

/// Reorders cases so each fallthrough source immediately precedes its
/// target.
fn reorder_switch_cases(
    blocks_map: IndexMap<BlockId, Vec<i64>>,
    fall_through_cases: &IndexMap<BlockId, BlockId>,
) -> IndexMap<BlockId, Vec<i64>> {
    let mut order: Vec<BlockId> = blocks_map.keys().copied().collect();
    order.sort_by(|a, b| {
        use std::cmp::Ordering;
        if fall_through_cases.get(a) == Some(b) {
            Ordering::Less
        } else if fall_through_cases.get(b) == Some(a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    });
    let mut blocks_map = blocks_map;
    let mut reordered = IndexMap::with_capacity(blocks_map.len());
    for key in order {
        if let Some(keys) = blocks_map.shift_remove(&key) {
            reordered.insert(key, keys);
        }
    }
    reordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(u32, &[i64])]) -> IndexMap<BlockId, Vec<i64>> {
        entries
            .iter()
            .map(|&(b, keys)| (BlockId::new(b), keys.to_vec()))
            .collect()
    }

    #[test]
    fn test_good_cases_order() {
        let blocks = map(&[(1, &[1]), (2, &[2]), (3, &[3])]);
        let mut fallthrough = IndexMap::new();
        fallthrough.insert(BlockId::new(1), BlockId::new(2));
        assert!(!is_bad_cases_order(&blocks, &fallthrough));
    }

    #[test]
    fn test_bad_cases_order_detected_and_fixed() {
        // 1 falls through to 2 but was emitted after it
        let blocks = map(&[(2, &[2]), (1, &[1])]);
        let mut fallthrough = IndexMap::new();
        fallthrough.insert(BlockId::new(1), BlockId::new(2));
        assert!(is_bad_cases_order(&blocks, &fallthrough));

        let fixed = reorder_switch_cases(blocks, &fallthrough);
        assert!(!is_bad_cases_order(&fixed, &fallthrough));
        let order: Vec<BlockId> = fixed.keys().copied().collect();
        assert_eq!(order, vec![BlockId::new(1), BlockId::new(2)]);
    }

    #[test]
    fn test_trailing_fallthrough_is_bad() {
        // the last case cannot fall through to anything
        let blocks = map(&[(1, &[1]), (2, &[2])]);
        let mut fallthrough = IndexMap::new();
        fallthrough.insert(BlockId::new(2), BlockId::new(9));
        assert!(is_bad_cases_order(&blocks, &fallthrough));
    }
}
