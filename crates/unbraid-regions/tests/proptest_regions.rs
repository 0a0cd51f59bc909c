//! Property-based tests for region building invariants.
//!
//! Random prepared CFGs are structured and the results checked against the
//! builder's contracts:
//! - every block appears in the region tree at most once
//! - loop attributes survive on their headers
//! - building is deterministic
//! - only the documented fatal errors ever surface

use proptest::prelude::*;
use std::collections::HashMap;

use unbraid_core::{BlockFlags, BlockId, Insn, MethodCfg};
use unbraid_regions::{Region, RegionNode, StructureError, Structurer};

// =============================================================================
// CFG generators
// =============================================================================

#[derive(Debug, Clone)]
struct CfgSpec {
    num_blocks: usize,
    /// Forward branch pairs per block: `(then, else)` offsets.
    branches: Vec<Option<(usize, usize)>>,
    /// Optional back edge per block (target offset below the block).
    back_edges: Vec<Option<usize>>,
}

/// Builds a prepared CFG from a spec.
///
/// Blocks branch only forward except for explicit back edges, and every
/// two-successor block ends with an `if` instruction, mirroring what the
/// earlier pipeline passes guarantee.
fn build_cfg(spec: &CfgSpec) -> MethodCfg {
    let n = spec.num_blocks;
    let mut cfg = MethodCfg::new();
    let blocks: Vec<BlockId> = (0..n).map(|_| cfg.add_block()).collect();

    for i in 0..n {
        let last = i == n - 1;
        if last {
            cfg.block_mut(blocks[i]).push(Insn::ret(None));
            continue;
        }
        match spec.branches[i] {
            Some((t_off, e_off)) => {
                let then_block = blocks[(i + 1 + t_off % (n - i - 1)).min(n - 1)];
                let else_block = blocks[(i + 1 + e_off % (n - i - 1)).min(n - 1)];
                if then_block != else_block {
                    cfg.block_mut(blocks[i]).push(Insn::if_(then_block, else_block));
                    cfg.add_edge(blocks[i], then_block);
                    cfg.add_edge(blocks[i], else_block);
                } else {
                    cfg.block_mut(blocks[i]).push(Insn::other());
                    cfg.add_edge(blocks[i], then_block);
                }
            }
            None => {
                cfg.block_mut(blocks[i]).push(Insn::other());
                cfg.add_edge(blocks[i], blocks[i + 1]);
                // back edges only on fallthrough blocks, keeping every
                // block at two successors like the real pipeline does
                if let Some(target_off) = spec.back_edges[i] {
                    let target = blocks[target_off % (i + 1)];
                    cfg.add_edge(blocks[i], target);
                }
            }
        }
    }
    cfg.prepare().unwrap();
    cfg
}

fn arb_cfg_spec(max_blocks: usize) -> impl Strategy<Value = CfgSpec> {
    (3..=max_blocks)
        .prop_flat_map(|num_blocks| {
            let branches = prop::collection::vec(
                prop::option::weighted(0.3, (0usize..8, 0usize..8)),
                num_blocks,
            );
            let back_edges = prop::collection::vec(
                prop::option::weighted(0.15, 0usize..8),
                num_blocks,
            );
            (Just(num_blocks), branches, back_edges)
        })
        .prop_map(|(num_blocks, branches, back_edges)| CfgSpec {
            num_blocks,
            branches,
            back_edges,
        })
}

// =============================================================================
// Helpers
// =============================================================================

fn count_blocks(region: &Region, counts: &mut HashMap<BlockId, usize>) {
    for node in &region.nodes {
        match node {
            RegionNode::Block(b) => *counts.entry(*b).or_default() += 1,
            RegionNode::Region(r) => count_blocks(r, counts),
            RegionNode::Loop(l) => count_blocks(&l.body, counts),
            RegionNode::If(i) => {
                count_blocks(&i.then_region, counts);
                if let Some(e) = &i.else_region {
                    count_blocks(e, counts);
                }
            }
            RegionNode::Switch(s) => {
                for case in &s.cases {
                    count_blocks(&case.region, counts);
                }
                if let Some(d) = &s.default {
                    count_blocks(d, counts);
                }
            }
            RegionNode::Sync(s) => count_blocks(&s.body, counts),
        }
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Structuring never panics; only the documented fatal errors appear.
    #[test]
    fn structuring_total(spec in arb_cfg_spec(12)) {
        let mut cfg = build_cfg(&spec);
        match Structurer::structure(&mut cfg) {
            Ok(_) => {}
            Err(StructureError::RegionsOverflow { .. })
            | Err(StructureError::StackOverflow)
            | Err(StructureError::MissingLoopExit { .. }) => {}
        }
    }

    /// Every block lands in the tree at most once.
    #[test]
    fn block_uniqueness(spec in arb_cfg_spec(12)) {
        let mut cfg = build_cfg(&spec);
        if let Ok(result) = Structurer::structure(&mut cfg) {
            let mut counts = HashMap::new();
            count_blocks(&result.region, &mut counts);
            if let Some(out) = &result.exc_out {
                count_blocks(out, &mut counts);
            }
            for (block, count) in counts {
                prop_assert_eq!(count, 1, "block {} appears {} times", block, count);
            }
        }
    }

    /// Loop attributes are reinstated on every header after building.
    #[test]
    fn loop_attrs_preserved(spec in arb_cfg_spec(12)) {
        let mut cfg = build_cfg(&spec);
        let headers: Vec<(BlockId, usize)> = cfg
            .block_ids()
            .filter(|&b| cfg.block(b).contains(BlockFlags::LOOP_START))
            .map(|b| (b, cfg.loop_attrs(b).len()))
            .collect();

        if Structurer::structure(&mut cfg).is_ok() {
            for (header, attrs_before) in headers {
                prop_assert_eq!(
                    cfg.loop_attrs(header).len(),
                    attrs_before,
                    "loop attrs lost on {}",
                    header
                );
            }
        }
    }

    /// Identical CFGs structure to identical trees.
    #[test]
    fn deterministic(spec in arb_cfg_spec(10)) {
        let mut cfg1 = build_cfg(&spec);
        let mut cfg2 = build_cfg(&spec);
        let r1 = Structurer::structure(&mut cfg1);
        let r2 = Structurer::structure(&mut cfg2);
        match (r1, r2) {
            (Ok(a), Ok(b)) => prop_assert_eq!(format!("{a:?}"), format!("{b:?}")),
            (Err(_), Err(_)) => {}
            other => prop_assert!(false, "diverging results: {:?}", other),
        }
    }

    /// Synthesized breaks always carry their loop and start inside it.
    #[test]
    fn break_edges_well_formed(spec in arb_cfg_spec(12)) {
        let mut cfg = build_cfg(&spec);
        if Structurer::structure(&mut cfg).is_ok() {
            for edge_insn in cfg.edge_insns() {
                if let unbraid_core::InsnKind::Break { loop_id, .. } = edge_insn.insn.kind {
                    let loop_info = cfg.loop_info(loop_id);
                    prop_assert!(
                        loop_info.contains(edge_insn.start)
                            || loop_info.exit_nodes.contains(&edge_insn.start)
                            || !loop_info.contains(edge_insn.end),
                        "break edge {} -> {} detached from its loop",
                        edge_insn.start,
                        edge_insn.end
                    );
                }
            }
        }
    }
}
