//! Exception handler region building.
//!
//! Handler regions are built after the main region tree, scoped by exits
//! computed from the splitter blocks' path crosses with the handlers.

use std::collections::BTreeSet;

use log::debug;

use unbraid_core::{BlockFlags, BlockId, BlockSet, HandlerId, TryId};

use crate::region::{HandlerRegion, Region, RegionNode};
use crate::region_stack::RegionStack;
use crate::structurer::Structurer;
use crate::StructureError;

impl Structurer<'_> {
    /// Builds a region for every exception handler, then collects handler
    /// successors not covered by any region into a supplementary region.
    pub(crate) fn process_try_catch_blocks(
        &mut self,
        method_region: &Region,
    ) -> Result<(Vec<HandlerRegion>, Option<Region>), StructureError> {
        let try_ids: BTreeSet<TryId> = self
            .cfg
            .exception_handlers()
            .iter()
            .map(|h| h.try_id)
            .collect();

        let mut handler_regions = Vec::new();
        for try_id in try_ids {
            let handler_ids = self.cfg.try_catch(try_id).handlers.clone();

            let mut handler_blocks = Vec::with_capacity(handler_ids.len());
            let mut splitters = BlockSet::new();
            for &id in &handler_ids {
                match self.cfg.handler(id).handler_block {
                    Some(start) => {
                        handler_blocks.push(start);
                        splitters.extend(self.cfg.predecessors(start).iter().copied());
                    }
                    None => debug!("no exception handler block for handler {}", id.0),
                }
            }

            let mut exits = BlockSet::new();
            for &splitter in &splitters {
                for &handler_block in &handler_blocks {
                    if self.cfg.block(handler_block).contains(BlockFlags::REMOVE) {
                        continue;
                    }
                    let Some(&first_succ) = self.cfg.successors(splitter).first() else {
                        debug!("no successors for splitter: {splitter}");
                        continue;
                    };
                    if let Some(cross) = self.cfg.path_cross(first_succ, handler_block) {
                        if cross != first_succ && cross != handler_block {
                            exits.insert(cross);
                        }
                    }
                }
            }

            for &id in &handler_ids {
                if let Some(built) = self.process_exc_handler(id, &exits, method_region)? {
                    handler_regions.push(built);
                }
            }
        }
        let exc_out = self.process_handlers_out_blocks(method_region, &handler_regions)?;
        Ok((handler_regions, exc_out))
    }

    fn process_exc_handler(
        &mut self,
        handler_id: HandlerId,
        exits: &BlockSet,
        method_region: &Region,
    ) -> Result<Option<HandlerRegion>, StructureError> {
        let handler = self.cfg.handler(handler_id).clone();
        let Some(start) = handler.handler_block else {
            return Ok(None);
        };
        let mut stack = RegionStack::new();
        let dominator = if handler.is_finally {
            // a finally handler is scoped from its splitter
            let Some(splitter) = handler.splitter else {
                return Ok(None);
            };
            splitter
        } else {
            stack.add_exits(exits.iter().copied());
            start
        };
        if self.cfg.block(dominator).contains(BlockFlags::REMOVE) {
            return Ok(None);
        }

        let frontier: Vec<BlockId> = self.cfg.dom_frontier(dominator).iter().copied().collect();
        let in_loop = self.cfg.loop_for_block(start).is_some();
        for exit in frontier {
            if (!in_loop || self.cfg.is_path_exists(start, exit))
                && method_region.contains_block(exit)
            {
                stack.add_exit(exit);
            }
        }

        let region = self.make_region(Some(start), &mut stack)?;
        if !self.cfg.block(start).contains(BlockFlags::EXC_HANDLER) {
            self.cfg.add_warn(format!(
                "missing exception handler attribute for start block: {start}"
            ));
        }
        Ok(Some(HandlerRegion {
            handler: handler_id,
            region,
        }))
    }

    /// Builds regions for handler successor blocks not yet inside any
    /// region.
    fn process_handlers_out_blocks(
        &mut self,
        method_region: &Region,
        handler_regions: &[HandlerRegion],
    ) -> Result<Option<Region>, StructureError> {
        let mut covered = BlockSet::new();
        method_region.collect_blocks(&mut covered);

        let mut successor_blocks = BlockSet::new();
        for built in handler_regions {
            if let Some(last) = built.region.last_block() {
                successor_blocks.extend(self.cfg.successors(last).iter().copied());
            }
            built.region.collect_blocks(&mut covered);
        }
        successor_blocks.retain(|b| !covered.contains(b));
        if successor_blocks.is_empty() {
            return Ok(None);
        }

        let mut exc_out = Region::new();
        for block in successor_blocks {
            let mut stack = RegionStack::new();
            let built = self.make_region(Some(block), &mut stack)?;
            exc_out.add(RegionNode::Region(built));
        }
        Ok(Some(exc_out))
    }
}
