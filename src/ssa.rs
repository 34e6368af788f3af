//! SSA reconstruction after copy insertion.
//!
//! When a pass materialises copies of a value, downstream users must be
//! rewired to read from whichever definition reaches them.  The environment
//! collects the copies, then [SsaReconstruction::fix_users] walks the users
//! of the original value and redirects each to the nearest dominating
//! definition.  Phi uses are resolved at the end of the corresponding
//! predecessor block.  Uses not dominated by any copy keep reading the
//! original; no new Phis are materialised.

use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::ir::{Block, Context, Function, Value};

pub struct SsaReconstruction {
    function: Function,
    defs: Vec<Value>,
}

impl SsaReconstruction {
    pub fn new(function: Function) -> SsaReconstruction {
        SsaReconstruction {
            function,
            defs: Vec::new(),
        }
    }

    pub fn add_copy(&mut self, def: Value) {
        self.defs.push(def);
    }

    pub fn add_copies(&mut self, defs: &[Value]) {
        self.defs.extend_from_slice(defs);
    }

    /// Rewires every user of `original` to the nearest dominating definition
    /// among the registered copies.
    pub fn fix_users(&self, context: &mut Context, original: Value) {
        let dom = BlockDominance::compute(context, self.function);

        for user in original.users(context) {
            if self.defs.contains(&user) {
                continue;
            }
            if user.is_phi(context) {
                // A phi reads its operand at the end of the predecessor.
                let args = match &context.values[user.0].instruction {
                    crate::ir::Instruction::Phi { args } => args.clone(),
                    _ => unreachable!(),
                };
                for (pred, val) in args {
                    if val != original {
                        continue;
                    }
                    if let Some(best) = self.nearest_def(context, &dom, pred, None) {
                        if best != original {
                            trace!(
                                "rerouting phi input of {} to {}",
                                user.describe(context),
                                best.describe(context)
                            );
                            user.set_phi_arg(context, pred, original, best);
                        }
                    }
                }
            } else {
                let use_block = user.block(context);
                let use_pos = match use_block.sched_pos(context, user.skip_proj(context)) {
                    Some(pos) => pos,
                    None => continue,
                };
                if let Some(best) = self.nearest_def(context, &dom, use_block, Some(use_pos)) {
                    if best != original {
                        trace!(
                            "rerouting {} to read {}",
                            user.describe(context),
                            best.describe(context)
                        );
                        user.replace_input(context, original, best);
                    }
                }
            }
        }
    }

    /// The registered definition closest above the use point, or `None` when
    /// no definition dominates it.  `use_pos` of `None` means the end of
    /// `use_block`.
    fn nearest_def(
        &self,
        context: &Context,
        dom: &BlockDominance,
        use_block: Block,
        use_pos: Option<usize>,
    ) -> Option<Value> {
        let mut best: Option<(usize, isize, Value)> = None;
        for def in &self.defs {
            let def_node = def.skip_proj(context);
            let def_block = def_node.block(context);
            // Unscheduled definitions (arguments) precede the whole block.
            let def_pos = def_block
                .sched_pos(context, def_node)
                .map_or(-1, |pos| pos as isize);

            let dominates = if def_block == use_block {
                use_pos.map_or(true, |upos| def_pos < upos as isize)
            } else {
                dom.strictly_dominates(def_block, use_block)
            };
            if !dominates {
                continue;
            }

            let depth = dom.depth(def_block);
            if best.map_or(true, |(bd, bp, _)| (depth, def_pos) > (bd, bp)) {
                best = Some((depth, def_pos, *def));
            }
        }
        best.map(|(_, _, def)| def)
    }
}

/// Dominator tree over a function's blocks.
struct BlockDominance {
    indices: FxHashMap<Block, NodeIndex>,
    dominators: Dominators<NodeIndex>,
    depths: FxHashMap<Block, usize>,
}

impl BlockDominance {
    fn compute(context: &Context, function: Function) -> BlockDominance {
        let mut graph: DiGraph<Block, ()> = DiGraph::new();
        let mut indices = FxHashMap::default();
        for block in function.block_iter(context) {
            indices.insert(block, graph.add_node(block));
        }
        for block in function.block_iter(context) {
            for succ in block.successors(context) {
                graph.add_edge(indices[&block], indices[&succ], ());
            }
        }
        let entry = indices[&function.entry_block(context)];
        let dominators = dominators::simple_fast(&graph, entry);

        let mut depths = FxHashMap::default();
        for block in function.block_iter(context) {
            let mut depth = 0;
            let mut at = indices[&block];
            while let Some(idom) = dominators.immediate_dominator(at) {
                depth += 1;
                at = idom;
            }
            depths.insert(block, depth);
        }

        BlockDominance {
            indices,
            dominators,
            depths,
        }
    }

    fn strictly_dominates(&self, a: Block, b: Block) -> bool {
        let a_idx = self.indices[&a];
        let mut at = self.indices[&b];
        while let Some(idom) = self.dominators.immediate_dominator(at) {
            if idom == a_idx {
                return true;
            }
            at = idom;
        }
        false
    }

    fn depth(&self, block: Block) -> usize {
        self.depths.get(&block).copied().unwrap_or(0)
    }
}
