//! Block-level liveness for data values, plus the interference query the
//! lowering passes rely on.
//!
//! Computed once per entry-point invocation and dropped when the pass
//! returns; callers must not hold it across graph edits they make
//! themselves.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{Block, Context, Function, Instruction, Mode, Value};

pub struct Liveness {
    live_in: FxHashMap<Block, FxHashSet<Value>>,
    live_out: FxHashMap<Block, FxHashSet<Value>>,
}

impl Liveness {
    pub fn compute(context: &Context, function: Function) -> Liveness {
        let blocks: Vec<Block> = function.block_iter(context).collect();

        // Per-block upward exposed uses and definitions.
        let mut gens: FxHashMap<Block, FxHashSet<Value>> = FxHashMap::default();
        let mut defs: FxHashMap<Block, FxHashSet<Value>> = FxHashMap::default();
        for block in &blocks {
            let (gen, def) = block_locals(context, *block);
            gens.insert(*block, gen);
            defs.insert(*block, def);
        }

        let mut live_in: FxHashMap<Block, FxHashSet<Value>> = FxHashMap::default();
        let mut live_out: FxHashMap<Block, FxHashSet<Value>> = FxHashMap::default();
        for block in &blocks {
            live_in.insert(*block, FxHashSet::default());
            live_out.insert(*block, FxHashSet::default());
        }

        let mut changed = true;
        while changed {
            changed = false;
            for block in blocks.iter().rev() {
                let mut out_set: FxHashSet<Value> = FxHashSet::default();
                for succ in block.successors(context) {
                    for node in succ.sched_iter(context) {
                        if !node.is_phi(context) {
                            break;
                        }
                        // A Phi operand is live out of the matching
                        // predecessor, not in the Phi's own block.
                        if let Instruction::Phi { args } = &context.values[node.0].instruction {
                            for (pred, val) in args {
                                if pred == block && val.mode(context).is_data() {
                                    out_set.insert(*val);
                                }
                            }
                        }
                    }
                    if let Some(succ_in) = live_in.get(&succ) {
                        let succ_phi_defs: FxHashSet<Value> = succ
                            .sched_iter(context)
                            .take_while(|node| node.is_phi(context))
                            .collect();
                        out_set.extend(succ_in.iter().filter(|v| !succ_phi_defs.contains(*v)));
                    }
                }

                let mut in_set = gens[block].clone();
                in_set.extend(out_set.iter().filter(|v| !defs[block].contains(*v)));

                if out_set != live_out[block] {
                    live_out.insert(*block, out_set);
                    changed = true;
                }
                if in_set != live_in[block] {
                    live_in.insert(*block, in_set);
                    changed = true;
                }
            }
        }

        Liveness { live_in, live_out }
    }

    /// The values live on exit of `block`.
    pub fn live_out(&self, block: Block) -> &FxHashSet<Value> {
        self.live_out
            .get(&block)
            .expect("liveness queried for a block outside the computed function")
    }

    pub fn live_in(&self, block: Block) -> &FxHashSet<Value> {
        self.live_in
            .get(&block)
            .expect("liveness queried for a block outside the computed function")
    }

    /// True iff `v` is live immediately after `point` executes.
    pub fn is_live_at(&self, context: &Context, v: Value, point: Value) -> bool {
        let block = point.block(context);
        let point_pos = match block.sched_pos(context, point) {
            Some(pos) => pos,
            None => return false,
        };

        let defined_before = self
            .live_in
            .get(&block)
            .map_or(false, |in_set| in_set.contains(&v))
            || match def_sched_node(context, v) {
                // Arguments are defined at function entry.
                None => v.block(context) == block,
                Some(def) => {
                    def.block(context) == block
                        && block
                            .sched_pos(context, def)
                            .map_or(false, |def_pos| def_pos <= point_pos)
                }
            };
        if !defined_before {
            return false;
        }

        if self
            .live_out
            .get(&block)
            .map_or(false, |out_set| out_set.contains(&v))
        {
            return true;
        }
        v.users(context).iter().any(|user| {
            !user.is_phi(context)
                && user.block(context) == block
                && block
                    .sched_pos(context, *user)
                    .map_or(false, |user_pos| user_pos > point_pos)
        })
    }

    /// Two values interfere iff one is live at the other's definition.
    pub fn values_interfere(&self, context: &Context, a: Value, b: Value) -> bool {
        if a == b {
            return false;
        }
        if let Some(b_def) = def_sched_node(context, b) {
            if self.is_live_at(context, a, b_def) {
                return true;
            }
        }
        if let Some(a_def) = def_sched_node(context, a) {
            if self.is_live_at(context, b, a_def) {
                return true;
            }
        }
        false
    }
}

/// The scheduled node defining `v`: its Proj parent for tuple results, `v`
/// itself otherwise, `None` for function arguments.
fn def_sched_node(context: &Context, v: Value) -> Option<Value> {
    let def = v.skip_proj(context);
    match context.values[def.0].instruction {
        Instruction::Argument => None,
        _ => Some(def),
    }
}

/// Upward-exposed uses and definitions of one block.
fn block_locals(context: &Context, block: Block) -> (FxHashSet<Value>, FxHashSet<Value>) {
    let mut gen = FxHashSet::default();
    let mut defined = FxHashSet::default();
    for node in block.sched_iter(context) {
        if node.is_phi(context) {
            defined.insert(node);
            continue;
        }
        for input in node.inputs(context) {
            if input.mode(context).is_data() && !defined.contains(&input) {
                gen.insert(input);
            }
        }
        match node.mode(context) {
            Mode::Data => {
                defined.insert(node);
            }
            Mode::Tuple => {
                for user in node.users(context) {
                    if user.is_proj(context) && user.mode(context).is_data() {
                        defined.insert(user);
                    }
                }
            }
            Mode::Control => (),
        }
    }
    (gen, defined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterFile;
    use crate::ir::Function;

    fn new_context() -> Context {
        let mut file = RegisterFile::new();
        file.add_class("gpr", &["r0", "r1", "r2", "r3"]);
        Context::new(file)
    }

    #[test]
    fn value_dies_at_last_use() {
        let mut ctx = new_context();
        let func = Function::new(&mut ctx, "f");
        let block = func.entry_block(&ctx);
        let a = block.ins(&mut ctx).op("lda", &[]);
        let b = block.ins(&mut ctx).op("ldb", &[]);
        let sum = block.ins(&mut ctx).op("add", &[a, b]);
        let double = block.ins(&mut ctx).op("add", &[sum, sum]);
        block.ins(&mut ctx).branch("ret", &[double], &[]);

        let lv = Liveness::compute(&ctx, func);
        assert!(lv.is_live_at(&ctx, a, b));
        assert!(!lv.is_live_at(&ctx, a, sum));
        assert!(lv.is_live_at(&ctx, sum, sum));
        assert!(!lv.is_live_at(&ctx, sum, double));
        assert!(lv.live_out(block).is_empty());
    }

    #[test]
    fn interference_requires_overlap() {
        let mut ctx = new_context();
        let func = Function::new(&mut ctx, "f");
        let block = func.entry_block(&ctx);
        let a = block.ins(&mut ctx).op("lda", &[]);
        let b = block.ins(&mut ctx).op("ldb", &[a]);
        let c = block.ins(&mut ctx).op("ldc", &[]);
        block.ins(&mut ctx).branch("ret", &[b, c], &[]);

        let lv = Liveness::compute(&ctx, func);
        // `a` dies producing `b`.
        assert!(!lv.values_interfere(&ctx, a, b));
        assert!(lv.values_interfere(&ctx, b, c));
    }

    #[test]
    fn live_across_blocks_and_phis() {
        let mut ctx = new_context();
        let func = Function::new(&mut ctx, "f");
        let entry = func.entry_block(&ctx);
        let left = func.create_block(&mut ctx, Some("left".into()));
        let join = func.create_block(&mut ctx, Some("join".into()));

        let a = entry.ins(&mut ctx).op("lda", &[]);
        let b = entry.ins(&mut ctx).op("ldb", &[]);
        entry.ins(&mut ctx).branch("jmp", &[], &[left]);
        let c = left.ins(&mut ctx).op("ldc", &[a]);
        left.ins(&mut ctx).branch("jmp", &[], &[join]);
        let phi = join.ins(&mut ctx).phi(&[(left, b)]);
        join.ins(&mut ctx).branch("ret", &[phi, c], &[]);

        let lv = Liveness::compute(&ctx, func);
        assert!(lv.live_out(entry).contains(&a));
        // `b` only feeds the phi: live out of `left`, not into `join`.
        assert!(lv.live_out(left).contains(&b));
        assert!(!lv.live_in(join).contains(&b));
        assert!(lv.live_in(join).contains(&c));
    }
}
