//! End-to-end tests for the lowering passes, driving them over small
//! scheduled graphs and checking both the emitted node shapes and, via a
//! symbolic register simulation, the net permutation they realise.

use std::collections::HashMap;

use perm_lower::ir::printer;
use perm_lower::{
    assure_constraints, lower_nodes_after_ra, push_through_perm, Block, Context, Function,
    Liveness, RegClass, RegRequirement, Register, RegisterFile, Value,
};

struct Fixture {
    ctx: Context,
    func: Function,
    block: Block,
    class: RegClass,
}

fn fixture(n_regs: usize) -> Fixture {
    let mut file = RegisterFile::new();
    let names: Vec<String> = (0..n_regs).map(|i| format!("r{i}")).collect();
    let name_refs: Vec<&str> = names.iter().map(|name| name.as_str()).collect();
    let class = file.add_class("gpr", &name_refs);
    let mut ctx = Context::new(file);
    let func = Function::new(&mut ctx, "test");
    let block = func.entry_block(&ctx);
    Fixture {
        ctx,
        func,
        block,
        class,
    }
}

fn reg(class: RegClass, index: usize) -> Register {
    Register { class, index }
}

/// A producer occupying `reg_index`.  Marked as touching CPU flags so the
/// push-through optimiser leaves it alone; scenarios about push-through
/// build their candidates without this.
fn producer(fx: &mut Fixture, opcode: &str, reg_index: usize) -> Value {
    let val = fx.block.ins(&mut fx.ctx).op(opcode, &[]);
    val.set_register(&mut fx.ctx, reg(fx.class, reg_index));
    val.set_modifies_flags(&mut fx.ctx, true);
    val
}

/// Builds a Perm over `inputs` whose slot `i` writes register `out_regs[i]`,
/// and returns the Perm and its Projs.
fn build_perm(fx: &mut Fixture, inputs: &[Value], out_regs: &[usize]) -> (Value, Vec<Value>) {
    let perm = fx.block.ins(&mut fx.ctx).perm(inputs);
    let projs = out_regs
        .iter()
        .enumerate()
        .map(|(i, out)| {
            let proj = fx.block.ins(&mut fx.ctx).proj(perm, i);
            proj.set_register(&mut fx.ctx, reg(fx.class, *out));
            proj
        })
        .collect();
    (perm, projs)
}

fn scheduled(ctx: &Context, block: Block) -> Vec<Value> {
    block.sched_iter(ctx).collect()
}

fn scheduled_copies(ctx: &Context, block: Block) -> Vec<Value> {
    scheduled(ctx, block)
        .into_iter()
        .filter(|node| node.is_copy(ctx))
        .collect()
}

fn scheduled_perms(ctx: &Context, block: Block) -> Vec<Value> {
    scheduled(ctx, block)
        .into_iter()
        .filter(|node| node.is_perm(ctx))
        .collect()
}

/// Executes the block's schedule over symbolic register contents.  Producers
/// write their opcode name, copies move contents, Perms permute them.
fn simulate(ctx: &Context, block: Block) -> HashMap<(usize, usize), String> {
    let mut regs: HashMap<(usize, usize), String> = HashMap::new();
    let key = |r: Register| (r.class.0, r.index);
    for node in block.sched_iter(ctx) {
        if node.is_perm(ctx) {
            let snapshot = regs.clone();
            for proj in node.users(ctx) {
                let pn = proj.proj_index(ctx);
                let in_reg = node.input(ctx, pn).register(ctx).unwrap();
                let out_reg = proj.register(ctx).unwrap();
                let content = snapshot
                    .get(&key(in_reg))
                    .unwrap_or_else(|| panic!("perm reads undefined register {in_reg}"))
                    .clone();
                regs.insert(key(out_reg), content);
            }
        } else if node.is_copy(ctx) {
            let src = node.input(ctx, 0).register(ctx).unwrap();
            let dst = node.register(ctx).unwrap();
            let content = regs
                .get(&key(src))
                .unwrap_or_else(|| panic!("copy reads undefined register {src}"))
                .clone();
            regs.insert(key(dst), content);
        } else if let Some(defined) = node.register(ctx) {
            regs.insert(key(defined), node.opcode_name(ctx).to_owned());
        }
    }
    regs
}

fn content<'a>(regs: &'a HashMap<(usize, usize), String>, class: RegClass, index: usize) -> &'a str {
    regs[&(class.0, index)].as_str()
}

// -------------------------------------------------------------------------
// Perm lowering scenarios.

#[test]
fn pure_swap_perm_survives() {
    let mut fx = fixture(4);
    let a = producer(&mut fx, "lda", 1);
    let b = producer(&mut fx, "ldb", 2);
    let (perm, projs) = build_perm(&mut fx, &[a, b], &[2, 1]);
    let _store = fx.block.ins(&mut fx.ctx).branch("st", &[projs[0], projs[1]], &[]);
    fx.block.ins(&mut fx.ctx).branch("ret", &[], &[]);

    lower_nodes_after_ra(&mut fx.ctx, fx.func).unwrap();

    let perms = scheduled_perms(&fx.ctx, fx.block);
    assert_eq!(perms, vec![perm]);
    assert_eq!(perm.arity(&fx.ctx), 2);
    assert!(scheduled_copies(&fx.ctx, fx.block).is_empty());

    let regs = simulate(&fx.ctx, fx.block);
    assert_eq!(content(&regs, fx.class, 2), "lda");
    assert_eq!(content(&regs, fx.class, 1), "ldb");
}

#[test]
fn three_cycle_with_scratch_register_becomes_copies() {
    let mut fx = fixture(4);
    let a = producer(&mut fx, "lda", 0);
    let b = producer(&mut fx, "ldb", 1);
    let c = producer(&mut fx, "ldc", 2);
    // a: r0 -> r1, b: r1 -> r2, c: r2 -> r0; r3 stays free.
    let (_perm, projs) = build_perm(&mut fx, &[a, b, c], &[1, 2, 0]);
    let _store = fx
        .block
        .ins(&mut fx.ctx)
        .branch("st", &[projs[0], projs[1], projs[2]], &[]);
    fx.block.ins(&mut fx.ctx).branch("ret", &[], &[]);

    lower_nodes_after_ra(&mut fx.ctx, fx.func).unwrap();

    assert!(scheduled_perms(&fx.ctx, fx.block).is_empty());
    let copies = scheduled_copies(&fx.ctx, fx.block);
    assert_eq!(copies.len(), 4);
    // The first copy saves into the scratch register, the last restores
    // from it.
    let first = copies.first().unwrap();
    assert_eq!(first.register(&fx.ctx), Some(reg(fx.class, 3)));
    let last = copies.last().unwrap();
    assert_eq!(last.input(&fx.ctx, 0), *first);

    let regs = simulate(&fx.ctx, fx.block);
    assert_eq!(content(&regs, fx.class, 1), "lda");
    assert_eq!(content(&regs, fx.class, 2), "ldb");
    assert_eq!(content(&regs, fx.class, 0), "ldc");
}

#[test]
fn three_cycle_without_scratch_register_becomes_swaps() {
    let mut fx = fixture(3);
    let a = producer(&mut fx, "lda", 0);
    let b = producer(&mut fx, "ldb", 1);
    let c = producer(&mut fx, "ldc", 2);
    let (perm, projs) = build_perm(&mut fx, &[a, b, c], &[1, 2, 0]);
    let _store = fx
        .block
        .ins(&mut fx.ctx)
        .branch("st", &[projs[0], projs[1], projs[2]], &[]);
    fx.block.ins(&mut fx.ctx).branch("ret", &[], &[]);

    lower_nodes_after_ra(&mut fx.ctx, fx.func).unwrap();

    let swaps = scheduled_perms(&fx.ctx, fx.block);
    assert_eq!(swaps.len(), 2);
    assert!(!swaps.contains(&perm));
    for swap in &swaps {
        assert_eq!(swap.arity(&fx.ctx), 2);
        assert_eq!(swap.users(&fx.ctx).len(), 2);
    }
    assert!(scheduled_copies(&fx.ctx, fx.block).is_empty());

    let regs = simulate(&fx.ctx, fx.block);
    assert_eq!(content(&regs, fx.class, 1), "lda");
    assert_eq!(content(&regs, fx.class, 2), "ldb");
    assert_eq!(content(&regs, fx.class, 0), "ldc");
}

#[test]
fn chain_becomes_copies_from_the_open_end() {
    let mut fx = fixture(4);
    let a = producer(&mut fx, "lda", 1);
    let b = producer(&mut fx, "ldb", 2);
    // a: r1 -> r2, b: r2 -> r3; r1 is left behind.
    let (_perm, projs) = build_perm(&mut fx, &[a, b], &[2, 3]);
    let _store = fx.block.ins(&mut fx.ctx).branch("st", &[projs[0], projs[1]], &[]);
    fx.block.ins(&mut fx.ctx).branch("ret", &[], &[]);

    lower_nodes_after_ra(&mut fx.ctx, fx.func).unwrap();

    assert!(scheduled_perms(&fx.ctx, fx.block).is_empty());
    let copies = scheduled_copies(&fx.ctx, fx.block);
    assert_eq!(copies.len(), 2);
    // Tail first: copy b into r3, then a into r2.
    assert_eq!(copies[0].input(&fx.ctx, 0), b);
    assert_eq!(copies[0].register(&fx.ctx), Some(reg(fx.class, 3)));
    assert_eq!(copies[1].input(&fx.ctx, 0), a);
    assert_eq!(copies[1].register(&fx.ctx), Some(reg(fx.class, 2)));

    let regs = simulate(&fx.ctx, fx.block);
    assert_eq!(content(&regs, fx.class, 2), "lda");
    assert_eq!(content(&regs, fx.class, 3), "ldb");
}

#[test]
fn identity_perm_vanishes_without_a_trace() {
    let mut fx = fixture(4);
    let a = producer(&mut fx, "lda", 1);
    let b = producer(&mut fx, "ldb", 2);
    let (perm, projs) = build_perm(&mut fx, &[a, b], &[1, 2]);
    let store = fx.block.ins(&mut fx.ctx).branch("st", &[projs[0], projs[1]], &[]);
    fx.block.ins(&mut fx.ctx).branch("ret", &[], &[]);
    let before = scheduled(&fx.ctx, fx.block).len();

    lower_nodes_after_ra(&mut fx.ctx, fx.func).unwrap();

    assert!(scheduled_perms(&fx.ctx, fx.block).is_empty());
    assert!(scheduled_copies(&fx.ctx, fx.block).is_empty());
    assert_eq!(scheduled(&fx.ctx, fx.block).len(), before - 1);
    assert!(!scheduled(&fx.ctx, fx.block).contains(&perm));
    // The store reads the original producers directly.
    assert_eq!(store.input(&fx.ctx, 0), a);
    assert_eq!(store.input(&fx.ctx, 1), b);
}

#[test]
fn mixed_cycle_and_chain_in_one_perm() {
    let mut fx = fixture(4);
    let a = producer(&mut fx, "lda", 0);
    let b = producer(&mut fx, "ldb", 1);
    let c = producer(&mut fx, "ldc", 2);
    // Swap r0 and r1, move r2 to r3.
    let (perm, projs) = build_perm(&mut fx, &[a, b, c], &[1, 0, 3]);
    let _store = fx
        .block
        .ins(&mut fx.ctx)
        .branch("st", &[projs[0], projs[1], projs[2]], &[]);
    fx.block.ins(&mut fx.ctx).branch("ret", &[], &[]);

    lower_nodes_after_ra(&mut fx.ctx, fx.func).unwrap();

    let swaps = scheduled_perms(&fx.ctx, fx.block);
    assert_eq!(swaps.len(), 1);
    assert!(!swaps.contains(&perm));
    assert_eq!(scheduled_copies(&fx.ctx, fx.block).len(), 1);

    let regs = simulate(&fx.ctx, fx.block);
    assert_eq!(content(&regs, fx.class, 1), "lda");
    assert_eq!(content(&regs, fx.class, 0), "ldb");
    assert_eq!(content(&regs, fx.class, 3), "ldc");
}

#[test]
fn lowering_twice_is_a_no_op() {
    let mut fx = fixture(3);
    let a = producer(&mut fx, "lda", 0);
    let b = producer(&mut fx, "ldb", 1);
    let c = producer(&mut fx, "ldc", 2);
    let (_perm, projs) = build_perm(&mut fx, &[a, b, c], &[1, 2, 0]);
    let _store = fx
        .block
        .ins(&mut fx.ctx)
        .branch("st", &[projs[0], projs[1], projs[2]], &[]);
    fx.block.ins(&mut fx.ctx).branch("ret", &[], &[]);

    lower_nodes_after_ra(&mut fx.ctx, fx.func).unwrap();
    let after_first = printer::function_to_string(&fx.ctx, fx.func);

    lower_nodes_after_ra(&mut fx.ctx, fx.func).unwrap();
    let after_second = printer::function_to_string(&fx.ctx, fx.func);

    assert_eq!(after_first, after_second);
}

// -------------------------------------------------------------------------
// Push-through.

#[test]
fn push_through_absorbs_single_producer_perm() {
    let mut file = RegisterFile::new();
    let gpr = file.add_class("gpr", &["r0", "r1", "r2", "r3"]);
    let addr = file.add_class("addr", &["a0", "a1"]);
    let mut ctx = Context::new(file);
    let func = Function::new(&mut ctx, "test");
    let block = func.entry_block(&ctx);

    let base = block.ins(&mut ctx).op("lea", &[]);
    base.set_register(&mut ctx, Register { class: addr, index: 0 });
    let n = block.ins(&mut ctx).op("inc", &[base]);
    n.set_register(&mut ctx, Register { class: gpr, index: 1 });
    let perm = block.ins(&mut ctx).perm(&[n]);
    let proj = block.ins(&mut ctx).proj(perm, 0);
    proj.set_register(&mut ctx, Register { class: gpr, index: 2 });
    let store = block.ins(&mut ctx).branch("st", &[proj], &[]);
    block.ins(&mut ctx).branch("ret", &[], &[]);

    let liveness = Liveness::compute(&ctx, func);
    let stayed = push_through_perm(&mut ctx, &liveness, perm).unwrap();

    assert!(!stayed);
    let nodes = scheduled(&ctx, block);
    assert!(!nodes.contains(&perm));
    // The producer took over the proj's register and its place after the
    // (now gone) Perm.
    assert_eq!(n.register(&ctx), Some(Register { class: gpr, index: 2 }));
    assert_eq!(store.input(&ctx, 0), n);
    assert!(block.sched_prev(&ctx, n) == Some(base));
}

#[test]
fn push_through_shrinks_perm_and_renumbers_projs() {
    let mut file = RegisterFile::new();
    let gpr = file.add_class("gpr", &["r0", "r1", "r2", "r3"]);
    let addr = file.add_class("addr", &["a0", "a1"]);
    let mut ctx = Context::new(file);
    let func = Function::new(&mut ctx, "test");
    let block = func.entry_block(&ctx);

    // `a` must stay (it touches flags), `n` is movable.
    let a = block.ins(&mut ctx).op("lda", &[]);
    a.set_register(&mut ctx, Register { class: gpr, index: 0 });
    a.set_modifies_flags(&mut ctx, true);
    let base = block.ins(&mut ctx).op("lea", &[]);
    base.set_register(&mut ctx, Register { class: addr, index: 0 });
    let n = block.ins(&mut ctx).op("inc", &[base]);
    n.set_register(&mut ctx, Register { class: gpr, index: 1 });

    let perm = block.ins(&mut ctx).perm(&[a, n]);
    let proj_a = block.ins(&mut ctx).proj(perm, 0);
    proj_a.set_register(&mut ctx, Register { class: gpr, index: 2 });
    let proj_n = block.ins(&mut ctx).proj(perm, 1);
    proj_n.set_register(&mut ctx, Register { class: gpr, index: 3 });
    let store = block.ins(&mut ctx).branch("st", &[proj_a, proj_n], &[]);
    block.ins(&mut ctx).branch("ret", &[], &[]);

    let liveness = Liveness::compute(&ctx, func);
    let stayed = push_through_perm(&mut ctx, &liveness, perm).unwrap();

    assert!(stayed);
    assert_eq!(perm.arity(&ctx), 1);
    assert_eq!(perm.input(&ctx, 0), a);
    assert_eq!(proj_a.proj_index(&ctx), 0);
    assert_eq!(n.register(&ctx), Some(Register { class: gpr, index: 3 }));
    assert_eq!(store.input(&ctx, 1), n);
}

#[test]
fn driver_lowers_what_push_through_leaves() {
    // Same shape as above, but run the whole driver: the shrunk perm is a
    // single-slot move realised as one copy.
    let mut file = RegisterFile::new();
    let gpr = file.add_class("gpr", &["r0", "r1", "r2", "r3"]);
    let addr = file.add_class("addr", &["a0", "a1"]);
    let mut ctx = Context::new(file);
    let func = Function::new(&mut ctx, "test");
    let block = func.entry_block(&ctx);

    let a = block.ins(&mut ctx).op("lda", &[]);
    a.set_register(&mut ctx, Register { class: gpr, index: 0 });
    a.set_modifies_flags(&mut ctx, true);
    let base = block.ins(&mut ctx).op("lea", &[]);
    base.set_register(&mut ctx, Register { class: addr, index: 0 });
    let n = block.ins(&mut ctx).op("inc", &[base]);
    n.set_register(&mut ctx, Register { class: gpr, index: 1 });

    let perm = block.ins(&mut ctx).perm(&[a, n]);
    let proj_a = block.ins(&mut ctx).proj(perm, 0);
    proj_a.set_register(&mut ctx, Register { class: gpr, index: 2 });
    let proj_n = block.ins(&mut ctx).proj(perm, 1);
    proj_n.set_register(&mut ctx, Register { class: gpr, index: 3 });
    let store = block.ins(&mut ctx).branch("st", &[proj_a, proj_n], &[]);
    block.ins(&mut ctx).branch("ret", &[], &[]);

    lower_nodes_after_ra(&mut ctx, func).unwrap();

    assert!(scheduled_perms(&ctx, block).is_empty());
    let copies = scheduled_copies(&ctx, block);
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].input(&ctx, 0), a);
    assert_eq!(copies[0].register(&ctx), Some(Register { class: gpr, index: 2 }));
    assert_eq!(store.input(&ctx, 0), copies[0]);
    assert_eq!(store.input(&ctx, 1), n);
}

// -------------------------------------------------------------------------
// Constraint assurance.

#[test]
fn must_be_different_inserts_copy_and_keep() {
    let mut fx = fixture(4);
    let normal = RegRequirement::normal(fx.class);
    let a = fx.block.ins(&mut fx.ctx).op("lda", &[]);
    a.set_requirement(&mut fx.ctx, normal.clone());
    let b = fx.block.ins(&mut fx.ctx).op("ldb", &[]);
    b.set_requirement(&mut fx.ctx, normal.clone());

    let n = fx.block.ins(&mut fx.ctx).op("sub", &[a, b]);
    let mut req = RegRequirement::normal(fx.class);
    req.other_different = 0b01;
    n.set_requirement(&mut fx.ctx, req);

    let later = fx.block.ins(&mut fx.ctx).op("use", &[a]);
    later.set_requirement(&mut fx.ctx, normal);
    fx.block.ins(&mut fx.ctx).branch("ret", &[n, later], &[]);

    assure_constraints(&mut fx.ctx, fx.func).unwrap();

    // A non-spillable copy of `a` sits right before `n`.
    let cpy = fx.block.sched_prev(&fx.ctx, n).unwrap();
    assert!(cpy.is_copy(&fx.ctx));
    assert!(cpy.dont_spill(&fx.ctx));
    assert_eq!(cpy.input(&fx.ctx, 0), a);

    // A CopyKeep of the copy, keeping `n`, sits right after `n`.
    let keep = fx.block.sched_next(&fx.ctx, n).unwrap();
    assert!(keep.is_copy_keep(&fx.ctx));
    assert_eq!(keep.input(&fx.ctx, 0), cpy);
    assert_eq!(keep.input(&fx.ctx, 1), n);

    // SSA repair: the constrained node and everything below it read from
    // the nearest dominating copy.
    assert_eq!(n.input(&fx.ctx, 0), cpy);
    assert_eq!(later.input(&fx.ctx, 0), keep);
}

#[test]
fn matching_should_be_same_mask_skips_the_pattern() {
    let mut fx = fixture(4);
    let a = fx.block.ins(&mut fx.ctx).op("lda", &[]);
    a.set_requirement(&mut fx.ctx, RegRequirement::normal(fx.class));

    // Result must differ from input 0 but should also equal input 0's
    // register source: both masks select the same node, so nothing to do.
    let n = fx.block.ins(&mut fx.ctx).op("neg", &[a, a]);
    let mut req = RegRequirement::normal(fx.class);
    req.other_different = 0b01;
    req.other_same = 0b10;
    n.set_requirement(&mut fx.ctx, req);
    fx.block.ins(&mut fx.ctx).branch("ret", &[n], &[]);
    let before = scheduled(&fx.ctx, fx.block).len();

    assure_constraints(&mut fx.ctx, fx.func).unwrap();

    assert_eq!(scheduled(&fx.ctx, fx.block).len(), before);
}

#[test]
fn copykeeps_of_one_tuple_parent_are_melted() {
    let mut fx = fixture(4);
    let normal = RegRequirement::normal(fx.class);
    let a = fx.block.ins(&mut fx.ctx).op("lda", &[]);
    a.set_requirement(&mut fx.ctx, normal.clone());

    // A two-result node; both results must differ from `a`.
    let pair = fx.block.ins(&mut fx.ctx).tuple_op("divmod", &[a, a]);
    let quot = fx.block.ins(&mut fx.ctx).proj(pair, 0);
    let rem = fx.block.ins(&mut fx.ctx).proj(pair, 1);
    for proj in [quot, rem] {
        let mut req = RegRequirement::normal(fx.class);
        req.other_different = 0b01;
        proj.set_requirement(&mut fx.ctx, req);
    }
    let use_all = fx.block.ins(&mut fx.ctx).op("st", &[quot, rem, a]);
    fx.block.ins(&mut fx.ctx).branch("ret", &[use_all], &[]);

    assure_constraints(&mut fx.ctx, fx.func).unwrap();

    // One melted CopyKeep keeps both projections alive.
    let keeps: Vec<Value> = scheduled(&fx.ctx, fx.block)
        .into_iter()
        .filter(|node| node.is_copy_keep(&fx.ctx))
        .collect();
    assert_eq!(keeps.len(), 1);
    let kept = keeps[0].inputs(&fx.ctx);
    assert!(kept.contains(&quot));
    assert!(kept.contains(&rem));
}
