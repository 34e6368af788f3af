//! Rewrites one Perm into copies and swaps.

use tracing::{debug, trace};

use super::pairs::{
    build_register_pairs, decompose_move, n_unchecked, node_for_in_register,
    node_for_out_register, pair_idx_for_in, MoveKind, PermMove, RegPair,
};
use super::scratch::FreeRegisterMap;
use crate::{
    error::IrError,
    ir::{Context, Value},
    registers::Register,
};

/// Lowers `perm`: decomposes its register pairs into cycles and chains and
/// realises each as copies or binary swap Perms spliced in after the Perm's
/// schedule predecessor.  The Perm itself survives only when it already is a
/// plain two-element swap.
pub(crate) fn lower_perm_node(
    context: &mut Context,
    free_regs: &FreeRegisterMap,
    perm: Value,
) -> Result<(), IrError> {
    debug_assert!(perm.is_perm(context), "non-perm passed to lower_perm_node");

    let arity = perm.arity(context);
    let sched_point = perm
        .sched_prev(context)
        .ok_or_else(|| IrError::UnscheduledPerm(perm.describe(context)))?;
    debug!(
        "lowering {}, schedule point is {}",
        perm.describe(context),
        sched_point.describe(context)
    );

    let n_projs = perm.users(context).len();
    if arity != n_projs {
        return Err(IrError::PermArityMismatch(
            perm.describe(context),
            arity,
            n_projs,
        ));
    }

    let mut pairs = build_register_pairs(context, perm)?;
    debug!(
        "{} has {} unresolved register pairs",
        perm.describe(context),
        pairs.len()
    );

    let mut keep_perm = false;
    while n_unchecked(&pairs) > 0 {
        let start = pairs
            .iter()
            .position(|pair| !pair.checked)
            .expect("unchecked pair must exist");
        let mv = decompose_move(&mut pairs, start);
        trace!(
            "{}: {:?} over registers {:?}",
            perm.describe(context),
            mv.kind,
            mv.regs
                .iter()
                .map(|reg| context.registers().name(*reg))
                .collect::<Vec<_>>()
        );

        if mv.kind == MoveKind::Cycle && arity == 2 {
            // A two-input Perm already denotes an exchange; nothing to do.
            keep_perm = true;
        } else {
            reduce_perm_size(context, free_regs, perm, &mv, &mut pairs)?;
        }
    }

    if !keep_perm {
        let block = perm.block(context);
        block.remove(context, perm);
        perm.kill(context);
    }
    Ok(())
}

fn reduce_perm_size(
    context: &mut Context,
    free_regs: &FreeRegisterMap,
    perm: Value,
    mv: &PermMove,
    pairs: &mut [RegPair],
) -> Result<(), IrError> {
    match mv.kind {
        MoveKind::Cycle => match free_regs.get(perm) {
            Some(free_reg) if mv.regs.len() > 2 => {
                debug!(
                    "using register {} to implement a cycle of {}",
                    context.registers().name(free_reg),
                    perm.describe(context)
                );
                split_cycle_into_copies(context, perm, mv, pairs, free_reg)
            }
            _ => split_cycle_into_swaps(context, perm, mv, pairs),
        },
        MoveKind::Chain => split_chain_into_copies(context, perm, mv, pairs),
    }
}

/// A chain `[r0, …, rn-1]` becomes n-1 copies, emitted from the chain's open
/// end backwards so every source is read before it is overwritten.
fn split_chain_into_copies(
    context: &mut Context,
    perm: Value,
    mv: &PermMove,
    pairs: &mut [RegPair],
) -> Result<(), IrError> {
    debug_assert_eq!(mv.kind, MoveKind::Chain);
    let block = perm.block(context);
    let mut sched_point = perm
        .sched_prev(context)
        .ok_or_else(|| IrError::UnscheduledPerm(perm.describe(context)))?;

    for i in (0..mv.regs.len() - 1).rev() {
        let arg = in_node(context, perm, pairs, mv.regs[i])?;
        let res = out_node(context, perm, pairs, mv.regs[i + 1])?;

        trace!(
            "{}: copy ({}, {}) -> {}",
            perm.describe(context),
            arg.describe(context),
            context.registers().name(mv.regs[i]),
            context.registers().name(mv.regs[i + 1])
        );

        let cpy = Value::new_copy(context, block, arg);
        cpy.set_register(context, mv.regs[i + 1]);

        res.exchange(context, cpy);
        res.kill(context);

        block.add_after(context, sched_point, cpy);
        sched_point = cpy;
    }
    Ok(())
}

/// A cycle `[r0, …, rn-1]` becomes n-1 binary swap Perms.  Each middle swap
/// grows a fresh Proj that becomes the holder of the lower register for the
/// next, earlier swap.
fn split_cycle_into_swaps(
    context: &mut Context,
    perm: Value,
    mv: &PermMove,
    pairs: &mut [RegPair],
) -> Result<(), IrError> {
    debug_assert_eq!(mv.kind, MoveKind::Cycle);
    let block = perm.block(context);
    let mut sched_point = perm
        .sched_prev(context)
        .ok_or_else(|| IrError::UnscheduledPerm(perm.describe(context)))?;

    for i in (0..mv.regs.len() - 1).rev() {
        let arg1 = in_node(context, perm, pairs, mv.regs[i])?;
        let arg2 = in_node(context, perm, pairs, mv.regs[i + 1])?;
        let res1 = out_node(context, perm, pairs, mv.regs[i])?;
        let res2 = out_node(context, perm, pairs, mv.regs[i + 1])?;

        trace!(
            "{}: exchange of {} and {}",
            perm.describe(context),
            context.registers().name(mv.regs[i]),
            context.registers().name(mv.regs[i + 1])
        );

        // Result 0 moves arg1 into the upper register, result 1 moves arg2
        // into the lower one.
        let xchg = Value::new_perm(context, block, &[arg1, arg2]);

        res2.set_proj(context, xchg, 0);
        res2.set_register(context, mv.regs[i + 1]);

        let res1 = if i > 0 {
            // The cycle is not done yet: a fresh Proj takes over the lower
            // register as input of the next, earlier swap.  The original
            // result Proj of that register is rewired by that iteration.
            let intermediate = Value::new_proj(context, block, xchg, 1);
            let pair_idx = pair_idx_for_in(pairs, mv.regs[i].index)
                .ok_or_else(|| IrError::BrokenPermutation(perm.describe(context)))?;
            pairs[pair_idx].in_node = intermediate;
            intermediate
        } else {
            res1.set_proj(context, xchg, 1);
            res1
        };
        res1.set_register(context, mv.regs[i]);

        block.add_after(context, sched_point, xchg);
        sched_point = xchg;
    }
    Ok(())
}

/// With a scratch register available, a cycle `[r0, …, rn-1]` becomes n+1
/// copies: save rn-1, shift every other element up, restore into r0.
fn split_cycle_into_copies(
    context: &mut Context,
    perm: Value,
    mv: &PermMove,
    pairs: &mut [RegPair],
    free_reg: Register,
) -> Result<(), IrError> {
    debug_assert_eq!(mv.kind, MoveKind::Cycle);
    let block = perm.block(context);
    let mut sched_point = perm
        .sched_prev(context)
        .ok_or_else(|| IrError::UnscheduledPerm(perm.describe(context)))?;

    // Save the last register's content into the scratch register.
    let last = *mv.regs.last().expect("cycle cannot be empty");
    let save_arg = in_node(context, perm, pairs, last)?;
    let save_cpy = Value::new_copy(context, block, save_arg);
    save_cpy.set_register(context, free_reg);
    block.add_after(context, sched_point, save_cpy);
    sched_point = save_cpy;

    for i in (0..mv.regs.len() - 1).rev() {
        let arg = in_node(context, perm, pairs, mv.regs[i])?;
        let res = out_node(context, perm, pairs, mv.regs[i + 1])?;

        trace!(
            "{}: copy ({}, {}) -> {}",
            perm.describe(context),
            arg.describe(context),
            context.registers().name(mv.regs[i]),
            context.registers().name(mv.regs[i + 1])
        );

        let cpy = Value::new_copy(context, block, arg);
        cpy.set_register(context, mv.regs[i + 1]);

        res.exchange(context, cpy);
        res.kill(context);

        block.add_after(context, sched_point, cpy);
        sched_point = cpy;
    }

    // Restore the saved content into the first register.
    let restore_cpy = Value::new_copy(context, block, save_cpy);
    restore_cpy.set_register(context, mv.regs[0]);
    let first_res = out_node(context, perm, pairs, mv.regs[0])?;
    first_res.exchange(context, restore_cpy);
    first_res.kill(context);
    block.add_after(context, sched_point, restore_cpy);

    Ok(())
}

fn in_node(
    context: &Context,
    perm: Value,
    pairs: &[RegPair],
    reg: Register,
) -> Result<Value, IrError> {
    node_for_in_register(pairs, reg)
        .ok_or_else(|| IrError::BrokenPermutation(perm.describe(context)))
}

fn out_node(
    context: &Context,
    perm: Value,
    pairs: &[RegPair],
    reg: Register,
) -> Result<Value, IrError> {
    node_for_out_register(pairs, reg)
        .ok_or_else(|| IrError::BrokenPermutation(perm.describe(context)))
}
