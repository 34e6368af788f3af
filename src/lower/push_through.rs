//! The push-through optimisation: instructions whose results a Perm merely
//! renames are hoisted past the Perm, which shrinks or eliminates it.

use fixedbitset::FixedBitSet;
use tracing::{debug, trace};

use crate::{
    error::IrError,
    ir::{Context, Value},
    liveness::Liveness,
    registers::RegClass,
};

/// True when `node` is a value this class's allocator had to give a register.
fn considered_in_reg_alloc(context: &Context, class: RegClass, node: Value) -> bool {
    node.mode(context).is_data()
        && node.register_class(context) == Some(class)
        && !node.requirement(context).ignore
}

/// Tries to move producers of `perm`'s inputs past the Perm, rewiring their
/// output registers.  Returns `true` iff a Perm remains in the graph.
///
/// A producer may only move if its definition can sit after the *frontier*:
/// the last instruction above the Perm that uses a value of the Perm's class
/// which dies there.  Hoisting the Perm's slot above such an instruction
/// would lengthen that value's live range and raise register pressure.
pub fn push_through_perm(
    context: &mut Context,
    liveness: &Liveness,
    perm: Value,
) -> Result<bool, IrError> {
    debug_assert!(perm.is_perm(context), "non-perm passed to push_through_perm");
    let block = perm.block(context);
    let arity = perm.arity(context);

    let one_proj = match perm.users(context).first().copied() {
        Some(proj) => proj,
        None => return Ok(true),
    };
    debug_assert!(one_proj.is_proj(context));
    let class = one_proj
        .register_class(context)
        .ok_or_else(|| IrError::MissingRegisterClass(one_proj.describe(context)))?;

    debug!("push through {}", perm.describe(context));

    // Find the frontier.
    let mut frontier: Option<Value> = None;
    'search: for node in block.sched_iter(context).rev() {
        if !block.comes_after(context, node, perm) {
            continue;
        }
        for operand in node.inputs(context).into_iter().rev() {
            if considered_in_reg_alloc(context, class, operand)
                && !liveness.values_interfere(context, operand, one_proj)
            {
                frontier = Some(node);
                break 'search;
            }
        }
    }
    if let Some(front) = frontier {
        trace!("  frontier: {}", front.describe(context));
    }

    let mut moved = FixedBitSet::with_capacity(arity);
    let mut n_moved = 0;
    let mut candidate = perm.sched_prev(context);

    while let Some(node) = candidate {
        // The candidate must feed one of the Perm's slots.
        let mut slot = None;
        for out in perm.users(context) {
            let pn = out.proj_index(context);
            if perm.input(context, pn) == node {
                slot = Some((out, pn));
                break;
            }
        }
        let Some((proj, input)) = slot else { break };

        if let Some(front) = frontier {
            if !block.comes_after(context, front, node) {
                break;
            }
        }
        if node.modifies_flags(context) {
            break;
        }
        if !node.requirement(context).is_normal() {
            break;
        }
        // Feeding a value of the Perm's own class through would trade one
        // slot for another.
        if node
            .inputs(context)
            .iter()
            .any(|operand| considered_in_reg_alloc(context, class, *operand))
        {
            break;
        }

        trace!(
            "  moving {} after {}, absorbing {}",
            node.describe(context),
            perm.describe(context),
            proj.describe(context)
        );

        let prev = node.sched_prev(context);
        block.remove(context, node);
        block.add_after(context, perm, node);

        node.set_register(context, proj.register_or_err(context)?);
        proj.exchange(context, node);
        proj.kill(context);

        moved.insert(input);
        n_moved += 1;
        candidate = prev;
    }

    if n_moved == 0 {
        return Ok(true);
    }

    let new_size = arity - n_moved;
    if new_size == 0 {
        debug!("{} fully absorbed", perm.describe(context));
        block.remove(context, perm);
        perm.kill(context);
        return Ok(false);
    }

    // Compact the surviving slots and renumber their Projs.
    let mut proj_map = vec![usize::MAX; arity];
    let mut kept_inputs = Vec::with_capacity(new_size);
    for i in 0..arity {
        if moved.contains(i) {
            continue;
        }
        proj_map[i] = kept_inputs.len();
        kept_inputs.push(perm.input(context, i));
    }
    debug_assert_eq!(kept_inputs.len(), new_size);
    for proj in perm.users(context) {
        let pn = proj.proj_index(context);
        debug_assert_ne!(proj_map[pn], usize::MAX);
        proj.set_proj_index(context, proj_map[pn]);
    }
    perm.set_perm_inputs(context, &kept_inputs);

    Ok(true)
}
