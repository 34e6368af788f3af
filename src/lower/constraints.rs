//! The pre-allocation constraint-assurance pass.
//!
//! For every node whose result register must differ from the register of
//! some input, a non-spillable copy of that input is materialised before the
//! node and kept alive past it, so the two values demonstrably interfere and
//! the allocator cannot merge them.  Redundant CopyKeeps are melted, SSA is
//! repaired, and CopyKeeps that end up unused decay to plain Keeps.

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use crate::{
    error::IrError,
    ir::{Context, Function, Mode, Value},
    registers::RegClass,
    ssa::SsaReconstruction,
};

/// The copies and CopyKeeps created for one isolated value.
struct OpCopyAssoc {
    copies: IndexSet<Value>,
    class: RegClass,
}

/// Keyed by the value needing isolation; insertion-ordered so the SSA repair
/// below runs deterministically.
type ConstraintEnv = IndexMap<Value, OpCopyAssoc>;

/// Enforces must-be-different output constraints over one function graph.
pub fn assure_constraints(context: &mut Context, function: Function) -> Result<(), IrError> {
    let mut env: ConstraintEnv = IndexMap::new();

    for block in function.block_iter(context) {
        for node in block.sched_iter(context).rev() {
            if node.mode(context) == Mode::Tuple {
                for proj in node.users(context) {
                    if proj.is_proj(context) && proj.mode(context).is_data() {
                        assure_different_constraints(context, proj, node, &mut env)?;
                    }
                }
            } else if node.mode(context).is_data() {
                assure_different_constraints(context, node, node, &mut env)?;
            }
        }
    }

    melt_copykeeps(context, &mut env);

    for (op, entry) in env {
        debug!("introducing copies for {}", op.describe(context));

        let copies: Vec<Value> = entry.copies.iter().copied().collect();
        let mut ssa = SsaReconstruction::new(function);
        ssa.add_copy(op);
        ssa.add_copies(&copies);
        ssa.fix_users(context, op);

        // Not every CopyKeep is really needed; unused ones decay to Keeps.
        for cp in copies {
            if cp.is_copy_keep(context) && !cp.has_users(context) {
                let block = cp.block(context);
                let inputs = cp.inputs(context);
                let keep = Value::new_keep(context, block, &inputs);
                block.add_before(context, cp, keep);
                block.remove(context, cp);
                cp.kill(context);
            }
        }
    }

    Ok(())
}

/// Checks one value-producing node for a must-be-different output constraint
/// and materialises the copy/keep pattern for each named input.
fn assure_different_constraints(
    context: &mut Context,
    node: Value,
    skipped_node: Value,
    env: &mut ConstraintEnv,
) -> Result<(), IrError> {
    let requirement = node.requirement(context).clone();
    if !requirement.must_be_different() {
        return Ok(());
    }
    let other = requirement.other_different;

    if requirement.should_be_same() {
        let same = requirement.other_same;
        // A should-be-same x must-be-different y pair is trivially satisfied
        // when both masks pick the same input.
        if other.is_power_of_two() && same.is_power_of_two() {
            let idx_other = other.trailing_zeros() as usize;
            let idx_same = same.trailing_zeros() as usize;
            if skipped_node.input(context, idx_other) == skipped_node.input(context, idx_same) {
                return Ok(());
            }
        }
    }

    for i in 0..u32::BITS {
        if other & (1u32 << i) != 0 {
            let different_from = skipped_node.input(context, i as usize);
            gen_assure_different_pattern(context, node, different_from, env)?;
        }
    }
    Ok(())
}

/// Walks backwards from `node` through the run of Copy nodes directly above
/// it, looking for an existing non-spillable copy of `op`.
fn find_copy(context: &Context, node: Value, op: Value) -> Option<Value> {
    let mut cur = node;
    loop {
        cur = cur.sched_prev(context)?;
        if !cur.is_copy(context) {
            return None;
        }
        if cur.input(context, 0) == op && cur.dont_spill(context) {
            return Some(cur);
        }
    }
}

fn gen_assure_different_pattern(
    context: &mut Context,
    node: Value,
    other_different: Value,
    env: &mut ConstraintEnv,
) -> Result<(), IrError> {
    if other_different.requirement(context).ignore || !other_different.mode(context).is_data() {
        trace!(
            "ignoring constraint for {}: other operand is pinned or not data",
            node.describe(context)
        );
        return Ok(());
    }

    let block = node.block(context);
    let class = other_different
        .register_class(context)
        .ok_or_else(|| IrError::MissingRegisterClass(other_different.describe(context)))?;
    let anchor = node.skip_proj(context);

    // A non-spillable copy of the constrained-against value.  The value may
    // be defined far away; the copy pins it here and is melted away later if
    // it turns out to be unnecessary.
    let cpy = match find_copy(context, anchor, other_different) {
        Some(existing) => {
            trace!(
                "reusing existing {} for {}",
                existing.describe(context),
                other_different.describe(context)
            );
            existing
        }
        None => {
            let cpy = Value::new_copy(context, block, other_different);
            cpy.set_dont_spill(context, true);
            trace!(
                "created non-spillable {} for {}",
                cpy.describe(context),
                other_different.describe(context)
            );
            cpy
        }
    };

    // Keep the copy alive past the constrained node, rerouting the users of
    // the original through the CopyKeep where there are any.
    let keep = if other_different.has_users(context) {
        Value::new_copy_keep(context, block, cpy, &[node], class)
    } else {
        Value::new_keep(context, block, &[node, cpy])
    };
    debug!(
        "created {} ({}, {})",
        keep.describe(context),
        node.describe(context),
        cpy.describe(context)
    );

    debug_assert!(
        anchor.is_scheduled(context),
        "constraint assurance needs a schedule"
    );
    if !cpy.is_scheduled(context) {
        block.add_before(context, anchor, cpy);
    }
    block.add_after(context, anchor, keep);

    let entry = env.entry(other_different).or_insert_with(|| OpCopyAssoc {
        copies: IndexSet::new(),
        class,
    });
    entry.copies.insert(cpy);
    if keep.is_copy_keep(context) {
        entry.copies.insert(keep);
    }
    Ok(())
}

/// Melts CopyKeeps of the same environment entry whose kept values project
/// from the same multi-result parent into a single CopyKeep.
fn melt_copykeeps(context: &mut Context, env: &mut ConstraintEnv) {
    for entry in env.values_mut() {
        let mut keeps: Vec<Option<Value>> = entry
            .copies
            .iter()
            .copied()
            .filter(|cp| cp.is_copy_keep(context))
            .map(Some)
            .collect();

        for idx in 0..keeps.len() {
            let Some(reference) = keeps[idx] else { continue };
            keeps[idx] = None;
            let ref_parent = reference.input(context, 1).skip_proj(context);

            let mut melt = vec![reference];
            for other_slot in keeps.iter_mut().skip(idx + 1) {
                if let Some(other) = *other_slot {
                    if other.input(context, 1).skip_proj(context) == ref_parent {
                        melt.push(other);
                        *other_slot = None;
                    }
                }
            }
            if melt.len() == 1 {
                continue;
            }

            debug!(
                "melting {} copykeeps of {}",
                melt.len(),
                ref_parent.describe(context)
            );

            let block = reference.block(context);
            let copy_op = reference.input(context, 0);
            let kept: Vec<Value> = melt.iter().map(|ck| ck.input(context, 1)).collect();
            for ck in &melt {
                entry.copies.swap_remove(ck);
                block.remove(context, *ck);
            }

            let new_keep = Value::new_copy_keep(context, block, copy_op, &kept, entry.class);
            entry.copies.insert(new_keep);

            // Schedule past the run of keeps hanging off the parent.
            let mut point = ref_parent.sched_next(context);
            while let Some(at) = point {
                if at.is_keep(context) || at.is_copy_keep(context) {
                    point = at.sched_next(context);
                } else {
                    break;
                }
            }
            match point {
                Some(at) => block.add_before(context, at, new_keep),
                None => block.append(context, new_keep),
            }

            for ck in melt {
                ck.kill(context);
            }
        }
    }
}
