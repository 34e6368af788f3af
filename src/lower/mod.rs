//! Lowering of Perm nodes after register allocation, and the pre-allocation
//! constraint-assurance pass.
//!
//! The entry points are [assure_constraints], [lower_nodes_after_ra] and the
//! helper [push_through_perm].  Pass order is load-bearing: push-through
//! consults liveness computed up front, and the lowerer consumes the scratch
//! registers found before any rewriting starts.

mod constraints;
mod pairs;
mod perm;
mod push_through;
mod scratch;

pub use constraints::assure_constraints;
pub use push_through::push_through_perm;

use tracing::debug;

use crate::{
    error::IrError,
    ir::{Context, Function, Value},
    liveness::Liveness,
};

use perm::lower_perm_node;
use scratch::FreeRegisterMap;

/// Rewrites every Perm of `function` into copies and swaps.  Afterwards no
/// Perm of arity greater than two remains.
pub fn lower_nodes_after_ra(context: &mut Context, function: Function) -> Result<(), IrError> {
    let liveness = Liveness::compute(context, function);
    let free_regs = FreeRegisterMap::compute(context, &liveness, function)?;

    let mut perms: Vec<Value> = Vec::new();
    for block in function.block_iter(context) {
        for node in block.sched_iter(context) {
            if node.is_perm(context) {
                perms.push(node);
            }
        }
    }
    debug!("lowering {} perms in {}", perms.len(), function.name(context));

    for perm in perms {
        let perm_stayed = push_through_perm(context, &liveness, perm)?;
        if perm_stayed {
            lower_perm_node(context, &free_regs, perm)?;
        }
    }

    // The free-register map and the liveness computed above die here; both
    // describe the schedule as it was before the rewriting.
    Ok(())
}
