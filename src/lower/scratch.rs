//! Scratch-register search: for every Perm, a register of the Perm's class
//! that is free immediately before it, if one exists.

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    error::IrError,
    ir::{Context, Function, Mode, Value},
    liveness::Liveness,
    registers::{RegClass, Register},
};

/// The per-Perm scratch register, decided once before lowering and consumed
/// by the cycle-by-copies realisation.
pub(crate) struct FreeRegisterMap {
    map: FxHashMap<Value, Register>,
}

impl FreeRegisterMap {
    /// Walks every block of `function` and records a free register for each
    /// scheduled Perm that has one.
    pub(crate) fn compute(
        context: &Context,
        liveness: &Liveness,
        function: Function,
    ) -> Result<FreeRegisterMap, IrError> {
        let mut map = FxHashMap::default();
        for block in function.block_iter(context) {
            for node in block.sched_iter(context) {
                if !node.is_perm(context) {
                    continue;
                }
                let class = node.input(context, 0).register_or_err(context)?.class;
                if let Some(reg) = find_free_register(context, liveness, function, node, class)? {
                    debug!(
                        "free register for {}: {}",
                        node.describe(context),
                        context.registers().name(reg)
                    );
                    map.insert(node, reg);
                } else {
                    debug!("no free register for {}", node.describe(context));
                }
            }
        }
        Ok(FreeRegisterMap { map })
    }

    pub(crate) fn get(&self, perm: Value) -> Option<Register> {
        self.map.get(&perm).copied()
    }
}

/// Flags the register of `node` as in use (or free).  Non-data nodes,
/// virtual registers and registers of other classes are ignored.
fn set_reg_in_use(
    context: &Context,
    node: Value,
    class: RegClass,
    regs_in_use: &mut [bool],
    in_use: bool,
) -> Result<(), IrError> {
    if !node.mode(context).is_data() {
        return Ok(());
    }
    let reg = node.register_or_err(context)?;
    if context.registers().is_virtual(reg) {
        return Ok(());
    }
    if reg.class != class {
        return Ok(());
    }
    trace!(
        "    register {} is now {}",
        context.registers().name(reg),
        if in_use { "not free" } else { "free" }
    );
    regs_in_use[reg.index] = in_use;
    Ok(())
}

/// Flags the registers defined by `node`: the node's own for single results,
/// each data Proj's for tuples.
fn update_reg_defs(
    context: &Context,
    node: Value,
    class: RegClass,
    regs_in_use: &mut [bool],
    in_use: bool,
) -> Result<(), IrError> {
    if node.mode(context) == Mode::Tuple {
        for user in node.users(context) {
            if user.is_proj(context) {
                set_reg_in_use(context, user, class, regs_in_use, in_use)?;
            }
        }
    } else {
        set_reg_in_use(context, node, class, regs_in_use, in_use)?;
    }
    Ok(())
}

fn update_reg_uses(
    context: &Context,
    node: Value,
    class: RegClass,
    regs_in_use: &mut [bool],
) -> Result<(), IrError> {
    for input in node.inputs(context) {
        set_reg_in_use(context, input, class, regs_in_use, true)?;
    }
    Ok(())
}

/// Scans `perm`'s block backwards from its end, tracking which registers of
/// `class` are in use at the Perm.  Defs die walking backwards, uses become
/// live; the Perm's own defs and uses both stay marked, so neither an input
/// nor an output register of the permutation can be chosen.
fn find_free_register(
    context: &Context,
    liveness: &Liveness,
    function: Function,
    perm: Value,
    class: RegClass,
) -> Result<Option<Register>, IrError> {
    let block = perm.block(context);
    let num_registers = context.registers().n_regs(class);
    let mut regs_in_use = vec![false; num_registers];

    trace!("looking for a free register for {}", perm.describe(context));
    for live in liveness.live_out(block) {
        set_reg_in_use(context, *live, class, &mut regs_in_use, true)?;
    }

    for node in block.sched_iter(context).rev() {
        if node.is_phi(context) {
            break;
        }
        trace!("  looking at {}", node.describe(context));
        update_reg_defs(context, node, class, &mut regs_in_use, node == perm)?;
        update_reg_uses(context, node, class, &mut regs_in_use)?;
        if node == perm {
            break;
        }
    }

    for index in 0..num_registers {
        let reg = context.registers().register(class, index);
        if regs_in_use[index]
            || context.registers().is_virtual(reg)
            || !function.is_register_allocatable(context, reg)
        {
            continue;
        }
        return Ok(Some(reg));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Function;
    use crate::registers::RegisterFile;

    fn new_context(n_regs: usize) -> (Context, RegClass) {
        let mut file = RegisterFile::new();
        let names: Vec<String> = (0..n_regs).map(|i| format!("r{i}")).collect();
        let name_refs: Vec<&str> = names.iter().map(|name| name.as_str()).collect();
        let class = file.add_class("gpr", &name_refs);
        (Context::new(file), class)
    }

    fn reg(class: RegClass, index: usize) -> Register {
        Register { class, index }
    }

    #[test]
    fn finds_register_unused_around_the_perm() {
        let (mut ctx, class) = new_context(4);
        let func = Function::new(&mut ctx, "f");
        let block = func.entry_block(&ctx);

        let a = block.ins(&mut ctx).op("lda", &[]);
        a.set_register(&mut ctx, reg(class, 0));
        let b = block.ins(&mut ctx).op("ldb", &[]);
        b.set_register(&mut ctx, reg(class, 1));
        let perm = block.ins(&mut ctx).perm(&[a, b]);
        let p0 = block.ins(&mut ctx).proj(perm, 0);
        p0.set_register(&mut ctx, reg(class, 1));
        let p1 = block.ins(&mut ctx).proj(perm, 1);
        p1.set_register(&mut ctx, reg(class, 0));
        block.ins(&mut ctx).branch("ret", &[p0, p1], &[]);

        let lv = Liveness::compute(&ctx, func);
        let free = FreeRegisterMap::compute(&ctx, &lv, func).unwrap();
        assert_eq!(free.get(perm), Some(reg(class, 2)));
    }

    #[test]
    fn registers_live_across_the_perm_are_taken() {
        let (mut ctx, class) = new_context(3);
        let func = Function::new(&mut ctx, "f");
        let block = func.entry_block(&ctx);

        let a = block.ins(&mut ctx).op("lda", &[]);
        a.set_register(&mut ctx, reg(class, 0));
        let b = block.ins(&mut ctx).op("ldb", &[]);
        b.set_register(&mut ctx, reg(class, 1));
        // r2 is defined before the perm and read after it.
        let c = block.ins(&mut ctx).op("ldc", &[]);
        c.set_register(&mut ctx, reg(class, 2));
        let perm = block.ins(&mut ctx).perm(&[a, b]);
        let p0 = block.ins(&mut ctx).proj(perm, 0);
        p0.set_register(&mut ctx, reg(class, 1));
        let p1 = block.ins(&mut ctx).proj(perm, 1);
        p1.set_register(&mut ctx, reg(class, 0));
        block.ins(&mut ctx).branch("ret", &[p0, p1, c], &[]);

        let lv = Liveness::compute(&ctx, func);
        let free = FreeRegisterMap::compute(&ctx, &lv, func).unwrap();
        assert_eq!(free.get(perm), None);
    }

    #[test]
    fn non_allocatable_registers_are_refused() {
        let (mut ctx, class) = new_context(4);
        let func = Function::new(&mut ctx, "f");
        func.set_register_allocatable(&mut ctx, reg(class, 2), false);
        let block = func.entry_block(&ctx);

        let a = block.ins(&mut ctx).op("lda", &[]);
        a.set_register(&mut ctx, reg(class, 0));
        let b = block.ins(&mut ctx).op("ldb", &[]);
        b.set_register(&mut ctx, reg(class, 1));
        let perm = block.ins(&mut ctx).perm(&[a, b]);
        let p0 = block.ins(&mut ctx).proj(perm, 0);
        p0.set_register(&mut ctx, reg(class, 1));
        let p1 = block.ins(&mut ctx).proj(perm, 1);
        p1.set_register(&mut ctx, reg(class, 0));
        block.ins(&mut ctx).branch("ret", &[p0, p1], &[]);

        let lv = Liveness::compute(&ctx, func);
        let free = FreeRegisterMap::compute(&ctx, &lv, func).unwrap();
        assert_eq!(free.get(perm), Some(reg(class, 3)));
    }
}
