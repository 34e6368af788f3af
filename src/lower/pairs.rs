//! The register-pair view of one Perm and its decomposition into cycles and
//! chains.

use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};
use tracing::trace;

use crate::{
    error::IrError,
    ir::{Context, Value},
    registers::Register,
};

/// One non-identity slot of a Perm: the value `in_node` arrives in `in_reg`
/// and must leave in `out_reg`, whose result is `out_node`.
pub(crate) struct RegPair {
    pub in_reg: Register,
    pub in_node: Value,
    pub out_reg: Register,
    pub out_node: Value,
    pub checked: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MoveKind {
    Cycle,
    Chain,
}

/// One connected component of the permutation.  Content flows
/// `regs[i] -> regs[i+1]`; for a cycle additionally `regs[last] -> regs[0]`,
/// for a chain `regs[0]` is read but never written.
pub(crate) struct PermMove {
    pub kind: MoveKind,
    pub regs: SmallVec<[Register; 4]>,
}

/// Builds the pair list of a Perm, collapsing identity slots: a Proj bound
/// to its input's own register is replaced by the input and dropped.
pub(crate) fn build_register_pairs(
    context: &mut Context,
    perm: Value,
) -> Result<Vec<RegPair>, IrError> {
    let mut pairs = Vec::new();
    for out in perm.users(context) {
        debug_assert!(out.is_proj(context), "perm user is not a proj");
        let pn = out.proj_index(context);
        let input = perm.input(context, pn);
        let in_reg = input.register_or_err(context)?;
        let out_reg = out.register_or_err(context)?;

        if in_reg == out_reg {
            trace!(
                "{}: removing equal register pair ({}, {})",
                perm.describe(context),
                input.describe(context),
                out.describe(context)
            );
            out.exchange(context, input);
            out.kill(context);
            continue;
        }

        pairs.push(RegPair {
            in_reg,
            in_node: input,
            out_reg,
            out_node: out,
            checked: false,
        });
    }

    // Every register may appear at most once on each side; chains leave the
    // two sides as different sets, duplicates never do.
    let ins: FxHashSet<usize> = pairs.iter().map(|pair| pair.in_reg.index).collect();
    let outs: FxHashSet<usize> = pairs.iter().map(|pair| pair.out_reg.index).collect();
    if ins.len() != pairs.len() || outs.len() != pairs.len() {
        return Err(IrError::BrokenPermutation(perm.describe(context)));
    }

    Ok(pairs)
}

pub(crate) fn n_unchecked(pairs: &[RegPair]) -> usize {
    pairs.iter().filter(|pair| !pair.checked).count()
}

/// The node currently holding register `reg` on the input side.
pub(crate) fn node_for_in_register(pairs: &[RegPair], reg: Register) -> Option<Value> {
    pairs
        .iter()
        .find(|pair| pair.in_reg.index == reg.index)
        .map(|pair| pair.in_node)
}

/// The result node bound to register `reg` on the output side.
pub(crate) fn node_for_out_register(pairs: &[RegPair], reg: Register) -> Option<Value> {
    pairs
        .iter()
        .find(|pair| pair.out_reg.index == reg.index)
        .map(|pair| pair.out_node)
}

pub(crate) fn pair_idx_for_in(pairs: &[RegPair], reg_idx: usize) -> Option<usize> {
    pairs.iter().position(|pair| pair.in_reg.index == reg_idx)
}

pub(crate) fn pair_idx_for_out(pairs: &[RegPair], reg_idx: usize) -> Option<usize> {
    pairs.iter().position(|pair| pair.out_reg.index == reg_idx)
}

/// Identifies the cycle or chain containing the pair at `start`, marking
/// every covered pair as checked.
///
/// Walking backwards over `out_reg` either returns to the starting register
/// (a cycle closes) or runs off the end (a chain start was found); the two
/// cases are mutually exclusive in a consistent permutation.  The forward
/// walk from the discovered head then collects the ordered element list.
pub(crate) fn decompose_move(pairs: &mut [RegPair], start: usize) -> PermMove {
    let mut head = pairs[start].in_reg.index;
    let cur = pairs[start].out_reg.index;
    let mut kind = MoveKind::Cycle;
    let mut start = start;

    // We could be right in the middle of a chain, so find its start first.
    while head != cur {
        match pair_idx_for_out(pairs, head) {
            None => {
                kind = MoveKind::Chain;
                break;
            }
            Some(prev_idx) => {
                head = pairs[prev_idx].in_reg.index;
                start = prev_idx;
            }
        }
    }

    let mut regs: SmallVec<[Register; 4]> = smallvec![pairs[start].in_reg, pairs[start].out_reg];
    let head = pairs[start].in_reg.index;
    let mut cur = pairs[start].out_reg.index;

    // Walk forward until the cycle closes or the chain ends.
    while cur != head {
        match pair_idx_for_in(pairs, cur) {
            None => break,
            Some(next_idx) => {
                cur = pairs[next_idx].out_reg.index;
                if cur != head {
                    regs.push(pairs[next_idx].out_reg);
                } else {
                    kind = MoveKind::Cycle;
                }
            }
        }
    }

    // Mark every pair sharing a register with this move as checked.
    for reg in &regs {
        if let Some(idx) = pair_idx_for_in(pairs, reg.index) {
            pairs[idx].checked = true;
        }
        if let Some(idx) = pair_idx_for_out(pairs, reg.index) {
            pairs[idx].checked = true;
        }
    }

    PermMove { kind, regs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Context, Function};
    use crate::registers::{RegClass, RegisterFile};

    fn pair_fixture(moves: &[(usize, usize)]) -> (Context, Vec<RegPair>) {
        let mut file = RegisterFile::new();
        let names: Vec<String> = (0..8).map(|i| format!("r{i}")).collect();
        let name_refs: Vec<&str> = names.iter().map(|name| name.as_str()).collect();
        let class = file.add_class("gpr", &name_refs);
        let mut ctx = Context::new(file);
        let func = Function::new(&mut ctx, "f");
        let block = func.entry_block(&ctx);

        let pairs = moves
            .iter()
            .map(|(in_idx, out_idx)| {
                let in_node = block.ins(&mut ctx).op("def", &[]);
                let out_node = block.ins(&mut ctx).op("res", &[]);
                RegPair {
                    in_reg: reg(class, *in_idx),
                    in_node,
                    out_reg: reg(class, *out_idx),
                    out_node,
                    checked: false,
                }
            })
            .collect();
        (ctx, pairs)
    }

    fn reg(class: RegClass, index: usize) -> Register {
        Register { class, index }
    }

    fn reg_indices(mv: &PermMove) -> Vec<usize> {
        mv.regs.iter().map(|r| r.index).collect()
    }

    #[test]
    fn two_cycle_is_a_swap() {
        let (_ctx, mut pairs) = pair_fixture(&[(1, 2), (2, 1)]);
        let mv = decompose_move(&mut pairs, 0);
        assert_eq!(mv.kind, MoveKind::Cycle);
        assert_eq!(mv.regs.len(), 2);
        assert_eq!(n_unchecked(&pairs), 0);
    }

    #[test]
    fn three_cycle_closes() {
        let (_ctx, mut pairs) = pair_fixture(&[(1, 2), (2, 3), (3, 1)]);
        let mv = decompose_move(&mut pairs, 0);
        assert_eq!(mv.kind, MoveKind::Cycle);
        assert_eq!(mv.regs.len(), 3);
        assert_eq!(n_unchecked(&pairs), 0);
    }

    #[test]
    fn chain_found_from_the_middle() {
        // r1 -> r2 -> r3 -> r4; starting in the middle must still discover
        // the chain head r1.
        let (_ctx, mut pairs) = pair_fixture(&[(2, 3), (1, 2), (3, 4)]);
        let mv = decompose_move(&mut pairs, 0);
        assert_eq!(mv.kind, MoveKind::Chain);
        assert_eq!(reg_indices(&mv), vec![1, 2, 3, 4]);
        assert_eq!(n_unchecked(&pairs), 0);
    }

    #[test]
    fn disjoint_components_are_separate_moves() {
        let (_ctx, mut pairs) = pair_fixture(&[(1, 2), (2, 1), (3, 4)]);
        let first = decompose_move(&mut pairs, 0);
        assert_eq!(first.kind, MoveKind::Cycle);
        assert_eq!(n_unchecked(&pairs), 1);
        let start = pairs.iter().position(|pair| !pair.checked).unwrap();
        let second = decompose_move(&mut pairs, start);
        assert_eq!(second.kind, MoveKind::Chain);
        assert_eq!(reg_indices(&second), vec![3, 4]);
        assert_eq!(n_unchecked(&pairs), 0);
    }
}
