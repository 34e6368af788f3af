use super::*;
use crate::registers::RegClass;

/// The node kinds this pass manipulates.
///
/// Ordinary machine instructions appear as [Instruction::Op]: an opaque
/// opcode name, its value operands and, for terminators, its control-flow
/// targets.  Multi-result nodes carry [Mode::Tuple] and expose each result
/// through a [Instruction::Proj].
#[derive(Debug, Clone)]
pub enum Instruction {
    /// A function parameter, defined at function entry.
    Argument,
    /// An opaque machine instruction.
    Op {
        opcode: String,
        args: Vec<Value>,
        targets: Vec<Block>,
    },
    /// Simultaneous permutation of the registers its inputs occupy.
    Perm { args: Vec<Value> },
    /// A register-to-register move of `arg`.
    Copy { arg: Value },
    /// A copy of `arg` that additionally keeps `kept` alive past itself.
    CopyKeep {
        arg: Value,
        kept: Vec<Value>,
        class: RegClass,
    },
    /// Pins its inputs live without producing a value.
    Keep { kept: Vec<Value> },
    /// Projects result `index` out of the multi-result `parent`.
    Proj { parent: Value, index: usize },
    /// SSA join of one value per predecessor block.
    Phi { args: Vec<(Block, Value)> },
}

impl Instruction {
    pub fn opcode_name(&self) -> &str {
        match self {
            Instruction::Argument => "arg",
            Instruction::Op { opcode, .. } => opcode,
            Instruction::Perm { .. } => "perm",
            Instruction::Copy { .. } => "copy",
            Instruction::CopyKeep { .. } => "copykeep",
            Instruction::Keep { .. } => "keep",
            Instruction::Proj { .. } => "proj",
            Instruction::Phi { .. } => "phi",
        }
    }

    /// The ordered value inputs of the node.
    pub(crate) fn inputs(&self) -> Vec<Value> {
        match self {
            Instruction::Argument => Vec::new(),
            Instruction::Op { args, .. } => args.clone(),
            Instruction::Perm { args } => args.clone(),
            Instruction::Copy { arg } => vec![*arg],
            Instruction::CopyKeep { arg, kept, .. } => {
                let mut ins = vec![*arg];
                ins.extend(kept.iter().copied());
                ins
            }
            Instruction::Keep { kept } => kept.clone(),
            Instruction::Proj { parent, .. } => vec![*parent],
            Instruction::Phi { args } => args.iter().map(|(_, val)| *val).collect(),
        }
    }

    /// Replaces every occurrence of `old_val` among the inputs, returning how
    /// many were rewritten.
    pub(crate) fn replace_value(&mut self, old_val: Value, new_val: Value) -> usize {
        let mut count = 0;
        let mut replace = |val: &mut Value| {
            if *val == old_val {
                *val = new_val;
                count += 1;
            }
        };
        match self {
            Instruction::Argument => (),
            Instruction::Op { args, .. } => args.iter_mut().for_each(&mut replace),
            Instruction::Perm { args } => args.iter_mut().for_each(&mut replace),
            Instruction::Copy { arg } => replace(arg),
            Instruction::CopyKeep { arg, kept, .. } => {
                replace(arg);
                kept.iter_mut().for_each(&mut replace);
            }
            Instruction::Keep { kept } => kept.iter_mut().for_each(&mut replace),
            Instruction::Proj { parent, .. } => replace(parent),
            Instruction::Phi { args } => args.iter_mut().for_each(|(_, val)| replace(val)),
        }
        count
    }
}

/// Appends new nodes to the end of a block's schedule.  Used when building
/// graphs; the lowering passes construct nodes unscheduled and splice them in
/// at explicit points instead.
pub struct InstructionInserter<'a> {
    context: &'a mut Context,
    block: Block,
}

impl<'a> InstructionInserter<'a> {
    pub(crate) fn new(context: &'a mut Context, block: Block) -> InstructionInserter<'a> {
        InstructionInserter { context, block }
    }

    pub fn op(self, opcode: &str, args: &[Value]) -> Value {
        let val = Value::new_op(self.context, self.block, opcode, args);
        self.block.append(self.context, val);
        val
    }

    pub fn tuple_op(self, opcode: &str, args: &[Value]) -> Value {
        let val = Value::new_tuple_op(self.context, self.block, opcode, args);
        self.block.append(self.context, val);
        val
    }

    pub fn branch(self, opcode: &str, args: &[Value], targets: &[Block]) -> Value {
        let val = Value::new_branch(self.context, self.block, opcode, args, targets);
        self.block.append(self.context, val);
        val
    }

    pub fn perm(self, args: &[Value]) -> Value {
        let val = Value::new_perm(self.context, self.block, args);
        self.block.append(self.context, val);
        val
    }

    pub fn copy(self, arg: Value) -> Value {
        let val = Value::new_copy(self.context, self.block, arg);
        self.block.append(self.context, val);
        val
    }

    pub fn keep(self, kept: &[Value]) -> Value {
        let val = Value::new_keep(self.context, self.block, kept);
        self.block.append(self.context, val);
        val
    }

    /// Projs are not scheduled; they ride on their parent.
    pub fn proj(self, parent: Value, index: usize) -> Value {
        Value::new_proj(self.context, self.block, parent, index)
    }

    /// Phis sit at the front of the schedule, before any real instruction.
    pub fn phi(self, args: &[(Block, Value)]) -> Value {
        let val = Value::new_phi(self.context, self.block, args);
        let sched = self.context.blocks[self.block.0].schedule.clone();
        let at = sched
            .iter()
            .position(|node| !node.is_phi(self.context))
            .unwrap_or(sched.len());
        self.context.blocks[self.block.0].schedule.insert(at, val);
        val
    }
}
