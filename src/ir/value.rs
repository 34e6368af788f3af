use itertools::Itertools;

use super::*;
use crate::{
    error::IrError,
    registers::{RegClass, Register, RegRequirement},
};

/// The data type of a node's result.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// A register-carried value.
    Data,
    /// A multi-result node; results are exposed through Projs.
    Tuple,
    /// Control flow or pure pseudo effects, no register.
    Control,
}

impl Mode {
    pub fn is_data(&self) -> bool {
        matches!(self, Mode::Data)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Value(pub(crate) generational_arena::Index);

pub struct ValueContent {
    pub instruction: Instruction,
    pub block: Block,
    pub mode: Mode,
    pub register: Option<Register>,
    pub requirement: RegRequirement,
    pub modifies_flags: bool,
    pub dont_spill: bool,
    /// Back edges: one entry per operand occurrence in a using node.
    pub(crate) users: Vec<Value>,
    pub(crate) idx: u64,
}

impl Value {
    /// Inserts a node and registers it as a user of each of its operands.
    pub(crate) fn insert(
        context: &mut Context,
        block: Block,
        instruction: Instruction,
        mode: Mode,
    ) -> Value {
        let operands = instruction.inputs();
        let idx = context.take_value_idx();
        let content = ValueContent {
            instruction,
            block,
            mode,
            register: None,
            requirement: RegRequirement::default(),
            modifies_flags: false,
            dont_spill: false,
            users: Vec::new(),
            idx,
        };
        let val = Value(context.values.insert(content));
        for operand in operands {
            context.values[operand.0].users.push(val);
        }
        val
    }

    pub fn new_op(context: &mut Context, block: Block, opcode: &str, args: &[Value]) -> Value {
        Value::insert(
            context,
            block,
            Instruction::Op {
                opcode: opcode.to_owned(),
                args: args.to_vec(),
                targets: Vec::new(),
            },
            Mode::Data,
        )
    }

    pub fn new_tuple_op(context: &mut Context, block: Block, opcode: &str, args: &[Value]) -> Value {
        Value::insert(
            context,
            block,
            Instruction::Op {
                opcode: opcode.to_owned(),
                args: args.to_vec(),
                targets: Vec::new(),
            },
            Mode::Tuple,
        )
    }

    pub fn new_branch(
        context: &mut Context,
        block: Block,
        opcode: &str,
        args: &[Value],
        targets: &[Block],
    ) -> Value {
        Value::insert(
            context,
            block,
            Instruction::Op {
                opcode: opcode.to_owned(),
                args: args.to_vec(),
                targets: targets.to_vec(),
            },
            Mode::Control,
        )
    }

    pub fn new_perm(context: &mut Context, block: Block, args: &[Value]) -> Value {
        Value::insert(
            context,
            block,
            Instruction::Perm {
                args: args.to_vec(),
            },
            Mode::Tuple,
        )
    }

    pub fn new_copy(context: &mut Context, block: Block, arg: Value) -> Value {
        let class = arg.register_class(context);
        let copy = Value::insert(context, block, Instruction::Copy { arg }, Mode::Data);
        context.values[copy.0].requirement.class = class;
        copy
    }

    pub fn new_copy_keep(
        context: &mut Context,
        block: Block,
        arg: Value,
        kept: &[Value],
        class: RegClass,
    ) -> Value {
        let keep = Value::insert(
            context,
            block,
            Instruction::CopyKeep {
                arg,
                kept: kept.to_vec(),
                class,
            },
            Mode::Data,
        );
        context.values[keep.0].requirement.class = Some(class);
        keep
    }

    pub fn new_keep(context: &mut Context, block: Block, kept: &[Value]) -> Value {
        Value::insert(
            context,
            block,
            Instruction::Keep {
                kept: kept.to_vec(),
            },
            Mode::Control,
        )
    }

    pub fn new_proj(context: &mut Context, block: Block, parent: Value, index: usize) -> Value {
        Value::insert(
            context,
            block,
            Instruction::Proj { parent, index },
            Mode::Data,
        )
    }

    pub fn new_phi(context: &mut Context, block: Block, args: &[(Block, Value)]) -> Value {
        Value::insert(
            context,
            block,
            Instruction::Phi {
                args: args.to_vec(),
            },
            Mode::Data,
        )
    }

    // ---------------------------------------------------------------------

    pub fn block(&self, context: &Context) -> Block {
        context.values[self.0].block
    }

    pub fn mode(&self, context: &Context) -> Mode {
        context.values[self.0].mode
    }

    pub fn register(&self, context: &Context) -> Option<Register> {
        context.values[self.0].register
    }

    pub fn set_register(&self, context: &mut Context, reg: Register) {
        context.values[self.0].register = Some(reg);
    }

    pub fn register_or_err(&self, context: &Context) -> Result<Register, IrError> {
        self.register(context)
            .ok_or_else(|| IrError::MissingRegister(self.describe(context)))
    }

    /// The register class of the value: its assigned register's class, or the
    /// class demanded by its requirement before allocation.
    pub fn register_class(&self, context: &Context) -> Option<RegClass> {
        self.register(context)
            .map(|reg| reg.class)
            .or(context.values[self.0].requirement.class)
    }

    pub fn requirement<'a>(&self, context: &'a Context) -> &'a RegRequirement {
        &context.values[self.0].requirement
    }

    pub fn set_requirement(&self, context: &mut Context, requirement: RegRequirement) {
        context.values[self.0].requirement = requirement;
    }

    pub fn modifies_flags(&self, context: &Context) -> bool {
        context.values[self.0].modifies_flags
    }

    pub fn set_modifies_flags(&self, context: &mut Context, modifies_flags: bool) {
        context.values[self.0].modifies_flags = modifies_flags;
    }

    pub fn dont_spill(&self, context: &Context) -> bool {
        context.values[self.0].dont_spill
    }

    pub fn set_dont_spill(&self, context: &mut Context, dont_spill: bool) {
        context.values[self.0].dont_spill = dont_spill;
    }

    // ---------------------------------------------------------------------

    pub fn inputs(&self, context: &Context) -> Vec<Value> {
        context.values[self.0].instruction.inputs()
    }

    pub fn input(&self, context: &Context, n: usize) -> Value {
        self.inputs(context)[n]
    }

    pub fn arity(&self, context: &Context) -> usize {
        self.inputs(context).len()
    }

    /// A snapshot of the users, one entry per operand occurrence.
    pub fn users(&self, context: &Context) -> Vec<Value> {
        context.values[self.0].users.clone()
    }

    pub fn has_users(&self, context: &Context) -> bool {
        !context.values[self.0].users.is_empty()
    }

    pub fn is_perm(&self, context: &Context) -> bool {
        matches!(context.values[self.0].instruction, Instruction::Perm { .. })
    }

    pub fn is_copy(&self, context: &Context) -> bool {
        matches!(context.values[self.0].instruction, Instruction::Copy { .. })
    }

    pub fn is_copy_keep(&self, context: &Context) -> bool {
        matches!(
            context.values[self.0].instruction,
            Instruction::CopyKeep { .. }
        )
    }

    pub fn is_keep(&self, context: &Context) -> bool {
        matches!(context.values[self.0].instruction, Instruction::Keep { .. })
    }

    pub fn is_proj(&self, context: &Context) -> bool {
        matches!(context.values[self.0].instruction, Instruction::Proj { .. })
    }

    pub fn is_phi(&self, context: &Context) -> bool {
        matches!(context.values[self.0].instruction, Instruction::Phi { .. })
    }

    pub fn proj_index(&self, context: &Context) -> usize {
        match context.values[self.0].instruction {
            Instruction::Proj { index, .. } => index,
            _ => unreachable!("proj_index on non-proj node"),
        }
    }

    /// Navigates from a Proj to its producing parent; the identity on any
    /// other node.
    pub fn skip_proj(&self, context: &Context) -> Value {
        match context.values[self.0].instruction {
            Instruction::Proj { parent, .. } => parent,
            _ => *self,
        }
    }

    pub fn opcode_name<'a>(&self, context: &'a Context) -> &'a str {
        context.values[self.0].instruction.opcode_name()
    }

    /// A short diagnostic name, e.g. `perm v17`.
    pub fn describe(&self, context: &Context) -> String {
        let content = &context.values[self.0];
        format!("{} v{}", content.instruction.opcode_name(), content.idx)
    }

    // ---------------------------------------------------------------------

    /// Rewrites every user of `self` to use `replacement` instead and
    /// migrates the back edges.  `self` is left without users; it is the
    /// caller's job to kill it once it is also unscheduled.
    pub fn exchange(&self, context: &mut Context, replacement: Value) {
        assert_ne!(*self, replacement, "exchange with itself");
        let users = context.values[self.0]
            .users
            .iter()
            .copied()
            .unique()
            .collect::<Vec<_>>();
        for user in users {
            let count = context.values[user.0]
                .instruction
                .replace_value(*self, replacement);
            for _ in 0..count {
                context.values[replacement.0].users.push(user);
            }
        }
        context.values[self.0].users.clear();
    }

    /// Replaces occurrences of `old_val` among this node's inputs, fixing the
    /// back edges of both ends.
    pub(crate) fn replace_input(&self, context: &mut Context, old_val: Value, new_val: Value) {
        let count = context.values[self.0]
            .instruction
            .replace_value(old_val, new_val);
        for _ in 0..count {
            remove_one_user(context, old_val, *self);
            context.values[new_val.0].users.push(*self);
        }
    }

    /// Re-attaches a Proj to a new parent and result index.
    pub fn set_proj(&self, context: &mut Context, new_parent: Value, new_index: usize) {
        let old_parent = match context.values[self.0].instruction {
            Instruction::Proj { parent, .. } => parent,
            _ => unreachable!("set_proj on non-proj node"),
        };
        context.values[self.0].instruction = Instruction::Proj {
            parent: new_parent,
            index: new_index,
        };
        remove_one_user(context, old_parent, *self);
        context.values[new_parent.0].users.push(*self);
    }

    pub fn set_proj_index(&self, context: &mut Context, new_index: usize) {
        match &mut context.values[self.0].instruction {
            Instruction::Proj { index, .. } => *index = new_index,
            _ => unreachable!("set_proj_index on non-proj node"),
        }
    }

    /// Replaces a Perm's input list, fixing the back edges.
    pub fn set_perm_inputs(&self, context: &mut Context, new_args: &[Value]) {
        let old_args = match &context.values[self.0].instruction {
            Instruction::Perm { args } => args.clone(),
            _ => unreachable!("set_perm_inputs on non-perm node"),
        };
        for old in old_args {
            remove_one_user(context, old, *self);
        }
        context.values[self.0].instruction = Instruction::Perm {
            args: new_args.to_vec(),
        };
        for arg in new_args {
            context.values[arg.0].users.push(*self);
        }
    }

    /// Rewrites the value flowing into a Phi from `pred`, when it currently
    /// is `old_val`.
    pub fn set_phi_arg(&self, context: &mut Context, pred: Block, old_val: Value, new_val: Value) {
        let mut count = 0;
        match &mut context.values[self.0].instruction {
            Instruction::Phi { args } => {
                for (from, val) in args.iter_mut() {
                    if *from == pred && *val == old_val {
                        *val = new_val;
                        count += 1;
                    }
                }
            }
            _ => unreachable!("set_phi_arg on non-phi node"),
        }
        for _ in 0..count {
            remove_one_user(context, old_val, *self);
            context.values[new_val.0].users.push(*self);
        }
    }

    /// Unlinks the node from its operands and removes it from the arena.
    /// The node must have no users and must not be scheduled.
    pub fn kill(&self, context: &mut Context) {
        debug_assert!(
            context.values[self.0].users.is_empty(),
            "killing a node that still has users"
        );
        debug_assert!(
            !self.is_scheduled(context),
            "killing a node that is still scheduled"
        );
        for operand in self.inputs(context) {
            remove_one_user(context, operand, *self);
        }
        context.values.remove(self.0);
    }

    // ---------------------------------------------------------------------

    pub fn is_scheduled(&self, context: &Context) -> bool {
        let block = self.block(context);
        block.sched_pos(context, *self).is_some()
    }

    pub fn sched_prev(&self, context: &Context) -> Option<Value> {
        self.block(context).sched_prev(context, *self)
    }

    pub fn sched_next(&self, context: &Context) -> Option<Value> {
        self.block(context).sched_next(context, *self)
    }
}

fn remove_one_user(context: &mut Context, of: Value, user: Value) {
    let users = &mut context.values[of.0].users;
    if let Some(at) = users.iter().position(|candidate| *candidate == user) {
        users.swap_remove(at);
    }
}
