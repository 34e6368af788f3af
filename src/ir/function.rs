use fixedbitset::FixedBitSet;

use super::*;
use crate::registers::Register;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Function(pub(crate) generational_arena::Index);

pub struct FunctionContent {
    pub name: String,
    pub blocks: Vec<Block>,
    pub arguments: Vec<Value>,
    /// Registers (by global index) the allocator may hand out in this
    /// function.  Scratch search refuses anything outside this set.
    pub allocatable_regs: FixedBitSet,

    next_label_idx: u64,
}

impl Function {
    pub fn new(context: &mut Context, name: &str) -> Function {
        let allocatable_regs = context.registers().full_mask();
        let content = FunctionContent {
            name: name.to_owned(),
            blocks: Vec::new(),
            arguments: Vec::new(),
            allocatable_regs,
            next_label_idx: 0,
        };
        let func = Function(context.functions.insert(content));
        context.function_order.push(func);

        let entry_block = Block::new(context, func, Some("entry".to_owned()));
        context.functions[func.0].blocks.push(entry_block);

        func
    }

    pub fn name<'a>(&self, context: &'a Context) -> &'a str {
        &context.functions[self.0].name
    }

    pub fn entry_block(&self, context: &Context) -> Block {
        context.functions[self.0].blocks[0]
    }

    pub fn create_block(&self, context: &mut Context, label: Option<Label>) -> Block {
        let block = Block::new(context, *self, label);
        context.functions[self.0].blocks.push(block);
        block
    }

    /// A function parameter: a data value defined at entry, never scheduled.
    pub fn new_argument(&self, context: &mut Context) -> Value {
        let entry = self.entry_block(context);
        let arg = Value::insert(context, entry, Instruction::Argument, Mode::Data);
        context.functions[self.0].arguments.push(arg);
        arg
    }

    pub fn block_iter(&self, context: &Context) -> BlockIterator {
        BlockIterator::new(context, self)
    }

    pub fn is_register_allocatable(&self, context: &Context, reg: Register) -> bool {
        let global = context.registers().global_index(reg);
        context.functions[self.0].allocatable_regs.contains(global)
    }

    pub fn set_register_allocatable(&self, context: &mut Context, reg: Register, allocatable: bool) {
        let global = context.registers().global_index(reg);
        context.functions[self.0].allocatable_regs.set(global, allocatable);
    }

    pub(crate) fn unique_label(&self, context: &mut Context, hint: Option<String>) -> String {
        match hint {
            Some(hint) => {
                let taken = context.functions[self.0]
                    .blocks
                    .iter()
                    .any(|block| context.blocks[block.0].label == hint);
                if taken {
                    let func = &mut context.functions[self.0];
                    let idx = func.next_label_idx;
                    func.next_label_idx += 1;
                    format!("{hint}{idx}")
                } else {
                    hint
                }
            }
            None => {
                let func = &mut context.functions[self.0];
                let idx = func.next_label_idx;
                func.next_label_idx += 1;
                format!("block{idx}")
            }
        }
    }
}

pub struct BlockIterator {
    blocks: Vec<generational_arena::Index>,
    next: usize,
}

impl BlockIterator {
    pub(crate) fn new(context: &Context, function: &Function) -> Self {
        // Copy the block indices so the context may be modified during
        // iteration.
        BlockIterator {
            blocks: context.functions[function.0]
                .blocks
                .iter()
                .map(|block| block.0)
                .collect(),
            next: 0,
        }
    }
}

impl Iterator for BlockIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.next < self.blocks.len() {
            let idx = self.next;
            self.next += 1;
            Some(Block(self.blocks[idx]))
        } else {
            None
        }
    }
}
