use generational_arena::Arena;

use super::*;
use crate::registers::RegisterFile;

/// The owner of all IR entities.
///
/// Functions, blocks and values live in arenas; the handle types
/// ([Function], [Block], [Value]) are copyable indices into them.  Everything
/// else in the crate reads and mutates the graph through a `Context`
/// reference.
pub struct Context {
    pub(crate) functions: Arena<FunctionContent>,
    pub(crate) blocks: Arena<BlockContent>,
    pub(crate) values: Arena<ValueContent>,

    pub(crate) function_order: Vec<Function>,
    registers: RegisterFile,
    next_value_idx: u64,
}

impl Context {
    pub fn new(registers: RegisterFile) -> Context {
        Context {
            functions: Arena::new(),
            blocks: Arena::new(),
            values: Arena::new(),
            function_order: Vec::new(),
            registers,
            next_value_idx: 0,
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn function_iter(&self) -> impl Iterator<Item = Function> + '_ {
        self.function_order.iter().copied()
    }

    pub(crate) fn take_value_idx(&mut self) -> u64 {
        let idx = self.next_value_idx;
        self.next_value_idx += 1;
        idx
    }
}
