use super::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Block(pub(crate) generational_arena::Index);

pub type Label = String;

pub struct BlockContent {
    pub label: Label,
    pub function: Function,
    /// The block-local total order of its non-Proj nodes, Phis first.
    pub(crate) schedule: Vec<Value>,
}

impl Block {
    pub(crate) fn new(context: &mut Context, function: Function, label: Option<String>) -> Block {
        let label = function.unique_label(context, label);
        let content = BlockContent {
            label,
            function,
            schedule: Vec::new(),
        };
        Block(context.blocks.insert(content))
    }

    pub fn function(&self, context: &Context) -> Function {
        context.blocks[self.0].function
    }

    pub fn label(&self, context: &Context) -> String {
        context.blocks[self.0].label.clone()
    }

    pub fn ins<'a>(&self, context: &'a mut Context) -> InstructionInserter<'a> {
        InstructionInserter::new(context, *self)
    }

    // --------------------------------------------------------------------
    // Schedule operations.

    pub fn sched_iter(&self, context: &Context) -> ScheduleIterator {
        ScheduleIterator::new(context, self)
    }

    pub fn sched_first(&self, context: &Context) -> Option<Value> {
        context.blocks[self.0].schedule.first().copied()
    }

    pub fn sched_last(&self, context: &Context) -> Option<Value> {
        context.blocks[self.0].schedule.last().copied()
    }

    pub(crate) fn sched_pos(&self, context: &Context, node: Value) -> Option<usize> {
        context.blocks[self.0]
            .schedule
            .iter()
            .position(|candidate| *candidate == node)
    }

    pub fn sched_prev(&self, context: &Context, node: Value) -> Option<Value> {
        let pos = self.sched_pos(context, node)?;
        if pos == 0 {
            None
        } else {
            Some(context.blocks[self.0].schedule[pos - 1])
        }
    }

    pub fn sched_next(&self, context: &Context, node: Value) -> Option<Value> {
        let pos = self.sched_pos(context, node)?;
        context.blocks[self.0].schedule.get(pos + 1).copied()
    }

    /// True iff `later` is scheduled strictly after `earlier`.
    pub fn comes_after(&self, context: &Context, earlier: Value, later: Value) -> bool {
        match (
            self.sched_pos(context, earlier),
            self.sched_pos(context, later),
        ) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        }
    }

    pub fn add_before(&self, context: &mut Context, point: Value, node: Value) {
        let pos = self
            .sched_pos(context, point)
            .unwrap_or_else(|| panic!("schedule point {} not in block", point.describe(context)));
        context.blocks[self.0].schedule.insert(pos, node);
    }

    pub fn add_after(&self, context: &mut Context, point: Value, node: Value) {
        let pos = self
            .sched_pos(context, point)
            .unwrap_or_else(|| panic!("schedule point {} not in block", point.describe(context)));
        context.blocks[self.0].schedule.insert(pos + 1, node);
    }

    pub fn append(&self, context: &mut Context, node: Value) {
        context.blocks[self.0].schedule.push(node);
    }

    pub fn remove(&self, context: &mut Context, node: Value) {
        let pos = self
            .sched_pos(context, node)
            .unwrap_or_else(|| panic!("removing unscheduled node {}", node.describe(context)));
        context.blocks[self.0].schedule.remove(pos);
    }

    // --------------------------------------------------------------------
    // Control flow.

    /// Successor blocks, read off the targets of scheduled control ops.
    pub fn successors(&self, context: &Context) -> Vec<Block> {
        let mut succs = Vec::new();
        for node in &context.blocks[self.0].schedule {
            if let Instruction::Op { targets, .. } = &context.values[node.0].instruction {
                succs.extend(targets.iter().copied());
            }
        }
        succs
    }

    pub fn predecessors(&self, context: &Context) -> Vec<Block> {
        let function = self.function(context);
        let mut preds = Vec::new();
        for block in function.block_iter(context) {
            if block.successors(context).contains(self) {
                preds.push(block);
            }
        }
        preds
    }
}

/// Iterates a snapshot of a block's schedule, so the schedule may be edited
/// while walking it.
pub struct ScheduleIterator {
    nodes: Vec<Value>,
    next: usize,
    next_back: usize,
}

impl ScheduleIterator {
    pub(crate) fn new(context: &Context, block: &Block) -> Self {
        let nodes = context.blocks[block.0].schedule.clone();
        let next_back = nodes.len();
        ScheduleIterator {
            nodes,
            next: 0,
            next_back,
        }
    }
}

impl Iterator for ScheduleIterator {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.next < self.next_back {
            let idx = self.next;
            self.next += 1;
            Some(self.nodes[idx])
        } else {
            None
        }
    }
}

impl DoubleEndedIterator for ScheduleIterator {
    fn next_back(&mut self) -> Option<Value> {
        if self.next_back > self.next {
            self.next_back -= 1;
            Some(self.nodes[self.next_back])
        } else {
            None
        }
    }
}
