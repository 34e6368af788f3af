//! Renders functions and their schedules as text, for logs and test
//! diagnostics.

use super::*;

pub fn function_to_string(context: &Context, function: Function) -> String {
    let mut text = format!("fn {}:\n", function.name(context));
    for block in function.block_iter(context) {
        text.push_str(&format!("{}:\n", block.label(context)));
        for node in block.sched_iter(context) {
            text.push_str(&format!("  {}\n", node_to_string(context, node)));
            if node.mode(context) == Mode::Tuple {
                for user in node.users(context) {
                    if user.is_proj(context) {
                        text.push_str(&format!("    {}\n", node_to_string(context, user)));
                    }
                }
            }
        }
    }
    text
}

pub fn node_to_string(context: &Context, node: Value) -> String {
    let content = &context.values[node.0];
    let mut text = format!("v{} = ", content.idx);
    match &content.instruction {
        Instruction::Argument => text.push_str("arg"),
        Instruction::Op {
            opcode,
            args,
            targets,
        } => {
            text.push_str(opcode);
            text.push_str(&operand_list(context, args));
            for target in targets {
                text.push_str(&format!(" -> {}", target.label(context)));
            }
        }
        Instruction::Perm { args } => {
            text.push_str("perm");
            text.push_str(&operand_list(context, args));
        }
        Instruction::Copy { arg } => {
            text.push_str(&format!("copy v{}", context.values[arg.0].idx));
        }
        Instruction::CopyKeep { arg, kept, .. } => {
            text.push_str(&format!("copykeep v{}, keeping", context.values[arg.0].idx));
            text.push_str(&operand_list(context, kept));
        }
        Instruction::Keep { kept } => {
            text.push_str("keep");
            text.push_str(&operand_list(context, kept));
        }
        Instruction::Proj { parent, index } => {
            text.push_str(&format!("proj #{} of v{}", index, context.values[parent.0].idx));
        }
        Instruction::Phi { args } => {
            text.push_str("phi");
            let alts = args
                .iter()
                .map(|(block, val)| {
                    format!(" [{}: v{}]", block.label(context), context.values[val.0].idx)
                })
                .collect::<String>();
            text.push_str(&alts);
        }
    }
    if let Some(reg) = content.register {
        text.push_str(&format!("  ; {}", context.registers().name(reg)));
    }
    text
}

fn operand_list(context: &Context, operands: &[Value]) -> String {
    operands
        .iter()
        .enumerate()
        .map(|(n, val)| {
            let sep = if n == 0 { " " } else { ", " };
            format!("{}v{}", sep, context.values[val.0].idx)
        })
        .collect()
}
