//! Peephole cleanup over emitted instruction streams.
//!
//! Only size-preserving rewrites, so jump offsets stay valid:
//! self-moves become `Nop`, and jumps that land on an unconditional
//! jump are threaded to its final target.

use sable_bytecode::{Function, Instruction, JumpOffset};

/// Maximum chain length followed while threading jumps
const MAX_THREAD: usize = 8;

/// Run the peephole pass over one function
pub fn optimize(func: &mut Function) {
    elide_self_moves(&mut func.instructions);
    thread_jumps(&mut func.instructions);
}

fn elide_self_moves(instructions: &mut [Instruction]) {
    for instr in instructions.iter_mut() {
        if let Instruction::Move { dst, src } = instr {
            if dst == src {
                *instr = Instruction::Nop;
            }
        }
    }
}

/// Final target of a jump chain starting at the instruction after `idx`
fn resolve_target(instructions: &[Instruction], idx: usize, offset: i32) -> i32 {
    let mut target = idx as i64 + 1 + offset as i64;
    for _ in 0..MAX_THREAD {
        match instructions.get(target as usize) {
            Some(Instruction::Jump { offset }) => {
                let next = target + 1 + offset.0 as i64;
                if next == target {
                    break;
                }
                target = next;
            }
            _ => break,
        }
    }
    (target - idx as i64 - 1) as i32
}

fn thread_jumps(instructions: &mut Vec<Instruction>) {
    for idx in 0..instructions.len() {
        let threaded = match &instructions[idx] {
            Instruction::Jump { offset } => {
                Some(Instruction::Jump {
                    offset: JumpOffset(resolve_target(instructions, idx, offset.0)),
                })
            }
            Instruction::JumpIfTrue { cond, offset } => Some(Instruction::JumpIfTrue {
                cond: *cond,
                offset: JumpOffset(resolve_target(instructions, idx, offset.0)),
            }),
            Instruction::JumpIfFalse { cond, offset } => Some(Instruction::JumpIfFalse {
                cond: *cond,
                offset: JumpOffset(resolve_target(instructions, idx, offset.0)),
            }),
            _ => None,
        };
        if let Some(instr) = threaded {
            instructions[idx] = instr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_bytecode::Register;

    #[test]
    fn self_moves_become_nops() {
        let mut func = Function::builder()
            .instruction(Instruction::Move {
                dst: Register(1),
                src: Register(1),
            })
            .instruction(Instruction::Move {
                dst: Register(1),
                src: Register(2),
            })
            .build();
        optimize(&mut func);
        assert_eq!(func.instructions[0], Instruction::Nop);
        assert!(matches!(func.instructions[1], Instruction::Move { .. }));
    }

    #[test]
    fn jump_chains_are_threaded() {
        // 0: Jump +1 (to 2)   2: Jump +1 (to 4)
        let mut func = Function::builder()
            .instruction(Instruction::Jump {
                offset: JumpOffset(1),
            })
            .instruction(Instruction::Nop)
            .instruction(Instruction::Jump {
                offset: JumpOffset(1),
            })
            .instruction(Instruction::Nop)
            .instruction(Instruction::ReturnUndefined)
            .build();
        optimize(&mut func);
        match &func.instructions[0] {
            Instruction::Jump { offset } => assert_eq!(offset.0, 3), // straight to 4
            other => panic!("unexpected {other:?}"),
        }
    }
}
