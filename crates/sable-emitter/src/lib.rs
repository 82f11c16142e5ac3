//! # Sable Emitter
//!
//! Lowers type-checked TypeScript ASTs (parsed with oxc) into Sable
//! bytecode modules.
//!
//! ## Pipeline
//!
//! 1. Parse source with oxc
//! 2. Walk the AST, generating instructions (state machines get a
//!    liveness pre-pass; call sites go through the dispatch chain)
//! 3. Peephole cleanup
//! 4. Assemble the module

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod calls;
pub mod codegen;
pub mod context;
pub mod emitter;
pub mod error;
pub mod expr;
pub mod machine;
pub mod peephole;
pub mod scope;
pub mod strategies;
pub mod types;

pub use emitter::Emitter;
pub use error::{CompileError, CompileResult};

use sable_bytecode::Module;

/// Compile TypeScript source into a bytecode module
pub fn compile(source: &str, source_url: &str) -> CompileResult<Module> {
    let mut module = emitter::compile(source, source_url)?;
    for func in &mut module.functions {
        peephole::optimize(func);
    }
    Ok(module)
}

/// Property-key text of a numeric literal (integers print without a
/// decimal point, matching JS key stringification)
pub(crate) fn number_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_bytecode::Instruction;

    #[test]
    fn compiles_a_trivial_program() {
        let module = compile("let x = 1 + 2; console.log(x);", "test.ts").unwrap();
        let entry = module.entry_function().unwrap();
        assert!(!entry.instructions.is_empty());
        assert!(matches!(
            entry.instructions.last(),
            Some(Instruction::ReturnUndefined)
        ));
    }

    #[test]
    fn number_tags_select_specialized_arithmetic() {
        let module = compile("let a = 1; let b = 2; let x = a + b;", "test.ts").unwrap();
        let entry = module.entry_function().unwrap();
        assert!(
            entry
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::AddNumber { .. })),
            "number-tagged operands should use the specialized add"
        );
    }

    #[test]
    fn literal_arithmetic_folds() {
        let module = compile("let x = 2 * 21;", "test.ts").unwrap();
        let entry = module.entry_function().unwrap();
        assert!(
            entry
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::LoadInt { value: 42, .. })),
            "literal products should fold to a constant load"
        );
        assert!(
            !entry
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::Mul { .. } | Instruction::MulNumber { .. }))
        );
    }

    #[test]
    fn console_log_goes_through_the_intrinsic_path() {
        let module = compile("console.log(1);", "test.ts").unwrap();
        let entry = module.entry_function().unwrap();
        assert!(
            entry
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::CallIntrinsic { .. }))
        );
    }

    #[test]
    fn generators_get_suspend_points() {
        let module = compile("function* g(){ yield 1; yield 2; }", "test.ts").unwrap();
        let generator = module
            .functions
            .iter()
            .find(|f| f.flags.is_generator)
            .expect("generator function present");
        assert_eq!(generator.suspend_points.len(), 2);
        assert_eq!(generator.suspend_points[0].state, 0);
        assert_eq!(generator.suspend_points[1].state, 1);
    }

    #[test]
    fn parse_errors_surface() {
        assert!(matches!(
            compile("let = ;", "bad.ts"),
            Err(CompileError::Parse(_))
        ));
    }
}
