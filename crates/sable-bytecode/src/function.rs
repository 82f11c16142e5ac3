//! Function bytecode representation

use serde::{Deserialize, Serialize};

use crate::instruction::Instruction;
use crate::operand::{LocalIndex, Register, UpvalueIndex};

/// Function flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Is this an async function
    pub is_async: bool,
    /// Is this a generator function
    pub is_generator: bool,
    /// Is this an arrow function (captures `this` lexically)
    pub is_arrow: bool,
    /// Is this a class constructor
    pub is_constructor: bool,
    /// Is this a method
    pub is_method: bool,
    /// Is this a getter
    pub is_getter: bool,
    /// Is this a setter
    pub is_setter: bool,
    /// Is this a static member
    pub is_static: bool,
    /// Is strict mode
    pub is_strict: bool,
}

/// Upvalue capture mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpvalueCapture {
    /// Capture the cell of a local variable of the enclosing function
    Local(LocalIndex),
    /// Capture an upvalue of the enclosing function (transitive capture)
    Upvalue(UpvalueIndex),
}

/// One suspension point of an async function or generator.
///
/// The emitter's liveness pass computes, per `yield`/`await`, exactly the
/// locals that are live after the resume label; only those are saved into
/// the state-machine record on suspension and restored on re-entry.
/// `saved_regs` is the register high-water mark at the suspension site, so
/// in-flight intermediates survive too. `handler_stack` lists the
/// instruction indices of the `TryStart`s active at the point, letting the
/// step routine rebuild the correct handler stack before resuming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendPoint {
    /// Resume-state label (0..N within the function)
    pub state: u16,
    /// Instruction index at which execution resumes
    pub resume_pc: u32,
    /// Register that receives the sent/settled value on resume
    pub resume_dst: Register,
    /// Locals live across this suspension
    pub saved_locals: Vec<LocalIndex>,
    /// Number of registers to save/restore
    pub saved_regs: u16,
    /// Instruction indices of the active `TryStart`s, outermost first
    pub handler_stack: Vec<u32>,
}

/// A bytecode function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    /// Function name (empty for anonymous)
    pub name: Option<String>,

    /// Number of declared parameters (not counting a rest parameter)
    pub param_count: u8,

    /// Index of the rest parameter, if any
    pub rest_param: Option<u8>,

    /// Number of local variable slots (including params)
    pub local_count: u16,

    /// Number of registers needed
    pub register_count: u16,

    /// Function flags
    pub flags: FunctionFlags,

    /// Upvalue captures
    pub upvalues: Vec<UpvalueCapture>,

    /// Bytecode instructions
    pub instructions: Vec<Instruction>,

    /// Suspension points (non-empty only for async/generator functions)
    pub suspend_points: Vec<SuspendPoint>,

    /// Parameter names (diagnostics)
    pub param_names: Vec<String>,

    /// Local variable names (diagnostics)
    pub local_names: Vec<String>,
}

impl Function {
    /// Create a new function builder
    pub fn builder() -> FunctionBuilder {
        FunctionBuilder::default()
    }

    /// Get the function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Check if function is async
    #[inline]
    pub fn is_async(&self) -> bool {
        self.flags.is_async
    }

    /// Check if function is a generator
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.is_generator
    }

    /// Check if function is an async generator
    #[inline]
    pub fn is_async_generator(&self) -> bool {
        self.flags.is_async && self.flags.is_generator
    }

    /// Whether calls to this function create a resumable state machine
    #[inline]
    pub fn is_machine(&self) -> bool {
        self.flags.is_async || self.flags.is_generator
    }

    /// Find a suspend point by its state label
    pub fn suspend_point(&self, state: u16) -> Option<&SuspendPoint> {
        self.suspend_points.iter().find(|sp| sp.state == state)
    }
}

/// Builder for creating functions
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    name: Option<String>,
    param_count: u8,
    rest_param: Option<u8>,
    local_count: u16,
    register_count: u16,
    flags: FunctionFlags,
    upvalues: Vec<UpvalueCapture>,
    instructions: Vec<Instruction>,
    suspend_points: Vec<SuspendPoint>,
    param_names: Vec<String>,
    local_names: Vec<String>,
}

impl FunctionBuilder {
    /// Set function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u8) -> Self {
        self.param_count = count;
        self
    }

    /// Set the rest-parameter index
    pub fn rest_param(mut self, index: Option<u8>) -> Self {
        self.rest_param = index;
        self
    }

    /// Set local variable count
    pub fn local_count(mut self, count: u16) -> Self {
        self.local_count = count;
        self
    }

    /// Set register count
    pub fn register_count(mut self, count: u16) -> Self {
        self.register_count = count;
        self
    }

    /// Set flags
    pub fn flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set all upvalue captures
    pub fn upvalues(mut self, upvalues: Vec<UpvalueCapture>) -> Self {
        self.upvalues = upvalues;
        self
    }

    /// Set all instructions
    pub fn instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Add a single instruction
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Set the suspend-point table
    pub fn suspend_points(mut self, points: Vec<SuspendPoint>) -> Self {
        self.suspend_points = points;
        self
    }

    /// Set parameter names
    pub fn param_names(mut self, names: Vec<String>) -> Self {
        self.param_names = names;
        self
    }

    /// Set local variable names
    pub fn local_names(mut self, names: Vec<String>) -> Self {
        self.local_names = names;
        self
    }

    /// Build the function
    pub fn build(self) -> Function {
        Function {
            name: self.name,
            param_count: self.param_count,
            rest_param: self.rest_param,
            local_count: self.local_count,
            register_count: self.register_count,
            flags: self.flags,
            upvalues: self.upvalues,
            instructions: self.instructions,
            suspend_points: self.suspend_points,
            param_names: self.param_names,
            local_names: self.local_names,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Register;

    #[test]
    fn builder_roundtrip() {
        let func = Function::builder()
            .name("add")
            .param_count(2)
            .local_count(2)
            .register_count(3)
            .instruction(Instruction::AddNumber {
                dst: Register(0),
                lhs: Register(1),
                rhs: Register(2),
            })
            .instruction(Instruction::Return { src: Register(0) })
            .build();

        assert_eq!(func.display_name(), "add");
        assert_eq!(func.param_count, 2);
        assert_eq!(func.instructions.len(), 2);
        assert!(!func.is_machine());
    }

    #[test]
    fn suspend_point_lookup() {
        let func = Function::builder()
            .flags(FunctionFlags {
                is_generator: true,
                ..Default::default()
            })
            .suspend_points(vec![SuspendPoint {
                state: 0,
                resume_pc: 4,
                resume_dst: Register(1),
                saved_locals: vec![LocalIndex(0)],
                saved_regs: 2,
                handler_stack: Vec::new(),
            }])
            .build();

        assert!(func.is_machine());
        assert_eq!(func.suspend_point(0).unwrap().resume_pc, 4);
        assert!(func.suspend_point(1).is_none());
    }
}
