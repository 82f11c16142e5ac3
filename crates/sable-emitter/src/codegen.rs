//! Instruction stream construction: register allocation, jump patching,
//! function nesting, and upvalue registration.

use sable_bytecode::{
    ClassDef, Constant, ConstantIndex, ConstantPool, Function, FunctionFlags, Instruction,
    JumpOffset, Module, Register, SuspendPoint, UpvalueCapture, UpvalueIndex,
    function::FunctionBuilder,
    module::{ExportRecord, ImportRecord},
};

use crate::error::{CompileError, CompileResult};
use crate::scope::{Binding, ScopeChain, VariableKind};
use crate::types::StaticType;

/// Register allocator with a free-list. Call frames need contiguous
/// blocks, which bypass the free-list.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    next: u16,
    max: u16,
    free: Vec<u16>,
}

impl RegisterAllocator {
    /// Create a new allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a register
    pub fn alloc(&mut self) -> CompileResult<Register> {
        if let Some(id) = self.free.pop() {
            return Ok(Register(id));
        }
        let reg = Register(self.next);
        self.next = self
            .next
            .checked_add(1)
            .ok_or(CompileError::TooManyRegisters)?;
        self.max = self.max.max(self.next);
        Ok(reg)
    }

    /// Allocate a contiguous block of fresh registers (calling convention)
    pub fn alloc_block(&mut self, count: u16) -> CompileResult<Register> {
        let base = self.next;
        self.next = self
            .next
            .checked_add(count)
            .ok_or(CompileError::TooManyRegisters)?;
        self.max = self.max.max(self.next);
        Ok(Register(base))
    }

    /// Release a register for reuse
    pub fn free(&mut self, reg: Register) {
        self.free.push(reg.0);
    }

    /// Release a contiguous block
    pub fn free_block(&mut self, base: Register, count: u16) {
        for i in 0..count {
            self.free.push(base.0 + i);
        }
    }

    /// Current allocation watermark (live-register count at this point)
    pub fn position(&self) -> u16 {
        self.next
    }

    /// Highest register count ever needed
    pub fn max_used(&self) -> u16 {
        self.max
    }
}

/// State of one function being compiled
#[derive(Debug)]
pub struct FunctionContext {
    /// Function name
    pub name: Option<String>,
    /// Emitted instructions
    pub instructions: Vec<Instruction>,
    /// Register allocator
    pub registers: RegisterAllocator,
    /// Scope chain
    pub scopes: ScopeChain,
    /// Function flags
    pub flags: FunctionFlags,
    /// Declared parameter count
    pub param_count: u8,
    /// Rest-parameter local slot
    pub rest_param: Option<u8>,
    /// Captured upvalues
    pub upvalues: Vec<UpvalueCapture>,
    /// Suspend-point table (async/generator)
    pub suspend_points: Vec<SuspendPoint>,
    /// Next suspend-state label
    pub next_state: u16,
    /// Instruction indices of currently open `TryStart`s
    pub try_stack: Vec<usize>,
}

impl FunctionContext {
    /// Create a fresh context
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            instructions: Vec::new(),
            registers: RegisterAllocator::new(),
            scopes: ScopeChain::new(),
            flags: FunctionFlags::default(),
            param_count: 0,
            rest_param: None,
            upvalues: Vec::new(),
            suspend_points: Vec::new(),
            next_state: 0,
            try_stack: Vec::new(),
        }
    }

    /// Emit an instruction
    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Current instruction index (for jump patching)
    pub fn current_index(&self) -> usize {
        self.instructions.len()
    }

    /// Patch a jump at `index` to the given relative offset
    pub fn patch_jump(&mut self, index: usize, offset: i32) {
        match &mut self.instructions[index] {
            Instruction::Jump { offset: o }
            | Instruction::JumpIfTrue { offset: o, .. }
            | Instruction::JumpIfFalse { offset: o, .. }
            | Instruction::JumpIfNullish { offset: o, .. }
            | Instruction::JumpIfNotNullish { offset: o, .. }
            | Instruction::TryStart { catch_offset: o } => *o = JumpOffset(offset),
            other => panic!("not a jump instruction: {other:?}"),
        }
    }

    /// Build the finished function
    pub fn build(self) -> Function {
        FunctionBuilder::default()
            .name(self.name.unwrap_or_default())
            .param_count(self.param_count)
            .rest_param(self.rest_param)
            .local_count(self.scopes.local_count())
            .local_names(self.scopes.collect_local_names())
            .register_count(self.registers.max_used())
            .flags(self.flags)
            .upvalues(self.upvalues)
            .suspend_points(self.suspend_points)
            .instructions(self.instructions)
            .build()
    }
}

/// Code generator: constant pool, function stack, class table, and the
/// module assembly at the end.
pub struct CodeGen {
    /// Constant pool
    pub constants: ConstantPool,
    /// Finished functions
    pub functions: Vec<Function>,
    /// Class table entries
    pub classes: Vec<ClassDef>,
    /// The function currently being compiled
    pub current: FunctionContext,
    func_stack: Vec<FunctionContext>,
    imports: Vec<ImportRecord>,
    exports: Vec<ExportRecord>,
}

impl CodeGen {
    /// Create a generator with the module entry function open
    pub fn new() -> Self {
        Self {
            constants: ConstantPool::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            current: FunctionContext::new(Some("main".to_string())),
            func_stack: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Add a string constant
    pub fn add_string(&mut self, s: &str) -> ConstantIndex {
        ConstantIndex(self.constants.add_string(s))
    }

    /// Add a number constant
    pub fn add_number(&mut self, n: f64) -> ConstantIndex {
        ConstantIndex(self.constants.add_number(n))
    }

    /// Add a BigInt constant
    pub fn add_bigint(&mut self, digits: &str) -> ConstantIndex {
        ConstantIndex(self.constants.add(Constant::BigInt(digits.into())))
    }

    /// Add a RegExp constant
    pub fn add_regex(&mut self, pattern: &str, flags: &str) -> ConstantIndex {
        ConstantIndex(self.constants.add(Constant::Regex {
            pattern: pattern.into(),
            flags: flags.into(),
        }))
    }

    /// Add a tagged-template site constant
    pub fn add_template(
        &mut self,
        cooked: Vec<Option<Box<str>>>,
        raw: Vec<Box<str>>,
    ) -> ConstantIndex {
        ConstantIndex(self.constants.add(Constant::Template { cooked, raw }))
    }

    /// Emit an instruction into the current function
    pub fn emit(&mut self, instruction: Instruction) {
        self.current.emit(instruction);
    }

    /// Allocate a register
    pub fn alloc_reg(&mut self) -> CompileResult<Register> {
        self.current.registers.alloc()
    }

    /// Allocate a contiguous register block
    pub fn alloc_block(&mut self, count: u16) -> CompileResult<Register> {
        self.current.registers.alloc_block(count)
    }

    /// Free a register
    pub fn free_reg(&mut self, reg: Register) {
        self.current.registers.free(reg);
    }

    /// Free a contiguous register block
    pub fn free_block(&mut self, base: Register, count: u16) {
        self.current.registers.free_block(base, count);
    }

    /// Current instruction index
    pub fn current_index(&self) -> usize {
        self.current.current_index()
    }

    /// Patch a previously emitted jump to land on the next instruction
    pub fn patch_to_here(&mut self, jump_index: usize) {
        let offset = self.current.current_index() as i32 - jump_index as i32 - 1;
        self.current.patch_jump(jump_index, offset);
    }

    /// Patch a jump to a specific instruction index
    pub fn patch_to(&mut self, jump_index: usize, target: usize) {
        let offset = target as i32 - jump_index as i32 - 1;
        self.current.patch_jump(jump_index, offset);
    }

    /// Emit a placeholder unconditional jump
    pub fn emit_jump(&mut self) -> usize {
        let idx = self.current_index();
        self.emit(Instruction::Jump { offset: JumpOffset(0) });
        idx
    }

    /// Emit a placeholder jump-if-false
    pub fn emit_jump_if_false(&mut self, cond: Register) -> usize {
        let idx = self.current_index();
        self.emit(Instruction::JumpIfFalse { cond, offset: JumpOffset(0) });
        idx
    }

    /// Emit a placeholder jump-if-true
    pub fn emit_jump_if_true(&mut self, cond: Register) -> usize {
        let idx = self.current_index();
        self.emit(Instruction::JumpIfTrue { cond, offset: JumpOffset(0) });
        idx
    }

    /// Enter a block scope
    pub fn enter_scope(&mut self) {
        self.current.scopes.enter(false);
    }

    /// Exit a block scope
    pub fn exit_scope(&mut self) {
        self.current.scopes.exit();
    }

    /// Declare a variable in the current scope
    pub fn declare_variable(
        &mut self,
        name: &str,
        kind: VariableKind,
        ty: StaticType,
    ) -> CompileResult<u16> {
        self.current.scopes.declare(name, kind, ty).ok_or_else(|| {
            CompileError::Syntax {
                message: format!("Identifier '{name}' has already been declared"),
                location: String::new(),
            }
        })
    }

    /// Resolve a name: first in the current function's scopes, then
    /// through enclosing function contexts (producing an upvalue), else
    /// it is global.
    pub fn resolve_variable(&self, name: &str) -> Resolved {
        if let Some(binding) = self.current.scopes.resolve(name) {
            return Resolved::Local(binding.clone());
        }

        for (depth, parent) in self.func_stack.iter().rev().enumerate() {
            if let Some(binding) = parent.scopes.resolve(name) {
                return Resolved::Upvalue {
                    binding: binding.clone(),
                    depth: depth + 1,
                };
            }
        }
        Resolved::Global
    }

    /// Register a capture of `local_index` from `depth` function scopes
    /// up; returns the index in the current function's upvalue array.
    /// Transitive captures thread through every intermediate function.
    pub fn register_upvalue(&mut self, local_index: u16, depth: usize) -> UpvalueIndex {
        if depth == 1 {
            let capture = UpvalueCapture::Local(sable_bytecode::LocalIndex(local_index));
            return UpvalueIndex(add_upvalue(&mut self.current.upvalues, capture));
        }

        // Intermediate functions capture in turn so the innermost one can
        // reach the cell through its immediate parent.
        let stack_len = self.func_stack.len();
        let owner = stack_len - depth;
        let first_capturer = owner + 1;

        let mut prev = add_upvalue(
            &mut self.func_stack[first_capturer].upvalues,
            UpvalueCapture::Local(sable_bytecode::LocalIndex(local_index)),
        );
        for idx in (first_capturer + 1)..stack_len {
            prev = add_upvalue(
                &mut self.func_stack[idx].upvalues,
                UpvalueCapture::Upvalue(UpvalueIndex(prev)),
            );
        }
        UpvalueIndex(add_upvalue(
            &mut self.current.upvalues,
            UpvalueCapture::Upvalue(UpvalueIndex(prev)),
        ))
    }

    /// Start compiling a nested function
    pub fn enter_function(&mut self, name: Option<String>) {
        let old = std::mem::replace(&mut self.current, FunctionContext::new(name));
        self.func_stack.push(old);
    }

    /// Finish the current function; returns its index
    pub fn exit_function(&mut self) -> u32 {
        let finished = std::mem::replace(
            &mut self.current,
            self.func_stack.pop().expect("function stack underflow"),
        );
        let idx = self.functions.len() as u32;
        self.functions.push(finished.build());
        idx
    }

    /// Allocate the next suspend-state label in the current function
    pub fn next_suspend_state(&mut self) -> u16 {
        let state = self.current.next_state;
        self.current.next_state += 1;
        state
    }

    /// Add a class table entry
    pub fn add_class(&mut self, class: ClassDef) -> u32 {
        let idx = self.classes.len() as u32;
        self.classes.push(class);
        idx
    }

    /// Record an import
    pub fn add_import(&mut self, record: ImportRecord) {
        self.imports.push(record);
    }

    /// Record an export
    pub fn add_export(&mut self, record: ExportRecord) {
        self.exports.push(record);
    }

    /// Finalize the module. The entry function is appended last so child
    /// function indices remain stable.
    pub fn finish(mut self, source_url: &str) -> Module {
        let main = self.current.build();
        let entry_point = self.functions.len() as u32;
        self.functions.push(main);

        let mut builder = Module::builder(source_url)
            .constants(self.constants)
            .entry_point(entry_point);
        for import in self.imports {
            builder = builder.import(import);
        }
        for export in self.exports {
            builder = builder.export(export);
        }
        for class in self.classes {
            builder.add_class(class);
        }
        for func in self.functions {
            builder.add_function(func);
        }
        builder.build()
    }
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

fn add_upvalue(upvalues: &mut Vec<UpvalueCapture>, capture: UpvalueCapture) -> u16 {
    for (i, existing) in upvalues.iter().enumerate() {
        if *existing == capture {
            return i as u16;
        }
    }
    let idx = upvalues.len() as u16;
    upvalues.push(capture);
    idx
}

/// Resolution result for a source-visible name
pub enum Resolved {
    /// Local slot in the current function
    Local(Binding),
    /// Captured from an enclosing function
    Upvalue {
        /// The binding in its declaring function
        binding: Binding,
        /// Function scopes up (1 = immediate parent)
        depth: usize,
    },
    /// Not lexically bound: global namespace or undefined
    Global,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_allocator_reuses_freed() {
        let mut alloc = RegisterAllocator::new();
        let r0 = alloc.alloc().unwrap();
        let r1 = alloc.alloc().unwrap();
        assert_eq!((r0.0, r1.0), (0, 1));

        alloc.free(r1);
        let r2 = alloc.alloc().unwrap();
        assert_eq!(r2.0, 1);
        assert_eq!(alloc.max_used(), 2);

        // Blocks bypass the free-list for contiguity
        alloc.free(r2);
        let block = alloc.alloc_block(3).unwrap();
        assert_eq!(block.0, 2);
        assert_eq!(alloc.max_used(), 5);
    }

    #[test]
    fn jump_patching_lands_after_target() {
        let mut cg = CodeGen::new();
        let cond = cg.alloc_reg().unwrap();
        cg.emit(Instruction::LoadTrue { dst: cond });
        let jump = cg.emit_jump_if_false(cond);
        cg.emit(Instruction::LoadInt { dst: cond, value: 1 });
        cg.patch_to_here(jump);
        cg.emit(Instruction::Return { src: cond });

        let module = cg.finish("t.ts");
        let entry = module.entry_function().unwrap();
        match &entry.instructions[1] {
            Instruction::JumpIfFalse { offset, .. } => assert_eq!(offset.0, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_function_upvalue_registration() {
        let mut cg = CodeGen::new();
        cg.declare_variable("x", VariableKind::Let, StaticType::Unknown)
            .unwrap();

        cg.enter_function(Some("inner".into()));
        let resolved = cg.resolve_variable("x");
        let (binding, depth) = match resolved {
            Resolved::Upvalue { binding, depth } => (binding, depth),
            _ => panic!("expected upvalue"),
        };
        let idx = cg.register_upvalue(binding.index, depth);
        assert_eq!(idx.0, 0);
        // Deduplicated on repeat
        let idx2 = cg.register_upvalue(binding.index, depth);
        assert_eq!(idx2.0, 0);
        cg.exit_function();

        assert_eq!(cg.functions[0].upvalues.len(), 1);
    }
}
