//! Recursive lowering of the AST into linear instruction streams.
//!
//! Statements leave the register stack depth unchanged; every expression
//! produces exactly one result register (freed by its consumer) together
//! with a static representation tag. Tags are never carried across
//! statement boundaries or control-flow joins.

use std::rc::Rc;

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::SourceType;

use sable_bytecode::{
    ClassDef, ClassIndex, Instruction, LocalIndex, MethodDef, MethodKind, Module, PropertyDef,
    Register,
};

use crate::codegen::{CodeGen, Resolved};
use crate::context::{ClassRecord, CompilationContext, FunctionRecord, PropRecord};
use crate::error::{CompileError, CompileResult};
use crate::machine::{self, MachineAnalysis};
use crate::scope::VariableKind;
use crate::types::{StaticTag, StaticType, TypedReg};

/// Maximum AST nesting depth, to keep recursion bounded
const MAX_COMPILE_DEPTH: usize = 500;

/// Compile TypeScript source to a bytecode module
pub fn compile(source: &str, source_url: &str) -> CompileResult<Module> {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(source_url).unwrap_or_else(|_| SourceType::ts());

    let parser = Parser::new(&allocator, source, source_type);
    let parsed = parser.parse();
    if let Some(error) = parsed.errors.first() {
        return Err(CompileError::Parse(error.to_string()));
    }

    let mut emitter = Emitter::new();
    emitter.compile_program(&parsed.program)?;
    emitter.cg.emit(Instruction::ReturnUndefined);
    Ok(emitter.cg.finish(source_url))
}

/// Per-function emission state beyond what `CodeGen` tracks
pub(crate) struct FnInfo {
    /// Liveness analysis when the function is a state machine
    pub analysis: Option<Rc<MachineAnalysis>>,
    /// Enclosing class (methods and the closures nested in them)
    pub class: Option<String>,
    /// Compiling the declaring constructor (readonly writes allowed)
    pub is_ctor: bool,
}

/// An open loop or switch, for `break`/`continue` patching
pub(crate) struct ControlScope {
    pub is_loop: bool,
    pub labels: Vec<String>,
    pub break_jumps: Vec<usize>,
    pub continue_jumps: Vec<usize>,
    pub continue_target: Option<usize>,
    /// `finally_stack` height at scope entry: breaks run everything above
    pub finally_depth: usize,
}

/// The expression/statement emitter
pub struct Emitter<'a> {
    pub(crate) cg: CodeGen,
    pub(crate) ctx: CompilationContext,
    pub(crate) loop_stack: Vec<ControlScope>,
    pub(crate) fn_stack: Vec<FnInfo>,
    pending_labels: Vec<String>,
    finally_stack: Vec<&'a BlockStatement<'a>>,
    depth: usize,
}

impl<'a> Emitter<'a> {
    /// Create an emitter with the module entry function open
    pub fn new() -> Self {
        Self {
            cg: CodeGen::new(),
            ctx: CompilationContext::new(),
            loop_stack: Vec::new(),
            fn_stack: vec![FnInfo {
                analysis: None,
                class: None,
                is_ctor: false,
            }],
            pending_labels: Vec::new(),
            finally_stack: Vec::new(),
            depth: 0,
        }
    }

    pub(crate) fn fn_info(&self) -> &FnInfo {
        self.fn_stack.last().expect("function info stack underflow")
    }

    fn enter_depth(&mut self) -> CompileResult<()> {
        self.depth += 1;
        if self.depth > MAX_COMPILE_DEPTH {
            return Err(CompileError::internal("maximum AST nesting depth exceeded"));
        }
        Ok(())
    }

    fn exit_depth(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ========================================================================
    // Program
    // ========================================================================

    /// Compile the whole program into the entry function
    pub fn compile_program(&mut self, program: &'a Program<'a>) -> CompileResult<()> {
        // Top-level await turns the entry function into an async machine
        let analysis = machine::analyze(&program.body);
        if !analysis.suspend_offsets.is_empty() {
            self.cg.current.flags.is_async = true;
            self.fn_stack[0].analysis = Some(Rc::new(analysis));
        }

        self.compile_statements_hoisted(&program.body)
    }

    /// Hoist `var` names and function declarations, then compile the
    /// remaining statements in order.
    fn compile_statements_hoisted(&mut self, statements: &'a [Statement<'a>]) -> CompileResult<()> {
        self.hoist_var_declarations(statements)?;

        // Phase 1: declare every function name so bodies can reference
        // each other regardless of order
        let mut hoisted = Vec::new();
        for (idx, stmt) in statements.iter().enumerate() {
            if let Statement::FunctionDeclaration(func) = stmt {
                if let Some(id) = &func.id {
                    self.declare_function_record(func, id.name.as_str())?;
                }
                hoisted.push(idx);
            }
        }

        // Phase 2: compile and assign the hoisted functions
        for stmt in statements {
            if let Statement::FunctionDeclaration(func) = stmt {
                self.compile_function_declaration_body(func)?;
            }
        }

        for (idx, stmt) in statements.iter().enumerate() {
            if !hoisted.contains(&idx) {
                self.compile_statement(stmt)?;
            }
        }
        Ok(())
    }

    fn declare_function_record(
        &mut self,
        func: &Function<'a>,
        name: &str,
    ) -> CompileResult<()> {
        // Namespace members live under their qualified name so sibling
        // namespaces cannot collide in the shared entry scope
        let qualified = self.ctx.qualify(name);
        self.cg
            .declare_variable(&qualified, VariableKind::Var, StaticType::Function)?;
        self.ctx.functions.insert(
            qualified.clone(),
            FunctionRecord {
                qualified,
                arity: func.params.items.len() as u8,
                has_rest: func.params.rest.is_some(),
                is_async: func.r#async,
                is_generator: func.generator,
            },
        );
        Ok(())
    }

    /// Collect `var` names (without initializers) from nested statements,
    /// stopping at function boundaries.
    fn hoist_var_declarations(&mut self, statements: &'a [Statement<'a>]) -> CompileResult<()> {
        for stmt in statements {
            self.hoist_var_names_from_stmt(stmt)?;
        }
        Ok(())
    }

    fn hoist_var_names_from_stmt(&mut self, stmt: &'a Statement<'a>) -> CompileResult<()> {
        match stmt {
            Statement::VariableDeclaration(decl) if decl.kind == VariableDeclarationKind::Var => {
                for declarator in &decl.declarations {
                    self.hoist_var_names_from_binding(&declarator.id)?;
                }
            }
            Statement::BlockStatement(block) => {
                for s in &block.body {
                    self.hoist_var_names_from_stmt(s)?;
                }
            }
            Statement::IfStatement(is) => {
                self.hoist_var_names_from_stmt(&is.consequent)?;
                if let Some(alt) = &is.alternate {
                    self.hoist_var_names_from_stmt(alt)?;
                }
            }
            Statement::WhileStatement(ws) => self.hoist_var_names_from_stmt(&ws.body)?,
            Statement::DoWhileStatement(dws) => self.hoist_var_names_from_stmt(&dws.body)?,
            Statement::ForStatement(fs) => {
                if let Some(ForStatementInit::VariableDeclaration(decl)) = &fs.init {
                    if decl.kind == VariableDeclarationKind::Var {
                        for declarator in &decl.declarations {
                            self.hoist_var_names_from_binding(&declarator.id)?;
                        }
                    }
                }
                self.hoist_var_names_from_stmt(&fs.body)?;
            }
            Statement::ForOfStatement(fo) => {
                if let ForStatementLeft::VariableDeclaration(decl) = &fo.left {
                    if decl.kind == VariableDeclarationKind::Var {
                        for declarator in &decl.declarations {
                            self.hoist_var_names_from_binding(&declarator.id)?;
                        }
                    }
                }
                self.hoist_var_names_from_stmt(&fo.body)?;
            }
            Statement::ForInStatement(fi) => {
                if let ForStatementLeft::VariableDeclaration(decl) = &fi.left {
                    if decl.kind == VariableDeclarationKind::Var {
                        for declarator in &decl.declarations {
                            self.hoist_var_names_from_binding(&declarator.id)?;
                        }
                    }
                }
                self.hoist_var_names_from_stmt(&fi.body)?;
            }
            Statement::TryStatement(ts) => {
                for s in &ts.block.body {
                    self.hoist_var_names_from_stmt(s)?;
                }
                if let Some(handler) = &ts.handler {
                    for s in &handler.body.body {
                        self.hoist_var_names_from_stmt(s)?;
                    }
                }
                if let Some(finalizer) = &ts.finalizer {
                    for s in &finalizer.body {
                        self.hoist_var_names_from_stmt(s)?;
                    }
                }
            }
            Statement::SwitchStatement(ss) => {
                for case in &ss.cases {
                    for s in &case.consequent {
                        self.hoist_var_names_from_stmt(s)?;
                    }
                }
            }
            Statement::LabeledStatement(ls) => self.hoist_var_names_from_stmt(&ls.body)?,
            _ => {}
        }
        Ok(())
    }

    fn hoist_var_names_from_binding(&mut self, pattern: &BindingPattern<'a>) -> CompileResult<()> {
        match pattern {
            BindingPattern::BindingIdentifier(ident) => {
                self.cg
                    .declare_variable(&ident.name, VariableKind::Var, StaticType::Unknown)?;
            }
            BindingPattern::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    self.hoist_var_names_from_binding(&prop.value)?;
                }
                if let Some(rest) = &obj.rest {
                    self.hoist_var_names_from_binding(&rest.argument)?;
                }
            }
            BindingPattern::ArrayPattern(arr) => {
                for elem in arr.elements.iter().flatten() {
                    self.hoist_var_names_from_binding(elem)?;
                }
                if let Some(rest) = &arr.rest {
                    self.hoist_var_names_from_binding(&rest.argument)?;
                }
            }
            BindingPattern::AssignmentPattern(assign) => {
                self.hoist_var_names_from_binding(&assign.left)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub(crate) fn compile_statement(&mut self, stmt: &'a Statement<'a>) -> CompileResult<()> {
        self.enter_depth()?;
        let result = self.compile_statement_inner(stmt);
        self.exit_depth();
        result
    }

    fn compile_statement_inner(&mut self, stmt: &'a Statement<'a>) -> CompileResult<()> {
        match stmt {
            Statement::VariableDeclaration(decl) => self.compile_variable_declaration(decl),
            Statement::ExpressionStatement(es) => {
                let value = self.compile_expression(&es.expression)?;
                self.cg.free_reg(value.reg);
                Ok(())
            }
            Statement::BlockStatement(block) => {
                self.cg.enter_scope();
                let result = self.compile_statements_hoisted(&block.body);
                self.cg.exit_scope();
                result
            }
            Statement::IfStatement(is) => self.compile_if_statement(is),
            Statement::WhileStatement(ws) => self.compile_while_statement(ws),
            Statement::DoWhileStatement(dws) => self.compile_do_while_statement(dws),
            Statement::ForStatement(fs) => self.compile_for_statement(fs),
            Statement::ForOfStatement(fo) => self.compile_for_of_statement(fo),
            Statement::ForInStatement(fi) => self.compile_for_in_statement(fi),
            Statement::ReturnStatement(rs) => self.compile_return_statement(rs),
            Statement::BreakStatement(bs) => self.compile_break_statement(bs),
            Statement::ContinueStatement(cs) => self.compile_continue_statement(cs),
            Statement::SwitchStatement(ss) => self.compile_switch_statement(ss),
            Statement::ThrowStatement(ts) => {
                let value = self.compile_expression(&ts.argument)?;
                self.cg.emit(Instruction::Throw { src: value.reg });
                self.cg.free_reg(value.reg);
                Ok(())
            }
            Statement::TryStatement(ts) => self.compile_try_statement(ts),
            Statement::LabeledStatement(ls) => {
                self.pending_labels.push(ls.label.name.to_string());
                self.compile_statement(&ls.body)
            }
            Statement::FunctionDeclaration(func) => {
                // Non-hoisted position (e.g. export wrapper re-entry)
                if let Some(id) = &func.id {
                    if self.cg.current.scopes.resolve(&id.name).is_none() {
                        self.declare_function_record(func, id.name.as_str())?;
                    }
                }
                self.compile_function_declaration_body(func)
            }
            Statement::ClassDeclaration(class) => {
                let reg = self.compile_class_declaration(class)?;
                self.cg.free_reg(reg);
                Ok(())
            }
            Statement::ImportDeclaration(import) => self.compile_import_declaration(import),
            Statement::ExportNamedDeclaration(export) => self.compile_export_named(export),
            Statement::ExportDefaultDeclaration(export) => self.compile_export_default(export),
            Statement::ExportAllDeclaration(export) => {
                self.cg
                    .add_export(sable_bytecode::module::ExportRecord::ReExportAll {
                        specifier: export.source.value.to_string(),
                    });
                Ok(())
            }
            Statement::TSEnumDeclaration(decl) => self.compile_ts_enum(decl),
            Statement::TSModuleDeclaration(decl) => self.compile_ts_namespace(decl),
            Statement::TSTypeAliasDeclaration(_)
            | Statement::TSInterfaceDeclaration(_)
            | Statement::EmptyStatement(_) => Ok(()),
            Statement::DebuggerStatement(_) => {
                self.cg.emit(Instruction::Nop);
                Ok(())
            }
            other => Err(CompileError::unsupported(format!(
                "statement {:?}",
                std::mem::discriminant(other)
            ))),
        }
    }

    fn compile_variable_declaration(
        &mut self,
        decl: &'a VariableDeclaration<'a>,
    ) -> CompileResult<()> {
        let kind = match decl.kind {
            VariableDeclarationKind::Const => VariableKind::Const,
            VariableDeclarationKind::Var => VariableKind::Var,
            _ => VariableKind::Let,
        };
        for declarator in &decl.declarations {
            let (value, ty) = match &declarator.init {
                Some(init) => {
                    let ty = self.static_type_of(init);
                    (self.compile_expression(init)?, ty)
                }
                None => {
                    let dst = self.cg.alloc_reg()?;
                    self.cg.emit(Instruction::LoadUndefined { dst });
                    (TypedReg::unknown(dst), StaticType::Unknown)
                }
            };
            self.compile_binding_pattern(&declarator.id, value.reg, kind, ty)?;
            self.cg.free_reg(value.reg);
        }
        Ok(())
    }

    /// Lower a binding pattern against the value in `value_reg`
    pub(crate) fn compile_binding_pattern(
        &mut self,
        pattern: &'a BindingPattern<'a>,
        value_reg: Register,
        kind: VariableKind,
        ty: StaticType,
    ) -> CompileResult<()> {
        match pattern {
            BindingPattern::BindingIdentifier(ident) => {
                let slot = self.cg.declare_variable(&ident.name, kind, ty)?;
                self.cg.emit(Instruction::SetLocal {
                    idx: LocalIndex(slot),
                    src: value_reg,
                });
                Ok(())
            }
            BindingPattern::ObjectPattern(obj) => {
                let mut taken: Vec<sable_bytecode::ConstantIndex> = Vec::new();
                for prop in &obj.properties {
                    let prop_val = self.cg.alloc_reg()?;
                    match self.property_key_name(&prop.key) {
                        Some(name) => {
                            let name_idx = self.cg.add_string(&name);
                            taken.push(name_idx);
                            self.cg.emit(Instruction::GetProp {
                                dst: prop_val,
                                obj: value_reg,
                                name: name_idx,
                            });
                        }
                        None => {
                            let key = prop
                                .key
                                .as_expression()
                                .ok_or_else(|| CompileError::unsupported("private key in pattern"))?;
                            let key_reg = self.compile_expression(key)?;
                            self.cg.emit(Instruction::GetIndex {
                                dst: prop_val,
                                obj: value_reg,
                                key: key_reg.reg,
                            });
                            self.cg.free_reg(key_reg.reg);
                        }
                    }
                    self.bind_with_default(&prop.value, prop_val, kind)?;
                    self.cg.free_reg(prop_val);
                }
                if let Some(rest) = &obj.rest {
                    let rest_val = self.cg.alloc_reg()?;
                    self.cg.emit(Instruction::ObjectRest {
                        dst: rest_val,
                        src: value_reg,
                        exclude: taken,
                    });
                    self.compile_binding_pattern(
                        &rest.argument,
                        rest_val,
                        kind,
                        StaticType::Object,
                    )?;
                    self.cg.free_reg(rest_val);
                }
                Ok(())
            }
            BindingPattern::ArrayPattern(arr) => {
                let iter = self.cg.alloc_reg()?;
                self.cg.emit(Instruction::GetIterator {
                    dst: iter,
                    src: value_reg,
                });
                let undef = self.cg.alloc_reg()?;
                self.cg.emit(Instruction::LoadUndefined { dst: undef });

                for element in &arr.elements {
                    let item = self.cg.alloc_reg()?;
                    let done = self.cg.alloc_reg()?;
                    self.cg.emit(Instruction::IteratorNext {
                        value: item,
                        done,
                        iter,
                        arg: undef,
                    });
                    self.cg.free_reg(done);
                    if let Some(pattern) = element {
                        self.bind_with_default(pattern, item, kind)?;
                    }
                    self.cg.free_reg(item);
                }

                if let Some(rest) = &arr.rest {
                    // Drain the remaining positions into a fresh array
                    let rest_arr = self.cg.alloc_reg()?;
                    self.cg.emit(Instruction::NewArray { dst: rest_arr });
                    let item = self.cg.alloc_reg()?;
                    let done = self.cg.alloc_reg()?;
                    let loop_start = self.cg.current_index();
                    self.cg.emit(Instruction::IteratorNext {
                        value: item,
                        done,
                        iter,
                        arg: undef,
                    });
                    let exit = self.cg.emit_jump_if_true(done);
                    self.cg.emit(Instruction::AppendElement {
                        arr: rest_arr,
                        src: item,
                    });
                    let back = self.cg.emit_jump();
                    self.cg.patch_to(back, loop_start);
                    self.cg.patch_to_here(exit);
                    self.cg.free_reg(item);
                    self.cg.free_reg(done);
                    self.compile_binding_pattern(&rest.argument, rest_arr, kind, StaticType::Array)?;
                    self.cg.free_reg(rest_arr);
                }

                self.cg.free_reg(undef);
                self.cg.free_reg(iter);
                Ok(())
            }
            BindingPattern::AssignmentPattern(_) => {
                self.bind_with_default(pattern, value_reg, kind)
            }
        }
    }

    /// Bind a pattern, applying an `AssignmentPattern` default when the
    /// incoming value is undefined
    fn bind_with_default(
        &mut self,
        pattern: &'a BindingPattern<'a>,
        value_reg: Register,
        kind: VariableKind,
    ) -> CompileResult<()> {
        if let BindingPattern::AssignmentPattern(assign) = pattern {
            let undef = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::LoadUndefined { dst: undef });
            let cond = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::StrictEq {
                dst: cond,
                lhs: value_reg,
                rhs: undef,
            });
            let skip = self.cg.emit_jump_if_false(cond);
            self.cg.free_reg(cond);
            self.cg.free_reg(undef);

            let default_ty = self.static_type_of(&assign.right);
            let default_val = self.compile_expression(&assign.right)?;
            self.cg.emit(Instruction::Move {
                dst: value_reg,
                src: default_val.reg,
            });
            self.cg.free_reg(default_val.reg);
            self.cg.patch_to_here(skip);

            return self.compile_binding_pattern(&assign.left, value_reg, kind, default_ty);
        }
        self.compile_binding_pattern(pattern, value_reg, kind, StaticType::Unknown)
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    fn compile_if_statement(&mut self, is: &'a IfStatement<'a>) -> CompileResult<()> {
        let cond = self.compile_expression(&is.test)?;
        let jump_else = self.cg.emit_jump_if_false(cond.reg);
        self.cg.free_reg(cond.reg);

        self.compile_statement(&is.consequent)?;

        match &is.alternate {
            Some(alt) => {
                let jump_end = self.cg.emit_jump();
                self.cg.patch_to_here(jump_else);
                self.compile_statement(alt)?;
                self.cg.patch_to_here(jump_end);
            }
            None => self.cg.patch_to_here(jump_else),
        }
        Ok(())
    }

    fn enter_control(&mut self, is_loop: bool, continue_target: Option<usize>) {
        self.loop_stack.push(ControlScope {
            is_loop,
            labels: std::mem::take(&mut self.pending_labels),
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            continue_target,
            finally_depth: self.finally_stack.len(),
        });
    }

    fn exit_control(&mut self) -> CompileResult<()> {
        let scope = self
            .loop_stack
            .pop()
            .ok_or_else(|| CompileError::internal("control stack underflow"))?;
        for jump in scope.break_jumps {
            self.cg.patch_to_here(jump);
        }
        if let (Some(target), jumps) = (scope.continue_target, scope.continue_jumps) {
            for jump in jumps {
                self.cg.patch_to(jump, target);
            }
        }
        Ok(())
    }

    fn compile_while_statement(&mut self, ws: &'a WhileStatement<'a>) -> CompileResult<()> {
        let loop_start = self.cg.current_index();
        self.enter_control(true, Some(loop_start));

        let cond = self.compile_expression(&ws.test)?;
        let exit = self.cg.emit_jump_if_false(cond.reg);
        self.cg.free_reg(cond.reg);

        self.compile_statement(&ws.body)?;
        let back = self.cg.emit_jump();
        self.cg.patch_to(back, loop_start);
        self.cg.patch_to_here(exit);

        self.exit_control()
    }

    fn compile_do_while_statement(&mut self, dws: &'a DoWhileStatement<'a>) -> CompileResult<()> {
        let body_start = self.cg.current_index();
        // continue lands on the test, whose position is not yet known;
        // collect jumps and patch on exit
        self.enter_control(true, None);

        self.compile_statement(&dws.body)?;

        let test_start = self.cg.current_index();
        if let Some(scope) = self.loop_stack.last_mut() {
            scope.continue_target = Some(test_start);
        }
        let cond = self.compile_expression(&dws.test)?;
        let back = self.cg.emit_jump_if_true(cond.reg);
        self.cg.patch_to(back, body_start);
        self.cg.free_reg(cond.reg);

        self.exit_control()
    }

    fn compile_for_statement(&mut self, fs: &'a ForStatement<'a>) -> CompileResult<()> {
        self.cg.enter_scope();

        match &fs.init {
            Some(ForStatementInit::VariableDeclaration(decl)) => {
                self.compile_variable_declaration(decl)?;
            }
            Some(init) => {
                if let Some(expr) = init.as_expression() {
                    let value = self.compile_expression(expr)?;
                    self.cg.free_reg(value.reg);
                }
            }
            None => {}
        }

        let test_start = self.cg.current_index();
        self.enter_control(true, None);

        let exit = match &fs.test {
            Some(test) => {
                let cond = self.compile_expression(test)?;
                let exit = self.cg.emit_jump_if_false(cond.reg);
                self.cg.free_reg(cond.reg);
                Some(exit)
            }
            None => None,
        };

        self.compile_statement(&fs.body)?;

        let update_start = self.cg.current_index();
        if let Some(scope) = self.loop_stack.last_mut() {
            scope.continue_target = Some(update_start);
        }
        if let Some(update) = &fs.update {
            let value = self.compile_expression(update)?;
            self.cg.free_reg(value.reg);
        }
        let back = self.cg.emit_jump();
        self.cg.patch_to(back, test_start);

        if let Some(exit) = exit {
            self.cg.patch_to_here(exit);
        }
        self.exit_control()?;
        self.cg.exit_scope();
        Ok(())
    }

    fn compile_for_of_statement(&mut self, fo: &'a ForOfStatement<'a>) -> CompileResult<()> {
        self.cg.enter_scope();

        let iterable = self.compile_expression(&fo.right)?;
        let iter = self.cg.alloc_reg()?;
        if fo.r#await {
            self.cg.emit(Instruction::GetAsyncIterator {
                dst: iter,
                src: iterable.reg,
            });
        } else {
            self.cg.emit(Instruction::GetIterator {
                dst: iter,
                src: iterable.reg,
            });
        }
        self.cg.free_reg(iterable.reg);

        let undef = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::LoadUndefined { dst: undef });
        let item = self.cg.alloc_reg()?;
        let done = self.cg.alloc_reg()?;

        let loop_start = self.cg.current_index();
        self.enter_control(true, Some(loop_start));

        if fo.r#await {
            // result = await iter.next(); then unpack value/done
            let frame = self.cg.alloc_block(1)?;
            self.cg.emit(Instruction::Move {
                dst: frame,
                src: iter,
            });
            let next_name = self.cg.add_string("next");
            let result = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::CallMethod {
                dst: result,
                frame,
                name: next_name,
                argc: 0,
            });
            self.cg.free_block(frame, 1);
            self.emit_await(result, result, fo.span.start)?;
            let value_name = self.cg.add_string("value");
            let done_name = self.cg.add_string("done");
            self.cg.emit(Instruction::GetProp {
                dst: item,
                obj: result,
                name: value_name,
            });
            self.cg.emit(Instruction::GetProp {
                dst: done,
                obj: result,
                name: done_name,
            });
            self.cg.free_reg(result);
        } else {
            self.cg.emit(Instruction::IteratorNext {
                value: item,
                done,
                iter,
                arg: undef,
            });
        }
        let exit = self.cg.emit_jump_if_true(done);

        match &fo.left {
            ForStatementLeft::VariableDeclaration(decl) => {
                let kind = match decl.kind {
                    VariableDeclarationKind::Const => VariableKind::Const,
                    VariableDeclarationKind::Var => VariableKind::Var,
                    _ => VariableKind::Let,
                };
                let declarator = decl
                    .declarations
                    .first()
                    .ok_or_else(|| CompileError::internal("for-of without declarator"))?;
                self.compile_binding_pattern(&declarator.id, item, kind, StaticType::Unknown)?;
            }
            other => {
                let target = other
                    .as_assignment_target()
                    .ok_or_else(|| CompileError::InvalidAssignmentTarget)?;
                self.store_to_target(target, item)?;
            }
        }

        self.compile_statement(&fo.body)?;
        let back = self.cg.emit_jump();
        self.cg.patch_to(back, loop_start);
        self.cg.patch_to_here(exit);

        self.exit_control()?;
        self.cg.free_reg(done);
        self.cg.free_reg(item);
        self.cg.free_reg(undef);
        self.cg.free_reg(iter);
        self.cg.exit_scope();
        Ok(())
    }

    fn compile_for_in_statement(&mut self, fi: &'a ForInStatement<'a>) -> CompileResult<()> {
        self.cg.enter_scope();

        let object = self.compile_expression(&fi.right)?;
        let keys = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::ForInKeys {
            dst: keys,
            src: object.reg,
        });
        self.cg.free_reg(object.reg);

        let len = self.cg.alloc_reg()?;
        let length_name = self.cg.add_string("length");
        self.cg.emit(Instruction::GetProp {
            dst: len,
            obj: keys,
            name: length_name,
        });
        let idx = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::LoadInt { dst: idx, value: 0 });

        let loop_start = self.cg.current_index();
        self.enter_control(true, None);

        let cond = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::Lt {
            dst: cond,
            lhs: idx,
            rhs: len,
        });
        let exit = self.cg.emit_jump_if_false(cond);
        self.cg.free_reg(cond);

        let key = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::GetIndex {
            dst: key,
            obj: keys,
            key: idx,
        });
        match &fi.left {
            ForStatementLeft::VariableDeclaration(decl) => {
                let kind = match decl.kind {
                    VariableDeclarationKind::Const => VariableKind::Const,
                    VariableDeclarationKind::Var => VariableKind::Var,
                    _ => VariableKind::Let,
                };
                let declarator = decl
                    .declarations
                    .first()
                    .ok_or_else(|| CompileError::internal("for-in without declarator"))?;
                self.compile_binding_pattern(&declarator.id, key, kind, StaticType::String)?;
            }
            other => {
                let target = other
                    .as_assignment_target()
                    .ok_or_else(|| CompileError::InvalidAssignmentTarget)?;
                self.store_to_target(target, key)?;
            }
        }
        self.cg.free_reg(key);

        self.compile_statement(&fi.body)?;

        let continue_target = self.cg.current_index();
        if let Some(scope) = self.loop_stack.last_mut() {
            scope.continue_target = Some(continue_target);
        }
        self.cg.emit(Instruction::Inc { dst: idx, src: idx });
        let back = self.cg.emit_jump();
        self.cg.patch_to(back, loop_start);
        self.cg.patch_to_here(exit);

        self.exit_control()?;
        self.cg.free_reg(idx);
        self.cg.free_reg(len);
        self.cg.free_reg(keys);
        self.cg.exit_scope();
        Ok(())
    }

    fn compile_return_statement(&mut self, rs: &'a ReturnStatement<'a>) -> CompileResult<()> {
        // The argument evaluates first; finally blocks run before control
        // leaves the function
        match &rs.argument {
            Some(arg) => {
                let value = self.compile_expression(arg)?;
                self.emit_finally_range(0)?;
                self.cg.emit(Instruction::Return { src: value.reg });
                self.cg.free_reg(value.reg);
            }
            None => {
                self.emit_finally_range(0)?;
                self.cg.emit(Instruction::ReturnUndefined);
            }
        }
        Ok(())
    }

    fn find_control_scope(&self, label: Option<&str>, need_loop: bool) -> Option<usize> {
        for (idx, scope) in self.loop_stack.iter().enumerate().rev() {
            match label {
                Some(name) => {
                    if scope.labels.iter().any(|l| l == name) {
                        return Some(idx);
                    }
                }
                None => {
                    if !need_loop || scope.is_loop {
                        return Some(idx);
                    }
                }
            }
        }
        None
    }

    fn compile_break_statement(&mut self, bs: &'a BreakStatement<'a>) -> CompileResult<()> {
        let label = bs.label.as_ref().map(|l| l.name.as_str());
        let idx = self
            .find_control_scope(label, false)
            .ok_or_else(|| CompileError::syntax("Illegal break statement", bs.span.start))?;
        let finally_depth = self.loop_stack[idx].finally_depth;
        self.emit_finally_range(finally_depth)?;
        let jump = self.cg.emit_jump();
        self.loop_stack[idx].break_jumps.push(jump);
        Ok(())
    }

    fn compile_continue_statement(&mut self, cs: &'a ContinueStatement<'a>) -> CompileResult<()> {
        let label = cs.label.as_ref().map(|l| l.name.as_str());
        let idx = self
            .find_control_scope(label, true)
            .ok_or_else(|| CompileError::syntax("Illegal continue statement", cs.span.start))?;
        let finally_depth = self.loop_stack[idx].finally_depth;
        self.emit_finally_range(finally_depth)?;
        let jump = self.cg.emit_jump();
        self.loop_stack[idx].continue_jumps.push(jump);
        Ok(())
    }

    fn compile_switch_statement(&mut self, ss: &'a SwitchStatement<'a>) -> CompileResult<()> {
        let discriminant = self.compile_expression(&ss.discriminant)?;
        self.enter_control(false, None);
        self.cg.enter_scope();

        // Dispatch: one strict-equality test per case, default last
        let mut case_jumps = Vec::with_capacity(ss.cases.len());
        let mut default_jump = None;
        for case in &ss.cases {
            match &case.test {
                Some(test) => {
                    let test_val = self.compile_expression(test)?;
                    let cond = self.cg.alloc_reg()?;
                    self.cg.emit(Instruction::StrictEq {
                        dst: cond,
                        lhs: discriminant.reg,
                        rhs: test_val.reg,
                    });
                    let jump = self.cg.emit_jump_if_true(cond);
                    case_jumps.push(Some(jump));
                    self.cg.free_reg(cond);
                    self.cg.free_reg(test_val.reg);
                }
                None => case_jumps.push(None),
            }
        }
        let fall_out = self.cg.emit_jump();

        for (case, jump) in ss.cases.iter().zip(&case_jumps) {
            match jump {
                Some(jump) => self.cg.patch_to_here(*jump),
                None => {
                    default_jump = Some(self.cg.current_index());
                }
            }
            for stmt in &case.consequent {
                self.compile_statement(stmt)?;
            }
        }

        match default_jump {
            Some(target) => self.cg.patch_to(fall_out, target),
            None => self.cg.patch_to_here(fall_out),
        }

        self.cg.exit_scope();
        self.exit_control()?;
        self.cg.free_reg(discriminant.reg);
        Ok(())
    }

    fn compile_try_statement(&mut self, ts: &'a TryStatement<'a>) -> CompileResult<()> {
        let outer_try = match &ts.finalizer {
            Some(finalizer) => {
                let idx = self.cg.current_index();
                self.cg.emit(Instruction::TryStart {
                    catch_offset: sable_bytecode::JumpOffset(0),
                });
                self.cg.current.try_stack.push(idx);
                self.finally_stack.push(finalizer);
                Some(idx)
            }
            None => None,
        };

        match &ts.handler {
            Some(handler) => {
                let inner_try = self.cg.current_index();
                self.cg.emit(Instruction::TryStart {
                    catch_offset: sable_bytecode::JumpOffset(0),
                });
                self.cg.current.try_stack.push(inner_try);

                self.cg.enter_scope();
                self.compile_statements_hoisted(&ts.block.body)?;
                self.cg.exit_scope();

                self.cg.emit(Instruction::TryEnd);
                self.cg.current.try_stack.pop();
                let after_catch = self.cg.emit_jump();

                self.cg.patch_to_here(inner_try);
                self.cg.enter_scope();
                let thrown = self.cg.alloc_reg()?;
                self.cg.emit(Instruction::Catch { dst: thrown });
                if let Some(param) = &handler.param {
                    self.compile_binding_pattern(
                        &param.pattern,
                        thrown,
                        VariableKind::Let,
                        StaticType::Unknown,
                    )?;
                }
                self.cg.free_reg(thrown);
                self.compile_statements_hoisted(&handler.body.body)?;
                self.cg.exit_scope();
                self.cg.patch_to_here(after_catch);
            }
            None => {
                self.cg.enter_scope();
                self.compile_statements_hoisted(&ts.block.body)?;
                self.cg.exit_scope();
            }
        }

        if let (Some(outer_try), Some(finalizer)) = (outer_try, &ts.finalizer) {
            self.cg.emit(Instruction::TryEnd);
            self.cg.current.try_stack.pop();
            self.finally_stack.pop();

            // Normal path
            self.cg.enter_scope();
            self.compile_statements_hoisted(&finalizer.body)?;
            self.cg.exit_scope();
            let jump_end = self.cg.emit_jump();

            // Exceptional path: run the finalizer, then rethrow
            self.cg.patch_to_here(outer_try);
            let pending = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::Catch { dst: pending });
            self.cg.enter_scope();
            self.compile_statements_hoisted(&finalizer.body)?;
            self.cg.exit_scope();
            self.cg.emit(Instruction::Throw { src: pending });
            self.cg.free_reg(pending);
            self.cg.patch_to_here(jump_end);
        }
        Ok(())
    }

    /// Inline the finally blocks above `from` (innermost first), used by
    /// `break`/`continue`/`return` leaving protected regions.
    fn emit_finally_range(&mut self, from: usize) -> CompileResult<()> {
        if self.finally_stack.len() <= from {
            return Ok(());
        }
        let saved: Vec<&'a BlockStatement<'a>> = self.finally_stack.split_off(from);
        for finalizer in saved.iter().rev() {
            self.cg.enter_scope();
            self.compile_statements_hoisted(&finalizer.body)?;
            self.cg.exit_scope();
        }
        self.finally_stack.extend(saved);
        Ok(())
    }

    // ========================================================================
    // Functions
    // ========================================================================

    fn compile_function_declaration_body(&mut self, func: &'a Function<'a>) -> CompileResult<()> {
        let name = func
            .id
            .as_ref()
            .map(|id| id.name.to_string())
            .unwrap_or_default();
        let func_idx = self.compile_function_parts(
            Some(name.clone()),
            &func.params,
            func.body
                .as_ref()
                .ok_or_else(|| CompileError::unsupported("function without body"))?,
            FunctionShape {
                is_async: func.r#async,
                is_generator: func.generator,
                ..Default::default()
            },
        )?;

        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::Closure {
            dst,
            func: sable_bytecode::FunctionIndex(func_idx),
        });
        let store_name = self.ctx.qualify(&name);
        self.store_to_identifier(&store_name, dst)?;
        self.cg.free_reg(dst);
        Ok(())
    }

    /// Compile a function expression into a closure value
    pub(crate) fn compile_function_expression(
        &mut self,
        func: &'a Function<'a>,
    ) -> CompileResult<TypedReg> {
        let name = func.id.as_ref().map(|id| id.name.to_string());
        let func_idx = self.compile_function_parts(
            name,
            &func.params,
            func.body
                .as_ref()
                .ok_or_else(|| CompileError::unsupported("function without body"))?,
            FunctionShape {
                is_async: func.r#async,
                is_generator: func.generator,
                ..Default::default()
            },
        )?;
        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::Closure {
            dst,
            func: sable_bytecode::FunctionIndex(func_idx),
        });
        Ok(TypedReg::unknown(dst))
    }

    /// Compile an arrow function into a closure value
    pub(crate) fn compile_arrow_function(
        &mut self,
        arrow: &'a ArrowFunctionExpression<'a>,
    ) -> CompileResult<TypedReg> {
        self.fn_stack.push(FnInfo {
            analysis: machine_analysis_for(arrow.r#async, false, &arrow.body.statements),
            class: self.fn_info().class.clone(),
            is_ctor: self.fn_info().is_ctor,
        });
        self.cg.enter_function(None);
        self.cg.current.flags.is_arrow = true;
        self.cg.current.flags.is_async = arrow.r#async;

        self.declare_params(&arrow.params)?;

        if arrow.expression {
            // Concise body: single expression, implicit return
            let stmt = arrow
                .body
                .statements
                .first()
                .ok_or_else(|| CompileError::internal("concise arrow without expression"))?;
            match stmt {
                Statement::ExpressionStatement(es) => {
                    let value = self.compile_expression(&es.expression)?;
                    self.cg.emit(Instruction::Return { src: value.reg });
                    self.cg.free_reg(value.reg);
                }
                other => {
                    return Err(CompileError::unsupported(format!(
                        "concise arrow body {:?}",
                        std::mem::discriminant(other)
                    )));
                }
            }
        } else {
            self.compile_statements_hoisted(&arrow.body.statements)?;
            self.cg.emit(Instruction::ReturnUndefined);
        }

        let func_idx = self.cg.exit_function();
        self.fn_stack.pop();

        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::Closure {
            dst,
            func: sable_bytecode::FunctionIndex(func_idx),
        });
        Ok(TypedReg::unknown(dst))
    }

    /// Shared function-body compilation; returns the function index
    fn compile_function_parts(
        &mut self,
        name: Option<String>,
        params: &'a FormalParameters<'a>,
        body: &'a FunctionBody<'a>,
        shape: FunctionShape<'a>,
    ) -> CompileResult<u32> {
        self.fn_stack.push(FnInfo {
            analysis: machine_analysis_for(shape.is_async, shape.is_generator, &body.statements),
            class: shape.class.clone().or_else(|| {
                if shape.is_method_like() {
                    None
                } else {
                    self.fn_info().class.clone()
                }
            }),
            is_ctor: shape.is_ctor,
        });

        self.cg.enter_function(name);
        self.cg.current.flags.is_async = shape.is_async;
        self.cg.current.flags.is_generator = shape.is_generator;
        self.cg.current.flags.is_constructor = shape.is_ctor;
        self.cg.current.flags.is_method = shape.is_method;
        self.cg.current.flags.is_getter = shape.is_getter;
        self.cg.current.flags.is_setter = shape.is_setter;
        self.cg.current.flags.is_static = shape.is_static;

        self.declare_params(params)?;

        if let Some(prologue) = shape.prologue {
            prologue(self)?;
        }

        self.compile_statements_hoisted(&body.statements)?;
        self.cg.emit(Instruction::ReturnUndefined);

        let func_idx = self.cg.exit_function();
        self.fn_stack.pop();
        Ok(func_idx)
    }

    /// Declare parameters: identifiers get named slots, defaults get a
    /// prologue test, patterns get a hidden slot and a destructuring
    /// prologue, the rest parameter packs into its own slot.
    fn declare_params(&mut self, params: &'a FormalParameters<'a>) -> CompileResult<()> {
        struct PendingDefault<'b, 'a> {
            slot: u16,
            expr: &'b Expression<'a>,
        }
        let mut defaults: Vec<PendingDefault<'a, 'a>> = Vec::new();
        let mut patterns: Vec<(u16, &'a BindingPattern<'a>)> = Vec::new();

        for param in &params.items {
            match &param.pattern {
                BindingPattern::BindingIdentifier(ident) => {
                    let ty = StaticType::Unknown;
                    let slot = self.cg.declare_variable(&ident.name, VariableKind::Let, ty)?;
                    self.cg.current.param_count += 1;
                    if let Some(init) = &param.initializer {
                        defaults.push(PendingDefault { slot, expr: init });
                    }
                }
                BindingPattern::AssignmentPattern(assign) => {
                    if let BindingPattern::BindingIdentifier(ident) = &assign.left {
                        let slot = self.cg.declare_variable(
                            &ident.name,
                            VariableKind::Let,
                            StaticType::Unknown,
                        )?;
                        self.cg.current.param_count += 1;
                        defaults.push(PendingDefault {
                            slot,
                            expr: &assign.right,
                        });
                    } else {
                        let slot = self
                            .cg
                            .current
                            .scopes
                            .alloc_anonymous_local()
                            .ok_or(CompileError::TooManyLocals)?;
                        self.cg.current.param_count += 1;
                        patterns.push((slot, &param.pattern));
                    }
                }
                pattern => {
                    let slot = self
                        .cg
                        .current
                        .scopes
                        .alloc_anonymous_local()
                        .ok_or(CompileError::TooManyLocals)?;
                    self.cg.current.param_count += 1;
                    patterns.push((slot, pattern));
                }
            }
        }

        if let Some(rest) = &params.rest {
            if let BindingPattern::BindingIdentifier(ident) = &rest.rest.argument {
                let slot = self.cg.declare_variable(
                    &ident.name,
                    VariableKind::Let,
                    StaticType::Array,
                )?;
                self.cg.current.rest_param = Some(slot as u8);
            } else {
                return Err(CompileError::unsupported("destructured rest parameter"));
            }
        }

        // Prologue: default initializers fire on undefined arguments
        for pending in defaults {
            let current = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::GetLocal {
                dst: current,
                idx: LocalIndex(pending.slot),
            });
            let undef = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::LoadUndefined { dst: undef });
            let cond = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::StrictEq {
                dst: cond,
                lhs: current,
                rhs: undef,
            });
            let skip = self.cg.emit_jump_if_false(cond);
            self.cg.free_reg(cond);
            self.cg.free_reg(undef);
            self.cg.free_reg(current);

            let value = self.compile_expression(pending.expr)?;
            self.cg.emit(Instruction::SetLocal {
                idx: LocalIndex(pending.slot),
                src: value.reg,
            });
            self.cg.free_reg(value.reg);
            self.cg.patch_to_here(skip);
        }

        // Prologue: destructure pattern parameters
        for (slot, pattern) in patterns {
            let value = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::GetLocal {
                dst: value,
                idx: LocalIndex(slot),
            });
            self.bind_with_default(pattern, value, VariableKind::Let)?;
            self.cg.free_reg(value);
        }
        Ok(())
    }

    // ========================================================================
    // Classes
    // ========================================================================

    fn compile_class_declaration(&mut self, class: &'a Class<'a>) -> CompileResult<Register> {
        let simple = class
            .id
            .as_ref()
            .map(|id| id.name.to_string())
            .ok_or_else(|| CompileError::unsupported("anonymous class declaration"))?;
        let dst = self.compile_class_parts(class, &simple)?;
        let slot = self
            .cg
            .declare_variable(&simple, VariableKind::Let, StaticType::Class(self.ctx.qualify(&simple)))?;
        self.cg.emit(Instruction::SetLocal {
            idx: LocalIndex(slot),
            src: dst,
        });
        Ok(dst)
    }

    /// Compile a class expression into a register holding the class value
    pub(crate) fn compile_class_expression(
        &mut self,
        class: &'a Class<'a>,
    ) -> CompileResult<TypedReg> {
        let simple = class
            .id
            .as_ref()
            .map(|id| id.name.to_string())
            .unwrap_or_else(|| format!("$class{}", self.cg.classes.len()));
        let dst = self.compile_class_parts(class, &simple)?;
        Ok(TypedReg::unknown(dst))
    }

    fn compile_class_parts(
        &mut self,
        class: &'a Class<'a>,
        simple: &str,
    ) -> CompileResult<Register> {
        let qualified = self.ctx.qualify(simple);

        // Superclass must be an already-registered class identifier
        let superclass = match &class.super_class {
            Some(Expression::Identifier(id)) => {
                let resolved = self
                    .ctx
                    .resolve_class_name(&id.name)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        CompileError::syntax(
                            format!("Unknown superclass '{}'", id.name),
                            id.span.start,
                        )
                    })?;
                Some(resolved)
            }
            Some(_) => return Err(CompileError::unsupported("computed superclass expression")),
            None => None,
        };

        let (slot_offset, super_index) = match &superclass {
            Some(name) => {
                let parent = &self.ctx.classes[name.as_str()];
                (parent.total_slots, Some(parent.index))
            }
            None => (0, None),
        };

        // Collect declared members
        let mut record = ClassRecord {
            index: ClassIndex(self.cg.classes.len() as u32),
            qualified: qualified.clone(),
            superclass: superclass.clone(),
            properties: indexmap::IndexMap::new(),
            methods: rustc_hash::FxHashMap::default(),
            statics: rustc_hash::FxHashSet::default(),
            private_fields: rustc_hash::FxHashSet::default(),
            private_methods: rustc_hash::FxHashSet::default(),
            slot_offset,
            total_slots: slot_offset,
        };

        let mut method_position = 0u16;
        for element in &class.body.body {
            match element {
                ClassElement::PropertyDefinition(prop) => {
                    if let PropertyKey::PrivateIdentifier(ident) = &prop.key {
                        record.private_fields.insert(ident.name.to_string());
                        continue;
                    }
                    let name = self.property_key_name(&prop.key).ok_or_else(|| {
                        CompileError::unsupported("computed class property name")
                    })?;
                    if prop.r#static {
                        record.statics.insert(name);
                        continue;
                    }
                    let ty = prop
                        .type_annotation
                        .as_deref()
                        .map(StaticType::from_annotation)
                        .unwrap_or_else(|| {
                            prop.value
                                .as_ref()
                                .map(|v| self.static_type_of(v))
                                .unwrap_or(StaticType::Unknown)
                        });
                    let slot = record.total_slots;
                    record.total_slots += 1;
                    record.properties.insert(
                        name,
                        PropRecord {
                            slot,
                            readonly: prop.readonly,
                            ty,
                        },
                    );
                }
                ClassElement::MethodDefinition(method) => {
                    if matches!(method.kind, MethodDefinitionKind::Constructor) {
                        continue;
                    }
                    if let PropertyKey::PrivateIdentifier(ident) = &method.key {
                        record.private_methods.insert(ident.name.to_string());
                        continue;
                    }
                    let name = self
                        .property_key_name(&method.key)
                        .ok_or_else(|| CompileError::unsupported("computed method name"))?;
                    if method.r#static {
                        record.statics.insert(name);
                    } else if matches!(method.kind, MethodDefinitionKind::Method) {
                        record.methods.insert(name, method_position);
                        method_position += 1;
                    } else {
                        // accessors occupy method-table entries too
                        method_position += 1;
                    }
                }
                _ => {}
            }
        }

        let class_index = record.index;
        self.ctx.classes.insert(qualified.clone(), record);

        // Reserve the class-table slot before compiling bodies so method
        // code can reference the class being defined.
        let placeholder = ClassDef {
            name: qualified.clone(),
            superclass: super_index,
            properties: Vec::new(),
            constructor: None,
            methods: Vec::new(),
            static_methods: Vec::new(),
            private_fields: Vec::new(),
            private_methods: Vec::new(),
        };
        self.cg.add_class(placeholder);

        // Compile member bodies
        let mut ctor: Option<sable_bytecode::FunctionIndex> = None;
        let mut methods = Vec::new();
        let mut static_methods = Vec::new();
        let mut private_methods = Vec::new();

        for element in &class.body.body {
            let ClassElement::MethodDefinition(method) = element else {
                continue;
            };
            let shape_kind = method.kind;
            let is_private = matches!(method.key, PropertyKey::PrivateIdentifier(_));
            let name = match &method.key {
                PropertyKey::PrivateIdentifier(ident) => ident.name.to_string(),
                key => self
                    .property_key_name(key)
                    .ok_or_else(|| CompileError::unsupported("computed method name"))?,
            };

            let is_ctor = matches!(shape_kind, MethodDefinitionKind::Constructor);
            let prologue: Option<Prologue<'a>> = if is_ctor {
                let elements = &class.body.body;
                Some(Box::new(move |emitter: &mut Emitter<'a>| {
                    emitter.emit_field_initializers(elements, class_index)
                }))
            } else {
                None
            };

            let func_idx = self.compile_function_parts(
                Some(name.clone()),
                &method.value.params,
                method
                    .value
                    .body
                    .as_ref()
                    .ok_or_else(|| CompileError::unsupported("abstract method body"))?,
                FunctionShape {
                    is_async: method.value.r#async,
                    is_generator: method.value.generator,
                    is_ctor,
                    is_method: matches!(shape_kind, MethodDefinitionKind::Method),
                    is_getter: matches!(shape_kind, MethodDefinitionKind::Get),
                    is_setter: matches!(shape_kind, MethodDefinitionKind::Set),
                    is_static: method.r#static,
                    class: Some(qualified.clone()),
                    prologue,
                },
            )?;

            let def = MethodDef {
                name,
                func: sable_bytecode::FunctionIndex(func_idx),
                kind: match shape_kind {
                    MethodDefinitionKind::Get => MethodKind::Getter,
                    MethodDefinitionKind::Set => MethodKind::Setter,
                    _ => MethodKind::Method,
                },
            };

            if is_ctor {
                ctor = Some(def.func);
            } else if is_private {
                private_methods.push(def);
            } else if method.r#static {
                static_methods.push(def);
            } else {
                methods.push(def);
            }
        }

        // Implicit constructor when initializers or a superclass demand one
        let has_initializers = class.body.body.iter().any(|e| {
            matches!(e, ClassElement::PropertyDefinition(p) if !p.r#static && p.value.is_some())
        });
        if ctor.is_none() && (has_initializers || superclass.is_some()) {
            ctor = Some(sable_bytecode::FunctionIndex(
                self.synthesize_constructor(class, class_index, superclass.is_some(), &qualified)?,
            ));
        }

        // Fill the reserved class-table slot
        let record = &self.ctx.classes[qualified.as_str()];
        let properties = record
            .properties
            .iter()
            .map(|(name, prop)| PropertyDef {
                name: name.clone(),
                type_tag: prop.ty.slot_tag(),
                readonly: prop.readonly,
            })
            .collect();
        let private_fields = record.private_fields.iter().cloned().collect();
        self.cg.classes[class_index.0 as usize] = ClassDef {
            name: qualified.clone(),
            superclass: super_index,
            properties,
            constructor: ctor,
            methods,
            static_methods,
            private_fields,
            private_methods,
        };

        // Emit the definition: bind methods over the current frame
        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::BindClass {
            dst,
            class: class_index,
        });

        // Static field initializers run at definition time
        for element in &class.body.body {
            let ClassElement::PropertyDefinition(prop) = element else {
                continue;
            };
            if !prop.r#static {
                continue;
            }
            let Some(value) = &prop.value else { continue };
            let name = self
                .property_key_name(&prop.key)
                .ok_or_else(|| CompileError::unsupported("computed static property name"))?;
            let name_idx = self.cg.add_string(&name);
            let value_reg = self.compile_expression(value)?;
            self.cg.emit(Instruction::SetStatic {
                class: class_index,
                name: name_idx,
                src: value_reg.reg,
            });
            self.cg.free_reg(value_reg.reg);
        }

        Ok(dst)
    }

    /// Instance field initializers, emitted at constructor entry
    fn emit_field_initializers(
        &mut self,
        elements: &'a oxc_allocator::Vec<'a, ClassElement<'a>>,
        class_index: ClassIndex,
    ) -> CompileResult<()> {
        // Slot layout: inherited first, own properties in order
        let mut slot = self
            .ctx
            .classes
            .values()
            .find(|c| c.index == class_index)
            .ok_or_else(|| CompileError::internal("initializers for unregistered class"))?
            .slot_offset;

        for element in elements {
            let ClassElement::PropertyDefinition(prop) = element else {
                continue;
            };
            if prop.r#static {
                continue;
            }
            if let PropertyKey::PrivateIdentifier(ident) = &prop.key {
                if let Some(value) = &prop.value {
                    let this = self.cg.alloc_reg()?;
                    self.cg.emit(Instruction::LoadThis { dst: this });
                    let name_idx = self.cg.add_string(&ident.name);
                    let value_reg = self.compile_expression(value)?;
                    self.cg.emit(Instruction::SetPrivate {
                        obj: this,
                        class: class_index,
                        name: name_idx,
                        src: value_reg.reg,
                    });
                    self.cg.free_reg(value_reg.reg);
                    self.cg.free_reg(this);
                }
                continue;
            }

            let this_slot = slot;
            slot += 1;
            let Some(value) = &prop.value else { continue };
            let this = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::LoadThis { dst: this });
            let value_reg = self.compile_expression(value)?;
            self.cg.emit(Instruction::SetSlot {
                obj: this,
                class: class_index,
                slot: this_slot,
                src: value_reg.reg,
            });
            self.cg.free_reg(value_reg.reg);
            self.cg.free_reg(this);
        }
        Ok(())
    }

    /// `constructor(...args) { super(...args); <field initializers> }`
    fn synthesize_constructor(
        &mut self,
        class: &'a Class<'a>,
        class_index: ClassIndex,
        derived: bool,
        qualified: &str,
    ) -> CompileResult<u32> {
        self.fn_stack.push(FnInfo {
            analysis: None,
            class: Some(qualified.to_string()),
            is_ctor: true,
        });
        self.cg.enter_function(Some("constructor".to_string()));
        self.cg.current.flags.is_constructor = true;

        if derived {
            let slot = self
                .cg
                .current
                .scopes
                .alloc_anonymous_local()
                .ok_or(CompileError::TooManyLocals)?;
            self.cg.current.rest_param = Some(slot as u8);
            let args = self.cg.alloc_reg()?;
            self.cg.emit(Instruction::GetLocal {
                dst: args,
                idx: LocalIndex(slot),
            });
            self.cg.emit(Instruction::CallSuperSpread { args });
            self.cg.free_reg(args);
        }

        self.emit_field_initializers(&class.body.body, class_index)?;
        self.cg.emit(Instruction::ReturnUndefined);

        let idx = self.cg.exit_function();
        self.fn_stack.pop();
        Ok(idx)
    }

    // ========================================================================
    // Modules, enums, namespaces
    // ========================================================================

    fn compile_import_declaration(
        &mut self,
        import: &'a ImportDeclaration<'a>,
    ) -> CompileResult<()> {
        use sable_bytecode::module::{ImportBinding, ImportRecord};

        let specifier = import.source.value.to_string();
        let module_idx = self.cg.add_string(&specifier);
        let mut bindings = Vec::new();

        if let Some(specifiers) = &import.specifiers {
            for spec in specifiers {
                match spec {
                    ImportDeclarationSpecifier::ImportSpecifier(s) => {
                        let imported = s.imported.name().to_string();
                        let local = s.local.name.to_string();
                        let slot = self.cg.declare_variable(
                            &local,
                            VariableKind::Const,
                            StaticType::Unknown,
                        )?;
                        let name_idx = self.cg.add_string(&imported);
                        let dst = self.cg.alloc_reg()?;
                        self.cg.emit(Instruction::LoadExport {
                            dst,
                            module: module_idx,
                            name: name_idx,
                        });
                        self.cg.emit(Instruction::SetLocal {
                            idx: LocalIndex(slot),
                            src: dst,
                        });
                        self.cg.free_reg(dst);
                        bindings.push(ImportBinding::Named { imported, local });
                    }
                    ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                        let local = s.local.name.to_string();
                        let slot = self.cg.declare_variable(
                            &local,
                            VariableKind::Const,
                            StaticType::Unknown,
                        )?;
                        let name_idx = self
                            .cg
                            .add_string(sable_bytecode::module::DEFAULT_EXPORT);
                        let dst = self.cg.alloc_reg()?;
                        self.cg.emit(Instruction::LoadExport {
                            dst,
                            module: module_idx,
                            name: name_idx,
                        });
                        self.cg.emit(Instruction::SetLocal {
                            idx: LocalIndex(slot),
                            src: dst,
                        });
                        self.cg.free_reg(dst);
                        bindings.push(ImportBinding::Default { local });
                    }
                    ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                        let local = s.local.name.to_string();
                        let slot = self.cg.declare_variable(
                            &local,
                            VariableKind::Const,
                            StaticType::Unknown,
                        )?;
                        let dst = self.cg.alloc_reg()?;
                        self.cg.emit(Instruction::LoadNamespace {
                            dst,
                            module: module_idx,
                        });
                        self.cg.emit(Instruction::SetLocal {
                            idx: LocalIndex(slot),
                            src: dst,
                        });
                        self.cg.free_reg(dst);
                        bindings.push(ImportBinding::Namespace { local });
                    }
                }
            }
        }

        self.cg.add_import(ImportRecord { specifier, bindings });
        Ok(())
    }

    fn compile_export_named(
        &mut self,
        export: &'a ExportNamedDeclaration<'a>,
    ) -> CompileResult<()> {
        use sable_bytecode::module::ExportRecord;

        if let Some(declaration) = &export.declaration {
            let names = self.declared_names(declaration);
            match declaration {
                Declaration::VariableDeclaration(decl) => {
                    self.compile_variable_declaration(decl)?;
                }
                Declaration::FunctionDeclaration(func) => {
                    if let Some(id) = &func.id {
                        self.declare_function_record(func, id.name.as_str())?;
                    }
                    self.compile_function_declaration_body(func)?;
                }
                Declaration::ClassDeclaration(class) => {
                    let reg = self.compile_class_declaration(class)?;
                    self.cg.free_reg(reg);
                }
                Declaration::TSEnumDeclaration(decl) => self.compile_ts_enum(decl)?,
                _ => return Err(CompileError::unsupported("exported declaration kind")),
            }

            for name in names {
                self.emit_store_export(&name, &name)?;
                self.ctx.export_names.push(name.clone());
                self.cg.add_export(ExportRecord::Named {
                    local: name.clone(),
                    exported: name,
                });
            }
            return Ok(());
        }

        for spec in &export.specifiers {
            let local = spec.local.name().to_string();
            let exported = spec.exported.name().to_string();
            self.emit_store_export(&local, &exported)?;
            self.ctx.export_names.push(exported.clone());
            self.cg.add_export(ExportRecord::Named { local, exported });
        }
        Ok(())
    }

    fn emit_store_export(&mut self, local: &str, exported: &str) -> CompileResult<()> {
        let value = self.compile_identifier_by_name(local, 0)?;
        let name_idx = self.cg.add_string(exported);
        self.cg.emit(Instruction::StoreExport {
            name: name_idx,
            src: value.reg,
        });
        self.cg.free_reg(value.reg);
        Ok(())
    }

    fn declared_names(&self, declaration: &Declaration<'a>) -> Vec<String> {
        let mut names = Vec::new();
        match declaration {
            Declaration::VariableDeclaration(decl) => {
                for declarator in &decl.declarations {
                    collect_pattern_names(&declarator.id, &mut names);
                }
            }
            Declaration::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    names.push(id.name.to_string());
                }
            }
            Declaration::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    names.push(id.name.to_string());
                }
            }
            Declaration::TSEnumDeclaration(decl) => {
                names.push(decl.id.name.to_string());
            }
            _ => {}
        }
        names
    }

    fn compile_export_default(
        &mut self,
        export: &'a ExportDefaultDeclaration<'a>,
    ) -> CompileResult<()> {
        use sable_bytecode::module::{DEFAULT_EXPORT, ExportRecord};

        let value = match &export.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    self.declare_function_record(func, id.name.as_str())?;
                    self.compile_function_declaration_body(func)?;
                    self.compile_identifier_by_name(&id.name, 0)?
                } else {
                    self.compile_function_expression(func)?
                }
            }
            ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                if class.id.is_some() {
                    let reg = self.compile_class_declaration(class)?;
                    TypedReg::unknown(reg)
                } else {
                    self.compile_class_expression(class)?
                }
            }
            other => {
                let expr = other
                    .as_expression()
                    .ok_or_else(|| CompileError::unsupported("export default declaration"))?;
                self.compile_expression(expr)?
            }
        };

        let name_idx = self.cg.add_string(DEFAULT_EXPORT);
        self.cg.emit(Instruction::StoreExport {
            name: name_idx,
            src: value.reg,
        });
        self.cg.free_reg(value.reg);
        self.cg.add_export(ExportRecord::Default);
        Ok(())
    }

    /// TS enum: object with forward mappings plus numeric reverse mappings
    fn compile_ts_enum(&mut self, decl: &'a TSEnumDeclaration<'a>) -> CompileResult<()> {
        let enum_name = decl.id.name.to_string();
        let slot = self
            .cg
            .declare_variable(&enum_name, VariableKind::Const, StaticType::Object)?;

        let obj = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::NewObject { dst: obj });

        let mut auto_value = 0f64;
        for member in &decl.body.members {
            let member_name = match &member.id {
                TSEnumMemberName::Identifier(id) => id.name.to_string(),
                TSEnumMemberName::String(s) => s.value.to_string(),
                _ => return Err(CompileError::unsupported("computed enum member name")),
            };

            let (value_reg, numeric) = match &member.initializer {
                Some(Expression::NumericLiteral(lit)) => {
                    auto_value = lit.value + 1.0;
                    let reg = self.cg.alloc_reg()?;
                    self.emit_number(reg, lit.value);
                    (reg, true)
                }
                Some(init) => {
                    let value = self.compile_expression(init)?;
                    (value.reg, false)
                }
                None => {
                    let reg = self.cg.alloc_reg()?;
                    self.emit_number(reg, auto_value);
                    auto_value += 1.0;
                    (reg, true)
                }
            };

            let name_idx = self.cg.add_string(&member_name);
            self.cg.emit(Instruction::SetProp {
                obj,
                name: name_idx,
                src: value_reg,
            });

            if numeric {
                // Reverse mapping: E[value] = "name"
                let name_reg = self.cg.alloc_reg()?;
                self.cg.emit(Instruction::LoadConst {
                    dst: name_reg,
                    idx: name_idx,
                });
                self.cg.emit(Instruction::SetIndex {
                    obj,
                    key: value_reg,
                    src: name_reg,
                });
                self.cg.free_reg(name_reg);
            }
            self.cg.free_reg(value_reg);
        }

        self.cg.emit(Instruction::SetLocal {
            idx: LocalIndex(slot),
            src: obj,
        });
        self.cg.free_reg(obj);
        Ok(())
    }

    /// TS namespace: members compile under qualified locals, then an
    /// object exposing the exported ones binds to the namespace name.
    fn compile_ts_namespace(&mut self, decl: &'a TSModuleDeclaration<'a>) -> CompileResult<()> {
        let name = match &decl.id {
            TSModuleDeclarationName::Identifier(id) => id.name.to_string(),
            TSModuleDeclarationName::StringLiteral(s) => s.value.to_string(),
        };

        let Some(TSModuleDeclarationBody::TSModuleBlock(block)) = &decl.body else {
            return Err(CompileError::unsupported("namespace without a block body"));
        };

        self.ctx.push_namespace(&name);
        let mut exported: Vec<String> = Vec::new();

        for stmt in &block.body {
            match stmt {
                Statement::ExportNamedDeclaration(export) => {
                    if let Some(declaration) = &export.declaration {
                        let names = self.declared_names(declaration);
                        match declaration {
                            Declaration::VariableDeclaration(d) => {
                                self.compile_variable_declaration(d)?;
                            }
                            Declaration::FunctionDeclaration(func) => {
                                if let Some(id) = &func.id {
                                    self.declare_function_record(func, id.name.as_str())?;
                                }
                                self.compile_function_declaration_body(func)?;
                            }
                            Declaration::ClassDeclaration(class) => {
                                let reg = self.compile_class_declaration(class)?;
                                self.cg.free_reg(reg);
                            }
                            Declaration::TSEnumDeclaration(d) => self.compile_ts_enum(d)?,
                            _ => {
                                return Err(CompileError::unsupported(
                                    "exported namespace member",
                                ));
                            }
                        }
                        exported.extend(names);
                    }
                }
                other => self.compile_statement(other)?,
            }
        }

        self.ctx.pop_namespace();

        // The namespace value: an object over the exported members
        let obj = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::NewObject { dst: obj });
        for member in &exported {
            // Function members sit under qualified locals; the rest
            // under their plain names
            let qualified = format!("{name}.{member}");
            let value = if matches!(self.cg.resolve_variable(&qualified), Resolved::Local(_)) {
                self.compile_identifier_by_name(&qualified, 0)?
            } else {
                self.compile_identifier_by_name(member, 0)?
            };
            let name_idx = self.cg.add_string(member);
            self.cg.emit(Instruction::SetProp {
                obj,
                name: name_idx,
                src: value.reg,
            });
            self.cg.free_reg(value.reg);
        }

        let slot = self
            .cg
            .declare_variable(&name, VariableKind::Const, StaticType::Object)?;
        self.cg.emit(Instruction::SetLocal {
            idx: LocalIndex(slot),
            src: obj,
        });
        self.cg.free_reg(obj);
        Ok(())
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    /// Static property-key name, when not computed/private
    pub(crate) fn property_key_name(&self, key: &PropertyKey<'a>) -> Option<String> {
        match key {
            PropertyKey::StaticIdentifier(ident) => Some(ident.name.to_string()),
            PropertyKey::StringLiteral(lit) => Some(lit.value.to_string()),
            PropertyKey::NumericLiteral(lit) => Some(crate::number_text(lit.value)),
            _ => None,
        }
    }

    /// Emit a number constant (inline int where possible)
    pub(crate) fn emit_number(&mut self, dst: Register, value: f64) {
        if value.fract() == 0.0
            && value >= i32::MIN as f64
            && value <= i32::MAX as f64
            && (value != 0.0 || value.is_sign_positive())
        {
            self.cg.emit(Instruction::LoadInt {
                dst,
                value: value as i32,
            });
        } else {
            let idx = self.cg.add_number(value);
            self.cg.emit(Instruction::LoadConst { dst, idx });
        }
    }

    /// Store into a named binding (local/upvalue; unresolved names get a
    /// fresh module-level slot)
    pub(crate) fn store_to_identifier(&mut self, name: &str, src: Register) -> CompileResult<()> {
        match self.cg.resolve_variable(name) {
            Resolved::Local(binding) => {
                self.cg.emit(Instruction::SetLocal {
                    idx: LocalIndex(binding.index),
                    src,
                });
            }
            Resolved::Upvalue { binding, depth } => {
                let upvalue = self.cg.register_upvalue(binding.index, depth);
                self.cg.emit(Instruction::SetUpvalue { idx: upvalue, src });
            }
            Resolved::Global => {
                let slot = self
                    .cg
                    .declare_variable(name, VariableKind::Var, StaticType::Unknown)?;
                self.cg.emit(Instruction::SetLocal {
                    idx: LocalIndex(slot),
                    src,
                });
            }
        }
        Ok(())
    }
}

impl Default for Emitter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

type Prologue<'a> = Box<dyn FnOnce(&mut Emitter<'a>) -> CompileResult<()> + 'a>;

/// Flags and context for one function body compilation
#[derive(Default)]
struct FunctionShape<'a> {
    is_async: bool,
    is_generator: bool,
    is_ctor: bool,
    is_method: bool,
    is_getter: bool,
    is_setter: bool,
    is_static: bool,
    class: Option<String>,
    prologue: Option<Prologue<'a>>,
}

impl FunctionShape<'_> {
    fn is_method_like(&self) -> bool {
        self.is_ctor || self.is_method || self.is_getter || self.is_setter
    }
}

fn machine_analysis_for(
    is_async: bool,
    is_generator: bool,
    statements: &[Statement],
) -> Option<Rc<MachineAnalysis>> {
    if is_async || is_generator {
        Some(Rc::new(machine::analyze(statements)))
    } else {
        None
    }
}

fn collect_pattern_names(pattern: &BindingPattern, names: &mut Vec<String>) {
    match pattern {
        BindingPattern::BindingIdentifier(ident) => names.push(ident.name.to_string()),
        BindingPattern::ObjectPattern(obj) => {
            for prop in &obj.properties {
                collect_pattern_names(&prop.value, names);
            }
            if let Some(rest) = &obj.rest {
                collect_pattern_names(&rest.argument, names);
            }
        }
        BindingPattern::ArrayPattern(arr) => {
            for elem in arr.elements.iter().flatten() {
                collect_pattern_names(elem, names);
            }
            if let Some(rest) = &arr.rest {
                collect_pattern_names(&rest.argument, names);
            }
        }
        BindingPattern::AssignmentPattern(assign) => collect_pattern_names(&assign.left, names),
    }
}
