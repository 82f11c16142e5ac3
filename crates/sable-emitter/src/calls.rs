//! Call-site dispatch: an ordered chain of handlers picks the emission
//! strategy for every `Call` node. The first handler that accepts the
//! call emits it; handlers must decide before touching any operand.
//!
//! Priorities (lower runs earlier):
//!   10 super calls
//!   20 console
//!   30 static strategies (Math/JSON/Object/Array/Number/Promise/Symbol/process)
//!   50 global builtin functions (parseInt, parseFloat, isNaN, isFinite)
//!   60 constructor-like builtins without `new` (Symbol, BigInt, Date, casts)
//!  100 direct-typed instance methods, receiver strategies, ambiguous
//!      string-vs-array methods
//!  200 named async functions
//!  300 named functions (arity padding, rest packing)
//! 1000 fully dynamic invocation

use oxc_ast::ast::*;
use sable_bytecode::{Instruction, Intrinsic, Register};

use crate::codegen::Resolved;
use crate::emitter::Emitter;
use crate::error::{CompileError, CompileResult};
use crate::strategies;
use crate::types::{StaticTag, StaticType, TypedReg};

/// Methods that exist on both string and array receivers; resolved with
/// a runtime type branch when the static type is unknown.
const AMBIGUOUS_METHODS: &[(&str, Intrinsic)] = &[
    ("slice", Intrinsic::StringSlice),
    ("concat", Intrinsic::StringConcat),
    ("includes", Intrinsic::StringIncludes),
    ("indexOf", Intrinsic::StringIndexOf),
    ("at", Intrinsic::StringAt),
];

impl<'a> Emitter<'a> {
    /// Lower one call through the handler chain
    pub(crate) fn compile_call_expression(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<TypedReg> {
        type Handler<'b> =
            fn(&mut Emitter<'b>, &'b CallExpression<'b>) -> CompileResult<Option<TypedReg>>;
        let chain: &[(u16, Handler<'a>)] = &[
            (10, Emitter::try_super_call),
            (20, Emitter::try_console_call),
            (30, Emitter::try_static_strategy_call),
            (50, Emitter::try_global_builtin_call),
            (60, Emitter::try_constructor_like_call),
            (100, Emitter::try_direct_typed_call),
            (100, Emitter::try_receiver_strategy_call),
            (100, Emitter::try_ambiguous_method_call),
            (200, Emitter::try_named_async_call),
            (300, Emitter::try_named_function_call),
        ];

        for (_priority, handler) in chain {
            if let Some(result) = handler(self, call)? {
                return Ok(result);
            }
        }
        self.compile_dynamic_call(call)
    }

    // ------------------------------------------------------------------
    // Shared frame construction
    // ------------------------------------------------------------------

    /// Plain argument expressions, or `None` when a spread is present
    fn plain_args(call: &'a CallExpression<'a>) -> Option<Vec<&'a Expression<'a>>> {
        let mut out = Vec::with_capacity(call.arguments.len());
        for arg in &call.arguments {
            match arg {
                Argument::SpreadElement(_) => return None,
                other => out.push(other.as_expression()?),
            }
        }
        Some(out)
    }

    /// Build a contiguous frame of `head` registers followed by compiled
    /// arguments. Caller frees the block.
    pub(crate) fn build_frame(
        &mut self,
        head: &[Register],
        args: &[&'a Expression<'a>],
    ) -> CompileResult<(Register, u16)> {
        let mut tmps = Vec::with_capacity(args.len());
        for arg in args {
            tmps.push(self.compile_expression(arg)?.reg);
        }

        let total = (head.len() + args.len()) as u16;
        let frame = self.cg.alloc_block(total)?;
        for (i, reg) in head.iter().enumerate() {
            self.cg.emit(Instruction::Move {
                dst: frame.offset(i as u16),
                src: *reg,
            });
        }
        for (i, tmp) in tmps.iter().enumerate() {
            self.cg.emit(Instruction::Move {
                dst: frame.offset((head.len() + i) as u16),
                src: *tmp,
            });
        }
        for tmp in tmps {
            self.cg.free_reg(tmp);
        }
        Ok((frame, total))
    }

    /// Gather all arguments (spread included) into one array register
    fn build_spread_array(
        &mut self,
        arguments: &'a [Argument<'a>],
    ) -> CompileResult<Register> {
        let arr = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::NewArray { dst: arr });
        for arg in arguments {
            match arg {
                Argument::SpreadElement(spread) => {
                    let value = self.compile_expression(&spread.argument)?;
                    self.cg.emit(Instruction::SpreadAppend {
                        arr,
                        src: value.reg,
                    });
                    self.cg.free_reg(value.reg);
                }
                other => {
                    let expr = other
                        .as_expression()
                        .ok_or_else(|| CompileError::internal("argument is not an expression"))?;
                    let value = self.compile_expression(expr)?;
                    self.cg.emit(Instruction::AppendElement {
                        arr,
                        src: value.reg,
                    });
                    self.cg.free_reg(value.reg);
                }
            }
        }
        Ok(arr)
    }

    /// Emit a `CallIntrinsic` over compiled arguments (no receiver)
    fn emit_intrinsic_call(
        &mut self,
        op: Intrinsic,
        args: &[&'a Expression<'a>],
        tag: StaticTag,
    ) -> CompileResult<TypedReg> {
        let (frame, total) = self.build_frame(&[], args)?;
        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::CallIntrinsic {
            dst,
            op,
            frame,
            argc: total as u8,
        });
        self.cg.free_block(frame, total);
        Ok(TypedReg::tagged(dst, tag))
    }

    /// Whether `name` is lexically unshadowed (resolves to the globals)
    fn is_unshadowed_global(&self, name: &str) -> bool {
        matches!(self.cg.resolve_variable(name), Resolved::Global)
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    /// P=10: `super(…)`
    fn try_super_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        if !matches!(call.callee, Expression::Super(_)) {
            return Ok(None);
        }
        let args = Self::plain_args(call)
            .ok_or_else(|| CompileError::unsupported("spread in super call"))?;
        let (frame, total) = self.build_frame(&[], &args)?;
        self.cg.emit(Instruction::CallSuper {
            frame,
            argc: total as u8,
        });
        self.cg.free_block(frame, total);

        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::LoadUndefined { dst });
        Ok(Some(TypedReg::unknown(dst)))
    }

    /// P=20: `console.*`
    fn try_console_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        let Expression::StaticMemberExpression(member) = &call.callee else {
            return Ok(None);
        };
        let Expression::Identifier(obj) = &member.object else {
            return Ok(None);
        };
        if obj.name != "console" || !self.is_unshadowed_global("console") {
            return Ok(None);
        }
        let op = match member.property.name.as_str() {
            "log" => Intrinsic::ConsoleLog,
            "info" => Intrinsic::ConsoleInfo,
            "debug" => Intrinsic::ConsoleDebug,
            "error" => Intrinsic::ConsoleError,
            "warn" => Intrinsic::ConsoleWarn,
            _ => return Ok(None),
        };
        let Some(args) = Self::plain_args(call) else {
            return Ok(None);
        };
        Ok(Some(self.emit_intrinsic_call(op, &args, StaticTag::Unknown)?))
    }

    /// P=30: static strategy dispatch (`Math.*`, `JSON.*`, …)
    fn try_static_strategy_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        let Expression::StaticMemberExpression(member) = &call.callee else {
            return Ok(None);
        };
        let Expression::Identifier(obj) = &member.object else {
            return Ok(None);
        };
        let Some(table) = strategies::static_methods(&obj.name) else {
            return Ok(None);
        };
        if !self.is_unshadowed_global(&obj.name) {
            return Ok(None);
        }
        // Name filter before anything touches operands
        let Some(found) = strategies::find(table, &member.property.name) else {
            return Ok(None);
        };
        let Some(args) = Self::plain_args(call) else {
            return Ok(None);
        };
        Ok(Some(self.emit_intrinsic_call(
            found.op,
            &args,
            found.returns.tag(),
        )?))
    }

    /// P=50: global builtin functions
    fn try_global_builtin_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        let Expression::Identifier(ident) = &call.callee else {
            return Ok(None);
        };
        let op = match ident.name.as_str() {
            "parseInt" => Intrinsic::ParseInt,
            "parseFloat" => Intrinsic::ParseFloat,
            "isNaN" => Intrinsic::IsNaN,
            "isFinite" => Intrinsic::IsFinite,
            _ => return Ok(None),
        };
        if !self.is_unshadowed_global(&ident.name) {
            return Ok(None);
        }
        let Some(args) = Self::plain_args(call) else {
            return Ok(None);
        };
        let tag = if op == Intrinsic::ParseInt || op == Intrinsic::ParseFloat {
            StaticTag::Double
        } else {
            StaticTag::Boolean
        };
        Ok(Some(self.emit_intrinsic_call(op, &args, tag)?))
    }

    /// P=60: constructor-like builtins called without `new`
    fn try_constructor_like_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        let Expression::Identifier(ident) = &call.callee else {
            return Ok(None);
        };
        let (op, tag) = match ident.name.as_str() {
            "Symbol" => (Intrinsic::SymbolNew, StaticTag::Unknown),
            "BigInt" => (Intrinsic::BigIntNew, StaticTag::Unknown),
            "Date" => (Intrinsic::DateCall, StaticTag::String),
            "String" => (Intrinsic::StringCast, StaticTag::String),
            "Number" => (Intrinsic::NumberCast, StaticTag::Double),
            "Boolean" => (Intrinsic::BooleanCast, StaticTag::Boolean),
            _ => return Ok(None),
        };
        if !self.is_unshadowed_global(&ident.name) {
            return Ok(None);
        }
        let Some(args) = Self::plain_args(call) else {
            return Ok(None);
        };
        Ok(Some(self.emit_intrinsic_call(op, &args, tag)?))
    }

    /// P=100: direct dispatch when the receiver's static type names a
    /// class whose method chain resolves
    fn try_direct_typed_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        let Expression::StaticMemberExpression(member) = &call.callee else {
            return Ok(None);
        };
        let StaticType::Class(class_name) = self.static_type_of(&member.object) else {
            return Ok(None);
        };
        let Some((declaring, position)) = self
            .ctx
            .resolve_instance_method(&class_name, &member.property.name)
            .map(|(record, position)| (record.index, position))
        else {
            return Ok(None);
        };
        let Some(args) = Self::plain_args(call) else {
            return Ok(None);
        };

        let receiver = self.compile_expression(&member.object)?;
        let (frame, total) = self.build_frame(&[receiver.reg], &args)?;
        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::CallDirect {
            dst,
            class: declaring,
            method: position,
            frame,
            argc: (total - 1) as u8,
        });
        self.cg.free_block(frame, total);
        self.cg.free_reg(receiver.reg);
        Ok(Some(TypedReg::unknown(dst)))
    }

    /// P=100: receiver-type strategy dispatch
    fn try_receiver_strategy_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        let Expression::StaticMemberExpression(member) = &call.callee else {
            return Ok(None);
        };
        let recv_ty = self.static_type_of(&member.object);
        // Name filter first: a declining strategy must not emit anything
        let Some(found) = strategies::resolve_method(&recv_ty, &member.property.name) else {
            return Ok(None);
        };
        let Some(args) = Self::plain_args(call) else {
            return Ok(None);
        };

        let receiver = self.compile_expression(&member.object)?;
        let (frame, total) = self.build_frame(&[receiver.reg], &args)?;
        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::CallIntrinsic {
            dst,
            op: found.op,
            frame,
            argc: total as u8,
        });
        self.cg.free_block(frame, total);
        self.cg.free_reg(receiver.reg);
        Ok(Some(TypedReg::tagged(dst, found.returns.tag())))
    }

    /// P=100: string-vs-array ambiguous methods on untyped receivers —
    /// a runtime `typeof` branch picks the string fast path, everything
    /// else falls back to dynamic dispatch.
    fn try_ambiguous_method_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        let Expression::StaticMemberExpression(member) = &call.callee else {
            return Ok(None);
        };
        let name = member.property.name.as_str();
        let Some((_, string_op)) = AMBIGUOUS_METHODS.iter().find(|(n, _)| *n == name) else {
            return Ok(None);
        };
        if self.static_type_of(&member.object) != StaticType::Unknown {
            return Ok(None);
        }
        let Some(args) = Self::plain_args(call) else {
            return Ok(None);
        };

        let receiver = self.compile_expression(&member.object)?;
        let mut tmps = Vec::with_capacity(args.len());
        for arg in &args {
            tmps.push(self.compile_expression(arg)?.reg);
        }

        let dst = self.cg.alloc_reg()?;

        // typeof receiver === "string"
        let ty = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::TypeOf {
            dst: ty,
            src: receiver.reg,
        });
        let expect = self.cg.alloc_reg()?;
        let string_idx = self.cg.add_string("string");
        self.cg.emit(Instruction::LoadConst {
            dst: expect,
            idx: string_idx,
        });
        let cond = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::StrictEq {
            dst: cond,
            lhs: ty,
            rhs: expect,
        });
        let not_string = self.cg.emit_jump_if_false(cond);
        self.cg.free_reg(cond);
        self.cg.free_reg(expect);
        self.cg.free_reg(ty);

        // String path: the receiver strategy's operation
        let total = (1 + tmps.len()) as u16;
        let frame = self.cg.alloc_block(total)?;
        self.cg.emit(Instruction::Move {
            dst: frame,
            src: receiver.reg,
        });
        for (i, tmp) in tmps.iter().enumerate() {
            self.cg.emit(Instruction::Move {
                dst: frame.offset(1 + i as u16),
                src: *tmp,
            });
        }
        self.cg.emit(Instruction::CallIntrinsic {
            dst,
            op: *string_op,
            frame,
            argc: total as u8,
        });
        self.cg.free_block(frame, total);
        let done = self.cg.emit_jump();

        // Anything else: dynamic dispatch
        self.cg.patch_to_here(not_string);
        let total = (1 + tmps.len()) as u16;
        let frame = self.cg.alloc_block(total)?;
        self.cg.emit(Instruction::Move {
            dst: frame,
            src: receiver.reg,
        });
        for (i, tmp) in tmps.iter().enumerate() {
            self.cg.emit(Instruction::Move {
                dst: frame.offset(1 + i as u16),
                src: *tmp,
            });
        }
        let name_idx = self.cg.add_string(name);
        self.cg.emit(Instruction::CallMethod {
            dst,
            frame,
            name: name_idx,
            argc: (total - 1) as u8,
        });
        self.cg.free_block(frame, total);
        self.cg.patch_to_here(done);

        for tmp in tmps {
            self.cg.free_reg(tmp);
        }
        self.cg.free_reg(receiver.reg);
        Ok(Some(TypedReg::unknown(dst)))
    }

    /// P=200: named async function calls
    fn try_named_async_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        match self.named_function_record(call) {
            Some(record) if record.is_async => self.emit_named_call(call).map(Some),
            _ => Ok(None),
        }
    }

    /// P=300: named function calls — arity padding and rest handling
    /// resolved at the call site; explicit type arguments erase in this
    /// backend (every generic parameter maps to the universal value type)
    fn try_named_function_call(
        &mut self,
        call: &'a CallExpression<'a>,
    ) -> CompileResult<Option<TypedReg>> {
        match self.named_function_record(call) {
            Some(_) => self.emit_named_call(call).map(Some),
            None => Ok(None),
        }
    }

    fn named_function_record(
        &self,
        call: &'a CallExpression<'a>,
    ) -> Option<crate::context::FunctionRecord> {
        let Expression::Identifier(ident) = &call.callee else {
            return None;
        };
        // The binding must still be the hoisted function, not a shadow
        match self.cg.resolve_variable(&ident.name) {
            Resolved::Local(binding) | Resolved::Upvalue { binding, .. }
                if binding.ty == StaticType::Function =>
            {
                self.ctx.resolve_function_name(&ident.name).cloned()
            }
            _ => None,
        }
    }

    fn emit_named_call(&mut self, call: &'a CallExpression<'a>) -> CompileResult<TypedReg> {
        let Expression::Identifier(ident) = &call.callee else {
            return Err(CompileError::internal("named call without identifier callee"));
        };
        let record = self
            .ctx
            .resolve_function_name(&ident.name)
            .cloned()
            .ok_or_else(|| CompileError::internal("named call without record"))?;

        let Some(args) = Self::plain_args(call) else {
            // Spread defeats compile-time argument shaping
            return self.compile_dynamic_call(call);
        };

        let callee = self.compile_identifier_by_name(&ident.name, ident.span.start)?;
        let mut tmps = Vec::with_capacity(args.len());
        for arg in &args {
            tmps.push(self.compile_expression(arg)?.reg);
        }

        // Pad missing arguments below the declared arity so default
        // initializers observe undefined; extra arguments flow through
        // for the callee's rest parameter to pack.
        let arity = record.arity as usize;
        let shaped = tmps.len().max(arity);
        let total = (1 + shaped) as u16;
        let frame = self.cg.alloc_block(total)?;
        self.cg.emit(Instruction::Move {
            dst: frame,
            src: callee.reg,
        });
        for (i, tmp) in tmps.iter().enumerate() {
            self.cg.emit(Instruction::Move {
                dst: frame.offset(1 + i as u16),
                src: *tmp,
            });
        }
        for i in tmps.len()..shaped {
            self.cg.emit(Instruction::LoadUndefined {
                dst: frame.offset(1 + i as u16),
            });
        }

        let dst = self.cg.alloc_reg()?;
        self.cg.emit(Instruction::Call {
            dst,
            frame,
            argc: shaped as u8,
        });
        self.cg.free_block(frame, total);
        for tmp in tmps {
            self.cg.free_reg(tmp);
        }
        self.cg.free_reg(callee.reg);
        Ok(TypedReg::unknown(dst))
    }

    /// P=1000: fully dynamic invocation
    fn compile_dynamic_call(&mut self, call: &'a CallExpression<'a>) -> CompileResult<TypedReg> {
        // obj.#m(…) routes through the private-method helper
        if let Expression::PrivateFieldExpression(member) = &call.callee {
            let class_index = self.current_class_index(member.span.start)?;
            let args = Self::plain_args(call)
                .ok_or_else(|| CompileError::unsupported("spread in private method call"))?;
            let receiver = self.compile_expression(&member.object)?;
            let (frame, total) = self.build_frame(&[receiver.reg], &args)?;
            let dst = self.cg.alloc_reg()?;
            let name_idx = self.cg.add_string(&member.field.name);
            self.cg.emit(Instruction::CallPrivate {
                dst,
                class: class_index,
                name: name_idx,
                frame,
                argc: (total - 1) as u8,
            });
            self.cg.free_block(frame, total);
            self.cg.free_reg(receiver.reg);
            return Ok(TypedReg::unknown(dst));
        }

        // super.m(…)
        if let Expression::StaticMemberExpression(member) = &call.callee {
            if matches!(member.object, Expression::Super(_)) {
                let args = Self::plain_args(call)
                    .ok_or_else(|| CompileError::unsupported("spread in super method call"))?;
                let this = self.cg.alloc_reg()?;
                self.cg.emit(Instruction::LoadThis { dst: this });
                let (frame, total) = self.build_frame(&[this], &args)?;
                let dst = self.cg.alloc_reg()?;
                let name_idx = self.cg.add_string(&member.property.name);
                self.cg.emit(Instruction::CallSuperMethod {
                    dst,
                    name: name_idx,
                    frame,
                    argc: (total - 1) as u8,
                });
                self.cg.free_block(frame, total);
                self.cg.free_reg(this);
                return Ok(TypedReg::unknown(dst));
            }
        }

        let has_spread = call
            .arguments
            .iter()
            .any(|arg| matches!(arg, Argument::SpreadElement(_)));

        match &call.callee {
            Expression::StaticMemberExpression(member) => {
                let receiver = self.compile_expression(&member.object)?;
                let name_idx = self.cg.add_string(&member.property.name);
                let dst = self.cg.alloc_reg()?;
                if has_spread {
                    let args = self.build_spread_array(&call.arguments)?;
                    self.cg.emit(Instruction::CallMethodSpread {
                        dst,
                        obj: receiver.reg,
                        name: name_idx,
                        args,
                    });
                    self.cg.free_reg(args);
                } else {
                    let args = Self::plain_args(call)
                        .ok_or_else(|| CompileError::internal("spread slipped through"))?;
                    let (frame, total) = self.build_frame(&[receiver.reg], &args)?;
                    self.cg.emit(Instruction::CallMethod {
                        dst,
                        frame,
                        name: name_idx,
                        argc: (total - 1) as u8,
                    });
                    self.cg.free_block(frame, total);
                }
                self.cg.free_reg(receiver.reg);
                Ok(TypedReg::unknown(dst))
            }
            Expression::ComputedMemberExpression(member) => {
                let receiver = self.compile_expression(&member.object)?;
                let key = self.compile_expression(&member.expression)?;
                let dst = self.cg.alloc_reg()?;
                if has_spread {
                    // Fetch the method, then spread-call it (receiver
                    // binding is re-established by the helper)
                    let method = self.cg.alloc_reg()?;
                    self.cg.emit(Instruction::GetIndex {
                        dst: method,
                        obj: receiver.reg,
                        key: key.reg,
                    });
                    let args = self.build_spread_array(&call.arguments)?;
                    self.cg.emit(Instruction::CallSpread {
                        dst,
                        func: method,
                        args,
                    });
                    self.cg.free_reg(args);
                    self.cg.free_reg(method);
                } else {
                    let args = Self::plain_args(call)
                        .ok_or_else(|| CompileError::internal("spread slipped through"))?;
                    let (frame, total) = self.build_frame(&[receiver.reg, key.reg], &args)?;
                    self.cg.emit(Instruction::CallComputed {
                        dst,
                        frame,
                        argc: (total - 2) as u8,
                    });
                    self.cg.free_block(frame, total);
                }
                self.cg.free_reg(key.reg);
                self.cg.free_reg(receiver.reg);
                Ok(TypedReg::unknown(dst))
            }
            callee => {
                let func = self.compile_expression(callee)?;
                let dst = self.cg.alloc_reg()?;
                if has_spread {
                    let args = self.build_spread_array(&call.arguments)?;
                    self.cg.emit(Instruction::CallSpread {
                        dst,
                        func: func.reg,
                        args,
                    });
                    self.cg.free_reg(args);
                } else {
                    let args = Self::plain_args(call)
                        .ok_or_else(|| CompileError::internal("spread slipped through"))?;
                    let (frame, total) = self.build_frame(&[func.reg], &args)?;
                    self.cg.emit(Instruction::Call {
                        dst,
                        frame,
                        argc: (total - 1) as u8,
                    });
                    self.cg.free_block(frame, total);
                }
                self.cg.free_reg(func.reg);
                Ok(TypedReg::unknown(dst))
            }
        }
    }

    // ------------------------------------------------------------------
    // `new` expressions
    // ------------------------------------------------------------------

    pub(crate) fn compile_new_expression(
        &mut self,
        new_expr: &'a NewExpression<'a>,
    ) -> CompileResult<TypedReg> {
        let has_spread = new_expr
            .arguments
            .iter()
            .any(|arg| matches!(arg, Argument::SpreadElement(_)));

        if let Expression::Identifier(ident) = &new_expr.callee {
            // Known user class → direct instantiation
            if !has_spread {
                if let Some(class_name) = self.ctx.resolve_class_name(&ident.name) {
                    if let Resolved::Local(binding) | Resolved::Upvalue { binding, .. } =
                        self.cg.resolve_variable(&ident.name)
                    {
                        if binding.ty == StaticType::Class(class_name.to_string()) {
                            let index = self.ctx.classes[class_name].index;
                            let args = new_args(&new_expr.arguments)?;
                            let (frame, total) = self.build_frame(&[], &args)?;
                            let dst = self.cg.alloc_reg()?;
                            self.cg.emit(Instruction::NewInstance {
                                dst,
                                class: index,
                                frame,
                                argc: total as u8,
                            });
                            self.cg.free_block(frame, total);
                            return Ok(TypedReg::unknown(dst));
                        }
                    }
                }

                // Built-in constructors
                let op = match ident.name.as_str() {
                    "Date" => Some(Intrinsic::NewDate),
                    "Map" => Some(Intrinsic::NewMap),
                    "Set" => Some(Intrinsic::NewSet),
                    "WeakMap" => Some(Intrinsic::NewWeakMap),
                    "WeakSet" => Some(Intrinsic::NewWeakSet),
                    "RegExp" => Some(Intrinsic::NewRegExp),
                    "Promise" => Some(Intrinsic::NewPromise),
                    "Error" => Some(Intrinsic::NewError),
                    "TypeError" => Some(Intrinsic::NewTypeError),
                    "RangeError" => Some(Intrinsic::NewRangeError),
                    _ => None,
                };
                if let Some(op) = op {
                    if self.is_unshadowed_global(&ident.name) {
                        let args = new_args(&new_expr.arguments)?;
                        return self.emit_intrinsic_call(op, &args, StaticTag::Unknown);
                    }
                }
            }
        }

        // Dynamic construction
        let callee = self.compile_expression(&new_expr.callee)?;
        let dst = self.cg.alloc_reg()?;
        if has_spread {
            let args = self.build_spread_array(&new_expr.arguments)?;
            self.cg.emit(Instruction::ConstructSpread {
                dst,
                func: callee.reg,
                args,
            });
            self.cg.free_reg(args);
        } else {
            let args = new_args(&new_expr.arguments)?;
            let (frame, total) = self.build_frame(&[callee.reg], &args)?;
            self.cg.emit(Instruction::Construct {
                dst,
                frame,
                argc: (total - 1) as u8,
            });
            self.cg.free_block(frame, total);
        }
        self.cg.free_reg(callee.reg);
        Ok(TypedReg::unknown(dst))
    }
}

fn new_args<'a>(arguments: &'a [Argument<'a>]) -> CompileResult<Vec<&'a Expression<'a>>> {
    arguments
        .iter()
        .map(|arg| {
            arg.as_expression()
                .ok_or_else(|| CompileError::internal("spread argument in plain path"))
        })
        .collect()
}
