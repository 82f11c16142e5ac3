//! State-machine rewriting support: the liveness pre-pass.
//!
//! Before emitting an async function or generator body, this pass
//! assigns each `yield`/`await` a suspension site and computes, per
//! local, the source interval over which it is referenced. A local must
//! be hoisted into the machine record at a given suspension iff its
//! interval straddles the suspension point, or it lives inside a loop
//! that contains one (the loop body re-executes after resume, so the
//! prior contents must survive).
//!
//! Nested functions are descended into: a closure created before a
//! suspension and invoked after it keeps the captured cell alive, so
//! references inside nested bodies count at their source positions.

use oxc_ast::ast::*;
use rustc_hash::FxHashMap;

/// Reference interval of one name, in source offsets
#[derive(Debug, Clone, Copy)]
struct Interval {
    first: u32,
    last: u32,
}

#[derive(Debug, Clone, Copy)]
struct LoopSpan {
    start: u32,
    end: u32,
    has_suspend: bool,
}

/// Result of the pre-pass over one machine function body
#[derive(Debug, Default)]
pub struct MachineAnalysis {
    intervals: FxHashMap<String, Interval>,
    /// Suspension sites in source order (span starts)
    pub suspend_offsets: Vec<u32>,
}

impl MachineAnalysis {
    /// Whether the named local is live across the suspension at `offset`
    pub fn live_across(&self, name: &str, offset: u32) -> bool {
        match self.intervals.get(name) {
            Some(interval) => interval.first <= offset && interval.last > offset,
            None => false,
        }
    }
}

/// Analyze a machine function body
pub fn analyze(statements: &[Statement]) -> MachineAnalysis {
    let mut collector = Collector::default();
    for stmt in statements {
        collector.visit_statement(stmt);
    }
    collector.finish()
}

#[derive(Default)]
struct Collector {
    intervals: FxHashMap<String, Interval>,
    suspends: Vec<u32>,
    loop_stack: Vec<LoopSpan>,
    finished_loops: Vec<LoopSpan>,
    /// Nesting depth into inner functions: their `yield`/`await` belong
    /// to their own machines, but their references still pin captures
    fn_depth: usize,
}

impl Collector {
    fn finish(mut self) -> MachineAnalysis {
        // Widen intervals through suspending loops: anything referenced
        // inside such a loop must survive every suspension in it.
        for lp in &self.finished_loops {
            if !lp.has_suspend {
                continue;
            }
            for interval in self.intervals.values_mut() {
                let intersects = interval.first <= lp.end && interval.last >= lp.start;
                if intersects {
                    interval.first = interval.first.min(lp.start);
                    interval.last = interval.last.max(lp.end);
                }
            }
        }
        MachineAnalysis {
            intervals: self.intervals,
            suspend_offsets: self.suspends,
        }
    }

    fn record(&mut self, name: &str, offset: u32) {
        self.intervals
            .entry(name.to_string())
            .and_modify(|i| {
                i.first = i.first.min(offset);
                i.last = i.last.max(offset);
            })
            .or_insert(Interval {
                first: offset,
                last: offset,
            });
    }

    fn record_suspend(&mut self, offset: u32) {
        if self.fn_depth > 0 {
            return;
        }
        self.suspends.push(offset);
        for lp in &mut self.loop_stack {
            lp.has_suspend = true;
        }
    }

    fn enter_loop(&mut self, span: oxc_span::Span) {
        self.loop_stack.push(LoopSpan {
            start: span.start,
            end: span.end,
            has_suspend: false,
        });
    }

    fn exit_loop(&mut self) {
        if let Some(lp) = self.loop_stack.pop() {
            self.finished_loops.push(lp);
        }
    }

    fn visit_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::BlockStatement(block) => {
                for s in &block.body {
                    self.visit_statement(s);
                }
            }
            Statement::VariableDeclaration(decl) => {
                for declarator in &decl.declarations {
                    self.visit_binding_pattern(&declarator.id);
                    if let Some(init) = &declarator.init {
                        self.visit_expression(init);
                    }
                }
            }
            Statement::ExpressionStatement(es) => self.visit_expression(&es.expression),
            Statement::IfStatement(is) => {
                self.visit_expression(&is.test);
                self.visit_statement(&is.consequent);
                if let Some(alt) = &is.alternate {
                    self.visit_statement(alt);
                }
            }
            Statement::WhileStatement(ws) => {
                self.enter_loop(ws.span);
                self.visit_expression(&ws.test);
                self.visit_statement(&ws.body);
                self.exit_loop();
            }
            Statement::DoWhileStatement(dws) => {
                self.enter_loop(dws.span);
                self.visit_statement(&dws.body);
                self.visit_expression(&dws.test);
                self.exit_loop();
            }
            Statement::ForStatement(fs) => {
                self.enter_loop(fs.span);
                match &fs.init {
                    Some(ForStatementInit::VariableDeclaration(decl)) => {
                        for declarator in &decl.declarations {
                            self.visit_binding_pattern(&declarator.id);
                            if let Some(init) = &declarator.init {
                                self.visit_expression(init);
                            }
                        }
                    }
                    Some(init) => {
                        if let Some(expr) = init.as_expression() {
                            self.visit_expression(expr);
                        }
                    }
                    None => {}
                }
                if let Some(test) = &fs.test {
                    self.visit_expression(test);
                }
                if let Some(update) = &fs.update {
                    self.visit_expression(update);
                }
                self.visit_statement(&fs.body);
                self.exit_loop();
            }
            Statement::ForOfStatement(fo) => {
                self.enter_loop(fo.span);
                self.visit_for_left(&fo.left);
                self.visit_expression(&fo.right);
                self.visit_statement(&fo.body);
                self.exit_loop();
            }
            Statement::ForInStatement(fi) => {
                self.enter_loop(fi.span);
                self.visit_for_left(&fi.left);
                self.visit_expression(&fi.right);
                self.visit_statement(&fi.body);
                self.exit_loop();
            }
            Statement::ReturnStatement(rs) => {
                if let Some(arg) = &rs.argument {
                    self.visit_expression(arg);
                }
            }
            Statement::SwitchStatement(ss) => {
                self.visit_expression(&ss.discriminant);
                for case in &ss.cases {
                    if let Some(test) = &case.test {
                        self.visit_expression(test);
                    }
                    for s in &case.consequent {
                        self.visit_statement(s);
                    }
                }
            }
            Statement::ThrowStatement(ts) => self.visit_expression(&ts.argument),
            Statement::TryStatement(ts) => {
                for s in &ts.block.body {
                    self.visit_statement(s);
                }
                if let Some(handler) = &ts.handler {
                    if let Some(param) = &handler.param {
                        self.visit_binding_pattern(&param.pattern);
                    }
                    for s in &handler.body.body {
                        self.visit_statement(s);
                    }
                }
                if let Some(finalizer) = &ts.finalizer {
                    for s in &finalizer.body {
                        self.visit_statement(s);
                    }
                }
            }
            Statement::LabeledStatement(ls) => self.visit_statement(&ls.body),
            Statement::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    self.record(id.name.as_str(), id.span.start);
                }
                self.visit_function(func);
            }
            Statement::ClassDeclaration(class) => self.visit_class(class),
            _ => {}
        }
    }

    fn visit_for_left(&mut self, left: &ForStatementLeft) {
        if let ForStatementLeft::VariableDeclaration(decl) = left {
            for declarator in &decl.declarations {
                self.visit_binding_pattern(&declarator.id);
            }
        }
    }

    fn visit_binding_pattern(&mut self, pattern: &BindingPattern) {
        match pattern {
            BindingPattern::BindingIdentifier(id) => {
                self.record(id.name.as_str(), id.span.start);
            }
            BindingPattern::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    self.visit_binding_pattern(&prop.value);
                }
                if let Some(rest) = &obj.rest {
                    self.visit_binding_pattern(&rest.argument);
                }
            }
            BindingPattern::ArrayPattern(arr) => {
                for element in arr.elements.iter().flatten() {
                    self.visit_binding_pattern(element);
                }
                if let Some(rest) = &arr.rest {
                    self.visit_binding_pattern(&rest.argument);
                }
            }
            BindingPattern::AssignmentPattern(assign) => {
                self.visit_binding_pattern(&assign.left);
                self.visit_expression(&assign.right);
            }
        }
    }

    fn visit_simple_target(&mut self, target: &SimpleAssignmentTarget) {
        match target {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => {
                self.record(id.name.as_str(), id.span.start);
            }
            SimpleAssignmentTarget::StaticMemberExpression(member) => {
                self.visit_expression(&member.object);
            }
            SimpleAssignmentTarget::ComputedMemberExpression(member) => {
                self.visit_expression(&member.object);
                self.visit_expression(&member.expression);
            }
            SimpleAssignmentTarget::PrivateFieldExpression(member) => {
                self.visit_expression(&member.object);
            }
            _ => {}
        }
    }

    fn visit_assignment_target(&mut self, target: &AssignmentTarget) {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(id) => {
                self.record(id.name.as_str(), id.span.start);
            }
            AssignmentTarget::StaticMemberExpression(member) => {
                self.visit_expression(&member.object);
            }
            AssignmentTarget::ComputedMemberExpression(member) => {
                self.visit_expression(&member.object);
                self.visit_expression(&member.expression);
            }
            AssignmentTarget::PrivateFieldExpression(member) => {
                self.visit_expression(&member.object);
            }
            _ => {}
        }
    }

    fn visit_function(&mut self, func: &Function) {
        self.fn_depth += 1;
        for param in &func.params.items {
            self.visit_binding_pattern(&param.pattern);
        }
        if let Some(rest) = &func.params.rest {
            self.visit_binding_pattern(&rest.rest.argument);
        }
        if let Some(body) = &func.body {
            for stmt in &body.statements {
                self.visit_statement(stmt);
            }
        }
        self.fn_depth -= 1;
    }

    fn visit_class(&mut self, class: &Class) {
        if let Some(superclass) = &class.super_class {
            self.visit_expression(superclass);
        }
        for element in &class.body.body {
            match element {
                ClassElement::MethodDefinition(method) => self.visit_function(&method.value),
                ClassElement::PropertyDefinition(prop) => {
                    if let Some(value) = &prop.value {
                        self.visit_expression(value);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Identifier(id) => self.record(id.name.as_str(), id.span.start),
            Expression::AwaitExpression(await_expr) => {
                self.visit_expression(&await_expr.argument);
                self.record_suspend(await_expr.span.start);
            }
            Expression::YieldExpression(yield_expr) => {
                if let Some(arg) = &yield_expr.argument {
                    self.visit_expression(arg);
                }
                self.record_suspend(yield_expr.span.start);
            }
            Expression::BinaryExpression(binary) => {
                self.visit_expression(&binary.left);
                self.visit_expression(&binary.right);
            }
            Expression::LogicalExpression(logical) => {
                self.visit_expression(&logical.left);
                self.visit_expression(&logical.right);
            }
            Expression::UnaryExpression(unary) => self.visit_expression(&unary.argument),
            Expression::UpdateExpression(update) => self.visit_simple_target(&update.argument),
            Expression::AssignmentExpression(assign) => {
                self.visit_assignment_target(&assign.left);
                self.visit_expression(&assign.right);
            }
            Expression::ConditionalExpression(cond) => {
                self.visit_expression(&cond.test);
                self.visit_expression(&cond.consequent);
                self.visit_expression(&cond.alternate);
            }
            Expression::CallExpression(call) => {
                self.visit_expression(&call.callee);
                for arg in &call.arguments {
                    self.visit_argument(arg);
                }
            }
            Expression::NewExpression(new_expr) => {
                self.visit_expression(&new_expr.callee);
                for arg in &new_expr.arguments {
                    self.visit_argument(arg);
                }
            }
            Expression::StaticMemberExpression(member) => self.visit_expression(&member.object),
            Expression::ComputedMemberExpression(member) => {
                self.visit_expression(&member.object);
                self.visit_expression(&member.expression);
            }
            Expression::PrivateFieldExpression(member) => self.visit_expression(&member.object),
            Expression::ArrayExpression(arr) => {
                for element in &arr.elements {
                    match element {
                        ArrayExpressionElement::SpreadElement(spread) => {
                            self.visit_expression(&spread.argument);
                        }
                        ArrayExpressionElement::Elision(_) => {}
                        other => {
                            if let Some(e) = other.as_expression() {
                                self.visit_expression(e);
                            }
                        }
                    }
                }
            }
            Expression::ObjectExpression(obj) => {
                for prop in &obj.properties {
                    match prop {
                        ObjectPropertyKind::ObjectProperty(p) => {
                            if p.computed {
                                if let Some(key) = p.key.as_expression() {
                                    self.visit_expression(key);
                                }
                            }
                            self.visit_expression(&p.value);
                        }
                        ObjectPropertyKind::SpreadProperty(spread) => {
                            self.visit_expression(&spread.argument);
                        }
                    }
                }
            }
            Expression::TemplateLiteral(template) => {
                for e in &template.expressions {
                    self.visit_expression(e);
                }
            }
            Expression::TaggedTemplateExpression(tagged) => {
                self.visit_expression(&tagged.tag);
                for e in &tagged.quasi.expressions {
                    self.visit_expression(e);
                }
            }
            Expression::SequenceExpression(seq) => {
                for e in &seq.expressions {
                    self.visit_expression(e);
                }
            }
            Expression::ParenthesizedExpression(paren) => self.visit_expression(&paren.expression),
            Expression::ChainExpression(chain) => match &chain.expression {
                ChainElement::StaticMemberExpression(m) => self.visit_expression(&m.object),
                ChainElement::ComputedMemberExpression(m) => {
                    self.visit_expression(&m.object);
                    self.visit_expression(&m.expression);
                }
                ChainElement::CallExpression(call) => {
                    self.visit_expression(&call.callee);
                    for arg in &call.arguments {
                        self.visit_argument(arg);
                    }
                }
                _ => {}
            },
            Expression::ArrowFunctionExpression(arrow) => {
                self.fn_depth += 1;
                for param in &arrow.params.items {
                    self.visit_binding_pattern(&param.pattern);
                }
                for stmt in &arrow.body.statements {
                    self.visit_statement(stmt);
                }
                self.fn_depth -= 1;
            }
            Expression::FunctionExpression(func) => self.visit_function(func),
            Expression::ClassExpression(class) => self.visit_class(class),
            _ => {}
        }
    }

    fn visit_argument(&mut self, arg: &Argument) {
        match arg {
            Argument::SpreadElement(spread) => self.visit_expression(&spread.argument),
            other => {
                if let Some(e) = other.as_expression() {
                    self.visit_expression(e);
                }
            }
        }
    }
}
