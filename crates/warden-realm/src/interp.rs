// interp.rs — Tree-walking evaluator for confined code.
//
// The only names confined code can resolve are its own lexical bindings, the
// endowment scope at the root of every evaluation, and the environment's
// global object. Nothing from the host is reachable any other way.
//
// Host recursion is bounded twice: `MAX_CALL_DEPTH` limits confined calls,
// and `MAX_EVAL_DEPTH` limits nested expression/statement evaluation. Both
// surface as a catchable `RangeError` inside the environment.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ErrorKind;
use crate::host::{Endowments, HostFunction, HostValue, OutputSink};
use crate::intrinsics::Intrinsics;
use crate::natives;
use crate::syntax::ast::*;
use crate::syntax::{parse_expression_source, parse_program};
use crate::value::{
    number_to_string, Binding, Callable, Heap, Object, ObjectId, ObjectKind, Property, ScopeId,
    Value,
};

pub(crate) const MAX_CALL_DEPTH: usize = 64;
pub(crate) const MAX_EVAL_DEPTH: usize = 320;
pub(crate) const MAX_ARRAY_LENGTH: usize = 1 << 24;
const MAX_EXPORT_DEPTH: usize = 64;
const MAX_PROTO_HOPS: usize = 1024;
const STACK_EXHAUSTED: &str = "Maximum call stack size exceeded";

/// A value thrown by confined code, unwinding toward the nearest `catch`.
#[derive(Debug, Clone)]
pub(crate) struct Thrown(pub Value);

pub(crate) type Completion<T> = Result<T, Thrown>;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Per-environment facts every evaluation shares.
pub(crate) struct RealmContext {
    pub global: ObjectId,
    pub intrinsics: Intrinsics,
    /// Error values carry a `stack` string only while this is set.
    pub capture_stacks: bool,
    pub output: Arc<dyn OutputSink>,
}

/// Legacy pattern-match state, scoped to one evaluation.
#[derive(Debug, Default)]
pub(crate) struct PatternState {
    pub input: String,
    pub last_match: String,
    pub groups: Vec<String>,
}

enum OwnLookup {
    Value(Value),
    Getter(ObjectId),
    Missing,
}

enum WriteOutcome {
    Done,
    GetterOnly,
    InvalidLength,
}

pub(crate) struct Interpreter<'a> {
    pub(crate) heap: &'a mut Heap,
    ctx: &'a RealmContext,
    depth: usize,
    frames: Vec<Arc<str>>,
    completion: Value,
    joining: Vec<ObjectId>,
    pub(crate) pattern: PatternState,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(heap: &'a mut Heap, ctx: &'a RealmContext) -> Self {
        Self {
            heap,
            ctx,
            depth: 0,
            frames: Vec::new(),
            completion: Value::Undefined,
            joining: Vec::new(),
            pattern: PatternState::default(),
        }
    }

    pub(crate) fn context(&self) -> &RealmContext {
        self.ctx
    }

    pub(crate) fn intrinsics(&self) -> Intrinsics {
        self.ctx.intrinsics
    }

    // ── entry points ───────────────────────────────────────────

    /// A root scope holding one evaluation's endowments.
    pub(crate) fn endowment_scope(&mut self, endowments: &Endowments) -> ScopeId {
        let scope = self.heap.alloc_scope(None);
        for (name, value) in endowments.iter() {
            let value = self.import(value);
            self.bind(scope, name, value, true);
        }
        scope
    }

    /// A root scope whose bindings are the own data properties of `source`.
    pub(crate) fn scope_from_object(&mut self, source: &Value) -> ScopeId {
        let scope = self.heap.alloc_scope(None);
        if let Value::Object(id) = source {
            let entries: Vec<(String, Value)> = self
                .heap
                .object(*id)
                .properties
                .iter()
                .filter_map(|(k, p)| match p {
                    Property::Data(v) => Some((k.clone(), v.clone())),
                    Property::Accessor { .. } => None,
                })
                .collect();
            for (name, value) in entries {
                self.bind(scope, &name, value, true);
            }
        }
        scope
    }

    pub(crate) fn bind(&mut self, scope: ScopeId, name: &str, value: Value, mutable: bool) {
        if let Some(s) = self.heap.scope_mut(scope) {
            s.bindings
                .insert(name.to_string(), Binding { value, mutable });
        }
    }

    /// Parse and run `code` under `root`. Parse failures throw `SyntaxError`.
    pub(crate) fn evaluate_source(
        &mut self,
        code: &str,
        root: ScopeId,
        expression: bool,
    ) -> Completion<Value> {
        if expression {
            let expr = match parse_expression_source(code) {
                Ok(expr) => expr,
                Err(err) => return Err(self.error(ErrorKind::SyntaxError, err.to_string())),
            };
            let scope = self.heap.alloc_scope(Some(root));
            self.eval(&expr, scope)
        } else {
            let program = match parse_program(code) {
                Ok(program) => program,
                Err(err) => return Err(self.error(ErrorKind::SyntaxError, err.to_string())),
            };
            self.run_program(&program, root)
        }
    }

    /// Run a program; its value is that of the last expression statement.
    pub(crate) fn run_program(&mut self, program: &Program, root: ScopeId) -> Completion<Value> {
        let saved = std::mem::replace(&mut self.completion, Value::Undefined);
        let scope = self.heap.alloc_scope(Some(root));
        let result = self.exec_block_in(&program.body, scope);
        let completion = std::mem::replace(&mut self.completion, saved);
        result.map(|_| completion)
    }

    // ── errors ─────────────────────────────────────────────────

    pub(crate) fn error(&mut self, kind: ErrorKind, message: impl Into<String>) -> Thrown {
        Thrown(Value::Object(self.make_error(kind, Some(message.into()))))
    }

    pub(crate) fn type_error(&mut self, message: impl Into<String>) -> Thrown {
        self.error(ErrorKind::TypeError, message)
    }

    pub(crate) fn range_error(&mut self, message: impl Into<String>) -> Thrown {
        self.error(ErrorKind::RangeError, message)
    }

    /// Allocate an error object of `kind`, with a `stack` when capture is on.
    pub(crate) fn make_error(&mut self, kind: ErrorKind, message: Option<String>) -> ObjectId {
        let proto = self.ctx.intrinsics.error_prototypes[kind.index()];
        let mut object = Object::new(Some(proto), ObjectKind::Error);
        if let Some(message) = &message {
            object
                .properties
                .insert("message".to_string(), Property::Data(Value::str(message)));
        }
        if self.ctx.capture_stacks {
            let trace = self.stack_trace(kind.name(), message.as_deref().unwrap_or(""));
            object
                .properties
                .insert("stack".to_string(), Property::Data(Value::str(&trace)));
        }
        self.heap.alloc(object)
    }

    /// Trace text for the current confined call stack.
    pub(crate) fn stack_trace(&self, name: &str, message: &str) -> String {
        let mut out = if message.is_empty() {
            name.to_string()
        } else {
            format!("{}: {}", name, message)
        };
        for frame in self.frames.iter().rev() {
            out.push_str("\n    at ");
            out.push_str(if frame.is_empty() { "<anonymous>" } else { frame });
        }
        out.push_str("\n    at <program>");
        out
    }

    fn enter(&mut self) -> Completion<()> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(self.range_error(STACK_EXHAUSTED));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ── statements ─────────────────────────────────────────────

    fn exec_block_in(&mut self, body: &[Stmt], scope: ScopeId) -> Completion<Flow> {
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                let name: Arc<str> = Arc::from(def.name.as_deref().unwrap_or(""));
                let closure = self.make_closure(def, scope, name.clone());
                self.declare(scope, &name, Value::Object(closure), true)?;
            }
        }
        for stmt in body {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    /// Run a nested block, giving it a scope only if it declares anything.
    fn exec_block(&mut self, body: &[Stmt], scope: ScopeId) -> Completion<Flow> {
        let declares = body
            .iter()
            .any(|s| matches!(s, Stmt::Declare { .. } | Stmt::Function(_)));
        let scope = if declares {
            self.heap.alloc_scope(Some(scope))
        } else {
            scope
        };
        self.exec_block_in(body, scope)
    }

    fn exec(&mut self, stmt: &Stmt, scope: ScopeId) -> Completion<Flow> {
        self.enter()?;
        let flow = self.exec_inner(stmt, scope);
        self.leave();
        flow
    }

    fn exec_inner(&mut self, stmt: &Stmt, scope: ScopeId) -> Completion<Flow> {
        match stmt {
            Stmt::Declare { kind, name, init } => {
                let value = match init {
                    Some(expr) => self.eval_named(expr, scope, name)?,
                    None => Value::Undefined,
                };
                self.declare(scope, name, value, *kind == DeclKind::Let)?;
                Ok(Flow::Normal)
            }
            // Hoisted by the enclosing block.
            Stmt::Function(_) => Ok(Flow::Normal),
            Stmt::Expr(expr) => {
                self.completion = self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, scope)?.truthy() {
                    self.exec(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, scope)?.truthy() {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(body) => self.exec_block(body, scope),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(Thrown(value))
            }
            Stmt::Try {
                body,
                param,
                handler,
                finalizer,
            } => self.exec_try(body, param.as_deref(), handler.as_deref(), finalizer.as_deref(), scope),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        param: Option<&str>,
        handler: Option<&[Stmt]>,
        finalizer: Option<&[Stmt]>,
        scope: ScopeId,
    ) -> Completion<Flow> {
        let mut result = self.exec_block(body, scope);
        if let (Err(Thrown(thrown)), Some(handler)) = (&result, handler) {
            let thrown = thrown.clone();
            let catch_scope = self.heap.alloc_scope(Some(scope));
            if let Some(param) = param {
                self.bind(catch_scope, param, thrown, true);
            }
            result = self.exec_block_in(handler, catch_scope);
        }
        if let Some(finalizer) = finalizer {
            // An abrupt finalizer replaces the try/catch outcome.
            match self.exec_block(finalizer, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        result
    }

    // ── bindings ───────────────────────────────────────────────

    fn declare(&mut self, scope: ScopeId, name: &str, value: Value, mutable: bool) -> Completion<()> {
        let exists = match self.heap.scope_mut(scope) {
            Some(s) => s.bindings.contains_key(name),
            None => return Err(self.type_error("cannot declare in a sealed scope")),
        };
        if exists {
            return Err(self.error(
                ErrorKind::SyntaxError,
                format!("Identifier '{}' has already been declared", name),
            ));
        }
        self.bind(scope, name, value, mutable);
        Ok(())
    }

    fn find_binding(&self, scope: ScopeId, name: &str) -> Option<Value> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.heap.scope(id);
            if let Some(binding) = s.bindings.get(name) {
                return Some(binding.value.clone());
            }
            current = s.parent;
        }
        None
    }

    fn is_resolvable(&self, scope: ScopeId, name: &str) -> bool {
        self.find_binding(scope, name).is_some() || self.has_own(self.ctx.global, name)
    }

    fn lookup(&mut self, scope: ScopeId, name: &str) -> Completion<Value> {
        if let Some(value) = self.find_binding(scope, name) {
            return Ok(value);
        }
        let global = self.ctx.global;
        if self.has_own(global, name) {
            return self.get(&Value::Object(global), name);
        }
        Err(self.error(ErrorKind::ReferenceError, format!("{} is not defined", name)))
    }

    fn assign_binding(&mut self, scope: ScopeId, name: &str, value: Value) -> Completion<()> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let (mutable, parent) = {
                let s = self.heap.scope(id);
                (s.bindings.get(name).map(|b| b.mutable), s.parent)
            };
            match mutable {
                Some(false) => return Err(self.type_error("Assignment to constant variable.")),
                Some(true) => {
                    return match self.heap.scope_mut(id).and_then(|s| s.bindings.get_mut(name)) {
                        Some(binding) => {
                            binding.value = value;
                            Ok(())
                        }
                        None => Err(self.type_error(format!(
                            "Cannot assign to '{}': binding is sealed",
                            name
                        ))),
                    };
                }
                None => current = parent,
            }
        }
        let global = self.ctx.global;
        if self.has_own(global, name) {
            return self.set(&Value::Object(global), name, value);
        }
        Err(self.error(ErrorKind::ReferenceError, format!("{} is not defined", name)))
    }

    // ── expressions ────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr, scope: ScopeId) -> Completion<Value> {
        self.enter()?;
        let value = self.eval_inner(expr, scope);
        self.leave();
        value
    }

    /// Evaluate, naming an anonymous function after the binding it lands in.
    fn eval_named(&mut self, expr: &Expr, scope: ScopeId, name: &str) -> Completion<Value> {
        match expr {
            Expr::Function(def) if def.name.is_none() => {
                Ok(Value::Object(self.make_closure(def, scope, Arc::from(name))))
            }
            _ => self.eval(expr, scope),
        }
    }

    /// Operator chains are left-deep; walk the spine iteratively so chain
    /// length never counts against evaluation depth.
    fn eval_chain(&mut self, expr: &Expr, scope: ScopeId) -> Completion<Value> {
        let mut spine = Vec::new();
        let mut leftmost = expr;
        while let Expr::Binary(_, left, _) | Expr::Logical(_, left, _) = leftmost {
            spine.push(leftmost);
            leftmost = &**left;
        }
        let mut acc = self.eval(leftmost, scope)?;
        for node in spine.into_iter().rev() {
            acc = match node {
                Expr::Binary(op, _, right) => {
                    let right = self.eval(right, scope)?;
                    self.binary(*op, acc, right)?
                }
                Expr::Logical(op, _, right) => match (op, acc.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => acc,
                    _ => self.eval(right, scope)?,
                },
                _ => acc,
            };
        }
        Ok(acc)
    }

    fn eval_inner(&mut self, expr: &Expr, scope: ScopeId) -> Completion<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::str(s)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::This => Ok(self.find_binding(scope, "this").unwrap_or(Value::Undefined)),
            Expr::Ident(name) => self.lookup(scope, name),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(self.alloc_array(values))
            }
            Expr::Object(props) => self.eval_object(props, scope),
            Expr::Function(def) => Ok(Value::Object(self.function_expression(def, scope))),
            Expr::Unary(op, operand) => {
                if *op == UnaryOp::Typeof {
                    if let Expr::Ident(name) = operand.as_ref() {
                        if !self.is_resolvable(scope, name) {
                            return Ok(Value::str("undefined"));
                        }
                    }
                }
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-self.to_number(&value)?),
                    UnaryOp::Plus => Value::Number(self.to_number(&value)?),
                    UnaryOp::Typeof => Value::str(self.type_of(&value)),
                })
            }
            Expr::Delete(target) => {
                let (base, key) = self.eval_reference(target, scope)?;
                self.delete_property(&base, &key).map(Value::Bool)
            }
            Expr::Binary(..) | Expr::Logical(..) => self.eval_chain(expr, scope),
            Expr::Conditional(cond, then, otherwise) => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign(op, target, value) => self.eval_assign(*op, target, value, scope),
            Expr::Member(object, key) => {
                let base = self.eval(object, scope)?;
                self.get(&base, key)
            }
            Expr::Index(object, index) => {
                let base = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                let key = self.to_property_key(&index)?;
                self.get(&base, &key)
            }
            Expr::Call(callee, args) => self.eval_call(callee, args, scope),
            Expr::New(callee, args) => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                if !self.is_constructor(&constructor) {
                    return Err(self.type_error(format!(
                        "{} is not a constructor",
                        describe(callee)
                    )));
                }
                self.construct(&constructor, args)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: ScopeId) -> Completion<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }
        Ok(values)
    }

    /// Base object and key of a member or index expression.
    fn eval_reference(&mut self, target: &Expr, scope: ScopeId) -> Completion<(Value, String)> {
        match target {
            Expr::Member(object, key) => Ok((self.eval(object, scope)?, key.clone())),
            Expr::Index(object, index) => {
                let base = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                Ok((base, self.to_property_key(&index)?))
            }
            _ => Err(self.error(ErrorKind::SyntaxError, "invalid reference")),
        }
    }

    fn eval_object(&mut self, props: &[PropDef], scope: ScopeId) -> Completion<Value> {
        let proto = self.ctx.intrinsics.object_prototype;
        let id = self.heap.alloc(Object::ordinary(Some(proto)));
        for prop in props {
            let (key, property) = match prop {
                PropDef::Init(key, expr) => {
                    (key, Property::Data(self.eval_named(expr, scope, key)?))
                }
                PropDef::Getter(key, def) => {
                    let getter = self.make_closure(def, scope, Arc::from(key.as_str()));
                    (key, Property::Accessor { get: Some(getter) })
                }
            };
            if let Some(object) = self.heap.object_mut(id) {
                object.properties.insert(key.clone(), property);
            }
        }
        Ok(Value::Object(id))
    }

    fn eval_assign(
        &mut self,
        op: AssignOp,
        target: &Expr,
        value: &Expr,
        scope: ScopeId,
    ) -> Completion<Value> {
        if let Expr::Ident(name) = target {
            let value = match op {
                AssignOp::Assign => self.eval_named(value, scope, name)?,
                _ => {
                    let current = self.lookup(scope, name)?;
                    let rhs = self.eval(value, scope)?;
                    self.compound(op, current, rhs)?
                }
            };
            self.assign_binding(scope, name, value.clone())?;
            return Ok(value);
        }

        let (base, key) = self.eval_reference(target, scope)?;
        let value = match op {
            AssignOp::Assign => self.eval_named(value, scope, &key)?,
            _ => {
                let current = self.get(&base, &key)?;
                let rhs = self.eval(value, scope)?;
                self.compound(op, current, rhs)?
            }
        };
        self.set(&base, &key, value.clone())?;
        Ok(value)
    }

    fn compound(&mut self, op: AssignOp, current: Value, rhs: Value) -> Completion<Value> {
        match op {
            AssignOp::AddAssign => self.add(current, rhs),
            AssignOp::SubAssign => {
                Ok(Value::Number(self.to_number(&current)? - self.to_number(&rhs)?))
            }
            AssignOp::Assign => Ok(rhs),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: ScopeId) -> Completion<Value> {
        let (function, this) = match callee {
            Expr::Member(..) | Expr::Index(..) => {
                let (base, key) = self.eval_reference(callee, scope)?;
                (self.get(&base, &key)?, base)
            }
            _ => (self.eval(callee, scope)?, Value::Undefined),
        };
        let args = self.eval_args(args, scope)?;
        if !self.is_callable(&function) {
            return Err(self.type_error(format!("{} is not a function", describe(callee))));
        }
        self.call(&function, this, args)
    }

    // ── functions ──────────────────────────────────────────────

    fn make_closure(&mut self, def: &Arc<FunctionDef>, scope: ScopeId, name: Arc<str>) -> ObjectId {
        let proto = self.ctx.intrinsics.function_prototype;
        self.heap.alloc(Object::new(
            Some(proto),
            ObjectKind::Function(Callable::Closure {
                def: def.clone(),
                scope,
                name,
                arrow: def.arrow,
            }),
        ))
    }

    /// A function expression; a named one can refer to itself.
    fn function_expression(&mut self, def: &Arc<FunctionDef>, scope: ScopeId) -> ObjectId {
        match &def.name {
            Some(name) => {
                let own_scope = self.heap.alloc_scope(Some(scope));
                let closure = self.make_closure(def, own_scope, Arc::from(name.as_str()));
                self.bind(own_scope, name, Value::Object(closure), false);
                closure
            }
            None => self.make_closure(def, scope, Arc::from("")),
        }
    }

    pub(crate) fn is_callable(&self, value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|id| self.heap.object(id).callable().is_some())
    }

    fn is_constructor(&self, value: &Value) -> bool {
        let Some(id) = value.as_object() else {
            return false;
        };
        match self.heap.object(id).callable() {
            Some(Callable::Builtin(builtin)) => builtin.is_constructor(),
            Some(Callable::Closure { arrow, .. }) => !arrow,
            _ => false,
        }
    }

    /// Call any callable value.
    pub(crate) fn call(&mut self, function: &Value, this: Value, args: Vec<Value>) -> Completion<Value> {
        let callable = match function.as_object().and_then(|id| self.heap.object(id).callable()) {
            Some(callable) => callable.clone(),
            None => return Err(self.type_error("value is not a function")),
        };
        self.enter()?;
        let result = self.call_callable(callable, this, args, false);
        self.leave();
        result
    }

    fn call_callable(
        &mut self,
        callable: Callable,
        this: Value,
        args: Vec<Value>,
        constructing: bool,
    ) -> Completion<Value> {
        match callable {
            Callable::Builtin(builtin) => natives::call(self, builtin, this, &args, constructing),
            Callable::Closure {
                def, scope, name, ..
            } => {
                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err(self.range_error(STACK_EXHAUSTED));
                }
                self.frames.push(name);
                let result = self.call_closure(&def, scope, this, args);
                self.frames.pop();
                result
            }
            Callable::Host(function) => {
                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err(self.range_error(STACK_EXHAUSTED));
                }
                self.frames.push(Arc::from(function.name()));
                let result = self.call_host(&function, &args);
                self.frames.pop();
                result
            }
        }
    }

    fn call_closure(
        &mut self,
        def: &Arc<FunctionDef>,
        captured: ScopeId,
        this: Value,
        args: Vec<Value>,
    ) -> Completion<Value> {
        let scope = self.heap.alloc_scope(Some(captured));
        if !def.arrow {
            self.bind(scope, "this", this, false);
        }
        let mut args = args.into_iter();
        for param in &def.params {
            let value = args.next().unwrap_or(Value::Undefined);
            self.bind(scope, param, value, true);
        }
        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, scope),
            FunctionBody::Block(body) => {
                let saved = self.completion.clone();
                let flow = self.exec_block_in(body, scope);
                self.completion = saved;
                match flow? {
                    Flow::Return(value) => Ok(value),
                    _ => Ok(Value::Undefined),
                }
            }
        }
    }

    fn call_host(&mut self, function: &HostFunction, args: &[Value]) -> Completion<Value> {
        let host_args: Vec<HostValue> = args.iter().map(|arg| self.export(arg)).collect();
        match function.invoke(&host_args) {
            Ok(result) => Ok(self.import(&result)),
            Err(message) => Err(self.error(ErrorKind::Error, message)),
        }
    }

    /// `new F(...)`.
    pub(crate) fn construct(&mut self, constructor: &Value, args: Vec<Value>) -> Completion<Value> {
        let callable = match constructor.as_object().and_then(|id| self.heap.object(id).callable()) {
            Some(callable) => callable.clone(),
            None => return Err(self.type_error("value is not a constructor")),
        };
        match callable {
            Callable::Builtin(builtin) if builtin.is_constructor() => {
                self.enter()?;
                let result = natives::call(self, builtin, Value::Undefined, &args, true);
                self.leave();
                result
            }
            Callable::Closure { arrow: false, .. } => {
                let proto = match self.get(constructor, "prototype")? {
                    Value::Object(proto) => proto,
                    _ => self.ctx.intrinsics.object_prototype,
                };
                let instance = Value::Object(self.heap.alloc(Object::ordinary(Some(proto))));
                self.enter()?;
                let result = self.call_callable(callable, instance.clone(), args, true);
                self.leave();
                match result? {
                    Value::Object(id) => Ok(Value::Object(id)),
                    _ => Ok(instance),
                }
            }
            _ => Err(self.type_error("value is not a constructor")),
        }
    }

    // ── properties ─────────────────────────────────────────────

    fn own_lookup(&self, id: ObjectId, key: &str) -> OwnLookup {
        let object = self.heap.object(id);
        if let Some(property) = object.properties.get(key) {
            return match property {
                Property::Data(value) => OwnLookup::Value(value.clone()),
                Property::Accessor { get: Some(getter) } => OwnLookup::Getter(*getter),
                Property::Accessor { get: None } => OwnLookup::Value(Value::Undefined),
            };
        }
        match &object.kind {
            ObjectKind::Array(items) => {
                if key == "length" {
                    return OwnLookup::Value(Value::Number(items.len() as f64));
                }
                if let Some(item) = array_index(key).and_then(|i| items.get(i)) {
                    return OwnLookup::Value(item.clone());
                }
            }
            ObjectKind::Function(callable) if key == "name" => {
                return OwnLookup::Value(Value::String(callable.name()));
            }
            ObjectKind::RegExp(slot) => match key {
                "source" => return OwnLookup::Value(Value::str(&slot.source)),
                "flags" => return OwnLookup::Value(Value::str(&slot.flags)),
                _ => {}
            },
            _ => {}
        }
        OwnLookup::Missing
    }

    pub(crate) fn has_own(&self, id: ObjectId, key: &str) -> bool {
        !matches!(self.own_lookup(id, key), OwnLookup::Missing)
    }

    /// Read `target[key]`, running getters with `target` as receiver.
    pub(crate) fn get(&mut self, target: &Value, key: &str) -> Completion<Value> {
        let id = match target {
            Value::Object(id) => *id,
            Value::Undefined | Value::Null => {
                let shown = if matches!(target, Value::Null) { "null" } else { "undefined" };
                return Err(self.type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    shown, key
                )));
            }
            Value::String(s) => return Ok(string_property(s, key)),
            Value::Bool(_) | Value::Number(_) => return Ok(Value::Undefined),
        };

        let mut current = Some(id);
        let mut hops = 0;
        while let Some(object) = current {
            match self.own_lookup(object, key) {
                OwnLookup::Value(value) => return Ok(value),
                OwnLookup::Getter(getter) => {
                    return self.call(&Value::Object(getter), target.clone(), Vec::new())
                }
                OwnLookup::Missing => {}
            }
            hops += 1;
            if hops > MAX_PROTO_HOPS {
                break;
            }
            current = self.heap.object(object).proto;
        }
        Ok(Value::Undefined)
    }

    fn writable_target(&mut self, target: &Value, key: &str, verb: &str) -> Completion<ObjectId> {
        match target {
            Value::Object(id) if self.heap.is_frozen(*id) => Err(self.type_error(format!(
                "Cannot {} property '{}' of a frozen object",
                verb, key
            ))),
            Value::Object(id) => Ok(*id),
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot {} properties of {} ('{}')",
                verb,
                if matches!(target, Value::Null) { "null" } else { "undefined" },
                key
            ))),
            _ => Err(self.type_error(format!(
                "Cannot {} property '{}' on a primitive",
                verb, key
            ))),
        }
    }

    /// Write `target[key] = value`. Frozen targets throw.
    pub(crate) fn set(&mut self, target: &Value, key: &str, value: Value) -> Completion<()> {
        let id = self.writable_target(target, key, "assign")?;
        let outcome = match self.heap.object_mut(id) {
            Some(object) => write_property(object, key, value),
            None => WriteOutcome::GetterOnly,
        };
        match outcome {
            WriteOutcome::Done => Ok(()),
            WriteOutcome::GetterOnly => Err(self.type_error(format!(
                "Cannot set property '{}' which has only a getter",
                key
            ))),
            WriteOutcome::InvalidLength => Err(self.range_error("Invalid array length")),
        }
    }

    /// Define an own property directly (no setter semantics).
    pub(crate) fn define(&mut self, target: &Value, key: &str, property: Property) -> Completion<()> {
        let id = self.writable_target(target, key, "define")?;
        let outcome = match (self.heap.object_mut(id), property) {
            (Some(object), Property::Data(value))
                if matches!(object.kind, ObjectKind::Array(_))
                    && (key == "length" || array_index(key).is_some()) =>
            {
                object.properties.remove(key);
                write_property(object, key, value)
            }
            (Some(object), property) => {
                object.properties.insert(key.to_string(), property);
                WriteOutcome::Done
            }
            (None, _) => WriteOutcome::GetterOnly,
        };
        match outcome {
            WriteOutcome::Done => Ok(()),
            WriteOutcome::InvalidLength => Err(self.range_error("Invalid array length")),
            WriteOutcome::GetterOnly => {
                Err(self.type_error(format!("Cannot define property '{}'", key)))
            }
        }
    }

    pub(crate) fn delete_property(&mut self, target: &Value, key: &str) -> Completion<bool> {
        if !matches!(target, Value::Object(_) | Value::Undefined | Value::Null) {
            return Ok(true);
        }
        let id = self.writable_target(target, key, "delete")?;
        let Some(object) = self.heap.object_mut(id) else {
            return Ok(false);
        };
        if object.properties.remove(key).is_some() {
            return Ok(true);
        }
        let length_key = match &mut object.kind {
            ObjectKind::Array(items) => {
                if key == "length" {
                    true
                } else {
                    if let Some(index) = array_index(key) {
                        if index + 1 == items.len() {
                            items.pop();
                        } else if let Some(slot) = items.get_mut(index) {
                            *slot = Value::Undefined;
                        }
                    }
                    false
                }
            }
            _ => false,
        };
        if length_key {
            return Err(self.type_error("Cannot delete property 'length' of an array"));
        }
        Ok(true)
    }

    /// Own property names: array indices first, then named properties.
    pub(crate) fn own_keys(&self, id: ObjectId) -> Vec<String> {
        let object = self.heap.object(id);
        let mut keys = Vec::new();
        if let ObjectKind::Array(items) = &object.kind {
            keys.extend((0..items.len()).map(|i| i.to_string()));
        }
        keys.extend(object.properties.keys().cloned());
        keys
    }

    pub(crate) fn alloc_array(&mut self, items: Vec<Value>) -> Value {
        let proto = self.ctx.intrinsics.array_prototype;
        Value::Object(self.heap.alloc(Object::new(Some(proto), ObjectKind::Array(items))))
    }

    pub(crate) fn alloc_object(&mut self) -> ObjectId {
        let proto = self.ctx.intrinsics.object_prototype;
        self.heap.alloc(Object::ordinary(Some(proto)))
    }

    /// Freeze `root` and every local object reachable from it.
    pub(crate) fn harden(&mut self, root: &Value) {
        let Some(start) = root.as_object() else {
            return;
        };
        let mut pending = vec![start];
        while let Some(id) = pending.pop() {
            let Some(object) = self.heap.object_mut(id) else {
                continue;
            };
            if object.frozen {
                continue;
            }
            object.frozen = true;
            pending.extend(object.referenced_objects());
            pending.extend(object.proto);
        }
    }

    // ── conversions and operators ──────────────────────────────

    pub(crate) fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) if self.is_callable(value) => "function",
            Value::Object(_) => "object",
        }
    }

    /// String coercion; objects go through their own `toString`.
    pub(crate) fn to_string(&mut self, value: &Value) -> Completion<String> {
        match value {
            Value::Undefined => Ok("undefined".to_string()),
            Value::Null => Ok("null".to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(number_to_string(*n)),
            Value::String(s) => Ok(s.to_string()),
            Value::Object(_) => {
                let method = self.get(value, "toString")?;
                if !self.is_callable(&method) {
                    return Err(self.type_error("Cannot convert object to primitive value"));
                }
                match self.call(&method, value.clone(), Vec::new())? {
                    Value::Object(_) => {
                        Err(self.type_error("Cannot convert object to primitive value"))
                    }
                    primitive => self.to_string(&primitive),
                }
            }
        }
    }

    pub(crate) fn to_number(&mut self, value: &Value) -> Completion<f64> {
        Ok(match value {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Object(_) => {
                let text = self.to_string(value)?;
                parse_number(&text)
            }
        })
    }

    pub(crate) fn to_property_key(&mut self, value: &Value) -> Completion<String> {
        match value {
            Value::String(s) => Ok(s.to_string()),
            Value::Number(n) => Ok(number_to_string(*n)),
            other => self.to_string(other),
        }
    }

    fn to_primitive(&mut self, value: Value) -> Completion<Value> {
        match value {
            Value::Object(_) => Ok(Value::str(&self.to_string(&value)?)),
            primitive => Ok(primitive),
        }
    }

    fn add(&mut self, left: Value, right: Value) -> Completion<Value> {
        let left = self.to_primitive(left)?;
        let right = self.to_primitive(right)?;
        if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
            let mut text = self.to_string(&left)?;
            text.push_str(&self.to_string(&right)?);
            return Ok(Value::str(&text));
        }
        Ok(Value::Number(self.to_number(&left)? + self.to_number(&right)?))
    }

    fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Completion<Value> {
        use std::cmp::Ordering::{Equal, Greater, Less};
        let value = match op {
            BinaryOp::Add => return self.add(left, right),
            BinaryOp::Sub => Value::Number(self.to_number(&left)? - self.to_number(&right)?),
            BinaryOp::Mul => Value::Number(self.to_number(&left)? * self.to_number(&right)?),
            BinaryOp::Div => Value::Number(self.to_number(&left)? / self.to_number(&right)?),
            BinaryOp::Rem => Value::Number(self.to_number(&left)? % self.to_number(&right)?),
            BinaryOp::StrictEq => Value::Bool(strict_equals(&left, &right)),
            BinaryOp::StrictNotEq => Value::Bool(!strict_equals(&left, &right)),
            BinaryOp::Eq => Value::Bool(self.loose_equals(left, right)?),
            BinaryOp::NotEq => Value::Bool(!self.loose_equals(left, right)?),
            BinaryOp::Lt => Value::Bool(matches!(self.compare(left, right)?, Some(Less))),
            BinaryOp::Gt => Value::Bool(matches!(self.compare(left, right)?, Some(Greater))),
            BinaryOp::Le => Value::Bool(matches!(self.compare(left, right)?, Some(Less | Equal))),
            BinaryOp::Ge => {
                Value::Bool(matches!(self.compare(left, right)?, Some(Greater | Equal)))
            }
            BinaryOp::InstanceOf => Value::Bool(self.instance_of(&left, &right)?),
        };
        Ok(value)
    }

    fn compare(&mut self, left: Value, right: Value) -> Completion<Option<std::cmp::Ordering>> {
        let left = self.to_primitive(left)?;
        let right = self.to_primitive(right)?;
        if let (Value::String(a), Value::String(b)) = (&left, &right) {
            return Ok(Some(a.cmp(b)));
        }
        let a = self.to_number(&left)?;
        let b = self.to_number(&right)?;
        Ok(a.partial_cmp(&b))
    }

    fn loose_equals(&mut self, left: Value, right: Value) -> Completion<bool> {
        let mut pair = (left, right);
        // Each step removes one coercion case, so this settles quickly.
        for _ in 0..4 {
            pair = match pair {
                (a, b) if std::mem::discriminant(&a) == std::mem::discriminant(&b) => {
                    return Ok(strict_equals(&a, &b))
                }
                (a, b) if a.is_nullish() || b.is_nullish() => {
                    return Ok(a.is_nullish() && b.is_nullish())
                }
                (Value::Number(n), s @ Value::String(_)) => {
                    let m = self.to_number(&s)?;
                    return Ok(n == m);
                }
                (s @ Value::String(_), Value::Number(n)) => {
                    let m = self.to_number(&s)?;
                    return Ok(n == m);
                }
                (b @ Value::Bool(_), other) => (Value::Number(self.to_number(&b)?), other),
                (other, b @ Value::Bool(_)) => (other, Value::Number(self.to_number(&b)?)),
                (o @ Value::Object(_), other) => (self.to_primitive(o)?, other),
                (other, o @ Value::Object(_)) => (other, self.to_primitive(o)?),
                _ => return Ok(false),
            };
        }
        Ok(false)
    }

    fn instance_of(&mut self, value: &Value, constructor: &Value) -> Completion<bool> {
        if !self.is_callable(constructor) {
            return Err(self.type_error("Right-hand side of 'instanceof' is not callable"));
        }
        let Value::Object(proto) = self.get(constructor, "prototype")? else {
            return Ok(false);
        };
        let Some(mut current) = value.as_object().and_then(|id| self.heap.object(id).proto) else {
            return Ok(false);
        };
        for _ in 0..MAX_PROTO_HOPS {
            if current == proto {
                return Ok(true);
            }
            match self.heap.object(current).proto {
                Some(next) => current = next,
                None => return Ok(false),
            }
        }
        Ok(false)
    }

    /// Guard for `Array.prototype.join` on self-referencing arrays.
    pub(crate) fn begin_join(&mut self, id: ObjectId) -> bool {
        if self.joining.contains(&id) {
            return false;
        }
        self.joining.push(id);
        true
    }

    pub(crate) fn end_join(&mut self) {
        self.joining.pop();
    }

    // ── host boundary ──────────────────────────────────────────

    /// Snapshot a confined value as host data. Cycles are cut to
    /// `undefined`; confined functions become opaque markers.
    pub(crate) fn export(&self, value: &Value) -> HostValue {
        self.export_inner(value, &mut Vec::new())
    }

    fn export_inner(&self, value: &Value, path: &mut Vec<ObjectId>) -> HostValue {
        let id = match value {
            Value::Undefined => return HostValue::Undefined,
            Value::Null => return HostValue::Null,
            Value::Bool(b) => return HostValue::Bool(*b),
            Value::Number(n) => return HostValue::Number(*n),
            Value::String(s) => return HostValue::String(s.to_string()),
            Value::Object(id) => *id,
        };
        if path.contains(&id) || path.len() >= MAX_EXPORT_DEPTH {
            return HostValue::Undefined;
        }
        let object = self.heap.object(id);
        if let ObjectKind::Function(callable) = &object.kind {
            return HostValue::Function(match callable {
                Callable::Host(function) => function.clone(),
                other => HostFunction::opaque(other.name()),
            });
        }
        path.push(id);
        let exported = match &object.kind {
            ObjectKind::Array(items) => HostValue::Array(
                items
                    .iter()
                    .map(|item| self.export_inner(item, path))
                    .collect(),
            ),
            _ => HostValue::Object(
                object
                    .properties
                    .iter()
                    .filter_map(|(key, property)| match property {
                        Property::Data(value) => Some((key.clone(), self.export_inner(value, path))),
                        Property::Accessor { .. } => None,
                    })
                    .collect::<BTreeMap<_, _>>(),
            ),
        };
        path.pop();
        exported
    }

    /// Copy host data into fresh confined objects.
    pub(crate) fn import(&mut self, value: &HostValue) -> Value {
        match value {
            HostValue::Undefined => Value::Undefined,
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(*b),
            HostValue::Number(n) => Value::Number(*n),
            HostValue::String(s) => Value::str(s),
            HostValue::Array(items) => {
                let values: Vec<Value> = items.iter().map(|item| self.import(item)).collect();
                self.alloc_array(values)
            }
            HostValue::Object(map) => {
                let id = self.alloc_object();
                for (key, item) in map {
                    let item = self.import(item);
                    if let Some(object) = self.heap.object_mut(id) {
                        object.properties.insert(key.clone(), Property::Data(item));
                    }
                }
                Value::Object(id)
            }
            HostValue::Function(function) => {
                let proto = self.ctx.intrinsics.function_prototype;
                Value::Object(self.heap.alloc(Object::new(
                    Some(proto),
                    ObjectKind::Function(Callable::Host(function.clone())),
                )))
            }
        }
    }
}

/// Canonical array index (`"0"`, `"17"`, not `"01"`).
pub(crate) fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

fn write_property(object: &mut Object, key: &str, value: Value) -> WriteOutcome {
    if matches!(object.properties.get(key), Some(Property::Accessor { .. })) {
        return WriteOutcome::GetterOnly;
    }
    if let ObjectKind::Array(items) = &mut object.kind {
        if key == "length" {
            let Value::Number(n) = value else {
                return WriteOutcome::InvalidLength;
            };
            if n < 0.0 || n.fract() != 0.0 || n > MAX_ARRAY_LENGTH as f64 {
                return WriteOutcome::InvalidLength;
            }
            items.resize(n as usize, Value::Undefined);
            return WriteOutcome::Done;
        }
        if let Some(index) = array_index(key) {
            if index >= MAX_ARRAY_LENGTH {
                return WriteOutcome::InvalidLength;
            }
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
            return WriteOutcome::Done;
        }
    }
    object
        .properties
        .insert(key.to_string(), Property::Data(value));
    WriteOutcome::Done
}

fn string_property(s: &str, key: &str) -> Value {
    if key == "length" {
        return Value::Number(s.chars().count() as f64);
    }
    match array_index(key).and_then(|i| s.chars().nth(i)) {
        Some(c) => Value::str(&c.to_string()),
        None => Value::Undefined,
    }
}

pub(crate) fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => a == b,
        _ => false,
    }
}

/// Numeric coercion of string text.
pub(crate) fn parse_number(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }
    match text {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    let numeric = text
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !numeric {
        return f64::NAN;
    }
    text.parse().unwrap_or(f64::NAN)
}

/// Source-ish rendering of a callee for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member(object, key) => format!("{}.{}", describe(object), key),
        Expr::Index(object, _) => format!("{}[...]", describe(object)),
        Expr::This => "this".to_string(),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_indices_are_canonical() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("42"), Some(42));
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("1.5"), None);
        assert_eq!(array_index(""), None);
    }

    #[test]
    fn string_to_number_coercion() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("0x10"), 16.0);
        assert_eq!(parse_number("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("12px").is_nan());
    }

    #[test]
    fn strict_equality_rules() {
        assert!(!strict_equals(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
        assert!(strict_equals(&Value::str("a"), &Value::str("a")));
        assert!(!strict_equals(&Value::Null, &Value::Undefined));
    }

    #[test]
    fn writes_extend_arrays() {
        let mut array = Object::new(None, ObjectKind::Array(Vec::new()));
        assert!(matches!(
            write_property(&mut array, "2", Value::Bool(true)),
            WriteOutcome::Done
        ));
        match &array.kind {
            ObjectKind::Array(items) => assert_eq!(items.len(), 3),
            _ => unreachable!(),
        }
        assert!(matches!(
            write_property(&mut array, "length", Value::Number(-1.0)),
            WriteOutcome::InvalidLength
        ));
    }
}
