//! Tree-walking evaluator for checked scripts.
//!
//! One [`Interp`] runs one script against one [`Context`]. Names resolve
//! through the current function frame (and the frames it closes over), then
//! the context's variables, then the built-in namespace bound to the
//! context. Every statement, loop iteration and call is charged to the
//! run's [`Budget`].

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::{
    BinOp, BoolOp, ClassDef, CmpOp, Comprehension, Constant, Expr, ExprKind, FunctionBody,
    FunctionDef, Module, Stmt, StmtKind, Target, UnaryOp,
};
use crate::budget::{Budget, Limits};
use crate::builtins::{self, BuiltinFn};
use crate::checker;
use crate::error::SafeError;
use crate::exception::{ExcKind, ExceptionObj, Unwind};
use crate::format;
use crate::methods::{self, clamp_range, resolve_index};
use crate::modules;
use crate::namespace::{Binding, Context, Namespace};
use crate::parser;
use crate::policy::CheckPolicy;
use crate::value::{
    exception_message, write_repr, BoundMethod, Class, DictMap, Function, Globals, Instance,
    NativeMethod, SetMap, TypeKind, Value, XRange,
};

type EvalResult = Result<Value, Unwind>;
type Kwargs = Vec<(String, Value)>;

/// Local variables of one function call or class body.
pub struct Frame {
    vars: RefCell<IndexMap<String, Value>>,
    /// Enclosing function frame, for closures.
    parent: Option<Rc<Frame>>,
    is_class: bool,
    /// Names declared `global` in this frame.
    global_names: RefCell<Vec<String>>,
}

impl Frame {
    fn new(parent: Option<Rc<Frame>>, is_class: bool) -> Self {
        Self {
            vars: RefCell::new(IndexMap::new()),
            parent,
            is_class,
            global_names: RefCell::new(Vec::new()),
        }
    }

    fn is_global(&self, name: &str) -> bool {
        self.global_names.borrow().iter().any(|n| n == name)
    }
}

#[derive(Clone)]
enum Scope {
    Module,
    Local(Rc<Frame>),
}

/// How a block finished.
enum Ctl {
    Next,
    Return(Value),
    Break,
    Continue,
}

/// Lazily walks a value during `for` loops and conversions.
pub(crate) enum ValueIter {
    /// Reads the live list, so appends during the loop are seen.
    List {
        list: Rc<RefCell<Vec<Value>>>,
        index: usize,
    },
    Items(std::vec::IntoIter<Value>),
    Range { range: XRange, index: usize },
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                *index += 1;
                item
            }
            ValueIter::Items(items) => items.next(),
            ValueIter::Range { range, index } => {
                let item = range.get(*index).map(Value::Int);
                *index += 1;
                item
            }
        }
    }
}

/// Run `module` with `ctx` as the global scope.
///
/// `policy` is consulted again for source that the script hands to `eval`
/// or `exec`; unrestricted runs pass `None`.
pub(crate) fn run_module(
    ctx: &mut Context,
    module: &Module,
    limits: Limits,
    policy: Option<&CheckPolicy>,
) -> Result<(), SafeError> {
    let mut interp = Interp::new(ctx.builtins().clone(), ctx.globals(), limits, policy.cloned());
    let result = interp.exec_block(&module.body);
    ctx.push_output(&interp.out);
    tracing::debug!(
        steps = interp.budget.steps(),
        output_bytes = interp.out.len(),
        ok = result.is_ok(),
        "script run finished"
    );
    match result {
        Ok(_) => Ok(()),
        Err(unwind) => Err(interp.into_error(unwind)),
    }
}

pub(crate) struct Interp {
    pub(crate) budget: Budget,
    builtins: Arc<Namespace>,
    globals: Globals,
    scope: Scope,
    policy: Option<CheckPolicy>,
    out: String,
    softspace: bool,
    depth: usize,
    /// Exceptions currently being handled, innermost last.
    handling: Vec<Value>,
}

impl Interp {
    fn new(
        builtins: Arc<Namespace>,
        globals: Globals,
        limits: Limits,
        policy: Option<CheckPolicy>,
    ) -> Self {
        Self {
            budget: Budget::start(limits),
            builtins,
            globals,
            scope: Scope::Module,
            policy,
            out: String::new(),
            softspace: false,
            depth: 0,
            handling: Vec::new(),
        }
    }

    fn into_error(&mut self, unwind: Unwind) -> SafeError {
        match unwind {
            Unwind::Fatal(err) => *err,
            Unwind::Raise(exc) => {
                let kind = exception_kind_name(&exc.value);
                let message = self
                    .str_of(&exc.value)
                    .unwrap_or_else(|_| exc.value.str_basic());
                SafeError::Script {
                    kind,
                    message,
                    line: exc.line.unwrap_or(0),
                }
            }
        }
    }

    // --- names ---------------------------------------------------------------

    pub(crate) fn globals(&self) -> Globals {
        self.globals.clone()
    }

    /// Variables visible as `locals()` / `dir()`.
    pub(crate) fn locals_snapshot(&self) -> Vec<(String, Value)> {
        let map = match &self.scope {
            Scope::Module => self.globals.borrow().clone(),
            Scope::Local(frame) => frame.vars.borrow().clone(),
        };
        map.into_iter().collect()
    }

    /// The frame new functions close over.
    fn closure_frame(&self) -> Option<Rc<Frame>> {
        match &self.scope {
            Scope::Module => None,
            Scope::Local(frame) if frame.is_class => frame.parent.clone(),
            Scope::Local(frame) => Some(frame.clone()),
        }
    }

    fn builtin_value(&self, name: &str) -> Option<Value> {
        match self.builtins.lookup(name)? {
            Binding::Allowed(b) => Some(b.to_value()),
            Binding::Stubbed => Some(Value::str("")),
            Binding::Denied => Some(Value::Guard(Rc::from(name))),
        }
    }

    fn load_name(&self, name: &str) -> EvalResult {
        if let Scope::Local(frame) = &self.scope {
            if !frame.is_global(name) {
                let mut cur = Some(frame.clone());
                while let Some(f) = cur {
                    if let Some(v) = f.vars.borrow().get(name) {
                        return Ok(v.clone());
                    }
                    cur = f.parent.clone();
                }
            }
        }
        if let Some(v) = self.globals.borrow().get(name) {
            return Ok(v.clone());
        }
        self.builtin_value(name)
            .ok_or_else(|| self.name_error(name))
    }

    fn name_error(&self, name: &str) -> Unwind {
        let mut message = format!("name '{name}' is not defined");
        if let Some(hint) = self.suggest(name) {
            message.push_str(&format!(" (did you mean '{hint}'?)"));
        }
        Unwind::exc(ExcKind::NameError, message)
    }

    /// Closest visible name within edit distance 2.
    fn suggest(&self, name: &str) -> Option<String> {
        let mut candidates: Vec<String> = self.globals.borrow().keys().cloned().collect();
        if let Scope::Local(frame) = &self.scope {
            candidates.extend(frame.vars.borrow().keys().cloned());
        }
        candidates.extend(self.builtins.allowed_names().map(str::to_string));
        candidates
            .into_iter()
            .map(|c| (strsim::levenshtein(name, &c), c))
            .filter(|(d, _)| *d > 0 && *d <= 2)
            .min_by_key(|(d, _)| *d)
            .map(|(_, c)| c)
    }

    fn store_name(&mut self, name: &str, value: Value) {
        match &self.scope {
            Scope::Local(frame) if !frame.is_global(name) => {
                frame.vars.borrow_mut().insert(name.to_string(), value);
            }
            _ => {
                self.globals.borrow_mut().insert(name.to_string(), value);
            }
        }
    }

    fn delete_name(&mut self, name: &str) -> Result<(), Unwind> {
        let removed = match &self.scope {
            Scope::Local(frame) if !frame.is_global(name) => {
                frame.vars.borrow_mut().shift_remove(name)
            }
            _ => self.globals.borrow_mut().shift_remove(name),
        };
        removed
            .map(|_| ())
            .ok_or_else(|| Unwind::exc(ExcKind::NameError, format!("name '{name}' is not defined")))
    }

    // --- statements ----------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Ctl, Unwind> {
        for stmt in body {
            let ctl = self.exec_stmt(stmt).map_err(|u| u.at_line(stmt.line))?;
            if !matches!(ctl, Ctl::Next) {
                return Ok(ctl);
            }
        }
        Ok(Ctl::Next)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Ctl, Unwind> {
        self.budget.tick()?;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::Print { values, newline } => self.print(values, *newline)?,
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Ctl::Break),
            StmtKind::Continue => return Ok(Ctl::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                return Ok(Ctl::Return(value));
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(orelse) = orelse {
                    return self.exec_block(orelse);
                }
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    if !self.eval(test)?.truthy() {
                        if let Some(orelse) = orelse {
                            return self.exec_block(orelse);
                        }
                        break;
                    }
                    match self.exec_block(body)? {
                        Ctl::Break => break,
                        Ctl::Next | Ctl::Continue => self.budget.tick()?,
                        ret @ Ctl::Return(_) => return Ok(ret),
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let mut broke = false;
                for item in self.iterate(&iterable)? {
                    self.budget.tick()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Ctl::Break => {
                            broke = true;
                            break;
                        }
                        Ctl::Next | Ctl::Continue => {}
                        ret @ Ctl::Return(_) => return Ok(ret),
                    }
                }
                if !broke {
                    if let Some(orelse) = orelse {
                        return self.exec_block(orelse);
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                let decorators = def
                    .decorators
                    .iter()
                    .map(|d| self.eval(d))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut func = self.make_function(def)?;
                for decorator in decorators.iter().rev() {
                    func = self.call(decorator, vec![func], Vec::new())?;
                }
                self.store_name(&def.name, func);
            }
            StmtKind::ClassDef(def) => {
                let class = self.make_class(def)?;
                self.store_name(&def.name, class);
            }
            StmtKind::TryExcept {
                body,
                handlers,
                orelse,
            } => {
                let exc = match self.exec_block(body) {
                    Ok(Ctl::Next) => {
                        return match orelse {
                            Some(orelse) => self.exec_block(orelse),
                            None => Ok(Ctl::Next),
                        }
                    }
                    Ok(ctl) => return Ok(ctl),
                    Err(Unwind::Fatal(err)) => return Err(Unwind::Fatal(err)),
                    Err(Unwind::Raise(exc)) => exc,
                };
                for handler in handlers {
                    let matched = match &handler.typ {
                        None => true,
                        Some(typ) => {
                            let class = self.eval(typ)?;
                            builtins::is_instance(&exc.value, &class).unwrap_or(false)
                        }
                    };
                    if !matched {
                        continue;
                    }
                    if let Some(name) = &handler.name {
                        self.assign(name, exc.value.clone())?;
                    }
                    self.handling.push(exc.value.clone());
                    let result = self.exec_block(&handler.body);
                    self.handling.pop();
                    return result;
                }
                return Err(Unwind::Raise(exc));
            }
            StmtKind::TryFinally { body, finalbody } => {
                let result = self.exec_block(body);
                if matches!(result, Err(Unwind::Fatal(_))) {
                    return result;
                }
                return match self.exec_block(finalbody)? {
                    Ctl::Next => result,
                    ctl => Ok(ctl),
                };
            }
            StmtKind::Raise { exc, arg } => return Err(self.raise(exc.as_ref(), arg.as_ref())?),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let args = match msg {
                        Some(m) => vec![self.eval(m)?],
                        None => Vec::new(),
                    };
                    return Err(Unwind::raise(Value::Exception(Rc::new(ExceptionObj {
                        kind: ExcKind::AssertionError,
                        args,
                    }))));
                }
            }
            StmtKind::Delete(target) => self.delete(target)?,
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import(&alias.name)?;
                    self.store_name(alias.bound_name(), module);
                }
            }
            StmtKind::From { module, names } => {
                let m = self.import(module)?;
                for alias in names {
                    if alias.name == "*" {
                        if let Value::Module(obj) = &m {
                            for (k, v) in &obj.attrs {
                                self.store_name(k, v.clone());
                            }
                        }
                        continue;
                    }
                    let value = self.try_attr(&m, &alias.name)?.ok_or_else(|| {
                        Unwind::exc(
                            ExcKind::ImportError,
                            format!("cannot import name {}", alias.name),
                        )
                    })?;
                    self.store_name(alias.bound_name(), value);
                }
            }
            StmtKind::Global(names) => {
                if let Scope::Local(frame) = &self.scope {
                    frame.global_names.borrow_mut().extend(names.iter().cloned());
                }
            }
            StmtKind::Exec { code, globals } => self.exec_source(code, globals.as_ref())?,
        }
        Ok(Ctl::Next)
    }

    fn print(&mut self, values: &[Expr], newline: bool) -> Result<(), Unwind> {
        let mut line = String::new();
        for value in values {
            let value = self.eval(value)?;
            let text = self.str_of(&value)?;
            if self.softspace {
                line.push(' ');
            }
            self.softspace = !(matches!(value, Value::Str(_)) && text.ends_with('\n'));
            line.push_str(&text);
        }
        if newline {
            line.push('\n');
            self.softspace = false;
        }
        tracing::debug!(text = %line.trim_end_matches('\n'), "script print");
        self.out.push_str(&line);
        self.budget.check_len(self.out.len())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Result<(), Unwind> {
        match target {
            Target::Name { name, .. } => {
                let current = self.load_name(name)?;
                let rhs = self.eval(value)?;
                let result = self.inplace(op, &current, &rhs)?;
                self.store_name(name, result);
            }
            Target::Attribute { value: obj, attr, .. } => {
                let obj = self.eval(obj)?;
                let current = self.get_attr(&obj, attr)?;
                let rhs = self.eval(value)?;
                let result = self.inplace(op, &current, &rhs)?;
                self.set_attr(&obj, attr, result)?;
            }
            Target::Subscript { value: obj, index, .. } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let current = self.get_item(&obj, &index)?;
                let rhs = self.eval(value)?;
                let result = self.inplace(op, &current, &rhs)?;
                self.set_item(&obj, &index, result)?;
            }
            Target::Slice {
                value: obj,
                lower,
                upper,
                ..
            } => {
                let obj = self.eval(obj)?;
                let (lo, hi) = self.slice_bounds(lower.as_ref(), upper.as_ref())?;
                let current = self.get_slice(&obj, lo, hi)?;
                let rhs = self.eval(value)?;
                let result = self.inplace(op, &current, &rhs)?;
                self.set_slice(&obj, lo, hi, result)?;
            }
            Target::Tuple { .. } | Target::List { .. } => {
                return Err(Unwind::type_error(
                    "illegal expression for augmented assignment",
                ))
            }
        }
        Ok(())
    }

    /// `a op= b`: lists extend in place, everything else rebinds.
    fn inplace(&mut self, op: BinOp, current: &Value, rhs: &Value) -> EvalResult {
        if let (BinOp::Add, Value::List(list)) = (op, current) {
            let extra = self.collect(rhs)?;
            self.budget.check_len(list.borrow().len() + extra.len())?;
            list.borrow_mut().extend(extra);
            return Ok(current.clone());
        }
        self.binop(op, current, rhs)
    }

    fn raise(&mut self, exc: Option<&Expr>, arg: Option<&Expr>) -> Result<Unwind, Unwind> {
        let Some(exc) = exc else {
            return Ok(match self.handling.last() {
                Some(active) => Unwind::raise(active.clone()),
                None => Unwind::type_error(
                    "exceptions must be old-style classes or derived from BaseException, not NoneType",
                ),
            });
        };
        let value = self.eval(exc)?;
        let args = match arg {
            None => Vec::new(),
            Some(a) => match self.eval(a)? {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other],
            },
        };
        Ok(match &value {
            Value::ExcClass(kind) => Unwind::raise(Value::Exception(Rc::new(ExceptionObj {
                kind: *kind,
                args,
            }))),
            Value::Class(class) if class.exception_base().is_some() => {
                Unwind::raise(self.instantiate(class, args, Vec::new())?)
            }
            Value::Exception(_) => {
                if arg.is_some() {
                    return Err(Unwind::type_error(
                        "instance exception may not have a separate value",
                    ));
                }
                Unwind::raise(value.clone())
            }
            Value::Instance(inst) if inst.class.exception_base().is_some() => {
                Unwind::raise(value.clone())
            }
            other => Unwind::type_error(format!(
                "exceptions must be old-style classes or derived from BaseException, not {}",
                other.type_name()
            )),
        })
    }

    fn import(&mut self, name: &str) -> EvalResult {
        let import = self
            .builtin_value(BuiltinFn::Import.name())
            .ok_or_else(|| Unwind::exc(ExcKind::ImportError, "__import__ not found"))?;
        self.call(&import, vec![Value::str(name)], Vec::new())
    }

    /// Parse nested source, re-checking it when the run is restricted.
    fn parse_nested(&self, source: &str) -> Result<Module, Unwind> {
        let module = parser::parse_module(source)?;
        if let Some(policy) = &self.policy {
            checker::check_module(&module, policy)?;
        }
        Ok(module)
    }

    fn exec_source(&mut self, code: &Expr, globals: Option<&Expr>) -> Result<(), Unwind> {
        let code = self.eval(code)?;
        let Value::Str(source) = &code else {
            return Err(Unwind::type_error(
                "exec: arg 1 must be a string, file, or code object",
            ));
        };
        let module = self.parse_nested(source)?;
        let Some(globals) = globals else {
            return self.exec_block(&module.body).map(|_| ());
        };
        let Value::Dict(dict) = self.eval(globals)? else {
            return Err(Unwind::type_error("exec: arg 2 must be a dictionary or None"));
        };
        let vars: IndexMap<String, Value> = dict
            .borrow()
            .values()
            .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
            .collect();
        let fresh: Globals = Rc::new(RefCell::new(vars));
        let saved_globals = std::mem::replace(&mut self.globals, fresh.clone());
        let saved_scope = std::mem::replace(&mut self.scope, Scope::Module);
        let result = self.exec_block(&module.body);
        self.globals = saved_globals;
        self.scope = saved_scope;
        let mut dict = dict.borrow_mut();
        for (k, v) in fresh.borrow().iter() {
            let key = Value::str(k);
            dict.insert(key.hash_key()?, (key, v.clone()));
        }
        result.map(|_| ())
    }

    /// The `eval` built-in.
    pub(crate) fn eval_source(&mut self, source: &str) -> EvalResult {
        self.budget.tick()?;
        let expr = match &self.policy {
            Some(policy) => checker::check_expression(source, policy)?,
            None => parser::parse_expression(source)?,
        };
        self.eval(&expr)
    }

    // --- definitions ---------------------------------------------------------

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> EvalResult {
        let mut defaults = Vec::new();
        for param in &def.params.args {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default)?);
            }
        }
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            globals: self.globals.clone(),
            closure: self.closure_frame(),
        })))
    }

    fn make_class(&mut self, def: &ClassDef) -> EvalResult {
        let mut bases = Vec::with_capacity(def.bases.len());
        for base in &def.bases {
            let base = self.eval(base)?;
            match &base {
                Value::Class(_) | Value::ExcClass(_) | Value::Type(TypeKind::Object) => {
                    bases.push(base)
                }
                Value::Type(t) => {
                    return Err(Unwind::type_error(format!(
                        "cannot subclass built-in type '{}'",
                        t.name()
                    )))
                }
                other => {
                    return Err(Unwind::type_error(format!(
                        "class base must be a class, not {}",
                        other.type_name()
                    )))
                }
            }
        }
        let frame = Rc::new(Frame::new(self.closure_frame(), true));
        if let Some(doc) = &def.doc {
            frame.vars.borrow_mut().insert("__doc__".into(), Value::str(doc));
        }
        let saved = std::mem::replace(&mut self.scope, Scope::Local(frame.clone()));
        let result = self.exec_block(&def.body);
        self.scope = saved;
        result?;
        let attrs = frame.vars.take();
        Ok(Value::Class(Rc::new(Class {
            name: def.name.clone(),
            bases,
            attrs: RefCell::new(attrs),
        })))
    }

    // --- calls ---------------------------------------------------------------

    pub(crate) fn call(&mut self, func: &Value, args: Vec<Value>, kwargs: Kwargs) -> EvalResult {
        match func {
            Value::Function(f) => self.call_function(f, args, kwargs),
            Value::Method(m) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(m.receiver.clone());
                full.extend(args);
                self.call(&m.func, full, kwargs)
            }
            Value::NativeMethod(m) => methods::call(self, &m.receiver, m.name, args, kwargs),
            Value::Builtin(b) => builtins::call(self, *b, args, kwargs),
            Value::HostFn(h) => modules::call(*h, args, &kwargs),
            Value::Type(t) => builtins::construct(self, *t, args, kwargs),
            Value::ExcClass(kind) => {
                builtins::no_kwargs(kind.name(), &kwargs)?;
                Ok(Value::Exception(Rc::new(ExceptionObj { kind: *kind, args })))
            }
            Value::Class(class) => self.instantiate(class, args, kwargs),
            Value::Instance(inst) => match inst.class.lookup("__call__") {
                Some(method) => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(func.clone());
                    full.extend(args);
                    self.call(&method, full, kwargs)
                }
                None => Err(Unwind::exc(
                    ExcKind::AttributeError,
                    format!("{} instance has no __call__ method", inst.class.name),
                )),
            },
            Value::Guard(name) => Err(builtins::denied(name)),
            other => Err(Unwind::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, f: &Rc<Function>, args: Vec<Value>, kwargs: Kwargs) -> EvalResult {
        self.budget.tick()?;
        if self.depth >= self.budget.limits().max_call_depth {
            return Err(Unwind::exc(
                ExcKind::RuntimeError,
                "maximum recursion depth exceeded",
            ));
        }
        let frame = Rc::new(Frame::new(f.closure.clone(), false));
        bind_params(f, &frame, args, kwargs)?;

        let saved_scope = std::mem::replace(&mut self.scope, Scope::Local(frame));
        let saved_globals = std::mem::replace(&mut self.globals, f.globals.clone());
        self.depth += 1;
        let result = match &f.def.body {
            FunctionBody::Block(body) => self.exec_block(body).map(|ctl| match ctl {
                Ctl::Return(v) => v,
                _ => Value::None,
            }),
            FunctionBody::Expr(e) => self.eval(e),
        };
        self.depth -= 1;
        self.scope = saved_scope;
        self.globals = saved_globals;
        result
    }

    fn instantiate(&mut self, class: &Rc<Class>, args: Vec<Value>, kwargs: Kwargs) -> EvalResult {
        let inst = Rc::new(Instance {
            class: class.clone(),
            attrs: RefCell::new(IndexMap::new()),
        });
        let value = Value::Instance(inst.clone());
        let is_exception = class.exception_base().is_some();
        if is_exception {
            let message = match args.as_slice() {
                [single] => single.clone(),
                _ => Value::str(""),
            };
            let mut attrs = inst.attrs.borrow_mut();
            attrs.insert("args".into(), Value::tuple(args.clone()));
            attrs.insert("message".into(), message);
        }
        match class.lookup("__init__") {
            Some(init) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(value.clone());
                full.extend(args);
                let ret = self.call(&init, full, kwargs)?;
                if !ret.is_none() {
                    return Err(Unwind::type_error("__init__() should return None"));
                }
            }
            None if !is_exception && (!args.is_empty() || !kwargs.is_empty()) => {
                return Err(Unwind::type_error("this constructor takes no arguments"));
            }
            None => {}
        }
        Ok(value)
    }

    // --- string conversion -----------------------------------------------------

    pub(crate) fn str_of(&mut self, v: &Value) -> Result<String, Unwind> {
        match v {
            Value::Str(s) => Ok(s.to_string()),
            Value::Float(f) => Ok(format::float_str(*f)),
            Value::Exception(e) => {
                let args = e.args.clone();
                exception_message(&args, &mut |a| self.str_of(a))
            }
            Value::Instance(inst) => {
                if let Some(method) = inst.class.lookup("__str__") {
                    let r = self.call(&method, vec![v.clone()], Vec::new())?;
                    return expect_str("__str__", r);
                }
                if inst.class.exception_base().is_some()
                    && inst.class.lookup("__repr__").is_none()
                {
                    let args = self.collect(&self.attr_or_none(inst, "args"))?;
                    return exception_message(&args, &mut |a| self.str_of(a));
                }
                self.repr_of(v)
            }
            other => self.repr_of(other),
        }
    }

    pub(crate) fn repr_of(&mut self, v: &Value) -> Result<String, Unwind> {
        let mut out = String::new();
        let mut seen = Vec::new();
        let mut hook = |value: &Value| -> Option<Result<String, Unwind>> {
            let Value::Instance(inst) = value else {
                return None;
            };
            if let Some(method) = inst.class.lookup("__repr__") {
                return Some(
                    self.call(&method, vec![value.clone()], Vec::new())
                        .and_then(|r| expect_str("__repr__", r)),
                );
            }
            inst.class.exception_base()?;
            let args = match inst.attrs.borrow().get("args") {
                Some(Value::Tuple(items)) => items.to_vec(),
                _ => Vec::new(),
            };
            let mut text = Value::tuple(args).repr_basic();
            if text.ends_with(",)") {
                text.truncate(text.len() - 2);
                text.push(')');
            }
            Some(Ok(format!("{}{text}", inst.class.name)))
        };
        write_repr(v, &mut out, &mut hook, &mut seen)?;
        Ok(out)
    }

    fn attr_or_none(&self, inst: &Instance, name: &str) -> Value {
        inst.attrs.borrow().get(name).cloned().unwrap_or(Value::None)
    }

    // --- expressions -----------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> EvalResult {
        match &expr.kind {
            ExprKind::Const(c) => Ok(match c {
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Name(name) => self.load_name(name),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            ExprKind::List(items) => {
                let items = self.eval_all(items)?;
                self.budget.check_len(items.len())?;
                Ok(Value::list(items))
            }
            ExprKind::Dict(pairs) => {
                let mut map = DictMap::new();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    map.insert(key.hash_key()?, (key, value));
                }
                Ok(Value::dict(map))
            }
            ExprKind::ListComp { elt, generators } => {
                let mut out = Vec::new();
                self.comprehension(elt, generators, &mut out)?;
                Ok(Value::list(out))
            }
            ExprKind::BinOp { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.binop(*op, &l, &r)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand)?;
                unary(*op, &v)
            }
            ExprKind::BoolOp { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value)?;
                    let stop = match op {
                        BoolOp::And => !last.truthy(),
                        BoolOp::Or => last.truthy(),
                    };
                    if stop {
                        break;
                    }
                }
                Ok(last)
            }
            ExprKind::Compare { left, ops } => {
                let mut lhs = self.eval(left)?;
                for (op, right) in ops {
                    let rhs = self.eval(right)?;
                    if !self.compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Call {
                func,
                args,
                keywords,
                star,
                dstar,
            } => {
                let callee = self.eval(func)?;
                let mut positional = self.eval_all(args)?;
                if let Some(star) = star {
                    let extra = self.eval(star)?;
                    positional.extend(self.collect(&extra)?);
                }
                let mut kwargs: Kwargs = Vec::with_capacity(keywords.len());
                for kw in keywords {
                    let value = self.eval(&kw.value)?;
                    kwargs.push((kw.name.clone(), value));
                }
                if let Some(dstar) = dstar {
                    let Value::Dict(map) = self.eval(dstar)? else {
                        return Err(Unwind::type_error(
                            "argument after ** must be a mapping",
                        ));
                    };
                    for (k, v) in map.borrow().values() {
                        let Value::Str(name) = k else {
                            return Err(Unwind::type_error("keywords must be strings"));
                        };
                        if kwargs.iter().any(|(n, _)| **n == **name) {
                            return Err(Unwind::type_error(format!(
                                "got multiple values for keyword argument '{name}'"
                            )));
                        }
                        kwargs.push((name.to_string(), v.clone()));
                    }
                }
                self.call(&callee, positional, kwargs)
            }
            ExprKind::Attribute { value, attr } => {
                let obj = self.eval(value)?;
                self.get_attr(&obj, attr)
            }
            ExprKind::Subscript { value, index } => {
                let obj = self.eval(value)?;
                if let ExprKind::SliceObj { lower, upper, step } = &index.kind {
                    let (lo, hi, step) = self.slice_obj(lower, upper, step)?;
                    return self.get_ext_slice(&obj, lo, hi, step);
                }
                let index = self.eval(index)?;
                self.get_item(&obj, &index)
            }
            ExprKind::Slice {
                value,
                lower,
                upper,
            } => {
                let obj = self.eval(value)?;
                let lower = lower.as_deref();
                let upper = upper.as_deref();
                let (lo, hi) = self.slice_bounds(lower, upper)?;
                self.get_slice(&obj, lo, hi)
            }
            ExprKind::SliceObj { .. } => Err(Unwind::type_error(
                "slice expressions are only valid inside subscripts",
            )),
            ExprKind::Lambda(def) => self.make_function(def),
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr]) -> Result<Vec<Value>, Unwind> {
        items.iter().map(|e| self.eval(e)).collect()
    }

    fn comprehension(
        &mut self,
        elt: &Expr,
        generators: &[Comprehension],
        out: &mut Vec<Value>,
    ) -> Result<(), Unwind> {
        let Some((first, rest)) = generators.split_first() else {
            let value = self.eval(elt)?;
            self.budget.check_len(out.len() + 1)?;
            out.push(value);
            return Ok(());
        };
        let iterable = self.eval(&first.iter)?;
        for item in self.iterate(&iterable)? {
            self.budget.tick()?;
            self.assign(&first.target, item)?;
            let mut keep = true;
            for cond in &first.ifs {
                if !self.eval(cond)?.truthy() {
                    keep = false;
                    break;
                }
            }
            if keep {
                self.comprehension(elt, rest, out)?;
            }
        }
        Ok(())
    }

    fn compare(&mut self, op: CmpOp, a: &Value, b: &Value) -> Result<bool, Unwind> {
        use std::cmp::Ordering;
        let ordering = || -> Option<Ordering> {
            if a.is_number()
                && b.is_number()
                && (matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)))
            {
                return a.as_float()?.partial_cmp(&b.as_float()?);
            }
            Some(if a.equals(b) {
                Ordering::Equal
            } else {
                a.compare(b)
            })
        };
        Ok(match op {
            CmpOp::Eq => a.equals(b),
            CmpOp::NotEq => !a.equals(b),
            CmpOp::Lt => ordering() == Some(Ordering::Less),
            CmpOp::LtE => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            CmpOp::Gt => ordering() == Some(Ordering::Greater),
            CmpOp::GtE => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
            CmpOp::Is => a.is(b),
            CmpOp::IsNot => !a.is(b),
            CmpOp::In => self.contains(b, a)?,
            CmpOp::NotIn => !self.contains(b, a)?,
        })
    }

    fn contains(&mut self, container: &Value, item: &Value) -> Result<bool, Unwind> {
        Ok(match container {
            Value::Str(s) => match item {
                Value::Str(sub) => s.contains(&**sub),
                _ => {
                    return Err(Unwind::type_error(
                        "'in <string>' requires string as left operand",
                    ))
                }
            },
            Value::List(items) => items.borrow().iter().any(|v| v.equals(item)),
            Value::Tuple(items) => items.iter().any(|v| v.equals(item)),
            Value::Dict(map) => map.borrow().contains_key(&item.hash_key()?),
            Value::Set(set) => set.borrow().contains_key(&item.hash_key()?),
            Value::FrozenSet(set) => set.contains_key(&item.hash_key()?),
            Value::XRange(r) => match item.as_int() {
                Some(i) => {
                    let offset = i as i128 - r.start as i128;
                    let in_bounds = if r.step > 0 {
                        i >= r.start && i < r.stop
                    } else {
                        i <= r.start && i > r.stop
                    };
                    in_bounds && offset % r.step as i128 == 0
                }
                None => false,
            },
            Value::Instance(_) | Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
                return Err(Unwind::type_error(format!(
                    "argument of type '{}' is not iterable",
                    container.type_name()
                )))
            }
            other => {
                for v in self.iterate(other)? {
                    self.budget.tick()?;
                    if v.equals(item) {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    // --- operators -------------------------------------------------------------

    pub(crate) fn binop(&mut self, op: BinOp, l: &Value, r: &Value) -> EvalResult {
        if let (Value::Bool(a), Value::Bool(b)) = (l, r) {
            match op {
                BinOp::BitAnd => return Ok(Value::Bool(*a & *b)),
                BinOp::BitOr => return Ok(Value::Bool(*a | *b)),
                BinOp::BitXor => return Ok(Value::Bool(*a ^ *b)),
                _ => {}
            }
        }
        if let (Some(a), Some(b)) = (int_like(l), int_like(r)) {
            return int_binop(op, a, b);
        }
        if l.is_number() && r.is_number() {
            let (a, b) = (l.as_float().unwrap_or(0.0), r.as_float().unwrap_or(0.0));
            return float_binop(op, a, b);
        }

        match (op, l, r) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.budget.check_len(a.len() + b.len())?;
                Ok(Value::str(format!("{a}{b}")))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                self.budget.check_len(items.len())?;
                Ok(Value::list(items))
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                let mut items = a.to_vec();
                items.extend(b.iter().cloned());
                self.budget.check_len(items.len())?;
                Ok(Value::tuple(items))
            }
            (BinOp::Mul, seq, Value::Int(_) | Value::Bool(_))
                if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
            {
                self.repeat(seq, r.as_int().unwrap_or(0))
            }
            (BinOp::Mul, Value::Int(_) | Value::Bool(_), seq)
                if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
            {
                self.repeat(seq, l.as_int().unwrap_or(0))
            }
            (BinOp::Mod, Value::Str(fmt), args) => {
                let max_len = self.budget.limits().max_sequence_len;
                let mut convert = |v: &Value, repr: bool| -> Result<String, Unwind> {
                    if repr {
                        self.repr_of(v)
                    } else {
                        self.str_of(v)
                    }
                };
                let text = format::percent_format(fmt, args, max_len, &mut convert)?;
                self.budget.check_len(text.len())?;
                Ok(Value::str(text))
            }
            (
                BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor,
                Value::Set(_) | Value::FrozenSet(_),
                Value::Set(_) | Value::FrozenSet(_),
            ) => {
                let a = set_snapshot(l);
                let b = set_snapshot(r);
                let name = match op {
                    BinOp::BitOr => "union",
                    BinOp::BitAnd => "intersection",
                    BinOp::Sub => "difference",
                    _ => "symmetric_difference",
                };
                let result = methods::set_op(name, &a, &b);
                Ok(match l {
                    Value::FrozenSet(_) => Value::FrozenSet(Rc::new(result)),
                    _ => Value::set(result),
                })
            }
            (BinOp::Add, Value::Str(_), other) => Err(Unwind::type_error(format!(
                "cannot concatenate 'str' and '{}' objects",
                other.type_name()
            ))),
            _ => Err(Unwind::type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    fn repeat(&mut self, seq: &Value, n: i64) -> EvalResult {
        let n = n.max(0) as usize;
        let len = seq.len().unwrap_or(0);
        self.budget.check_len(len.saturating_mul(n))?;
        Ok(match seq {
            Value::Str(s) => {
                self.budget.check_len(s.len().saturating_mul(n))?;
                Value::str(s.repeat(n))
            }
            Value::List(items) => {
                let items = items.borrow();
                Value::list(items.iter().cloned().cycle().take(items.len() * n).collect())
            }
            Value::Tuple(items) => {
                Value::tuple(items.iter().cloned().cycle().take(items.len() * n).collect())
            }
            other => other.clone(),
        })
    }

    // --- attributes --------------------------------------------------------------

    pub(crate) fn get_attr(&mut self, obj: &Value, name: &str) -> EvalResult {
        self.try_attr(obj, name)?.ok_or_else(|| attribute_missing(obj, name))
    }

    /// `Ok(None)` when the attribute does not exist.
    pub(crate) fn try_attr(&mut self, obj: &Value, name: &str) -> Result<Option<Value>, Unwind> {
        let found = match obj {
            Value::Instance(inst) => {
                if let Some(v) = inst.attrs.borrow().get(name) {
                    return Ok(Some(v.clone()));
                }
                match name {
                    "__class__" => Some(Value::Class(inst.class.clone())),
                    "__dict__" => Some(Value::dict_from(
                        inst.attrs.borrow().iter().map(|(k, v)| (k.clone(), v.clone())),
                    )),
                    _ => inst.class.lookup(name).map(|v| bind(obj, v)),
                }
            }
            Value::Class(class) => match name {
                "__name__" => Some(Value::str(&class.name)),
                "__bases__" => Some(Value::tuple(class.bases.clone())),
                _ => class.lookup(name),
            },
            Value::Super(sup) => {
                let Value::Instance(inst) = &sup.receiver else {
                    return Ok(None);
                };
                let mro = inst.class.mro();
                let start = mro
                    .iter()
                    .position(|c| Rc::ptr_eq(c, &sup.class))
                    .map_or(mro.len(), |i| i + 1);
                mro[start..]
                    .iter()
                    .find_map(|c| c.attrs.borrow().get(name).cloned())
                    .map(|v| bind(&sup.receiver, v))
            }
            Value::Module(m) => match name {
                "__name__" => Some(Value::str(m.name)),
                _ => m.attrs.get(name).cloned(),
            },
            Value::Function(f) => match name {
                "__name__" | "func_name" => Some(Value::str(&f.def.name)),
                "__doc__" | "func_doc" => {
                    Some(f.def.doc.as_deref().map_or(Value::None, Value::str))
                }
                _ => None,
            },
            Value::Method(m) => match name {
                "__name__" => self.try_attr(&m.func, name)?,
                _ => None,
            },
            Value::Builtin(f) if name == "__name__" => Some(Value::str(f.name())),
            Value::HostFn(f) if name == "__name__" => Some(Value::str(f.name())),
            Value::Type(t) if name == "__name__" => Some(Value::str(t.name())),
            Value::ExcClass(k) if name == "__name__" => Some(Value::str(k.name())),
            Value::Exception(e) => match name {
                "args" => Some(Value::tuple(e.args.clone())),
                "message" => Some(match e.args.as_slice() {
                    [single] => single.clone(),
                    _ => Value::str(""),
                }),
                _ => None,
            },
            Value::File(f) => {
                let file = f.borrow();
                match name {
                    "closed" => Some(Value::Bool(file.closed)),
                    "name" => Some(Value::str(&file.path)),
                    "mode" => Some(Value::str(&file.mode)),
                    _ => None,
                }
            }
            _ => None,
        };
        if found.is_some() {
            return Ok(found);
        }
        Ok(methods::lookup(obj, name).map(|method| {
            Value::NativeMethod(Rc::new(NativeMethod {
                receiver: obj.clone(),
                name: method,
            }))
        }))
    }

    pub(crate) fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> Result<(), Unwind> {
        match obj {
            Value::Instance(inst) => {
                inst.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(attribute_missing(other, name)),
        }
    }

    pub(crate) fn del_attr(&mut self, obj: &Value, name: &str) -> Result<(), Unwind> {
        let removed = match obj {
            Value::Instance(inst) => inst.attrs.borrow_mut().shift_remove(name),
            Value::Class(class) => class.attrs.borrow_mut().shift_remove(name),
            _ => None,
        };
        removed.map(|_| ()).ok_or_else(|| attribute_missing(obj, name))
    }

    // --- items and slices ------------------------------------------------------

    fn get_item(&mut self, obj: &Value, index: &Value) -> EvalResult {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let i = seq_index("list", items.len(), index)?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = seq_index("tuple", items.len(), index)?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let len = s.chars().count();
                let i = seq_index("string", len, index)?;
                Ok(s.chars().nth(i).map(|c| Value::str(c.to_string())).unwrap_or(Value::None))
            }
            Value::XRange(r) => {
                let i = seq_index("xrange object", r.len(), index)?;
                Ok(r.get(i).map_or(Value::None, Value::Int))
            }
            Value::Dict(map) => map
                .borrow()
                .get(&index.hash_key()?)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Unwind::key_error(index.clone())),
            other => Err(Unwind::type_error(format!(
                "'{}' object has no attribute '__getitem__'",
                other.type_name()
            ))),
        }
    }

    fn set_item(&mut self, obj: &Value, index: &Value, value: Value) -> Result<(), Unwind> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let i = index
                    .as_int()
                    .ok_or_else(|| {
                        Unwind::type_error(format!(
                            "list indices must be integers, not {}",
                            index.type_name()
                        ))
                    })
                    .and_then(|i| {
                        resolve_index(len, i).ok_or_else(|| {
                            Unwind::index_error("list assignment index out of range")
                        })
                    })?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(map) => {
                let key = index.hash_key()?;
                map.borrow_mut().insert(key, (index.clone(), value));
                Ok(())
            }
            other => Err(Unwind::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn del_item(&mut self, obj: &Value, index: &Value) -> Result<(), Unwind> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = seq_index("list", items.len(), index)?;
                items.remove(i);
                Ok(())
            }
            Value::Dict(map) => map
                .borrow_mut()
                .shift_remove(&index.hash_key()?)
                .map(|_| ())
                .ok_or_else(|| Unwind::key_error(index.clone())),
            other => Err(Unwind::type_error(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ))),
        }
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> Result<Option<i64>, Unwind> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                Unwind::type_error("slice indices must be integers or None")
            }),
        }
    }

    fn slice_bounds(
        &mut self,
        lower: Option<&Expr>,
        upper: Option<&Expr>,
    ) -> Result<(Option<i64>, Option<i64>), Unwind> {
        Ok((self.slice_bound(lower)?, self.slice_bound(upper)?))
    }

    fn slice_obj(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
    ) -> Result<(Option<i64>, Option<i64>, Option<i64>), Unwind> {
        Ok((
            self.slice_bound(lower.as_deref())?,
            self.slice_bound(upper.as_deref())?,
            self.slice_bound(step.as_deref())?,
        ))
    }

    fn get_slice(&mut self, obj: &Value, lo: Option<i64>, hi: Option<i64>) -> EvalResult {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let (a, b) = clamp_range(items.len(), lo, hi);
                Ok(Value::list(items[a..b].to_vec()))
            }
            Value::Tuple(items) => {
                let (a, b) = clamp_range(items.len(), lo, hi);
                Ok(Value::tuple(items[a..b].to_vec()))
            }
            Value::Str(s) => {
                let (a, b) = clamp_range(s.chars().count(), lo, hi);
                Ok(Value::str(s.chars().skip(a).take(b - a).collect::<String>()))
            }
            other => Err(Unwind::type_error(format!(
                "'{}' object has no attribute '__getslice__'",
                other.type_name()
            ))),
        }
    }

    fn get_ext_slice(
        &mut self,
        obj: &Value,
        lo: Option<i64>,
        hi: Option<i64>,
        step: Option<i64>,
    ) -> EvalResult {
        if step.is_none() || step == Some(1) {
            return self.get_slice(obj, lo, hi);
        }
        let items: Vec<Value> = match obj {
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            other => {
                return Err(Unwind::type_error(format!(
                    "'{}' object is not subscriptable",
                    other.type_name()
                )))
            }
        };
        let picked: Vec<Value> = slice_indices(items.len(), lo, hi, step)?
            .into_iter()
            .map(|i| items[i].clone())
            .collect();
        Ok(match obj {
            Value::Tuple(_) => Value::tuple(picked),
            Value::Str(_) => Value::str(
                picked
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<String>(),
            ),
            _ => Value::list(picked),
        })
    }

    fn set_slice(
        &mut self,
        obj: &Value,
        lo: Option<i64>,
        hi: Option<i64>,
        value: Value,
    ) -> Result<(), Unwind> {
        let Value::List(items) = obj else {
            return Err(Unwind::type_error(format!(
                "'{}' object does not support slice assignment",
                obj.type_name()
            )));
        };
        let replacement = self.collect(&value)?;
        let len = items.borrow().len();
        let (a, b) = clamp_range(len, lo, hi);
        self.budget.check_len(len - (b - a) + replacement.len())?;
        items.borrow_mut().splice(a..b, replacement);
        Ok(())
    }

    fn set_ext_slice(
        &mut self,
        obj: &Value,
        (lo, hi, step): (Option<i64>, Option<i64>, Option<i64>),
        value: Value,
    ) -> Result<(), Unwind> {
        if step.is_none() || step == Some(1) {
            return self.set_slice(obj, lo, hi, value);
        }
        let Value::List(items) = obj else {
            return Err(Unwind::type_error(format!(
                "'{}' object does not support item assignment",
                obj.type_name()
            )));
        };
        let replacement = self.collect(&value)?;
        let indices = slice_indices(items.borrow().len(), lo, hi, step)?;
        if indices.len() != replacement.len() {
            return Err(Unwind::value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                indices.len()
            )));
        }
        let mut items = items.borrow_mut();
        for (i, v) in indices.into_iter().zip(replacement) {
            items[i] = v;
        }
        Ok(())
    }

    fn del_slice(
        &mut self,
        obj: &Value,
        (lo, hi, step): (Option<i64>, Option<i64>, Option<i64>),
    ) -> Result<(), Unwind> {
        let Value::List(items) = obj else {
            return Err(Unwind::type_error(format!(
                "'{}' object doesn't support slice deletion",
                obj.type_name()
            )));
        };
        let len = items.borrow().len();
        let mut indices = if step.is_none() || step == Some(1) {
            let (a, b) = clamp_range(len, lo, hi);
            (a..b).collect()
        } else {
            slice_indices(len, lo, hi, step)?
        };
        indices.sort_unstable();
        let mut items = items.borrow_mut();
        for i in indices.into_iter().rev() {
            items.remove(i);
        }
        Ok(())
    }

    // --- targets ---------------------------------------------------------------

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), Unwind> {
        match target {
            Target::Name { name, .. } => {
                self.store_name(name, value);
                Ok(())
            }
            Target::Attribute { value: obj, attr, .. } => {
                let obj = self.eval(obj)?;
                self.set_attr(&obj, attr, value)
            }
            Target::Subscript { value: obj, index, .. } => {
                let obj = self.eval(obj)?;
                if let ExprKind::SliceObj { lower, upper, step } = &index.kind {
                    let bounds = self.slice_obj(lower, upper, step)?;
                    return self.set_ext_slice(&obj, bounds, value);
                }
                let index = self.eval(index)?;
                self.set_item(&obj, &index, value)
            }
            Target::Slice {
                value: obj,
                lower,
                upper,
                ..
            } => {
                let obj = self.eval(obj)?;
                let (lo, hi) = self.slice_bounds(lower.as_ref(), upper.as_ref())?;
                self.set_slice(&obj, lo, hi, value)
            }
            Target::Tuple { elts, .. } | Target::List { elts, .. } => {
                let items = self.collect(&value)?;
                if items.len() > elts.len() {
                    return Err(Unwind::value_error("too many values to unpack"));
                }
                if items.len() < elts.len() {
                    return Err(Unwind::value_error(format!(
                        "need more than {} value{} to unpack",
                        items.len(),
                        if items.len() == 1 { "" } else { "s" }
                    )));
                }
                for (elt, item) in elts.iter().zip(items) {
                    self.assign(elt, item)?;
                }
                Ok(())
            }
        }
    }

    fn delete(&mut self, target: &Target) -> Result<(), Unwind> {
        match target {
            Target::Name { name, .. } => self.delete_name(name),
            Target::Attribute { value, attr, .. } => {
                let obj = self.eval(value)?;
                self.del_attr(&obj, attr)
            }
            Target::Subscript { value, index, .. } => {
                let obj = self.eval(value)?;
                if let ExprKind::SliceObj { lower, upper, step } = &index.kind {
                    let bounds = self.slice_obj(lower, upper, step)?;
                    return self.del_slice(&obj, bounds);
                }
                let index = self.eval(index)?;
                self.del_item(&obj, &index)
            }
            Target::Slice {
                value,
                lower,
                upper,
                ..
            } => {
                let obj = self.eval(value)?;
                let (lo, hi) = self.slice_bounds(lower.as_ref(), upper.as_ref())?;
                self.del_slice(&obj, (lo, hi, None))
            }
            Target::Tuple { elts, .. } | Target::List { elts, .. } => {
                for elt in elts {
                    self.delete(elt)?;
                }
                Ok(())
            }
        }
    }

    // --- iteration -------------------------------------------------------------

    pub(crate) fn iterate(&mut self, v: &Value) -> Result<ValueIter, Unwind> {
        Ok(match v {
            Value::List(list) => ValueIter::List {
                list: list.clone(),
                index: 0,
            },
            Value::Tuple(items) => ValueIter::Items(items.to_vec().into_iter()),
            Value::Str(s) => ValueIter::Items(
                s.chars()
                    .map(|c| Value::str(c.to_string()))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Value::Dict(map) => ValueIter::Items(
                map.borrow()
                    .values()
                    .map(|(k, _)| k.clone())
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Value::Set(set) => ValueIter::Items(
                set.borrow()
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Value::FrozenSet(set) => {
                ValueIter::Items(set.values().cloned().collect::<Vec<_>>().into_iter())
            }
            Value::XRange(range) => ValueIter::Range {
                range: *range,
                index: 0,
            },
            Value::File(_) => {
                let lines = methods::call(self, v, "readlines", Vec::new(), Vec::new())?;
                return self.iterate(&lines);
            }
            Value::Instance(inst) => {
                return Err(Unwind::type_error(format!(
                    "{} instance is not iterable",
                    inst.class.name
                )))
            }
            other => {
                return Err(Unwind::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        })
    }

    pub(crate) fn collect(&mut self, v: &Value) -> Result<Vec<Value>, Unwind> {
        if let Some(len) = v.len() {
            self.budget.check_len(len)?;
        }
        Ok(self.iterate(v)?.collect())
    }
}

/// Bind call arguments to a function's parameters in `frame`.
fn bind_params(
    f: &Function,
    frame: &Frame,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<(), Unwind> {
    let def = &f.def;
    let params = &def.params;
    let n = params.args.len();
    let required = n - f.defaults.len();
    let given = args.len() + kwargs.len();
    let arity_error = |qualifier: &str, count: usize| {
        Unwind::type_error(format!(
            "{}() takes {qualifier} {count} argument{} ({given} given)",
            def.name,
            if count == 1 { "" } else { "s" }
        ))
    };

    let mut slots: Vec<Option<Value>> = vec![None; n];
    let mut extra = Vec::new();
    for (i, arg) in args.into_iter().enumerate() {
        match slots.get_mut(i) {
            Some(slot) => *slot = Some(arg),
            None => extra.push(arg),
        }
    }
    if !extra.is_empty() && params.vararg.is_none() {
        let qualifier = if f.defaults.is_empty() { "exactly" } else { "at most" };
        return Err(arity_error(qualifier, n));
    }

    let mut extra_kwargs: IndexMap<String, Value> = IndexMap::new();
    for (name, value) in kwargs {
        match params.args.iter().position(|p| p.name == name) {
            Some(i) if slots[i].is_some() => {
                return Err(Unwind::type_error(format!(
                    "{}() got multiple values for keyword argument '{name}'",
                    def.name
                )))
            }
            Some(i) => slots[i] = Some(value),
            None if params.kwarg.is_some() => {
                extra_kwargs.insert(name, value);
            }
            None => {
                return Err(Unwind::type_error(format!(
                    "{}() got an unexpected keyword argument '{name}'",
                    def.name
                )))
            }
        }
    }

    let mut vars = frame.vars.borrow_mut();
    for (i, (param, slot)) in params.args.iter().zip(slots).enumerate() {
        let value = match slot {
            Some(v) => v,
            None if i >= required => f.defaults[i - required].clone(),
            None => {
                let qualifier = if f.defaults.is_empty() && params.vararg.is_none() {
                    "exactly"
                } else {
                    "at least"
                };
                return Err(arity_error(qualifier, required));
            }
        };
        vars.insert(param.name.clone(), value);
    }
    if let Some(name) = &params.vararg {
        vars.insert(name.clone(), Value::tuple(extra));
    }
    if let Some(name) = &params.kwarg {
        vars.insert(name.clone(), builtins::kwargs_dict(extra_kwargs));
    }
    Ok(())
}

/// Bind a class attribute fetched through an instance.
fn bind(receiver: &Value, attr: Value) -> Value {
    match attr {
        Value::Function(_) => Value::Method(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            func: attr,
        })),
        other => other,
    }
}

fn attribute_missing(obj: &Value, name: &str) -> Unwind {
    let message = match obj {
        Value::Instance(inst) => format!("{} instance has no attribute '{name}'", inst.class.name),
        Value::Class(class) => format!("class {} has no attribute '{name}'", class.name),
        other => format!("'{}' object has no attribute '{name}'", other.type_name()),
    };
    Unwind::attribute_error(message)
}

fn expect_str(method: &str, v: Value) -> Result<String, Unwind> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(Unwind::type_error(format!(
            "{method} returned non-string (type {})",
            other.type_name()
        ))),
    }
}

fn exception_kind_name(v: &Value) -> String {
    match v {
        Value::Exception(e) => e.kind.name().to_string(),
        Value::Instance(inst) => inst.class.name.clone(),
        other => other.type_name().to_string(),
    }
}

fn set_snapshot(v: &Value) -> SetMap {
    match v {
        Value::Set(s) => s.borrow().clone(),
        Value::FrozenSet(s) => (**s).clone(),
        _ => SetMap::new(),
    }
}

fn int_like(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn seq_index(what: &str, len: usize, index: &Value) -> Result<usize, Unwind> {
    let i = index.as_int().ok_or_else(|| {
        Unwind::type_error(format!(
            "{what} indices must be integers, not {}",
            index.type_name()
        ))
    })?;
    resolve_index(len, i).ok_or_else(|| Unwind::index_error(format!("{what} index out of range")))
}

/// Indices selected by `[lo:hi:step]`.
fn slice_indices(
    len: usize,
    lo: Option<i64>,
    hi: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, Unwind> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Unwind::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let adjust = |i: i64, low: i64, high: i64| -> i64 {
        let i = if i < 0 { i + len } else { i };
        i.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = lo.map_or(0, |i| adjust(i, 0, len));
        let stop = hi.map_or(len, |i| adjust(i, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lo.map_or(len - 1, |i| adjust(i, -1, len - 1));
        let stop = hi.map_or(-1, |i| adjust(i, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

fn unary(op: UnaryOp, v: &Value) -> EvalResult {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Plus, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        (UnaryOp::Plus, Value::Int(_) | Value::Float(_)) => Ok(v.clone()),
        (UnaryOp::Minus, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
        (UnaryOp::Minus, Value::Int(i)) => {
            i.checked_neg().map(Value::Int).ok_or_else(Unwind::overflow)
        }
        (UnaryOp::Minus, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!(*b as i64))),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (op, other) => {
            let symbol = match op {
                UnaryOp::Plus => "unary +",
                UnaryOp::Minus => "unary -",
                UnaryOp::Invert => "unary ~",
                UnaryOp::Not => "not",
            };
            Err(Unwind::type_error(format!(
                "bad operand type for {symbol}: '{}'",
                other.type_name()
            )))
        }
    }
}

fn int_binop(op: BinOp, a: i64, b: i64) -> EvalResult {
    let overflow = Unwind::overflow;
    let int = |r: Option<i64>| r.map(Value::Int).ok_or_else(overflow);
    match op {
        BinOp::Add => int(a.checked_add(b)),
        BinOp::Sub => int(a.checked_sub(b)),
        BinOp::Mul => int(a.checked_mul(b)),
        BinOp::Div | BinOp::FloorDiv => {
            if b == 0 {
                return Err(Unwind::zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            let q = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
            Ok(Value::Int(q))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(Unwind::zero_division("integer division or modulo by zero"));
            }
            let r = a.checked_rem(b).unwrap_or(0);
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
        }
        BinOp::Pow => {
            if b < 0 {
                return float_binop(BinOp::Pow, a as f64, b as f64);
            }
            if b == 0 {
                return Ok(Value::Int(1));
            }
            let exp = u32::try_from(b).ok();
            match (a, exp) {
                (0 | 1, _) => Ok(Value::Int(a)),
                (-1, _) => Ok(Value::Int(if b % 2 == 0 { 1 } else { -1 })),
                (_, Some(e)) => int(a.checked_pow(e)),
                (_, None) => Err(overflow()),
            }
        }
        BinOp::LShift | BinOp::RShift if b < 0 => Err(Unwind::value_error("negative shift count")),
        BinOp::LShift => {
            if a == 0 {
                return Ok(Value::Int(0));
            }
            if b >= 63 {
                return Err(overflow());
            }
            let r = a << b;
            if r >> b != a {
                return Err(overflow());
            }
            Ok(Value::Int(r))
        }
        BinOp::RShift => Ok(Value::Int(if b >= 64 {
            if a < 0 {
                -1
            } else {
                0
            }
        } else {
            a >> b
        })),
        BinOp::BitAnd => Ok(Value::Int(a & b)),
        BinOp::BitOr => Ok(Value::Int(a | b)),
        BinOp::BitXor => Ok(Value::Int(a ^ b)),
    }
}

fn float_binop(op: BinOp, a: f64, b: f64) -> EvalResult {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Unwind::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(Unwind::zero_division("float divmod()"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(Unwind::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(Unwind::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(Unwind::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let r = a.powf(b);
            if r.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(Unwind::exc(ExcKind::OverflowError, "Numerical result out of range"));
            }
            r
        }
        _ => {
            return Err(Unwind::type_error(format!(
                "unsupported operand type(s) for {}: 'float' and 'float'",
                op.symbol()
            )))
        }
    };
    Ok(Value::Float(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (Context, Result<(), SafeError>) {
        let mut ctx = Context::new();
        let result = parser::parse_module(source)
            .and_then(|m| run_module(&mut ctx, &m, Limits::default(), None));
        (ctx, result)
    }

    fn int(ctx: &Context, name: &str) -> Option<i64> {
        ctx.get(name).and_then(|v| v.as_int())
    }

    #[test]
    fn integer_division_floors() {
        let (ctx, r) = run("a = 7 / 2\nb = -7 / 2\nc = -7 % 3\nd = 7 % -3\ne = 2 ** 10\n");
        assert!(r.is_ok());
        assert_eq!(int(&ctx, "a"), Some(3));
        assert_eq!(int(&ctx, "b"), Some(-4));
        assert_eq!(int(&ctx, "c"), Some(2));
        assert_eq!(int(&ctx, "d"), Some(-2));
        assert_eq!(int(&ctx, "e"), Some(1024));
    }

    #[test]
    fn overflow_raises() {
        let (_, r) = run("x = 9223372036854775807 + 1\n");
        assert!(matches!(r, Err(SafeError::Script { ref kind, .. }) if kind == "OverflowError"));
    }

    #[test]
    fn closures_and_defaults() {
        let src = "\
def outer(n):
    def inner(k=2):
        return n * k
    return inner
f = outer(5)
a = f()
b = f(k=3)
";
        let (ctx, r) = run(src);
        assert!(r.is_ok(), "{r:?}");
        assert_eq!(int(&ctx, "a"), Some(10));
        assert_eq!(int(&ctx, "b"), Some(15));
    }

    #[test]
    fn classes_and_inheritance() {
        let src = "\
class Base(object):
    def __init__(self, v):
        self.v = v
    def get(self):
        return self.v
class Child(Base):
    def get(self):
        return super(Child, self).get() + 1
c = Child(41)
r = c.get()
";
        let (ctx, r) = run(src);
        assert!(r.is_ok(), "{r:?}");
        assert_eq!(int(&ctx, "r"), Some(42));
    }

    #[test]
    fn try_except_else_finally() {
        let src = "\
log = []
try:
    try:
        1 / 0
    except ZeroDivisionError, e:
        log.append('caught')
    else:
        log.append('else')
finally:
    log.append('finally')
";
        let (ctx, r) = run(src);
        assert!(r.is_ok(), "{r:?}");
        assert_eq!(
            ctx.get("log").map(|v| v.repr_basic()).as_deref(),
            Some("['caught', 'finally']")
        );
    }

    #[test]
    fn user_exception_classes() {
        let src = "\
class Oops(ValueError):
    pass
try:
    raise Oops('bad thing')
except ValueError, e:
    msg = str(e)
";
        let (ctx, r) = run(src);
        assert!(r.is_ok(), "{r:?}");
        assert_eq!(ctx.get("msg").map(|v| v.str_basic()).as_deref(), Some("bad thing"));
    }

    #[test]
    fn uncaught_exception_reports_line() {
        let (_, r) = run("x = 1\ny = {}\nz = y['missing']\n");
        match r {
            Err(SafeError::Script { kind, line, .. }) => {
                assert_eq!(kind, "KeyError");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn print_uses_softspace() {
        let (ctx, r) = run("print 'a', 1\nprint 'b',\nprint 'c'\nprint\n");
        assert!(r.is_ok());
        assert_eq!(ctx.output(), "a 1\nb c\n\n");
    }

    #[test]
    fn list_comprehension_and_slices() {
        let src = "\
xs = [i * i for i in range(6) if i % 2 == 0]
ys = xs[::-1]
zs = 'abcdef'[1:4]
del xs[0]
";
        let (ctx, r) = run(src);
        assert!(r.is_ok(), "{r:?}");
        assert_eq!(ctx.get("xs").map(|v| v.repr_basic()).as_deref(), Some("[4, 16]"));
        assert_eq!(ctx.get("ys").map(|v| v.repr_basic()).as_deref(), Some("[16, 4, 0]"));
        assert_eq!(ctx.get("zs").map(|v| v.repr_basic()).as_deref(), Some("'bcd'"));
    }

    #[test]
    fn recursion_limit_is_catchable() {
        let src = "\
def f(n):
    return f(n + 1)
try:
    f(0)
except RuntimeError:
    caught = True
";
        let (ctx, r) = run(src);
        assert!(r.is_ok(), "{r:?}");
        assert!(ctx.get("caught").is_some_and(|v| v.truthy()));
    }

    #[test]
    fn infinite_loop_hits_step_limit() {
        let mut ctx = Context::new();
        let module = parser::parse_module("while True:\n    pass\n").expect("parse");
        let limits = Limits {
            max_steps: 1_000,
            ..Limits::default()
        };
        let r = run_module(&mut ctx, &module, limits, None);
        assert!(matches!(r, Err(SafeError::StepLimit { max: 1_000 })));
    }

    #[test]
    fn string_formatting() {
        let (ctx, r) = run("s = '%s-%03d-%.2f' % ('x', 7, 1.5)\nt = '{0}+{1}'.format(1, 'b')\n");
        assert!(r.is_ok(), "{r:?}");
        assert_eq!(ctx.get("s").map(|v| v.str_basic()).as_deref(), Some("x-007-1.50"));
        assert_eq!(ctx.get("t").map(|v| v.str_basic()).as_deref(), Some("1+b"));
    }

    #[test]
    fn name_error_suggests_close_match() {
        let (_, r) = run("counter = 1\nx = countr + 1\n");
        match r {
            Err(SafeError::Script { kind, message, .. }) => {
                assert_eq!(kind, "NameError");
                assert!(message.contains("did you mean 'counter'"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn slice_index_selection() {
        assert_eq!(slice_indices(5, None, None, Some(2)).ok(), Some(vec![0, 2, 4]));
        assert_eq!(slice_indices(5, None, None, Some(-1)).ok(), Some(vec![4, 3, 2, 1, 0]));
        assert_eq!(slice_indices(5, Some(-2), Some(0), Some(-1)).ok(), Some(vec![3, 2, 1]));
        assert!(slice_indices(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn exec_with_dict_globals() {
        let (ctx, r) = run("g = {'a': 2}\nexec 'b = a * 21' in g\nv = g['b']\n");
        assert!(r.is_ok(), "{r:?}");
        assert_eq!(int(&ctx, "v"), Some(42));
    }
}
