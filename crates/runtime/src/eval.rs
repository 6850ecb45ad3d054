//! The Evaluator
//!
//! A recursive interpreter over the value graph, keyed on the tag of the
//! input. Immediates evaluate to themselves; symbols search the scope
//! stack innermost-out; pairs dispatch on their head: special forms
//! first, otherwise the head is evaluated to a callable and the argument
//! expressions are evaluated left-to-right before the call.
//!
//! Closures capture their free variables by copy into a heap-resident
//! frame. On a call the captured frame is pushed as a scope, a fresh
//! scope binds the parameters, the body runs, and afterwards the frame
//! is reconciled from the capture scope; only names that already had
//! slots are written back, so call-local bindings never leak into the
//! capture.
//!
//! Type-mismatch errors are caught and rethrown at every evaluator
//! frame, prepending the offending expression to their trace list.

use std::collections::{BTreeSet, HashMap, HashSet};

use tarn_core::heap::cell_words;
use tarn_core::{Error, FrameRef, NIL, Result, Value, ValueType, car, cdr, check_type, set_cdr};

use crate::runtime::Runtime;

/// Collect exactly `N` leading elements of a special form's argument
/// list, or fail with invalid-syntax naming the form.
fn form_args<const N: usize>(mut args: Value, form: &'static str) -> Result<[Value; N]> {
    let mut out = [NIL; N];
    for slot in out.iter_mut() {
        if args.value_type() != ValueType::Pair {
            return Err(Error::InvalidSyntax(format!("{form} expects {N} argument(s)")));
        }
        *slot = car(args)?;
        args = cdr(args)?;
    }
    Ok(out)
}

impl Runtime {
    /// Evaluate a value in the current scope stack.
    ///
    /// This is the host entry point as well as the internal recursion
    /// point, so every evaluator frame extends the trace of a
    /// type-mismatch error unwinding through it.
    pub fn eval(&mut self, x: Value) -> Result<Value> {
        match self.eval_dispatch(x) {
            Err(Error::TypeMismatch { expected, actual, context, trace }) => {
                // Growing the trace allocates; if the arena is spent the
                // error propagates with the trace it already has.
                let trace = self.cons(x, trace).unwrap_or(trace);
                Err(Error::TypeMismatch { expected, actual, context, trace })
            }
            r => r,
        }
    }

    fn eval_dispatch(&mut self, x: Value) -> Result<Value> {
        match x.value_type() {
            ValueType::Nil
            | ValueType::Bool
            | ValueType::Int
            | ValueType::Float
            | ValueType::Str
            | ValueType::FVec => Ok(x),
            ValueType::Symbol => self.look_up(x),
            ValueType::Pair => {
                let head = car(x)?;
                let args = cdr(x)?;
                self.apply_form(head, args)
            }
            ValueType::Closure | ValueType::Extern => {
                Err(Error::InvalidSyntax("closure and extern values cannot be evaluated".into()))
            }
        }
    }

    /// Dispatch a pair: special forms fire on the unevaluated head
    /// symbol; anything else is a call.
    fn apply_form(&mut self, head: Value, args: Value) -> Result<Value> {
        let s = self.syms;

        if head == s.quote {
            let [x] = form_args::<1>(args, "quote")?;
            Ok(x)
        } else if head == s.unique_symbol {
            let [name] = form_args::<1>(args, "unique-symbol")?;
            self.unique_symbol(name)
        } else if head == s.if_ {
            let [c, t, e] = form_args::<3>(args, "if")?;
            if self.eval(c)?.is_truthy() { self.eval(t) } else { self.eval(e) }
        } else if head == s.set {
            let [name, rhs] = form_args::<2>(args, "set!")?;
            check_type(name, ValueType::Symbol, "set! target must be a symbol")?;
            let val = self.eval(rhs)?;
            for scope in self.scopes.iter_mut().rev() {
                if let Some(slot) = scope.get_mut(&name) {
                    *slot = val;
                    return Ok(NIL);
                }
            }
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(name, val);
            }
            Ok(NIL)
        } else if head == s.define {
            let [target, expr] = form_args::<2>(args, "define")?;
            match target.value_type() {
                ValueType::Symbol => {
                    let val = self.eval(expr)?;
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(target, val);
                    }
                    Ok(NIL)
                }
                ValueType::Pair => {
                    // (define (name . params) body) desugars to a named
                    // lambda; the name is bound in the capture frame as
                    // well, which is what makes recursion work.
                    let name = car(target)?;
                    check_type(name, ValueType::Symbol, "defined name must be a symbol")?;
                    let closure = self.make_closure(cdr(target)?, expr, Some(name))?;
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(name, closure);
                    }
                    Ok(NIL)
                }
                _ => Err(Error::InvalidSyntax("define expects a symbol or a signature".into())),
            }
        } else if head == s.lambda {
            let [params, body] = form_args::<2>(args, "lambda")?;
            self.make_closure(params, body, None)
        } else if head == s.let_ {
            let [bindings, body] = form_args::<2>(args, "let")?;
            // Simultaneous: every right-hand side sees the outer scope.
            let mut scope = HashMap::new();
            let mut bc = bindings;
            while !bc.is_nil() {
                let binding = car(bc)?;
                let name = car(binding)?;
                check_type(name, ValueType::Symbol, "let binding name must be a symbol")?;
                let val = self.eval(car(cdr(binding)?)?)?;
                scope.insert(name, val);
                bc = cdr(bc)?;
            }
            self.scopes.push(scope);
            let result = self.eval(body);
            self.scopes.pop();
            result
        } else if head == s.let_seq {
            let [bindings, body] = form_args::<2>(args, "let*")?;
            self.scopes.push(HashMap::new());
            let result = self.let_seq_inner(bindings, body);
            self.scopes.pop();
            result
        } else if head == s.let_rec {
            let [bindings, body] = form_args::<2>(args, "letrec")?;
            self.scopes.push(HashMap::new());
            let result = self.let_rec_inner(bindings, body);
            self.scopes.pop();
            result
        } else if head == s.quasiquote {
            let [template] = form_args::<1>(args, "quasiquote")?;
            self.apply_quasiquote(template)
        } else if head == s.defmacro {
            // Macros live only in the expander; reaching one here means
            // the form was evaluated without being expanded first.
            Err(Error::InvalidSyntax("defmacro is only processed during macro expansion".into()))
        } else {
            let f = self.eval(head)?;
            let argv = self.eval_list(args)?;
            self.apply(f, argv)
        }
    }

    fn let_seq_inner(&mut self, bindings: Value, body: Value) -> Result<Value> {
        let mut bc = bindings;
        while !bc.is_nil() {
            let binding = car(bc)?;
            let name = car(binding)?;
            check_type(name, ValueType::Symbol, "let* binding name must be a symbol")?;
            let val = self.eval(car(cdr(binding)?)?)?;
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(name, val);
            }
            bc = cdr(bc)?;
        }
        self.eval(body)
    }

    fn let_rec_inner(&mut self, bindings: Value, body: Value) -> Result<Value> {
        // Pre-bind every name to nil so the right-hand sides can at
        // least reference each other's slots.
        let mut bc = bindings;
        while !bc.is_nil() {
            let name = car(car(bc)?)?;
            check_type(name, ValueType::Symbol, "letrec binding name must be a symbol")?;
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(name, NIL);
            }
            bc = cdr(bc)?;
        }
        let mut bc = bindings;
        while !bc.is_nil() {
            let binding = car(bc)?;
            let name = car(binding)?;
            let val = self.eval(car(cdr(binding)?)?)?;
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(name, val);
            }
            bc = cdr(bc)?;
        }
        self.eval(body)
    }

    /// Evaluate every element of a list, left to right.
    pub(crate) fn eval_list(&mut self, x: Value) -> Result<Value> {
        if x.is_nil() {
            return Ok(NIL);
        }
        let head = self.eval(car(x)?)?;
        let tail = self.eval_list(cdr(x)?)?;
        self.cons(head, tail)
    }

    /// Apply a callable value to an already-evaluated argument list.
    /// This is the host-facing `apply`; the evaluator funnels every
    /// call through it.
    pub fn apply(&mut self, f: Value, args: Value) -> Result<Value> {
        match f.value_type() {
            ValueType::Extern => {
                let idx = self.native_index(f).ok_or(Error::type_mismatch(
                    ValueType::Closure,
                    ValueType::Extern,
                    "extern in call position is not a registered function",
                ))?;
                let (func, data) = {
                    let entry = self.natives.get(idx).ok_or(Error::type_mismatch(
                        ValueType::Closure,
                        ValueType::Extern,
                        "extern in call position is not a registered function",
                    ))?;
                    (entry.f, entry.data)
                };
                func(self, args, data)
            }
            ValueType::Closure => self.call_closure(f, args),
            other => Err(Error::type_mismatch(
                ValueType::Closure,
                other,
                "expected a function in call position",
            )),
        }
    }

    fn call_closure(&mut self, closure: Value, args: Value) -> Result<Value> {
        // Safety: closure words address a live two-word cell holding
        // (function index, capture frame address).
        let (w0, w1) = unsafe { cell_words(closure) };
        let fn_idx = (w0 >> 4) as usize;
        let frame = FrameRef::from_addr((w1 >> 4) as usize);
        let (params, rest, body) = {
            let f = &self.functions[fn_idx];
            (f.params.clone(), f.rest, f.body)
        };

        let mut param_scope = HashMap::new();
        let mut cur = args;
        for (i, &p) in params.iter().enumerate() {
            if cur.is_nil() {
                return Err(Error::ArgumentCount { expected: params.len(), given: i });
            }
            param_scope.insert(p, car(cur)?);
            cur = cdr(cur)?;
        }
        if let Some(r) = rest {
            param_scope.insert(r, cur);
        }

        // Push the captured frame as a scope, then the parameters.
        let mut capture_scope = HashMap::with_capacity(frame.len());
        for i in 0..frame.len() {
            capture_scope.insert(frame.name_at(i), frame.value_at(i));
        }
        self.scopes.push(capture_scope);
        self.scopes.push(param_scope);

        let result = self.eval(body);

        self.scopes.pop();
        let capture_scope = self.scopes.pop().unwrap_or_default();
        // Reconcile so in-body set! on captured names is visible to the
        // next call. Frames never grow, so only names that existed in
        // the capture at call time can be written back.
        for (name, val) in capture_scope {
            frame.set(name, val);
        }
        result
    }

    /// Build a closure for `(params body)`: create or reuse the function
    /// descriptor, compute the free-variable set of the body, copy the
    /// current value of each free name into a fresh frame, and pack the
    /// (function, frame) cell.
    pub(crate) fn make_closure(
        &mut self,
        param_list: Value,
        body: Value,
        self_name: Option<Value>,
    ) -> Result<Value> {
        let fn_idx = self.create_function(param_list, body)?;

        let mut bound: HashSet<Value> = self.reserved.clone();
        {
            let f = &self.functions[fn_idx];
            bound.extend(f.params.iter().copied());
            if let Some(r) = f.rest {
                bound.insert(r);
            }
        }
        if let Some(n) = self_name {
            bound.insert(n);
        }

        let mut free = BTreeSet::new();
        self.compute_free(body, &bound, &mut free)?;

        // Names unbound at capture time are skipped; they resolve through
        // the live scope chain when the body runs.
        let mut entries = Vec::with_capacity(free.len() + 1);
        for &name in &free {
            if let Some(v) = self.try_look_up(name) {
                entries.push((name, v));
            }
        }
        if let Some(n) = self_name {
            entries.push((n, NIL));
        }

        let frame = FrameRef::alloc(&self.heap, &entries)?;
        let closure = self.heap.alloc_cell(
            ((fn_idx as u64) << 4) | ValueType::Extern as u64,
            ((frame.addr() as u64) << 4) | ValueType::Extern as u64,
            ValueType::Closure,
        )?;
        if let Some(n) = self_name {
            frame.set(n, closure);
        }
        Ok(closure)
    }

    /// Walk `v` collecting symbols referenced but not locally bound.
    /// Binding forms extend the bound set; quote suppresses the walk;
    /// quasiquote is entered only through unquote operands.
    fn compute_free(
        &self,
        v: Value,
        bound: &HashSet<Value>,
        free: &mut BTreeSet<Value>,
    ) -> Result<()> {
        match v.value_type() {
            ValueType::Symbol => {
                if !bound.contains(&v) {
                    free.insert(v);
                }
                Ok(())
            }
            ValueType::Pair => {
                let head = car(v)?;
                if head == self.syms.quote {
                    Ok(())
                } else if head == self.syms.lambda {
                    let params = car(cdr(v)?)?;
                    let body = car(cdr(cdr(v)?)?)?;
                    let (ps, rest) = self.parse_params(params)?;
                    let mut inner = bound.clone();
                    inner.extend(ps);
                    if let Some(r) = rest {
                        inner.insert(r);
                    }
                    self.compute_free(body, &inner, free)
                } else if head == self.syms.define
                    && car(cdr(v)?)?.value_type() == ValueType::Pair
                {
                    // Only the define-signature form injects bindings;
                    // a bare-symbol define walks like any other form.
                    let target = car(cdr(v)?)?;
                    let expr = car(cdr(cdr(v)?)?)?;
                    let name = car(target)?;
                    let (ps, rest) = self.parse_params(cdr(target)?)?;
                    let mut inner = bound.clone();
                    inner.insert(name);
                    inner.extend(ps);
                    if let Some(r) = rest {
                        inner.insert(r);
                    }
                    self.compute_free(expr, &inner, free)
                } else if head == self.syms.let_
                    || head == self.syms.let_seq
                    || head == self.syms.let_rec
                {
                    self.compute_free_let(head, v, bound, free)
                } else if head == self.syms.quasiquote {
                    self.scan_quasiquote_free(car(cdr(v)?)?, bound, free)
                } else {
                    let mut cur = v;
                    while cur.value_type() == ValueType::Pair {
                        self.compute_free(car(cur)?, bound, free)?;
                        cur = cdr(cur)?;
                    }
                    // A dotted tail is a reference like any other.
                    if cur.value_type() == ValueType::Symbol && !bound.contains(&cur) {
                        free.insert(cur);
                    }
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    fn compute_free_let(
        &self,
        head: Value,
        v: Value,
        bound: &HashSet<Value>,
        free: &mut BTreeSet<Value>,
    ) -> Result<()> {
        let bindings = car(cdr(v)?)?;
        let body = car(cdr(cdr(v)?)?)?;

        let mut names = Vec::new();
        let mut exprs = Vec::new();
        let mut bc = bindings;
        while !bc.is_nil() {
            let binding = car(bc)?;
            names.push(car(binding)?);
            exprs.push(car(cdr(binding)?)?);
            bc = cdr(bc)?;
        }

        let mut all = bound.clone();
        all.extend(names.iter().copied());

        if head == self.syms.let_rec {
            // Every right-hand side sees every binding.
            for &e in &exprs {
                self.compute_free(e, &all, free)?;
            }
        } else if head == self.syms.let_seq {
            // Each right-hand side sees the bindings before it.
            let mut inner = bound.clone();
            for (i, &e) in exprs.iter().enumerate() {
                self.compute_free(e, &inner, free)?;
                inner.insert(names[i]);
            }
        } else {
            // Simultaneous: right-hand sides see only the outer scope.
            for &e in &exprs {
                self.compute_free(e, bound, free)?;
            }
        }
        self.compute_free(body, &all, free)
    }

    fn scan_quasiquote_free(
        &self,
        template: Value,
        bound: &HashSet<Value>,
        free: &mut BTreeSet<Value>,
    ) -> Result<()> {
        if template.value_type() != ValueType::Pair {
            return Ok(());
        }
        let head = car(template)?;
        if head == self.syms.unquote || head == self.syms.unquote_splicing {
            // Only unquote operands are evaluated; everything around
            // them is template text.
            return self.compute_free(car(cdr(template)?)?, bound, free);
        }
        let mut cur = template;
        while cur.value_type() == ValueType::Pair {
            self.scan_quasiquote_free(car(cur)?, bound, free)?;
            cur = cdr(cur)?;
        }
        Ok(())
    }

    /// Copy a quasiquote template, substituting unquote results and
    /// splicing unquote-splicing lists.
    fn apply_quasiquote(&mut self, s: Value) -> Result<Value> {
        if s.value_type() != ValueType::Pair {
            return Ok(s);
        }
        let head = car(s)?;
        if head == self.syms.unquote {
            return self.eval(car(cdr(s)?)?);
        }
        if head.value_type() == ValueType::Pair && car(head)? == self.syms.unquote_splicing {
            let list = self.eval(car(cdr(head)?)?)?;
            let rest = self.apply_quasiquote(cdr(s)?)?;
            if list.is_nil() {
                return Ok(rest);
            }
            check_type(list, ValueType::Pair, "unquote-splicing expression must yield a list")?;
            let mut end = list;
            while cdr(end)?.value_type() == ValueType::Pair {
                end = cdr(end)?;
            }
            set_cdr(end, rest)?;
            return Ok(list);
        }
        let a = self.apply_quasiquote(head)?;
        let d = self.apply_quasiquote(cdr(s)?)?;
        self.cons(a, d)
    }
}
