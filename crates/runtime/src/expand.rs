//! Macro Expander
//!
//! A source-to-source pass over the value graph, run before evaluation.
//! `defmacro` forms are consumed here: the parameter list and body are
//! recorded in the macro map and the form is replaced by nil. Any other
//! pair whose head names a macro is rewritten: the parameters are bound
//! to the unevaluated argument forms, the macro body is evaluated in
//! that scope, and the result is itself expanded. Everything else is
//! expanded in place, car first, cdr next.
//!
//! Hygiene is by convention: macros that introduce bindings are expected
//! to request fresh names with `unique-symbol`.

use std::collections::HashMap;

use tracing::trace;

use tarn_core::{Error, NIL, Result, Value, ValueType, car, cdr, check_type, set_car, set_cdr};

use crate::runtime::Runtime;

impl Runtime {
    /// Expand macros in `v`, returning the rewritten graph. The input is
    /// rewritten in place where possible; the returned value must still
    /// be used, since a macro invocation at the root replaces the whole
    /// form.
    pub fn expand(&mut self, v: Value) -> Result<Value> {
        if v.value_type() != ValueType::Pair {
            return Ok(v);
        }
        let head = car(v)?;

        if head == self.syms.defmacro {
            // (defmacro (name . params) body)
            let sig = car(cdr(v)?)?;
            check_type(sig, ValueType::Pair, "defmacro expects a (name . params) signature")?;
            let name = car(sig)?;
            check_type(name, ValueType::Symbol, "macro name must be a symbol")?;
            let body = car(cdr(cdr(v)?)?)?;
            let fn_idx = self.create_function(cdr(sig)?, body)?;
            self.macros.insert(name, fn_idx);
            if let Ok(spelling) = self.symbol_name(name) {
                trace!(macro_name = spelling, "macro installed");
            }
            return Ok(NIL);
        }

        if head == self.syms.macro_error {
            // Explicit abort head: surfaces the operand as the message.
            let operand = car(cdr(v)?)?;
            let msg = match self.string_contents(operand) {
                Ok(s) => s.to_string(),
                Err(_) => self.write_value(operand),
            };
            return Err(Error::MacroExpand(msg));
        }

        if head.value_type() == ValueType::Symbol
            && let Some(&fn_idx) = self.macros.get(&head)
        {
            let substituted = self.invoke_macro(fn_idx, cdr(v)?)?;
            return self.expand(substituted);
        }

        let new_car = self.expand(car(v)?)?;
        set_car(v, new_car)?;
        let new_cdr = self.expand(cdr(v)?)?;
        set_cdr(v, new_cdr)?;
        Ok(v)
    }

    /// Bind macro parameters to the unevaluated argument forms and
    /// evaluate the macro body in that scope.
    fn invoke_macro(&mut self, fn_idx: usize, args: Value) -> Result<Value> {
        let (params, rest, body) = {
            let f = &self.functions[fn_idx];
            (f.params.clone(), f.rest, f.body)
        };

        let mut scope = HashMap::new();
        let mut cur = args;
        for &p in &params {
            if cur.is_nil() {
                // Missing arguments are simply left unbound; the body
                // raises unbound-name if it actually touches them.
                break;
            }
            scope.insert(p, car(cur)?);
            cur = cdr(cur)?;
        }
        if let Some(r) = rest {
            scope.insert(r, cur);
        }

        self.scopes.push(scope);
        let result = self.eval(body);
        self.scopes.pop();
        result
    }
}
