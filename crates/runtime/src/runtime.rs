//! The Runtime Aggregate
//!
//! One `Runtime` owns everything a script can reach: the current arena,
//! the interned symbol table, the function-descriptor table, the macro
//! map, the scope stack, the native-function registry, the owned-extern
//! set, and the value-handle table. Runtimes are single-threaded and
//! independent; two runtimes in one process never share state.
//!
//! Construction interns the special-form symbols, installs the intrinsic
//! natives into the root scope, and (by default) loads the embedded
//! standard library.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use tarn_core::heap::owned_header;
use tarn_core::{Error, Heap, NIL, Result, Value, ValueType, car, cdr, check_type};

use crate::config::RuntimeOptions;
use crate::externs::NativeEntry;
use crate::handles::HandleTable;
use crate::stdlib;

/// A function descriptor: the parameter shape and body of a lambda.
///
/// Descriptors are deduplicated by body identity plus parameter shape,
/// so every closure built from the same syntactic location shares one
/// descriptor.
#[derive(Debug, Clone)]
pub struct Function {
    /// Fixed parameter symbols, bound positionally.
    pub params: Vec<Value>,
    /// Rest parameter symbol, bound to the remaining argument list.
    /// `(... xs)` and a dotted tail both produce one of these.
    pub rest: Option<Value>,
    pub body: Value,
}

/// Interned symbols the evaluator, expander, and reader dispatch on.
#[derive(Clone, Copy)]
pub(crate) struct Syms {
    pub quote: Value,
    pub quasiquote: Value,
    pub unquote: Value,
    pub unquote_splicing: Value,
    pub lambda: Value,
    pub if_: Value,
    pub set: Value,
    pub define: Value,
    pub defmacro: Value,
    pub let_: Value,
    pub let_seq: Value,
    pub let_rec: Value,
    pub unique_symbol: Value,
    pub ellipsis: Value,
    pub macro_error: Value,
}

/// An embeddable Lisp interpreter instance.
pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) heap_budget: usize,
    /// Append-only interned names. Symbol words index into this vector;
    /// entries never move and never disappear.
    pub(crate) symbols: Vec<String>,
    /// Interning index. Uniquified symbols are deliberately absent here,
    /// so they can never be returned by a later `symbol` call.
    pub(crate) symbol_ids: HashMap<String, usize>,
    pub(crate) functions: Vec<Function>,
    /// Macro name → function-descriptor index. Populated by the expander.
    pub(crate) macros: HashMap<Value, usize>,
    /// The scope stack; index 0 is the root scope. Keys are symbol words.
    pub(crate) scopes: Vec<HashMap<Value, Value>>,
    pub(crate) natives: Vec<NativeEntry>,
    /// Payload addresses of live foreign-owned blocks in the current arena.
    pub(crate) owned_externs: HashSet<usize>,
    /// Slots the host retains across collections, shared with the handles.
    pub(crate) handles: Rc<RefCell<HandleTable>>,
    pub(crate) syms: Syms,
    /// Symbols excluded from free-variable capture.
    pub(crate) reserved: HashSet<Value>,
}

impl Runtime {
    /// Build a runtime from explicit options. Fails only if the standard
    /// library cannot be loaded into the requested heap budget.
    pub fn new(options: RuntimeOptions) -> Result<Runtime> {
        let heap = Heap::new(options.heap_size);
        let mut rt = Runtime {
            heap,
            heap_budget: options.heap_size,
            symbols: Vec::new(),
            symbol_ids: HashMap::new(),
            functions: Vec::new(),
            macros: HashMap::new(),
            scopes: vec![HashMap::new()],
            natives: Vec::new(),
            owned_externs: HashSet::new(),
            handles: Rc::new(RefCell::new(HandleTable::new())),
            syms: Syms {
                quote: NIL,
                quasiquote: NIL,
                unquote: NIL,
                unquote_splicing: NIL,
                lambda: NIL,
                if_: NIL,
                set: NIL,
                define: NIL,
                defmacro: NIL,
                let_: NIL,
                let_seq: NIL,
                let_rec: NIL,
                unique_symbol: NIL,
                ellipsis: NIL,
                macro_error: NIL,
            },
            reserved: HashSet::new(),
        };

        rt.syms.quote = rt.symbol("quote");
        rt.syms.quasiquote = rt.symbol("quasiquote");
        rt.syms.unquote = rt.symbol("unquote");
        rt.syms.unquote_splicing = rt.symbol("unquote-splicing");
        rt.syms.lambda = rt.symbol("lambda");
        rt.syms.if_ = rt.symbol("if");
        rt.syms.set = rt.symbol("set!");
        rt.syms.define = rt.symbol("define");
        rt.syms.defmacro = rt.symbol("defmacro");
        rt.syms.let_ = rt.symbol("let");
        rt.syms.let_seq = rt.symbol("let*");
        rt.syms.let_rec = rt.symbol("letrec");
        rt.syms.unique_symbol = rt.symbol("unique-symbol");
        rt.syms.ellipsis = rt.symbol("...");
        rt.syms.macro_error = rt.symbol("macro-expand-error");

        rt.reserved = [
            rt.syms.quote,
            rt.syms.quasiquote,
            rt.syms.unquote,
            rt.syms.unquote_splicing,
            rt.syms.lambda,
            rt.syms.if_,
            rt.syms.set,
            rt.syms.define,
            rt.syms.defmacro,
            rt.syms.let_,
            rt.syms.let_seq,
            rt.syms.let_rec,
            rt.syms.unique_symbol,
            rt.syms.ellipsis,
        ]
        .into_iter()
        .collect();

        rt.define_intrinsics()?;

        if options.load_stdlib {
            rt.load_source(stdlib::PRELUDE)?;
        }

        debug!(
            heap_budget = options.heap_size,
            stdlib = options.load_stdlib,
            symbols = rt.symbols.len(),
            "runtime constructed"
        );
        Ok(rt)
    }

    /// A runtime with the default heap budget and the standard library.
    pub fn with_defaults() -> Result<Runtime> {
        Runtime::new(RuntimeOptions::default())
    }

    /// Read, expand, and evaluate every top-level form in `src`.
    /// Returns the value of the last form.
    pub fn load_source(&mut self, src: &str) -> Result<Value> {
        let forms = self.read_all(src)?;
        let forms = self.expand(forms)?;
        let mut cur = forms;
        let mut last = NIL;
        while !cur.is_nil() {
            last = self.eval(car(cur)?)?;
            cur = cdr(cur)?;
        }
        Ok(last)
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    /// Intern a name. Equal spellings yield equal symbol words; indices
    /// are assigned monotonically and never reused.
    pub fn symbol(&mut self, name: &str) -> Value {
        if let Some(&i) = self.symbol_ids.get(name) {
            return Value::from_symbol_index(i);
        }
        let i = self.symbols.len();
        self.symbols.push(name.to_string());
        self.symbol_ids.insert(name.to_string(), i);
        Value::from_symbol_index(i)
    }

    /// The spelling of a symbol.
    pub fn symbol_name(&self, sym: Value) -> Result<&str> {
        check_type(sym, ValueType::Symbol, "expected a symbol")?;
        Ok(&self.symbols[sym.symbol_index_unchecked()])
    }

    /// A fresh symbol with the same spelling as `sym` but a new identity:
    /// the spelling is appended at a new index without touching the
    /// interning map, so the result is equal to no other symbol.
    pub fn unique_symbol(&mut self, sym: Value) -> Result<Value> {
        check_type(sym, ValueType::Symbol, "unique-symbol expects a symbol")?;
        let spelling = self.symbols[sym.symbol_index_unchecked()].clone();
        let i = self.symbols.len();
        self.symbols.push(spelling);
        Ok(Value::from_symbol_index(i))
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a pair.
    pub fn cons(&self, car: Value, cdr: Value) -> Result<Value> {
        self.heap.alloc_cell(car.bits(), cdr.bits(), ValueType::Pair)
    }

    /// Allocate a string value.
    pub fn make_string(&self, s: &str) -> Result<Value> {
        self.heap.alloc_str(s)
    }

    /// Allocate a float vector.
    pub fn make_fvec(&self, data: &[f32]) -> Result<Value> {
        self.heap.alloc_fvec(data)
    }

    /// Build a proper list from a slice, front to back.
    pub fn make_list(&self, items: &[Value]) -> Result<Value> {
        let mut tail = NIL;
        for &item in items.iter().rev() {
            tail = self.cons(item, tail)?;
        }
        Ok(tail)
    }

    /// The payload of a string value.
    pub fn string_contents(&self, v: Value) -> Result<&str> {
        check_type(v, ValueType::Str, "expected a string")?;
        // Safety: string payloads are written from `&str` only, so the
        // bytes are valid UTF-8; the value addresses the current arena.
        unsafe { Ok(std::str::from_utf8_unchecked(tarn_core::heap::str_bytes(v))) }
    }

    /// The payload of a float vector.
    pub fn fvec_contents(&self, v: Value) -> Result<&[f32]> {
        check_type(v, ValueType::FVec, "expected a float vector")?;
        // Safety: the value addresses a live length-prefixed f32 run.
        unsafe { Ok(tarn_core::heap::fvec_slice(v)) }
    }

    // =========================================================================
    // Scopes and globals
    // =========================================================================

    /// Bind a name in the root scope.
    pub fn define_global(&mut self, name: &str, val: Value) {
        let sym = self.symbol(name);
        self.scopes[0].insert(sym, val);
    }

    /// Search the scope stack innermost-out.
    pub(crate) fn try_look_up(&self, name: Value) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(&v) = scope.get(&name) {
                return Some(v);
            }
        }
        None
    }

    pub(crate) fn look_up(&self, name: Value) -> Result<Value> {
        self.try_look_up(name).ok_or_else(|| {
            Error::UnboundName(
                self.symbol_name(name).map(str::to_string).unwrap_or_else(|_| format!("{name:?}")),
            )
        })
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Create or reuse a function descriptor for `(params body)`.
    /// Descriptors are deduplicated by body identity, which makes every
    /// closure built at one syntactic location share a descriptor. The
    /// parameter shape participates in the key: an immediate body like a
    /// bare symbol or constant can be word-equal across unrelated
    /// lambdas with different parameters.
    pub(crate) fn create_function(&mut self, param_list: Value, body: Value) -> Result<usize> {
        let (params, rest) = self.parse_params(param_list)?;
        if let Some(i) = self
            .functions
            .iter()
            .position(|f| f.body == body && f.params == params && f.rest == rest)
        {
            return Ok(i);
        }
        self.functions.push(Function { params, rest, body });
        Ok(self.functions.len() - 1)
    }

    /// Decompose a parameter list into fixed names and an optional rest
    /// name. Accepted shapes:
    ///
    /// - `(a b c)`: fixed only
    /// - `(... xs)`: one name bound to the entire argument list
    /// - `(a b . rest)`: fixed, then a dotted rest name
    pub(crate) fn parse_params(&self, param_list: Value) -> Result<(Vec<Value>, Option<Value>)> {
        if param_list.value_type() == ValueType::Pair && car(param_list)? == self.syms.ellipsis {
            let rest = car(cdr(param_list)?)?;
            check_type(rest, ValueType::Symbol, "variadic parameter must be a symbol")?;
            return Ok((Vec::new(), Some(rest)));
        }
        let mut params = Vec::new();
        let mut cur = param_list;
        while cur.value_type() == ValueType::Pair {
            let p = car(cur)?;
            check_type(p, ValueType::Symbol, "parameter names must be symbols")?;
            params.push(p);
            cur = cdr(cur)?;
        }
        let rest = match cur.value_type() {
            ValueType::Nil => None,
            ValueType::Symbol => Some(cur),
            _ => {
                return Err(Error::InvalidSyntax(
                    "parameter list must end in a symbol or nothing".into(),
                ));
            }
        };
        Ok((params, rest))
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Every still-owned foreign block gets its destructor before the
        // arena is released.
        for &payload in &self.owned_externs {
            // Safety: the set only holds payload addresses of live owned
            // blocks in the current arena; each runs its destructor once.
            unsafe {
                let header = owned_header(payload);
                ((*header).drop_fn)(payload as *mut u8);
            }
        }
        self.owned_externs.clear();
    }
}
