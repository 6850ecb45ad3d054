//! Intrinsic Natives
//!
//! The built-in functions installed into every runtime's root scope.
//! These are ordinary registered natives: pair constructors and
//! accessors, type predicates, variadic arithmetic, comparisons, bit
//! operations, float math, string/symbol conversion, and the float
//! vector accessors. `begin` and `list` live here too; arguments reach
//! a native already evaluated left-to-right, which is all either needs.

use tarn_core::{
    Error, FALSE, NIL, Result, TRUE, Value, ValueType, car, cdr, check_type, set_car, set_cdr,
};

use crate::runtime::Runtime;

fn arg0(args: Value) -> Result<Value> {
    car(args)
}

fn arg1(args: Value) -> Result<Value> {
    car(cdr(args)?)
}

fn arg2(args: Value) -> Result<Value> {
    car(cdr(cdr(args)?)?)
}

/// Fold a variadic numeric argument list. The first argument picks the
/// int or float path; mixing raises a type mismatch.
fn numeric_fold(
    args: Value,
    int_op: fn(i64, i64) -> Result<i64>,
    float_op: fn(f32, f32) -> f32,
) -> Result<Value> {
    let first = arg0(args)?;
    match first.value_type() {
        ValueType::Int => {
            let mut acc = first.as_int_unchecked();
            let mut cur = cdr(args)?;
            while !cur.is_nil() {
                acc = int_op(acc, car(cur)?.as_int()?)?;
                cur = cdr(cur)?;
            }
            Ok(Value::from_int(acc))
        }
        ValueType::Float => {
            let mut acc = first.as_float_unchecked();
            let mut cur = cdr(args)?;
            while !cur.is_nil() {
                acc = float_op(acc, car(cur)?.as_float()?);
                cur = cdr(cur)?;
            }
            Ok(Value::from_float(acc))
        }
        other => Err(Error::type_mismatch(ValueType::Int, other, "arithmetic expects numbers")),
    }
}

/// Fold a variadic integer argument list (bit operations).
fn int_fold(args: Value, op: fn(i64, i64) -> i64) -> Result<Value> {
    let mut acc = arg0(args)?.as_int()?;
    let mut cur = cdr(args)?;
    while !cur.is_nil() {
        acc = op(acc, car(cur)?.as_int()?);
        cur = cdr(cur)?;
    }
    Ok(Value::from_int(acc))
}

/// Chain a comparison across adjacent argument pairs.
fn compare_fold(
    args: Value,
    int_cmp: fn(&i64, &i64) -> bool,
    float_cmp: fn(&f32, &f32) -> bool,
) -> Result<Value> {
    if args.is_nil() {
        return Ok(TRUE);
    }
    let mut prev = arg0(args)?;
    let mut cur = cdr(args)?;
    while !cur.is_nil() {
        let next = car(cur)?;
        let ok = match prev.value_type() {
            ValueType::Int => int_cmp(&prev.as_int_unchecked(), &next.as_int()?),
            ValueType::Float => float_cmp(&prev.as_float_unchecked(), &next.as_float()?),
            other => {
                return Err(Error::type_mismatch(ValueType::Int, other, "comparison expects numbers"));
            }
        };
        if !ok {
            return Ok(FALSE);
        }
        prev = next;
        cur = cdr(cur)?;
    }
    Ok(TRUE)
}

fn float_unary(args: Value, f: fn(f32) -> f32) -> Result<Value> {
    Ok(Value::from_float(f(arg0(args)?.as_float()?)))
}

fn type_predicate(args: Value, t: ValueType) -> Result<Value> {
    Ok(Value::from_bool(arg0(args)?.value_type() == t))
}

fn fvec_index(v: Value, i: Value) -> Result<usize> {
    check_type(v, ValueType::FVec, "expected a float vector")?;
    let i = i.as_int()?;
    // Safety: fvec-tagged values address a live length-prefixed run.
    let len = unsafe { tarn_core::heap::fvec_slice(v).len() };
    if i < 0 || i as usize >= len {
        return Err(Error::Arithmetic("fvec index out of bounds"));
    }
    Ok(i as usize)
}

impl Runtime {
    pub(crate) fn define_intrinsics(&mut self) -> Result<()> {
        self.define_fn("cons", |rt, args, _| rt.cons(arg0(args)?, arg1(args)?))?;
        self.define_fn("car", |_, args, _| car(arg0(args)?))?;
        self.define_fn("cdr", |_, args, _| cdr(arg0(args)?))?;
        self.define_fn("set-car!", |_, args, _| {
            set_car(arg0(args)?, arg1(args)?)?;
            Ok(NIL)
        })?;
        self.define_fn("set-cdr!", |_, args, _| {
            set_cdr(arg0(args)?, arg1(args)?)?;
            Ok(NIL)
        })?;

        self.define_fn("eq?", |_, args, _| Ok(Value::from_bool(arg0(args)? == arg1(args)?)))?;

        self.define_fn("nil?", |_, args, _| type_predicate(args, ValueType::Nil))?;
        self.define_fn("bool?", |_, args, _| type_predicate(args, ValueType::Bool))?;
        self.define_fn("int?", |_, args, _| type_predicate(args, ValueType::Int))?;
        self.define_fn("float?", |_, args, _| type_predicate(args, ValueType::Float))?;
        self.define_fn("str?", |_, args, _| type_predicate(args, ValueType::Str))?;
        self.define_fn("sym?", |_, args, _| type_predicate(args, ValueType::Symbol))?;
        self.define_fn("cons?", |_, args, _| type_predicate(args, ValueType::Pair))?;
        self.define_fn("proc?", |_, args, _| type_predicate(args, ValueType::Closure))?;
        self.define_fn("fvec?", |_, args, _| type_predicate(args, ValueType::FVec))?;

        self.define_fn("not", |_, args, _| {
            Ok(if arg0(args)? == FALSE { TRUE } else { FALSE })
        })?;

        self.define_fn("+", |_, args, _| {
            numeric_fold(args, |a, b| Ok(a.wrapping_add(b)), |a, b| a + b)
        })?;
        self.define_fn("-", |_, args, _| {
            numeric_fold(args, |a, b| Ok(a.wrapping_sub(b)), |a, b| a - b)
        })?;
        self.define_fn("*", |_, args, _| {
            numeric_fold(args, |a, b| Ok(a.wrapping_mul(b)), |a, b| a * b)
        })?;
        self.define_fn("/", |_, args, _| {
            numeric_fold(
                args,
                |a, b| {
                    if b == 0 {
                        Err(Error::Arithmetic("division by zero"))
                    } else {
                        Ok(a.wrapping_div(b))
                    }
                },
                |a, b| a / b,
            )
        })?;

        self.define_fn("<", |_, args, _| compare_fold(args, i64::lt, f32::lt))?;
        self.define_fn("<=", |_, args, _| compare_fold(args, i64::le, f32::le))?;
        self.define_fn(">", |_, args, _| compare_fold(args, i64::gt, f32::gt))?;
        self.define_fn(">=", |_, args, _| compare_fold(args, i64::ge, f32::ge))?;

        self.define_fn("bit&", |_, args, _| int_fold(args, |a, b| a & b))?;
        self.define_fn("bit|", |_, args, _| int_fold(args, |a, b| a | b))?;
        self.define_fn("bit^", |_, args, _| int_fold(args, |a, b| a ^ b))?;
        self.define_fn("bit-lsh", |_, args, _| {
            int_fold(args, |a, b| a.wrapping_shl(b as u32))
        })?;
        self.define_fn("bit-rsh", |_, args, _| {
            int_fold(args, |a, b| a.wrapping_shr(b as u32))
        })?;

        self.define_fn("sin", |_, args, _| float_unary(args, f32::sin))?;
        self.define_fn("cos", |_, args, _| float_unary(args, f32::cos))?;
        self.define_fn("tan", |_, args, _| float_unary(args, f32::tan))?;
        self.define_fn("exp", |_, args, _| float_unary(args, f32::exp))?;
        self.define_fn("ln", |_, args, _| float_unary(args, f32::ln))?;
        self.define_fn("sqrt", |_, args, _| float_unary(args, f32::sqrt))?;
        self.define_fn("pow", |_, args, _| {
            let base = arg0(args)?.as_float()?;
            let exp = arg1(args)?.as_float()?;
            Ok(Value::from_float(base.powf(exp)))
        })?;

        self.define_fn("string-length", |rt, args, _| {
            Ok(Value::from_int(rt.string_contents(arg0(args)?)?.len() as i64))
        })?;
        self.define_fn("string->symbol", |rt, args, _| {
            let name = rt.string_contents(arg0(args)?)?.to_string();
            Ok(rt.symbol(&name))
        })?;
        self.define_fn("symbol->string", |rt, args, _| {
            let sym = arg0(args)?;
            let name = rt.symbol_name(sym)?;
            rt.make_string(name)
        })?;

        // Arguments arrive evaluated left-to-right, so begin only has to
        // return the last one.
        self.define_fn("begin", |_, args, _| {
            let mut last = NIL;
            let mut cur = args;
            while !cur.is_nil() {
                last = car(cur)?;
                cur = cdr(cur)?;
            }
            Ok(last)
        })?;
        self.define_fn("list", |_, args, _| Ok(args))?;

        self.define_fn("fvec-length", |rt, args, _| {
            Ok(Value::from_int(rt.fvec_contents(arg0(args)?)?.len() as i64))
        })?;
        self.define_fn("fvec-ref", |_, args, _| {
            let v = arg0(args)?;
            let i = fvec_index(v, arg1(args)?)?;
            // Safety: index checked against the live payload length.
            Ok(Value::from_float(unsafe { tarn_core::heap::fvec_slice(v)[i] }))
        })?;
        self.define_fn("fvec-set!", |_, args, _| {
            let v = arg0(args)?;
            let i = fvec_index(v, arg1(args)?)?;
            let f = arg2(args)?.as_float()?;
            // Safety: index checked against the live payload length.
            unsafe { tarn_core::heap::fvec_slice(v)[i] = f }
            Ok(NIL)
        })?;

        Ok(())
    }
}
