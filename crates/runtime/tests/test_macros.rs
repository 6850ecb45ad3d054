//! Macro expander integration tests

use tarn_runtime::{Error, NIL, Runtime, RuntimeOptions, Value};

fn rt() -> Runtime {
    Runtime::new(RuntimeOptions { heap_size: 1024 * 1024, load_stdlib: true }).unwrap()
}

#[test]
fn when_expands_to_an_if_form() {
    let mut rt = rt();
    let form = rt.read("(when #t 42)").unwrap();
    let expanded = rt.expand(form).unwrap();
    assert_eq!(rt.write_value(expanded), "(if #t (begin 42) #n)");
    assert_eq!(rt.eval(expanded).unwrap(), Value::from_int(42));
}

#[test]
fn when_and_unless_evaluate() {
    let mut rt = rt();
    assert_eq!(rt.load_source("(when #t 1 2 3)").unwrap(), Value::from_int(3));
    assert_eq!(rt.load_source("(when #f 1 2 3)").unwrap(), NIL);
    assert_eq!(rt.load_source("(unless #f 7)").unwrap(), Value::from_int(7));
    assert_eq!(rt.load_source("(unless #t 7)").unwrap(), NIL);
}

#[test]
fn defmacro_installs_and_returns_nil() {
    let mut rt = rt();
    let form = rt.read("(defmacro (twice x) `(+ ,x ,x))").unwrap();
    assert_eq!(rt.expand(form).unwrap(), NIL);
    assert_eq!(rt.load_source("(twice 21)").unwrap(), Value::from_int(42));
}

#[test]
fn macro_results_are_expanded_again() {
    let mut rt = rt();
    rt.load_source("(defmacro (w x) `(when #t ,x))").unwrap();
    assert_eq!(rt.load_source("(w 5)").unwrap(), Value::from_int(5));
}

#[test]
fn variadic_macro_binds_the_whole_tail() {
    let mut rt = rt();
    rt.load_source("(defmacro (as-list . forms) `(quote ,forms))").unwrap();
    let v = rt.load_source("(as-list a b c)").unwrap();
    assert_eq!(rt.write_value(v), "(a b c)");
}

#[test]
fn gensym_keeps_macro_temporaries_out_of_user_scope() {
    let mut rt = rt();
    rt.load_source(
        "(defmacro (swap! a b)
           (let ([tmp (unique-symbol tmp)])
             `(let ([,tmp ,a])
                (begin (set! ,a ,b) (set! ,b ,tmp)))))",
    )
    .unwrap();
    rt.load_source("(define x 1) (define y 2) (swap! x y)").unwrap();
    assert_eq!(rt.load_source("x").unwrap(), Value::from_int(2));
    assert_eq!(rt.load_source("y").unwrap(), Value::from_int(1));

    // The macro still works on a binding literally named like the
    // temporary would be without unique-symbol.
    rt.load_source("(define tmp 10) (define z 20) (swap! tmp z)").unwrap();
    assert_eq!(rt.load_source("tmp").unwrap(), Value::from_int(20));
    assert_eq!(rt.load_source("z").unwrap(), Value::from_int(10));
}

#[test]
fn macro_error_head_aborts_expansion() {
    let mut rt = rt();
    let form = rt.read("(macro-expand-error \"boom\")").unwrap();
    match rt.expand(form) {
        Err(Error::MacroExpand(msg)) => assert_eq!(msg, "boom"),
        other => panic!("expected macro-expand error, got {other:?}"),
    }
}

#[test]
fn evaluator_refuses_defmacro() {
    let mut rt = rt();
    let form = rt.read("(defmacro (m x) x)").unwrap();
    match rt.eval(form) {
        Err(Error::InvalidSyntax(_)) => {}
        other => panic!("defmacro must not evaluate, got {other:?}"),
    }
}

#[test]
fn expansion_recurses_into_subforms() {
    let mut rt = rt();
    rt.load_source("(defmacro (two) 2)").unwrap();
    let v = rt.load_source("(+ (two) (two) (* (two) 3))").unwrap();
    assert_eq!(v, Value::from_int(10));
}

#[test]
fn macro_agrees_with_direct_substitution() {
    let mut rt = rt();
    rt.load_source("(defmacro (add-squares a b) `(+ (* ,a ,a) (* ,b ,b)))").unwrap();
    let via_macro = rt.load_source("(add-squares 3 4)").unwrap();
    let direct = rt.load_source("(+ (* 3 3) (* 4 4))").unwrap();
    assert_eq!(via_macro, direct);
    assert_eq!(via_macro, Value::from_int(25));
}
