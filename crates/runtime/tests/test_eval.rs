//! Evaluator integration tests
//!
//! End-to-end read → expand → eval coverage: self-evaluation, pairs,
//! closures and capture, the let family, scope mutation, variadic
//! binding, quasiquotation, and the error contracts.

use tarn_runtime::{Error, NIL, Runtime, RuntimeOptions, TRUE, Value, ValueType, car, cdr};

fn rt() -> Runtime {
    Runtime::new(RuntimeOptions { heap_size: 1024 * 1024, load_stdlib: true }).unwrap()
}

fn eval_str(rt: &mut Runtime, src: &str) -> tarn_runtime::Result<Value> {
    rt.load_source(src)
}

fn eval_int(rt: &mut Runtime, src: &str) -> i64 {
    eval_str(rt, src).unwrap().as_int().unwrap()
}

#[test]
fn immediates_evaluate_to_themselves() {
    let mut rt = rt();
    for src in ["42", "-17", "2.5", "#t", "#f", "#n", "\"hello\"", "#v(1 2 3)"] {
        let parsed = rt.read(src).unwrap();
        let result = rt.eval(parsed).unwrap();
        assert_eq!(result, parsed, "{src} should evaluate to itself");
    }
}

#[test]
fn cons_car_cdr() {
    let mut rt = rt();
    let pair = eval_str(&mut rt, "(cons 1 2)").unwrap();
    assert_eq!(pair.value_type(), ValueType::Pair);
    assert_eq!(car(pair).unwrap(), Value::from_int(1));
    assert_eq!(cdr(pair).unwrap(), Value::from_int(2));

    rt.define_global("p", pair);
    assert_eq!(eval_int(&mut rt, "(car p)"), 1);
    assert_eq!(eval_int(&mut rt, "(cdr p)"), 2);
}

#[test]
fn closures_capture_their_environment() {
    let mut rt = rt();
    eval_str(&mut rt, "(define (f x) (lambda (y) (+ x y)))").unwrap();
    assert_eq!(eval_int(&mut rt, "((f 10) 5)"), 15);
}

#[test]
fn let_binds_simultaneously() {
    let mut rt = rt();
    assert_eq!(eval_int(&mut rt, "(let ([a 1] [b 2]) (+ a b))"), 3);
    assert_eq!(eval_int(&mut rt, "(let ([a 1]) (let ([a 2]) a))"), 2);
    // Simultaneous: the right-hand sides see the outer binding.
    assert_eq!(eval_int(&mut rt, "(let ([a 1]) (let ([a 2] [b a]) b))"), 1);
}

#[test]
fn let_star_binds_sequentially() {
    let mut rt = rt();
    assert_eq!(eval_int(&mut rt, "(let* ([a 1] [b (+ a 1)]) (+ a b))"), 3);
}

#[test]
fn letrec_supports_forward_definition() {
    let mut rt = rt();
    let src = "(letrec ([f (lambda (n) (+ n 1))]
                        [g (lambda (n) (f (+ n 2)))])
                 (g 1))";
    assert_eq!(eval_int(&mut rt, src), 4);
}

#[test]
fn let_rhs_free_names_are_captured() {
    let mut rt = rt();
    eval_str(&mut rt, "(define (make-adder x) (lambda () (let ([y x]) y)))").unwrap();
    eval_str(&mut rt, "(define f (make-adder 41))").unwrap();
    // make-adder's call frame is long gone; x must live in f's capture.
    assert_eq!(eval_int(&mut rt, "(f)"), 41);
}

#[test]
fn define_signature_supports_recursion() {
    let mut rt = rt();
    eval_str(&mut rt, "(define (fact n) (if (eq? n 0) 1 (* n (fact (- n 1)))))").unwrap();
    assert_eq!(eval_int(&mut rt, "(fact 6)"), 720);
}

#[test]
fn set_rebinds_the_innermost_match() {
    let mut rt = rt();
    eval_str(&mut rt, "(define x 1)").unwrap();
    assert_eq!(eval_int(&mut rt, "(let ([x 2]) (begin (set! x 3) x))"), 3);
    // The shadowed global is untouched.
    assert_eq!(eval_int(&mut rt, "x"), 1);
    // No match anywhere creates a binding in the innermost scope.
    eval_str(&mut rt, "(set! fresh 9)").unwrap();
    assert_eq!(eval_int(&mut rt, "fresh"), 9);
}

#[test]
fn closure_state_persists_across_calls() {
    let mut rt = rt();
    eval_str(
        &mut rt,
        "(define (make-counter c)
           (lambda (step) (begin (set! c (+ c step)) c)))
         (define tick (make-counter 0))",
    )
    .unwrap();
    assert_eq!(eval_int(&mut rt, "(tick 1)"), 1);
    assert_eq!(eval_int(&mut rt, "(tick 2)"), 3);
    assert_eq!(eval_int(&mut rt, "(tick 10)"), 13);
}

#[test]
fn call_locals_do_not_leak_into_the_capture() {
    let mut rt = rt();
    eval_str(&mut rt, "(define (f) (begin (define tmp 99) tmp))").unwrap();
    assert_eq!(eval_int(&mut rt, "(f)"), 99);
    match eval_str(&mut rt, "tmp") {
        Err(Error::UnboundName(name)) => assert_eq!(name, "tmp"),
        other => panic!("tmp should stay call-local, got {other:?}"),
    }
}

#[test]
fn variadic_parameter_shapes() {
    let mut rt = rt();
    eval_str(&mut rt, "(define all (lambda (... xs) xs))").unwrap();
    let v = eval_str(&mut rt, "(all 1 2 3)").unwrap();
    assert_eq!(rt.write_value(v), "(1 2 3)");

    eval_str(&mut rt, "(define tail (lambda (a . rest) rest))").unwrap();
    let v = eval_str(&mut rt, "(tail 1 2 3)").unwrap();
    assert_eq!(rt.write_value(v), "(2 3)");
    assert_eq!(eval_str(&mut rt, "(tail 1)").unwrap(), NIL);
}

#[test]
fn too_few_arguments_is_an_error() {
    let mut rt = rt();
    match eval_str(&mut rt, "((lambda (a b) a) 1)") {
        Err(Error::ArgumentCount { expected: 2, given: 1 }) => {}
        other => panic!("expected argument count mismatch, got {other:?}"),
    }
}

#[test]
fn unbound_names_are_reported_by_spelling() {
    let mut rt = rt();
    match eval_str(&mut rt, "definitely-not-bound") {
        Err(Error::UnboundName(name)) => assert_eq!(name, "definitely-not-bound"),
        other => panic!("expected unbound name, got {other:?}"),
    }
}

#[test]
fn if_only_false_is_false() {
    let mut rt = rt();
    assert_eq!(eval_int(&mut rt, "(if #t 1 2)"), 1);
    assert_eq!(eval_int(&mut rt, "(if #f 1 2)"), 2);
    // nil and 0 are not FALSE, so they select the consequent.
    assert_eq!(eval_int(&mut rt, "(if #n 1 2)"), 1);
    assert_eq!(eval_int(&mut rt, "(if 0 1 2)"), 1);
}

#[test]
fn malformed_special_forms_are_invalid_syntax() {
    let mut rt = rt();
    for src in ["(if #t 1)", "(quote)", "(lambda (x))", "(define)"] {
        match eval_str(&mut rt, src) {
            Err(Error::InvalidSyntax(_)) => {}
            other => panic!("{src} should be invalid syntax, got {other:?}"),
        }
    }
}

#[test]
fn quasiquote_substitutes_and_splices() {
    let mut rt = rt();
    let v = eval_str(&mut rt, "`(a ,(+ 1 2) ,@(list 3 4) b)").unwrap();
    assert_eq!(rt.write_value(v), "(a 3 3 4 b)");

    let v = eval_str(&mut rt, "`(x ,@(list) y)").unwrap();
    assert_eq!(rt.write_value(v), "(x y)");

    let v = eval_str(&mut rt, "`(1 (nested ,(+ 2 3)))").unwrap();
    assert_eq!(rt.write_value(v), "(1 (nested 5))");
}

#[test]
fn unique_symbols_are_equal_to_nothing() {
    let mut rt = rt();
    let g1 = eval_str(&mut rt, "(unique-symbol x)").unwrap();
    let g2 = eval_str(&mut rt, "(unique-symbol x)").unwrap();
    assert_eq!(g1.value_type(), ValueType::Symbol);
    assert_ne!(g1, g2);
    assert_ne!(g1, rt.symbol("x"));
    assert_eq!(rt.symbol_name(g1).unwrap(), "x");
}

#[test]
fn arithmetic_folds_and_division_guards() {
    let mut rt = rt();
    assert_eq!(eval_int(&mut rt, "(+ 1 2 3 4)"), 10);
    assert_eq!(eval_int(&mut rt, "(- 10 3 2)"), 5);
    assert_eq!(eval_int(&mut rt, "(* 2 3 4)"), 24);
    assert_eq!(eval_int(&mut rt, "(/ 24 3 2)"), 4);
    assert_eq!(
        eval_str(&mut rt, "(+ 1.5 2.5)").unwrap(),
        Value::from_float(4.0)
    );
    match eval_str(&mut rt, "(/ 1 0)") {
        Err(Error::Arithmetic(_)) => {}
        other => panic!("expected arithmetic error, got {other:?}"),
    }
}

#[test]
fn comparisons_chain() {
    let mut rt = rt();
    assert_eq!(eval_str(&mut rt, "(< 1 2 3)").unwrap(), TRUE);
    assert_eq!(eval_str(&mut rt, "(< 1 3 2)").unwrap(), tarn_runtime::FALSE);
    assert_eq!(eval_str(&mut rt, "(>= 3 3 2)").unwrap(), TRUE);
    assert_eq!(eval_str(&mut rt, "(< 1.0 2.5)").unwrap(), TRUE);
}

#[test]
fn type_errors_accumulate_a_trace() {
    let mut rt = rt();
    match eval_str(&mut rt, "(car 5)") {
        Err(Error::TypeMismatch { expected, actual, trace, .. }) => {
            assert_eq!(expected, ValueType::Pair);
            assert_eq!(actual, ValueType::Int);
            assert_ne!(trace, NIL, "trace should record the enclosing expression");
            let top = car(trace).unwrap();
            assert_eq!(rt.write_value(top), "(car 5)");
        }
        other => panic!("expected type mismatch, got {other:?}"),
    }
}

#[test]
fn applying_a_non_function_is_a_type_error() {
    let mut rt = rt();
    match eval_str(&mut rt, "(1 2 3)") {
        Err(Error::TypeMismatch { expected, .. }) => assert_eq!(expected, ValueType::Closure),
        other => panic!("expected type mismatch, got {other:?}"),
    }
}

#[test]
fn write_read_round_trip_is_stable() {
    let mut rt = rt();
    for src in ["42", "-3", "2.5", "#t", "#f", "#n", "\"a\\nb\"", "#v(1 2.5)"] {
        let v1 = eval_str(&mut rt, src).unwrap();
        let text = rt.write_value(v1);
        let v2 = eval_str(&mut rt, &text).unwrap();
        assert_eq!(rt.write_value(v2), text, "{src} did not round-trip");
    }
    // Structured values round-trip through the writer textually.
    let v = eval_str(&mut rt, "'(1 (2 3) . 4)").unwrap();
    let text = rt.write_value(v);
    let reread = rt.read(&text).unwrap();
    assert_eq!(rt.write_value(reread), text);
}

#[test]
fn host_apply_calls_closures_and_natives() {
    let mut rt = rt();
    let f = eval_str(&mut rt, "(lambda (a b) (+ a b))").unwrap();
    let args = rt.make_list(&[Value::from_int(2), Value::from_int(3)]).unwrap();
    assert_eq!(rt.apply(f, args).unwrap(), Value::from_int(5));

    let plus = eval_str(&mut rt, "+").unwrap();
    let args = rt.make_list(&[Value::from_int(20), Value::from_int(22)]).unwrap();
    assert_eq!(rt.apply(plus, args).unwrap(), Value::from_int(42));
}
