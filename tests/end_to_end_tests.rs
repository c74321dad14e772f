#![expect(clippy::unwrap_used)] // test code OK

use pretty_assertions::assert_eq;
use sympl::stdlib::system_assembly;
use sympl::{Error, Runtime, RuntimeConfig, Value};

fn run(source: &str) -> Result<Value, Error> {
    let rt = Runtime::builder().assembly(system_assembly()).build();
    let module = rt.create_scope("main");
    rt.execute_string(source, &module)
}

#[test]
fn test_programs() {
    let test_cases = vec![
        ("(defun add (a b) (+ a b)) (add 2 3)", "5"),
        ("(let* ((x 1) (y (+ x 1))) y)", "2"),
        ("(let* ((x 1) (x (+ x 1))) x)", "2"),
        ("(loop (break 42))", "42"),
        ("(loop (break))", "nil"),
        ("(import \"System\") (system.math.max 7 3)", "7"),
        ("(import system.math) math.(min 7 3)", "3"),
        // members the type handle lacks are looked up on System.Type
        ("(import system.math) math.FullName", "System.Math"),
        ("(import system.math) (math.IsInstanceOfType 1)", "false"),
        ("(elt (list 10 20 30) 1)", "20"),
        ("(list)", "nil"),
        ("(eq 'Foo 'foo)", "true"),
        ("(set s 'Foo) (set t 'FOO) t", "Foo"),
        (
            "(defun map (f l) (if (eq l nil) nil (cons (f l.first) (map f l.rest)))) (map (lambda (x) (* x x)) '(1 2 3))",
            "(1 4 9)",
        ),
        (
            "(defun describe (x) (x.ToString)) (list (describe 1) (describe \"s\") (describe true) (describe 2))",
            "(1 s true 2)",
        ),
    ];
    for (i, (source, expected)) in test_cases.into_iter().enumerate() {
        match run(source) {
            Ok(value) => assert_eq!(value.to_string(), expected, "#{}: {source}", i + 1),
            Err(e) => panic!("#{}: '{source}' failed: {e}", i + 1),
        }
    }
}

#[test]
fn test_program_errors() {
    let test_cases = vec![
        ("(elt (list 10 20 30) 5)", "IndexOutOfRange"),
        ("(break)", "AnalysisError"),
        ("(set a.b.c 1)", "AnalysisError"),
        ("(new 5)", "Must supply a type"),
        ("(import system.math) (math.nothing 1)", "MissingMember"),
        ("(import system.math) (math.nosuch 1)", "no method nosuch(int) on System.Type"),
        ("(if 1)", "ParseError"),
        ("(if 1 2 3 4)", "ParseError"),
        ("\"unterminated", "ParseError"),
    ];
    for (i, (source, expected)) in test_cases.into_iter().enumerate() {
        match run(source) {
            Err(e) => assert!(
                e.to_string().contains(expected),
                "#{}: '{source}' error should contain '{expected}', got: {e}",
                i + 1
            ),
            Ok(value) => panic!("#{}: '{source}' expected error, got {value}", i + 1),
        }
    }
}

const COUNT_DOWN: &str = "(defun f (n) (if (= n 0) 0 (+ 1 (f (- n 1)))))";

#[test]
fn test_non_tail_recursion_up_to_the_call_limit() {
    let rt = Runtime::new();
    let limit = rt.config().max_call_depth;
    let module = rt.create_scope("main");
    rt.execute_expr(COUNT_DOWN, &module).unwrap();

    // (f n) nests n + 1 calls
    let deepest = format!("(f {})", limit - 2);
    assert_eq!(
        rt.execute_expr(&deepest, &module).unwrap(),
        Value::Int(limit as i64 - 2)
    );
    match rt.execute_expr(&format!("(f {limit})"), &module) {
        Err(Error::EvalError(msg)) => assert!(msg.contains("Call depth limit"), "got: {msg}"),
        other => panic!("expected call depth error, got {other:?}"),
    }
    // the depth counter unwinds after the error
    assert_eq!(rt.execute_expr("(f 3)", &module).unwrap(), Value::Int(3));
}

#[test]
fn test_deep_recursion_with_a_raised_limit() {
    let rt = Runtime::builder()
        .config(RuntimeConfig {
            max_call_depth: 20_000,
            ..Default::default()
        })
        .build();
    let module = rt.create_scope("main");
    rt.execute_expr(COUNT_DOWN, &module).unwrap();
    assert_eq!(
        rt.execute_expr("(f 10000)", &module).unwrap(),
        Value::Int(10_000)
    );
}

#[test]
fn test_long_list_built_in_a_loop() {
    let result = run(
        "(set l nil) (set i 0) \
         (loop (if (= i 300000) (break l)) (set l (cons i l)) (set i (+ i 1))) \
         (set l nil) i",
    );
    assert_eq!(result.unwrap(), Value::Int(300_000));
}
