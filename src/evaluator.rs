//! Execution of analyzed code.
//!
//! The analyzer lowers the AST into a [`Node`] tree in which every variable
//! reference is already resolved: lexical variables become `(depth, index)`
//! frame coordinates, and everything whose meaning depends on runtime types
//! becomes a [`Node::Dynamic`] operation on a call site.

use crate::Error;
use crate::binder::CallSite;
use crate::builtinops::eq_values;
use crate::runtime::Runtime;
use crate::value::{Expando, Function, FunctionBody, Value, cons, list};
use parking_lot::RwLock;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

// Remaining stack that triggers growth, and the size of each new segment.
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// An executable expression.
#[derive(Debug)]
pub enum Node {
    Constant(Value),
    /// A lexical variable, `depth` frames up from the current one.
    Local {
        depth: usize,
        index: usize,
    },
    SetLocal {
        depth: usize,
        index: usize,
        value: Box<Node>,
    },
    /// The module scope being executed.
    Module,
    /// Expressions in order; the value of the last one, or `nil`.
    Block(Vec<Node>),
    /// Like `Block`, in a new frame of `slots` variables.
    Scope {
        slots: usize,
        body: Vec<Node>,
    },
    Lambda(Arc<LambdaInfo>),
    If {
        test: Box<Node>,
        consequent: Box<Node>,
        alternative: Box<Node>,
    },
    Loop {
        label: usize,
        body: Vec<Node>,
    },
    Break {
        label: usize,
        value: Box<Node>,
    },
    /// A runtime-bound operation; the first argument is the target.
    Dynamic {
        site: Arc<CallSite>,
        args: Vec<Node>,
    },
    Import {
        path: Vec<String>,
        members: Vec<String>,
        renames: Vec<String>,
    },
    Eq(Box<Node>, Box<Node>),
    MakeCons(Box<Node>, Box<Node>),
    List(Vec<Node>),
}

/// The compiled body of a lambda or defun.
#[derive(Debug)]
pub struct LambdaInfo {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Node>,
}

impl LambdaInfo {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Variables of one lambda invocation or `let*` block.
pub struct Frame {
    slots: Vec<RwLock<Value>>,
    parent: Option<Arc<Frame>>,
}

impl Frame {
    pub fn new(parent: Option<Arc<Frame>>, values: Vec<Value>) -> Self {
        Frame {
            slots: values.into_iter().map(RwLock::new).collect(),
            parent,
        }
    }

    fn slot(&self, index: usize) -> Result<&RwLock<Value>, Error> {
        self.slots
            .get(index)
            .ok_or_else(|| Error::EvalError(format!("no variable slot {index} in frame")))
    }

    pub fn get(&self, index: usize) -> Result<Value, Error> {
        Ok(self.slot(index)?.read().clone())
    }

    pub fn set(&self, index: usize, value: Value) -> Result<(), Error> {
        *self.slot(index)?.write() = value;
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("slots", &self.slots.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Non-local exits.
enum Signal {
    Break { label: usize, value: Value },
    Raise(Error),
}

impl From<Error> for Signal {
    fn from(error: Error) -> Self {
        Signal::Raise(error)
    }
}

fn escaped_break(signal: Signal) -> Error {
    match signal {
        Signal::Raise(error) => error,
        Signal::Break { .. } => Error::EvalError("break outside of a loop".to_string()),
    }
}

struct Context<'a> {
    rt: &'a Runtime,
    module: &'a Arc<Expando>,
    frame: Option<Arc<Frame>>,
}

impl Context<'_> {
    fn frame_at(&self, depth: usize) -> Result<&Arc<Frame>, Error> {
        let mut frame = self.frame.as_ref();
        for _ in 0..depth {
            frame = frame.and_then(|f| f.parent.as_ref());
        }
        frame.ok_or_else(|| Error::EvalError(format!("no frame {depth} levels up")))
    }

    fn eval_all(&self, nodes: &[Node]) -> Result<Vec<Value>, Signal> {
        nodes.iter().map(|n| self.eval(n)).collect()
    }

    fn eval_body(&self, body: &[Node]) -> Result<Value, Signal> {
        let mut result = Value::Nil;
        for node in body {
            result = self.eval(node)?;
        }
        Ok(result)
    }

    /// Evaluate `node`, growing the stack when deep recursion runs it low.
    fn eval(&self, node: &Node) -> Result<Value, Signal> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.eval_node(node))
    }

    fn eval_node(&self, node: &Node) -> Result<Value, Signal> {
        match node {
            Node::Constant(value) => Ok(value.clone()),
            Node::Local { depth, index } => Ok(self.frame_at(*depth)?.get(*index)?),
            Node::SetLocal {
                depth,
                index,
                value,
            } => {
                let value = self.eval(value)?;
                self.frame_at(*depth)?.set(*index, value.clone())?;
                Ok(value)
            }
            Node::Module => Ok(Value::Dynamic(self.module.clone())),
            Node::Block(body) => self.eval_body(body),
            Node::Scope { slots, body } => {
                let inner = Context {
                    rt: self.rt,
                    module: self.module,
                    frame: Some(Arc::new(Frame::new(
                        self.frame.clone(),
                        vec![Value::Nil; *slots],
                    ))),
                };
                inner.eval_body(body)
            }
            Node::Lambda(code) => Ok(Value::Function(Arc::new(Function {
                name: code.name.clone(),
                arity: code.arity(),
                body: FunctionBody::Lambda {
                    code: code.clone(),
                    frame: self.frame.clone(),
                    module: self.module.clone(),
                },
            }))),
            Node::If {
                test,
                consequent,
                alternative,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternative)
                }
            }
            Node::Loop { label, body } => loop {
                for node in body {
                    match self.eval(node) {
                        Ok(_) => {}
                        Err(Signal::Break { label: l, value }) if l == *label => return Ok(value),
                        Err(signal) => return Err(signal),
                    }
                }
            },
            Node::Break { label, value } => Err(Signal::Break {
                label: *label,
                value: self.eval(value)?,
            }),
            Node::Dynamic { site, args } => {
                let values = self.eval_all(args)?;
                Ok(site.invoke(self.rt, &values)?)
            }
            Node::Import {
                path,
                members,
                renames,
            } => Ok(self.rt.import(self.module, path, members, renames)?),
            Node::Eq(left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(Value::Bool(eq_values(&left, &right)))
            }
            Node::MakeCons(first, rest) => {
                let first = self.eval(first)?;
                let rest = self.eval(rest)?;
                Ok(cons(first, rest))
            }
            Node::List(items) => Ok(list(self.eval_all(items)?)),
        }
    }
}

/// Run top-level code in `module`.
pub fn execute(rt: &Runtime, module: &Arc<Expando>, node: &Node) -> Result<Value, Error> {
    let ctx = Context {
        rt,
        module,
        frame: None,
    };
    ctx.eval(node).map_err(escaped_break)
}

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Holds one level of call depth for as long as it lives.
struct DepthGuard;

impl DepthGuard {
    fn enter(limit: usize) -> Result<Self, Error> {
        CALL_DEPTH.with(|depth| {
            if depth.get() >= limit {
                Err(Error::EvalError(format!(
                    "Call depth limit exceeded (max: {limit})"
                )))
            } else {
                depth.set(depth.get() + 1);
                Ok(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl Function {
    pub fn call(&self, rt: &Runtime, args: Vec<Value>) -> Result<Value, Error> {
        if args.len() != self.arity {
            return Err(Error::arity_error_with_expr(
                self.arity,
                args.len(),
                self.name.clone(),
            ));
        }
        let _guard = DepthGuard::enter(rt.config().max_call_depth)?;
        match &self.body {
            FunctionBody::Native(op) => op(args),
            FunctionBody::Lambda {
                code,
                frame,
                module,
            } => {
                let ctx = Context {
                    rt,
                    module,
                    frame: Some(Arc::new(Frame::new(frame.clone(), args))),
                };
                stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
                    ctx.eval_body(&code.body).map_err(escaped_break)
                })
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::Error;
    use crate::intooperation::IntoOperation;

    /// Test result variants for data-driven tests
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
        Setup,                       // Evaluation should succeed, value ignored
    }
    use TestResult::*;

    /// Macro for setup expressions whose value does not matter
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, Setup)
        };
    }

    /// Test cases that share one module scope
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(value.into())
    }

    /// Compare printed forms, so lists and symbols compare structurally
    fn printed(text: &'static str) -> TestResult {
        EvalResult(Value::from(text))
    }

    fn execute_test_case(
        rt: &Runtime,
        module: &Arc<Expando>,
        input: &str,
        expected: &TestResult,
        test_id: &str,
    ) {
        match (rt.execute_expr(input, module), expected) {
            (Ok(_), Setup) => {}
            (Err(err), Setup) => panic!("{test_id}: setup '{input}' failed: {err:?}"),
            (Ok(actual), EvalResult(Value::Str(text))) if !matches!(actual, Value::Str(_)) => {
                assert_eq!(actual.to_string(), **text, "{test_id}: '{input}'");
            }
            (Ok(actual), EvalResult(expected_val)) => {
                assert!(
                    actual == *expected_val,
                    "{test_id}: '{input}' expected {expected_val:?}, got {actual:?}"
                );
            }
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error | SpecificError(_)) => {
                panic!("{test_id}: '{input}' expected error, got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let rt = Runtime::new();
            let module = rt.create_scope("test");
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(&rt, &module, input, expected, &test_id);
            }
        }
    }

    fn run_isolated_tests(test_cases: Vec<(&'static str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let rt = Runtime::new();
            let module = rt.create_scope("test");
            execute_test_case(&rt, &module, input, expected, &format!("#{}", i + 1));
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_expressions_data_driven() {
        run_isolated_tests(vec![
            // === LITERALS ===
            ("42", success(42)),
            ("-7", success(-7)),
            ("\"hi\"", success("hi")),
            ("true", success(true)),
            ("false", success(false)),
            ("nil", success(())),
            // === ARITHMETIC AND COMPARISON ===
            ("(+ 1 2)", success(3)),
            ("(- 10 4)", success(6)),
            ("(* 6 7)", success(42)),
            ("(/ 7 2)", success(3)),
            ("(/ 1 0)", SpecificError("Division by zero")),
            ("(+ 9223372036854775807 1)", SpecificError("overflow")),
            ("(< 1 2)", success(true)),
            ("(> 1 2)", success(false)),
            ("(= 3 3)", success(true)),
            ("(!= 3 3)", success(false)),
            ("(+ \"ab\" \"cd\")", success("abcd")),
            ("(< \"a\" \"b\")", success(true)),
            ("(+ 1 \"a\")", SpecificError("operator + is not defined")),
            ("(= 1 \"1\")", success(false)),
            // === LOGIC ===
            ("(not true)", success(false)),
            ("(not nil)", success(true)),
            ("(not 0)", success(false)),
            ("(and 1 2)", success(2)),
            ("(and false 2)", success(false)),
            ("(and nil 2)", success(false)),
            ("(or false 7)", success(7)),
            ("(or 5 (/ 1 0))", success(5)),
            ("(or false nil)", success(false)),
            // === CONDITIONALS ===
            ("(if true 1 2)", success(1)),
            ("(if nil 1 2)", success(2)),
            ("(if false 1)", success(false)),
            ("(if 0 \"zero is true\")", success("zero is true")),
            // === LET* ===
            ("(let* ((x 1) (y (+ x 1))) y)", success(2)),
            ("(let* ((x 1) (x (+ x 1))) x)", success(2)),
            ("(let* ((x 1)) (set x 5) x)", success(5)),
            ("(let* () 3)", success(3)),
            // === BLOCK ===
            ("(block 1 2 3)", success(3)),
            ("(block)", success(())),
            // === LOOPS ===
            ("(loop (break 42))", success(42)),
            ("(loop (break))", success(())),
            (
                "(let* ((i 0) (sum 0)) (loop (if (> i 4) (break sum)) (set sum (+ sum i)) (set i (+ i 1))))",
                success(10),
            ),
            ("(loop (loop (break 1)) (break 2))", success(2)),
            ("(break 1)", SpecificError("break")),
            ("(loop (lambda () (break 1)))", SpecificError("break")),
            // === LAMBDAS ===
            ("((lambda (x y) (+ x y)) 3 4)", success(7)),
            ("((lambda () 9))", success(9)),
            ("((lambda (x) x) 1 2)", SpecificError("ArityError")),
            ("(((lambda (x) (lambda (y) (+ x y))) 10) 5)", success(15)),
            ("(1 2)", SpecificError("cannot invoke")),
            // === LISTS, CONS, EQ, QUOTE ===
            ("(list)", success(())),
            ("(list 1 2 3)", printed("(1 2 3)")),
            ("(cons 1 2)", printed("(1 . 2)")),
            ("(cons 1 (list 2))", printed("(1 2)")),
            ("(elt (list 10 20 30) 1)", success(20)),
            ("(elt (list 10 20 30) 5)", SpecificError("IndexOutOfRange")),
            ("(elt (list 10 20 30) \"x\")", SpecificError("one int index")),
            ("(elt \"hello\" 1)", success("e")),
            ("(let* ((l (list 1 2))) (set (elt l 0) 9) l)", printed("(9 2)")),
            ("(eq 1 1)", success(true)),
            ("(eq nil nil)", success(true)),
            ("(eq \"a\" \"a\")", success(false)),
            ("(let* ((l (list 1))) (eq l l))", success(true)),
            ("(eq (list 1) (list 1))", success(false)),
            ("(eq 'foo 'FOO)", success(true)),
            ("'(a (b c) 1 \"s\")", printed("(a (b c) 1 s)")),
            ("(quote x)", printed("x")),
            ("'()", success(())),
            // === MEMBERS OF BUILT-IN VALUES ===
            ("\"hello\".Length", success(5)),
            ("\"hello\".(toupper)", success("HELLO")),
            ("\"hello\".(Substring 1 3)", success("ell")),
            ("\"hello\".(Substring \"x\" 3)", SpecificError("MissingMember")),
            ("\"hello\".nosuch", SpecificError("MissingMember")),
            ("(list 1 2).First", success(1)),
            ("(let* ((c (cons 1 2))) (set c.rest 3) c)", printed("(1 . 3)")),
            ("'abc.name", success("abc")),
            ("(lambda (a b) a).arity", success(2)),
            ("undefined-name", SpecificError("MissingMember")),
        ]);
    }

    #[test]
    fn test_module_state_data_driven() {
        run_tests_in_environment(vec![
            TestEnvironment(vec![
                test_setup!("(defun add (a b) (+ a b))"),
                ("(add 2 3)", success(5)),
                ("(add 1)", SpecificError("ArityError")),
                ("(set x 10)", success(10)),
                ("(add x x)", success(20)),
                ("(set x (add x 1))", success(11)),
                ("X", success(11)),
            ]),
            TestEnvironment(vec![
                test_setup!("(defun fact (n) (if (< n 2) 1 (* n (fact (- n 1)))))"),
                ("(fact 10)", success(3628800)),
            ]),
            TestEnvironment(vec![
                test_setup!("(defun forever (n) (forever n))"),
                ("(forever 1)", SpecificError("Call depth limit exceeded")),
                // the depth counter is released after the failure
                ("(+ 1 1)", success(2)),
            ]),
            TestEnvironment(vec![
                test_setup!("(defun counter () (let* ((n 0)) (lambda () (set n (+ n 1)))))"),
                test_setup!("(set c (counter))"),
                ("(c)", success(1)),
                ("(c)", success(2)),
                ("((counter))", success(1)),
            ]),
            TestEnvironment(vec![
                test_setup!("(set s 'Foo)"),
                ("(set s.value 42)", success(42)),
                ("'FOO.value", success(42)),
                ("s", printed("Foo")),
            ]),
        ]);
    }

    #[test]
    fn test_defun_returns_function() {
        let rt = Runtime::new();
        let module = rt.create_scope("defun");
        let f = rt.execute_expr("(defun id (x) x)", &module).unwrap();
        assert!(matches!(f, Value::Function(ref f) if f.arity == 1 && f.name == "id"));
        assert_eq!(rt.execute_expr("(id 4)", &module).unwrap(), Value::Int(4));
        assert_eq!(rt.execute_expr("(ID 4)", &module).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_frames() {
        let outer = Arc::new(Frame::new(None, vec![Value::Int(1)]));
        let inner = Frame::new(Some(outer.clone()), vec![Value::Nil, Value::Int(2)]);
        inner.set(0, Value::Int(5)).unwrap();
        assert_eq!(inner.get(0).unwrap(), Value::Int(5));
        assert_eq!(outer.get(0).unwrap(), Value::Int(1));
        assert!(inner.get(2).is_err());
        assert!(outer.set(1, Value::Nil).is_err());
    }

    #[test]
    fn test_native_function_call() {
        fn twice(n: i64) -> i64 {
            n * 2
        }
        let rt = Runtime::new();
        let f = Function::native(
            "twice",
            1,
            IntoOperation::<(i64,), i64>::into_operation(twice),
        );
        assert_eq!(f.call(&rt, vec![Value::Int(4)]).unwrap(), Value::Int(8));
        assert!(matches!(
            f.call(&rt, vec![]),
            Err(Error::ArityError { expected: 1, got: 0, .. })
        ));
    }
}
