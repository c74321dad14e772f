//! Sympl - a small dynamic language with a caching dispatch runtime
//!
//! Sympl is a parenthesized prefix language in the Lisp family. Source text
//! flows through four stages:
//!
//! ```text
//! source --lexer--> tokens --parser--> Expr --analyzer--> Node --evaluator--> Value
//! ```
//!
//! Every operation whose receiver is not known until run time (member access,
//! calls, indexing, construction, operators) is compiled into a call site that
//! asks a canonical [`binder::Binder`] for a rule, caches the rule together
//! with the guard under which it stays valid, and reuses it for as long as the
//! guard holds.
//!
//! ```scheme
//! (import system.math)
//! (defun add (a b) (+ a b))
//! (add 2 3)               ; 5
//! (math.max 3 4)          ; 4, a static method on a host type
//! (let* ((l (list 10 20 30)))
//!   (elt l 1))            ; 20
//! (loop (break 42))       ; 42
//! '(a (b c))              ; quoted data builds Cons cells and Symbols
//! ```
//!
//! ## Embedding
//!
//! A [`runtime::Runtime`] owns everything shared between compiled files: the
//! symbol table, the binder canonicalization table, the global namespace tree
//! reflected from host "assemblies", and the host globals table.
//!
//! ```no_run
//! use sympl::runtime::Runtime;
//! use sympl::stdlib::system_assembly;
//!
//! let rt = Runtime::builder().assembly(system_assembly()).build();
//! let module = rt.create_scope("repl");
//! let value = rt.execute_expr("(+ 1 2)", &module)?;
//! assert_eq!(value.to_string(), "3");
//! # Ok::<(), sympl::Error>(())
//! ```
//!
//! ## Modules
//!
//! - `lexer`: tokens with a one-token put-back slot
//! - `parser`: recursive-descent parser producing [`ast::Expr`]
//! - `analyzer`: lexical scoping and compilation to executable nodes
//! - `evaluator`: executes nodes against runtime frames
//! - `binder`: call sites, rules, guards and the nine binder kinds
//! - `value`: runtime values, `Symbol` and `Cons`
//! - `reflect`: the host type model that binders reflect over
//! - `runtime`: the embedding surface

use std::fmt;

/// Default nesting limit for parenthesized forms.
pub const MAX_PARSE_DEPTH: usize = 128;

/// Default nesting limit for Sympl function calls on one thread.
///
/// Every call re-enters the evaluator through a call site, so this bounds
/// native stack use as well as runaway recursion.
pub const MAX_CALL_DEPTH: usize = 128;

/// Categorizes the different kinds of lexing and parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed forms)
    InvalidSyntax,
    /// Input ended before the form was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Form nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete expression
    TrailingContent,
    /// Implementation-imposed limit exceeded (integer overflow)
    ImplementationLimit,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context and found token, extracted from
    /// `input` around the byte offset `error_offset`
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let char_offset = input
            .char_indices()
            .take_while(|(i, _)| *i < error_offset)
            .count();
        let context_start = char_offset.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ParseError: {}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Error types for the language and its runtime
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    ParseError(ParseError),
    #[error("AnalysisError: {0}")]
    AnalysisError(String),
    #[error("MissingMember: {0}")]
    MissingMember(String),
    #[error("InvalidOperation: {0}")]
    InvalidOperation(String),
    #[error("IndexOutOfRange: {0}")]
    IndexOutOfRange(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("{}", arity_message(.expected, .got, .expression))]
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
    #[error("EvaluationError: {0}")]
    EvalError(String),
    #[error("IoError: {0}")]
    IoError(String),
}

fn arity_message(expected: &usize, got: &usize, expression: &Option<String>) -> String {
    match expression {
        Some(expr) => {
            format!("ArityError: expression {expr}: expected {expected} arguments, got {got}")
        }
        None => format!("ArityError: function expected {expected} arguments but got {got}"),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::ParseError(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

pub mod analyzer;
pub mod ast;
pub mod binder;
pub mod builtinops;
pub mod evaluator;
pub mod intooperation;
pub mod lexer;
pub mod parser;
pub mod reflect;
pub mod runtime;
pub mod stdlib;
pub mod value;

pub use runtime::{Runtime, RuntimeBuilder, RuntimeConfig};
pub use value::Value;
