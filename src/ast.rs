//! This module defines the abstract syntax tree produced by the parser. The
//! main enum, [`Expr`], has one variant per syntactic form of the language.
//! Each node exclusively owns its children; a tree is built once by the parser
//! and consumed by the analyzer. `Display` renders a node back in source form,
//! which is what parse and analysis errors quote.

use std::fmt;

use crate::lexer::Keyword;

/// Literal constants appearing in source.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Str(String),
}

/// An identifier reference.
///
/// `keyword` is set when the token was a reserved word: `nil`/`true`/`false`
/// in expression position, or any keyword used as a member name or quoted.
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: String,
    pub keyword: Option<Keyword>,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Identifier {
            name: name.into(),
            keyword: None,
        }
    }

    pub fn is_keyword(&self) -> bool {
        self.keyword.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_keyword(keyword: Keyword) -> Option<BinaryOp> {
        Some(match keyword {
            Keyword::Add => BinaryOp::Add,
            Keyword::Subtract => BinaryOp::Subtract,
            Keyword::Multiply => BinaryOp::Multiply,
            Keyword::Divide => BinaryOp::Divide,
            Keyword::Equal => BinaryOp::Equal,
            Keyword::NotEqual => BinaryOp::NotEqual,
            Keyword::GreaterThan => BinaryOp::GreaterThan,
            Keyword::LessThan => BinaryOp::LessThan,
            Keyword::And => BinaryOp::And,
            Keyword::Or => BinaryOp::Or,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::LessThan => "<",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
}

impl UnaryOp {
    pub fn from_keyword(keyword: Keyword) -> Option<UnaryOp> {
        match keyword {
            Keyword::Not => Some(UnaryOp::Not),
            _ => None,
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => f.write_str("not"),
        }
    }
}

/// Syntax tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `(import path [member-or-members [rename-or-renames]])`
    Import {
        path: Vec<String>,
        members: Vec<String>,
        renames: Vec<String>,
    },
    Defun {
        name: String,
        params: Vec<String>,
        body: Vec<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Vec<Expr>,
    },
    Literal(Literal),
    Id(Identifier),
    /// `object.member.(call args).member`; each member is an `Id` or a `FunCall`
    /// whose callee is an `Id`.
    Dotted {
        object: Box<Expr>,
        members: Vec<Expr>,
    },
    /// `(set target value)`
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    LetStar {
        bindings: Vec<(String, Expr)>,
        body: Vec<Expr>,
    },
    Block(Vec<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Cons(Box<Expr>, Box<Expr>),
    /// `(list a b c)`
    ListCall(Vec<Expr>),
    If {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternative: Option<Box<Expr>>,
    },
    Loop(Vec<Expr>),
    Break(Option<Box<Expr>>),
    Elt {
        object: Box<Expr>,
        indexes: Vec<Expr>,
    },
    New {
        type_expr: Box<Expr>,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    FunCall {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Quoted datum: a `List`, an `Id` or a `Literal`.
    Quote(Box<Expr>),
    /// Pure list structure, only found under `Quote`.
    List(Vec<Expr>),
}

impl Expr {
    pub fn id(name: impl Into<String>) -> Expr {
        Expr::Id(Identifier::new(name))
    }

    /// The identifier name if this node is an `Id`.
    pub fn as_id(&self) -> Option<&Identifier> {
        match self {
            Expr::Id(id) => Some(id),
            _ => None,
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for item in items {
        write!(f, " {item}")?;
    }
    Ok(())
}

fn write_names(f: &mut fmt::Formatter<'_>, names: &[String]) -> fmt::Result {
    write!(f, "({})", names.join(" "))
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Str(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Import {
                path,
                members,
                renames,
            } => {
                write!(f, "(import {}", path.join("."))?;
                if !members.is_empty() {
                    write!(f, " ")?;
                    write_names(f, members)?;
                }
                if !renames.is_empty() {
                    write!(f, " ")?;
                    write_names(f, renames)?;
                }
                write!(f, ")")
            }
            Expr::Defun { name, params, body } => {
                write!(f, "(defun {name} ")?;
                write_names(f, params)?;
                write_seq(f, body)?;
                write!(f, ")")
            }
            Expr::Lambda { params, body } => {
                write!(f, "(lambda ")?;
                write_names(f, params)?;
                write_seq(f, body)?;
                write!(f, ")")
            }
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Id(id) => write!(f, "{}", id.name),
            Expr::Dotted { object, members } => {
                write!(f, "{object}")?;
                for member in members {
                    write!(f, ".{member}")?;
                }
                Ok(())
            }
            Expr::Assign { target, value } => write!(f, "(set {target} {value})"),
            Expr::LetStar { bindings, body } => {
                write!(f, "(let* (")?;
                for (i, (name, init)) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "({name} {init})")?;
                }
                write!(f, ")")?;
                write_seq(f, body)?;
                write!(f, ")")
            }
            Expr::Block(body) => {
                write!(f, "(block")?;
                write_seq(f, body)?;
                write!(f, ")")
            }
            Expr::Eq(l, r) => write!(f, "(eq {l} {r})"),
            Expr::Cons(l, r) => write!(f, "(cons {l} {r})"),
            Expr::ListCall(args) => {
                write!(f, "(list")?;
                write_seq(f, args)?;
                write!(f, ")")
            }
            Expr::If {
                test,
                consequent,
                alternative,
            } => {
                write!(f, "(if {test} {consequent}")?;
                if let Some(alt) = alternative {
                    write!(f, " {alt}")?;
                }
                write!(f, ")")
            }
            Expr::Loop(body) => {
                write!(f, "(loop")?;
                write_seq(f, body)?;
                write!(f, ")")
            }
            Expr::Break(value) => match value {
                Some(v) => write!(f, "(break {v})"),
                None => write!(f, "(break)"),
            },
            Expr::Elt { object, indexes } => {
                write!(f, "(elt {object}")?;
                write_seq(f, indexes)?;
                write!(f, ")")
            }
            Expr::New { type_expr, args } => {
                write!(f, "(new {type_expr}")?;
                write_seq(f, args)?;
                write!(f, ")")
            }
            Expr::Binary { op, left, right } => write!(f, "({op} {left} {right})"),
            Expr::Unary { op, operand } => write!(f, "({op} {operand})"),
            Expr::FunCall { callee, args } => {
                write!(f, "({callee}")?;
                write_seq(f, args)?;
                write!(f, ")")
            }
            Expr::Quote(datum) => write!(f, "'{datum}"),
            Expr::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Helper for building identifier nodes in tests.
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn id(name: &str) -> Expr {
    Expr::id(name)
}

/// Helper for building integer literal nodes in tests.
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

/// Helper for building string literal nodes in tests.
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn string(s: &str) -> Expr {
    Expr::Literal(Literal::Str(s.to_owned()))
}

/// Helper for building call nodes in tests.
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::FunCall {
        callee: Box::new(callee),
        args,
    }
}

#[cfg(test)]
mod display_tests {
    use super::*;

    #[test]
    fn test_display_round_trips_to_source_form() {
        let test_cases = vec![
            (int(-7), "-7"),
            (string("a\"b\n"), r#""a\"b\n""#),
            (call(id("add"), vec![int(2), int(3)]), "(add 2 3)"),
            (
                Expr::Defun {
                    name: "add".into(),
                    params: vec!["a".into(), "b".into()],
                    body: vec![Expr::Binary {
                        op: BinaryOp::Add,
                        left: Box::new(id("a")),
                        right: Box::new(id("b")),
                    }],
                },
                "(defun add (a b) (+ a b))",
            ),
            (
                Expr::Dotted {
                    object: Box::new(id("obj")),
                    members: vec![id("a"), call(id("b"), vec![int(1)])],
                },
                "obj.a.(b 1)",
            ),
            (
                Expr::Import {
                    path: vec!["system".into(), "text".into()],
                    members: vec!["stringbuilder".into()],
                    renames: vec!["sb".into()],
                },
                "(import system.text (stringbuilder) (sb))",
            ),
            (
                Expr::If {
                    test: Box::new(id("x")),
                    consequent: Box::new(int(1)),
                    alternative: None,
                },
                "(if x 1)",
            ),
            (
                Expr::LetStar {
                    bindings: vec![("x".into(), int(1)), ("y".into(), id("x"))],
                    body: vec![id("y")],
                },
                "(let* ((x 1) (y x)) y)",
            ),
            (Expr::Break(None), "(break)"),
            (
                Expr::Quote(Box::new(Expr::List(vec![id("a"), Expr::List(vec![int(1)])]))),
                "'(a (1))",
            ),
        ];

        for (i, (expr, expected)) in test_cases.iter().enumerate() {
            assert_eq!(expr.to_string(), *expected, "test case {}", i + 1);
        }
    }

    #[test]
    fn test_operator_keywords() {
        assert_eq!(BinaryOp::from_keyword(Keyword::NotEqual), Some(BinaryOp::NotEqual));
        assert_eq!(BinaryOp::from_keyword(Keyword::Or), Some(BinaryOp::Or));
        assert_eq!(BinaryOp::from_keyword(Keyword::Not), None);
        assert_eq!(UnaryOp::from_keyword(Keyword::Not), Some(UnaryOp::Not));
        assert_eq!(UnaryOp::from_keyword(Keyword::Add), None);
    }
}
