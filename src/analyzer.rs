//! Lowering of the AST into executable [`Node`]s.
//!
//! Analysis resolves every identifier once. Names bound by `lambda`, `defun`
//! parameters and `let*` become frame slots addressed by `(depth, index)`;
//! anything else is looked up on the module scope at run time through a
//! get-member call site. Operations whose meaning depends on runtime types
//! become dynamic nodes tagged with a canonical binder.
//!
//! Scopes live only for the duration of analysis. Only lambda and `let*`
//! scopes own a runtime frame; loop scopes exist to give `break` its target.

use crate::Error;
use crate::ast::{BinaryOp, Expr, Identifier, Literal};
use crate::binder::BinderKey;
use crate::evaluator::{LambdaInfo, Node};
use crate::lexer::Keyword;
use crate::runtime::Runtime;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
enum ScopeKind {
    /// The root; owns the label and temporary counters.
    Module { counter: Cell<usize> },
    Lambda,
    LetStar,
    Loop { label: usize },
}

/// A lexical scope during analysis.
#[derive(Debug)]
pub struct AnalysisScope<'a> {
    parent: Option<&'a AnalysisScope<'a>>,
    runtime: &'a Runtime,
    kind: ScopeKind,
    names: RefCell<HashMap<String, usize>>,
    slots: Cell<usize>,
}

impl<'a> AnalysisScope<'a> {
    /// The root scope of a module.
    pub fn module(runtime: &'a Runtime) -> Self {
        AnalysisScope {
            parent: None,
            runtime,
            kind: ScopeKind::Module {
                counter: Cell::new(0),
            },
            names: RefCell::new(HashMap::new()),
            slots: Cell::new(0),
        }
    }

    fn child(&'a self, kind: ScopeKind) -> AnalysisScope<'a> {
        AnalysisScope {
            parent: Some(self),
            runtime: self.runtime,
            kind,
            names: RefCell::new(HashMap::new()),
            slots: Cell::new(0),
        }
    }

    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    pub fn is_module(&self) -> bool {
        matches!(self.kind, ScopeKind::Module { .. })
    }

    fn has_frame(&self) -> bool {
        matches!(self.kind, ScopeKind::Lambda | ScopeKind::LetStar)
    }

    /// A fresh number, unique within the module being analyzed.
    fn next_id(&self) -> usize {
        let mut scope = self;
        while let Some(parent) = scope.parent {
            scope = parent;
        }
        match &scope.kind {
            ScopeKind::Module { counter } => {
                let id = counter.get();
                counter.set(id + 1);
                id
            }
            _ => 0,
        }
    }

    /// Bind `name` to a new slot of this scope's frame. A later binding of
    /// the same name shadows the earlier one.
    fn declare(&self, name: &str) -> usize {
        let index = self.slots.get();
        self.slots.set(index + 1);
        self.names.borrow_mut().insert(name.to_lowercase(), index);
        index
    }

    /// Frame coordinates of a lexical variable.
    pub fn lookup(&self, name: &str) -> Option<(usize, usize)> {
        let key = name.to_lowercase();
        let mut depth = 0;
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(&index) = current.names.borrow().get(&key) {
                return Some((depth, index));
            }
            if current.has_frame() {
                depth += 1;
            }
            scope = current.parent;
        }
        None
    }

    /// Label of the innermost loop in the current function body.
    fn enclosing_loop(&self) -> Option<usize> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            match current.kind {
                ScopeKind::Loop { label } => return Some(label),
                ScopeKind::Lambda | ScopeKind::Module { .. } => return None,
                ScopeKind::LetStar => scope = current.parent,
            }
        }
        None
    }

    fn dynamic(&self, key: BinderKey, args: Vec<Node>) -> Node {
        Node::Dynamic {
            site: self.runtime.call_site(key),
            args,
        }
    }
}

fn analysis_error(message: impl Into<String>) -> Error {
    Error::AnalysisError(message.into())
}

/// Analyze the top-level forms of a module.
pub fn analyze_module(rt: &Runtime, exprs: &[Expr]) -> Result<Vec<Node>, Error> {
    let scope = AnalysisScope::module(rt);
    exprs.iter().map(|expr| analyze_expr(expr, &scope)).collect()
}

pub fn analyze_expr(expr: &Expr, scope: &AnalysisScope<'_>) -> Result<Node, Error> {
    match expr {
        Expr::Literal(literal) => Ok(Node::Constant(literal_value(literal))),
        Expr::Id(id) => Ok(analyze_id(id, scope)),
        Expr::Import {
            path,
            members,
            renames,
        } => {
            if !scope.is_module() {
                return Err(analysis_error("Import expression must be a top level expression"));
            }
            Ok(Node::Import {
                path: path.clone(),
                members: members.clone(),
                renames: renames.clone(),
            })
        }
        Expr::Defun { name, params, body } => {
            if !scope.is_module() {
                return Err(analysis_error(format!(
                    "Use lambda when not defining a top-level function -- {name}"
                )));
            }
            let lambda = analyze_lambda(name, params, body, scope)?;
            Ok(scope.dynamic(BinderKey::SetMember(name.clone()), vec![Node::Module, lambda]))
        }
        Expr::Lambda { params, body } => analyze_lambda("lambda", params, body, scope),
        Expr::Dotted { object, members } => analyze_dotted(object, members, scope),
        Expr::Assign { target, value } => analyze_assign(target, value, scope),
        Expr::LetStar { bindings, body } => analyze_let_star(bindings, body, scope),
        Expr::Block(body) => Ok(Node::Block(analyze_all(body, scope)?)),
        Expr::Eq(left, right) => Ok(Node::Eq(
            Box::new(analyze_expr(left, scope)?),
            Box::new(analyze_expr(right, scope)?),
        )),
        Expr::Cons(first, rest) => Ok(Node::MakeCons(
            Box::new(analyze_expr(first, scope)?),
            Box::new(analyze_expr(rest, scope)?),
        )),
        Expr::ListCall(items) => Ok(Node::List(analyze_all(items, scope)?)),
        Expr::If {
            test,
            consequent,
            alternative,
        } => Ok(Node::If {
            test: Box::new(analyze_expr(test, scope)?),
            consequent: Box::new(analyze_expr(consequent, scope)?),
            alternative: Box::new(match alternative {
                Some(alternative) => analyze_expr(alternative, scope)?,
                None => Node::Constant(Value::Bool(false)),
            }),
        }),
        Expr::Loop(body) => {
            let label = scope.next_id();
            let loop_scope = scope.child(ScopeKind::Loop { label });
            Ok(Node::Loop {
                label,
                body: analyze_all(body, &loop_scope)?,
            })
        }
        Expr::Break(value) => {
            let label = scope
                .enclosing_loop()
                .ok_or_else(|| analysis_error("Call to Break not inside loop"))?;
            let value = match value {
                Some(value) => analyze_expr(value, scope)?,
                None => Node::Constant(Value::Nil),
            };
            Ok(Node::Break {
                label,
                value: Box::new(value),
            })
        }
        Expr::Elt { object, indexes } => {
            let mut args = vec![analyze_expr(object, scope)?];
            args.extend(analyze_all(indexes, scope)?);
            Ok(scope.dynamic(BinderKey::GetIndex(indexes.len()), args))
        }
        Expr::New { type_expr, args } => {
            let mut operands = vec![analyze_expr(type_expr, scope)?];
            operands.extend(analyze_all(args, scope)?);
            Ok(scope.dynamic(BinderKey::CreateInstance(args.len()), operands))
        }
        Expr::Binary { op, left, right } => analyze_binary(*op, left, right, scope),
        Expr::Unary { op, operand } => {
            let operand = analyze_expr(operand, scope)?;
            Ok(scope.dynamic(BinderKey::Unary(*op), vec![operand]))
        }
        Expr::FunCall { callee, args } => analyze_call(callee, args, scope),
        Expr::Quote(datum) => Ok(analyze_quoted(datum, scope)),
        Expr::List(_) => Ok(analyze_quoted(expr, scope)),
    }
}

fn analyze_all(exprs: &[Expr], scope: &AnalysisScope<'_>) -> Result<Vec<Node>, Error> {
    exprs.iter().map(|expr| analyze_expr(expr, scope)).collect()
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::Int(*n),
        Literal::Str(s) => Value::from(s.as_str()),
    }
}

fn keyword_constant(keyword: Option<Keyword>) -> Option<Value> {
    match keyword? {
        Keyword::Nil => Some(Value::Nil),
        Keyword::True => Some(Value::Bool(true)),
        Keyword::False => Some(Value::Bool(false)),
        _ => None,
    }
}

fn analyze_id(id: &Identifier, scope: &AnalysisScope<'_>) -> Node {
    if let Some(value) = keyword_constant(id.keyword) {
        return Node::Constant(value);
    }
    match scope.lookup(&id.name) {
        Some((depth, index)) => Node::Local { depth, index },
        None => scope.dynamic(BinderKey::GetMember(id.name.clone()), vec![Node::Module]),
    }
}

fn analyze_lambda(
    name: &str,
    params: &[String],
    body: &[Expr],
    scope: &AnalysisScope<'_>,
) -> Result<Node, Error> {
    let lambda_scope = scope.child(ScopeKind::Lambda);
    for param in params {
        if lambda_scope.names.borrow().contains_key(&param.to_lowercase()) {
            return Err(analysis_error(format!(
                "Duplicate parameter {param} in {name}"
            )));
        }
        lambda_scope.declare(param);
    }
    let body = analyze_all(body, &lambda_scope)?;
    Ok(Node::Lambda(Arc::new(LambdaInfo {
        name: name.to_string(),
        params: params.to_vec(),
        body,
    })))
}

/// `a.b.(c x).d` becomes nested get-member and invoke-member operations.
fn analyze_dotted(
    object: &Expr,
    members: &[Expr],
    scope: &AnalysisScope<'_>,
) -> Result<Node, Error> {
    let mut current = analyze_expr(object, scope)?;
    for member in members {
        current = match member {
            Expr::Id(id) => scope.dynamic(BinderKey::GetMember(id.name.clone()), vec![current]),
            Expr::FunCall { callee, args } => {
                let Some(id) = callee.as_id() else {
                    return Err(analysis_error(format!(
                        "Dotted call must name a member -- {member}"
                    )));
                };
                let mut operands = vec![current];
                operands.extend(analyze_all(args, scope)?);
                scope.dynamic(
                    BinderKey::InvokeMember {
                        name: id.name.clone(),
                        arity: args.len(),
                    },
                    operands,
                )
            }
            other => {
                return Err(analysis_error(format!(
                    "Dotted expression member must be an identifier or call -- {other}"
                )));
            }
        };
    }
    Ok(current)
}

fn analyze_assign(target: &Expr, value: &Expr, scope: &AnalysisScope<'_>) -> Result<Node, Error> {
    match target {
        Expr::Id(id) => {
            if id.is_keyword() {
                return Err(analysis_error(format!("Cannot assign to keyword {}", id.name)));
            }
            let value = analyze_expr(value, scope)?;
            Ok(match scope.lookup(&id.name) {
                Some((depth, index)) => Node::SetLocal {
                    depth,
                    index,
                    value: Box::new(value),
                },
                None => scope.dynamic(
                    BinderKey::SetMember(id.name.clone()),
                    vec![Node::Module, value],
                ),
            })
        }
        Expr::Elt { object, indexes } => {
            let mut args = vec![analyze_expr(object, scope)?];
            args.extend(analyze_all(indexes, scope)?);
            args.push(analyze_expr(value, scope)?);
            Ok(scope.dynamic(BinderKey::SetIndex(indexes.len()), args))
        }
        Expr::Dotted { object, members } => match members.as_slice() {
            [Expr::Id(member)] => {
                let object = analyze_expr(object, scope)?;
                let value = analyze_expr(value, scope)?;
                Ok(scope.dynamic(
                    BinderKey::SetMember(member.name.clone()),
                    vec![object, value],
                ))
            }
            _ => Err(analysis_error(format!(
                "Only a single member access is supported as an assignment target -- {target}"
            ))),
        },
        other => Err(analysis_error(format!(
            "Invalid left hand side of assignment -- {other}"
        ))),
    }
}

fn analyze_let_star(
    bindings: &[(String, Expr)],
    body: &[Expr],
    scope: &AnalysisScope<'_>,
) -> Result<Node, Error> {
    let let_scope = scope.child(ScopeKind::LetStar);
    let mut nodes = Vec::with_capacity(bindings.len() + body.len());
    for (name, init) in bindings {
        // The initializer cannot see its own binding.
        let value = analyze_expr(init, &let_scope)?;
        let index = let_scope.declare(name);
        nodes.push(Node::SetLocal {
            depth: 0,
            index,
            value: Box::new(value),
        });
    }
    nodes.extend(analyze_all(body, &let_scope)?);
    Ok(Node::Scope {
        slots: let_scope.slots.get(),
        body: nodes,
    })
}

fn analyze_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: &AnalysisScope<'_>,
) -> Result<Node, Error> {
    match op {
        BinaryOp::And => Ok(Node::If {
            test: Box::new(analyze_expr(left, scope)?),
            consequent: Box::new(analyze_expr(right, scope)?),
            alternative: Box::new(Node::Constant(Value::Bool(false))),
        }),
        BinaryOp::Or => {
            // (let* ((t1 left)) (if t1 t1 (let* ((t2 right)) (if t2 t2))))
            let first = format!("or.tmp.{}", scope.next_id());
            let second = format!("or.tmp.{}", scope.next_id());
            let test_temp = |name: &str, init: &Expr, alternative: Option<Box<Expr>>| Expr::LetStar {
                bindings: vec![(name.to_string(), init.clone())],
                body: vec![Expr::If {
                    test: Box::new(Expr::id(name)),
                    consequent: Box::new(Expr::id(name)),
                    alternative,
                }],
            };
            let inner = test_temp(&second, right, None);
            let outer = test_temp(&first, left, Some(Box::new(inner)));
            analyze_expr(&outer, scope)
        }
        _ => {
            let left = analyze_expr(left, scope)?;
            let right = analyze_expr(right, scope)?;
            Ok(scope.dynamic(BinderKey::Binary(op), vec![left, right]))
        }
    }
}

fn analyze_call(callee: &Expr, args: &[Expr], scope: &AnalysisScope<'_>) -> Result<Node, Error> {
    // obj.(...).name calls invoke the member directly on the prefix.
    if let Expr::Dotted { object, members } = callee {
        let Some((last, prefix)) = members.split_last() else {
            return Err(analysis_error("Dotted expression has no members"));
        };
        let Some(id) = last.as_id() else {
            return Err(analysis_error(format!(
                "Function call with dotted expression must end with an identifier -- {callee}"
            )));
        };
        let target = if prefix.is_empty() {
            analyze_expr(object, scope)?
        } else {
            analyze_dotted(object, prefix, scope)?
        };
        let mut operands = vec![target];
        operands.extend(analyze_all(args, scope)?);
        return Ok(scope.dynamic(
            BinderKey::InvokeMember {
                name: id.name.clone(),
                arity: args.len(),
            },
            operands,
        ));
    }

    if let Some(id) = callee.as_id()
        && id.name.eq_ignore_ascii_case("let")
        && scope.lookup(&id.name).is_none()
    {
        warn!(name = %id.name, args = args.len(), "call to undefined let, did you mean let*?");
    }

    let mut operands = vec![analyze_expr(callee, scope)?];
    operands.extend(analyze_all(args, scope)?);
    Ok(scope.dynamic(BinderKey::Invoke(args.len()), operands))
}

/// Quoted data: lists become list construction, identifiers become symbols.
fn analyze_quoted(datum: &Expr, scope: &AnalysisScope<'_>) -> Node {
    match datum {
        Expr::List(items) => Node::List(items.iter().map(|item| analyze_quoted(item, scope)).collect()),
        Expr::Id(id) => match keyword_constant(id.keyword) {
            Some(value) => Node::Constant(value),
            None => Node::Constant(Value::Symbol(scope.runtime().make_symbol(&id.name))),
        },
        Expr::Literal(literal) => Node::Constant(literal_value(literal)),
        Expr::Quote(inner) => Node::List(vec![
            Node::Constant(Value::Symbol(scope.runtime().make_symbol("quote"))),
            analyze_quoted(inner, scope),
        ]),
        // The parser only produces the forms above under a quote.
        other => Node::Constant(Value::from(other.to_string())),
    }
}
