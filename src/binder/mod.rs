//! Dynamic dispatch: binders, rules and call sites.
//!
//! Every operation whose receiver is only known at run time is compiled into
//! a [`CallSite`]. On each execution the site looks for a cached [`Rule`]
//! whose [`Restrictions`] hold for the current arguments and runs its action.
//! On a miss it asks its canonical [`Binder`] to bind the operation against
//! the concrete arguments, which produces one of:
//!
//! - a rule: an action plus the guard under which it stays valid,
//! - a deferral: some participant has no value yet, so the site builds a rule
//!   that computes the participants and re-dispatches through a nested site,
//! - a failure: an error, cached as a rule that raises it for the same shapes.
//!
//! Binders are shared by every site performing the same operation (see
//! [`BinderKey`]) and keep a second-level cache of the rules they produced,
//! so a fresh site whose operation was already bound elsewhere does not
//! reflect again.
//!
//! Before binding with its own reflection-based logic, each binder offers
//! the operation to the target's [`DynamicObject`] implementation, if the
//! target has one. Objects that decline (or cannot finish the job) hand back
//! to the binder's `fallback` methods.

mod callsite;
mod index;
mod interop;
mod invoke;
mod member;
mod operation;

pub use callsite::CallSite;
pub use index::{GetIndexBinder, SetIndexBinder};
pub use interop::DynamicObject;
pub use invoke::{CreateInstanceBinder, InvokeBinder};
pub use member::{GetMemberBinder, InvokeMemberBinder, SetMemberBinder};
pub use operation::{BinaryOperationBinder, UnaryOperationBinder};

use crate::Error;
use crate::ast::{BinaryOp, UnaryOp};
use crate::reflect::{ParamType, params_accept};
use crate::runtime::Runtime;
use crate::value::{TypeKey, Value};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// The executable half of a rule. Receives the call site's arguments,
/// target first.
pub type Action = Arc<dyn Fn(&Runtime, &[Value]) -> Result<Value, Error> + Send + Sync>;

/// Computes a participant value from a call site's arguments.
pub type DerivedFn = Arc<dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync>;

/// Identity of a binder. Sites with equal keys share one binder instance.
///
/// Member names keep their spelling; lookup itself ignores case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BinderKey {
    GetMember(String),
    SetMember(String),
    InvokeMember { name: String, arity: usize },
    Invoke(usize),
    CreateInstance(usize),
    GetIndex(usize),
    SetIndex(usize),
    Binary(BinaryOp),
    Unary(UnaryOp),
}

impl fmt::Display for BinderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinderKey::GetMember(name) => write!(f, "GetMember({name})"),
            BinderKey::SetMember(name) => write!(f, "SetMember({name})"),
            BinderKey::InvokeMember { name, arity } => write!(f, "InvokeMember({name}/{arity})"),
            BinderKey::Invoke(arity) => write!(f, "Invoke/{arity}"),
            BinderKey::CreateInstance(arity) => write!(f, "CreateInstance/{arity}"),
            BinderKey::GetIndex(count) => write!(f, "GetIndex/{count}"),
            BinderKey::SetIndex(count) => write!(f, "SetIndex/{count}"),
            BinderKey::Binary(op) => write!(f, "BinaryOperation({op})"),
            BinderKey::Unary(op) => write!(f, "UnaryOperation({op})"),
        }
    }
}

/// Resolves one kind of dynamic operation against concrete argument shapes.
pub trait Binder: Send + Sync + fmt::Debug {
    fn key(&self) -> &BinderKey;

    /// Rules this binder produced, shared by all of its call sites.
    fn cache(&self) -> &RuleCache;

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome;
}

/// Build the binder for `key`.
pub(crate) fn make_binder(key: BinderKey, cache_size: usize) -> Arc<dyn Binder> {
    let cache = RuleCache::new(cache_size);
    match key.clone() {
        BinderKey::GetMember(name) => Arc::new(GetMemberBinder::new(key, name, cache)),
        BinderKey::SetMember(name) => Arc::new(SetMemberBinder::new(key, name, cache)),
        BinderKey::InvokeMember { name, .. } => Arc::new(InvokeMemberBinder::new(key, name, cache)),
        BinderKey::Invoke(_) => Arc::new(InvokeBinder::new(key, cache)),
        BinderKey::CreateInstance(_) => Arc::new(CreateInstanceBinder::new(key, cache)),
        BinderKey::GetIndex(_) => Arc::new(GetIndexBinder::new(key, cache)),
        BinderKey::SetIndex(_) => Arc::new(SetIndexBinder::new(key, cache)),
        BinderKey::Binary(op) => Arc::new(BinaryOperationBinder::new(key, op, cache)),
        BinderKey::Unary(op) => Arc::new(UnaryOperationBinder::new(key, op, cache)),
    }
}

/// One condition of a guard, over the argument at `index`.
#[derive(Debug, Clone, PartialEq)]
pub enum Restriction {
    Type { index: usize, key: TypeKey },
    Nil { index: usize },
    /// The argument is this very object.
    Instance { index: usize, value: Value },
}

impl Restriction {
    pub fn holds(&self, args: &[Value]) -> bool {
        match self {
            Restriction::Type { index, key } => args.get(*index).is_some_and(|v| v.type_key() == *key),
            Restriction::Nil { index } => args.get(*index).is_some_and(Value::is_nil),
            Restriction::Instance { index, value } => {
                args.get(*index).is_some_and(|v| v.same_instance(value))
            }
        }
    }
}

/// A guard: the conjunction of its restrictions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Restrictions(Vec<Restriction>);

impl Restrictions {
    /// The default restriction for an argument: `nil` is checked by value,
    /// type handles by identity, everything else by runtime type.
    pub fn for_value(index: usize, value: &Value) -> Self {
        let restriction = match value {
            Value::Nil => Restriction::Nil { index },
            Value::TypeHandle(_) => Restriction::Instance {
                index,
                value: value.clone(),
            },
            other => Restriction::Type {
                index,
                key: other.type_key(),
            },
        };
        Restrictions(vec![restriction])
    }

    pub fn instance(index: usize, value: &Value) -> Self {
        Restrictions(vec![Restriction::Instance {
            index,
            value: value.clone(),
        }])
    }

    pub fn merge(mut self, other: &Restrictions) -> Self {
        for restriction in &other.0 {
            if !self.0.contains(restriction) {
                self.0.push(restriction.clone());
            }
        }
        self
    }

    pub fn holds(&self, args: &[Value]) -> bool {
        self.0.iter().all(|r| r.holds(args))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Restriction> {
        self.0.iter()
    }
}

/// Where a participant's value comes from when a rule runs.
#[derive(Clone)]
pub enum ArgExpr {
    /// The call site argument at this position.
    Arg(usize),
    /// Computed from the call site arguments.
    Derived(DerivedFn),
}

impl ArgExpr {
    pub fn evaluate(&self, args: &[Value]) -> Result<Value, Error> {
        match self {
            ArgExpr::Arg(index) => arg(args, *index).cloned(),
            ArgExpr::Derived(f) => f(args),
        }
    }
}

impl fmt::Debug for ArgExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgExpr::Arg(index) => write!(f, "Arg({index})"),
            ArgExpr::Derived(_) => f.write_str("Derived(<fn>)"),
        }
    }
}

/// A participant in a binding: how to obtain it, its value when known, and
/// the restrictions already implied by how it was obtained.
#[derive(Debug, Clone)]
pub struct MetaArg {
    expr: ArgExpr,
    value: Option<Value>,
    restrictions: Restrictions,
}

impl MetaArg {
    pub fn new(index: usize, value: Value) -> Self {
        MetaArg {
            expr: ArgExpr::Arg(index),
            restrictions: Restrictions::for_value(index, &value),
            value: Some(value),
        }
    }

    /// A participant whose value is only available once a rule runs.
    pub fn derived(f: DerivedFn, restrictions: Restrictions) -> Self {
        MetaArg {
            expr: ArgExpr::Derived(f),
            value: None,
            restrictions,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn expr(&self) -> &ArgExpr {
        &self.expr
    }

    pub fn restrictions(&self) -> &Restrictions {
        &self.restrictions
    }

    pub fn index(&self) -> Option<usize> {
        match self.expr {
            ArgExpr::Arg(index) => Some(index),
            ArgExpr::Derived(_) => None,
        }
    }

    /// The target's own binding capability, if it has one.
    pub fn interop(&self) -> Option<&dyn DynamicObject> {
        match self.value.as_ref()? {
            Value::Dynamic(obj) => Some(obj.as_ref()),
            Value::TypeHandle(model) => Some(model.as_ref()),
            _ => None,
        }
    }
}

/// Restrictions of a target and its arguments together.
pub fn combined(target: &MetaArg, args: &[MetaArg]) -> Restrictions {
    args.iter()
        .fold(target.restrictions().clone(), |acc, a| acc.merge(a.restrictions()))
}

/// Runtime type names of the participants, for error messages.
pub(crate) fn shape(args: &[MetaArg]) -> String {
    args.iter()
        .map(|a| a.value().map_or_else(|| "?".to_string(), Value::type_name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The call site argument at `index`.
pub(crate) fn arg(args: &[Value], index: usize) -> Result<&Value, Error> {
    args.get(index).ok_or_else(|| {
        Error::InvalidOperation(format!(
            "rule expected an argument at position {index}, got {} arguments",
            args.len()
        ))
    })
}

/// Values of participants that all have one.
pub(crate) fn values(args: &[MetaArg]) -> Option<Vec<Value>> {
    args.iter().map(|a| a.value().cloned()).collect()
}

/// A guard paired with the action that is valid while the guard holds.
#[derive(Clone)]
pub struct Rule {
    pub restrictions: Restrictions,
    pub action: Action,
}

impl Rule {
    pub fn new(restrictions: Restrictions, action: Action) -> Self {
        Rule {
            restrictions,
            action,
        }
    }

    /// A rule that raises `error` whenever its guard holds.
    pub fn error(restrictions: Restrictions, error: Error) -> Self {
        Rule::new(restrictions, Arc::new(move |_, _| Err(error.clone())))
    }

    pub fn matches(&self, args: &[Value]) -> bool {
        self.restrictions.holds(args)
    }

    pub fn run(&self, rt: &Runtime, args: &[Value]) -> Result<Value, Error> {
        (self.action)(rt, args)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("restrictions", &self.restrictions)
            .finish()
    }
}

/// A binding postponed until every participant has a value.
#[derive(Debug, Clone)]
pub struct Deferral {
    pub restrictions: Restrictions,
    pub participants: Vec<ArgExpr>,
}

#[derive(Debug, Clone)]
pub enum BindOutcome {
    Rule(Rule),
    Defer(Deferral),
    Fail {
        error: Error,
        restrictions: Restrictions,
    },
}

impl BindOutcome {
    pub fn rule(restrictions: Restrictions, action: Action) -> Self {
        BindOutcome::Rule(Rule::new(restrictions, action))
    }

    pub fn fail(error: Error, restrictions: Restrictions) -> Self {
        BindOutcome::Fail {
            error,
            restrictions,
        }
    }

    /// Postpone binding over these participants.
    pub fn defer(target: &MetaArg, args: &[MetaArg]) -> Self {
        BindOutcome::Defer(Deferral {
            restrictions: combined(target, args),
            participants: std::iter::once(target)
                .chain(args)
                .map(|a| a.expr().clone())
                .collect(),
        })
    }
}

/// Defer unless every participant has a value.
pub(crate) fn defer_if_unready(target: &MetaArg, args: &[MetaArg]) -> Option<BindOutcome> {
    if target.has_value() && args.iter().all(MetaArg::has_value) {
        None
    } else {
        Some(BindOutcome::defer(target, args))
    }
}

/// Outcome of choosing among overloads by parameter shapes.
pub(crate) enum Selection<T> {
    One(T),
    Nothing,
    Ambiguous(usize),
}

pub(crate) fn select_overload<T>(
    candidates: impl IntoIterator<Item = T>,
    params: impl Fn(&T) -> &[ParamType],
    args: &[Value],
) -> Selection<T> {
    let mut matching: Vec<T> = candidates
        .into_iter()
        .filter(|c| params_accept(params(c), args))
        .collect();
    match matching.len() {
        0 => Selection::Nothing,
        1 => matching.pop().map_or(Selection::Nothing, Selection::One),
        n => Selection::Ambiguous(n),
    }
}

/// A bounded most-recently-added-first list of rules.
///
/// Readers scan under a shared lock; a racing insert at worst stores a rule
/// twice.
pub struct RuleCache {
    capacity: usize,
    rules: RwLock<VecDeque<Rule>>,
}

impl RuleCache {
    pub fn new(capacity: usize) -> Self {
        RuleCache {
            capacity,
            rules: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn find(&self, args: &[Value]) -> Option<Rule> {
        self.rules.read().iter().find(|r| r.matches(args)).cloned()
    }

    /// Add a rule, evicting the oldest one beyond capacity.
    pub fn insert(&self, rule: Rule) {
        if self.capacity == 0 {
            return;
        }
        let mut rules = self.rules.write();
        rules.push_front(rule);
        rules.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

impl fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::value::list;

    fn constant_rule(restrictions: Restrictions, n: i64) -> Rule {
        Rule::new(restrictions, Arc::new(move |_, _| Ok(Value::Int(n))))
    }

    #[test]
    fn test_restrictions() {
        let nil = Restrictions::for_value(0, &Value::Nil);
        assert!(nil.holds(&[Value::Nil]));
        assert!(!nil.holds(&[Value::Bool(false)]));

        let int_then_str =
            Restrictions::for_value(0, &Value::Int(1)).merge(&Restrictions::for_value(1, &Value::from("s")));
        assert!(int_then_str.holds(&[Value::Int(5), Value::from("other")]));
        assert!(!int_then_str.holds(&[Value::Int(5), Value::Int(6)]));
        assert!(!int_then_str.holds(&[Value::Int(5)]));

        let l = list([Value::Int(1)]);
        let same = Restrictions::instance(0, &l);
        assert!(same.holds(&[l.clone()]));
        assert!(!same.holds(&[list([Value::Int(1)])]));

        let merged = nil.clone().merge(&nil);
        assert_eq!(merged, nil);
    }

    #[test]
    fn test_rule_cache_eviction_order() {
        let cache = RuleCache::new(2);
        cache.insert(constant_rule(Restrictions::for_value(0, &Value::Int(0)), 1));
        cache.insert(constant_rule(Restrictions::for_value(0, &Value::from("")), 2));
        cache.insert(constant_rule(Restrictions::for_value(0, &Value::Bool(true)), 3));
        assert_eq!(cache.len(), 2);
        // the int rule was the oldest and is gone
        assert!(cache.find(&[Value::Int(7)]).is_none());
        assert!(cache.find(&[Value::from("x")]).is_some());
        assert!(cache.find(&[Value::Bool(false)]).is_some());

        let disabled = RuleCache::new(0);
        disabled.insert(constant_rule(Restrictions::for_value(0, &Value::Nil), 0));
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_defer_collects_participants() {
        let target = MetaArg::derived(
            Arc::new(|args: &[Value]| Ok(args[0].clone())),
            Restrictions::for_value(0, &Value::Int(0)),
        );
        let other = MetaArg::new(1, Value::from("s"));
        assert!(defer_if_unready(&other, &[]).is_none());

        let Some(BindOutcome::Defer(deferral)) = defer_if_unready(&target, &[other]) else {
            panic!("expected deferral");
        };
        assert_eq!(deferral.participants.len(), 2);
        assert!(deferral.restrictions.holds(&[Value::Int(1), Value::from("t")]));
        let args = [Value::Int(9), Value::from("t")];
        assert_eq!(deferral.participants[0].evaluate(&args).unwrap(), Value::Int(9));
        assert_eq!(deferral.participants[1].evaluate(&args).unwrap(), Value::from("t"));
    }

    #[test]
    fn test_select_overload() {
        let candidates = vec![vec![ParamType::Int], vec![ParamType::Str], vec![ParamType::Any]];
        let pick = |args: &[Value]| select_overload(candidates.iter(), |c| c.as_slice(), args);

        assert!(matches!(pick(&[Value::Int(1)]), Selection::Ambiguous(2)));
        assert!(matches!(pick(&[Value::Nil]), Selection::One(c) if c == &vec![ParamType::Any]));
        assert!(matches!(pick(&[]), Selection::Nothing));
    }

    #[test]
    fn test_short_circuit_operators_do_not_bind() {
        let rt = Runtime::new();
        for op in [BinaryOp::And, BinaryOp::Or] {
            let site = rt.call_site(BinderKey::Binary(op));
            match site.invoke(&rt, &[Value::Int(1), Value::Int(2)]) {
                Err(Error::InvalidOperation(msg)) => assert!(msg.contains(&op.to_string()), "{msg}"),
                other => panic!("{op}: expected InvalidOperation, got {other:?}"),
            }
        }
    }
}
