//! Runtime values.
//!
//! Scalars are stored inline; everything with identity (symbols, cons cells,
//! functions, host objects, types) is shared behind an `Arc`, so cloning a
//! `Value` never copies a list or an object.

use crate::Error;
use crate::binder::DynamicObject;
use crate::evaluator::{Frame, LambdaInfo};
use crate::intooperation::OperationFn;
use crate::reflect::{DescriptorId, MemberKind, TypeDescriptor};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Nesting of lists printed before eliding with `...`.
const MAX_PRINT_DEPTH: usize = 32;
/// Elements printed per list before eliding with `...`.
const MAX_PRINT_LENGTH: usize = 1000;

#[derive(Debug, Clone)]
pub enum Value {
    /// The empty list, and the "no value" result.
    Nil,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    Symbol(Arc<Symbol>),
    Cons(Arc<Cons>),
    Function(Arc<Function>),
    /// A foreign object that takes part in its own binding.
    Dynamic(Arc<dyn DynamicObject>),
    /// An instance of a reflected host type.
    Instance(Arc<HostObject>),
    /// A host type used as a value, as in `system.math` or `(new stringbuilder)`.
    TypeHandle(Arc<TypeModel>),
    /// A raw type descriptor, as handed to host methods expecting a type.
    Type(Arc<TypeDescriptor>),
}

/// The runtime shape of a value, as checked by type restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Nil,
    Bool,
    Int,
    Str,
    Symbol,
    Cons,
    /// Functions are shaped by their arity.
    Function(usize),
    Dynamic(TypeId),
    Host(DescriptorId),
    TypeHandle,
    Type,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn type_key(&self) -> TypeKey {
        match self {
            Value::Nil => TypeKey::Nil,
            Value::Bool(_) => TypeKey::Bool,
            Value::Int(_) => TypeKey::Int,
            Value::Str(_) => TypeKey::Str,
            Value::Symbol(_) => TypeKey::Symbol,
            Value::Cons(_) => TypeKey::Cons,
            Value::Function(f) => TypeKey::Function(f.arity),
            Value::Dynamic(obj) => TypeKey::Dynamic(obj.as_any().type_id()),
            Value::Instance(obj) => TypeKey::Host(obj.descriptor().id),
            Value::TypeHandle(_) => TypeKey::TypeHandle,
            Value::Type(_) => TypeKey::Type,
        }
    }

    /// Human-readable type name used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Nil => "nil".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Str(_) => "string".into(),
            Value::Symbol(_) => "symbol".into(),
            Value::Cons(_) => "cons".into(),
            Value::Function(_) => "function".into(),
            Value::Dynamic(obj) => obj.type_name(),
            Value::Instance(obj) => obj.descriptor().full_name(),
            Value::TypeHandle(model) => format!("TypeModel<{}>", model.descriptor().full_name()),
            Value::Type(_) => "System.Type".into(),
        }
    }

    /// Reference identity; scalars compare by value.
    pub fn same_instance(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
            (Value::Symbol(a), Value::Symbol(b)) => Arc::ptr_eq(a, b),
            (Value::Cons(a), Value::Cons(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Dynamic(a), Value::Dynamic(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::TypeHandle(a), Value::TypeHandle(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Structural for scalars and strings, identity for everything else.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => self.same_instance(other),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<Arc<Symbol>> for Value {
    fn from(symbol: Arc<Symbol>) -> Self {
        Value::Symbol(symbol)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, 0)
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, depth: usize) -> fmt::Result {
    match value {
        Value::Nil => f.write_str("nil"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Int(n) => write!(f, "{n}"),
        Value::Str(s) => f.write_str(s),
        Value::Symbol(symbol) => f.write_str(symbol.name()),
        Value::Cons(cons) => write_list(f, cons, depth),
        Value::Function(function) => write!(f, "#<function {}/{}>", function.name, function.arity),
        Value::Dynamic(obj) => write!(f, "#<{}>", obj.display_name()),
        Value::Instance(obj) => match obj.to_display_string() {
            Some(text) => f.write_str(&text),
            None => write!(f, "#<{}>", obj.descriptor().full_name()),
        },
        Value::TypeHandle(model) => write!(f, "#<TypeModel {}>", model.descriptor().full_name()),
        Value::Type(ty) => f.write_str(&ty.full_name()),
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, head: &Arc<Cons>, depth: usize) -> fmt::Result {
    if depth >= MAX_PRINT_DEPTH {
        return f.write_str("(...)");
    }
    f.write_str("(")?;
    let mut cell = head.clone();
    let mut printed = 0;
    loop {
        write_value(f, &cell.first(), depth + 1)?;
        printed += 1;
        match cell.rest() {
            Value::Nil => break,
            Value::Cons(next) => {
                if printed >= MAX_PRINT_LENGTH {
                    f.write_str(" ...")?;
                    break;
                }
                f.write_str(" ")?;
                cell = next;
            }
            tail => {
                f.write_str(" . ")?;
                write_value(f, &tail, depth + 1)?;
                break;
            }
        }
    }
    f.write_str(")")
}

/// An interned name with a value cell and a property list.
///
/// Symbols are created through [`crate::Runtime::make_symbol`], which keeps
/// one instance per case-insensitive name.
pub struct Symbol {
    name: String,
    value: RwLock<Value>,
    plist: RwLock<Value>,
}

impl Symbol {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Symbol {
            name: name.into(),
            value: RwLock::new(Value::Nil),
            plist: RwLock::new(Value::Nil),
        }
    }

    /// The spelling the symbol was first interned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Value {
        self.value.read().clone()
    }

    pub fn set_value(&self, value: Value) {
        *self.value.write() = value;
    }

    pub fn plist(&self) -> Value {
        self.plist.read().clone()
    }

    pub fn set_plist(&self, plist: Value) {
        *self.plist.write() = plist;
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.name)
    }
}

/// A mutable pair. Chains of cells whose last `rest` is `nil` are lists.
pub struct Cons {
    first: RwLock<Value>,
    rest: RwLock<Value>,
}

impl Cons {
    pub fn new(first: Value, rest: Value) -> Self {
        Cons {
            first: RwLock::new(first),
            rest: RwLock::new(rest),
        }
    }

    pub fn first(&self) -> Value {
        self.first.read().clone()
    }

    pub fn rest(&self) -> Value {
        self.rest.read().clone()
    }

    pub fn set_first(&self, value: Value) {
        *self.first.write() = value;
    }

    pub fn set_rest(&self, value: Value) {
        *self.rest.write() = value;
    }
}

// Unlink the spine iteratively; the default drop recurses once per cell.
impl Drop for Cons {
    fn drop(&mut self) {
        let mut next = std::mem::replace(self.rest.get_mut(), Value::Nil);
        while let Value::Cons(cell) = next {
            let Some(mut cell) = Arc::into_inner(cell) else {
                break;
            };
            next = std::mem::replace(cell.rest.get_mut(), Value::Nil);
        }
    }
}

// Cells may form cycles, so Debug goes through the capped printer.
impl fmt::Debug for Cons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = Arc::new(Cons::new(self.first(), self.rest()));
        write!(f, "Cons{}", Value::Cons(cell))
    }
}

pub fn cons(first: Value, rest: Value) -> Value {
    Value::Cons(Arc::new(Cons::new(first, rest)))
}

/// Build a proper list; no elements yields `nil`.
pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
    let items: Vec<Value> = items.into_iter().collect();
    items.into_iter().rev().fold(Value::Nil, |rest, first| cons(first, rest))
}

/// The cell at `index`, walking from the head.
pub fn nth_cell(list: &Value, index: i64) -> Result<Arc<Cons>, Error> {
    let out_of_range = || Error::IndexOutOfRange(format!("index {index} is outside the list"));
    let steps = usize::try_from(index).map_err(|_| out_of_range())?;
    let mut current = list.clone();
    for _ in 0..steps {
        current = match current {
            Value::Cons(cell) => cell.rest(),
            _ => return Err(out_of_range()),
        };
    }
    match current {
        Value::Cons(cell) => Ok(cell),
        _ => Err(out_of_range()),
    }
}

pub fn nth(list: &Value, index: i64) -> Result<Value, Error> {
    Ok(nth_cell(list, index)?.first())
}

/// Elements of a proper list prefix; stops at the first non-cons tail.
pub fn list_to_vec(list: &Value) -> Vec<Value> {
    let mut items = Vec::new();
    let mut current = list.clone();
    while let Value::Cons(cell) = current {
        items.push(cell.first());
        current = cell.rest();
    }
    items
}

pub enum FunctionBody {
    /// A closure over the frame it was created in.
    Lambda {
        code: Arc<LambdaInfo>,
        frame: Option<Arc<Frame>>,
        module: Arc<Expando>,
    },
    Native(Arc<OperationFn>),
}

pub struct Function {
    pub name: String,
    pub arity: usize,
    pub body: FunctionBody,
}

impl Function {
    pub fn native(name: impl Into<String>, arity: usize, op: Arc<OperationFn>) -> Self {
        Function {
            name: name.into(),
            arity,
            body: FunctionBody::Native(op),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.body {
            FunctionBody::Lambda { .. } => "lambda",
            FunctionBody::Native(_) => "native",
        };
        write!(f, "Function({} {}/{})", kind, self.name, self.arity)
    }
}

/// A member table with case-insensitive lookup that remembers the spelling
/// each member was first defined with, in definition order.
///
/// Module scopes and namespaces are expandos.
pub struct Expando {
    name: String,
    members: RwLock<IndexMap<String, (String, Value)>>,
}

impl Expando {
    pub fn new(name: impl Into<String>) -> Self {
        Expando {
            name: name.into(),
            members: RwLock::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.members
            .read()
            .get(&name.to_lowercase())
            .map(|(_, value)| value.clone())
    }

    pub fn set(&self, name: &str, value: Value) {
        let mut members = self.members.write();
        match members.get_mut(&name.to_lowercase()) {
            Some(slot) => slot.1 = value,
            None => {
                members.insert(name.to_lowercase(), (name.to_string(), value));
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.read().contains_key(&name.to_lowercase())
    }

    /// Member names with their original spelling, in definition order.
    pub fn member_names(&self) -> Vec<String> {
        self.members
            .read()
            .values()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl fmt::Debug for Expando {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expando")
            .field("name", &self.name)
            .field("members", &self.member_names())
            .finish()
    }
}

/// An instance of a reflected host type: its descriptor plus opaque state
/// owned by the host code that constructed it.
pub struct HostObject {
    descriptor: Arc<TypeDescriptor>,
    state: Box<dyn Any + Send + Sync>,
}

impl HostObject {
    pub fn new(descriptor: Arc<TypeDescriptor>, state: Box<dyn Any + Send + Sync>) -> Self {
        HostObject { descriptor, state }
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state.downcast_ref::<T>()
    }

    /// The result of the type's parameterless `ToString` method, if it has one.
    fn to_display_string(self: &Arc<Self>) -> Option<String> {
        let receiver = Value::Instance(self.clone());
        self.descriptor.members.iter().find_map(|member| match &member.kind {
            MemberKind::Method(method)
                if !member.is_static
                    && method.params.is_empty()
                    && member.name.eq_ignore_ascii_case("ToString") =>
            {
                match (method.body)(&receiver, Vec::new()) {
                    Ok(Value::Str(s)) => Some(s.to_string()),
                    _ => None,
                }
            }
            _ => None,
        })
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({})", self.descriptor.full_name())
    }
}

/// A host type used as a value. Binds static members and constructors of
/// the type it wraps.
#[derive(Debug)]
pub struct TypeModel {
    descriptor: Arc<TypeDescriptor>,
}

impl TypeModel {
    pub fn new(descriptor: Arc<TypeDescriptor>) -> Self {
        TypeModel { descriptor }
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    fn ints(items: &[i64]) -> Value {
        list(items.iter().map(|n| Value::Int(*n)))
    }

    #[test]
    fn test_long_list_drops_without_recursion() {
        let l = list((0..1_000_000).map(Value::Int));
        assert_eq!(nth(&l, 999_999).unwrap(), Value::Int(999_999));
        drop(l);

        // a shared tail survives its other owner being dropped
        let tail = list((0..1_000).map(Value::Int));
        let head = cons(Value::Int(-1), tail.clone());
        drop(head);
        assert_eq!(nth(&tail, 999).unwrap(), Value::Int(999));
    }

    #[test]
    fn test_list_construction_and_indexing() {
        assert!(list(Vec::new()).is_nil());

        let l = ints(&[10, 20, 30]);
        assert_eq!(nth(&l, 0).unwrap(), Value::Int(10));
        assert_eq!(nth(&l, 1).unwrap(), Value::Int(20));
        assert_eq!(nth(&l, 2).unwrap(), Value::Int(30));
        assert!(matches!(nth(&l, 3), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(nth(&l, 5), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(nth(&l, -1), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(nth(&Value::Nil, 0), Err(Error::IndexOutOfRange(_))));

        nth_cell(&l, 1).unwrap().set_first(Value::from("x"));
        assert_eq!(list_to_vec(&l), vec![Value::Int(10), Value::from("x"), Value::Int(30)]);
    }

    #[test]
    fn test_display() {
        let test_cases = vec![
            (Value::Nil, "nil"),
            (Value::Bool(true), "true"),
            (Value::Int(-7), "-7"),
            (Value::from("text"), "text"),
            (ints(&[1, 2, 3]), "(1 2 3)"),
            (cons(Value::Int(1), Value::Int(2)), "(1 . 2)"),
            (list([ints(&[1]), Value::Nil, ints(&[])]), "((1) nil nil)"),
            (cons(Value::Int(1), cons(Value::Int(2), Value::from("t"))), "(1 2 . t)"),
        ];
        for (value, expected) in test_cases {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn test_display_terminates_on_cycles() {
        let l = ints(&[1, 2]);
        let Value::Cons(head) = &l else { panic!("expected cons") };
        nth_cell(&l, 1).unwrap().set_rest(l.clone());
        let printed = l.to_string();
        assert!(printed.starts_with("(1 2 1 2"));
        assert!(printed.ends_with("...)"));
        // break the cycle so the test does not leak
        head.set_rest(Value::Nil);

        let nested = (0..40).fold(Value::Int(0), |inner, _| list([inner]));
        assert!(nested.to_string().contains("(...)"));
    }

    #[test]
    fn test_truthiness_and_identity() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::from("").is_truthy());

        let a = Value::from("same");
        let b = Value::from("same");
        assert_eq!(a, b);
        assert!(!a.same_instance(&b));
        assert!(a.same_instance(&a.clone()));
        assert!(Value::Int(3).same_instance(&Value::Int(3)));
    }

    #[test]
    fn test_expando_is_case_insensitive_and_ordered() {
        let scope = Expando::new("module");
        scope.set("Foo", Value::Int(1));
        scope.set("bar", Value::Int(2));
        scope.set("FOO", Value::Int(3));
        assert_eq!(scope.get("foo"), Some(Value::Int(3)));
        assert_eq!(scope.member_names(), vec!["Foo".to_string(), "bar".to_string()]);
        assert!(scope.contains("BAR"));
        assert_eq!(scope.get("baz"), None);
    }

    #[test]
    fn test_type_keys() {
        assert_eq!(Value::Nil.type_key(), TypeKey::Nil);
        assert_eq!(Value::from("s").type_key(), TypeKey::Str);
        assert_eq!(ints(&[1]).type_key(), TypeKey::Cons);
        let scope: Arc<dyn DynamicObject> = Arc::new(Expando::new("m"));
        assert_eq!(
            Value::Dynamic(scope).type_key(),
            TypeKey::Dynamic(TypeId::of::<Expando>())
        );
    }
}
