//! Host type model.
//!
//! Host code describes its types as [`TypeDescriptor`]s (built with
//! [`TypeBuilder`]) and groups them into [`Assembly`] catalogs. Binders never
//! look at descriptors directly; they go through a [`Reflector`], which is the
//! seam where member lookup can be observed or replaced.

use crate::Error;
use crate::intooperation::IntoOperation;
use crate::value::{HostObject, Value};
use bitflags::bitflags;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type DescriptorId = u64;

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Body of a method. The receiver is `nil` for static methods.
pub type MethodFn = dyn Fn(&Value, Vec<Value>) -> Result<Value, Error> + Send + Sync;
pub type GetterFn = dyn Fn(&Value) -> Result<Value, Error> + Send + Sync;
pub type SetterFn = dyn Fn(&Value, Value) -> Result<(), Error> + Send + Sync;
/// Builds the host state of a new instance.
pub type ConstructorFn = dyn Fn(Vec<Value>) -> Result<Box<dyn Any + Send + Sync>, Error> + Send + Sync;
/// Index setter: receiver, indexes, value.
pub type IndexSetterFn = dyn Fn(&Value, Vec<Value>, Value) -> Result<(), Error> + Send + Sync;

/// The shape a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Any,
    Bool,
    Int,
    Str,
    Symbol,
    /// A list: a cons cell or `nil`.
    Cons,
    Function,
    /// A raw type. Type handles are accepted and unwrapped.
    Type,
    Host(DescriptorId),
}

impl ParamType {
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (ParamType::Any, _)
            | (ParamType::Bool, Value::Bool(_))
            | (ParamType::Int, Value::Int(_))
            | (ParamType::Str, Value::Str(_))
            | (ParamType::Symbol, Value::Symbol(_))
            | (ParamType::Cons, Value::Cons(_) | Value::Nil)
            | (ParamType::Function, Value::Function(_))
            | (ParamType::Type, Value::Type(_) | Value::TypeHandle(_)) => true,
            (ParamType::Host(id), Value::Instance(obj)) => obj.descriptor().id == id,
            _ => false,
        }
    }

    /// Convert an accepted argument to the form the host expects.
    pub fn convert(self, value: Value) -> Value {
        match (self, value) {
            (ParamType::Type, Value::TypeHandle(model)) => Value::Type(model.descriptor().clone()),
            (_, value) => value,
        }
    }
}

pub fn params_accept(params: &[ParamType], args: &[Value]) -> bool {
    params.len() == args.len() && params.iter().zip(args).all(|(p, a)| p.accepts(a))
}

pub fn convert_args(params: &[ParamType], args: &[Value]) -> Vec<Value> {
    params
        .iter()
        .zip(args)
        .map(|(param, arg)| param.convert(arg.clone()))
        .collect()
}

#[derive(Clone)]
pub struct Property {
    pub ty: ParamType,
    pub getter: Arc<GetterFn>,
    pub setter: Option<Arc<SetterFn>>,
}

#[derive(Clone)]
pub struct Method {
    pub params: Vec<ParamType>,
    pub body: Arc<MethodFn>,
}

#[derive(Debug, Clone)]
pub enum MemberKind {
    Property(Property),
    Method(Method),
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub is_static: bool,
    pub kind: MemberKind,
}

impl Member {
    pub fn as_property(&self) -> Option<&Property> {
        match &self.kind {
            MemberKind::Property(property) => Some(property),
            MemberKind::Method(_) => None,
        }
    }

    pub fn as_method(&self) -> Option<&Method> {
        match &self.kind {
            MemberKind::Method(method) => Some(method),
            MemberKind::Property(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct Constructor {
    pub params: Vec<ParamType>,
    pub body: Arc<ConstructorFn>,
}

#[derive(Clone)]
pub struct Indexer {
    pub params: Vec<ParamType>,
    pub getter: Arc<MethodFn>,
    pub setter: Option<Arc<IndexSetterFn>>,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("ty", &self.ty)
            .field("writable", &self.setter.is_some())
            .finish()
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("params", &self.params).finish()
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .finish()
    }
}

impl fmt::Debug for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("params", &self.params)
            .field("writable", &self.setter.is_some())
            .finish()
    }
}

/// The reflected shape of a host type.
#[derive(Debug)]
pub struct TypeDescriptor {
    pub id: DescriptorId,
    pub namespace: String,
    pub name: String,
    pub members: Vec<Arc<Member>>,
    pub constructors: Vec<Arc<Constructor>>,
    pub indexers: Vec<Arc<Indexer>>,
}

impl TypeDescriptor {
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn is_instance(&self, value: &Value) -> bool {
        matches!(value, Value::Instance(obj) if obj.descriptor().id == self.id)
    }
}

/// Borrow the host state of a method receiver.
pub fn state_of<'a, T: Any>(receiver: &'a Value, type_name: &str) -> Result<&'a T, Error> {
    match receiver {
        Value::Instance(obj) => obj.state::<T>().ok_or_else(|| {
            Error::TypeError(format!(
                "expected {type_name} receiver, got {}",
                obj.descriptor().full_name()
            ))
        }),
        other => Err(Error::TypeError(format!(
            "expected {type_name} receiver, got {}",
            other.type_name()
        ))),
    }
}

/// Fluent construction of a [`TypeDescriptor`].
///
/// ```
/// use sympl::reflect::{ParamType, TypeBuilder};
/// use sympl::Value;
///
/// let point = TypeBuilder::new("Geometry.Origin")
///     .static_property("X", ParamType::Int, || Ok(Value::Int(0)))
///     .static_method("Describe", &[ParamType::Int], |args| {
///         Ok(Value::from(format!("point at {}", args[0])))
///     })
///     .build();
/// assert_eq!(point.full_name(), "Geometry.Origin");
/// ```
pub struct TypeBuilder {
    id: DescriptorId,
    namespace: String,
    name: String,
    members: Vec<Arc<Member>>,
    constructors: Vec<Arc<Constructor>>,
    indexers: Vec<Arc<Indexer>>,
}

impl TypeBuilder {
    /// `full_name` is dotted; everything before the last dot is the namespace.
    pub fn new(full_name: &str) -> Self {
        let (namespace, name) = match full_name.rsplit_once('.') {
            Some((namespace, name)) => (namespace.to_string(), name.to_string()),
            None => (String::new(), full_name.to_string()),
        };
        TypeBuilder {
            id: NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed),
            namespace,
            name,
            members: Vec::new(),
            constructors: Vec::new(),
            indexers: Vec::new(),
        }
    }

    /// The id the built descriptor will carry, for `ParamType::Host` parameters
    /// that refer to the type being built.
    pub fn id(&self) -> DescriptorId {
        self.id
    }

    fn member(mut self, name: &str, is_static: bool, kind: MemberKind) -> Self {
        self.members.push(Arc::new(Member {
            name: name.to_string(),
            is_static,
            kind,
        }));
        self
    }

    pub fn property<G>(self, name: &str, ty: ParamType, getter: G) -> Self
    where
        G: Fn(&Value) -> Result<Value, Error> + Send + Sync + 'static,
    {
        let property = Property {
            ty,
            getter: Arc::new(getter),
            setter: None,
        };
        self.member(name, false, MemberKind::Property(property))
    }

    pub fn mutable_property<G, S>(self, name: &str, ty: ParamType, getter: G, setter: S) -> Self
    where
        G: Fn(&Value) -> Result<Value, Error> + Send + Sync + 'static,
        S: Fn(&Value, Value) -> Result<(), Error> + Send + Sync + 'static,
    {
        let property = Property {
            ty,
            getter: Arc::new(getter),
            setter: Some(Arc::new(setter)),
        };
        self.member(name, false, MemberKind::Property(property))
    }

    pub fn static_property<G>(self, name: &str, ty: ParamType, getter: G) -> Self
    where
        G: Fn() -> Result<Value, Error> + Send + Sync + 'static,
    {
        let property = Property {
            ty,
            getter: Arc::new(move |_: &Value| getter()),
            setter: None,
        };
        self.member(name, true, MemberKind::Property(property))
    }

    pub fn method<F>(self, name: &str, params: &[ParamType], body: F) -> Self
    where
        F: Fn(&Value, Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    {
        let method = Method {
            params: params.to_vec(),
            body: Arc::new(body),
        };
        self.member(name, false, MemberKind::Method(method))
    }

    pub fn static_method<F>(self, name: &str, params: &[ParamType], body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    {
        let method = Method {
            params: params.to_vec(),
            body: Arc::new(move |_: &Value, args| body(args)),
        };
        self.member(name, true, MemberKind::Method(method))
    }

    /// A static method from a typed Rust function; the parameter shapes
    /// come from its signature.
    pub fn static_function<Args, R, F>(self, name: &str, f: F) -> Self
    where
        F: IntoOperation<Args, R>,
    {
        let params = <F as IntoOperation<Args, R>>::param_types();
        let op = f.into_operation();
        self.static_method(name, &params, move |args| op(args))
    }

    pub fn constructor<F>(mut self, params: &[ParamType], body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Box<dyn Any + Send + Sync>, Error> + Send + Sync + 'static,
    {
        self.constructors.push(Arc::new(Constructor {
            params: params.to_vec(),
            body: Arc::new(body),
        }));
        self
    }

    pub fn indexer<G, S>(mut self, params: &[ParamType], getter: G, setter: S) -> Self
    where
        G: Fn(&Value, Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
        S: Fn(&Value, Vec<Value>, Value) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.indexers.push(Arc::new(Indexer {
            params: params.to_vec(),
            getter: Arc::new(getter),
            setter: Some(Arc::new(setter)),
        }));
        self
    }

    pub fn build(self) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor {
            id: self.id,
            namespace: self.namespace,
            name: self.name,
            members: self.members,
            constructors: self.constructors,
            indexers: self.indexers,
        })
    }
}

/// Wrap host state into a new instance value.
pub fn instantiate(descriptor: &Arc<TypeDescriptor>, state: Box<dyn Any + Send + Sync>) -> Value {
    Value::Instance(Arc::new(HostObject::new(descriptor.clone(), state)))
}

/// A named catalog of host types, reflected into the runtime's namespace tree.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub name: String,
    pub types: Vec<Arc<TypeDescriptor>>,
}

impl Assembly {
    pub fn new(name: impl Into<String>) -> Self {
        Assembly {
            name: name.into(),
            types: Vec::new(),
        }
    }

    pub fn with_type(mut self, ty: Arc<TypeDescriptor>) -> Self {
        self.types.push(ty);
        self
    }
}

bitflags! {
    /// Which members a lookup considers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindingFlags: u8 {
        const INSTANCE = 1;
        const STATIC = 1 << 1;
        const IGNORE_CASE = 1 << 2;
    }
}

/// Member lookup over host types.
pub trait Reflector: Send + Sync + fmt::Debug {
    fn members(&self, ty: &TypeDescriptor, name: &str, flags: BindingFlags) -> Vec<Arc<Member>>;

    fn constructors(&self, ty: &TypeDescriptor) -> Vec<Arc<Constructor>>;

    fn indexers(&self, ty: &TypeDescriptor) -> Vec<Arc<Indexer>>;
}

#[derive(Debug, Default)]
pub struct DefaultReflector;

impl Reflector for DefaultReflector {
    fn members(&self, ty: &TypeDescriptor, name: &str, flags: BindingFlags) -> Vec<Arc<Member>> {
        ty.members
            .iter()
            .filter(|member| {
                let name_matches = if flags.contains(BindingFlags::IGNORE_CASE) {
                    member.name.eq_ignore_ascii_case(name)
                } else {
                    member.name == name
                };
                let kind_matches = if member.is_static {
                    flags.contains(BindingFlags::STATIC)
                } else {
                    flags.contains(BindingFlags::INSTANCE)
                };
                name_matches && kind_matches
            })
            .cloned()
            .collect()
    }

    fn constructors(&self, ty: &TypeDescriptor) -> Vec<Arc<Constructor>> {
        ty.constructors.clone()
    }

    fn indexers(&self, ty: &TypeDescriptor) -> Vec<Arc<Indexer>> {
        ty.indexers.clone()
    }
}
