use crate::Error;
use crate::reflect::{ParamType, TypeDescriptor};
use crate::value::{Symbol, Value};
use std::sync::Arc;

/// Canonical erased host function type.
///
/// Host functions receive ownership of their argument vector, enabling
/// implementations that consume or rearrange arguments if desired.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

// =====================================================================
// Internal machinery for fixed-arity argument conversion
//
// This module defines `FromParam`, which is used by the fixed-arity
// adapters to turn runtime `Value`s into strongly-typed Rust
// parameters, and to report the shape each parameter accepts so that
// binders can select overloads. All conversions are implemented here
// so that the supported parameter types are easy to audit.
// =====================================================================

/// Core trait used by the fixed-arity adapters to turn `Value`s into
/// strongly-typed parameters.
///
/// The associated `Param<'a>` type is the parameter type as seen by
/// the host function for a given lifetime of the local `Value` slots
/// used during argument conversion.
pub(crate) trait FromParam {
    type Param<'a>;

    /// Convert a single argument into this parameter type.
    ///
    /// Implementations may either borrow from the provided `Value`
    /// (for `&str`), or consume it by value.
    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;

    /// The argument shape this parameter accepts during binding.
    fn param_type() -> ParamType;
}

/// Parameter types that are taken out of their argument slot by value.
pub(crate) trait ValueParam: Sized {
    const PARAM_TYPE: ParamType;

    fn from_value(value: Value) -> Result<Self, Error>;
}

fn type_error(expected: &str, got: &Value) -> Error {
    Error::TypeError(format!("expected {expected}, got {}", got.type_name()))
}

impl ValueParam for Value {
    const PARAM_TYPE: ParamType = ParamType::Any;

    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl ValueParam for i64 {
    const PARAM_TYPE: ParamType = ParamType::Int;

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Int(n) => Ok(n),
            other => Err(type_error("int", &other)),
        }
    }
}

impl ValueParam for bool {
    const PARAM_TYPE: ParamType = ParamType::Bool;

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(type_error("bool", &other)),
        }
    }
}

impl ValueParam for String {
    const PARAM_TYPE: ParamType = ParamType::Str;

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(type_error("string", &other)),
        }
    }
}

impl ValueParam for Arc<Symbol> {
    const PARAM_TYPE: ParamType = ParamType::Symbol;

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Symbol(symbol) => Ok(symbol),
            other => Err(type_error("symbol", &other)),
        }
    }
}

impl ValueParam for Arc<TypeDescriptor> {
    const PARAM_TYPE: ParamType = ParamType::Type;

    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Type(ty) => Ok(ty),
            Value::TypeHandle(model) => Ok(model.descriptor().clone()),
            other => Err(type_error("type", &other)),
        }
    }
}

// Blanket implementation for by-value parameters.
impl<T: ValueParam> FromParam for T {
    type Param<'a> = T;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        // Move the `Value` out so that host functions can consume owned
        // payloads without cloning.
        T::from_value(std::mem::replace(value, Value::Nil))
    }

    fn param_type() -> ParamType {
        T::PARAM_TYPE
    }
}

impl FromParam for &str {
    type Param<'a> = &'a str;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(type_error("string", other)),
        }
    }

    fn param_type() -> ParamType {
        ParamType::Str
    }
}

/// Normalize both plain values and `Result`-returning functions into `Result<T, Error>`.
pub trait IntoResult<T> {
    fn into_result(self) -> Result<T, Error>;
}

impl<T> IntoResult<T> for T {
    fn into_result(self) -> Result<T, Error> {
        Ok(self)
    }
}

impl<T> IntoResult<T> for Result<T, Error> {
    fn into_result(self) -> Result<T, Error> {
        self
    }
}

/// Convert a strongly-typed Rust function or closure into the erased
/// [`OperationFn`], parameterized by an argument tuple type.
///
/// `Args` names the Rust parameter types, which also determine the
/// [`ParamType`]s the resulting host function advertises:
///
/// ```
/// use sympl::intooperation::IntoOperation;
/// use sympl::reflect::ParamType;
/// use sympl::Value;
///
/// fn repeat(s: &str, n: i64) -> String {
///     s.repeat(n as usize)
/// }
///
/// let op = IntoOperation::<(&str, i64), String>::into_operation(repeat);
/// assert_eq!(op(vec![Value::from("ab"), Value::Int(2)]).unwrap(), Value::from("abab"));
/// assert_eq!(
///     <fn(&str, i64) -> String as IntoOperation<(&str, i64), String>>::param_types(),
///     vec![ParamType::Str, ParamType::Int]
/// );
/// ```
pub trait IntoOperation<Args, R> {
    fn into_operation(self) -> Arc<OperationFn>;

    fn param_types() -> Vec<ParamType>;
}

// =====================================================================
// Fixed-arity adapters
// =====================================================================

/// Helper macro to implement `IntoOperation` for functions of various
/// arities.
///
/// It performs arity checking up front, then destructures the owned
/// `Vec<Value>` into local `Value` slots so that `FromParam` can either
/// borrow from or consume each argument as needed before invoking the
/// host function.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, FR, R, $( $A ),+> IntoOperation<( $( $A, )+ ), R> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> FR
                + Send
                + Sync
                + 'static,
            FR: IntoResult<R> + 'static,
            R: Into<Value> + 'static,
            $( $A: FromParam, )+
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+ ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let result: FR = (self)( $( $p ),+ );
                            let value: R = result.into_result()?;
                            Ok(value.into())
                        }
                        _ => Err(Error::arity_error($arity, len)),
                    }
                })
            }

            fn param_types() -> Vec<ParamType> {
                vec![ $( <$A as FromParam>::param_type() ),+ ]
            }
        }
    };
}

// 0-arg functions / closures
impl<F, FR, R> IntoOperation<(), R> for F
where
    F: Fn() -> FR + Send + Sync + 'static,
    FR: IntoResult<R> + 'static,
    R: Into<Value> + 'static,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(0, args.len()));
            }

            let result: FR = (self)();
            let value: R = result.into_result()?;
            Ok(value.into())
        })
    }

    fn param_types() -> Vec<ParamType> {
        Vec::new()
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);
impl_into_operation_for_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
impl_into_operation_for_arity!(4, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4);
impl_into_operation_for_arity!(5, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4, v4, p4: A5);
impl_into_operation_for_arity!(6, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4, v4, p4: A5, v5, p5: A6);
