//! Built-in operator semantics and the reflected shapes of built-in values.
//!
//! ## Operators
//!
//! Binary operators are resolved by the binary-operation binder against a
//! single registry of `(operator, operand kind)` entries. The first entry
//! whose operand kind accepts both operands wins:
//!
//! ```scheme
//! (+ 1 2)          ; 3, checked integer arithmetic
//! (+ "a" "b")      ; "ab", string concatenation
//! (< "a" "b")      ; true, ordinal string comparison
//! (= true false)   ; false
//! (= 'a 'a)        ; true, other pairs compare by identity
//! ```
//!
//! ## Error Handling
//!
//! - **No Coercion**: numbers never become strings and `(+ 1 "a")` fails to bind
//! - **Overflow Detection**: arithmetic reports overflow and division by zero
//!   as `InvalidOperation` instead of wrapping or panicking
//!
//! ## Built-in value shapes
//!
//! Strings, integers, booleans, symbols, cons cells, functions and raw types
//! are described by [`TypeDescriptor`]s so that member access on them goes
//! through the same reflection path as host types.

use crate::Error;
use crate::ast::BinaryOp;
use crate::intooperation::{IntoOperation, OperationFn};
use crate::reflect::{ParamType, TypeBuilder, TypeDescriptor};
use crate::value::Value;
use std::sync::{Arc, LazyLock};

/// Which operand pairs an operator entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    Int,
    Str,
    Bool,
    Any,
}

impl Operands {
    fn accepts(self, left: &Value, right: &Value) -> bool {
        match self {
            Operands::Int => matches!((left, right), (Value::Int(_), Value::Int(_))),
            Operands::Str => matches!((left, right), (Value::Str(_), Value::Str(_))),
            Operands::Bool => matches!((left, right), (Value::Bool(_), Value::Bool(_))),
            Operands::Any => true,
        }
    }
}

/// One entry of the binary operator registry.
#[derive(Clone)]
pub struct BuiltinOperator {
    pub op: BinaryOp,
    pub operands: Operands,
    pub apply: Arc<OperationFn>,
}

impl std::fmt::Debug for BuiltinOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BuiltinOperator({} {:?})", self.op, self.operands)
    }
}

//
// Operator implementations
//

// Macro to generate checked integer arithmetic
macro_rules! int_arithmetic {
    ($name:ident, $checked:ident, $what:expr) => {
        fn $name(a: i64, b: i64) -> Result<i64, Error> {
            a.$checked(b)
                .ok_or_else(|| Error::InvalidOperation(format!("Integer overflow in {}", $what)))
        }
    };
}

int_arithmetic!(int_add, checked_add, "addition");
int_arithmetic!(int_sub, checked_sub, "subtraction");
int_arithmetic!(int_mul, checked_mul, "multiplication");

fn int_div(a: i64, b: i64) -> Result<i64, Error> {
    if b == 0 {
        return Err(Error::InvalidOperation("Division by zero".into()));
    }
    a.checked_div(b)
        .ok_or_else(|| Error::InvalidOperation("Integer overflow in division".into()))
}

// Macro to generate comparison functions over one parameter type
macro_rules! comparison {
    ($name:ident, $ty:ty, $op:tt) => {
        fn $name(a: $ty, b: $ty) -> bool {
            a $op b
        }
    };
}

comparison!(int_eq, i64, ==);
comparison!(int_ne, i64, !=);
comparison!(int_gt, i64, >);
comparison!(int_lt, i64, <);
comparison!(str_eq, &str, ==);
comparison!(str_ne, &str, !=);
comparison!(str_gt, &str, >);
comparison!(str_lt, &str, <);
comparison!(bool_eq, bool, ==);
comparison!(bool_ne, bool, !=);

fn str_concat(a: &str, b: &str) -> String {
    let mut result = String::with_capacity(a.len() + b.len());
    result.push_str(a);
    result.push_str(b);
    result
}

fn same_instance(a: Value, b: Value) -> bool {
    a.same_instance(&b)
}

fn different_instance(a: Value, b: Value) -> bool {
    !a.same_instance(&b)
}

/// Registry of binary operators, in lookup order.
///
/// Entries are wired through the same typed adapters host functions use,
/// once, at initialization time.
static BINARY_OPERATORS: LazyLock<Vec<BuiltinOperator>> = LazyLock::new(|| {
    fn typed<Args, R, F: IntoOperation<Args, R>>(f: F) -> Arc<OperationFn> {
        f.into_operation()
    }

    fn entry(op: BinaryOp, operands: Operands, apply: Arc<OperationFn>) -> BuiltinOperator {
        BuiltinOperator {
            op,
            operands,
            apply,
        }
    }

    use BinaryOp::*;
    vec![
        // Integer arithmetic and comparison
        entry(Add, Operands::Int, typed::<(i64, i64), i64, _>(int_add)),
        entry(Subtract, Operands::Int, typed::<(i64, i64), i64, _>(int_sub)),
        entry(Multiply, Operands::Int, typed::<(i64, i64), i64, _>(int_mul)),
        entry(Divide, Operands::Int, typed::<(i64, i64), i64, _>(int_div)),
        entry(Equal, Operands::Int, typed::<(i64, i64), bool, _>(int_eq)),
        entry(NotEqual, Operands::Int, typed::<(i64, i64), bool, _>(int_ne)),
        entry(GreaterThan, Operands::Int, typed::<(i64, i64), bool, _>(int_gt)),
        entry(LessThan, Operands::Int, typed::<(i64, i64), bool, _>(int_lt)),
        // Strings
        entry(Add, Operands::Str, typed::<(&str, &str), String, _>(str_concat)),
        entry(Equal, Operands::Str, typed::<(&str, &str), bool, _>(str_eq)),
        entry(NotEqual, Operands::Str, typed::<(&str, &str), bool, _>(str_ne)),
        entry(GreaterThan, Operands::Str, typed::<(&str, &str), bool, _>(str_gt)),
        entry(LessThan, Operands::Str, typed::<(&str, &str), bool, _>(str_lt)),
        // Booleans
        entry(Equal, Operands::Bool, typed::<(bool, bool), bool, _>(bool_eq)),
        entry(NotEqual, Operands::Bool, typed::<(bool, bool), bool, _>(bool_ne)),
        // Everything else: identity
        entry(Equal, Operands::Any, typed::<(Value, Value), bool, _>(same_instance)),
        entry(NotEqual, Operands::Any, typed::<(Value, Value), bool, _>(different_instance)),
    ]
});

/// Find the operator entry for `op` applied to these operands.
pub(crate) fn find_binary_operator(
    op: BinaryOp,
    left: &Value,
    right: &Value,
) -> Option<&'static BuiltinOperator> {
    BINARY_OPERATORS
        .iter()
        .find(|entry| entry.op == op && entry.operands.accepts(left, right))
}

/// `eq`: identity via [`Value::same_instance`], which already compares
/// integers and booleans by value.
pub fn eq_values(left: &Value, right: &Value) -> bool {
    left.same_instance(right)
}

//
// Built-in value shapes
//

fn receiver_str(this: &Value) -> Result<&str, Error> {
    this.as_str()
        .ok_or_else(|| Error::TypeError(format!("expected string receiver, got {}", this.type_name())))
}

fn int_arg(args: &[Value], index: usize) -> Result<i64, Error> {
    args.get(index)
        .and_then(Value::as_int)
        .ok_or_else(|| Error::TypeError(format!("expected int argument at position {index}")))
}

fn to_string_method(this: &Value, _: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::from(this.to_string()))
}

static STRING_TYPE: LazyLock<Arc<TypeDescriptor>> = LazyLock::new(|| {
    TypeBuilder::new("System.String")
        .property("Length", ParamType::Int, |this| {
            let count = receiver_str(this)?.chars().count();
            Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
        })
        .method("ToUpper", &[], |this, _| {
            Ok(Value::from(receiver_str(this)?.to_uppercase()))
        })
        .method("ToLower", &[], |this, _| {
            Ok(Value::from(receiver_str(this)?.to_lowercase()))
        })
        .method("Trim", &[], |this, _| Ok(Value::from(receiver_str(this)?.trim())))
        .method("Contains", &[ParamType::Str], |this, args| {
            let needle = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::Bool(receiver_str(this)?.contains(needle)))
        })
        .method("Substring", &[ParamType::Int, ParamType::Int], |this, args| {
            let text = receiver_str(this)?;
            let (start, length) = (int_arg(&args, 0)?, int_arg(&args, 1)?);
            let count = text.chars().count();
            let in_range = usize::try_from(start)
                .ok()
                .zip(usize::try_from(length).ok())
                .filter(|(s, l)| s.checked_add(*l).is_some_and(|end| end <= count));
            let Some((start, length)) = in_range else {
                return Err(Error::IndexOutOfRange(format!(
                    "Substring({start}, {length}) on a string of length {count}"
                )));
            };
            Ok(Value::from(text.chars().skip(start).take(length).collect::<String>()))
        })
        .method("ToString", &[], to_string_method)
        .build()
});

static INT_TYPE: LazyLock<Arc<TypeDescriptor>> = LazyLock::new(|| {
    TypeBuilder::new("System.Int64")
        .method("ToString", &[], to_string_method)
        .build()
});

static BOOL_TYPE: LazyLock<Arc<TypeDescriptor>> = LazyLock::new(|| {
    TypeBuilder::new("System.Boolean")
        .method("ToString", &[], to_string_method)
        .build()
});

static SYMBOL_TYPE: LazyLock<Arc<TypeDescriptor>> = LazyLock::new(|| {
    fn symbol(this: &Value) -> Result<&crate::value::Symbol, Error> {
        match this {
            Value::Symbol(symbol) => Ok(symbol),
            other => Err(Error::TypeError(format!(
                "expected symbol receiver, got {}",
                other.type_name()
            ))),
        }
    }

    TypeBuilder::new("Sympl.Symbol")
        .property("Name", ParamType::Str, |this| Ok(Value::from(symbol(this)?.name())))
        .mutable_property(
            "Value",
            ParamType::Any,
            |this| Ok(symbol(this)?.value()),
            |this, value| {
                symbol(this)?.set_value(value);
                Ok(())
            },
        )
        .mutable_property(
            "PList",
            ParamType::Any,
            |this| Ok(symbol(this)?.plist()),
            |this, value| {
                symbol(this)?.set_plist(value);
                Ok(())
            },
        )
        .method("ToString", &[], to_string_method)
        .build()
});

static CONS_TYPE: LazyLock<Arc<TypeDescriptor>> = LazyLock::new(|| {
    fn cell(this: &Value) -> Result<&crate::value::Cons, Error> {
        match this {
            Value::Cons(cell) => Ok(cell),
            other => Err(Error::TypeError(format!(
                "expected cons receiver, got {}",
                other.type_name()
            ))),
        }
    }

    TypeBuilder::new("Sympl.Cons")
        .mutable_property(
            "First",
            ParamType::Any,
            |this| Ok(cell(this)?.first()),
            |this, value| {
                cell(this)?.set_first(value);
                Ok(())
            },
        )
        .mutable_property(
            "Rest",
            ParamType::Any,
            |this| Ok(cell(this)?.rest()),
            |this, value| {
                cell(this)?.set_rest(value);
                Ok(())
            },
        )
        .method("ToString", &[], to_string_method)
        .build()
});

static FUNCTION_TYPE: LazyLock<Arc<TypeDescriptor>> = LazyLock::new(|| {
    TypeBuilder::new("Sympl.Function")
        .property("Arity", ParamType::Int, |this| match this {
            Value::Function(f) => Ok(Value::Int(i64::try_from(f.arity).unwrap_or(i64::MAX))),
            other => Err(Error::TypeError(format!(
                "expected function receiver, got {}",
                other.type_name()
            ))),
        })
        .build()
});

/// The shape of raw type values, as produced by unwrapping a type handle.
static TYPE_TYPE: LazyLock<Arc<TypeDescriptor>> = LazyLock::new(|| {
    fn descriptor(this: &Value) -> Result<&Arc<TypeDescriptor>, Error> {
        match this {
            Value::Type(ty) => Ok(ty),
            other => Err(Error::TypeError(format!(
                "expected type receiver, got {}",
                other.type_name()
            ))),
        }
    }

    TypeBuilder::new("System.Type")
        .property("Name", ParamType::Str, |this| {
            Ok(Value::from(descriptor(this)?.name.as_str()))
        })
        .property("FullName", ParamType::Str, |this| {
            Ok(Value::from(descriptor(this)?.full_name()))
        })
        .method("IsInstanceOfType", &[ParamType::Any], |this, args| {
            let ty = descriptor(this)?;
            let matches = args
                .first()
                .and_then(describe)
                .is_some_and(|described| described.id == ty.id);
            Ok(Value::Bool(matches))
        })
        .method("ToString", &[], to_string_method)
        .build()
});

/// The reflected shape of a value, if it has one.
///
/// `nil`, dynamic objects and type handles have no descriptor: dynamic
/// objects and type handles bind through their own interop path.
pub fn describe(value: &Value) -> Option<Arc<TypeDescriptor>> {
    let builtin = match value {
        Value::Instance(obj) => return Some(obj.descriptor().clone()),
        Value::Nil | Value::Dynamic(_) | Value::TypeHandle(_) => return None,
        Value::Str(_) => &STRING_TYPE,
        Value::Int(_) => &INT_TYPE,
        Value::Bool(_) => &BOOL_TYPE,
        Value::Symbol(_) => &SYMBOL_TYPE,
        Value::Cons(_) => &CONS_TYPE,
        Value::Function(_) => &FUNCTION_TYPE,
        Value::Type(_) => &TYPE_TYPE,
    };
    Some(Arc::clone(&**builtin))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::reflect::{BindingFlags, DefaultReflector, Reflector};
    use crate::value::{cons, list};

    fn apply(op: BinaryOp, left: Value, right: Value) -> Result<Value, Error> {
        match find_binary_operator(op, &left, &right) {
            Some(entry) => (entry.apply)(vec![left, right]),
            None => Err(Error::InvalidOperation(format!("no operator {op}"))),
        }
    }

    /// Macro to create test cases, applying operators via the registry.
    macro_rules! test {
        ($op:expr, $left:expr, $right:expr, $expected:expr) => {
            (
                format!("{} {:?} {:?}", $op, $left, $right),
                apply($op, Value::from($left), Value::from($right)),
                $expected,
            )
        };
    }

    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(value.into())
    }

    #[test]
    fn test_binary_operators() {
        use BinaryOp::*;
        let test_cases: Vec<(String, Result<Value, Error>, Option<Value>)> = vec![
            test!(Add, 2, 3, success(5)),
            test!(Subtract, 2, 3, success(-1)),
            test!(Multiply, -4, 3, success(-12)),
            test!(Divide, 7, 2, success(3)),
            test!(Divide, 7, 0, None),
            test!(Add, i64::MAX, 1, None),
            test!(Subtract, i64::MIN, 1, None),
            test!(Multiply, i64::MAX, 2, None),
            test!(Divide, i64::MIN, -1, None),
            test!(Equal, 4, 4, success(true)),
            test!(NotEqual, 4, 4, success(false)),
            test!(GreaterThan, 5, 4, success(true)),
            test!(LessThan, 5, 4, success(false)),
            test!(Add, "ab", "cd", success("abcd")),
            test!(Equal, "ab", "ab", success(true)),
            test!(NotEqual, "ab", "cd", success(true)),
            test!(LessThan, "ab", "b", success(true)),
            test!(GreaterThan, "ab", "b", success(false)),
            test!(Equal, true, true, success(true)),
            test!(NotEqual, true, false, success(true)),
            test!(Add, 1, "a", None),
            test!(Subtract, "a", "b", None),
            test!(LessThan, true, false, None),
            test!(Add, true, false, None),
            test!(Equal, 1, "1", success(false)),
            test!(NotEqual, 1, true, success(true)),
            // short-circuit forms have no operator entry
            test!(And, 1, 2, None),
            test!(Or, false, 2, None),
        ];

        for (name, actual, expected) in test_cases {
            match (actual, expected) {
                (Ok(actual), Some(expected)) => assert_eq!(actual, expected, "{name}"),
                (Err(_), None) => {}
                (actual, expected) => panic!("{name}: expected {expected:?}, got {actual:?}"),
            }
        }
    }

    #[test]
    fn test_overflow_is_invalid_operation() {
        assert!(matches!(
            apply(BinaryOp::Add, Value::Int(i64::MAX), Value::Int(1)),
            Err(Error::InvalidOperation(msg)) if msg.contains("overflow")
        ));
        assert!(matches!(
            apply(BinaryOp::Divide, Value::Int(1), Value::Int(0)),
            Err(Error::InvalidOperation(msg)) if msg.contains("Division by zero")
        ));
    }

    #[test]
    fn test_eq_semantics() {
        let l = list([Value::Int(1)]);
        let test_cases = vec![
            (Value::Nil, Value::Nil, true),
            (Value::Int(3), Value::Int(3), true),
            (Value::Int(3), Value::Int(4), false),
            (Value::Bool(true), Value::Bool(true), true),
            (Value::from("a"), Value::from("a"), false),
            (l.clone(), l.clone(), true),
            (l.clone(), list([Value::Int(1)]), false),
            (Value::Int(1), Value::Bool(true), false),
            (Value::Nil, Value::Bool(false), false),
        ];
        for (i, (left, right, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(eq_values(&left, &right), expected, "#{}", i + 1);
        }
    }

    fn call_method(value: &Value, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        let ty = describe(value).unwrap();
        let members =
            DefaultReflector.members(&ty, name, BindingFlags::INSTANCE | BindingFlags::IGNORE_CASE);
        let method = members.iter().find_map(|m| m.as_method()).unwrap();
        (method.body)(value, args)
    }

    fn get_property(value: &Value, name: &str) -> Result<Value, Error> {
        let ty = describe(value).unwrap();
        let members =
            DefaultReflector.members(&ty, name, BindingFlags::INSTANCE | BindingFlags::IGNORE_CASE);
        let property = members.iter().find_map(|m| m.as_property()).unwrap();
        (property.getter)(value)
    }

    #[test]
    fn test_builtin_shapes() {
        let s = Value::from("  Hello ");
        assert_eq!(get_property(&s, "length").unwrap(), Value::Int(8));
        assert_eq!(call_method(&s, "trim", vec![]).unwrap(), Value::from("Hello"));
        assert_eq!(call_method(&s, "ToUpper", vec![]).unwrap(), Value::from("  HELLO "));
        assert_eq!(
            call_method(&s, "Substring", vec![Value::Int(2), Value::Int(3)]).unwrap(),
            Value::from("Hel")
        );
        assert!(matches!(
            call_method(&s, "Substring", vec![Value::Int(6), Value::Int(3)]),
            Err(Error::IndexOutOfRange(_))
        ));
        assert_eq!(
            call_method(&s, "Contains", vec![Value::from("ell")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(call_method(&Value::Int(42), "ToString", vec![]).unwrap(), Value::from("42"));

        let pair = cons(Value::Int(1), Value::Int(2));
        assert_eq!(get_property(&pair, "first").unwrap(), Value::Int(1));
        assert_eq!(get_property(&pair, "REST").unwrap(), Value::Int(2));

        let string_type = Value::Type(describe(&s).unwrap());
        assert_eq!(get_property(&string_type, "FullName").unwrap(), Value::from("System.String"));
        assert_eq!(get_property(&string_type, "Name").unwrap(), Value::from("String"));
        assert_eq!(
            call_method(&string_type, "IsInstanceOfType", vec![Value::from("x")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            call_method(&string_type, "IsInstanceOfType", vec![Value::Int(1)]).unwrap(),
            Value::Bool(false)
        );

        assert!(describe(&Value::Nil).is_none());
    }
}
