//! A bundled `System` assembly of host types.
//!
//! ```scheme
//! (import system.text)
//! (set sb (new text.stringbuilder "a"))
//! (sb.append 1)
//! (sb.tostring)            ; "a1"
//! ```

use crate::Error;
use crate::builtinops::eq_values;
use crate::reflect::{Assembly, ParamType, TypeBuilder, TypeDescriptor, state_of};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

pub fn system_assembly() -> Assembly {
    Assembly::new("System")
        .with_type(math_type())
        .with_type(string_builder_type())
        .with_type(array_list_type())
        .with_type(console_type())
}

fn abs(n: i64) -> Result<i64, Error> {
    n.checked_abs()
        .ok_or_else(|| Error::InvalidOperation(format!("Integer overflow in Abs({n})")))
}

fn max(a: i64, b: i64) -> i64 {
    a.max(b)
}

fn min(a: i64, b: i64) -> i64 {
    a.min(b)
}

fn sign(n: i64) -> i64 {
    n.signum()
}

fn math_type() -> Arc<TypeDescriptor> {
    TypeBuilder::new("System.Math")
        .static_function::<(i64,), i64, _>("Abs", abs)
        .static_function::<(i64, i64), i64, _>("Max", max)
        .static_function::<(i64, i64), i64, _>("Min", min)
        .static_function::<(i64,), i64, _>("Sign", sign)
        .build()
}

const STRING_BUILDER: &str = "StringBuilder";

fn string_builder_type() -> Arc<TypeDescriptor> {
    TypeBuilder::new("System.Text.StringBuilder")
        .constructor(&[], |_| Ok(Box::new(Mutex::new(String::new()))))
        .constructor(&[ParamType::Str], |args| {
            let text = args[0].as_str().unwrap_or_default().to_string();
            Ok(Box::new(Mutex::new(text)))
        })
        // Append and Clear return the builder so calls can be chained.
        .method("Append", &[ParamType::Any], |this, args| {
            let buffer = state_of::<Mutex<String>>(this, STRING_BUILDER)?;
            buffer.lock().push_str(&args[0].to_string());
            Ok(this.clone())
        })
        .method("Clear", &[], |this, _| {
            state_of::<Mutex<String>>(this, STRING_BUILDER)?.lock().clear();
            Ok(this.clone())
        })
        .method("ToString", &[], |this, _| {
            let buffer = state_of::<Mutex<String>>(this, STRING_BUILDER)?;
            Ok(Value::from(buffer.lock().clone()))
        })
        .property("Length", ParamType::Int, |this| {
            let buffer = state_of::<Mutex<String>>(this, STRING_BUILDER)?;
            let length = buffer.lock().chars().count();
            Ok(Value::Int(i64::try_from(length).unwrap_or(i64::MAX)))
        })
        .build()
}

const ARRAY_LIST: &str = "ArrayList";

/// Equality for `Contains`: strings by content, everything else as `eq`.
fn same_item(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => eq_values(left, right),
    }
}

fn list_slot(items: &[Value], index: &Value) -> Result<usize, Error> {
    let n = index.as_int().unwrap_or(-1);
    usize::try_from(n)
        .ok()
        .filter(|&i| i < items.len())
        .ok_or_else(|| {
            Error::IndexOutOfRange(format!(
                "index {n} out of range for an ArrayList of {} items",
                items.len()
            ))
        })
}

fn array_list_type() -> Arc<TypeDescriptor> {
    TypeBuilder::new("System.Collections.ArrayList")
        .constructor(&[], |_| Ok(Box::new(RwLock::new(Vec::<Value>::new()))))
        .method("Add", &[ParamType::Any], |this, mut args| {
            let items = state_of::<RwLock<Vec<Value>>>(this, ARRAY_LIST)?;
            let mut items = items.write();
            items.push(args.remove(0));
            Ok(Value::Int(i64::try_from(items.len() - 1).unwrap_or(i64::MAX)))
        })
        .method("Clear", &[], |this, _| {
            state_of::<RwLock<Vec<Value>>>(this, ARRAY_LIST)?.write().clear();
            Ok(Value::Nil)
        })
        .method("Contains", &[ParamType::Any], |this, args| {
            let items = state_of::<RwLock<Vec<Value>>>(this, ARRAY_LIST)?;
            Ok(Value::Bool(items.read().iter().any(|item| same_item(item, &args[0]))))
        })
        .property("Count", ParamType::Int, |this| {
            let items = state_of::<RwLock<Vec<Value>>>(this, ARRAY_LIST)?;
            Ok(Value::Int(i64::try_from(items.read().len()).unwrap_or(i64::MAX)))
        })
        .indexer(
            &[ParamType::Int],
            |this, keys| {
                let items = state_of::<RwLock<Vec<Value>>>(this, ARRAY_LIST)?.read();
                let slot = list_slot(&items, &keys[0])?;
                Ok(items[slot].clone())
            },
            |this, keys, value| {
                let mut items = state_of::<RwLock<Vec<Value>>>(this, ARRAY_LIST)?.write();
                let slot = list_slot(&items, &keys[0])?;
                items[slot] = value;
                Ok(())
            },
        )
        .build()
}

fn console_type() -> Arc<TypeDescriptor> {
    TypeBuilder::new("System.Console")
        .static_method("WriteLine", &[], |_| {
            println!();
            Ok(Value::Nil)
        })
        .static_method("WriteLine", &[ParamType::Any], |args| {
            println!("{}", args[0]);
            Ok(Value::Nil)
        })
        .static_method("Write", &[ParamType::Any], |args| {
            print!("{}", args[0]);
            Ok(Value::Nil)
        })
        .build()
}
