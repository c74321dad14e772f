//! Objects that take part in their own binding.
//!
//! A [`DynamicObject`] is offered every operation it is the target of before
//! the binder's own logic runs. Returning `None` (the default for every
//! operation) lets the binder proceed as if the object had no opinion.

use super::{
    BinaryOperationBinder, BindOutcome, BinderKey, CreateInstanceBinder, GetIndexBinder,
    GetMemberBinder, InvokeBinder, InvokeMemberBinder, MetaArg, Selection, SetIndexBinder,
    SetMemberBinder, UnaryOperationBinder, arg, combined, select_overload, shape, values,
};
use crate::Error;
use crate::reflect::{BindingFlags, convert_args, instantiate};
use crate::runtime::Runtime;
use crate::value::{Expando, TypeModel, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub trait DynamicObject: Send + Sync + fmt::Debug + Any {
    /// Name of the object's kind, used in type errors.
    fn type_name(&self) -> String;

    /// How the object prints.
    fn display_name(&self) -> String {
        self.type_name()
    }

    fn as_any(&self) -> &dyn Any;

    fn bind_get_member(
        &self,
        _binder: &GetMemberBinder,
        _rt: &Runtime,
        _target: &MetaArg,
    ) -> Option<BindOutcome> {
        None
    }

    fn bind_set_member(
        &self,
        _binder: &SetMemberBinder,
        _rt: &Runtime,
        _target: &MetaArg,
        _value: &MetaArg,
    ) -> Option<BindOutcome> {
        None
    }

    fn bind_invoke_member(
        &self,
        _binder: &InvokeMemberBinder,
        _rt: &Runtime,
        _target: &MetaArg,
        _args: &[MetaArg],
    ) -> Option<BindOutcome> {
        None
    }

    fn bind_invoke(
        &self,
        _binder: &InvokeBinder,
        _rt: &Runtime,
        _target: &MetaArg,
        _args: &[MetaArg],
    ) -> Option<BindOutcome> {
        None
    }

    fn bind_create_instance(
        &self,
        _binder: &CreateInstanceBinder,
        _rt: &Runtime,
        _target: &MetaArg,
        _args: &[MetaArg],
    ) -> Option<BindOutcome> {
        None
    }

    fn bind_get_index(
        &self,
        _binder: &GetIndexBinder,
        _rt: &Runtime,
        _target: &MetaArg,
        _indexes: &[MetaArg],
    ) -> Option<BindOutcome> {
        None
    }

    fn bind_set_index(
        &self,
        _binder: &SetIndexBinder,
        _rt: &Runtime,
        _target: &MetaArg,
        _indexes: &[MetaArg],
        _value: &MetaArg,
    ) -> Option<BindOutcome> {
        None
    }

    fn bind_binary_operation(
        &self,
        _binder: &BinaryOperationBinder,
        _rt: &Runtime,
        _target: &MetaArg,
        _right: &MetaArg,
    ) -> Option<BindOutcome> {
        None
    }

    fn bind_unary_operation(
        &self,
        _binder: &UnaryOperationBinder,
        _rt: &Runtime,
        _target: &MetaArg,
    ) -> Option<BindOutcome> {
        None
    }
}

fn expando_of(value: &Value) -> Result<&Expando, Error> {
    match value {
        Value::Dynamic(obj) => obj.as_any().downcast_ref::<Expando>().ok_or_else(|| {
            Error::TypeError(format!("expected a scope, got {}", obj.type_name()))
        }),
        other => Err(Error::TypeError(format!(
            "expected a scope, got {}",
            other.type_name()
        ))),
    }
}

fn missing(name: &str, scope: &Expando) -> Error {
    Error::MissingMember(format!("{name} is not defined in {}", scope.name()))
}

// Expando rules only depend on the target being an expando; the member is
// looked up each time the rule runs.
impl DynamicObject for Expando {
    fn type_name(&self) -> String {
        "Expando".to_string()
    }

    fn display_name(&self) -> String {
        format!("scope {}", self.name())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn bind_get_member(
        &self,
        binder: &GetMemberBinder,
        _rt: &Runtime,
        target: &MetaArg,
    ) -> Option<BindOutcome> {
        let name = binder.name().to_string();
        Some(BindOutcome::rule(
            target.restrictions().clone(),
            Arc::new(move |_, args| {
                let scope = expando_of(arg(args, 0)?)?;
                scope.get(&name).ok_or_else(|| missing(&name, scope))
            }),
        ))
    }

    fn bind_set_member(
        &self,
        binder: &SetMemberBinder,
        _rt: &Runtime,
        target: &MetaArg,
        _value: &MetaArg,
    ) -> Option<BindOutcome> {
        let name = binder.name().to_string();
        Some(BindOutcome::rule(
            target.restrictions().clone(),
            Arc::new(move |_, args| {
                let scope = expando_of(arg(args, 0)?)?;
                let value = arg(args, 1)?.clone();
                scope.set(&name, value.clone());
                Ok(value)
            }),
        ))
    }

    fn bind_invoke_member(
        &self,
        binder: &InvokeMemberBinder,
        rt: &Runtime,
        target: &MetaArg,
        args: &[MetaArg],
    ) -> Option<BindOutcome> {
        let name = binder.name().to_string();
        let invoke = rt.call_site(BinderKey::Invoke(args.len()));
        Some(BindOutcome::rule(
            target.restrictions().clone(),
            Arc::new(move |rt, args| {
                let scope = expando_of(arg(args, 0)?)?;
                let callee = scope.get(&name).ok_or_else(|| missing(&name, scope))?;
                let mut call = Vec::with_capacity(args.len());
                call.push(callee);
                call.extend_from_slice(&args[1..]);
                invoke.invoke(rt, &call)
            }),
        ))
    }
}

/// A participant standing for the raw type behind a type handle, so the
/// binder's own fallback can treat the type as an ordinary value.
fn raw_type(target: &MetaArg) -> MetaArg {
    let index = target.index().unwrap_or(0);
    MetaArg::derived(
        Arc::new(move |args: &[Value]| match arg(args, index)? {
            Value::TypeHandle(model) => Ok(Value::Type(model.descriptor().clone())),
            other => Err(Error::TypeError(format!(
                "expected a type, got {}",
                other.type_name()
            ))),
        }),
        target.restrictions().clone(),
    )
}

// Static members and constructors bind here, under the identity of the
// handle. Anything else is retried against the raw type.
impl DynamicObject for TypeModel {
    fn type_name(&self) -> String {
        "TypeModel".to_string()
    }

    fn display_name(&self) -> String {
        format!("type {}", self.descriptor().full_name())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn bind_get_member(
        &self,
        binder: &GetMemberBinder,
        rt: &Runtime,
        target: &MetaArg,
    ) -> Option<BindOutcome> {
        let members = rt.reflector().members(
            self.descriptor(),
            binder.name(),
            BindingFlags::STATIC | BindingFlags::IGNORE_CASE,
        );
        let properties: Vec<_> = members.iter().filter_map(|m| m.as_property()).collect();
        if let [property] = properties.as_slice() {
            let getter = property.getter.clone();
            return Some(BindOutcome::rule(
                target.restrictions().clone(),
                Arc::new(move |_, _| getter(&Value::Nil)),
            ));
        }
        Some(binder.fallback(rt, &raw_type(target)))
    }

    fn bind_set_member(
        &self,
        binder: &SetMemberBinder,
        rt: &Runtime,
        target: &MetaArg,
        value: &MetaArg,
    ) -> Option<BindOutcome> {
        let members = rt.reflector().members(
            self.descriptor(),
            binder.name(),
            BindingFlags::STATIC | BindingFlags::IGNORE_CASE,
        );
        let writable = members.iter().filter_map(|m| m.as_property()).find(|p| {
            p.setter.is_some() && value.value().is_some_and(|v| p.ty.accepts(v))
        });
        if let Some(property) = writable
            && let Some(setter) = property.setter.clone()
        {
            let ty = property.ty;
            return Some(BindOutcome::rule(
                combined(target, std::slice::from_ref(value)),
                Arc::new(move |_, args| {
                    let value = arg(args, 1)?.clone();
                    setter(&Value::Nil, ty.convert(value.clone()))?;
                    Ok(value)
                }),
            ));
        }
        Some(binder.fallback(rt, &raw_type(target), value))
    }

    fn bind_invoke_member(
        &self,
        binder: &InvokeMemberBinder,
        rt: &Runtime,
        target: &MetaArg,
        args: &[MetaArg],
    ) -> Option<BindOutcome> {
        let Some(arg_values) = values(args) else {
            return Some(binder.fallback(rt, &raw_type(target), args));
        };
        let members = rt.reflector().members(
            self.descriptor(),
            binder.name(),
            BindingFlags::STATIC | BindingFlags::IGNORE_CASE,
        );
        let methods = members.iter().filter_map(|m| m.as_method());
        match select_overload(methods, |m| m.params.as_slice(), &arg_values) {
            Selection::One(method) => {
                let params = method.params.clone();
                let body = method.body.clone();
                Some(BindOutcome::rule(
                    combined(target, args),
                    Arc::new(move |_, args| body(&Value::Nil, convert_args(&params, &args[1..]))),
                ))
            }
            Selection::Ambiguous(count) => Some(BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "{count} overloads of {}.{} match ({})",
                    self.descriptor().full_name(),
                    binder.name(),
                    shape(args)
                )),
                combined(target, args),
            )),
            Selection::Nothing => Some(binder.fallback(rt, &raw_type(target), args)),
        }
    }

    fn bind_create_instance(
        &self,
        binder: &CreateInstanceBinder,
        rt: &Runtime,
        target: &MetaArg,
        args: &[MetaArg],
    ) -> Option<BindOutcome> {
        let Some(arg_values) = values(args) else {
            return Some(binder.fallback(rt, &raw_type(target), args));
        };
        let constructors = rt.reflector().constructors(self.descriptor());
        match select_overload(constructors, |c| c.params.as_slice(), &arg_values) {
            Selection::One(ctor) => {
                let descriptor = self.descriptor().clone();
                Some(BindOutcome::rule(
                    combined(target, args),
                    Arc::new(move |_, args| {
                        let state = (ctor.body)(convert_args(&ctor.params, &args[1..]))?;
                        Ok(instantiate(&descriptor, state))
                    }),
                ))
            }
            Selection::Ambiguous(count) => Some(BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "{count} constructors of {} match ({})",
                    self.descriptor().full_name(),
                    shape(args)
                )),
                combined(target, args),
            )),
            Selection::Nothing => Some(binder.fallback(rt, &raw_type(target), args)),
        }
    }
}
