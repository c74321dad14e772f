use super::{
    BindOutcome, Binder, BinderKey, MetaArg, Restrictions, RuleCache, Selection, arg, combined,
    select_overload, shape, values,
};
use crate::Error;
use crate::reflect::{convert_args, instantiate};
use crate::runtime::Runtime;
use crate::value::Value;
use std::sync::Arc;

/// `(f args...)` where `f` is a value.
#[derive(Debug)]
pub struct InvokeBinder {
    key: BinderKey,
    cache: RuleCache,
}

impl InvokeBinder {
    pub(crate) fn new(key: BinderKey, cache: RuleCache) -> Self {
        InvokeBinder { key, cache }
    }

    pub fn fallback(&self, _rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        let (Some(callee), Some(_)) = (target.value(), values(args)) else {
            return BindOutcome::defer(target, args);
        };
        // The function's arity is part of its type restriction.
        let restrictions = combined(target, args);
        match callee {
            Value::Function(f) if f.arity == args.len() => BindOutcome::rule(
                restrictions,
                Arc::new(|rt, args| match arg(args, 0)? {
                    Value::Function(f) => f.call(rt, args[1..].to_vec()),
                    other => Err(Error::InvalidOperation(format!(
                        "cannot invoke a value of type {}",
                        other.type_name()
                    ))),
                }),
            ),
            Value::Function(f) => {
                BindOutcome::fail(Error::arity_error(f.arity, args.len()), restrictions)
            }
            other => BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "cannot invoke a value of type {}",
                    other.type_name()
                )),
                restrictions,
            ),
        }
    }
}

impl Binder for InvokeBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_invoke(self, rt, target, args)
        {
            return outcome;
        }
        self.fallback(rt, target, args)
    }
}

/// `(new type args...)`
#[derive(Debug)]
pub struct CreateInstanceBinder {
    key: BinderKey,
    cache: RuleCache,
}

impl CreateInstanceBinder {
    pub(crate) fn new(key: BinderKey, cache: RuleCache) -> Self {
        CreateInstanceBinder { key, cache }
    }

    /// Bind to the unique constructor of a raw type accepting the arguments.
    pub fn fallback(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        let (Some(ty), Some(arg_values)) = (target.value(), values(args)) else {
            return BindOutcome::defer(target, args);
        };
        let Value::Type(descriptor) = ty else {
            return BindOutcome::fail(
                Error::TypeError(format!("Must supply a type to new, got {}", ty.type_name())),
                combined(target, args),
            );
        };
        // Constructors depend on the exact type, not just on being a type.
        let restrictions = args.iter().fold(
            Restrictions::instance(target.index().unwrap_or(0), ty),
            |acc, a| acc.merge(a.restrictions()),
        );
        let constructors = rt.reflector().constructors(descriptor);
        match select_overload(constructors, |c| c.params.as_slice(), &arg_values) {
            Selection::One(ctor) => {
                let descriptor = descriptor.clone();
                BindOutcome::rule(
                    restrictions,
                    Arc::new(move |_, args| {
                        let state = (ctor.body)(convert_args(&ctor.params, &args[1..]))?;
                        Ok(instantiate(&descriptor, state))
                    }),
                )
            }
            Selection::Nothing => BindOutcome::fail(
                Error::MissingMember(format!(
                    "no constructor of {} takes ({})",
                    descriptor.full_name(),
                    shape(args)
                )),
                restrictions,
            ),
            Selection::Ambiguous(count) => BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "{count} constructors of {} match ({})",
                    descriptor.full_name(),
                    shape(args)
                )),
                restrictions,
            ),
        }
    }
}

impl Binder for CreateInstanceBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_create_instance(self, rt, target, args)
        {
            return outcome;
        }
        self.fallback(rt, target, args)
    }
}
