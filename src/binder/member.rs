use super::{
    BindOutcome, Binder, BinderKey, MetaArg, RuleCache, Selection, arg, combined, select_overload,
    shape, values,
};
use crate::Error;
use crate::reflect::{BindingFlags, Member, convert_args};
use crate::runtime::Runtime;
use crate::value::Value;
use std::slice;
use std::sync::Arc;

/// Instance members of `value`'s reflected type named `name`, ignoring case.
fn instance_members(rt: &Runtime, value: &Value, name: &str) -> Vec<Arc<Member>> {
    rt.describe(value)
        .map(|ty| {
            rt.reflector()
                .members(&ty, name, BindingFlags::INSTANCE | BindingFlags::IGNORE_CASE)
        })
        .unwrap_or_default()
}

fn missing_member(name: &str, value: &Value) -> Error {
    Error::MissingMember(format!("no member {name} on {}", value.type_name()))
}

/// `obj.name`
#[derive(Debug)]
pub struct GetMemberBinder {
    key: BinderKey,
    name: String,
    cache: RuleCache,
}

impl GetMemberBinder {
    pub(crate) fn new(key: BinderKey, name: String, cache: RuleCache) -> Self {
        GetMemberBinder { key, name, cache }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind against the target's reflected properties.
    pub fn fallback(&self, rt: &Runtime, target: &MetaArg) -> BindOutcome {
        let Some(value) = target.value() else {
            return BindOutcome::defer(target, &[]);
        };
        let restrictions = target.restrictions().clone();
        let members = instance_members(rt, value, &self.name);
        let properties: Vec<_> = members.iter().filter_map(|m| m.as_property()).collect();
        match properties.as_slice() {
            [property] => {
                let getter = property.getter.clone();
                BindOutcome::rule(restrictions, Arc::new(move |_, args| getter(arg(args, 0)?)))
            }
            [] => BindOutcome::fail(missing_member(&self.name, value), restrictions),
            many => BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "{} properties named {} on {}",
                    many.len(),
                    self.name,
                    value.type_name()
                )),
                restrictions,
            ),
        }
    }
}

impl Binder for GetMemberBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        if !args.is_empty() {
            return BindOutcome::fail(
                Error::InvalidOperation(format!("{} takes no arguments", self.key)),
                combined(target, args),
            );
        }
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_get_member(self, rt, target)
        {
            return outcome;
        }
        self.fallback(rt, target)
    }
}

/// `(set obj.name value)`
#[derive(Debug)]
pub struct SetMemberBinder {
    key: BinderKey,
    name: String,
    cache: RuleCache,
}

impl SetMemberBinder {
    pub(crate) fn new(key: BinderKey, name: String, cache: RuleCache) -> Self {
        SetMemberBinder { key, name, cache }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind against a writable reflected property accepting the value.
    /// The operation's result is the stored value.
    pub fn fallback(&self, rt: &Runtime, target: &MetaArg, value: &MetaArg) -> BindOutcome {
        let (Some(obj), Some(new_value)) = (target.value(), value.value()) else {
            return BindOutcome::defer(target, slice::from_ref(value));
        };
        let restrictions = combined(target, slice::from_ref(value));
        let members = instance_members(rt, obj, &self.name);
        let mut properties = members.iter().filter_map(|m| m.as_property()).peekable();
        if properties.peek().is_none() {
            return BindOutcome::fail(missing_member(&self.name, obj), restrictions);
        }
        let writable = properties.find_map(|p| {
            p.setter
                .clone()
                .filter(|_| p.ty.accepts(new_value))
                .map(|setter| (p.ty, setter))
        });
        match writable {
            Some((ty, setter)) => BindOutcome::rule(
                restrictions,
                Arc::new(move |_, args| {
                    let stored = arg(args, 1)?.clone();
                    setter(arg(args, 0)?, ty.convert(stored.clone()))?;
                    Ok(stored)
                }),
            ),
            None => BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "member {} on {} is read-only or does not accept {}",
                    self.name,
                    obj.type_name(),
                    new_value.type_name()
                )),
                restrictions,
            ),
        }
    }
}

impl Binder for SetMemberBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        let [value] = args else {
            return BindOutcome::fail(
                Error::InvalidOperation(format!("{} takes exactly one value", self.key)),
                combined(target, args),
            );
        };
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_set_member(self, rt, target, value)
        {
            return outcome;
        }
        self.fallback(rt, target, value)
    }
}

/// `obj.(name args...)`
#[derive(Debug)]
pub struct InvokeMemberBinder {
    key: BinderKey,
    name: String,
    cache: RuleCache,
}

impl InvokeMemberBinder {
    pub(crate) fn new(key: BinderKey, name: String, cache: RuleCache) -> Self {
        InvokeMemberBinder { key, name, cache }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind to the unique method whose parameters accept the arguments.
    /// A property of that name is fetched and invoked instead.
    pub fn fallback(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        let (Some(obj), Some(arg_values)) = (target.value(), values(args)) else {
            return BindOutcome::defer(target, args);
        };
        let restrictions = combined(target, args);
        let members = instance_members(rt, obj, &self.name);
        let methods = members.iter().filter_map(|m| m.as_method());

        match select_overload(methods, |m| m.params.as_slice(), &arg_values) {
            Selection::One(method) => {
                let params = method.params.clone();
                let body = method.body.clone();
                BindOutcome::rule(
                    restrictions,
                    Arc::new(move |_, args| {
                        body(arg(args, 0)?, convert_args(&params, &args[1..]))
                    }),
                )
            }
            Selection::Ambiguous(count) => BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "{count} overloads of {}({}) on {} match",
                    self.name,
                    shape(args),
                    obj.type_name()
                )),
                restrictions,
            ),
            Selection::Nothing => match members.iter().find_map(|m| m.as_property()) {
                Some(property) => {
                    let getter = property.getter.clone();
                    let invoke = rt.call_site(BinderKey::Invoke(args.len()));
                    BindOutcome::rule(
                        restrictions,
                        Arc::new(move |rt, args| {
                            let mut call = Vec::with_capacity(args.len());
                            call.push(getter(arg(args, 0)?)?);
                            call.extend_from_slice(&args[1..]);
                            invoke.invoke(rt, &call)
                        }),
                    )
                }
                None => BindOutcome::fail(
                    Error::MissingMember(format!(
                        "no method {}({}) on {}",
                        self.name,
                        shape(args),
                        obj.type_name()
                    )),
                    restrictions,
                ),
            },
        }
    }
}

impl Binder for InvokeMemberBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_invoke_member(self, rt, target, args)
        {
            return outcome;
        }
        self.fallback(rt, target, args)
    }
}
