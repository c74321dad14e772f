use super::{
    BindOutcome, Binder, BinderKey, MetaArg, RuleCache, Selection, arg, combined, select_overload,
    shape, values,
};
use crate::Error;
use crate::reflect::convert_args;
use crate::runtime::Runtime;
use crate::value::{Value, nth, nth_cell};
use std::sync::Arc;

fn int_index(value: &Value) -> Result<i64, Error> {
    value
        .as_int()
        .ok_or_else(|| Error::TypeError(format!("expected int index, got {}", value.type_name())))
}

fn char_at(text: &str, index: i64) -> Result<Value, Error> {
    usize::try_from(index)
        .ok()
        .and_then(|i| text.chars().nth(i))
        .map(|c| Value::from(c.to_string()))
        .ok_or_else(|| {
            Error::IndexOutOfRange(format!(
                "index {index} out of range for a string of length {}",
                text.chars().count()
            ))
        })
}

/// `(elt obj indexes...)`
#[derive(Debug)]
pub struct GetIndexBinder {
    key: BinderKey,
    cache: RuleCache,
}

impl GetIndexBinder {
    pub(crate) fn new(key: BinderKey, cache: RuleCache) -> Self {
        GetIndexBinder { key, cache }
    }

    pub fn fallback(&self, rt: &Runtime, target: &MetaArg, indexes: &[MetaArg]) -> BindOutcome {
        let (Some(obj), Some(index_values)) = (target.value(), values(indexes)) else {
            return BindOutcome::defer(target, indexes);
        };
        let restrictions = combined(target, indexes);
        match (obj, index_values.as_slice()) {
            (Value::Cons(_) | Value::Nil, [Value::Int(_)]) => BindOutcome::rule(
                restrictions,
                Arc::new(|_, args| nth(arg(args, 0)?, int_index(arg(args, 1)?)?)),
            ),
            (Value::Str(_), [Value::Int(_)]) => BindOutcome::rule(
                restrictions,
                Arc::new(|_, args| {
                    let text = arg(args, 0)?.as_str().unwrap_or_default();
                    char_at(text, int_index(arg(args, 1)?)?)
                }),
            ),
            (Value::Cons(_) | Value::Nil | Value::Str(_), _) => BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "indexing a {} takes one int index, got ({})",
                    obj.type_name(),
                    shape(indexes)
                )),
                restrictions,
            ),
            _ => {
                let indexers = rt
                    .describe(obj)
                    .map(|ty| rt.reflector().indexers(&ty))
                    .unwrap_or_default();
                match select_overload(indexers, |ix| ix.params.as_slice(), &index_values) {
                    Selection::One(indexer) => BindOutcome::rule(
                        restrictions,
                        Arc::new(move |_, args| {
                            (indexer.getter)(arg(args, 0)?, convert_args(&indexer.params, &args[1..]))
                        }),
                    ),
                    Selection::Nothing => BindOutcome::fail(
                        Error::InvalidOperation(format!(
                            "{} cannot be indexed by ({})",
                            obj.type_name(),
                            shape(indexes)
                        )),
                        restrictions,
                    ),
                    Selection::Ambiguous(count) => BindOutcome::fail(
                        Error::InvalidOperation(format!(
                            "{count} indexers of {} match ({})",
                            obj.type_name(),
                            shape(indexes)
                        )),
                        restrictions,
                    ),
                }
            }
        }
    }
}

impl Binder for GetIndexBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_get_index(self, rt, target, args)
        {
            return outcome;
        }
        self.fallback(rt, target, args)
    }
}

/// `(set (elt obj indexes...) value)`; the value is the last argument.
#[derive(Debug)]
pub struct SetIndexBinder {
    key: BinderKey,
    cache: RuleCache,
}

impl SetIndexBinder {
    pub(crate) fn new(key: BinderKey, cache: RuleCache) -> Self {
        SetIndexBinder { key, cache }
    }

    /// Store into a list cell or a writable host indexer. The operation's
    /// result is the stored value.
    pub fn fallback(
        &self,
        rt: &Runtime,
        target: &MetaArg,
        indexes: &[MetaArg],
        value: &MetaArg,
    ) -> BindOutcome {
        let mut participants = indexes.to_vec();
        participants.push(value.clone());
        let (Some(obj), Some(index_values), true) =
            (target.value(), values(indexes), value.has_value())
        else {
            return BindOutcome::defer(target, &participants);
        };
        let restrictions = combined(target, &participants);
        match (obj, index_values.as_slice()) {
            (Value::Cons(_) | Value::Nil, [Value::Int(_)]) => BindOutcome::rule(
                restrictions,
                Arc::new(|_, args| {
                    let stored = arg(args, 2)?.clone();
                    nth_cell(arg(args, 0)?, int_index(arg(args, 1)?)?)?.set_first(stored.clone());
                    Ok(stored)
                }),
            ),
            (Value::Str(_), _) => BindOutcome::fail(
                Error::InvalidOperation("strings cannot be modified by index".to_string()),
                restrictions,
            ),
            (Value::Cons(_) | Value::Nil, _) => BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "indexing a {} takes one int index, got ({})",
                    obj.type_name(),
                    shape(indexes)
                )),
                restrictions,
            ),
            _ => {
                let writable = rt
                    .describe(obj)
                    .map(|ty| rt.reflector().indexers(&ty))
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|ix| ix.setter.is_some());
                match select_overload(writable, |ix| ix.params.as_slice(), &index_values) {
                    Selection::One(indexer) => {
                        let count = indexes.len();
                        BindOutcome::rule(
                            restrictions,
                            Arc::new(move |_, args| {
                                let stored = arg(args, count + 1)?.clone();
                                let keys = convert_args(&indexer.params, &args[1..=count]);
                                if let Some(setter) = &indexer.setter {
                                    setter(arg(args, 0)?, keys, stored.clone())?;
                                }
                                Ok(stored)
                            }),
                        )
                    }
                    Selection::Nothing => BindOutcome::fail(
                        Error::InvalidOperation(format!(
                            "{} has no writable indexer taking ({})",
                            obj.type_name(),
                            shape(indexes)
                        )),
                        restrictions,
                    ),
                    Selection::Ambiguous(count) => BindOutcome::fail(
                        Error::InvalidOperation(format!(
                            "{count} indexers of {} match ({})",
                            obj.type_name(),
                            shape(indexes)
                        )),
                        restrictions,
                    ),
                }
            }
        }
    }
}

impl Binder for SetIndexBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        let Some((value, indexes)) = args.split_last() else {
            return BindOutcome::fail(
                Error::InvalidOperation(format!("{} needs a value to store", self.key)),
                combined(target, args),
            );
        };
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_set_index(self, rt, target, indexes, value)
        {
            return outcome;
        }
        self.fallback(rt, target, indexes, value)
    }
}
