use super::{
    BindOutcome, Binder, BinderKey, MetaArg, RuleCache, arg, combined, defer_if_unready,
};
use crate::Error;
use crate::ast::{BinaryOp, UnaryOp};
use crate::builtinops::find_binary_operator;
use crate::runtime::Runtime;
use crate::value::Value;
use std::slice;
use std::sync::Arc;

#[derive(Debug)]
pub struct BinaryOperationBinder {
    key: BinderKey,
    op: BinaryOp,
    cache: RuleCache,
}

impl BinaryOperationBinder {
    pub(crate) fn new(key: BinderKey, op: BinaryOp, cache: RuleCache) -> Self {
        BinaryOperationBinder { key, op, cache }
    }

    pub fn op(&self) -> BinaryOp {
        self.op
    }

    pub fn fallback(&self, _rt: &Runtime, target: &MetaArg, right: &MetaArg) -> BindOutcome {
        let (Some(left_value), Some(right_value)) = (target.value(), right.value()) else {
            return BindOutcome::defer(target, slice::from_ref(right));
        };
        let restrictions = combined(target, slice::from_ref(right));
        // `and` and `or` short-circuit, so they are lowered to conditionals
        if matches!(self.op, BinaryOp::And | BinaryOp::Or) {
            return BindOutcome::fail(
                Error::InvalidOperation(format!("{} cannot be applied as an operator", self.op)),
                restrictions,
            );
        }
        match find_binary_operator(self.op, left_value, right_value) {
            Some(operator) => BindOutcome::rule(
                restrictions,
                Arc::new(move |_, args| {
                    (operator.apply)(vec![arg(args, 0)?.clone(), arg(args, 1)?.clone()])
                }),
            ),
            None => BindOutcome::fail(
                Error::InvalidOperation(format!(
                    "operator {} is not defined for {} and {}",
                    self.op,
                    left_value.type_name(),
                    right_value.type_name()
                )),
                restrictions,
            ),
        }
    }
}

impl Binder for BinaryOperationBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        let [right] = args else {
            return BindOutcome::fail(
                Error::arity_error_with_expr(2, args.len() + 1, self.op.to_string()),
                combined(target, args),
            );
        };
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_binary_operation(self, rt, target, right)
        {
            return outcome;
        }
        self.fallback(rt, target, right)
    }
}

#[derive(Debug)]
pub struct UnaryOperationBinder {
    key: BinderKey,
    op: UnaryOp,
    cache: RuleCache,
}

impl UnaryOperationBinder {
    pub(crate) fn new(key: BinderKey, op: UnaryOp, cache: RuleCache) -> Self {
        UnaryOperationBinder { key, op, cache }
    }

    pub fn op(&self) -> UnaryOp {
        self.op
    }

    pub fn fallback(&self, _rt: &Runtime, target: &MetaArg) -> BindOutcome {
        if let Some(deferred) = defer_if_unready(target, &[]) {
            return deferred;
        }
        match self.op {
            UnaryOp::Not => BindOutcome::rule(
                target.restrictions().clone(),
                Arc::new(|_, args| Ok(Value::Bool(!arg(args, 0)?.is_truthy()))),
            ),
        }
    }
}

impl Binder for UnaryOperationBinder {
    fn key(&self) -> &BinderKey {
        &self.key
    }

    fn cache(&self) -> &RuleCache {
        &self.cache
    }

    fn bind(&self, rt: &Runtime, target: &MetaArg, args: &[MetaArg]) -> BindOutcome {
        if !args.is_empty() {
            return BindOutcome::fail(
                Error::arity_error_with_expr(1, args.len() + 1, self.op.to_string()),
                combined(target, args),
            );
        }
        if let Some(obj) = target.interop()
            && let Some(outcome) = obj.bind_unary_operation(self, rt, target)
        {
            return outcome;
        }
        self.fallback(rt, target)
    }
}
