use super::{BindOutcome, Binder, Deferral, MetaArg, Rule, RuleCache, shape};
use crate::Error;
use crate::runtime::Runtime;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A dynamic operation at one point in the program, with its own cache of
/// the rules it has seen.
pub struct CallSite {
    binder: Arc<dyn Binder>,
    rules: RuleCache,
}

impl CallSite {
    pub fn new(binder: Arc<dyn Binder>, capacity: usize) -> Self {
        CallSite {
            binder,
            rules: RuleCache::new(capacity),
        }
    }

    pub fn binder(&self) -> &Arc<dyn Binder> {
        &self.binder
    }

    /// Number of rules currently cached at this site.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Perform the operation on `args`, target first.
    pub fn invoke(&self, rt: &Runtime, args: &[Value]) -> Result<Value, Error> {
        if let Some(rule) = self.rules.find(args) {
            trace!(site = %self.binder.key(), "call site hit");
            return rule.run(rt, args);
        }

        let rule = match self.binder.cache().find(args) {
            Some(rule) => {
                trace!(site = %self.binder.key(), "binder cache hit");
                rule
            }
            None => {
                let rule = self.bind(rt, args)?;
                self.binder.cache().insert(rule.clone());
                rule
            }
        };
        self.rules.insert(rule.clone());
        rule.run(rt, args)
    }

    fn bind(&self, rt: &Runtime, args: &[Value]) -> Result<Rule, Error> {
        let key = self.binder.key();
        let metas: Vec<MetaArg> = args
            .iter()
            .enumerate()
            .map(|(index, value)| MetaArg::new(index, value.clone()))
            .collect();
        let Some((target, rest)) = metas.split_first() else {
            return Err(Error::InvalidOperation(format!("{key} needs a target")));
        };
        debug!(site = %key, args = %shape(&metas), "call site miss, binding");

        Ok(match self.binder.bind(rt, target, rest) {
            BindOutcome::Rule(rule) => rule,
            BindOutcome::Fail {
                error,
                restrictions,
            } => {
                debug!(site = %key, %error, "binding failed");
                Rule::error(restrictions, error)
            }
            BindOutcome::Defer(deferral) => {
                debug!(site = %key, participants = deferral.participants.len(), "binding deferred");
                self.deferred_rule(deferral)
            }
        })
    }

    /// A rule that computes the deferred participants and dispatches on them
    /// through a nested site sharing this site's binder.
    fn deferred_rule(&self, deferral: Deferral) -> Rule {
        let nested = CallSite::new(Arc::clone(&self.binder), self.rules.capacity());
        let participants = deferral.participants;
        Rule::new(
            deferral.restrictions,
            Arc::new(move |rt, args| {
                let values = participants
                    .iter()
                    .map(|p| p.evaluate(args))
                    .collect::<Result<Vec<_>, _>>()?;
                nested.invoke(rt, &values)
            }),
        )
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("binder", self.binder.key())
            .field("rules", &self.rules.len())
            .finish()
    }
}
