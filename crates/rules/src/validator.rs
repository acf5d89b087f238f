//! Adapter exposing the rule engine as a [`Validator`].

use async_trait::async_trait;
use std::sync::Arc;
use toolwarden_core::{
    CallContext, Category, EventContext, Predicate, ValidationResult, Validator, ValidatorError,
    aggregate,
};

use crate::engine::RuleEngine;
use crate::model::{ActionType, Rule};

pub const RULES_VALIDATOR_NAME: &str = "rules";

/// Runs the rule engine and converts matching rules into one result.
///
/// An `allow` match is a pass; it does not override other validators.
pub struct RuleValidator {
    engine: Arc<RuleEngine>,
}

impl RuleValidator {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Applies whenever at least one rule is enabled.
    pub fn predicate(&self) -> Predicate {
        if self.engine.active_count() == 0 {
            Predicate::never()
        } else {
            Predicate::always()
        }
    }
}

fn rule_result(rule: &Rule) -> ValidationResult {
    let action = &rule.action;
    let result = match action.action_type {
        ActionType::Block => ValidationResult::block(&action.message),
        ActionType::Warn => ValidationResult::warn(&action.message),
        ActionType::Allow => ValidationResult::pass_with_message(&action.message),
    };
    let result = result.with_detail("rule", &rule.name);
    match &action.reference {
        Some(reference) => result.with_reference(reference),
        None => result,
    }
}

#[async_trait]
impl Validator for RuleValidator {
    fn name(&self) -> &str {
        RULES_VALIDATOR_NAME
    }

    fn category(&self) -> Category {
        Category::Cpu
    }

    async fn validate(
        &self,
        cx: &CallContext,
        event: &EventContext,
    ) -> Result<ValidationResult, ValidatorError> {
        cx.check()
            .map_err(|e| ValidatorError::from_call(RULES_VALIDATOR_NAME, e))?;

        let matched = self.engine.evaluate_all(event);
        match matched.as_slice() {
            [] => Ok(ValidationResult::pass()),
            [rule] => Ok(rule_result(rule)),
            rules => {
                let verdict = aggregate(
                    rules
                        .iter()
                        .map(|rule| (rule.name.clone(), rule_result(rule))),
                );
                Ok(verdict.result)
            }
        }
    }
}
