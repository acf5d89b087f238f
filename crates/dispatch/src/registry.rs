//! Validator registry — every check paired with the predicate gating it.

use std::sync::Arc;
use toolwarden_core::{EventContext, Predicate, Validator};

pub struct RegisteredValidator {
    pub validator: Arc<dyn Validator>,
    pub predicate: Predicate,
}

/// Registration order is evaluation order, and the order results are aggregated in.
#[derive(Default)]
pub struct ValidatorRegistry {
    entries: Vec<RegisteredValidator>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, validator: Arc<dyn Validator>, predicate: Predicate) {
        self.entries.push(RegisteredValidator {
            validator,
            predicate,
        });
    }

    /// Validators whose predicate matches, in registration order.
    pub fn applicable_for(&self, event: &EventContext) -> Vec<Arc<dyn Validator>> {
        self.entries
            .iter()
            .filter(|e| e.predicate.matches(event))
            .map(|e| e.validator.clone())
            .collect()
    }

    pub fn validators(&self) -> impl Iterator<Item = &Arc<dyn Validator>> {
        self.entries.iter().map(|e| &e.validator)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.validator.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
