//! Validation seam
//!
//! Attribute-level checks (type, required, pattern) come from the
//! metadata; an injected [`Validator`] adds entity-level rules. A full
//! pass collects every violation before anything is saved.

use serde::{Deserialize, Serialize};

use crate::errors::{OrmError, Result};
use crate::model::PersistentObject;

/// One failed rule on one attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub attribute: String,
    pub message: String,
}

impl Violation {
    pub fn new(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            message: message.into(),
        }
    }
}

/// External validation engine
pub trait Validator {
    fn validate(&self, entity: &PersistentObject) -> Vec<Violation>;
}

/// Validator that accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, _entity: &PersistentObject) -> Vec<Violation> {
        Vec::new()
    }
}

/// Run every attribute check and the validator, failing with all violations
///
/// # Errors
///
/// Returns `Validation` listing each violation found.
pub fn validate_entity(entity: &PersistentObject, validator: &dyn Validator) -> Result<()> {
    run_checks(entity, validator, |_| true)
}

/// Like [`validate_entity`], but attribute checks only cover attributes the
/// entity actually holds
///
/// Used before updates: attributes left out of a partial fetch were never
/// read, so their absence says nothing about the stored row.
///
/// # Errors
///
/// Returns `Validation` listing each violation found.
pub fn validate_fetched(entity: &PersistentObject, validator: &dyn Validator) -> Result<()> {
    run_checks(entity, validator, |name| entity.data().contains_key(name))
}

fn run_checks(
    entity: &PersistentObject,
    validator: &dyn Validator,
    covers: impl Fn(&str) -> bool,
) -> Result<()> {
    let mut violations: Vec<Violation> = entity
        .meta()
        .attributes()
        .iter()
        .filter(|attribute| covers(attribute.name()))
        .filter_map(|attribute| attribute.check(&entity.value(attribute.name())).err())
        .collect();
    violations.extend(validator.validate(entity));

    if violations.is_empty() {
        Ok(())
    } else {
        Err(OrmError::Validation { violations })
    }
}
