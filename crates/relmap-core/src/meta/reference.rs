use std::cell::OnceCell;

use crate::errors::{OrmError, Result};

use super::{AttributeDescription, RelationKind, TypeDescription, TypeLookup};

/// Read-only attribute denormalized from a many-to-one parent
///
/// `other_role` names the parent relation on the owning type and
/// `other_name` the attribute on the parent. Everything else about the
/// reference (value type, default, tags, restrictions) is the parent
/// attribute's and is resolved through the registry on first access.
#[derive(Debug, Clone)]
pub struct ReferenceDescription {
    name: String,
    other_role: String,
    other_name: String,
    resolved: OnceCell<AttributeDescription>,
}

impl ReferenceDescription {
    pub fn new(
        name: impl Into<String>,
        other_role: impl Into<String>,
        other_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            other_role: other_role.into(),
            other_name: other_name.into(),
            resolved: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn other_role(&self) -> &str {
        &self.other_role
    }

    pub fn other_name(&self) -> &str {
        &self.other_name
    }

    /// Descriptor of the referenced attribute, cached after the first call
    ///
    /// # Errors
    ///
    /// Fails if the role is unknown or not many-to-one, or the parent type
    /// or attribute is not registered.
    pub fn resolve(
        &self,
        owner: &TypeDescription,
        lookup: &dyn TypeLookup,
    ) -> Result<&AttributeDescription> {
        if let Some(attribute) = self.resolved.get() {
            return Ok(attribute);
        }

        let relation = owner.relation(&self.other_role)?;
        if !matches!(relation.kind(), RelationKind::ManyToOne { .. }) {
            return Err(OrmError::InvalidConfiguration {
                reason: format!(
                    "reference '{}' on {} must go through a many-to-one role, '{}' is not",
                    self.name,
                    owner.qualified_name(),
                    self.other_role
                ),
            });
        }
        let other = lookup.lookup(relation.other_type())?;
        let attribute = other.attribute(&self.other_name)?.clone();

        let _ = self.resolved.set(attribute);
        self.resolved.get().ok_or_else(|| OrmError::Internal {
            message: format!("reference '{}' did not cache", self.name),
        })
    }
}
