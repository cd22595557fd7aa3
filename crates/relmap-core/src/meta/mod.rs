//! Per-type schema metadata: attributes, relations and references

use std::rc::Rc;

use crate::errors::Result;

pub mod attribute;
pub mod reference;
pub mod relation;
pub mod type_desc;

pub use attribute::{filter_by_tags, AttributeDescription, TagMatch};
pub use reference::ReferenceDescription;
pub use relation::{
    AggregationKind, HierarchyType, ManyToManyRelation, Multiplicity, RelationDescription,
    RelationEnd, RelationKind,
};
pub use type_desc::{TypeBuilder, TypeDescription};

/// Resolves a simple or qualified type name to its description
pub trait TypeLookup {
    /// # Errors
    ///
    /// Returns `UnknownType` if nothing is registered under `name`.
    fn lookup(&self, name: &str) -> Result<Rc<TypeDescription>>;
}
