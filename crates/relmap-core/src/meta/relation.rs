use std::fmt;

use crate::errors::{OrmError, Result};

/// Upper bound of a relation end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    Bounded(u32),
    Unbound,
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplicity::Bounded(n) => write!(f, "{}", n),
            Multiplicity::Unbound => write!(f, "unbound"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationKind {
    #[default]
    None,
    Shared,
    Composite,
}

/// Position of the other end relative to this type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyType {
    Parent,
    Child,
    Undefined,
}

/// One end of a relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEnd {
    pub type_name: String,
    pub role: String,
    pub min: u32,
    pub max: Multiplicity,
    pub aggregation: AggregationKind,
    pub navigable: bool,
}

impl RelationEnd {
    fn new(type_name: &str, role: &str, max: Multiplicity) -> Self {
        Self {
            type_name: type_name.to_string(),
            role: role.to_string(),
            min: 0,
            max,
            aggregation: AggregationKind::None,
            navigable: true,
        }
    }
}

/// Many-to-many relation realized through a junction type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToManyRelation {
    pub junction_type: String,
    /// This type to junction (one-to-many)
    pub this_end: RelationDescription,
    /// Junction to the other type (many-to-one)
    pub other_end: RelationDescription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// `fk_column` lives in the other (many) table and references `id_column` here
    OneToMany { id_column: String, fk_column: String },
    /// `fk_column` lives in this table and references `id_column` in the other
    ManyToOne { fk_column: String, id_column: String },
    ManyToMany(Box<ManyToManyRelation>),
}

/// Static description of a relation from the point of view of `this` type
///
/// Related entities are stored on the entity under the other end's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescription {
    this: RelationEnd,
    other: RelationEnd,
    hierarchy: HierarchyType,
    kind: RelationKind,
}

impl RelationDescription {
    /// Parent-side view: one `this` owns many `other`
    pub fn one_to_many(
        this_type: &str,
        this_role: &str,
        other_type: &str,
        other_role: &str,
        id_column: &str,
        fk_column: &str,
    ) -> Self {
        Self {
            this: RelationEnd::new(this_type, this_role, Multiplicity::Bounded(1)),
            other: RelationEnd::new(other_type, other_role, Multiplicity::Unbound),
            hierarchy: HierarchyType::Child,
            kind: RelationKind::OneToMany {
                id_column: id_column.to_string(),
                fk_column: fk_column.to_string(),
            },
        }
    }

    /// Child-side view: many `this` reference one `other`
    pub fn many_to_one(
        this_type: &str,
        this_role: &str,
        other_type: &str,
        other_role: &str,
        fk_column: &str,
        id_column: &str,
    ) -> Self {
        Self {
            this: RelationEnd::new(this_type, this_role, Multiplicity::Unbound),
            other: RelationEnd::new(other_type, other_role, Multiplicity::Bounded(1)),
            hierarchy: HierarchyType::Parent,
            kind: RelationKind::ManyToOne {
                fk_column: fk_column.to_string(),
                id_column: id_column.to_string(),
            },
        }
    }

    /// Compose a many-to-many relation from its two directional halves
    ///
    /// Multiplicities and aggregation of the other end are taken from
    /// `this_end`; the other role and navigability from `other_end`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the halves do not meet in one
    /// junction type or have the wrong kinds.
    pub fn many_to_many(
        this_end: RelationDescription,
        other_end: RelationDescription,
    ) -> Result<Self> {
        if !matches!(this_end.kind, RelationKind::OneToMany { .. }) {
            return Err(OrmError::InvalidConfiguration {
                reason: format!("'{}' must be one-to-many", this_end.other.role),
            });
        }
        if !matches!(other_end.kind, RelationKind::ManyToOne { .. }) {
            return Err(OrmError::InvalidConfiguration {
                reason: format!("'{}' must be many-to-one", other_end.other.role),
            });
        }
        if this_end.other.type_name != other_end.this.type_name {
            return Err(OrmError::InvalidConfiguration {
                reason: format!(
                    "junction mismatch: {} vs {}",
                    this_end.other.type_name, other_end.this.type_name
                ),
            });
        }

        let other = RelationEnd {
            type_name: other_end.other.type_name.clone(),
            role: other_end.other.role.clone(),
            min: this_end.other.min,
            max: this_end.other.max,
            aggregation: this_end.other.aggregation,
            navigable: other_end.other.navigable,
        };
        Ok(Self {
            this: this_end.this.clone(),
            other,
            hierarchy: HierarchyType::Child,
            kind: RelationKind::ManyToMany(Box::new(ManyToManyRelation {
                junction_type: this_end.other.type_name.clone(),
                this_end,
                other_end,
            })),
        })
    }

    pub fn with_this_aggregation(mut self, kind: AggregationKind) -> Self {
        self.this.aggregation = kind;
        self
    }

    pub fn with_other_aggregation(mut self, kind: AggregationKind) -> Self {
        self.other.aggregation = kind;
        self
    }

    pub fn with_this_multiplicity(mut self, min: u32, max: Multiplicity) -> Self {
        self.this.min = min;
        self.this.max = max;
        self
    }

    pub fn with_other_multiplicity(mut self, min: u32, max: Multiplicity) -> Self {
        self.other.min = min;
        self.other.max = max;
        self
    }

    pub fn with_navigability(mut self, this: bool, other: bool) -> Self {
        self.this.navigable = this;
        self.other.navigable = other;
        self
    }

    pub fn with_hierarchy(mut self, hierarchy: HierarchyType) -> Self {
        if !self.is_many_to_many() {
            self.hierarchy = hierarchy;
        }
        self
    }

    pub fn this(&self) -> &RelationEnd {
        &self.this
    }

    pub fn other(&self) -> &RelationEnd {
        &self.other
    }

    /// Role under which related entities are stored
    pub fn role(&self) -> &str {
        &self.other.role
    }

    pub fn other_type(&self) -> &str {
        &self.other.type_name
    }

    pub fn hierarchy(&self) -> HierarchyType {
        self.hierarchy
    }

    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    pub fn is_many_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::ManyToMany(_))
    }

    /// True when the other end may hold several entities
    pub fn is_to_many(&self) -> bool {
        !matches!(self.kind, RelationKind::ManyToOne { .. })
    }

    /// Deleting this end deletes the other end
    pub fn is_composite(&self) -> bool {
        self.this.aggregation == AggregationKind::Composite
    }

    pub fn as_many_to_many(&self) -> Option<&ManyToManyRelation> {
        match &self.kind {
            RelationKind::ManyToMany(m2m) => Some(m2m),
            _ => None,
        }
    }

    /// Foreign-key column this relation stores in this type's table
    pub fn local_fk_column(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::ManyToOne { fk_column, .. } => Some(fk_column),
            _ => None,
        }
    }
}
