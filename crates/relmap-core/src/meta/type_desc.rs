use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::errors::{OrmError, Result};
use crate::hooks::{EntityHooks, NoopHooks};

use super::{
    filter_by_tags, AttributeDescription, HierarchyType, ReferenceDescription,
    RelationDescription, TagMatch,
};

/// Static schema facts for one entity type, mapped to one table
///
/// Lookup indices over attributes and relations are computed once in
/// [`TypeBuilder::build`] and never invalidated.
pub struct TypeDescription {
    qualified_name: String,
    name: String,
    table: String,
    pk_columns: Vec<String>,
    attributes: Vec<AttributeDescription>,
    relations: Vec<RelationDescription>,
    references: Vec<ReferenceDescription>,
    hooks: Rc<dyn EntityHooks>,
    attribute_index: HashMap<String, usize>,
    role_index: HashMap<String, usize>,
    parents: Vec<usize>,
    children: Vec<usize>,
    undefined: Vec<usize>,
    other_type_index: HashMap<String, Vec<usize>>,
}

impl fmt::Debug for TypeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescription")
            .field("qualified_name", &self.qualified_name)
            .field("table", &self.table)
            .field("pk_columns", &self.pk_columns)
            .field("attributes", &self.attributes.len())
            .field("relations", &self.relations.len())
            .field("references", &self.references.len())
            .finish()
    }
}

impl TypeDescription {
    /// Start describing a type; the table defaults to the simple name in
    /// lower case and the primary key to a single `id` column
    pub fn builder(qualified_name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(qualified_name.into())
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Part of the qualified name after the last `.`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pk_columns(&self) -> &[String] {
        &self.pk_columns
    }

    pub fn is_pk_column(&self, name: &str) -> bool {
        self.pk_columns.iter().any(|pk| pk == name)
    }

    pub fn attributes(&self) -> &[AttributeDescription] {
        &self.attributes
    }

    /// # Errors
    ///
    /// Returns `UnknownAttribute` if the type declares no such attribute.
    pub fn attribute(&self, name: &str) -> Result<&AttributeDescription> {
        self.attribute_index
            .get(name)
            .map(|&i| &self.attributes[i])
            .ok_or_else(|| OrmError::UnknownAttribute {
                type_name: self.qualified_name.clone(),
                attribute: name.to_string(),
            })
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute_index.contains_key(name)
    }

    pub fn attributes_by_tags(
        &self,
        requested: &BTreeSet<String>,
        mode: TagMatch,
    ) -> Vec<&AttributeDescription> {
        filter_by_tags(&self.attributes, requested, mode)
    }

    pub fn relations(&self) -> &[RelationDescription] {
        &self.relations
    }

    /// # Errors
    ///
    /// Returns `UnknownRole` if no relation is stored under `role`.
    pub fn relation(&self, role: &str) -> Result<&RelationDescription> {
        self.role_index
            .get(role)
            .map(|&i| &self.relations[i])
            .ok_or_else(|| OrmError::UnknownRole {
                type_name: self.qualified_name.clone(),
                role: role.to_string(),
            })
    }

    pub fn has_relation(&self, role: &str) -> bool {
        self.role_index.contains_key(role)
    }

    pub fn relations_by_hierarchy(&self, hierarchy: HierarchyType) -> Vec<&RelationDescription> {
        let indices = match hierarchy {
            HierarchyType::Parent => &self.parents,
            HierarchyType::Child => &self.children,
            HierarchyType::Undefined => &self.undefined,
        };
        indices.iter().map(|&i| &self.relations[i]).collect()
    }

    /// All relations whose other end is `other`
    pub fn relations_to(&self, other: &TypeDescription) -> Vec<&RelationDescription> {
        let mut seen = HashSet::new();
        [other.qualified_name(), other.name()]
            .iter()
            .filter_map(|name| self.other_type_index.get(*name))
            .flatten()
            .filter(|&&i| seen.insert(i))
            .map(|&i| &self.relations[i])
            .collect()
    }

    /// The single relation reaching `other`
    ///
    /// # Errors
    ///
    /// Returns `UnknownRole` if none reaches it and `AmbiguousRole` if
    /// several do.
    pub fn role_for_type(&self, other: &TypeDescription) -> Result<&RelationDescription> {
        let candidates = self.relations_to(other);
        match candidates.as_slice() {
            [single] => Ok(single),
            [] => Err(OrmError::UnknownRole {
                type_name: self.qualified_name.clone(),
                role: format!("<any role to {}>", other.qualified_name()),
            }),
            many => Err(OrmError::AmbiguousRole {
                type_name: self.qualified_name.clone(),
                other_type: other.qualified_name().to_string(),
                roles: many.iter().map(|r| r.role().to_string()).collect(),
            }),
        }
    }

    /// Many-to-one relations, i.e. those owning a foreign-key column here
    pub fn parent_relations(&self) -> impl Iterator<Item = &RelationDescription> {
        self.relations
            .iter()
            .filter(|r| r.local_fk_column().is_some())
    }

    pub fn references(&self) -> &[ReferenceDescription] {
        &self.references
    }

    pub fn reference(&self, name: &str) -> Option<&ReferenceDescription> {
        self.references.iter().find(|r| r.name() == name)
    }

    pub fn hooks(&self) -> &Rc<dyn EntityHooks> {
        &self.hooks
    }

    /// Whether `name` is this type's qualified or simple name
    pub fn is_named(&self, name: &str) -> bool {
        self.qualified_name == name || self.name == name
    }
}

/// Builder for [`TypeDescription`]
pub struct TypeBuilder {
    qualified_name: String,
    table: Option<String>,
    pk_columns: Vec<String>,
    attributes: Vec<AttributeDescription>,
    relations: Vec<RelationDescription>,
    references: Vec<ReferenceDescription>,
    hooks: Rc<dyn EntityHooks>,
}

impl TypeBuilder {
    fn new(qualified_name: String) -> Self {
        Self {
            qualified_name,
            table: None,
            pk_columns: vec!["id".to_string()],
            attributes: Vec::new(),
            relations: Vec::new(),
            references: Vec::new(),
            hooks: Rc::new(NoopHooks),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.pk_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn relation(mut self, relation: RelationDescription) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn reference(mut self, reference: ReferenceDescription) -> Self {
        self.references.push(reference);
        self
    }

    pub fn hooks(mut self, hooks: Rc<dyn EntityHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate the declarations and compute the lookup indices
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for an empty name or key, duplicate
    /// attribute, role or reference names, attributes shadowing key or
    /// foreign-key columns, and relations declared for another type.
    pub fn build(self) -> Result<TypeDescription> {
        let invalid = |reason: String| OrmError::InvalidConfiguration { reason };
        let qualified_name = self.qualified_name;
        let name = qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&qualified_name)
            .to_string();
        if name.is_empty() || qualified_name.contains(':') {
            return Err(invalid(format!("illegal type name '{}'", qualified_name)));
        }
        if self.pk_columns.is_empty() {
            return Err(invalid(format!("{} has no primary key", qualified_name)));
        }

        let mut reserved: HashSet<&str> = self.pk_columns.iter().map(String::as_str).collect();
        for relation in &self.relations {
            if relation.this().type_name != qualified_name && relation.this().type_name != name {
                return Err(invalid(format!(
                    "relation '{}' is declared for {}, not {}",
                    relation.role(),
                    relation.this().type_name,
                    qualified_name
                )));
            }
            if let Some(fk) = relation.local_fk_column() {
                reserved.insert(fk);
            }
        }

        let mut attribute_index = HashMap::new();
        for (i, attribute) in self.attributes.iter().enumerate() {
            if reserved.contains(attribute.name()) {
                return Err(invalid(format!(
                    "attribute '{}' of {} shadows a key column",
                    attribute.name(),
                    qualified_name
                )));
            }
            if attribute_index.insert(attribute.name().to_string(), i).is_some() {
                return Err(invalid(format!(
                    "duplicate attribute '{}' on {}",
                    attribute.name(),
                    qualified_name
                )));
            }
        }

        let mut role_index = HashMap::new();
        let mut other_type_index: HashMap<String, Vec<usize>> = HashMap::new();
        let (mut parents, mut children, mut undefined) = (Vec::new(), Vec::new(), Vec::new());
        for (i, relation) in self.relations.iter().enumerate() {
            if role_index.insert(relation.role().to_string(), i).is_some() {
                return Err(invalid(format!(
                    "duplicate role '{}' on {}",
                    relation.role(),
                    qualified_name
                )));
            }
            other_type_index
                .entry(relation.other_type().to_string())
                .or_default()
                .push(i);
            match relation.hierarchy() {
                HierarchyType::Parent => parents.push(i),
                HierarchyType::Child => children.push(i),
                HierarchyType::Undefined => undefined.push(i),
            }
        }

        let mut reference_names = HashSet::new();
        for reference in &self.references {
            let clashes = attribute_index.contains_key(reference.name())
                || reserved.contains(reference.name());
            if clashes || !reference_names.insert(reference.name()) {
                return Err(invalid(format!(
                    "reference '{}' on {} clashes with another name",
                    reference.name(),
                    qualified_name
                )));
            }
        }

        Ok(TypeDescription {
            table: self.table.unwrap_or_else(|| name.to_lowercase()),
            qualified_name,
            name,
            pk_columns: self.pk_columns,
            attributes: self.attributes,
            relations: self.relations,
            references: self.references,
            hooks: self.hooks,
            attribute_index,
            role_index,
            parents,
            children,
            undefined,
            other_type_index,
        })
    }
}
