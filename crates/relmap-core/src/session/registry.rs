use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::errors::{OrmError, Result};
use crate::mapper::Mapper;
use crate::meta::{TypeDescription, TypeLookup};

/// Routes simple and qualified type names to mappers
///
/// When two qualified types share a simple name the simple alias is
/// removed for good, so a bare `Person` can never silently reach the
/// wrong type.
#[derive(Default)]
pub struct TypeRegistry {
    mappers: HashMap<String, Rc<Mapper>>,
    aliases: HashMap<String, String>,
    collisions: BTreeSet<String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the qualified name is taken.
    pub fn register(&mut self, mapper: Mapper) -> Result<()> {
        let qualified = mapper.meta().qualified_name().to_string();
        let simple = mapper.meta().name().to_string();
        if self.mappers.contains_key(&qualified) {
            return Err(OrmError::InvalidConfiguration {
                reason: format!("type {} registered twice", qualified),
            });
        }

        let clashes = self.mappers.values().any(|m| m.meta().name() == simple);
        if clashes && !self.collisions.contains(&simple) {
            self.aliases.remove(&simple);
            self.collisions.insert(simple.clone());
            tracing::warn!(
                component = module_path!(),
                op = "register",
                type_name = %qualified,
                alias = %simple,
                "simple name is ambiguous; only qualified names resolve"
            );
        } else if !clashes && simple != qualified {
            self.aliases.insert(simple, qualified.clone());
        }

        self.mappers.insert(qualified, Rc::new(mapper));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `UnknownType` if no mapper answers to `name`.
    pub fn mapper(&self, name: &str) -> Result<Rc<Mapper>> {
        if let Some(mapper) = self.mappers.get(name) {
            return Ok(mapper.clone());
        }
        if self.collisions.contains(name) {
            return Err(OrmError::UnknownType {
                type_name: format!("{} (ambiguous simple name)", name),
            });
        }
        self.aliases
            .get(name)
            .and_then(|qualified| self.mappers.get(qualified))
            .cloned()
            .ok_or_else(|| OrmError::UnknownType {
                type_name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mapper(name).is_ok()
    }

    /// Qualified names of every registered type, sorted
    pub fn type_names(&self) -> BTreeSet<String> {
        self.mappers.keys().cloned().collect()
    }

    pub fn mappers(&self) -> impl Iterator<Item = &Rc<Mapper>> {
        self.mappers.values()
    }
}

impl TypeLookup for TypeRegistry {
    fn lookup(&self, name: &str) -> Result<Rc<TypeDescription>> {
        self.mapper(name).map(|m| m.meta().clone())
    }
}
