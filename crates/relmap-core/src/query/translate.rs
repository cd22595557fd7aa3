//! Domain-to-storage vocabulary translation
//!
//! Criteria and order text is written with type and attribute names. Before
//! SQL assembly every identifier token that names a type, an attribute, a
//! key column or a reference is replaced by its table or `table.column`
//! form. Quoted literals are never touched and substitution is exact-token:
//! `name` is replaced but `surname` is not.

use std::collections::HashMap;

use regex::{Captures, Regex};

use crate::errors::{OrmError, Result};
use crate::meta::TypeDescription;

const TOKEN_PATTERN: &str = r"'(?:[^']|'')*'|[A-Za-z_][A-Za-z0-9_.]*";

/// A reference attribute materialized by a LEFT JOIN on the parent table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceJoin {
    /// Reference name in domain vocabulary
    pub name: String,
    /// Relation role the join goes through
    pub role: String,
    /// Alias of the joined table in the statement
    pub alias: String,
    pub table: String,
    /// Referenced column in the joined table
    pub column: String,
    /// Foreign-key column in the owning table
    pub fk_column: String,
    /// Key column in the joined table
    pub id_column: String,
}

/// Token map from domain names to storage names
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: HashMap<String, String>,
    pattern: Regex,
}

impl Vocabulary {
    /// Empty vocabulary
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the token pattern fails to compile.
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(TOKEN_PATTERN).map_err(|e| OrmError::Internal {
            message: format!("token pattern: {}", e),
        })?;
        Ok(Self {
            tokens: HashMap::new(),
            pattern,
        })
    }

    /// Vocabulary of one type plus the references it joins
    ///
    /// # Errors
    ///
    /// See [`Vocabulary::new`].
    pub fn for_type(meta: &TypeDescription, joins: &[ReferenceJoin]) -> Result<Self> {
        let mut vocabulary = Self::new()?;
        let table = meta.table();
        let type_names = [meta.qualified_name(), meta.name()];
        for type_name in type_names {
            vocabulary.insert(type_name, table);
        }

        let mut columns: Vec<(String, String)> = meta
            .pk_columns()
            .iter()
            .map(|pk| (pk.clone(), format!("{}.{}", table, pk)))
            .collect();
        columns.extend(meta.parent_relations().filter_map(|r| {
            r.local_fk_column()
                .map(|fk| (fk.to_string(), format!("{}.{}", table, fk)))
        }));
        columns.extend(meta.attributes().iter().map(|a| {
            (a.name().to_string(), format!("{}.{}", table, a.column()))
        }));
        columns.extend(
            joins
                .iter()
                .map(|j| (j.name.clone(), format!("{}.{}", j.alias, j.column))),
        );

        for (name, column) in columns {
            for type_name in type_names {
                vocabulary.insert(&format!("{}.{}", type_name, name), &column);
            }
            vocabulary.insert(&name, &column);
        }
        Ok(vocabulary)
    }

    pub fn insert(&mut self, domain: &str, storage: &str) {
        self.tokens.insert(domain.to_string(), storage.to_string());
    }

    /// Storage form of a single domain token
    pub fn lookup(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    /// Replace every known identifier token outside quoted literals
    pub fn translate(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let token = &caps[0];
                if token.starts_with('\'') {
                    return token.to_string();
                }
                self.lookup(token).unwrap_or(token).to_string()
            })
            .into_owned()
    }
}
