//! Table DDL generated from type metadata
//!
//! Primary-key and foreign-key columns are INTEGER; attribute columns take
//! the SQL type of their declared value type. Many-to-one relations become
//! `FOREIGN KEY` clauses against the parent's table.

use std::collections::BTreeSet;

use relmap_core::errors::OrmError;
use relmap_core::meta::{RelationKind, TypeDescription, TypeLookup};
use rusqlite::Connection;

use crate::errors::{statement_error, Result};

/// `CREATE TABLE IF NOT EXISTS` statement for one type
///
/// # Errors
///
/// `UnknownType` if a many-to-one relation names an unregistered parent;
/// `InvalidConfiguration` if a column is declared twice with different
/// meanings.
pub fn create_table_sql(meta: &TypeDescription, lookup: &dyn TypeLookup) -> Result<String> {
    let mut seen = BTreeSet::new();
    let mut columns = Vec::new();
    let mut constraints = Vec::new();

    for pk in meta.pk_columns() {
        seen.insert(pk.clone());
        columns.push(format!("{} INTEGER NOT NULL", pk));
    }

    for relation in meta.relations() {
        if let RelationKind::ManyToOne {
            fk_column,
            id_column,
        } = relation.kind()
        {
            if seen.insert(fk_column.clone()) {
                columns.push(format!("{} INTEGER", fk_column));
            }
            let parent = lookup.lookup(relation.other_type())?;
            constraints.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                fk_column,
                parent.table(),
                id_column
            ));
        }
    }

    for attribute in meta.attributes() {
        if !seen.insert(attribute.column().to_string()) {
            return Err(OrmError::InvalidConfiguration {
                reason: format!(
                    "column '{}' of {} is declared twice",
                    attribute.column(),
                    meta.qualified_name()
                ),
            });
        }
        columns.push(format!(
            "{} {}",
            attribute.column(),
            attribute.value_type().sql_type()
        ));
    }

    let mut body = columns;
    body.push(format!("PRIMARY KEY ({})", meta.pk_columns().join(", ")));
    body.extend(constraints);

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        meta.table(),
        body.join(",\n    ")
    ))
}

/// Create the tables of every named type
///
/// # Errors
///
/// See [`create_table_sql`]; `Persistence` if a statement fails.
pub fn create_tables(conn: &Connection, names: &[&str], lookup: &dyn TypeLookup) -> Result<()> {
    for name in names {
        let meta = lookup.lookup(name)?;
        let sql = create_table_sql(&meta, lookup)?;
        conn.execute_batch(&sql)
            .map_err(|e| statement_error("create_table", &sql, e))?;
        tracing::debug!(
            component = module_path!(),
            op = "create_table",
            table = %meta.table(),
            "table ready"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::rc::Rc;

    use relmap_core::meta::{AttributeDescription, RelationDescription};
    use relmap_core::ValueType;

    use super::*;

    struct Types(HashMap<String, Rc<TypeDescription>>);

    impl TypeLookup for Types {
        fn lookup(&self, name: &str) -> relmap_core::Result<Rc<TypeDescription>> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| OrmError::UnknownType {
                    type_name: name.to_string(),
                })
        }
    }

    fn types() -> Types {
        let author = TypeDescription::builder("Author")
            .attribute(AttributeDescription::new("name", ValueType::Text))
            .build()
            .unwrap();
        let book = TypeDescription::builder("Book")
            .attribute(AttributeDescription::new("title", ValueType::Text))
            .attribute(AttributeDescription::new("in_print", ValueType::Boolean))
            .relation(RelationDescription::many_to_one(
                "Book", "books", "Author", "author", "author_id", "id",
            ))
            .build()
            .unwrap();
        Types(
            [("Author", author), ("Book", book)]
                .into_iter()
                .map(|(n, t)| (n.to_string(), Rc::new(t)))
                .collect(),
        )
    }

    #[test]
    fn test_child_table_references_parent() {
        let types = types();
        let sql = create_table_sql(&types.lookup("Book").unwrap(), &types).unwrap();

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS book ("));
        assert!(sql.contains("id INTEGER NOT NULL"));
        assert!(sql.contains("author_id INTEGER"));
        assert!(sql.contains("title TEXT"));
        assert!(sql.contains("in_print INTEGER"));
        assert!(sql.contains("PRIMARY KEY (id)"));
        assert!(sql.contains("FOREIGN KEY (author_id) REFERENCES author(id)"));
    }

    #[test]
    fn test_create_tables_runs_against_sqlite() {
        let types = types();
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn, &["Author", "Book"], &types).unwrap();
        create_tables(&conn, &["Author", "Book"], &types).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('author', 'book')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_unknown_parent_is_reported() {
        let orphan = TypeDescription::builder("Orphan")
            .relation(RelationDescription::many_to_one(
                "Orphan", "orphans", "Missing", "parent", "parent_id", "id",
            ))
            .build()
            .unwrap();
        let types = types();
        assert!(matches!(
            create_table_sql(&orphan, &types),
            Err(OrmError::UnknownType { .. })
        ));
    }
}
