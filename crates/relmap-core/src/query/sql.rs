//! SQL statement construction for one type
//!
//! Statements use positional `?` placeholders; values are never inlined.
//! Selected columns are aliased to their domain names so rows come back
//! keyed by attribute, key column or reference name.

use std::rc::Rc;

use crate::errors::{OrmError, Result};
use crate::meta::TypeDescription;
use crate::model::{ObjectId, Value};

use super::criteria::{Criteria, Direction, Operator, Projection, Query};
use super::translate::{ReferenceJoin, Vocabulary};

/// Statement text plus its bound parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Builds the statements of one type's mapper
#[derive(Debug)]
pub struct SqlBuilder {
    meta: Rc<TypeDescription>,
    joins: Vec<ReferenceJoin>,
    vocabulary: Vocabulary,
}

impl SqlBuilder {
    /// # Errors
    ///
    /// See [`Vocabulary::for_type`].
    pub fn new(meta: Rc<TypeDescription>, joins: Vec<ReferenceJoin>) -> Result<Self> {
        let vocabulary = Vocabulary::for_type(&meta, &joins)?;
        Ok(Self {
            meta,
            joins,
            vocabulary,
        })
    }

    pub fn joins(&self) -> &[ReferenceJoin] {
        &self.joins
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// `t.pk1 = ? AND t.pk2 = ?`, paired positionally with the oid's ids
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if the id arity differs from the key or
    /// the id is still a dummy.
    pub fn pk_condition(&self, oid: &ObjectId) -> Result<(String, Vec<Value>)> {
        let pks = self.meta.pk_columns();
        if oid.ids().len() != pks.len() {
            return Err(OrmError::illegal_argument(format!(
                "{} has {} key values, {} expects {}",
                oid,
                oid.ids().len(),
                self.meta.qualified_name(),
                pks.len()
            )));
        }
        if oid.is_dummy() {
            return Err(OrmError::illegal_argument(format!(
                "{} has no storage identity yet",
                oid
            )));
        }
        let condition = pks
            .iter()
            .map(|pk| format!("{}.{} = ?", self.meta.table(), pk))
            .collect::<Vec<_>>()
            .join(" AND ");
        Ok((condition, oid.ids().iter().map(Value::from).collect()))
    }

    fn select_list(&self, projection: &Projection) -> String {
        let table = self.meta.table();
        let mut columns: Vec<String> = self
            .meta
            .pk_columns()
            .iter()
            .map(|pk| format!("{}.{} AS {}", table, pk, pk))
            .collect();
        columns.extend(self.meta.parent_relations().filter_map(|r| {
            r.local_fk_column()
                .map(|fk| format!("{}.{} AS {}", table, fk, fk))
        }));
        columns.extend(
            self.meta
                .attributes()
                .iter()
                .filter(|a| projection.includes(a.name()))
                .map(|a| format!("{}.{} AS {}", table, a.column(), a.name())),
        );
        columns.extend(
            self.joins
                .iter()
                .filter(|j| projection.includes(&j.name))
                .map(|j| format!("{}.{} AS {}", j.alias, j.column, j.name)),
        );
        columns.join(", ")
    }

    fn from_clause(&self) -> String {
        let table = self.meta.table();
        let mut from = table.to_string();
        let mut joined: Vec<&str> = Vec::new();
        for join in &self.joins {
            if joined.contains(&join.alias.as_str()) {
                continue;
            }
            joined.push(&join.alias);
            let target = if join.alias == join.table {
                join.table.clone()
            } else {
                format!("{} AS {}", join.table, join.alias)
            };
            from.push_str(&format!(
                " LEFT JOIN {} ON {}.{} = {}.{}",
                target, join.alias, join.id_column, table, join.fk_column
            ));
        }
        from
    }

    fn column_for(&self, name: &str) -> Result<&str> {
        self.vocabulary
            .lookup(name)
            .ok_or_else(|| OrmError::UnknownAttribute {
                type_name: self.meta.qualified_name().to_string(),
                attribute: name.to_string(),
            })
    }

    fn where_clause(&self, query: &Query, params: &mut Vec<Value>) -> Result<Option<String>> {
        let mut parts = Vec::new();
        if !query.criteria.is_empty() {
            parts.push(format!("({})", self.criteria_sql(&query.criteria, params)?));
        }
        if let Some(condition) = &query.condition {
            parts.push(format!("({})", self.vocabulary.translate(condition)));
        }
        Ok((!parts.is_empty()).then(|| parts.join(" AND ")))
    }

    fn criteria_sql(&self, criteria: &[Criteria], params: &mut Vec<Value>) -> Result<String> {
        let mut sql = String::new();
        for (i, criterion) in criteria.iter().enumerate() {
            if i > 0 {
                sql.push_str(&format!(" {} ", criterion.combinator.sql()));
            }
            let column = self.column_for(&criterion.attribute)?;
            let arity = criterion.arity()?;
            match criterion.operator {
                Operator::IsNull | Operator::IsNotNull => {
                    sql.push_str(&format!("{} {}", column, criterion.operator.sql()));
                }
                Operator::In => {
                    let marks = vec!["?"; arity].join(", ");
                    sql.push_str(&format!("{} IN ({})", column, marks));
                    params.extend(criterion.operands.iter().cloned());
                }
                op => {
                    sql.push_str(&format!("{} {} ?", column, op.sql()));
                    params.push(criterion.operands.first().cloned().unwrap_or_default());
                }
            }
        }
        Ok(sql)
    }

    fn order_clause(&self, query: &Query) -> Result<Option<String>> {
        if query.order_by.is_empty() {
            return Ok(None);
        }
        let keys = query
            .order_by
            .iter()
            .map(|order| {
                let direction = match order.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                self.column_for(&order.attribute)
                    .map(|column| format!("{} {}", column, direction))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(keys.join(", ")))
    }

    /// Select rows matching `query`
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute` for criteria or order keys naming nothing
    /// the type or its references declare.
    pub fn select(&self, query: &Query) -> Result<SqlStatement> {
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.select_list(&query.projection),
            self.from_clause()
        );
        if let Some(condition) = self.where_clause(query, &mut params)? {
            sql.push_str(&format!(" WHERE {}", condition));
        }
        if let Some(order) = self.order_clause(query)? {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        if let Some(page) = query.pagination {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Int(i64::try_from(page.limit).unwrap_or(i64::MAX)));
            params.push(Value::Int(i64::try_from(page.offset).unwrap_or(i64::MAX)));
        }
        Ok(SqlStatement::new(sql, params))
    }

    /// Select rows whose own-table columns equal the given values
    ///
    /// Used for key lookups and relation selects (`child.fk = parent.id`,
    /// `parent.id = child.fk`).
    pub fn select_by_columns(
        &self,
        columns: &[(String, Value)],
        projection: &Projection,
    ) -> SqlStatement {
        let table = self.meta.table();
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.select_list(projection),
            self.from_clause()
        );
        if !columns.is_empty() {
            let condition = columns
                .iter()
                .map(|(column, _)| format!("{}.{} = ?", table, column))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {}", condition));
        }
        let order = self
            .meta
            .pk_columns()
            .iter()
            .map(|pk| format!("{}.{}", table, pk))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ORDER BY {}", order));
        SqlStatement::new(sql, columns.iter().map(|(_, v)| v.clone()).collect())
    }

    /// Select one row by key
    ///
    /// # Errors
    ///
    /// See [`SqlBuilder::pk_condition`].
    pub fn select_by_oid(&self, oid: &ObjectId, projection: &Projection) -> Result<SqlStatement> {
        let (condition, params) = self.pk_condition(oid)?;
        Ok(SqlStatement::new(
            format!(
                "SELECT {} FROM {} WHERE {}",
                self.select_list(projection),
                self.from_clause(),
                condition
            ),
            params,
        ))
    }

    /// Count rows matching `query` (ordering and pagination ignored)
    ///
    /// # Errors
    ///
    /// See [`SqlBuilder::select`].
    pub fn count(&self, query: &Query) -> Result<SqlStatement> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.from_clause());
        if let Some(condition) = self.where_clause(query, &mut params)? {
            sql.push_str(&format!(" WHERE {}", condition));
        }
        Ok(SqlStatement::new(sql, params))
    }

    /// `INSERT` of the given columns, in the given order
    pub fn insert(&self, columns: &[(String, Value)]) -> SqlStatement {
        let names = columns
            .iter()
            .map(|(c, _)| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let marks = vec!["?"; columns.len()].join(", ");
        SqlStatement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.meta.table(),
                names,
                marks
            ),
            columns.iter().map(|(_, v)| v.clone()).collect(),
        )
    }

    /// `UPDATE` of the given columns by key; `None` when nothing changed
    ///
    /// # Errors
    ///
    /// See [`SqlBuilder::pk_condition`].
    pub fn update(
        &self,
        columns: &[(String, Value)],
        oid: &ObjectId,
    ) -> Result<Option<SqlStatement>> {
        if columns.is_empty() {
            return Ok(None);
        }
        let table = self.meta.table();
        let (condition, pk_params) = self.pk_condition(oid)?;
        let assignments = columns
            .iter()
            .map(|(c, _)| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<Value> = columns.iter().map(|(_, v)| v.clone()).collect();
        params.extend(pk_params);
        Ok(Some(SqlStatement::new(
            format!("UPDATE {} SET {} WHERE {}", table, assignments, condition),
            params,
        )))
    }

    /// `DELETE` by key
    ///
    /// # Errors
    ///
    /// See [`SqlBuilder::pk_condition`].
    pub fn delete(&self, oid: &ObjectId) -> Result<SqlStatement> {
        let (condition, params) = self.pk_condition(oid)?;
        Ok(SqlStatement::new(
            format!("DELETE FROM {} WHERE {}", self.meta.table(), condition),
            params,
        ))
    }

    /// `DELETE` of every row whose `column` equals `value`
    pub fn delete_where(&self, column: &str, value: Value) -> SqlStatement {
        let table = self.meta.table();
        SqlStatement::new(
            format!("DELETE FROM {} WHERE {}.{} = ?", table, table, column),
            vec![value],
        )
    }

    /// Disassociate every row pointing at `value` through `fk_column`
    pub fn clear_foreign_key(&self, fk_column: &str, value: Value) -> SqlStatement {
        let table = self.meta.table();
        SqlStatement::new(
            format!(
                "UPDATE {} SET {} = NULL WHERE {}.{} = ?",
                table, fk_column, table, fk_column
            ),
            vec![value],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{AttributeDescription, RelationDescription};
    use crate::model::{IdValue, ValueType};
    use crate::query::criteria::{OrderBy, Pagination};

    fn book() -> Rc<TypeDescription> {
        Rc::new(
            TypeDescription::builder("Book")
                .attribute(AttributeDescription::new("title", ValueType::Text))
                .attribute(AttributeDescription::new("pages", ValueType::Integer).with_tag("detail"))
                .relation(RelationDescription::many_to_one(
                    "Book", "books", "Author", "author", "author_id", "id",
                ))
                .build()
                .unwrap(),
        )
    }

    fn builder() -> SqlBuilder {
        let join = ReferenceJoin {
            name: "author_name".to_string(),
            role: "author".to_string(),
            alias: "author".to_string(),
            table: "author".to_string(),
            column: "name".to_string(),
            fk_column: "author_id".to_string(),
            id_column: "id".to_string(),
        };
        SqlBuilder::new(book(), vec![join]).unwrap()
    }

    #[test]
    fn test_select_with_reference_join() {
        let query = Query::new("Book")
            .with_criteria(Criteria::eq("Book", "author_name", "Le Guin"))
            .with_order(OrderBy::desc("pages"))
            .with_pagination(Pagination::new(10, 5));

        let stmt = builder().select(&query).unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT book.id AS id, book.author_id AS author_id, book.title AS title, \
             book.pages AS pages, author.name AS author_name \
             FROM book LEFT JOIN author ON author.id = book.author_id \
             WHERE (author.name = ?) ORDER BY book.pages DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            stmt.params,
            vec![Value::from("Le Guin"), Value::Int(5), Value::Int(10)]
        );
    }

    #[test]
    fn test_self_join_is_aliased() {
        let employee = Rc::new(
            TypeDescription::builder("Employee")
                .attribute(AttributeDescription::new("name", ValueType::Text))
                .relation(RelationDescription::many_to_one(
                    "Employee", "reports", "Employee", "manager", "manager_id", "id",
                ))
                .build()
                .unwrap(),
        );
        let join = ReferenceJoin {
            name: "manager_name".to_string(),
            role: "manager".to_string(),
            alias: "employee_1".to_string(),
            table: "employee".to_string(),
            column: "name".to_string(),
            fk_column: "manager_id".to_string(),
            id_column: "id".to_string(),
        };
        let builder = SqlBuilder::new(employee, vec![join]).unwrap();

        let stmt = builder
            .select(&Query::new("Employee").with_condition("manager_name = 'Ann' AND name <> 'Ann'"))
            .unwrap();

        assert!(stmt.sql.contains("LEFT JOIN employee AS employee_1 ON employee_1.id = employee.manager_id"));
        assert!(stmt
            .sql
            .ends_with("WHERE (employee_1.name = 'Ann' AND employee.name <> 'Ann')"));
    }

    #[test]
    fn test_criteria_combinators_and_in() {
        let query = Query::new("Book")
            .with_criteria(Criteria::is_in("Book", "id", vec![Value::Int(1), Value::Int(2)]))
            .with_criteria(Criteria::new("Book", "title", Operator::IsNull, Value::Null).or());

        let stmt = builder().count(&query).unwrap();

        assert!(stmt
            .sql
            .ends_with("WHERE (book.id IN (?, ?) OR book.title IS NULL)"));
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_unknown_attribute_in_criteria() {
        let query = Query::new("Book").with_criteria(Criteria::eq("Book", "isbn", "x"));
        assert!(matches!(
            builder().select(&query),
            Err(OrmError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_keys_only_projection() {
        let stmt = builder().select_by_columns(
            &[("author_id".to_string(), Value::Int(7))],
            &Projection::KeysOnly,
        );
        assert!(stmt
            .sql
            .starts_with("SELECT book.id AS id, book.author_id AS author_id FROM book"));
        assert!(stmt.sql.contains("WHERE book.author_id = ? ORDER BY book.id"));
    }

    #[test]
    fn test_pk_condition_rejects_dummy_and_arity() {
        let builder = builder();
        assert!(builder.pk_condition(&ObjectId::dummy("Book", 1)).is_err());
        let wide = ObjectId::new("Book", vec![IdValue::Int(1), IdValue::Int(2)]);
        assert!(builder.pk_condition(&wide).is_err());
        let (sql, params) = builder.pk_condition(&ObjectId::with_int("Book", 3)).unwrap();
        assert_eq!(sql, "book.id = ?");
        assert_eq!(params, vec![Value::Int(3)]);
    }

    #[test]
    fn test_update_without_columns_is_none() {
        let builder = builder();
        let oid = ObjectId::with_int("Book", 1);
        assert!(builder.update(&[], &oid).unwrap().is_none());
        let stmt = builder
            .update(&[("title".to_string(), Value::from("X"))], &oid)
            .unwrap()
            .unwrap();
        assert_eq!(stmt.sql, "UPDATE book SET title = ? WHERE book.id = ?");
        assert_eq!(stmt.params, vec![Value::from("X"), Value::Int(1)]);
    }

    #[test]
    fn test_insert_and_clear_fk() {
        let builder = builder();
        let stmt = builder.insert(&[
            ("id".to_string(), Value::Int(7)),
            ("title".to_string(), Value::from("Dune")),
        ]);
        assert_eq!(stmt.sql, "INSERT INTO book (id, title) VALUES (?, ?)");

        let clear = builder.clear_foreign_key("author_id", Value::Int(7));
        assert_eq!(
            clear.sql,
            "UPDATE book SET author_id = NULL WHERE book.author_id = ?"
        );
    }
}
