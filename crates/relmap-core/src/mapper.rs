//! Per-type mapper: row/entity conversion and CRUD statements
//!
//! A mapper is a generic engine driven by its [`TypeDescription`]; there is
//! no per-type subclassing. Reference joins need the parent types to be
//! registered, so the statement builder is prepared lazily through
//! [`Mapper::prepare`].

use std::cell::{Cell, OnceCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::errors::{OrmError, Result};
use crate::meta::{RelationKind, TypeDescription, TypeLookup};
use crate::model::{IdValue, ObjectId, PersistentObject, Related, Value};
use crate::query::{Projection, Query, ReferenceJoin, SqlBuilder, SqlStatement};
use crate::storage::{Row, SequenceAllocator, StatementExecutor};

struct Prepared {
    builder: SqlBuilder,
    /// Parent type per many-to-one role
    parents: HashMap<String, Rc<TypeDescription>>,
}

pub struct Mapper {
    meta: Rc<TypeDescription>,
    executor: Rc<dyn StatementExecutor>,
    sequence: Rc<dyn SequenceAllocator>,
    prepared: OnceCell<Prepared>,
    in_transaction: Cell<bool>,
}

impl Mapper {
    pub fn new(
        meta: Rc<TypeDescription>,
        executor: Rc<dyn StatementExecutor>,
        sequence: Rc<dyn SequenceAllocator>,
    ) -> Self {
        Self {
            meta,
            executor,
            sequence,
            prepared: OnceCell::new(),
            in_transaction: Cell::new(false),
        }
    }

    pub fn meta(&self) -> &Rc<TypeDescription> {
        &self.meta
    }

    pub fn type_name(&self) -> &str {
        self.meta.qualified_name()
    }

    /// Resolve parent types and reference joins; later calls are no-ops
    ///
    /// # Errors
    ///
    /// Fails if a parent type, reference role or referenced attribute is
    /// not registered.
    pub fn prepare(&self, lookup: &dyn TypeLookup) -> Result<()> {
        if self.prepared.get().is_some() {
            return Ok(());
        }

        let mut parents = HashMap::new();
        for relation in self.meta.parent_relations() {
            parents.insert(relation.role().to_string(), lookup.lookup(relation.other_type())?);
        }

        let mut joins: Vec<ReferenceJoin> = Vec::new();
        let mut used_aliases: HashSet<String> = HashSet::from([self.meta.table().to_string()]);
        for reference in self.meta.references() {
            let attribute = reference.resolve(&self.meta, lookup)?;
            let relation = self.meta.relation(reference.other_role())?;
            let RelationKind::ManyToOne {
                fk_column,
                id_column,
            } = relation.kind()
            else {
                return Err(OrmError::InvalidConfiguration {
                    reason: format!("reference '{}' needs a many-to-one role", reference.name()),
                });
            };
            let parent = parents
                .get(relation.role())
                .cloned()
                .ok_or_else(|| OrmError::UnknownRole {
                    type_name: self.type_name().to_string(),
                    role: relation.role().to_string(),
                })?;

            let alias = match joins.iter().find(|j| j.role == relation.role()) {
                Some(existing) => existing.alias.clone(),
                None => {
                    let mut alias = parent.table().to_string();
                    let mut n = 1;
                    while used_aliases.contains(&alias) {
                        alias = format!("{}_{}", parent.table(), n);
                        n += 1;
                    }
                    used_aliases.insert(alias.clone());
                    alias
                }
            };
            joins.push(ReferenceJoin {
                name: reference.name().to_string(),
                role: relation.role().to_string(),
                alias,
                table: parent.table().to_string(),
                column: attribute.column().to_string(),
                fk_column: fk_column.clone(),
                id_column: id_column.clone(),
            });
        }

        let builder = SqlBuilder::new(self.meta.clone(), joins)?;
        let _ = self.prepared.set(Prepared { builder, parents });
        Ok(())
    }

    fn prepared(&self) -> Result<&Prepared> {
        self.prepared.get().ok_or_else(|| OrmError::Internal {
            message: format!("mapper for {} used before prepare", self.type_name()),
        })
    }

    pub fn sql(&self) -> Result<&SqlBuilder> {
        Ok(&self.prepared()?.builder)
    }

    // ===== Transactions =====

    /// Start this mapper's storage transaction unless already started
    ///
    /// # Errors
    ///
    /// Propagates the backend failure.
    pub fn begin(&self) -> Result<()> {
        if !self.in_transaction.get() {
            self.executor.begin()?;
            self.in_transaction.set(true);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates the backend failure; the transaction stays open.
    pub fn commit(&self) -> Result<()> {
        if self.in_transaction.get() {
            self.executor.commit()?;
            self.in_transaction.set(false);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates the backend failure.
    pub fn rollback(&self) -> Result<()> {
        if self.in_transaction.replace(false) {
            self.executor.rollback()?;
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    // ===== Statement execution =====

    fn attach_statement(&self, op: &str, statement: &SqlStatement, err: OrmError) -> OrmError {
        tracing::error!(
            component = module_path!(),
            op,
            type_name = %self.type_name(),
            sql = %statement.sql,
            error = %err,
            "statement failed"
        );
        match err {
            OrmError::Persistence {
                statement: None,
                message,
                ..
            } => OrmError::persistence(op, Some(&statement.sql), message),
            other => other,
        }
    }

    fn query(&self, op: &str, statement: &SqlStatement) -> Result<Vec<Row>> {
        tracing::debug!(
            component = module_path!(),
            op,
            type_name = %self.type_name(),
            sql = %statement.sql,
            "query"
        );
        self.executor
            .execute_query(statement)
            .map_err(|e| self.attach_statement(op, statement, e))
    }

    fn execute(&self, op: &str, statement: &SqlStatement) -> Result<usize> {
        tracing::debug!(
            component = module_path!(),
            op,
            type_name = %self.type_name(),
            sql = %statement.sql,
            "execute"
        );
        self.executor
            .execute_statement(statement)
            .map_err(|e| self.attach_statement(op, statement, e))
    }

    // ===== Reads =====

    /// # Errors
    ///
    /// Statement construction or execution failures.
    pub fn select(&self, query: &Query) -> Result<Vec<Row>> {
        let statement = self.sql()?.select(query)?;
        self.query("select", &statement)
    }

    /// Rows whose own-table columns equal the given values
    ///
    /// # Errors
    ///
    /// Execution failures.
    pub fn select_by_columns(
        &self,
        columns: &[(String, Value)],
        projection: &Projection,
    ) -> Result<Vec<Row>> {
        let statement = self.sql()?.select_by_columns(columns, projection);
        self.query("select_by_columns", &statement)
    }

    /// # Errors
    ///
    /// Malformed or dummy ids and execution failures.
    pub fn select_by_oid(&self, oid: &ObjectId, projection: &Projection) -> Result<Option<Row>> {
        let statement = self.sql()?.select_by_oid(oid, projection)?;
        Ok(self.query("select_by_oid", &statement)?.into_iter().next())
    }

    /// # Errors
    ///
    /// Statement construction or execution failures.
    pub fn count(&self, query: &Query) -> Result<u64> {
        let statement = self.sql()?.count(query)?;
        let rows = self.query("count", &statement)?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Identity of the entity a row belongs to
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if a key column is missing or null.
    pub fn oid_from_row(&self, row: &Row) -> Result<ObjectId> {
        let ids = self
            .meta
            .pk_columns()
            .iter()
            .map(|pk| {
                row.get(pk)
                    .and_then(Value::to_id_value)
                    .ok_or_else(|| {
                        OrmError::persistence(
                            "oid_from_row",
                            None,
                            format!("row of {} lacks key column '{}'", self.type_name(), pk),
                        )
                    })
            })
            .collect::<Result<Vec<IdValue>>>()?;
        Ok(ObjectId::new(self.type_name(), ids))
    }

    /// Clean entity mirroring `row`
    ///
    /// Attributes outside `projection` are left unset. Many-to-one roles
    /// become proxies built from the foreign-key columns.
    ///
    /// # Errors
    ///
    /// See [`Mapper::oid_from_row`].
    pub fn build_entity(&self, row: &Row, projection: &Projection) -> Result<PersistentObject> {
        let prepared = self.prepared()?;
        let mut entity = PersistentObject::loaded(self.oid_from_row(row)?, self.meta.clone());

        for attribute in self.meta.attributes() {
            if !projection.includes(attribute.name()) {
                continue;
            }
            if let Some(value) = row.get(attribute.name()) {
                entity.apply_loaded_value(attribute.name(), value.clone());
            }
        }
        for join in prepared.builder.joins() {
            if let Some(value) = row.get(&join.name) {
                entity.apply_loaded_value(&join.name, value.clone());
            }
        }
        for relation in self.meta.parent_relations() {
            let Some(fk) = relation.local_fk_column() else {
                continue;
            };
            let parent = row
                .get(fk)
                .and_then(Value::to_id_value)
                .and_then(|id| {
                    prepared
                        .parents
                        .get(relation.role())
                        .map(|meta| ObjectId::new(meta.qualified_name(), vec![id]))
                });
            entity.set_related_loaded(
                relation.role(),
                parent.map(Related::Proxy).into_iter().collect(),
            );
        }

        entity.capture_original();
        Ok(entity)
    }

    /// Parent type reached through a many-to-one role
    ///
    /// # Errors
    ///
    /// `UnknownRole` if `role` is not a many-to-one role of this type.
    pub fn parent_type(&self, role: &str) -> Result<&Rc<TypeDescription>> {
        self.prepared()?
            .parents
            .get(role)
            .ok_or_else(|| OrmError::UnknownRole {
                type_name: self.type_name().to_string(),
                role: role.to_string(),
            })
    }

    // ===== Writes =====

    /// New entity with a dummy id and attribute defaults applied
    pub fn create_entity(&self) -> PersistentObject {
        let oid = ObjectId::dummy(self.type_name(), self.meta.pk_columns().len());
        let mut entity = PersistentObject::new(oid, self.meta.clone());
        for attribute in self.meta.attributes() {
            if !attribute.default_value().is_null() {
                entity.apply_loaded_value(attribute.name(), attribute.default_value().clone());
            }
        }
        entity.capture_original();
        entity
    }

    /// Insert `entity` and assign its final id
    ///
    /// Key columns come first, dummy components replaced from the type's
    /// sequence; then the given foreign keys; then every attribute present
    /// on the entity. No column is emitted twice.
    ///
    /// # Errors
    ///
    /// Sequence or execution failures.
    pub fn insert(
        &self,
        entity: &mut PersistentObject,
        foreign_keys: &[(String, Value)],
    ) -> Result<ObjectId> {
        let mut ids = Vec::with_capacity(entity.oid().ids().len());
        for id in entity.oid().ids() {
            if id.is_dummy() {
                ids.push(IdValue::Int(self.sequence.next_id(self.meta.table())?));
            } else {
                ids.push(id.clone());
            }
        }

        let mut columns: Vec<(String, Value)> = self
            .meta
            .pk_columns()
            .iter()
            .cloned()
            .zip(ids.iter().map(Value::from))
            .collect();
        for (column, value) in foreign_keys {
            push_unique(&mut columns, column, value);
        }
        for attribute in self.meta.attributes() {
            if let Some(value) = entity.data().get(attribute.name()) {
                push_unique(&mut columns, attribute.column(), value);
            }
        }

        let statement = self.sql()?.insert(&columns);
        self.execute("insert", &statement)?;

        let oid = ObjectId::new(self.type_name(), ids);
        entity.set_oid(oid.clone());
        Ok(oid)
    }

    /// Update the changed columns of `entity`; `false` if none changed
    ///
    /// # Errors
    ///
    /// `NotFound` if no row matched the key, or execution failures.
    pub fn update(
        &self,
        entity: &PersistentObject,
        foreign_keys: &[(String, Value)],
    ) -> Result<bool> {
        let mut columns: Vec<(String, Value)> = Vec::new();
        for (column, value) in foreign_keys {
            push_unique(&mut columns, column, value);
        }
        for attribute in self.meta.attributes() {
            if entity.is_changed(attribute.name()) {
                push_unique(&mut columns, attribute.column(), &entity.value(attribute.name()));
            }
        }

        let Some(statement) = self.sql()?.update(&columns, entity.oid())? else {
            return Ok(false);
        };
        if self.execute("update", &statement)? == 0 {
            return Err(OrmError::NotFound {
                oid: entity.oid().key(),
            });
        }
        Ok(true)
    }

    /// # Errors
    ///
    /// Malformed or dummy ids and execution failures.
    pub fn delete(&self, oid: &ObjectId) -> Result<usize> {
        let statement = self.sql()?.delete(oid)?;
        self.execute("delete", &statement)
    }

    /// # Errors
    ///
    /// Execution failures.
    pub fn delete_where(&self, column: &str, value: Value) -> Result<usize> {
        let statement = self.sql()?.delete_where(column, value);
        self.execute("delete_where", &statement)
    }

    /// # Errors
    ///
    /// Execution failures.
    pub fn clear_foreign_key(&self, fk_column: &str, value: Value) -> Result<usize> {
        let statement = self.sql()?.clear_foreign_key(fk_column, value);
        self.execute("clear_foreign_key", &statement)
    }
}

fn push_unique(columns: &mut Vec<(String, Value)>, column: &str, value: &Value) {
    if !columns.iter().any(|(c, _)| c == column) {
        columns.push((column.to_string(), value.clone()));
    }
}
