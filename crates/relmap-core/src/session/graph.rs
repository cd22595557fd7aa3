//! Depth-bounded graph loading and creation
//!
//! Many-to-one roles always hold proxies; a followed parent is loaded into
//! the identity map, so resolving the proxy is a map hit. Followed to-many
//! roles hold the loaded entities. A to-many role that was not followed
//! holds proxies read with a keys-only select, until
//! [`Session::load_related`] loads it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use serde_json::json;

use crate::depth::BuildDepth;
use crate::errors::Result;
use crate::mapper::Mapper;
use crate::meta::{HierarchyType, Multiplicity, RelationDescription, RelationKind, TypeDescription};
use crate::model::{EntityRef, ObjectId, PersistentObject, Related};
use crate::query::{Criteria, Direction, OrderBy, Pagination, Projection, Query};
use crate::storage::Row;
use crate::uow::Attachment;
use crate::{log_op_end, log_op_error, log_op_start};

use super::{back_role, junction_columns, Session};

/// How far and how wide a load reaches
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub depth: BuildDepth,
    /// Per-type attribute allow-list; a missing or empty list means all
    pub attributes: HashMap<String, Vec<String>>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::new(BuildDepth::Single)
    }
}

impl LoadOptions {
    pub fn new(depth: BuildDepth) -> Self {
        Self {
            depth,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(mut self, type_name: impl Into<String>, names: &[&str]) -> Self {
        self.attributes.insert(
            type_name.into(),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    pub fn projection_for(&self, meta: &TypeDescription) -> Projection {
        self.attributes
            .get(meta.qualified_name())
            .or_else(|| self.attributes.get(meta.name()))
            .filter(|names| !names.is_empty())
            .map(|names| Projection::Only(names.clone()))
            .unwrap_or_default()
    }
}

/// One page of a union query and the size of the whole result
#[derive(Debug, Clone)]
pub struct UnionPage {
    pub items: Vec<EntityRef>,
    pub total: usize,
}

impl Session {
    /// Load the entity `oid` names and its relations down to `depth`
    ///
    /// Returns `None` if no row exists or reading it is not permitted.
    ///
    /// # Errors
    ///
    /// `UnknownType`, malformed ids, and storage failures.
    pub fn load(&mut self, oid: &ObjectId, depth: BuildDepth) -> Result<Option<EntityRef>> {
        self.load_with(oid, &LoadOptions::new(depth))
    }

    /// # Errors
    ///
    /// See [`Session::load`].
    pub fn load_with(
        &mut self,
        oid: &ObjectId,
        options: &LoadOptions,
    ) -> Result<Option<EntityRef>> {
        log_op_start!("load", oid = %oid, depth = %options.depth);
        let start = Instant::now();

        let loaded = self.load_root(oid, options).map_err(|e| {
            log_op_error!("load", e.clone(), duration_ms = start.elapsed().as_millis() as u64);
            e
        })?;

        log_op_end!(
            "load",
            duration_ms = start.elapsed().as_millis() as u64,
            found = loaded.is_some()
        );
        Ok(loaded)
    }

    fn load_root(&mut self, oid: &ObjectId, options: &LoadOptions) -> Result<Option<EntityRef>> {
        let mapper = self.mapper(oid.type_name())?;
        if !self.type_readable(mapper.meta()) {
            self.deny_read(mapper.type_name());
            return Ok(None);
        }
        let oid = self.uow.canonical_oid(oid);
        if oid.is_dummy() {
            return Ok(self.uow.lookup(&oid));
        }
        let oid = ObjectId::new(mapper.type_name(), oid.ids().to_vec());

        let projection = options.projection_for(mapper.meta());
        let Some(row) = mapper.select_by_oid(&oid, &projection)? else {
            return Ok(None);
        };
        let mut visited = HashSet::new();
        self.load_node(&mapper, &row, options.depth, 0, options, &mut visited)
    }

    /// Load every entity matching `query`
    ///
    /// Rows the caller may not read are silently omitted.
    ///
    /// # Errors
    ///
    /// `UnknownType`, `UnknownAttribute` in criteria or ordering, and
    /// storage failures.
    pub fn load_objects(&mut self, query: &Query, options: &LoadOptions) -> Result<Vec<EntityRef>> {
        log_op_start!("load_objects", type_name = %query.type_name, depth = %options.depth);
        let start = Instant::now();

        let loaded = self.load_matching(query, options).map_err(|e| {
            log_op_error!(
                "load_objects",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "load_objects",
            duration_ms = start.elapsed().as_millis() as u64,
            count = loaded.len()
        );
        Ok(loaded)
    }

    fn load_matching(&mut self, query: &Query, options: &LoadOptions) -> Result<Vec<EntityRef>> {
        let mapper = self.mapper(&query.type_name)?;
        if !self.type_readable(mapper.meta()) {
            self.deny_read(mapper.type_name());
            return Ok(Vec::new());
        }
        let mut query = query.clone();
        if query.projection == Projection::All {
            query.projection = options.projection_for(mapper.meta());
        }

        let rows = mapper.select(&query)?;
        let mut visited = HashSet::new();
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(entity) =
                self.load_node(&mapper, &row, options.depth, 0, options, &mut visited)?
            {
                loaded.push(entity);
            }
        }
        Ok(loaded)
    }

    /// Number of rows matching `query`; zero if the type is not readable
    ///
    /// # Errors
    ///
    /// See [`Session::load_objects`].
    pub fn count(&self, query: &Query) -> Result<u64> {
        let mapper = self.mapper(&query.type_name)?;
        if !self.type_readable(mapper.meta()) {
            self.deny_read(mapper.type_name());
            return Ok(0);
        }
        mapper.count(query)
    }

    /// Heterogeneous query across types
    ///
    /// Criteria are grouped by their type and run against each type's
    /// mapper with the type-level read check lifted; per-instance checks
    /// still apply. The merged result is ordered by `order_by` and then
    /// paginated.
    ///
    /// # Errors
    ///
    /// `UnknownType` for criteria naming an unregistered type, plus the
    /// errors of [`Session::load_objects`].
    pub fn load_union(
        &mut self,
        criteria: &[Criteria],
        order_by: &[OrderBy],
        pagination: Option<Pagination>,
        options: &LoadOptions,
    ) -> Result<UnionPage> {
        log_op_start!("load_union", criteria = criteria.len());
        let start = Instant::now();

        let page = self
            .union_page(criteria, order_by, pagination, options)
            .map_err(|e| {
                log_op_error!(
                    "load_union",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64
                );
                e
            })?;

        log_op_end!(
            "load_union",
            duration_ms = start.elapsed().as_millis() as u64,
            total = page.total
        );
        Ok(page)
    }

    fn union_page(
        &mut self,
        criteria: &[Criteria],
        order_by: &[OrderBy],
        pagination: Option<Pagination>,
        options: &LoadOptions,
    ) -> Result<UnionPage> {
        let mut by_type: BTreeMap<String, Query> = BTreeMap::new();
        for criterion in criteria {
            let meta = self.type_description(&criterion.type_name)?;
            by_type
                .entry(meta.qualified_name().to_string())
                .or_insert_with(|| Query::new(meta.qualified_name()))
                .criteria
                .push(criterion.clone());
        }

        let elevated = std::mem::replace(&mut self.elevated_reads, true);
        let mut items = Vec::new();
        let mut outcome = Ok(());
        for query in by_type.values() {
            match self.load_matching(query, options) {
                Ok(loaded) => items.extend(loaded),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.elevated_reads = elevated;
        outcome?;

        items.sort_by(|a, b| {
            let (a, b) = (a.borrow(), b.borrow());
            order_by
                .iter()
                .map(|order| {
                    let ordering = a.value(&order.attribute).compare(&b.value(&order.attribute));
                    match order.direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let total = items.len();
        let items = match pagination {
            Some(page) => page.apply(items),
            None => items,
        };
        Ok(UnionPage { items, total })
    }

    /// Full entity for a related entry, checking the identity map first
    ///
    /// A proxy for an entity that was never saved resolves to `None` once
    /// it is no longer tracked.
    ///
    /// # Errors
    ///
    /// See [`Session::load`].
    pub fn resolve(&mut self, related: &Related) -> Result<Option<EntityRef>> {
        match related {
            Related::Object(entity) => Ok(Some(entity.clone())),
            Related::Proxy(oid) => {
                if let Some(entity) = self.uow.lookup(oid) {
                    return Ok(Some(entity));
                }
                if self.uow.canonical_oid(oid).is_dummy() {
                    return Ok(None);
                }
                self.load(oid, BuildDepth::Single)
            }
        }
    }

    /// Entities on `role`, loading the role first if it was not followed
    ///
    /// # Errors
    ///
    /// `UnknownRole` and the errors of [`Session::load`].
    pub fn load_related(&mut self, entity: &EntityRef, role: &str) -> Result<Vec<EntityRef>> {
        let meta = entity.borrow().meta().clone();
        let relation = meta.relation(role)?;

        let unloaded = relation.is_to_many() && {
            let e = entity.borrow();
            !e.has_related(role)
                || (!e.is_changed(role) && e.related(role).iter().any(Related::is_proxy))
        };
        if unloaded {
            let options = LoadOptions::default();
            let mut visited = HashSet::from([entity.borrow().oid().key()]);
            self.load_role(entity, relation, BuildDepth::Single, 0, &options, &mut visited)?;
        }

        let entries: Vec<Related> = entity.borrow().related(role).to_vec();
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in &entries {
            if let Some(found) = self.resolve(entry)? {
                resolved.push(found);
            }
        }
        Ok(resolved)
    }

    fn load_node(
        &mut self,
        mapper: &Rc<Mapper>,
        row: &Row,
        depth: BuildDepth,
        generation: u32,
        options: &LoadOptions,
        visited: &mut HashSet<String>,
    ) -> Result<Option<EntityRef>> {
        let built = mapper.build_entity(row, &options.projection_for(mapper.meta()))?;
        let oid = built.oid().clone();
        if !self.instance_readable(&oid) {
            self.deny_read(&oid.key());
            self.uow.detach(&oid);
            return Ok(None);
        }

        let Attachment { entity, fresh } = self.uow.attach(built);
        if fresh {
            mapper.meta().hooks().after_load(&mut entity.borrow_mut())?;
        }
        visited.insert(oid.key());

        let within_bound = generation < self.config.max_generations;
        let meta = mapper.meta().clone();
        for relation in meta.relations() {
            if entity.borrow().is_changed(relation.role()) {
                continue;
            }
            if within_bound && depth.follows(relation) {
                self.load_role(&entity, relation, depth.next(relation), generation + 1, options, visited)?;
            } else if relation.is_to_many()
                && relation.other().navigable
                && (fresh || !entity.borrow().has_related(relation.role()))
            {
                self.load_keys(&entity, relation)?;
            }
        }
        Ok(Some(entity))
    }

    fn load_role(
        &mut self,
        entity: &EntityRef,
        relation: &RelationDescription,
        depth: BuildDepth,
        generation: u32,
        options: &LoadOptions,
        visited: &mut HashSet<String>,
    ) -> Result<()> {
        if let RelationKind::ManyToOne { .. } = relation.kind() {
            let parents: Vec<ObjectId> = entity
                .borrow()
                .related(relation.role())
                .iter()
                .map(Related::oid)
                .collect();
            for parent in parents {
                if parent.is_dummy() || visited.contains(&parent.key()) {
                    continue;
                }
                let mapper = self.mapper(parent.type_name())?;
                let projection = options.projection_for(mapper.meta());
                if let Some(row) = mapper.select_by_oid(&parent, &projection)? {
                    self.load_node(&mapper, &row, depth, generation, options, visited)?;
                }
            }
            return Ok(());
        }

        let mapper = self.mapper(relation.other_type())?;
        let projection = options.projection_for(mapper.meta());
        let rows = self.relation_rows(&entity.borrow(), relation, &mapper, &projection)?;
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            let oid = mapper.oid_from_row(&row)?;
            if visited.contains(&oid.key()) {
                loaded.push(Related::Proxy(oid));
                continue;
            }
            if let Some(child) = self.load_node(&mapper, &row, depth, generation, options, visited)? {
                loaded.push(Related::Object(child));
            }
        }
        entity
            .borrow_mut()
            .set_related_loaded(relation.role(), loaded);
        Ok(())
    }

    /// Proxies for every entity on a to-many role that is not followed
    fn load_keys(&mut self, entity: &EntityRef, relation: &RelationDescription) -> Result<()> {
        let mapper = self.mapper(relation.other_type())?;
        if !self.type_readable(mapper.meta()) {
            return Ok(());
        }
        let rows = self.relation_rows(&entity.borrow(), relation, &mapper, &Projection::KeysOnly)?;
        let proxies = rows
            .iter()
            .map(|row| mapper.oid_from_row(row).map(Related::Proxy))
            .collect::<Result<Vec<_>>>()?;
        entity
            .borrow_mut()
            .set_related_loaded(relation.role(), proxies);
        Ok(())
    }

    /// Rows of `other` reached from `entity` through a to-many relation
    fn relation_rows(
        &self,
        entity: &PersistentObject,
        relation: &RelationDescription,
        other: &Mapper,
        projection: &Projection,
    ) -> Result<Vec<Row>> {
        let rows = match relation.kind() {
            RelationKind::OneToMany {
                id_column,
                fk_column,
            } => {
                let id = entity.value(id_column);
                if id.is_null() {
                    Vec::new()
                } else {
                    other.select_by_columns(&[(fk_column.clone(), id)], projection)?
                }
            }
            RelationKind::ManyToOne { .. } => Vec::new(),
            RelationKind::ManyToMany(m2m) => {
                let columns = junction_columns(m2m)?;
                let owner = entity.value(columns.this_id);
                if owner.is_null() {
                    Vec::new()
                } else {
                    let junction = self.mapper(&m2m.junction_type)?;
                    let peers: Vec<_> = junction
                        .select_by_columns(
                            &[(columns.this_fk.to_string(), owner)],
                            &Projection::KeysOnly,
                        )?
                        .into_iter()
                        .filter_map(|row| row.get(columns.other_fk).cloned())
                        .filter(|v| !v.is_null())
                        .collect();
                    if peers.is_empty() {
                        Vec::new()
                    } else {
                        let query = Query::new(other.type_name())
                            .with_criteria(Criteria::is_in(
                                other.type_name(),
                                columns.other_id,
                                peers,
                            ))
                            .with_projection(projection.clone());
                        other.select(&query)?
                    }
                }
            }
        };
        Ok(rows)
    }

    /// Create a new entity of `type_name` with its required children
    ///
    /// The entity is tracked as new; children are created for child
    /// relations the depth follows, as many as the relation's minimum
    /// multiplicity, each carrying `min_occurs`/`max_occurs` properties.
    ///
    /// # Errors
    ///
    /// `UnknownType`, hook failures, and `InvalidConfiguration` if a child
    /// type lacks the many-to-one role back to its parent.
    pub fn create(&mut self, type_name: &str, depth: BuildDepth) -> Result<EntityRef> {
        log_op_start!("create", type_name = %type_name, depth = %depth);
        let start = Instant::now();

        let created = self
            .mapper(type_name)
            .and_then(|mapper| self.create_node(&mapper, depth, 0))
            .map_err(|e| {
                log_op_error!("create", e.clone(), duration_ms = start.elapsed().as_millis() as u64);
                e
            })?;

        log_op_end!(
            "create",
            duration_ms = start.elapsed().as_millis() as u64,
            oid = %created.borrow().oid()
        );
        Ok(created)
    }

    fn create_node(
        &mut self,
        mapper: &Rc<Mapper>,
        depth: BuildDepth,
        generation: u32,
    ) -> Result<EntityRef> {
        let mut built = mapper.create_entity();
        mapper.meta().hooks().after_create(&mut built)?;
        let entity = self.uow.attach(built).entity;
        if generation >= self.config.max_generations {
            return Ok(entity);
        }

        let meta = mapper.meta().clone();
        for relation in meta.relations() {
            let RelationKind::OneToMany { fk_column, .. } = relation.kind() else {
                continue;
            };
            if relation.hierarchy() != HierarchyType::Child || !depth.follows(relation) {
                continue;
            }
            let child_mapper = self.mapper(relation.other_type())?;
            let back = back_role(child_mapper.meta(), &meta, fk_column)?;
            let parent = entity.borrow().oid().clone();
            let max_occurs = match relation.other().max {
                Multiplicity::Bounded(n) => json!(n),
                Multiplicity::Unbound => json!("unbound"),
            };

            let mut children = Vec::new();
            for _ in 0..relation.other().min {
                let child = self.create_node(&child_mapper, depth.next(relation), generation + 1)?;
                {
                    let mut child = child.borrow_mut();
                    child.set_related(&back, Related::Proxy(parent.clone()))?;
                    child.set_property("min_occurs", json!(relation.other().min));
                    child.set_property("max_occurs", max_occurs.clone());
                }
                children.push(Related::Object(child));
            }
            entity
                .borrow_mut()
                .set_related_loaded(relation.role(), children);
        }
        Ok(entity)
    }
}
