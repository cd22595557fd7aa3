//! Saving single entities inside a commit
//!
//! Inserts defer while a parent they reference is still unsaved. Deletes
//! cascade: composite children are deleted through the same entry point,
//! other children only lose their foreign key, and junction rows of
//! many-to-many roles are removed.

use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

use crate::errors::{OrmError, Result};
use crate::mapper::Mapper;
use crate::meta::{RelationDescription, RelationKind};
use crate::model::{EntityRef, EntityState, ObjectId, PersistentObject, Related, Value};
use crate::policy::Action;
use crate::query::Projection;
use crate::validation::{validate_entity, validate_fetched};

use super::{back_role, junction_columns, CommitReport, Session};

/// Bookkeeping for one commit
#[derive(Default)]
pub(crate) struct CommitState {
    /// Mappers whose transaction this commit started, in start order
    pub(crate) begun: Vec<Rc<Mapper>>,
    pub(crate) report: CommitReport,
    /// Owner key and role of many-to-many roles waiting for unsaved peers
    pub(crate) pending_links: BTreeSet<(String, String)>,
    deleted: HashSet<String>,
    created_links: HashSet<String>,
}

impl CommitState {
    pub(crate) fn begin(&mut self, mapper: &Rc<Mapper>) -> Result<()> {
        if !self.begun.iter().any(|m| Rc::ptr_eq(m, mapper)) {
            mapper.begin()?;
            self.begun.push(mapper.clone());
        }
        Ok(())
    }
}

impl Session {
    /// Foreign-key columns of `entity` from its many-to-one roles
    ///
    /// `None` while a referenced parent is tracked but still unsaved. A
    /// parent that was dropped before it was ever saved is written as NULL.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` if that dropped parent is a required one.
    fn foreign_keys(
        &self,
        entity: &PersistentObject,
        only_changed: bool,
    ) -> Result<Option<Vec<(String, Value)>>> {
        let mut columns = Vec::new();
        for relation in entity.meta().parent_relations() {
            let RelationKind::ManyToOne {
                fk_column,
                id_column,
            } = relation.kind()
            else {
                continue;
            };
            if only_changed && !entity.is_changed(relation.role()) {
                continue;
            }
            let value = match entity.related(relation.role()).first() {
                None => Value::Null,
                Some(parent) => {
                    let parent = self.uow.canonical_oid(&parent.oid());
                    if !parent.is_dummy() {
                        self.key_value(&parent, id_column)
                    } else if self.uow.contains(&parent) {
                        return Ok(None);
                    } else if relation.other().min > 0 {
                        return Err(OrmError::illegal_argument(format!(
                            "{} requires '{}', but {} was dropped before it was saved",
                            entity.oid(),
                            relation.role(),
                            parent
                        )));
                    } else {
                        Value::Null
                    }
                }
            };
            columns.push((fk_column.clone(), value));
        }
        Ok(Some(columns))
    }

    /// Insert a new entity; `false` if it has to wait for a parent
    pub(crate) fn insert_entity(&mut self, state: &mut CommitState, key: &str) -> Result<bool> {
        let Some(entity) = self.uow.entity(key) else {
            return Ok(true);
        };
        if entity.borrow().state() != EntityState::New {
            return Ok(true);
        }
        let Some(foreign_keys) = self.foreign_keys(&entity.borrow(), false)? else {
            return Ok(false);
        };

        let old = entity.borrow().oid().clone();
        let mapper = self.mapper(old.type_name())?;
        let hooks = mapper.meta().hooks().clone();
        self.authorize_write(&old, Action::Create)?;
        hooks.before_insert(&mut entity.borrow_mut())?;
        validate_entity(&entity.borrow(), self.validator.as_ref())?;
        state.begin(&mapper)?;

        let new = mapper.insert(&mut entity.borrow_mut(), &foreign_keys)?;
        self.uow.rekey(&old, &new);
        if old != new {
            state.report.remapped.push((old, new.clone()));
        }

        let links: Vec<RelationDescription> = mapper
            .meta()
            .relations()
            .iter()
            .filter(|r| r.is_many_to_many() && entity.borrow().has_related(r.role()))
            .cloned()
            .collect();
        for relation in &links {
            self.sync_links(state, &entity, relation)?;
        }

        {
            let mut saved = entity.borrow_mut();
            saved.set_state(EntityState::Clean);
            saved.capture_original();
            hooks.after_insert(&mut saved)?;
        }
        self.audit
            .record(Action::Create, &entity.borrow().snapshot(), &self.context);
        state.report.inserted.push(new);
        Ok(true)
    }

    /// Write the changed columns of a dirty entity; `false` if it has to
    /// wait for a newly referenced parent
    pub(crate) fn update_entity(&mut self, state: &mut CommitState, key: &str) -> Result<bool> {
        let Some(entity) = self.uow.entity(key) else {
            return Ok(true);
        };
        if entity.borrow().state() != EntityState::Dirty {
            return Ok(true);
        }
        let Some(foreign_keys) = self.foreign_keys(&entity.borrow(), true)? else {
            return Ok(false);
        };

        let oid = entity.borrow().oid().clone();
        let mapper = self.mapper(oid.type_name())?;
        let hooks = mapper.meta().hooks().clone();
        self.authorize_write(&oid, Action::Update)?;
        hooks.before_update(&mut entity.borrow_mut())?;
        validate_fetched(&entity.borrow(), self.validator.as_ref())?;
        state.begin(&mapper)?;

        mapper.update(&entity.borrow(), &foreign_keys)?;

        let links: Vec<RelationDescription> = mapper
            .meta()
            .relations()
            .iter()
            .filter(|r| r.is_many_to_many() && entity.borrow().is_changed(r.role()))
            .cloned()
            .collect();
        for relation in &links {
            self.sync_links(state, &entity, relation)?;
        }

        {
            let mut saved = entity.borrow_mut();
            saved.set_state(EntityState::Clean);
            saved.capture_original();
            hooks.after_update(&mut saved)?;
        }
        self.audit
            .record(Action::Update, &entity.borrow().snapshot(), &self.context);
        state.report.updated.push(oid);
        Ok(true)
    }

    pub(crate) fn delete_queued(&mut self, state: &mut CommitState, key: &str) -> Result<()> {
        if let Some(entity) = self.uow.entity(key) {
            self.delete_entity(state, &entity)?;
        }
        Ok(())
    }

    /// Delete one entity and cascade to its children and junction rows
    fn delete_entity(&mut self, state: &mut CommitState, entity: &EntityRef) -> Result<()> {
        let oid = entity.borrow().oid().clone();
        let key = oid.key();
        if state.deleted.contains(&key) {
            return Ok(());
        }
        if oid.is_dummy() {
            self.uow.forget(&key);
            return Ok(());
        }

        let mapper = self.mapper(oid.type_name())?;
        let hooks = mapper.meta().hooks().clone();
        self.authorize_write(&oid, Action::Delete)?;
        hooks.before_delete(&mut entity.borrow_mut())?;
        state.begin(&mapper)?;
        state.deleted.insert(key.clone());

        self.cascade_delete(state, entity, &mapper)?;
        mapper.delete(&oid)?;

        hooks.after_delete(&mut entity.borrow_mut())?;
        self.audit
            .record(Action::Delete, &entity.borrow().snapshot(), &self.context);
        state.report.deleted.push(oid);
        self.uow.forget(&key);
        Ok(())
    }

    fn cascade_delete(
        &mut self,
        state: &mut CommitState,
        entity: &EntityRef,
        mapper: &Rc<Mapper>,
    ) -> Result<()> {
        let oid = entity.borrow().oid().clone();
        for relation in mapper.meta().relations() {
            match relation.kind() {
                RelationKind::ManyToOne { .. } => {}
                RelationKind::OneToMany {
                    id_column,
                    fk_column,
                } => {
                    let id = entity.borrow().value(id_column);
                    let children = self.mapper(relation.other_type())?;
                    state.begin(&children)?;
                    if relation.is_composite() {
                        let rows = children.select_by_columns(
                            &[(fk_column.clone(), id)],
                            &Projection::All,
                        )?;
                        for row in rows {
                            let child_oid = children.oid_from_row(&row)?;
                            let child = match self.uow.lookup(&child_oid) {
                                Some(tracked) => tracked,
                                None => {
                                    let built = children.build_entity(&row, &Projection::All)?;
                                    self.uow.attach(built).entity
                                }
                            };
                            child.borrow_mut().delete();
                            self.uow.drain_events();
                            self.delete_entity(state, &child)?;
                        }
                    } else {
                        children.clear_foreign_key(fk_column, id)?;
                        if let Ok(back) = back_role(children.meta(), mapper.meta(), fk_column) {
                            self.release_children(&oid, children.type_name(), &back);
                        }
                    }
                }
                RelationKind::ManyToMany(m2m) => {
                    let columns = junction_columns(m2m)?;
                    let junction = self.mapper(&m2m.junction_type)?;
                    state.begin(&junction)?;
                    junction.delete_where(columns.this_fk, entity.borrow().value(columns.this_id))?;
                }
            }
        }
        Ok(())
    }

    /// Drop in-memory references from tracked children to a deleted parent
    fn release_children(&self, parent: &ObjectId, child_type: &str, role: &str) {
        let children: Vec<EntityRef> = self
            .uow
            .loaded()
            .filter(|e| e.try_borrow().map(|e| e.type_name() == child_type).unwrap_or(false))
            .cloned()
            .collect();
        for child in children {
            if let Ok(mut child) = child.try_borrow_mut() {
                let points_here = child
                    .related(role)
                    .iter()
                    .any(|r| &self.uow.canonical_oid(&r.oid()) == parent);
                if points_here {
                    child.set_related_loaded(role, Vec::new());
                }
            }
        }
    }

    /// Bring the junction rows of one many-to-many role in line with it
    ///
    /// Junction entities are created for peers without a row and queued as
    /// new; rows of peers dropped from the role are deleted. A peer that
    /// is still unsaved leaves the role pending for a later pass.
    pub(crate) fn sync_links(
        &mut self,
        state: &mut CommitState,
        entity: &EntityRef,
        relation: &RelationDescription,
    ) -> Result<()> {
        let Some(m2m) = relation.as_many_to_many() else {
            return Ok(());
        };
        let columns = junction_columns(m2m)?;
        let junction = self.mapper(&m2m.junction_type)?;
        let role = relation.role().to_string();

        let (owner, owner_meta, owner_id, peers, removed) = {
            let e = entity.borrow();
            (
                e.oid().clone(),
                e.meta().clone(),
                e.value(columns.this_id),
                e.related(&role).iter().map(Related::oid).collect::<Vec<_>>(),
                e.removed_related(&role).to_vec(),
            )
        };
        let pending_key = (owner.key(), role.clone());
        if owner_id.is_null() {
            state.pending_links.insert(pending_key);
            return Ok(());
        }

        state.begin(&junction)?;
        let existing = junction
            .select_by_columns(
                &[(columns.this_fk.to_string(), owner_id.clone())],
                &Projection::KeysOnly,
            )?
            .into_iter()
            .map(|row| {
                let peer = row.get(columns.other_fk).cloned().unwrap_or_default();
                junction.oid_from_row(&row).map(|oid| (oid, peer))
            })
            .collect::<Result<Vec<(ObjectId, Value)>>>()?;

        let current: Vec<ObjectId> = peers.iter().map(|p| self.uow.canonical_oid(p)).collect();
        for peer in removed {
            let peer = self.uow.canonical_oid(&peer);
            if peer.is_dummy() || current.contains(&peer) {
                continue;
            }
            let peer_id = self.key_value(&peer, columns.other_id);
            for (row_oid, _) in existing.iter().filter(|(_, v)| v == &peer_id) {
                junction.delete(row_oid)?;
                self.uow.forget(&row_oid.key());
            }
        }

        let mut waiting = false;
        for peer in current {
            if peer.is_dummy() {
                waiting |= self.uow.contains(&peer);
                continue;
            }
            let peer_id = self.key_value(&peer, columns.other_id);
            if existing.iter().any(|(_, v)| v == &peer_id) {
                continue;
            }
            let link = link_key(
                &m2m.junction_type,
                (columns.this_fk, &owner_id),
                (columns.other_fk, &peer_id),
            );
            if !state.created_links.insert(link) {
                continue;
            }

            let peer_meta = self.type_description(peer.type_name())?;
            let owner_role = back_role(junction.meta(), &owner_meta, columns.this_fk)?;
            let peer_role = back_role(junction.meta(), &peer_meta, columns.other_fk)?;
            let mut link = junction.create_entity();
            link.set_related_loaded(&owner_role, vec![Related::Proxy(owner.clone())]);
            link.set_related_loaded(&peer_role, vec![Related::Proxy(peer)]);
            self.uow.attach(link);
        }

        if waiting {
            state.pending_links.insert(pending_key);
        } else {
            state.pending_links.remove(&pending_key);
        }
        Ok(())
    }

    /// Retry a pending many-to-many role; `true` once it is settled
    pub(crate) fn retry_links(
        &mut self,
        state: &mut CommitState,
        owner_key: &str,
        role: &str,
    ) -> Result<bool> {
        let pending_key = (owner_key.to_string(), role.to_string());
        let Some(entity) = self.uow.entity(owner_key) else {
            state.pending_links.remove(&pending_key);
            return Ok(true);
        };
        let meta = entity.borrow().meta().clone();
        let relation = meta.relation(role)?;
        self.sync_links(state, &entity, relation)?;
        Ok(!state.pending_links.contains(&pending_key))
    }
}

/// Identity of one junction row, independent of which side created it
fn link_key(junction: &str, a: (&str, &Value), b: (&str, &Value)) -> String {
    let (first, second) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    format!(
        "{}|{}={}|{}={}",
        junction, first.0, first.1, second.0, second.1
    )
}
