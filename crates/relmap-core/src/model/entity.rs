use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

use super::{ObjectId, Value};
use crate::audit::EntitySnapshot;
use crate::errors::{OrmError, Result};
use crate::events::StateChangeEvent;
use crate::meta::{RelationKind, TypeDescription};

/// Shared handle to a tracked entity
pub type EntityRef = Rc<RefCell<PersistentObject>>;

/// Lifecycle state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityState {
    New,
    Dirty,
    Clean,
    Deleted,
}

impl EntityState {
    /// State after an attribute write
    pub fn on_write(self) -> Self {
        match self {
            EntityState::Clean => EntityState::Dirty,
            other => other,
        }
    }

    /// Whether a transition to `next` is permitted
    ///
    /// `Deleted` is absorbing and `New` never regresses to `Dirty`.
    pub fn accepts(self, next: EntityState) -> bool {
        match (self, next) {
            (EntityState::Deleted, next) => next == EntityState::Deleted,
            (EntityState::New, EntityState::Dirty) => false,
            _ => true,
        }
    }
}

/// A related entity: either resolved, or only its identity
#[derive(Clone)]
pub enum Related {
    Object(EntityRef),
    Proxy(ObjectId),
}

impl Related {
    /// Identity of the related entity
    pub fn oid(&self) -> ObjectId {
        match self {
            Related::Object(entity) => entity.borrow().oid().clone(),
            Related::Proxy(oid) => oid.clone(),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Related::Proxy(_))
    }

    pub fn as_object(&self) -> Option<&EntityRef> {
        match self {
            Related::Object(entity) => Some(entity),
            Related::Proxy(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Related::Object(entity) => entity
                .try_borrow()
                .map(|e| e.oid().key())
                .unwrap_or_else(|_| "<borrowed>".to_string()),
            Related::Proxy(oid) => oid.key(),
        }
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Related::Object(_) => write!(f, "Object({})", self.describe()),
            Related::Proxy(_) => write!(f, "Proxy({})", self.describe()),
        }
    }
}

/// Mutable value container for one row of one type
///
/// Primary-key values live only in the object id. Foreign keys are not
/// attributes: they are derived from the many-to-one entries in
/// `related`.
pub struct PersistentObject {
    oid: ObjectId,
    meta: Rc<TypeDescription>,
    data: BTreeMap<String, Value>,
    related: BTreeMap<String, Vec<Related>>,
    properties: BTreeMap<String, serde_json::Value>,
    state: EntityState,
    changed: BTreeSet<String>,
    /// Ids dropped from each role since the last save
    removed: BTreeMap<String, Vec<ObjectId>>,
    original_data: BTreeMap<String, Value>,
    observer: Option<Sender<StateChangeEvent>>,
}

impl fmt::Debug for PersistentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentObject")
            .field("oid", &self.oid.key())
            .field("state", &self.state)
            .field("data", &self.data)
            .field("related", &self.related)
            .field("changed", &self.changed)
            .finish()
    }
}

impl PersistentObject {
    /// A never-persisted entity in state `New`
    pub fn new(oid: ObjectId, meta: Rc<TypeDescription>) -> Self {
        Self::with_state(oid, meta, EntityState::New)
    }

    /// An entity mirroring a stored row, in state `Clean`
    pub fn loaded(oid: ObjectId, meta: Rc<TypeDescription>) -> Self {
        Self::with_state(oid, meta, EntityState::Clean)
    }

    fn with_state(oid: ObjectId, meta: Rc<TypeDescription>, state: EntityState) -> Self {
        Self {
            oid,
            meta,
            data: BTreeMap::new(),
            related: BTreeMap::new(),
            properties: BTreeMap::new(),
            state,
            changed: BTreeSet::new(),
            removed: BTreeMap::new(),
            original_data: BTreeMap::new(),
            observer: None,
        }
    }

    pub fn oid(&self) -> &ObjectId {
        &self.oid
    }

    pub fn type_name(&self) -> &str {
        self.oid.type_name()
    }

    pub fn meta(&self) -> &Rc<TypeDescription> {
        &self.meta
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Value of an attribute, key column or reference; `Null` if unset
    pub fn value(&self, name: &str) -> Value {
        if let Some(value) = self.data.get(name) {
            return value.clone();
        }
        self.meta
            .pk_columns()
            .iter()
            .position(|pk| pk == name)
            .and_then(|i| self.oid.ids().get(i))
            .map(Value::from)
            .unwrap_or_default()
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Write an attribute
    ///
    /// Unless `force_set`, the value is validated first and an equal value
    /// is not written. With `track_change` the attribute is recorded as
    /// changed and the state machine advances. Returns whether the stored
    /// value was written.
    ///
    /// # Errors
    ///
    /// `UnknownAttribute` for undeclared names (references are read-only),
    /// `IllegalArgument` for key columns, `Validation` if the check fails.
    pub fn set_value(
        &mut self,
        name: &str,
        value: Value,
        force_set: bool,
        track_change: bool,
    ) -> Result<bool> {
        if self.meta.is_pk_column(name) {
            return Err(OrmError::illegal_argument(format!(
                "key column '{}' of {} is assigned through the object id",
                name, self.oid
            )));
        }
        let attribute = self.meta.attribute(name)?;
        if !force_set {
            attribute
                .check(&value)
                .map_err(|violation| OrmError::Validation {
                    violations: vec![violation],
                })?;
            if self.data.get(name).unwrap_or(&Value::Null) == &value {
                return Ok(false);
            }
        }

        self.data.insert(name.to_string(), value);
        if track_change {
            self.changed.insert(name.to_string());
            self.set_state(self.state.on_write());
        }
        Ok(true)
    }

    /// Validated, tracked write
    ///
    /// # Errors
    ///
    /// See [`PersistentObject::set_value`].
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.set_value(name, value.into(), false, true)
    }

    /// Fast path for loaded or default data: no validation, no tracking
    pub fn apply_loaded_value(&mut self, name: &str, value: Value) {
        self.data.insert(name.to_string(), value);
    }

    pub fn related(&self, role: &str) -> &[Related] {
        self.related.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Roles with at least a (possibly empty) loaded list
    pub fn related_roles(&self) -> impl Iterator<Item = &str> {
        self.related.keys().map(String::as_str)
    }

    pub fn has_related(&self, role: &str) -> bool {
        self.related.contains_key(role)
    }

    /// Replace the entity on a to-one role
    ///
    /// # Errors
    ///
    /// `UnknownRole` if the type declares no such role, `IllegalArgument` for a
    /// one-to-many role.
    pub fn set_related(&mut self, role: &str, related: Related) -> Result<()> {
        self.check_owning_role(role)?;
        let previous = self.related.insert(role.to_string(), vec![related.clone()]);
        let kept = related.oid();
        self.record_removed(
            role,
            previous.unwrap_or_default().iter().map(Related::oid).filter(|o| o != &kept),
        );
        self.track_relation_change(role);
        Ok(())
    }

    /// Append to a role, ignoring an entity already present
    ///
    /// # Errors
    ///
    /// `UnknownRole` if the type declares no such role, `IllegalArgument` for a
    /// one-to-many role.
    pub fn add_related(&mut self, role: &str, related: Related) -> Result<()> {
        self.check_owning_role(role)?;
        let oid = related.oid();
        let list = self.related.entry(role.to_string()).or_default();
        if list.iter().any(|r| r.oid() == oid) {
            return Ok(());
        }
        list.push(related);
        self.track_relation_change(role);
        Ok(())
    }

    /// Drop `oid` from a role; returns whether it was present
    ///
    /// # Errors
    ///
    /// `UnknownRole` if the type declares no such role, `IllegalArgument` for a
    /// one-to-many role.
    pub fn remove_related(&mut self, role: &str, oid: &ObjectId) -> Result<bool> {
        self.check_owning_role(role)?;
        let Some(list) = self.related.get_mut(role) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|r| &r.oid() != oid);
        let removed = list.len() != before;
        if removed {
            self.record_removed(role, std::iter::once(oid.clone()));
            self.track_relation_change(role);
        }
        Ok(removed)
    }

    /// Empty a role, tracked
    ///
    /// # Errors
    ///
    /// `UnknownRole` if the type declares no such role, `IllegalArgument` for a
    /// one-to-many role.
    pub fn clear_related(&mut self, role: &str) -> Result<()> {
        self.check_owning_role(role)?;
        let previous = self.related.insert(role.to_string(), Vec::new());
        self.record_removed(role, previous.unwrap_or_default().iter().map(Related::oid));
        self.track_relation_change(role);
        Ok(())
    }

    /// Roles whose changes a commit writes: to-one and many-to-many
    ///
    /// The foreign key of a one-to-many role lives on the children, so the
    /// role can only be changed from their side.
    fn check_owning_role(&self, role: &str) -> Result<()> {
        if let RelationKind::OneToMany { .. } = self.meta.relation(role)?.kind() {
            return Err(OrmError::illegal_argument(format!(
                "role '{}' of {} is written through its children; use Session::associate",
                role,
                self.meta.qualified_name()
            )));
        }
        Ok(())
    }

    /// Append without tracking, replacing an entry with the same id
    pub(crate) fn push_related_loaded(&mut self, role: &str, related: Related) {
        let oid = related.oid();
        let list = self.related.entry(role.to_string()).or_default();
        list.retain(|r| r.oid() != oid);
        list.push(related);
    }

    /// Install a freshly loaded list without tracking
    ///
    /// A proxy never replaces an already resolved entity of the same id.
    pub fn set_related_loaded(&mut self, role: &str, loaded: Vec<Related>) {
        let previous = self.related.remove(role).unwrap_or_default();
        let merged = loaded
            .into_iter()
            .map(|entry| {
                if let Related::Proxy(oid) = &entry {
                    if let Some(resolved) =
                        previous.iter().find(|p| !p.is_proxy() && &p.oid() == oid)
                    {
                        return resolved.clone();
                    }
                }
                entry
            })
            .collect();
        self.related.insert(role.to_string(), merged);
    }

    /// Point proxies at their final ids after a commit
    pub(crate) fn remap_proxies(&mut self, remap: impl Fn(&ObjectId) -> ObjectId) {
        for list in self.related.values_mut() {
            for entry in list.iter_mut() {
                if let Related::Proxy(oid) = entry {
                    *oid = remap(oid);
                }
            }
        }
    }

    /// Drop entries for `oid` on `role` without tracking
    pub(crate) fn forget_related(&mut self, role: &str, oid: &ObjectId) {
        if let Some(list) = self.related.get_mut(role) {
            list.retain(|r| &r.oid() != oid);
        }
    }

    fn record_removed(&mut self, role: &str, oids: impl Iterator<Item = ObjectId>) {
        let removed = self.removed.entry(role.to_string()).or_default();
        for oid in oids {
            if !removed.contains(&oid) {
                removed.push(oid);
            }
        }
    }

    /// Ids dropped from `role` since the last save
    pub(crate) fn removed_related(&self, role: &str) -> &[ObjectId] {
        self.removed.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    fn track_relation_change(&mut self, role: &str) {
        self.changed.insert(role.to_string());
        self.set_state(self.state.on_write());
    }

    /// Mark for deletion
    pub fn delete(&mut self) {
        self.set_state(EntityState::Deleted);
    }

    /// Move to `state` if the transition is permitted, notifying the observer
    pub fn set_state(&mut self, state: EntityState) {
        if self.state == state || !self.state.accepts(state) {
            return;
        }
        let old_state = self.state;
        self.state = state;
        if let Some(observer) = &self.observer {
            // A dropped receiver means the unit of work is gone.
            let _ = observer.send(StateChangeEvent {
                oid: self.oid.clone(),
                old_state,
                new_state: state,
            });
        }
    }

    /// Attribute and role names written since the last save
    pub fn changed_attributes(&self) -> &BTreeSet<String> {
        &self.changed
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    /// Record the current data as the reset point and forget changes
    pub(crate) fn capture_original(&mut self) {
        self.original_data = self.data.clone();
        self.changed.clear();
        self.removed.clear();
    }

    pub fn original_value(&self, name: &str) -> Value {
        self.original_data.get(name).cloned().unwrap_or_default()
    }

    /// Restore the data captured at load or last save
    ///
    /// The lifecycle state is left as it is.
    pub fn reset(&mut self) {
        self.data = self.original_data.clone();
        self.changed.retain(|name| !self.meta.has_attribute(name));
    }

    pub fn properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    /// Attach non-persistent metadata (never written to storage)
    pub fn set_property(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.properties.insert(name.into(), value);
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            oid: self.oid.key(),
            type_name: self.meta.qualified_name().to_string(),
            state: self.state,
            data: self.data.clone(),
            related: self
                .related
                .iter()
                .map(|(role, list)| (role.clone(), list.iter().map(Related::describe).collect()))
                .collect(),
        }
    }

    pub(crate) fn subscribe(&mut self, observer: Sender<StateChangeEvent>) {
        self.observer = Some(observer);
    }

    pub(crate) fn unsubscribe(&mut self) {
        self.observer = None;
    }

    pub(crate) fn set_oid(&mut self, oid: ObjectId) {
        self.oid = oid;
    }

    /// Fold a freshly built copy of the same row into this instance
    ///
    /// Values the caller changed but has not saved are kept.
    pub(crate) fn merge_loaded(&mut self, fresh: PersistentObject) {
        for (name, value) in fresh.data {
            if !self.changed.contains(&name) {
                self.original_data.insert(name.clone(), value.clone());
                self.data.insert(name, value);
            }
        }
        for (role, list) in fresh.related {
            if !self.changed.contains(&role) {
                self.set_related_loaded(&role, list);
            }
        }
    }
}
