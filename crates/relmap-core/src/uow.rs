//! Unit of Work: identity map plus pending-change queues
//!
//! Queues are populated only from state-change notifications; the unit of
//! work never inspects mapper internals. Keys are canonical object id
//! strings, so one live instance exists per identity.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use crate::events::StateChannel;
use crate::meta::RelationKind;
use crate::model::{EntityRef, EntityState, ObjectId, PersistentObject, Related};

/// Pending-change queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    New,
    Dirty,
    Deleted,
}

/// Insertion-ordered set of object id keys
#[derive(Debug, Default)]
struct OidQueue {
    keys: Vec<String>,
}

impl OidQueue {
    fn push(&mut self, key: &str) {
        if !self.contains(key) {
            self.keys.push(key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| k != key);
        before != self.keys.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    fn rename(&mut self, old: &str, new: &str) {
        for key in self.keys.iter_mut().filter(|k| k.as_str() == old) {
            *key = new.to_string();
        }
    }

    fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.keys)
    }
}

/// Result of attaching a built entity
pub struct Attachment {
    pub entity: EntityRef,
    /// False when the row was merged into an already tracked instance
    pub fresh: bool,
}

#[derive(Debug)]
pub struct UnitOfWork {
    loaded: HashMap<String, EntityRef>,
    new_objects: OidQueue,
    dirty_objects: OidQueue,
    deleted_objects: OidQueue,
    detached: HashSet<String>,
    remapped: HashMap<String, ObjectId>,
    channel: StateChannel,
    active: bool,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self {
            loaded: HashMap::new(),
            new_objects: OidQueue::default(),
            dirty_objects: OidQueue::default(),
            deleted_objects: OidQueue::default(),
            detached: HashSet::new(),
            remapped: HashMap::new(),
            channel: StateChannel::new(),
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Track `entity`, merging into the existing instance for its id
    ///
    /// Detached ids are handed back untracked.
    pub fn attach(&mut self, mut entity: PersistentObject) -> Attachment {
        let key = entity.oid().key();
        if self.detached.contains(&key) {
            return Attachment {
                entity: Rc::new(RefCell::new(entity)),
                fresh: true,
            };
        }
        if let Some(existing) = self.loaded.get(&key) {
            existing.borrow_mut().merge_loaded(entity);
            return Attachment {
                entity: existing.clone(),
                fresh: false,
            };
        }

        self.active = true;
        entity.subscribe(self.channel.sender());
        let state = entity.state();
        let entity = Rc::new(RefCell::new(entity));
        self.loaded.insert(key.clone(), entity.clone());
        match state {
            EntityState::New => self.new_objects.push(&key),
            EntityState::Dirty => self.dirty_objects.push(&key),
            EntityState::Deleted => self.deleted_objects.push(&key),
            EntityState::Clean => {}
        }
        Attachment {
            entity,
            fresh: true,
        }
    }

    /// Id after following any dummy-to-final remappings
    pub fn canonical_oid(&self, oid: &ObjectId) -> ObjectId {
        let mut current = oid.clone();
        while let Some(next) = self.remapped.get(&current.key()) {
            current = next.clone();
        }
        current
    }

    pub fn lookup(&self, oid: &ObjectId) -> Option<EntityRef> {
        self.loaded.get(&self.canonical_oid(oid).key()).cloned()
    }

    pub fn entity(&self, key: &str) -> Option<EntityRef> {
        self.loaded.get(key).cloned()
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.loaded.contains_key(&self.canonical_oid(oid).key())
    }

    /// Stop tracking `oid` for the rest of this unit of work
    pub fn detach(&mut self, oid: &ObjectId) {
        let key = self.canonical_oid(oid).key();
        self.forget(&key);
        self.detached.insert(key);
    }

    pub fn is_detached(&self, oid: &ObjectId) -> bool {
        self.detached.contains(&self.canonical_oid(oid).key())
    }

    /// Drop an entity from the identity map and every queue
    pub fn forget(&mut self, key: &str) {
        if let Some(entity) = self.loaded.remove(key) {
            if let Ok(mut entity) = entity.try_borrow_mut() {
                entity.unsubscribe();
            }
        }
        self.new_objects.remove(key);
        self.dirty_objects.remove(key);
        self.deleted_objects.remove(key);
    }

    /// Classify every state change published since the last drain
    ///
    /// Deleting a never-persisted entity also deletes the new entities on
    /// its composite child roles; their notifications are drained in turn.
    pub fn drain_events(&mut self) {
        loop {
            let events = self.channel.drain();
            if events.is_empty() {
                break;
            }
            for event in events {
                let key = self.canonical_oid(&event.oid).key();
                if self.detached.contains(&key) || !self.loaded.contains_key(&key) {
                    continue;
                }
                match event.new_state {
                    EntityState::New => self.new_objects.push(&key),
                    EntityState::Dirty => {
                        if !self.new_objects.contains(&key) {
                            self.dirty_objects.push(&key);
                        }
                    }
                    EntityState::Deleted => {
                        if self.new_objects.contains(&key) {
                            // never persisted: nothing to delete
                            let children = self.new_composite_children(&key);
                            self.forget(&key);
                            for child in children {
                                if let Ok(mut child) = child.try_borrow_mut() {
                                    child.delete();
                                }
                            }
                        } else {
                            self.dirty_objects.remove(&key);
                            self.deleted_objects.push(&key);
                        }
                    }
                    EntityState::Clean => {
                        self.dirty_objects.remove(&key);
                    }
                }
            }
        }
    }

    /// Tracked new entities on the composite one-to-many roles of `key`
    fn new_composite_children(&self, key: &str) -> Vec<EntityRef> {
        let Some(parent) = self.loaded.get(key) else {
            return Vec::new();
        };
        let Ok(parent) = parent.try_borrow() else {
            return Vec::new();
        };
        let mut children = Vec::new();
        for relation in parent.meta().relations() {
            if !relation.is_composite()
                || !matches!(relation.kind(), RelationKind::OneToMany { .. })
            {
                continue;
            }
            for entry in parent.related(relation.role()) {
                let child = match entry {
                    Related::Object(child) => Some(child.clone()),
                    Related::Proxy(oid) => self.lookup(oid),
                };
                let Some(child) = child else { continue };
                let child_key = child.try_borrow().map(|c| self.canonical_oid(c.oid()).key());
                if let Ok(child_key) = child_key {
                    if self.new_objects.contains(&child_key) {
                        children.push(child);
                    }
                }
            }
        }
        children
    }

    /// Move an entity to its final id, remembering the old one
    pub fn rekey(&mut self, old: &ObjectId, new: &ObjectId) {
        let (old_key, new_key) = (old.key(), new.key());
        if old_key == new_key {
            return;
        }
        if let Some(entity) = self.loaded.remove(&old_key) {
            self.loaded.insert(new_key.clone(), entity);
        }
        self.new_objects.rename(&old_key, &new_key);
        self.dirty_objects.rename(&old_key, &new_key);
        self.deleted_objects.rename(&old_key, &new_key);
        self.remapped.insert(old_key, new.clone());
    }

    pub fn take(&mut self, queue: Queue) -> Vec<String> {
        self.queue_mut(queue).take()
    }

    pub fn push(&mut self, queue: Queue, key: &str) {
        self.queue_mut(queue).push(key);
    }

    pub fn queued(&self, queue: Queue, key: &str) -> bool {
        match queue {
            Queue::New => self.new_objects.contains(key),
            Queue::Dirty => self.dirty_objects.contains(key),
            Queue::Deleted => self.deleted_objects.contains(key),
        }
    }

    fn queue_mut(&mut self, queue: Queue) -> &mut OidQueue {
        match queue {
            Queue::New => &mut self.new_objects,
            Queue::Dirty => &mut self.dirty_objects,
            Queue::Deleted => &mut self.deleted_objects,
        }
    }

    /// Number of entities waiting in any queue
    pub fn pending(&self) -> usize {
        self.new_objects.keys.len() + self.dirty_objects.keys.len() + self.deleted_objects.keys.len()
    }

    /// Type names of every tracked entity
    pub fn participating_types(&self) -> BTreeSet<String> {
        self.loaded
            .values()
            .filter_map(|e| e.try_borrow().ok().map(|e| e.type_name().to_string()))
            .collect()
    }

    pub fn loaded(&self) -> impl Iterator<Item = &EntityRef> {
        self.loaded.values()
    }

    /// Forget pending work after a successful commit; tracking continues
    ///
    /// Proxies still naming a dummy id are pointed at the final id. The
    /// remapping table is kept so callers holding a dummy id can still
    /// look the entity up.
    pub fn settle(&mut self) {
        self.channel.drain();
        self.new_objects.take();
        self.dirty_objects.take();
        self.deleted_objects.take();
        if self.remapped.is_empty() {
            return;
        }
        for entity in self.loaded.values() {
            if let Ok(mut entity) = entity.try_borrow_mut() {
                entity.remap_proxies(|oid| self.canonical_oid(oid));
            }
        }
    }

    /// Forget everything and become inactive
    pub fn clear(&mut self) {
        for entity in self.loaded.values() {
            if let Ok(mut entity) = entity.try_borrow_mut() {
                entity.unsubscribe();
            }
        }
        self.loaded.clear();
        self.settle();
        self.remapped.clear();
        self.detached.clear();
        self.active = false;
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{AggregationKind, AttributeDescription, RelationDescription, TypeDescription};
    use crate::model::{Value, ValueType};

    fn meta() -> Rc<TypeDescription> {
        Rc::new(
            TypeDescription::builder("Person")
                .attribute(AttributeDescription::new("name", ValueType::Text))
                .build()
                .unwrap(),
        )
    }

    fn loaded(id: i64, name: &str) -> PersistentObject {
        let mut person = PersistentObject::loaded(ObjectId::with_int("Person", id), meta());
        person.apply_loaded_value("name", Value::from(name));
        person
    }

    #[test]
    fn test_second_attach_merges_into_same_instance() {
        let mut uow = UnitOfWork::new();
        let first = uow.attach(loaded(1, "Ada"));
        let second = uow.attach(loaded(1, "Ada Lovelace"));

        assert!(first.fresh);
        assert!(!second.fresh);
        assert!(Rc::ptr_eq(&first.entity, &second.entity));
        assert_eq!(first.entity.borrow().value("name"), Value::from("Ada Lovelace"));
    }

    #[test]
    fn test_write_registers_dirty() {
        let mut uow = UnitOfWork::new();
        let person = uow.attach(loaded(1, "Ada")).entity;

        person.borrow_mut().set("name", "Grace").unwrap();
        uow.drain_events();

        assert!(uow.queued(Queue::Dirty, "Person:1"));
        assert_eq!(uow.pending(), 1);
    }

    #[test]
    fn test_delete_of_new_object_is_forgotten() {
        let mut uow = UnitOfWork::new();
        let person = uow
            .attach(PersistentObject::new(ObjectId::dummy("Person", 1), meta()))
            .entity;
        assert_eq!(uow.pending(), 1);

        person.borrow_mut().delete();
        uow.drain_events();

        assert_eq!(uow.pending(), 0);
        assert!(!uow.contains(person.borrow().oid()));
    }

    #[test]
    fn test_delete_of_new_parent_takes_new_composite_children() {
        // Given: a new order whose composite role holds a new line
        let order_meta = TypeDescription::builder("Order")
            .relation(
                RelationDescription::one_to_many("Order", "order", "Line", "lines", "id", "order_id")
                    .with_this_aggregation(AggregationKind::Composite),
            )
            .build()
            .unwrap();
        let line_meta = Rc::new(TypeDescription::builder("Line").build().unwrap());
        let mut uow = UnitOfWork::new();
        let order = uow
            .attach(PersistentObject::new(ObjectId::dummy("Order", 1), Rc::new(order_meta)))
            .entity;
        let line = uow
            .attach(PersistentObject::new(ObjectId::dummy("Line", 2), line_meta.clone()))
            .entity;
        let other = uow
            .attach(PersistentObject::new(ObjectId::dummy("Line", 3), line_meta))
            .entity;
        order
            .borrow_mut()
            .set_related_loaded("lines", vec![Related::Object(line.clone())]);

        // When: the order is deleted
        order.borrow_mut().delete();
        uow.drain_events();

        // Then: the line goes with it, the unrelated line stays queued
        assert_eq!(line.borrow().state(), EntityState::Deleted);
        assert!(!uow.contains(line.borrow().oid()));
        assert!(uow.contains(other.borrow().oid()));
        assert_eq!(uow.pending(), 1);
    }

    #[test]
    fn test_delete_moves_dirty_to_deleted() {
        let mut uow = UnitOfWork::new();
        let person = uow.attach(loaded(1, "Ada")).entity;
        person.borrow_mut().set("name", "Grace").unwrap();
        person.borrow_mut().delete();
        uow.drain_events();

        assert!(!uow.queued(Queue::Dirty, "Person:1"));
        assert!(uow.queued(Queue::Deleted, "Person:1"));
    }

    #[test]
    fn test_detached_changes_are_ignored() {
        let mut uow = UnitOfWork::new();
        let person = uow.attach(loaded(1, "Ada")).entity;
        uow.detach(&ObjectId::with_int("Person", 1));

        person.borrow_mut().set("name", "Grace").unwrap();
        uow.drain_events();

        assert_eq!(uow.pending(), 0);
        let again = uow.attach(loaded(1, "Ada"));
        assert!(!Rc::ptr_eq(&again.entity, &person));
        assert!(!uow.contains(&ObjectId::with_int("Person", 1)));
    }

    #[test]
    fn test_rekey_follows_remapping() {
        let mut uow = UnitOfWork::new();
        let dummy = ObjectId::dummy("Person", 1);
        uow.attach(PersistentObject::new(dummy.clone(), meta()));
        let real = ObjectId::with_int("Person", 7);

        uow.rekey(&dummy, &real);

        assert_eq!(uow.canonical_oid(&dummy), real);
        assert!(uow.lookup(&dummy).is_some());
        assert!(uow.queued(Queue::New, "Person:7"));
    }

    #[test]
    fn test_clear_unsubscribes_and_deactivates() {
        let mut uow = UnitOfWork::new();
        let person = uow.attach(loaded(1, "Ada")).entity;
        uow.clear();

        person.borrow_mut().set("name", "Grace").unwrap();
        uow.drain_events();

        assert!(!uow.is_active());
        assert_eq!(uow.pending(), 0);
        assert!(uow.participating_types().is_empty());
    }
}
