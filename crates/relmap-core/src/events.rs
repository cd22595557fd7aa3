//! Typed notifications between entities, the unit of work and listeners
//!
//! Entities publish [`StateChangeEvent`]s on an observer channel; the unit
//! of work drains them to classify pending changes. After a successful
//! commit the session publishes [`PersistenceEvent`]s to every registered
//! [`PersistenceListener`] (e.g. an external full-text indexer).

use std::sync::mpsc::{self, Receiver, Sender};

use serde::Serialize;

use crate::model::{EntityState, ObjectId};

/// An entity moved from one lifecycle state to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub oid: ObjectId,
    pub old_state: EntityState,
    pub new_state: EntityState,
}

/// Observer channel carrying state changes from entities to the unit of work
#[derive(Debug)]
pub struct StateChannel {
    sender: Sender<StateChangeEvent>,
    receiver: Receiver<StateChangeEvent>,
}

impl StateChannel {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// Handle given to each subscribed entity
    pub fn sender(&self) -> Sender<StateChangeEvent> {
        self.sender.clone()
    }

    /// All events published since the last drain, in publication order
    pub fn drain(&self) -> Vec<StateChangeEvent> {
        self.receiver.try_iter().collect()
    }
}

impl Default for StateChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a committed change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "oid", rename_all = "lowercase")]
pub enum PersistenceEvent {
    Inserted(ObjectId),
    Updated(ObjectId),
    Deleted(ObjectId),
}

impl PersistenceEvent {
    pub fn oid(&self) -> &ObjectId {
        match self {
            PersistenceEvent::Inserted(oid)
            | PersistenceEvent::Updated(oid)
            | PersistenceEvent::Deleted(oid) => oid,
        }
    }
}

/// Subscriber for committed changes
pub trait PersistenceListener {
    fn on_persisted(&self, event: &PersistenceEvent);
}
