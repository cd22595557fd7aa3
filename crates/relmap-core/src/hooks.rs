//! Per-type lifecycle hooks
//!
//! The session calls these at fixed points: `after_load` when an entity is
//! built from a row, `after_create` when a new entity is created, and the
//! `before_*`/`after_*` pairs around the insert, update and delete
//! statements. An error from a `before_*` hook aborts the commit.

use crate::errors::Result;
use crate::model::PersistentObject;

pub trait EntityHooks {
    fn after_load(&self, _entity: &mut PersistentObject) -> Result<()> {
        Ok(())
    }

    fn after_create(&self, _entity: &mut PersistentObject) -> Result<()> {
        Ok(())
    }

    fn before_insert(&self, _entity: &mut PersistentObject) -> Result<()> {
        Ok(())
    }

    fn after_insert(&self, _entity: &mut PersistentObject) -> Result<()> {
        Ok(())
    }

    fn before_update(&self, _entity: &mut PersistentObject) -> Result<()> {
        Ok(())
    }

    fn after_update(&self, _entity: &mut PersistentObject) -> Result<()> {
        Ok(())
    }

    fn before_delete(&self, _entity: &mut PersistentObject) -> Result<()> {
        Ok(())
    }

    fn after_delete(&self, _entity: &mut PersistentObject) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl EntityHooks for NoopHooks {}
