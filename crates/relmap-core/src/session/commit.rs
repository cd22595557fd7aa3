//! Commit and rollback of the session's unit of work
//!
//! A commit begins a transaction on every participating mapper and then
//! runs passes of inserts, updates, deletes and pending junction links
//! until nothing is queued. Saving can queue more work (a junction entity
//! per new many-to-many link), hence the passes. A pass that makes no
//! progress, or too many passes, fails with `CommitRecursion`.

use std::time::Instant;

use crate::errors::{OrmError, Result};
use crate::events::PersistenceEvent;
use crate::uow::Queue;
use crate::{log_op_end, log_op_error, log_op_start};

use super::persist::CommitState;
use super::{CommitReport, Session};

impl Session {
    /// Persist every pending change in one coordinated transaction
    ///
    /// On success the identity map is kept, pending queues are emptied and
    /// listeners receive a [`PersistenceEvent`] per saved entity. On failure
    /// every started transaction is rolled back and the unit of work is
    /// cleared before the error is returned.
    ///
    /// # Errors
    ///
    /// `InactiveTransaction` after a rollback, `AuthorizationDenied` on a
    /// denied write, `Validation`, `CommitRecursion`, hook errors and
    /// storage failures.
    pub fn commit(&mut self) -> Result<CommitReport> {
        log_op_start!("commit", request_id = %self.context.request_id);
        let start = Instant::now();

        let report = self.commit_impl().map_err(|e| {
            log_op_error!(
                "commit",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                request_id = %self.context.request_id
            );
            e
        })?;

        log_op_end!(
            "commit",
            duration_ms = start.elapsed().as_millis() as u64,
            request_id = %self.context.request_id,
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len()
        );
        Ok(report)
    }

    fn commit_impl(&mut self) -> Result<CommitReport> {
        if !self.uow.is_active() {
            return Err(OrmError::InactiveTransaction {
                op: "commit".to_string(),
            });
        }

        let mut state = CommitState::default();
        if let Err(e) = self.run_passes(&mut state) {
            self.abort(&state);
            return Err(e);
        }
        for (i, mapper) in state.begun.iter().enumerate() {
            if let Err(e) = mapper.commit() {
                tracing::error!(
                    component = module_path!(),
                    op = "commit",
                    type_name = %mapper.type_name(),
                    committed = i,
                    error = %e,
                    "storage commit failed; rolling back"
                );
                self.abort(&state);
                return Err(e);
            }
        }

        let report = std::mem::take(&mut state.report);
        self.uow.settle();
        self.publish(&report);
        Ok(report)
    }

    fn run_passes(&mut self, state: &mut CommitState) -> Result<()> {
        self.uow.drain_events();
        for mapper in self.participating_mappers()? {
            state.begin(&mapper)?;
        }

        let mut passes = 0u32;
        loop {
            self.uow.drain_events();
            let pending = self.uow.pending() + state.pending_links.len();
            if pending == 0 {
                return Ok(());
            }
            passes += 1;
            if passes > self.config.max_commit_passes {
                return Err(OrmError::CommitRecursion { pending });
            }

            let mut progress = 0usize;

            let mut deferred = Vec::new();
            for key in self.uow.take(Queue::New) {
                if self.insert_entity(state, &key)? {
                    progress += 1;
                } else {
                    deferred.push(key);
                }
            }
            for key in deferred {
                self.uow.push(Queue::New, &key);
            }

            self.uow.drain_events();
            let mut deferred = Vec::new();
            for key in self.uow.take(Queue::Dirty) {
                if self.update_entity(state, &key)? {
                    progress += 1;
                } else {
                    deferred.push(key);
                }
            }
            for key in deferred {
                self.uow.push(Queue::Dirty, &key);
            }

            self.uow.drain_events();
            for key in self.uow.take(Queue::Deleted) {
                self.delete_queued(state, &key)?;
                progress += 1;
            }

            let links: Vec<(String, String)> = state.pending_links.iter().cloned().collect();
            for (owner, role) in links {
                if self.retry_links(state, &owner, &role)? {
                    progress += 1;
                }
            }

            if progress == 0 {
                return Err(OrmError::CommitRecursion { pending });
            }
        }
    }

    /// Roll back what a failed commit started and clear the unit of work
    fn abort(&mut self, state: &CommitState) {
        for mapper in state.begun.iter().rev() {
            if let Err(e) = mapper.rollback() {
                tracing::error!(
                    component = module_path!(),
                    op = "rollback",
                    type_name = %mapper.type_name(),
                    error = %e,
                    "rollback failed"
                );
            }
        }
        self.uow.clear();
    }

    fn publish(&self, report: &CommitReport) {
        if self.listeners.is_empty() {
            return;
        }
        let events = report
            .inserted
            .iter()
            .cloned()
            .map(PersistenceEvent::Inserted)
            .chain(report.updated.iter().cloned().map(PersistenceEvent::Updated))
            .chain(report.deleted.iter().cloned().map(PersistenceEvent::Deleted));
        for event in events {
            for listener in &self.listeners {
                listener.on_persisted(&event);
            }
        }
    }

    /// Discard every pending change and leave the unit of work inactive
    ///
    /// # Errors
    ///
    /// Returns the first storage rollback failure; the unit of work is
    /// cleared regardless.
    pub fn rollback(&mut self) -> Result<()> {
        log_op_start!("rollback", request_id = %self.context.request_id);
        let start = Instant::now();

        let mut first_error = None;
        for mapper in self.registry.mappers() {
            if let Err(e) = mapper.rollback() {
                first_error = first_error.or(Some(e));
            }
        }
        self.uow.clear();

        if let Some(e) = first_error {
            log_op_error!("rollback", e.clone(), duration_ms = start.elapsed().as_millis() as u64);
            return Err(e);
        }
        log_op_end!("rollback", duration_ms = start.elapsed().as_millis() as u64);
        Ok(())
    }
}
