//! Audit sink receiving entity snapshots for every mutating action

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use relmap_core_types::RequestContext;

use crate::model::{EntityState, Value};
use crate::policy::Action;

/// Serializable picture of an entity at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub oid: String,
    pub type_name: String,
    pub state: EntityState,
    pub data: BTreeMap<String, Value>,
    /// Related object id keys per role
    pub related: BTreeMap<String, Vec<String>>,
}

pub trait AuditSink {
    fn record(&self, action: Action, snapshot: &EntitySnapshot, context: &RequestContext);
}

/// Sink that drops every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _action: Action, _snapshot: &EntitySnapshot, _context: &RequestContext) {}
}

/// Sink that logs each snapshot as JSON at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, action: Action, snapshot: &EntitySnapshot, context: &RequestContext) {
        match serde_json::to_string(snapshot) {
            Ok(json) => tracing::info!(
                component = module_path!(),
                op = "audit",
                action = %action,
                oid = %snapshot.oid,
                request_id = %context.request_id,
                actor = context.actor.as_deref().unwrap_or("-"),
                snapshot = %json,
            ),
            Err(e) => tracing::warn!(
                component = module_path!(),
                op = "audit",
                oid = %snapshot.oid,
                error = %e,
                "snapshot not serializable"
            ),
        }
    }
}
