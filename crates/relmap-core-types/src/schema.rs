//! Canonical schema constants for structured logging
//!
//! These constants keep field names consistent between the mapper, the
//! unit of work and the session facade.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_TRACE_ID: &str = "trace_id";

// Entity identifiers
pub const FIELD_OID: &str = "oid";
pub const FIELD_TYPE: &str = "type_name";
pub const FIELD_ROLE: &str = "role";

// Storage
pub const FIELD_SQL: &str = "sql";
pub const FIELD_ROWS: &str = "rows";

// Commit counters
pub const FIELD_INSERTED: &str = "inserted";
pub const FIELD_UPDATED: &str = "updated";
pub const FIELD_DELETED: &str = "deleted";
pub const FIELD_PASSES: &str = "passes";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
