//! relmap Core - object-relational mapping engine
//!
//! This crate maps typed entities onto relational tables, including:
//! - Composite object ids, typed values and the entity state machine
//! - Static per-type metadata: attributes, relations, references
//! - A generic mapper per type building SQL from that metadata
//! - Depth-bounded graph loading and creation with proxies
//! - A unit of work with identity map, change queues and commit loop
//! - A session facade routing type names to mappers
//!
//! Storage is reached only through the [`storage`] traits; `relmap-store`
//! implements them over SQLite.

pub mod audit;
pub mod config;
pub mod depth;
pub mod errors;
pub mod events;
pub mod hooks;
pub mod logging_facility;
pub mod mapper;
pub mod meta;
pub mod model;
pub mod policy;
pub mod query;
pub mod session;
pub mod storage;
pub mod uow;
pub mod validation;

#[doc(hidden)]
pub use relmap_core_types as __types;

// Re-export commonly used types
pub use config::OrmConfig;
pub use depth::BuildDepth;
pub use errors::{ExError, ExErrorKind, OrmError, Result};
pub use meta::{AttributeDescription, RelationDescription, TypeDescription};
pub use model::{EntityRef, EntityState, ObjectId, PersistentObject, Related, Value, ValueType};
pub use session::{CommitReport, LoadOptions, Session, UnionPage};
