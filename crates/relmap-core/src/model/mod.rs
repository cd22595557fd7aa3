pub mod entity;
pub mod oid;
pub mod value;

pub use entity::{EntityRef, EntityState, PersistentObject, Related};
pub use oid::{IdValue, ObjectId, DUMMY_PREFIX};
pub use value::{Value, ValueType};
