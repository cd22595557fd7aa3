//! Criteria, vocabulary translation and SQL construction

pub mod criteria;
pub mod sql;
pub mod translate;

pub use criteria::{
    Combinator, Criteria, Direction, Operator, OrderBy, Pagination, Projection, Query,
};
pub use sql::{SqlBuilder, SqlStatement};
pub use translate::{ReferenceJoin, Vocabulary};
