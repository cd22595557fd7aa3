//! Build depth: how many relation generations a load or create follows
//!
//! Relations that are not followed are attached as proxies. Whenever a
//! many-to-many relation is followed, the next generation is forced to
//! [`BuildDepth::Single`] so junction fan-out cannot multiply.

use std::fmt;

use crate::errors::OrmError;
use crate::meta::{AggregationKind, RelationDescription};

pub const DEPTH_INFINITE: i64 = -1;
pub const DEPTH_SINGLE: i64 = -2;
pub const DEPTH_REQUIRED: i64 = -4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildDepth {
    /// Own attributes only; every relation becomes proxies
    Single,
    /// Every navigable relation, bounded by the configured maximum generation
    Infinite,
    /// Only relations whose other end is mandatory and aggregated
    Required,
    /// Follow relations for this many generations
    Generations(u32),
}

impl BuildDepth {
    /// Whether `relation` is followed at this depth
    pub fn follows(&self, relation: &RelationDescription) -> bool {
        match self {
            BuildDepth::Single | BuildDepth::Generations(0) => false,
            BuildDepth::Required => {
                relation.other().min > 0
                    && relation.other().aggregation != AggregationKind::None
            }
            BuildDepth::Infinite | BuildDepth::Generations(_) => relation.other().navigable,
        }
    }

    /// Depth for the generation reached through `relation`
    ///
    /// `Required` and `Infinite` hold constant; the generation count is
    /// bounded separately.
    pub fn next(&self, relation: &RelationDescription) -> BuildDepth {
        if relation.is_many_to_many() {
            return BuildDepth::Single;
        }
        match self {
            BuildDepth::Generations(n) => BuildDepth::Generations(n.saturating_sub(1)),
            other => *other,
        }
    }
}

impl TryFrom<i64> for BuildDepth {
    type Error = OrmError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            DEPTH_INFINITE => Ok(BuildDepth::Infinite),
            DEPTH_SINGLE => Ok(BuildDepth::Single),
            DEPTH_REQUIRED => Ok(BuildDepth::Required),
            n if n >= 0 => u32::try_from(n)
                .map(BuildDepth::Generations)
                .map_err(|_| OrmError::IllegalDepth { value }),
            _ => Err(OrmError::IllegalDepth { value }),
        }
    }
}

impl From<BuildDepth> for i64 {
    fn from(depth: BuildDepth) -> Self {
        match depth {
            BuildDepth::Infinite => DEPTH_INFINITE,
            BuildDepth::Single => DEPTH_SINGLE,
            BuildDepth::Required => DEPTH_REQUIRED,
            BuildDepth::Generations(n) => i64::from(n),
        }
    }
}

impl fmt::Display for BuildDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildDepth::Single => write!(f, "single"),
            BuildDepth::Infinite => write!(f, "infinite"),
            BuildDepth::Required => write!(f, "required"),
            BuildDepth::Generations(n) => write!(f, "{}", n),
        }
    }
}
