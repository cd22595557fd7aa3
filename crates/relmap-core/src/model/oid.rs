use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::errors::OrmError;

/// Prefix marking a dummy id in the canonical string form
pub const DUMMY_PREFIX: char = '~';

static NEXT_DUMMY: AtomicU64 = AtomicU64::new(1);

/// One primary-key component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdValue {
    Int(i64),
    Text(String),
    /// Placeholder for a key that storage has not allocated yet
    Dummy(u64),
}

impl IdValue {
    /// Fresh process-unique dummy value
    pub fn dummy() -> Self {
        IdValue::Dummy(NEXT_DUMMY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, IdValue::Dummy(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IdValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Int(v) => write!(f, "{}", v),
            IdValue::Text(s) => write!(f, "{}", s),
            IdValue::Dummy(n) => write!(f, "{}{}", DUMMY_PREFIX, n),
        }
    }
}

impl FromStr for IdValue {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(OrmError::illegal_argument("empty id component"));
        }
        if let Some(rest) = s.strip_prefix(DUMMY_PREFIX) {
            return rest
                .parse::<u64>()
                .map(IdValue::Dummy)
                .map_err(|_| OrmError::illegal_argument(format!("malformed dummy id '{}'", s)));
        }
        Ok(s.parse::<i64>()
            .map(IdValue::Int)
            .unwrap_or_else(|_| IdValue::Text(s.to_string())))
    }
}

impl From<i64> for IdValue {
    fn from(v: i64) -> Self {
        IdValue::Int(v)
    }
}

impl From<&str> for IdValue {
    fn from(v: &str) -> Self {
        IdValue::Text(v.to_string())
    }
}

/// Composite identity of an entity: type plus ordered primary-key values
///
/// The canonical key (`Type:1:2`) is what the identity map is keyed by.
/// Text components must not contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    type_name: String,
    ids: Vec<IdValue>,
}

impl ObjectId {
    pub fn new(type_name: impl Into<String>, ids: Vec<IdValue>) -> Self {
        Self {
            type_name: type_name.into(),
            ids,
        }
    }

    /// Single integer key shorthand
    pub fn with_int(type_name: impl Into<String>, id: i64) -> Self {
        Self::new(type_name, vec![IdValue::Int(id)])
    }

    /// Id for a not-yet-persisted entity with `pk_count` key columns
    pub fn dummy(type_name: impl Into<String>, pk_count: usize) -> Self {
        let ids = (0..pk_count.max(1)).map(|_| IdValue::dummy()).collect();
        Self::new(type_name, ids)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn ids(&self) -> &[IdValue] {
        &self.ids
    }

    pub fn first_id(&self) -> Option<&IdValue> {
        self.ids.first()
    }

    /// True if any component is still a dummy
    pub fn is_dummy(&self) -> bool {
        self.ids.iter().any(IdValue::is_dummy)
    }

    /// Canonical identity-map key
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)?;
        for id in &self.ids {
            write!(f, ":{}", id)?;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let type_name = parts.next().unwrap_or_default();
        if type_name.is_empty() {
            return Err(OrmError::illegal_argument(format!(
                "object id '{}' has no type",
                s
            )));
        }
        let ids = parts.map(str::parse).collect::<Result<Vec<IdValue>, _>>()?;
        if ids.is_empty() {
            return Err(OrmError::illegal_argument(format!(
                "object id '{}' has no key values",
                s
            )));
        }
        Ok(Self::new(type_name, ids))
    }
}
