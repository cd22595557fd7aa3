use std::fmt;

use crate::errors::{OrmError, Result};
use crate::model::Value;

/// Comparison applied by one criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    In,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

/// How a criterion joins the ones before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    pub fn sql(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

/// A condition on one attribute of one type, in domain vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    pub type_name: String,
    pub attribute: String,
    pub operator: Operator,
    pub operands: Vec<Value>,
    pub combinator: Combinator,
}

impl Criteria {
    pub fn new(
        type_name: impl Into<String>,
        attribute: impl Into<String>,
        operator: Operator,
        operand: impl Into<Value>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            attribute: attribute.into(),
            operator,
            operands: vec![operand.into()],
            combinator: Combinator::And,
        }
    }

    pub fn eq(
        type_name: impl Into<String>,
        attribute: impl Into<String>,
        operand: impl Into<Value>,
    ) -> Self {
        Self::new(type_name, attribute, Operator::Eq, operand)
    }

    pub fn is_in(
        type_name: impl Into<String>,
        attribute: impl Into<String>,
        operands: Vec<Value>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            attribute: attribute.into(),
            operator: Operator::In,
            operands,
            combinator: Combinator::And,
        }
    }

    pub fn or(mut self) -> Self {
        self.combinator = Combinator::Or;
        self
    }

    /// Number of bound parameters the condition needs
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` for an empty `IN` list.
    pub fn arity(&self) -> Result<usize> {
        match self.operator {
            Operator::IsNull | Operator::IsNotNull => Ok(0),
            Operator::In if self.operands.is_empty() => Err(OrmError::illegal_argument(
                format!("empty IN list for {}.{}", self.type_name, self.attribute),
            )),
            Operator::In => Ok(self.operands.len()),
            _ => Ok(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Sort key in domain vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub attribute: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: Direction::Desc,
        }
    }

    /// Parse `"name"`, `"name ASC"` or `"name DESC"`
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` for anything else.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split_whitespace();
        let attribute = parts
            .next()
            .ok_or_else(|| OrmError::illegal_argument("empty order clause"))?;
        let direction = match parts.next().map(str::to_ascii_uppercase).as_deref() {
            None | Some("ASC") => Direction::Asc,
            Some("DESC") => Direction::Desc,
            Some(other) => {
                return Err(OrmError::illegal_argument(format!(
                    "unknown sort direction '{}'",
                    other
                )))
            }
        };
        if parts.next().is_some() {
            return Err(OrmError::illegal_argument(format!(
                "malformed order clause '{}'",
                text
            )));
        }
        Ok(Self {
            attribute: attribute.to_string(),
            direction,
        })
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        write!(f, "{} {}", self.attribute, direction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// The page's slice of `items`
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(usize::try_from(self.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(self.limit).unwrap_or(usize::MAX))
            .collect()
    }
}

/// Which columns a select fetches besides keys
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// Every attribute and reference
    #[default]
    All,
    /// Only the named attributes and references; empty means all
    Only(Vec<String>),
    /// Primary and foreign keys only (for proxies)
    KeysOnly,
}

impl Projection {
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Projection::All => true,
            Projection::Only(names) => names.is_empty() || names.iter().any(|n| n == name),
            Projection::KeysOnly => false,
        }
    }
}

/// A select over one type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub type_name: String,
    pub criteria: Vec<Criteria>,
    /// Free condition text in domain vocabulary, ANDed with the criteria
    pub condition: Option<String>,
    pub order_by: Vec<OrderBy>,
    pub pagination: Option<Pagination>,
    pub projection: Projection,
}

impl Query {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria.push(criteria);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}
