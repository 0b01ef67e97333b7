//! Filter conditions and ordering passed to adapters.
//!
//! Queries build these against property names; the adapter's
//! [`Mapping`](crate::Mapping) rewrites them to column names before the
//! adapter sees them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Value};
use crate::error::QueryErrorKind;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Value is an [`Value::Array`] of candidates
    In,
    NotIn,
    /// SQL-style pattern with `%` and `_` wildcards
    Like,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a condition combines with the ones before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Joiner {
    #[default]
    And,
    Or,
}

/// A filter condition, possibly a parenthesized group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Compare {
        name: String,
        operator: Operator,
        value: Value,
        joiner: Joiner,
    },
    Group {
        conditions: Vec<Condition>,
        joiner: Joiner,
    },
}

impl Condition {
    pub fn new(name: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            name: name.into(),
            operator,
            value: value.into(),
            joiner: Joiner::And,
        }
    }

    pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(name, Operator::Eq, value)
    }

    /// `name IN (values)`.
    pub fn any_of(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(name, Operator::In, Value::Array(values))
    }

    pub fn group(conditions: Vec<Condition>) -> Self {
        Condition::Group {
            conditions,
            joiner: Joiner::And,
        }
    }

    /// Same condition joined with OR.
    pub fn or(mut self) -> Self {
        match &mut self {
            Condition::Compare { joiner, .. } | Condition::Group { joiner, .. } => {
                *joiner = Joiner::Or;
            }
        }
        self
    }

    pub fn joiner(&self) -> Joiner {
        match self {
            Condition::Compare { joiner, .. } | Condition::Group { joiner, .. } => *joiner,
        }
    }

    /// Names referenced by this condition and its nested groups.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Condition::Compare { name, .. } => vec![name.as_str()],
            Condition::Group { conditions, .. } => {
                conditions.iter().flat_map(Condition::names).collect()
            }
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl FromStr for Direction {
    type Err = Error;

    /// Accepts "asc" and "desc" in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            _ => Err(Error::query(
                QueryErrorKind::Direction,
                format!("Order direction must be 'asc' or 'desc', '{}' given", s),
            )),
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub name: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parsing() {
        assert_eq!("ASC".parse::<Direction>().unwrap(), Direction::Asc);
        assert_eq!("desc".parse::<Direction>().unwrap(), Direction::Desc);
        let err = "sideways".parse::<Direction>().unwrap_err();
        assert!(err.is_query());
    }

    #[test]
    fn group_names_are_flattened() {
        let cond = Condition::group(vec![
            Condition::eq("a", 1),
            Condition::eq("b", 2).or(),
            Condition::group(vec![Condition::new("c", Operator::IsNull, Value::Null)]),
        ]);
        assert_eq!(cond.names(), vec!["a", "b", "c"]);
        assert_eq!(cond.joiner(), Joiner::And);
        assert_eq!(Condition::eq("x", 1).or().joiner(), Joiner::Or);
    }
}
