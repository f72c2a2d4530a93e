//! Expression tree for the broker's simple query language.

use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// Comparison operator of a term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    /// Inclusive range, written `attr==low..high`.
    Range,
    /// Regular-expression match, written `attr~=pattern`.
    Match,
}

impl Operator {
    /// Textual form in the query language.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal | Operator::Range => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::Match => "~=",
        }
    }

    /// Operators that compare by ordering.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Operator::GreaterThan
                | Operator::LessThan
                | Operator::GreaterOrEqual
                | Operator::LessOrEqual
        )
    }
}

/// A literal value on the right-hand side of a term.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl QueryValue {
    pub fn is_numeric(&self) -> bool {
        matches!(self, QueryValue::Integer(_) | QueryValue::Float(_))
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::Integer(v)
    }
}

impl From<i32> for QueryValue {
    fn from(v: i32) -> Self {
        QueryValue::Integer(v as i64)
    }
}

impl From<f64> for QueryValue {
    fn from(v: f64) -> Self {
        QueryValue::Float(v)
    }
}

impl From<bool> for QueryValue {
    fn from(v: bool) -> Self {
        QueryValue::Bool(v)
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Text(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Text(v)
    }
}

/// Right-hand side of a term.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Single(QueryValue),
    /// Disjunction over values of one attribute (`attr==a,b,c`).
    AnyOf(Vec<QueryValue>),
    /// Range bounds, inclusive.
    Bounds(QueryValue, QueryValue),
}

/// One `attribute operator operand` statement.
#[derive(Clone, Debug, PartialEq)]
pub struct Term {
    /// Attribute path; dotted segments address compound values.
    pub attribute: String,
    pub operator: Operator,
    pub operand: Operand,
}

impl Term {
    pub fn new(attribute: impl Into<String>, operator: Operator, operand: Operand) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            operand,
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::new(attribute, Operator::Equal, Operand::Single(value.into()))
    }

    pub fn ne(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::new(attribute, Operator::NotEqual, Operand::Single(value.into()))
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::new(attribute, Operator::GreaterThan, Operand::Single(value.into()))
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::new(attribute, Operator::LessThan, Operand::Single(value.into()))
    }

    pub fn ge(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::new(attribute, Operator::GreaterOrEqual, Operand::Single(value.into()))
    }

    pub fn le(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::new(attribute, Operator::LessOrEqual, Operand::Single(value.into()))
    }

    /// Inclusive range.
    pub fn between(
        attribute: impl Into<String>,
        low: impl Into<QueryValue>,
        high: impl Into<QueryValue>,
    ) -> Self {
        Self::new(attribute, Operator::Range, Operand::Bounds(low.into(), high.into()))
    }

    /// Regular-expression match on a text attribute.
    pub fn matches(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(
            attribute,
            Operator::Match,
            Operand::Single(QueryValue::Text(pattern.into())),
        )
    }

    /// Equality against any of several values. A single value collapses to
    /// a plain equality so the tree stays canonical.
    pub fn one_of<V: Into<QueryValue>>(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let mut values: Vec<QueryValue> = values.into_iter().map(Into::into).collect();
        let operand = if values.len() == 1 {
            Operand::Single(values.remove(0))
        } else {
            Operand::AnyOf(values)
        };
        Self::new(attribute, Operator::Equal, operand)
    }
}

/// Conjunction of terms.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryExpression {
    pub terms: Vec<Term>,
}

impl QueryExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a term (AND).
    pub fn and(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl From<Term> for QueryExpression {
    fn from(term: Term) -> Self {
        Self { terms: vec![term] }
    }
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match super::compile(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<invalid>"),
        }
    }
}

impl FromStr for QueryExpression {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        super::parse(s)
    }
}
