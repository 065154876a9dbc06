//! Module: filter
//! Responsibility: the search-filter algebra, held in simplified normal form.
//! Does not own: backend translation (see `pushdown`).
//! Boundary: every filter value anywhere in the system is already normalized,
//! so converters pattern-match without re-normalizing.

mod eval;
mod fingerprint;
mod normalize;
mod op;
mod validate;

#[cfg(test)]
mod tests;

use crate::value::Value;
use std::ops::{BitAnd, BitOr, Not};

pub use op::{FilterOp, UnknownFilterOp};

pub(crate) use fingerprint::{hash_filter, write_str, write_tag, write_value};

///
/// SearchFilter
///
/// `And`, `Or` and `Not` payloads are opaque: they can only be produced by the
/// normalizing constructors ([`SearchFilter::and`], [`SearchFilter::or`],
/// [`SearchFilter::not`] and the `&`, `|`, `!` operators).
///

#[derive(Clone, Debug, PartialEq)]
pub enum SearchFilter {
    IncludeAll,
    ExcludeAll,
    Field(FieldFilter),
    And(Conjunction),
    Or(Disjunction),
    Not(Negation),
    Query(QueryFilter),
}

///
/// FieldFilter
///

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    pub name: String,
    pub op: FilterOp,
    pub value: Value,
}

///
/// QueryFilter
/// Free-text match over every readable text field (ASCII case-insensitive).
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryFilter {
    pub text: String,
}

///
/// Conjunction
/// At least two children; none is an `And`, `IncludeAll` or `ExcludeAll`.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Conjunction(Vec<SearchFilter>);

impl Conjunction {
    #[must_use]
    pub fn filters(&self) -> &[SearchFilter] {
        &self.0
    }
}

///
/// Disjunction
/// At least two children; none is an `Or`, `IncludeAll` or `ExcludeAll`.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Disjunction(Vec<SearchFilter>);

impl Disjunction {
    #[must_use]
    pub fn filters(&self) -> &[SearchFilter] {
        &self.0
    }
}

///
/// Negation
/// Inner filter is never a `Not`, `IncludeAll` or `ExcludeAll`.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Negation(Box<SearchFilter>);

impl Negation {
    #[must_use]
    pub fn inner(&self) -> &SearchFilter {
        &self.0
    }
}

impl SearchFilter {
    pub fn field(name: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self::Field(FieldFilter {
            name: name.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::Eq, value)
    }

    pub fn ne(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::Ne, value)
    }

    pub fn gt(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::Gt, value)
    }

    pub fn gte(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::Gte, value)
    }

    pub fn lt(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::Lt, value)
    }

    pub fn lte(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::Lte, value)
    }

    pub fn contains(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::Contains, value)
    }

    pub fn starts_with(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::StartsWith, value)
    }

    pub fn ends_with(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, FilterOp::EndsWith, value)
    }

    pub fn one_of<I, T>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::field(name, FilterOp::OneOf, Value::list(values))
    }

    pub fn query(text: impl Into<String>) -> Self {
        Self::Query(QueryFilter { text: text.into() })
    }

    /// Conjunction of `filters`, reduced to normal form.
    pub fn and(filters: impl IntoIterator<Item = Self>) -> Self {
        normalize::and(filters)
    }

    /// Disjunction of `filters`, reduced to normal form.
    pub fn or(filters: impl IntoIterator<Item = Self>) -> Self {
        normalize::or(filters)
    }

    /// Negation of `filter`, reduced to normal form.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Self) -> Self {
        normalize::not(filter)
    }

    #[must_use]
    pub const fn is_include_all(&self) -> bool {
        matches!(self, Self::IncludeAll)
    }

    #[must_use]
    pub const fn is_exclude_all(&self) -> bool {
        matches!(self, Self::ExcludeAll)
    }
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self::IncludeAll
    }
}

impl BitAnd for SearchFilter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::and([self, rhs])
    }
}

impl BitOr for SearchFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::or([self, rhs])
    }
}

impl Not for SearchFilter {
    type Output = Self;

    fn not(self) -> Self {
        normalize::not(self)
    }
}
