//! Module: pushdown::sql
//! Responsibility: translating filters into relational WHERE-clause trees.
//! Does not own: SQL text rendering or parameter binding (see `store::sql::dialect`).
//! Boundary: every leaf is null-safe, so the tree is two-valued and `NOT` is exact.

use crate::{
    filter::{FieldFilter, FilterOp, SearchFilter},
    model::{FieldKind, StorageMeta},
    pushdown::{Conversion, ConverterChain, FilterConverter, NativeCondition},
    value::Value,
};

///
/// SqlCompare
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SqlCompare {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl SqlCompare {
    const fn from_op(op: FilterOp) -> Option<Self> {
        match op {
            FilterOp::Eq => Some(Self::Eq),
            FilterOp::Ne => Some(Self::Ne),
            FilterOp::Lt => Some(Self::Lt),
            FilterOp::Lte => Some(Self::Lte),
            FilterOp::Gt => Some(Self::Gt),
            FilterOp::Gte => Some(Self::Gte),
            _ => None,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

///
/// SqlCondition
///
/// Dialect-neutral WHERE tree. Column-level leaves only match non-null
/// column values unless they test nullness explicitly.
///

#[derive(Clone, Debug, PartialEq)]
pub enum SqlCondition {
    Constant(bool),
    IsNull { column: String, negated: bool },
    Compare { column: String, op: SqlCompare, value: Value },
    Contains { column: String, needle: String },
    StartsWith { column: String, prefix: String },
    EndsWith { column: String, suffix: String },
    In { column: String, values: Vec<Value> },
    /// `LIKE` with `\` as the escape character.
    Like { column: String, pattern: String },
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
}

impl NativeCondition for SqlCondition {
    fn all(parts: Vec<Self>) -> Self {
        Self::And(parts)
    }

    fn any(parts: Vec<Self>) -> Self {
        Self::Or(parts)
    }

    fn negate(self) -> Self {
        match self {
            Self::Constant(value) => Self::Constant(!value),
            Self::IsNull { column, negated } => Self::IsNull {
                column,
                negated: !negated,
            },
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    fn constant(value: bool) -> Option<Self> {
        Some(Self::Constant(value))
    }
}

///
/// SqlScope
/// Dialect capabilities the converters depend on.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqlScope {
    /// `LIKE` folds ASCII case (true for SQLite's default collation).
    pub case_insensitive_like: bool,
}

impl Default for SqlScope {
    fn default() -> Self {
        Self {
            case_insensitive_like: true,
        }
    }
}

pub type SqlConverterChain = ConverterChain<SqlScope, SqlCondition>;

/// Structural converters plus every relational leaf converter.
#[must_use]
pub fn sql_converters() -> SqlConverterChain {
    ConverterChain::structural()
        .with(NullComparison)
        .with(ColumnComparison)
        .with(TextMatch)
        .with(Membership)
        .with(FreeText)
}

/// Whether a literal of this family can ever equal a column of `kind`.
const fn literal_fits(kind: FieldKind, value: &Value) -> bool {
    matches!(
        (kind, value),
        (FieldKind::Text, Value::Text(_))
            | (FieldKind::Int | FieldKind::Float, Value::Int(_) | Value::Float(_))
            | (FieldKind::Bool, Value::Bool(_))
            | (FieldKind::Blob, Value::Blob(_))
            | (FieldKind::Timestamp, Value::Timestamp(_))
            | (FieldKind::Uuid, Value::Uuid(_))
    )
}

/// Timestamps are stored as whole microseconds; a finer literal cannot be
/// compared exactly.
fn finer_than_column(value: &Value) -> bool {
    matches!(value, Value::Timestamp(ts) if ts.timestamp_subsec_nanos() % 1_000 != 0)
}

fn field_filter<'a>(
    filter: &'a SearchFilter,
    meta: &StorageMeta,
) -> Option<(&'a FieldFilter, FieldKind)> {
    let SearchFilter::Field(field) = filter else {
        return None;
    };
    let kind = meta.field(&field.name)?.kind();

    Some((field, kind))
}

///
/// NullComparison
/// `eq null` / `ne null` become `IS [NOT] NULL`; ordering against null never matches.
///

struct NullComparison;

impl FilterConverter<SqlScope, SqlCondition> for NullComparison {
    fn priority(&self) -> i32 {
        30
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        _: &SqlScope,
        _: &SqlConverterChain,
    ) -> Option<Conversion<SqlCondition>> {
        let (field, _) = field_filter(filter, meta)?;
        if !field.value.is_null() || field.op == FilterOp::OneOf {
            return None;
        }

        let condition = match field.op {
            FilterOp::Eq => SqlCondition::IsNull {
                column: field.name.clone(),
                negated: false,
            },
            FilterOp::Ne => SqlCondition::IsNull {
                column: field.name.clone(),
                negated: true,
            },
            _ => SqlCondition::Constant(false),
        };

        Some(Conversion::exact(condition))
    }
}

///
/// ColumnComparison
///

struct ColumnComparison;

impl FilterConverter<SqlScope, SqlCondition> for ColumnComparison {
    fn priority(&self) -> i32 {
        10
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        _: &SqlScope,
        _: &SqlConverterChain,
    ) -> Option<Conversion<SqlCondition>> {
        let (field, kind) = field_filter(filter, meta)?;
        let op = SqlCompare::from_op(field.op)?;
        if kind == FieldKind::Json || finer_than_column(&field.value) {
            return None;
        }
        if !literal_fits(kind, &field.value) {
            return Some(Conversion::exact(SqlCondition::Constant(false)));
        }

        Some(Conversion::exact(SqlCondition::Compare {
            column: field.name.clone(),
            op,
            value: field.value.clone(),
        }))
    }
}

///
/// TextMatch
/// Case-sensitive substring tests on text columns only.
///

struct TextMatch;

impl FilterConverter<SqlScope, SqlCondition> for TextMatch {
    fn priority(&self) -> i32 {
        10
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        _: &SqlScope,
        _: &SqlConverterChain,
    ) -> Option<Conversion<SqlCondition>> {
        let (field, kind) = field_filter(filter, meta)?;
        if !field.op.is_text_op() || kind != FieldKind::Text {
            return None;
        }

        let Some(operand) = field.value.coerce_text() else {
            return Some(Conversion::exact(SqlCondition::Constant(false)));
        };
        let column = field.name.clone();
        if operand.is_empty() {
            return Some(Conversion::exact(SqlCondition::IsNull {
                column,
                negated: true,
            }));
        }

        let condition = match field.op {
            FilterOp::Contains => SqlCondition::Contains {
                column,
                needle: operand,
            },
            FilterOp::StartsWith => SqlCondition::StartsWith {
                column,
                prefix: operand,
            },
            _ => SqlCondition::EndsWith {
                column,
                suffix: operand,
            },
        };

        Some(Conversion::exact(condition))
    }
}

///
/// Membership
///

struct Membership;

impl FilterConverter<SqlScope, SqlCondition> for Membership {
    fn priority(&self) -> i32 {
        10
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        _: &SqlScope,
        _: &SqlConverterChain,
    ) -> Option<Conversion<SqlCondition>> {
        let (field, kind) = field_filter(filter, meta)?;
        if field.op != FilterOp::OneOf || kind == FieldKind::Json {
            return None;
        }
        let Some(options) = field.value.as_list() else {
            return Some(Conversion::exact(SqlCondition::Constant(false)));
        };
        if options.iter().any(finer_than_column) {
            return None;
        }

        let mut parts = Vec::new();
        if options.iter().any(Value::is_null) {
            parts.push(SqlCondition::IsNull {
                column: field.name.clone(),
                negated: false,
            });
        }
        let values: Vec<Value> = options
            .iter()
            .filter(|value| literal_fits(kind, value))
            .cloned()
            .collect();
        if !values.is_empty() {
            parts.push(SqlCondition::In {
                column: field.name.clone(),
                values,
            });
        }

        let condition = match parts.len() {
            0 => SqlCondition::Constant(false),
            1 => parts.remove(0),
            _ => SqlCondition::Or(parts),
        };

        Some(Conversion::exact(condition))
    }
}

///
/// FreeText
/// `LIKE '%text%'` over readable text columns.
///

struct FreeText;

impl FilterConverter<SqlScope, SqlCondition> for FreeText {
    fn priority(&self) -> i32 {
        10
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        scope: &SqlScope,
        _: &SqlConverterChain,
    ) -> Option<Conversion<SqlCondition>> {
        let SearchFilter::Query(query) = filter else {
            return None;
        };
        if !scope.case_insensitive_like {
            return None;
        }
        if query.text.is_empty() {
            return Some(Conversion::exact(SqlCondition::Constant(true)));
        }

        let pattern = format!("%{}%", escape_like(&query.text));
        let mut parts: Vec<SqlCondition> = meta
            .fields()
            .iter()
            .filter(|field| field.readable && field.kind() == FieldKind::Text)
            .map(|field| SqlCondition::Like {
                column: field.name().to_string(),
                pattern: pattern.clone(),
            })
            .collect();

        let condition = match parts.len() {
            0 => SqlCondition::Constant(false),
            1 => parts.remove(0),
            _ => SqlCondition::Or(parts),
        };

        Some(Conversion::exact(condition))
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Field;

    fn meta() -> StorageMeta {
        StorageMeta::builder("item")
            .field(Field::new("id", FieldKind::Text))
            .field(Field::new("value", FieldKind::Int))
            .field(Field::new("title", FieldKind::Text))
            .field(Field::new("doc", FieldKind::Json))
            .build()
            .expect("meta should build")
    }

    fn convert(filter: &SearchFilter) -> Conversion<SqlCondition> {
        sql_converters().convert(filter, &meta(), &SqlScope::default())
    }

    #[test]
    fn comparisons_against_mismatched_literals_are_constant_false() {
        assert_eq!(
            convert(&SearchFilter::eq("value", "3")),
            Conversion::exact(SqlCondition::Constant(false))
        );
    }

    #[test]
    fn null_equality_becomes_is_null() {
        assert_eq!(
            convert(&SearchFilter::ne("title", Value::Null)),
            Conversion::exact(SqlCondition::IsNull {
                column: "title".into(),
                negated: true
            })
        );
    }

    #[test]
    fn json_columns_decline_and_leave_partial_and() {
        let filter = SearchFilter::gte("value", 3) & SearchFilter::eq("doc", serde_json::json!({"a": 1}));
        let conversion = convert(&filter);

        assert!(!conversion.handled);
        assert_eq!(
            conversion.condition,
            Some(SqlCondition::Compare {
                column: "value".into(),
                op: SqlCompare::Gte,
                value: Value::Int(3),
            })
        );
    }

    #[test]
    fn or_with_unconvertible_child_declines_entirely() {
        let filter = SearchFilter::gte("value", 3) | SearchFilter::eq("doc", serde_json::json!(1));

        assert_eq!(convert(&filter), Conversion::unconverted());
    }

    #[test]
    fn not_over_partial_child_declines() {
        let filter = !(SearchFilter::gte("value", 3) & SearchFilter::eq("doc", serde_json::json!(1)));

        assert_eq!(convert(&filter), Conversion::unconverted());
    }

    #[test]
    fn query_escapes_like_wildcards() {
        let conversion = convert(&SearchFilter::query("50%_off"));
        let Some(SqlCondition::Or(parts)) = conversion.condition else {
            panic!("expected a disjunction over text columns");
        };

        assert!(conversion.handled);
        assert_eq!(
            parts[0],
            SqlCondition::Like {
                column: "id".into(),
                pattern: "%50\\%\\_off%".into(),
            }
        );
    }

    #[test]
    fn query_declines_without_case_folding_like() {
        let scope = SqlScope {
            case_insensitive_like: false,
        };
        let conversion = sql_converters().convert(&SearchFilter::query("x"), &meta(), &scope);

        assert_eq!(conversion, Conversion::unconverted());
    }
}
