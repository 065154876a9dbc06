//! Module: pushdown::wide
//! Responsibility: wide-column condition expressions, index selection, and
//! key-condition extraction.
//! Does not own: executing queries or scans (see `store::wide`).
//! Boundary: key extraction only looks at the top level of a filter; every
//! other conjunct becomes a server-side or client-side remainder.

use crate::{
    filter::{FieldFilter, FilterOp, SearchFilter},
    model::{FieldKind, StorageMeta},
    pushdown::{Conversion, ConverterChain, FilterConverter, NativeCondition},
    value::Value,
};
use std::{collections::BTreeSet, fmt::Write as _};

///
/// WideCompare
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WideCompare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl WideCompare {
    const fn from_op(op: FilterOp) -> Option<Self> {
        match op {
            FilterOp::Eq => Some(Self::Eq),
            FilterOp::Ne => Some(Self::Ne),
            FilterOp::Lt => Some(Self::Lt),
            FilterOp::Lte => Some(Self::Le),
            FilterOp::Gt => Some(Self::Gt),
            FilterOp::Gte => Some(Self::Ge),
            _ => None,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

///
/// WideCondition
///
/// Condition-expression tree in the usual wide-column vocabulary.
/// Comparisons never match a missing attribute or a value of another type.
///

#[derive(Clone, Debug, PartialEq)]
pub enum WideCondition {
    Compare {
        attr: String,
        op: WideCompare,
        value: Value,
    },
    BeginsWith {
        attr: String,
        prefix: String,
    },
    Contains {
        attr: String,
        needle: String,
    },
    In {
        attr: String,
        values: Vec<Value>,
    },
    /// `attribute_exists` / `attribute_not_exists`
    Exists {
        attr: String,
        exists: bool,
    },
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
}

impl NativeCondition for WideCondition {
    fn all(parts: Vec<Self>) -> Self {
        Self::And(parts)
    }

    fn any(parts: Vec<Self>) -> Self {
        Self::Or(parts)
    }

    fn negate(self) -> Self {
        match self {
            Self::Exists { attr, exists } => Self::Exists {
                attr,
                exists: !exists,
            },
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    fn constant(_: bool) -> Option<Self> {
        None
    }
}

///
/// RenderedCondition
/// Expression text with `#nN` name and `:vN` value placeholders.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedCondition {
    pub expression: String,
    pub names: Vec<String>,
    pub values: Vec<Value>,
}

impl WideCondition {
    #[must_use]
    pub fn render(&self) -> RenderedCondition {
        let mut out = RenderedCondition::default();
        let expression = render_into(self, &mut out);
        out.expression = expression;
        out
    }
}

fn render_into(condition: &WideCondition, out: &mut RenderedCondition) -> String {
    fn name(out: &mut RenderedCondition, attr: &str) -> String {
        let idx = match out.names.iter().position(|existing| existing == attr) {
            Some(idx) => idx,
            None => {
                out.names.push(attr.to_string());
                out.names.len() - 1
            }
        };
        format!("#n{idx}")
    }
    fn value(out: &mut RenderedCondition, value: Value) -> String {
        out.values.push(value);
        format!(":v{}", out.values.len() - 1)
    }
    fn join(out: &mut RenderedCondition, parts: &[WideCondition], glue: &str) -> String {
        let rendered: Vec<String> = parts.iter().map(|part| render_into(part, out)).collect();
        format!("({})", rendered.join(glue))
    }

    match condition {
        WideCondition::Compare { attr, op, value: v } => {
            let n = name(out, attr);
            let v = value(out, v.clone());
            format!("{n} {} {v}", op.symbol())
        }
        WideCondition::BeginsWith { attr, prefix } => {
            let n = name(out, attr);
            let v = value(out, Value::Text(prefix.clone()));
            format!("begins_with({n}, {v})")
        }
        WideCondition::Contains { attr, needle } => {
            let n = name(out, attr);
            let v = value(out, Value::Text(needle.clone()));
            format!("contains({n}, {v})")
        }
        WideCondition::In { attr, values } => {
            let n = name(out, attr);
            let mut text = format!("{n} IN (");
            for (idx, item) in values.iter().enumerate() {
                if idx > 0 {
                    text.push_str(", ");
                }
                let v = value(out, item.clone());
                let _ = write!(text, "{v}");
            }
            text.push(')');
            text
        }
        WideCondition::Exists { attr, exists } => {
            let n = name(out, attr);
            if *exists {
                format!("attribute_exists({n})")
            } else {
                format!("attribute_not_exists({n})")
            }
        }
        WideCondition::And(parts) => join(out, parts, " AND "),
        WideCondition::Or(parts) => join(out, parts, " OR "),
        WideCondition::Not(inner) => format!("NOT {}", render_into(inner, out)),
    }
}

///
/// WideScope
/// Attributes the server can see; `None` means every attribute.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WideScope {
    pub projected: Option<BTreeSet<String>>,
}

impl WideScope {
    #[must_use]
    pub const fn all_attributes() -> Self {
        Self { projected: None }
    }

    pub fn keys_only<I, S>(attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            projected: Some(attrs.into_iter().map(Into::into).collect()),
        }
    }

    fn sees(&self, attr: &str) -> bool {
        self.projected
            .as_ref()
            .is_none_or(|projected| projected.contains(attr))
    }
}

pub type WideConverterChain = ConverterChain<WideScope, WideCondition>;

/// Structural converters plus every wide-column leaf converter.
#[must_use]
pub fn wide_converters() -> WideConverterChain {
    ConverterChain::structural()
        .with(NullPresence)
        .with(AttributeComparison)
        .with(TextMatch)
        .with(Membership)
}

fn visible_field<'a>(
    filter: &'a SearchFilter,
    meta: &StorageMeta,
    scope: &WideScope,
) -> Option<(&'a FieldFilter, FieldKind)> {
    let SearchFilter::Field(field) = filter else {
        return None;
    };
    let kind = meta.field(&field.name)?.kind();
    if kind == FieldKind::Json || !scope.sees(&field.name) {
        return None;
    }

    Some((field, kind))
}

///
/// NullPresence
///

struct NullPresence;

impl FilterConverter<WideScope, WideCondition> for NullPresence {
    fn priority(&self) -> i32 {
        30
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        scope: &WideScope,
        _: &WideConverterChain,
    ) -> Option<Conversion<WideCondition>> {
        let (field, _) = visible_field(filter, meta, scope)?;
        if !field.value.is_null() {
            return None;
        }

        let exists = match field.op {
            FilterOp::Eq => false,
            FilterOp::Ne => true,
            _ => return None,
        };

        Some(Conversion::exact(WideCondition::Exists {
            attr: field.name.clone(),
            exists,
        }))
    }
}

///
/// AttributeComparison
///

struct AttributeComparison;

impl FilterConverter<WideScope, WideCondition> for AttributeComparison {
    fn priority(&self) -> i32 {
        10
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        scope: &WideScope,
        _: &WideConverterChain,
    ) -> Option<Conversion<WideCondition>> {
        let (field, _) = visible_field(filter, meta, scope)?;
        let op = WideCompare::from_op(field.op)?;
        if field.value.is_null() || field.value.as_list().is_some() {
            return None;
        }

        Some(Conversion::exact(WideCondition::Compare {
            attr: field.name.clone(),
            op,
            value: field.value.clone(),
        }))
    }
}

///
/// TextMatch
/// `contains` and `begins_with` on string attributes; suffixes never push down.
///

struct TextMatch;

impl FilterConverter<WideScope, WideCondition> for TextMatch {
    fn priority(&self) -> i32 {
        10
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        scope: &WideScope,
        _: &WideConverterChain,
    ) -> Option<Conversion<WideCondition>> {
        let (field, kind) = visible_field(filter, meta, scope)?;
        if kind != FieldKind::Text || !matches!(field.op, FilterOp::Contains | FilterOp::StartsWith)
        {
            return None;
        }

        let operand = field.value.coerce_text()?;
        let attr = field.name.clone();
        let condition = if operand.is_empty() {
            WideCondition::Exists { attr, exists: true }
        } else if field.op == FilterOp::Contains {
            WideCondition::Contains {
                attr,
                needle: operand,
            }
        } else {
            WideCondition::BeginsWith {
                attr,
                prefix: operand,
            }
        };

        Some(Conversion::exact(condition))
    }
}

///
/// Membership
///

struct Membership;

impl FilterConverter<WideScope, WideCondition> for Membership {
    fn priority(&self) -> i32 {
        10
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        scope: &WideScope,
        _: &WideConverterChain,
    ) -> Option<Conversion<WideCondition>> {
        let (field, _) = visible_field(filter, meta, scope)?;
        if field.op != FilterOp::OneOf {
            return None;
        }
        let options = field.value.as_list()?;

        let attr = field.name.clone();
        let mut parts = Vec::new();
        if options.iter().any(Value::is_null) {
            parts.push(WideCondition::Exists {
                attr: attr.clone(),
                exists: false,
            });
        }
        let values: Vec<Value> = options.iter().filter(|v| !v.is_null()).cloned().collect();
        if !values.is_empty() {
            parts.push(WideCondition::In { attr, values });
        }

        match parts.len() {
            0 => None,
            1 => parts.pop().map(Conversion::exact),
            _ => Some(Conversion::exact(WideCondition::Or(parts))),
        }
    }
}

///
/// WideIndex
///
/// The table's own key (`name: None`) or a secondary index.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WideIndex {
    pub name: Option<String>,
    pub partition_key: String,
    pub sort_key: Option<String>,
    pub projects_all: bool,
}

impl WideIndex {
    pub fn table(partition_key: impl Into<String>, sort_key: Option<String>) -> Self {
        Self {
            name: None,
            partition_key: partition_key.into(),
            sort_key,
            projects_all: true,
        }
    }

    pub fn secondary(
        name: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: Option<String>,
        projects_all: bool,
    ) -> Self {
        Self {
            name: Some(name.into()),
            partition_key: partition_key.into(),
            sort_key,
            projects_all,
        }
    }
}

///
/// SortKeyCondition
///

#[derive(Clone, Debug, PartialEq)]
pub enum SortKeyCondition {
    Compare(WideCompare, Value),
    BeginsWith(String),
}

///
/// KeyCondition
///

#[derive(Clone, Debug, PartialEq)]
pub struct KeyCondition {
    pub partition_key: String,
    pub partition_value: Value,
    pub sort: Option<(String, SortKeyCondition)>,
}

///
/// KeyPlan
/// Chosen index (position in the candidate list), its key condition, and
/// the part of the filter the key condition does not cover.
///

#[derive(Clone, Debug, PartialEq)]
pub struct KeyPlan {
    pub index: usize,
    pub key: KeyCondition,
    pub remainder: SearchFilter,
}

/// Pick the first index whose partition key has a top-level equality.
///
/// `indexes` lists the table key first, then secondary indexes in
/// declaration order.
#[must_use]
pub fn select_index(filter: &SearchFilter, meta: &StorageMeta, indexes: &[WideIndex]) -> Option<KeyPlan> {
    let conjuncts: &[SearchFilter] = match filter {
        SearchFilter::And(and) => and.filters(),
        SearchFilter::Field(_) => std::slice::from_ref(filter),
        _ => return None,
    };

    indexes.iter().enumerate().find_map(|(idx, index)| {
        let pk_at = conjuncts
            .iter()
            .position(|c| partition_equality(c, &index.partition_key))?;
        let SearchFilter::Field(pk) = &conjuncts[pk_at] else {
            return None;
        };

        let sort = index.sort_key.as_ref().and_then(|sort_key| {
            conjuncts.iter().enumerate().find_map(|(at, c)| {
                (at != pk_at)
                    .then(|| sort_condition(c, sort_key, meta))
                    .flatten()
                    .map(|cond| (at, sort_key.clone(), cond))
            })
        });

        let consumed: Vec<usize> = std::iter::once(pk_at)
            .chain(sort.as_ref().map(|(at, _, _)| *at))
            .collect();
        let remainder = SearchFilter::and(
            conjuncts
                .iter()
                .enumerate()
                .filter(|(at, _)| !consumed.contains(at))
                .map(|(_, c)| c.clone()),
        );

        Some(KeyPlan {
            index: idx,
            key: KeyCondition {
                partition_key: index.partition_key.clone(),
                partition_value: pk.value.clone(),
                sort: sort.map(|(_, name, cond)| (name, cond)),
            },
            remainder,
        })
    })
}

fn partition_equality(filter: &SearchFilter, partition_key: &str) -> bool {
    matches!(
        filter,
        SearchFilter::Field(FieldFilter { name, op: FilterOp::Eq, value })
            if name == partition_key && !value.is_null() && value.as_list().is_none()
    )
}

fn sort_condition(filter: &SearchFilter, sort_key: &str, meta: &StorageMeta) -> Option<SortKeyCondition> {
    let SearchFilter::Field(field) = filter else {
        return None;
    };
    if field.name != sort_key || field.value.is_null() || field.value.as_list().is_some() {
        return None;
    }

    match field.op {
        FilterOp::StartsWith => {
            let is_text = meta
                .field(sort_key)
                .is_some_and(|f| f.kind() == FieldKind::Text);
            match &field.value {
                Value::Text(prefix) if is_text => {
                    Some(SortKeyCondition::BeginsWith(prefix.clone()))
                }
                _ => None,
            }
        }
        op => WideCompare::from_op(op)
            .filter(|op| *op != WideCompare::Ne)
            .map(|op| SortKeyCondition::Compare(op, field.value.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, KeyConfig};

    fn meta() -> StorageMeta {
        StorageMeta::builder("event")
            .field(Field::new("tenant", FieldKind::Text))
            .field(Field::new("seq", FieldKind::Int))
            .field(Field::new("kind", FieldKind::Text))
            .field(Field::new("title", FieldKind::Text))
            .key(KeyConfig::composite(["tenant", "seq"], '#'))
            .build()
            .expect("meta should build")
    }

    fn indexes() -> Vec<WideIndex> {
        vec![
            WideIndex::table("tenant", Some("seq".into())),
            WideIndex::secondary("by_kind", "kind", None, false),
        ]
    }

    #[test]
    fn partition_and_sort_key_are_extracted_from_top_level_and() {
        let filter = SearchFilter::eq("tenant", "t1")
            & SearchFilter::gte("seq", 10)
            & SearchFilter::contains("title", "x");
        let plan = select_index(&filter, &meta(), &indexes()).expect("table key should match");

        assert_eq!(plan.index, 0);
        assert_eq!(
            plan.key.sort,
            Some((
                "seq".into(),
                SortKeyCondition::Compare(WideCompare::Ge, Value::Int(10))
            ))
        );
        assert_eq!(plan.remainder, SearchFilter::contains("title", "x"));
    }

    #[test]
    fn secondary_index_is_used_when_table_key_is_absent() {
        let filter = SearchFilter::eq("kind", "login") & SearchFilter::eq("title", "a");
        let plan = select_index(&filter, &meta(), &indexes()).expect("index should match");

        assert_eq!(plan.index, 1);
        assert_eq!(plan.key.sort, None);
        assert_eq!(plan.remainder, SearchFilter::eq("title", "a"));
    }

    #[test]
    fn equality_below_top_level_does_not_select_an_index() {
        let filter = SearchFilter::eq("tenant", "t1") | SearchFilter::eq("tenant", "t2");

        assert_eq!(select_index(&filter, &meta(), &indexes()), None);
    }

    #[test]
    fn keys_only_scope_declines_unprojected_attributes() {
        let scope = WideScope::keys_only(["tenant", "seq", "kind"]);
        let filter = SearchFilter::gt("seq", 1) & SearchFilter::eq("title", "a");
        let conversion = wide_converters().convert(&filter, &meta(), &scope);

        assert!(!conversion.handled);
        assert_eq!(
            conversion.condition,
            Some(WideCondition::Compare {
                attr: "seq".into(),
                op: WideCompare::Gt,
                value: Value::Int(1),
            })
        );
    }

    #[test]
    fn suffix_and_query_never_push_down() {
        let chain = wide_converters();
        let scope = WideScope::all_attributes();

        assert_eq!(
            chain.convert(&SearchFilter::ends_with("title", "x"), &meta(), &scope),
            Conversion::unconverted()
        );
        assert_eq!(
            chain.convert(&SearchFilter::query("x"), &meta(), &scope),
            Conversion::unconverted()
        );
    }

    #[test]
    fn render_uses_placeholders() {
        let condition = WideCondition::And(vec![
            WideCondition::Compare {
                attr: "seq".into(),
                op: WideCompare::Gt,
                value: Value::Int(1),
            },
            WideCondition::Not(Box::new(WideCondition::BeginsWith {
                attr: "title".into(),
                prefix: "a".into(),
            })),
        ]);
        let rendered = condition.render();

        assert_eq!(rendered.expression, "(#n0 > :v0 AND NOT begins_with(#n1, :v1))");
        assert_eq!(rendered.names, vec!["seq".to_string(), "title".to_string()]);
        assert_eq!(rendered.values, vec![Value::Int(1), Value::from("a")]);
    }
}
