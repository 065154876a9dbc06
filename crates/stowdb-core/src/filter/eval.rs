use crate::{
    filter::{FieldFilter, FilterOp, QueryFilter, SearchFilter},
    model::{Field, FieldKind},
    record::Record,
    value::{Value, strict_eq, strict_order_cmp},
};
use std::cmp::Ordering;

impl SearchFilter {
    /// Evaluate this filter against one record in memory.
    ///
    /// Never fails: a type-mismatched comparison is simply `false`.
    #[must_use]
    pub fn matches(&self, record: &Record, fields: &[Field]) -> bool {
        match self {
            Self::IncludeAll => true,
            Self::ExcludeAll => false,
            Self::Field(filter) => filter.matches(record.value(&filter.name)),
            Self::And(and) => and.filters().iter().all(|f| f.matches(record, fields)),
            Self::Or(or) => or.filters().iter().any(|f| f.matches(record, fields)),
            Self::Not(not) => !not.inner().matches(record, fields),
            Self::Query(query) => query.matches(record, fields),
        }
    }
}

impl FieldFilter {
    /// Evaluate this comparison against the record's value for the field.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self.op {
            FilterOp::Eq => strict_eq(value, &self.value),
            FilterOp::Ne => match (value, &self.value) {
                (Value::Null, _) => false,
                (_, Value::Null) => true,
                _ => comparable(value, &self.value) && !strict_eq(value, &self.value),
            },
            FilterOp::Gt => strict_order_cmp(value, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                strict_order_cmp(value, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => strict_order_cmp(value, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                strict_order_cmp(value, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Contains => text_pair(value, &self.value).is_some_and(|(v, f)| v.contains(&f)),
            FilterOp::StartsWith => {
                text_pair(value, &self.value).is_some_and(|(v, f)| v.starts_with(&f))
            }
            FilterOp::EndsWith => text_pair(value, &self.value).is_some_and(|(v, f)| v.ends_with(&f)),
            FilterOp::OneOf => self
                .value
                .as_list()
                .is_some_and(|options| options.iter().any(|option| strict_eq(value, option))),
        }
    }
}

impl QueryFilter {
    #[must_use]
    pub fn matches(&self, record: &Record, fields: &[Field]) -> bool {
        if self.text.is_empty() {
            return true;
        }

        let needle = self.text.to_ascii_lowercase();
        fields
            .iter()
            .filter(|field| field.readable && field.kind() == FieldKind::Text)
            .any(|field| {
                record
                    .value(field.name())
                    .as_text()
                    .is_some_and(|text| text.to_ascii_lowercase().contains(&needle))
            })
    }
}

fn comparable(left: &Value, right: &Value) -> bool {
    matches!((left, right), (Value::Json(_), Value::Json(_)))
        || strict_order_cmp(left, right).is_some()
}

fn text_pair(value: &Value, operand: &Value) -> Option<(String, String)> {
    Some((value.coerce_text()?, operand.coerce_text()?))
}
