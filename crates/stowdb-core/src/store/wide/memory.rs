//! Module: store::wide::memory
//! Responsibility: in-process wide-column table used for tests and local runs.
//! Does not own: capacity, throttling, or eventual consistency.
//! Boundary: `limit` bounds the items *evaluated*; the filter runs after it,
//! so a page can come back short or empty while more items remain.

use crate::{
    pushdown::wide::{SortKeyCondition, WideCompare, WideCondition, WideIndex},
    record::Record,
    store::wide::client::{
        ItemPage, MAX_BATCH_GET, MAX_BATCH_WRITE, PutCondition, QueryRequest, ScanRequest,
        TableDescription, WideColumnClient, WideError, WriteRequest,
    },
    value::{Value, canonical_cmp, strict_eq, strict_order_cmp},
};
use parking_lot::RwLock;
use std::{cmp::Ordering, collections::BTreeMap};

///
/// ItemKey
/// Primary-key values in key-schema order, totally ordered.
///

#[derive(Clone, Debug)]
struct ItemKey(Vec<Value>);

impl PartialEq for ItemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ItemKey {}

impl PartialOrd for ItemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            let ord = canonical_cmp(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

///
/// MemoryWideTable
///

pub struct MemoryWideTable {
    description: TableDescription,
    items: RwLock<BTreeMap<ItemKey, Record>>,
}

impl MemoryWideTable {
    pub fn new(partition_key: impl Into<String>, sort_key: Option<&str>) -> Self {
        Self {
            description: TableDescription {
                partition_key: partition_key.into(),
                sort_key: sort_key.map(str::to_string),
                indexes: Vec::new(),
            },
            items: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: WideIndex) -> Self {
        self.description.indexes.push(index);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn item_key(&self, item: &Record) -> Result<ItemKey, WideError> {
        self.description
            .key_attributes()
            .into_iter()
            .map(|attr| match item.get(attr) {
                Some(value) if !value.is_null() && value.as_list().is_none() => Ok(value.clone()),
                _ => Err(WideError::Validation(format!(
                    "missing key attribute '{attr}'"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ItemKey)
    }

    fn resolve_index(&self, index: &WideIndex) -> Result<(), WideError> {
        let known = match &index.name {
            None => *index == self.description.table_index(),
            Some(_) => self.description.indexes.contains(index),
        };
        if known {
            Ok(())
        } else {
            Err(WideError::Validation(format!(
                "unknown index {:?}",
                index.name
            )))
        }
    }

    // Attributes that identify an item's position within `index`.
    fn index_key_attributes<'a>(&'a self, index: &'a WideIndex) -> Vec<&'a str> {
        let mut attrs = self.description.key_attributes();
        for attr in std::iter::once(index.partition_key.as_str()).chain(index.sort_key.as_deref()) {
            if !attrs.contains(&attr) {
                attrs.push(attr);
            }
        }
        attrs
    }

    fn project(item: &Record, attrs: &[&str]) -> Record {
        item.clone().retain_fields(|name| attrs.contains(&name))
    }

    // Evaluate up to `limit` items of an ordered range, then filter.
    fn evaluate(
        ordered: Vec<Record>,
        limit: Option<usize>,
        filter: Option<&WideCondition>,
        key_attrs: &[&str],
        projection: Option<&[&str]>,
    ) -> ItemPage {
        let total = ordered.len();
        let take = limit.unwrap_or(total).min(total);

        let mut items = Vec::new();
        let mut last = None;
        for item in ordered.into_iter().take(take) {
            if filter.is_none_or(|condition| eval(condition, &item)) {
                items.push(match projection {
                    Some(attrs) => Self::project(&item, attrs),
                    None => item.clone(),
                });
            }
            last = Some(item);
        }

        let last_evaluated_key = if take < total {
            last.map(|item| Self::project(&item, key_attrs))
        } else {
            None
        };

        ItemPage {
            items,
            last_evaluated_key,
        }
    }
}

impl WideColumnClient for MemoryWideTable {
    fn describe(&self) -> Result<TableDescription, WideError> {
        Ok(self.description.clone())
    }

    fn get_item(&self, key: &Record) -> Result<Option<Record>, WideError> {
        let key = self.item_key(key)?;
        Ok(self.items.read().get(&key).cloned())
    }

    fn put_item(&self, item: Record, condition: PutCondition) -> Result<(), WideError> {
        let item = strip_nulls(item);
        let key = self.item_key(&item)?;

        let mut items = self.items.write();
        let exists = items.contains_key(&key);
        match condition {
            PutCondition::NotExists if exists => return Err(WideError::ConditionFailed),
            PutCondition::Exists if !exists => return Err(WideError::ConditionFailed),
            _ => {}
        }
        items.insert(key, item);

        Ok(())
    }

    fn delete_item(&self, key: &Record) -> Result<bool, WideError> {
        let key = self.item_key(key)?;
        Ok(self.items.write().remove(&key).is_some())
    }

    fn query(&self, request: &QueryRequest) -> Result<ItemPage, WideError> {
        self.resolve_index(&request.index)?;
        let index = &request.index;
        let key_attrs = self.index_key_attributes(index);

        let position = |item: &Record| -> Result<(Value, ItemKey), WideError> {
            let sort = index
                .sort_key
                .as_deref()
                .map_or(Value::Null, |attr| item.value(attr).clone());
            Ok((sort, self.item_key(item)?))
        };
        let cmp = |a: &(Value, ItemKey), b: &(Value, ItemKey)| {
            canonical_cmp(&a.0, &b.0).then_with(|| a.1.cmp(&b.1))
        };

        let mut matched: Vec<((Value, ItemKey), Record)> = Vec::new();
        for item in self.items.read().values() {
            if !strict_eq(item.value(&request.key.partition_key), &request.key.partition_value) {
                continue;
            }
            if let Some((attr, condition)) = &request.key.sort
                && !sort_matches(item.value(attr), condition)
            {
                continue;
            }
            matched.push((position(item)?, item.clone()));
        }

        matched.sort_by(|a, b| cmp(&a.0, &b.0));
        if !request.scan_forward {
            matched.reverse();
        }
        if let Some(start) = &request.exclusive_start_key {
            let start = position(start)?;
            matched.retain(|(at, _)| {
                let ord = cmp(at, &start);
                if request.scan_forward {
                    ord == Ordering::Greater
                } else {
                    ord == Ordering::Less
                }
            });
        }

        let projection = (!index.projects_all).then_some(key_attrs.as_slice());
        Ok(Self::evaluate(
            matched.into_iter().map(|(_, item)| item).collect(),
            request.limit,
            request.filter.as_ref(),
            &key_attrs,
            projection,
        ))
    }

    fn scan(&self, request: &ScanRequest) -> Result<ItemPage, WideError> {
        let items = self.items.read();
        let ordered: Vec<Record> = match &request.exclusive_start_key {
            None => items.values().cloned().collect(),
            Some(start) => {
                let start = self.item_key(start)?;
                items
                    .range((std::ops::Bound::Excluded(start), std::ops::Bound::Unbounded))
                    .map(|(_, item)| item.clone())
                    .collect()
            }
        };
        drop(items);

        let key_attrs = self.description.key_attributes();
        Ok(Self::evaluate(ordered, request.limit, request.filter.as_ref(), &key_attrs, None))
    }

    fn batch_get(&self, keys: &[Record]) -> Result<Vec<Record>, WideError> {
        if keys.len() > MAX_BATCH_GET {
            return Err(WideError::Validation(format!(
                "too many keys in batch get: {} (max {MAX_BATCH_GET})",
                keys.len()
            )));
        }

        let keys = keys
            .iter()
            .map(|key| self.item_key(key))
            .collect::<Result<Vec<_>, _>>()?;
        let items = self.items.read();

        Ok(keys.iter().filter_map(|key| items.get(key).cloned()).collect())
    }

    fn batch_write(&self, writes: Vec<WriteRequest>) -> Result<Vec<WriteRequest>, WideError> {
        if writes.len() > MAX_BATCH_WRITE {
            return Err(WideError::Validation(format!(
                "too many writes in batch: {} (max {MAX_BATCH_WRITE})",
                writes.len()
            )));
        }

        // validate every key before applying any write
        let mut keyed = Vec::with_capacity(writes.len());
        for write in writes {
            let write = match write {
                WriteRequest::Put(item) => WriteRequest::Put(strip_nulls(item)),
                delete @ WriteRequest::Delete(_) => delete,
            };
            let key = match &write {
                WriteRequest::Put(item) | WriteRequest::Delete(item) => self.item_key(item)?,
            };
            if keyed.iter().any(|(seen, _)| *seen == key) {
                return Err(WideError::Validation("duplicate key in batch write".into()));
            }
            keyed.push((key, write));
        }

        let mut items = self.items.write();
        for (key, write) in keyed {
            match write {
                WriteRequest::Put(item) => {
                    items.insert(key, item);
                }
                WriteRequest::Delete(_) => {
                    items.remove(&key);
                }
            }
        }

        Ok(Vec::new())
    }
}

impl std::fmt::Debug for MemoryWideTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWideTable")
            .field("description", &self.description)
            .field("items", &self.len())
            .finish()
    }
}

fn strip_nulls(mut item: Record) -> Record {
    item.retain(|_, value| !value.is_null());
    item
}

fn sort_matches(value: &Value, condition: &SortKeyCondition) -> bool {
    match condition {
        SortKeyCondition::Compare(op, operand) => compare(value, *op, operand),
        SortKeyCondition::BeginsWith(prefix) => value.as_text().is_some_and(|text| text.starts_with(prefix.as_str())),
    }
}

// Missing attributes and mismatched types never compare.
fn compare(value: &Value, op: WideCompare, operand: &Value) -> bool {
    if value.is_null() {
        return false;
    }
    let Some(ord) = strict_order_cmp(value, operand) else {
        return match (value, operand) {
            (Value::Json(a), Value::Json(b)) => match op {
                WideCompare::Eq => a == b,
                WideCompare::Ne => a != b,
                _ => false,
            },
            _ => false,
        };
    };

    match op {
        WideCompare::Eq => ord == Ordering::Equal,
        WideCompare::Ne => ord != Ordering::Equal,
        WideCompare::Lt => ord == Ordering::Less,
        WideCompare::Le => ord != Ordering::Greater,
        WideCompare::Gt => ord == Ordering::Greater,
        WideCompare::Ge => ord != Ordering::Less,
    }
}

fn eval(condition: &WideCondition, item: &Record) -> bool {
    match condition {
        WideCondition::Compare { attr, op, value } => compare(item.value(attr), *op, value),
        WideCondition::BeginsWith { attr, prefix } => item
            .value(attr)
            .as_text()
            .is_some_and(|text| text.starts_with(prefix.as_str())),
        WideCondition::Contains { attr, needle } => item
            .value(attr)
            .as_text()
            .is_some_and(|text| text.contains(needle.as_str())),
        WideCondition::In { attr, values } => {
            let value = item.value(attr);
            !value.is_null() && values.iter().any(|option| strict_eq(value, option))
        }
        WideCondition::Exists { attr, exists } => item.value(attr).is_null() != *exists,
        WideCondition::And(parts) => parts.iter().all(|part| eval(part, item)),
        WideCondition::Or(parts) => parts.iter().any(|part| eval(part, item)),
        WideCondition::Not(inner) => !eval(inner, item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pushdown::wide::KeyCondition;

    fn table() -> MemoryWideTable {
        let table = MemoryWideTable::new("tenant", Some("seq"))
            .with_index(WideIndex::secondary("by_kind", "kind", None, false));
        for seq in 1..=6 {
            let kind = if seq % 2 == 0 { "even" } else { "odd" };
            table
                .put_item(
                    record! { "tenant" => "t1", "seq" => seq, "kind" => kind, "title" => format!("event {seq}") },
                    PutCondition::Always,
                )
                .expect("seed put should succeed");
        }
        table
    }

    fn query(limit: Option<usize>, filter: Option<WideCondition>) -> QueryRequest {
        QueryRequest {
            index: WideIndex::table("tenant", Some("seq".into())),
            key: KeyCondition {
                partition_key: "tenant".into(),
                partition_value: Value::from("t1"),
                sort: None,
            },
            filter,
            limit,
            exclusive_start_key: None,
            scan_forward: true,
        }
    }

    fn seqs(page: &ItemPage) -> Vec<i64> {
        page.items.iter().filter_map(|item| item.value("seq").as_int()).collect()
    }

    #[test]
    fn limit_applies_before_the_filter() {
        let odd = WideCondition::Compare {
            attr: "kind".into(),
            op: WideCompare::Eq,
            value: Value::from("odd"),
        };
        let page = table().query(&query(Some(2), Some(odd))).expect("query should run");

        assert_eq!(seqs(&page), vec![1]);
        assert_eq!(page.last_evaluated_key, Some(record! { "tenant" => "t1", "seq" => 2 }));
    }

    #[test]
    fn exclusive_start_key_resumes_in_either_direction() {
        let table = table();
        let mut request = query(None, None);
        request.exclusive_start_key = Some(record! { "tenant" => "t1", "seq" => 4 });
        assert_eq!(seqs(&table.query(&request).expect("forward")), vec![5, 6]);

        request.scan_forward = false;
        assert_eq!(seqs(&table.query(&request).expect("backward")), vec![3, 2, 1]);
    }

    #[test]
    fn keys_only_index_projects_key_attributes() {
        let request = QueryRequest {
            index: WideIndex::secondary("by_kind", "kind", None, false),
            key: KeyCondition {
                partition_key: "kind".into(),
                partition_value: Value::from("even"),
                sort: None,
            },
            ..query(None, None)
        };
        let page = table().query(&request).expect("query should run");

        assert_eq!(page.items.len(), 3);
        assert!(page.items.iter().all(|item| !item.contains_key("title")));
    }

    #[test]
    fn conditional_puts_and_null_stripping() {
        let table = MemoryWideTable::new("id", None);
        table
            .put_item(record! { "id" => "a", "note" => Value::Null }, PutCondition::NotExists)
            .expect("first put should succeed");

        assert_eq!(
            table.put_item(record! { "id" => "a" }, PutCondition::NotExists),
            Err(WideError::ConditionFailed)
        );
        assert_eq!(
            table.put_item(record! { "id" => "b" }, PutCondition::Exists),
            Err(WideError::ConditionFailed)
        );
        assert_eq!(
            table.get_item(&record! { "id" => "a" }).expect("get should run"),
            Some(record! { "id" => "a" })
        );
    }

    #[test]
    fn comparisons_skip_missing_and_mismatched_attributes() {
        let item = record! { "n" => 3 };
        let ne = |value: Value| WideCondition::Compare {
            attr: "n".into(),
            op: WideCompare::Ne,
            value,
        };

        assert!(eval(&ne(Value::Int(4)), &item));
        assert!(!eval(&ne(Value::from("x")), &item));
        assert!(!eval(
            &WideCondition::Compare {
                attr: "missing".into(),
                op: WideCompare::Ne,
                value: Value::Int(1),
            },
            &item
        ));
    }
}
