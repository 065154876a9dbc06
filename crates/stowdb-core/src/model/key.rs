//! Module: model::key
//! Responsibility: primary-key configuration and the key-string codec.
//! Boundary: every store addresses records by the string this module produces.

use crate::{
    error::StoreError,
    model::{Field, FieldKind},
    record::Record,
    value::{Value, format_timestamp},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

const ESCAPE: char = '\\';

///
/// KeyConfig
///
/// Which field(s) form the primary key and how they encode to a string.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyConfig {
    Field(String),
    Composite { fields: Vec<String>, separator: char },
}

impl KeyConfig {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn composite<I, S>(fields: I, separator: char) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Composite {
            fields: fields.into_iter().map(Into::into).collect(),
            separator,
        }
    }

    /// Key field names in key order.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Field(name) => vec![name.as_str()],
            Self::Composite { fields, .. } => fields.iter().map(String::as_str).collect(),
        }
    }

    #[must_use]
    pub fn is_key_field(&self, name: &str) -> bool {
        self.fields().contains(&name)
    }

    /// Encode the key of `record`, or `None` when any key part is missing,
    /// null, or not keyable.
    #[must_use]
    pub fn to_key_str(&self, record: &Record) -> Option<String> {
        match self {
            Self::Field(name) => encode_part(record.value(name)),
            Self::Composite { fields, separator } => {
                let mut out = String::new();
                for (idx, name) in fields.iter().enumerate() {
                    if idx > 0 {
                        out.push(*separator);
                    }
                    let part = encode_part(record.value(name))?;
                    escape_into(&mut out, &part, *separator);
                }

                Some(out)
            }
        }
    }

    /// Decode a key string into a record holding only the key fields.
    pub fn from_key_str(&self, key: &str, fields: &[Field]) -> Result<Record, StoreError> {
        let parts = match self {
            Self::Field(name) => vec![(name.as_str(), key.to_string())],
            Self::Composite {
                fields: names,
                separator,
            } => {
                let parts = split_escaped(key, *separator)?;
                if parts.len() != names.len() {
                    return Err(StoreError::invalid_key(
                        key,
                        format!("expected {} parts, found {}", names.len(), parts.len()),
                    ));
                }
                names.iter().map(String::as_str).zip(parts).collect()
            }
        };

        let mut record = Record::new();
        for (name, part) in parts {
            let kind = fields
                .iter()
                .find(|field| field.name() == name)
                .map(Field::kind)
                .ok_or_else(|| StoreError::invalid_key(key, format!("unknown key field '{name}'")))?;
            record.set(name, decode_part(key, &part, kind)?);
        }

        Ok(record)
    }
}

fn encode_part(value: &Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text.clone()),
        Value::Int(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Uuid(id) => Some(id.hyphenated().to_string()),
        Value::Timestamp(ts) => Some(format_timestamp(ts)),
        _ => None,
    }
}

fn decode_part(key: &str, part: &str, kind: FieldKind) -> Result<Value, StoreError> {
    let invalid = |reason: &str| StoreError::invalid_key(key, format!("{reason}: '{part}'"));

    match kind {
        FieldKind::Text => Ok(Value::Text(part.to_string())),
        FieldKind::Int => part
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| invalid("not an int")),
        FieldKind::Bool => match part {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid("not a bool")),
        },
        FieldKind::Uuid => Uuid::parse_str(part)
            .map(Value::Uuid)
            .map_err(|_| invalid("not a uuid")),
        FieldKind::Timestamp => DateTime::parse_from_rfc3339(part)
            .map(|ts| Value::timestamp(ts.with_timezone(&Utc)))
            .map_err(|_| invalid("not an RFC3339 timestamp")),
        FieldKind::Float | FieldKind::Blob | FieldKind::Json => Err(invalid("unkeyable kind")),
    }
}

fn escape_into(out: &mut String, part: &str, separator: char) {
    for ch in part.chars() {
        if ch == separator || ch == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(ch);
    }
}

fn split_escaped(key: &str, separator: char) -> Result<Vec<String>, StoreError> {
    let mut parts = vec![String::new()];
    let mut chars = key.chars();

    while let Some(ch) = chars.next() {
        if ch == ESCAPE {
            let escaped = chars
                .next()
                .ok_or_else(|| StoreError::invalid_key(key, "dangling escape"))?;
            if let Some(last) = parts.last_mut() {
                last.push(escaped);
            }
        } else if ch == separator {
            parts.push(String::new());
        } else if let Some(last) = parts.last_mut() {
            last.push(ch);
        }
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn composite_fields() -> Vec<Field> {
        vec![
            Field::new("tenant", FieldKind::Text),
            Field::new("seq", FieldKind::Int),
        ]
    }

    #[test]
    fn single_field_key_uses_canonical_text() {
        let config = KeyConfig::field("id");
        let record = record! { "id" => 42_i64, "title" => "x" };

        assert_eq!(config.to_key_str(&record).as_deref(), Some("42"));
        assert_eq!(config.to_key_str(&Record::new()), None);
    }

    #[test]
    fn composite_key_escapes_separator_inside_parts() {
        let config = KeyConfig::composite(["tenant", "seq"], '/');
        let record = record! { "tenant" => "a/b\\c", "seq" => 7 };

        let key = config.to_key_str(&record).expect("key should encode");
        assert_eq!(key, "a\\/b\\\\c/7");

        let decoded = config
            .from_key_str(&key, &composite_fields())
            .expect("key should decode");
        assert_eq!(decoded, record! { "tenant" => "a/b\\c", "seq" => 7 });
    }

    #[test]
    fn composite_key_rejects_wrong_arity() {
        let config = KeyConfig::composite(["tenant", "seq"], '/');
        let err = config
            .from_key_str("only-one", &composite_fields())
            .expect_err("arity mismatch must fail");

        assert_eq!(err.code(), "invalid_key");
    }

    #[test]
    fn int_key_rejects_non_numeric_text() {
        let config = KeyConfig::field("seq");
        let err = config
            .from_key_str("seven", &composite_fields())
            .expect_err("non-numeric int key must fail");

        assert!(err.to_string().contains("not an int"), "{err}");
    }

    proptest! {
        #[test]
        fn composite_key_round_trips(tenant in ".{0,12}", seq in any::<i64>()) {
            let config = KeyConfig::composite(["tenant", "seq"], '|');
            let fields = composite_fields();
            let key = config
                .to_key_str(&record! { "tenant" => tenant, "seq" => seq })
                .expect("key should encode");

            let decoded = config.from_key_str(&key, &fields).expect("key should decode");
            prop_assert_eq!(config.to_key_str(&decoded), Some(key));
        }

        #[test]
        fn uuid_key_round_trips(raw in any::<u128>()) {
            let config = KeyConfig::field("id");
            let fields = vec![Field::new("id", FieldKind::Uuid)];
            let key = Uuid::from_u128(raw).hyphenated().to_string();

            let decoded = config.from_key_str(&key, &fields).expect("key should decode");
            prop_assert_eq!(config.to_key_str(&decoded), Some(key));
        }
    }
}
