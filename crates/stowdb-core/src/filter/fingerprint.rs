use crate::{filter::SearchFilter, value::Value};
use sha2::{Digest, Sha256};

impl SearchFilter {
    /// Feed a deterministic encoding of this filter into `hasher`.
    pub fn fingerprint(&self, hasher: &mut Sha256) {
        hash_filter(hasher, self);
    }
}

/// Hash filter structure into a fingerprint stream.
pub(crate) fn hash_filter(hasher: &mut Sha256, filter: &SearchFilter) {
    match filter {
        SearchFilter::IncludeAll => write_tag(hasher, 0x21),
        SearchFilter::ExcludeAll => write_tag(hasher, 0x22),
        SearchFilter::And(and) => {
            write_tag(hasher, 0x23);
            write_len_u32(hasher, and.filters().len());
            for child in and.filters() {
                hash_filter(hasher, child);
            }
        }
        SearchFilter::Or(or) => {
            write_tag(hasher, 0x24);
            write_len_u32(hasher, or.filters().len());
            for child in or.filters() {
                hash_filter(hasher, child);
            }
        }
        SearchFilter::Not(not) => {
            write_tag(hasher, 0x25);
            hash_filter(hasher, not.inner());
        }
        SearchFilter::Field(field) => {
            write_tag(hasher, 0x26);
            write_str(hasher, &field.name);
            write_tag(hasher, field.op.tag());
            write_value(hasher, &field.value);
        }
        SearchFilter::Query(query) => {
            write_tag(hasher, 0x27);
            write_str(hasher, &query.text);
        }
    }
}

///
/// Encode one value (tag + payload) into the fingerprint stream.
///

pub(crate) fn write_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => write_tag(hasher, 0x40),
        Value::Bool(b) => {
            write_tag(hasher, 0x41);
            write_tag(hasher, u8::from(*b));
        }
        Value::Int(n) => {
            write_tag(hasher, 0x42);
            hasher.update(n.to_be_bytes());
        }
        Value::Float(f) => {
            write_tag(hasher, 0x43);
            hasher.update(f.to_bits().to_be_bytes());
        }
        Value::Text(text) => {
            write_tag(hasher, 0x44);
            write_str(hasher, text);
        }
        Value::Blob(bytes) => {
            write_tag(hasher, 0x45);
            write_len_u32(hasher, bytes.len());
            hasher.update(bytes);
        }
        Value::Timestamp(ts) => {
            write_tag(hasher, 0x46);
            hasher.update(ts.timestamp().to_be_bytes());
            hasher.update(ts.timestamp_subsec_nanos().to_be_bytes());
        }
        Value::Uuid(id) => {
            write_tag(hasher, 0x47);
            hasher.update(id.as_bytes());
        }
        Value::Json(json) => {
            write_tag(hasher, 0x48);
            write_str(hasher, &json.to_string());
        }
        Value::List(items) => {
            write_tag(hasher, 0x49);
            write_len_u32(hasher, items.len());
            for item in items {
                write_value(hasher, item);
            }
        }
    }
}

///
/// Encode one string with length prefix into the fingerprint stream.
///

pub(crate) fn write_str(hasher: &mut Sha256, value: &str) {
    write_len_u32(hasher, value.len());
    hasher.update(value.as_bytes());
}

/// Encode a platform-sized length as u32 with deterministic saturation.
fn write_len_u32(hasher: &mut Sha256, len: usize) {
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    hasher.update(len.to_be_bytes());
}

pub(crate) fn write_tag(hasher: &mut Sha256, tag: u8) {
    hasher.update([tag]);
}
