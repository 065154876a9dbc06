//! Module: store::page
//! Responsibility: the opaque page-key codec and in-memory page slicing.
//! Does not own: backend cursor state (stores choose the position variant).
//! Boundary: tokens are hex(CBOR(PageKey)); decoding is bounded and panic-free.

use crate::{
    error::StoreError,
    filter::{SearchFilter, hash_filter},
    order::SearchOrder,
    record::Record,
    store::ResultSet,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt::Write as _,
    panic::{AssertUnwindSafe, catch_unwind},
};
use thiserror::Error as ThisError;

// Decode bound for untrusted page-key input.
const MAX_PAGE_KEY_HEX_LEN: usize = 16 * 1024;

///
/// PageKeyError
///

#[derive(Debug, Eq, PartialEq, ThisError)]
pub enum PageKeyError {
    #[error("page key is empty")]
    Empty,

    #[error("page key exceeds max length: {len} hex chars (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("page key must have an even number of hex characters")]
    OddLength,

    #[error("invalid hex character at position {position}")]
    InvalidHex { position: usize },

    #[error("page key payload is malformed: {0}")]
    Payload(String),

    #[error("page key was issued for a different filter or order")]
    SignatureMismatch,

    #[error("page key refers to '{key}', which is no longer in the result")]
    KeyNotFound { key: String },

    #[error("page key position is not valid for this store")]
    WrongPosition,
}

impl From<PageKeyError> for StoreError {
    fn from(err: PageKeyError) -> Self {
        tracing::warn!(error = %err, "rejected page key");
        Self::invalid_page_key(err.to_string())
    }
}

///
/// PagePosition
/// Where the next page resumes in the backend's unfiltered order.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum PagePosition {
    /// Rows of the backend's ordered scan already consumed.
    Offset(u64),
    /// Resume after the record with this key.
    AfterKey(String),
    /// Backend-native exclusive start key.
    Native(Record),
}

///
/// PageKey
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PageKey {
    pub signature: u64,
    pub position: PagePosition,
}

impl PageKey {
    #[must_use]
    pub fn new(filter: &SearchFilter, order: &SearchOrder, position: PagePosition) -> Self {
        Self {
            signature: signature(filter, order),
            position,
        }
    }

    /// Encode as an opaque token.
    pub fn encode(&self) -> Result<String, StoreError> {
        let bytes = serde_cbor::to_vec(self)
            .map_err(|err| StoreError::invalid_page_key(format!("encode failed: {err}")))?;

        Ok(encode_hex(&bytes))
    }

    /// Decode `token` and check it was issued for `(filter, order)`.
    pub fn decode(token: &str, filter: &SearchFilter, order: &SearchOrder) -> Result<Self, PageKeyError> {
        let bytes = decode_hex(token)?;
        let key: Self = match catch_unwind(AssertUnwindSafe(|| serde_cbor::from_slice(&bytes))) {
            Ok(Ok(key)) => key,
            Ok(Err(err)) => return Err(PageKeyError::Payload(err.to_string())),
            Err(_) => return Err(PageKeyError::Payload("panic during decode".into())),
        };
        if key.signature != signature(filter, order) {
            return Err(PageKeyError::SignatureMismatch);
        }

        Ok(key)
    }

    /// Decode an optional token, expecting an offset position.
    pub fn decode_offset(
        token: Option<&str>,
        filter: &SearchFilter,
        order: &SearchOrder,
    ) -> Result<u64, PageKeyError> {
        match token {
            None => Ok(0),
            Some(token) => match Self::decode(token, filter, order)?.position {
                PagePosition::Offset(offset) => Ok(offset),
                _ => Err(PageKeyError::WrongPosition),
            },
        }
    }
}

/// 64-bit prefix of SHA-256 over the filter and order structure.
#[must_use]
pub fn signature(filter: &SearchFilter, order: &SearchOrder) -> u64 {
    let mut hasher = Sha256::new();
    hash_filter(&mut hasher, filter);
    order.fingerprint(&mut hasher);
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

///
/// page_after_key
///
/// Slice an already filtered and sorted sequence into one page, resuming
/// after the record whose key the token names.
///

pub fn page_after_key(
    records: Vec<Record>,
    key_of: impl Fn(&Record) -> Option<String>,
    filter: &SearchFilter,
    order: &SearchOrder,
    page_key: Option<&str>,
    limit: usize,
) -> Result<ResultSet<Record>, StoreError> {
    let start = match page_key {
        None => 0,
        Some(token) => {
            let PagePosition::AfterKey(after) = PageKey::decode(token, filter, order)?.position
            else {
                return Err(PageKeyError::WrongPosition.into());
            };
            records
                .iter()
                .position(|record| key_of(record).as_deref() == Some(after.as_str()))
                .map(|at| at + 1)
                .ok_or(PageKeyError::KeyNotFound { key: after })?
        }
    };

    let total = records.len();
    let end = start.saturating_add(limit).min(total);
    let results: Vec<Record> = records.into_iter().skip(start).take(end - start).collect();

    let next_page_key = match results.last() {
        Some(last) if end < total => {
            let key = key_of(last).ok_or_else(|| StoreError::invalid_page_key("result has no key"))?;
            Some(PageKey::new(filter, order, PagePosition::AfterKey(key)).encode()?)
        }
        _ => None,
    };

    Ok(ResultSet::new(results, next_page_key))
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn decode_hex(token: &str) -> Result<Vec<u8>, PageKeyError> {
    let token = token.trim();

    if token.is_empty() {
        return Err(PageKeyError::Empty);
    }
    if token.len() > MAX_PAGE_KEY_HEX_LEN {
        return Err(PageKeyError::TooLong {
            len: token.len(),
            max: MAX_PAGE_KEY_HEX_LEN,
        });
    }
    if !token.len().is_multiple_of(2) {
        return Err(PageKeyError::OddLength);
    }

    let bytes = token.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for idx in (0..bytes.len()).step_by(2) {
        let hi = hex_nibble(bytes[idx]).ok_or(PageKeyError::InvalidHex { position: idx + 1 })?;
        let lo = hex_nibble(bytes[idx + 1]).ok_or(PageKeyError::InvalidHex { position: idx + 2 })?;
        out.push((hi << 4) | lo);
    }

    Ok(out)
}

const fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(record: &Record) -> Option<String> {
        record.value("id").as_text().map(str::to_string)
    }

    fn records(ids: &[&str]) -> Vec<Record> {
        ids.iter().map(|id| record! { "id" => *id }).collect()
    }

    fn ids(page: &ResultSet<Record>) -> Vec<String> {
        page.results.iter().filter_map(key_of).collect()
    }

    #[test]
    fn decode_rejects_malformed_tokens() {
        let filter = SearchFilter::IncludeAll;
        let order = SearchOrder::none();

        assert_eq!(PageKey::decode("", &filter, &order), Err(PageKeyError::Empty));
        assert_eq!(PageKey::decode("abc", &filter, &order), Err(PageKeyError::OddLength));
        assert_eq!(
            PageKey::decode("zz", &filter, &order),
            Err(PageKeyError::InvalidHex { position: 1 })
        );
        assert!(matches!(
            PageKey::decode("ffff", &filter, &order),
            Err(PageKeyError::Payload(_))
        ));
    }

    #[test]
    fn decode_rejects_keys_from_another_query() {
        let order = SearchOrder::asc("id");
        let token = PageKey::new(&SearchFilter::eq("id", "a"), &order, PagePosition::Offset(3))
            .encode()
            .expect("page key should encode");

        assert_eq!(
            PageKey::decode(&token, &SearchFilter::eq("id", "b"), &order),
            Err(PageKeyError::SignatureMismatch)
        );
        assert_eq!(
            PageKey::decode_offset(Some(&token), &SearchFilter::eq("id", "a"), &order),
            Ok(3)
        );
    }

    #[test]
    fn page_after_key_walks_every_record_once() {
        let filter = SearchFilter::IncludeAll;
        let order = SearchOrder::none();
        let all = records(&["a", "b", "c", "d", "e"]);

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = page_after_key(all.clone(), key_of, &filter, &order, token.as_deref(), 2)
                .expect("page should load");
            seen.extend(ids(&page));
            match page.next_page_key {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn page_after_key_fails_when_anchor_disappears() {
        let filter = SearchFilter::IncludeAll;
        let order = SearchOrder::none();
        let first = page_after_key(records(&["a", "b", "c"]), key_of, &filter, &order, None, 2)
            .expect("first page should load");
        let token = first.next_page_key.expect("more records remain");

        let err = page_after_key(records(&["a", "c"]), key_of, &filter, &order, Some(&token), 2)
            .expect_err("missing anchor must fail");
        assert_eq!(err.code(), "invalid_page_key");
    }
}
