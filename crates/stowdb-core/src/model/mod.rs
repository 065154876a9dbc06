//! Schema vocabulary: fields, key configuration, storage metadata, and
//! verb-level access grants.

mod access;
mod field;
mod key;
mod meta;

pub use access::StorageAccess;
pub use field::{
    CustomTransform, CustomTransformFn, Field, FieldKind, KeyGenerator, WriteKind, WriteTransform,
};
pub use key::KeyConfig;
pub use meta::{CacheControl, StorageMeta, StorageMetaBuilder};
