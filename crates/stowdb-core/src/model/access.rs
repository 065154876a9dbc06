use crate::error::Operation;
use std::ops::{BitAnd, BitOr};

///
/// StorageAccess
///
/// Verb-level grants for one storage view.
/// `&` keeps the most restrictive grant; `|` keeps the most permissive.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StorageAccess {
    pub creatable: bool,
    pub readable: bool,
    pub updatable: bool,
    pub deletable: bool,
    pub searchable: bool,
}

impl StorageAccess {
    pub const ALL: Self = Self::uniform(true);
    pub const NONE: Self = Self::uniform(false);
    pub const READ_ONLY: Self = Self {
        creatable: false,
        readable: true,
        updatable: false,
        deletable: false,
        searchable: true,
    };

    const fn uniform(flag: bool) -> Self {
        Self {
            creatable: flag,
            readable: flag,
            updatable: flag,
            deletable: flag,
            searchable: flag,
        }
    }

    #[must_use]
    pub const fn allows(&self, operation: Operation) -> bool {
        match operation {
            Operation::Create => self.creatable,
            Operation::Read => self.readable,
            Operation::Update => self.updatable,
            Operation::Delete => self.deletable,
            Operation::Search => self.searchable,
        }
    }
}

impl Default for StorageAccess {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitAnd for StorageAccess {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self {
            creatable: self.creatable && rhs.creatable,
            readable: self.readable && rhs.readable,
            updatable: self.updatable && rhs.updatable,
            deletable: self.deletable && rhs.deletable,
            searchable: self.searchable && rhs.searchable,
        }
    }
}

impl BitOr for StorageAccess {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            creatable: self.creatable || rhs.creatable,
            readable: self.readable || rhs.readable,
            updatable: self.updatable || rhs.updatable,
            deletable: self.deletable || rhs.deletable,
            searchable: self.searchable || rhs.searchable,
        }
    }
}
