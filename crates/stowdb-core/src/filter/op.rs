use std::{fmt, str::FromStr};
use thiserror::Error as ThisError;

///
/// FilterOp
///
/// Comparison operator of a field filter.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    OneOf,
}

impl FilterOp {
    pub const ALL: [Self; 10] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::OneOf,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::OneOf => "oneof",
        }
    }

    /// Operators that coerce both operands to text.
    #[must_use]
    pub const fn is_text_op(self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith | Self::EndsWith)
    }

    /// Operators that need an ordering between operands.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Eq => 0x01,
            Self::Ne => 0x02,
            Self::Gt => 0x03,
            Self::Gte => 0x04,
            Self::Lt => 0x05,
            Self::Lte => 0x06,
            Self::Contains => 0x07,
            Self::StartsWith => 0x08,
            Self::EndsWith => 0x09,
            Self::OneOf => 0x0a,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

///
/// UnknownFilterOp
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("unknown filter operator '{0}'")]
pub struct UnknownFilterOp(pub String);

impl FromStr for FilterOp {
    type Err = UnknownFilterOp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownFilterOp(s.to_string()))
    }
}
