//! # Query Plan Vocabulary
//!
//! The compiled form of a search string. The compiler (in `services`)
//! produces these values; storage adapters execute them. Keeping the
//! types here lets both sides of the port speak them without either
//! depending on the other.

use serde::{Deserialize, Serialize};

use crate::models::Rating;

/// A numeric comparison parsed from a metatag value such as `>5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericCmp {
    Eq(i64),
    Gt(i64),
    Ge(i64),
    Lt(i64),
    Le(i64),
}

impl NumericCmp {
    pub fn matches(&self, value: i64) -> bool {
        match *self {
            Self::Eq(n) => value == n,
            Self::Gt(n) => value > n,
            Self::Ge(n) => value >= n,
            Self::Lt(n) => value < n,
            Self::Le(n) => value <= n,
        }
    }
}

/// Which lifecycle states a query should see.
///
/// The compiler appends `Active` when the search string carries no
/// `status:` token, so soft-deleted posts stay hidden by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    Active,
    Pending,
    Flagged,
    Deleted,
    Any,
}

/// One AND-term of a compiled query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PostPredicate {
    /// Post carries exactly this tag.
    HasTag(String),
    /// Post carries some tag matching this glob pattern (`*` = zero or
    /// more characters).
    MatchesPattern(String),
    /// Logical inversion of the inner predicate.
    Not(Box<PostPredicate>),
    IdCompare(NumericCmp),
    FavoritedBy(String),
    InPool(String),
    UploadedBy(String),
    /// OR-of-equality over candidate digests.
    Md5In(Vec<String>),
    SourceContains(String),
    RatingIs(Rating),
    StatusIs(StatusFilter),
}

/// Ordering directive. Only the last `order:` token of a query wins.
///
/// Non-id orders tie-break by descending id so result order stays stable
/// when the primary key compares equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PostOrder {
    #[default]
    IdDesc,
    IdAsc,
    MpixelsDesc,
    MpixelsAsc,
    LandscapeFirst,
    PortraitFirst,
    ScoreDesc,
    ScoreAsc,
}

/// The complete compiled query: AND-combined filters plus one ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub filters: Vec<PostPredicate>,
    pub order: PostOrder,
}

/// Offset pagination window, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(number: u32, limit: u32) -> Self {
        Self {
            number: number.max(1),
            limit,
        }
    }

    pub fn offset(&self) -> usize {
        (self.number as usize - 1) * self.limit as usize
    }
}
