//! # Domain Models
//!
//! These structs represent the core entities of the catalog.
//! Posts and tags carry `i64` identities (the search language compares
//! post ids numerically); version snapshots use UUID v7 for time-ordered,
//! globally unique identification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a tag, used for the cached per-post breakdown counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    General,
    Artist,
    Copyright,
    Character,
}

impl TagCategory {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "general" => Some(Self::General),
            "artist" => Some(Self::Artist),
            "copyright" => Some(Self::Copyright),
            "character" => Some(Self::Character),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Artist => "artist",
            Self::Copyright => "copyright",
            Self::Character => "character",
        }
    }
}

/// Content rating of a post. Accepts the single-letter form used in
/// search strings (`s`, `q`, `e`) as well as the full word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Safe,
    Questionable,
    Explicit,
}

impl Rating {
    pub fn parse(value: &str) -> Option<Self> {
        match value.chars().next() {
            Some('s') | Some('S') => Some(Self::Safe),
            Some('q') | Some('Q') => Some(Self::Questionable),
            Some('e') | Some('E') => Some(Self::Explicit),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Safe => 's',
            Self::Questionable => 'q',
            Self::Explicit => 'e',
        }
    }
}

/// A media item and its denormalized tag/relationship state.
///
/// `tag_string` is the canonical space-separated tag list, sorted
/// lexicographically on every save so tests and diffs see a deterministic
/// order. The `tag_count_*` fields and the three display strings are
/// materialized views: they are only ever recomputed inside the same
/// store commit that mutates their source records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub tag_string: String,
    pub tag_count: i64,
    pub tag_count_general: i64,
    pub tag_count_artist: i64,
    pub tag_count_copyright: i64,
    pub tag_count_character: i64,
    /// Self-referential, at most one level deep: a post with a parent can
    /// never itself be a parent.
    pub parent_id: Option<i64>,
    pub has_children: bool,
    pub is_pending: bool,
    pub is_flagged: bool,
    pub is_deleted: bool,
    /// Recorded once, by the first approval.
    pub approver_id: Option<i64>,
    pub uploader_id: i64,
    pub uploader_name: String,
    pub score: i64,
    pub rating: Rating,
    pub source: String,
    pub md5: String,
    pub width: i64,
    pub height: i64,
    /// `fav:<user>` tokens, space-joined.
    pub fav_string: String,
    /// `pool:<name>` tokens, space-joined.
    pub pool_string: String,
    /// `uploader:<name>` token.
    pub uploader_string: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// The live tag set, split out of the canonical string.
    pub fn tags(&self) -> Vec<String> {
        self.tag_string
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Live posts are the ones registry counts track.
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }

    pub fn mpixels(&self) -> i64 {
        self.width * self.height
    }

    /// Width over height; 0.0 for degenerate dimensions.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }
}

/// Registry entry: one row per distinct tag name.
///
/// `post_count` equals the number of live, non-deleted posts currently
/// carrying the tag, maintained transactionally with every tag-set change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub category: TagCategory,
    pub post_count: i64,
}

/// Append-only snapshot written on every successful post save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostVersion {
    pub id: Uuid,
    pub post_id: i64,
    /// 1-based; strictly increases by one per save.
    pub number: i64,
    pub tag_string: String,
    pub rating: Rating,
    pub parent_id: Option<i64>,
    pub source: String,
    pub updater_id: i64,
    pub updater_ip: String,
    pub created_at: DateTime<Utc>,
}

/// Archive row created when a post is removed from the live table.
/// Carries the full state at removal time, including the original parent
/// link (restoration deliberately does not re-establish it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedPost {
    pub id: i64,
    pub post: Post,
    pub removed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub user_name: String,
    pub post_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMembership {
    pub pool_name: String,
    pub post_id: i64,
    /// Position within the pool, assigned on append.
    pub seq: i64,
}

/// Moderation record. At most one *active* unapproval may exist per post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unapproval {
    pub post_id: i64,
    pub reason: String,
    pub moderator_id: i64,
    pub ip: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One vote per (user, post) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: i64,
    pub post_id: i64,
    /// +1 or -1.
    pub delta: i64,
}

/// Identity of the editor performing a mutation, threaded explicitly
/// through every mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Editor {
    pub user_id: i64,
    pub name: String,
    /// Stored as string to support IPv4/v6/CIDR.
    pub ip: String,
}

/// Input for post creation; the store assigns the id and timestamps.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub uploader_id: i64,
    pub uploader_name: String,
    /// Canonical (sorted, deduplicated) plain tag string.
    pub tag_string: String,
    pub rating: Rating,
    pub source: String,
    pub md5: String,
    pub width: i64,
    pub height: i64,
    pub parent_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_parses_letters_and_words() {
        assert_eq!(Rating::parse("e"), Some(Rating::Explicit));
        assert_eq!(Rating::parse("safe"), Some(Rating::Safe));
        assert_eq!(Rating::parse("Questionable"), Some(Rating::Questionable));
        assert_eq!(Rating::parse("x"), None);
    }

    #[test]
    fn category_round_trips() {
        for category in [
            TagCategory::General,
            TagCategory::Artist,
            TagCategory::Copyright,
            TagCategory::Character,
        ] {
            assert_eq!(TagCategory::parse(category.as_str()), Some(category));
        }
    }
}
