//! # Storage Port
//!
//! The single data persistence contract for posts, tags, versions, and
//! moderation records. Adapters must apply every `commit_*` method as one
//! atomic unit: either the whole mutation lands (row changes, registry
//! count deltas, materialized strings, version snapshot) or none of it
//! does. Services never see partially applied state.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewPost, Post, PostVersion, Rating, RemovedPost, Tag};
use crate::query::{Page, QueryPlan};

/// Editor identity attached to the version snapshot a commit writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDraft {
    pub updater_id: i64,
    pub updater_ip: String,
}

/// Cached per-category tag counts, recomputed by the caller from the
/// final tag set and the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub general: i64,
    pub artist: i64,
    pub copyright: i64,
    pub character: i64,
}

impl CategoryCounts {
    pub fn total(&self) -> i64 {
        self.general + self.artist + self.copyright + self.character
    }
}

/// The fully resolved outcome of a tag merge, ready to persist.
///
/// `added` / `removed` are deltas against the post's live tag set at
/// compute time; the adapter bumps registry counts for them (skipped when
/// the post is soft-deleted, since counts track live posts only), updates
/// the post row, and appends one version snapshot.
#[derive(Debug, Clone)]
pub struct TagEditCommit {
    pub post_id: i64,
    /// Canonical (sorted) final tag string.
    pub tag_string: String,
    /// Tags entering the set; created with category General when missing.
    pub added: Vec<String>,
    /// Tags leaving the set; never created on removal.
    pub removed: Vec<String>,
    pub counts: CategoryCounts,
    /// Set when the edit string carried a `rating:` metatag, or when a
    /// revert restores a snapshot rating.
    pub rating: Option<Rating>,
    /// Set by reverts, which restore the snapshot source alongside tags.
    pub source: Option<String>,
    pub version_by: VersionDraft,
}

/// A partial post update. `None` fields stay untouched; `parent_id` uses
/// a nested Option so "clear the parent" is expressible.
#[derive(Debug, Clone, Default)]
pub struct PostUpdate {
    pub rating: Option<Rating>,
    pub source: Option<String>,
    pub parent_id: Option<Option<i64>>,
    pub is_pending: Option<bool>,
    pub is_flagged: Option<bool>,
    pub is_deleted: Option<bool>,
    /// Recorded only if the post has no approver yet.
    pub approver_id: Option<i64>,
}

/// One re-parenting edge produced by child promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reparent {
    pub child_id: i64,
    pub new_parent_id: Option<i64>,
}

/// Everything a removal must apply in one transaction: the archive move,
/// favorite reassignment, and the precomputed re-parenting edges.
#[derive(Debug, Clone)]
pub struct RemovalPlan {
    pub post_id: i64,
    /// Favorites move here when the removed post has a parent.
    pub reassign_favorites_to: Option<i64>,
    pub reparent: Vec<Reparent>,
}

/// Data persistence contract for the catalog.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // Reads
    async fn post(&self, id: i64) -> Result<Option<Post>>;
    async fn removed_post(&self, id: i64) -> Result<Option<RemovedPost>>;
    /// Children ordered by creation (ascending id).
    async fn children_of(&self, id: i64) -> Result<Vec<Post>>;
    async fn tag(&self, name: &str) -> Result<Option<Tag>>;
    async fn tags_named(&self, names: &[String]) -> Result<Vec<Tag>>;
    async fn versions_of(&self, post_id: i64) -> Result<Vec<PostVersion>>;
    async fn has_active_unapproval(&self, post_id: i64) -> Result<bool>;
    async fn post_count(&self) -> Result<u64>;
    async fn removed_count(&self) -> Result<u64>;

    // Atomic commits
    async fn create_post(
        &self,
        new: NewPost,
        added: Vec<String>,
        counts: CategoryCounts,
        version_by: VersionDraft,
    ) -> Result<Post>;
    async fn commit_tag_edit(&self, commit: TagEditCommit) -> Result<Post>;
    async fn commit_update(
        &self,
        post_id: i64,
        update: PostUpdate,
        version_by: VersionDraft,
    ) -> Result<Post>;
    async fn commit_unapproval(
        &self,
        post_id: i64,
        reason: String,
        version_by: VersionDraft,
    ) -> Result<Post>;
    /// Enforces vote uniqueness inside the transaction; a duplicate
    /// yields `VoteError::Duplicate` and changes nothing.
    async fn commit_vote(
        &self,
        post_id: i64,
        user_id: i64,
        delta: i64,
        version_by: VersionDraft,
    ) -> Result<Post>;
    async fn commit_removal(&self, plan: RemovalPlan) -> Result<RemovedPost>;
    /// Restores the archived row as a live post with its parent cleared.
    async fn commit_restore(
        &self,
        removed_id: i64,
        version_by: VersionDraft,
    ) -> Result<Post>;

    // Favorites & pools — the denormalized display strings are recomputed
    // in the same commit.
    async fn add_favorite(&self, post_id: i64, user_name: &str) -> Result<Post>;
    async fn add_to_pool(&self, post_id: i64, pool_name: &str) -> Result<Post>;

    // Search — read-only plan execution.
    async fn search(&self, plan: &QueryPlan, page: Page) -> Result<Vec<Post>>;
}
