//! # Post Service
//!
//! Orchestrates tag merges, searches, and lifecycle transitions over the
//! storage port. The flow for every mutation is the same: check, compute
//! in memory, then hand the store one atomic commit. The service never
//! mutates anything directly, so a failed commit leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use domains::error::{CatalogError, Result, UnapprovalError, ValidationError};
use domains::models::{Editor, NewPost, Post, PostVersion, Rating, RemovedPost, TagCategory};
use domains::ports::{
    CatalogStore, CategoryCounts, PostUpdate, RemovalPlan, Reparent, TagEditCommit, VersionDraft,
};
use domains::query::Page;

use crate::query;
use crate::tags::diff::diff;
use crate::tags::merge::merge;
use crate::tags::{extract, MetatagKind, TagExpansion};

/// Input for post creation. Metatags in `tag_string` are honored the same
/// way they are on edits: `rating:` overrides the field below, `pool:`
/// and `fav:` are applied once the row exists.
#[derive(Debug, Clone)]
pub struct CreatePost {
    pub tag_string: String,
    pub rating: Rating,
    pub source: String,
    pub md5: String,
    pub width: i64,
    pub height: i64,
    pub parent_id: Option<i64>,
}

pub struct PostService {
    store: Arc<dyn CatalogStore>,
}

impl PostService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Reconcile an editor's tag edit against the live post.
    ///
    /// The editor's intent is the diff between what they saw (`baseline`)
    /// and what they typed (`desired`); it is applied on top of a fresh
    /// read of the post, so concurrent edits that touched different tags
    /// all survive. Count updates, the post save, and the version
    /// snapshot land in one store commit.
    pub async fn save_tag_edit(
        &self,
        post_id: i64,
        baseline: &str,
        desired: &str,
        editor: &Editor,
    ) -> Result<Post> {
        let expansion = extract(desired);
        let baseline_plain = extract(baseline).plain;
        let intent = diff(&baseline_plain, &expansion.plain);

        let post = self.require_post(post_id).await?;
        let outcome = merge(&post.tags(), &intent);
        let counts = self.category_counts(&outcome.final_tags).await?;

        let commit = TagEditCommit {
            post_id,
            tag_string: outcome.tag_string(),
            added: outcome.added.clone(),
            removed: outcome.removed.clone(),
            counts,
            rating: edit_rating(&expansion),
            source: None,
            version_by: version_by(editor),
        };
        info!(
            post_id,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "applying tag edit"
        );
        let saved = self.store.commit_tag_edit(commit).await?;
        self.apply_edit_metatags(&saved, &expansion, editor).await
    }

    /// Insert a new post. Registry counts are seeded through the same
    /// merge arithmetic as edits (baseline empty), and the creation
    /// itself writes version #1.
    pub async fn create_post(&self, input: CreatePost, editor: &Editor) -> Result<Post> {
        if let Some(parent_id) = input.parent_id {
            self.validate_parent_target(parent_id).await?;
        }

        let expansion = extract(&input.tag_string);
        let outcome = merge(&[], &diff(&[], &expansion.plain));
        let counts = self.category_counts(&outcome.final_tags).await?;

        let new = NewPost {
            uploader_id: editor.user_id,
            uploader_name: editor.name.clone(),
            tag_string: outcome.tag_string(),
            rating: edit_rating(&expansion).unwrap_or(input.rating),
            source: input.source,
            md5: input.md5,
            width: input.width,
            height: input.height,
            parent_id: input.parent_id,
        };
        let created = self
            .store
            .create_post(new, outcome.added, counts, version_by(editor))
            .await?;
        info!(post_id = created.id, "created post");
        self.apply_edit_metatags(&created, &expansion, editor).await
    }

    /// Compile and execute a search. Read-only.
    pub async fn search(&self, raw: &str, page: Page) -> Result<Vec<Post>> {
        let plan = query::compile(raw)?;
        debug!(query = raw, filters = plan.filters.len(), "compiled search");
        self.store.search(&plan, page).await
    }

    /// Clear pending/flagged/deleted. The first approval records the
    /// approver; later ones leave the record untouched but still version.
    pub async fn approve(&self, post_id: i64, moderator: &Editor) -> Result<Post> {
        self.require_post(post_id).await?;
        let update = PostUpdate {
            is_pending: Some(false),
            is_flagged: Some(false),
            is_deleted: Some(false),
            approver_id: Some(moderator.user_id),
            ..PostUpdate::default()
        };
        self.store
            .commit_update(post_id, update, version_by(moderator))
            .await
    }

    /// Flag a post with a moderation reason. Fails before any state
    /// change when the reason is empty or an active unapproval exists.
    pub async fn unapprove(&self, post_id: i64, reason: &str, moderator: &Editor) -> Result<Post> {
        if reason.trim().is_empty() {
            return Err(UnapprovalError::EmptyReason.into());
        }
        self.require_post(post_id).await?;
        if self.store.has_active_unapproval(post_id).await? {
            return Err(UnapprovalError::AlreadyUnapproved(post_id).into());
        }
        self.store
            .commit_unapproval(post_id, reason.to_string(), version_by(moderator))
            .await
    }

    /// Soft-delete: the post stays a live row, hidden from default
    /// searches and discoverable via `status:deleted`.
    pub async fn delete(&self, post_id: i64, editor: &Editor) -> Result<Post> {
        self.require_post(post_id).await?;
        let update = PostUpdate {
            is_deleted: Some(true),
            ..PostUpdate::default()
        };
        self.store
            .commit_update(post_id, update, version_by(editor))
            .await
    }

    /// Archive-move: copies the post into the removed table and deletes
    /// the live row, reassigning favorites to the parent when one exists
    /// and promoting the first child over its siblings.
    pub async fn remove(&self, post_id: i64, moderator: &Editor) -> Result<RemovedPost> {
        let post = self.require_post(post_id).await?;
        let children = self.store.children_of(post_id).await?;
        let plan = RemovalPlan {
            post_id,
            reassign_favorites_to: post.parent_id,
            reparent: promote_first_child(&children),
        };
        info!(
            post_id,
            moderator = moderator.user_id,
            children = children.len(),
            "removing post"
        );
        self.store.commit_removal(plan).await
    }

    /// Restore an archived post. The original parent link is dropped on
    /// purpose; the restored post starts out parentless.
    pub async fn undelete(&self, removed_id: i64, editor: &Editor) -> Result<Post> {
        self.store
            .removed_post(removed_id)
            .await?
            .ok_or(CatalogError::NotFound("removed post", removed_id))?;
        self.store
            .commit_restore(removed_id, version_by(editor))
            .await
    }

    /// Re-link (or clear) a post's parent. The depth-one invariant is
    /// checked in both directions before anything persists.
    pub async fn set_parent(
        &self,
        post_id: i64,
        parent_id: Option<i64>,
        editor: &Editor,
    ) -> Result<Post> {
        self.require_post(post_id).await?;
        if let Some(target) = parent_id {
            if target == post_id {
                return Err(ValidationError::SelfParent.into());
            }
            self.validate_parent_target(target).await?;
            if !self.store.children_of(post_id).await?.is_empty() {
                return Err(ValidationError::HasChildren(post_id).into());
            }
        }
        let update = PostUpdate {
            parent_id: Some(parent_id),
            ..PostUpdate::default()
        };
        self.store
            .commit_update(post_id, update, version_by(editor))
            .await
    }

    /// One vote per (user, post); a duplicate fails inside the store
    /// commit and leaves score and vote count unchanged.
    pub async fn vote(&self, post_id: i64, voter: &Editor, upvote: bool) -> Result<Post> {
        self.require_post(post_id).await?;
        let delta = if upvote { 1 } else { -1 };
        self.store
            .commit_vote(post_id, voter.user_id, delta, version_by(voter))
            .await
    }

    /// Restore a snapshot's tag string, rating, and source. The tag part
    /// replays through the merge engine so registry counts stay true, and
    /// the revert itself appends a new version.
    pub async fn revert_to(&self, post_id: i64, number: i64, editor: &Editor) -> Result<Post> {
        let snapshot = self.require_version(post_id, number).await?;
        let post = self.require_post(post_id).await?;

        let target: Vec<String> = snapshot
            .tag_string
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let live = post.tags();
        let outcome = merge(&live, &diff(&live, &target));
        let counts = self.category_counts(&outcome.final_tags).await?;

        let commit = TagEditCommit {
            post_id,
            tag_string: outcome.tag_string(),
            added: outcome.added,
            removed: outcome.removed,
            counts,
            rating: Some(snapshot.rating),
            source: Some(snapshot.source.clone()),
            version_by: version_by(editor),
        };
        info!(post_id, to_version = number, "reverting post");
        self.store.commit_tag_edit(commit).await
    }

    pub async fn versions(&self, post_id: i64) -> Result<Vec<PostVersion>> {
        self.store.versions_of(post_id).await
    }

    async fn require_post(&self, post_id: i64) -> Result<Post> {
        self.store
            .post(post_id)
            .await?
            .ok_or(CatalogError::NotFound("post", post_id))
    }

    async fn require_version(&self, post_id: i64, number: i64) -> Result<PostVersion> {
        self.store
            .versions_of(post_id)
            .await?
            .into_iter()
            .find(|version| version.number == number)
            .ok_or(CatalogError::NotFound("post version", number))
    }

    async fn validate_parent_target(&self, target: i64) -> Result<()> {
        let parent = self
            .store
            .post(target)
            .await?
            .ok_or(ValidationError::ParentNotFound(target))?;
        if parent.parent_id.is_some() {
            return Err(ValidationError::ParentHasParent(target).into());
        }
        Ok(())
    }

    /// Cached per-category counts from the final set and the registry.
    async fn category_counts(&self, names: &[String]) -> Result<CategoryCounts> {
        let known = self.store.tags_named(names).await?;
        Ok(tally_categories(names, &known))
    }

    /// Apply the side-effectful metatags an editor typed into a tag
    /// string: `pool:<name>` appends to that pool, `fav:<user>` records a
    /// favorite (`fav:me` meaning the editor). Negated forms and the
    /// read-path metatags are ignored here.
    async fn apply_edit_metatags(
        &self,
        post: &Post,
        expansion: &TagExpansion,
        editor: &Editor,
    ) -> Result<Post> {
        let mut current = post.clone();
        for meta in expansion.metatags.iter().filter(|meta| !meta.negated) {
            match meta.kind {
                MetatagKind::Pool if !meta.value.is_empty() => {
                    current = self.store.add_to_pool(post.id, &meta.value).await?;
                }
                MetatagKind::Fav if !meta.value.is_empty() => {
                    let user = if meta.value == "me" {
                        editor.name.as_str()
                    } else {
                        meta.value.as_str()
                    };
                    current = self.store.add_favorite(post.id, user).await?;
                }
                _ => {}
            }
        }
        Ok(current)
    }
}

/// Compute the re-parenting edges for a removal: the first child (by
/// creation order) is promoted to parentless, every sibling re-hangs off
/// it. Pure function over the current children.
pub fn promote_first_child(children: &[Post]) -> Vec<Reparent> {
    let Some((first, rest)) = children.split_first() else {
        return Vec::new();
    };
    let mut edges = vec![Reparent {
        child_id: first.id,
        new_parent_id: None,
    }];
    edges.extend(rest.iter().map(|child| Reparent {
        child_id: child.id,
        new_parent_id: Some(first.id),
    }));
    edges
}

/// Break a tag set down by registry category. Tags the registry does not
/// know yet will be created as General by the commit, so they count as
/// General here.
pub fn tally_categories(names: &[String], known: &[domains::models::Tag]) -> CategoryCounts {
    let categories: HashMap<&str, TagCategory> = known
        .iter()
        .map(|tag| (tag.name.as_str(), tag.category))
        .collect();
    let mut counts = CategoryCounts::default();
    for name in names {
        match categories
            .get(name.as_str())
            .copied()
            .unwrap_or(TagCategory::General)
        {
            TagCategory::General => counts.general += 1,
            TagCategory::Artist => counts.artist += 1,
            TagCategory::Copyright => counts.copyright += 1,
            TagCategory::Character => counts.character += 1,
        }
    }
    counts
}

fn version_by(editor: &Editor) -> VersionDraft {
    VersionDraft {
        updater_id: editor.user_id,
        updater_ip: editor.ip.clone(),
    }
}

fn edit_rating(expansion: &TagExpansion) -> Option<Rating> {
    expansion
        .metatags
        .iter()
        .filter(|meta| !meta.negated && meta.kind == MetatagKind::Rating)
        .filter_map(|meta| Rating::parse(&meta.value))
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::ports::MockCatalogStore;

    fn editor() -> Editor {
        Editor {
            user_id: 1,
            name: "tester".to_string(),
            ip: "127.0.0.1".to_string(),
        }
    }

    fn post_with(id: i64, parent_id: Option<i64>) -> Post {
        Post {
            id,
            tag_string: String::new(),
            tag_count: 0,
            tag_count_general: 0,
            tag_count_artist: 0,
            tag_count_copyright: 0,
            tag_count_character: 0,
            parent_id,
            has_children: false,
            is_pending: true,
            is_flagged: false,
            is_deleted: false,
            approver_id: None,
            uploader_id: 1,
            uploader_name: "tester".to_string(),
            score: 0,
            rating: Rating::Safe,
            source: String::new(),
            md5: String::new(),
            width: 100,
            height: 100,
            fav_string: String::new(),
            pool_string: String::new(),
            uploader_string: "uploader:tester".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn tally_splits_counts_by_registry_category() {
        use domains::models::Tag;
        let names: Vec<String> = ["sky", "some_artist", "some_series", "brand_new"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let known = vec![
            Tag {
                name: "sky".to_string(),
                category: TagCategory::General,
                post_count: 10,
            },
            Tag {
                name: "some_artist".to_string(),
                category: TagCategory::Artist,
                post_count: 3,
            },
            Tag {
                name: "some_series".to_string(),
                category: TagCategory::Copyright,
                post_count: 5,
            },
        ];
        let counts = tally_categories(&names, &known);
        // brand_new is unknown to the registry and lands in General.
        assert_eq!(counts.general, 2);
        assert_eq!(counts.artist, 1);
        assert_eq!(counts.copyright, 1);
        assert_eq!(counts.character, 0);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn promotion_clears_the_first_child_and_rehangs_the_rest() {
        let children = vec![post_with(10, Some(1)), post_with(11, Some(1)), post_with(12, Some(1))];
        let edges = promote_first_child(&children);
        assert_eq!(
            edges,
            vec![
                Reparent { child_id: 10, new_parent_id: None },
                Reparent { child_id: 11, new_parent_id: Some(10) },
                Reparent { child_id: 12, new_parent_id: Some(10) },
            ]
        );
    }

    #[test]
    fn promotion_of_a_single_child_only_clears_it() {
        let edges = promote_first_child(&[post_with(10, Some(1))]);
        assert_eq!(
            edges,
            vec![Reparent { child_id: 10, new_parent_id: None }]
        );
    }

    #[test]
    fn promotion_without_children_is_empty() {
        assert!(promote_first_child(&[]).is_empty());
    }

    #[tokio::test]
    async fn empty_unapproval_reason_never_touches_the_store() {
        // No expectations set: any store call would panic the mock.
        let store = MockCatalogStore::new();
        let service = PostService::new(Arc::new(store));
        let err = service.unapprove(1, "   ", &editor()).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Unapproval(UnapprovalError::EmptyReason)
        ));
    }

    #[tokio::test]
    async fn assigning_a_parented_post_as_parent_fails_validation() {
        let mut store = MockCatalogStore::new();
        store
            .expect_post()
            .returning(|id| match id {
                1 => Ok(Some(post_with(1, None))),
                2 => Ok(Some(post_with(2, Some(9)))),
                _ => Ok(None),
            });
        let service = PostService::new(Arc::new(store));
        let err = service
            .set_parent(1, Some(2), &editor())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation(ValidationError::ParentHasParent(2))
        ));
    }

    #[tokio::test]
    async fn assigning_a_missing_parent_fails_validation() {
        let mut store = MockCatalogStore::new();
        store.expect_post().returning(|id| match id {
            1 => Ok(Some(post_with(1, None))),
            _ => Ok(None),
        });
        let service = PostService::new(Arc::new(store));
        let err = service
            .set_parent(1, Some(42), &editor())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation(ValidationError::ParentNotFound(42))
        ));
    }
}
