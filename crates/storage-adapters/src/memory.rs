//! # In-Memory Catalog
//!
//! Reference implementation of `CatalogStore`. All state lives in one
//! `RwLock`-guarded struct; every commit stages its mutations on a clone
//! and swaps the clone in only on success, so a failing commit leaves
//! the observable state byte-for-byte unchanged — the same contract the
//! SQL adapter gets from transactions.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use domains::error::{CatalogError, Result, UnapprovalError, VoteError};
use domains::models::{
    FavoriteRecord, NewPost, PoolMembership, Post, PostVersion, RemovedPost, Tag, TagCategory,
    Unapproval, Vote,
};
use domains::ports::{
    CatalogStore, CategoryCounts, PostUpdate, RemovalPlan, TagEditCommit, VersionDraft,
};
use domains::query::{Page, PostOrder, PostPredicate, QueryPlan, StatusFilter};

#[derive(Default, Clone)]
struct State {
    posts: BTreeMap<i64, Post>,
    removed: BTreeMap<i64, RemovedPost>,
    tags: BTreeMap<String, Tag>,
    versions: BTreeMap<i64, Vec<PostVersion>>,
    favorites: Vec<FavoriteRecord>,
    pools: Vec<PoolMembership>,
    unapprovals: Vec<Unapproval>,
    votes: Vec<Vote>,
    next_post_id: i64,
    next_removed_id: i64,
}

pub struct MemoryCatalog {
    inner: RwLock<State>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(State {
                next_post_id: 1,
                next_removed_id: 1,
                ..State::default()
            }),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> Result<T>) -> Result<T> {
        let guard = self
            .inner
            .read()
            .map_err(|_| CatalogError::Store("catalog lock poisoned".to_string()))?;
        f(&guard)
    }

    /// Stage on a clone, swap on success.
    fn commit<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| CatalogError::Store("catalog lock poisoned".to_string()))?;
        let mut stage = guard.clone();
        let value = f(&mut stage)?;
        *guard = stage;
        Ok(value)
    }
}

impl State {
    fn require_post(&self, id: i64) -> Result<&Post> {
        self.posts
            .get(&id)
            .ok_or(CatalogError::NotFound("post", id))
    }

    fn require_post_mut(&mut self, id: i64) -> Result<&mut Post> {
        self.posts
            .get_mut(&id)
            .ok_or(CatalogError::NotFound("post", id))
    }

    /// Registry bookkeeping for tags entering a live post's set: created
    /// as General when missing, then incremented.
    fn count_tags_in(&mut self, names: &[String]) {
        for name in names {
            let tag = self.tags.entry(name.clone()).or_insert_with(|| Tag {
                name: name.clone(),
                category: TagCategory::General,
                post_count: 0,
            });
            tag.post_count += 1;
        }
    }

    /// Registry bookkeeping for tags leaving a live post's set. Removal
    /// never creates a registry row.
    fn count_tags_out(&mut self, names: &[String]) {
        for name in names {
            if let Some(tag) = self.tags.get_mut(name) {
                tag.post_count -= 1;
            }
        }
    }

    /// Create missing registry rows without counting — used when a
    /// soft-deleted post gains tags.
    fn ensure_tags(&mut self, names: &[String]) {
        for name in names {
            self.tags.entry(name.clone()).or_insert_with(|| Tag {
                name: name.clone(),
                category: TagCategory::General,
                post_count: 0,
            });
        }
    }

    fn append_version(&mut self, post: &Post, by: &VersionDraft) {
        let history = self.versions.entry(post.id).or_default();
        history.push(PostVersion {
            id: Uuid::now_v7(),
            post_id: post.id,
            number: history.len() as i64 + 1,
            tag_string: post.tag_string.clone(),
            rating: post.rating,
            parent_id: post.parent_id,
            source: post.source.clone(),
            updater_id: by.updater_id,
            updater_ip: by.updater_ip.clone(),
            created_at: Utc::now(),
        });
    }

    fn recompute_has_children(&mut self, id: i64) {
        let has = self
            .posts
            .values()
            .any(|post| post.parent_id == Some(id));
        if let Some(post) = self.posts.get_mut(&id) {
            post.has_children = has;
        }
    }

    fn recompute_fav_string(&mut self, post_id: i64) {
        let mut users: Vec<&str> = self
            .favorites
            .iter()
            .filter(|fav| fav.post_id == post_id)
            .map(|fav| fav.user_name.as_str())
            .collect();
        users.sort_unstable();
        let joined = users
            .iter()
            .map(|user| format!("fav:{user}"))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(post) = self.posts.get_mut(&post_id) {
            post.fav_string = joined;
        }
    }

    fn recompute_pool_string(&mut self, post_id: i64) {
        let mut names: Vec<&str> = self
            .pools
            .iter()
            .filter(|membership| membership.post_id == post_id)
            .map(|membership| membership.pool_name.as_str())
            .collect();
        names.sort_unstable();
        let joined = names
            .iter()
            .map(|name| format!("pool:{name}"))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(post) = self.posts.get_mut(&post_id) {
            post.pool_string = joined;
        }
    }

    fn matches(&self, post: &Post, predicate: &PostPredicate) -> bool {
        match predicate {
            PostPredicate::HasTag(tag) => post.tag_string.split_whitespace().any(|t| t == tag),
            PostPredicate::MatchesPattern(pattern) => post
                .tag_string
                .split_whitespace()
                .any(|t| glob_match(pattern, t)),
            PostPredicate::Not(inner) => !self.matches(post, inner),
            PostPredicate::IdCompare(cmp) => cmp.matches(post.id),
            PostPredicate::FavoritedBy(user) => self
                .favorites
                .iter()
                .any(|fav| fav.post_id == post.id && fav.user_name == *user),
            PostPredicate::InPool(pool) => self
                .pools
                .iter()
                .any(|membership| membership.post_id == post.id && membership.pool_name == *pool),
            PostPredicate::UploadedBy(name) => post.uploader_name == *name,
            PostPredicate::Md5In(digests) => digests.iter().any(|digest| *digest == post.md5),
            PostPredicate::SourceContains(needle) => post.source.contains(needle.as_str()),
            PostPredicate::RatingIs(rating) => post.rating == *rating,
            PostPredicate::StatusIs(filter) => match filter {
                StatusFilter::Active => !post.is_deleted,
                StatusFilter::Pending => post.is_pending && !post.is_deleted,
                StatusFilter::Flagged => post.is_flagged && !post.is_deleted,
                StatusFilter::Deleted => post.is_deleted,
                StatusFilter::Any => true,
            },
        }
    }
}

/// `*` matches zero or more characters; everything else is literal.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < text.len() {
        if pi < pattern.len() && pattern[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < pattern.len() && pattern[pi] == text[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star_pi, star_ti)) = backtrack {
            pi = star_pi + 1;
            ti = star_ti + 1;
            backtrack = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

fn sort_posts(posts: &mut [Post], order: PostOrder) {
    match order {
        PostOrder::IdDesc => posts.sort_by(|a, b| b.id.cmp(&a.id)),
        PostOrder::IdAsc => posts.sort_by(|a, b| a.id.cmp(&b.id)),
        PostOrder::MpixelsDesc => {
            posts.sort_by(|a, b| b.mpixels().cmp(&a.mpixels()).then(b.id.cmp(&a.id)))
        }
        PostOrder::MpixelsAsc => {
            posts.sort_by(|a, b| a.mpixels().cmp(&b.mpixels()).then(b.id.cmp(&a.id)))
        }
        PostOrder::LandscapeFirst => posts.sort_by(|a, b| {
            b.aspect_ratio()
                .total_cmp(&a.aspect_ratio())
                .then(b.id.cmp(&a.id))
        }),
        PostOrder::PortraitFirst => posts.sort_by(|a, b| {
            a.aspect_ratio()
                .total_cmp(&b.aspect_ratio())
                .then(b.id.cmp(&a.id))
        }),
        PostOrder::ScoreDesc => {
            posts.sort_by(|a, b| b.score.cmp(&a.score).then(b.id.cmp(&a.id)))
        }
        PostOrder::ScoreAsc => {
            posts.sort_by(|a, b| a.score.cmp(&b.score).then(b.id.cmp(&a.id)))
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn post(&self, id: i64) -> Result<Option<Post>> {
        self.read(|state| Ok(state.posts.get(&id).cloned()))
    }

    async fn removed_post(&self, id: i64) -> Result<Option<RemovedPost>> {
        self.read(|state| Ok(state.removed.get(&id).cloned()))
    }

    async fn children_of(&self, id: i64) -> Result<Vec<Post>> {
        self.read(|state| {
            // BTreeMap iteration gives ascending id = creation order.
            Ok(state
                .posts
                .values()
                .filter(|post| post.parent_id == Some(id))
                .cloned()
                .collect())
        })
    }

    async fn tag(&self, name: &str) -> Result<Option<Tag>> {
        self.read(|state| Ok(state.tags.get(name).cloned()))
    }

    async fn tags_named(&self, names: &[String]) -> Result<Vec<Tag>> {
        self.read(|state| {
            Ok(names
                .iter()
                .filter_map(|name| state.tags.get(name).cloned())
                .collect())
        })
    }

    async fn versions_of(&self, post_id: i64) -> Result<Vec<PostVersion>> {
        self.read(|state| Ok(state.versions.get(&post_id).cloned().unwrap_or_default()))
    }

    async fn has_active_unapproval(&self, post_id: i64) -> Result<bool> {
        self.read(|state| {
            Ok(state
                .unapprovals
                .iter()
                .any(|record| record.post_id == post_id && record.is_active))
        })
    }

    async fn post_count(&self) -> Result<u64> {
        self.read(|state| Ok(state.posts.len() as u64))
    }

    async fn removed_count(&self) -> Result<u64> {
        self.read(|state| Ok(state.removed.len() as u64))
    }

    async fn create_post(
        &self,
        new: NewPost,
        added: Vec<String>,
        counts: CategoryCounts,
        version_by: VersionDraft,
    ) -> Result<Post> {
        self.commit(|state| {
            let id = state.next_post_id;
            state.next_post_id += 1;
            let now = Utc::now();
            let post = Post {
                id,
                tag_string: new.tag_string,
                tag_count: counts.total(),
                tag_count_general: counts.general,
                tag_count_artist: counts.artist,
                tag_count_copyright: counts.copyright,
                tag_count_character: counts.character,
                parent_id: new.parent_id,
                has_children: false,
                is_pending: true,
                is_flagged: false,
                is_deleted: false,
                approver_id: None,
                uploader_id: new.uploader_id,
                uploader_name: new.uploader_name.clone(),
                score: 0,
                rating: new.rating,
                source: new.source,
                md5: new.md5,
                width: new.width,
                height: new.height,
                fav_string: String::new(),
                pool_string: String::new(),
                uploader_string: format!("uploader:{}", new.uploader_name),
                created_at: now,
                updated_at: now,
            };
            state.count_tags_in(&added);
            state.posts.insert(id, post.clone());
            if let Some(parent) = post.parent_id {
                state.recompute_has_children(parent);
            }
            state.append_version(&post, &version_by);
            Ok(post)
        })
    }

    async fn commit_tag_edit(&self, commit: TagEditCommit) -> Result<Post> {
        self.commit(|state| {
            let post = state.require_post_mut(commit.post_id)?;
            let was_active = post.is_active();
            post.tag_string = commit.tag_string.clone();
            post.tag_count = commit.counts.total();
            post.tag_count_general = commit.counts.general;
            post.tag_count_artist = commit.counts.artist;
            post.tag_count_copyright = commit.counts.copyright;
            post.tag_count_character = commit.counts.character;
            if let Some(rating) = commit.rating {
                post.rating = rating;
            }
            if let Some(source) = commit.source.clone() {
                post.source = source;
            }
            post.updated_at = Utc::now();
            let snapshot = post.clone();

            if was_active {
                state.count_tags_out(&commit.removed);
                state.count_tags_in(&commit.added);
            } else {
                state.ensure_tags(&commit.added);
            }
            state.append_version(&snapshot, &commit.version_by);
            Ok(snapshot)
        })
    }

    async fn commit_update(
        &self,
        post_id: i64,
        update: PostUpdate,
        version_by: VersionDraft,
    ) -> Result<Post> {
        self.commit(|state| {
            let post = state.require_post_mut(post_id)?;
            let was_deleted = post.is_deleted;
            let old_parent = post.parent_id;

            if let Some(rating) = update.rating {
                post.rating = rating;
            }
            if let Some(source) = update.source {
                post.source = source;
            }
            if let Some(parent) = update.parent_id {
                post.parent_id = parent;
            }
            if let Some(pending) = update.is_pending {
                post.is_pending = pending;
            }
            if let Some(flagged) = update.is_flagged {
                post.is_flagged = flagged;
            }
            if let Some(deleted) = update.is_deleted {
                post.is_deleted = deleted;
            }
            if post.approver_id.is_none() {
                if let Some(approver) = update.approver_id {
                    post.approver_id = Some(approver);
                }
            }
            post.updated_at = Utc::now();
            let snapshot = post.clone();

            // Registry counts track live posts only; crossing the
            // deleted boundary moves every carried tag in or out.
            let tags = snapshot.tags();
            if !was_deleted && snapshot.is_deleted {
                state.count_tags_out(&tags);
            } else if was_deleted && !snapshot.is_deleted {
                state.count_tags_in(&tags);
            }

            // Clearing the flag settles the active unapproval, freeing
            // the post to be unapproved again later.
            if update.is_flagged == Some(false) {
                for record in state
                    .unapprovals
                    .iter_mut()
                    .filter(|record| record.post_id == post_id)
                {
                    record.is_active = false;
                }
            }

            if old_parent != snapshot.parent_id {
                if let Some(parent) = old_parent {
                    state.recompute_has_children(parent);
                }
                if let Some(parent) = snapshot.parent_id {
                    state.recompute_has_children(parent);
                }
            }
            state.append_version(&snapshot, &version_by);
            Ok(snapshot)
        })
    }

    async fn commit_unapproval(
        &self,
        post_id: i64,
        reason: String,
        version_by: VersionDraft,
    ) -> Result<Post> {
        self.commit(|state| {
            state.require_post(post_id)?;
            if state
                .unapprovals
                .iter()
                .any(|record| record.post_id == post_id && record.is_active)
            {
                return Err(UnapprovalError::AlreadyUnapproved(post_id).into());
            }
            state.unapprovals.push(Unapproval {
                post_id,
                reason,
                moderator_id: version_by.updater_id,
                ip: version_by.updater_ip.clone(),
                is_active: true,
                created_at: Utc::now(),
            });
            let post = state.require_post_mut(post_id)?;
            post.is_flagged = true;
            post.updated_at = Utc::now();
            let snapshot = post.clone();
            state.append_version(&snapshot, &version_by);
            Ok(snapshot)
        })
    }

    async fn commit_vote(
        &self,
        post_id: i64,
        user_id: i64,
        delta: i64,
        version_by: VersionDraft,
    ) -> Result<Post> {
        self.commit(|state| {
            state.require_post(post_id)?;
            if state
                .votes
                .iter()
                .any(|vote| vote.post_id == post_id && vote.user_id == user_id)
            {
                return Err(VoteError::Duplicate { user_id, post_id }.into());
            }
            state.votes.push(Vote {
                user_id,
                post_id,
                delta,
            });
            let post = state.require_post_mut(post_id)?;
            post.score += delta;
            post.updated_at = Utc::now();
            let snapshot = post.clone();
            state.append_version(&snapshot, &version_by);
            Ok(snapshot)
        })
    }

    async fn commit_removal(&self, plan: RemovalPlan) -> Result<RemovedPost> {
        debug!(post_id = plan.post_id, edges = plan.reparent.len(), "archiving post");
        self.commit(|state| {
            let post = state.require_post(plan.post_id)?.clone();
            if post.is_active() {
                state.count_tags_out(&post.tags());
            }

            // Favorites either follow the parent or fall away with the row.
            let (moving, keeping): (Vec<_>, Vec<_>) = state
                .favorites
                .drain(..)
                .partition(|fav| fav.post_id == plan.post_id);
            state.favorites = keeping;
            if let Some(target) = plan.reassign_favorites_to {
                if state.posts.contains_key(&target) {
                    for fav in moving {
                        let already = state
                            .favorites
                            .iter()
                            .any(|f| f.post_id == target && f.user_name == fav.user_name);
                        if !already {
                            state.favorites.push(FavoriteRecord {
                                user_name: fav.user_name,
                                post_id: target,
                            });
                        }
                    }
                    state.recompute_fav_string(target);
                }
            }

            state
                .pools
                .retain(|membership| membership.post_id != plan.post_id);
            state
                .unapprovals
                .retain(|record| record.post_id != plan.post_id);
            state.votes.retain(|vote| vote.post_id != plan.post_id);

            state.posts.remove(&plan.post_id);
            for edge in &plan.reparent {
                if let Some(child) = state.posts.get_mut(&edge.child_id) {
                    child.parent_id = edge.new_parent_id;
                }
            }
            for edge in &plan.reparent {
                if let Some(parent) = edge.new_parent_id {
                    state.recompute_has_children(parent);
                }
            }
            if let Some(edge) = plan.reparent.first() {
                state.recompute_has_children(edge.child_id);
            }
            if let Some(parent) = post.parent_id {
                state.recompute_has_children(parent);
            }

            let id = state.next_removed_id;
            state.next_removed_id += 1;
            let archived = RemovedPost {
                id,
                post,
                removed_at: Utc::now(),
            };
            state.removed.insert(id, archived.clone());
            Ok(archived)
        })
    }

    async fn commit_restore(&self, removed_id: i64, version_by: VersionDraft) -> Result<Post> {
        self.commit(|state| {
            let archived = state
                .removed
                .remove(&removed_id)
                .ok_or(CatalogError::NotFound("removed post", removed_id))?;
            let mut post = archived.post;
            post.parent_id = None;
            post.updated_at = Utc::now();
            if post.is_active() {
                state.count_tags_in(&post.tags());
            }
            state.posts.insert(post.id, post.clone());
            state.recompute_has_children(post.id);
            let snapshot = state.require_post(post.id)?.clone();
            state.append_version(&snapshot, &version_by);
            Ok(snapshot)
        })
    }

    async fn add_favorite(&self, post_id: i64, user_name: &str) -> Result<Post> {
        self.commit(|state| {
            state.require_post(post_id)?;
            let already = state
                .favorites
                .iter()
                .any(|fav| fav.post_id == post_id && fav.user_name == user_name);
            if !already {
                state.favorites.push(FavoriteRecord {
                    user_name: user_name.to_string(),
                    post_id,
                });
                state.recompute_fav_string(post_id);
            }
            Ok(state.require_post(post_id)?.clone())
        })
    }

    async fn add_to_pool(&self, post_id: i64, pool_name: &str) -> Result<Post> {
        self.commit(|state| {
            state.require_post(post_id)?;
            let already = state
                .pools
                .iter()
                .any(|m| m.post_id == post_id && m.pool_name == pool_name);
            if !already {
                let seq = state
                    .pools
                    .iter()
                    .filter(|m| m.pool_name == pool_name)
                    .map(|m| m.seq)
                    .max()
                    .unwrap_or(0)
                    + 1;
                state.pools.push(PoolMembership {
                    pool_name: pool_name.to_string(),
                    post_id,
                    seq,
                });
                state.recompute_pool_string(post_id);
            }
            Ok(state.require_post(post_id)?.clone())
        })
    }

    async fn search(&self, plan: &QueryPlan, page: Page) -> Result<Vec<Post>> {
        self.read(|state| {
            let mut hits: Vec<Post> = state
                .posts
                .values()
                .filter(|post| {
                    plan.filters
                        .iter()
                        .all(|predicate| state.matches(post, predicate))
                })
                .cloned()
                .collect();
            sort_posts(&mut hits, plan.order);
            Ok(hits
                .into_iter()
                .skip(page.offset())
                .take(page.limit as usize)
                .collect())
        })
    }
}
