//! # SQLite Catalog
//!
//! This module implements the data mapping between the SQLite relational
//! model and the `domains` entities. Every `commit_*` runs inside a
//! transaction so a failure can never leave half-applied counts, strings,
//! or version rows behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use domains::error::{CatalogError, Result, UnapprovalError, VoteError};
use domains::models::{NewPost, Post, PostVersion, Rating, RemovedPost, Tag, TagCategory};
use domains::ports::{
    CatalogStore, CategoryCounts, PostUpdate, RemovalPlan, TagEditCommit, VersionDraft,
};
use domains::query::{Page, PostOrder, PostPredicate, QueryPlan, StatusFilter};

/// Schema, applied idempotently on connect. SQLite only, no migration
/// tooling; new columns need manual ALTER TABLE on existing databases.
static DDL_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS posts (
       id                   INTEGER PRIMARY KEY AUTOINCREMENT,
       tag_string           TEXT NOT NULL DEFAULT '',
       tag_count            INTEGER NOT NULL DEFAULT 0,
       tag_count_general    INTEGER NOT NULL DEFAULT 0,
       tag_count_artist     INTEGER NOT NULL DEFAULT 0,
       tag_count_copyright  INTEGER NOT NULL DEFAULT 0,
       tag_count_character  INTEGER NOT NULL DEFAULT 0,
       parent_id            INTEGER,
       has_children         INTEGER NOT NULL DEFAULT 0,
       is_pending           INTEGER NOT NULL DEFAULT 1,
       is_flagged           INTEGER NOT NULL DEFAULT 0,
       is_deleted           INTEGER NOT NULL DEFAULT 0,
       approver_id          INTEGER,
       uploader_id          INTEGER NOT NULL,
       uploader_name        TEXT NOT NULL,
       score                INTEGER NOT NULL DEFAULT 0,
       rating               TEXT NOT NULL DEFAULT 'q',
       source               TEXT NOT NULL DEFAULT '',
       md5                  TEXT NOT NULL DEFAULT '',
       width                INTEGER NOT NULL DEFAULT 0,
       height               INTEGER NOT NULL DEFAULT 0,
       fav_string           TEXT NOT NULL DEFAULT '',
       pool_string          TEXT NOT NULL DEFAULT '',
       uploader_string      TEXT NOT NULL DEFAULT '',
       created_at           TEXT NOT NULL,
       updated_at           TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS removed_posts (
       id                   INTEGER PRIMARY KEY AUTOINCREMENT,
       post_id              INTEGER NOT NULL,
       tag_string           TEXT NOT NULL,
       tag_count            INTEGER NOT NULL,
       tag_count_general    INTEGER NOT NULL,
       tag_count_artist     INTEGER NOT NULL,
       tag_count_copyright  INTEGER NOT NULL,
       tag_count_character  INTEGER NOT NULL,
       parent_id            INTEGER,
       has_children         INTEGER NOT NULL,
       is_pending           INTEGER NOT NULL,
       is_flagged           INTEGER NOT NULL,
       is_deleted           INTEGER NOT NULL,
       approver_id          INTEGER,
       uploader_id          INTEGER NOT NULL,
       uploader_name        TEXT NOT NULL,
       score                INTEGER NOT NULL,
       rating               TEXT NOT NULL,
       source               TEXT NOT NULL,
       md5                  TEXT NOT NULL,
       width                INTEGER NOT NULL,
       height               INTEGER NOT NULL,
       fav_string           TEXT NOT NULL,
       pool_string          TEXT NOT NULL,
       uploader_string      TEXT NOT NULL,
       created_at           TEXT NOT NULL,
       updated_at           TEXT NOT NULL,
       removed_at           TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS tags (
       name        TEXT NOT NULL PRIMARY KEY,
       category    TEXT NOT NULL DEFAULT 'general',
       post_count  INTEGER NOT NULL DEFAULT 0
     )",
    "CREATE TABLE IF NOT EXISTS post_tags (
       post_id   INTEGER NOT NULL,
       tag_name  TEXT NOT NULL,
       PRIMARY KEY (post_id, tag_name)
     )",
    "CREATE TABLE IF NOT EXISTS post_versions (
       id          TEXT NOT NULL PRIMARY KEY,
       post_id     INTEGER NOT NULL,
       number      INTEGER NOT NULL,
       tag_string  TEXT NOT NULL,
       rating      TEXT NOT NULL,
       parent_id   INTEGER,
       source      TEXT NOT NULL,
       updater_id  INTEGER NOT NULL,
       updater_ip  TEXT NOT NULL,
       created_at  TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS favorites (
       user_name  TEXT NOT NULL,
       post_id    INTEGER NOT NULL,
       PRIMARY KEY (user_name, post_id)
     )",
    "CREATE TABLE IF NOT EXISTS pool_posts (
       pool_name  TEXT NOT NULL,
       post_id    INTEGER NOT NULL,
       seq        INTEGER NOT NULL,
       PRIMARY KEY (pool_name, post_id)
     )",
    "CREATE TABLE IF NOT EXISTS unapprovals (
       id            INTEGER PRIMARY KEY AUTOINCREMENT,
       post_id       INTEGER NOT NULL,
       reason        TEXT NOT NULL,
       moderator_id  INTEGER NOT NULL,
       ip            TEXT NOT NULL,
       is_active     INTEGER NOT NULL DEFAULT 1,
       created_at    TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS votes (
       user_id  INTEGER NOT NULL,
       post_id  INTEGER NOT NULL,
       delta    INTEGER NOT NULL,
       PRIMARY KEY (user_id, post_id)
     )",
];

pub struct SqliteCatalog {
    pool: SqlitePool,
}

fn store_err(err: sqlx::Error) -> CatalogError {
    CatalogError::Store(err.to_string())
}

fn rating_from_db(value: &str) -> Rating {
    Rating::parse(value).unwrap_or(Rating::Questionable)
}

fn post_from_row(row: &SqliteRow) -> Post {
    Post {
        id: row.get("id"),
        tag_string: row.get("tag_string"),
        tag_count: row.get("tag_count"),
        tag_count_general: row.get("tag_count_general"),
        tag_count_artist: row.get("tag_count_artist"),
        tag_count_copyright: row.get("tag_count_copyright"),
        tag_count_character: row.get("tag_count_character"),
        parent_id: row.get("parent_id"),
        has_children: row.get("has_children"),
        is_pending: row.get("is_pending"),
        is_flagged: row.get("is_flagged"),
        is_deleted: row.get("is_deleted"),
        approver_id: row.get("approver_id"),
        uploader_id: row.get("uploader_id"),
        uploader_name: row.get("uploader_name"),
        score: row.get("score"),
        rating: rating_from_db(&row.get::<String, _>("rating")),
        source: row.get("source"),
        md5: row.get("md5"),
        width: row.get("width"),
        height: row.get("height"),
        fav_string: row.get("fav_string"),
        pool_string: row.get("pool_string"),
        uploader_string: row.get("uploader_string"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Archive rows carry the same columns, with the post's own id in
/// `post_id` and the archive identity in `id`.
fn removed_from_row(row: &SqliteRow) -> RemovedPost {
    RemovedPost {
        id: row.get("id"),
        post: Post {
            id: row.get("post_id"),
            tag_string: row.get("tag_string"),
            tag_count: row.get("tag_count"),
            tag_count_general: row.get("tag_count_general"),
            tag_count_artist: row.get("tag_count_artist"),
            tag_count_copyright: row.get("tag_count_copyright"),
            tag_count_character: row.get("tag_count_character"),
            parent_id: row.get("parent_id"),
            has_children: row.get("has_children"),
            is_pending: row.get("is_pending"),
            is_flagged: row.get("is_flagged"),
            is_deleted: row.get("is_deleted"),
            approver_id: row.get("approver_id"),
            uploader_id: row.get("uploader_id"),
            uploader_name: row.get("uploader_name"),
            score: row.get("score"),
            rating: rating_from_db(&row.get::<String, _>("rating")),
            source: row.get("source"),
            md5: row.get("md5"),
            width: row.get("width"),
            height: row.get("height"),
            fav_string: row.get("fav_string"),
            pool_string: row.get("pool_string"),
            uploader_string: row.get("uploader_string"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        },
        removed_at: row.get("removed_at"),
    }
}

fn tag_from_row(row: &SqliteRow) -> Tag {
    Tag {
        name: row.get("name"),
        category: TagCategory::parse(&row.get::<String, _>("category"))
            .unwrap_or(TagCategory::General),
        post_count: row.get("post_count"),
    }
}

fn version_from_row(row: &SqliteRow) -> Result<PostVersion> {
    Ok(PostVersion {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|err| CatalogError::Store(err.to_string()))?,
        post_id: row.get("post_id"),
        number: row.get("number"),
        tag_string: row.get("tag_string"),
        rating: rating_from_db(&row.get::<String, _>("rating")),
        parent_id: row.get("parent_id"),
        source: row.get("source"),
        updater_id: row.get("updater_id"),
        updater_ip: row.get("updater_ip"),
        created_at: row.get("created_at"),
    })
}

/// Bind argument for dynamically assembled predicate SQL.
enum Arg {
    Int(i64),
    Text(String),
}

/// Translate a glob pattern to a LIKE pattern, escaping LIKE's own
/// wildcards so only `*` is special.
fn like_pattern(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len());
    for c in glob.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '*' => out.push('%'),
            other => out.push(other),
        }
    }
    out
}

fn predicate_sql(predicate: &PostPredicate, args: &mut Vec<Arg>) -> String {
    match predicate {
        PostPredicate::HasTag(tag) => {
            args.push(Arg::Text(tag.clone()));
            "EXISTS (SELECT 1 FROM post_tags pt WHERE pt.post_id = p.id AND pt.tag_name = ?)"
                .to_string()
        }
        PostPredicate::MatchesPattern(pattern) => {
            args.push(Arg::Text(like_pattern(pattern)));
            "EXISTS (SELECT 1 FROM post_tags pt WHERE pt.post_id = p.id AND pt.tag_name LIKE ? ESCAPE '\\')"
                .to_string()
        }
        PostPredicate::Not(inner) => format!("NOT ({})", predicate_sql(inner, args)),
        PostPredicate::IdCompare(cmp) => {
            use domains::query::NumericCmp::*;
            let (op, value) = match *cmp {
                Eq(n) => ("=", n),
                Gt(n) => (">", n),
                Ge(n) => (">=", n),
                Lt(n) => ("<", n),
                Le(n) => ("<=", n),
            };
            args.push(Arg::Int(value));
            format!("p.id {op} ?")
        }
        PostPredicate::FavoritedBy(user) => {
            args.push(Arg::Text(user.clone()));
            "EXISTS (SELECT 1 FROM favorites f WHERE f.post_id = p.id AND f.user_name = ?)"
                .to_string()
        }
        PostPredicate::InPool(pool) => {
            args.push(Arg::Text(pool.clone()));
            "EXISTS (SELECT 1 FROM pool_posts pp WHERE pp.post_id = p.id AND pp.pool_name = ?)"
                .to_string()
        }
        PostPredicate::UploadedBy(name) => {
            args.push(Arg::Text(name.clone()));
            "p.uploader_name = ?".to_string()
        }
        PostPredicate::Md5In(digests) => {
            if digests.is_empty() {
                return "0 = 1".to_string();
            }
            let placeholders = vec!["?"; digests.len()].join(", ");
            for digest in digests {
                args.push(Arg::Text(digest.clone()));
            }
            format!("p.md5 IN ({placeholders})")
        }
        PostPredicate::SourceContains(needle) => {
            args.push(Arg::Text(needle.clone()));
            "instr(p.source, ?) > 0".to_string()
        }
        PostPredicate::RatingIs(rating) => {
            args.push(Arg::Text(rating.as_char().to_string()));
            "p.rating = ?".to_string()
        }
        PostPredicate::StatusIs(filter) => match filter {
            StatusFilter::Active => "p.is_deleted = 0".to_string(),
            StatusFilter::Pending => "p.is_pending = 1 AND p.is_deleted = 0".to_string(),
            StatusFilter::Flagged => "p.is_flagged = 1 AND p.is_deleted = 0".to_string(),
            StatusFilter::Deleted => "p.is_deleted = 1".to_string(),
            StatusFilter::Any => "1 = 1".to_string(),
        },
    }
}

fn order_sql(order: PostOrder) -> &'static str {
    match order {
        PostOrder::IdDesc => "p.id DESC",
        PostOrder::IdAsc => "p.id ASC",
        PostOrder::MpixelsDesc => "(p.width * p.height) DESC, p.id DESC",
        PostOrder::MpixelsAsc => "(p.width * p.height) ASC, p.id DESC",
        PostOrder::LandscapeFirst => {
            "CASE WHEN p.height = 0 THEN 0.0 ELSE CAST(p.width AS REAL) / p.height END DESC, p.id DESC"
        }
        PostOrder::PortraitFirst => {
            "CASE WHEN p.height = 0 THEN 0.0 ELSE CAST(p.width AS REAL) / p.height END ASC, p.id DESC"
        }
        PostOrder::ScoreDesc => "p.score DESC, p.id DESC",
        PostOrder::ScoreAsc => "p.score ASC, p.id DESC",
    }
}

impl SqliteCatalog {
    /// Connects and applies the schema.
    ///
    /// The pool is capped at one connection: `sqlite::memory:` databases
    /// are per-connection, and the single-writer model suits SQLite.
    pub async fn new(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(store_err)?;
        for ddl in DDL_STATEMENTS {
            sqlx::query(ddl).execute(&pool).await.map_err(store_err)?;
        }
        Ok(Self { pool })
    }

    async fn load_post(
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(post_from_row))
    }

    async fn require_post(tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<Post> {
        Self::load_post(tx, id)
            .await?
            .ok_or(CatalogError::NotFound("post", id))
    }

    async fn append_version(
        tx: &mut Transaction<'_, Sqlite>,
        post: &Post,
        by: &VersionDraft,
    ) -> Result<()> {
        let prior: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_versions WHERE post_id = ?")
            .bind(post.id)
            .fetch_one(&mut **tx)
            .await
            .map_err(store_err)?;
        sqlx::query(
            "INSERT INTO post_versions (id, post_id, number, tag_string, rating, parent_id, source, updater_id, updater_ip, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::now_v7().to_string())
        .bind(post.id)
        .bind(prior + 1)
        .bind(&post.tag_string)
        .bind(post.rating.as_char().to_string())
        .bind(post.parent_id)
        .bind(&post.source)
        .bind(by.updater_id)
        .bind(&by.updater_ip)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn count_tags_in(tx: &mut Transaction<'_, Sqlite>, names: &[String]) -> Result<()> {
        for name in names {
            sqlx::query(
                "INSERT INTO tags (name, category, post_count) VALUES (?, 'general', 0)
                 ON CONFLICT(name) DO NOTHING",
            )
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
            sqlx::query("UPDATE tags SET post_count = post_count + 1 WHERE name = ?")
                .bind(name)
                .execute(&mut **tx)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    async fn count_tags_out(tx: &mut Transaction<'_, Sqlite>, names: &[String]) -> Result<()> {
        for name in names {
            sqlx::query("UPDATE tags SET post_count = post_count - 1 WHERE name = ?")
                .bind(name)
                .execute(&mut **tx)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    async fn ensure_tags(tx: &mut Transaction<'_, Sqlite>, names: &[String]) -> Result<()> {
        for name in names {
            sqlx::query(
                "INSERT INTO tags (name, category, post_count) VALUES (?, 'general', 0)
                 ON CONFLICT(name) DO NOTHING",
            )
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }
        Ok(())
    }

    async fn rewrite_post_tags(
        tx: &mut Transaction<'_, Sqlite>,
        post_id: i64,
        tag_string: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        for tag in tag_string.split_whitespace() {
            sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_name) VALUES (?, ?)")
                .bind(post_id)
                .bind(tag)
                .execute(&mut **tx)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    async fn refresh_has_children(tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE posts SET has_children =
               EXISTS (SELECT 1 FROM posts c WHERE c.parent_id = posts.id)
             WHERE id = ?",
        )
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn refresh_fav_string(tx: &mut Transaction<'_, Sqlite>, post_id: i64) -> Result<()> {
        let users: Vec<String> = sqlx::query_scalar(
            "SELECT user_name FROM favorites WHERE post_id = ? ORDER BY user_name",
        )
        .bind(post_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(store_err)?;
        let joined = users
            .iter()
            .map(|user| format!("fav:{user}"))
            .collect::<Vec<_>>()
            .join(" ");
        sqlx::query("UPDATE posts SET fav_string = ? WHERE id = ?")
            .bind(joined)
            .bind(post_id)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn refresh_pool_string(tx: &mut Transaction<'_, Sqlite>, post_id: i64) -> Result<()> {
        let pools: Vec<String> = sqlx::query_scalar(
            "SELECT pool_name FROM pool_posts WHERE post_id = ? ORDER BY pool_name",
        )
        .bind(post_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(store_err)?;
        let joined = pools
            .iter()
            .map(|name| format!("pool:{name}"))
            .collect::<Vec<_>>()
            .join(" ");
        sqlx::query("UPDATE posts SET pool_string = ? WHERE id = ?")
            .bind(joined)
            .bind(post_id)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn apply_counts(
        tx: &mut Transaction<'_, Sqlite>,
        post_id: i64,
        counts: CategoryCounts,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE posts SET tag_count = ?, tag_count_general = ?, tag_count_artist = ?,
               tag_count_copyright = ?, tag_count_character = ?
             WHERE id = ?",
        )
        .bind(counts.total())
        .bind(counts.general)
        .bind(counts.artist)
        .bind(counts.copyright)
        .bind(counts.character)
        .bind(post_id)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        self.pool.begin().await.map_err(store_err)
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn post(&self, id: i64) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(post_from_row))
    }

    async fn removed_post(&self, id: i64) -> Result<Option<RemovedPost>> {
        let row = sqlx::query("SELECT * FROM removed_posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(removed_from_row))
    }

    async fn children_of(&self, id: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query("SELECT * FROM posts WHERE parent_id = ? ORDER BY id ASC")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(post_from_row).collect())
    }

    async fn tag(&self, name: &str) -> Result<Option<Tag>> {
        let row = sqlx::query("SELECT * FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(tag_from_row))
    }

    async fn tags_named(&self, names: &[String]) -> Result<Vec<Tag>> {
        let mut found = Vec::with_capacity(names.len());
        for name in names {
            if let Some(tag) = self.tag(name).await? {
                found.push(tag);
            }
        }
        Ok(found)
    }

    async fn versions_of(&self, post_id: i64) -> Result<Vec<PostVersion>> {
        let rows =
            sqlx::query("SELECT * FROM post_versions WHERE post_id = ? ORDER BY number ASC")
                .bind(post_id)
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        rows.iter().map(version_from_row).collect()
    }

    async fn has_active_unapproval(&self, post_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM unapprovals WHERE post_id = ? AND is_active = 1",
        )
        .bind(post_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(count > 0)
    }

    async fn post_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(count as u64)
    }

    async fn removed_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM removed_posts")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(count as u64)
    }

    async fn create_post(
        &self,
        new: NewPost,
        added: Vec<String>,
        counts: CategoryCounts,
        version_by: VersionDraft,
    ) -> Result<Post> {
        let mut tx = self.begin().await?;
        let now: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            "INSERT INTO posts (tag_string, tag_count, tag_count_general, tag_count_artist,
               tag_count_copyright, tag_count_character, parent_id, uploader_id, uploader_name,
               rating, source, md5, width, height, uploader_string, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.tag_string)
        .bind(counts.total())
        .bind(counts.general)
        .bind(counts.artist)
        .bind(counts.copyright)
        .bind(counts.character)
        .bind(new.parent_id)
        .bind(new.uploader_id)
        .bind(&new.uploader_name)
        .bind(new.rating.as_char().to_string())
        .bind(&new.source)
        .bind(&new.md5)
        .bind(new.width)
        .bind(new.height)
        .bind(format!("uploader:{}", new.uploader_name))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        let id = result.last_insert_rowid();

        Self::rewrite_post_tags(&mut tx, id, &new.tag_string).await?;
        Self::count_tags_in(&mut tx, &added).await?;
        if let Some(parent) = new.parent_id {
            Self::refresh_has_children(&mut tx, parent).await?;
        }
        let post = Self::require_post(&mut tx, id).await?;
        Self::append_version(&mut tx, &post, &version_by).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(post)
    }

    async fn commit_tag_edit(&self, commit: TagEditCommit) -> Result<Post> {
        let mut tx = self.begin().await?;
        let before = Self::require_post(&mut tx, commit.post_id).await?;

        sqlx::query("UPDATE posts SET tag_string = ?, updated_at = ? WHERE id = ?")
            .bind(&commit.tag_string)
            .bind(Utc::now())
            .bind(commit.post_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        Self::apply_counts(&mut tx, commit.post_id, commit.counts).await?;
        if let Some(rating) = commit.rating {
            sqlx::query("UPDATE posts SET rating = ? WHERE id = ?")
                .bind(rating.as_char().to_string())
                .bind(commit.post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        if let Some(source) = &commit.source {
            sqlx::query("UPDATE posts SET source = ? WHERE id = ?")
                .bind(source)
                .bind(commit.post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        Self::rewrite_post_tags(&mut tx, commit.post_id, &commit.tag_string).await?;

        if before.is_active() {
            Self::count_tags_out(&mut tx, &commit.removed).await?;
            Self::count_tags_in(&mut tx, &commit.added).await?;
        } else {
            Self::ensure_tags(&mut tx, &commit.added).await?;
        }

        let post = Self::require_post(&mut tx, commit.post_id).await?;
        Self::append_version(&mut tx, &post, &commit.version_by).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(post)
    }

    async fn commit_update(
        &self,
        post_id: i64,
        update: PostUpdate,
        version_by: VersionDraft,
    ) -> Result<Post> {
        let mut tx = self.begin().await?;
        let before = Self::require_post(&mut tx, post_id).await?;

        if let Some(rating) = update.rating {
            sqlx::query("UPDATE posts SET rating = ? WHERE id = ?")
                .bind(rating.as_char().to_string())
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        if let Some(source) = &update.source {
            sqlx::query("UPDATE posts SET source = ? WHERE id = ?")
                .bind(source)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        if let Some(parent) = update.parent_id {
            sqlx::query("UPDATE posts SET parent_id = ? WHERE id = ?")
                .bind(parent)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        if let Some(pending) = update.is_pending {
            sqlx::query("UPDATE posts SET is_pending = ? WHERE id = ?")
                .bind(pending)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        if let Some(flagged) = update.is_flagged {
            sqlx::query("UPDATE posts SET is_flagged = ? WHERE id = ?")
                .bind(flagged)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        if let Some(deleted) = update.is_deleted {
            sqlx::query("UPDATE posts SET is_deleted = ? WHERE id = ?")
                .bind(deleted)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        if let Some(approver) = update.approver_id {
            sqlx::query("UPDATE posts SET approver_id = ? WHERE id = ? AND approver_id IS NULL")
                .bind(approver)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        sqlx::query("UPDATE posts SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let after = Self::require_post(&mut tx, post_id).await?;
        let tags = after.tags();
        if before.is_active() && !after.is_active() {
            Self::count_tags_out(&mut tx, &tags).await?;
        } else if !before.is_active() && after.is_active() {
            Self::count_tags_in(&mut tx, &tags).await?;
        }
        // Clearing the flag settles the active unapproval, freeing the
        // post to be unapproved again later.
        if update.is_flagged == Some(false) {
            sqlx::query("UPDATE unapprovals SET is_active = 0 WHERE post_id = ?")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        if before.parent_id != after.parent_id {
            if let Some(parent) = before.parent_id {
                Self::refresh_has_children(&mut tx, parent).await?;
            }
            if let Some(parent) = after.parent_id {
                Self::refresh_has_children(&mut tx, parent).await?;
            }
        }

        Self::append_version(&mut tx, &after, &version_by).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(after)
    }

    async fn commit_unapproval(
        &self,
        post_id: i64,
        reason: String,
        version_by: VersionDraft,
    ) -> Result<Post> {
        let mut tx = self.begin().await?;
        Self::require_post(&mut tx, post_id).await?;
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM unapprovals WHERE post_id = ? AND is_active = 1",
        )
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;
        if active > 0 {
            return Err(UnapprovalError::AlreadyUnapproved(post_id).into());
        }
        sqlx::query(
            "INSERT INTO unapprovals (post_id, reason, moderator_id, ip, is_active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(post_id)
        .bind(&reason)
        .bind(version_by.updater_id)
        .bind(&version_by.updater_ip)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        sqlx::query("UPDATE posts SET is_flagged = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let post = Self::require_post(&mut tx, post_id).await?;
        Self::append_version(&mut tx, &post, &version_by).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(post)
    }

    async fn commit_vote(
        &self,
        post_id: i64,
        user_id: i64,
        delta: i64,
        version_by: VersionDraft,
    ) -> Result<Post> {
        let mut tx = self.begin().await?;
        Self::require_post(&mut tx, post_id).await?;
        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE user_id = ? AND post_id = ?")
                .bind(user_id)
                .bind(post_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err)?;
        if existing > 0 {
            return Err(VoteError::Duplicate { user_id, post_id }.into());
        }
        sqlx::query("INSERT INTO votes (user_id, post_id, delta) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(post_id)
            .bind(delta)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        sqlx::query("UPDATE posts SET score = score + ?, updated_at = ? WHERE id = ?")
            .bind(delta)
            .bind(Utc::now())
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let post = Self::require_post(&mut tx, post_id).await?;
        Self::append_version(&mut tx, &post, &version_by).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(post)
    }

    async fn commit_removal(&self, plan: RemovalPlan) -> Result<RemovedPost> {
        let mut tx = self.begin().await?;
        let post = Self::require_post(&mut tx, plan.post_id).await?;

        if post.is_active() {
            Self::count_tags_out(&mut tx, &post.tags()).await?;
        }

        if let Some(target) = plan.reassign_favorites_to {
            let target_exists = Self::load_post(&mut tx, target).await?.is_some();
            if target_exists {
                sqlx::query(
                    "INSERT OR IGNORE INTO favorites (user_name, post_id)
                     SELECT user_name, ? FROM favorites WHERE post_id = ?",
                )
                .bind(target)
                .bind(plan.post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            sqlx::query("DELETE FROM favorites WHERE post_id = ?")
                .bind(plan.post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            if target_exists {
                Self::refresh_fav_string(&mut tx, target).await?;
            }
        } else {
            sqlx::query("DELETE FROM favorites WHERE post_id = ?")
                .bind(plan.post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }

        for table in ["pool_posts", "unapprovals", "votes", "post_tags"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE post_id = ?"))
                .bind(plan.post_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }

        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(plan.post_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        for edge in &plan.reparent {
            sqlx::query("UPDATE posts SET parent_id = ? WHERE id = ?")
                .bind(edge.new_parent_id)
                .bind(edge.child_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        for edge in &plan.reparent {
            if let Some(parent) = edge.new_parent_id {
                Self::refresh_has_children(&mut tx, parent).await?;
            }
        }
        if let Some(edge) = plan.reparent.first() {
            Self::refresh_has_children(&mut tx, edge.child_id).await?;
        }
        if let Some(parent) = post.parent_id {
            Self::refresh_has_children(&mut tx, parent).await?;
        }

        let removed_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO removed_posts (post_id, tag_string, tag_count, tag_count_general,
               tag_count_artist, tag_count_copyright, tag_count_character, parent_id,
               has_children, is_pending, is_flagged, is_deleted, approver_id, uploader_id,
               uploader_name, score, rating, source, md5, width, height, fav_string,
               pool_string, uploader_string, created_at, updated_at, removed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(post.id)
        .bind(&post.tag_string)
        .bind(post.tag_count)
        .bind(post.tag_count_general)
        .bind(post.tag_count_artist)
        .bind(post.tag_count_copyright)
        .bind(post.tag_count_character)
        .bind(post.parent_id)
        .bind(post.has_children)
        .bind(post.is_pending)
        .bind(post.is_flagged)
        .bind(post.is_deleted)
        .bind(post.approver_id)
        .bind(post.uploader_id)
        .bind(&post.uploader_name)
        .bind(post.score)
        .bind(post.rating.as_char().to_string())
        .bind(&post.source)
        .bind(&post.md5)
        .bind(post.width)
        .bind(post.height)
        .bind(&post.fav_string)
        .bind(&post.pool_string)
        .bind(&post.uploader_string)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(removed_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        let archive_id = result.last_insert_rowid();
        tx.commit().await.map_err(store_err)?;

        Ok(RemovedPost {
            id: archive_id,
            post,
            removed_at,
        })
    }

    async fn commit_restore(&self, removed_id: i64, version_by: VersionDraft) -> Result<Post> {
        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT * FROM removed_posts WHERE id = ?")
            .bind(removed_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?;
        let archived = row
            .as_ref()
            .map(removed_from_row)
            .ok_or(CatalogError::NotFound("removed post", removed_id))?;
        let mut post = archived.post;
        post.parent_id = None;
        post.updated_at = Utc::now();

        sqlx::query(
            "INSERT INTO posts (id, tag_string, tag_count, tag_count_general, tag_count_artist,
               tag_count_copyright, tag_count_character, parent_id, has_children, is_pending,
               is_flagged, is_deleted, approver_id, uploader_id, uploader_name, score, rating,
               source, md5, width, height, fav_string, pool_string, uploader_string,
               created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(post.id)
        .bind(&post.tag_string)
        .bind(post.tag_count)
        .bind(post.tag_count_general)
        .bind(post.tag_count_artist)
        .bind(post.tag_count_copyright)
        .bind(post.tag_count_character)
        .bind(post.is_pending)
        .bind(post.is_flagged)
        .bind(post.is_deleted)
        .bind(post.approver_id)
        .bind(post.uploader_id)
        .bind(&post.uploader_name)
        .bind(post.score)
        .bind(post.rating.as_char().to_string())
        .bind(&post.source)
        .bind(&post.md5)
        .bind(post.width)
        .bind(post.height)
        .bind(&post.fav_string)
        .bind(&post.pool_string)
        .bind(&post.uploader_string)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        Self::rewrite_post_tags(&mut tx, post.id, &post.tag_string).await?;
        if post.is_active() {
            Self::count_tags_in(&mut tx, &post.tags()).await?;
        }
        Self::refresh_has_children(&mut tx, post.id).await?;
        sqlx::query("DELETE FROM removed_posts WHERE id = ?")
            .bind(removed_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let restored = Self::require_post(&mut tx, post.id).await?;
        Self::append_version(&mut tx, &restored, &version_by).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(restored)
    }

    async fn add_favorite(&self, post_id: i64, user_name: &str) -> Result<Post> {
        let mut tx = self.begin().await?;
        Self::require_post(&mut tx, post_id).await?;
        sqlx::query("INSERT OR IGNORE INTO favorites (user_name, post_id) VALUES (?, ?)")
            .bind(user_name)
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        Self::refresh_fav_string(&mut tx, post_id).await?;
        let post = Self::require_post(&mut tx, post_id).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(post)
    }

    async fn add_to_pool(&self, post_id: i64, pool_name: &str) -> Result<Post> {
        let mut tx = self.begin().await?;
        Self::require_post(&mut tx, post_id).await?;
        let next_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM pool_posts WHERE pool_name = ?",
        )
        .bind(pool_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;
        sqlx::query(
            "INSERT OR IGNORE INTO pool_posts (pool_name, post_id, seq) VALUES (?, ?, ?)",
        )
        .bind(pool_name)
        .bind(post_id)
        .bind(next_seq)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        Self::refresh_pool_string(&mut tx, post_id).await?;
        let post = Self::require_post(&mut tx, post_id).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(post)
    }

    async fn search(&self, plan: &QueryPlan, page: Page) -> Result<Vec<Post>> {
        let mut args = Vec::new();
        let conditions: Vec<String> = plan
            .filters
            .iter()
            .map(|predicate| predicate_sql(predicate, &mut args))
            .collect();
        let where_clause = if conditions.is_empty() {
            "1 = 1".to_string()
        } else {
            conditions.join(" AND ")
        };
        let sql = format!(
            "SELECT p.* FROM posts p WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
            where_clause,
            order_sql(plan.order)
        );
        tracing::debug!(%sql, "executing search");

        let mut query = sqlx::query(&sql);
        for arg in args {
            query = match arg {
                Arg::Int(value) => query.bind(value),
                Arg::Text(value) => query.bind(value),
            };
        }
        query = query.bind(page.limit as i64).bind(page.offset() as i64);

        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;
        Ok(rows.iter().map(post_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> VersionDraft {
        VersionDraft {
            updater_id: 1,
            updater_ip: "127.0.0.1".to_string(),
        }
    }

    fn new_post(tags: &str, md5: &str) -> NewPost {
        NewPost {
            uploader_id: 1,
            uploader_name: "tester".to_string(),
            tag_string: tags.to_string(),
            rating: Rating::Safe,
            source: String::new(),
            md5: md5.to_string(),
            width: 100,
            height: 100,
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn create_search_and_version_round_trip() {
        let catalog = SqliteCatalog::new("sqlite::memory:").await.unwrap();
        let tags = vec!["aaa".to_string(), "bbb".to_string()];
        let counts = CategoryCounts {
            general: 2,
            ..CategoryCounts::default()
        };
        let post = catalog
            .create_post(new_post("aaa bbb", "m1"), tags, counts, draft())
            .await
            .unwrap();

        assert_eq!(catalog.tag("aaa").await.unwrap().unwrap().post_count, 1);
        assert_eq!(catalog.versions_of(post.id).await.unwrap().len(), 1);

        let plan = QueryPlan {
            filters: vec![
                PostPredicate::HasTag("aaa".to_string()),
                PostPredicate::StatusIs(StatusFilter::Active),
            ],
            order: PostOrder::IdDesc,
        };
        let hits = catalog.search(&plan, Page::new(1, 20)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, post.id);
    }

    #[tokio::test]
    async fn removal_is_a_transactional_move() {
        let catalog = SqliteCatalog::new("sqlite::memory:").await.unwrap();
        let post = catalog
            .create_post(
                new_post("ccc", "m2"),
                vec!["ccc".to_string()],
                CategoryCounts {
                    general: 1,
                    ..CategoryCounts::default()
                },
                draft(),
            )
            .await
            .unwrap();

        let archived = catalog
            .commit_removal(RemovalPlan {
                post_id: post.id,
                reassign_favorites_to: None,
                reparent: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(archived.post.tag_string, "ccc");
        assert_eq!(catalog.post_count().await.unwrap(), 0);
        assert_eq!(catalog.removed_count().await.unwrap(), 1);
        assert_eq!(catalog.tag("ccc").await.unwrap().unwrap().post_count, 0);
    }
}
