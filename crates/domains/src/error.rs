//! # Error Taxonomy
//!
//! Centralized error handling for the catalog. Each failure family gets
//! its own enum so callers can match precisely; `CatalogError` is the
//! umbrella the port and services return. Every mutation error leaves
//! persisted state exactly as it was before the attempt.

use thiserror::Error;

/// Malformed search input. Raised by the query compiler; unrecognized
/// metatag prefixes never land here (they fall back to plain tags).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryParseError {
    /// e.g. `id:>abc`
    #[error("`{0}` is not a valid numeric comparison")]
    InvalidNumber(String),

    #[error("unknown order key `{0}`")]
    InvalidOrder(String),

    #[error("unknown status value `{0}`")]
    InvalidStatus(String),

    #[error("`{0}` is not a recognized rating")]
    InvalidRating(String),
}

/// Structural failures caught before anything is persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("parent post {0} does not exist")]
    ParentNotFound(i64),

    /// The hierarchy is at most one level deep.
    #[error("post {0} already has a parent and cannot be a parent itself")]
    ParentHasParent(i64),

    /// The other direction of the depth invariant.
    #[error("post {0} has children and cannot be given a parent")]
    HasChildren(i64),

    #[error("a post cannot be its own parent")]
    SelfParent,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnapprovalError {
    #[error("unapproval reason must not be empty")]
    EmptyReason,

    #[error("post {0} already has an active unapproval")]
    AlreadyUnapproved(i64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("user {user_id} has already voted on post {post_id}")]
    Duplicate { user_id: i64, post_id: i64 },
}

/// The primary error type for all catalog operations.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Resource not found (e.g., Post, RemovedPost, PostVersion)
    #[error("{0} not found with id {1}")]
    NotFound(&'static str, i64),

    #[error(transparent)]
    Query(#[from] QueryParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Unapproval(#[from] UnapprovalError),

    #[error(transparent)]
    Vote(#[from] VoteError),

    /// Infrastructure failure surfaced by a storage adapter.
    #[error("storage error: {0}")]
    Store(String),
}

/// A specialized Result type for catalog logic.
pub type Result<T> = std::result::Result<T, CatalogError>;
