//! # API Handlers
//!
//! This module coordinates the flow between HTTP requests and the post
//! service. Handlers only translate: JSON in, service call, JSON or
//! mapped error out. Identity arrives in the request body because
//! authentication lives outside this system.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use domains::error::CatalogError;
use domains::models::{Editor, Rating};
use domains::query::Page;
use services::{CreatePost, PostService};

/// State shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PostService>,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl AppState {
    fn page(&self, number: Option<u32>, limit: Option<u32>) -> Page {
        let limit = limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        Page::new(number.unwrap_or(1), limit)
    }
}

/// Domain errors mapped onto HTTP statuses.
pub struct ApiError(CatalogError);

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CatalogError::NotFound(..) => StatusCode::NOT_FOUND,
            CatalogError::Query(_) | CatalogError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CatalogError::Unapproval(_) | CatalogError::Vote(_) => StatusCode::CONFLICT,
            CatalogError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Deserialize)]
pub struct EditorDto {
    pub user_id: i64,
    pub name: String,
    pub ip: String,
}

impl From<EditorDto> for Editor {
    fn from(dto: EditorDto) -> Self {
        Editor {
            user_id: dto.user_id,
            name: dto.name,
            ip: dto.ip,
        }
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub tags: String,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Response> {
    let page = state.page(params.page, params.limit);
    let posts = state.service.search(&params.tags, page).await?;
    Ok(Json(posts).into_response())
}

pub async fn show(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let posts = state
        .service
        .search(&format!("id:{id} status:any"), Page::new(1, 1))
        .await?;
    match posts.into_iter().next() {
        Some(post) => Ok(Json(post).into_response()),
        None => Err(CatalogError::NotFound("post", id).into()),
    }
}

#[derive(Deserialize)]
pub struct CreatePostBody {
    pub tags: String,
    pub rating: Option<String>,
    #[serde(default)]
    pub source: String,
    pub md5: String,
    pub width: i64,
    pub height: i64,
    pub parent_id: Option<i64>,
    pub editor: EditorDto,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreatePostBody>,
) -> ApiResult<Response> {
    let rating = body
        .rating
        .as_deref()
        .and_then(Rating::parse)
        .unwrap_or(Rating::Questionable);
    let input = CreatePost {
        tag_string: body.tags,
        rating,
        source: body.source,
        md5: body.md5,
        width: body.width,
        height: body.height,
        parent_id: body.parent_id,
    };
    let post = state.service.create_post(input, &body.editor.into()).await?;
    Ok((StatusCode::CREATED, Json(post)).into_response())
}

#[derive(Deserialize)]
pub struct TagEditBody {
    /// The tag string the editor loaded before making changes.
    pub old_tags: String,
    pub new_tags: String,
    pub editor: EditorDto,
}

pub async fn edit_tags(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<TagEditBody>,
) -> ApiResult<Response> {
    let post = state
        .service
        .save_tag_edit(id, &body.old_tags, &body.new_tags, &body.editor.into())
        .await?;
    Ok(Json(post).into_response())
}

#[derive(Deserialize)]
pub struct ModerationBody {
    pub editor: EditorDto,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ModerationBody>,
) -> ApiResult<Response> {
    let post = state.service.approve(id, &body.editor.into()).await?;
    Ok(Json(post).into_response())
}

#[derive(Deserialize)]
pub struct UnapproveBody {
    pub reason: String,
    pub editor: EditorDto,
}

pub async fn unapprove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UnapproveBody>,
) -> ApiResult<Response> {
    let post = state
        .service
        .unapprove(id, &body.reason, &body.editor.into())
        .await?;
    Ok(Json(post).into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ModerationBody>,
) -> ApiResult<Response> {
    let post = state.service.delete(id, &body.editor.into()).await?;
    Ok(Json(post).into_response())
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ModerationBody>,
) -> ApiResult<Response> {
    let removed = state.service.remove(id, &body.editor.into()).await?;
    Ok(Json(removed).into_response())
}

pub async fn restore(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ModerationBody>,
) -> ApiResult<Response> {
    let post = state.service.undelete(id, &body.editor.into()).await?;
    Ok(Json(post).into_response())
}

#[derive(Deserialize)]
pub struct ParentBody {
    pub parent_id: Option<i64>,
    pub editor: EditorDto,
}

pub async fn set_parent(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ParentBody>,
) -> ApiResult<Response> {
    let post = state
        .service
        .set_parent(id, body.parent_id, &body.editor.into())
        .await?;
    Ok(Json(post).into_response())
}

#[derive(Deserialize)]
pub struct VoteBody {
    pub up: bool,
    pub editor: EditorDto,
}

pub async fn vote(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<VoteBody>,
) -> ApiResult<Response> {
    let post = state.service.vote(id, &body.editor.into(), body.up).await?;
    Ok(Json(post).into_response())
}

#[derive(Deserialize)]
pub struct RevertBody {
    pub version: i64,
    pub editor: EditorDto,
}

pub async fn revert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RevertBody>,
) -> ApiResult<Response> {
    let post = state
        .service
        .revert_to(id, body.version, &body.editor.into())
        .await?;
    Ok(Json(post).into_response())
}

pub async fn versions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let versions = state.service.versions(id).await?;
    Ok(Json(versions).into_response())
}
