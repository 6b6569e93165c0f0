//! Per-post interactions: likes, comments, editing and deletion.
//!
//! Each request opens a fresh engine for the post and drives it through the
//! same transitions an interactive client would.

use askama::Template;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::db::models::{Comment, Viewer};
use crate::engine::{DeleteOutcome, Draft, EditMode, Outcome, PostEngine, MAX_COMMENT_LEN};
use crate::error::{AppError, AppResult};
use crate::extractors::{MaybeUser, PageContext};
use crate::notify::NotificationSink;
use crate::routes::{back_to, parse_and_format_time, Html, Layout, PostCard};
use crate::state::AppState;

// --- View structs ---

pub struct CommentView {
    pub author: String,
    pub author_uid: String,
    pub text: String,
    pub created_at: String,
}

impl From<&Comment> for CommentView {
    fn from(comment: &Comment) -> Self {
        Self {
            author: comment
                .username
                .clone()
                .unwrap_or_else(|| "Anonymous".to_string()),
            author_uid: comment.user_id.clone(),
            text: comment.text.clone(),
            created_at: comment
                .created_at
                .as_deref()
                .map(parse_and_format_time)
                .unwrap_or_default(),
        }
    }
}

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/comments.html")]
pub struct CommentsTemplate {
    pub layout: Layout,
    pub post: PostCard,
    /// `None` when the comments could not be loaded.
    pub comments: Option<Vec<CommentView>>,
    pub input: String,
    pub error: Option<String>,
    pub max_len: usize,
}

#[derive(Template)]
#[template(path = "pages/edit_post.html")]
pub struct EditPostTemplate {
    pub layout: Layout,
    pub post_id: String,
    pub draft: Draft,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "pages/confirm_delete.html")]
pub struct ConfirmDeleteTemplate {
    pub layout: Layout,
    pub post: PostCard,
    pub error: Option<String>,
}

// --- Forms ---

#[derive(Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize)]
pub struct EditForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// "cancel" discards the draft; anything else saves it.
    #[serde(default)]
    pub action: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/{id}/likes", post(toggle_like))
        .route(
            "/posts/{id}/comments",
            get(comments_page).post(add_comment),
        )
        .route("/posts/{id}/edit", get(edit_page).post(save_edit))
        .route("/posts/{id}/delete", get(confirm_page).post(delete_post))
}

async fn open(state: &AppState, id: &str, viewer: Option<Viewer>) -> AppResult<PostEngine> {
    PostEngine::open(state.services.clone(), id, viewer).await
}

/// Failures the viewer should see but that have no form to show them next to.
fn toast_failure(state: &AppState, viewer: &Viewer, err: &AppError) {
    tracing::warn!("Action by {} failed: {}", viewer.uid, err);
    state.toasts.enqueue(&viewer.uid, &err.user_message());
}

// --- Handlers ---

/// POST /posts/{id}/likes
async fn toggle_like(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let Some(viewer) = viewer else {
        return Ok(Redirect::to("/login").into_response());
    };
    let mut engine = open(&state, &id, Some(viewer.clone())).await?;

    match engine.toggle_like().await {
        Ok(result) => tracing::debug!("Like toggle on {} by {}: {:?}", id, viewer.uid, result),
        Err(e) => toast_failure(&state, &viewer, &e),
    }
    Ok(back_to(&headers, "/").into_response())
}

/// GET /posts/{id}/comments
async fn comments_page(
    State(state): State<AppState>,
    page: PageContext,
    Path(id): Path<String>,
) -> AppResult<Html<CommentsTemplate>> {
    let mut engine = open(&state, &id, page.viewer.clone()).await?;
    if let Err(e) = engine.load().await {
        tracing::warn!("Post {} shown with partial interactions: {}", id, e);
    }
    Ok(Html(comments_template(page.into(), &engine, None)))
}

/// POST /posts/{id}/comments
async fn add_comment(
    State(state): State<AppState>,
    page: PageContext,
    Path(id): Path<String>,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    if page.viewer.is_none() {
        return Ok(Redirect::to("/login").into_response());
    }
    let mut engine = open(&state, &id, page.viewer.clone()).await?;

    match engine.add_comment(&form.text).await {
        Ok(_) => Ok(Redirect::to(&format!("/posts/{}/comments", id)).into_response()),
        Err(e @ (AppError::Validation(_) | AppError::Unavailable(_) | AppError::PermissionDenied(_))) => {
            if let Err(load_err) = engine.load().await {
                tracing::warn!("Could not reload post {}: {}", id, load_err);
            }
            let status = match e {
                AppError::Validation(_) => StatusCode::BAD_REQUEST,
                AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            let template = comments_template(page.into(), &engine, Some(e.user_message()));
            Ok((status, Html(template)).into_response())
        }
        Err(e) => Err(e),
    }
}

fn comments_template(layout: Layout, engine: &PostEngine, error: Option<String>) -> CommentsTemplate {
    CommentsTemplate {
        layout,
        post: PostCard::from(engine),
        comments: engine
            .comments()
            .map(|comments| comments.iter().map(CommentView::from).collect()),
        input: engine.comment_input().to_string(),
        error,
        max_len: MAX_COMMENT_LEN,
    }
}

/// GET /posts/{id}/edit — owner only; anyone else is sent back.
async fn edit_page(
    State(state): State<AppState>,
    page: PageContext,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let mut engine = open(&state, &id, page.viewer.clone()).await?;
    if engine.begin_edit() == Outcome::Ignored {
        return Ok(Redirect::to("/").into_response());
    }
    match edit_template(page.into(), &engine, None) {
        Some(template) => Ok(Html(template).into_response()),
        None => Ok(Redirect::to("/").into_response()),
    }
}

/// POST /posts/{id}/edit
async fn save_edit(
    State(state): State<AppState>,
    page: PageContext,
    Path(id): Path<String>,
    Form(form): Form<EditForm>,
) -> AppResult<Response> {
    let mut engine = open(&state, &id, page.viewer.clone()).await?;
    if engine.begin_edit() == Outcome::Ignored {
        return Ok(Redirect::to("/").into_response());
    }
    engine.update_draft(&form.title, &form.description);

    if form.action == "cancel" {
        engine.cancel_edit();
        return Ok(Redirect::to("/").into_response());
    }

    match engine.save_edit().await {
        Ok(_) => Ok(Redirect::to("/").into_response()),
        Err(e) => {
            let status = match e {
                AppError::Validation(_) => StatusCode::BAD_REQUEST,
                AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                AppError::NotFound => StatusCode::NOT_FOUND,
                AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => return Err(e),
            };
            match edit_template(page.into(), &engine, Some(e.user_message())) {
                Some(template) => Ok((status, Html(template)).into_response()),
                None => Err(e),
            }
        }
    }
}

fn edit_template(layout: Layout, engine: &PostEngine, error: Option<String>) -> Option<EditPostTemplate> {
    match engine.edit_mode() {
        EditMode::Editing(draft) => Some(EditPostTemplate {
            layout,
            post_id: engine.post().id.clone(),
            draft: draft.clone(),
            error,
        }),
        _ => None,
    }
}

/// GET /posts/{id}/delete — confirmation step, owner only.
async fn confirm_page(
    State(state): State<AppState>,
    page: PageContext,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let mut engine = open(&state, &id, page.viewer.clone()).await?;
    if engine.request_delete() == Outcome::Ignored {
        return Ok(Redirect::to("/").into_response());
    }
    Ok(Html(ConfirmDeleteTemplate {
        layout: page.into(),
        post: PostCard::from(&engine),
        error: None,
    })
    .into_response())
}

/// POST /posts/{id}/delete — the confirmed delete.
async fn delete_post(
    State(state): State<AppState>,
    page: PageContext,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let mut engine = open(&state, &id, page.viewer.clone()).await?;
    engine.request_delete();

    match engine.confirm_delete().await {
        Ok(DeleteOutcome::Removed(report)) => {
            if !report.orphaned.is_empty() {
                tracing::warn!(
                    "Post {} removed with {} dependents left behind",
                    id,
                    report.orphaned.len()
                );
            }
            Ok(Redirect::to("/").into_response())
        }
        Ok(DeleteOutcome::Ignored) => Ok(Redirect::to("/").into_response()),
        Err(e) => {
            let status = match e {
                AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let template = ConfirmDeleteTemplate {
                layout: page.into(),
                post: PostCard::from(&engine),
                error: Some(e.user_message()),
            };
            Ok((status, Html(template)).into_response())
        }
    }
}
