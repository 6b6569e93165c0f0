pub mod assets;
pub mod auth;
pub mod compose;
pub mod home;
pub mod posts;
pub mod profile;

use askama::Template;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::db::models::Viewer;
use crate::engine::PostEngine;
use crate::extractors::{PageContext, Theme};
use crate::state::AppState;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home::index))
        .route("/theme", post(home::toggle_theme))
        .route("/assets/{*path}", get(assets::serve))
        .route("/uploads/{*key}", get(assets::upload))
        .route("/profile/{uid}", get(profile::show))
        .merge(auth::router())
        .merge(compose::router())
        .merge(posts::router())
}

/// Multipart overhead allowed on top of the image limit.
const FORM_SLACK_BYTES: usize = 64 * 1024;

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.storage.max_upload_bytes + FORM_SLACK_BYTES;
    router()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// Page chrome shared by every template.
pub struct Layout {
    pub theme: Theme,
    pub viewer: Option<Viewer>,
    pub toasts: Vec<String>,
}

impl From<PageContext> for Layout {
    fn from(page: PageContext) -> Self {
        Self {
            theme: page.theme,
            viewer: page.viewer,
            toasts: page.toasts,
        }
    }
}

impl Layout {
    pub fn theme_name(&self) -> &'static str {
        self.theme.as_str()
    }

    pub fn viewer_name(&self) -> &str {
        self.viewer
            .as_ref()
            .and_then(|v| v.display_name.as_deref())
            .unwrap_or("Anonymous")
    }
}

/// What a post card shows, read off its engine.
pub struct PostCard {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub author: String,
    pub author_uid: String,
    pub created_at: String,
    pub is_owner: bool,
    pub signed_in: bool,
    /// `None` while unknown; the count is hidden rather than shown as zero.
    pub like_count: Option<usize>,
    pub liked: bool,
    pub comment_count: Option<usize>,
}

impl From<&PostEngine> for PostCard {
    fn from(engine: &PostEngine) -> Self {
        let post = engine.post();
        let likes = engine.like_summary();
        Self {
            id: post.id.clone(),
            title: post.title.clone(),
            description: post.description.clone(),
            image_url: post.image_url.clone(),
            author: post.author_name().to_string(),
            author_uid: post.user_id.clone(),
            created_at: post
                .created_at
                .as_deref()
                .map(parse_and_format_time)
                .unwrap_or_default(),
            is_owner: engine.is_owner(),
            signed_in: engine.viewer().is_some(),
            like_count: likes.map(|l| l.count),
            liked: likes.map(|l| l.viewer_has_liked).unwrap_or(false),
            comment_count: engine.comments().map(|c| c.len()),
        }
    }
}

/// Redirect to the page the form was posted from, or `fallback`.
pub fn back_to(headers: &HeaderMap, fallback: &str) -> Redirect {
    let target = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(local_path)
        .unwrap_or(fallback);
    Redirect::to(target)
}

/// The path part of a same-site referer. Absolute URLs are reduced to their
/// path; anything that is not a plain path is refused.
fn local_path(referer: &str) -> Option<&str> {
    let path = match referer.split_once("://") {
        Some((_, rest)) => &rest[rest.find('/')?..],
        None => referer,
    };
    (path.starts_with('/') && !path.starts_with("//")).then_some(path)
}

// --- Time formatting ---

pub fn parse_and_format_time(stored: &str) -> String {
    DateTime::parse_from_rfc3339(stored)
        .map(|dt| format_relative_time(&dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| stored.to_string())
}

pub fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let diff = Utc::now().signed_duration_since(*dt);

    let seconds = diff.num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = diff.num_minutes();
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }

    let hours = diff.num_hours();
    if hours < 24 {
        return format!("{}h ago", hours);
    }

    let days = diff.num_days();
    if days < 7 {
        return format!("{}d ago", days);
    }

    dt.format("%b %-d, %Y").to_string()
}
