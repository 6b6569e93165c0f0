use askama::Template;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};

use crate::error::AppResult;
use crate::extractors::{PageContext, Theme, THEME_COOKIE};
use crate::feed::FeedAssembler;
use crate::routes::{back_to, Html, Layout, PostCard};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/feed.html")]
pub struct FeedTemplate {
    pub layout: Layout,
    pub posts: Vec<PostCard>,
}

/// GET / — the newest posts.
pub async fn index(State(state): State<AppState>, page: PageContext) -> AppResult<Response> {
    let assembler = FeedAssembler::new(state.services.clone(), state.config.feed.limit);
    let mut feed = assembler.assemble(page.viewer.as_ref()).await?;
    feed.load_interactions().await;

    let posts = feed.engines().iter().map(PostCard::from).collect();
    Ok(Html(FeedTemplate {
        layout: page.into(),
        posts,
    })
    .into_response())
}

/// POST /theme — flip between light and dark.
pub async fn toggle_theme(theme: Theme, headers: HeaderMap) -> Response {
    let next = theme.toggled();
    let cookie = format!(
        "{}={}; SameSite=Lax; Path=/; Max-Age=31536000",
        THEME_COOKIE,
        next.as_str()
    );
    ([(header::SET_COOKIE, cookie)], back_to(&headers, "/")).into_response()
}
