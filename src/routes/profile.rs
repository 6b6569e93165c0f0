use askama::Template;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::db::models::UserProfile;
use crate::error::AppResult;
use crate::extractors::PageContext;
use crate::feed::ProfileAssembler;
use crate::routes::{Html, Layout, PostCard};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/profile.html")]
pub struct ProfileTemplate {
    pub layout: Layout,
    pub user: UserProfile,
    pub posts: Vec<PostCard>,
}

impl ProfileTemplate {
    pub fn display_name(&self) -> &str {
        self.user.display_name.as_deref().unwrap_or("Anonymous")
    }
}

#[derive(Template)]
#[template(path = "pages/user_not_found.html")]
pub struct UserNotFoundTemplate {
    pub layout: Layout,
}

/// GET /profile/{uid}
pub async fn show(
    State(state): State<AppState>,
    page: PageContext,
    Path(uid): Path<String>,
) -> AppResult<Response> {
    let profile = ProfileAssembler::new(state.services.clone())
        .assemble(&uid, page.viewer.as_ref())
        .await?;

    let Some(user) = profile.user else {
        return Ok((
            StatusCode::NOT_FOUND,
            Html(UserNotFoundTemplate {
                layout: page.into(),
            }),
        )
            .into_response());
    };

    let mut posts = profile.posts;
    posts.load_interactions().await;
    Ok(Html(ProfileTemplate {
        layout: page.into(),
        user,
        posts: posts.engines().iter().map(PostCard::from).collect(),
    })
    .into_response())
}
