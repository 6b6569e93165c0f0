use askama::Template;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::auth::{self, clear_session_cookie, cookie_value, session_cookie};
use crate::error::{AppError, AppResult};
use crate::extractors::PageContext;
use crate::identity::SignInRequest;
use crate::routes::{Html, Layout};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub layout: Layout,
    pub email: String,
    pub display_name: String,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub photo_url: String,
    /// "cancel" when the user dismissed the form.
    #[serde(default)]
    pub action: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/logout", post(logout))
}

/// GET /login
async fn login_page(page: PageContext) -> Response {
    if page.viewer.is_some() {
        return Redirect::to("/").into_response();
    }
    Html(LoginTemplate {
        layout: page.into(),
        email: String::new(),
        display_name: String::new(),
        error: None,
    })
    .into_response()
}

/// POST /login — sign in through the identity provider and open a session.
async fn login(
    State(state): State<AppState>,
    page: PageContext,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let request = SignInRequest {
        email: form.email.clone(),
        password: form.password,
        display_name: Some(form.display_name.clone()),
        photo_url: Some(form.photo_url),
        cancelled: form.action == "cancel",
    };

    match auth::sign_in(&state, request).await {
        Ok(signed) => {
            let cookie = session_cookie(
                &state.config.auth.cookie_name,
                &signed.token,
                state.config.auth.session_hours,
            );
            Ok((
                StatusCode::SEE_OTHER,
                [
                    (header::LOCATION, "/".to_string()),
                    (header::SET_COOKIE, cookie),
                ],
                "",
            )
                .into_response())
        }
        // Dismissing the prompt is not an error worth showing.
        Err(AppError::Cancelled) => Ok(Redirect::to("/").into_response()),
        Err(e @ AppError::Validation(_)) => Ok((
            StatusCode::BAD_REQUEST,
            Html(LoginTemplate {
                layout: page.into(),
                email: form.email,
                display_name: form.display_name,
                error: Some(e.user_message()),
            }),
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

/// POST /logout — delete session and redirect
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;
    if let Some(token) = cookie_value(&headers, cookie_name) {
        if let Err(e) = auth::sign_out(&state, token).await {
            tracing::warn!("Failed to end session: {}", e);
        }
    }

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, clear_session_cookie(cookie_name)),
        ],
        "",
    )
        .into_response())
}
