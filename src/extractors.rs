use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::{cookie_value, session};
use crate::db::models::Viewer;
use crate::error::AppError;
use crate::state::AppState;

pub const THEME_COOKIE: &str = "theme";

/// The signed-in viewer. Rejects with 401 when there is no valid session.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Viewer);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = cookie_value(&parts.headers, &state.config.auth.cookie_name)
            .ok_or(AppError::Unauthenticated)?;
        session::find_session(&state.db, token)?
            .map(CurrentUser)
            .ok_or(AppError::Unauthenticated)
    }
}

/// Optional viewer: `None` instead of 401 when not signed in.
pub struct MaybeUser(pub Option<Viewer>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(CurrentUser(viewer)) => Ok(MaybeUser(Some(viewer))),
            Err(AppError::Unauthenticated) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn parse(value: &str) -> Self {
        match value {
            "dark" => Theme::Dark,
            _ => Theme::Light,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Theme {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(cookie_value(&parts.headers, THEME_COOKIE)
            .map(Theme::parse)
            .unwrap_or_default())
    }
}

/// Everything the page chrome needs: viewer, theme and the viewer's pending
/// toasts. Extracting it drains the toasts, so only page renders use it.
pub struct PageContext {
    pub viewer: Option<Viewer>,
    pub theme: Theme,
    pub toasts: Vec<String>,
}

impl FromRequestParts<AppState> for PageContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let MaybeUser(viewer) = MaybeUser::from_request_parts(parts, state).await?;
        let theme = Theme::from_request_parts(parts, state)
            .await
            .unwrap_or_default();
        let toasts = viewer
            .as_ref()
            .map(|v| state.toasts.drain(&v.uid))
            .unwrap_or_default();
        Ok(PageContext {
            viewer,
            theme,
            toasts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_parses_known_values_only() {
        assert_eq!(Theme::parse("dark"), Theme::Dark);
        assert_eq!(Theme::parse("light"), Theme::Light);
        assert_eq!(Theme::parse("neon"), Theme::Light);
    }

    #[test]
    fn theme_toggles_both_ways() {
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
        assert_eq!(Theme::Dark.toggled().as_str(), "light");
    }
}
