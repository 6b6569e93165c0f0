//! Signing in and out of the board.
//!
//! The identity provider proves who the user is; this module records their
//! profile in the `users` collection and opens a cookie session.

pub mod session;

use axum::http::{header, HeaderMap};
use serde_json::json;

use crate::db::models::Viewer;
use crate::error::{AppError, AppResult};
use crate::identity::{Identity, SignInError, SignInRequest};
use crate::state::AppState;
use crate::store::{server_timestamp, to_fields, Collection};

/// A completed sign-in: who the viewer is and their session token.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub viewer: Viewer,
    pub token: String,
}

fn sign_in_error(err: SignInError) -> AppError {
    match err {
        SignInError::Cancelled => {
            tracing::warn!("Sign-in prompt dismissed");
            AppError::Cancelled
        }
        SignInError::PopupBlocked => {
            AppError::Validation("A sign-in is already in progress. Please try again.".into())
        }
        SignInError::Unavailable(msg) => AppError::Unavailable(msg),
        SignInError::Other(msg) => AppError::Validation(format!("Sign-in failed: {}.", msg)),
    }
}

/// Only one attempt per account runs at a time; the account stays marked as
/// pending until its profile is saved and the session is open.
pub async fn sign_in(state: &AppState, request: SignInRequest) -> AppResult<SignedIn> {
    let _attempt = if request.cancelled {
        None
    } else {
        Some(state.sign_ins.begin(&request.email).map_err(sign_in_error)?)
    };

    let identity = state
        .identity
        .sign_in(request)
        .await
        .map_err(sign_in_error)?;

    save_profile(state, &identity).await?;

    let viewer = Viewer::new(identity.uid, identity.display_name);
    let token = session::create_session(&state.db, &viewer, state.config.auth.session_hours)?;
    tracing::info!("Signed in {}", viewer.uid);
    Ok(SignedIn { viewer, token })
}

/// Upsert the user's profile, keeping fields written elsewhere. `createdAt`
/// is only written the first time.
async fn save_profile(state: &AppState, identity: &Identity) -> AppResult<()> {
    let services = &state.services;
    let exists = match services
        .remote(services.store.get(&Collection::Users, &identity.uid))
        .await
    {
        Ok(_) => true,
        Err(AppError::NotFound) => false,
        Err(e) => return Err(e),
    };

    let mut fields = to_fields(json!({
        "uid": identity.uid,
        "displayName": identity.display_name,
        "photoURL": identity.photo_url,
        "email": identity.email,
        "updatedAt": server_timestamp(),
    }));
    if !exists {
        fields.insert("createdAt".into(), server_timestamp());
    }

    services
        .remote(services.store.set(&Collection::Users, &identity.uid, fields, true))
        .await
}

pub async fn sign_out(state: &AppState, token: &str) -> AppResult<()> {
    if let Some(viewer) = session::find_session(&state.db, token)? {
        state.identity.sign_out(&viewer.uid).await;
    }
    session::delete_session(&state.db, token)
}

// -- Cookie helpers --

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name,
        token,
        max_age_hours * 3600
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let (key, val) = cookie.split_once('=')?;
            (key.trim() == name).then(|| val.trim())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, IdentityProvider, LocalIdentityProvider};
    use crate::testing::TestApp;
    use crate::store::DocumentStore;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn request(email: &str, name: &str) -> SignInRequest {
        SignInRequest {
            email: email.into(),
            password: "correct horse".into(),
            display_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Holds every sign-in inside the provider until released.
    struct GatedProvider {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl IdentityProvider for GatedProvider {
        async fn sign_in(&self, request: SignInRequest) -> Result<Identity, SignInError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Identity {
                uid: LocalIdentityProvider::uid_for(&request.email),
                display_name: request.display_name,
                photo_url: None,
                email: Some(request.email),
            })
        }

        async fn sign_out(&self, _uid: &str) {}
    }

    #[tokio::test]
    async fn sign_in_records_profile_and_session() {
        let app = TestApp::new();
        let signed = sign_in(&app.state, request("ada@example.com", "Ada"))
            .await
            .unwrap();

        let doc = app
            .store
            .get(&Collection::Users, &signed.viewer.uid)
            .await
            .unwrap();
        assert_eq!(doc.str_field("displayName"), Some("Ada"));
        assert_eq!(doc.str_field("email"), Some("ada@example.com"));
        assert!(doc.str_field("createdAt").is_some());
        assert_eq!(
            session::find_session(&app.state.db, &signed.token).unwrap(),
            Some(signed.viewer.clone())
        );
    }

    #[tokio::test]
    async fn second_sign_in_keeps_created_at_and_extra_fields() {
        let app = TestApp::new();
        let first = sign_in(&app.state, request("ada@example.com", "Ada"))
            .await
            .unwrap();
        let uid = first.viewer.uid.clone();
        let created = app
            .store
            .get(&Collection::Users, &uid)
            .await
            .unwrap()
            .str_field("createdAt")
            .map(str::to_string);
        app.store
            .update(&Collection::Users, &uid, to_fields(json!({"bio": "hi"})))
            .await
            .unwrap();

        let second = sign_in(&app.state, request("ADA@example.com", "Ada L"))
            .await
            .unwrap();
        assert_eq!(second.viewer.uid, uid);

        let doc = app.store.get(&Collection::Users, &uid).await.unwrap();
        assert_eq!(doc.str_field("createdAt").map(str::to_string), created);
        assert_eq!(doc.str_field("displayName"), Some("Ada L"));
        assert_eq!(doc.str_field("bio"), Some("hi"));
    }

    #[tokio::test]
    async fn cancelled_sign_in_is_not_an_error_message() {
        let app = TestApp::new();
        let mut req = request("ada@example.com", "Ada");
        req.cancelled = true;

        let err = sign_in(&app.state, req).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
        assert!(err.user_message().is_empty());
        assert_eq!(app.store.count(&Collection::Users), 0);
    }

    #[tokio::test]
    async fn known_email_without_its_password_is_refused() {
        let app = TestApp::new();
        sign_in(&app.state, request("ada@example.com", "Ada"))
            .await
            .unwrap();

        let mut attempt = request("ada@example.com", "Mallory");
        attempt.password = String::new();
        let err = sign_in(&app.state, attempt).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut attempt = request("ada@example.com", "Mallory");
        attempt.password = "not her password".into();
        let err = sign_in(&app.state, attempt).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("incorrect")));

        let uid = LocalIdentityProvider::uid_for("ada@example.com");
        let doc = app.store.get(&Collection::Users, &uid).await.unwrap();
        assert_eq!(doc.str_field("displayName"), Some("Ada"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_attempt_while_first_is_running_is_blocked() {
        let mut app = TestApp::new();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        app.state.identity = Arc::new(GatedProvider {
            entered: entered.clone(),
            release: release.clone(),
        });

        let state = app.state.clone();
        let first = tokio::spawn(async move {
            sign_in(&state, request("ada@example.com", "Ada"))
                .await
                .map(|signed| signed.viewer.uid)
        });
        entered.notified().await;
        assert!(app.state.sign_ins.is_pending("ada@example.com"));

        let err = sign_in(&app.state, request("ADA@example.com", "Ada"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("already in progress")));

        release.notify_one();
        let uid = first.await.unwrap().unwrap();
        assert_eq!(uid, LocalIdentityProvider::uid_for("ada@example.com"));
        assert!(!app.state.sign_ins.is_pending("ada@example.com"));

        release.notify_one();
        sign_in(&app.state, request("ada@example.com", "Ada"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_attempt_releases_the_account() {
        let app = TestApp::new();
        let mut attempt = request("ada@example.com", "Ada");
        attempt.password = "short".into();
        assert!(sign_in(&app.state, attempt).await.is_err());
        assert!(!app.state.sign_ins.is_pending("ada@example.com"));

        sign_in(&app.state, request("ada@example.com", "Ada"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sign_out_ends_session() {
        let app = TestApp::new();
        let signed = sign_in(&app.state, request("ada@example.com", "Ada"))
            .await
            .unwrap();
        sign_out(&app.state, &signed.token).await.unwrap();
        assert_eq!(
            session::find_session(&app.state.db, &signed.token).unwrap(),
            None
        );
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; hoodpost_session=abc123"),
        );
        assert_eq!(cookie_value(&headers, "hoodpost_session"), Some("abc123"));
        assert_eq!(cookie_value(&headers, "theme"), Some("dark"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn session_cookie_sets_max_age_in_seconds() {
        let cookie = session_cookie("s", "tok", 2);
        assert!(cookie.starts_with("s=tok;"));
        assert!(cookie.contains("Max-Age=7200"));
        assert!(clear_session_cookie("s").contains("Max-Age=0"));
    }
}
