//! Identity provider boundary.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::state::DbPool;

/// Shortest password accepted when an account is first registered.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignInError {
    /// The user dismissed the sign-in prompt. Never shown as an error.
    #[error("sign-in cancelled")]
    Cancelled,

    /// Another sign-in attempt is already in progress.
    #[error("sign-in prompt blocked")]
    PopupBlocked,

    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("sign-in failed: {0}")]
    Other(String),
}

/// What the login form hands to the provider.
#[derive(Clone, Default)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub cancelled: bool,
}

impl std::fmt::Debug for SignInRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .field("photo_url", &self.photo_url)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, request: SignInRequest) -> Result<Identity, SignInError>;

    async fn sign_out(&self, uid: &str);
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Accounts with a sign-in currently running. An entry stays in place for as
/// long as the returned [`PendingSignIn`] is alive.
#[derive(Debug, Default)]
pub struct PendingSignIns {
    accounts: Mutex<HashSet<String>>,
}

impl PendingSignIns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, email: &str) -> Result<PendingSignIn<'_>, SignInError> {
        let key = normalize_email(email);
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if !accounts.insert(key.clone()) {
            return Err(SignInError::PopupBlocked);
        }
        Ok(PendingSignIn { owner: self, key })
    }

    pub fn is_pending(&self, email: &str) -> bool {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&normalize_email(email))
    }
}

pub struct PendingSignIn<'a> {
    owner: &'a PendingSignIns,
    key: String,
}

impl Drop for PendingSignIn<'_> {
    fn drop(&mut self) {
        self.owner
            .accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Provider for self-hosted installs. Accounts are keyed by email and guarded
/// by a bcrypt-hashed password: the first sign-in for an email registers it,
/// every later one must present the same password.
pub struct LocalIdentityProvider {
    pool: DbPool,
    cost: u32,
}

impl LocalIdentityProvider {
    pub fn new(pool: DbPool, cost: u32) -> Self {
        Self { pool, cost }
    }

    pub fn uid_for(email: &str) -> String {
        uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, normalize_email(email).as_bytes())
            .simple()
            .to_string()
    }
}

fn store_err(err: impl std::fmt::Display) -> SignInError {
    SignInError::Unavailable(err.to_string())
}

fn stored_hash(conn: &Connection, uid: &str) -> Result<Option<String>, SignInError> {
    conn.query_row(
        "SELECT password_hash FROM credentials WHERE uid = ?1",
        params![uid],
        |row| row.get(0),
    )
    .optional()
    .map_err(store_err)
}

fn verify(password: &str, hash: &str) -> Result<(), SignInError> {
    if bcrypt::verify(password, hash).unwrap_or(false) {
        Ok(())
    } else {
        Err(SignInError::Other("incorrect email or password".into()))
    }
}

/// Verify the password for `uid`, registering it if the account has none yet.
fn check_credential(pool: &DbPool, uid: &str, password: &str, cost: u32) -> Result<(), SignInError> {
    let conn = pool.get().map_err(store_err)?;
    if let Some(hash) = stored_hash(&conn, uid)? {
        return verify(password, &hash);
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SignInError::Other(format!(
            "choose a password of at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let hash = bcrypt::hash(password, cost).map_err(|e| SignInError::Other(e.to_string()))?;
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO credentials (uid, password_hash) VALUES (?1, ?2)",
            params![uid, hash],
        )
        .map_err(store_err)?;
    if inserted == 0 {
        // Registered by another process in the meantime.
        let hash = stored_hash(&conn, uid)?
            .ok_or_else(|| SignInError::Unavailable("credential vanished".into()))?;
        return verify(password, &hash);
    }
    tracing::info!("Registered credential for {}", uid);
    Ok(())
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in(&self, request: SignInRequest) -> Result<Identity, SignInError> {
        if request.cancelled {
            return Err(SignInError::Cancelled);
        }

        let email = request.email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(SignInError::Other("a valid email address is required".into()));
        }
        if request.password.is_empty() {
            return Err(SignInError::Other("a password is required".into()));
        }

        let uid = Self::uid_for(&email);
        let pool = self.pool.clone();
        let cost = self.cost;
        let account = uid.clone();
        let password = request.password;
        tokio::task::spawn_blocking(move || check_credential(&pool, &account, &password, cost))
            .await
            .map_err(|e| SignInError::Other(format!("credential check failed: {}", e)))??;

        Ok(Identity {
            uid,
            display_name: request
                .display_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            photo_url: request
                .photo_url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            email: Some(email),
        })
    }

    async fn sign_out(&self, uid: &str) {
        tracing::info!("Signed out {}", uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn provider() -> (tempfile::TempDir, LocalIdentityProvider) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("identity.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (tmp, LocalIdentityProvider::new(pool, 4))
    }

    fn request(email: &str, password: &str) -> SignInRequest {
        SignInRequest {
            email: email.to_string(),
            password: password.to_string(),
            display_name: Some("  Ada  ".to_string()),
            photo_url: Some(String::new()),
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn uid_is_stable_per_email() {
        let (_tmp, provider) = provider();
        let a = provider
            .sign_in(request("ada@example.com", "analytical"))
            .await
            .unwrap();
        let b = provider
            .sign_in(request("ADA@example.com ", "analytical"))
            .await
            .unwrap();
        assert_eq!(a.uid, b.uid);
        assert_eq!(a.display_name.as_deref(), Some("Ada"));
        assert!(a.photo_url.is_none());
    }

    #[tokio::test]
    async fn wrong_password_for_known_account_is_refused() {
        let (_tmp, provider) = provider();
        provider
            .sign_in(request("ada@example.com", "analytical"))
            .await
            .unwrap();

        let err = provider
            .sign_in(request("ada@example.com", "guessing!"))
            .await
            .unwrap_err();
        assert_eq!(err, SignInError::Other("incorrect email or password".into()));

        let err = provider
            .sign_in(request("ada@example.com", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::Other(_)));
    }

    #[tokio::test]
    async fn short_password_is_not_registered() {
        let (_tmp, provider) = provider();
        let err = provider
            .sign_in(request("ada@example.com", "short"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::Other(ref m) if m.contains("at least")));

        // Nothing was stored, so a proper password can still claim the account.
        provider
            .sign_in(request("ada@example.com", "analytical"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn password_is_stored_hashed() {
        let (_tmp, provider) = provider();
        let identity = provider
            .sign_in(request("ada@example.com", "analytical"))
            .await
            .unwrap();
        let conn = provider.pool.get().unwrap();
        let hash = stored_hash(&conn, &identity.uid).unwrap().unwrap();
        assert_ne!(hash, "analytical");
        assert!(bcrypt::verify("analytical", &hash).unwrap());
    }

    #[tokio::test]
    async fn cancelled_request_is_cancelled() {
        let (_tmp, provider) = provider();
        let mut req = request("ada@example.com", "analytical");
        req.cancelled = true;
        assert_eq!(provider.sign_in(req).await, Err(SignInError::Cancelled));
    }

    #[tokio::test]
    async fn missing_email_is_other() {
        let (_tmp, provider) = provider();
        let err = provider
            .sign_in(request("   ", "analytical"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::Other(_)));
    }

    #[test]
    fn debug_output_hides_password() {
        let rendered = format!("{:?}", request("ada@example.com", "analytical"));
        assert!(!rendered.contains("analytical"));
    }

    #[test]
    fn pending_sign_in_blocks_same_account_until_dropped() {
        let pending = PendingSignIns::new();
        let first = pending.begin("ada@example.com").unwrap();
        assert!(pending.is_pending("ADA@example.com"));
        assert_eq!(
            pending.begin(" ADA@example.com").err(),
            Some(SignInError::PopupBlocked)
        );
        let other = pending.begin("bob@example.com");
        assert!(other.is_ok());

        drop(first);
        assert!(!pending.is_pending("ada@example.com"));
        assert!(pending.begin("ada@example.com").is_ok());
    }
}
