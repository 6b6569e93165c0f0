use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::engine::PostServices;
use crate::identity::{IdentityProvider, LocalIdentityProvider, PendingSignIns};
use crate::notify::ToastQueue;
use crate::store::DocumentStore;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    /// Sessions live here; documents go through `services.store`.
    pub db: DbPool,
    pub config: Config,
    pub services: PostServices,
    pub blobs: Arc<FsBlobStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub sign_ins: Arc<PendingSignIns>,
    pub toasts: Arc<ToastQueue>,
}

impl AppState {
    /// Wire the shared services from config around the given document store.
    pub fn new(db: DbPool, config: Config, store: Arc<dyn DocumentStore>) -> Self {
        let toasts = Arc::new(ToastQueue::new(Duration::from_millis(
            config.toasts.ttl_ms,
        )));
        let services = PostServices::new(store, toasts.clone())
            .with_timeout(config.feed.remote_timeout())
            .with_cascade(config.feed.cascade);
        let blobs = Arc::new(FsBlobStore::new(
            config.uploads_path(),
            "/uploads",
            config.storage.max_upload_bytes,
        ));
        let identity: Arc<dyn IdentityProvider> = Arc::new(LocalIdentityProvider::new(
            db.clone(),
            config.auth.bcrypt_cost,
        ));

        Self {
            db,
            config,
            services,
            blobs,
            identity,
            sign_ins: Arc::new(PendingSignIns::new()),
            toasts,
        }
    }
}
