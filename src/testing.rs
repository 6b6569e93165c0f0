//! Shared fixtures for unit tests that need a whole [`AppState`].

use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::state::AppState;
use crate::store::MemoryDocumentStore;

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryDocumentStore>,
    _dir: tempfile::TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("test.db")).unwrap();
        run_migrations(&pool).unwrap();

        let mut config = Config::default();
        config.storage.path = Some(dir.path().join("uploads"));
        config.storage.max_upload_bytes = 1024;
        config.feed.remote_timeout_ms = 500;
        config.auth.bcrypt_cost = 4;

        let store = Arc::new(MemoryDocumentStore::new());
        let state = AppState::new(pool, config, store.clone());
        Self {
            state,
            store,
            _dir: dir,
        }
    }
}
