//! Post interaction engine.
//!
//! One [`PostEngine`] exists per rendered post. It owns four independent
//! facets of client state (likes, comments, edit mode, delete mode) and
//! drives every change through the document store. Engines share nothing but
//! the injected [`PostServices`]; all mutating operations take `&mut self`, so
//! one instance never runs two of them at once.

mod comments;
mod delete;
mod edit;
mod likes;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::db::models::{Comment, Like, Post, Viewer};
use crate::error::{AppError, AppResult};
use crate::notify::NotificationSink;
use crate::store::{with_timeout, Collection, DocumentStore, StoreError};

pub use self::delete::{DeleteOutcome, DeleteReport};
pub use self::likes::LikeToggle;

pub const MAX_COMMENT_LEN: usize = 500;

/// What deleting a post takes with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Likes go; comments stay behind under the removed post.
    #[default]
    Likes,
    LikesAndComments,
}

impl CascadePolicy {
    pub fn includes_comments(self) -> bool {
        matches!(self, CascadePolicy::LikesAndComments)
    }
}

/// Emitted to the list that rendered the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    PostRemoved { post_id: String },
}

/// Collaborators shared by every engine.
#[derive(Clone)]
pub struct PostServices {
    pub store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub remote_timeout: Duration,
    pub cascade: CascadePolicy,
}

impl PostServices {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifier,
            remote_timeout: Duration::from_secs(10),
            cascade: CascadePolicy::default(),
        }
    }

    pub fn with_timeout(mut self, remote_timeout: Duration) -> Self {
        self.remote_timeout = remote_timeout;
        self
    }

    pub fn with_cascade(mut self, cascade: CascadePolicy) -> Self {
        self.cascade = cascade;
        self
    }

    /// Await a store call under the configured deadline.
    pub async fn remote<T, F>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        with_timeout(self.remote_timeout, fut)
            .await
            .map_err(AppError::from)
    }
}

/// Result of an operation that may be refused without error (non-owner,
/// blank input, wrong mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeView {
    Unknown,
    Loaded(Vec<Like>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeSummary {
    pub count: usize,
    pub viewer_has_liked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommentView {
    Unknown,
    Loaded(Vec<Comment>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditMode {
    Viewing,
    Editing(Draft),
    Saving(Draft),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Idle,
    Confirming,
    Deleting,
}

pub struct PostEngine {
    post: Post,
    viewer: Option<Viewer>,
    services: PostServices,
    events: Option<UnboundedSender<FeedEvent>>,
    likes: LikeView,
    comments: CommentView,
    edit: EditMode,
    delete: DeleteMode,
    comment_input: String,
}

impl PostEngine {
    pub fn new(post: Post, viewer: Option<Viewer>, services: PostServices) -> Self {
        Self {
            post,
            viewer,
            services,
            events: None,
            likes: LikeView::Unknown,
            comments: CommentView::Unknown,
            edit: EditMode::Viewing,
            delete: DeleteMode::Idle,
            comment_input: String::new(),
        }
    }

    /// Fetch a single post and build its engine.
    pub async fn open(
        services: PostServices,
        post_id: &str,
        viewer: Option<Viewer>,
    ) -> AppResult<Self> {
        let doc = services
            .remote(services.store.get(&Collection::Posts, post_id))
            .await?;
        let post: Post = doc.decode()?;
        Ok(Self::new(post, viewer, services))
    }

    /// Report removals to the owning list.
    pub fn with_events(mut self, events: UnboundedSender<FeedEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn post(&self) -> &Post {
        &self.post
    }

    pub fn viewer(&self) -> Option<&Viewer> {
        self.viewer.as_ref()
    }

    pub fn is_owner(&self) -> bool {
        self.owner().is_some()
    }

    pub fn likes(&self) -> &LikeView {
        &self.likes
    }

    pub fn like_summary(&self) -> Option<LikeSummary> {
        match &self.likes {
            LikeView::Unknown => None,
            LikeView::Loaded(likes) => Some(LikeSummary {
                count: likes.len(),
                viewer_has_liked: self
                    .viewer
                    .as_ref()
                    .map(|v| likes.iter().any(|l| l.user_id == v.uid))
                    .unwrap_or(false),
            }),
        }
    }

    pub fn comments(&self) -> Option<&[Comment]> {
        match &self.comments {
            CommentView::Unknown => None,
            CommentView::Loaded(comments) => Some(comments),
        }
    }

    pub fn edit_mode(&self) -> &EditMode {
        &self.edit
    }

    pub fn delete_mode(&self) -> DeleteMode {
        self.delete
    }

    /// Text of the last comment that could not be submitted.
    pub fn comment_input(&self) -> &str {
        &self.comment_input
    }

    /// Load both remote facets. A failure in one does not stop the other.
    pub async fn load(&mut self) -> AppResult<()> {
        let likes = self.load_likes().await;
        let comments = self.load_comments().await;
        likes?;
        comments?;
        Ok(())
    }

    fn owner(&self) -> Option<&Viewer> {
        self.viewer.as_ref().filter(|v| v.owns(&self.post))
    }

    fn notify_owner(&self, actor: &Viewer, message: &str) {
        if actor.uid != self.post.user_id {
            self.services.notifier.enqueue(&self.post.user_id, message);
        }
    }

    fn emit(&self, event: FeedEvent) {
        if let Some(events) = &self.events {
            // The list may already be gone; nothing to tell then.
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::notify::ToastQueue;
    use crate::store::{to_fields, MemoryDocumentStore};
    use serde_json::json;

    pub struct Harness {
        pub store: Arc<MemoryDocumentStore>,
        pub toasts: Arc<ToastQueue>,
        pub services: PostServices,
    }

    impl Harness {
        pub fn new() -> Self {
            let store = Arc::new(MemoryDocumentStore::new());
            let toasts = Arc::new(ToastQueue::default());
            let services = PostServices::new(store.clone(), toasts.clone())
                .with_timeout(Duration::from_millis(200));
            Self {
                store,
                toasts,
                services,
            }
        }

        /// Seed a post owned by `u1` with title "T" and description "D".
        pub async fn seed_post(&self) -> Post {
            let fields = json!({
                "userId": "u1",
                "username": "Owner",
                "title": "T",
                "description": "D",
                "createdAt": "2025-01-01T00:00:00.000000Z"
            });
            let id = self
                .store
                .insert(&Collection::Posts, to_fields(fields))
                .await
                .unwrap();
            self.store
                .get(&Collection::Posts, &id)
                .await
                .unwrap()
                .decode()
                .unwrap()
        }

        pub fn engine(&self, post: &Post, viewer: Option<&str>) -> PostEngine {
            let viewer = viewer.map(|uid| Viewer::new(uid, Some(format!("user {}", uid))));
            PostEngine::new(post.clone(), viewer, self.services.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;

    #[tokio::test]
    async fn fresh_engine_has_unknown_facets() {
        let h = Harness::new();
        let post = h.seed_post().await;
        let engine = h.engine(&post, Some("u2"));

        assert_eq!(engine.likes(), &LikeView::Unknown);
        assert!(engine.like_summary().is_none());
        assert!(engine.comments().is_none());
        assert_eq!(engine.edit_mode(), &EditMode::Viewing);
        assert_eq!(engine.delete_mode(), DeleteMode::Idle);
        assert!(!engine.is_owner());
    }

    #[tokio::test]
    async fn open_fetches_post_by_id() {
        let h = Harness::new();
        let post = h.seed_post().await;

        let engine = PostEngine::open(h.services.clone(), &post.id, None)
            .await
            .unwrap();
        assert_eq!(engine.post(), &post);
        assert!(matches!(
            PostEngine::open(h.services.clone(), "missing", None).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn load_fills_both_facets() {
        let h = Harness::new();
        let post = h.seed_post().await;
        let mut engine = h.engine(&post, Some("u1"));

        engine.load().await.unwrap();
        assert_eq!(
            engine.like_summary(),
            Some(LikeSummary {
                count: 0,
                viewer_has_liked: false
            })
        );
        assert_eq!(engine.comments().map(|c| c.len()), Some(0));
        assert!(engine.is_owner());
    }

    #[test]
    fn cascade_policy_parses_snake_case() {
        #[derive(Deserialize)]
        struct Wrap {
            cascade: CascadePolicy,
        }
        let w: Wrap = toml::from_str("cascade = \"likes_and_comments\"").unwrap();
        assert!(w.cascade.includes_comments());
        assert!(!CascadePolicy::default().includes_comments());
    }
}
