//! Lists of post engines: the home feed and a user's posts.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::db::models::{Post, UserProfile, Viewer};
use crate::engine::{FeedEvent, PostEngine, PostServices};
use crate::error::{AppError, AppResult};
use crate::store::{Collection, Direction, Document, Query};

/// An ordered list of engines that drops posts as their engines report them removed.
pub struct PostList {
    engines: Vec<PostEngine>,
    events_tx: UnboundedSender<FeedEvent>,
    events_rx: UnboundedReceiver<FeedEvent>,
}

impl PostList {
    fn build(posts: Vec<Post>, viewer: Option<&Viewer>, services: &PostServices) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engines = posts
            .into_iter()
            .map(|post| {
                PostEngine::new(post, viewer.cloned(), services.clone())
                    .with_events(events_tx.clone())
            })
            .collect();
        Self {
            engines,
            events_tx,
            events_rx,
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn engines(&self) -> &[PostEngine] {
        &self.engines
    }

    pub fn engine_mut(&mut self, post_id: &str) -> Option<&mut PostEngine> {
        self.engines.iter_mut().find(|e| e.post().id == post_id)
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.engines.iter().any(|e| e.post().id == post_id)
    }

    /// Sender handed to engines; exposed so callers can attach engines they build.
    pub fn events(&self) -> UnboundedSender<FeedEvent> {
        self.events_tx.clone()
    }

    /// Apply every pending event. Returns how many posts were dropped.
    pub fn apply_events(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                FeedEvent::PostRemoved { post_id } => {
                    let before = self.engines.len();
                    self.engines.retain(|e| e.post().id != post_id);
                    dropped += before - self.engines.len();
                }
            }
        }
        dropped
    }

    /// Load likes and comments for every post concurrently. Failures are
    /// logged per post and leave that post's facets unknown.
    pub async fn load_interactions(&mut self) {
        let loads = self.engines.iter_mut().map(|engine| async move {
            if let Err(e) = engine.load().await {
                tracing::warn!("Could not load interactions for {}: {}", engine.post().id, e);
            }
        });
        futures::future::join_all(loads).await;
    }
}

fn decode_posts(docs: Vec<Document>) -> AppResult<Vec<Post>> {
    docs.iter()
        .map(|d| d.decode::<Post>().map_err(AppError::from))
        .collect()
}

pub struct FeedAssembler {
    services: PostServices,
    limit: usize,
}

impl FeedAssembler {
    pub fn new(services: PostServices, limit: usize) -> Self {
        Self { services, limit }
    }

    /// The newest posts, most recent first.
    pub async fn assemble(&self, viewer: Option<&Viewer>) -> AppResult<PostList> {
        let query = Query::new(Collection::Posts)
            .order_by("createdAt", Direction::Desc)
            .limit(self.limit);
        let docs = self
            .services
            .remote(self.services.store.query(&query))
            .await?;
        let posts = decode_posts(docs)?;
        tracing::debug!("Feed assembled with {} posts", posts.len());
        Ok(PostList::build(posts, viewer, &self.services))
    }
}

pub struct Profile {
    /// `None` when no such user exists.
    pub user: Option<UserProfile>,
    pub posts: PostList,
}

pub struct ProfileAssembler {
    services: PostServices,
}

impl ProfileAssembler {
    pub fn new(services: PostServices) -> Self {
        Self { services }
    }

    pub async fn assemble(&self, uid: &str, viewer: Option<&Viewer>) -> AppResult<Profile> {
        let user = match self
            .services
            .remote(self.services.store.get(&Collection::Users, uid))
            .await
        {
            Ok(doc) => Some(doc.decode::<UserProfile>()?),
            Err(AppError::NotFound) => None,
            Err(e) => return Err(e),
        };

        let posts = match user {
            Some(_) => {
                let query = Query::new(Collection::Posts)
                    .where_eq("userId", uid)
                    .order_by("createdAt", Direction::Desc);
                let docs = self
                    .services
                    .remote(self.services.store.query(&query))
                    .await?;
                decode_posts(docs)?
            }
            None => Vec::new(),
        };

        Ok(Profile {
            user,
            posts: PostList::build(posts, viewer, &self.services),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Harness;
    use crate::store::{to_fields, DocumentStore};
    use serde_json::json;

    async fn seed(h: &Harness, uid: &str, title: &str, ts: &str) -> String {
        h.store
            .insert(
                &Collection::Posts,
                to_fields(json!({
                    "userId": uid,
                    "username": uid,
                    "title": title,
                    "description": "body",
                    "createdAt": ts,
                })),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn feed_is_newest_first_and_limited() {
        let h = Harness::new();
        seed(&h, "u1", "old", "2025-01-01T00:00:00Z").await;
        seed(&h, "u2", "new", "2025-01-03T00:00:00Z").await;
        seed(&h, "u1", "mid", "2025-01-02T00:00:00Z").await;

        let feed = FeedAssembler::new(h.services.clone(), 2)
            .assemble(None)
            .await
            .unwrap();
        let titles: Vec<&str> = feed
            .engines()
            .iter()
            .map(|e| e.post().title.as_str())
            .collect();
        assert_eq!(titles, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn deleted_post_disappears_from_feed() {
        let h = Harness::new();
        let keep = seed(&h, "u2", "keep", "2025-01-01T00:00:00Z").await;
        let doomed = seed(&h, "u1", "doomed", "2025-01-02T00:00:00Z").await;
        let viewer = Viewer::new("u1", None);

        let mut feed = FeedAssembler::new(h.services.clone(), 10)
            .assemble(Some(&viewer))
            .await
            .unwrap();
        feed.load_interactions().await;

        let engine = feed.engine_mut(&doomed).unwrap();
        engine.request_delete();
        engine.confirm_delete().await.unwrap();

        assert_eq!(feed.apply_events(), 1);
        assert!(!feed.contains(&doomed));
        assert!(feed.contains(&keep));
        assert_eq!(feed.len(), 1);
    }

    #[tokio::test]
    async fn non_owner_delete_leaves_feed_intact() {
        let h = Harness::new();
        let post = seed(&h, "u1", "p1", "2025-01-01T00:00:00Z").await;
        let viewer = Viewer::new("u2", None);

        let mut feed = FeedAssembler::new(h.services.clone(), 10)
            .assemble(Some(&viewer))
            .await
            .unwrap();
        let engine = feed.engine_mut(&post).unwrap();
        engine.request_delete();
        engine.confirm_delete().await.unwrap();

        assert_eq!(feed.apply_events(), 0);
        assert!(feed.contains(&post));
    }

    #[tokio::test]
    async fn profile_lists_only_that_users_posts() {
        let h = Harness::new();
        h.store
            .set(
                &Collection::Users,
                "u1",
                to_fields(json!({"uid": "u1", "displayName": "Ada"})),
                true,
            )
            .await
            .unwrap();
        seed(&h, "u1", "mine", "2025-01-01T00:00:00Z").await;
        seed(&h, "u2", "theirs", "2025-01-02T00:00:00Z").await;

        let profile = ProfileAssembler::new(h.services.clone())
            .assemble("u1", None)
            .await
            .unwrap();
        assert_eq!(
            profile.user.unwrap().display_name.as_deref(),
            Some("Ada")
        );
        assert_eq!(profile.posts.len(), 1);
        assert_eq!(profile.posts.engines()[0].post().title, "mine");
    }

    #[tokio::test]
    async fn unknown_profile_has_no_user() {
        let h = Harness::new();
        let profile = ProfileAssembler::new(h.services.clone())
            .assemble("ghost", None)
            .await
            .unwrap();
        assert!(profile.user.is_none());
        assert!(profile.posts.is_empty());
    }
}
