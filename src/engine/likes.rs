use serde_json::json;

use super::{LikeSummary, LikeView, PostEngine};
use crate::db::models::Like;
use crate::error::{AppError, AppResult};
use crate::store::{to_fields, Collection, Document, Filter, InsertOutcome, Query};

const LIKED_MESSAGE: &str = "Someone liked your post";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeToggle {
    Liked,
    Unliked,
    /// The viewer's like was already gone when we went to remove it.
    AlreadyGone,
}

fn decode_likes(docs: &[Document]) -> AppResult<Vec<Like>> {
    docs.iter()
        .map(|d| d.decode::<Like>().map_err(AppError::from))
        .collect()
}

impl PostEngine {
    pub async fn load_likes(&mut self) -> AppResult<LikeSummary> {
        let query = Query::new(Collection::Likes).where_eq("postId", self.post.id.as_str());
        let result = self
            .services
            .remote(self.services.store.query(&query))
            .await
            .and_then(|docs| decode_likes(&docs));

        match result {
            Ok(likes) => {
                self.likes = LikeView::Loaded(likes);
                Ok(self.like_summary().unwrap_or(LikeSummary {
                    count: 0,
                    viewer_has_liked: false,
                }))
            }
            Err(e) => {
                tracing::warn!("Failed to load likes for post {}: {}", self.post.id, e);
                self.likes = LikeView::Unknown;
                Err(e)
            }
        }
    }

    /// Like the post if the viewer has not, otherwise remove their like.
    pub async fn toggle_like(&mut self) -> AppResult<LikeToggle> {
        let viewer = self.viewer.clone().ok_or(AppError::Unauthenticated)?;
        let summary = match self.like_summary() {
            Some(summary) => summary,
            None => self.load_likes().await?,
        };

        if !summary.viewer_has_liked {
            let key = [
                Filter::eq("postId", self.post.id.as_str()),
                Filter::eq("userId", viewer.uid.as_str()),
            ];
            let fields = to_fields(json!({"userId": viewer.uid, "postId": self.post.id}));
            let outcome = self
                .services
                .remote(
                    self.services
                        .store
                        .insert_unique(&Collection::Likes, &key, fields),
                )
                .await?;

            self.remember_like(Like {
                like_id: outcome.id().to_string(),
                user_id: viewer.uid.clone(),
                post_id: self.post.id.clone(),
            });
            if let InsertOutcome::Inserted(_) = outcome {
                self.notify_owner(&viewer, LIKED_MESSAGE);
            }
            return Ok(LikeToggle::Liked);
        }

        let query = Query::new(Collection::Likes)
            .where_eq("postId", self.post.id.as_str())
            .where_eq("userId", viewer.uid.as_str())
            .limit(1);
        let existing = self
            .services
            .remote(self.services.store.query(&query))
            .await?;

        let Some(like) = existing.into_iter().next() else {
            self.forget_likes_of(&viewer.uid);
            return Ok(LikeToggle::AlreadyGone);
        };

        // Succeeds even if someone else removed it in the meantime.
        self.services
            .remote(self.services.store.delete(&Collection::Likes, &like.id))
            .await?;

        self.forget_like(&like.id);
        Ok(LikeToggle::Unliked)
    }

    fn remember_like(&mut self, like: Like) {
        match &mut self.likes {
            LikeView::Loaded(likes) => {
                if !likes.iter().any(|l| l.like_id == like.like_id) {
                    likes.push(like);
                }
            }
            LikeView::Unknown => self.likes = LikeView::Loaded(vec![like]),
        }
    }

    fn forget_like(&mut self, like_id: &str) {
        if let LikeView::Loaded(likes) = &mut self.likes {
            likes.retain(|l| l.like_id != like_id);
        }
    }

    fn forget_likes_of(&mut self, uid: &str) {
        if let LikeView::Loaded(likes) = &mut self.likes {
            likes.retain(|l| l.user_id != uid);
        }
    }
}
