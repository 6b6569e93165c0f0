use serde_json::json;

use super::{CommentView, Outcome, PostEngine, MAX_COMMENT_LEN};
use crate::db::models::Comment;
use crate::error::{AppError, AppResult};
use crate::store::{server_timestamp, to_fields, Collection, Direction, Query};

const COMMENTED_MESSAGE: &str = "Someone commented on your post";

impl PostEngine {
    /// Fetch every comment of the post, oldest first.
    pub async fn load_comments(&mut self) -> AppResult<usize> {
        let query = Query::new(Collection::Comments(self.post.id.clone()))
            .order_by("createdAt", Direction::Asc);
        let result = self
            .services
            .remote(self.services.store.query(&query))
            .await
            .and_then(|docs| {
                docs.iter()
                    .map(|d| d.decode::<Comment>().map_err(AppError::from))
                    .collect::<AppResult<Vec<_>>>()
            });

        match result {
            Ok(comments) => {
                let count = comments.len();
                self.comments = CommentView::Loaded(comments);
                Ok(count)
            }
            Err(e) => {
                tracing::warn!("Failed to load comments for post {}: {}", self.post.id, e);
                Err(e)
            }
        }
    }

    /// Add a comment as the viewer. Blank text is ignored. On failure the
    /// text stays in [`PostEngine::comment_input`] for another attempt.
    pub async fn add_comment(&mut self, text: &str) -> AppResult<Outcome> {
        self.comment_input = text.to_string();
        let viewer = self.viewer.clone().ok_or(AppError::Unauthenticated)?;

        let body = text.trim();
        if body.is_empty() {
            return Ok(Outcome::Ignored);
        }
        if body.chars().count() > MAX_COMMENT_LEN {
            return Err(AppError::Validation(format!(
                "Comment must be {} characters or less.",
                MAX_COMMENT_LEN
            )));
        }

        let fields = to_fields(json!({
            "text": body,
            "userId": viewer.uid,
            "username": viewer.display_name,
            "createdAt": server_timestamp(),
        }));
        let collection = Collection::Comments(self.post.id.clone());
        let comment_id = self
            .services
            .remote(self.services.store.insert(&collection, fields))
            .await?;

        tracing::debug!("Comment {} added to post {}", comment_id, self.post.id);
        self.comment_input.clear();
        self.notify_owner(&viewer, COMMENTED_MESSAGE);

        // The comment exists even if the refresh fails; the list just stays stale.
        if let Err(e) = self.load_comments().await {
            tracing::warn!("Comment saved but list refresh failed: {}", e);
        }
        Ok(Outcome::Applied)
    }
}
