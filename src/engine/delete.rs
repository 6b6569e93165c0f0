use super::{DeleteMode, FeedEvent, Outcome, PostEngine};
use crate::error::{AppError, AppResult};
use crate::store::{Collection, DocRef, Document, Query};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub likes_removed: usize,
    pub comments_removed: usize,
    /// Dependent records the store could not remove.
    pub orphaned: Vec<DocRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Ignored,
    Removed(DeleteReport),
}

impl PostEngine {
    /// Owner only: ask for confirmation before deleting.
    pub fn request_delete(&mut self) -> Outcome {
        if !self.is_owner() || self.delete != DeleteMode::Idle {
            return Outcome::Ignored;
        }
        self.delete = DeleteMode::Confirming;
        Outcome::Applied
    }

    pub fn cancel_delete(&mut self) -> Outcome {
        if self.delete != DeleteMode::Confirming {
            return Outcome::Ignored;
        }
        self.delete = DeleteMode::Idle;
        Outcome::Applied
    }

    /// Delete the post together with its dependents, as set by the cascade
    /// policy. Does nothing unless a confirmation was requested first.
    pub async fn confirm_delete(&mut self) -> AppResult<DeleteOutcome> {
        if !self.is_owner() || self.delete != DeleteMode::Confirming {
            return Ok(DeleteOutcome::Ignored);
        }
        self.delete = DeleteMode::Deleting;

        match self.cascade_delete().await {
            Ok(report) => {
                tracing::info!(
                    "Deleted post {} ({} likes, {} comments)",
                    self.post.id,
                    report.likes_removed,
                    report.comments_removed
                );
                self.emit(FeedEvent::PostRemoved {
                    post_id: self.post.id.clone(),
                });
                Ok(DeleteOutcome::Removed(report))
            }
            Err(e) => {
                tracing::error!("Failed to delete post {}: {}", self.post.id, e);
                self.delete = DeleteMode::Idle;
                Err(e)
            }
        }
    }

    async fn cascade_delete(&self) -> AppResult<DeleteReport> {
        let likes = self
            .fetch_refs(Query::new(Collection::Likes).where_eq("postId", self.post.id.as_str()))
            .await?;
        let comments = if self.services.cascade.includes_comments() {
            self.fetch_refs(Query::new(Collection::Comments(self.post.id.clone())))
                .await?
        } else {
            Vec::new()
        };

        let post_ref = DocRef::new(Collection::Posts, self.post.id.clone());
        let mut targets = Vec::with_capacity(likes.len() + comments.len() + 1);
        targets.extend(likes);
        targets.extend(comments);
        targets.push(post_ref.clone());

        let outcome = match tokio::time::timeout(
            self.services.remote_timeout,
            self.services.store.delete_batch(&targets),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => return self.settle_late_delete(&targets).await,
        };

        if let Some(err) = outcome.failure_for(&post_ref) {
            return Err(err.clone().into());
        }

        let orphaned: Vec<DocRef> = outcome.failed.iter().map(|(r, _)| r.clone()).collect();
        for (doc, err) in &outcome.failed {
            tracing::warn!("Left orphaned {}/{} behind: {}", doc.collection, doc.id, err);
        }

        let removed = |pred: fn(&Collection) -> bool| {
            outcome
                .deleted
                .iter()
                .filter(|r| pred(&r.collection))
                .count()
        };
        Ok(DeleteReport {
            likes_removed: removed(|c| matches!(c, Collection::Likes)),
            comments_removed: removed(|c| matches!(c, Collection::Comments(_))),
            orphaned,
        })
    }

    /// The batch missed its deadline but may still have been applied. Only
    /// report failure if the post is still there.
    async fn settle_late_delete(&self, targets: &[DocRef]) -> AppResult<DeleteReport> {
        match self
            .services
            .remote(self.services.store.get(&Collection::Posts, &self.post.id))
            .await
        {
            Err(AppError::NotFound) => {
                tracing::warn!("Delete of post {} landed after its deadline", self.post.id);
                let count = |pred: fn(&Collection) -> bool| {
                    targets.iter().filter(|r| pred(&r.collection)).count()
                };
                Ok(DeleteReport {
                    likes_removed: count(|c| matches!(c, Collection::Likes)),
                    comments_removed: count(|c| matches!(c, Collection::Comments(_))),
                    orphaned: Vec::new(),
                })
            }
            Ok(_) => Err(AppError::Unavailable("delete timed out".into())),
            Err(e) => {
                tracing::warn!("Could not tell whether post {} was deleted: {}", self.post.id, e);
                Err(AppError::Unavailable("delete timed out".into()))
            }
        }
    }

    async fn fetch_refs(&self, query: Query) -> AppResult<Vec<DocRef>> {
        let collection = query.collection.clone();
        let docs: Vec<Document> = self
            .services
            .remote(self.services.store.query(&query))
            .await?;
        Ok(docs
            .into_iter()
            .map(|d| DocRef::new(collection.clone(), d.id))
            .collect())
    }
}
