//! New post submission.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use crate::blob::{image_key, BlobError, BlobStore};
use crate::db::models::{Post, Viewer};
use crate::engine::PostServices;
use crate::error::{AppError, AppResult};
use crate::store::{server_timestamp, to_fields, Collection};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    pub image: Option<ImageUpload>,
}

/// Trimmed title and description, or the first problem found. Shared by new
/// posts and edits.
pub fn validate_post_text(title: &str, description: &str) -> AppResult<(String, String)> {
    let title = title.trim();
    let description = description.trim();
    if title.is_empty() {
        return Err(AppError::Validation("You must add a title.".into()));
    }
    if description.is_empty() {
        return Err(AppError::Validation("You must add a description.".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "Title must be {} characters or less.",
            MAX_TITLE_LEN
        )));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::Validation(format!(
            "Description must be {} characters or less.",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok((title.to_string(), description.to_string()))
}

impl NewPost {
    pub fn validate(&self) -> AppResult<(String, String)> {
        validate_post_text(&self.title, &self.description)
    }
}

pub struct PostComposer {
    services: PostServices,
    blobs: Arc<dyn BlobStore>,
}

impl PostComposer {
    pub fn new(services: PostServices, blobs: Arc<dyn BlobStore>) -> Self {
        Self { services, blobs }
    }

    pub async fn submit(&self, viewer: Option<&Viewer>, draft: NewPost) -> AppResult<Post> {
        let viewer = viewer.ok_or(AppError::Unauthenticated)?;
        let (title, description) = draft.validate()?;

        let image_url = match draft.image {
            Some(image) if !image.bytes.is_empty() => {
                let key = image_key(&image.file_name);
                let upload = self.blobs.upload(&key, image.bytes);
                let url = tokio::time::timeout(self.services.remote_timeout, upload)
                    .await
                    .map_err(|_| BlobError::Network("upload timed out".into()))??;
                Some(url)
            }
            _ => None,
        };

        let fields = to_fields(json!({
            "userId": viewer.uid,
            "username": viewer.display_name,
            "title": title,
            "description": description,
            "imageUrl": image_url,
            "createdAt": server_timestamp(),
        }));
        let id = self
            .services
            .remote(self.services.store.insert(&Collection::Posts, fields))
            .await?;

        tracing::info!("Post {} created by {}", id, viewer.uid);
        let doc = self
            .services
            .remote(self.services.store.get(&Collection::Posts, &id))
            .await?;
        Ok(doc.decode()?)
    }
}
