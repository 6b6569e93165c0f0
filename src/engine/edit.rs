use serde_json::json;

use super::{Draft, EditMode, Outcome, PostEngine};
use crate::composer::validate_post_text;
use crate::error::AppResult;
use crate::store::{to_fields, Collection};

impl PostEngine {
    /// Owner only: start editing with the current title and description.
    pub fn begin_edit(&mut self) -> Outcome {
        if !self.is_owner() || !matches!(self.edit, EditMode::Viewing) {
            return Outcome::Ignored;
        }
        self.edit = EditMode::Editing(Draft {
            title: self.post.title.clone(),
            description: self.post.description.clone(),
        });
        Outcome::Applied
    }

    /// Replace the draft while editing.
    pub fn update_draft(&mut self, title: &str, description: &str) -> Outcome {
        if !self.is_owner() {
            return Outcome::Ignored;
        }
        match &mut self.edit {
            EditMode::Editing(draft) => {
                draft.title = title.to_string();
                draft.description = description.to_string();
                Outcome::Applied
            }
            _ => Outcome::Ignored,
        }
    }

    /// Persist the draft. Only `title` and `description` are written.
    pub async fn save_edit(&mut self) -> AppResult<Outcome> {
        if !self.is_owner() {
            return Ok(Outcome::Ignored);
        }
        let draft = match &self.edit {
            EditMode::Editing(draft) => draft.clone(),
            _ => return Ok(Outcome::Ignored),
        };

        let (title, description) = validate_post_text(&draft.title, &draft.description)?;

        self.edit = EditMode::Saving(draft.clone());
        let partial = to_fields(json!({"title": title, "description": description}));
        let result = self
            .services
            .remote(
                self.services
                    .store
                    .update(&Collection::Posts, &self.post.id, partial),
            )
            .await;

        match result {
            Ok(()) => {
                self.post.title = title;
                self.post.description = description;
                self.edit = EditMode::Viewing;
                tracing::info!("Post {} edited", self.post.id);
                Ok(Outcome::Applied)
            }
            Err(e) => {
                self.edit = EditMode::Editing(draft);
                Err(e)
            }
        }
    }

    /// Drop the draft without touching the store.
    pub fn cancel_edit(&mut self) -> Outcome {
        if !self.is_owner() || !matches!(self.edit, EditMode::Editing(_)) {
            return Outcome::Ignored;
        }
        self.edit = EditMode::Viewing;
        Outcome::Applied
    }
}
