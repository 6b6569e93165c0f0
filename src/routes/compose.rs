use askama::Template;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;

use crate::composer::{ImageUpload, NewPost, PostComposer, MAX_DESCRIPTION_LEN, MAX_TITLE_LEN};
use crate::error::{AppError, AppResult};
use crate::extractors::PageContext;
use crate::routes::{Html, Layout};
use crate::state::AppState;

const SIGNED_OUT_MESSAGE: &str = "You must be signed in to create a post.";

#[derive(Template)]
#[template(path = "pages/create_post.html")]
pub struct CreatePostTemplate {
    pub layout: Layout,
    pub title: String,
    pub description: String,
    pub error: Option<String>,
    pub max_title: usize,
    pub max_description: usize,
}

impl CreatePostTemplate {
    fn new(layout: Layout, draft: &NewPost, error: Option<String>) -> Self {
        Self {
            layout,
            title: draft.title.clone(),
            description: draft.description.clone(),
            error,
            max_title: MAX_TITLE_LEN,
            max_description: MAX_DESCRIPTION_LEN,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/createpost", get(create_page).post(create_post))
}

/// GET /createpost
async fn create_page(page: PageContext) -> Html<CreatePostTemplate> {
    let error = page.viewer.is_none().then(|| SIGNED_OUT_MESSAGE.to_string());
    Html(CreatePostTemplate::new(page.into(), &NewPost::default(), error))
}

/// POST /createpost — multipart form with title, description and an optional image.
async fn create_post(
    State(state): State<AppState>,
    page: PageContext,
    multipart: Multipart,
) -> AppResult<Response> {
    let draft = read_form(multipart).await?;
    let composer = PostComposer::new(state.services.clone(), state.blobs.clone());

    match composer.submit(page.viewer.as_ref(), draft.clone()).await {
        Ok(_) => Ok(Redirect::to("/").into_response()),
        Err(e) => {
            let message = match &e {
                AppError::Unauthenticated => SIGNED_OUT_MESSAGE.to_string(),
                AppError::Validation(_) | AppError::Unavailable(_) => e.user_message(),
                _ => return Err(e),
            };
            let status = match e {
                AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
                AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_REQUEST,
            };
            let template = CreatePostTemplate::new(page.into(), &draft, Some(message));
            Ok((status, Html(template)).into_response())
        }
    }
}

async fn read_form(mut multipart: Multipart) -> AppResult<NewPost> {
    let mut draft = NewPost::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid form data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" | "description" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid form data: {}", e)))?;
                if name == "title" {
                    draft.title = value;
                } else {
                    draft.description = value;
                }
            }
            "image" => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid upload: {}", e)))?;
                if !bytes.is_empty() {
                    draft.image = Some(ImageUpload { file_name, bytes });
                }
            }
            _ => {}
        }
    }
    Ok(draft)
}
