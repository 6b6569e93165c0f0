use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Post {
    pub fn author_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Anonymous")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    #[serde(rename = "id")]
    pub like_id: String,
    pub user_id: String,
    pub post_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// The signed-in user interacting with the pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub uid: String,
    pub display_name: Option<String>,
}

impl Viewer {
    pub fn new(uid: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name,
        }
    }

    pub fn owns(&self, post: &Post) -> bool {
        self.uid == post.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Document;
    use serde_json::json;

    #[test]
    fn post_decodes_from_camel_case_document() {
        let doc = Document {
            id: "p1".into(),
            fields: json!({
                "userId": "u1",
                "username": null,
                "title": "T",
                "description": "D"
            })
            .as_object()
            .cloned()
            .unwrap(),
        };
        let post: Post = doc.decode().unwrap();
        assert_eq!(post.id, "p1");
        assert_eq!(post.user_id, "u1");
        assert_eq!(post.author_name(), "Anonymous");
        assert!(post.image_url.is_none());
    }

    #[test]
    fn like_id_comes_from_document_id() {
        let doc = Document {
            id: "l1".into(),
            fields: json!({"userId": "u2", "postId": "p1"})
                .as_object()
                .cloned()
                .unwrap(),
        };
        let like: Like = doc.decode().unwrap();
        assert_eq!(like.like_id, "l1");
        assert_eq!(like.post_id, "p1");
    }

    #[test]
    fn user_profile_uses_photo_url_key() {
        let profile: UserProfile = serde_json::from_value(json!({
            "uid": "u1",
            "photoURL": "https://example.com/a.png"
        }))
        .unwrap();
        assert_eq!(
            profile.photo_url.as_deref(),
            Some("https://example.com/a.png")
        );
        assert!(profile.display_name.is_none());
    }
}
