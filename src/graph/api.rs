//! `PageApi` trait and the records it yields.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// A page post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Comment author as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A comment on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub from: Option<Author>,
}

impl Comment {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: Some(message.into()),
            from: None,
        }
    }

    pub fn with_author(mut self, name: impl Into<String>) -> Self {
        self.from = Some(Author {
            id: None,
            name: Some(name.into()),
        });
        self
    }

    /// Comment text, empty when absent.
    pub fn text(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    pub fn author_name(&self) -> Option<&str> {
        self.from.as_ref().and_then(|a| a.name.as_deref())
    }
}

/// Fetch/dispatch boundary.
///
/// Implementations follow pagination themselves. A failure after the first
/// page truncates the sequence; only a failure on the first page is an
/// error.
#[async_trait]
pub trait PageApi: Send + Sync {
    /// All posts on the page.
    async fn fetch_posts(&self) -> Result<Vec<Post>, GraphError>;

    /// All comments on one post, in API order.
    async fn fetch_comments(&self, post_id: &str) -> Result<Vec<Comment>, GraphError>;

    /// Reply to a comment. `Ok(true)` only on confirmed success.
    async fn reply(&self, comment_id: &str, message: &str) -> Result<bool, GraphError>;
}
