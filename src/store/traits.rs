//! `RuleStore` trait — async interface to the relational rule table.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::rules::Rule;

/// Fields for a rule insert. Defaults match the table defaults.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub pattern: String,
    pub response: String,
    pub priority: i64,
    pub tag: Option<String>,
    pub post_id: Option<String>,
    pub auto_reply: bool,
    pub reply_once: bool,
}

impl NewRule {
    pub fn new(pattern: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            response: response.into(),
            priority: 5,
            tag: None,
            post_id: None,
            auto_reply: true,
            reply_once: false,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn post_id(mut self, post_id: impl Into<String>) -> Self {
        self.post_id = Some(post_id.into());
        self
    }

    pub fn auto_reply(mut self, enabled: bool) -> Self {
        self.auto_reply = enabled;
        self
    }

    pub fn reply_once(mut self, once: bool) -> Self {
        self.reply_once = once;
        self
    }
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub pattern: Option<String>,
    pub response: Option<String>,
    pub priority: Option<i64>,
    pub tag: Option<String>,
    pub post_id: Option<String>,
    pub auto_reply: Option<bool>,
    pub reply_once: Option<bool>,
}

impl RuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.pattern.is_none()
            && self.response.is_none()
            && self.priority.is_none()
            && self.tag.is_none()
            && self.post_id.is_none()
            && self.auto_reply.is_none()
            && self.reply_once.is_none()
    }
}

/// Backend-agnostic rule storage.
///
/// Every list method returns rows ordered by priority descending, then by
/// insertion order.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Insert a rule. Returns the new row id.
    async fn add_rule(&self, rule: &NewRule) -> Result<i64, DatabaseError>;

    /// Apply a partial update. Returns `false` when nothing was changed
    /// (empty update or unknown id).
    async fn update_rule(&self, id: i64, update: &RuleUpdate) -> Result<bool, DatabaseError>;

    /// Rules with no post scope.
    async fn get_global_rules(&self) -> Result<Vec<Rule>, DatabaseError>;

    /// Rules scoped to exactly `post_id`.
    async fn get_post_rules(&self, post_id: &str) -> Result<Vec<Rule>, DatabaseError>;

    /// Every post-scoped rule, for snapshot loading.
    async fn list_post_rules(&self) -> Result<Vec<Rule>, DatabaseError>;
}
