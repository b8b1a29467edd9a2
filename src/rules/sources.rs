//! `RuleSource` adapters for the two pattern stores.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::RuleSourceError;
use crate::rules::resolver::{RuleSnapshot, RuleSource};
use crate::store::RuleStore;
use crate::store::responses_file;

/// Rules from the `responses.json` file. Entries have no priority, so file
/// order is evaluation order.
pub struct ResponsesFileSource {
    path: PathBuf,
}

impl ResponsesFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleSource for ResponsesFileSource {
    fn name(&self) -> &'static str {
        "responses-file"
    }

    async fn load(&self) -> Result<RuleSnapshot, RuleSourceError> {
        let config = responses_file::load_or_create(&self.path).await?;
        let snapshot = RuleSnapshot::new(config.global_rules(), config.post_rules());
        debug!(rules = snapshot.rule_count(), "Loaded rules from responses file");
        Ok(snapshot)
    }
}

/// Rules from the relational `rules` table.
pub struct RuleStoreSource {
    store: Arc<dyn RuleStore>,
}

impl RuleStoreSource {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RuleSource for RuleStoreSource {
    fn name(&self) -> &'static str {
        "rule-store"
    }

    async fn load(&self) -> Result<RuleSnapshot, RuleSourceError> {
        let global = self.store.get_global_rules().await?;
        let scoped = self.store.list_post_rules().await?;
        let snapshot = RuleSnapshot::from_rules(global.into_iter().chain(scoped));
        debug!(rules = snapshot.rule_count(), "Loaded rules from rule store");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LibSqlBackend, NewRule};

    #[tokio::test]
    async fn file_source_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.json");
        let source = ResponsesFileSource::new(&path);

        let snapshot = source.load().await.unwrap();
        assert_eq!(snapshot.rule_count(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn file_source_resolves_post_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.json");
        tokio::fs::write(
            &path,
            r#"{"global_responses": {"price": "global"}, "post_responses": {"222": {"price": "special"}}}"#,
        )
        .await
        .unwrap();

        let snapshot = ResponsesFileSource::new(&path).load().await.unwrap();
        let set = snapshot.resolve("111_222");
        let replies: Vec<&str> = set.iter().map(|r| r.rule.response.as_str()).collect();
        assert_eq!(replies, vec!["special"]);
    }

    #[tokio::test]
    async fn store_source_merges_priorities() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.add_rule(&NewRule::new("hi", "hello").priority(3)).await.unwrap();
        db.add_rule(&NewRule::new("hi", "post hello").priority(1).post_id("p1"))
            .await
            .unwrap();
        db.add_rule(&NewRule::new("buy", "link").priority(9)).await.unwrap();

        let source = RuleStoreSource::new(db);
        let snapshot = source.load().await.unwrap();
        let set = snapshot.resolve("p1");
        let replies: Vec<&str> = set.iter().map(|r| r.rule.response.as_str()).collect();
        assert_eq!(replies, vec!["link", "post hello"]);
    }
}
