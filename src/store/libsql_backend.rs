//! libSQL backend — async `RuleStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::rules::Rule;
use crate::store::migrations;
use crate::store::traits::{NewRule, RuleStore, RuleUpdate};

/// Columns read by every rule query, in `row_to_rule` order.
const RULE_COLUMNS: &str = "id, pattern, response, priority, tag, post_id, auto_reply, reply_once";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Rule database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Open(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_rules(
        &self,
        context: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;

        let mut rules = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_rule(&row) {
                    Ok(rule) => rules.push(rule),
                    Err(e) => warn!("Skipping rule row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{context}: {e}"))),
            }
        }
        Ok(rules)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Map a libsql Row to a Rule. Column order matches RULE_COLUMNS.
fn row_to_rule(row: &libsql::Row) -> Result<Rule, libsql::Error> {
    Ok(Rule {
        id: Some(row.get(0)?),
        pattern: row.get(1)?,
        response: row.get(2)?,
        priority: row.get(3)?,
        tag: row.get(4).ok(),
        post_id: row.get(5).ok(),
        auto_reply: row.get::<i64>(6).unwrap_or(1) != 0,
        reply_once: row.get::<i64>(7).unwrap_or(0) != 0,
    })
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

#[async_trait]
impl RuleStore for LibSqlBackend {
    async fn add_rule(&self, rule: &NewRule) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO rules (pattern, response, priority, tag, post_id, auto_reply,
                reply_once, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                rule.pattern.as_str(),
                rule.response.as_str(),
                rule.priority,
                opt_text(rule.tag.as_deref()),
                opt_text(rule.post_id.as_deref()),
                rule.auto_reply as i64,
                rule.reply_once as i64,
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("add_rule: {e}")))?;

        Ok(conn.last_insert_rowid())
    }

    async fn update_rule(&self, id: i64, update: &RuleUpdate) -> Result<bool, DatabaseError> {
        if update.is_empty() {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE rules SET
                    pattern = COALESCE(?1, pattern),
                    response = COALESCE(?2, response),
                    priority = COALESCE(?3, priority),
                    tag = COALESCE(?4, tag),
                    post_id = COALESCE(?5, post_id),
                    auto_reply = COALESCE(?6, auto_reply),
                    reply_once = COALESCE(?7, reply_once),
                    updated_at = ?8
                 WHERE id = ?9",
                params![
                    opt_text(update.pattern.as_deref()),
                    opt_text(update.response.as_deref()),
                    opt_int(update.priority),
                    opt_text(update.tag.as_deref()),
                    opt_text(update.post_id.as_deref()),
                    opt_int(update.auto_reply.map(i64::from)),
                    opt_int(update.reply_once.map(i64::from)),
                    now,
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule: {e}")))?;

        Ok(changed > 0)
    }

    async fn get_global_rules(&self) -> Result<Vec<Rule>, DatabaseError> {
        self.query_rules(
            "get_global_rules",
            &format!(
                "SELECT {RULE_COLUMNS} FROM rules WHERE post_id IS NULL ORDER BY priority DESC, id ASC"
            ),
            (),
        )
        .await
    }

    async fn get_post_rules(&self, post_id: &str) -> Result<Vec<Rule>, DatabaseError> {
        self.query_rules(
            "get_post_rules",
            &format!(
                "SELECT {RULE_COLUMNS} FROM rules WHERE post_id = ?1 ORDER BY priority DESC, id ASC"
            ),
            params![post_id],
        )
        .await
    }

    async fn list_post_rules(&self) -> Result<Vec<Rule>, DatabaseError> {
        self.query_rules(
            "list_post_rules",
            &format!(
                "SELECT {RULE_COLUMNS} FROM rules WHERE post_id IS NOT NULL ORDER BY priority DESC, id ASC"
            ),
            (),
        )
        .await
    }
}
