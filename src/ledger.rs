//! Seen-comment ledger — at most one reply per comment, across restarts.
//!
//! The ledger holds two sets behind one mutex: comment ids already replied
//! to (`seen`, persisted) and ids a worker is currently handling
//! (`in_flight`, memory only). A worker must obtain a [`Claim`] before
//! dispatching; the claim is refused if the id is in either set, so two
//! workers racing on one comment cannot both send. Committing a claim moves
//! the id into `seen`; dropping it uncommitted releases the id for a later
//! retry.
//!
//! Persistence is a whole-file snapshot written from one place after a
//! cycle's workers finish. A crash between a successful dispatch and the
//! next `persist()` can produce one duplicate reply after restart; the
//! ledger does not try to close that window.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::LedgerError;

#[derive(Debug, Default)]
struct LedgerState {
    seen: HashSet<String>,
    in_flight: HashSet<String>,
}

/// Shared dedup ledger. Cheap to share as `Arc<SeenLedger>`.
#[derive(Debug)]
pub struct SeenLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl SeenLedger {
    /// Ledger with no backing file (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Load the ledger from a JSON array file. A missing file is an empty
    /// ledger.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let seen = read_snapshot(&path).await?;
        info!(path = %path.display(), count = seen.len(), "Seen-comment ledger loaded");
        Ok(Self {
            path: Some(path),
            state: Mutex::new(LedgerState {
                seen,
                in_flight: HashSet::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_seen(&self, comment_id: &str) -> bool {
        self.lock().seen.contains(comment_id)
    }

    /// Record a comment as replied to.
    pub fn mark_seen(&self, comment_id: &str) {
        let mut state = self.lock();
        state.in_flight.remove(comment_id);
        state.seen.insert(comment_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().seen.is_empty()
    }

    /// Reserve a comment for processing. `None` if it was already replied
    /// to or another worker holds it.
    pub fn try_claim(self: &Arc<Self>, comment_id: &str) -> Option<Claim> {
        let mut state = self.lock();
        if state.seen.contains(comment_id) || state.in_flight.contains(comment_id) {
            return None;
        }
        state.in_flight.insert(comment_id.to_string());
        Some(Claim {
            ledger: Arc::clone(self),
            comment_id: comment_id.to_string(),
            committed: false,
        })
    }

    fn release(&self, comment_id: &str) {
        self.lock().in_flight.remove(comment_id);
    }

    /// Write the full seen set back to the backing file. Returns the number
    /// of ids written; a ledger without a file writes nothing.
    pub async fn persist(&self) -> Result<usize, LedgerError> {
        let Some(path) = &self.path else {
            return Ok(0);
        };

        let mut ids: Vec<String> = self.lock().seen.iter().cloned().collect();
        ids.sort();
        write_snapshot(path, &ids).await?;
        debug!(path = %path.display(), count = ids.len(), "Seen-comment ledger saved");
        Ok(ids.len())
    }
}

/// Exclusive right to reply to one comment.
#[derive(Debug)]
pub struct Claim {
    ledger: Arc<SeenLedger>,
    comment_id: String,
    committed: bool,
}

impl Claim {
    pub fn comment_id(&self) -> &str {
        &self.comment_id
    }

    /// The reply went out: mark the comment seen.
    pub fn commit(mut self) {
        self.ledger.mark_seen(&self.comment_id);
        self.committed = true;
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.committed {
            self.ledger.release(&self.comment_id);
        }
    }
}

async fn read_snapshot(path: &Path) -> Result<HashSet<String>, LedgerError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => {
            return Err(LedgerError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    let ids: Vec<String> = serde_json::from_str(&raw).map_err(|e| LedgerError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(ids.into_iter().collect())
}

/// Write to a sibling temp file then rename over the target.
async fn write_snapshot(path: &Path, ids: &[String]) -> Result<(), LedgerError> {
    let write_err = |e: std::io::Error| LedgerError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let json = serde_json::to_string_pretty(ids).map_err(|e| LedgerError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_commit_marks_seen() {
        let ledger = Arc::new(SeenLedger::in_memory());
        let claim = ledger.try_claim("c1").unwrap();
        assert_eq!(claim.comment_id(), "c1");
        assert!(!ledger.has_seen("c1"));

        claim.commit();
        assert!(ledger.has_seen("c1"));
        assert!(ledger.try_claim("c1").is_none());
    }

    #[test]
    fn concurrent_claims_are_exclusive() {
        let ledger = Arc::new(SeenLedger::in_memory());
        let first = ledger.try_claim("c1");
        assert!(first.is_some());
        assert!(ledger.try_claim("c1").is_none());
    }

    #[test]
    fn dropped_claim_is_released_for_retry() {
        let ledger = Arc::new(SeenLedger::in_memory());
        drop(ledger.try_claim("c1").unwrap());
        assert!(!ledger.has_seen("c1"));
        assert!(ledger.try_claim("c1").is_some());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SeenLedger::load(dir.path().join("seen.json")).await.unwrap();
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/seen.json");

        let ledger = SeenLedger::load(&path).await.unwrap();
        ledger.mark_seen("111_1");
        ledger.mark_seen("111_2");
        assert_eq!(ledger.persist().await.unwrap(), 2);

        let reloaded = SeenLedger::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.has_seen("111_1"));
        assert!(reloaded.has_seen("111_2"));
    }

    #[tokio::test]
    async fn in_flight_ids_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");
        let ledger = Arc::new(SeenLedger::load(&path).await.unwrap());

        let _held = ledger.try_claim("pending").unwrap();
        ledger.persist().await.unwrap();

        let reloaded = SeenLedger::load(&path).await.unwrap();
        assert!(!reloaded.has_seen("pending"));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");
        tokio::fs::write(&path, "{\"not\": \"a list\"}").await.unwrap();

        let err = SeenLedger::load(&path).await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn in_memory_persist_is_noop() {
        let ledger = SeenLedger::in_memory();
        ledger.mark_seen("x");
        assert_eq!(ledger.persist().await.unwrap(), 0);
    }
}
