//! Cycle orchestration: fetch posts, fan out one worker per post, persist.
//!
//! One cycle walks `Idle → FetchPosts → DispatchWorkers → AwaitCompletion →
//! Persist → Idle`. The daemon loop adds a `Sleeping` state between cycles:
//! a short sleep after success, a longer backoff after a [`CycleError`].
//!
//! Workers share one rule snapshot and one [`SeenLedger`] for the whole
//! cycle. The snapshot is only swapped at the start of a cycle, so no worker
//! ever sees a half-reloaded rule set. Each post runs in its own task so a
//! failure in one never reaches its siblings. The orchestrator stops waiting
//! on a post after `task_timeout` without cancelling it; the abandoned task
//! keeps its worker slot until it really finishes, across cycles too.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{CycleError, TaskError};
use crate::graph::{PageApi, Post};
use crate::ledger::SeenLedger;
use crate::rules::{CommentMatcher, MatchContext, RuleSnapshot, RuleSource};

/// Where the orchestrator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    FetchPosts,
    DispatchWorkers,
    AwaitCompletion,
    Persist,
    Sleeping,
}

/// Summary of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    /// Posts fetched.
    pub posts: usize,
    /// Post tasks that finished without error.
    pub completed: usize,
    /// Post tasks that failed or panicked.
    pub failed: usize,
    /// Post tasks abandoned after the timeout.
    pub timed_out: usize,
    /// Replies confirmed sent by completed tasks.
    pub replied: usize,
}

/// What one post's worker did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostOutcome {
    pub comments: usize,
    /// Skipped because already replied to or held by another worker.
    pub skipped: usize,
    pub replied: usize,
    pub failed_dispatch: usize,
}

struct LoadedRules {
    snapshot: Arc<RuleSnapshot>,
    loaded_at: Instant,
}

/// Drives fetch → resolve → match → dispatch → ledger for every post.
pub struct Orchestrator {
    api: Arc<dyn PageApi>,
    source: Arc<dyn RuleSource>,
    ledger: Arc<SeenLedger>,
    matcher: CommentMatcher,
    config: OrchestratorConfig,
    rules: AsyncMutex<Option<LoadedRules>>,
    state: Mutex<CycleState>,
    /// Worker slots, shared by every cycle.
    slots: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn PageApi>,
        source: Arc<dyn RuleSource>,
        ledger: Arc<SeenLedger>,
        config: OrchestratorConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            api,
            source,
            ledger,
            matcher: CommentMatcher::new(config.policy),
            config,
            rules: AsyncMutex::new(None),
            state: Mutex::new(CycleState::Idle),
            slots,
        }
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ledger(&self) -> &Arc<SeenLedger> {
        &self.ledger
    }

    fn enter(&self, next: CycleState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = ?*state, to = ?next, "Cycle state");
        *state = next;
    }

    /// Current rule snapshot, reloading it if older than the reload
    /// interval. A failed reload keeps the previous snapshot.
    async fn current_rules(&self) -> Result<Arc<RuleSnapshot>, CycleError> {
        let mut loaded = self.rules.lock().await;

        if let Some(current) = loaded.as_ref() {
            if current.loaded_at.elapsed() < self.config.reload_interval {
                return Ok(Arc::clone(&current.snapshot));
            }
        }

        match self.source.load().await {
            Ok(snapshot) => {
                info!(
                    source = self.source.name(),
                    rules = snapshot.rule_count(),
                    "Rules reloaded"
                );
                let snapshot = Arc::new(snapshot);
                *loaded = Some(LoadedRules {
                    snapshot: Arc::clone(&snapshot),
                    loaded_at: Instant::now(),
                });
                Ok(snapshot)
            }
            Err(e) => match loaded.as_ref() {
                Some(previous) => {
                    warn!(
                        source = self.source.name(),
                        error = %e,
                        "Rule reload failed, keeping previous rules"
                    );
                    Ok(Arc::clone(&previous.snapshot))
                }
                None => Err(CycleError::Rules(e)),
            },
        }
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4();
        let result = self
            .cycle(cycle_id)
            .instrument(info_span!("cycle", %cycle_id))
            .await;
        self.enter(CycleState::Idle);
        result
    }

    async fn cycle(&self, cycle_id: Uuid) -> Result<CycleReport, CycleError> {
        let snapshot = self.current_rules().await?;

        self.enter(CycleState::FetchPosts);
        let posts = self.api.fetch_posts().await.map_err(CycleError::FetchPosts)?;
        info!(posts = posts.len(), "Fetched posts");

        self.enter(CycleState::DispatchWorkers);
        let total = posts.len();
        let mut tasks = self.spawn_workers(posts, snapshot);

        self.enter(CycleState::AwaitCompletion);
        let mut report = CycleReport {
            cycle_id,
            posts: total,
            completed: 0,
            failed: 0,
            timed_out: 0,
            replied: 0,
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((post_id, Ok(outcome))) => {
                    debug!(
                        post_id = %post_id,
                        comments = outcome.comments,
                        replied = outcome.replied,
                        "Post processed"
                    );
                    report.completed += 1;
                    report.replied += outcome.replied;
                }
                Ok((post_id, Err(e @ TaskError::TimedOut { .. }))) => {
                    warn!(post_id = %post_id, error = %e, "Post task abandoned");
                    report.timed_out += 1;
                }
                Ok((post_id, Err(e))) => {
                    error!(post_id = %post_id, error = %e, "Post task failed");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Post task could not be joined");
                    report.failed += 1;
                }
            }
        }

        self.enter(CycleState::Persist);
        if let Err(e) = self.ledger.persist().await {
            error!(error = %e, "Failed to persist seen-comment ledger");
        }

        info!(
            posts = report.posts,
            completed = report.completed,
            failed = report.failed,
            timed_out = report.timed_out,
            replied = report.replied,
            "Cycle complete"
        );
        Ok(report)
    }

    /// One task per post, at most `workers` posts in flight at once.
    fn spawn_workers(
        &self,
        posts: Vec<Post>,
        snapshot: Arc<RuleSnapshot>,
    ) -> JoinSet<(String, Result<PostOutcome, TaskError>)> {
        let worker = PostWorker {
            api: Arc::clone(&self.api),
            ledger: Arc::clone(&self.ledger),
            matcher: self.matcher,
            snapshot,
            default_name: Arc::from(self.config.default_name.as_str()),
        };
        let timeout = self.config.task_timeout;

        let mut tasks = JoinSet::new();
        for post in posts {
            let worker = worker.clone();
            let slots = Arc::clone(&self.slots);
            let span = info_span!("post", post_id = %post.id);

            tasks.spawn(
                async move {
                    let post_id = post.id.clone();
                    let Ok(permit) = slots.acquire_owned().await else {
                        return (post_id.clone(), Err(TaskError::PoolClosed { post_id }));
                    };
                    let result = run_with_timeout(worker, post, permit, timeout).await;
                    (post_id, result)
                }
                .instrument(span),
            );
        }
        tasks
    }

    /// Loop cycles until `shutdown` turns true or its sender is dropped.
    pub async fn run_daemon(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.config.workers,
            policy = ?self.matcher.policy(),
            "Auto-responder running"
        );

        loop {
            let delay = match self.run_cycle().await {
                Ok(_) => self.config.cycle_sleep,
                Err(e) => {
                    error!(error = %e, backoff = ?self.config.backoff, "Cycle failed, backing off");
                    self.config.backoff
                }
            };

            if *shutdown.borrow() {
                break;
            }

            self.enter(CycleState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            self.enter(CycleState::Idle);

            if *shutdown.borrow() {
                break;
            }
        }

        info!("Auto-responder shutting down");
        if let Err(e) = self.ledger.persist().await {
            error!(error = %e, "Failed to persist seen-comment ledger on shutdown");
        }
    }
}

/// Run a post in its own task and stop waiting after `timeout`. The inner
/// task is detached, not aborted, when the timeout fires, and holds the
/// worker slot until it returns.
async fn run_with_timeout(
    worker: PostWorker,
    post: Post,
    permit: OwnedSemaphorePermit,
    timeout: Duration,
) -> Result<PostOutcome, TaskError> {
    let post_id = post.id.clone();
    let inner = tokio::spawn(
        async move {
            let _permit = permit;
            worker.process_post(&post).await
        }
        .in_current_span(),
    );

    match tokio::time::timeout(timeout, inner).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(TaskError::Panicked {
            post_id,
            reason: e.to_string(),
        }),
        Err(_) => Err(TaskError::TimedOut { post_id, timeout }),
    }
}

/// Per-post work, shared read-only state only.
#[derive(Clone)]
struct PostWorker {
    api: Arc<dyn PageApi>,
    ledger: Arc<SeenLedger>,
    matcher: CommentMatcher,
    snapshot: Arc<RuleSnapshot>,
    default_name: Arc<str>,
}

impl PostWorker {
    async fn process_post(&self, post: &Post) -> Result<PostOutcome, TaskError> {
        let comments =
            self.api
                .fetch_comments(&post.id)
                .await
                .map_err(|source| TaskError::FetchComments {
                    post_id: post.id.clone(),
                    source,
                })?;

        let rules = self.snapshot.resolve(&post.id);
        let mut outcome = PostOutcome::default();

        for comment in &comments {
            outcome.comments += 1;

            let Some(claim) = self.ledger.try_claim(&comment.id) else {
                outcome.skipped += 1;
                continue;
            };

            let ctx = MatchContext {
                name: comment.author_name().unwrap_or(&self.default_name),
            };
            let Some(reply) = self.matcher.match_comment(comment.text(), &rules, &ctx) else {
                continue;
            };

            match self.api.reply(&comment.id, &reply).await {
                Ok(true) => {
                    claim.commit();
                    outcome.replied += 1;
                }
                Ok(false) => {
                    warn!(comment_id = %comment.id, "Reply not accepted, will retry next cycle");
                    outcome.failed_dispatch += 1;
                }
                Err(e) => {
                    warn!(comment_id = %comment.id, error = %e, "Reply failed, will retry next cycle");
                    outcome.failed_dispatch += 1;
                }
            }
        }

        Ok(outcome)
    }
}
