//! Session lifecycle: the state machine between the record store and the
//! background worker.
//!
//! Per external session id a session moves `NoSession -> Active -> Completed`;
//! a later `begin` for the same id creates a fresh instance rather than
//! reviving the old one. All durable facts live in the store — the worker is
//! only ever notified, never consulted.

use serde::Serialize;
use tracing::{info, instrument};

use engram_core::EndReason;
use engram_store::observations::{NewObservation, ObservationRepo, ObservationRow};
use engram_store::prompts::{PromptRepo, PromptRow};
use engram_store::sessions::{SessionRepo, SessionRow};
use engram_store::summaries::{NewSummary, SummaryRepo, SummaryRow};
use engram_store::{Database, StoreError};
use engram_worker::{WorkerCoordinator, WorkerSignal};

/// What `begin` does when an active session already exists for the id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Surface `Conflict`; the caller must end the old instance first.
    Reject,
    /// Return the existing active row unchanged.
    #[default]
    Resume,
    /// Complete the old instance and create a fresh one.
    Supersede,
}

/// Result of `end`. Distinguishes the store commit (authoritative) from
/// whether the worker was told.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EndOutcome {
    /// No active session existed — ending twice, or ending a session that
    /// never started, is success.
    NoSession,
    Completed { session_id: i64, worker: WorkerSignal },
}

pub struct SessionLifecycle {
    sessions: SessionRepo,
    observations: ObservationRepo,
    summaries: SummaryRepo,
    prompts: PromptRepo,
    worker: WorkerCoordinator,
    policy: DuplicatePolicy,
}

impl SessionLifecycle {
    pub fn new(db: Database, worker: WorkerCoordinator) -> Self {
        Self::with_policy(db, worker, DuplicatePolicy::default())
    }

    pub fn with_policy(db: Database, worker: WorkerCoordinator, policy: DuplicatePolicy) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            observations: ObservationRepo::new(db.clone()),
            summaries: SummaryRepo::new(db.clone()),
            prompts: PromptRepo::new(db),
            worker,
            policy,
        }
    }

    /// Start a session for an external id. A duplicate `begin` against a
    /// live instance follows the configured [`DuplicatePolicy`].
    #[instrument(skip(self), fields(session_id = %external_id, project))]
    pub fn begin(
        &self,
        external_id: &str,
        project: &str,
        conversation_id: Option<&str>,
    ) -> Result<SessionRow, StoreError> {
        match self.sessions.find_active(external_id)? {
            None => self.sessions.create(external_id, project, conversation_id),
            Some(existing) => match self.policy {
                DuplicatePolicy::Reject => Err(StoreError::Conflict(format!(
                    "active session already exists for {external_id}"
                ))),
                DuplicatePolicy::Resume => {
                    info!(session_id = %external_id, "resuming active session");
                    Ok(existing)
                }
                DuplicatePolicy::Supersede => {
                    info!(session_id = %external_id, "superseding active session");
                    self.sessions.mark_completed(existing.id)?;
                    self.sessions.create(external_id, project, conversation_id)
                }
            },
        }
    }

    /// Store a user prompt against the active session. `NotFound` if there
    /// is none — a prompt cannot start a session by itself.
    #[instrument(skip(self, text), fields(session_id = %external_id))]
    pub fn record_prompt(&self, external_id: &str, text: &str) -> Result<PromptRow, StoreError> {
        self.prompts.create(external_id, text)
    }

    /// Store an observation against the active session.
    #[instrument(skip(self, input), fields(session_id = %input.session_id))]
    pub fn record_observation(
        &self,
        input: &NewObservation,
    ) -> Result<ObservationRow, StoreError> {
        if self.sessions.find_active(&input.session_id)?.is_none() {
            return Err(StoreError::NotFound(format!(
                "no active session for {}",
                input.session_id
            )));
        }
        self.observations.create(input)
    }

    /// Store a summary against the active session.
    #[instrument(skip(self, input), fields(session_id = %input.session_id))]
    pub fn record_summary(&self, input: &NewSummary) -> Result<SummaryRow, StoreError> {
        if self.sessions.find_active(&input.session_id)?.is_none() {
            return Err(StoreError::NotFound(format!(
                "no active session for {}",
                input.session_id
            )));
        }
        self.summaries.create(input)
    }

    /// Make sure a worker is available for this session and record its port.
    /// Returns whether the worker is ready; `false` is non-fatal.
    #[instrument(skip(self), fields(session_id = %external_id))]
    pub async fn prepare_worker(&self, external_id: &str) -> Result<bool, StoreError> {
        let Some(session) = self.sessions.find_active(external_id)? else {
            return Ok(false);
        };
        if !self.worker.ensure_running().await {
            return Ok(false);
        }
        self.sessions.set_worker_port(session.id, self.worker.port())?;
        Ok(true)
    }

    /// End the active session for an external id.
    ///
    /// The completion is committed to the store first; only then, with no
    /// lock held, is the worker signalled. `clear` skips the signal so a
    /// future resume can reattach to the running worker. Worker failures are
    /// absorbed — the outcome records them, the call still succeeds.
    #[instrument(skip(self), fields(session_id = %external_id, reason = %reason))]
    pub async fn end(
        &self,
        external_id: &str,
        reason: EndReason,
    ) -> Result<EndOutcome, StoreError> {
        let Some(session) = self.sessions.find_active(external_id)? else {
            info!(session_id = %external_id, "end with no active session, nothing to do");
            return Ok(EndOutcome::NoSession);
        };

        self.sessions.mark_completed(session.id)?;

        let worker = match (reason.aborts_worker(), session.worker_port) {
            (true, Some(port)) => self.worker.abort(external_id, port).await,
            _ => WorkerSignal::NotAttempted,
        };

        info!(
            session_id = %external_id,
            reason = %reason,
            worker = ?worker,
            "session completed"
        );

        Ok(EndOutcome::Completed {
            session_id: session.id,
            worker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::ObservationKind;
    use engram_store::search::{ContextItem, SearchRepo};
    use engram_store::sessions::SessionStatus;
    use engram_worker::registry::JobRegistry;
    use engram_worker::server::{self, ServerConfig};
    use engram_worker::WorkerConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator() -> WorkerCoordinator {
        WorkerCoordinator::new(WorkerConfig {
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        })
    }

    fn lifecycle(db: &Database) -> SessionLifecycle {
        SessionLifecycle::new(db.clone(), coordinator())
    }

    fn observation(session_id: &str, kind: ObservationKind, title: &str) -> NewObservation {
        NewObservation {
            session_id: session_id.to_string(),
            kind: Some(kind),
            title: title.to_string(),
            narrative: format!("{title} narrative"),
            ..Default::default()
        }
    }

    #[test]
    fn begin_creates_active_session() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let session = lc.begin("s1", "demo", None).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.project, "demo");
    }

    #[test]
    fn resume_returns_existing_instance() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let first = lc.begin("s1", "demo", None).unwrap();
        let second = lc.begin("s1", "demo", None).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn reject_policy_surfaces_conflict() {
        let db = Database::in_memory().unwrap();
        let lc = SessionLifecycle::with_policy(db, coordinator(), DuplicatePolicy::Reject);
        lc.begin("s1", "demo", None).unwrap();
        assert!(matches!(
            lc.begin("s1", "demo", None),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn supersede_completes_old_instance() {
        let db = Database::in_memory().unwrap();
        let lc = SessionLifecycle::with_policy(db.clone(), coordinator(), DuplicatePolicy::Supersede);
        let first = lc.begin("s1", "demo", None).unwrap();
        let second = lc.begin("s1", "demo", None).unwrap();
        assert_ne!(first.id, second.id);

        let sessions = SessionRepo::new(db);
        assert_eq!(sessions.get(first.id).unwrap().status, SessionStatus::Completed);
        assert_eq!(sessions.get(second.id).unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn record_prompt_without_session_fails() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        assert!(matches!(
            lc.record_prompt("ghost", "hello"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn record_prompt_bumps_counter() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        lc.begin("s1", "demo", None).unwrap();
        let p1 = lc.record_prompt("s1", "first").unwrap();
        let p2 = lc.record_prompt("s1", "second").unwrap();
        assert_eq!(p1.prompt_number, 1);
        assert_eq!(p2.prompt_number, 2);
    }

    #[test]
    fn record_observation_requires_active_session() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let result = lc.record_observation(&observation("ghost", ObservationKind::Change, "x"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn record_summary_requires_active_session() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let result = lc.record_summary(&NewSummary {
            session_id: "ghost".to_string(),
            request: "r".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn end_exit_completes_and_signals_worker() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let session = lc.begin("s1", "demo", None).unwrap();

        // Live worker with a registered job for this session
        let registry = Arc::new(JobRegistry::new());
        let token = registry.register("s1");
        let handle = server::start(ServerConfig { port: 0 }, registry.clone())
            .await
            .unwrap();
        SessionRepo::new(db.clone())
            .set_worker_port(session.id, handle.port)
            .unwrap();

        for (kind, title) in [
            (ObservationKind::Decision, "chose sqlite"),
            (ObservationKind::Bugfix, "fixed the race"),
            (ObservationKind::Feature, "added search"),
        ] {
            lc.record_observation(&observation("s1", kind, title)).unwrap();
        }

        let outcome = lc.end("s1", EndReason::Exit).await.unwrap();
        assert_eq!(
            outcome,
            EndOutcome::Completed {
                session_id: session.id,
                worker: WorkerSignal::Notified,
            }
        );
        assert!(token.is_cancelled());

        let fetched = SessionRepo::new(db.clone()).get(session.id).unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);

        // Seeded context comes back most-recent-first
        let items = SearchRepo::new(db).recent_context("demo", 10).unwrap();
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], ContextItem::Observation(o) if o.title == "added search"));
        assert!(matches!(&items[2], ContextItem::Observation(o) if o.title == "chose sqlite"));
    }

    #[tokio::test]
    async fn end_clear_leaves_worker_running() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let session = lc.begin("s1", "demo", None).unwrap();

        let registry = Arc::new(JobRegistry::new());
        let token = registry.register("s1");
        let handle = server::start(ServerConfig { port: 0 }, registry.clone())
            .await
            .unwrap();
        SessionRepo::new(db.clone())
            .set_worker_port(session.id, handle.port)
            .unwrap();

        let outcome = lc.end("s1", EndReason::Clear).await.unwrap();
        assert_eq!(
            outcome,
            EndOutcome::Completed {
                session_id: session.id,
                worker: WorkerSignal::NotAttempted,
            }
        );
        // The job survives for a future resume
        assert!(!token.is_cancelled());
        assert!(registry.contains("s1"));

        let fetched = SessionRepo::new(db).get(session.id).unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn end_unknown_session_is_noop_success() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let outcome = lc.end("unknown-id", EndReason::Other).await.unwrap();
        assert_eq!(outcome, EndOutcome::NoSession);

        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let session = lc.begin("s1", "demo", None).unwrap();

        let first = lc.end("s1", EndReason::Exit).await.unwrap();
        assert!(matches!(first, EndOutcome::Completed { .. }));

        let second = lc.end("s1", EndReason::Exit).await.unwrap();
        assert_eq!(second, EndOutcome::NoSession);

        let fetched = SessionRepo::new(db).get(session.id).unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn end_with_unreachable_worker_still_completes() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let session = lc.begin("s1", "demo", None).unwrap();

        // Port with no listener
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        SessionRepo::new(db.clone())
            .set_worker_port(session.id, port)
            .unwrap();

        let outcome = lc.end("s1", EndReason::Logout).await.unwrap();
        assert_eq!(
            outcome,
            EndOutcome::Completed {
                session_id: session.id,
                worker: WorkerSignal::Unreachable,
            }
        );

        let fetched = SessionRepo::new(db).get(session.id).unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn end_without_worker_port_does_not_attempt_abort() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        let session = lc.begin("s1", "demo", None).unwrap();

        let outcome = lc.end("s1", EndReason::Exit).await.unwrap();
        assert_eq!(
            outcome,
            EndOutcome::Completed {
                session_id: session.id,
                worker: WorkerSignal::NotAttempted,
            }
        );
    }

    #[tokio::test]
    async fn prepare_worker_records_port() {
        let db = Database::in_memory().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let handle = server::start(ServerConfig { port: 0 }, registry).await.unwrap();

        let worker = WorkerCoordinator::new(WorkerConfig {
            port: handle.port,
            ..Default::default()
        });
        let lc = SessionLifecycle::new(db.clone(), worker);
        let session = lc.begin("s1", "demo", None).unwrap();

        assert!(lc.prepare_worker("s1").await.unwrap());
        let fetched = SessionRepo::new(db).get(session.id).unwrap();
        assert_eq!(fetched.worker_port, Some(handle.port));
    }

    #[tokio::test]
    async fn prepare_worker_without_session() {
        let db = Database::in_memory().unwrap();
        let lc = lifecycle(&db);
        assert!(!lc.prepare_worker("ghost").await.unwrap());
    }
}
