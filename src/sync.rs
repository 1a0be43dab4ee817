//! Coordinates sync passes over the memory and session sources so
//! concurrent callers never race the same diff-and-reindex pass, grounded
//! on the same `parking_lot::Mutex`-guarded coordination style the store
//! layer uses internally.
//!
//! Exclusivity is enforced with a `tokio::sync::Mutex` gate rather than a
//! shared-future combinator: a caller that arrives mid-pass simply waits
//! for the in-flight pass to finish, then runs its own — which is a no-op
//! diff if nothing changed in between. This keeps the coordinator
//! dependency-free instead of pulling in a futures-combinator crate for a
//! single use site.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::actors::{ActorDirectory, ObservedParticipant};
use crate::indexer::{Candidate, Indexer, SyncReport};
use crate::store::{Role, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    SessionStart,
    Search,
    Manual,
}

#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub memory: SyncReport,
    pub sessions: SyncReport,
}

pub type CandidateProvider =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Candidate>>> + Send>> + Send + Sync>;
pub type ProgressReporter = Arc<dyn Fn(SyncProgress) + Send + Sync>;

const WARM_SESSION_DEDUP: Duration = Duration::from_secs(60);

pub struct SyncCoordinator {
    indexer: Arc<Indexer>,
    memory_candidates: CandidateProvider,
    session_candidates: CandidateProvider,
    actors: Option<Arc<ActorDirectory>>,
    gate: AsyncMutex<()>,
    warmed: Mutex<HashMap<String, Instant>>,
    progress: Option<ProgressReporter>,
}

impl SyncCoordinator {
    pub fn new(
        indexer: Arc<Indexer>,
        memory_candidates: CandidateProvider,
        session_candidates: CandidateProvider,
        actors: Option<Arc<ActorDirectory>>,
        progress: Option<ProgressReporter>,
    ) -> Self {
        Self {
            indexer,
            memory_candidates,
            session_candidates,
            actors,
            gate: AsyncMutex::new(()),
            warmed: Mutex::new(HashMap::new()),
            progress,
        }
    }

    /// Runs one full pass over both sources. Safe to call concurrently:
    /// overlapping calls serialize on `gate` rather than racing the store.
    ///
    /// Actors/aliases are built from the fetched session candidates before
    /// those candidates are indexed, so a search against the freshly synced
    /// chunks can immediately resolve the actors that produced them.
    pub async fn sync(&self, _reason: SyncReason) -> anyhow::Result<SyncOutcome> {
        let _guard = self.gate.lock().await;

        self.report(0, 3, "memory");
        let memory_candidates = (self.memory_candidates)().await?;
        let memory = self.indexer.sync_source(Source::Memory, memory_candidates).await?;

        self.report(1, 3, "sessions");
        let session_candidates = (self.session_candidates)().await?;
        self.observe_actors(&session_candidates).await?;
        let sessions = self.indexer.sync_source(Source::Sessions, session_candidates).await?;

        self.report(2, 3, "done");
        Ok(SyncOutcome { memory, sessions })
    }

    /// Observes every distinct participant and agent present in
    /// `candidates`, upserting their actor/alias rows via the directory.
    /// A no-op when no directory was wired in.
    async fn observe_actors(&self, candidates: &[Candidate]) -> anyhow::Result<()> {
        let Some(actors) = &self.actors else {
            return Ok(());
        };

        let mut seen_participants = HashSet::new();
        let mut seen_agent = false;
        for candidate in candidates {
            if let Some(actor_id) = &candidate.actor_id {
                if seen_participants.insert(actor_id.clone()) {
                    actors
                        .observe_participant(&ObservedParticipant {
                            actor_id: actor_id.clone(),
                            origin_label: actor_id.clone(),
                            channel: "sessions".to_string(),
                        })
                        .await?;
                }
            }
            if !seen_agent && candidate.messages.iter().any(|m| m.role == Role::Assistant) {
                actors.observe_agent("assistant", None).await?;
                seen_agent = true;
            }
        }
        Ok(())
    }

    fn report(&self, completed: usize, total: usize, label: &str) {
        if let Some(progress) = &self.progress {
            progress(SyncProgress { completed, total, label: label.to_string() });
        }
    }

    /// Fire-and-forget sync triggered when a session starts, deduped per
    /// `session_key` for 60 seconds so a burst of messages from the same
    /// conversation doesn't trigger a sync per message.
    pub fn warm_session(self: &Arc<Self>, session_key: String) {
        {
            let mut warmed = self.warmed.lock();
            if let Some(last) = warmed.get(&session_key) {
                if last.elapsed() < WARM_SESSION_DEDUP {
                    return;
                }
            }
            warmed.insert(session_key.clone(), Instant::now());
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.sync(SyncReason::SessionStart).await {
                tracing::warn!(session_key = %session_key, error = %err, "warm_session sync failed");
            }
        });
    }

    /// Fire-and-forget background sync hook for the `sync.on_search`
    /// config path. Callers decide whether to invoke this based on config;
    /// the coordinator itself has no opinion on when it's appropriate.
    pub fn on_search(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.sync(SyncReason::Search).await {
                tracing::warn!(error = %err, "on_search background sync failed");
            }
        });
    }
}
