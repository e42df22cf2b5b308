//! Communication hub.
//!
//! The hub registers agents, routes messages, runs sync operations between
//! agent sessions, resolves cross-agent conflicts, and coordinates
//! collaboration sessions.
//!
//! All hub maps live behind one `Mutex<HubState>`. Session I/O always happens
//! with that lock released. Syncs between a given ordered pair of agents are
//! serialized by a dedicated per-pair lock.

#[cfg(feature = "persistent")]
pub mod archive;
mod collaboration;
mod config;
mod messages;
mod routing;
mod status;
mod sync;
mod workers;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::collaborator::CollaboratorHandle;
use crate::conflict::Conflict;
use crate::consistency::{ConsistencyChecker, ConsistencyChecking};
use crate::error::{ExecutionError, TmsError, TmsResult, ValidationError};
use crate::resolver::{
    ConflictResolver, ConflictResolving, EvidenceTable, ResolutionRecord, ResolutionStrategy,
};
use crate::session::{Session, SessionConfig, SessionExport, SessionHandle};

pub use collaboration::{Collaboration, CollaborationId, CollaborationSummary, SharedBelief};
pub use config::{HubConfig, HubConfigSummary, MIN_SYNC_INTERVAL};
pub use messages::{
    AgentMessage, MessageDraft, MessageId, MessageType, Priority, Recipient, ResponseHandle, SendReceipt,
};
pub use routing::ProcessReport;
pub use status::{AgentSummary, ConsistencySummary, HubConsistencyReport, HubStatus, Recommendation, SyncCounts};
pub use sync::{SyncMode, SyncOperation, SyncOperationId, SyncResult, SyncStatus, SyncTarget};
pub use workers::SyncHandle;

use collaboration::CollaborationState;
use messages::MessageQueue;
use workers::{AutoSyncTicker, WorkerPool};

/// Agent name recorded on writes the hub performs.
pub const HUB_AGENT: &str = "hub";

/// Registration state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Idle, with no failed sync outstanding.
    Registered,
    /// A sync involving the agent is running.
    Syncing,
    /// The agent's last sync failed.
    Failed,
}

/// Per-agent counters kept by the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedAgentState {
    /// Syncs the agent took part in that completed.
    pub syncs_completed: u64,
    /// Syncs the agent took part in that failed.
    pub syncs_failed: u64,
    /// Beliefs received through syncs.
    pub items_received: u64,
    /// Conflicts the agent was involved in.
    pub conflicts_seen: u64,
    /// Beliefs the agent shared in collaborations.
    pub beliefs_shared: u64,
}

struct AgentEntry {
    role: String,
    session: SessionHandle,
    registered_at: DateTime<Utc>,
    last_sync: Option<DateTime<Utc>>,
    active_syncs: usize,
    last_sync_failed: bool,
    inbox: VecDeque<AgentMessage>,
    shared: SharedAgentState,
}

impl AgentEntry {
    fn status(&self) -> AgentStatus {
        if self.active_syncs > 0 {
            AgentStatus::Syncing
        } else if self.last_sync_failed {
            AgentStatus::Failed
        } else {
            AgentStatus::Registered
        }
    }
}

struct PendingResponse {
    requester: String,
    tx: Sender<AgentMessage>,
}

struct HubState {
    agents: BTreeMap<String, AgentEntry>,
    queue: MessageQueue,
    next_sequence: u64,
    pending_responses: HashMap<MessageId, PendingResponse>,
    syncs: VecDeque<SyncOperation>,
    collaborations: BTreeMap<CollaborationId, CollaborationState>,
    resolutions: VecDeque<ResolutionRecord>,
    last_consistency: Option<ConsistencySummary>,
}

impl HubState {
    fn new(config: &HubConfig) -> Self {
        Self {
            agents: BTreeMap::new(),
            queue: MessageQueue::new(config.message_queue_capacity),
            next_sequence: 0,
            pending_responses: HashMap::new(),
            syncs: VecDeque::new(),
            collaborations: BTreeMap::new(),
            resolutions: VecDeque::new(),
            last_consistency: None,
        }
    }

    fn agent(&self, id: &str) -> TmsResult<&AgentEntry> {
        self.agents.get(id).ok_or_else(|| TmsError::agent_not_found(id))
    }

    fn agent_mut(&mut self, id: &str) -> TmsResult<&mut AgentEntry> {
        self.agents.get_mut(id).ok_or_else(|| TmsError::agent_not_found(id))
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }
}

/// State shared between the hub facade and its background threads.
struct HubInner {
    config: HubConfig,
    state: Mutex<HubState>,
    pair_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    checker: Arc<dyn ConsistencyChecking>,
    resolver: Arc<dyn ConflictResolving>,
}

impl HubInner {
    fn lock_state(&self, context: &str) -> TmsResult<MutexGuard<'_, HubState>> {
        self.state
            .lock()
            .map_err(|_| TmsError::lock_poisoned(format!("hub.{context}")))
    }

    /// The lock serializing syncs from `source` into `target`.
    fn pair_lock(&self, source: &str, target: &str) -> TmsResult<Arc<Mutex<()>>> {
        let mut locks = self
            .pair_locks
            .lock()
            .map_err(|_| TmsError::lock_poisoned("hub.pair_locks"))?;
        Ok(Arc::clone(
            locks
                .entry((source.to_string(), target.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    /// Every registered agent with its role and session.
    fn agent_handles(&self) -> TmsResult<Vec<(String, String, SessionHandle)>> {
        let state = self.lock_state("agent_handles")?;
        Ok(state
            .agents
            .iter()
            .map(|(id, e)| (id.clone(), e.role.clone(), e.session.clone()))
            .collect())
    }

    /// Resolves each conflict and applies the accepted writes.
    fn resolve_conflicts(
        &self,
        conflicts: &[Conflict],
        strategy: ResolutionStrategy,
    ) -> TmsResult<Vec<ResolutionRecord>> {
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }
        let agents = self.agent_handles()?;
        let beliefs: BTreeSet<&str> = conflicts
            .iter()
            .flat_map(|c| c.beliefs.iter().map(String::as_str))
            .collect();

        let mut table = EvidenceTable::new();
        for (_, role, handle) in &agents {
            let session = handle.read()?;
            table.collect_from(&session, Some(role.as_str()), beliefs.iter().copied());
        }
        let handles: HashMap<&str, &SessionHandle> =
            agents.iter().map(|(id, _, h)| (id.as_str(), h)).collect();

        let mut records = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            let outcome = self.resolver.resolve(conflict, strategy, &table);
            let mut applied = Vec::new();
            for write in outcome.writes(conflict.conflict_type) {
                let Some(handle) = handles.get(write.agent.as_str()) else {
                    warn!(agent = %write.agent, belief = %write.belief, "resolution target not registered; skipping");
                    continue;
                };
                let details = json!({
                    "conflict_id": conflict.id.to_string(),
                    "conflict_type": conflict.conflict_type,
                    "strategy": strategy,
                    "winner": outcome.winner().map(|w| format!("{}@{}", w.belief, w.agent)),
                    "reasoning": outcome.reasoning(),
                });
                match handle.apply_resolution(&write.belief, write.valid, HUB_AGENT, details) {
                    Ok(_) => applied.push(write),
                    Err(e) => warn!(agent = %write.agent, belief = %write.belief, error = %e, "failed to apply resolution"),
                }
            }
            if !outcome.is_resolved() {
                debug!(conflict = %conflict, reasoning = outcome.reasoning(), "conflict left unresolved");
            }
            records.push(ResolutionRecord {
                conflict_id: conflict.id,
                conflict_type: conflict.conflict_type,
                strategy,
                outcome,
                applied,
                resolved_at: Utc::now(),
            });
        }

        let mut state = self.lock_state("resolve_conflicts")?;
        for record in &records {
            state.resolutions.push_back(record.clone());
        }
        while state.resolutions.len() > self.config.resolution_log_capacity {
            state.resolutions.pop_front();
        }
        Ok(records)
    }
}

/// The multi-agent coordinator.
pub struct CommunicationHub {
    inner: Arc<HubInner>,
    collaborators: CollaboratorHandle,
    pool: WorkerPool,
    ticker: Mutex<Option<AutoSyncTicker>>,
}

impl CommunicationHub {
    /// Creates a hub with the canonical checker and resolver.
    pub fn new(config: HubConfig, collaborators: CollaboratorHandle) -> TmsResult<Self> {
        let resolver = ConflictResolver::new(config.expertise.clone());
        Self::with_components(config, collaborators, Arc::new(ConsistencyChecker::new()), Arc::new(resolver))
    }

    /// Creates a hub with custom checking and resolution.
    pub fn with_components(
        config: HubConfig,
        collaborators: CollaboratorHandle,
        checker: Arc<dyn ConsistencyChecking>,
        resolver: Arc<dyn ConflictResolving>,
    ) -> TmsResult<Self> {
        config.validate()?;
        let inner = Arc::new(HubInner {
            state: Mutex::new(HubState::new(&config)),
            pair_locks: Mutex::new(HashMap::new()),
            checker,
            resolver,
            config,
        });
        let pool = WorkerPool::start(inner.config.sync_workers, inner.config.sync_queue_capacity, &inner)?;
        Ok(Self {
            inner,
            collaborators,
            pool,
            ticker: Mutex::new(None),
        })
    }

    /// Configuration the hub was built with.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// The collaborator handle shared with sessions created by this hub.
    #[must_use]
    pub const fn collaborators(&self) -> &CollaboratorHandle {
        &self.collaborators
    }

    /// A fresh session for `owner` wired to this hub's collaborators.
    #[must_use]
    pub fn new_session(&self, owner: &str, config: SessionConfig) -> Session {
        Session::with_config(owner, config, self.collaborators.clone())
    }

    /// Registers an agent and its session.
    ///
    /// With auto-sync on and at least two agents registered, schedules an
    /// incremental sync from every existing agent toward the newcomer.
    #[instrument(skip(self, session))]
    pub fn register_agent(&self, agent: &str, role: &str, session: SessionHandle) -> TmsResult<Vec<SyncHandle>> {
        if agent.trim().is_empty() {
            return Err(ValidationError::EmptyAgentId.into());
        }
        if session.owner() != agent {
            return Err(ValidationError::InvalidField {
                field: "session".to_string(),
                reason: format!("session is owned by '{}', not '{agent}'", session.owner()),
            }
            .into());
        }

        let existing: Vec<String> = {
            let mut state = self.inner.lock_state("register_agent")?;
            if state.agents.contains_key(agent) {
                return Err(ExecutionError::DuplicateRegistration {
                    agent: agent.to_string(),
                }
                .into());
            }
            let existing = state.agents.keys().cloned().collect();
            state.agents.insert(
                agent.to_string(),
                AgentEntry {
                    role: role.to_string(),
                    session,
                    registered_at: Utc::now(),
                    last_sync: None,
                    active_syncs: 0,
                    last_sync_failed: false,
                    inbox: VecDeque::new(),
                    shared: SharedAgentState::default(),
                },
            );
            existing
        };
        info!(agent, role, registered = existing.len() + 1, "agent registered");

        let mut handles = Vec::new();
        if self.inner.config.auto_sync && !existing.is_empty() {
            for source in existing {
                match self.sync_beliefs_async(&source, SyncTarget::agent(agent), SyncMode::Incremental) {
                    Ok(handle) => handles.push(handle),
                    Err(e) => warn!(source = %source, to = agent, error = %e, "initial sync not scheduled"),
                }
            }
        }
        Ok(handles)
    }

    /// Removes an agent and returns a final snapshot of its session.
    ///
    /// Pending syncs involving the agent are cancelled. With the `persistent`
    /// feature and an `archive_dir`, the snapshot is also written to disk.
    #[instrument(skip(self))]
    pub fn unregister_agent(&self, agent: &str) -> TmsResult<SessionExport> {
        let entry = {
            let mut state = self.inner.lock_state("unregister_agent")?;
            let entry = state
                .agents
                .remove(agent)
                .ok_or_else(|| TmsError::agent_not_found(agent))?;
            for op in state.syncs.iter_mut() {
                if op.status == SyncStatus::Pending && op.involves(agent) {
                    op.cancel();
                }
            }
            for collab in state.collaborations.values_mut() {
                collab.participants.remove(agent);
            }
            state.pending_responses.retain(|_, p| p.requester != agent);
            entry
        };
        let snapshot = entry.session.export()?;
        self.archive(&snapshot);

        info!(agent, beliefs = snapshot.len(), "agent unregistered");
        Ok(snapshot)
    }

    #[cfg(feature = "persistent")]
    fn archive(&self, snapshot: &SessionExport) {
        let Some(dir) = &self.inner.config.archive_dir else {
            return;
        };
        match archive::archive_session(dir, snapshot) {
            Ok(path) => info!(agent = %snapshot.owner_agent, path = %path.display(), "session archived"),
            Err(e) => warn!(agent = %snapshot.owner_agent, error = %e, "session archive failed"),
        }
    }

    #[cfg(not(feature = "persistent"))]
    fn archive(&self, _snapshot: &SessionExport) {}

    /// Registration status of an agent.
    pub fn agent_status(&self, agent: &str) -> TmsResult<AgentStatus> {
        Ok(self.inner.lock_state("agent_status")?.agent(agent)?.status())
    }

    /// Counters the hub keeps for an agent.
    pub fn shared_state(&self, agent: &str) -> TmsResult<SharedAgentState> {
        Ok(self.inner.lock_state("shared_state")?.agent(agent)?.shared.clone())
    }

    /// Registered agent ids.
    pub fn agents(&self) -> TmsResult<Vec<String>> {
        Ok(self.inner.lock_state("agents")?.agents.keys().cloned().collect())
    }

    /// Session handle of a registered agent.
    pub fn session(&self, agent: &str) -> TmsResult<SessionHandle> {
        Ok(self.inner.lock_state("session")?.agent(agent)?.session.clone())
    }

    /// Resolves conflicts with `strategy` and applies the accepted outcomes.
    #[instrument(skip(self, conflicts), fields(conflicts = conflicts.len()))]
    pub fn resolve_belief_conflicts(
        &self,
        conflicts: &[Conflict],
        strategy: ResolutionStrategy,
    ) -> TmsResult<Vec<ResolutionRecord>> {
        let records = self.inner.resolve_conflicts(conflicts, strategy)?;
        let resolved = records.iter().filter(|r| r.outcome.is_resolved()).count();
        info!(resolved, unresolved = records.len() - resolved, "conflicts processed");
        Ok(records)
    }

    /// Most recent resolution records, oldest first.
    pub fn resolution_log(&self) -> TmsResult<Vec<ResolutionRecord>> {
        Ok(self.inner.lock_state("resolution_log")?.resolutions.iter().cloned().collect())
    }

    /// Checks every agent and every agent pair.
    #[instrument(skip(self))]
    pub fn check_global_consistency(&self) -> TmsResult<HubConsistencyReport> {
        self.inner.check_global_consistency()
    }

    /// Syncs every stale agent toward all others.
    pub fn run_auto_sync_cycle(&self) -> TmsResult<Vec<SyncOperation>> {
        self.inner.run_auto_sync_cycle()
    }

    /// Starts the background auto-sync ticker. No-op if already running.
    pub fn start_auto_sync(&self) -> TmsResult<()> {
        let mut ticker = self
            .ticker
            .lock()
            .map_err(|_| TmsError::lock_poisoned("hub.ticker"))?;
        if ticker.is_none() {
            let interval = self.inner.config.effective_sync_interval();
            *ticker = Some(AutoSyncTicker::start(interval, &self.inner)?);
            info!(interval_ms = interval.as_millis() as u64, "auto-sync started");
        }
        Ok(())
    }

    /// Stops the background ticker, waiting for a running cycle to finish.
    pub fn stop_auto_sync(&self) -> TmsResult<()> {
        let ticker = self
            .ticker
            .lock()
            .map_err(|_| TmsError::lock_poisoned("hub.ticker"))?
            .take();
        if let Some(mut ticker) = ticker {
            ticker.stop();
            info!("auto-sync stopped");
        }
        Ok(())
    }

    /// True while the ticker runs.
    #[must_use]
    pub fn is_auto_sync_running(&self) -> bool {
        self.ticker.lock().map(|t| t.is_some()).unwrap_or(false)
    }
}

impl Drop for CommunicationHub {
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(mut t) = ticker.take() {
                t.stop();
            }
        }
        self.pool.shutdown();
    }
}

impl std::fmt::Debug for CommunicationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationHub")
            .field("config", &self.inner.config)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}
