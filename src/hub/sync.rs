//! Sync operations: tracked transfers of beliefs between sessions.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::messages::{MessageDraft, MessageType, Priority, Recipient};
use super::{CommunicationHub, HubInner, HubState, SyncHandle, HUB_AGENT};
use crate::conflict::Conflict;
use crate::error::{ExecutionError, TmsError, TmsResult, ValidationError};
use crate::session::{ImportMode, SessionExport, SessionHandle};

/// Unique identifier for a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncOperationId(Uuid);

impl SyncOperationId {
    /// Generates a random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncOperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncOperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which agents a sync writes into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTarget {
    /// One registered agent.
    Agent(String),
    /// Every registered agent except the source.
    All,
}

impl SyncTarget {
    /// Targets a single agent.
    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => f.write_str(id),
            Self::All => f.write_str("all"),
        }
    }
}

/// How much work a sync does after importing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Merge import; cross-agent conflicts are reported, not resolved.
    #[default]
    Incremental,
    /// Merge import, post-merge consistency check, and resolution.
    Full,
}

/// Lifecycle of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Queued for a worker.
    Pending,
    /// Picked up by a worker.
    Running,
    /// Finished with a [`SyncResult::Completed`].
    Completed,
    /// Finished with a [`SyncResult::Failed`].
    Failed,
    /// Cancelled before it started.
    Cancelled,
}

impl SyncStatus {
    /// True once the operation can no longer change.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What a finished sync produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncResult {
    /// Every target was imported.
    Completed {
        /// Beliefs exported by the source.
        items_synced: usize,
        /// Conflicts seen while importing, resolved or not.
        conflicts: Vec<Conflict>,
        /// Conflicts resolved by a full merge.
        resolved: usize,
    },
    /// The source or a target could not be read or written.
    Failed {
        /// Error text.
        reason: String,
    },
}

/// A tracked sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Operation id.
    pub id: SyncOperationId,
    /// Agent whose beliefs are exported.
    pub source_agent: String,
    /// Agents that receive them.
    pub target: SyncTarget,
    /// Incremental or full.
    pub mode: SyncMode,
    /// Current lifecycle state.
    pub status: SyncStatus,
    /// When the operation was scheduled.
    pub created_at: DateTime<Utc>,
    /// When a worker picked it up.
    pub started_at: Option<DateTime<Utc>>,
    /// When it finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Set once finished.
    pub result: Option<SyncResult>,
    /// Conflicts seen across all targets.
    pub conflicts_detected: usize,
}

impl SyncOperation {
    fn new(source_agent: &str, target: SyncTarget, mode: SyncMode) -> Self {
        Self {
            id: SyncOperationId::new(),
            source_agent: source_agent.to_string(),
            target,
            mode,
            status: SyncStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            conflicts_detected: 0,
        }
    }

    /// True if the agent is the source or the explicit target.
    #[must_use]
    pub fn involves(&self, agent: &str) -> bool {
        self.source_agent == agent || self.target == SyncTarget::Agent(agent.to_string())
    }

    /// Items moved, when completed.
    #[must_use]
    pub fn items_synced(&self) -> Option<usize> {
        match &self.result {
            Some(SyncResult::Completed { items_synced, .. }) => Some(*items_synced),
            _ => None,
        }
    }

    /// Failure reason, when failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.result {
            Some(SyncResult::Failed { reason }) => Some(reason),
            _ => None,
        }
    }

    pub(super) fn cancel(&mut self) {
        self.status = SyncStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    fn fail(&mut self, reason: String) {
        self.status = SyncStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.result = Some(SyncResult::Failed { reason });
    }
}

/// Accumulated effect of one sync over its targets.
#[derive(Debug, Default)]
struct SyncTally {
    items: usize,
    conflicts: Vec<Conflict>,
    resolved: usize,
}

impl SyncTally {
    fn add_conflicts(&mut self, conflicts: impl IntoIterator<Item = Conflict>) {
        for c in conflicts {
            if !self.conflicts.iter().any(|existing| existing.id == c.id) {
                self.conflicts.push(c);
            }
        }
    }
}

impl HubState {
    fn sync_mut(&mut self, id: SyncOperationId) -> TmsResult<&mut SyncOperation> {
        self.syncs
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or_else(|| ExecutionError::SyncOperationNotFound { id: id.to_string() }.into())
    }

    /// Keeps at most `cap` operations, evicting the oldest finished ones.
    fn trim_sync_history(&mut self, cap: usize) {
        while self.syncs.len() > cap {
            let Some(pos) = self.syncs.iter().position(|op| op.status.is_finished()) else {
                break;
            };
            self.syncs.remove(pos);
        }
    }
}

impl HubInner {
    /// Records a pending operation after validating its endpoints.
    pub(super) fn create_sync(&self, source: &str, target: SyncTarget, mode: SyncMode) -> TmsResult<SyncOperationId> {
        let mut state = self.lock_state("create_sync")?;
        state.agent(source)?;
        if let SyncTarget::Agent(t) = &target {
            state.agent(t)?;
            if t == source {
                return Err(ValidationError::InvalidField {
                    field: "target".to_string(),
                    reason: "an agent cannot sync into itself".to_string(),
                }
                .into());
            }
        }
        let op = SyncOperation::new(source, target, mode);
        let id = op.id;
        state.syncs.push_back(op);
        state.trim_sync_history(self.config.sync_history_capacity);
        Ok(id)
    }

    /// Runs a pending operation to completion or failure.
    ///
    /// Errors are returned only when the hub itself is unusable; a failing
    /// sync yields an operation in status `failed`.
    pub(super) fn run_sync(&self, id: SyncOperationId) -> TmsResult<SyncOperation> {
        let started = {
            let mut state = self.lock_state("run_sync.start")?;
            let op = state.sync_mut(id)?;
            if op.status != SyncStatus::Pending {
                return Ok(op.clone());
            }
            op.status = SyncStatus::Running;
            op.started_at = Some(Utc::now());
            let (source, target, mode) = (op.source_agent.clone(), op.target.clone(), op.mode);
            match gather_endpoints(&state, &source, &target) {
                Ok((source_handle, targets)) => {
                    for agent in std::iter::once(&source).chain(targets.iter().map(|(t, _)| t)) {
                        if let Some(entry) = state.agents.get_mut(agent) {
                            entry.active_syncs += 1;
                        }
                    }
                    Ok((source, source_handle, targets, mode))
                }
                Err(e) => {
                    let reason = e.to_string();
                    let op = state.sync_mut(id)?;
                    op.fail(reason);
                    Err(op.clone())
                }
            }
        };
        let (source, source_handle, targets, mode) = match started {
            Ok(parts) => parts,
            Err(failed) => {
                warn!(operation = %id, reason = failed.failure_reason().unwrap_or_default(), "sync failed to start");
                return Ok(failed);
            }
        };

        let outcome = self.execute_sync(id, &source, &source_handle, &targets, mode);

        let mut state = self.lock_state("run_sync.finish")?;
        let now = Utc::now();
        let succeeded = outcome.is_ok();
        for agent in std::iter::once(&source).chain(targets.iter().map(|(t, _)| t)) {
            if let Some(entry) = state.agents.get_mut(agent) {
                entry.active_syncs = entry.active_syncs.saturating_sub(1);
                entry.last_sync_failed = !succeeded;
                if succeeded {
                    entry.last_sync = Some(now);
                    entry.shared.syncs_completed += 1;
                } else {
                    entry.shared.syncs_failed += 1;
                }
            }
        }

        let op = state.sync_mut(id)?;
        match outcome {
            Ok(tally) => {
                op.status = SyncStatus::Completed;
                op.finished_at = Some(now);
                op.conflicts_detected = tally.conflicts.len();
                op.result = Some(SyncResult::Completed {
                    items_synced: tally.items,
                    conflicts: tally.conflicts.clone(),
                    resolved: tally.resolved,
                });
                let op = op.clone();
                for (target, _) in &targets {
                    if let Some(entry) = state.agents.get_mut(target) {
                        entry.shared.items_received += tally.items as u64;
                    }
                }
                if !tally.conflicts.is_empty() {
                    notify_conflicts(&mut state, &op, &tally.conflicts);
                }
                info!(
                    operation = %id,
                    source = %source,
                    to = %op.target,
                    mode = ?mode,
                    items = tally.items,
                    conflicts = tally.conflicts.len(),
                    "sync completed"
                );
                Ok(op)
            }
            Err(e) => {
                op.fail(e.to_string());
                warn!(operation = %id, source = %source, error = %e, "sync failed");
                Ok(op.clone())
            }
        }
    }

    fn execute_sync(
        &self,
        id: SyncOperationId,
        source: &str,
        source_handle: &SessionHandle,
        targets: &[(String, SessionHandle)],
        mode: SyncMode,
    ) -> TmsResult<SyncTally> {
        let mut tally = SyncTally::default();
        for (target, target_handle) in targets {
            let lock = self.pair_lock(source, target)?;
            let _guard = lock
                .lock()
                .map_err(|_| TmsError::lock_poisoned(format!("hub.sync_pair({source},{target})")))?;

            let doc = source_handle.export()?;
            match mode {
                SyncMode::Incremental => {
                    let report = target_handle.import(&doc, ImportMode::Merge)?;
                    tally.items += report.items();
                    tally.add_conflicts(report.conflicts);
                    let source_snapshot = source_handle.read()?.clone();
                    let target_snapshot = target_handle.read()?.clone();
                    tally.add_conflicts(self.checker.compare_agents(&source_snapshot, &target_snapshot));
                }
                SyncMode::Full => self.merge_pair(id, &doc, source_handle, target_handle, &mut tally)?,
            }
        }
        Ok(tally)
    }

    /// Import, post-merge consistency check, and resolution when inconsistent.
    fn merge_pair(
        &self,
        id: SyncOperationId,
        doc: &SessionExport,
        source_handle: &SessionHandle,
        target_handle: &SessionHandle,
        tally: &mut SyncTally,
    ) -> TmsResult<()> {
        let report = target_handle.import(doc, ImportMode::Merge)?;
        tally.items += report.items();

        let source_snapshot = source_handle.read()?.clone();
        let target_snapshot = target_handle.read()?.clone();
        let local = self.checker.check_global_consistency(&target_snapshot);

        let mut found = SyncTally::default();
        found.add_conflicts(report.conflicts);
        found.add_conflicts(self.checker.compare_agents(&source_snapshot, &target_snapshot));
        found.add_conflicts(local.conflicts_detected.iter().cloned());
        tally.add_conflicts(found.conflicts.iter().cloned());

        if local.is_consistent && found.conflicts.is_empty() {
            return Ok(());
        }
        let records = self.resolve_conflicts(&found.conflicts, self.config.default_strategy)?;
        let resolved = records.iter().filter(|r| r.outcome.is_resolved()).count();
        tally.resolved += resolved;
        let unresolved = records.len() - resolved;
        if unresolved > 0 && self.config.fail_on_unresolved {
            return Err(ExecutionError::SyncConflict {
                operation: id.to_string(),
                unresolved,
            }
            .into());
        }
        Ok(())
    }

    /// Syncs every stale agent toward all others.
    pub(super) fn run_auto_sync_cycle(&self) -> TmsResult<Vec<SyncOperation>> {
        let stale: Vec<String> = {
            let state = self.lock_state("auto_sync")?;
            if state.agents.len() < 2 {
                return Ok(Vec::new());
            }
            let threshold = chrono::Duration::from_std(self.config.staleness_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
            let cutoff = Utc::now() - threshold;
            state
                .agents
                .iter()
                .filter(|(_, e)| e.active_syncs == 0 && e.last_sync.map_or(true, |t| t < cutoff))
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut ops = Vec::with_capacity(stale.len());
        for agent in stale {
            match self.create_sync(&agent, SyncTarget::All, SyncMode::Incremental) {
                Ok(id) => ops.push(self.run_sync(id)?),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ops)
    }
}

type Endpoints = (SessionHandle, Vec<(String, SessionHandle)>);

fn gather_endpoints(state: &HubState, source: &str, target: &SyncTarget) -> TmsResult<Endpoints> {
    let source_handle = state.agent(source)?.session.clone();
    let targets = match target {
        SyncTarget::Agent(t) => vec![(t.clone(), state.agent(t)?.session.clone())],
        SyncTarget::All => state
            .agents
            .iter()
            .filter(|(id, _)| id.as_str() != source)
            .map(|(id, e)| (id.clone(), e.session.clone()))
            .collect(),
    };
    Ok((source_handle, targets))
}

/// Drops a conflict notification into each involved agent's inbox.
fn notify_conflicts(state: &mut HubState, op: &SyncOperation, conflicts: &[Conflict]) {
    let agents: BTreeSet<String> = conflicts
        .iter()
        .flat_map(|c| c.parties.iter().map(|p| p.agent.clone()))
        .collect();
    for agent in agents {
        let sequence = state.next_sequence();
        let involved: Vec<&Conflict> = conflicts.iter().filter(|c| c.involves_agent(&agent)).collect();
        let message = MessageDraft::new(HUB_AGENT, Recipient::agent(agent.clone()), MessageType::ConflictNotification)
            .priority(Priority::High)
            .payload(json!({ "operation": op.id.to_string(), "conflicts": involved }))
            .stamp(sequence, None);
        if let Some(entry) = state.agents.get_mut(&agent) {
            entry.shared.conflicts_seen += involved.len() as u64;
            entry.inbox.push_back(message);
        }
    }
}

impl CommunicationHub {
    /// Runs a sync on the calling thread and returns the finished operation.
    #[instrument(skip(self))]
    pub fn sync_beliefs(&self, source: &str, target: SyncTarget, mode: SyncMode) -> TmsResult<SyncOperation> {
        let id = self.inner.create_sync(source, target, mode)?;
        self.inner.run_sync(id)
    }

    /// Schedules a sync on the worker pool.
    #[instrument(skip(self))]
    pub fn sync_beliefs_async(&self, source: &str, target: SyncTarget, mode: SyncMode) -> TmsResult<SyncHandle> {
        let id = self.inner.create_sync(source, target, mode)?;
        match self.pool.submit_sync(id) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                let mut state = self.inner.lock_state("sync_beliefs_async")?;
                if let Ok(op) = state.sync_mut(id) {
                    op.fail(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Full merge of `source` into `target`.
    pub fn merge_sessions(&self, source: &str, target: &str) -> TmsResult<SyncOperation> {
        self.sync_beliefs(source, SyncTarget::agent(target), SyncMode::Full)
    }

    /// Cancels a pending operation.
    pub fn cancel_sync(&self, id: SyncOperationId) -> TmsResult<SyncOperation> {
        let mut state = self.inner.lock_state("cancel_sync")?;
        let op = state.sync_mut(id)?;
        if op.status != SyncStatus::Pending {
            return Err(ExecutionError::NotCancellable {
                id: id.to_string(),
                status: op.status.to_string(),
            }
            .into());
        }
        op.cancel();
        info!(operation = %id, "sync cancelled");
        Ok(op.clone())
    }

    /// Looks up a retained sync operation.
    pub fn sync_operation(&self, id: SyncOperationId) -> TmsResult<SyncOperation> {
        Ok(self.inner.lock_state("sync_operation")?.sync_mut(id)?.clone())
    }

    /// Retained operations, oldest first.
    pub fn sync_history(&self) -> TmsResult<Vec<SyncOperation>> {
        Ok(self.inner.lock_state("sync_history")?.syncs.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Map;

    use super::*;
    use crate::collaborator::CollaboratorHandle;
    use crate::conflict::ConflictType;
    use crate::hub::HubConfig;
    use crate::session::{Session, SessionHandle};

    fn hub_with(config: HubConfig) -> CommunicationHub {
        CommunicationHub::new(config, CollaboratorHandle::none()).unwrap()
    }

    fn quiet_hub() -> CommunicationHub {
        hub_with(HubConfig {
            auto_sync: false,
            ..HubConfig::default()
        })
    }

    fn register(hub: &CommunicationHub, id: &str, role: &str) -> SessionHandle {
        let handle = SessionHandle::new(Session::new(id, CollaboratorHandle::none()));
        hub.register_agent(id, role, handle.clone()).unwrap();
        handle
    }

    #[test]
    fn test_zero_item_sync_completes() {
        let hub = quiet_hub();
        register(&hub, "a", "investigator");
        register(&hub, "b", "validator");
        let op = hub.sync_beliefs("a", SyncTarget::agent("b"), SyncMode::Incremental).unwrap();
        assert_eq!(op.status, SyncStatus::Completed);
        assert_eq!(op.items_synced(), Some(0));
        assert!(op.started_at.is_some() && op.finished_at.is_some());
    }

    #[test]
    fn test_unknown_endpoints_rejected() {
        let hub = quiet_hub();
        register(&hub, "a", "investigator");
        assert!(hub
            .sync_beliefs("a", SyncTarget::agent("ghost"), SyncMode::Incremental)
            .unwrap_err()
            .is_not_found());
        assert!(hub
            .sync_beliefs("a", SyncTarget::agent("a"), SyncMode::Incremental)
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_incremental_reports_but_does_not_resolve() {
        let hub = quiet_hub();
        let a = register(&hub, "a", "investigator");
        let b = register(&hub, "b", "validator");
        a.write().unwrap().set_fact("door_locked", true, "a").unwrap();
        b.write().unwrap().set_fact("door_locked", false, "b").unwrap();

        let op = hub.sync_beliefs("a", SyncTarget::agent("b"), SyncMode::Incremental).unwrap();
        assert_eq!(op.status, SyncStatus::Completed);
        assert_eq!(op.conflicts_detected, 1);
        assert_eq!(b.read().unwrap().is_valid("door_locked").unwrap(), Some(false));

        let inbox = hub.receive_messages("b").unwrap();
        assert!(inbox.iter().any(|m| m.message_type == MessageType::ConflictNotification));
    }

    #[test]
    fn test_full_merge_resolves_by_confidence() {
        let hub = quiet_hub();
        let a = register(&hub, "a", "investigator");
        let b = register(&hub, "b", "validator");
        {
            let mut s = a.write().unwrap();
            s.add_belief("door_locked", "a", Map::new(), 0.9).unwrap();
            s.set_fact("door_locked", true, "a").unwrap();
        }
        {
            let mut s = b.write().unwrap();
            s.add_belief("door_locked", "b", Map::new(), 0.4).unwrap();
            s.set_fact("door_locked", false, "b").unwrap();
        }

        let op = hub.merge_sessions("a", "b").unwrap();
        assert_eq!(op.status, SyncStatus::Completed);
        match op.result.unwrap() {
            SyncResult::Completed { conflicts, resolved, .. } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].conflict_type, ConflictType::ValidityConflict);
                assert_eq!(resolved, 1);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(b.read().unwrap().is_valid("door_locked").unwrap(), Some(true));
        assert_eq!(a.read().unwrap().is_valid("door_locked").unwrap(), Some(true));
    }

    #[test]
    fn test_full_merge_fails_on_unresolved_when_configured() {
        let hub = hub_with(HubConfig {
            auto_sync: false,
            fail_on_unresolved: true,
            ..HubConfig::default()
        });
        let a = register(&hub, "a", "investigator");
        let b = register(&hub, "b", "validator");
        a.write().unwrap().set_fact("door_locked", true, "a").unwrap();
        b.write().unwrap().set_fact("door_locked", false, "b").unwrap();

        // Equal default confidences: the strategy refuses to pick.
        let op = hub.merge_sessions("a", "b").unwrap();
        assert_eq!(op.status, SyncStatus::Failed);
        assert!(op.failure_reason().unwrap().contains("unresolved"));
        assert_eq!(hub.agent_status("b").unwrap(), crate::hub::AgentStatus::Failed);
    }

    #[test]
    fn test_sync_to_all() {
        let hub = quiet_hub();
        let a = register(&hub, "a", "investigator");
        let b = register(&hub, "b", "validator");
        let c = register(&hub, "c", "validator");
        a.write().unwrap().set_fact("clue", true, "a").unwrap();

        let op = hub.sync_beliefs("a", SyncTarget::All, SyncMode::Incremental).unwrap();
        assert_eq!(op.status, SyncStatus::Completed);
        for handle in [&b, &c] {
            assert_eq!(handle.read().unwrap().is_valid("clue").unwrap(), Some(true));
        }
        assert_eq!(hub.shared_state("b").unwrap().syncs_completed, 1);
    }

    #[test]
    fn test_cancel_only_pending() {
        let hub = quiet_hub();
        register(&hub, "a", "investigator");
        register(&hub, "b", "validator");

        let pending = hub.inner.create_sync("a", SyncTarget::agent("b"), SyncMode::Incremental).unwrap();
        let cancelled = hub.cancel_sync(pending).unwrap();
        assert_eq!(cancelled.status, SyncStatus::Cancelled);
        // A cancelled operation never runs.
        assert_eq!(hub.inner.run_sync(pending).unwrap().status, SyncStatus::Cancelled);

        let done = hub.sync_beliefs("a", SyncTarget::agent("b"), SyncMode::Incremental).unwrap();
        let err = hub.cancel_sync(done.id).unwrap_err();
        assert!(matches!(
            err,
            TmsError::Execution(ExecutionError::NotCancellable { .. })
        ));
    }

    #[test]
    fn test_history_is_bounded() {
        let hub = hub_with(HubConfig {
            auto_sync: false,
            sync_history_capacity: 3,
            ..HubConfig::default()
        });
        register(&hub, "a", "investigator");
        register(&hub, "b", "validator");
        for _ in 0..5 {
            hub.sync_beliefs("a", SyncTarget::agent("b"), SyncMode::Incremental).unwrap();
        }
        assert_eq!(hub.sync_history().unwrap().len(), 3);
    }

    #[test]
    fn test_auto_sync_cycle_syncs_stale_agents() {
        let hub = quiet_hub();
        let a = register(&hub, "a", "investigator");
        let b = register(&hub, "b", "validator");
        a.write().unwrap().set_fact("x", true, "a").unwrap();
        b.write().unwrap().set_fact("y", true, "b").unwrap();

        let ops = hub.run_auto_sync_cycle().unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.status == SyncStatus::Completed));
        assert_eq!(a.read().unwrap().is_valid("y").unwrap(), Some(true));
        assert_eq!(b.read().unwrap().is_valid("x").unwrap(), Some(true));

        // Fresh syncs are not stale.
        assert!(hub.run_auto_sync_cycle().unwrap().is_empty());
    }

    #[test]
    fn test_async_sync_joins() {
        let hub = quiet_hub();
        let a = register(&hub, "a", "investigator");
        let b = register(&hub, "b", "validator");
        a.write().unwrap().set_fact("x", true, "a").unwrap();
        let handle = hub
            .sync_beliefs_async("a", SyncTarget::agent("b"), SyncMode::Incremental)
            .unwrap();
        let id = handle.operation();
        let op = handle.join_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(op.id, id);
        assert_eq!(hub.sync_operation(id).unwrap().status, SyncStatus::Completed);
        assert_eq!(b.read().unwrap().is_valid("x").unwrap(), Some(true));
    }
}
