//! Hub-wide consistency reports and status snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::HubConfigSummary;
use super::sync::SyncStatus;
use super::{AgentStatus, CommunicationHub, HubInner};
use crate::conflict::Conflict;
use crate::consistency::{confidence_score, ConsistencyReport};
use crate::error::TmsResult;

/// Follow-up suggested by a hub consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// The agent has not synced within the staleness threshold.
    SyncNeeded {
        agent: String,
        last_sync: Option<DateTime<Utc>>,
    },
    /// Conflicts were found across the hub.
    ResolveConflicts {
        count: usize,
    },
    /// The agent holds beliefs that depend on an absence.
    ReviewNonMonotonic {
        agent: String,
        beliefs: Vec<String>,
    },
    /// `_CONTRADICTION_` is currently derived in the agent's session.
    InvestigateContradiction {
        agent: String,
    },
}

/// Aggregate of per-agent checks and pairwise comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConsistencyReport {
    /// Per-agent reports keyed by agent id.
    pub agents: BTreeMap<String, ConsistencyReport>,
    /// Conflicts found by pairwise comparison.
    pub cross_agent_conflicts: Vec<Conflict>,
    /// Per-agent issues plus cross-agent conflicts.
    pub total_issues: usize,
    /// `max(0, 1 - issues / beliefs)` over all agents.
    pub confidence_score: f32,
    /// True when no issue was found.
    pub is_consistent: bool,
    /// Suggested follow-ups.
    pub recommendations: Vec<Recommendation>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl HubConsistencyReport {
    /// Every conflict found, per-agent ones first.
    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.agents
            .values()
            .flat_map(ConsistencyReport::conflicts)
            .chain(self.cross_agent_conflicts.iter())
    }
}

/// Outcome of the latest hub consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsistencySummary {
    /// True when no issue was found.
    pub is_consistent: bool,
    /// Issues found.
    pub total_issues: usize,
    /// Hub-wide confidence score.
    pub confidence_score: f32,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl From<&HubConsistencyReport> for ConsistencySummary {
    fn from(report: &HubConsistencyReport) -> Self {
        Self {
            is_consistent: report.is_consistent,
            total_issues: report.total_issues,
            confidence_score: report.confidence_score,
            checked_at: report.checked_at,
        }
    }
}

/// One registered agent as seen by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Agent id.
    pub id: String,
    /// Role given at registration.
    pub role: String,
    /// Derived activity status.
    pub status: AgentStatus,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Latest sync the agent took part in.
    pub last_sync: Option<DateTime<Utc>>,
    /// Undrained inbox messages.
    pub inbox_len: usize,
}

/// Retained sync operations by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Queued for a worker.
    pub pending: usize,
    /// Picked up by a worker.
    pub running: usize,
    /// Finished successfully.
    pub completed: usize,
    /// Finished with an error.
    pub failed: usize,
    /// Cancelled before starting.
    pub cancelled: usize,
}

impl SyncCounts {
    fn record(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Pending => self.pending += 1,
            SyncStatus::Running => self.running += 1,
            SyncStatus::Completed => self.completed += 1,
            SyncStatus::Failed => self.failed += 1,
            SyncStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Point-in-time view of the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubStatus {
    /// Registered agents in id order.
    pub connected_agents: Vec<AgentSummary>,
    /// Messages waiting for `process_message_queue`.
    pub queue_depth: usize,
    /// Messages shed because the queue was full.
    pub dropped_messages: u64,
    /// Outcome of the latest hub consistency check.
    pub last_consistency: Option<ConsistencySummary>,
    /// Reported configuration.
    pub config: HubConfigSummary,
    /// Collaborations not yet ended.
    pub active_collaborations: usize,
    /// Retained sync operations by status.
    pub syncs: SyncCounts,
    /// Whether the auto-sync ticker thread is alive.
    pub auto_sync_running: bool,
}

impl HubInner {
    /// Checks every agent and every agent pair on session snapshots.
    ///
    /// Sessions are not modified.
    pub(super) fn check_global_consistency(&self) -> TmsResult<HubConsistencyReport> {
        let (agents, last_syncs) = {
            let state = self.lock_state("check_global_consistency")?;
            let agents: Vec<_> = state
                .agents
                .iter()
                .map(|(id, e)| (id.clone(), e.session.clone()))
                .collect();
            let last_syncs: Vec<_> = state.agents.iter().map(|(id, e)| (id.clone(), e.last_sync)).collect();
            (agents, last_syncs)
        };

        let mut snapshots = Vec::with_capacity(agents.len());
        for (id, handle) in &agents {
            snapshots.push((id.clone(), handle.read()?.clone()));
        }

        let mut reports = BTreeMap::new();
        let mut total_beliefs = 0;
        for (id, session) in &snapshots {
            let report = self.checker.check_global_consistency(session);
            total_beliefs += report.total_beliefs;
            reports.insert(id.clone(), report);
        }

        let mut cross = Vec::new();
        for (i, (_, a)) in snapshots.iter().enumerate() {
            for (_, b) in &snapshots[i + 1..] {
                cross.extend(self.checker.compare_agents(a, b));
            }
        }

        let total_issues = reports.values().map(|r| r.total_issues).sum::<usize>() + cross.len();
        let checked_at = Utc::now();
        let recommendations = self.recommend(&reports, &cross, &last_syncs, checked_at);
        let report = HubConsistencyReport {
            agents: reports,
            cross_agent_conflicts: cross,
            total_issues,
            confidence_score: confidence_score(total_issues, total_beliefs),
            is_consistent: total_issues == 0,
            recommendations,
            checked_at,
        };

        self.lock_state("check_global_consistency.record")?.last_consistency = Some(ConsistencySummary::from(&report));
        if report.is_consistent {
            info!(agents = report.agents.len(), "hub consistent");
        } else {
            warn!(
                agents = report.agents.len(),
                issues = report.total_issues,
                cross_agent = report.cross_agent_conflicts.len(),
                "hub inconsistent"
            );
        }
        Ok(report)
    }

    fn recommend(
        &self,
        reports: &BTreeMap<String, ConsistencyReport>,
        cross: &[Conflict],
        last_syncs: &[(String, Option<DateTime<Utc>>)],
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let mut out = Vec::new();
        if last_syncs.len() >= 2 {
            let threshold = chrono::Duration::from_std(self.config.staleness_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
            for (agent, last_sync) in last_syncs {
                if last_sync.map_or(true, |t| now - t > threshold) {
                    out.push(Recommendation::SyncNeeded {
                        agent: agent.clone(),
                        last_sync: *last_sync,
                    });
                }
            }
        }

        let conflicts = reports.values().map(|r| r.conflicts().count()).sum::<usize>() + cross.len();
        if conflicts > 0 {
            out.push(Recommendation::ResolveConflicts { count: conflicts });
        }
        for (agent, report) in reports {
            if !report.non_monotonic_loops.is_empty() {
                out.push(Recommendation::ReviewNonMonotonic {
                    agent: agent.clone(),
                    beliefs: report.non_monotonic_loops.clone(),
                });
            }
            if report.contradiction_derived {
                out.push(Recommendation::InvestigateContradiction { agent: agent.clone() });
            }
        }
        out
    }
}

impl CommunicationHub {
    /// Snapshot of agents, queue, syncs, and the latest consistency check.
    pub fn status(&self) -> TmsResult<HubStatus> {
        let auto_sync_running = self.is_auto_sync_running();
        let state = self.inner.lock_state("status")?;
        let connected_agents = state
            .agents
            .iter()
            .map(|(id, e)| AgentSummary {
                id: id.clone(),
                role: e.role.clone(),
                status: e.status(),
                registered_at: e.registered_at,
                last_sync: e.last_sync,
                inbox_len: e.inbox.len(),
            })
            .collect();
        let mut syncs = SyncCounts::default();
        for op in &state.syncs {
            syncs.record(op.status);
        }
        Ok(HubStatus {
            connected_agents,
            queue_depth: state.queue.len(),
            dropped_messages: state.queue.dropped(),
            last_consistency: state.last_consistency,
            config: HubConfigSummary::from(&self.inner.config),
            active_collaborations: state.collaborations.len(),
            syncs,
            auto_sync_running,
        })
    }
}
