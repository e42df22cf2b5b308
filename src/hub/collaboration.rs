//! Collaboration sessions: a topic, a set of participants, and the beliefs
//! they share while working on it.

use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::messages::{MessageDraft, MessageType, Priority, Recipient};
use super::{CommunicationHub, HubState};
use crate::conflict::Conflict;
use crate::error::{CollaboratorError, ExecutionError, TmsError, TmsResult, ValidationError};

/// Unique identifier for a collaboration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollaborationId(Uuid);

impl CollaborationId {
    /// Generates a random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CollaborationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollaborationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A belief one participant put in front of the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedBelief {
    /// Sharing agent.
    pub agent: String,
    /// Belief name.
    pub belief: String,
    /// Validity in the sharer's session.
    pub valid: Option<bool>,
    /// Confidence in the sharer's session.
    pub confidence: f32,
    /// When it was shared.
    pub shared_at: DateTime<Utc>,
}

/// Snapshot of an active collaboration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collaboration {
    /// Collaboration id.
    pub id: CollaborationId,
    /// Agent that started it.
    pub initiator: String,
    /// Free-form topic.
    pub topic: String,
    /// Participating agents, initiator included.
    pub participants: BTreeSet<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Beliefs shared so far.
    pub shared: Vec<SharedBelief>,
}

/// Returned by `end_collaboration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationSummary {
    /// Collaboration id.
    pub id: CollaborationId,
    /// Free-form topic.
    pub topic: String,
    /// Agent that started it.
    pub initiator: String,
    /// Participants in id order.
    pub participants: Vec<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub ended_at: DateTime<Utc>,
    /// Everything shared during the collaboration.
    pub shared: Vec<SharedBelief>,
    /// Cross-agent conflicts between participants at the end.
    pub conflicts: Vec<Conflict>,
    /// Generated recap, when a text generator is available.
    pub narrative: Option<String>,
    /// True when a configured generator failed and the recap was skipped.
    pub partial: bool,
}

pub(super) struct CollaborationState {
    pub(super) initiator: String,
    pub(super) topic: String,
    pub(super) participants: BTreeSet<String>,
    pub(super) started_at: DateTime<Utc>,
    pub(super) shared: Vec<SharedBelief>,
}

impl CollaborationState {
    fn snapshot(&self, id: CollaborationId) -> Collaboration {
        Collaboration {
            id,
            initiator: self.initiator.clone(),
            topic: self.topic.clone(),
            participants: self.participants.clone(),
            started_at: self.started_at,
            shared: self.shared.clone(),
        }
    }
}

impl HubState {
    fn collaboration_mut(&mut self, id: CollaborationId) -> TmsResult<&mut CollaborationState> {
        self.collaborations
            .get_mut(&id)
            .ok_or_else(|| ExecutionError::CollaborationNotFound { id: id.to_string() }.into())
    }

    /// Sends a hub-originated message to each receiver. Urgent messages land
    /// in inboxes directly; the rest are queued.
    fn notify_participants<'a>(
        &mut self,
        sender: &str,
        receivers: impl IntoIterator<Item = &'a String>,
        message_type: MessageType,
        priority: Priority,
        payload: &Value,
    ) {
        for receiver in receivers {
            if receiver == sender {
                continue;
            }
            let sequence = self.next_sequence();
            let message = MessageDraft::new(sender, Recipient::agent(receiver.clone()), message_type)
                .priority(priority)
                .payload(payload.clone())
                .stamp(sequence, None);
            if priority.is_urgent() {
                if let Some(entry) = self.agents.get_mut(receiver) {
                    entry.inbox.push_back(message);
                }
            } else {
                self.enqueue(message);
            }
        }
    }
}

impl CommunicationHub {
    /// Opens a collaboration and invites every participant.
    ///
    /// The initiator is always a participant; at least one other registered
    /// agent is required.
    #[instrument(skip(self, participants))]
    pub fn start_collaboration<I, S>(&self, initiator: &str, topic: &str, participants: I) -> TmsResult<CollaborationId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if topic.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "topic".to_string(),
            }
            .into());
        }
        let mut members: BTreeSet<String> = participants.into_iter().map(Into::into).collect();
        members.insert(initiator.to_string());
        if members.len() < 2 {
            return Err(ValidationError::InvalidField {
                field: "participants".to_string(),
                reason: "a collaboration needs at least two agents".to_string(),
            }
            .into());
        }

        let mut state = self.inner.lock_state("start_collaboration")?;
        for member in &members {
            state.agent(member)?;
        }
        let id = CollaborationId::new();
        let payload = json!({
            "collaboration": id.to_string(),
            "topic": topic,
            "initiator": initiator,
            "participants": members,
        });
        state.notify_participants(initiator, &members, MessageType::CollaborationInvite, Priority::High, &payload);
        state.collaborations.insert(
            id,
            CollaborationState {
                initiator: initiator.to_string(),
                topic: topic.to_string(),
                participants: members,
                started_at: Utc::now(),
                shared: Vec::new(),
            },
        );
        info!(collaboration = %id, initiator, topic, "collaboration started");
        Ok(id)
    }

    /// Shares one of `agent`'s beliefs with the other participants.
    #[instrument(skip(self))]
    pub fn share_belief(&self, collaboration: CollaborationId, agent: &str, belief: &str) -> TmsResult<SharedBelief> {
        let handle = {
            let mut state = self.inner.lock_state("share_belief")?;
            let collab = state.collaboration_mut(collaboration)?;
            if !collab.participants.contains(agent) {
                return Err(ValidationError::InvalidField {
                    field: "agent".to_string(),
                    reason: format!("'{agent}' is not a participant of collaboration {collaboration}"),
                }
                .into());
            }
            state.agent(agent)?.session.clone()
        };

        let shared = {
            let session = handle.read()?;
            let eb = session.belief(belief).ok_or_else(|| TmsError::belief_not_found(belief))?;
            SharedBelief {
                agent: agent.to_string(),
                belief: belief.to_string(),
                valid: session.is_valid(belief)?,
                confidence: eb.confidence,
                shared_at: Utc::now(),
            }
        };

        let mut state = self.inner.lock_state("share_belief.record")?;
        let collab = state.collaboration_mut(collaboration)?;
        collab.shared.push(shared.clone());
        let receivers: Vec<String> = collab.participants.iter().cloned().collect();
        let payload = json!({
            "collaboration": collaboration.to_string(),
            "belief": shared,
        });
        state.notify_participants(agent, &receivers, MessageType::BeliefShared, Priority::Normal, &payload);
        state.agent_mut(agent)?.shared.beliefs_shared += 1;
        info!(collaboration = %collaboration, agent, belief, "belief shared");
        Ok(shared)
    }

    /// Closes a collaboration and compares every pair of participants.
    #[instrument(skip(self))]
    pub fn end_collaboration(&self, collaboration: CollaborationId) -> TmsResult<CollaborationSummary> {
        let (collab, handles) = {
            let mut state = self.inner.lock_state("end_collaboration")?;
            let collab = state
                .collaborations
                .remove(&collaboration)
                .ok_or_else(|| ExecutionError::CollaborationNotFound {
                    id: collaboration.to_string(),
                })?;
            let handles: Vec<_> = collab
                .participants
                .iter()
                .filter_map(|p| state.agents.get(p).map(|e| e.session.clone()))
                .collect();
            (collab, handles)
        };

        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in &handles {
            snapshots.push(handle.read()?.clone());
        }
        let mut conflicts = Vec::new();
        for (i, a) in snapshots.iter().enumerate() {
            for b in &snapshots[i + 1..] {
                conflicts.extend(self.inner.checker.compare_agents(a, b));
            }
        }

        let (narrative, partial) = match self.collaborators().generate(&recap_prompt(&collab, &conflicts)) {
            Ok(text) => (Some(text), false),
            Err(CollaboratorError::Unavailable { .. }) => (None, false),
            Err(e) => {
                warn!(collaboration = %collaboration, error = %e, "collaboration recap skipped");
                (None, true)
            }
        };

        let summary = CollaborationSummary {
            id: collaboration,
            topic: collab.topic,
            initiator: collab.initiator,
            participants: collab.participants.into_iter().collect(),
            started_at: collab.started_at,
            ended_at: Utc::now(),
            shared: collab.shared,
            conflicts,
            narrative,
            partial,
        };

        let mut state = self.inner.lock_state("end_collaboration.notify")?;
        let payload = json!({
            "collaboration": collaboration.to_string(),
            "shared": summary.shared.len(),
            "conflicts": summary.conflicts.len(),
        });
        state.notify_participants(
            super::HUB_AGENT,
            &summary.participants,
            MessageType::CollaborationEnded,
            Priority::High,
            &payload,
        );
        info!(
            collaboration = %collaboration,
            shared = summary.shared.len(),
            conflicts = summary.conflicts.len(),
            partial,
            "collaboration ended"
        );
        Ok(summary)
    }

    /// Snapshot of an active collaboration.
    pub fn collaboration(&self, id: CollaborationId) -> TmsResult<Collaboration> {
        let mut state = self.inner.lock_state("collaboration")?;
        Ok(state.collaboration_mut(id)?.snapshot(id))
    }

    /// Active collaborations.
    pub fn collaborations(&self) -> TmsResult<Vec<Collaboration>> {
        let state = self.inner.lock_state("collaborations")?;
        Ok(state.collaborations.iter().map(|(id, c)| c.snapshot(*id)).collect())
    }
}

fn recap_prompt(collab: &CollaborationState, conflicts: &[Conflict]) -> String {
    let mut prompt = format!(
        "Summarize the collaboration on '{}' between {}.\n",
        collab.topic,
        collab.participants.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    for s in &collab.shared {
        let _ = writeln!(prompt, "- {} shared {} (valid: {:?}, confidence {:.2})", s.agent, s.belief, s.valid, s.confidence);
    }
    if !conflicts.is_empty() {
        let _ = writeln!(prompt, "Open conflicts: {}", conflicts.len());
        for c in conflicts {
            let _ = writeln!(prompt, "- {c}");
        }
    }
    prompt
}
