//! Message routing between registered agents.

use std::sync::Arc;

use crossbeam_channel::bounded;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::messages::{AgentMessage, MessageDraft, MessageId, MessageType, Recipient, ResponseHandle, SendReceipt};
use super::sync::{SyncMode, SyncTarget};
use super::{CommunicationHub, HubInner, HubState, PendingResponse, SyncHandle};
use crate::error::{ExecutionError, TmsResult};

/// Result of draining the message queue.
#[derive(Debug, Default)]
pub struct ProcessReport {
    /// Messages placed into inboxes (a broadcast counts once per receiver).
    pub delivered: usize,
    /// Syncs scheduled by `SyncRequest` messages.
    pub syncs: Vec<SyncHandle>,
}

/// A sync asked for by a delivered `SyncRequest`.
struct RequestedSync {
    source: String,
    target: SyncTarget,
    mode: SyncMode,
}

impl HubState {
    /// Places a message into its receivers' inboxes.
    ///
    /// Returns the number of inboxes reached and, for `SyncRequest`, the sync
    /// to schedule once the state lock is released.
    fn deliver(&mut self, message: AgentMessage) -> (usize, Option<RequestedSync>) {
        let request = (message.message_type == MessageType::SyncRequest).then(|| RequestedSync {
            source: message.sender.clone(),
            target: match &message.receiver {
                Recipient::Agent(id) => SyncTarget::Agent(id.clone()),
                Recipient::Broadcast => SyncTarget::All,
            },
            mode: requested_mode(&message.payload),
        });

        let receiver = message.receiver.clone();
        let delivered = match &receiver {
            Recipient::Agent(id) => match self.agents.get_mut(id) {
                Some(entry) => {
                    entry.inbox.push_back(message);
                    1
                }
                None => {
                    warn!(message = %message.id, receiver = %id, "receiver no longer registered; message dropped");
                    return (0, None);
                }
            },
            Recipient::Broadcast => {
                let mut n = 0;
                for (id, entry) in &mut self.agents {
                    if *id != message.sender {
                        entry.inbox.push_back(message.clone());
                        n += 1;
                    }
                }
                n
            }
        };
        (delivered, request)
    }

    /// Queues a non-urgent message, withdrawing any request shed to make room.
    pub(super) fn enqueue(&mut self, message: AgentMessage) {
        let shed = self.queue.push(message);
        if shed.is_empty() {
            return;
        }
        for dropped in &shed {
            if dropped.requires_response {
                self.pending_responses.remove(&dropped.id);
            }
        }
        warn!(dropped = shed.len(), capacity = self.queue.capacity(), "message queue full; dropped oldest messages");
    }
}

impl HubInner {
    /// Withdraws an unanswered request.
    pub(super) fn forget_response(&self, message: MessageId) {
        if let Ok(mut state) = self.lock_state("forget_response") {
            state.pending_responses.remove(&message);
        }
    }
}

/// `payload.mode`, defaulting to incremental.
fn requested_mode(payload: &Value) -> SyncMode {
    payload
        .get("mode")
        .and_then(|m| serde_json::from_value(m.clone()).ok())
        .unwrap_or_default()
}

impl CommunicationHub {
    /// Sends a message from one registered agent to another, or to all.
    ///
    /// `High` and `Critical` messages are delivered immediately; the rest wait
    /// for [`process_message_queue`](Self::process_message_queue), which
    /// delivers them in send order.
    #[instrument(skip(self, draft), fields(sender = %draft.sender, receiver = %draft.receiver, kind = ?draft.message_type))]
    pub fn send_message(&self, draft: MessageDraft) -> TmsResult<SendReceipt> {
        let (receipt, request) = {
            let mut state = self.inner.lock_state("send_message")?;
            state.agent(&draft.sender)?;
            if let Recipient::Agent(id) = &draft.receiver {
                state.agent(id)?;
            }
            let sequence = state.next_sequence();
            let message = draft.stamp(sequence, None);
            let message_id = message.id;

            let response = if message.requires_response {
                let (tx, rx) = bounded(1);
                state.pending_responses.insert(
                    message_id,
                    PendingResponse {
                        requester: message.sender.clone(),
                        tx,
                    },
                );
                Some(ResponseHandle::new(
                    message_id,
                    self.inner.config.response_timeout,
                    rx,
                    Arc::downgrade(&self.inner),
                ))
            } else {
                None
            };

            let (delivered, request) = if message.priority.is_urgent() {
                let (n, request) = state.deliver(message);
                (n > 0, request)
            } else {
                state.enqueue(message);
                (false, None)
            };
            (
                SendReceipt {
                    message_id,
                    delivered,
                    response,
                    sync: None,
                },
                request,
            )
        };

        let mut receipt = receipt;
        if let Some(request) = request {
            receipt.sync = self.schedule_requested_sync(request);
        }
        debug!(message = %receipt.message_id, delivered = receipt.delivered, "message sent");
        Ok(receipt)
    }

    /// Delivers every queued message in send order.
    #[instrument(skip(self))]
    pub fn process_message_queue(&self) -> TmsResult<ProcessReport> {
        let mut report = ProcessReport::default();
        let requests = {
            let mut state = self.inner.lock_state("process_message_queue")?;
            let pending = state.queue.drain();
            let mut requests = Vec::new();
            for message in pending {
                let (n, request) = state.deliver(message);
                report.delivered += n;
                requests.extend(request);
            }
            requests
        };
        for request in requests {
            report.syncs.extend(self.schedule_requested_sync(request));
        }
        if report.delivered > 0 {
            debug!(delivered = report.delivered, syncs = report.syncs.len(), "message queue processed");
        }
        Ok(report)
    }

    /// Answers a `requires_response` message.
    ///
    /// The reply goes to the waiting [`ResponseHandle`]. A request whose
    /// handle was dropped or timed out is gone and yields `MessageNotFound`;
    /// a reply racing a dropping handle lands in the requester's inbox.
    #[instrument(skip(self, payload))]
    pub fn respond(&self, responder: &str, message: MessageId, payload: Value) -> TmsResult<MessageId> {
        let mut state = self.inner.lock_state("respond")?;
        state.agent(responder)?;
        let pending = state
            .pending_responses
            .remove(&message)
            .ok_or_else(|| ExecutionError::MessageNotFound { id: message.to_string() })?;
        let sequence = state.next_sequence();
        let reply = MessageDraft::new(responder, Recipient::agent(pending.requester.clone()), MessageType::Response)
            .payload(payload)
            .stamp(sequence, Some(message));
        let reply_id = reply.id;
        if let Err(unsent) = pending.tx.send(reply) {
            if let Some(entry) = state.agents.get_mut(&pending.requester) {
                entry.inbox.push_back(unsent.into_inner());
            }
        }
        Ok(reply_id)
    }

    /// Removes and returns everything in an agent's inbox, in delivery order.
    pub fn receive_messages(&self, agent: &str) -> TmsResult<Vec<AgentMessage>> {
        let mut state = self.inner.lock_state("receive_messages")?;
        Ok(state.agent_mut(agent)?.inbox.drain(..).collect())
    }

    fn schedule_requested_sync(&self, request: RequestedSync) -> Option<SyncHandle> {
        match self.sync_beliefs_async(&request.source, request.target.clone(), request.mode) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(source = %request.source, to = %request.target, error = %e, "requested sync not scheduled");
                None
            }
        }
    }
}
