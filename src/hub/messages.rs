//! Agent messages and the bounded hub queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::workers::SyncHandle;
use super::HubInner;
use crate::error::{ExecutionError, TmsResult};

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of an agent message. Only `SyncRequest` triggers hub behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A belief changed in the sender's session.
    BeliefUpdate,
    /// Asks the hub to sync the sender's beliefs into the receiver.
    SyncRequest,
    /// A sync into the receiver finished.
    SyncCompleted,
    /// Conflicts were detected involving the receiver.
    ConflictNotification,
    /// The receiver was added to a collaboration.
    CollaborationInvite,
    /// A collaboration participant shared beliefs.
    BeliefShared,
    /// A collaboration the receiver took part in ended.
    CollaborationEnded,
    /// Free-form question.
    Query,
    /// Reply to a `requires_response` message.
    Response,
    /// Free-form notice.
    Notification,
}

/// Message priority; `High` and `Critical` are delivered at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Queued.
    Low,
    /// Queued.
    #[default]
    Normal,
    /// Delivered at enqueue.
    High,
    /// Delivered at enqueue.
    Critical,
}

impl Priority {
    /// True for `High` and `Critical`.
    #[must_use]
    pub const fn is_urgent(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Addressee of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// One registered agent.
    Agent(String),
    /// Every registered agent except the sender.
    Broadcast,
}

impl Recipient {
    /// Addresses a single agent.
    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => f.write_str(id),
            Self::Broadcast => f.write_str("*"),
        }
    }
}

/// A message as stamped and delivered by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Message id.
    pub id: MessageId,
    /// Sending agent.
    pub sender: String,
    /// Addressee.
    pub receiver: Recipient,
    /// Kind of message.
    pub message_type: MessageType,
    /// Opaque JSON body.
    #[serde(default)]
    pub payload: Value,
    /// Delivery priority.
    pub priority: Priority,
    /// The sender is waiting on a [`ResponseHandle`].
    pub requires_response: bool,
    /// Request this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    /// When the hub stamped the message.
    pub created_at: DateTime<Utc>,
    /// Hub-wide send order.
    pub sequence: u64,
}

/// A message before the hub stamps it.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub(crate) sender: String,
    pub(crate) receiver: Recipient,
    pub(crate) message_type: MessageType,
    pub(crate) payload: Value,
    pub(crate) priority: Priority,
    pub(crate) requires_response: bool,
}

impl MessageDraft {
    /// Starts a `Normal` draft with a null payload.
    pub fn new(sender: impl Into<String>, receiver: Recipient, message_type: MessageType) -> Self {
        Self {
            sender: sender.into(),
            receiver,
            message_type,
            payload: Value::Null,
            priority: Priority::Normal,
            requires_response: false,
        }
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the priority; defaults to `Normal`.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Asks the hub to hand back a [`ResponseHandle`].
    #[must_use]
    pub fn requires_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    pub(crate) fn stamp(self, sequence: u64, in_reply_to: Option<MessageId>) -> AgentMessage {
        AgentMessage {
            id: MessageId::new(),
            sender: self.sender,
            receiver: self.receiver,
            message_type: self.message_type,
            payload: self.payload,
            priority: self.priority,
            requires_response: self.requires_response,
            in_reply_to,
            created_at: Utc::now(),
            sequence,
        }
    }
}

/// Bounded FIFO of undelivered messages.
///
/// Messages are pushed in sequence order under the hub lock, so draining in
/// push order keeps every receiver's messages in send order. When full, the
/// oldest half is dropped to make room.
#[derive(Debug)]
pub(crate) struct MessageQueue {
    pending: VecDeque<AgentMessage>,
    capacity: usize,
    dropped: u64,
}

impl MessageQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueues a message; returns the old messages dropped to make room.
    pub(crate) fn push(&mut self, message: AgentMessage) -> Vec<AgentMessage> {
        let mut shed = Vec::new();
        if self.pending.len() >= self.capacity {
            let n = (self.pending.len() / 2).max(1);
            shed.extend(self.pending.drain(..n));
            self.dropped += n as u64;
        }
        self.pending.push_back(message);
        shed
    }

    /// Removes every pending message in send order.
    pub(crate) fn drain(&mut self) -> Vec<AgentMessage> {
        self.pending.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) const fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Waits for the reply to a `requires_response` message.
///
/// Dropping the handle, including after a timed-out wait, withdraws the
/// request from the hub; a later answer is rejected.
#[derive(Debug)]
pub struct ResponseHandle {
    message_id: MessageId,
    timeout: Duration,
    rx: Receiver<AgentMessage>,
    hub: Weak<HubInner>,
}

impl ResponseHandle {
    pub(super) fn new(message_id: MessageId, timeout: Duration, rx: Receiver<AgentMessage>, hub: Weak<HubInner>) -> Self {
        Self {
            message_id,
            timeout,
            rx,
            hub,
        }
    }

    /// The message awaiting a reply.
    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Waits up to the hub's configured response timeout.
    pub fn wait(self) -> TmsResult<AgentMessage> {
        let timeout = self.timeout;
        self.wait_timeout(timeout)
    }

    /// Waits up to `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> TmsResult<AgentMessage> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }
            .into(),
            RecvTimeoutError::Disconnected => ExecutionError::Disconnected {
                path: format!("response:{}", self.message_id),
            }
            .into(),
        })
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.forget_response(self.message_id);
        }
    }
}

/// What `send_message` hands back.
#[derive(Debug)]
pub struct SendReceipt {
    /// Id of the stamped message.
    pub message_id: MessageId,
    /// True when the message was delivered at enqueue time.
    pub delivered: bool,
    /// Present when the draft required a response.
    pub response: Option<ResponseHandle>,
    /// Sync scheduled by an urgent `SyncRequest`.
    pub sync: Option<SyncHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(priority: Priority, sequence: u64) -> AgentMessage {
        MessageDraft::new("a", Recipient::agent("b"), MessageType::Notification)
            .priority(priority)
            .stamp(sequence, None)
    }

    #[test]
    fn test_queue_drops_oldest_half_when_full() {
        let mut q = MessageQueue::new(4);
        for seq in 0..4 {
            assert!(q.push(msg(Priority::Normal, seq)).is_empty());
        }
        let shed: Vec<u64> = q.push(msg(Priority::Normal, 4)).iter().map(|m| m.sequence).collect();
        assert_eq!(shed, vec![0, 1]);
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 2);
        let seqs: Vec<u64> = q.drain().iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_drain_keeps_send_order_across_priorities() {
        let mut q = MessageQueue::new(10);
        q.push(msg(Priority::Low, 0));
        q.push(msg(Priority::Normal, 1));
        q.push(msg(Priority::Low, 2));
        q.push(msg(Priority::Normal, 3));
        let seqs: Vec<u64> = q.drain().iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_response_handle_times_out() {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let handle = ResponseHandle::new(MessageId::new(), Duration::from_millis(10), rx, Weak::new());
        let err = handle.wait().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::High.is_urgent());
        assert!(!Priority::Normal.is_urgent());
    }
}
