//! # KyroTMS - Truth Maintenance for Cooperating Agents
//!
//! KyroTMS keeps each agent's beliefs consistent with the justifications that
//! support them, and keeps a group of agents consistent with each other.
//!
//! ## Core Concepts
//!
//! - **BeliefGraph**: a justification-based truth maintenance network. Validity
//!   is recomputed incrementally whenever a premise changes or a justification
//!   is added.
//! - **Session**: one agent's belief store, with provenance, checkpoints, and
//!   export/import.
//! - **ConsistencyChecker**: finds contradictions inside a session and between
//!   two sessions.
//! - **ConflictResolver**: picks a winner for a conflict under a strategy.
//! - **CommunicationHub**: registers agents, routes messages, runs syncs, and
//!   coordinates collaborations.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kyrotms::{CollaboratorHandle, CommunicationHub, HubConfig, SessionHandle, SyncMode, SyncTarget};
//!
//! let hub = CommunicationHub::new(HubConfig::default(), CollaboratorHandle::none())?;
//!
//! let sherlock = SessionHandle::new(hub.new_session("sherlock", Default::default()));
//! sherlock.write()?.set_fact("weapon_found", true, "sherlock")?;
//! hub.register_agent("sherlock", "investigator", sherlock.clone())?;
//!
//! let watson = SessionHandle::new(hub.new_session("watson", Default::default()));
//! hub.register_agent("watson", "validator", watson.clone())?;
//!
//! hub.sync_beliefs("sherlock", SyncTarget::agent("watson"), SyncMode::Incremental)?;
//! assert_eq!(watson.read()?.is_valid("weapon_found")?, Some(true));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod collaborator;
pub mod conflict;
pub mod consistency;
pub mod error;
pub mod graph;
pub mod hub;
pub mod resolver;
pub mod session;

pub use collaborator::{CollaboratorHandle, Collaborators, FormalProver, ProofOutcome, TextGenerator};
pub use conflict::{Conflict, ConflictId, ConflictParty, ConflictType};
pub use consistency::{ConsistencyChecker, ConsistencyChecking, ConsistencyReport};
pub use error::{CollaboratorError, ExecutionError, TmsError, TmsResult, ValidationError};
pub use graph::{BeliefGraph, BeliefNode, Explanation, Justification, PropagationWave};
pub use hub::{
    AgentMessage, AgentStatus, CollaborationId, CollaborationSummary, CommunicationHub, HubConfig, HubStatus,
    MessageDraft, MessageType, Priority, Recipient, SyncHandle, SyncMode, SyncOperation, SyncStatus, SyncTarget,
};
pub use resolver::{
    BeliefLookup, ConflictResolver, ConflictResolving, EvidenceTable, ResolutionOutcome, ResolutionStrategy,
};
pub use session::{
    ImportMode, ImportReport, Session, SessionConfig, SessionExport, SessionHandle, SessionId, CONTRADICTION,
};
