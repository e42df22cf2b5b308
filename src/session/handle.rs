//! Shared handle to an agent-owned session.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use super::{ImportMode, ImportReport, Session, SessionExport};
use crate::error::{TmsError, TmsResult};
use crate::graph::PropagationWave;

/// A cloneable handle to a [`Session`].
///
/// The owning agent mutates through [`SessionHandle::write`]. The hub only
/// uses the narrow write-back surface: `import`, `set_validity` and
/// `apply_resolution`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    owner: Arc<str>,
    inner: Arc<RwLock<Session>>,
}

impl SessionHandle {
    /// Wraps a session for shared use.
    pub fn new(session: Session) -> Self {
        Self {
            owner: Arc::from(session.owner()),
            inner: Arc::new(RwLock::new(session)),
        }
    }

    /// Agent that owns the session.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Shared read lock.
    pub fn read(&self) -> TmsResult<RwLockReadGuard<'_, Session>> {
        self.inner
            .read()
            .map_err(|_| TmsError::lock_poisoned(format!("session.read({})", self.owner)))
    }

    /// Exclusive write lock.
    pub fn write(&self) -> TmsResult<RwLockWriteGuard<'_, Session>> {
        self.inner
            .write()
            .map_err(|_| TmsError::lock_poisoned(format!("session.write({})", self.owner)))
    }

    /// Value snapshot of the session.
    pub fn export(&self) -> TmsResult<SessionExport> {
        Ok(self.read()?.export())
    }

    /// Imports a document under the write lock.
    pub fn import(&self, doc: &SessionExport, mode: ImportMode) -> TmsResult<ImportReport> {
        self.write()?.import(doc, mode)
    }

    /// Forces validity under the write lock.
    pub fn set_validity(&self, name: &str, valid: Option<bool>, agent: &str) -> TmsResult<PropagationWave> {
        self.write()?.set_validity(name, valid, agent)
    }

    /// Applies a resolution under the write lock.
    pub fn apply_resolution(&self, name: &str, valid: bool, agent: &str, details: Value) -> TmsResult<PropagationWave> {
        self.write()?.apply_resolution(name, valid, agent, details)
    }

    /// True if both handles refer to the same session.
    #[must_use]
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<Session> for SessionHandle {
    fn from(session: Session) -> Self {
        Self::new(session)
    }
}
