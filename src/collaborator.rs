//! External collaborators: text generation and formal-logic proving.
//!
//! Both are consumed through small traits. A process-wide
//! [`CollaboratorHandle`] is created once and passed by reference into the
//! hub and sessions; its contents are initialized lazily, exactly once, behind
//! a `OnceLock`.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CollaboratorError;

/// Produces free text for a prompt (hypotheses, critiques, descriptions).
pub trait TextGenerator: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        "text_generator"
    }

    /// Generates text for a prompt.
    fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Outcome of a formal proof attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofOutcome {
    /// True when the engine found a proof.
    pub provable: bool,
    /// Engine-reported confidence.
    pub confidence: f32,
    /// Proof method named by the engine.
    pub method: String,
}

/// Attempts to prove a belief with an external formal-logic engine.
pub trait FormalProver: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        "formal_prover"
    }

    /// Attempts a proof of the named belief.
    fn prove(&self, belief: &str) -> Result<ProofOutcome, CollaboratorError>;
}

/// The set of collaborators available to this process.
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Recap generator used by collaborations.
    pub generator: Option<Arc<dyn TextGenerator>>,
    /// Formal prover used by sessions.
    pub prover: Option<Arc<dyn FormalProver>>,
}

impl Collaborators {
    /// Adds a recap generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Adds a formal prover.
    #[must_use]
    pub fn with_prover(mut self, prover: Arc<dyn FormalProver>) -> Self {
        self.prover = Some(prover);
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("generator", &self.generator.as_ref().map(|g| g.name().to_string()))
            .field("prover", &self.prover.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

type Initializer = Box<dyn Fn() -> Result<Collaborators, CollaboratorError> + Send + Sync>;

struct HandleInner {
    cell: OnceLock<Collaborators>,
    init: Option<Initializer>,
}

/// Shared, lazily initialized access to the process collaborators.
///
/// Cloning is cheap; every clone observes the same initialization.
#[derive(Clone)]
pub struct CollaboratorHandle {
    inner: Arc<HandleInner>,
}

impl CollaboratorHandle {
    /// A handle with no collaborators at all.
    #[must_use]
    pub fn none() -> Self {
        Self::ready(Collaborators::default())
    }

    /// A handle over already-constructed collaborators.
    #[must_use]
    pub fn ready(collaborators: Collaborators) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(collaborators);
        Self {
            inner: Arc::new(HandleInner { cell, init: None }),
        }
    }

    /// A handle whose collaborators are built on first use.
    ///
    /// If the initializer fails, the handle settles on "no collaborators" and
    /// every dependent operation degrades accordingly.
    pub fn lazy<F>(init: F) -> Self
    where
        F: Fn() -> Result<Collaborators, CollaboratorError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(HandleInner {
                cell: OnceLock::new(),
                init: Some(Box::new(init)),
            }),
        }
    }

    /// Returns the collaborators, running the initializer at most once.
    pub fn get(&self) -> &Collaborators {
        self.inner.cell.get_or_init(|| match &self.inner.init {
            Some(init) => init().unwrap_or_else(|e| {
                warn!(error = %e, "collaborator initialization failed; continuing without collaborators");
                Collaborators::default()
            }),
            None => Collaborators::default(),
        })
    }

    /// True once the collaborators have been initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.cell.get().is_some()
    }

    /// Generates text, failing with `Unavailable` when no generator is configured.
    pub fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let generator = self.get().generator.as_ref().ok_or_else(|| CollaboratorError::Unavailable {
            collaborator: "text_generator".to_string(),
        })?;
        let text = generator.generate(prompt)?;
        if text.trim().is_empty() {
            return Err(CollaboratorError::EmptyOutput {
                collaborator: generator.name().to_string(),
            });
        }
        Ok(text)
    }

    /// Attempts a proof; `None` when no prover is configured.
    pub fn prove(&self, belief: &str) -> Option<Result<ProofOutcome, CollaboratorError>> {
        self.get().prover.as_ref().map(|p| p.prove(belief))
    }
}

impl Default for CollaboratorHandle {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for CollaboratorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaboratorHandle")
            .field("initialized", &self.is_initialized())
            .field("collaborators", &self.inner.cell.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Echo;

    impl TextGenerator for Echo {
        fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
            Ok(format!("echo: {prompt}"))
        }
    }

    struct Blank;

    impl TextGenerator for Blank {
        fn generate(&self, _prompt: &str) -> Result<String, CollaboratorError> {
            Ok("   ".to_string())
        }
    }

    #[test]
    fn test_lazy_init_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = CollaboratorHandle::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Collaborators::default().with_generator(Arc::new(Echo)))
        });
        assert!(!handle.is_initialized());

        let clone = handle.clone();
        assert_eq!(handle.generate("a").unwrap(), "echo: a");
        assert_eq!(clone.generate("b").unwrap(), "echo: b");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_init_degrades() {
        let handle = CollaboratorHandle::lazy(|| {
            Err(CollaboratorError::Failed {
                collaborator: "boot".to_string(),
                message: "no credentials".to_string(),
            })
        });
        assert!(matches!(
            handle.generate("x"),
            Err(CollaboratorError::Unavailable { .. })
        ));
        assert!(handle.prove("x").is_none());
    }

    #[test]
    fn test_empty_output_rejected() {
        let handle = CollaboratorHandle::ready(Collaborators::default().with_generator(Arc::new(Blank)));
        assert!(matches!(
            handle.generate("x"),
            Err(CollaboratorError::EmptyOutput { .. })
        ));
    }
}
