use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Map;

use kyrotms::session::HistoryAction;
use kyrotms::{
    CollaboratorError, CollaboratorHandle, Collaborators, CommunicationHub, FormalProver, HubConfig, ProofOutcome,
    Session, SessionConfig, SessionHandle, TextGenerator, TmsError,
};

struct Scribe {
    calls: AtomicUsize,
}

impl TextGenerator for Scribe {
    fn name(&self) -> &str {
        "scribe"
    }

    fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("perhaps: {prompt}"))
    }
}

struct Mute;

impl TextGenerator for Mute {
    fn generate(&self, _prompt: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Failed {
            collaborator: "mute".to_string(),
            message: "connection refused".to_string(),
        })
    }
}

struct Oracle;

impl FormalProver for Oracle {
    fn prove(&self, belief: &str) -> Result<ProofOutcome, CollaboratorError> {
        Ok(ProofOutcome {
            provable: belief != "rumour",
            confidence: 0.8,
            method: "resolution".to_string(),
        })
    }
}

struct BrokenProver;

impl FormalProver for BrokenProver {
    fn prove(&self, _belief: &str) -> Result<ProofOutcome, CollaboratorError> {
        Err(CollaboratorError::Failed {
            collaborator: "prover".to_string(),
            message: "timeout".to_string(),
        })
    }
}

fn scribe() -> Arc<Scribe> {
    Arc::new(Scribe {
        calls: AtomicUsize::new(0),
    })
}

#[test]
fn hypothesis_becomes_a_belief() {
    let handle = CollaboratorHandle::ready(Collaborators::default().with_generator(scribe()));
    let mut session = Session::new("sherlock", handle);

    let text = session
        .hypothesize("gardener_lied", "why are the boots clean?", "sherlock", 0.4)
        .unwrap();
    assert_eq!(text, "perhaps: why are the boots clean?");

    let belief = session.belief("gardener_lied").unwrap();
    assert_eq!(belief.agent_source, "sherlock");
    assert_eq!(belief.context["type"], "hypothesis");
    assert_eq!(belief.context["description"], text.as_str());
    assert_eq!(belief.history.last().unwrap().action, HistoryAction::Hypothesized);
    // Hypotheses are unsupported until someone asserts or justifies them.
    assert_eq!(session.is_valid("gardener_lied").unwrap(), None);
}

#[test]
fn failed_hypothesis_adds_nothing() {
    let handle = CollaboratorHandle::ready(Collaborators::default().with_generator(Arc::new(Mute)));
    let mut session = Session::new("sherlock", handle);
    let version = session.version();

    let err = session
        .hypothesize("gardener_lied", "why?", "sherlock", 0.4)
        .unwrap_err();
    assert!(matches!(err, TmsError::Collaborator(CollaboratorError::Failed { .. })));
    assert!(session.belief("gardener_lied").is_none());
    assert!(session.is_valid("gardener_lied").is_err());
    assert_eq!(session.version(), version);

    let mut bare = Session::new("watson", CollaboratorHandle::none());
    assert!(matches!(
        bare.hypothesize("x", "why?", "watson", 0.5).unwrap_err(),
        TmsError::Collaborator(CollaboratorError::Unavailable { .. })
    ));
}

#[test]
fn explanation_includes_the_formal_verdict() {
    let handle = CollaboratorHandle::ready(Collaborators::default().with_prover(Arc::new(Oracle)));
    let mut session = Session::new("sherlock", handle);
    session.set_fact("mud_on_boots", true, "sherlock").unwrap();
    session
        .add_justification(["mud_on_boots"], Vec::<&str>::new(), "walked_garden", "sherlock")
        .unwrap();

    let text = session.explain_belief("walked_garden").unwrap();
    assert!(text.contains("walked_garden"));
    assert!(text.contains("mud_on_boots"));
    assert!(text.contains("provable=true"));
    assert!(text.contains("method=resolution"));
}

#[test]
fn explanation_degrades_without_a_working_prover() {
    let mut plain = Session::new("sherlock", CollaboratorHandle::none());
    plain.set_fact("mud_on_boots", true, "sherlock").unwrap();
    let text = plain.explain_belief("mud_on_boots").unwrap();
    assert!(text.contains("direct justification only"));
    assert!(text.contains("unavailable"));

    let broken = CollaboratorHandle::ready(Collaborators::default().with_prover(Arc::new(BrokenProver)));
    let mut session = Session::new("sherlock", broken);
    session.set_fact("mud_on_boots", true, "sherlock").unwrap();
    let text = session.explain_belief("mud_on_boots").unwrap();
    assert!(text.contains("failed"));
    assert!(text.contains("timeout"));

    assert!(session.explain_belief("unknown").unwrap_err().is_not_found());
}

#[test]
fn lazy_collaborators_are_shared_by_hub_and_sessions() {
    let inits = Arc::new(AtomicUsize::new(0));
    let generator = scribe();
    let counter = Arc::clone(&inits);
    let shared = Arc::clone(&generator);
    let handle = CollaboratorHandle::lazy(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Collaborators::default().with_generator(Arc::clone(&shared) as Arc<dyn TextGenerator>))
    });

    let hub = CommunicationHub::new(
        HubConfig {
            auto_sync: false,
            ..HubConfig::default()
        },
        handle,
    )
    .unwrap();
    assert!(!hub.collaborators().is_initialized());

    let sherlock = SessionHandle::new(hub.new_session("sherlock", SessionConfig::default()));
    let watson = SessionHandle::new(hub.new_session("watson", SessionConfig::default()));
    hub.register_agent("sherlock", "investigator", sherlock.clone()).unwrap();
    hub.register_agent("watson", "validator", watson.clone()).unwrap();

    sherlock
        .write()
        .unwrap()
        .hypothesize("footman", "who opened the window?", "sherlock", 0.3)
        .unwrap();
    watson
        .write()
        .unwrap()
        .hypothesize("draught", "why is the candle out?", "watson", 0.3)
        .unwrap();
    {
        let mut s = sherlock.write().unwrap();
        s.add_belief("window_open", "sherlock", Map::new(), 0.9).unwrap();
        s.set_fact("window_open", true, "sherlock").unwrap();
    }

    let collab = hub
        .start_collaboration("sherlock", "the open window", ["watson"])
        .unwrap();
    hub.share_belief(collab, "sherlock", "window_open").unwrap();
    let summary = hub.end_collaboration(collab).unwrap();

    assert_eq!(summary.shared.len(), 1);
    assert!(!summary.partial);
    assert!(summary.narrative.unwrap().starts_with("perhaps:"));
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn failing_recap_marks_collaboration_partial() {
    let hub = CommunicationHub::new(
        HubConfig {
            auto_sync: false,
            ..HubConfig::default()
        },
        CollaboratorHandle::ready(Collaborators::default().with_generator(Arc::new(Mute))),
    )
    .unwrap();
    for (id, role) in [("sherlock", "investigator"), ("watson", "validator")] {
        let session = SessionHandle::new(hub.new_session(id, SessionConfig::default()));
        hub.register_agent(id, role, session).unwrap();
    }

    let collab = hub.start_collaboration("sherlock", "the ledger", ["watson"]).unwrap();
    let summary = hub.end_collaboration(collab).unwrap();
    assert!(summary.partial);
    assert!(summary.narrative.is_none());
    assert!(hub.collaboration(collab).unwrap_err().is_not_found());
}
