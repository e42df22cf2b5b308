use std::thread;
use std::time::Duration;

use serde_json::Map;

use kyrotms::hub::SyncResult;
use kyrotms::{
    CollaboratorHandle, CommunicationHub, HubConfig, Session, SessionHandle, SyncMode, SyncStatus, SyncTarget,
};

fn hub_with(config: HubConfig) -> CommunicationHub {
    CommunicationHub::new(config, CollaboratorHandle::none()).unwrap()
}

fn quiet() -> HubConfig {
    HubConfig {
        auto_sync: false,
        ..HubConfig::default()
    }
}

fn join(hub: &CommunicationHub, id: &str, role: &str) -> SessionHandle {
    let handle = SessionHandle::new(Session::new(id, CollaboratorHandle::none()));
    hub.register_agent(id, role, handle.clone()).unwrap();
    handle
}

fn seed_case(session: &SessionHandle, agent: &str) {
    let mut s = session.write().unwrap();
    s.set_fact("footprints", true, agent).unwrap();
    s.set_fact("alibi", false, agent).unwrap();
    s.add_justification(["footprints"], ["alibi"], "suspect", agent).unwrap();
    s.add_justification(["suspect", "motive"], Vec::<&str>::new(), "guilty", agent)
        .unwrap();
}

#[test]
fn repeated_sync_is_idempotent() {
    let hub = hub_with(quiet());
    let sherlock = join(&hub, "sherlock", "investigator");
    let watson = join(&hub, "watson", "validator");
    seed_case(&sherlock, "sherlock");

    let first = hub
        .sync_beliefs("sherlock", SyncTarget::agent("watson"), SyncMode::Incremental)
        .unwrap();
    assert!(first.items_synced().unwrap() > 0);
    let digest = watson.export().unwrap().digest().unwrap();
    let version = watson.read().unwrap().version();

    let second = hub
        .sync_beliefs("sherlock", SyncTarget::agent("watson"), SyncMode::Incremental)
        .unwrap();
    assert_eq!(second.status, SyncStatus::Completed);
    assert_eq!(second.items_synced(), Some(0));
    assert_eq!(watson.export().unwrap().digest().unwrap(), digest);
    assert_eq!(watson.read().unwrap().version(), version);

    let w = watson.read().unwrap();
    assert_eq!(w.is_valid("suspect").unwrap(), Some(true));
    assert_eq!(w.is_valid("guilty").unwrap(), Some(false));
    assert_eq!(w.belief("suspect").unwrap().agent_source, "sherlock");
}

#[test]
fn imported_rules_keep_propagating_in_the_target() {
    let hub = hub_with(quiet());
    let sherlock = join(&hub, "sherlock", "investigator");
    let watson = join(&hub, "watson", "validator");
    seed_case(&sherlock, "sherlock");
    hub.sync_beliefs("sherlock", SyncTarget::agent("watson"), SyncMode::Incremental)
        .unwrap();

    // Watson learns the alibi holds; the imported rule retracts the suspect.
    let mut w = watson.write().unwrap();
    w.set_fact("alibi", true, "watson").unwrap();
    assert_eq!(w.is_valid("suspect").unwrap(), Some(false));
    drop(w);
    assert_eq!(sherlock.read().unwrap().is_valid("suspect").unwrap(), Some(true));
}

#[test]
fn concurrent_syncs_between_one_pair_all_complete() {
    let hub = hub_with(HubConfig {
        auto_sync: false,
        sync_workers: 4,
        ..HubConfig::default()
    });
    let sherlock = join(&hub, "sherlock", "investigator");
    let watson = join(&hub, "watson", "validator");
    seed_case(&sherlock, "sherlock");

    let ops: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    hub.sync_beliefs("sherlock", SyncTarget::agent("watson"), SyncMode::Incremental)
                        .unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(ops.iter().all(|op| op.status == SyncStatus::Completed));
    // Serialized per pair: exactly one of them moved the beliefs.
    let movers = ops.iter().filter(|op| op.items_synced().unwrap_or(0) > 0).count();
    assert_eq!(movers, 1);
    assert_eq!(watson.read().unwrap().is_valid("suspect").unwrap(), Some(true));
}

#[test]
fn async_syncs_from_many_sources() {
    let hub = hub_with(quiet());
    let target = join(&hub, "watson", "validator");
    let mut handles = Vec::new();
    for i in 0..5 {
        let id = format!("agent{i}");
        let source = join(&hub, &id, "investigator");
        source.write().unwrap().set_fact(&format!("clue{i}"), true, &id).unwrap();
        handles.push(
            hub.sync_beliefs_async(&id, SyncTarget::agent("watson"), SyncMode::Incremental)
                .unwrap(),
        );
    }
    for handle in handles {
        let op = handle.join_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(op.status, SyncStatus::Completed);
    }
    let t = target.read().unwrap();
    for i in 0..5 {
        assert_eq!(t.is_valid(&format!("clue{i}")).unwrap(), Some(true));
    }
    drop(t);
    assert_eq!(hub.shared_state("watson").unwrap().syncs_completed, 5);
}

#[test]
fn full_merge_resolves_in_favor_of_the_source() {
    let hub = hub_with(quiet());
    let sherlock = join(&hub, "sherlock", "investigator");
    let watson = join(&hub, "watson", "validator");
    {
        let mut s = sherlock.write().unwrap();
        s.add_belief("butler_guilty", "sherlock", Map::new(), 0.95).unwrap();
        s.set_fact("butler_guilty", true, "sherlock").unwrap();
    }
    {
        let mut w = watson.write().unwrap();
        w.add_belief("butler_guilty", "watson", Map::new(), 0.3).unwrap();
        w.set_fact("butler_guilty", false, "watson").unwrap();
        w.set_fact("limp", true, "watson").unwrap();
    }

    let op = hub.merge_sessions("sherlock", "watson").unwrap();
    assert_eq!(op.status, SyncStatus::Completed);
    let Some(SyncResult::Completed { conflicts, resolved, .. }) = op.result else {
        panic!("expected completed result");
    };
    assert_eq!(conflicts.len(), 1);
    assert_eq!(resolved, 1);
    assert_eq!(watson.read().unwrap().is_valid("butler_guilty").unwrap(), Some(true));
    assert_eq!(watson.read().unwrap().is_valid("limp").unwrap(), Some(true));
    // Full merge is one-way.
    assert!(sherlock.read().unwrap().belief("limp").is_none());

    assert!(hub.check_global_consistency().unwrap().cross_agent_conflicts.is_empty());
}

#[test]
fn full_merge_resolves_local_contradiction_after_import() {
    let hub = hub_with(quiet());
    let sherlock = join(&hub, "sherlock", "investigator");
    let watson = join(&hub, "watson", "validator");
    {
        let mut s = sherlock.write().unwrap();
        s.add_belief("rain", "sherlock", Map::new(), 0.9).unwrap();
        s.set_fact("rain", true, "sherlock").unwrap();
    }
    {
        let mut w = watson.write().unwrap();
        w.add_belief("not_rain", "watson", Map::new(), 0.2).unwrap();
        w.set_fact("not_rain", true, "watson").unwrap();
    }

    let op = hub.merge_sessions("sherlock", "watson").unwrap();
    assert_eq!(op.status, SyncStatus::Completed);
    let w = watson.read().unwrap();
    assert_eq!(w.is_valid("rain").unwrap(), Some(true));
    assert_eq!(w.is_valid("not_rain").unwrap(), Some(false));
}

#[test]
fn syncs_toward_unregistered_agents_are_rejected() {
    let hub = hub_with(quiet());
    join(&hub, "sherlock", "investigator");
    join(&hub, "watson", "validator");
    hub.unregister_agent("watson").unwrap();
    assert!(hub
        .sync_beliefs("sherlock", SyncTarget::agent("watson"), SyncMode::Incremental)
        .unwrap_err()
        .is_not_found());
    // With a single agent left, "all" has no targets and still completes.
    let op = hub.sync_beliefs("sherlock", SyncTarget::All, SyncMode::Full).unwrap();
    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(op.items_synced(), Some(0));
}

#[test]
fn ticker_runs_auto_sync() {
    let hub = hub_with(HubConfig {
        auto_sync: true,
        sync_interval: Duration::from_millis(10),
        staleness_threshold: Duration::from_millis(1),
        ..HubConfig::default()
    });
    let sherlock = join(&hub, "sherlock", "investigator");
    let watson = join(&hub, "watson", "validator");
    sherlock.write().unwrap().set_fact("mud", true, "sherlock").unwrap();
    watson.write().unwrap().set_fact("limp", true, "watson").unwrap();

    hub.start_auto_sync().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let both = sherlock.read().unwrap().is_valid("limp").ok().flatten() == Some(true)
            && watson.read().unwrap().is_valid("mud").ok().flatten() == Some(true);
        if both {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "auto-sync never ran");
        thread::sleep(Duration::from_millis(50));
    }
    hub.stop_auto_sync().unwrap();
}
