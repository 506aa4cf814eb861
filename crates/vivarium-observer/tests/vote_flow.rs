//! End-to-end voting and lifecycle flows against a real store.
//!
//! The agent client points at a closed port; none of these paths touch the
//! network (death and adjudication are observer-local by design).

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::broadcast;

use vivarium_core::{
    BootstrapMode, CidrRange, DeathCause, LifePhase, ObserverConfig, RoundStatus, VoteChoice,
    VoteRejection,
};
use vivarium_observer::{
    agent_client::AgentClient, lifecycle::Lifecycle, store::Store, voting::VoteService,
};

fn test_config(data_dir: &std::path::Path) -> ObserverConfig {
    ObserverConfig {
        bind_addr: "127.0.0.1:0".into(),
        agent_url: "http://127.0.0.1:1".into(),
        internal_api_key: "test-internal".into(),
        admin_token: "test-admin".into(),
        local_network: CidrRange::parse("192.168.0.0/24").unwrap(),
        trusted_proxies: vec![],
        ip_salt: "test-salt".into(),
        respawn_delay_min_s: 0,
        respawn_delay_max_s: 0,
        sync_interval_s: 30,
        voting_window_s: 3600,
        budget_poll_interval_s: 30,
        data_dir: data_dir.to_path_buf(),
    }
}

/// Store with life 1 already alive and one round open, then the services on
/// top. The lifecycle derives its initial phase from the store, so the birth
/// happens first.
fn harness(
    dir: &tempfile::TempDir,
    closes_in_s: i64,
) -> (Arc<Store>, Arc<Lifecycle>, VoteService) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let now = Utc::now();
    store
        .record_birth(1, now, BootstrapMode::BasicFacts, "test-model")
        .unwrap();
    store
        .open_round(1, now, now + Duration::seconds(closes_in_s))
        .unwrap();

    let config = Arc::new(test_config(dir.path()));
    let (events_tx, _) = broadcast::channel(64);
    let agent = AgentClient::new(&config.agent_url, &config.internal_api_key);
    let lifecycle = Lifecycle::new(store.clone(), config, agent, events_tx);
    let votes = VoteService::new(lifecycle.clone());
    (store, lifecycle, votes)
}

#[tokio::test]
async fn first_vote_leaves_round_open() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, lifecycle, votes) = harness(&dir, 3600);

    let counts = votes.submit("fp-a", VoteChoice::Live).unwrap().unwrap();
    assert_eq!((counts.live, counts.die, counts.total), (1, 0, 1));

    votes.close_due_rounds().await;
    let state = store.life_state().unwrap();
    assert!(state.is_alive);
    assert_eq!(state.life_number, 1);
    assert_eq!(lifecycle.phase(), LifePhase::Alive);
    assert_eq!(
        store.current_open_round().unwrap().unwrap().status,
        RoundStatus::Open
    );
}

#[tokio::test]
async fn die_majority_at_threshold_kills() {
    let dir = tempfile::TempDir::new().unwrap();
    // Round already due so the watcher adjudicates immediately.
    let (store, lifecycle, votes) = harness(&dir, -1);

    for fp in ["fp-a", "fp-b", "fp-c"] {
        votes.submit(fp, VoteChoice::Die).unwrap().unwrap();
    }
    votes.close_due_rounds().await;

    let state = store.life_state().unwrap();
    assert!(!state.is_alive);
    assert_eq!(lifecycle.phase(), LifePhase::Dead);
    let history = store.life_history(1).unwrap();
    assert_eq!(history[0].death_cause, Some(DeathCause::VoteMajority));
    assert!(history[0].died_at.is_some());
}

#[tokio::test]
async fn two_votes_never_kill() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, _lifecycle, votes) = harness(&dir, -1);

    votes.submit("fp-a", VoteChoice::Die).unwrap().unwrap();
    votes.submit("fp-b", VoteChoice::Die).unwrap().unwrap();
    votes.close_due_rounds().await;

    assert!(store.life_state().unwrap().is_alive);
    // Survival re-arms a fresh round with zeroed counters.
    let round = store.current_open_round().unwrap().unwrap();
    assert_eq!((round.live, round.die), (0, 0));
}

#[tokio::test]
async fn exact_tie_survives() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, _lifecycle, votes) = harness(&dir, -1);

    votes.submit("fp-a", VoteChoice::Die).unwrap().unwrap();
    votes.submit("fp-b", VoteChoice::Die).unwrap().unwrap();
    votes.submit("fp-c", VoteChoice::Live).unwrap().unwrap();
    votes.submit("fp-d", VoteChoice::Live).unwrap().unwrap();
    votes.close_due_rounds().await;

    assert!(store.life_state().unwrap().is_alive);
}

#[tokio::test]
async fn dead_state_locks_submission() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_store, lifecycle, votes) = harness(&dir, 3600);

    assert!(lifecycle.begin_death(DeathCause::Manual, "test kill").await);
    // A round row may remain open in odd states; the lock still applies.
    let rejection = votes.submit("fp-a", VoteChoice::Live).unwrap().unwrap_err();
    assert_eq!(rejection, VoteRejection::Dead);
}

#[tokio::test]
async fn alive_to_dying_happens_at_most_once() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, lifecycle, _votes) = harness(&dir, 3600);

    let first = lifecycle.begin_death(DeathCause::Bankruptcy, "first").await;
    let second = lifecycle.begin_death(DeathCause::VoteMajority, "second").await;
    assert!(first);
    assert!(!second);
    let history = store.life_history(1).unwrap();
    assert_eq!(history[0].death_cause, Some(DeathCause::Bankruptcy));
}

#[tokio::test]
async fn duplicate_and_cooldown_rejections() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_store, _lifecycle, votes) = harness(&dir, 3600);

    votes.submit("fp-a", VoteChoice::Live).unwrap().unwrap();
    let dup = votes.submit("fp-a", VoteChoice::Live).unwrap().unwrap_err();
    assert_eq!(dup, VoteRejection::Duplicate);

    // A different fingerprint is unaffected.
    votes.submit("fp-b", VoteChoice::Die).unwrap().unwrap();
    let counts = votes.counts().unwrap();
    assert_eq!((counts.live, counts.die), (1, 1));
}
