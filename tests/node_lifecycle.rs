mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pilotvisor::{NodeError, NodeKind, NodeState, Origin, Owner};

use common::{eventually, fast_config, supervisor, ticker, tree};

#[tokio::test]
async fn stop_is_idempotent() {
    let sup = supervisor(fast_config());
    let node = sup.thread("worker", ticker());
    node.start(sup.owner()).unwrap();
    assert!(node.is_alive(sup.owner()).unwrap());

    let first = node.stop(sup.owner(), Duration::from_secs(1)).await.unwrap();
    assert_eq!(first.state, NodeState::Stopped);
    assert!(first.is_clean());

    let second = node.stop(sup.owner(), Duration::from_secs(1)).await.unwrap();
    assert_eq!(second.state, NodeState::Stopped);
    assert!(!second.forced);
    assert!(!node.is_alive(sup.owner()).unwrap());
}

#[tokio::test]
async fn concurrent_stops_agree_on_the_terminal_state() {
    let sup = supervisor(fast_config());
    let node = sup.thread("worker", ticker());
    node.start(sup.owner()).unwrap();

    let (a, b) = tokio::join!(
        node.stop(sup.owner(), Duration::from_secs(1)),
        node.stop(sup.owner(), Duration::from_secs(1)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.state.is_terminal());
    assert_eq!(a.state, b.state);
    assert_eq!(node.state(), a.state);
}

#[tokio::test]
async fn only_the_owner_controls_a_node() {
    let sup = supervisor(fast_config());
    let node = sup.thread("worker", ticker());
    let stranger = Owner::new("stranger");

    assert!(matches!(
        node.start(&stranger),
        Err(NodeError::OwnershipViolation { .. })
    ));
    node.start(sup.owner()).unwrap();
    assert!(matches!(
        node.is_alive(&stranger),
        Err(NodeError::OwnershipViolation { .. })
    ));
    assert!(matches!(
        node.stop(&stranger, Duration::from_secs(1)).await,
        Err(NodeError::OwnershipViolation { .. })
    ));

    // Observation is open to everyone.
    assert_eq!(node.state(), NodeState::Running);
    node.stop(sup.owner(), Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn second_start_is_rejected() {
    let sup = supervisor(fast_config());
    let node = sup.thread("worker", ticker());
    node.start(sup.owner()).unwrap();
    let err = node.start(sup.owner()).unwrap_err();
    assert!(matches!(err, NodeError::AlreadyStarted { .. }));
    assert_eq!(err.as_label(), "node_already_started");
    node.stop(sup.owner(), Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn stopping_an_unstarted_node_ends_it() {
    let sup = supervisor(fast_config());
    let node = sup.thread("idle", ticker());
    assert_eq!(node.kind(), NodeKind::Thread);

    let report = node.stop(sup.owner(), Duration::from_secs(1)).await.unwrap();
    assert_eq!(report.state, NodeState::Stopped);
    let cond = node.termination().unwrap();
    assert_eq!(cond.origin, Origin::External);

    assert!(matches!(
        node.start(sup.owner()),
        Err(NodeError::AlreadyStarted { .. })
    ));
}

#[tokio::test]
async fn clean_root_stop_leaves_no_live_descendants() {
    let sup = supervisor(fast_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let root = sup.thread("root", tree(2, 3, ticker, Arc::clone(&seen)));
    root.start(sup.owner()).unwrap();

    assert!(eventually(Duration::from_secs(5), || seen.lock().len() == 12).await);

    let report = root.stop(sup.owner(), Duration::from_secs(2)).await.unwrap();
    assert!(report.is_clean(), "{report:?}");

    for node in seen.lock().iter() {
        assert_eq!(node.state(), NodeState::Stopped, "{node:?}");
        assert!(node.parent().is_some());
    }
}
