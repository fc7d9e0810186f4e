mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use async_trait::async_trait;
use pilotvisor::{
    Component, ComponentRef, Config, EventKind, NodeContext, NodeState, Origin, TaskError, WorkFn,
};

use common::{count, drain, eventually, parent_of, supervisor, tree};

/// Ignores its termination flag; only the forced interrupt ends it.
fn stubborn() -> ComponentRef {
    WorkFn::arc(|_ctx: NodeContext| async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<_, TaskError>(())
    })
}

/// Blocks its runtime thread; even the forced interrupt cannot end it in time.
fn blocking() -> ComponentRef {
    WorkFn::arc(|_ctx: NodeContext| async move {
        std::thread::sleep(Duration::from_millis(2500));
        Ok::<_, TaskError>(())
    })
}

/// Stops cooperatively, but its cleanup takes `cleanup`.
struct SlowCleanup {
    cleanup: Duration,
}

#[async_trait]
impl Component for SlowCleanup {
    async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        ctx.idle(Duration::from_millis(10)).await;
        Ok(())
    }

    async fn finalize(&self, _ctx: &NodeContext) -> Result<(), TaskError> {
        tokio::time::sleep(self.cleanup).await;
        Ok(())
    }
}

fn tight(grace_ms: u64, hard_ms: u64) -> Config {
    Config {
        grace: Duration::from_millis(grace_ms),
        hard: Duration::from_millis(hard_ms),
        watch_interval: Duration::from_millis(20),
        ..Config::default()
    }
}

#[tokio::test]
async fn deep_tree_with_stubborn_leaves_stops_within_grace_plus_hard() {
    let grace = Duration::from_millis(200);
    let hard = Duration::from_millis(300);
    let sup = supervisor(tight(200, 300));
    let seen = Arc::new(Mutex::new(Vec::new()));
    // depth 4, fanout 2: 2 + 4 + 8 + 16 nodes.
    let root = sup.thread("root", tree(4, 2, stubborn, Arc::clone(&seen)));
    root.start(sup.owner()).unwrap();
    assert!(eventually(Duration::from_secs(5), || seen.lock().len() == 30).await);

    let started = Instant::now();
    let report = root.stop(sup.owner(), grace).await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.state.is_terminal());
    assert!(
        elapsed < grace + hard + Duration::from_millis(250),
        "stop took {elapsed:?}"
    );

    assert!(
        eventually(Duration::from_secs(2), || {
            seen.lock().iter().all(|n| n.state().is_terminal())
        })
        .await
    );
    let leaves: Vec<_> = seen
        .lock()
        .iter()
        .filter(|n| n.uid().as_str().split('.').count() == 5)
        .cloned()
        .collect();
    assert_eq!(leaves.len(), 16);
    assert!(leaves.iter().all(|n| n.state() == NodeState::Failed));
}

#[tokio::test]
async fn forced_children_do_not_fail_a_cooperative_parent() {
    let sup = supervisor(tight(100, 300));
    let mut rx = sup.bus().subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let root = sup.thread("root", parent_of(vec![("leaf", stubborn())], Arc::clone(&seen)));
    root.start(sup.owner()).unwrap();
    assert!(eventually(Duration::from_secs(2), || seen.lock().len() == 1).await);

    // The child gets the root's window minus a forcing reserve, so the root is never forced.
    let report = root.stop(sup.owner(), Duration::from_secs(2)).await.unwrap();
    assert_eq!(report.state, NodeState::Stopped);
    assert!(!report.forced);
    assert!(report.leaked.is_empty());

    let leaf = seen.lock()[0].clone();
    assert_eq!(leaf.state(), NodeState::Failed);

    let events = drain(&mut rx);
    assert_eq!(count(&events, EventKind::GraceExceeded), 1);
    assert_eq!(count(&events, EventKind::ForcedInterrupt), 1);
    assert_eq!(count(&events, EventKind::ChildLeaked), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leaked_node_settles_failed() {
    let sup = supervisor(tight(100, 100));
    let node = sup.thread("stuck", blocking());
    node.start(sup.owner()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = node.stop(sup.owner(), Duration::from_millis(100)).await.unwrap();
    assert_eq!(report.state, NodeState::Failed);
    assert!(report.forced);
    assert_eq!(report.leaked.len(), 1);
    assert_eq!(report.leaked[0].as_str(), "stuck");

    let cond = node.termination().unwrap();
    assert_eq!(cond.origin, Origin::External);
    assert_eq!(node.state(), NodeState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unkillable_child_is_reported_and_fails_its_parent() {
    let sup = supervisor(tight(100, 200));
    let mut rx = sup.bus().subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let root = sup.thread("root", parent_of(vec![("stuck", blocking())], Arc::clone(&seen)));
    root.start(sup.owner()).unwrap();
    assert!(eventually(Duration::from_secs(2), || seen.lock().len() == 1).await);
    // Let the child enter its blocking call.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Child window: 2s minus a 400ms reserve; it leaks at 1.8s, before the root's deadline.
    let report = root.stop(sup.owner(), Duration::from_secs(2)).await.unwrap();
    assert_eq!(report.state, NodeState::Failed);
    assert!(!report.forced);
    assert_eq!(report.leaked.len(), 1);
    assert_eq!(report.leaked[0].as_str(), "root.stuck");

    let stuck = seen.lock()[0].clone();
    assert_eq!(stuck.state(), NodeState::Failed);

    let events = drain(&mut rx);
    let leaked: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::ChildLeaked)
        .collect();
    assert_eq!(leaked.len(), 1);
    assert_eq!(leaked[0].node.as_deref(), Some("root.stuck"));
}

#[tokio::test]
async fn children_share_the_callers_grace() {
    // Configured grace is far shorter than the child's cleanup.
    let sup = supervisor(tight(100, 300));
    let mut rx = sup.bus().subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let slow: ComponentRef = Arc::new(SlowCleanup {
        cleanup: Duration::from_millis(500),
    });
    let root = sup.thread("root", parent_of(vec![("slow", slow)], Arc::clone(&seen)));
    root.start(sup.owner()).unwrap();
    assert!(eventually(Duration::from_secs(2), || seen.lock().len() == 1).await);

    let report = root.stop(sup.owner(), Duration::from_secs(5)).await.unwrap();
    assert!(report.is_clean(), "{report:?}");

    let child = seen.lock()[0].clone();
    assert_eq!(child.state(), NodeState::Stopped);
    let events = drain(&mut rx);
    assert_eq!(count(&events, EventKind::ForcedInterrupt), 0);
    assert_eq!(count(&events, EventKind::GraceExceeded), 0);
}

#[tokio::test]
async fn repeated_stop_skips_the_grace_period() {
    let sup = supervisor(tight(100, 300));
    let node = sup.thread("stubborn", stubborn());
    node.start(sup.owner()).unwrap();

    let long = Duration::from_secs(30);
    let started = Instant::now();
    let (a, b) = tokio::join!(node.stop(sup.owner(), long), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        node.stop(sup.owner(), long).await
    });
    let elapsed = started.elapsed();

    assert_eq!(a.unwrap().state, NodeState::Failed);
    let b = b.unwrap();
    assert!(b.forced);
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}
