mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pilotvisor::{
    Counters, FaultInjector, NodeContext, NodeState, Subscribe, Supervisor, TaskError, Trigger,
    WorkFn,
};

use common::{fast_config, parent_of, ticker};

#[tokio::test]
async fn programmatic_shutdown_stops_the_root_cleanly() {
    let counters = Arc::new(Counters::new());
    let sup = Supervisor::builder(fast_config())
        .with_faults(FaultInjector::disabled())
        .with_subscribers(vec![Arc::clone(&counters) as Arc<dyn Subscribe>])
        .build()
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let root = sup.thread(
        "root",
        parent_of(vec![("a", ticker()), ("b", ticker())], Arc::clone(&seen)),
    );

    let run = sup.run(&root);
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        sup.request_shutdown();
    };
    let (outcome, ()) = tokio::join!(run, trigger);
    let outcome = outcome.unwrap();

    assert_eq!(outcome.state, NodeState::Stopped);
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.leaked.is_empty());

    // The monitor publishes the root's terminal event right after settling.
    tokio::time::sleep(Duration::from_millis(50)).await;
    sup.close().await;
    let snap = counters.snapshot();
    assert_eq!(snap.started, 3);
    assert_eq!(snap.stopped, 3);
    assert_eq!(snap.failed, 0);
}

#[tokio::test]
async fn failing_root_exits_non_zero() {
    let faults = FaultInjector::disabled().with_rule("root.work", Trigger::Nth(2));
    let sup = Supervisor::builder(fast_config())
        .with_faults(faults)
        .build()
        .unwrap();
    let root = sup.thread(
        "root",
        WorkFn::arc(|ctx: NodeContext| async move {
            ctx.idle(Duration::from_millis(5)).await;
            Ok::<_, TaskError>(())
        }),
    );

    let outcome = tokio::time::timeout(Duration::from_secs(5), sup.run(&root))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.state, NodeState::Failed);
    assert_eq!(outcome.exit_code(), 1);
    let cause = outcome.cause.unwrap();
    assert!(cause.is_internal());
    assert!(cause.cause.contains("root.work"));
}

#[tokio::test]
async fn run_rejects_a_root_it_does_not_own() {
    let a = Supervisor::builder(fast_config())
        .with_faults(FaultInjector::disabled())
        .build()
        .unwrap();
    let b = Supervisor::builder(fast_config())
        .with_faults(FaultInjector::disabled())
        .with_owner_name("other")
        .build()
        .unwrap();

    let root = a.thread("root", ticker());
    let err = b.run(&root).await.unwrap_err();
    assert_eq!(err.as_label(), "node_ownership_violation");
    assert_eq!(root.state(), NodeState::Created);
}
