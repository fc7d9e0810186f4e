#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pilotvisor::{
    ComponentRef, Config, Event, EventKind, FaultInjector, Idle, Node, NodeContext, Supervisor,
    TaskError, WorkFn,
};
use tokio::sync::broadcast;

/// Short timings so trees settle in milliseconds.
pub fn fast_config() -> Config {
    Config {
        grace: Duration::from_secs(2),
        hard: Duration::from_millis(500),
        watch_interval: Duration::from_millis(20),
        ..Config::default()
    }
}

pub fn supervisor(cfg: Config) -> Supervisor {
    supervisor_with_faults(cfg, FaultInjector::disabled())
}

pub fn supervisor_with_faults(cfg: Config, faults: FaultInjector) -> Supervisor {
    Supervisor::builder(cfg)
        .with_faults(faults)
        .build()
        .expect("supervisor builds")
}

/// Cooperative worker: idles in short steps.
pub fn ticker() -> ComponentRef {
    WorkFn::arc(|ctx: NodeContext| async move {
        ctx.idle(Duration::from_millis(10)).await;
        Ok::<_, TaskError>(())
    })
}

/// Container whose init spawns the given children (uid suffix, component).
pub fn parent_of(children: Vec<(&'static str, ComponentRef)>, seen: Arc<Mutex<Vec<Node>>>) -> ComponentRef {
    Arc::new(Idle::with_init(move |ctx| {
        for (suffix, component) in &children {
            let child = ctx
                .spawn_thread(format!("{}.{suffix}", ctx.uid()), Arc::clone(component))
                .map_err(|e| TaskError::fail(e.to_string()))?;
            seen.lock().push(child);
        }
        Ok(())
    }))
}

/// Uniform tree of cooperative containers; leaves run `leaf()`.
pub fn tree<L>(depth: usize, fanout: usize, leaf: L, seen: Arc<Mutex<Vec<Node>>>) -> ComponentRef
where
    L: Fn() -> ComponentRef + Clone + Send + Sync + 'static,
{
    if depth == 0 {
        return leaf();
    }
    Arc::new(Idle::with_init(move |ctx| {
        for i in 0..fanout {
            let component = tree(depth - 1, fanout, leaf.clone(), Arc::clone(&seen));
            let child = ctx
                .spawn_thread(format!("{}.{i}", ctx.uid()), component)
                .map_err(|e| TaskError::fail(e.to_string()))?;
            seen.lock().push(child);
        }
        Ok(())
    }))
}

/// Polls `cond` every 10ms for up to `limit`.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Every event currently buffered in `rx`.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

pub fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}
