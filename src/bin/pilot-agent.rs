//! pilot-agent: the agent side of a pilot.
//!
//! Runs a root node with `--workers` thread workers under the process signal
//! gateway. The first `SIGINT`/`SIGTERM` stops the tree gracefully; a second one
//! exits immediately with code 130. Prints `READY` on stdout once the workers are
//! running. Exits 1 if the root ends `Failed`.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use pilotvisor::{
    Component, Config, FaultInjector, LogWriter, NodeContext, Supervisor, TaskError,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Pilot agent: supervises worker threads until terminated.
#[derive(Parser, Debug)]
#[command(name = "pilot-agent")]
#[command(version, about, long_about = None)]
struct Args {
    /// Uid of the agent root node
    #[arg(long, env = "PILOT_UID", default_value = "agent")]
    uid: String,

    /// Number of worker threads
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Duration of one worker iteration, in milliseconds
    #[arg(long, default_value_t = 50)]
    work_ms: u64,

    /// Time each worker spends in finalize regardless of termination, in milliseconds
    #[arg(long, default_value_t = 0)]
    stubborn_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "pilot agent failed");
            2
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let cfg = Config::from_env().context("invalid configuration")?;
    let sup = Supervisor::builder(cfg)
        .with_owner_name(format!("pilot-agent:{}", args.uid))
        .with_subscribers(vec![Arc::new(LogWriter)])
        .with_faults(FaultInjector::from_env())
        .with_signal_gateway()
        .build()
        .context("cannot build supervisor")?;

    let root = sup.thread(
        args.uid.as_str(),
        Arc::new(AgentRoot {
            workers: args.workers,
            period: Duration::from_millis(args.work_ms),
            stubborn: Duration::from_millis(args.stubborn_ms),
        }),
    );

    let outcome = sup.run(&root).await.context("agent root did not run")?;
    info!(
        state = %outcome.state,
        cause = ?outcome.cause.as_ref().map(|c| c.cause.to_string()),
        leaked = outcome.leaked.len(),
        "pilot agent finished"
    );
    sup.close().await;
    Ok(outcome.exit_code())
}

/// Agent root: owns the workers, idles otherwise.
struct AgentRoot {
    workers: usize,
    period: Duration,
    stubborn: Duration,
}

#[async_trait]
impl Component for AgentRoot {
    async fn initialize(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        for i in 1..=self.workers {
            let worker = Arc::new(Worker {
                period: self.period,
                stubborn: self.stubborn,
            });
            ctx.spawn_thread(format!("{}.worker.{i}", ctx.uid()), worker)
                .map_err(|e| TaskError::fail(e.to_string()))?;
        }
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "READY");
        let _ = out.flush();
        Ok(())
    }

    async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        ctx.idle(ctx.config().watch_period()).await;
        Ok(())
    }
}

struct Worker {
    period: Duration,
    stubborn: Duration,
}

#[async_trait]
impl Component for Worker {
    async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        ctx.idle(self.period).await;
        Ok(())
    }

    async fn finalize(&self, _ctx: &NodeContext) -> Result<(), TaskError> {
        if !self.stubborn.is_zero() {
            tokio::time::sleep(self.stubborn).await;
        }
        Ok(())
    }
}
