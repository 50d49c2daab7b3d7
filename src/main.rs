use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use relay_bridge::{
    api,
    channel::stdio::StdioChannel,
    config::Config,
    controller::{Controller, ControllerSettings},
    engine::process::ProcessEngine,
    events::{init_logging, EventEmitter},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();
    init_logging(&cfg)?;

    let engine = ProcessEngine::new(&cfg.command, &cfg.args)
        .with_context(|| format!("invalid engine command '{}'", cfg.command))?;
    tracing::info!(
        target = "relay_bridge::main",
        engine = engine.program(),
        "starting bridge"
    );

    let (channel, mut inbound) = StdioChannel::stdio();
    let settings = ControllerSettings::from_config(&cfg, EventEmitter::new(cfg.json_output));
    let controller = Controller::build(Arc::new(engine), Arc::new(channel), settings);
    tracing::info!(
        target = "relay_bridge::main",
        working_directory = %controller.working_dir().display(),
        approval_timeout_ms = cfg.approval_timeout_ms,
        "bridge ready"
    );

    let api_task = match cfg.api_port {
        Some(port) => Some(api::serve(controller.clone(), port).await?),
        None => None,
    };

    let mut terminate = terminate_signal()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target = "relay_bridge::main", "received Ctrl-C, shutting down");
                break;
            }
            _ = terminate.recv() => {
                tracing::info!(target = "relay_bridge::main", "received SIGTERM, shutting down");
                break;
            }
            msg = inbound.recv() => match msg {
                Some(msg) => controller.dispatch(msg),
                None => {
                    tracing::info!(target = "relay_bridge::main", "input closed, shutting down");
                    break;
                }
            },
        }
    }

    let report = controller.shutdown(cfg.shutdown_grace()).await;
    if report.timed_out {
        tracing::warn!(
            target = "relay_bridge::main",
            grace_ms = cfg.shutdown_grace_ms,
            "exiting with tasks still running"
        );
    }
    if let Some(task) = api_task {
        task.abort();
    }
    Ok(())
}

#[cfg(unix)]
fn terminate_signal() -> Result<TerminateSignal> {
    use tokio::signal::unix::{signal, SignalKind};
    let inner = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    Ok(TerminateSignal { inner })
}

#[cfg(not(unix))]
fn terminate_signal() -> Result<TerminateSignal> {
    Ok(TerminateSignal {})
}

struct TerminateSignal {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
}

impl TerminateSignal {
    #[cfg(unix)]
    async fn recv(&mut self) {
        self.inner.recv().await;
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
