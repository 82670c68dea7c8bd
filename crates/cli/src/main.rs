//! callwatch: live view of active calls on Asterisk switches
//!
//! Polls each configured switch over SSH, prints the call list after every
//! poll and optionally appends call transitions to a JSON-lines file.

mod args;
mod call_log;
mod console;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use callwatch_infra_common::logging::{log_welcome, setup_logging, LogContext};
use callwatch_infra_common::TaskManager;
use callwatch_monitor_core::{FanoutSink, PollController, PresentationSink, SshExecutor, TracingSink};
use clap::Parser;
use tracing::{error, info, warn, Instrument, Level};

use crate::args::Args;
use crate::call_log::CallLogSink;
use crate::console::ConsoleSink;
use crate::settings::{FileConfig, Settings};

/// Time allowed for the poll loops to close their sessions on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let settings = Settings::resolve(&args, file)?;

    let _log_guard = setup_logging(settings.logging.clone()).context("Failed to set up logging")?;
    log_welcome("callwatch", env!("CARGO_PKG_VERSION"));

    let sink = build_sink(&settings).await?;

    let tasks = TaskManager::with_config("callwatch", settings.targets.len(), SHUTDOWN_TIMEOUT);
    for target in settings.targets {
        let name = target.poller.target_name.clone();
        let executor = Arc::new(SshExecutor::new(target.ssh));
        let controller = PollController::new(target.poller, executor, sink.clone())
            .with_context(|| format!("Invalid settings for target {}", name))?;

        let span = LogContext::with_operation("monitor", "poll")
            .with_field("target", name.clone())
            .span(Level::INFO);

        tasks
            .spawn_tracked(format!("poll:{}", name), move |cancel| {
                async move {
                    if let Err(e) = controller.run(cancel).await {
                        error!(target_name = %name, error = %e, "Monitor stopped");
                    }
                }
                .instrument(span)
            })
            .await?;
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
        }
        _ = tasks.wait_for_completion() => {
            warn!("All monitors have stopped");
        }
    }

    let stats = tasks.stats().await;
    info!(
        active = stats.active_tasks,
        total = stats.total_tasks,
        "Stopping monitors"
    );
    tasks.shutdown_all().await?;
    info!("Shutdown complete");
    Ok(())
}

async fn build_sink(settings: &Settings) -> anyhow::Result<Arc<dyn PresentationSink>> {
    let mut sink = FanoutSink::new().with_sink(Arc::new(TracingSink));

    if settings.console {
        sink = sink.with_sink(Arc::new(ConsoleSink::stdout(settings.targets.len() > 1)));
    }

    if let Some(path) = &settings.call_log {
        let call_log = CallLogSink::open(path)
            .await
            .with_context(|| format!("Cannot open call log {}", path.display()))?;
        info!(path = %call_log.path().display(), "Writing call log");
        sink = sink.with_sink(Arc::new(call_log));
    }

    Ok(Arc::new(sink))
}
