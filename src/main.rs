mod cli;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use dirmon::config::CONFIG_FILE;
use dirmon::output::{EventFormat, format_event};
use dirmon::{DirectoryMonitor, EventLoop, MonitorConfig, task};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only event lines.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            path,
            config,
            latency_ms,
            duration,
            format,
        } => {
            let config_path = config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
            let mut config = MonitorConfig::load(&config_path);
            if let Some(latency_ms) = latency_ms {
                config.latency_ms = latency_ms;
            }
            watch(path, config, duration.map(Duration::from_secs), format.into()).await?;
        }
    }

    Ok(())
}

async fn watch(
    path: PathBuf,
    config: MonitorConfig,
    duration: Option<Duration>,
    format: EventFormat,
) -> Result<()> {
    let (event_loop, handle) = EventLoop::new();
    let driver = tokio::spawn(event_loop.run());

    let mut monitor = DirectoryMonitor::with_config(config);
    monitor.set_callback(move |event| {
        Ok(task(async move {
            if let Some(line) = format_event(&event, format) {
                println!("{line}");
            }
        }))
    });
    monitor
        .start(&path, handle)
        .with_context(|| format!("cannot monitor {}", path.display()))?;
    eprintln!("Watching {} (Ctrl-C to stop)", path.display());

    match duration {
        Some(limit) => tokio::time::sleep(limit).await,
        None => tokio::signal::ctrl_c().await?,
    }

    // stop() joins the watcher thread; keep it off the async workers.
    let (monitor, stopped) = tokio::task::spawn_blocking(move || {
        let result = monitor.stop();
        (monitor, result)
    })
    .await?;
    stopped?;
    let counts = monitor.counts();
    drop(monitor);

    let summary = driver.await?;
    tracing::info!(
        delivered = counts.delivered,
        dropped = counts.dropped,
        failed = counts.failed,
        completed = summary.completed,
        "watch finished"
    );
    Ok(())
}
