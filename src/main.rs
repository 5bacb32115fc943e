use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

mod actions;
mod cli;

use actions::Action;
use agent_fleet::activity::recency::classify_record;
use agent_fleet::activity::ActivityStatus;
use agent_fleet::{Fleet, SessionRecord};
use cli::{Cli, Commands};

const REFRESH_TICK: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let config = cli.fleet_config()?;
    let fleet = Arc::new(Fleet::new(&config)?);

    match cli.command {
        Commands::Ls => {
            // Sample first so the listing reuses the monitor's diff stats.
            let activity: HashMap<_, _> = fleet
                .monitor()
                .update_all()
                .await
                .into_iter()
                .map(|(name, metrics)| (name, metrics.status))
                .collect();
            let records = fleet.get_sessions().await?;
            print_sessions(&records, &activity);
            match fleet.attached_session_count().await {
                Ok(n) if n > 0 => println!("{} attached", n),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "could not count attached sessions"),
            }
        }
        Commands::Status { name } => {
            println!("{}", fleet.get_session_status(&name).await);
        }
        Commands::Spawn { agents, prompt } => {
            let opts = format!("{} {}", agents, prompt.join(" "));
            let done = fleet.spawn_agent_interactive(&opts)?;
            let names = done.await.context("spawn task ended without a result")??;
            for name in names {
                println!("{}", name);
            }
        }
        Commands::Kill { name, all } => {
            if all {
                for name in fleet.kill_all().await? {
                    println!("killed {}", name);
                }
            } else if let Some(name) = name {
                fleet.kill_session(&name).await?;
                println!("killed {}", name);
            }
        }
        Commands::Attach { name } => {
            let argv = fleet.attach_command(&name).await?;
            let (program, args) = argv.split_first().context("empty attach command")?;
            let status = std::process::Command::new(program)
                .args(args)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .context("Failed to attach")?;
            if !status.success() {
                bail!("tmux attach exited with {}", status);
            }
        }
        Commands::Broadcast { message } => {
            let report = fleet.run_broadcast(&message.join(" ")).await?;
            println!(
                "delivered to {}, skipped {} not running",
                report.delivered.len(),
                report.skipped.len()
            );
            for (name, err) in &report.failed {
                println!("failed {}: {}", name, err);
            }
        }
        Commands::Watch => watch(fleet).await?,
    }

    Ok(())
}

async fn watch(fleet: Arc<Fleet>) -> Result<()> {
    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let cancel = CancellationToken::new();
    fleet.monitor().start(&cancel);

    // Spawn session poller
    let poll_tx = tx.clone();
    let poll_fleet = fleet.clone();
    let poll_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REFRESH_TICK);
        loop {
            tokio::select! {
                _ = poll_cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            poll_fleet.refresh().await;
            let _ = poll_tx.send(Action::ActivityUpdated(poll_fleet.activity_statuses().await));
            match poll_fleet.get_sessions().await {
                Ok(records) => {
                    let _ = poll_tx.send(Action::SessionsUpdated(records));
                }
                Err(e) => {
                    let _ = poll_tx.send(Action::Error(format!("Sessions: {}", e)));
                }
            }
        }
    });

    let quit_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(Action::Quit);
        }
    });
    drop(tx);

    let mut activity = HashMap::new();
    while let Some(action) = rx.recv().await {
        match action {
            Action::SessionsUpdated(records) => {
                println!();
                print_sessions(&records, &activity);
            }
            Action::ActivityUpdated(latest) => activity = latest,
            Action::Error(msg) => error!("{}", msg),
            Action::Quit => break,
        }
    }

    cancel.cancel();
    fleet.monitor().stop();
    Ok(())
}

fn print_sessions(records: &[SessionRecord], activity: &HashMap<String, ActivityStatus>) {
    if records.is_empty() {
        println!("no agent sessions");
        return;
    }

    let now = chrono::Utc::now();
    println!(
        "{:<44} {:<9} {:<8} {:<8} {:>11} {:>6}",
        "SESSION", "STATUS", "ACTIVITY", "RECENCY", "DIFF", "PORT"
    );
    for record in records {
        let port = if record.has_port() {
            record.port.to_string()
        } else {
            "-".to_string()
        };
        println!(
            "{:<44} {:<9} {:<8} {:<8} {:>11} {:>6}",
            record.name,
            record.status.as_str(),
            activity.get(&record.name).map(|s| s.as_str()).unwrap_or("-"),
            classify_record(record, now).as_str(),
            format!("+{}/-{}", record.insertions, record.deletions),
            port
        );
    }
}
