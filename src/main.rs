#![allow(clippy::needless_return)]
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod action;
mod adapter;
mod api;
mod command_locator;
#[cfg(feature = "desktop")]
mod desktop;
mod error;
mod events;
mod executor;
mod failsafe;
mod fixture;
mod job;
mod keys;
mod loader;
mod mask;
mod models;
mod policy;
mod runner;
mod scroller;
mod table;
#[cfg(test)]
mod testing;
mod vault;

use action::ActionStep;
use events::hms;
use failsafe::AbortHandle;
use models::RunRequest;
use runner::RunReport;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a script against the screen
    Run {
        script: PathBuf,
        /// Policy file (default ~/.thin-replay/policy.yaml)
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Log actions instead of injecting them
        #[arg(long)]
        dry_run: bool,
        /// Positions for the dry run (`stem: {x, y, after?}`)
        #[arg(long, requires = "dry_run")]
        fixture: Option<PathBuf>,
        /// Skip every wait in a dry run
        #[arg(long, requires = "dry_run")]
        fast: bool,
        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
        /// Append every run event to this file as JSON lines
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Load and validate a script without running it
    Check {
        script: PathBuf,
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Local API server: queue runs over HTTP
    Serve {
        #[arg(long, default_value_t = 8900)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Run {
            script,
            policy,
            dry_run,
            fixture,
            fast,
            report,
            events,
        } => {
            let abort = AbortHandle::new();
            failsafe::install_ctrlc(abort.clone())?;
            let req = RunRequest {
                dry_run,
                fixture_path: fixture,
                fast,
                policy_path: policy,
                events_path: events,
                ..RunRequest::new(script)
            };
            let result = tokio::task::spawn_blocking(move || job::run_script(&req, abort))
                .await
                .context("run thread panicked")??;
            print_summary(&result);
            if let Some(path) = report {
                let json = serde_json::to_string_pretty(&result)?;
                std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
                println!("report: {}", path.display());
            }
            return Ok(if result.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Commands::Check { script, policy } => {
            let req = RunRequest {
                policy_path: policy,
                ..RunRequest::new(script)
            };
            let (_, table, _) = job::prepare(&req)?;
            if table.is_empty() {
                println!("{}: no numbered images, nothing to run", table.name());
            } else {
                println!("{}: {} steps, ok", table.name(), table.len());
            }
            for (i, step) in table.iter().enumerate() {
                println!("{:>3}  {:<28} {:<5} {}", i + 1, step.key, step.interaction.label(), flags(step));
            }
        }
        Commands::Serve { port } => {
            let router = api::build_router();
            println!("🔌  API server on http://127.0.0.1:{port}");

            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
            axum::serve(listener, router.into_make_service())
                .await
                .context("API server stopped with an error")?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn flags(step: &ActionStep) -> String {
    let mut out = Vec::new();
    if let Some(at) = step.location {
        out.push(format!("at {at}"));
    }
    if let Some(k) = &step.pre_key {
        out.push(format!("pre {k}"));
    }
    if !step.type_text.is_empty() {
        out.push("types".to_string());
    }
    if let Some(k) = &step.post_key {
        out.push(format!("post {k}"));
    }
    if step.scroll_on_fail {
        out.push("scroll".to_string());
    }
    if step.skip_on_fail {
        out.push("skip".to_string());
    }
    out.join(", ")
}

fn print_summary(report: &RunReport) {
    println!("start: {}", report.started_at.format("%d-%m-%Y %H:%M:%S"));
    for r in &report.steps {
        println!("  {:<28} {:<9} {} ms", r.key, r.outcome, r.duration.as_millis());
    }
    if let Some(key) = report.stopped_at() {
        println!("stopped at: {key}");
    }
    println!("end:   {}", report.finished_at.format("%d-%m-%Y %H:%M:%S"));
    println!("total: {}", hms(report.elapsed.as_millis() as u64));
    println!("{} {}", if report.success() { "✅" } else { "❌" }, report.status);
}
