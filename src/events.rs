use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::Serialize;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::action::{Point, StepKey};
use crate::executor::StepOutcome;
use crate::mask::mask_text;
use crate::runner::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum LocateSource {
    Explicit,
    Locator,
    Scroll { attempt: u32 },
}

/// Progress of a run, in the order it happens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { name: String, steps: usize, at: DateTime<Local> },
    StepStarted { key: StepKey, index: usize },
    KeyPressed { key: StepKey, keys: String, phase: KeyPhase },
    Located { key: StepKey, at: Point, source: LocateSource },
    NotFound { key: StepKey },
    Scrolling { key: StepKey, attempt: u32, amount: i32 },
    /// `text` is the template as written in the table; secrets stay as placeholders.
    Typed { key: StepKey, text: String },
    Settling { key: StepKey, ms: u64, long: bool },
    StepFinished { key: StepKey, outcome: StepOutcome, elapsed_ms: u64 },
    RunFinished { status: RunStatus, at: DateTime<Local>, elapsed_ms: u64 },
}

pub trait RunObserver {
    fn on_event(&mut self, event: &RunEvent);
}

impl RunObserver for Vec<RunEvent> {
    fn on_event(&mut self, event: &RunEvent) {
        self.push(event.clone());
    }
}

impl<T: RunObserver + ?Sized> RunObserver for Box<T> {
    fn on_event(&mut self, event: &RunEvent) {
        (**self).on_event(event)
    }
}

/// Feeds every event to both observers.
pub struct Tee<A, B>(pub A, pub B);

impl<A: RunObserver, B: RunObserver> RunObserver for Tee<A, B> {
    fn on_event(&mut self, event: &RunEvent) {
        self.0.on_event(event);
        self.1.on_event(event);
    }
}

/// Writes run progress through the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn on_event(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { name, steps, at } => {
                info!("running `{}` ({} steps), start {}", name, steps, at.format("%d-%m-%Y %H:%M:%S"));
            }
            RunEvent::StepStarted { key, index } => info!("[{}] step {}", index + 1, key),
            RunEvent::KeyPressed { key, keys, phase } => {
                info!("{}: key {} ({:?})", key, keys, phase)
            }
            RunEvent::Located { key, at, source } => info!("{}: found at {} {:?}", key, at, source),
            RunEvent::NotFound { key } => warn!("{}: not found", key),
            RunEvent::Scrolling { key, attempt, amount } => {
                info!("{}: scrolling (attempt {}, amount {})", key, attempt, amount)
            }
            RunEvent::Typed { key, text } => info!("{}: typed `{}`", key, mask_text(text)),
            RunEvent::Settling { key, ms, long } => {
                if *long {
                    info!("{}: settling {} ms", key, ms);
                }
            }
            RunEvent::StepFinished { key, outcome, elapsed_ms } => match outcome {
                StepOutcome::Succeeded => info!("{}: done in {} ms", key, elapsed_ms),
                StepOutcome::Skipped => warn!("{}: skipped", key),
                StepOutcome::Failed => error!("{}: failed, stopping run", key),
            },
            RunEvent::RunFinished { status, at, elapsed_ms } => {
                let line = format!(
                    "finished {} ({}), end {}",
                    status,
                    hms(*elapsed_ms),
                    at.format("%d-%m-%Y %H:%M:%S")
                );
                if status.is_success() {
                    info!("{line}");
                } else {
                    error!("{line}");
                }
            }
        }
    }
}

/// Appends every event to a file as one JSON object per line.
pub struct JsonLines {
    file: File,
}

impl JsonLines {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self { file })
    }
}

impl RunObserver for JsonLines {
    fn on_event(&mut self, event: &RunEvent) {
        let written = serde_json::to_string(event)
            .map_err(anyhow::Error::from)
            .and_then(|line| writeln!(self.file, "{line}").map_err(anyhow::Error::from));
        if let Err(e) = written {
            warn!("event log: {e:#}");
        }
    }
}

/// `HH:MM:SS` for a millisecond count.
pub fn hms(ms: u64) -> String {
    let s = ms / 1000;
    format!("{:02}:{:02}:{:02}", s / 3600, (s / 60) % 60, s % 60)
}
