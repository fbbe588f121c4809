use anyhow::{Context, Result};
use globset::{Glob, GlobSetBuilder};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::action::{ActionStep, Interaction, MouseButton, Point};
use crate::error::ConfigError;
use crate::table::ActionTable;

const DEFAULT_PATH: &str = ".thin-replay/policy.yaml";

/// Everything read from `policy.yaml`. Each section falls back to its defaults.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Policy {
    pub run: RunPolicy,
    pub defaults: StepDefaults,
    pub guard: Guard,
    pub locator: LocatorConfig,
    pub desktop: DesktopConfig,
}

/// Knobs of the engine that are not per step.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RunPolicy {
    /// Incremental scroll per retry attempt; positive scrolls up.
    pub scroll_amount: i32,
    /// First retry attempt scrolls by this much to reach a known end of the view.
    pub reset_scroll: i32,
    pub max_attempts: u32,
    pub retry_settle_ms: u64,
    /// Pause after a pre/post key action.
    pub hook_settle_ms: u64,
    /// Pause between a successful interaction and typing.
    pub type_settle_ms: u64,
    /// Steps settling longer than this are reported as long waits.
    /// Always `defaults.settle_ms`; set by [`load`].
    #[serde(skip)]
    pub long_settle_ms: u64,
    pub failsafe: bool,
    pub failsafe_corner_px: i32,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            scroll_amount: 500,
            reset_scroll: -100_000_000,
            max_attempts: 6,
            retry_settle_ms: 2000,
            hook_settle_ms: 1000,
            type_settle_ms: 1000,
            long_settle_ms: StepDefaults::default().settle_ms,
            failsafe: true,
            failsafe_corner_px: 4,
        }
    }
}

impl RunPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::MaxAttempts);
        }
        Ok(())
    }

    pub fn retry_settle(&self) -> Duration {
        Duration::from_millis(self.retry_settle_ms)
    }

    pub fn hook_settle(&self) -> Duration {
        Duration::from_millis(self.hook_settle_ms)
    }

    pub fn type_settle(&self) -> Duration {
        Duration::from_millis(self.type_settle_ms)
    }

    pub fn long_settle(&self) -> Duration {
        Duration::from_millis(self.long_settle_ms)
    }

    /// Same behaviour with every wait removed; used by tests and `--fast` dry runs.
    pub fn without_waits(mut self) -> Self {
        self.retry_settle_ms = 0;
        self.hook_settle_ms = 0;
        self.type_settle_ms = 0;
        self
    }
}

/// Field values a freshly built step starts from.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StepDefaults {
    pub button: MouseButton,
    pub clicks: u32,
    pub click_interval_ms: u64,
    pub type_interval_ms: u64,
    pub settle_ms: u64,
    pub drag_duration_ms: u64,
    pub drag_button: MouseButton,
    pub confidence: f32,
    pub grayscale: bool,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            button: MouseButton::Left,
            clicks: 1,
            click_interval_ms: 1000,
            type_interval_ms: 0,
            settle_ms: 2000,
            drag_duration_ms: 500,
            drag_button: MouseButton::Left,
            confidence: 0.8,
            grayscale: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Guard {
    pub denied_targets: Vec<String>,
    pub click_bounds: Option<Bounds>,
    pub max_settle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Bounds {
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
}

impl Bounds {
    fn contains(&self, p: Point) -> bool {
        p.x >= self.x_min && p.x <= self.x_max && p.y >= self.y_min && p.y <= self.y_max
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LocatorConfig {
    /// argv of the external matcher; the target, confidence and grayscale flag are appended.
    pub command: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DesktopConfig {
    pub action_pause_ms: u64,
    pub wheel_delta: i32,
    pub max_wheel_notches: i32,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            action_pause_ms: 100,
            wheel_delta: 120,
            max_wheel_notches: 500,
        }
    }
}

pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or(PathBuf::from("/"))
        .join(DEFAULT_PATH)
}

/// Reads `path`, or `~/.thin-replay/policy.yaml` when `None`. A missing file
/// yields the defaults.
pub fn load(path: Option<&Path>) -> Result<Policy> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_path);
    let mut pol: Policy = if path.exists() {
        let txt = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&txt).with_context(|| format!("parsing {}", path.display()))?
    } else {
        log::debug!("no policy at {}, using defaults", path.display());
        Policy::default()
    };
    pol.run.validate()?;
    pol.run.long_settle_ms = pol.defaults.settle_ms;
    Ok(pol)
}

/// Applies the guard rules to an already valid table.
pub fn vet_table(guard: &Guard, table: &ActionTable) -> Result<(), ConfigError> {
    let mut gb = GlobSetBuilder::new();
    for pat in &guard.denied_targets {
        gb.add(Glob::new(pat)?);
    }
    let denied_set = gb.build()?;

    for step in table.iter() {
        if denied_set.is_match(step.target.as_str()) {
            return Err(ConfigError::DeniedTarget {
                key: step.key.clone(),
                target: step.target.to_string(),
            });
        }
        if let Some(b) = guard.click_bounds.as_ref() {
            for p in step_points(step) {
                if !b.contains(p) {
                    return Err(ConfigError::OutOfBounds {
                        key: step.key.clone(),
                        point: p,
                    });
                }
            }
        }
        if let Some(max) = guard.max_settle_ms {
            if step.settle > Duration::from_millis(max) {
                return Err(ConfigError::SettleTooLong {
                    key: step.key.clone(),
                    ms: step.settle.as_millis(),
                    max,
                });
            }
        }
    }
    Ok(())
}

// Points known before the run: the explicit location and a drag destination.
fn step_points(step: &ActionStep) -> Vec<Point> {
    let mut pts: Vec<Point> = step.location.into_iter().collect();
    if let Interaction::Drag { to, .. } = step.interaction {
        pts.push(to);
    }
    pts
}
