//! Collaborators for `--dry-run`: positions come from a YAML fixture and
//! input actions are only logged.

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::action::{LocateParams, MouseButton, Point, TargetRef};
use crate::adapter::{InputDriver, Locator};
use crate::failsafe::AbortHandle;
use crate::mask::mask_text;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FixtureEntry {
    pub x: i32,
    pub y: i32,
    /// Lookup (1-based) from which the target is visible; earlier lookups miss.
    #[serde(default = "first")]
    pub after: u32,
}

fn first() -> u32 {
    1
}

/// Resolves targets by file stem from a `stem: {x, y, after?}` map.
#[derive(Debug, Default)]
pub struct FixtureLocator {
    entries: HashMap<String, FixtureEntry>,
    lookups: HashMap<String, u32>,
}

impl FixtureLocator {
    pub fn from_yaml(txt: &str) -> Result<Self> {
        let entries: HashMap<String, FixtureEntry> =
            serde_yaml::from_str(txt).context("parsing fixture")?;
        Ok(Self {
            entries,
            lookups: HashMap::new(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&txt).with_context(|| format!("in {}", path.display()))
    }
}

impl Locator for FixtureLocator {
    fn locate(&mut self, target: &TargetRef, _params: &LocateParams) -> Result<Option<Point>> {
        let name = target.name();
        let n = self.lookups.entry(name.to_string()).or_insert(0);
        *n += 1;
        Ok(self
            .entries
            .get(name)
            .filter(|e| *n >= e.after)
            .map(|e| Point::new(e.x, e.y)))
    }
}

/// Logs what a real driver would do. Waits are honoured unless `fast` is set,
/// and always end early on abort.
#[derive(Debug, Clone)]
pub struct DryRunDriver {
    abort: AbortHandle,
    fast: bool,
}

impl DryRunDriver {
    pub fn new(abort: AbortHandle, fast: bool) -> Self {
        Self { abort, fast }
    }
}

impl InputDriver for DryRunDriver {
    fn move_click(&mut self, at: Point, button: MouseButton, count: u32, interval: Duration) -> Result<()> {
        info!("dry-run: click {:?} x{} at {} (interval {:?})", button, count, at, interval);
        Ok(())
    }

    fn move_drag(&mut self, from: Point, to: Point, duration: Duration, button: MouseButton) -> Result<()> {
        info!("dry-run: drag {:?} {} -> {} over {:?}", button, from, to, duration);
        Ok(())
    }

    fn press(&mut self, key: &str) -> Result<()> {
        info!("dry-run: press {}", key);
        Ok(())
    }

    fn hotkey(&mut self, keys: &[&str]) -> Result<()> {
        info!("dry-run: hotkey {}", keys.join("+"));
        Ok(())
    }

    fn type_text(&mut self, text: &str, interval: Duration) -> Result<()> {
        info!("dry-run: type `{}` (interval {:?})", mask_text(text), interval);
        Ok(())
    }

    fn scroll(&mut self, amount: i32) -> Result<()> {
        info!("dry-run: scroll {}", amount);
        Ok(())
    }

    fn wait(&mut self, d: Duration) {
        if !self.fast {
            self.abort.sleep(d);
        }
    }
}
