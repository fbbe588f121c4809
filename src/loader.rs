//! Builds an [`ActionTable`] from a script file and a directory of reference images.
//!
//! ```yaml
//! name: pds-import
//! images_dir: refs            # relative to this file
//! variants:
//!   "07": 07_pmv_11           # keep one file for slot 7
//! steps:
//!   02_user:
//!     type_text: "{secret:PDS_USER}"
//!     post_key: tab
//!   09_row:
//!     scroll_on_fail: true
//!     drag: { to_x: 2559, to_y: 771 }
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::{ActionStep, Interaction, KeyAction, MouseButton, Point, StepKey};
use crate::error::ConfigError;
use crate::policy::{self, Policy, StepDefaults};
use crate::table::ActionTable;

const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default)]
    pub name: Option<String>,
    pub images_dir: PathBuf,
    #[serde(default)]
    pub variants: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepOverride>,
}

/// Per-step fields that differ from [`StepDefaults`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepOverride {
    pub button: Option<MouseButton>,
    pub clicks: Option<u32>,
    pub click_interval_ms: Option<u64>,
    pub drag: Option<DragSpec>,
    pub location: Option<Point>,
    pub confidence: Option<f32>,
    pub grayscale: Option<bool>,
    pub pre_key: Option<KeyAction>,
    pub post_key: Option<KeyAction>,
    pub type_text: Option<String>,
    pub type_interval_ms: Option<u64>,
    pub scroll_on_fail: Option<bool>,
    pub skip_on_fail: Option<bool>,
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DragSpec {
    pub to_x: i32,
    pub to_y: i32,
    pub duration_ms: Option<u64>,
    pub button: Option<MouseButton>,
}

/// A reference image found in the images directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub slot: u32,
    pub stem: String,
    pub path: PathBuf,
}

/// Reads, builds, validates and vets the table described by `path`.
pub fn load(path: &Path, policy: &Policy) -> Result<ActionTable, ConfigError> {
    let script = read_script(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut table = build_table(&script, base, &policy.defaults)?;
    if script.name.is_none() {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            table = table.named(stem);
        }
    }
    policy::vet_table(&policy.guard, &table)?;
    Ok(table)
}

pub fn read_script(path: &Path) -> Result<Script, ConfigError> {
    let txt = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

pub fn build_table(script: &Script, base: &Path, defaults: &StepDefaults) -> Result<ActionTable, ConfigError> {
    let dir = base.join(&script.images_dir);
    let candidates = select_variants(scan_images(&dir)?, &script.variants)?;

    let mut by_slot: BTreeMap<u32, Vec<Candidate>> = BTreeMap::new();
    for c in candidates {
        by_slot.entry(c.slot).or_default().push(c);
    }

    let mut overrides: HashMap<&str, &StepOverride> =
        script.steps.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let mut steps = Vec::with_capacity(by_slot.len());
    for (slot, mut group) in by_slot {
        if group.len() > 1 {
            let mut stems: Vec<String> = group.into_iter().map(|c| c.stem).collect();
            stems.sort();
            return Err(ConfigError::AmbiguousSlot { slot, stems });
        }
        let Some(c) = group.pop() else { continue };
        let step = ActionStep::new(StepKey(c.stem), c.path.to_string_lossy(), defaults);
        let step = match overrides.remove(step.key.as_str()) {
            Some(ov) => apply(step, ov, defaults),
            None => step,
        };
        steps.push(step);
    }
    if let Some(stem) = overrides.keys().min() {
        return Err(ConfigError::UnknownStep(stem.to_string()));
    }

    let table = ActionTable::new(steps)?;
    Ok(match &script.name {
        Some(name) => table.named(name.clone()),
        None => table,
    })
}

/// Every image file in `dir`, sorted by stem.
pub fn scan_images(dir: &Path) -> Result<Vec<Candidate>, ConfigError> {
    let io = |source: std::io::Error| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if !path.is_file() || !is_image(&path) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let slot = slot_of(&stem).ok_or_else(|| ConfigError::UnorderedStep(stem.clone()))?;
        out.push(Candidate { slot, stem, path });
    }
    out.sort_by(|a, b| a.stem.cmp(&b.stem));
    Ok(out)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Leading digits of a stem: `07_pmv_11` is slot 7.
pub fn slot_of(stem: &str) -> Option<u32> {
    let end = stem.find(|c: char| !c.is_ascii_digit()).unwrap_or(stem.len());
    stem[..end].parse().ok()
}

fn select_variants(
    candidates: Vec<Candidate>,
    variants: &BTreeMap<String, String>,
) -> Result<Vec<Candidate>, ConfigError> {
    let mut chosen: HashMap<u32, &str> = HashMap::new();
    for (slot_key, stem) in variants {
        let unknown = || ConfigError::UnknownVariant {
            slot: slot_key.clone(),
            stem: stem.clone(),
        };
        let slot = slot_of(slot_key).ok_or_else(unknown)?;
        if !candidates.iter().any(|c| c.slot == slot && &c.stem == stem) {
            return Err(unknown());
        }
        chosen.insert(slot, stem);
    }
    Ok(candidates
        .into_iter()
        .filter(|c| chosen.get(&c.slot).map_or(true, |s| *s == c.stem))
        .collect())
}

fn apply(mut step: ActionStep, ov: &StepOverride, defaults: &StepDefaults) -> ActionStep {
    let interaction = match &ov.drag {
        Some(drag) => Interaction::Drag {
            button: drag.button.or(ov.button).unwrap_or(defaults.drag_button),
            to: Point::new(drag.to_x, drag.to_y),
            duration: Duration::from_millis(drag.duration_ms.unwrap_or(defaults.drag_duration_ms)),
        },
        None => Interaction::Click {
            button: ov.button.unwrap_or(defaults.button),
            count: ov.clicks.unwrap_or(defaults.clicks),
            interval: Duration::from_millis(ov.click_interval_ms.unwrap_or(defaults.click_interval_ms)),
        },
    };
    step = step.with_interaction(interaction);
    if let Some(at) = ov.location {
        step = step.with_location(at);
    }
    if let Some(c) = ov.confidence {
        step.locate.confidence = c;
    }
    if let Some(g) = ov.grayscale {
        step.locate.grayscale = g;
    }
    if let Some(k) = &ov.pre_key {
        step = step.with_pre_key(k.clone());
    }
    if let Some(k) = &ov.post_key {
        step = step.with_post_key(k.clone());
    }
    if let Some(t) = &ov.type_text {
        step = step.with_text(t.clone());
    }
    if let Some(ms) = ov.type_interval_ms {
        step.type_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = ov.settle_ms {
        step = step.with_settle(Duration::from_millis(ms));
    }
    step.scroll_on_fail(ov.scroll_on_fail.unwrap_or(false))
        .skip_on_fail(ov.skip_on_fail.unwrap_or(false))
}
