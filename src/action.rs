use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::keys;
use crate::policy::StepDefaults;

/// Stable identifier of a step. Table order, not key order, is execution order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepKey(pub String);

impl StepKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepKey {
    fn from(s: &str) -> Self {
        StepKey(s.to_string())
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Opaque handle the Locator knows how to resolve (a reference image path for
/// the bundled locators).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetRef(pub String);

impl TargetRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem of the reference, or the whole reference when it has none.
    pub fn name(&self) -> &str {
        Path::new(&self.0)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// What happens at the resolved location. Fixed per step.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Click {
        button: MouseButton,
        count: u32,
        interval: Duration,
    },
    Drag {
        button: MouseButton,
        to: Point,
        duration: Duration,
    },
}

impl Interaction {
    pub fn label(&self) -> &'static str {
        match self {
            Interaction::Click { .. } => "click",
            Interaction::Drag { .. } => "drag",
        }
    }
}

/// A single key or a chord, decided when the table is built.
///
/// In YAML a string is a single key and a list is a chord:
/// `post_key: enter` / `post_key: [ctrl, c]`. Bare digits are key names too
/// (`post_key: [ctrl, 1]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum KeyAction {
    Single(#[serde(deserialize_with = "key_name")] String),
    Combo(#[serde(deserialize_with = "key_names")] Vec<String>),
}

struct KeyName(String);

impl<'de> Deserialize<'de> for KeyName {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct KeyNameVisitor;

        impl<'de> Visitor<'de> for KeyNameVisitor {
            type Value = KeyName;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a key name")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<KeyName, E> {
                Ok(KeyName(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<KeyName, E> {
                Ok(KeyName(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<KeyName, E> {
                Ok(KeyName(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<KeyName, E> {
                Ok(KeyName(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<KeyName, E> {
                Ok(KeyName(v.to_string()))
            }
        }

        d.deserialize_any(KeyNameVisitor)
    }
}

fn key_name<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    KeyName::deserialize(d).map(|k| k.0)
}

fn key_names<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let names = Vec::<KeyName>::deserialize(d)?;
    Ok(names.into_iter().map(|k| k.0).collect())
}

impl KeyAction {
    pub fn keys(&self) -> Vec<&str> {
        match self {
            KeyAction::Single(k) => vec![k.as_str()],
            KeyAction::Combo(ks) => ks.iter().map(String::as_str).collect(),
        }
    }

    /// Canonical key names; a one-key chord is just a key.
    pub fn normalized(self) -> Self {
        match self {
            KeyAction::Single(k) => KeyAction::Single(keys::canonical(&k)),
            KeyAction::Combo(ks) if ks.len() == 1 => KeyAction::Single(keys::canonical(&ks[0])),
            KeyAction::Combo(ks) => KeyAction::Combo(ks.iter().map(|k| keys::canonical(k)).collect()),
        }
    }
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keys().join("+"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocateParams {
    pub confidence: f32,
    pub grayscale: bool,
}

/// One unit of interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionStep {
    pub key: StepKey,
    pub target: TargetRef,
    pub interaction: Interaction,
    /// Bypasses the Locator when set.
    pub location: Option<Point>,
    pub locate: LocateParams,
    pub pre_key: Option<KeyAction>,
    pub post_key: Option<KeyAction>,
    pub type_text: String,
    pub type_interval: Duration,
    pub scroll_on_fail: bool,
    pub skip_on_fail: bool,
    pub settle: Duration,
}

impl ActionStep {
    /// A click step carrying every default from `defaults`.
    pub fn new(key: impl Into<StepKey>, target: impl Into<String>, defaults: &StepDefaults) -> Self {
        Self {
            key: key.into(),
            target: TargetRef(target.into()),
            interaction: Interaction::Click {
                button: defaults.button,
                count: defaults.clicks,
                interval: Duration::from_millis(defaults.click_interval_ms),
            },
            location: None,
            locate: LocateParams {
                confidence: defaults.confidence,
                grayscale: defaults.grayscale,
            },
            pre_key: None,
            post_key: None,
            type_text: String::new(),
            type_interval: Duration::from_millis(defaults.type_interval_ms),
            scroll_on_fail: false,
            skip_on_fail: false,
            settle: Duration::from_millis(defaults.settle_ms),
        }
    }

    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interaction = interaction;
        self
    }

    pub fn with_location(mut self, at: Point) -> Self {
        self.location = Some(at);
        self
    }

    pub fn with_pre_key(mut self, key: KeyAction) -> Self {
        self.pre_key = Some(key.normalized());
        self
    }

    pub fn with_post_key(mut self, key: KeyAction) -> Self {
        self.post_key = Some(key.normalized());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.type_text = text.into();
        self
    }

    pub fn scroll_on_fail(mut self, on: bool) -> Self {
        self.scroll_on_fail = on;
        self
    }

    pub fn skip_on_fail(mut self, on: bool) -> Self {
        self.skip_on_fail = on;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Checks the per-step invariants. Key uniqueness is the table's job.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.0.trim().is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        let c = self.locate.confidence;
        if !c.is_finite() || !(0.0..=1.0).contains(&c) {
            return Err(ConfigError::Confidence {
                key: self.key.clone(),
                value: c,
            });
        }
        if let Interaction::Click { count: 0, .. } = self.interaction {
            return Err(ConfigError::ClickCount {
                key: self.key.clone(),
            });
        }
        for action in [&self.pre_key, &self.post_key].into_iter().flatten() {
            let names = action.keys();
            if names.is_empty() || names.iter().any(|k| k.trim().is_empty()) {
                return Err(ConfigError::EmptyKeyAction {
                    key: self.key.clone(),
                });
            }
            if let Some(bad) = names.iter().find(|k| !keys::is_known(k)) {
                return Err(ConfigError::UnknownKeyName {
                    key: self.key.clone(),
                    name: bad.to_string(),
                });
            }
        }
        Ok(())
    }
}
