//! Deterministic stand-ins for the screen and the input devices.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::time::Duration;

use crate::action::{LocateParams, MouseButton, Point, TargetRef};
use crate::adapter::{InputDriver, Locator};
use crate::failsafe::AbortHandle;

#[derive(Debug, Clone)]
enum Script {
    Always(Point),
    /// Resolves from the n-th lookup on.
    FoundOn(u32, Point),
    Broken,
}

/// Answers per target name; targets without a script are never found.
#[derive(Debug, Default, Clone)]
pub struct ScriptedLocator {
    scripts: HashMap<String, Script>,
    seen: HashMap<String, u32>,
    pub calls: Vec<TargetRef>,
}

impl ScriptedLocator {
    pub fn always(mut self, name: &str, at: Point) -> Self {
        self.scripts.insert(name.into(), Script::Always(at));
        self
    }

    pub fn found_on(mut self, name: &str, nth: u32, at: Point) -> Self {
        self.scripts.insert(name.into(), Script::FoundOn(nth, at));
        self
    }

    pub fn broken(mut self, name: &str) -> Self {
        self.scripts.insert(name.into(), Script::Broken);
        self
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.calls.iter().filter(|t| t.name() == name).count()
    }
}

impl Locator for ScriptedLocator {
    fn locate(&mut self, target: &TargetRef, _params: &LocateParams) -> Result<Option<Point>> {
        self.calls.push(target.clone());
        let name = target.name().to_string();
        let n = {
            let seen = self.seen.entry(name.clone()).or_insert(0);
            *seen += 1;
            *seen
        };
        match self.scripts.get(&name) {
            Some(Script::Always(at)) => Ok(Some(*at)),
            Some(Script::FoundOn(nth, at)) if n >= *nth => Ok(Some(*at)),
            Some(Script::Broken) => Err(anyhow!("screen capture failed")),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Click {
        at: Point,
        button: MouseButton,
        count: u32,
        interval: Duration,
    },
    Drag {
        from: Point,
        to: Point,
        duration: Duration,
        button: MouseButton,
    },
    Press(String),
    Hotkey(Vec<String>),
    Type(String, Duration),
    Scroll(i32),
    Wait(Duration),
}

/// Records every call; waits return immediately.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    pub calls: Vec<Call>,
    /// Raises this abort as soon as a click is performed.
    pub abort_on_click: Option<AbortHandle>,
}

impl RecordingDriver {
    pub fn interactions(&self) -> Vec<Call> {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Click { .. } | Call::Drag { .. }))
            .cloned()
            .collect()
    }

    pub fn scrolls(&self) -> Vec<i32> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Scroll(a) => Some(*a),
                _ => None,
            })
            .collect()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Wait(d) => Some(*d),
                _ => None,
            })
            .collect()
    }
}

impl InputDriver for RecordingDriver {
    fn move_click(&mut self, at: Point, button: MouseButton, count: u32, interval: Duration) -> Result<()> {
        self.calls.push(Call::Click {
            at,
            button,
            count,
            interval,
        });
        if let Some(abort) = &self.abort_on_click {
            abort.trigger("test abort");
        }
        Ok(())
    }

    fn move_drag(&mut self, from: Point, to: Point, duration: Duration, button: MouseButton) -> Result<()> {
        self.calls.push(Call::Drag {
            from,
            to,
            duration,
            button,
        });
        Ok(())
    }

    fn press(&mut self, key: &str) -> Result<()> {
        self.calls.push(Call::Press(key.into()));
        Ok(())
    }

    fn hotkey(&mut self, keys: &[&str]) -> Result<()> {
        self.calls
            .push(Call::Hotkey(keys.iter().map(|k| k.to_string()).collect()));
        Ok(())
    }

    fn type_text(&mut self, text: &str, interval: Duration) -> Result<()> {
        self.calls.push(Call::Type(text.into(), interval));
        Ok(())
    }

    fn scroll(&mut self, amount: i32) -> Result<()> {
        self.calls.push(Call::Scroll(amount));
        Ok(())
    }

    fn wait(&mut self, d: Duration) {
        self.calls.push(Call::Wait(d));
    }
}
