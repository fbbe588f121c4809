use anyhow::Result;
use std::time::Duration;

use crate::action::{LocateParams, MouseButton, Point, TargetRef};

/// Resolves a target to a screen coordinate. Looks only at what is visible now.
pub trait Locator {
    /// `Ok(None)` when nothing clears `params.confidence`; `Err` only when the
    /// locator itself is broken.
    fn locate(&mut self, target: &TargetRef, params: &LocateParams) -> Result<Option<Point>>;
}

/// Physical pointer/keyboard actions. Every call repeats the action; none is idempotent.
pub trait InputDriver {
    fn move_click(&mut self, at: Point, button: MouseButton, count: u32, interval: Duration) -> Result<()>;
    fn move_drag(&mut self, from: Point, to: Point, duration: Duration, button: MouseButton) -> Result<()>;
    fn press(&mut self, key: &str) -> Result<()>;
    fn hotkey(&mut self, keys: &[&str]) -> Result<()>;
    fn type_text(&mut self, text: &str, interval: Duration) -> Result<()>;
    /// Positive scrolls up, negative down.
    fn scroll(&mut self, amount: i32) -> Result<()>;
    /// Blocking settle wait. May return early once the run is aborted.
    fn wait(&mut self, d: Duration);
}

impl<T: Locator + ?Sized> Locator for Box<T> {
    fn locate(&mut self, target: &TargetRef, params: &LocateParams) -> Result<Option<Point>> {
        (**self).locate(target, params)
    }
}

impl<T: InputDriver + ?Sized> InputDriver for Box<T> {
    fn move_click(&mut self, at: Point, button: MouseButton, count: u32, interval: Duration) -> Result<()> {
        (**self).move_click(at, button, count, interval)
    }
    fn move_drag(&mut self, from: Point, to: Point, duration: Duration, button: MouseButton) -> Result<()> {
        (**self).move_drag(from, to, duration, button)
    }
    fn press(&mut self, key: &str) -> Result<()> {
        (**self).press(key)
    }
    fn hotkey(&mut self, keys: &[&str]) -> Result<()> {
        (**self).hotkey(keys)
    }
    fn type_text(&mut self, text: &str, interval: Duration) -> Result<()> {
        (**self).type_text(text, interval)
    }
    fn scroll(&mut self, amount: i32) -> Result<()> {
        (**self).scroll(amount)
    }
    fn wait(&mut self, d: Duration) {
        (**self).wait(d)
    }
}
