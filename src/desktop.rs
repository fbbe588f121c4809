//! Real input injection through `enigo`. Built with `--features desktop`.

use anyhow::{anyhow, bail, Result};
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use std::time::{Duration, Instant};

use crate::action::{MouseButton, Point};
use crate::adapter::InputDriver;
use crate::failsafe::{AbortHandle, PointerProbe};
use crate::keys;
use crate::policy::DesktopConfig;

const DRAG_STEP: Duration = Duration::from_millis(10);

pub struct DesktopDriver {
    enigo: Enigo,
    abort: AbortHandle,
    pause: Duration,
    wheel_delta: i32,
    max_notches: i32,
}

impl DesktopDriver {
    pub fn new(cfg: &DesktopConfig, abort: AbortHandle) -> Result<Self> {
        let enigo = Enigo::new(&Settings::default()).map_err(|e| anyhow!("input simulator unavailable: {e}"))?;
        Ok(Self {
            enigo,
            abort,
            pause: Duration::from_millis(cfg.action_pause_ms),
            wheel_delta: cfg.wheel_delta.max(1),
            max_notches: cfg.max_wheel_notches.max(1),
        })
    }

    fn after_action(&self) {
        if !self.pause.is_zero() {
            self.abort.sleep(self.pause);
        }
    }

    fn move_to(&mut self, p: Point) -> Result<()> {
        self.enigo
            .move_mouse(p.x, p.y, Coordinate::Abs)
            .map_err(|e| anyhow!("move to {p}: {e}"))
    }

    fn key(&mut self, key: Key, dir: Direction) -> Result<()> {
        self.enigo.key(key, dir).map_err(|e| anyhow!("key {key:?}: {e}"))
    }
}

impl InputDriver for DesktopDriver {
    fn move_click(&mut self, at: Point, button: MouseButton, count: u32, interval: Duration) -> Result<()> {
        self.move_to(at)?;
        for i in 0..count {
            self.enigo
                .button(button_of(button), Direction::Click)
                .map_err(|e| anyhow!("click at {at}: {e}"))?;
            if i + 1 < count && !self.abort.sleep(interval) {
                break;
            }
        }
        self.after_action();
        Ok(())
    }

    fn move_drag(&mut self, from: Point, to: Point, duration: Duration, button: MouseButton) -> Result<()> {
        self.move_to(from)?;
        let b = button_of(button);
        self.enigo
            .button(b, Direction::Press)
            .map_err(|e| anyhow!("press at {from}: {e}"))?;
        let start = Instant::now();
        let result = loop {
            let t = if duration.is_zero() {
                1.0
            } else {
                (start.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0)
            };
            if let Err(e) = self.move_to(lerp(from, to, t)) {
                break Err(e);
            }
            if t >= 1.0 || !self.abort.sleep(DRAG_STEP) {
                break Ok(());
            }
        };
        // release even when the move failed or an abort cut the drag short
        self.enigo
            .button(b, Direction::Release)
            .map_err(|e| anyhow!("release at {to}: {e}"))?;
        result?;
        self.after_action();
        Ok(())
    }

    fn press(&mut self, key: &str) -> Result<()> {
        let k = key_of(key)?;
        self.key(k, Direction::Click)?;
        self.after_action();
        Ok(())
    }

    fn hotkey(&mut self, names: &[&str]) -> Result<()> {
        let ks = names.iter().map(|n| key_of(n)).collect::<Result<Vec<_>>>()?;
        for k in &ks {
            self.key(*k, Direction::Press)?;
        }
        for k in ks.iter().rev() {
            self.key(*k, Direction::Release)?;
        }
        self.after_action();
        Ok(())
    }

    fn type_text(&mut self, text: &str, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            self.enigo.text(text).map_err(|e| anyhow!("typing failed: {e}"))?;
        } else {
            for c in text.chars() {
                self.key(Key::Unicode(c), Direction::Click)?;
                if !self.abort.sleep(interval) {
                    break;
                }
            }
        }
        self.after_action();
        Ok(())
    }

    fn scroll(&mut self, amount: i32) -> Result<()> {
        let notches = wheel_notches(amount, self.wheel_delta, self.max_notches);
        if notches != 0 {
            // enigo scrolls down for positive lengths
            self.enigo
                .scroll(-notches, Axis::Vertical)
                .map_err(|e| anyhow!("scroll {amount}: {e}"))?;
        }
        self.after_action();
        Ok(())
    }

    fn wait(&mut self, d: Duration) {
        self.abort.sleep(d);
    }
}

/// Reads the pointer position for the corner watcher. Owns its own connection.
pub struct DesktopProbe {
    enigo: Enigo,
}

impl DesktopProbe {
    pub fn new() -> Option<Self> {
        Enigo::new(&Settings::default()).ok().map(|enigo| Self { enigo })
    }
}

impl PointerProbe for DesktopProbe {
    fn position(&mut self) -> Option<Point> {
        self.enigo.location().ok().map(|(x, y)| Point::new(x, y))
    }
}

fn button_of(b: MouseButton) -> Button {
    match b {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
        MouseButton::Middle => Button::Middle,
    }
}

/// Wheel notches for a scroll amount in wheel units; at least one notch for
/// any non-zero amount, never more than `max`.
fn wheel_notches(amount: i32, delta: i32, max: i32) -> i32 {
    if amount == 0 {
        return 0;
    }
    let n = (amount.unsigned_abs() / delta.unsigned_abs()).max(1).min(max.unsigned_abs()) as i32;
    n * amount.signum()
}

fn lerp(a: Point, b: Point, t: f64) -> Point {
    let f = |p: i32, q: i32| p + ((q - p) as f64 * t).round() as i32;
    Point::new(f(a.x, b.x), f(a.y, b.y))
}

fn key_of(name: &str) -> Result<Key> {
    let n = keys::canonical(name);
    let mut chars = n.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(Key::Unicode(c));
    }
    let k = match n.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "capslock" => Key::CapsLock,
        "ctrl" | "control" => Key::Control,
        "shift" => Key::Shift,
        "alt" | "option" => Key::Alt,
        "cmd" | "command" | "win" | "super" | "meta" => Key::Meta,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        other => bail!("key `{other}` is not supported by the desktop driver"),
    };
    Ok(k)
}
