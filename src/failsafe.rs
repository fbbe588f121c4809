//! Emergency stop.
//!
//! An [`AbortHandle`] is raised from outside the run (Ctrl-C, pointer parked in
//! the top-left corner) and observed by the engine before every sub-action and
//! by drivers while they wait, so the step in progress unwinds immediately.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(any(feature = "desktop", test))]
use crate::action::Point;
use crate::error::EngineError;

const SLICE: Duration = Duration::from_millis(20);
#[cfg(any(feature = "desktop", test))]
const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    reason: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<Inner>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// First reason wins; later triggers only keep the flag raised.
    pub fn trigger(&self, reason: impl Into<String>) {
        let mut slot = self.inner.reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        self.inner.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_triggered() {
            return Err(EngineError::Aborted(
                self.reason().unwrap_or_else(|| "abort requested".into()),
            ));
        }
        Ok(())
    }

    /// Sleeps for `d` in short slices. Returns `false` when cut short by an abort.
    pub fn sleep(&self, d: Duration) -> bool {
        let deadline = Instant::now() + d;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// Reads where the pointer currently is.
#[cfg(any(feature = "desktop", test))]
pub trait PointerProbe {
    fn position(&mut self) -> Option<Point>;
}

/// Negative coordinates belong to monitors left of or above the primary one.
#[cfg(any(feature = "desktop", test))]
pub fn in_corner(p: Point, corner_px: i32) -> bool {
    (0..corner_px).contains(&p.x) && (0..corner_px).contains(&p.y)
}

/// Background thread raising the abort when the pointer enters the corner.
/// Stops when dropped.
#[cfg(any(feature = "desktop", test))]
pub struct CornerWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

/// `make_probe` runs on the watcher thread, so the probe itself need not be `Send`.
#[cfg(any(feature = "desktop", test))]
pub fn watch_corner<F, P>(make_probe: F, abort: AbortHandle, corner_px: i32) -> CornerWatcher
where
    F: FnOnce() -> Option<P> + Send + 'static,
    P: PointerProbe,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let handle = thread::spawn(move || {
        let Some(mut probe) = make_probe() else {
            log::warn!("fail-safe: pointer probe unavailable, corner watch disabled");
            return;
        };
        while !stop_flag.load(Ordering::SeqCst) && !abort.is_triggered() {
            if let Some(p) = probe.position() {
                if in_corner(p, corner_px) {
                    abort.trigger(format!("fail-safe: pointer entered the screen corner at {p}"));
                    break;
                }
            }
            thread::sleep(POLL);
        }
    });
    CornerWatcher {
        stop,
        handle: Some(handle),
    }
}

#[cfg(any(feature = "desktop", test))]
impl Drop for CornerWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Ctrl-C raises the abort. Can be installed once per process.
pub fn install_ctrlc(abort: AbortHandle) -> Result<()> {
    ctrlc::set_handler(move || abort.trigger("interrupted (Ctrl-C)"))
        .context("installing Ctrl-C handler")
}
