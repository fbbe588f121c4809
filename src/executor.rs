use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::action::{ActionStep, Interaction, KeyAction, LocateParams, Point, StepKey, TargetRef};
use crate::adapter::{InputDriver, Locator};
use crate::error::EngineError;
use crate::events::{KeyPhase, LocateSource, RunEvent, RunObserver};
use crate::failsafe::AbortHandle;
use crate::policy::RunPolicy;
use crate::scroller::{RetryScroller, ScrollSearch};
use crate::vault::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Skipped,
    /// Unresolved and not skippable: the run stops here.
    Failed,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            StepOutcome::Succeeded => "succeeded",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed => "failed",
        })
    }
}

/// Why a step was not located. Absorbed into the outcome, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocateMiss {
    NotFound,
    RetryExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    pub outcome: StepOutcome,
    pub miss: Option<LocateMiss>,
}

/// Runs one step: pre-key, locate, interact (or scroll search), type, post-key, settle.
///
/// Holds no state between steps; everything it touches is borrowed for the run.
pub struct StepExecutor<'r, L: ?Sized, D: ?Sized> {
    locator: &'r mut L,
    driver: &'r mut D,
    events: &'r mut dyn RunObserver,
    policy: &'r RunPolicy,
    abort: &'r AbortHandle,
    vault: &'r Vault,
}

impl<'r, L, D> StepExecutor<'r, L, D>
where
    L: Locator + ?Sized,
    D: InputDriver + ?Sized,
{
    pub fn new(
        locator: &'r mut L,
        driver: &'r mut D,
        events: &'r mut dyn RunObserver,
        policy: &'r RunPolicy,
        abort: &'r AbortHandle,
        vault: &'r Vault,
    ) -> Self {
        Self {
            locator,
            driver,
            events,
            policy,
            abort,
            vault,
        }
    }

    pub fn execute(&mut self, step: &ActionStep) -> Result<StepResult, EngineError> {
        if let Some(action) = &step.pre_key {
            self.key_action(&step.key, action, KeyPhase::Before)?;
        }

        let mut miss = None;
        let located = match self.resolve(step)? {
            Some((at, source)) => {
                self.emit(RunEvent::Located {
                    key: step.key.clone(),
                    at,
                    source,
                });
                self.interact(at, &step.interaction)?;
                true
            }
            None => {
                self.emit(RunEvent::NotFound {
                    key: step.key.clone(),
                });
                if step.scroll_on_fail {
                    let scroller = RetryScroller::from_policy(self.policy);
                    match scroller.search(self, &step.key, &step.target, &step.locate, &step.interaction)? {
                        ScrollSearch::Found { .. } => true,
                        ScrollSearch::Exhausted { attempts } => {
                            miss = Some(LocateMiss::RetryExhausted { attempts });
                            false
                        }
                    }
                } else {
                    miss = Some(LocateMiss::NotFound);
                    false
                }
            }
        };

        let outcome = match (located, step.skip_on_fail) {
            (true, _) => StepOutcome::Succeeded,
            (false, true) => StepOutcome::Skipped,
            (false, false) => StepOutcome::Failed,
        };

        if located && !step.type_text.is_empty() {
            self.wait(self.policy.type_settle())?;
            self.type_text(step)?;
        }

        // A failed step ends the run; its post key is not sent.
        if outcome != StepOutcome::Failed {
            if let Some(action) = &step.post_key {
                self.key_action(&step.key, action, KeyPhase::After)?;
            }
        }

        self.settle(step)?;
        Ok(StepResult { outcome, miss })
    }

    fn resolve(&mut self, step: &ActionStep) -> Result<Option<(Point, LocateSource)>, EngineError> {
        if let Some(at) = step.location {
            return Ok(Some((at, LocateSource::Explicit)));
        }
        Ok(self
            .locate(&step.target, &step.locate)?
            .map(|at| (at, LocateSource::Locator)))
    }

    pub(crate) fn locate(
        &mut self,
        target: &TargetRef,
        params: &LocateParams,
    ) -> Result<Option<Point>, EngineError> {
        self.abort.check()?;
        let found = self.locator.locate(target, params);
        self.abort.check()?;
        found.map_err(|cause| EngineError::Locator {
            target: target.to_string(),
            cause,
        })
    }

    pub(crate) fn interact(&mut self, at: Point, interaction: &Interaction) -> Result<(), EngineError> {
        match *interaction {
            Interaction::Click {
                button,
                count,
                interval,
            } => self.drive(|d| d.move_click(at, button, count, interval)),
            Interaction::Drag {
                button,
                to,
                duration,
            } => self.drive(|d| d.move_drag(at, to, duration, button)),
        }
    }

    pub(crate) fn scroll(&mut self, amount: i32) -> Result<(), EngineError> {
        self.drive(|d| d.scroll(amount))
    }

    pub(crate) fn wait(&mut self, d: Duration) -> Result<(), EngineError> {
        self.abort.check()?;
        if !d.is_zero() {
            self.driver.wait(d);
            self.abort.check()?;
        }
        Ok(())
    }

    pub(crate) fn emit(&mut self, event: RunEvent) {
        self.events.on_event(&event);
    }

    fn key_action(&mut self, key: &StepKey, action: &KeyAction, phase: KeyPhase) -> Result<(), EngineError> {
        match action {
            KeyAction::Single(k) => self.drive(|d| d.press(k))?,
            KeyAction::Combo(ks) => {
                let keys: Vec<&str> = ks.iter().map(String::as_str).collect();
                self.drive(|d| d.hotkey(&keys))?
            }
        }
        self.emit(RunEvent::KeyPressed {
            key: key.clone(),
            keys: action.to_string(),
            phase,
        });
        self.wait(self.policy.hook_settle())
    }

    fn type_text(&mut self, step: &ActionStep) -> Result<(), EngineError> {
        let text = self.vault.resolve(&step.type_text).map_err(EngineError::Secret)?;
        self.drive(|d| d.type_text(&text, step.type_interval))?;
        self.emit(RunEvent::Typed {
            key: step.key.clone(),
            text: step.type_text.clone(),
        });
        Ok(())
    }

    fn settle(&mut self, step: &ActionStep) -> Result<(), EngineError> {
        self.emit(RunEvent::Settling {
            key: step.key.clone(),
            ms: step.settle.as_millis() as u64,
            long: step.settle > self.policy.long_settle(),
        });
        self.wait(step.settle)
    }

    // An abort raised while the driver was busy wins over whatever the driver returned.
    fn drive<T>(&mut self, f: impl FnOnce(&mut D) -> anyhow::Result<T>) -> Result<T, EngineError> {
        self.abort.check()?;
        let out = f(&mut *self.driver);
        self.abort.check()?;
        out.map_err(EngineError::Driver)
    }
}
