use std::time::Duration;

use crate::action::{Interaction, LocateParams, Point, StepKey, TargetRef};
use crate::adapter::{InputDriver, Locator};
use crate::error::EngineError;
use crate::events::{LocateSource, RunEvent};
use crate::executor::StepExecutor;
use crate::policy::RunPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollSearch {
    Found { attempt: u32, at: Point },
    Exhausted { attempts: u32 },
}

impl ScrollSearch {
    #[cfg(test)]
    pub fn is_found(&self) -> bool {
        matches!(self, ScrollSearch::Found { .. })
    }
}

/// Scroll-and-look loop for elements outside the visible area.
///
/// Attempt 1 jumps to a fixed end of the view (`reset_scroll`) so every search
/// starts from the same place; later attempts move by `scroll_amount`. Each
/// attempt waits `settle` before looking. The step's interaction runs on the
/// first match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryScroller {
    pub scroll_amount: i32,
    pub reset_scroll: i32,
    pub max_attempts: u32,
    pub settle: Duration,
}

impl RetryScroller {
    pub fn from_policy(policy: &RunPolicy) -> Self {
        Self {
            scroll_amount: policy.scroll_amount,
            reset_scroll: policy.reset_scroll,
            max_attempts: policy.max_attempts,
            settle: policy.retry_settle(),
        }
    }

    pub fn search<L, D>(
        &self,
        exec: &mut StepExecutor<'_, L, D>,
        key: &StepKey,
        target: &TargetRef,
        params: &LocateParams,
        interaction: &Interaction,
    ) -> Result<ScrollSearch, EngineError>
    where
        L: Locator + ?Sized,
        D: InputDriver + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            let amount = if attempt == 1 {
                self.reset_scroll
            } else {
                self.scroll_amount
            };
            exec.emit(RunEvent::Scrolling {
                key: key.clone(),
                attempt,
                amount,
            });
            exec.scroll(amount)?;
            exec.wait(self.settle)?;

            if let Some(at) = exec.locate(target, params)? {
                exec.emit(RunEvent::Located {
                    key: key.clone(),
                    at,
                    source: LocateSource::Scroll { attempt },
                });
                exec.interact(at, interaction)?;
                return Ok(ScrollSearch::Found { attempt, at });
            }
        }
        Ok(ScrollSearch::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::MouseButton;
    use crate::events::RunObserver;
    use crate::failsafe::AbortHandle;
    use crate::testing::{Call, RecordingDriver, ScriptedLocator};
    use crate::vault::Vault;

    const PARAMS: LocateParams = LocateParams {
        confidence: 0.8,
        grayscale: false,
    };

    fn click() -> Interaction {
        Interaction::Click {
            button: MouseButton::Left,
            count: 1,
            interval: Duration::ZERO,
        }
    }

    fn search(
        scroller: RetryScroller,
        locator: &mut ScriptedLocator,
        driver: &mut RecordingDriver,
        interaction: &Interaction,
    ) -> ScrollSearch {
        let policy = RunPolicy::default();
        let abort = AbortHandle::new();
        let vault = Vault::from_pairs(Vec::<(String, String)>::new());
        let mut events: Vec<RunEvent> = Vec::new();
        let obs: &mut dyn RunObserver = &mut events;
        let mut exec = StepExecutor::new(locator, driver, obs, &policy, &abort, &vault);
        let target = TargetRef("row.png".into());
        scroller
            .search(&mut exec, &"row".into(), &target, &PARAMS, interaction)
            .unwrap()
    }

    fn scroller(max_attempts: u32) -> RetryScroller {
        RetryScroller {
            scroll_amount: 500,
            reset_scroll: -100_000_000,
            max_attempts,
            settle: Duration::from_millis(2000),
        }
    }

    #[test]
    fn found_on_third_lookup() {
        let mut locator = ScriptedLocator::default().found_on("row", 3, Point::new(7, 8));
        let mut driver = RecordingDriver::default();
        let r = search(scroller(5), &mut locator, &mut driver, &click());

        assert_eq!(r, ScrollSearch::Found { attempt: 3, at: Point::new(7, 8) });
        assert_eq!(locator.calls.len(), 3);
        assert_eq!(driver.scrolls(), vec![-100_000_000, 500, 500]);
        assert_eq!(driver.interactions().len(), 1);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut locator = ScriptedLocator::default();
        let mut driver = RecordingDriver::default();
        let r = search(scroller(4), &mut locator, &mut driver, &click());

        assert_eq!(r, ScrollSearch::Exhausted { attempts: 4 });
        assert!(!r.is_found());
        assert_eq!(locator.calls.len(), 4);
        assert_eq!(driver.scrolls(), vec![-100_000_000, 500, 500, 500]);
        assert!(driver.interactions().is_empty());
    }

    #[test]
    fn every_attempt_settles_before_looking() {
        let mut locator = ScriptedLocator::default();
        let mut driver = RecordingDriver::default();
        search(scroller(2), &mut locator, &mut driver, &click());
        assert_eq!(
            driver.calls,
            vec![
                Call::Scroll(-100_000_000),
                Call::Wait(Duration::from_millis(2000)),
                Call::Scroll(500),
                Call::Wait(Duration::from_millis(2000)),
            ]
        );
    }

    #[test]
    fn single_attempt_only_resets() {
        let mut locator = ScriptedLocator::default().found_on("row", 1, Point::new(1, 1));
        let mut driver = RecordingDriver::default();
        let r = search(scroller(1), &mut locator, &mut driver, &click());
        assert!(r.is_found());
        assert_eq!(driver.scrolls(), vec![-100_000_000]);
    }

    #[test]
    fn drag_steps_drag_on_match() {
        let mut locator = ScriptedLocator::default().found_on("row", 2, Point::new(3, 4));
        let mut driver = RecordingDriver::default();
        let drag = Interaction::Drag {
            button: MouseButton::Left,
            to: Point::new(100, 100),
            duration: Duration::from_millis(500),
        };
        search(scroller(5), &mut locator, &mut driver, &drag);
        assert_eq!(
            driver.interactions(),
            vec![Call::Drag {
                from: Point::new(3, 4),
                to: Point::new(100, 100),
                duration: Duration::from_millis(500),
                button: MouseButton::Left,
            }]
        );
    }

    #[test]
    fn negative_amount_scrolls_the_other_way() {
        let mut locator = ScriptedLocator::default();
        let mut driver = RecordingDriver::default();
        let s = RetryScroller { scroll_amount: -300, reset_scroll: 100_000_000, ..scroller(3) };
        search(s, &mut locator, &mut driver, &click());
        assert_eq!(driver.scrolls(), vec![100_000_000, -300, -300]);
    }
}
