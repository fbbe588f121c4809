use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, Instant};

use crate::action::StepKey;
use crate::adapter::{InputDriver, Locator};
use crate::error::EngineError;
use crate::events::{LogObserver, RunEvent, RunObserver};
use crate::executor::{LocateMiss, StepExecutor, StepOutcome};
use crate::failsafe::AbortHandle;
use crate::policy::RunPolicy;
use crate::table::ActionTable;
use crate::vault::Vault;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// A step could not be located and was not skippable.
    Failed { key: StepKey },
    /// The fail-safe fired; `key` is the step that was in progress.
    Aborted { key: Option<StepKey>, reason: String },
    /// A collaborator broke (locator, driver, secrets).
    Errored { key: StepKey, message: String },
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed { key } => write!(f, "break at {key}"),
            RunStatus::Aborted { key: Some(key), reason } => write!(f, "aborted at {key}: {reason}"),
            RunStatus::Aborted { key: None, reason } => write!(f, "aborted: {reason}"),
            RunStatus::Errored { key, message } => write!(f, "error at {key}: {message}"),
        }
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub key: StepKey,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miss: Option<LocateMiss>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    /// One record per step that ran to completion, in table order.
    pub steps: Vec<StepRecord>,
    pub status: RunStatus,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.status.is_success()
    }

    #[cfg(test)]
    pub fn outcomes(&self) -> Vec<StepOutcome> {
        self.steps.iter().map(|r| r.outcome).collect()
    }

    /// Step at which the run stopped early, if it did.
    pub fn stopped_at(&self) -> Option<&StepKey> {
        match &self.status {
            RunStatus::Completed => None,
            RunStatus::Failed { key } | RunStatus::Errored { key, .. } => Some(key),
            RunStatus::Aborted { key, .. } => key.as_ref(),
        }
    }
}

/// Drives a table through the executor, one step at a time, stopping at the
/// first failed step or engine error.
pub struct RunController<L, D> {
    locator: L,
    driver: D,
    abort: AbortHandle,
    vault: Vault,
    observer: Box<dyn RunObserver + Send>,
}

impl<L: Locator, D: InputDriver> RunController<L, D> {
    pub fn new(locator: L, driver: D) -> Self {
        Self {
            locator,
            driver,
            abort: AbortHandle::new(),
            vault: Vault::from_env(),
            observer: Box::new(LogObserver),
        }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_vault(mut self, vault: Vault) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_observer(mut self, observer: impl RunObserver + Send + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    #[cfg(test)]
    pub fn locator(&self) -> &L {
        &self.locator
    }

    #[cfg(test)]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn run(&mut self, table: &ActionTable, policy: &RunPolicy) -> RunReport {
        let started_at = Local::now();
        let clock = Instant::now();
        self.observer.on_event(&RunEvent::RunStarted {
            name: table.name().to_string(),
            steps: table.len(),
            at: started_at,
        });

        let mut steps = Vec::with_capacity(table.len());
        let mut status = RunStatus::Completed;
        {
            let mut exec = StepExecutor::new(
                &mut self.locator,
                &mut self.driver,
                &mut *self.observer,
                policy,
                &self.abort,
                &self.vault,
            );
            for (index, step) in table.iter().enumerate() {
                exec.emit(RunEvent::StepStarted {
                    key: step.key.clone(),
                    index,
                });
                let t = Instant::now();
                match exec.execute(step) {
                    Ok(result) => {
                        let duration = t.elapsed();
                        exec.emit(RunEvent::StepFinished {
                            key: step.key.clone(),
                            outcome: result.outcome,
                            elapsed_ms: duration.as_millis() as u64,
                        });
                        steps.push(StepRecord {
                            key: step.key.clone(),
                            outcome: result.outcome,
                            miss: result.miss,
                            duration,
                        });
                        if result.outcome == StepOutcome::Failed {
                            status = RunStatus::Failed {
                                key: step.key.clone(),
                            };
                            break;
                        }
                    }
                    Err(EngineError::Aborted(reason)) => {
                        status = RunStatus::Aborted {
                            key: Some(step.key.clone()),
                            reason,
                        };
                        break;
                    }
                    Err(e) => {
                        status = RunStatus::Errored {
                            key: step.key.clone(),
                            message: e.to_string(),
                        };
                        break;
                    }
                }
            }
        }

        let elapsed = clock.elapsed();
        let finished_at = Local::now();
        self.observer.on_event(&RunEvent::RunFinished {
            status: status.clone(),
            at: finished_at,
            elapsed_ms: elapsed.as_millis() as u64,
        });

        RunReport {
            name: table.name().to_string(),
            steps,
            status,
            started_at,
            finished_at,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionStep, Point};
    use crate::policy::StepDefaults;
    use crate::testing::{Call, RecordingDriver, ScriptedLocator};
    use std::sync::{Arc, Mutex};

    fn step(key: &str) -> ActionStep {
        ActionStep::new(key, format!("/refs/{key}.png"), &StepDefaults::default())
    }

    fn controller(locator: ScriptedLocator) -> RunController<ScriptedLocator, RecordingDriver> {
        RunController::new(locator, RecordingDriver::default())
            .with_vault(Vault::from_pairs(Vec::<(String, String)>::new()))
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<RunEvent>>>);

    impl RunObserver for Shared {
        fn on_event(&mut self, event: &RunEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn skipped_middle_step_keeps_going() {
        let locator = ScriptedLocator::default()
            .always("s1", Point::new(1, 1))
            .always("s3", Point::new(3, 3));
        let table = ActionTable::new(vec![step("s1"), step("s2").skip_on_fail(true), step("s3")]).unwrap();

        let report = controller(locator).run(&table, &RunPolicy::default());
        assert_eq!(
            report.outcomes(),
            vec![StepOutcome::Succeeded, StepOutcome::Skipped, StepOutcome::Succeeded]
        );
        assert!(report.success());
        assert_eq!(report.stopped_at(), None);
        assert_eq!(report.steps[1].miss, Some(LocateMiss::NotFound));
    }

    #[test]
    fn unskippable_miss_stops_the_run() {
        let locator = ScriptedLocator::default().always("s2", Point::new(2, 2));
        let table = ActionTable::new(vec![step("s1"), step("s2")]).unwrap();

        let mut ctl = controller(locator);
        let report = ctl.run(&table, &RunPolicy::default());
        assert_eq!(report.outcomes(), vec![StepOutcome::Failed]);
        assert!(!report.success());
        assert_eq!(report.status, RunStatus::Failed { key: "s1".into() });
        assert_eq!(ctl.locator().calls_for("s2"), 0);
    }

    #[test]
    fn scroll_search_resolves_on_its_third_lookup() {
        // lookup 1 is the direct one; the scroller owns lookups 2..=4
        let locator = ScriptedLocator::default().found_on("row", 4, Point::new(9, 9));
        let table = ActionTable::new(vec![step("row").scroll_on_fail(true)]).unwrap();
        let policy = RunPolicy {
            max_attempts: 5,
            ..RunPolicy::default()
        };

        let mut ctl = controller(locator);
        let report = ctl.run(&table, &policy);
        assert!(report.success());
        assert_eq!(ctl.locator().calls_for("row"), 4);
        assert_eq!(
            ctl.driver().scrolls(),
            vec![policy.reset_scroll, policy.scroll_amount, policy.scroll_amount]
        );
        assert_eq!(ctl.driver().interactions().len(), 1);
    }

    #[test]
    fn executed_steps_end_at_first_failure() {
        // (steps, index of the unskippable miss)
        let cases: Vec<(usize, Option<usize>)> = vec![(1, None), (4, None), (4, Some(0)), (4, Some(2)), (5, Some(4))];
        for (len, fail_at) in cases {
            let mut locator = ScriptedLocator::default();
            let mut steps = Vec::new();
            for i in 0..len {
                let key = format!("k{i}");
                if Some(i) != fail_at {
                    locator = locator.always(&key, Point::new(i as i32, 0));
                }
                steps.push(step(&key));
            }
            let table = ActionTable::new(steps).unwrap();
            let mut ctl = controller(locator);
            let report = ctl.run(&table, &RunPolicy::default());

            let expected = fail_at.map(|i| i + 1).unwrap_or(len);
            assert_eq!(report.steps.len(), expected, "len={len} fail_at={fail_at:?}");
            assert_eq!(ctl.locator().calls.len(), expected);
            assert_eq!(report.success(), fail_at.is_none());
        }
    }

    #[test]
    fn settle_follows_every_step_including_the_failed_one() {
        let locator = ScriptedLocator::default().always("a", Point::new(1, 1));
        let table = ActionTable::new(vec![
            step("a").with_settle(Duration::from_millis(300)),
            step("b").skip_on_fail(true).with_settle(Duration::from_millis(400)),
            step("c").with_settle(Duration::from_millis(500)),
            step("d"),
        ])
        .unwrap();

        let mut ctl = controller(locator);
        let report = ctl.run(&table, &RunPolicy::default());
        assert_eq!(report.stopped_at(), Some(&"c".into()));
        assert_eq!(
            ctl.driver().waits(),
            vec![
                Duration::from_millis(300),
                Duration::from_millis(400),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn identical_collaborators_give_identical_outcomes() {
        let make = || {
            ScriptedLocator::default()
                .always("a", Point::new(1, 1))
                .found_on("b", 2, Point::new(2, 2))
        };
        let table = ActionTable::new(vec![
            step("a"),
            step("b").scroll_on_fail(true),
            step("c").skip_on_fail(true),
            step("d"),
        ])
        .unwrap();
        let policy = RunPolicy::default();

        let first = controller(make()).run(&table, &policy);
        let second = controller(make()).run(&table, &policy);
        assert_eq!(first.outcomes(), second.outcomes());
        assert_eq!(first.status, second.status);
        assert_eq!(
            first.outcomes(),
            vec![StepOutcome::Succeeded, StepOutcome::Succeeded, StepOutcome::Skipped, StepOutcome::Failed]
        );
    }

    #[test]
    fn abort_signal_halts_regardless_of_skip_policy() {
        let locator = ScriptedLocator::default().always("a", Point::new(1, 1));
        let table = ActionTable::new(vec![step("a").skip_on_fail(true), step("b").skip_on_fail(true)]).unwrap();

        let mut driver = RecordingDriver::default();
        let abort = AbortHandle::new();
        driver.abort_on_click = Some(abort.clone());
        let mut ctl = RunController::new(locator, driver)
            .with_abort(abort)
            .with_vault(Vault::from_pairs(Vec::<(String, String)>::new()));

        let report = ctl.run(&table, &RunPolicy::default());
        assert!(report.steps.is_empty());
        assert_eq!(
            report.status,
            RunStatus::Aborted {
                key: Some("a".into()),
                reason: "test abort".into(),
            }
        );
        // the settle of the interrupted step never ran
        assert!(ctl.driver().waits().is_empty());
        assert!(!report.success());
    }

    #[test]
    fn pre_triggered_abort_runs_nothing() {
        let table = ActionTable::new(vec![step("a").with_location(Point::new(1, 1))]).unwrap();
        let abort = AbortHandle::new();
        abort.trigger("operator");
        let mut ctl = controller(ScriptedLocator::default()).with_abort(abort);
        let report = ctl.run(&table, &RunPolicy::default());
        assert!(ctl.driver().calls.is_empty());
        assert!(matches!(report.status, RunStatus::Aborted { .. }));
    }

    #[test]
    fn broken_locator_is_reported_verbatim() {
        let table = ActionTable::new(vec![step("a").skip_on_fail(true), step("b")]).unwrap();
        let mut ctl = controller(ScriptedLocator::default().broken("a"));
        let report = ctl.run(&table, &RunPolicy::default());
        match &report.status {
            RunStatus::Errored { key, message } => {
                assert_eq!(key.as_str(), "a");
                assert!(message.contains("screen capture failed"), "{message}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(ctl.locator().calls.len(), 1);
    }

    #[test]
    fn emits_structured_events_in_order() {
        let shared = Shared::default();
        let table = ActionTable::new(vec![step("a").with_location(Point::new(4, 2))])
            .unwrap()
            .named("demo");
        let mut ctl = controller(ScriptedLocator::default()).with_observer(shared.clone());
        ctl.run(&table, &RunPolicy::default());

        let kinds: Vec<&'static str> = shared
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                RunEvent::RunStarted { .. } => "run_started",
                RunEvent::StepStarted { .. } => "step_started",
                RunEvent::Located { .. } => "located",
                RunEvent::Settling { .. } => "settling",
                RunEvent::StepFinished { .. } => "step_finished",
                RunEvent::RunFinished { .. } => "run_finished",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            ["run_started", "step_started", "located", "settling", "step_finished", "run_finished"]
        );
    }

    #[test]
    fn report_serializes_durations_as_millis() {
        let table = ActionTable::new(vec![step("a").with_location(Point::new(1, 1))]).unwrap();
        let report = controller(ScriptedLocator::default()).run(&table, &RunPolicy::default());
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["status"]["kind"], "completed");
        assert_eq!(v["steps"][0]["outcome"], "succeeded");
        assert!(v["steps"][0]["duration_ms"].is_u64());
        assert!(v["elapsed_ms"].is_u64());
        assert!(v["steps"][0].get("miss").is_none());
    }

    #[test]
    fn explicit_location_steps_click_in_table_order() {
        let table = ActionTable::new(vec![
            step("b").with_location(Point::new(2, 0)),
            step("a").with_location(Point::new(1, 0)),
        ])
        .unwrap();
        let mut ctl = controller(ScriptedLocator::default());
        ctl.run(&table, &RunPolicy::default());
        let xs: Vec<i32> = ctl
            .driver()
            .interactions()
            .iter()
            .filter_map(|c| match c {
                Call::Click { at, .. } => Some(at.x),
                _ => None,
            })
            .collect();
        assert_eq!(xs, vec![2, 1]);
    }
}
