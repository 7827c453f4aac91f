//! Cron-driven scheduler with a single in-flight pipeline run.
//!
//! Every trigger is a tokio task that sleeps until its next fire time in the
//! configured timezone and then spawns the run as a separate task. Stopping
//! a trigger aborts only its sleeper, so a run already in progress finishes.
//!
//! All entry points (timer fires and manual calls) go through one guard
//! that is set with compare-and-swap. A fire that finds it set is logged and
//! dropped; nothing is queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TriggerConfig;
use crate::core::pipeline::{Pipeline, PipelineSummary};
use crate::core::trigger::{time_until, TriggerExpression, TriggerKind};
use crate::core::CollectorError;
use crate::util::now_in;

/// Result of a guarded run request.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run happened.
    Completed(PipelineSummary),
    /// Another run was in progress; nothing was done.
    Skipped,
}

impl RunOutcome {
    /// The summary, if the run happened.
    #[must_use]
    pub const fn summary(&self) -> Option<&PipelineSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            Self::Skipped => None,
        }
    }
}

/// State of one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerStatus {
    /// Trigger name.
    pub name: String,
    /// What the trigger runs.
    pub kind: TriggerKind,
    /// Expression as configured.
    pub expression: String,
    /// Human description including the timezone.
    pub description: String,
    /// Whether the trigger is scheduled.
    pub active: bool,
    /// Next fire time, RFC 3339 in the scheduler timezone.
    pub next_run: Option<String>,
    /// Time until `next_run` ("Xh Ym", "Ym" or "Past due").
    pub time_until: Option<String>,
}

/// Upcoming fire of an active trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextRun {
    /// Trigger name.
    pub name: String,
    /// Fire time, RFC 3339.
    pub at: String,
    /// Time until the fire.
    pub time_until: String,
}

/// Snapshot returned by [`CollectionScheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    /// IANA timezone of the triggers.
    pub timezone: String,
    /// Whether a pipeline run is in progress.
    pub pipeline_running: bool,
    /// Every registered trigger.
    pub triggers: Vec<TriggerStatus>,
    /// Next fires of active triggers, soonest first.
    pub next_runs: Vec<NextRun>,
    /// Runs that went through the guard and finished with a summary.
    pub completed_runs: u64,
    /// Requests dropped because a run was already in flight.
    pub skipped_runs: u64,
}

struct Trigger {
    name: String,
    kind: TriggerKind,
    expression: TriggerExpression,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    pipeline: Arc<Pipeline>,
    timezone: Tz,
    triggers: Mutex<Vec<Trigger>>,
    pipeline_running: AtomicBool,
    last_summary: Mutex<Option<PipelineSummary>>,
    completed_runs: AtomicU64,
    skipped_runs: AtomicU64,
}

/// Clears the running flag when dropped, including on unwind.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the triggers and the run guard for one pipeline.
///
/// Cloning is cheap and every clone controls the same scheduler.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = CollectionScheduler::new(pipeline, &config.triggers, tz)?;
/// scheduler.start();
///
/// match scheduler.trigger_manually().await? {
///     RunOutcome::Completed(summary) => println!("{} phases", summary.phases.len()),
///     RunOutcome::Skipped => println!("already running"),
/// }
/// ```
#[derive(Clone)]
pub struct CollectionScheduler {
    inner: Arc<Inner>,
}

impl CollectionScheduler {
    /// Register `triggers` for `pipeline`. Nothing is scheduled until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// `CollectorError::Config` for an invalid expression or a duplicate
    /// trigger name.
    pub fn new(
        pipeline: Arc<Pipeline>,
        triggers: &[TriggerConfig],
        timezone: Tz,
    ) -> Result<Self, CollectorError> {
        let mut parsed: Vec<Trigger> = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            if parsed.iter().any(|t| t.name == trigger.name) {
                return Err(CollectorError::Config(format!(
                    "duplicate trigger name `{}`",
                    trigger.name
                )));
            }
            parsed.push(Trigger {
                name: trigger.name.clone(),
                kind: trigger.kind,
                expression: TriggerExpression::parse(&trigger.expression)?,
                task: None,
            });
        }

        Ok(Self {
            inner: Arc::new(Inner {
                pipeline,
                timezone,
                triggers: Mutex::new(parsed),
                pipeline_running: AtomicBool::new(false),
                last_summary: Mutex::new(None),
                completed_runs: AtomicU64::new(0),
                skipped_runs: AtomicU64::new(0),
            }),
        })
    }

    /// Activate every trigger. Calling it again only activates triggers
    /// that are not already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut triggers = self.inner.triggers.lock();
        let mut started = 0;
        for trigger in triggers.iter_mut().filter(|t| t.task.is_none()) {
            let inner = Arc::clone(&self.inner);
            let name = trigger.name.clone();
            let expression = trigger.expression.clone();
            let kind = trigger.kind;
            trigger.task = Some(tokio::spawn(trigger_loop(inner, name, kind, expression)));
            info!(
                trigger = %trigger.name,
                kind = %trigger.kind,
                schedule = %trigger.expression.describe(),
                timezone = %self.inner.timezone,
                "trigger scheduled"
            );
            started += 1;
        }

        if started == 0 {
            debug!("scheduler already started");
        } else {
            info!(triggers = started, "scheduler started");
        }
    }

    /// Deactivate every trigger. Runs already in progress finish.
    pub fn stop(&self) {
        let mut triggers = self.inner.triggers.lock();
        let mut stopped = 0;
        for trigger in triggers.iter_mut() {
            if let Some(task) = trigger.task.take() {
                task.abort();
                stopped += 1;
            }
        }
        info!(triggers = stopped, "scheduler stopped");
    }

    /// Stop the triggers and release the worker pool.
    pub async fn shutdown(&self) {
        self.stop();
        self.inner.pipeline.shutdown().await;
    }

    /// Run the full pipeline now, through the same guard as the triggers.
    ///
    /// # Errors
    ///
    /// Propagates a failure to load the identifier list.
    pub async fn trigger_manually(&self) -> Result<RunOutcome, CollectorError> {
        self.inner.run_guarded(TriggerKind::FullPipeline).await
    }

    /// Run `kind` now, through the same guard as the triggers.
    ///
    /// # Errors
    ///
    /// Propagates a failure to load the identifier list.
    pub async fn run_now(&self, kind: TriggerKind) -> Result<RunOutcome, CollectorError> {
        self.inner.run_guarded(kind).await
    }

    /// Whether a pipeline run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.pipeline_running.load(Ordering::Acquire)
    }

    /// Summary of the most recent completed run.
    #[must_use]
    pub fn last_summary(&self) -> Option<PipelineSummary> {
        self.inner.last_summary.lock().clone()
    }

    /// Trigger states and upcoming fire times.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let now = now_in(self.inner.timezone);
        let triggers = self.inner.triggers.lock();

        let mut statuses = Vec::with_capacity(triggers.len());
        let mut upcoming = Vec::new();
        for trigger in triggers.iter() {
            let active = trigger.task.as_ref().is_some_and(|t| !t.is_finished());
            let next = trigger.expression.next_after(&now);
            let until = next.as_ref().map(|n| time_until(n, &now));

            if let (true, Some(next), Some(until)) = (active, next.as_ref(), until.as_ref()) {
                upcoming.push((
                    next.clone(),
                    NextRun {
                        name: trigger.name.clone(),
                        at: next.to_rfc3339(),
                        time_until: until.clone(),
                    },
                ));
            }

            statuses.push(TriggerStatus {
                name: trigger.name.clone(),
                kind: trigger.kind,
                expression: trigger.expression.as_str().to_string(),
                description: format!(
                    "{} ({})",
                    trigger.expression.describe(),
                    self.inner.timezone
                ),
                active,
                next_run: next.map(|n| n.to_rfc3339()),
                time_until: until,
            });
        }
        upcoming.sort_by(|a, b| a.0.cmp(&b.0));

        SchedulerStatus {
            timezone: self.inner.timezone.to_string(),
            pipeline_running: self.is_running(),
            triggers: statuses,
            next_runs: upcoming.into_iter().map(|(_, run)| run).collect(),
            completed_runs: self.inner.completed_runs.load(Ordering::Relaxed),
            skipped_runs: self.inner.skipped_runs.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    async fn run_guarded(&self, kind: TriggerKind) -> Result<RunOutcome, CollectorError> {
        let Some(_guard) = RunGuard::acquire(&self.pipeline_running) else {
            self.skipped_runs.fetch_add(1, Ordering::Relaxed);
            info!(kind = %kind, "pipeline already running, skipping");
            return Ok(RunOutcome::Skipped);
        };

        let summary = match kind {
            TriggerKind::FullPipeline => self.pipeline.run_full().await?,
            TriggerKind::IndicatorRefresh => self.pipeline.run_indicator_refresh().await?,
        };
        *self.last_summary.lock() = Some(summary.clone());
        self.completed_runs.fetch_add(1, Ordering::Relaxed);
        Ok(RunOutcome::Completed(summary))
    }
}

async fn trigger_loop(
    inner: Arc<Inner>,
    name: String,
    kind: TriggerKind,
    expression: TriggerExpression,
) {
    loop {
        let now = now_in(inner.timezone);
        let Some(next) = expression.next_after(&now) else {
            warn!(trigger = %name, "no upcoming fire time, trigger idle");
            return;
        };

        let wait = next
            .clone()
            .signed_duration_since(now)
            .to_std()
            .unwrap_or_default();
        debug!(
            trigger = %name,
            next = %next.to_rfc3339(),
            wait_secs = wait.as_secs(),
            "waiting for next fire"
        );
        tokio::time::sleep(wait).await;

        info!(trigger = %name, kind = %kind, "trigger fired");
        let runner = Arc::clone(&inner);
        let fired_by = name.clone();
        // Detached so that stopping the trigger does not cancel the run.
        tokio::spawn(async move {
            match runner.run_guarded(kind).await {
                Ok(RunOutcome::Completed(summary)) => {
                    info!(trigger = %fired_by, run_id = %summary.run_id, "scheduled run completed");
                }
                Ok(RunOutcome::Skipped) => {}
                Err(err) => error!(trigger = %fired_by, error = %err, "scheduled run failed"),
            }
        });
    }
}
