//! The periodic evaluation loop.
//!
//! Every tick the scheduler walks the enabled tasks. A task with no
//! `next_run_at` yet is bootstrapped: its next run is computed and persisted
//! without dispatching. A due task is re-checked against its expression at
//! dispatch time, then handed to the dispatcher on a separate tokio task so
//! a slow fleet never delays the tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::cron::{compute_next_run, cron_matches, CronError};
use crate::db::entities::task;
use crate::db::enums::TriggeredBy;
use crate::db::{StoreError, TaskStore};
use crate::scheduler::dispatcher::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    Cron(#[from] CronError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    lookahead_minutes: u32,
}

pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop to stop and waits for the in-flight tick to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<Dispatcher>,
        interval: Duration,
        lookahead_minutes: u32,
    ) -> Self {
        Self {
            store,
            dispatcher,
            interval,
            lookahead_minutes,
        }
    }

    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scheduler = self;
        let handle = tokio::spawn(async move {
            info!(interval = ?scheduler.interval, "Scheduler loop started.");
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.run_tick(Utc::now()).await;
                    }
                    _ = stop_rx.changed() => {
                        info!("Scheduler loop stopping.");
                        break;
                    }
                }
            }
        });
        SchedulerHandle {
            stop: stop_tx,
            handle,
        }
    }

    /// One pass over the enabled tasks. A bad task never breaks the pass for
    /// the others.
    pub async fn run_tick(&self, now: DateTime<Utc>) {
        let tasks = match self.store.list_enabled_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Could not list tasks for the tick.");
                return;
            }
        };
        for task in tasks {
            if let Err(e) = self.evaluate_task(&task, now).await {
                error!(task_id = task.id, error = %e, "Task evaluation failed.");
            }
        }
    }

    async fn evaluate_task(
        &self,
        task: &task::Model,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let Some(next_run) = task.next_run_at else {
            let next_run =
                compute_next_run(now, &task.schedule_expression, self.lookahead_minutes)?;
            self.store
                .update_task_schedule(task.id, None, next_run)
                .await?;
            debug!(task_id = task.id, next_run = %next_run, "Bootstrapped schedule.");
            return Ok(());
        };

        if next_run > now {
            return Ok(());
        }

        // Dispatch-time re-check: a stale or lookahead-capped next_run must
        // not fire a task whose expression does not match this minute.
        if !cron_matches(now, &task.schedule_expression)? {
            debug!(task_id = task.id, "Due timestamp reached but expression does not match, holding.");
            return Ok(());
        }

        info!(task_id = task.id, name = %task.name, "Task is due, dispatching.");
        let dispatcher = self.dispatcher.clone();
        let task_id = task.id;
        tokio::spawn(async move {
            if let Err(e) = dispatcher.execute(task_id, TriggeredBy::Schedule).await {
                error!(task_id, error = %e, "Scheduled dispatch failed.");
            }
        });

        let next_run = compute_next_run(now, &task.schedule_expression, self.lookahead_minutes)?;
        self.store
            .update_task_schedule(task.id, Some(now), next_run)
            .await?;
        Ok(())
    }
}
