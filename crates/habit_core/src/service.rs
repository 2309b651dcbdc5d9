use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{AlarmError, Result},
    notifications::NotificationId,
    scheduler::AlarmScheduler,
    task::{default_tasks, NewTask, Task},
};

/// Result of creating a task. The task is stored even when its alarm could
/// not be armed; in that case it is stored without an alarm.
#[derive(Debug)]
pub struct AddedTask {
    pub task: Task,
    pub alarm: Option<Result<NotificationId>>,
}

/// Task lifecycle transitions that keep the stored task and its alarm
/// binding consistent.
pub struct TaskService {
    scheduler: AlarmScheduler,
}

impl TaskService {
    pub fn new(scheduler: AlarmScheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &AlarmScheduler {
        &self.scheduler
    }

    pub fn tasks(&self) -> Result<Vec<Task>> {
        Ok(self.scheduler.store().load_tasks()?)
    }

    pub fn task(&self, task_id: &str) -> Result<Task> {
        self.scheduler
            .store()
            .task(task_id)?
            .ok_or_else(|| AlarmError::TaskNotFound(task_id.to_string()))
    }

    /// Writes the sample task list when nothing was ever stored.
    pub fn seed_default_tasks(&self) -> Result<bool> {
        let store = self.scheduler.store();
        if store.load_tasks_raw()?.is_some() {
            return Ok(false);
        }
        store.save_tasks(&default_tasks(self.scheduler.now()))?;
        info!("seeded default tasks");
        Ok(true)
    }

    #[instrument(skip(self, new_task), fields(title = %new_task.title))]
    pub fn add_task(&self, new_task: NewTask) -> Result<AddedTask> {
        let now = self.scheduler.now();
        let mut task = Task::new(Uuid::new_v4().to_string(), new_task.title, now);
        task.description = new_task.description;
        if let Some(fire_at) = new_task.alarm_time {
            task.set_alarm(fire_at);
        }
        let stored = task.clone();
        self.scheduler
            .store()
            .update_tasks(move |tasks| tasks.push(stored))?;

        let alarm = new_task
            .alarm_time
            .map(|fire_at| self.arm(&task.id, fire_at, true));
        let task = self.task(&task.id)?;
        Ok(AddedTask { task, alarm })
    }

    /// Sets or moves the alarm of an incomplete task. The time must respect
    /// the configured safety margin.
    pub fn set_alarm(&self, task_id: &str, fire_at: DateTime<Utc>) -> Result<NotificationId> {
        self.arm(task_id, fire_at, true)
    }

    /// Pushes the alarm `minutes` from now, rounded down to the whole minute.
    pub fn snooze(&self, task_id: &str, minutes: u32) -> Result<NotificationId> {
        self.task(task_id)?;
        let now = self.scheduler.now();
        let fire_at = now
            .checked_add_signed(Duration::minutes(i64::from(minutes)))
            .and_then(|at| at.with_second(0))
            .and_then(|at| at.with_nanosecond(0))
            .filter(|_| minutes > 0)
            .ok_or(AlarmError::InvalidTime { fire_at: now, now })?;
        debug!(%task_id, minutes, %fire_at, "snoozing alarm");
        self.arm(task_id, fire_at, false)
    }

    /// Returns whether the task had an alarm.
    pub fn cancel_task_alarm(&self, task_id: &str) -> Result<bool> {
        self.scheduler.cancel_alarm(task_id);
        let had_alarm = self.scheduler.store().update_tasks(|tasks| {
            tasks
                .iter_mut()
                .find(|task| task.id == task_id)
                .map(|task| {
                    let had = task.has_alarm;
                    task.clear_alarm();
                    had
                })
                .unwrap_or(false)
        })?;
        Ok(had_alarm)
    }

    pub fn complete_task(&self, task_id: &str) -> Result<Task> {
        self.set_completed(task_id, true)
    }

    pub fn toggle_completion(&self, task_id: &str) -> Result<Task> {
        let completed = self.task(task_id)?.completed;
        self.set_completed(task_id, !completed)
    }

    /// Cancels the task's alarm and removes the task. The binding is gone
    /// afterwards even if the backend refused the cancel.
    #[instrument(skip(self))]
    pub fn delete_task(&self, task_id: &str) -> Result<bool> {
        self.scheduler.cancel_alarm(task_id);
        let removed = self.scheduler.store().update_tasks(|tasks| {
            let before = tasks.len();
            tasks.retain(|task| task.id != task_id);
            before != tasks.len()
        })?;
        Ok(removed)
    }

    /// Records that the platform delivered the alarm for `task_id`: the
    /// binding is dropped and the task returns to having no alarm.
    #[instrument(skip(self))]
    pub fn handle_alarm_fired(&self, task_id: &str) -> Result<Option<Task>> {
        let fired = self.scheduler.forget_fired(task_id)?;
        debug!(notification_id = ?fired, "alarm delivered");
        let task = self.scheduler.store().update_tasks(|tasks| {
            tasks.iter_mut().find(|task| task.id == task_id).map(|task| {
                task.clear_alarm();
                task.clone()
            })
        })?;
        Ok(task)
    }

    /// Incomplete tasks whose alarm is still ahead.
    pub fn tasks_with_alarms(&self) -> Result<Vec<Task>> {
        let now = self.scheduler.now();
        Ok(self
            .tasks()?
            .into_iter()
            .filter(|task| task.needs_rearm(now))
            .collect())
    }

    fn set_completed(&self, task_id: &str, completed: bool) -> Result<Task> {
        if completed {
            self.scheduler.cancel_alarm(task_id);
        }
        self.scheduler
            .store()
            .update_tasks(|tasks| {
                tasks.iter_mut().find(|task| task.id == task_id).map(|task| {
                    if completed {
                        task.mark_completed();
                    } else {
                        task.completed = false;
                    }
                    task.clone()
                })
            })?
            .ok_or_else(|| AlarmError::TaskNotFound(task_id.to_string()))
    }

    fn arm(
        &self,
        task_id: &str,
        fire_at: DateTime<Utc>,
        enforce_margin: bool,
    ) -> Result<NotificationId> {
        let task = self.task(task_id)?;
        if task.completed {
            debug!(%task_id, "refusing alarm for completed task");
            return Err(AlarmError::TaskCompleted(task.id));
        }
        let now = self.scheduler.now();
        if enforce_margin && fire_at < now + self.scheduler.config().safety_margin {
            let err = AlarmError::InvalidTime { fire_at, now };
            self.sync_task_with_binding(task_id, None)?;
            return Err(err);
        }

        match self
            .scheduler
            .schedule_alarm(task_id, &task.title, &task.description, fire_at)
        {
            Ok(id) => {
                self.sync_task_with_binding(task_id, Some(fire_at))?;
                Ok(id)
            }
            Err(err) => {
                warn!(%task_id, %err, "alarm not armed");
                self.sync_task_with_binding(task_id, None)?;
                Err(err)
            }
        }
    }

    /// Makes the task's alarm fields reflect the stored binding. `armed_at`
    /// is the time just armed; otherwise the fields survive only while a
    /// binding still exists.
    fn sync_task_with_binding(
        &self,
        task_id: &str,
        armed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let still_bound = self.scheduler.binding_for(task_id)?.is_some();
        self.scheduler.store().update_tasks(|tasks| {
            let Some(task) = tasks.iter_mut().find(|task| task.id == task_id) else {
                return;
            };
            match armed_at {
                Some(fire_at) => task.set_alarm(fire_at),
                None if still_bound => {}
                None => task.clear_alarm(),
            }
        })?;
        Ok(())
    }
}
