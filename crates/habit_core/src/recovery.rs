use tracing::{info, instrument, warn};

use crate::{error::AlarmError, scheduler::AlarmScheduler};

#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Task ids whose alarm was armed again.
    pub rescheduled: Vec<String>,
    /// Incomplete tasks whose alarm time already passed or lies closer than
    /// the scheduler's minimum lead. They keep their stale `has_alarm` flag.
    pub skipped_past: Vec<String>,
    /// Completed tasks or tasks without an alarm.
    pub skipped_inactive: usize,
    pub failures: Vec<(String, AlarmError)>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Re-arms every stored, incomplete task whose alarm lies in the future.
///
/// Each task is scheduled independently; a failure is recorded and the loop
/// moves on. Running it again converges on the same bindings because every
/// scheduling call cancels the previous trigger first.
#[instrument(skip(scheduler))]
pub fn reschedule_all(scheduler: &AlarmScheduler) -> RecoveryReport {
    let mut report = RecoveryReport::default();
    let tasks = match scheduler.store().load_tasks() {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(%err, "unable to load tasks for alarm recovery");
            return report;
        }
    };
    let now = scheduler.now();
    let min_lead = scheduler.config().min_lead;

    for task in tasks {
        let Some(fire_at) = task.alarm_time.filter(|_| task.has_alarm && !task.completed) else {
            report.skipped_inactive += 1;
            continue;
        };
        if !task.needs_rearm(now) || fire_at - now < min_lead {
            report.skipped_past.push(task.id);
            continue;
        }
        match scheduler.schedule_alarm(&task.id, &task.title, &task.description, fire_at) {
            Ok(_) => report.rescheduled.push(task.id),
            Err(err) => {
                warn!(task_id = %task.id, %err, "unable to reschedule alarm");
                report.failures.push((task.id, err));
            }
        }
    }

    info!(
        rescheduled = report.rescheduled.len(),
        skipped_past = report.skipped_past.len(),
        failures = report.failures.len(),
        "alarm recovery finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StandardBackend;
    use crate::clock::{Clock, ManualClock};
    use crate::platform::InMemoryNotificationApi;
    use crate::store::{MemoryStore, TaskStore, UnreliableStore};
    use crate::task::Task;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    #[test]
    fn skips_completed_and_unset_alarms() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 10, 20, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(TaskStore::in_memory());
        let api = Arc::new(InMemoryNotificationApi::new());
        let now = clock.now();

        let mut done = Task::new("done", "Done", now);
        done.set_alarm(now + Duration::minutes(5));
        done.completed = true;
        let plain = Task::new("plain", "Plain", now);
        let mut future = Task::new("future", "Future", now);
        future.set_alarm(now + Duration::minutes(5));
        store.save_tasks(&[done, plain, future]).unwrap();

        let scheduler = AlarmScheduler::builder()
            .with_store(store.clone())
            .with_backend(Box::new(StandardBackend::new(api.clone())))
            .with_clock(clock)
            .build();
        let report = reschedule_all(&scheduler);

        assert_eq!(report.rescheduled, vec!["future".to_string()]);
        assert_eq!(report.skipped_inactive, 2);
        assert!(report.is_clean());
        assert_eq!(api.pending().len(), 1);
    }

    #[test]
    fn failures_do_not_stop_the_loop() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 10, 20, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(TaskStore::in_memory());
        let api = Arc::new(InMemoryNotificationApi::new());
        let now = clock.now();
        let tasks: Vec<Task> = ["a", "b", "c"]
            .into_iter()
            .map(|id| {
                let mut task = Task::new(id, id, now);
                task.set_alarm(now + Duration::minutes(1));
                task
            })
            .collect();
        store.save_tasks(&tasks).unwrap();

        // Both attempts for the first task fail; the rest succeed.
        api.fail_next_schedules(2);
        let scheduler = AlarmScheduler::builder()
            .with_store(store)
            .with_backend(Box::new(StandardBackend::new(api.clone())))
            .with_clock(clock)
            .build();
        let report = reschedule_all(&scheduler);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "a");
        assert_eq!(report.rescheduled, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn unreadable_store_yields_empty_report() {
        let api = Arc::new(InMemoryNotificationApi::new());
        let store = TaskStore::new(Box::new(UnreliableStore::failing_reads(MemoryStore::new())));
        let scheduler = AlarmScheduler::builder()
            .with_store(Arc::new(store))
            .with_backend(Box::new(StandardBackend::new(api.clone())))
            .build();
        let report = reschedule_all(&scheduler);

        assert!(report.rescheduled.is_empty());
        assert!(report.skipped_past.is_empty());
        assert_eq!(report.skipped_inactive, 0);
        assert!(report.is_clean());
        assert!(api.pending().is_empty());
    }

    #[test]
    fn alarm_inside_minimum_lead_counts_as_past() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 10, 20, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(TaskStore::in_memory());
        let api = Arc::new(InMemoryNotificationApi::new());
        let now = clock.now();
        let mut imminent = Task::new("imminent", "Imminent", now);
        imminent.set_alarm(now + Duration::milliseconds(500));
        store.save_tasks(&[imminent]).unwrap();

        let scheduler = AlarmScheduler::builder()
            .with_store(store)
            .with_backend(Box::new(StandardBackend::new(api.clone())))
            .with_clock(clock)
            .build();
        let report = reschedule_all(&scheduler);

        assert_eq!(report.skipped_past, vec!["imminent".to_string()]);
        assert!(report.is_clean());
        assert!(api.pending().is_empty());
    }
}
