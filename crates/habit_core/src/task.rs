use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub has_alarm: bool,
    #[serde(default)]
    pub alarm_time: Option<DateTime<Utc>>,
}

/// Alarm state of a task. `Fired` is inferred from the stored time; nothing
/// records it durably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    NoAlarm,
    Scheduled,
    Fired,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub alarm_time: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_alarm(mut self, fire_at: DateTime<Utc>) -> Self {
        self.alarm_time = Some(fire_at);
        self
    }
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            completed: false,
            created_at,
            has_alarm: false,
            alarm_time: None,
        }
    }

    pub fn alarm_state(&self, now: DateTime<Utc>) -> AlarmState {
        match (self.has_alarm, self.alarm_time) {
            (true, Some(at)) if at > now => AlarmState::Scheduled,
            (true, Some(_)) => AlarmState::Fired,
            _ => AlarmState::NoAlarm,
        }
    }

    /// Whether the recovery routine should re-arm this task.
    pub fn needs_rearm(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.alarm_state(now) == AlarmState::Scheduled
    }

    pub fn set_alarm(&mut self, fire_at: DateTime<Utc>) {
        self.has_alarm = true;
        self.alarm_time = Some(fire_at);
    }

    pub fn clear_alarm(&mut self) {
        self.has_alarm = false;
        self.alarm_time = None;
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.clear_alarm();
    }
}

/// Sample tasks written on first launch when no task list exists yet.
pub fn default_tasks(now: DateTime<Utc>) -> Vec<Task> {
    let seed = [
        ("1", "Read a book", "Read 30 minutes before bed", false),
        ("2", "Exercise", "Go for a 30-minute run", true),
        ("3", "Meditate", "10 minutes of morning meditation", false),
    ];
    seed.into_iter()
        .map(|(id, title, description, completed)| Task {
            description: description.to_string(),
            completed,
            ..Task::new(id, title, now)
        })
        .collect()
}
