use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ALARM_CHANNEL_ID: &str = "alarm";
pub const ALARM_TITLE: &str = "⏰ Time to Do Your Task!";
pub const ALARM_PAYLOAD_TYPE: &str = "alarm";

/// Backend-issued identifier of a pending trigger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NotificationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Default,
    High,
    Max,
}

/// Data attached to every alarm notification so a tap can find its task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmPayload {
    pub task_id: String,
    pub task_title: String,
    pub task_description: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub data: AlarmPayload,
    pub sound: bool,
    pub channel_id: String,
    pub priority: Priority,
}

impl NotificationContent {
    pub fn for_task(task_id: &str, title: &str, description: &str) -> Self {
        let body = if description.is_empty() {
            format!("NOW: {title}\nIt's time to complete this task!")
        } else {
            format!("NOW: {title}\n{description}")
        };
        Self {
            title: ALARM_TITLE.to_string(),
            body,
            data: AlarmPayload {
                task_id: task_id.to_string(),
                task_title: title.to_string(),
                task_description: description.to_string(),
                kind: ALARM_PAYLOAD_TYPE.to_string(),
            },
            sound: true,
            channel_id: ALARM_CHANNEL_ID.to_string(),
            priority: Priority::Max,
        }
    }

    pub fn is_alarm(&self) -> bool {
        self.data.kind == ALARM_PAYLOAD_TYPE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Importance {
    Default,
    High,
    Max,
}

/// Platform notification channel definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
    pub vibration_pattern: Vec<u64>,
    pub bypass_dnd: bool,
    pub public_on_lockscreen: bool,
}

impl ChannelSettings {
    pub fn alarm() -> Self {
        Self {
            id: ALARM_CHANNEL_ID.to_string(),
            name: "Task Alarms".to_string(),
            description: "Alarms for scheduled tasks".to_string(),
            importance: Importance::Max,
            vibration_pattern: vec![0, 250, 250, 250, 250, 250, 250, 250, 250, 250],
            bypass_dnd: true,
            public_on_lockscreen: true,
        }
    }

    pub fn default_channel() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default".to_string(),
            description: String::new(),
            importance: Importance::High,
            vibration_pattern: vec![0, 250, 250, 250],
            bypass_dnd: false,
            public_on_lockscreen: false,
        }
    }
}

/// A trigger reported by a platform API as still pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEntry {
    pub id: NotificationId,
    pub fire_at: DateTime<Utc>,
    pub content: NotificationContent,
}
