//! Platform collaborators consumed by the notification backends.
//!
//! The traits mirror what a mobile host exposes: a permission prompt, a
//! cross-platform notification scheduler and an optional full-screen alarm
//! module. The in-memory implementations stand in for the host on desktop
//! runs and in tests; they lose every pending trigger when the process
//! exits, which is exactly the situation the recovery routine handles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    error::PlatformError,
    notifications::{ChannelSettings, NotificationContent, NotificationId, ScheduledEntry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

pub trait PermissionProvider: Send + Sync {
    fn status(&self) -> PermissionStatus;
    /// Prompts the user when the status is not yet decided.
    fn request(&self) -> PermissionStatus;
}

/// Cross-platform notification scheduling API.
pub trait NotificationApi: Send + Sync {
    fn set_channel(&self, channel: &ChannelSettings) -> Result<(), PlatformError>;
    fn schedule(
        &self,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, PlatformError>;
    fn cancel(&self, id: &NotificationId) -> Result<(), PlatformError>;
    fn list_scheduled(&self) -> Result<Vec<ScheduledEntry>, PlatformError>;
}

/// Higher-privilege alarm module able to show full-screen notifications over
/// a locked device.
pub trait AlarmModule: Send + Sync {
    fn create_channel(&self, channel: &ChannelSettings) -> Result<(), PlatformError>;
    fn request_permission(&self) -> Result<(), PlatformError>;
    fn create_trigger_notification(
        &self,
        id: &NotificationId,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, PlatformError>;
    fn display_notification(
        &self,
        id: &NotificationId,
        content: &NotificationContent,
    ) -> Result<NotificationId, PlatformError>;
    fn cancel_notification(&self, id: &NotificationId) -> Result<(), PlatformError>;
    fn trigger_notification_ids(&self) -> Result<Vec<NotificationId>, PlatformError>;
}

/// Availability probe for the optional alarm module. `None` means the module
/// is not installed or the platform does not support it.
pub trait AlarmModuleLoader: Send + Sync {
    fn load(&self) -> Option<Arc<dyn AlarmModule>>;
}

impl<F> AlarmModuleLoader for F
where
    F: Fn() -> Option<Arc<dyn AlarmModule>> + Send + Sync,
{
    fn load(&self) -> Option<Arc<dyn AlarmModule>> {
        self()
    }
}

/// Loader for platforms that never ship the alarm module.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAlarmModule;

impl AlarmModuleLoader for NoAlarmModule {
    fn load(&self) -> Option<Arc<dyn AlarmModule>> {
        None
    }
}

#[derive(Debug)]
pub struct StaticPermissions {
    status: Mutex<PermissionStatus>,
    grant_on_request: bool,
}

impl StaticPermissions {
    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted, true)
    }

    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied, false)
    }

    pub fn new(status: PermissionStatus, grant_on_request: bool) -> Self {
        Self {
            status: Mutex::new(status),
            grant_on_request,
        }
    }

    pub fn set(&self, status: PermissionStatus) {
        *self.status.lock() = status;
    }
}

impl PermissionProvider for StaticPermissions {
    fn status(&self) -> PermissionStatus {
        *self.status.lock()
    }

    fn request(&self) -> PermissionStatus {
        let mut status = self.status.lock();
        if *status != PermissionStatus::Granted {
            *status = if self.grant_on_request {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            };
        }
        *status
    }
}

/// Injectable failures shared by the in-memory platform doubles.
#[derive(Debug, Default)]
struct FailureKnobs {
    schedule_failures: AtomicUsize,
    fail_cancel: AtomicBool,
    fail_list: AtomicBool,
}

impl FailureKnobs {
    fn take_schedule_failure(&self) -> bool {
        self.schedule_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

/// Process-local stand-in for the cross-platform notification scheduler.
#[derive(Debug, Default)]
pub struct InMemoryNotificationApi {
    entries: RwLock<BTreeMap<NotificationId, ScheduledEntry>>,
    channels: RwLock<Vec<ChannelSettings>>,
    knobs: FailureKnobs,
}

impl InMemoryNotificationApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` schedule calls fail.
    pub fn fail_next_schedules(&self, count: usize) {
        self.knobs.schedule_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.knobs.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.knobs.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn channels(&self) -> Vec<ChannelSettings> {
        self.channels.read().clone()
    }

    pub fn pending(&self) -> Vec<ScheduledEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Removes and returns every trigger due at `now`, earliest first.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<ScheduledEntry> {
        let mut entries = self.entries.write();
        let due: Vec<NotificationId> = entries
            .values()
            .filter(|entry| entry.fire_at <= now)
            .map(|entry| entry.id.clone())
            .collect();
        let mut fired: Vec<ScheduledEntry> =
            due.iter().filter_map(|id| entries.remove(id)).collect();
        fired.sort_by_key(|entry| entry.fire_at);
        fired
    }
}

impl NotificationApi for InMemoryNotificationApi {
    fn set_channel(&self, channel: &ChannelSettings) -> Result<(), PlatformError> {
        let mut channels = self.channels.write();
        channels.retain(|existing| existing.id != channel.id);
        channels.push(channel.clone());
        Ok(())
    }

    fn schedule(
        &self,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, PlatformError> {
        if self.knobs.take_schedule_failure() {
            return Err(PlatformError::new("scheduler rejected the trigger"));
        }
        let id = NotificationId::new(Uuid::new_v4().to_string());
        self.entries.write().insert(
            id.clone(),
            ScheduledEntry {
                id: id.clone(),
                fire_at,
                content: content.clone(),
            },
        );
        Ok(id)
    }

    fn cancel(&self, id: &NotificationId) -> Result<(), PlatformError> {
        if self.knobs.fail_cancel.load(Ordering::SeqCst) {
            return Err(PlatformError::new(format!("unable to cancel {id}")));
        }
        self.entries.write().remove(id);
        Ok(())
    }

    fn list_scheduled(&self) -> Result<Vec<ScheduledEntry>, PlatformError> {
        if self.knobs.fail_list.load(Ordering::SeqCst) {
            return Err(PlatformError::new("unable to list scheduled notifications"));
        }
        Ok(self.pending())
    }
}

/// Process-local stand-in for the full-screen alarm module.
#[derive(Debug, Default)]
pub struct InMemoryAlarmModule {
    triggers: RwLock<BTreeMap<NotificationId, ScheduledEntry>>,
    displayed: RwLock<Vec<ScheduledEntry>>,
    channels: RwLock<Vec<ChannelSettings>>,
    knobs: FailureKnobs,
}

impl InMemoryAlarmModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_triggers(&self, count: usize) {
        self.knobs.schedule_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.knobs.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn channels(&self) -> Vec<ChannelSettings> {
        self.channels.read().clone()
    }

    pub fn pending(&self) -> Vec<ScheduledEntry> {
        self.triggers.read().values().cloned().collect()
    }

    pub fn displayed(&self) -> Vec<ScheduledEntry> {
        self.displayed.read().clone()
    }

    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<ScheduledEntry> {
        let mut triggers = self.triggers.write();
        let due: Vec<NotificationId> = triggers
            .values()
            .filter(|entry| entry.fire_at <= now)
            .map(|entry| entry.id.clone())
            .collect();
        let mut fired: Vec<ScheduledEntry> =
            due.iter().filter_map(|id| triggers.remove(id)).collect();
        fired.sort_by_key(|entry| entry.fire_at);
        self.displayed.write().extend(fired.iter().cloned());
        fired
    }
}

impl AlarmModule for InMemoryAlarmModule {
    fn create_channel(&self, channel: &ChannelSettings) -> Result<(), PlatformError> {
        let mut channels = self.channels.write();
        channels.retain(|existing| existing.id != channel.id);
        channels.push(channel.clone());
        Ok(())
    }

    fn request_permission(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn create_trigger_notification(
        &self,
        id: &NotificationId,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, PlatformError> {
        if self.knobs.take_schedule_failure() {
            return Err(PlatformError::new("alarm manager refused the trigger"));
        }
        // Same id replaces the pending trigger, as the platform does.
        self.triggers.write().insert(
            id.clone(),
            ScheduledEntry {
                id: id.clone(),
                fire_at,
                content: content.clone(),
            },
        );
        Ok(id.clone())
    }

    fn display_notification(
        &self,
        id: &NotificationId,
        content: &NotificationContent,
    ) -> Result<NotificationId, PlatformError> {
        self.displayed.write().push(ScheduledEntry {
            id: id.clone(),
            fire_at: Utc::now(),
            content: content.clone(),
        });
        Ok(id.clone())
    }

    fn cancel_notification(&self, id: &NotificationId) -> Result<(), PlatformError> {
        if self.knobs.fail_cancel.load(Ordering::SeqCst) {
            return Err(PlatformError::new(format!("unable to cancel {id}")));
        }
        self.triggers.write().remove(id);
        Ok(())
    }

    fn trigger_notification_ids(&self) -> Result<Vec<NotificationId>, PlatformError> {
        Ok(self.triggers.read().keys().cloned().collect())
    }
}
