use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{FailoverBackend, NotificationBackend},
    clock::{Clock, SystemClock},
    config::AlarmConfig,
    error::{AlarmError, Result},
    notifications::{NotificationContent, NotificationId},
    platform::{PermissionProvider, PermissionStatus, StaticPermissions},
    store::{AlarmMetadata, TaskStore},
};

/// Arms backend triggers for tasks and keeps the task→notification bindings.
///
/// Within one call the order is always: cancel the old binding, arm the new
/// trigger, persist the new binding. Nothing is cached between calls; every
/// operation goes back to the store.
pub struct AlarmScheduler {
    store: Arc<TaskStore>,
    backend: Box<dyn NotificationBackend>,
    permissions: Arc<dyn PermissionProvider>,
    clock: Arc<dyn Clock>,
    config: AlarmConfig,
}

pub struct AlarmSchedulerBuilder {
    store: Option<Arc<TaskStore>>,
    backend: Option<Box<dyn NotificationBackend>>,
    permissions: Option<Arc<dyn PermissionProvider>>,
    clock: Option<Arc<dyn Clock>>,
    config: AlarmConfig,
}

impl AlarmSchedulerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            backend: None,
            permissions: None,
            clock: None,
            config: AlarmConfig::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_backend(mut self, backend: Box<dyn NotificationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_config(mut self, config: AlarmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> AlarmScheduler {
        AlarmScheduler {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(TaskStore::in_memory())),
            backend: self
                .backend
                .unwrap_or_else(|| Box::new(FailoverBackend::new(Vec::new()))),
            permissions: self
                .permissions
                .unwrap_or_else(|| Arc::new(StaticPermissions::granted())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
        }
    }
}

impl Default for AlarmSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmScheduler {
    pub fn builder() -> AlarmSchedulerBuilder {
        AlarmSchedulerBuilder::new()
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &AlarmConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Queries the permission state and prompts when it is not yet granted.
    /// Once granted, the backends register their notification channels.
    pub fn request_permissions(&self) -> bool {
        let status = match self.permissions.status() {
            PermissionStatus::Granted => PermissionStatus::Granted,
            _ => self.permissions.request(),
        };
        if status != PermissionStatus::Granted {
            warn!(?status, "notification permission not granted");
            return false;
        }
        if let Err(err) = self.backend.register_channels() {
            warn!(%err, "unable to register notification channels");
        }
        true
    }

    #[instrument(skip(self, title, description))]
    pub fn schedule_alarm(
        &self,
        task_id: &str,
        title: &str,
        description: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId> {
        let now = self.clock.now();
        if fire_at <= now || fire_at - now < self.config.min_lead {
            warn!(%fire_at, %now, "alarm time must be in the future");
            return Err(AlarmError::InvalidTime { fire_at, now });
        }
        if !self.request_permissions() {
            return Err(AlarmError::PermissionDenied);
        }

        self.cancel_alarm(task_id);

        let content = NotificationContent::for_task(task_id, title, description);
        let id = self.backend.arm(task_id, &content, fire_at).map_err(|err| {
            warn!(%err, "no notification backend accepted the alarm");
            AlarmError::from(err)
        })?;

        let metadata = AlarmMetadata {
            notification_id: id.clone(),
            fire_at,
            armed_at: now,
        };
        if let Err(err) = self.store.bind(task_id, metadata) {
            warn!(%err, notification_id = %id, "alarm armed but binding was not persisted");
        }
        info!(notification_id = %id, "alarm scheduled");
        Ok(id)
    }

    /// Drops the backend trigger bound to `task_id` and removes the binding.
    /// The binding is removed even when the backend refuses the cancel.
    #[instrument(skip(self))]
    pub fn cancel_alarm(&self, task_id: &str) {
        match self.store.binding(task_id) {
            Ok(Some(id)) => {
                if let Err(err) = self.backend.cancel(&id) {
                    warn!(notification_id = %id, %err, "backend cancel failed");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "unable to read alarm binding"),
        }
        if let Err(err) = self.store.unbind(task_id) {
            warn!(%err, "unable to remove alarm binding");
        }
    }

    /// Cancels every trigger the backends or the bindings know about and
    /// clears all bindings. Returns how many triggers were cancelled.
    #[instrument(skip(self))]
    pub fn cancel_all_alarms(&self) -> usize {
        let mut ids: BTreeSet<NotificationId> = BTreeSet::new();
        match self.backend.list_active() {
            Ok(active) => ids.extend(active),
            Err(err) => warn!(%err, "unable to list active notifications"),
        }
        match self.store.bindings() {
            Ok(bindings) => ids.extend(bindings.into_values()),
            Err(err) => warn!(%err, "unable to read alarm bindings"),
        }

        let mut cancelled = 0;
        for id in &ids {
            match self.backend.cancel(id) {
                Ok(()) => cancelled += 1,
                Err(err) => warn!(notification_id = %id, %err, "backend cancel failed"),
            }
        }
        if let Err(err) = self.store.clear_bindings() {
            warn!(%err, "unable to clear alarm bindings");
        }
        debug!(cancelled, "all alarms cancelled");
        cancelled
    }

    pub fn active_notifications(&self) -> Result<Vec<NotificationId>> {
        Ok(self.backend.list_active()?)
    }

    pub fn binding_for(&self, task_id: &str) -> Result<Option<NotificationId>> {
        Ok(self.store.binding(task_id)?)
    }

    pub fn alarm_metadata(&self, task_id: &str) -> Result<Option<AlarmMetadata>> {
        Ok(self.store.alarm_metadata(task_id)?)
    }

    /// Removes the binding of an alarm the platform reports as delivered.
    /// The backend is not asked to cancel; the trigger is already gone.
    pub(crate) fn forget_fired(&self, task_id: &str) -> Result<Option<NotificationId>> {
        let id = self.store.binding(task_id)?;
        self.store.unbind(task_id)?;
        Ok(id)
    }
}
