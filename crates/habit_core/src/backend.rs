use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    error::BackendError,
    notifications::{ChannelSettings, NotificationContent, NotificationId},
    platform::{AlarmModule, AlarmModuleLoader, NotificationApi},
};

/// A mechanism able to arm and drop time-based notification triggers.
pub trait NotificationBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn arm(
        &self,
        task_id: &str,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, BackendError>;
    /// Dropping an id the backend no longer knows about is not an error.
    fn cancel(&self, id: &NotificationId) -> Result<(), BackendError>;
    fn list_active(&self) -> Result<Vec<NotificationId>, BackendError>;
    /// Registers the notification channels this backend posts to. Called once
    /// permission is granted.
    fn register_channels(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Full-screen alarms through the optional platform alarm module.
///
/// The module is probed on every call until one probe succeeds; the loaded
/// module is then kept for the life of the backend.
pub struct FullPriorityBackend {
    loader: Box<dyn AlarmModuleLoader>,
    module: OnceCell<Arc<dyn AlarmModule>>,
    clock: Arc<dyn Clock>,
}

impl FullPriorityBackend {
    pub const NAME: &'static str = "full-priority";

    pub fn new(loader: Box<dyn AlarmModuleLoader>, clock: Arc<dyn Clock>) -> Self {
        Self {
            loader,
            module: OnceCell::new(),
            clock,
        }
    }

    pub fn trigger_id(task_id: &str) -> NotificationId {
        NotificationId::new(format!("alarm-{task_id}"))
    }

    /// Shows the alarm immediately instead of at a trigger time.
    pub fn display_now(
        &self,
        task_id: &str,
        content: &NotificationContent,
    ) -> Result<NotificationId, BackendError> {
        let module = self.module()?;
        self.prepare(module.as_ref())?;
        let id = NotificationId::new(format!("alarm-now-{task_id}"));
        module
            .display_notification(&id, content)
            .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))
    }

    fn module(&self) -> Result<Arc<dyn AlarmModule>, BackendError> {
        if let Some(module) = self.module.get() {
            return Ok(module.clone());
        }
        let Some(module) = self.loader.load() else {
            debug!("alarm module not installed on this platform");
            return Err(BackendError::Unavailable {
                backend: Self::NAME,
            });
        };
        Ok(self.module.get_or_init(|| module).clone())
    }

    fn prepare(&self, module: &dyn AlarmModule) -> Result<(), BackendError> {
        module
            .create_channel(&ChannelSettings::alarm())
            .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))?;
        if let Err(err) = module.request_permission() {
            debug!(%err, "alarm module permission request failed");
        }
        Ok(())
    }
}

impl NotificationBackend for FullPriorityBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn arm(
        &self,
        task_id: &str,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, BackendError> {
        let module = self.module()?;
        if fire_at <= self.clock.now() {
            return Err(BackendError::call_failed(
                Self::NAME,
                "fire time is not in the future",
            ));
        }
        self.prepare(module.as_ref())?;
        module
            .create_trigger_notification(&Self::trigger_id(task_id), content, fire_at)
            .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))
    }

    fn cancel(&self, id: &NotificationId) -> Result<(), BackendError> {
        self.module()?
            .cancel_notification(id)
            .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))
    }

    fn list_active(&self) -> Result<Vec<NotificationId>, BackendError> {
        self.module()?
            .trigger_notification_ids()
            .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))
    }
}

/// Best-effort scheduling through the cross-platform notification API.
pub struct StandardBackend {
    api: Arc<dyn NotificationApi>,
}

impl StandardBackend {
    pub const NAME: &'static str = "standard";

    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        Self { api }
    }

    fn schedule_once(
        &self,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, BackendError> {
        let id = self
            .api
            .schedule(content, fire_at)
            .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))?;
        if id.as_str().is_empty() {
            return Err(BackendError::call_failed(
                Self::NAME,
                "scheduler returned an empty identifier",
            ));
        }
        Ok(id)
    }
}

impl NotificationBackend for StandardBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn arm(
        &self,
        _task_id: &str,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, BackendError> {
        if let Err(err) = self.api.set_channel(&ChannelSettings::alarm()) {
            warn!(%err, "unable to register alarm channel");
        }
        match self.schedule_once(content, fire_at) {
            Ok(id) => Ok(id),
            Err(first) => {
                warn!(err = %first, "schedule failed, retrying once");
                self.schedule_once(content, fire_at).map_err(|_| first)
            }
        }
    }

    fn cancel(&self, id: &NotificationId) -> Result<(), BackendError> {
        self.api
            .cancel(id)
            .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))
    }

    fn list_active(&self) -> Result<Vec<NotificationId>, BackendError> {
        let entries = self
            .api
            .list_scheduled()
            .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))?;
        Ok(entries.into_iter().map(|entry| entry.id).collect())
    }

    fn register_channels(&self) -> Result<(), BackendError> {
        for channel in [ChannelSettings::alarm(), ChannelSettings::default_channel()] {
            self.api
                .set_channel(&channel)
                .map_err(|err| BackendError::call_failed(Self::NAME, err.to_string()))?;
        }
        Ok(())
    }
}

/// Tries each backend in preference order within the same call. Callers only
/// see the resulting identifier or the last backend's failure.
pub struct FailoverBackend {
    backends: Vec<Box<dyn NotificationBackend>>,
}

impl FailoverBackend {
    pub const NAME: &'static str = "failover";

    pub fn new(backends: Vec<Box<dyn NotificationBackend>>) -> Self {
        Self { backends }
    }

    /// Full-priority first, standard as fallback.
    pub fn full_then_standard(full: FullPriorityBackend, standard: StandardBackend) -> Self {
        Self::new(vec![Box::new(full), Box::new(standard)])
    }

    fn no_backends() -> BackendError {
        BackendError::Unavailable {
            backend: Self::NAME,
        }
    }
}

impl NotificationBackend for FailoverBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn arm(
        &self,
        task_id: &str,
        content: &NotificationContent,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationId, BackendError> {
        let mut last_err = Self::no_backends();
        for backend in &self.backends {
            match backend.arm(task_id, content, fire_at) {
                Ok(id) => {
                    debug!(
                        backend = backend.name(),
                        %task_id,
                        notification_id = %id,
                        "trigger armed"
                    );
                    return Ok(id);
                }
                Err(err) => {
                    debug!(
                        backend = backend.name(),
                        %task_id,
                        %err,
                        "falling back to next backend"
                    );
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    fn cancel(&self, id: &NotificationId) -> Result<(), BackendError> {
        // The id may belong to any backend, so every available one is told.
        let mut cancelled = false;
        let mut failure = None;
        for backend in &self.backends {
            match backend.cancel(id) {
                Ok(()) => cancelled = true,
                Err(err) if err.is_unavailable() => {}
                Err(err) => {
                    debug!(backend = backend.name(), notification_id = %id, %err, "cancel failed");
                    failure = Some(err);
                }
            }
        }
        match (failure, cancelled) {
            (Some(err), _) => Err(err),
            (None, true) => Ok(()),
            (None, false) => Err(Self::no_backends()),
        }
    }

    fn list_active(&self) -> Result<Vec<NotificationId>, BackendError> {
        let mut active = BTreeSet::new();
        let mut answered = false;
        let mut failure = None;
        for backend in &self.backends {
            match backend.list_active() {
                Ok(ids) => {
                    answered = true;
                    active.extend(ids);
                }
                Err(err) if err.is_unavailable() => {}
                Err(err) => failure = Some(err),
            }
        }
        match (answered, failure) {
            (false, Some(err)) => Err(err),
            _ => Ok(active.into_iter().collect()),
        }
    }

    fn register_channels(&self) -> Result<(), BackendError> {
        let mut failure = None;
        for backend in &self.backends {
            match backend.register_channels() {
                Ok(()) => {}
                Err(err) if err.is_unavailable() => {}
                Err(err) => failure = Some(err),
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::platform::{InMemoryAlarmModule, InMemoryNotificationApi, NoAlarmModule};
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 10, 20, 9, 0, 0).unwrap(),
        ))
    }

    fn loader_for(module: Arc<InMemoryAlarmModule>) -> Box<dyn AlarmModuleLoader> {
        Box::new(move || Some(module.clone() as Arc<dyn AlarmModule>))
    }

    #[test]
    fn full_priority_uses_task_scoped_trigger_id() {
        let clock = clock();
        let module = Arc::new(InMemoryAlarmModule::new());
        let backend = FullPriorityBackend::new(loader_for(module.clone()), clock.clone());
        let content = NotificationContent::for_task("7", "Stretch", "");

        let id = backend
            .arm("7", &content, clock.now() + Duration::minutes(5))
            .unwrap();
        assert_eq!(id.as_str(), "alarm-7");
        assert_eq!(module.pending().len(), 1);
        assert!(module.channels().iter().any(|c| c.id == "alarm"));

        let err = backend.arm("7", &content, clock.now()).unwrap_err();
        assert!(matches!(err, BackendError::CallFailed { .. }));
    }

    #[test]
    fn display_now_shows_immediately() {
        let clock = clock();
        let module = Arc::new(InMemoryAlarmModule::new());
        let backend = FullPriorityBackend::new(loader_for(module.clone()), clock);
        let content = NotificationContent::for_task("3", "Meditate", "");
        let id = backend.display_now("3", &content).unwrap();
        assert_eq!(id.as_str(), "alarm-now-3");
        assert_eq!(module.displayed().len(), 1);
        assert!(module.pending().is_empty());
    }

    #[test]
    fn missing_module_is_unavailable_and_reprobed() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        let loader = move || -> Option<Arc<dyn AlarmModule>> {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        };
        let clock = clock();
        let backend = FullPriorityBackend::new(Box::new(loader), clock.clone());
        let content = NotificationContent::for_task("1", "Read", "");
        for _ in 0..2 {
            let err = backend
                .arm("1", &content, clock.now() + Duration::minutes(1))
                .unwrap_err();
            assert!(err.is_unavailable());
        }
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn successful_probe_is_cached() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        let module: Arc<dyn AlarmModule> = Arc::new(InMemoryAlarmModule::new());
        let loader = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(module.clone())
        };
        let clock = clock();
        let backend = FullPriorityBackend::new(Box::new(loader), clock.clone());
        let content = NotificationContent::for_task("1", "Read", "");
        backend
            .arm("1", &content, clock.now() + Duration::minutes(1))
            .unwrap();
        backend.list_active().unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn standard_backend_retries_once() {
        let api = Arc::new(InMemoryNotificationApi::new());
        let backend = StandardBackend::new(api.clone());
        let content = NotificationContent::for_task("1", "Read", "");
        let at = Utc::now() + Duration::minutes(1);

        api.fail_next_schedules(1);
        assert!(backend.arm("1", &content, at).is_ok());

        api.fail_next_schedules(2);
        assert!(backend.arm("1", &content, at).is_err());
        assert_eq!(api.pending().len(), 1);
    }

    #[test]
    fn failover_falls_back_when_full_priority_throws() {
        let clock = clock();
        let module = Arc::new(InMemoryAlarmModule::new());
        module.fail_next_triggers(1);
        let api = Arc::new(InMemoryNotificationApi::new());
        let backend = FailoverBackend::full_then_standard(
            FullPriorityBackend::new(loader_for(module.clone()), clock.clone()),
            StandardBackend::new(api.clone()),
        );
        let content = NotificationContent::for_task("1", "Read", "");

        let id = backend
            .arm("1", &content, clock.now() + Duration::minutes(1))
            .unwrap();
        assert!(!id.as_str().is_empty());
        assert_eq!(api.pending().len(), 1);
        assert!(module.pending().is_empty());
    }

    #[test]
    fn failover_cancel_and_list_skip_unavailable_backends() {
        let clock = clock();
        let api = Arc::new(InMemoryNotificationApi::new());
        let backend = FailoverBackend::full_then_standard(
            FullPriorityBackend::new(Box::new(NoAlarmModule), clock.clone()),
            StandardBackend::new(api.clone()),
        );
        let content = NotificationContent::for_task("1", "Read", "");
        let id = backend
            .arm("1", &content, clock.now() + Duration::minutes(1))
            .unwrap();
        assert_eq!(backend.list_active().unwrap(), vec![id.clone()]);

        backend.cancel(&id).unwrap();
        assert!(backend.list_active().unwrap().is_empty());

        api.fail_cancels(true);
        assert!(matches!(
            backend.cancel(&id),
            Err(BackendError::CallFailed { .. })
        ));
    }

    #[test]
    fn failover_list_reports_what_answering_backends_hold() {
        let clock = clock();
        let module = Arc::new(InMemoryAlarmModule::new());
        let api = Arc::new(InMemoryNotificationApi::new());
        let backend = FailoverBackend::full_then_standard(
            FullPriorityBackend::new(loader_for(module.clone()), clock.clone()),
            StandardBackend::new(api.clone()),
        );
        let content = NotificationContent::for_task("4", "Floss", "");
        let id = backend
            .arm("4", &content, clock.now() + Duration::minutes(1))
            .unwrap();

        api.fail_listing(true);
        assert_eq!(backend.list_active().unwrap(), vec![id]);
    }

    #[test]
    fn failover_list_fails_when_no_backend_answers() {
        let clock = clock();
        let api = Arc::new(InMemoryNotificationApi::new());
        let backend = FailoverBackend::full_then_standard(
            FullPriorityBackend::new(Box::new(NoAlarmModule), clock),
            StandardBackend::new(api.clone()),
        );
        api.fail_listing(true);
        assert!(matches!(
            backend.list_active(),
            Err(BackendError::CallFailed { .. })
        ));
    }

    #[test]
    fn standard_backend_registers_alarm_and_default_channels() {
        let api = Arc::new(InMemoryNotificationApi::new());
        let backend = FailoverBackend::full_then_standard(
            FullPriorityBackend::new(Box::new(NoAlarmModule), clock()),
            StandardBackend::new(api.clone()),
        );
        backend.register_channels().unwrap();
        let ids: Vec<String> = api.channels().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["alarm".to_string(), "default".to_string()]);
    }

    #[test]
    fn empty_failover_is_unavailable() {
        let backend = FailoverBackend::new(Vec::new());
        let content = NotificationContent::for_task("1", "Read", "");
        let err = backend
            .arm("1", &content, Utc::now() + Duration::minutes(1))
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
