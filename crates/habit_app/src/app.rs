use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Local};
use habit_core::{
    backend::{FailoverBackend, FullPriorityBackend, StandardBackend},
    clock::{Clock, SystemClock},
    config::AlarmConfig,
    display::{format_alarm_time, minutes_until},
    platform::{
        AlarmModule, AlarmModuleLoader, InMemoryAlarmModule, InMemoryNotificationApi,
        NoAlarmModule, PermissionProvider, StaticPermissions,
    },
    presentation::{self, AlarmFirstPolicy},
    reschedule_all,
    store::{FileStore, TaskStore},
    AlarmScheduler, NewTask, RecoveryReport, TaskService,
};
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) min_lead_secs: i64,
    pub(crate) safety_margin_secs: i64,
    pub(crate) full_priority: bool,
    pub(crate) seed_tasks: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup("HABIT_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                info!(path = %dir, "using data directory");
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(value) = lookup("HABIT_ALARM_MIN_LEAD_SECS") {
            if let Ok(secs) = value.trim().parse::<i64>() {
                config.min_lead_secs = secs.max(0);
            }
        }
        if let Some(value) = lookup("HABIT_ALARM_SAFETY_MARGIN_SECS") {
            if let Ok(secs) = value.trim().parse::<i64>() {
                config.safety_margin_secs = secs.max(0);
            }
        }
        if let Some(value) = lookup("HABIT_FULL_PRIORITY") {
            config.full_priority = parse_flag(&value).unwrap_or(config.full_priority);
        }
        if let Some(value) = lookup("HABIT_SEED_TASKS") {
            config.seed_tasks = parse_flag(&value).unwrap_or(config.seed_tasks);
        }
        config
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub(crate) fn alarm_config(&self) -> AlarmConfig {
        AlarmConfig::default()
            .with_min_lead(Duration::seconds(self.min_lead_secs))
            .with_safety_margin(Duration::seconds(self.safety_margin_secs))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("habit-data"),
            min_lead_secs: 1,
            safety_margin_secs: 10,
            full_priority: true,
            seed_tasks: true,
        }
    }
}

fn next_task_id(args: &mut impl Iterator<Item = String>, verb: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| anyhow!("`{verb}` needs a task id"))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run recovery and list tasks.
    List,
    Add {
        title: String,
        description: String,
        in_minutes: Option<i64>,
    },
    Snooze {
        task_id: String,
        /// Falls back to the first configured snooze preset.
        minutes: Option<u32>,
    },
    Complete {
        task_id: String,
    },
    Cancel {
        task_id: String,
    },
    Delete {
        task_id: String,
    },
    CancelAll,
}

impl Command {
    pub const USAGE: &'static str = "usage: habit_alarms [list | add <title> [minutes] [description] | snooze <task-id> [minutes] | complete <task-id> | cancel <task-id> | delete <task-id> | cancel-all]";

    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let Some(verb) = args.next() else {
            return Ok(Self::List);
        };
        let command = match verb.as_str() {
            "list" => Self::List,
            "cancel-all" => Self::CancelAll,
            "complete" => Self::Complete {
                task_id: next_task_id(&mut args, "complete")?,
            },
            "cancel" => Self::Cancel {
                task_id: next_task_id(&mut args, "cancel")?,
            },
            "delete" => Self::Delete {
                task_id: next_task_id(&mut args, "delete")?,
            },
            "snooze" => {
                let task_id = next_task_id(&mut args, "snooze")?;
                let minutes = args
                    .next()
                    .map(|raw| {
                        raw.parse::<u32>()
                            .with_context(|| format!("invalid snooze minutes `{raw}`"))
                    })
                    .transpose()?;
                Self::Snooze { task_id, minutes }
            }
            "add" => {
                let title = args.next().ok_or_else(|| anyhow!("`add` needs a title"))?;
                let in_minutes = args
                    .next()
                    .map(|raw| {
                        raw.parse::<i64>()
                            .with_context(|| format!("invalid alarm minutes `{raw}`"))
                    })
                    .transpose()?;
                let description = args.collect::<Vec<_>>().join(" ");
                Self::Add {
                    title,
                    description,
                    in_minutes,
                }
            }
            other => bail!("unknown command `{other}`"),
        };
        Ok(command)
    }
}

/// Wires the platform collaborators to the alarm subsystem for one process.
pub struct AlarmController {
    service: TaskService,
    clock: Arc<dyn Clock>,
    notifications: Arc<InMemoryNotificationApi>,
}

impl AlarmController {
    pub fn new(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = FileStore::open(&config.data_dir).with_context(|| {
            format!("failed to open data directory {}", config.data_dir.display())
        })?;
        let notifications = Arc::new(InMemoryNotificationApi::new());
        let loader: Box<dyn AlarmModuleLoader> = if config.full_priority {
            let module: Arc<dyn AlarmModule> = Arc::new(InMemoryAlarmModule::new());
            Box::new(move || Some(module.clone()))
        } else {
            Box::new(NoAlarmModule)
        };
        let permissions: Arc<dyn PermissionProvider> = Arc::new(StaticPermissions::granted());
        let scheduler = AlarmScheduler::builder()
            .with_store(Arc::new(TaskStore::new(Box::new(store))))
            .with_backend(Box::new(FailoverBackend::full_then_standard(
                FullPriorityBackend::new(loader, clock.clone()),
                StandardBackend::new(notifications.clone()),
            )))
            .with_permissions(permissions)
            .with_clock(clock.clone())
            .with_config(config.alarm_config())
            .build();
        Ok(Self {
            service: TaskService::new(scheduler),
            clock,
            notifications,
        })
    }

    pub fn service(&self) -> &TaskService {
        &self.service
    }

    /// Startup routine: seed on first launch, ask for permission, re-arm alarms.
    pub fn start(&self, seed_tasks: bool) -> Result<RecoveryReport> {
        if seed_tasks {
            self.service
                .seed_default_tasks()
                .context("failed to seed default tasks")?;
        }
        if !self.service.scheduler().request_permissions() {
            warn!("alarms will not fire until notifications are allowed");
        }
        Ok(reschedule_all(self.service.scheduler()))
    }

    pub fn execute(&self, command: Command) -> Result<Vec<String>> {
        let service = &self.service;
        let mut lines = Vec::new();
        match command {
            Command::List => {}
            Command::Add {
                title,
                description,
                in_minutes,
            } => {
                let mut new_task = NewTask::new(title).with_description(description);
                if let Some(minutes) = in_minutes {
                    let fire_at = Duration::try_minutes(minutes)
                        .and_then(|delta| self.clock.now().checked_add_signed(delta))
                        .ok_or_else(|| {
                            anyhow!("alarm {minutes} minute(s) from now is out of range")
                        })?;
                    new_task = new_task.with_alarm(fire_at);
                }
                let added = service.add_task(new_task).context("failed to add task")?;
                lines.push(format!("added {}", added.task.id));
                match added.alarm {
                    Some(Ok(_)) => lines.push(format!(
                        "alarm set for {} ({} minute(s) from now)",
                        self.label(&added.task),
                        added
                            .task
                            .alarm_time
                            .map(|at| minutes_until(at, self.clock.now()))
                            .unwrap_or_default()
                    )),
                    Some(Err(err)) => lines.push(format!("warning: {}", err.user_message())),
                    None => {}
                }
            }
            Command::Snooze { task_id, minutes } => {
                let minutes = match minutes {
                    Some(minutes) => minutes,
                    None => service
                        .scheduler()
                        .config()
                        .snooze_presets_minutes
                        .first()
                        .copied()
                        .ok_or_else(|| anyhow!("no snooze preset configured"))?,
                };
                service
                    .snooze(&task_id, minutes)
                    .with_context(|| format!("failed to snooze {task_id}"))?;
                lines.push(format!("alarm snoozed for {minutes} minutes"));
            }
            Command::Complete { task_id } => {
                service
                    .complete_task(&task_id)
                    .with_context(|| format!("failed to complete {task_id}"))?;
                lines.push(format!("{task_id} marked as completed"));
            }
            Command::Cancel { task_id } => {
                if service.cancel_task_alarm(&task_id)? {
                    lines.push(format!("alarm for {task_id} cancelled"));
                } else {
                    lines.push(format!("{task_id} had no alarm"));
                }
            }
            Command::Delete { task_id } => {
                if !service.delete_task(&task_id)? {
                    bail!("task `{task_id}` not found");
                }
                lines.push(format!("deleted {task_id}"));
            }
            Command::CancelAll => {
                let cancelled = service.scheduler().cancel_all_alarms();
                lines.push(format!("cancelled {cancelled} pending alarm(s)"));
            }
        }
        lines.extend(self.task_lines()?);
        Ok(lines)
    }

    /// Triggers currently pending on the standard backend.
    pub fn pending_standard(&self) -> usize {
        self.notifications.pending().len()
    }

    fn task_lines(&self) -> Result<Vec<String>> {
        let tasks = self.service.tasks()?;
        Ok(tasks
            .iter()
            .map(|task| {
                let mark = if task.completed { "x" } else { " " };
                format!("[{mark}] {} ({}) alarm: {}", task.title, task.id, self.label(task))
            })
            .collect())
    }

    fn label(&self, task: &habit_core::Task) -> String {
        format_alarm_time(task.alarm_time, self.clock.now(), &Local)
    }
}

pub fn run(config: AppConfig, command: Command) -> Result<()> {
    info!(data_dir = %config.data_dir.display(), "starting habit alarms");
    presentation::install(Arc::new(AlarmFirstPolicy));
    let outcome = run_inner(&config, command);
    presentation::uninstall();
    outcome
}

fn run_inner(config: &AppConfig, command: Command) -> Result<()> {
    let controller = AlarmController::new(config, Arc::new(SystemClock))?;
    let report = controller.start(config.seed_tasks)?;
    info!(
        rescheduled = report.rescheduled.len(),
        stale = report.skipped_past.len(),
        "startup recovery complete"
    );
    for (task_id, err) in &report.failures {
        warn!(%task_id, %err, "alarm could not be restored");
    }
    for line in controller.execute(command)? {
        println!("{line}");
    }
    Ok(())
}
