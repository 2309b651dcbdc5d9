pub mod backend;
pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod notifications;
pub mod platform;
pub mod presentation;
pub mod recovery;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod task;

pub use crate::error::{AlarmError, BackendError, StoreError};
pub use crate::recovery::{reschedule_all, RecoveryReport};
pub use crate::scheduler::{AlarmScheduler, AlarmSchedulerBuilder};
pub use crate::service::TaskService;
pub use crate::task::{AlarmState, NewTask, Task};
