//! Process-wide decision on how an arriving notification is presented.
//!
//! The host installs one policy at startup with [`install`] and removes it on
//! teardown with [`uninstall`]. Until a policy is installed, [`decide`] uses
//! [`AlarmFirstPolicy`].

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::notifications::{NotificationContent, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationDecision {
    pub show_alert: bool,
    pub play_sound: bool,
    pub set_badge: bool,
    pub priority: Priority,
}

pub trait PresentationPolicy: Send + Sync {
    fn decide(&self, content: &NotificationContent) -> PresentationDecision;
}

/// Shows everything; alarms additionally get maximum priority.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlarmFirstPolicy;

impl PresentationPolicy for AlarmFirstPolicy {
    fn decide(&self, content: &NotificationContent) -> PresentationDecision {
        PresentationDecision {
            show_alert: true,
            play_sound: true,
            set_badge: true,
            priority: if content.is_alarm() {
                Priority::Max
            } else {
                Priority::Default
            },
        }
    }
}

static POLICY: Lazy<RwLock<Option<Arc<dyn PresentationPolicy>>>> =
    Lazy::new(|| RwLock::new(None));

/// Installs `policy`. Returns `false` and keeps the current policy when one is
/// already installed.
pub fn install(policy: Arc<dyn PresentationPolicy>) -> bool {
    let mut slot = POLICY.write();
    if slot.is_some() {
        warn!("presentation policy already installed; keeping the existing one");
        return false;
    }
    *slot = Some(policy);
    debug!("presentation policy installed");
    true
}

pub fn uninstall() {
    if POLICY.write().take().is_some() {
        debug!("presentation policy removed");
    }
}

pub fn is_installed() -> bool {
    POLICY.read().is_some()
}

pub fn decide(content: &NotificationContent) -> PresentationDecision {
    match POLICY.read().as_ref() {
        Some(policy) => policy.decide(content),
        None => AlarmFirstPolicy.decide(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl PresentationPolicy for Silent {
        fn decide(&self, _content: &NotificationContent) -> PresentationDecision {
            PresentationDecision {
                show_alert: false,
                play_sound: false,
                set_badge: false,
                priority: Priority::Default,
            }
        }
    }

    #[test]
    fn alarm_payloads_get_max_priority() {
        let mut content = NotificationContent::for_task("1", "Read", "");
        let decision = AlarmFirstPolicy.decide(&content);
        assert_eq!(decision.priority, Priority::Max);
        assert!(decision.play_sound);

        content.data.kind = "reminder".to_string();
        assert_eq!(AlarmFirstPolicy.decide(&content).priority, Priority::Default);
    }

    #[test]
    fn install_once_then_teardown() {
        let content = NotificationContent::for_task("1", "Read", "");
        uninstall();
        assert!(decide(&content).show_alert);

        assert!(install(Arc::new(Silent)));
        assert!(!install(Arc::new(AlarmFirstPolicy)));
        assert!(is_installed());
        assert!(!decide(&content).show_alert);

        uninstall();
        assert!(!is_installed());
        assert!(decide(&content).show_alert);
    }
}
