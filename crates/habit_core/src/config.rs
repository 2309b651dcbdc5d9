use chrono::Duration;

/// Timing policy for alarm scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmConfig {
    /// Smallest lead time the scheduler accepts.
    pub min_lead: Duration,
    /// Margin the task lifecycle enforces before handing a time to the scheduler.
    pub safety_margin: Duration,
    pub snooze_presets_minutes: Vec<u32>,
}

impl AlarmConfig {
    pub fn with_min_lead(mut self, min_lead: Duration) -> Self {
        self.min_lead = min_lead.max(Duration::zero());
        self
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin.max(Duration::zero());
        self
    }

    pub fn with_snooze_presets(mut self, presets: Vec<u32>) -> Self {
        self.snooze_presets_minutes = presets.into_iter().filter(|m| *m > 0).collect();
        self
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            min_lead: Duration::seconds(1),
            safety_margin: Duration::seconds(10),
            snooze_presets_minutes: vec![5, 10],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_setters_clamp_invalid_values() {
        let config = AlarmConfig::default()
            .with_min_lead(Duration::seconds(-5))
            .with_snooze_presets(vec![0, 15]);
        assert_eq!(config.min_lead, Duration::zero());
        assert_eq!(config.snooze_presets_minutes, vec![15]);
        assert_eq!(config.safety_margin, Duration::seconds(10));
    }
}
