use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use switchboard_core::config::{AppConfig, BusinessHoursConfig};
use switchboard_core::traits::BusinessHours;

/// The configured schedule, or always open when `[business_hours]` is absent.
pub fn hours_from_config(config: &AppConfig) -> Arc<dyn BusinessHours> {
    match &config.business_hours {
        Some(schedule) => Arc::new(ScheduleHours::new(schedule.clone())),
        None => Arc::new(StaticHours(true)),
    }
}

/// Business hours that never change. Used when no schedule is configured.
#[derive(Debug, Clone, Copy)]
pub struct StaticHours(pub bool);

impl BusinessHours for StaticHours {
    fn is_open(&self) -> bool {
        self.0
    }
}

/// Weekly schedule from `[business_hours]`, evaluated against the wall clock.
#[derive(Debug, Clone)]
pub struct ScheduleHours {
    config: BusinessHoursConfig,
}

impl ScheduleHours {
    pub fn new(config: BusinessHoursConfig) -> Self {
        Self { config }
    }

    /// Whether the schedule is open at `now` (UTC).
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let local = now + Duration::hours(self.config.utc_offset_hours as i64);
        let day_ok = self.config.days.is_empty() || self.config.days.contains(&local.weekday());
        day_ok
            && is_within_window(
                local.hour() as u8,
                self.config.start_hour,
                self.config.end_hour,
            )
    }
}

impl BusinessHours for ScheduleHours {
    fn is_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }
}

/// Check whether `local_hour` falls within `start_hour..end_hour`.
///
/// Supports wrapping windows (e.g., 22..06 for overnight).
fn is_within_window(local_hour: u8, start_hour: u8, end_hour: u8) -> bool {
    if start_hour <= end_hour {
        // Normal window: e.g., 9..17
        local_hour >= start_hour && local_hour < end_hour
    } else {
        // Wrapping window: e.g., 22..06 means 22-23 + 0-5
        local_hour >= start_hour || local_hour < end_hour
    }
}
