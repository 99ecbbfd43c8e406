//! Database models for recurring weekly availability windows.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{AvailabilityRuleId, ResourceId, TenantId};

/// Seconds in one day; a window ending at midnight ends here
pub const SECONDS_PER_DAY: u32 = 86_400;

/// A stored weekly window during which a resource may be reserved.
///
/// `day_of_week` is 0 = Monday .. 6 = Sunday and times are UTC.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: AvailabilityRuleId,
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AvailabilityRule {
    pub fn window(&self) -> RuleWindow {
        RuleWindow {
            day_of_week: self.day_of_week as u8,
            start: self.start_time,
            end: self.end_time,
            active: self.is_active,
        }
    }
}

/// Input for replacing a resource's rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleWindow {
    pub day_of_week: u8,
    pub start: NaiveTime,
    /// `00:00` means end of day
    pub end: NaiveTime,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RuleWindow {
    pub fn new(day_of_week: u8, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            day_of_week,
            start,
            end,
            active: true,
        }
    }

    pub fn start_secs(&self) -> u32 {
        self.start.num_seconds_from_midnight()
    }

    pub fn end_secs(&self) -> u32 {
        match self.end.num_seconds_from_midnight() {
            0 => SECONDS_PER_DAY,
            secs => secs,
        }
    }
}
