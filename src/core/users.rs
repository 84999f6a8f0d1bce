//! Users of the report feed and the filters they may see.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::IdList;

/// Which filters a user has access to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAccess {
    #[default]
    AllFilters,
    SpecifiedFilters,
}

/// Hours of the day (UTC) during which a user is enabled, `from` inclusive, `to` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub from: u32,
    pub to: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.from <= self.to {
            self.from <= hour && hour < self.to
        } else {
            // wraps past midnight
            hour >= self.from || hour < self.to
        }
    }
}

/// Enablement schedule of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSchedule {
    pub enabled: bool,
    pub hours: Option<HourWindow>,
}

impl Default for UserSchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            hours: None,
        }
    }
}

/// Report feed user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    /// User ID, unique within a filter set
    pub id: u32,
    /// Display name
    pub name: String,
    /// Description
    pub descr: String,
    /// Access mode
    pub access: UserAccess,
    /// Filters visible with `SpecifiedFilters` access
    pub filter_ids: IdList,
    /// Enablement schedule
    pub schedule: UserSchedule,
}

impl User {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_filters(mut self, filter_ids: IdList) -> Self {
        self.access = UserAccess::SpecifiedFilters;
        self.filter_ids = filter_ids;
        self
    }

    pub fn is_user_enabled(&self, now: DateTime<Utc>) -> bool {
        self.schedule.enabled
            && self
                .schedule
                .hours
                .map_or(true, |window| window.contains(now.hour()))
    }

    pub fn can_see(&self, filter_id: u32) -> bool {
        match self.access {
            UserAccess::AllFilters => true,
            UserAccess::SpecifiedFilters => self.filter_ids.contains(filter_id),
        }
    }
}
