//! Report feed: per-user reports assembled from per-filter fragments.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::filter::Filter;

/// Span covered by the accounting point ring
pub const POINT_RING_SPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// Ring capacity when the tick interval is not known (5 minute ticks)
pub const DEFAULT_POINT_CAPACITY: u32 = 288;

/// Accounting points: a ring of sampling periods shared by all filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTracker {
    capacity: u32,
    total_points: u32,
    next_point: u32,
}

impl Default for PeriodTracker {
    fn default() -> Self {
        Self::new(DEFAULT_POINT_CAPACITY)
    }
}

impl PeriodTracker {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            total_points: 0,
            next_point: 0,
        }
    }

    /// Ring sized so that ticks of `tick` length cover one day
    pub fn for_tick(tick: Duration) -> Self {
        let tick_secs = tick.as_secs().max(1);
        let capacity = POINT_RING_SPAN.as_secs() / tick_secs;
        Self::new(u32::try_from(capacity).unwrap_or(u32::MAX))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn total_points(&self) -> u32 {
        self.total_points
    }

    pub fn next_point(&self) -> u32 {
        self.next_point
    }

    /// Close the current point and move to the next slot of the ring
    pub fn advance(&mut self) {
        self.total_points = (self.total_points + 1).min(self.capacity);
        self.next_point = (self.next_point + 1) % self.capacity;
    }
}

/// Units used for the kilobyte and megabyte rollups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportUnits {
    pub kilobyte: u64,
    pub megabyte: u64,
}

impl Default for ReportUnits {
    fn default() -> Self {
        Self {
            kilobyte: 1024,
            megabyte: 1024 * 1024,
        }
    }
}

/// Builds the report fragment of one filter
#[cfg_attr(test, mockall::automock)]
pub trait FilterReportFormatter {
    fn fragment(&self, total_points: u32, next_point: u32, item_budget: usize, filter: &Filter) -> Value;
}

/// Fragment with counters, limits, flags and the most recent history periods
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterFragmentFormatter;

impl FilterReportFormatter for CounterFragmentFormatter {
    fn fragment(&self, total_points: u32, next_point: u32, item_budget: usize, filter: &Filter) -> Value {
        let counters = filter.counters();
        let flags = filter.quota_flags();
        let history = filter.history();
        let recent = &history[history.len().saturating_sub(item_budget)..];

        json!({
            "id": filter.id,
            "name": filter.name,
            "sent": counters.sent,
            "recv": counters.recv,
            "speed_limit": filter.speed_limit,
            "traffic_limit": filter.traffic_limit,
            "traffic_warn_limit": filter.traffic_warn_limit,
            "limit_raised": flags.limit.is_raised(),
            "warn_raised": flags.warn.is_raised(),
            "points": { "total": total_points, "next": next_point },
            "history": recent,
        })
    }
}

/// Report of the filters visible to one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserReport {
    pub name: String,
    pub kilobyte: u64,
    pub megabyte: u64,
    pub total_points: u32,
    pub next_point: u32,
    pub disabled: bool,
    pub filters: Vec<Value>,
}
