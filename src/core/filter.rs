//! Filters: rule groups with their own counters, limits and reset schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::counters::{Direction, TrafficCounterPair};
use crate::core::quota::{QuotaFlags, QuotaKind, QuotaSignal};
use crate::core::rule::{FlowInfo, Rule, SubjectResolver};
use crate::core::schedule::{ResetSchedule, ScheduleWindow};

/// Closed periods kept per filter unless configured otherwise
pub const DEFAULT_HISTORY_LIMIT: usize = 12;

/// A closed accounting period kept in a filter's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub counters: TrafficCounterPair,
}

/// Filter definition and its live accounting state
///
/// Only the definition part is read from configuration documents; the
/// accounting state starts zeroed and is migrated between generations
/// with [`Filter::copy_counters_from`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    /// Filter ID, stable across reloads
    pub id: u32,
    /// Filter name
    pub name: String,
    /// Whether the filter takes part in accounting
    pub active: bool,
    /// Rules in evaluation order
    pub rules: Vec<Rule>,
    /// Shaping speed in bytes per second, 0 when shaping is off
    pub speed_limit: u64,
    /// Traffic limit in bytes, 0 when disabled
    pub traffic_limit: u64,
    /// Warning threshold in bytes, 0 when disabled
    pub traffic_warn_limit: u64,
    /// Counter reset schedule
    pub reset_schedule: ResetSchedule,

    #[serde(skip)]
    counters: TrafficCounterPair,
    #[serde(skip)]
    quota_flags: QuotaFlags,
    #[serde(skip)]
    period_start: Option<DateTime<Utc>>,
    #[serde(skip)]
    history: Vec<TrafficPeriod>,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            active: true,
            rules: Vec::new(),
            speed_limit: 0,
            traffic_limit: 0,
            traffic_warn_limit: 0,
            reset_schedule: ResetSchedule::Never,
            counters: TrafficCounterPair::default(),
            quota_flags: QuotaFlags::default(),
            period_start: None,
            history: Vec::new(),
        }
    }
}

impl Filter {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_speed_limit(mut self, bytes_per_second: u64) -> Self {
        self.speed_limit = bytes_per_second;
        self
    }

    pub fn with_traffic_limit(mut self, limit: u64, warn_limit: u64) -> Self {
        self.traffic_limit = limit;
        self.traffic_warn_limit = warn_limit;
        self
    }

    pub fn with_reset_schedule(mut self, schedule: ResetSchedule) -> Self {
        self.reset_schedule = schedule;
        self
    }

    pub fn counters(&self) -> TrafficCounterPair {
        self.counters
    }

    pub fn quota_flags(&self) -> QuotaFlags {
        self.quota_flags
    }

    pub fn history(&self) -> &[TrafficPeriod] {
        &self.history
    }

    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.period_start
    }

    pub fn uses_process(&self) -> bool {
        self.rules.iter().any(Rule::uses_process)
    }

    pub fn references_addr_table(&self, key: u32) -> bool {
        self.rules.iter().any(|rule| rule.references_addr_table(key))
    }

    /// Direction of the first rule that matches the flow
    pub fn classify<R: SubjectResolver + ?Sized>(
        &self,
        flow: &FlowInfo,
        resolver: &R,
    ) -> Option<Direction> {
        self.rules.iter().find_map(|rule| rule.classify(flow, resolver))
    }

    pub fn account(&mut self, direction: Direction, bytes: u64) {
        self.counters.add(direction, bytes);
    }

    pub fn is_traffic_limit_exceeded(&self) -> bool {
        self.traffic_limit > 0 && self.counters.total() >= self.traffic_limit
    }

    pub fn is_traffic_limitwarn_exceeded(&self) -> bool {
        self.traffic_warn_limit > 0 && self.counters.total() >= self.traffic_warn_limit
    }

    fn is_exceeded(&self, kind: QuotaKind) -> bool {
        match kind {
            QuotaKind::Limit => self.is_traffic_limit_exceeded(),
            QuotaKind::Warn => self.is_traffic_limitwarn_exceeded(),
        }
    }

    /// Advance both quota flags and return the signals raised on this tick
    pub fn evaluate_quota(&mut self, now: DateTime<Utc>) -> Vec<QuotaSignal> {
        let mut signals = Vec::new();
        for kind in [QuotaKind::Limit, QuotaKind::Warn] {
            let exceeded = self.is_exceeded(kind);
            if self.quota_flags.get_mut(kind).evaluate(exceeded) {
                signals.push(QuotaSignal {
                    filter_id: self.id,
                    kind,
                    raised_at: now,
                    counters: self.counters,
                });
            }
        }
        signals
    }

    /// Take over the accounting state of the same filter from another generation
    pub fn copy_counters_from(&mut self, other: &Filter) {
        self.counters = other.counters;
        self.quota_flags = other.quota_flags;
        self.period_start = other.period_start;
        self.history = other.history.clone();
    }

    /// Drop the oldest closed periods beyond `limit`
    pub fn trim_history(&mut self, limit: usize) {
        let excess = self.history.len().saturating_sub(limit);
        self.history.drain(..excess);
    }

    /// Zero counters and clear quota flags; history is kept
    pub fn reset_counters(&mut self) {
        self.counters.reset();
        self.quota_flags.clear();
        self.period_start = None;
    }

    /// Reset the counters if the schedule crossed a boundary since the period started.
    ///
    /// The first call only records the period start. Returns `true` when the
    /// counters were reset.
    pub fn reset_on_schedule<W: ScheduleWindow + ?Sized>(
        &mut self,
        window: &W,
        now: DateTime<Utc>,
        keep_history: bool,
    ) -> bool {
        if self.reset_schedule == ResetSchedule::Never {
            return false;
        }

        let since = match self.period_start {
            Some(since) => since,
            None => {
                self.period_start = Some(now);
                return false;
            }
        };

        if !window.boundary_crossed(self.reset_schedule, since, now) {
            return false;
        }

        if keep_history {
            self.history.push(TrafficPeriod {
                start: since,
                end: now,
                counters: self.counters,
            });
        } else {
            self.history.clear();
        }

        self.counters.reset();
        self.quota_flags.clear();
        self.period_start = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quota::QuotaFlag;
    use crate::core::rule::tests::StaticResolver;
    use crate::core::rule::RuleSubject;
    use crate::core::schedule::{CalendarWindow, MockScheduleWindow};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_thresholds() {
        let mut filter = Filter::new(1, "uplink").with_traffic_limit(1000, 800);
        filter.account(Direction::Sent, 700);
        assert!(!filter.is_traffic_limitwarn_exceeded());
        filter.account(Direction::Received, 100);
        assert!(filter.is_traffic_limitwarn_exceeded());
        assert!(!filter.is_traffic_limit_exceeded());
        filter.account(Direction::Received, 200);
        assert!(filter.is_traffic_limit_exceeded());
    }

    #[test]
    fn test_zero_threshold_never_exceeded() {
        let mut filter = Filter::new(1, "unlimited");
        filter.account(Direction::Sent, u64::MAX);
        assert!(!filter.is_traffic_limit_exceeded());
        assert!(!filter.is_traffic_limitwarn_exceeded());
        assert!(filter.evaluate_quota(now()).is_empty());
    }

    #[test]
    fn test_evaluate_quota_signals_once_per_crossing() {
        let mut filter = Filter::new(5, "capped").with_traffic_limit(1000, 500);
        filter.account(Direction::Sent, 600);

        let signals = filter.evaluate_quota(now());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, QuotaKind::Warn);

        filter.account(Direction::Received, 400);
        let signals = filter.evaluate_quota(now());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, QuotaKind::Limit);
        assert_eq!(signals[0].counters, TrafficCounterPair::new(600, 400));

        assert!(filter.evaluate_quota(now()).is_empty());

        filter.reset_counters();
        assert_eq!(filter.quota_flags(), QuotaFlags::default());
        assert!(filter.evaluate_quota(now()).is_empty());
    }

    #[test]
    fn test_classify_uses_first_matching_rule() {
        let filter = Filter::new(1, "lan")
            .with_rule(
                Rule::new(
                    RuleSubject::Host {
                        addr: "1.1.1.1".parse().unwrap(),
                    },
                    RuleSubject::AddrGroup { key: 1 },
                ),
            )
            .with_rule(Rule::new(RuleSubject::AddrGroup { key: 1 }, RuleSubject::Any).mirrored());

        let flow = FlowInfo::new("1.1.1.1".parse().unwrap(), "10.0.0.3".parse().unwrap());
        assert_eq!(filter.classify(&flow, &StaticResolver), Some(Direction::Sent));

        let flow = FlowInfo::new("2.2.2.2".parse().unwrap(), "10.0.0.3".parse().unwrap());
        assert_eq!(filter.classify(&flow, &StaticResolver), Some(Direction::Received));
    }

    #[test]
    fn test_reset_on_schedule_first_call_records_start() {
        let mut filter = Filter::new(1, "daily").with_reset_schedule(ResetSchedule::Daily);
        filter.account(Direction::Sent, 10);

        assert!(!filter.reset_on_schedule(&CalendarWindow, now(), true));
        assert_eq!(filter.period_start(), Some(now()));
        assert_eq!(filter.counters().sent, 10);

        assert!(filter.reset_on_schedule(&CalendarWindow, now() + Duration::days(1), true));
        assert_eq!(filter.counters().total(), 0);
        assert_eq!(filter.history().len(), 1);
        assert_eq!(filter.history()[0].counters.sent, 10);
        assert_eq!(filter.period_start(), Some(now() + Duration::days(1)));
    }

    #[test]
    fn test_reset_on_schedule_purges_history() {
        let mut window = MockScheduleWindow::new();
        window.expect_boundary_crossed().returning(|_, _, _| true);

        let mut filter = Filter::new(1, "monthly")
            .with_reset_schedule(ResetSchedule::Monthly)
            .with_traffic_limit(10, 0);
        filter.reset_on_schedule(&window, now(), true);
        filter.account(Direction::Sent, 50);
        assert_eq!(filter.evaluate_quota(now()).len(), 1);
        assert!(filter.reset_on_schedule(&window, now(), true));
        assert_eq!(filter.history().len(), 1);

        filter.account(Direction::Sent, 5);
        assert!(filter.reset_on_schedule(&window, now(), false));
        assert!(filter.history().is_empty());
        assert_eq!(filter.quota_flags().limit, QuotaFlag::Clear);
    }

    #[test]
    fn test_never_schedule_skips_window() {
        let mut window = MockScheduleWindow::new();
        window.expect_boundary_crossed().never();

        let mut filter = Filter::new(1, "manual");
        assert!(!filter.reset_on_schedule(&window, now(), false));
        assert!(!filter.reset_on_schedule(&window, now(), false));
    }

    #[test]
    fn test_copy_counters_from() {
        let mut old = Filter::new(3, "old").with_traffic_limit(10, 0);
        old.account(Direction::Received, 20);
        old.evaluate_quota(now());

        let mut fresh = Filter::new(3, "renamed");
        fresh.copy_counters_from(&old);
        assert_eq!(fresh.counters(), TrafficCounterPair::new(0, 20));
        assert!(fresh.quota_flags().limit.is_raised());
        assert_eq!(fresh.name, "renamed");
    }

    #[test]
    fn test_default_filter_is_active() {
        assert!(Filter::default().active);
        let filter: Filter = serde_json::from_str(r#"{"id": 2}"#).unwrap();
        assert!(filter.active);
    }

    #[test]
    fn test_trim_history_keeps_newest() {
        let mut window = MockScheduleWindow::new();
        window.expect_boundary_crossed().returning(|_, _, _| true);

        let mut filter = Filter::new(1, "daily").with_reset_schedule(ResetSchedule::Daily);
        filter.reset_on_schedule(&window, now(), true);
        for day in 1..=5 {
            filter.account(Direction::Sent, day);
            filter.reset_on_schedule(&window, now() + Duration::days(day as i64), true);
        }
        assert_eq!(filter.history().len(), 5);

        filter.trim_history(2);
        let kept: Vec<u64> = filter.history().iter().map(|p| p.counters.sent).collect();
        assert_eq!(kept, vec![4, 5]);

        filter.trim_history(10);
        assert_eq!(filter.history().len(), 2);
    }

    #[test]
    fn test_config_fields_only_deserialize() {
        let filter: Filter = serde_json::from_str(
            r#"{"id": 9, "name": "web", "active": true, "traffic_limit": 500, "reset_schedule": "weekly"}"#,
        )
        .unwrap();
        assert_eq!(filter.id, 9);
        assert_eq!(filter.reset_schedule, ResetSchedule::Weekly);
        assert_eq!(filter.counters(), TrafficCounterPair::default());
    }
}
