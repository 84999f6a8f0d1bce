//! Live accounting engine.
//!
//! Holds the live filter set generation and runs the periodic tick. A tick
//! performs the scheduled reset sweep, closes the accounting point and
//! advances the quota flags under the write lock, then releases the lock
//! before writing flag files.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use metrics::{counter, gauge, increment_counter};
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::{task, time};

use crate::core::filterset::{FilterSet, FilterSetError};
use crate::core::ids::IdList;
use crate::core::quota::{write_signals, FlagSink, QuotaSignal};
use crate::core::report::{FilterReportFormatter, UserReport};
use crate::core::rule::FlowInfo;
use crate::core::schedule::ScheduleWindow;

/// Engine settings taken from the service configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Keep closed periods in filter history on scheduled resets
    pub keep_history: bool,
    /// Number of history items per filter in reports
    pub item_budget: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            keep_history: true,
            item_budget: 10,
        }
    }
}

/// Result of one tick
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Filters reset by the schedule sweep
    pub reset: IdList,
    /// Quota crossings signalled on this tick
    pub signals: Vec<QuotaSignal>,
    /// Signals whose flag file could not be written
    pub failed_writes: usize,
}

/// Owns the live filter set and its collaborators
pub struct AccountingEngine {
    live: RwLock<FilterSet>,
    generation: AtomicU64,
    window: Box<dyn ScheduleWindow + Send + Sync>,
    sink: Arc<dyn FlagSink + Send + Sync>,
    formatter: Box<dyn FilterReportFormatter + Send + Sync>,
    settings: EngineSettings,
}

impl AccountingEngine {
    pub fn new(
        initial: FilterSet,
        window: Box<dyn ScheduleWindow + Send + Sync>,
        sink: Box<dyn FlagSink + Send + Sync>,
        formatter: Box<dyn FilterReportFormatter + Send + Sync>,
        settings: EngineSettings,
    ) -> Self {
        gauge!("filterset_filters", initial.filters().len() as f64);
        Self {
            live: RwLock::new(initial),
            generation: AtomicU64::new(1),
            window,
            sink: Arc::from(sink),
            formatter,
            settings,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Read access to the live generation
    pub async fn read(&self) -> RwLockReadGuard<'_, FilterSet> {
        self.live.read().await
    }

    /// Replace the live generation, carrying counters over by filter id.
    ///
    /// Returns the number of the new generation.
    pub async fn reload(&self, mut next: FilterSet) -> u64 {
        let mut live = self.live.write().await;
        next.copy_counters(&live);
        let filters = next.filters().len();
        let (process_used, shaper_used) = (next.is_process_used(), next.is_shaper_used());
        *live = next;
        drop(live);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("filterset_filters", filters as f64);
        info!(
            "Filter set generation {} is live with {} filters (process rules: {}, shaping: {})",
            generation, filters, process_used, shaper_used
        );
        generation
    }

    /// Account a classified flow against the live generation
    pub async fn account(&self, flow: &FlowInfo, bytes: u64) -> Vec<u32> {
        self.live.write().await.account(flow, bytes)
    }

    pub async fn reset_all_counters(&self) {
        self.live.write().await.reset_all_counters();
        info!("All filter counters reset");
    }

    pub async fn remove_addr_table(&self, key: u32) -> Result<bool, FilterSetError> {
        self.live.write().await.remove_addr_table(key)
    }

    pub async fn users_for_filter(&self, filter_id: u32) -> BTreeMap<u32, String> {
        self.live.read().await.select_users_by_filter_id(filter_id)
    }

    /// Report for a user of the live generation, `None` for unknown users
    pub async fn user_report(&self, user_id: u32, now: DateTime<Utc>) -> Option<UserReport> {
        let live = self.live.read().await;
        let user = live.user(user_id)?;
        Some(live.build_user_report(now, user, self.formatter.as_ref(), self.settings.item_budget))
    }

    /// Run one evaluation tick
    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let (reset, signals) = {
            let mut live = self.live.write().await;
            let reset = live.reset_on_schedule(self.window.as_ref(), now, self.settings.keep_history);
            live.advance_period();
            let signals = live.process_traffic_limit_flags(now);
            (reset, signals)
        };

        if !reset.is_empty() {
            counter!("filters_reset_total", reset.len() as u64);
            info!("Scheduled reset of filters: {}", reset);
        }

        for signal in &signals {
            increment_counter!("quota_flags_raised_total", "kind" => signal.kind.as_str());
            info!(
                "Filter {} crossed its {} threshold ({}/{})",
                signal.filter_id,
                signal.kind.as_str(),
                signal.counters.sent,
                signal.counters.recv
            );
        }

        let failures = self.write_flags(&signals).await;
        for (signal, e) in &failures {
            increment_counter!("quota_flag_write_failures_total");
            warn!("Failed to write flag file {}: {}", signal.file_name(), e);
        }

        debug!("Tick at {} done", now);
        TickOutcome {
            reset,
            signals,
            failed_writes: failures.len(),
        }
    }

    /// Write flag files on the blocking pool, outside the filter set lock
    async fn write_flags(&self, signals: &[QuotaSignal]) -> Vec<(QuotaSignal, io::Error)> {
        if signals.is_empty() {
            return Vec::new();
        }

        let sink = Arc::clone(&self.sink);
        let batch = signals.to_vec();
        match task::spawn_blocking(move || write_signals(sink.as_ref(), &batch)).await {
            Ok(failures) => failures,
            Err(e) => {
                error!("Flag writer task failed: {}", e);
                signals
                    .iter()
                    .map(|signal| (signal.clone(), io::Error::new(io::ErrorKind::Other, e.to_string())))
                    .collect()
            }
        }
    }

    /// Tick forever at the given interval
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!("Starting accounting ticks every {:?}", interval);
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            self.tick(Utc::now()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::Filter;
    use crate::core::quota::QuotaKind;
    use crate::core::report::CounterFragmentFormatter;
    use crate::core::rule::Rule;
    use crate::core::schedule::{CalendarWindow, ResetSchedule};
    use crate::core::users::User;
    use chrono::TimeZone;
    use std::io;
    use std::sync::Mutex;

    /// Records written flags; optionally fails every write
    #[derive(Default)]
    struct RecordingSink {
        written: Arc<Mutex<Vec<(String, String)>>>,
        fail: bool,
    }

    impl FlagSink for RecordingSink {
        fn write_flag(&self, name: &str, contents: &str) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.written
                .lock()
                .unwrap()
                .push((name.to_string(), contents.to_string()));
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn flow() -> FlowInfo {
        FlowInfo::new("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap())
    }

    fn capped_set() -> FilterSet {
        let mut fs = FilterSet::new();
        fs.add_filter(
            Filter::new(1, "capped")
                .with_rule(Rule::default())
                .with_traffic_limit(1000, 0)
                .with_reset_schedule(ResetSchedule::Daily),
        )
        .unwrap();
        fs.add_user(User::new(1, "admin")).unwrap();
        fs
    }

    fn engine(fs: FilterSet, sink: RecordingSink) -> AccountingEngine {
        AccountingEngine::new(
            fs,
            Box::new(CalendarWindow),
            Box::new(sink),
            Box::new(CounterFragmentFormatter),
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_flag_written_once_per_crossing() {
        let sink = RecordingSink::default();
        let written = sink.written.clone();
        let engine = engine(capped_set(), sink);

        engine.account(&flow(), 900).await;
        assert!(engine.tick(now()).await.signals.is_empty());

        engine.account(&flow(), 150).await;
        let outcome = engine.tick(now()).await;
        assert_eq!(outcome.signals.len(), 1);
        assert_eq!(outcome.signals[0].kind, QuotaKind::Limit);

        engine.tick(now()).await;
        {
            let written = written.lock().unwrap();
            assert_eq!(written.len(), 1);
            assert_eq!(written[0].0, "limit_1");
            assert_eq!(written[0].1, "2024-05-01 12:00:00 1050/0");
        }

        engine.reset_all_counters().await;
        let live = engine.read().await;
        let filter = live.filter(1).unwrap();
        assert_eq!(filter.counters().total(), 0);
        assert!(!filter.quota_flags().limit.is_raised());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_flag_raised() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let engine = engine(capped_set(), sink);

        engine.account(&flow(), 2000).await;
        let outcome = engine.tick(now()).await;
        assert_eq!(outcome.failed_writes, 1);
        assert!(engine.read().await.filter(1).unwrap().quota_flags().limit.is_raised());

        let outcome = engine.tick(now()).await;
        assert!(outcome.signals.is_empty());
        assert_eq!(outcome.failed_writes, 0);
    }

    #[tokio::test]
    async fn test_reload_keeps_counters() {
        let engine = engine(capped_set(), RecordingSink::default());
        engine.account(&flow(), 400).await;

        let mut next = FilterSet::new();
        next.add_filter(Filter::new(1, "capped v2").with_rule(Rule::default()))
            .unwrap();
        next.add_filter(Filter::new(2, "new").with_rule(Rule::default()))
            .unwrap();
        assert_eq!(engine.reload(next).await, 2);
        assert_eq!(engine.generation(), 2);
        let live = engine.read().await;
        assert_eq!(live.filter(1).unwrap().counters().sent, 400);
        assert_eq!(live.filter(1).unwrap().name, "capped v2");
        assert_eq!(live.filter(2).unwrap().counters().total(), 0);
    }

    #[tokio::test]
    async fn test_tick_runs_scheduled_reset() {
        let engine = engine(capped_set(), RecordingSink::default());
        engine.tick(now()).await;
        engine.account(&flow(), 10).await;

        let outcome = engine.tick(now() + chrono::Duration::days(1)).await;
        assert_eq!(outcome.reset.to_string(), "1");
        assert_eq!(engine.read().await.periods().total_points(), 2);
    }

    #[tokio::test]
    async fn test_reports_and_user_lookup() {
        let engine = engine(capped_set(), RecordingSink::default());
        engine.account(&flow(), 10).await;

        let report = engine.user_report(1, now()).await.unwrap();
        assert_eq!(report.filters.len(), 1);
        assert_eq!(report.filters[0]["sent"], 10);
        assert!(engine.user_report(99, now()).await.is_none());
        assert!(engine.users_for_filter(1).await.is_empty());
    }

    #[test]
    fn test_remove_addr_table_blocking() {
        let engine = engine(capped_set(), RecordingSink::default());
        let removed = tokio_test::block_on(engine.remove_addr_table(5));
        assert_eq!(removed, Ok(false));
    }
}
