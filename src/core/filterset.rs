//! The filter set: filters plus the tables and users around them.
//!
//! A `FilterSet` is one configuration generation. It is built empty, filled
//! through the tag dispatch (or directly in tests), takes over the counters
//! of the previous generation on reload, and is then accounted against,
//! swept and reported on until the next reload replaces it.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::core::addr_table::{AddrPairError, AddrTable, LocalAddrPairs};
use crate::core::catalog::{MonitorRange, ProcNickname, UrlFilter};
use crate::core::counters::Direction;
use crate::core::dispatch::{Collection, CollectionKind, PendingItem};
use crate::core::filter::{Filter, DEFAULT_HISTORY_LIMIT};
use crate::core::ids::IdList;
use crate::core::quota::QuotaSignal;
use crate::core::report::{FilterReportFormatter, PeriodTracker, ReportUnits, UserReport};
use crate::core::rule::{FlowInfo, SubjectResolver};
use crate::core::schedule::ScheduleWindow;
use crate::core::users::{User, UserAccess};

/// Errors that can occur while building or editing a filter set
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FilterSetError {
    #[error("Duplicate filter id: {0}")]
    DuplicateFilterId(u32),
    #[error("Duplicate user id: {0}")]
    DuplicateUserId(u32),
    #[error("Duplicate address table key: {0}")]
    DuplicateAddrTableKey(u32),
    #[error("Address table {0} is referenced by a rule")]
    AddrTableInUse(u32),
    #[error("No pending item for tag: {0}")]
    NoPendingItem(&'static str),
}

/// Address-group and process lookups over the filter set's own tables
pub struct TableResolver<'a> {
    addr_tables: &'a Collection<AddrTable>,
    proc_nicknames: &'a Collection<ProcNickname>,
}

impl SubjectResolver for TableResolver<'_> {
    fn addr_group_contains(&self, key: u32, addr: Ipv4Addr) -> bool {
        self.addr_tables
            .find(|table| table.key == key)
            .map_or(false, |table| table.contains(addr))
    }

    fn process_path(&self, nickname: &str) -> Option<&str> {
        self.proc_nicknames
            .find(|proc| proc.nickname.eq_ignore_ascii_case(nickname))
            .map(|proc| proc.path_exe.as_str())
    }
}

/// One configuration generation of filters and their surroundings
#[derive(Debug, Clone)]
pub struct FilterSet {
    filters: Collection<Filter>,
    users: Collection<User>,
    addr_tables: Collection<AddrTable>,
    url_filters: Collection<UrlFilter>,
    proc_nicknames: Collection<ProcNickname>,
    monitor_ranges: Collection<MonitorRange>,
    local_addr_pairs: LocalAddrPairs,
    periods: PeriodTracker,
    units: ReportUnits,
    history_limit: usize,

    // Derived from the filters; refreshed on every filter mutation.
    process_usage: bool,
    shaper_usage: bool,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            filters: Collection::new(),
            users: Collection::new(),
            addr_tables: Collection::new(),
            url_filters: Collection::new(),
            proc_nicknames: Collection::new(),
            monitor_ranges: Collection::new(),
            local_addr_pairs: LocalAddrPairs::new(),
            periods: PeriodTracker::default(),
            units: ReportUnits::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            process_usage: false,
            shaper_usage: false,
        }
    }
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_units(mut self, units: ReportUnits) -> Self {
        self.units = units;
        self
    }

    pub fn with_periods(mut self, periods: PeriodTracker) -> Self {
        self.periods = periods;
        self
    }

    /// Closed periods kept per filter when resets keep history
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn clear(&mut self) {
        self.filters.clear();
        self.users.clear();
        self.addr_tables.clear();
        self.url_filters.clear();
        self.proc_nicknames.clear();
        self.monitor_ranges.clear();
        self.local_addr_pairs.clear();
        self.prepare_process_usage();
        self.prepare_shaper_usage();
    }

    pub fn filters(&self) -> &Collection<Filter> {
        &self.filters
    }

    pub fn filter(&self, id: u32) -> Option<&Filter> {
        self.filters.find(|filter| filter.id == id)
    }

    pub fn users(&self) -> &Collection<User> {
        &self.users
    }

    pub fn user(&self, id: u32) -> Option<&User> {
        self.users.find(|user| user.id == id)
    }

    pub fn addr_tables(&self) -> &Collection<AddrTable> {
        &self.addr_tables
    }

    pub fn url_filters(&self) -> &Collection<UrlFilter> {
        &self.url_filters
    }

    pub fn proc_nicknames(&self) -> &Collection<ProcNickname> {
        &self.proc_nicknames
    }

    pub fn monitor_ranges(&self) -> &Collection<MonitorRange> {
        &self.monitor_ranges
    }

    pub fn local_addr_pairs(&self) -> &LocalAddrPairs {
        &self.local_addr_pairs
    }

    pub fn periods(&self) -> PeriodTracker {
        self.periods
    }

    pub fn units(&self) -> ReportUnits {
        self.units
    }

    pub fn resolver(&self) -> TableResolver<'_> {
        TableResolver {
            addr_tables: &self.addr_tables,
            proc_nicknames: &self.proc_nicknames,
        }
    }

    pub fn add_filter(&mut self, filter: Filter) -> Result<(), FilterSetError> {
        if self.filter(filter.id).is_some() {
            return Err(FilterSetError::DuplicateFilterId(filter.id));
        }
        self.filters.push(filter);
        self.prepare_process_usage();
        self.prepare_shaper_usage();
        Ok(())
    }

    pub fn add_user(&mut self, user: User) -> Result<(), FilterSetError> {
        if self.user(user.id).is_some() {
            return Err(FilterSetError::DuplicateUserId(user.id));
        }
        self.users.push(user);
        Ok(())
    }

    pub fn add_addr_table(&mut self, table: AddrTable) -> Result<(), FilterSetError> {
        if self.addr_tables.find(|t| t.key == table.key).is_some() {
            return Err(FilterSetError::DuplicateAddrTableKey(table.key));
        }
        self.addr_tables.push(table);
        Ok(())
    }

    pub fn add_url_filter(&mut self, url_filter: UrlFilter) {
        self.url_filters.push(url_filter);
    }

    pub fn add_proc_nickname(&mut self, nickname: ProcNickname) {
        self.proc_nicknames.push(nickname);
    }

    pub fn add_monitor_range(&mut self, range: MonitorRange) {
        self.monitor_ranges.push(range);
    }

    /// Remove an address-group table unless a rule still refers to it.
    ///
    /// Returns `Ok(false)` when no table has that key.
    pub fn remove_addr_table(&mut self, key: u32) -> Result<bool, FilterSetError> {
        if self.is_addrtable_used(key) {
            return Err(FilterSetError::AddrTableInUse(key));
        }
        let before = self.addr_tables.len();
        self.addr_tables.retain(|table| table.key != key);
        Ok(self.addr_tables.len() != before)
    }

    /// Take over counters, quota flags and accounting points from the previous generation.
    ///
    /// Filters without a counterpart keep their zeroed counters.
    pub fn copy_counters(&mut self, previous: &FilterSet) {
        self.periods = previous.periods;
        for filter in self.filters.iter_mut() {
            if let Some(old) = previous.filter(filter.id) {
                filter.copy_counters_from(old);
            }
        }
    }

    pub fn reset_all_counters(&mut self) {
        for filter in self.filters.iter_mut() {
            filter.reset_counters();
        }
    }

    /// Reset every filter whose schedule crossed a boundary; returns the reset ids
    pub fn reset_on_schedule<W: ScheduleWindow + ?Sized>(
        &mut self,
        window: &W,
        now: DateTime<Utc>,
        keep_history: bool,
    ) -> IdList {
        let history_limit = self.history_limit;
        self.filters
            .iter_mut()
            .filter_map(|filter| {
                if !filter.reset_on_schedule(window, now, keep_history) {
                    return None;
                }
                filter.trim_history(history_limit);
                Some(filter.id)
            })
            .collect()
    }

    pub fn prepare_process_usage(&mut self) {
        self.process_usage = self.filters.iter().any(Filter::uses_process);
    }

    pub fn prepare_shaper_usage(&mut self) {
        self.shaper_usage = self.filters.iter().any(|filter| filter.speed_limit > 0);
    }

    /// Whether any rule classifies by process name or process user
    pub fn is_process_used(&self) -> bool {
        self.process_usage
    }

    /// Whether any filter has a speed limit configured
    pub fn is_shaper_used(&self) -> bool {
        self.shaper_usage
    }

    pub fn is_addrtable_used(&self, key: u32) -> bool {
        self.filters
            .iter()
            .any(|filter| filter.references_addr_table(key))
    }

    /// Active filters that classify the flow, with the matched direction
    pub fn classify(&self, flow: &FlowInfo) -> Vec<(u32, Direction)> {
        let resolver = self.resolver();
        self.filters
            .iter()
            .filter(|filter| filter.active)
            .filter_map(|filter| {
                filter
                    .classify(flow, &resolver)
                    .map(|direction| (filter.id, direction))
            })
            .collect()
    }

    /// Add `bytes` to every active filter that classifies the flow; returns their ids
    pub fn account(&mut self, flow: &FlowInfo, bytes: u64) -> Vec<u32> {
        let resolver = TableResolver {
            addr_tables: &self.addr_tables,
            proc_nicknames: &self.proc_nicknames,
        };

        let mut matched = Vec::new();
        for filter in self.filters.iter_mut().filter(|filter| filter.active) {
            if let Some(direction) = filter.classify(flow, &resolver) {
                filter.account(direction, bytes);
                matched.push(filter.id);
            }
        }
        matched
    }

    /// Close the current accounting point
    pub fn advance_period(&mut self) {
        self.periods.advance();
    }

    /// Advance every filter's quota flags; returns the signals to write
    pub fn process_traffic_limit_flags(&mut self, now: DateTime<Utc>) -> Vec<QuotaSignal> {
        self.filters
            .iter_mut()
            .flat_map(|filter| filter.evaluate_quota(now))
            .collect()
    }

    /// Users whose filter list contains `filter_id`, by user id
    pub fn select_users_by_filter_id(&self, filter_id: u32) -> BTreeMap<u32, String> {
        self.users
            .iter()
            .filter(|user| user.filter_ids.contains(filter_id))
            .map(|user| (user.id, user.name.clone()))
            .collect()
    }

    /// Report of the filters visible to `user`, in filter order
    pub fn build_user_report<F: FilterReportFormatter + ?Sized>(
        &self,
        now: DateTime<Utc>,
        user: &User,
        formatter: &F,
        item_budget: usize,
    ) -> UserReport {
        let total_points = self.periods.total_points();
        let next_point = self.periods.next_point();

        let mut report = UserReport {
            name: user.name.clone(),
            kilobyte: self.units.kilobyte,
            megabyte: self.units.megabyte,
            total_points,
            next_point,
            disabled: false,
            filters: Vec::new(),
        };

        if !user.is_user_enabled(now) {
            report.disabled = true;
            return report;
        }

        let mut matched_ids = 0;
        for filter in &self.filters {
            if !user.can_see(filter.id) {
                continue;
            }

            report
                .filters
                .push(formatter.fragment(total_points, next_point, item_budget, filter));

            // Filter ids are unique, so once every listed id is seen nothing else can match.
            if user.access == UserAccess::SpecifiedFilters {
                matched_ids += 1;
                if matched_ids == user.filter_ids.len() {
                    break;
                }
            }
        }

        report
    }

    pub fn parse_pair_record(&mut self, text: &str) -> Result<(), AddrPairError> {
        self.local_addr_pairs.parse_pair_record(text)
    }

    pub fn get_pairs_as_strings(&self) -> Vec<String> {
        self.local_addr_pairs.get_pairs_as_strings()
    }

    /// Start a pending item for a document tag; unknown tags yield `None`
    pub fn get_pending(&mut self, tag: &str) -> Option<PendingItem<'_>> {
        let item = match CollectionKind::from_tag(tag)? {
            CollectionKind::Filters => PendingItem::Filter(self.filters.begin_pending()),
            CollectionKind::AddrTables => PendingItem::AddrTable(self.addr_tables.begin_pending()),
            CollectionKind::Users => PendingItem::User(self.users.begin_pending()),
            CollectionKind::UrlFilters => PendingItem::UrlFilter(self.url_filters.begin_pending()),
            CollectionKind::ProcNicknames => {
                PendingItem::ProcNickname(self.proc_nicknames.begin_pending())
            }
            CollectionKind::MonitorRanges => {
                PendingItem::MonitorRange(self.monitor_ranges.begin_pending())
            }
        };
        Some(item)
    }

    /// Move the pending item for `tag` into its collection.
    ///
    /// Unknown tags are ignored. A rejected item is discarded.
    pub fn commit_pending(&mut self, tag: &str) -> Result<(), FilterSetError> {
        let kind = match CollectionKind::from_tag(tag) {
            Some(kind) => kind,
            None => return Ok(()),
        };
        let missing = || FilterSetError::NoPendingItem(kind.tag());

        match kind {
            CollectionKind::Filters => {
                let filter = self.filters.take_pending().ok_or_else(missing)?;
                self.add_filter(filter)
            }
            CollectionKind::AddrTables => {
                let table = self.addr_tables.take_pending().ok_or_else(missing)?;
                self.add_addr_table(table)
            }
            CollectionKind::Users => {
                let user = self.users.take_pending().ok_or_else(missing)?;
                self.add_user(user)
            }
            CollectionKind::UrlFilters => {
                let url_filter = self.url_filters.take_pending().ok_or_else(missing)?;
                self.add_url_filter(url_filter);
                Ok(())
            }
            CollectionKind::ProcNicknames => {
                let nickname = self.proc_nicknames.take_pending().ok_or_else(missing)?;
                self.add_proc_nickname(nickname);
                Ok(())
            }
            CollectionKind::MonitorRanges => {
                let range = self.monitor_ranges.take_pending().ok_or_else(missing)?;
                self.add_monitor_range(range);
                Ok(())
            }
        }
    }

    /// Populate and commit one document node in a single step
    pub fn load_node(&mut self, tag: &str, node: Value) -> Result<bool, LoadNodeError> {
        match self.get_pending(tag) {
            Some(pending) => pending.populate(node)?,
            None => return Ok(false),
        }
        self.commit_pending(tag)?;
        Ok(true)
    }
}

impl SubjectResolver for FilterSet {
    fn addr_group_contains(&self, key: u32, addr: Ipv4Addr) -> bool {
        self.resolver().addr_group_contains(key, addr)
    }

    fn process_path(&self, nickname: &str) -> Option<&str> {
        self.proc_nicknames
            .find(|proc| proc.nickname.eq_ignore_ascii_case(nickname))
            .map(|proc| proc.path_exe.as_str())
    }
}

/// Errors that can occur while loading a single document node
#[derive(Error, Debug)]
pub enum LoadNodeError {
    #[error("Invalid document node: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Commit(#[from] FilterSetError),
}
