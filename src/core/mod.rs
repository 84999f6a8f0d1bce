//! Core functionality for the traffic filter service.
//!
//! This module contains the filter engine: rule classification, per-filter
//! counters and quota flags, scheduled resets, the filter set aggregate with
//! its configuration dispatch, and the live accounting engine.

pub mod addr_table;
pub mod catalog;
pub mod counters;
pub mod dispatch;
pub mod engine;
pub mod filter;
pub mod filterset;
pub mod ids;
pub mod quota;
pub mod report;
pub mod rule;
pub mod schedule;
pub mod users;

pub use addr_table::{AddrPairError, AddrRange, AddrTable, LocalAddrPairs};
pub use counters::{Direction, TrafficCounterPair};
pub use dispatch::{CollectionKind, PendingItem};
pub use engine::{AccountingEngine, EngineSettings, TickOutcome};
pub use filter::Filter;
pub use filterset::{FilterSet, FilterSetError};
pub use ids::IdList;
pub use quota::{FlagFileWriter, FlagSink, QuotaFlag, QuotaKind, QuotaSignal};
pub use report::{CounterFragmentFormatter, FilterReportFormatter, UserReport};
pub use rule::{FlowInfo, Rule, RuleSubject, SubjectType};
pub use schedule::{CalendarWindow, ResetSchedule, ScheduleWindow};
pub use users::User;
