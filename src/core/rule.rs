//! Classification rules.
//!
//! A [`Rule`] pairs a source subject with a destination subject. Subjects
//! are either address based (host, range, address-group table) or process
//! based (executable nickname, owning user). Address-group keys and process
//! nicknames are resolved through a [`SubjectResolver`], which the filter
//! set implements over its own tables.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::core::counters::Direction;

/// Classifier kind of a rule subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectType {
    Any,
    Host,
    Range,
    AddrGroup,
    ProcName,
    ProcUser,
}

impl SubjectType {
    pub fn is_process(&self) -> bool {
        matches!(self, Self::ProcName | Self::ProcUser)
    }
}

/// Process that owns a flow, when known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Full path of the executable
    pub exe_path: String,
    /// Account the process runs under
    pub user: String,
}

/// Traffic flow presented for classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowInfo {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub process: Option<ProcessInfo>,
}

impl FlowInfo {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            src,
            dst,
            process: None,
        }
    }

    pub fn with_process(mut self, exe_path: impl Into<String>, user: impl Into<String>) -> Self {
        self.process = Some(ProcessInfo {
            exe_path: exe_path.into(),
            user: user.into(),
        });
        self
    }
}

/// Lookups a rule needs from the tables around it
pub trait SubjectResolver {
    /// Whether `addr` belongs to the address-group table `key`
    fn addr_group_contains(&self, key: u32, addr: Ipv4Addr) -> bool;

    /// Executable path registered for a process nickname
    fn process_path(&self, nickname: &str) -> Option<&str>;
}

/// One side of a rule
///
/// The address-group key only exists on the `AddrGroup` variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleSubject {
    #[default]
    Any,
    Host { addr: Ipv4Addr },
    Range { start: Ipv4Addr, end: Ipv4Addr },
    AddrGroup { key: u32 },
    ProcName { nickname: String },
    ProcUser { user: String },
}

impl RuleSubject {
    pub fn subject_type(&self) -> SubjectType {
        match self {
            Self::Any => SubjectType::Any,
            Self::Host { .. } => SubjectType::Host,
            Self::Range { .. } => SubjectType::Range,
            Self::AddrGroup { .. } => SubjectType::AddrGroup,
            Self::ProcName { .. } => SubjectType::ProcName,
            Self::ProcUser { .. } => SubjectType::ProcUser,
        }
    }

    pub fn address_group_key(&self) -> Option<u32> {
        match self {
            Self::AddrGroup { key } => Some(*key),
            _ => None,
        }
    }

    fn matches<R: SubjectResolver + ?Sized>(
        &self,
        addr: Ipv4Addr,
        process: Option<&ProcessInfo>,
        resolver: &R,
    ) -> bool {
        match self {
            Self::Any => true,
            Self::Host { addr: host } => *host == addr,
            Self::Range { start, end } => *start <= addr && addr <= *end,
            Self::AddrGroup { key } => resolver.addr_group_contains(*key, addr),
            Self::ProcName { nickname } => match (process, resolver.process_path(nickname)) {
                (Some(process), Some(path)) => process.exe_path.eq_ignore_ascii_case(path),
                _ => false,
            },
            Self::ProcUser { user } => {
                process.map_or(false, |process| process.user.eq_ignore_ascii_case(user))
            }
        }
    }
}

/// Classification predicate over a flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// Source subject
    pub src: RuleSubject,
    /// Destination subject
    pub dst: RuleSubject,
    /// Also match the reversed flow, counted as received traffic
    pub mirrored: bool,
}

impl Rule {
    pub fn new(src: RuleSubject, dst: RuleSubject) -> Self {
        Self {
            src,
            dst,
            mirrored: false,
        }
    }

    pub fn mirrored(mut self) -> Self {
        self.mirrored = true;
        self
    }

    pub fn uses_process(&self) -> bool {
        self.src.subject_type().is_process() || self.dst.subject_type().is_process()
    }

    pub fn references_addr_table(&self, key: u32) -> bool {
        self.src.address_group_key() == Some(key) || self.dst.address_group_key() == Some(key)
    }

    /// Classify a flow: forward matches are sent traffic, mirrored matches received
    pub fn classify<R: SubjectResolver + ?Sized>(
        &self,
        flow: &FlowInfo,
        resolver: &R,
    ) -> Option<Direction> {
        let process = flow.process.as_ref();

        if self.src.matches(flow.src, process, resolver)
            && self.dst.matches(flow.dst, process, resolver)
        {
            return Some(Direction::Sent);
        }

        if self.mirrored
            && self.src.matches(flow.dst, process, resolver)
            && self.dst.matches(flow.src, process, resolver)
        {
            return Some(Direction::Received);
        }

        None
    }
}
