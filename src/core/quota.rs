//! Quota flags and the signal files they produce.
//!
//! Each filter carries one [`QuotaFlag`] per threshold kind. A flag is
//! raised once when its threshold is crossed and emits exactly one
//! [`QuotaSignal`] for that crossing; it stays raised without further
//! signals until the condition clears.

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::counters::TrafficCounterPair;

/// Timestamp layout written into flag files
pub const FLAG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Threshold a flag belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Limit,
    Warn,
}

impl QuotaKind {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Limit => "limit_",
            Self::Warn => "warn_",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::Warn => "warn",
        }
    }
}

/// Debounce state of a single threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaFlag {
    #[default]
    Clear,
    Raised,
}

impl QuotaFlag {
    /// Advance the flag for this tick.
    ///
    /// Returns `true` only on the `Clear -> Raised` transition, i.e. when a
    /// signal has to be produced.
    pub fn evaluate(&mut self, exceeded: bool) -> bool {
        match (*self, exceeded) {
            (_, false) => {
                *self = Self::Clear;
                false
            }
            (Self::Clear, true) => {
                *self = Self::Raised;
                true
            }
            (Self::Raised, true) => false,
        }
    }

    pub fn is_raised(&self) -> bool {
        *self == Self::Raised
    }
}

/// Limit and warn flags of one filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaFlags {
    pub limit: QuotaFlag,
    pub warn: QuotaFlag,
}

impl QuotaFlags {
    pub fn get(&self, kind: QuotaKind) -> QuotaFlag {
        match kind {
            QuotaKind::Limit => self.limit,
            QuotaKind::Warn => self.warn,
        }
    }

    pub fn get_mut(&mut self, kind: QuotaKind) -> &mut QuotaFlag {
        match kind {
            QuotaKind::Limit => &mut self.limit,
            QuotaKind::Warn => &mut self.warn,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A threshold crossing that has to be written out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSignal {
    pub filter_id: u32,
    pub kind: QuotaKind,
    pub raised_at: DateTime<Utc>,
    pub counters: TrafficCounterPair,
}

impl QuotaSignal {
    /// `limit_<id>` or `warn_<id>`
    pub fn file_name(&self) -> String {
        format!("{}{}", self.kind.file_prefix(), self.filter_id)
    }

    /// `<timestamp> <sent>/<recv>`
    pub fn contents(&self) -> String {
        format!(
            "{} {}/{}",
            self.raised_at.format(FLAG_TIMESTAMP_FORMAT),
            self.counters.sent,
            self.counters.recv
        )
    }
}

/// Destination for quota signal files
#[cfg_attr(test, mockall::automock)]
pub trait FlagSink {
    fn write_flag(&self, name: &str, contents: &str) -> io::Result<()>;
}

/// Writes flag files into a folder
#[derive(Debug, Clone)]
pub struct FlagFileWriter {
    folder: PathBuf,
}

impl FlagFileWriter {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

impl FlagSink for FlagFileWriter {
    fn write_flag(&self, name: &str, contents: &str) -> io::Result<()> {
        std::fs::write(self.folder.join(name), contents)
    }
}

/// Write every signal, returning the ones that failed.
///
/// A failed write does not lower the flag; the caller decides how to report it.
pub fn write_signals<S: FlagSink + ?Sized>(
    sink: &S,
    signals: &[QuotaSignal],
) -> Vec<(QuotaSignal, io::Error)> {
    signals
        .iter()
        .filter_map(|signal| {
            sink.write_flag(&signal.file_name(), &signal.contents())
                .err()
                .map(|e| (signal.clone(), e))
        })
        .collect()
}
