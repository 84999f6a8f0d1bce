use serde::{Deserialize, Serialize};

use crate::core::filter::DEFAULT_HISTORY_LIMIT;
use crate::core::report::ReportUnits;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Accounting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    /// Filter document path (JSON)
    pub filters_file: String,
    /// Folder receiving quota flag files
    pub flag_folder: String,
    /// Evaluation tick interval in seconds
    pub tick_seconds: u64,
    /// Keep closed periods when counters are reset on schedule
    pub keep_history: bool,
    /// Closed periods kept per filter
    pub history_limit: usize,
}

/// Report configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Bytes per kilobyte in report rollups
    pub kilobyte: u64,
    /// Bytes per megabyte in report rollups
    pub megabyte: u64,
    /// History items per filter in a report
    pub item_budget: usize,
}

impl ReportConfig {
    pub fn units(&self) -> ReportUnits {
        ReportUnits {
            kilobyte: self.kilobyte,
            megabyte: self.megabyte,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder
    pub enabled: bool,
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Accounting configuration
    pub accounting: AccountingConfig,
    /// Report configuration
    pub report: ReportConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            accounting: AccountingConfig {
                filters_file: "config/filters.json".to_string(),
                flag_folder: "flags".to_string(),
                tick_seconds: 60,
                keep_history: true,
                history_limit: DEFAULT_HISTORY_LIMIT,
            },
            report: ReportConfig {
                kilobyte: 1024,
                megabyte: 1024 * 1024,
                item_budget: 10,
            },
            metrics: MetricsConfig { enabled: true },
        }
    }
}
