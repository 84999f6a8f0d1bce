//! Configuration management for the traffic filter service.
//!
//! This module loads the service configuration from a TOML file and
//! environment variables, and streams the JSON filter document into a
//! [`FilterSet`] through the tag dispatch.

use std::env;
use std::fs;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::core::addr_table::AddrPairError;
use crate::core::filterset::{FilterSet, LoadNodeError};
use crate::core::report::PeriodTracker;
use crate::models::Config;

/// Document key holding `"addr1,addr2"` local address-pair records
pub const LOCAL_ADDR_PAIRS_KEY: &str = "LocalAddrPairs";

/// Errors that can occur while loading the filter document
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read filter document: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse filter document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Filter document must be an object of tag arrays")]
    NotAnObject,
    #[error("Item {index} of {tag}: {source}")]
    Node {
        tag: String,
        index: usize,
        #[source]
        source: LoadNodeError,
    },
    #[error("Local address pair {index}: {source}")]
    Pair {
        index: usize,
        #[source]
        source: AddrPairError,
    },
}

/// Load configuration from the config file and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());
    build_config(&config_file)
}

fn build_config(config_file: &str) -> Result<Config, ConfigError> {
    let defaults = Config::default();

    let config = ConfigBuilder::builder()
        .set_default("server.host", defaults.server.host)?
        .set_default("server.port", i64::from(defaults.server.port))?
        .set_default("accounting.filters_file", defaults.accounting.filters_file)?
        .set_default("accounting.flag_folder", defaults.accounting.flag_folder)?
        .set_default("accounting.tick_seconds", defaults.accounting.tick_seconds as i64)?
        .set_default("accounting.keep_history", defaults.accounting.keep_history)?
        .set_default("accounting.history_limit", defaults.accounting.history_limit as i64)?
        .set_default("report.kilobyte", defaults.report.kilobyte as i64)?
        .set_default("report.megabyte", defaults.report.megabyte as i64)?
        .set_default("report.item_budget", defaults.report.item_budget as i64)?
        .set_default("metrics.enabled", defaults.metrics.enabled)?
        .add_source(File::with_name(config_file).required(false))
        .add_source(Environment::with_prefix("TRAFFIC").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// Build a filter set generation from the configured filter document
pub fn build_filterset(config: &Config) -> Result<FilterSet, LoadError> {
    let tick = Duration::from_secs(config.accounting.tick_seconds);
    let mut filterset = FilterSet::new()
        .with_units(config.report.units())
        .with_periods(PeriodTracker::for_tick(tick))
        .with_history_limit(config.accounting.history_limit);
    load_filter_file(&config.accounting.filters_file, &mut filterset)?;
    Ok(filterset)
}

/// Read a filter document from disk into `filterset`
pub fn load_filter_file(path: &str, filterset: &mut FilterSet) -> Result<(), LoadError> {
    let text = fs::read_to_string(path)?;
    load_filter_document(&text, filterset)
}

/// Stream a filter document into `filterset`.
///
/// The document is an object whose keys are dispatch tags and whose values
/// are arrays of items. Unknown tags are skipped.
pub fn load_filter_document(text: &str, filterset: &mut FilterSet) -> Result<(), LoadError> {
    let document: Value = serde_json::from_str(text)?;
    let sections = document.as_object().ok_or(LoadError::NotAnObject)?;

    for (tag, section) in sections {
        let items = match section.as_array() {
            Some(items) => items,
            None => {
                debug!("Skipping non-array section {}", tag);
                continue;
            }
        };

        if tag == LOCAL_ADDR_PAIRS_KEY {
            for (index, record) in items.iter().enumerate() {
                let text = record.as_str().unwrap_or_default();
                filterset
                    .parse_pair_record(text)
                    .map_err(|source| LoadError::Pair { index, source })?;
            }
            continue;
        }

        for (index, item) in items.iter().enumerate() {
            let loaded = filterset
                .load_node(tag, item.clone())
                .map_err(|source| LoadError::Node {
                    tag: tag.clone(),
                    index,
                    source,
                })?;
            if !loaded {
                debug!("Skipping unknown tag {}", tag);
                break;
            }
        }
    }

    Ok(())
}
