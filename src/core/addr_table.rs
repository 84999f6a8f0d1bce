//! Address ranges, address-group tables and the local address-pair table.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while registering a local address pair
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddrPairError {
    #[error("Malformed address pair: {0}")]
    Malformed(String),
    #[error("Address pair {0}-{1} is reversed")]
    Reversed(Ipv4Addr, Ipv4Addr),
    #[error("Address pair {0}-{1} overlaps an existing pair")]
    Overlapping(Ipv4Addr, Ipv4Addr),
}

/// Inclusive IPv4 address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl AddrRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.start <= addr && addr <= self.end
    }
}

/// Where the ranges of an address-group table come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddrTableKind {
    /// Ranges listed in the configuration itself
    #[default]
    Original,
    /// Ranges maintained by PPP sessions
    Ppp,
    /// Ranges loaded from an external file
    ExtFile,
}

/// Address-group table referenced by rules through its key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddrTable {
    /// Table key, unique within a filter set
    pub key: u32,
    /// Description shown to the administrator
    pub descr: String,
    /// Range source
    pub kind: AddrTableKind,
    /// External file name when `kind` is `ExtFile`
    pub filename: Option<String>,
    /// Member ranges
    pub ranges: Vec<AddrRange>,
}

impl AddrTable {
    pub fn new(key: u32, descr: impl Into<String>) -> Self {
        Self {
            key,
            descr: descr.into(),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, start: Ipv4Addr, end: Ipv4Addr) -> Self {
        self.ranges.push(AddrRange::new(start, end));
        self
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.ranges.iter().any(|range| range.contains(addr))
    }
}

/// Non-overlapping address pairs keyed by their first address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalAddrPairs {
    pairs: BTreeMap<Ipv4Addr, Ipv4Addr>,
}

impl LocalAddrPairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Register a pair. The table is left untouched on error.
    pub fn add_pair(&mut self, begin: Ipv4Addr, end: Ipv4Addr) -> Result<(), AddrPairError> {
        if begin > end {
            return Err(AddrPairError::Reversed(begin, end));
        }

        // Only the closest pair starting at or before `end` can overlap.
        let overlaps = self
            .pairs
            .range((Bound::Unbounded, Bound::Included(end)))
            .next_back()
            .map_or(false, |(_, &prev_end)| prev_end >= begin);
        if overlaps {
            return Err(AddrPairError::Overlapping(begin, end));
        }

        self.pairs.insert(begin, end);
        Ok(())
    }

    /// Parse an `"addr1,addr2"` record and register it
    pub fn parse_pair_record(&mut self, text: &str) -> Result<(), AddrPairError> {
        let (first, second) = text
            .split_once(',')
            .ok_or_else(|| AddrPairError::Malformed(text.to_string()))?;

        let begin: Ipv4Addr = first
            .trim()
            .parse()
            .map_err(|_| AddrPairError::Malformed(text.to_string()))?;
        let end: Ipv4Addr = second
            .trim()
            .parse()
            .map_err(|_| AddrPairError::Malformed(text.to_string()))?;

        self.add_pair(begin, end)
    }

    /// One `"addr1,addr2"` string per pair, ordered by first address
    pub fn get_pairs_as_strings(&self) -> Vec<String> {
        self.pairs
            .iter()
            .map(|(begin, end)| format!("{},{}", begin, end))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_round_trip() {
        let mut table = LocalAddrPairs::new();
        table.parse_pair_record("192.168.111.1,192.168.111.255").unwrap();
        assert_eq!(
            table.get_pairs_as_strings(),
            vec!["192.168.111.1,192.168.111.255".to_string()]
        );
    }

    #[test]
    fn test_pairs_ordered_by_first_address() {
        let mut table = LocalAddrPairs::new();
        table.parse_pair_record("192.168.111.1,192.168.111.255").unwrap();
        table.parse_pair_record("192.168.2.1,192.168.2.255").unwrap();
        table.parse_pair_record("192.168.31.1,192.168.31.255").unwrap();

        assert_eq!(
            table.get_pairs_as_strings(),
            vec![
                "192.168.2.1,192.168.2.255".to_string(),
                "192.168.31.1,192.168.31.255".to_string(),
                "192.168.111.1,192.168.111.255".to_string(),
            ]
        );
    }

    #[test]
    fn test_malformed_records_leave_table_untouched() {
        let mut table = LocalAddrPairs::new();
        table.parse_pair_record("10.0.0.1,10.0.0.9").unwrap();

        for bad in ["10.0.1.1", "10.0.1.1,nonsense", "x,10.0.1.1", ""] {
            assert!(matches!(
                table.parse_pair_record(bad),
                Err(AddrPairError::Malformed(_))
            ));
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_overlap_and_reversed_rejected() {
        let mut table = LocalAddrPairs::new();
        table.parse_pair_record("10.0.0.10,10.0.0.20").unwrap();

        assert!(matches!(
            table.parse_pair_record("10.0.0.15,10.0.0.30"),
            Err(AddrPairError::Overlapping(_, _))
        ));
        assert!(matches!(
            table.parse_pair_record("10.0.0.1,10.0.0.10"),
            Err(AddrPairError::Overlapping(_, _))
        ));
        assert!(matches!(
            table.parse_pair_record("10.0.0.50,10.0.0.40"),
            Err(AddrPairError::Reversed(_, _))
        ));
        table.parse_pair_record("10.0.0.21,10.0.0.30").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get_pairs_as_strings(),
            vec!["10.0.0.10,10.0.0.20".to_string(), "10.0.0.21,10.0.0.30".to_string()]
        );
    }

    #[test]
    fn test_addr_table_membership() {
        let table = AddrTable::new(3, "office")
            .with_range("192.168.1.1".parse().unwrap(), "192.168.1.255".parse().unwrap());
        assert!(table.contains("192.168.1.77".parse().unwrap()));
        assert!(!table.contains("192.168.2.1".parse().unwrap()));
    }
}
