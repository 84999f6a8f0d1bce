//! Filter id lists.
//!
//! Users, URL filters and the scheduled-reset sweep all exchange sets of
//! filter ids. The text form is a whitespace-separated list, e.g. `"1 2 3"`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors that can occur while parsing an id list
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdListError {
    #[error("Invalid filter id: {0}")]
    InvalidId(String),
}

/// Ordered set of filter ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdList {
    ids: BTreeSet<u32>,
}

impl IdList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u32) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<u32> for IdList {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for IdList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in &self.ids {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", id)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for IdList {
    type Err = IdListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_whitespace()
            .map(|token| {
                token
                    .parse::<u32>()
                    .map_err(|_| IdListError::InvalidId(token.to_string()))
            })
            .collect()
    }
}

// Serialized in its text form so documents read the same as the flag sweep output.
impl Serialize for IdList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IdList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let ids: IdList = "7 1 2  3 9999".parse().unwrap();
        assert_eq!(ids.len(), 5);
        assert!(ids.contains(9999));
        assert_eq!(ids.to_string(), "1 2 3 7 9999");
    }

    #[test]
    fn test_duplicates_collapse() {
        let ids: IdList = "4 4 4".parse().unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_invalid_token() {
        assert_eq!(
            "1 two 3".parse::<IdList>(),
            Err(IdListError::InvalidId("two".to_string()))
        );
    }

    #[test]
    fn test_empty_list() {
        let ids: IdList = "".parse().unwrap();
        assert!(ids.is_empty());
        assert_eq!(ids.to_string(), "");
    }

    #[test]
    fn test_serde_text_form() {
        let ids: IdList = serde_json::from_str("\"3 1\"").unwrap();
        assert_eq!(serde_json::to_string(&ids).unwrap(), "\"1 3\"");
    }
}
