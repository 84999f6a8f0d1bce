//! Tag dispatch for configuration documents.
//!
//! A document builder walks a configuration tree and, for each item tag it
//! meets, asks the filter set for a pending item to populate. When the item
//! is complete it commits it, which moves the pending value into its
//! collection. Half-populated items are never visible in the collections.

use serde_json::Value;

use crate::core::addr_table::AddrTable;
use crate::core::catalog::{MonitorRange, ProcNickname, UrlFilter};
use crate::core::filter::Filter;
use crate::core::users::User;

pub const TAG_FILTER: &str = "Filter";
pub const TAG_ADDR_TABLE: &str = "AddrTable";
pub const TAG_USER: &str = "User";
pub const TAG_URL_FILTER: &str = "UrlFilter";
pub const TAG_PROC_NICKNAME: &str = "ProcNickname";
pub const TAG_MONITOR_RANGE: &str = "MonitorRange";

/// Collections reachable through document tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Filters,
    AddrTables,
    Users,
    UrlFilters,
    ProcNicknames,
    MonitorRanges,
}

const TAG_TABLE: [(&str, CollectionKind); 6] = [
    (TAG_FILTER, CollectionKind::Filters),
    (TAG_ADDR_TABLE, CollectionKind::AddrTables),
    (TAG_USER, CollectionKind::Users),
    (TAG_URL_FILTER, CollectionKind::UrlFilters),
    (TAG_PROC_NICKNAME, CollectionKind::ProcNicknames),
    (TAG_MONITOR_RANGE, CollectionKind::MonitorRanges),
];

impl CollectionKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        TAG_TABLE
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, kind)| *kind)
    }

    pub fn tag(&self) -> &'static str {
        TAG_TABLE
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(name, _)| *name)
            .unwrap_or_default()
    }
}

/// Ordered items plus at most one pending item
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    items: Vec<T>,
    pending: Option<T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            pending: None,
        }
    }
}

impl<T> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn find<P: FnMut(&T) -> bool>(&self, mut predicate: P) -> Option<&T> {
        self.items.iter().find(|item| predicate(item))
    }

    pub fn retain<P: FnMut(&T) -> bool>(&mut self, predicate: P) {
        self.items.retain(predicate);
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.pending = None;
    }

    /// Remove the pending item without committing it
    pub fn take_pending(&mut self) -> Option<T> {
        self.pending.take()
    }
}

impl<T: Default> Collection<T> {
    /// Start a fresh pending item, discarding any unfinished one
    pub fn begin_pending(&mut self) -> &mut T {
        self.pending.insert(T::default())
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Handle to the pending item of one collection
#[derive(Debug)]
pub enum PendingItem<'a> {
    Filter(&'a mut Filter),
    AddrTable(&'a mut AddrTable),
    User(&'a mut User),
    UrlFilter(&'a mut UrlFilter),
    ProcNickname(&'a mut ProcNickname),
    MonitorRange(&'a mut MonitorRange),
}

impl PendingItem<'_> {
    /// Populate the pending item from a JSON document node
    pub fn populate(self, node: Value) -> Result<(), serde_json::Error> {
        match self {
            Self::Filter(item) => *item = serde_json::from_value(node)?,
            Self::AddrTable(item) => *item = serde_json::from_value(node)?,
            Self::User(item) => *item = serde_json::from_value(node)?,
            Self::UrlFilter(item) => *item = serde_json::from_value(node)?,
            Self::ProcNickname(item) => *item = serde_json::from_value(node)?,
            Self::MonitorRange(item) => *item = serde_json::from_value(node)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_table_is_bijective() {
        for (tag, kind) in TAG_TABLE {
            assert_eq!(CollectionKind::from_tag(tag), Some(kind));
            assert_eq!(kind.tag(), tag);
        }
        assert_eq!(CollectionKind::from_tag("Unknown"), None);
        assert_eq!(CollectionKind::from_tag("filter"), None);
    }

    #[test]
    fn test_pending_item_hidden_until_taken() {
        let mut users: Collection<User> = Collection::new();
        users.begin_pending().name = "half".to_string();
        assert!(users.is_empty());

        let user = users.take_pending().unwrap();
        assert_eq!(user.name, "half");
        users.push(user);
        assert_eq!(users.len(), 1);
        assert!(users.take_pending().is_none());
    }

    #[test]
    fn test_populate_pending_filter() {
        let mut filters: Collection<Filter> = Collection::new();
        PendingItem::Filter(filters.begin_pending())
            .populate(json!({"id": 3, "name": "dns", "speed_limit": 1000}))
            .unwrap();

        let filter = filters.take_pending().unwrap();
        assert_eq!(filter.id, 3);
        assert!(filter.active);
    }

    #[test]
    fn test_populate_rejects_bad_node() {
        let mut ranges: Collection<MonitorRange> = Collection::new();
        let pending = PendingItem::MonitorRange(ranges.begin_pending());
        assert!(pending.populate(json!({"start_addr": "not an ip"})).is_err());
    }
}
