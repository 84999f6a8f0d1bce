//! Sibling collections of a filter set that rules and reports refer to:
//! URL filters, process nicknames and monitored ranges.
//!
//! URL matching itself happens elsewhere; these types only carry the
//! configuration.

use std::net::Ipv4Addr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::ids::IdList;

/// A single URL rule, `+host` allows and bare `host` denies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRule {
    pub allow: bool,
    pub pattern: String,
}

/// Named URL rule list applied to some or all filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlFilter {
    pub name: String,
    /// Applies to every filter instead of `filter_ids`
    pub is_any_filter: bool,
    pub filter_ids: IdList,
    /// Either a rule list or its text form, `"+allow.com deny.com"`
    #[serde(deserialize_with = "deserialize_url_rules")]
    pub rules: Vec<UrlRule>,
}

fn parse_url_rules(text: &str) -> Vec<UrlRule> {
    text.split_whitespace()
        .filter_map(|token| match token.strip_prefix('+') {
            Some("") => None,
            Some(pattern) => Some(UrlRule {
                allow: true,
                pattern: pattern.to_string(),
            }),
            None => Some(UrlRule {
                allow: false,
                pattern: token.to_string(),
            }),
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UrlRulesField {
    Text(String),
    List(Vec<UrlRule>),
}

fn deserialize_url_rules<'de, D>(deserializer: D) -> Result<Vec<UrlRule>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match UrlRulesField::deserialize(deserializer)? {
        UrlRulesField::Text(text) => parse_url_rules(&text),
        UrlRulesField::List(rules) => rules,
    })
}

/// Short name for an executable, used by process-name rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcNickname {
    pub nickname: String,
    pub path_exe: String,
}

impl ProcNickname {
    pub fn new(nickname: impl Into<String>, path_exe: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            path_exe: path_exe.into(),
        }
    }
}

/// Address range whose traffic is monitored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorRange {
    pub start_addr: Ipv4Addr,
    pub end_addr: Ipv4Addr,
    pub active: bool,
    pub comment: String,
}

impl Default for MonitorRange {
    fn default() -> Self {
        Self {
            start_addr: Ipv4Addr::UNSPECIFIED,
            end_addr: Ipv4Addr::UNSPECIFIED,
            active: true,
            comment: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urlrules() {
        let white = parse_url_rules("+microsoft.com +google.com");
        assert!(white.iter().all(|rule| rule.allow));

        let blocked = parse_url_rules("sex.com drugs.com  rock-n-roll.com +");
        assert_eq!(blocked.len(), 3);
        assert!(!blocked[0].allow);
        assert_eq!(blocked[2].pattern, "rock-n-roll.com");
    }

    #[test]
    fn test_url_rules_from_text_or_list() {
        let from_text: UrlFilter = serde_json::from_str(
            r#"{"name": "White list", "is_any_filter": true, "rules": "+microsoft.com +google.com"}"#,
        )
        .unwrap();
        assert_eq!(from_text.rules.len(), 2);
        assert!(from_text.rules[1].allow);
        assert_eq!(from_text.rules[1].pattern, "google.com");

        let from_list: UrlFilter = serde_json::from_str(
            r#"{"name": "Blocked", "rules": [{"allow": false, "pattern": "sex.com"}]}"#,
        )
        .unwrap();
        assert_eq!(from_list.rules, vec![UrlRule { allow: false, pattern: "sex.com".to_string() }]);

        let empty: UrlFilter = serde_json::from_str(r#"{"name": "Empty"}"#).unwrap();
        assert!(empty.rules.is_empty());
    }

    #[test]
    fn test_monitor_range_defaults_to_active() {
        let range: MonitorRange = serde_json::from_str(
            r#"{"start_addr": "192.168.1.1", "end_addr": "192.168.1.255", "comment": "Comment 1"}"#,
        )
        .unwrap();
        assert!(range.active);
        assert_eq!(range.end_addr, Ipv4Addr::new(192, 168, 1, 255));
    }
}
