//! Allow-list configuration
//!
//! These types are shared with the binary crate, which loads them from
//! the TOML configuration file. The allow-list is immutable once built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::CoreError;

/// A permitted upstream API base and its path rewrite rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListEntry {
    /// Route key, the first segment of the inbound path
    pub key: String,
    /// Absolute http(s) base URL, without trailing slash
    pub base: String,
    /// Version-like segments dropped when they lead the tail
    /// (e.g. `avatar` declares `["v2"]`)
    #[serde(default)]
    pub strip_leading_segments: Vec<String>,
}

impl AllowListEntry {
    pub fn new(key: &str, base: &str) -> Self {
        Self {
            key: key.to_string(),
            base: base.to_string(),
            strip_leading_segments: vec![],
        }
    }

    pub fn with_stripped_segment(mut self, segment: &str) -> Self {
        self.strip_leading_segments.push(segment.to_string());
        self
    }

    /// Whether the first tail segment should be dropped for this base
    pub fn strips(&self, segment: &str) -> bool {
        self.strip_leading_segments.iter().any(|s| s == segment)
    }
}

/// Default table of upstream API bases
pub fn default_allow_list() -> Vec<AllowListEntry> {
    vec![
        AllowListEntry::new("users", "https://users.roblox.com"),
        AllowListEntry::new("games", "https://games.roblox.com"),
        AllowListEntry::new("catalog", "https://catalog.roblox.com"),
        AllowListEntry::new("thumbnails", "https://thumbnails.roblox.com"),
        AllowListEntry::new("economy", "https://economy.roblox.com"),
        AllowListEntry::new("avatar", "https://avatar.roblox.com").with_stripped_segment("v2"),
    ]
}

/// Validate a route key
///
/// Keys are a single, non-empty path segment.
pub fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("Route key cannot be empty".to_string());
    }
    if key.contains('/') || key.contains('?') || key.contains('#') {
        return Err(format!("Route key '{}' must be a single path segment", key));
    }
    Ok(())
}

/// Validated, immutable map of route key to upstream base
#[derive(Debug, Clone)]
pub struct AllowList {
    entries: HashMap<String, AllowListEntry>,
}

impl AllowList {
    /// Build an allow-list, rejecting duplicate keys and malformed bases
    ///
    /// A trailing slash on a base is trimmed.
    pub fn new(entries: Vec<AllowListEntry>) -> Result<Self, CoreError> {
        let mut map = HashMap::with_capacity(entries.len());

        for mut entry in entries {
            validate_key(&entry.key).map_err(CoreError::InvalidConfig)?;

            entry.base = entry.base.trim_end_matches('/').to_string();
            let parsed = Url::parse(&entry.base).map_err(|e| {
                CoreError::InvalidConfig(format!(
                    "Base '{}' for route '{}' is not a valid URL: {}",
                    entry.base, entry.key, e
                ))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(CoreError::InvalidConfig(format!(
                    "Base '{}' for route '{}' must be an absolute http(s) URL",
                    entry.base, entry.key
                )));
            }

            if map.contains_key(&entry.key) {
                return Err(CoreError::InvalidConfig(format!(
                    "Duplicate route key '{}'",
                    entry.key
                )));
            }
            map.insert(entry.key.clone(), entry);
        }

        Ok(Self { entries: map })
    }

    pub fn get(&self, key: &str) -> Option<&AllowListEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether `url` targets the scheme and host of an allow-listed base
    pub fn permits_url(&self, url: &str) -> bool {
        let Ok(target) = Url::parse(url) else {
            return false;
        };

        self.entries.values().any(|entry| {
            Url::parse(&entry.base)
                .map(|base| {
                    base.scheme() == target.scheme()
                        && base.host_str() == target.host_str()
                        && base.port_or_known_default() == target.port_or_known_default()
                })
                .unwrap_or(false)
        })
    }
}

impl Default for AllowList {
    fn default() -> Self {
        let entries = default_allow_list()
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        Self { entries }
    }
}
