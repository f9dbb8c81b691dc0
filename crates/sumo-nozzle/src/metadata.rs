// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Application topology metadata used to enrich events.
//!
//! The cache is populated and refreshed outside of the routing path; the router only reads
//! from it through [`AppMetadataSource`].

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::event::EventKind;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppMetadata {
    pub name: String,
    pub space_id: String,
    pub space_name: String,
    pub org_id: String,
    pub org_name: String,
}

pub trait AppMetadataSource: Send + Sync {
    fn lookup(&self, app_id: &str) -> Option<AppMetadata>;

    /// Events from ignored applications are counted but never shipped.
    fn is_ignored(&self, app_id: &str) -> bool;
}

/// Source used when no selected event kind carries an application id.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyMetadataCache;

impl AppMetadataSource for EmptyMetadataCache {
    fn lookup(&self, _app_id: &str) -> Option<AppMetadata> {
        None
    }

    fn is_ignored(&self, _app_id: &str) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataCache {
    apps: RwLock<HashMap<String, AppMetadata>>,
    ignored: RwLock<HashSet<String>>,
}

impl InMemoryMetadataCache {
    #[allow(clippy::expect_used)]
    pub fn insert(&self, app_id: &str, metadata: AppMetadata) {
        self.apps
            .write()
            .expect("lock poisoned")
            .insert(app_id.to_string(), metadata);
    }

    #[allow(clippy::expect_used)]
    pub fn ignore(&self, app_id: &str) {
        self.ignored
            .write()
            .expect("lock poisoned")
            .insert(app_id.to_string());
    }

    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.read().expect("lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AppMetadataSource for InMemoryMetadataCache {
    #[allow(clippy::expect_used)]
    fn lookup(&self, app_id: &str) -> Option<AppMetadata> {
        self.apps.read().expect("lock poisoned").get(app_id).cloned()
    }

    #[allow(clippy::expect_used)]
    fn is_ignored(&self, app_id: &str) -> bool {
        self.ignored.read().expect("lock poisoned").contains(app_id)
    }
}

/// Whether any of the selected kinds carries an application id worth looking up.
#[must_use]
pub fn metadata_needed<'a>(kinds: impl IntoIterator<Item = &'a EventKind>) -> bool {
    kinds.into_iter().any(|kind| {
        matches!(
            kind,
            EventKind::LogMessage
                | EventKind::ContainerMetric
                | EventKind::HttpStart
                | EventKind::HttpStop
                | EventKind::HttpStartStop
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache() {
        let cache = EmptyMetadataCache;
        assert!(cache.lookup("app").is_none());
        assert!(!cache.is_ignored("app"));
    }

    #[test]
    fn test_in_memory_cache() {
        let cache = InMemoryMetadataCache::default();
        assert!(cache.is_empty());
        cache.insert(
            "app",
            AppMetadata {
                name: "web".to_string(),
                ..Default::default()
            },
        );
        cache.ignore("noisy");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("app").map(|app| app.name), Some("web".to_string()));
        assert!(cache.is_ignored("noisy"));
        assert!(!cache.is_ignored("app"));
    }

    #[test]
    fn test_metadata_needed() {
        assert!(metadata_needed(&[EventKind::ValueMetric, EventKind::LogMessage]));
        assert!(!metadata_needed(&[EventKind::ValueMetric, EventKind::CounterEvent]));
        assert!(metadata_needed(&[EventKind::HttpStart]));
        assert!(metadata_needed(&[EventKind::HttpStop]));
        assert!(!metadata_needed(&[EventKind::Error]));
    }
}
