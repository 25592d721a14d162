//! Series master lookup with a per-run cache

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::SweepResult;
use crate::model::CalendarSnapshot;

/// Backend operations needed to find the master of a series
#[async_trait]
pub trait MasterSource: Send + Sync {
    /// Direct lookup by the master's item id
    async fn fetch_master(&self, master_id: &str) -> SweepResult<Option<CalendarSnapshot>>;

    /// Linear scan of the calendar for a master whose series key matches
    async fn scan_for_series(&self, series_key: &str) -> SweepResult<Option<CalendarSnapshot>>;
}

/// Cached outcome of a master lookup
#[derive(Debug, Clone)]
pub enum ResolvedMaster {
    Found(Arc<CalendarSnapshot>),
    NotFound,
}

/// Resolves series masters for instances. One resolver lives for one run;
/// entries are written once and never invalidated.
#[derive(Debug, Clone, Default)]
pub struct MasterResolver {
    cache: Arc<RwLock<HashMap<(String, String), ResolvedMaster>>>,
}

impl MasterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the master for an instance: cache, then direct id lookup, then
    /// the UID scan. Lookup failures count as "not found" for this run.
    pub async fn resolve(
        &self,
        mailbox: &str,
        series_key: &str,
        master_id: Option<&str>,
        source: &dyn MasterSource,
    ) -> Option<Arc<CalendarSnapshot>> {
        let key = (mailbox.to_lowercase(), series_key.to_string());

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                return match entry {
                    ResolvedMaster::Found(master) => Some(master.clone()),
                    ResolvedMaster::NotFound => None,
                };
            }
        }

        let mut found = None;

        if let Some(master_id) = master_id.filter(|id| !id.is_empty()) {
            match source.fetch_master(master_id).await {
                Ok(master) => found = master,
                Err(e) => debug!("Master lookup by id failed for {} in {}: {}", master_id, mailbox, e),
            }
        }

        if found.is_none() {
            debug!("Scanning calendar of {} for series {}", mailbox, series_key);
            match source.scan_for_series(series_key).await {
                Ok(master) => found = master,
                Err(e) => debug!("Series scan failed for {} in {}: {}", series_key, mailbox, e),
            }
        }

        let entry = match found {
            Some(master) => ResolvedMaster::Found(Arc::new(master)),
            None => ResolvedMaster::NotFound,
        };

        let mut cache = self.cache.write().await;
        let entry = cache.entry(key).or_insert(entry);
        match entry {
            ResolvedMaster::Found(master) => Some(master.clone()),
            ResolvedMaster::NotFound => None,
        }
    }

    /// Number of cached series
    pub async fn cached_series(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SweepError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        by_id: AtomicUsize,
        scans: AtomicUsize,
        id_fails: bool,
        has_master: bool,
    }

    #[async_trait]
    impl MasterSource for CountingSource {
        async fn fetch_master(&self, master_id: &str) -> SweepResult<Option<CalendarSnapshot>> {
            self.by_id.fetch_add(1, Ordering::SeqCst);
            if self.id_fails {
                return Err(SweepError::http(404, "gone"));
            }
            Ok(Some(CalendarSnapshot {
                item_id: master_id.to_string(),
                ..Default::default()
            }))
        }

        async fn scan_for_series(&self, _series_key: &str) -> SweepResult<Option<CalendarSnapshot>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Ok(self.has_master.then(|| CalendarSnapshot {
                item_id: "scanned".into(),
                ..Default::default()
            }))
        }
    }

    #[tokio::test]
    async fn test_direct_lookup_first() {
        let resolver = MasterResolver::new();
        let source = CountingSource::default();
        let master = resolver.resolve("a@x.com", "UID1", Some("M1"), &source).await;
        assert_eq!(master.unwrap().item_id, "M1");
        assert_eq!(source.by_id.load(Ordering::SeqCst), 1);
        assert_eq!(source.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scan_fallback_is_cached() {
        let resolver = MasterResolver::new();
        let source = CountingSource { id_fails: true, has_master: true, ..Default::default() };

        for _ in 0..3 {
            let master = resolver.resolve("a@x.com", "UID1", Some("M1"), &source).await;
            assert_eq!(master.unwrap().item_id, "scanned");
        }
        assert_eq!(source.by_id.load(Ordering::SeqCst), 1);
        assert_eq!(source.scans.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached_series().await, 1);
    }

    #[tokio::test]
    async fn test_negative_result_is_per_mailbox() {
        let resolver = MasterResolver::new();
        let missing = CountingSource { id_fails: true, ..Default::default() };
        assert!(resolver.resolve("a@x.com", "UID1", None, &missing).await.is_none());
        assert!(resolver.resolve("a@x.com", "UID1", None, &missing).await.is_none());
        assert_eq!(missing.scans.load(Ordering::SeqCst), 1);

        let present = CountingSource { id_fails: true, has_master: true, ..Default::default() };
        assert!(resolver.resolve("b@x.com", "UID1", None, &present).await.is_some());
    }
}
