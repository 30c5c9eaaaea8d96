use crate::catalog::rows::ProductRow;
use crate::images::cache::ImageCache;
use crate::images::discovery::ImageDiscovery;
use crate::images::side_log::{ImageSideLog, SideLogEvent};
use crate::images::{ImageMap, ImageRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Image key to the ids of the rows that reference it.
pub type WantedImages = BTreeMap<String, Vec<String>>;

/// Fans image discovery out over a bounded number of workers, reusing the
/// run-scoped cache so each key is discovered once per run.
#[derive(Clone)]
pub struct FetchCoordinator {
    discovery: ImageDiscovery,
    cache: Arc<ImageCache>,
    side_log: Arc<ImageSideLog>,
    max_workers: usize,
}

impl FetchCoordinator {
    pub fn new(
        discovery: ImageDiscovery,
        cache: Arc<ImageCache>,
        side_log: Arc<ImageSideLog>,
        max_workers: usize,
    ) -> Self {
        Self {
            discovery,
            cache,
            side_log,
            max_workers: max_workers.max(1),
        }
    }

    /// Completes only once every submitted key has finished. Keys whose
    /// discovery failed map to an empty list.
    pub async fn fetch_all(&self, group_id: &str, wanted: &WantedImages) -> ImageMap {
        let mut results = ImageMap::new();
        let mut pending: BTreeSet<String> = BTreeSet::new();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for (image_key, row_ids) in wanted {
            if let Some(cached) = self.cache.get(image_key).await {
                debug!(
                    target = "export.images",
                    group_id = %group_id,
                    image_key = %image_key,
                    records = cached.len(),
                    "image_cache_hit"
                );
                results.insert(image_key.clone(), cached);
                continue;
            }
            pending.insert(image_key.clone());
            let worker = self.clone();
            let semaphore = semaphore.clone();
            let group_id = group_id.to_string();
            let image_key = image_key.clone();
            let row_ids = row_ids.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let records = worker.fetch_one(&group_id, &image_key, &row_ids).await;
                (image_key, records)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((image_key, records)) => {
                    pending.remove(&image_key);
                    results.insert(image_key, records);
                }
                Err(err) => {
                    error!(
                        target = "export.images",
                        group_id = %group_id,
                        error = %err,
                        "image_fetch_task_failed"
                    );
                }
            }
        }
        for image_key in pending {
            results.insert(image_key, Vec::new());
        }
        results
    }

    async fn fetch_one(&self, group_id: &str, image_key: &str, row_ids: &[String]) -> Vec<ImageRecord> {
        let outcome = match self.discovery.discover(image_key).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    target = "export.images",
                    group_id = %group_id,
                    image_key = %image_key,
                    error = %err,
                    "image_fetch_failed"
                );
                return Vec::new();
            }
        };

        if outcome.records.is_empty() {
            let reason = if outcome.raw_objects == 0 {
                "no objects found under prefix".to_string()
            } else {
                format!(
                    "no valid images among {} objects",
                    outcome.raw_objects
                )
            };
            for row_id in row_ids {
                self.side_log
                    .missing_image(SideLogEvent {
                        group_id: group_id.to_string(),
                        row_id: row_id.clone(),
                        image_key: image_key.to_string(),
                        path: outcome.prefix.clone(),
                        error: reason.clone(),
                    })
                    .await;
            }
        }

        self.cache.insert(image_key, outcome.records.clone()).await;
        outcome.records
    }
}

/// Image keys referenced by `rows`, each with its dependent row ids in row
/// order. Rows without an image key are skipped.
pub fn collect_image_keys(group_id: &str, rows: &[ProductRow]) -> WantedImages {
    let mut wanted = WantedImages::new();
    for row in rows {
        match row.image_key() {
            Some(key) => wanted
                .entry(key.to_string())
                .or_default()
                .push(row.id.clone()),
            None => warn!(
                target = "export.images",
                group_id = %group_id,
                row_id = %row.id,
                "row_without_image_key"
            ),
        }
    }
    wanted
}
