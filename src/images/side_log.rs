use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// One image problem tied to a product row.
#[derive(Debug, Clone, Serialize)]
pub struct SideLogEvent {
    pub group_id: String,
    pub row_id: String,
    pub image_key: String,
    pub path: String,
    pub error: String,
}

impl SideLogEvent {
    fn line(&self, timestamp: &str) -> String {
        format!(
            "[{timestamp}] Product Group: {} | Product SKU: {} | Image SKU: {} | Storage Path: {} | Error: {}\n",
            self.group_id, self.row_id, self.image_key, self.path, self.error
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SideLogSummary {
    pub missing_images: usize,
    pub upload_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_images_log: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_failures_log: Option<PathBuf>,
}

/// Append-only record of missing images and media upload failures for a run.
/// Without a directory, events only go to tracing.
#[derive(Debug)]
pub struct ImageSideLog {
    missing_path: Option<PathBuf>,
    failure_path: Option<PathBuf>,
    missing: AtomicUsize,
    failures: AtomicUsize,
    write_lock: Mutex<()>,
}

impl ImageSideLog {
    pub fn new(dir: Option<&Path>) -> Self {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        Self {
            missing_path: dir.map(|dir| dir.join(format!("missing_images_{stamp}.log"))),
            failure_path: dir.map(|dir| dir.join(format!("image_upload_failures_{stamp}.log"))),
            missing: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub async fn missing_image(&self, event: SideLogEvent) {
        self.missing.fetch_add(1, Ordering::Relaxed);
        warn!(
            target = "export.images",
            group_id = %event.group_id,
            row_id = %event.row_id,
            image_key = %event.image_key,
            path = %event.path,
            reason = %event.error,
            "missing_image"
        );
        self.append(self.missing_path.as_deref(), &event).await;
    }

    pub async fn upload_failure(&self, event: SideLogEvent) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        error!(
            target = "export.images",
            group_id = %event.group_id,
            row_id = %event.row_id,
            image_key = %event.image_key,
            path = %event.path,
            error = %event.error,
            "image_upload_failed"
        );
        self.append(self.failure_path.as_deref(), &event).await;
    }

    pub fn summary(&self) -> SideLogSummary {
        let missing_images = self.missing.load(Ordering::Relaxed);
        let upload_failures = self.failures.load(Ordering::Relaxed);
        SideLogSummary {
            missing_images,
            upload_failures,
            missing_images_log: self.missing_path.clone().filter(|_| missing_images > 0),
            upload_failures_log: self.failure_path.clone().filter(|_| upload_failures > 0),
        }
    }

    async fn append(&self, path: Option<&Path>, event: &SideLogEvent) {
        let Some(path) = path else {
            return;
        };
        let line = event.line(&Utc::now().to_rfc3339());
        let _guard = self.write_lock.lock().await;
        let result: std::io::Result<()> = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = result {
            warn!(
                target = "export.images",
                path = %path.display(),
                error = %err,
                "side_log_write_failed"
            );
        }
    }
}
