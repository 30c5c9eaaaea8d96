use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportRequest {
    #[serde(default)]
    pub group_ids: Vec<String>,
    /// Export every group the loader knows about; `group_ids` is ignored.
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExportReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub groups: Vec<GroupResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub missing_images: usize,
    pub upload_failures: usize,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GroupResult {
    pub group_id: String,
    pub success: bool,
    pub product_id: Option<String>,
    pub variants_planned: usize,
    pub variants_dropped: usize,
    pub variants_created: usize,
    pub media_created: usize,
    pub variant_images_bound: usize,
    pub error_stage: Option<String>,
    pub error: Option<String>,
    pub stages: Vec<StageReport>,
}

impl GroupResult {
    pub fn new(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
