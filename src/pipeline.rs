use crate::catalog::assembler::{AssembledGroup, assemble};
use crate::catalog::classifier::classify;
use crate::catalog::descriptor::ProductDescriptor;
use crate::catalog::rows::GroupData;
use crate::catalog::validate::validate_submission;
use crate::config::{ConfigError, ExportConfig};
use crate::images::binder::{MediaItem, plan_bindings, product_media};
use crate::images::coordinator::{FetchCoordinator, collect_image_keys};
use crate::images::side_log::{ImageSideLog, SideLogEvent};
use crate::images::{ImageCache, ImageDiscovery, ImageMap, blob_store_from_config};
use crate::models::{ExportReport, ExportRequest, GroupResult, StageReport};
use crate::retry::Submitter;
use crate::shopify::{CatalogApi, CreatedProduct, ProductSubmission, RemoteMedia, ShopifyClient};
use crate::warehouse::{GroupLoader, PostgrestGroupLoader};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Batch exporter. The image cache and side log live as long as the
/// exporter, so every run through one instance shares them.
#[derive(Clone)]
pub struct Exporter {
    loader: Arc<dyn GroupLoader>,
    catalog: Option<Arc<dyn CatalogApi>>,
    images: Option<FetchCoordinator>,
    submitter: Arc<Submitter>,
    side_log: Arc<ImageSideLog>,
}

impl Exporter {
    pub fn new(
        loader: Arc<dyn GroupLoader>,
        catalog: Option<Arc<dyn CatalogApi>>,
        images: Option<FetchCoordinator>,
        submitter: Arc<Submitter>,
        side_log: Arc<ImageSideLog>,
    ) -> Self {
        Self {
            loader,
            catalog,
            images,
            submitter,
            side_log,
        }
    }

    pub fn from_config(config: &ExportConfig) -> Result<Self, ConfigError> {
        let loader = PostgrestGroupLoader::from_config(&config.loader).ok_or_else(|| {
            ConfigError::Invalid("warehouse loader needs SUPABASE_URL and a service key".into())
        })?;
        let catalog = ShopifyClient::from_config(&config.shopify)
            .map(|client| Arc::new(client) as Arc<dyn CatalogApi>);
        if catalog.is_none() {
            warn!(target = "export.pipeline", "catalog_not_configured_dry_run_only");
        }
        let side_log = Arc::new(ImageSideLog::new(config.side_log.dir.as_deref()));
        let images = if config.images.enabled {
            let store = blob_store_from_config(&config.images)?;
            Some(FetchCoordinator::new(
                ImageDiscovery::new(store, config.images.clone()),
                Arc::new(ImageCache::new()),
                side_log.clone(),
                config.images.max_workers,
            ))
        } else {
            None
        };
        Ok(Self::new(
            Arc::new(loader),
            catalog,
            images,
            Arc::new(Submitter::from_config(&config.processing)),
            side_log,
        ))
    }

    pub async fn run(&self, request: ExportRequest) -> Result<ExportReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let before = self.side_log.summary();

        let group_ids = if request.all {
            self.loader
                .list_group_ids()
                .await
                .map_err(|err| PipelineError::remote("list_groups", err.to_string()))?
        } else {
            let mut seen = HashSet::new();
            request
                .group_ids
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty() && seen.insert(id.clone()))
                .collect()
        };
        if group_ids.is_empty() {
            return Err(PipelineError::validation("request", "no group ids to export"));
        }

        info!(
            target = "export.pipeline",
            run_id = %run_id,
            groups = group_ids.len(),
            dry_run = request.dry_run,
            "export_started"
        );
        let groups = self.process_groups(&group_ids, request.dry_run).await;
        let after = self.side_log.summary();
        let succeeded = groups.iter().filter(|group| group.success).count();
        let report = ExportReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: request.dry_run,
            failed: groups.len() - succeeded,
            succeeded,
            groups,
            missing_images: after.missing_images.saturating_sub(before.missing_images),
            upload_failures: after.upload_failures.saturating_sub(before.upload_failures),
        };
        info!(
            target = "export.pipeline",
            run_id = %run_id,
            succeeded = report.succeeded,
            failed = report.failed,
            missing_images = report.missing_images,
            upload_failures = report.upload_failures,
            "export_finished"
        );
        Ok(report)
    }

    /// Groups run one after another; a failed group never stops the batch.
    pub async fn process_groups(&self, group_ids: &[String], dry_run: bool) -> Vec<GroupResult> {
        let mut results = Vec::with_capacity(group_ids.len());
        for group_id in group_ids {
            results.push(self.process_group(group_id, dry_run).await);
        }
        results
    }

    pub async fn process_group(&self, group_id: &str, dry_run: bool) -> GroupResult {
        let mut result = GroupResult::new(group_id);
        let mut stages = Vec::new();
        match self.export_group(group_id, dry_run, &mut stages, &mut result).await {
            Ok(()) => {
                result.success = true;
                info!(
                    target = "export.pipeline",
                    group_id = %group_id,
                    product_id = result.product_id.as_deref().unwrap_or("-"),
                    variants = result.variants_created,
                    "group_exported"
                );
            }
            Err(err) => {
                error!(
                    target = "export.pipeline",
                    group_id = %group_id,
                    stage = err.stage(),
                    error = %err.detail(),
                    "group_failed"
                );
                result.error_stage = Some(err.stage().to_string());
                result.error = Some(err.detail().to_string());
            }
        }
        result.stages = stages;
        crate::metrics::group_finished(result.success);
        result
    }

    async fn export_group(
        &self,
        group_id: &str,
        dry_run: bool,
        stages: &mut Vec<StageReport>,
        result: &mut GroupResult,
    ) -> Result<(), PipelineError> {
        let group = self
            .capture_stage("load_group", stages, async {
                let group = self
                    .loader
                    .load_group(group_id)
                    .await
                    .map_err(|err| PipelineError::remote("load_group", err.to_string()))?
                    .ok_or_else(|| PipelineError::not_found("load_group", "group has no rows"))?;
                let output = json!({
                    "rows": group.rows.len(),
                    "components": group.components.len(),
                });
                Ok(StageOutcome::new(group, output))
            })
            .await?;

        // Image discovery runs while the group is classified and validated.
        let fetch = if dry_run { None } else { self.spawn_image_fetch(&group) };
        let prepared = self.prepare(&group, stages).await;
        let images = match fetch {
            Some(handle) => {
                self.capture_stage("fetch_images", stages, join_images(group_id, handle))
                    .await?
            }
            None => ImageMap::new(),
        };
        let (descriptor, assembled) = prepared?;
        result.variants_planned = assembled.variants.len();
        result.variants_dropped = assembled.dropped.len();
        if dry_run {
            return Ok(());
        }

        let catalog = self
            .catalog
            .clone()
            .ok_or_else(|| PipelineError::internal("create_product", "catalog is not configured"))?;
        let media = product_media(&assembled.variants, &images);
        let submission = ProductSubmission::new(&descriptor, &assembled);

        let created = self
            .capture_stage("create_product", stages, async {
                let created = self
                    .submitter
                    .call("create_product", || catalog.create_product(&submission))
                    .await
                    .map_err(|err| PipelineError::remote("create_product", err.to_string()))?;
                let output = json!({
                    "product_id": created.id,
                    "variants": created.variants.len(),
                    "skus": submission.skus(),
                });
                Ok(StageOutcome::new(created, output))
            })
            .await?;
        result.product_id = Some(created.id.clone());
        result.variants_created = created.variants.len();

        self.capture_stage("publish_product", stages, async {
            let output = match self
                .submitter
                .call("publish_product", || catalog.publish_product(&created.id))
                .await
            {
                Ok(()) => json!({ "published": true }),
                Err(err) => {
                    warn!(
                        target = "export.pipeline",
                        group_id = %group_id,
                        product_id = %created.id,
                        error = %err,
                        "publish_failed"
                    );
                    json!({ "published": false, "error": err.to_string() })
                }
            };
            Ok(StageOutcome::new((), output))
        })
        .await?;

        let uploaded = self
            .capture_stage(
                "create_media",
                stages,
                self.upload_media(group_id, &created, &media, &assembled, catalog.as_ref()),
            )
            .await?;
        result.media_created = uploaded.len();

        let bound = self
            .capture_stage("bind_variant_images", stages, async {
                let bindings = plan_bindings(
                    &created.variants,
                    &assembled.image_keys_by_sku,
                    &images,
                    &uploaded,
                );
                let mut bound = 0usize;
                let mut failed = Vec::new();
                for binding in &bindings {
                    match self
                        .submitter
                        .call("bind_variant_media", || {
                            catalog.bind_variant_media(&created.id, &binding.variant_id, &binding.media_id)
                        })
                        .await
                    {
                        Ok(()) => bound += 1,
                        Err(err) => {
                            warn!(
                                target = "export.pipeline",
                                group_id = %group_id,
                                sku = %binding.sku,
                                error = %err,
                                "variant_image_bind_failed"
                            );
                            failed.push(binding.sku.clone());
                        }
                    }
                }
                let output = json!({
                    "planned": bindings.len(),
                    "bound": bound,
                    "failed": failed,
                });
                Ok(StageOutcome::new(bound, output))
            })
            .await?;
        result.variant_images_bound = bound;
        Ok(())
    }

    async fn prepare(
        &self,
        group: &GroupData,
        stages: &mut Vec<StageReport>,
    ) -> Result<(ProductDescriptor, AssembledGroup), PipelineError> {
        let (descriptor, assembled) = self
            .capture_stage("assemble_variants", stages, async {
                let attributes = classify(&group.rows);
                let assembled = assemble(&group.group_id, &group.rows, &attributes);
                let descriptor = ProductDescriptor::from_group(group)
                    .ok_or_else(|| PipelineError::not_found("assemble_variants", "group has no rows"))?;
                let output = json!({
                    "title": descriptor.title,
                    "dynamic_attributes": attributes.names(),
                    "options": assembled.options,
                    "variants": assembled.variants.len(),
                    "dropped": assembled.dropped,
                });
                Ok(StageOutcome::new((descriptor, assembled), output))
            })
            .await?;

        self.capture_stage("validate", stages, async {
            let problems = validate_submission(&descriptor, &assembled);
            if !problems.is_empty() {
                return Err(PipelineError::validation("validate", problems.join("; ")));
            }
            Ok(StageOutcome::new((), json!({ "problems": [] })))
        })
        .await?;
        Ok((descriptor, assembled))
    }

    fn spawn_image_fetch(&self, group: &GroupData) -> Option<JoinHandle<ImageMap>> {
        let coordinator = self.images.clone()?;
        let wanted = collect_image_keys(&group.group_id, &group.rows);
        if wanted.is_empty() {
            return None;
        }
        let group_id = group.group_id.clone();
        Some(tokio::spawn(async move {
            coordinator.fetch_all(&group_id, &wanted).await
        }))
    }

    async fn upload_media(
        &self,
        group_id: &str,
        created: &CreatedProduct,
        media: &[MediaItem],
        assembled: &AssembledGroup,
        catalog: &dyn CatalogApi,
    ) -> Result<StageOutcome<Vec<RemoteMedia>>, PipelineError> {
        if media.is_empty() {
            return Ok(StageOutcome::new(Vec::new(), json!({ "media": 0 })));
        }
        match self
            .submitter
            .call("create_media", || catalog.create_media(&created.id, media))
            .await
        {
            Ok(uploaded) => {
                let output = json!({ "requested": media.len(), "media": uploaded.len() });
                Ok(StageOutcome::new(uploaded, output))
            }
            Err(err) => {
                for item in media {
                    let skus: Vec<&str> = assembled
                        .image_keys_by_sku
                        .iter()
                        .filter(|(_, key)| **key == item.image_key)
                        .map(|(sku, _)| sku.as_str())
                        .collect();
                    self.side_log
                        .upload_failure(SideLogEvent {
                            group_id: group_id.to_string(),
                            row_id: skus.join(","),
                            image_key: item.image_key.clone(),
                            path: item.storage_key.clone(),
                            error: err.to_string(),
                        })
                        .await;
                }
                let output = json!({
                    "requested": media.len(),
                    "media": 0,
                    "error": err.to_string(),
                });
                Ok(StageOutcome::new(Vec::new(), output))
            }
        }
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

async fn join_images(
    group_id: &str,
    handle: JoinHandle<ImageMap>,
) -> Result<StageOutcome<ImageMap>, PipelineError> {
    let images = match handle.await {
        Ok(images) => images,
        Err(err) => {
            error!(
                target = "export.images",
                group_id = %group_id,
                error = %err,
                "image_fetch_join_failed"
            );
            ImageMap::new()
        }
    };
    let records: usize = images.values().map(Vec::len).sum();
    crate::metrics::images_fetched(images.len(), records);
    let empty: Vec<&str> = images
        .iter()
        .filter(|(_, records)| records.is_empty())
        .map(|(key, _)| key.as_str())
        .collect();
    let output = json!({
        "keys": images.len(),
        "records": records,
        "empty_keys": empty,
    });
    Ok(StageOutcome::new(images, output))
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    Validation,
    NotFound,
    Remote,
    Internal,
}

impl PipelineError {
    pub fn validation(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Validation)
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::NotFound)
    }

    pub fn remote(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Remote)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Internal)
    }

    fn with_kind(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::rows::ProductRow;
    use crate::config::ImagesConfig;
    use crate::shopify::CatalogError;
    use crate::testing::{MemoryBlobStore, MemoryGroupLoader, MockCatalog, fast_submitter, row};

    struct Harness {
        exporter: Exporter,
        store: Arc<MemoryBlobStore>,
        catalog: Arc<MockCatalog>,
    }

    fn ring(id: &str, size: &str, image_key: &str) -> ProductRow {
        ProductRow {
            category: Some("RING".into()),
            metal_stamp: Some("14K".into()),
            metal_color: Some("WHITE".into()),
            metal_code: Some("14K".into()),
            ring_size: Some(size.into()),
            image_key: Some(image_key.into()),
            ..row(id)
        }
    }

    fn harness(loader: MemoryGroupLoader, catalog: MockCatalog) -> Harness {
        let store = Arc::new(
            MemoryBlobStore::new()
                .with_png("sorted-media/82/77/49/827749-1a-1.png", 400, 400)
                .with_png("sorted-media/82/77/49/827749-2a-1.png", 400, 400)
                .with_png("sorted-media/55/55/55/555555-1a-1.png", 400, 400),
        );
        let side_log = Arc::new(ImageSideLog::disabled());
        let coordinator = FetchCoordinator::new(
            ImageDiscovery::new(store.clone(), ImagesConfig::default()),
            Arc::new(ImageCache::new()),
            side_log.clone(),
            4,
        );
        let catalog = Arc::new(catalog);
        let exporter = Exporter::new(
            Arc::new(loader),
            Some(catalog.clone() as Arc<dyn CatalogApi>),
            Some(coordinator),
            Arc::new(fast_submitter()),
            side_log,
        );
        Harness {
            exporter,
            store,
            catalog,
        }
    }

    fn request(ids: &[&str]) -> ExportRequest {
        ExportRequest {
            group_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exports_group_with_media_and_bindings() {
        let loader = MemoryGroupLoader::new().with_group(
            "G1",
            vec![
                ring("A", "7", "827749"),
                ring("B", "8", "555555"),
                ring("C", "7.0", "827749"),
            ],
        );
        let h = harness(loader, MockCatalog::new());
        let report = h.exporter.run(request(&["G1"])).await.unwrap();

        assert_eq!(report.succeeded, 1);
        let group = &report.groups[0];
        assert!(group.success, "{:?}", group.error);
        assert_eq!(group.variants_created, 2);
        assert_eq!(group.variants_dropped, 1);
        assert_eq!(group.media_created, 3);
        assert_eq!(group.variant_images_bound, 2);
        let names: Vec<&str> = group.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "load_group",
                "assemble_variants",
                "validate",
                "fetch_images",
                "create_product",
                "publish_product",
                "create_media",
                "bind_variant_images",
            ]
        );
        let created = h.catalog.created_products();
        assert_eq!(created[0].skus(), vec!["A", "B"]);
        assert_eq!(h.catalog.published(), vec!["gid://p/1"]);
        assert_eq!(h.catalog.media().len(), 3);
        assert_eq!(
            h.catalog.bindings(),
            vec![
                ("gid://variant/A".to_string(), "media-827749 - Image 1".to_string()),
                ("gid://variant/B".to_string(), "media-555555 - Image 1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failing_group_does_not_stop_the_batch() {
        let loader = MemoryGroupLoader::new()
            .with_group("BAD", vec![row("X")])
            .with_group("G1", vec![ring("A", "7", "827749"), ring("B", "8", "827749")]);
        let h = harness(loader, MockCatalog::new());
        let report = h
            .exporter
            .run(request(&["BAD", "MISSING", "G1"]))
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.groups[0].error_stage.as_deref(), Some("validate"));
        assert!(report.groups[0].error.as_deref().unwrap().contains("variant X has no option values"));
        assert_eq!(report.groups[1].error_stage.as_deref(), Some("load_group"));
        assert!(report.groups[2].success);
    }

    #[tokio::test]
    async fn images_are_discovered_once_across_groups() {
        let loader = MemoryGroupLoader::new()
            .with_group("G1", vec![ring("A", "7", "827749"), ring("B", "8", "827749")])
            .with_group("G2", vec![ring("C", "7", "827749"), ring("D", "8", "827749")]);
        let h = harness(loader, MockCatalog::new());
        let report = h.exporter.run(request(&["G1", "G2"])).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(h.store.list_calls(), 1);
    }

    #[tokio::test]
    async fn media_failure_leaves_product_imageless() {
        let loader = MemoryGroupLoader::new()
            .with_group("G1", vec![ring("A", "7", "827749"), ring("B", "8", "827749")]);
        let h = harness(loader, MockCatalog::new().failing_media());
        let report = h.exporter.run(request(&["G1"])).await.unwrap();
        let group = &report.groups[0];
        assert!(group.success);
        assert_eq!(group.media_created, 0);
        assert_eq!(group.variant_images_bound, 0);
        assert_eq!(report.upload_failures, 2);
    }

    #[tokio::test]
    async fn permanent_create_error_fails_only_that_group() {
        let loader = MemoryGroupLoader::new()
            .with_group("G1", vec![ring("A", "7", "827749"), ring("B", "8", "827749")]);
        let catalog = MockCatalog::new().create_errors(vec![CatalogError::UserErrors(vec![
            crate::shopify::UserError {
                field: Some(vec!["handle".into()]),
                message: "already taken".into(),
            },
        ])]);
        let h = harness(loader, catalog);
        let report = h.exporter.run(request(&["G1"])).await.unwrap();
        let group = &report.groups[0];
        assert!(!group.success);
        assert_eq!(group.error_stage.as_deref(), Some("create_product"));
        assert_eq!(h.catalog.create_calls(), 1);
    }

    #[tokio::test]
    async fn rate_limited_create_is_retried() {
        let loader = MemoryGroupLoader::new()
            .with_group("G1", vec![ring("A", "7", "827749"), ring("B", "8", "827749")]);
        let catalog = MockCatalog::new().create_errors(vec![CatalogError::RateLimited {
            retry_after: Some(std::time::Duration::from_millis(1)),
        }]);
        let h = harness(loader, catalog);
        let report = h.exporter.run(request(&["G1"])).await.unwrap();
        assert!(report.groups[0].success);
        assert_eq!(h.catalog.create_calls(), 2);
    }

    #[tokio::test]
    async fn dry_run_stops_after_validation() {
        let loader = MemoryGroupLoader::new()
            .with_group("G1", vec![ring("A", "7", "827749"), ring("B", "8", "827749")]);
        let h = harness(loader, MockCatalog::new());
        let report = h
            .exporter
            .run(ExportRequest {
                dry_run: true,
                ..request(&["G1"])
            })
            .await
            .unwrap();
        let group = &report.groups[0];
        assert!(group.success);
        assert_eq!(group.variants_planned, 2);
        assert_eq!(group.stages.len(), 3);
        assert_eq!(h.catalog.create_calls(), 0);
        assert_eq!(h.store.list_calls(), 0);
    }

    #[tokio::test]
    async fn all_groups_come_from_the_loader() {
        let loader = MemoryGroupLoader::new()
            .with_group("G2", vec![ring("C", "7", "827749"), ring("D", "8", "827749")])
            .with_group("G1", vec![ring("A", "7", "827749"), ring("B", "8", "827749")]);
        let h = harness(loader, MockCatalog::new());
        let report = h
            .exporter
            .run(ExportRequest {
                all: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = report.groups.iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(ids, vec!["G1", "G2"]);
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let h = harness(MemoryGroupLoader::new(), MockCatalog::new());
        let err = h.exporter.run(request(&[" "])).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Validation);
        assert_eq!(err.stage(), "request");
    }
}
