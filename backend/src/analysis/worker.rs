use shared::{AnalysisResult, ImageStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::normalizer::{self, normalize};
use super::prompts::FIELD_ANALYSIS_PROMPT;
use crate::db::{ImageRecordStore, RepositoryError};
use crate::storage::{FileStorage, StorageError};
use crate::vision::{VisionError, VisionModel};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Image record {0} not found")]
    RecordMissing(Uuid),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Vision model error: {0}")]
    Vision(#[from] VisionError),
}

/// Drives one image record from `pending` to a terminal state.
#[derive(Clone)]
pub struct AnalysisWorker {
    store: Arc<dyn ImageRecordStore>,
    storage: Arc<dyn FileStorage>,
    model: Arc<dyn VisionModel>,
    model_timeout: Duration,
}

impl AnalysisWorker {
    pub fn new(
        store: Arc<dyn ImageRecordStore>,
        storage: Arc<dyn FileStorage>,
        model: Arc<dyn VisionModel>,
        model_timeout: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            model,
            model_timeout,
        }
    }

    /// Runs the analysis once and returns the terminal status it wrote, or
    /// `None` when the record was gone or no longer pending.
    pub async fn run(&self, id: Uuid) -> Option<ImageStatus> {
        match self.store.mark_processing(id).await {
            Ok(()) => log::info!("Analysis started for image {}", id),
            Err(RepositoryError::NotFound) => {
                log::info!("Image {} was removed before analysis started", id);
                return None;
            }
            Err(e @ RepositoryError::InvalidTransition { .. }) => {
                log::warn!("Skipping analysis: {}", e);
                return None;
            }
            Err(e) => {
                log::error!("Could not mark image {} as processing: {}", id, e);
                return self.fail(id).await;
            }
        }

        match self.analyze(id).await {
            Ok((raw, analysis)) => self.complete(id, raw, analysis).await,
            Err(AnalysisError::RecordMissing(_)) => {
                log::info!("Image {} was deleted during analysis", id);
                None
            }
            Err(e) => {
                log::error!("Analysis of image {} failed: {}", id, e);
                self.fail(id).await
            }
        }
    }

    async fn analyze(&self, id: Uuid) -> Result<(String, AnalysisResult), AnalysisError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(AnalysisError::RecordMissing(id))?;
        let image = self.storage.read(&record.storage_path).await?;

        let raw = tokio::time::timeout(
            self.model_timeout,
            self.model
                .analyze(&image, &record.mime_type, FIELD_ANALYSIS_PROMPT),
        )
        .await
        .map_err(|_| VisionError::Timeout(self.model_timeout))??;

        log::debug!(
            "Model output for image {}: {}",
            id,
            normalizer::preview(&raw)
        );
        let analysis = normalize(&raw);
        Ok((raw, analysis))
    }

    async fn complete(&self, id: Uuid, raw: String, analysis: AnalysisResult) -> Option<ImageStatus> {
        match self
            .store
            .update_result(id, Some(raw), Some(analysis), ImageStatus::Completed)
            .await
        {
            Ok(record) => {
                log::info!(
                    "Image {} completed: weed {}%, crop {}%, {} items",
                    id,
                    record
                        .analysis
                        .as_ref()
                        .map_or(0.0, |a| a.weed_coverage_percent),
                    record
                        .analysis
                        .as_ref()
                        .map_or(0.0, |a| a.healthy_crop_coverage_percent),
                    record.analysis.as_ref().map_or(0, |a| a.detected_items.len()),
                );
                Some(ImageStatus::Completed)
            }
            Err(RepositoryError::NotFound) => {
                log::info!("Image {} was deleted before its result was stored", id);
                None
            }
            Err(e) => {
                log::error!("Could not store result for image {}: {}", id, e);
                self.fail(id).await
            }
        }
    }

    async fn fail(&self, id: Uuid) -> Option<ImageStatus> {
        match self
            .store
            .update_result(id, None, None, ImageStatus::Failed)
            .await
        {
            Ok(_) => {
                log::info!("Image {} marked failed", id);
                Some(ImageStatus::Failed)
            }
            Err(e) => {
                log::error!("Could not mark image {} as failed: {}", id, e);
                None
            }
        }
    }
}

/// Fire-and-forget dispatch with a cap on concurrently running analyses.
#[derive(Clone)]
pub struct AnalysisDispatcher {
    worker: AnalysisWorker,
    permits: Arc<Semaphore>,
}

impl AnalysisDispatcher {
    pub fn new(worker: AnalysisWorker, max_concurrent: usize) -> Self {
        Self {
            worker,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn dispatch(&self, id: Uuid) -> JoinHandle<Option<ImageStatus>> {
        let worker = self.worker.clone();
        let permits = self.permits.clone();
        log::debug!("Queued analysis for image {}", id);
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    log::error!("Analysis queue closed, image {} left pending: {}", id, e);
                    return None;
                }
            };
            worker.run(id).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryImageRepository;
    use crate::storage::LocalFileStorage;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Text(&'static str),
        Error,
        Hang,
        /// Deletes the record behind the worker's back, then answers.
        DeleteRecord(Arc<InMemoryImageRepository>, Uuid),
    }

    struct ScriptedModel {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl VisionModel for ScriptedModel {
        fn analyze<'a>(
            &'a self,
            _image: &'a [u8],
            _mime_type: &'a str,
            _prompt: &'a str,
        ) -> BoxFuture<'a, Result<String, VisionError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match &self.reply {
                    Reply::Text(text) => Ok(text.to_string()),
                    Reply::Error => Err(VisionError::EmptyResponse),
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(String::new())
                    }
                    Reply::DeleteRecord(repo, id) => {
                        repo.delete(*id).await.unwrap();
                        Ok("{}".to_string())
                    }
                }
            })
        }
    }

    /// Delegates to the in-memory store but refuses to store completed results.
    struct RejectingCompletionStore {
        inner: Arc<InMemoryImageRepository>,
    }

    impl ImageRecordStore for RejectingCompletionStore {
        fn create<'a>(
            &'a self,
            owner_id: Uuid,
            storage_path: &'a str,
            mime_type: &'a str,
        ) -> BoxFuture<'a, Result<shared::ImageRecord, RepositoryError>> {
            self.inner.create(owner_id, storage_path, mime_type)
        }

        fn get(
            &self,
            id: Uuid,
        ) -> BoxFuture<'_, Result<Option<shared::ImageRecord>, RepositoryError>> {
            self.inner.get(id)
        }

        fn mark_processing(&self, id: Uuid) -> BoxFuture<'_, Result<(), RepositoryError>> {
            self.inner.mark_processing(id)
        }

        fn update_result(
            &self,
            id: Uuid,
            raw_model_output: Option<String>,
            analysis: Option<AnalysisResult>,
            status: ImageStatus,
        ) -> BoxFuture<'_, Result<shared::ImageRecord, RepositoryError>> {
            if status == ImageStatus::Completed {
                return Box::pin(async {
                    Err(RepositoryError::DynamoDb("item size exceeded".to_string()))
                });
            }
            self.inner.update_result(id, raw_model_output, analysis, status)
        }

        fn delete(
            &self,
            id: Uuid,
        ) -> BoxFuture<'_, Result<Option<shared::ImageRecord>, RepositoryError>> {
            self.inner.delete(id)
        }

        fn list_by_owner(
            &self,
            owner_id: Uuid,
        ) -> BoxFuture<'_, Result<Vec<shared::ImageRecord>, RepositoryError>> {
            self.inner.list_by_owner(owner_id)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: Arc<InMemoryImageRepository>,
        storage: Arc<LocalFileStorage>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let storage = Arc::new(LocalFileStorage::new(dir.path()));
            Self {
                _dir: dir,
                repo: Arc::new(InMemoryImageRepository::new()),
                storage,
            }
        }

        fn worker(&self, model: Arc<ScriptedModel>, timeout: Duration) -> AnalysisWorker {
            AnalysisWorker::new(self.repo.clone(), self.storage.clone(), model, timeout)
        }

        async fn upload(&self, key: &str) -> Uuid {
            self.storage.put(key, b"img", "image/jpeg").await.unwrap();
            self.repo
                .create(Uuid::new_v4(), key, "image/jpeg")
                .await
                .unwrap()
                .id
        }
    }

    #[tokio::test]
    async fn successful_analysis_completes_record() {
        let fx = Fixture::new();
        let id = fx.upload("images/a.jpg").await;
        let model = ScriptedModel::new(Reply::Text(
            r#"Sure! {"weedCoveragePercent": 12, "healthyCropCoveragePercent": 80, "items": [], "recommendations": ["Weed the rows"]}"#,
        ));

        let status = fx.worker(model, Duration::from_secs(5)).run(id).await;
        assert_eq!(status, Some(ImageStatus::Completed));

        let record = fx.repo.get(id).await.unwrap().unwrap();
        assert!(record.is_consistent());
        let analysis = record.analysis.unwrap();
        assert_eq!(analysis.weed_coverage_percent, 12.0);
        assert_eq!(analysis.recommendations, vec!["Weed the rows"]);
        assert!(record.raw_model_output.unwrap().starts_with("Sure!"));
    }

    #[tokio::test]
    async fn unparseable_output_still_completes() {
        let fx = Fixture::new();
        let id = fx.upload("images/b.jpg").await;
        let model = ScriptedModel::new(Reply::Text("I cannot see any plants."));

        let status = fx.worker(model, Duration::from_secs(5)).run(id).await;
        assert_eq!(status, Some(ImageStatus::Completed));

        let record = fx.repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.analysis, Some(normalizer::fallback()));
    }

    #[tokio::test]
    async fn blank_reply_completes_with_fallback() {
        let fx = Fixture::new();
        let id = fx.upload("images/blank.jpg").await;
        let status = fx
            .worker(ScriptedModel::new(Reply::Text("  ")), Duration::from_secs(5))
            .run(id)
            .await;
        assert_eq!(status, Some(ImageStatus::Completed));

        let record = fx.repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.analysis, Some(normalizer::fallback()));
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn failed_result_write_falls_back_to_failed() {
        let fx = Fixture::new();
        let id = fx.upload("images/reject.jpg").await;
        let store = Arc::new(RejectingCompletionStore {
            inner: fx.repo.clone(),
        });
        let worker = AnalysisWorker::new(
            store,
            fx.storage.clone(),
            ScriptedModel::new(Reply::Text(r#"{"weedCoveragePercent": 3}"#)),
            Duration::from_secs(5),
        );

        assert_eq!(worker.run(id).await, Some(ImageStatus::Failed));
        let record = fx.repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, ImageStatus::Failed);
        assert!(record.analysis.is_none());
        assert!(record.raw_model_output.is_none());
    }

    #[tokio::test]
    async fn record_deleted_during_analysis_is_abandoned() {
        let fx = Fixture::new();
        let id = fx.upload("images/gone.jpg").await;
        let model = ScriptedModel::new(Reply::DeleteRecord(fx.repo.clone(), id));

        let status = fx.worker(model.clone(), Duration::from_secs(5)).run(id).await;
        assert_eq!(status, None);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert!(fx.repo.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn model_error_fails_record() {
        let fx = Fixture::new();
        let id = fx.upload("images/c.jpg").await;
        let status = fx
            .worker(ScriptedModel::new(Reply::Error), Duration::from_secs(5))
            .run(id)
            .await;
        assert_eq!(status, Some(ImageStatus::Failed));

        let record = fx.repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, ImageStatus::Failed);
        assert!(record.analysis.is_none());
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn missing_file_fails_without_calling_model() {
        let fx = Fixture::new();
        let id = fx
            .repo
            .create(Uuid::new_v4(), "images/never-written.jpg", "image/jpeg")
            .await
            .unwrap()
            .id;
        let model = ScriptedModel::new(Reply::Text("{}"));

        let status = fx.worker(model.clone(), Duration::from_secs(5)).run(id).await;
        assert_eq!(status, Some(ImageStatus::Failed));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_model_call_times_out() {
        let fx = Fixture::new();
        let id = fx.upload("images/d.jpg").await;
        let status = fx
            .worker(ScriptedModel::new(Reply::Hang), Duration::from_secs(30))
            .run(id)
            .await;
        assert_eq!(status, Some(ImageStatus::Failed));
    }

    #[tokio::test]
    async fn terminal_records_are_not_reprocessed() {
        let fx = Fixture::new();
        let id = fx.upload("images/e.jpg").await;
        let model = ScriptedModel::new(Reply::Text("{}"));
        let worker = fx.worker(model.clone(), Duration::from_secs(5));

        assert_eq!(worker.run(id).await, Some(ImageStatus::Completed));
        assert_eq!(worker.run(id).await, None);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_record_is_ignored() {
        let fx = Fixture::new();
        let worker = fx.worker(ScriptedModel::new(Reply::Text("{}")), Duration::from_secs(5));
        assert_eq!(worker.run(Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn dispatcher_runs_each_record_independently() {
        let fx = Fixture::new();
        let model = ScriptedModel::new(Reply::Text(r#"{"weedCoveragePercent": 1}"#));
        let dispatcher = AnalysisDispatcher::new(fx.worker(model.clone(), Duration::from_secs(5)), 2);

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(fx.upload(&format!("images/{i}.jpg")).await);
        }
        let handles: Vec<_> = ids.iter().map(|id| dispatcher.dispatch(*id)).collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(ImageStatus::Completed));
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 5);
        for id in ids {
            let record = fx.repo.get(id).await.unwrap().unwrap();
            assert_eq!(record.status, ImageStatus::Completed);
        }
    }
}
