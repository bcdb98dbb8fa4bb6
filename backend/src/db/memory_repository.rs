use chrono::Utc;
use futures::future::BoxFuture;
use shared::{AnalysisResult, ImageRecord, ImageStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ImageRecordStore, RepositoryError, apply_terminal, check_processing_transition,
    check_terminal_transition,
};

/// Process-local store used for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryImageRepository {
    records: Arc<RwLock<HashMap<Uuid, ImageRecord>>>,
}

impl InMemoryImageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageRecordStore for InMemoryImageRepository {
    fn create<'a>(
        &'a self,
        owner_id: Uuid,
        storage_path: &'a str,
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<ImageRecord, RepositoryError>> {
        Box::pin(async move {
            let record = ImageRecord::new(owner_id, storage_path.to_string(), mime_type.to_string());
            self.records.write().await.insert(record.id, record.clone());
            log::debug!("Stored image record {} in memory", record.id);
            Ok(record)
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ImageRecord>, RepositoryError>> {
        Box::pin(async move { Ok(self.records.read().await.get(&id).cloned()) })
    }

    fn mark_processing(&self, id: Uuid) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let record = records.get_mut(&id).ok_or(RepositoryError::NotFound)?;
            check_processing_transition(record)?;
            record.status = ImageStatus::Processing;
            record.updated_at = Utc::now();
            Ok(())
        })
    }

    fn update_result(
        &self,
        id: Uuid,
        raw_model_output: Option<String>,
        analysis: Option<AnalysisResult>,
        status: ImageStatus,
    ) -> BoxFuture<'_, Result<ImageRecord, RepositoryError>> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let record = records.get_mut(&id).ok_or(RepositoryError::NotFound)?;
            check_terminal_transition(record, &analysis, status)?;
            apply_terminal(record, raw_model_output, analysis, status);
            Ok(record.clone())
        })
    }

    fn delete(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ImageRecord>, RepositoryError>> {
        Box::pin(async move { Ok(self.records.write().await.remove(&id)) })
    }

    fn list_by_owner(
        &self,
        owner_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ImageRecord>, RepositoryError>> {
        Box::pin(async move {
            let mut owned: Vec<ImageRecord> = self
                .records
                .read()
                .await
                .values()
                .filter(|record| record.owner_id == owner_id)
                .cloned()
                .collect();
            owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(owned)
        })
    }
}
