pub mod dynamodb_repository;
pub mod memory_repository;

use chrono::Utc;
use futures::future::BoxFuture;
use shared::{AnalysisResult, ImageRecord, ImageStatus};
use uuid::Uuid;

pub use dynamodb_repository::DynamoDbImageRepository;
pub use memory_repository::InMemoryImageRepository;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: ImageStatus,
        to: ImageStatus,
    },
}

/// Persistence for image records and their analysis results.
///
/// Each record is written by exactly one analysis worker, so implementations
/// only need row-level atomicity.
pub trait ImageRecordStore: Send + Sync {
    fn create<'a>(
        &'a self,
        owner_id: Uuid,
        storage_path: &'a str,
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<ImageRecord, RepositoryError>>;

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ImageRecord>, RepositoryError>>;

    /// `pending -> processing`.
    fn mark_processing(&self, id: Uuid) -> BoxFuture<'_, Result<(), RepositoryError>>;

    /// Writes the terminal state, raw output and analysis in one step.
    fn update_result(
        &self,
        id: Uuid,
        raw_model_output: Option<String>,
        analysis: Option<AnalysisResult>,
        status: ImageStatus,
    ) -> BoxFuture<'_, Result<ImageRecord, RepositoryError>>;

    /// Removes the record and returns it, or `None` if it did not exist.
    fn delete(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ImageRecord>, RepositoryError>>;

    /// Records of one owner, newest first.
    fn list_by_owner(
        &self,
        owner_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ImageRecord>, RepositoryError>>;
}

pub(crate) fn check_processing_transition(record: &ImageRecord) -> Result<(), RepositoryError> {
    if record.status != ImageStatus::Pending {
        return Err(RepositoryError::InvalidTransition {
            id: record.id,
            from: record.status,
            to: ImageStatus::Processing,
        });
    }
    Ok(())
}

/// A terminal write must target a live record, name a terminal status, and
/// carry an analysis exactly when the status is `completed`.
pub(crate) fn check_terminal_transition(
    record: &ImageRecord,
    analysis: &Option<AnalysisResult>,
    status: ImageStatus,
) -> Result<(), RepositoryError> {
    let consistent = analysis.is_some() == (status == ImageStatus::Completed);
    if record.status.is_terminal() || !status.is_terminal() || !consistent {
        return Err(RepositoryError::InvalidTransition {
            id: record.id,
            from: record.status,
            to: status,
        });
    }
    Ok(())
}

pub(crate) fn apply_terminal(
    record: &mut ImageRecord,
    raw_model_output: Option<String>,
    analysis: Option<AnalysisResult>,
    status: ImageStatus,
) {
    record.status = status;
    record.raw_model_output = raw_model_output;
    record.analysis = analysis;
    record.updated_at = Utc::now();
}
