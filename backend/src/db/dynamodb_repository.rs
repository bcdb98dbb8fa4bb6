use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use shared::{AnalysisResult, ImageRecord, ImageStatus};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{ImageRecordStore, RepositoryError};

type Item = HashMap<String, AttributeValue>;

/// Image records in a DynamoDB table keyed by `id` (S).
#[derive(Clone)]
pub struct DynamoDbImageRepository {
    client: Client,
    images_table: String,
}

impl DynamoDbImageRepository {
    pub fn new(client: Client, images_table: String) -> Self {
        Self {
            client,
            images_table,
        }
    }

    async fn put_record(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        log::info!(
            "Creating image record {} in DynamoDB table '{}'",
            record.id,
            self.images_table
        );
        let item = record_to_item(record)?;
        self.client
            .put_item()
            .table_name(&self.images_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| {
                log::error!("DynamoDB put_item failed for image {}: {:?}", record.id, e);
                RepositoryError::DynamoDb(e.to_string())
            })?;
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<ImageRecord>, RepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.images_table)
            .key("id", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(item_to_record(&item)?)),
            None => Ok(None),
        }
    }

    /// Fails with `InvalidTransition` when the stored status is not the expected one.
    async fn transition_error(&self, id: Uuid, to: ImageStatus) -> RepositoryError {
        match self.get_record(id).await {
            Ok(Some(record)) => RepositoryError::InvalidTransition {
                id,
                from: record.status,
                to,
            },
            Ok(None) => RepositoryError::NotFound,
            Err(e) => e,
        }
    }

    async fn set_processing(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.images_table)
            .key("id", AttributeValue::S(id.to_string()))
            .update_expression("SET #status = :processing, updated_at = :now")
            .condition_expression("#status = :pending")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":processing", status_value(ImageStatus::Processing))
            .expression_attribute_values(":pending", status_value(ImageStatus::Pending))
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Err(self.transition_error(id, ImageStatus::Processing).await)
            }
            Err(e) => {
                log::error!("DynamoDB update_item failed for image {}: {:?}", id, e);
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn write_terminal(
        &self,
        id: Uuid,
        raw_model_output: Option<String>,
        analysis: Option<AnalysisResult>,
        status: ImageStatus,
    ) -> Result<ImageRecord, RepositoryError> {
        let consistent = analysis.is_some() == (status == ImageStatus::Completed);
        if !status.is_terminal() || !consistent {
            return Err(self.transition_error(id, status).await);
        }

        let mut set_clauses = vec!["#status = :status", "updated_at = :now"];
        let mut remove_clauses = Vec::new();
        let mut request = self
            .client
            .update_item()
            .table_name(&self.images_table)
            .key("id", AttributeValue::S(id.to_string()))
            .condition_expression("#status IN (:pending, :processing)")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", status_value(status))
            .expression_attribute_values(":pending", status_value(ImageStatus::Pending))
            .expression_attribute_values(":processing", status_value(ImageStatus::Processing))
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .return_values(ReturnValue::AllNew);

        match raw_model_output {
            Some(raw) => {
                set_clauses.push("raw_model_output = :raw");
                request = request.expression_attribute_values(":raw", AttributeValue::S(raw));
            }
            None => remove_clauses.push("raw_model_output"),
        }
        match &analysis {
            Some(analysis) => {
                set_clauses.push("analysis = :analysis");
                request = request.expression_attribute_values(
                    ":analysis",
                    AttributeValue::S(serde_json::to_string(analysis)?),
                );
            }
            None => remove_clauses.push("analysis"),
        }

        let mut expression = format!("SET {}", set_clauses.join(", "));
        if !remove_clauses.is_empty() {
            expression.push_str(&format!(" REMOVE {}", remove_clauses.join(", ")));
        }

        let result = request.update_expression(expression).send().await;
        match result {
            Ok(output) => {
                let item = output.attributes.ok_or(RepositoryError::NotFound)?;
                log::info!("Image {} marked {}", id, status);
                item_to_record(&item)
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Err(self.transition_error(id, status).await)
            }
            Err(e) => {
                log::error!("DynamoDB update_item failed for image {}: {:?}", id, e);
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn delete_record(&self, id: Uuid) -> Result<Option<ImageRecord>, RepositoryError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.images_table)
            .key("id", AttributeValue::S(id.to_string()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.attributes {
            Some(item) if !item.is_empty() => Ok(Some(item_to_record(&item)?)),
            _ => Ok(None),
        }
    }

    async fn scan_owner(&self, owner_id: Uuid) -> Result<Vec<ImageRecord>, RepositoryError> {
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let result = self
                .client
                .scan()
                .table_name(&self.images_table)
                .filter_expression("owner_id = :owner_id")
                .expression_attribute_values(":owner_id", AttributeValue::S(owner_id.to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

            for item in result.items() {
                records.push(item_to_record(item)?);
            }

            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

impl ImageRecordStore for DynamoDbImageRepository {
    fn create<'a>(
        &'a self,
        owner_id: Uuid,
        storage_path: &'a str,
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<ImageRecord, RepositoryError>> {
        Box::pin(async move {
            let record = ImageRecord::new(owner_id, storage_path.to_string(), mime_type.to_string());
            self.put_record(&record).await?;
            Ok(record)
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ImageRecord>, RepositoryError>> {
        Box::pin(self.get_record(id))
    }

    fn mark_processing(&self, id: Uuid) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(self.set_processing(id))
    }

    fn update_result(
        &self,
        id: Uuid,
        raw_model_output: Option<String>,
        analysis: Option<AnalysisResult>,
        status: ImageStatus,
    ) -> BoxFuture<'_, Result<ImageRecord, RepositoryError>> {
        Box::pin(self.write_terminal(id, raw_model_output, analysis, status))
    }

    fn delete(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ImageRecord>, RepositoryError>> {
        Box::pin(self.delete_record(id))
    }

    fn list_by_owner(
        &self,
        owner_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ImageRecord>, RepositoryError>> {
        Box::pin(self.scan_owner(owner_id))
    }
}

fn status_value(status: ImageStatus) -> AttributeValue {
    AttributeValue::S(status.to_string())
}

fn record_to_item(record: &ImageRecord) -> Result<Item, RepositoryError> {
    let mut item = HashMap::new();
    item.insert("id".to_string(), AttributeValue::S(record.id.to_string()));
    item.insert(
        "owner_id".to_string(),
        AttributeValue::S(record.owner_id.to_string()),
    );
    item.insert(
        "storage_path".to_string(),
        AttributeValue::S(record.storage_path.clone()),
    );
    item.insert(
        "mime_type".to_string(),
        AttributeValue::S(record.mime_type.clone()),
    );
    item.insert("status".to_string(), status_value(record.status));
    if let Some(raw) = &record.raw_model_output {
        item.insert("raw_model_output".to_string(), AttributeValue::S(raw.clone()));
    }
    if let Some(analysis) = &record.analysis {
        item.insert(
            "analysis".to_string(),
            AttributeValue::S(serde_json::to_string(analysis)?),
        );
    }
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(record.created_at.to_rfc3339()),
    );
    item.insert(
        "updated_at".to_string(),
        AttributeValue::S(record.updated_at.to_rfc3339()),
    );
    Ok(item)
}

fn item_to_record(item: &Item) -> Result<ImageRecord, RepositoryError> {
    let analysis = match optional_string(item, "analysis") {
        Some(json) => Some(serde_json::from_str(json)?),
        None => None,
    };

    Ok(ImageRecord {
        id: parse_uuid(required_string(item, "id")?)?,
        owner_id: parse_uuid(required_string(item, "owner_id")?)?,
        storage_path: required_string(item, "storage_path")?.to_string(),
        mime_type: required_string(item, "mime_type")?.to_string(),
        status: ImageStatus::from_str(required_string(item, "status")?)
            .map_err(|e| RepositoryError::InvalidData(format!("status: {}", e)))?,
        raw_model_output: optional_string(item, "raw_model_output").map(str::to_string),
        analysis,
        created_at: parse_timestamp(required_string(item, "created_at")?)?,
        updated_at: parse_timestamp(required_string(item, "updated_at")?)?,
    })
}

fn optional_string<'a>(item: &'a Item, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(|av| av.as_s().ok())
        .map(String::as_str)
}

fn required_string<'a>(item: &'a Item, key: &str) -> Result<&'a str, RepositoryError> {
    optional_string(item, key)
        .ok_or_else(|| RepositoryError::InvalidData(format!("Missing {} attribute", key)))
}

fn parse_uuid(value: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(value).map_err(|e| RepositoryError::InvalidData(e.to_string()))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::InvalidData(e.to_string()))
}
