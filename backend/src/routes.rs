use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use image::ImageFormat;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use shared::{ImageRecord, UploadFailure, UploadResponse};
use std::path::PathBuf;
use uuid::Uuid;

use crate::analysis::AnalysisDispatcher;
use crate::auth::AuthenticatedUser;
use crate::config::AnalysisSettings;
use crate::db::ImageRecordStore;
use crate::storage::{self, FileStorage, StorageError};

const ACCEPTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heic",
    "image/heif",
];

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_body(message: &str) -> ErrorResponse {
    ErrorResponse {
        error: message.to_string(),
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, frontend_dir: PathBuf) {
    cfg.service(web::resource("/api/health").route(web::get().to(health)))
        .service(
            web::resource("/api/images")
                .route(web::post().to(upload_images))
                .route(web::get().to(list_images)),
        )
        .service(
            web::resource("/api/images/{image_id}")
                .route(web::get().to(get_image))
                .route(web::delete().to(delete_image)),
        )
        .service(Files::new("/static", frontend_dir).index_file("index.html"));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

struct UploadedFile {
    file_name: String,
    data: Vec<u8>,
    mime_type: String,
}

/// Declared type if it is an accepted photo format, otherwise whatever the
/// bytes look like.
fn resolve_mime_type(declared: Option<&str>, data: &[u8]) -> Option<String> {
    if let Some(declared) = declared {
        if ACCEPTED_MIME_TYPES.contains(&declared) {
            return Some(declared.to_string());
        }
    }
    match image::guess_format(data).ok()? {
        ImageFormat::Jpeg => Some("image/jpeg".to_string()),
        ImageFormat::Png => Some("image/png".to_string()),
        ImageFormat::WebP => Some("image/webp".to_string()),
        _ => None,
    }
}

/// Buffers every file part of the form. Parts without a filename are plain
/// form fields and are skipped.
async fn read_files(
    payload: &mut Multipart,
    max_bytes: usize,
) -> Result<Result<Vec<UploadedFile>, StorageError>, Error> {
    let mut files = Vec::new();

    while let Some(mut field) = payload.try_next().await? {
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);
        let Some(file_name) = file_name else {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        };

        let declared = field.content_type().map(|mime| mime.essence_str().to_string());
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if let Err(e) = storage::validate_image_size(data.len() + chunk.len(), max_bytes) {
                return Ok(Err(e));
            }
            data.extend_from_slice(&chunk);
        }
        if data.is_empty() {
            continue;
        }
        match resolve_mime_type(declared.as_deref(), &data) {
            Some(mime_type) => files.push(UploadedFile {
                file_name,
                data,
                mime_type,
            }),
            None => return Ok(Err(StorageError::InvalidFormat)),
        }
    }

    Ok(Ok(files))
}

async fn store_file(
    owner_id: Uuid,
    file: &UploadedFile,
    store: &dyn ImageRecordStore,
    file_storage: &dyn FileStorage,
) -> Result<ImageRecord, &'static str> {
    let extension =
        storage::extract_file_extension(&file.mime_type).map_err(|_| "Unsupported file type")?;
    let hash = storage::calculate_image_hash(&file.data);
    let key = storage::generate_storage_key(owner_id, &hash, extension);

    file_storage
        .put(&key, &file.data, &file.mime_type)
        .await
        .map_err(|e| {
            error!("Failed to store {} for user {}: {}", file.file_name, owner_id, e);
            "Failed to store image"
        })?;

    store
        .create(owner_id, &key, &file.mime_type)
        .await
        .map_err(|e| {
            error!("Failed to create image record for user {}: {}", owner_id, e);
            "Failed to create image"
        })
}

/// Each stored file is dispatched as soon as its record exists. Files that
/// fail later in the batch are listed in `failed` next to the accepted ones.
async fn upload_images(
    user: AuthenticatedUser,
    store: web::Data<dyn ImageRecordStore>,
    file_storage: web::Data<dyn FileStorage>,
    dispatcher: web::Data<AnalysisDispatcher>,
    settings: web::Data<AnalysisSettings>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let files = match read_files(&mut payload, settings.max_upload_bytes).await? {
        Ok(files) if files.is_empty() => {
            return Ok(HttpResponse::BadRequest().json(error_body("No image files in upload")));
        }
        Ok(files) => files,
        Err(StorageError::FileTooLarge) => {
            return Ok(HttpResponse::PayloadTooLarge().json(error_body("File too large")));
        }
        Err(_) => {
            return Ok(
                HttpResponse::UnsupportedMediaType().json(error_body("Unsupported file type"))
            );
        }
    };

    let mut images = Vec::with_capacity(files.len());
    let mut failed = Vec::new();
    for file in &files {
        match store_file(user.0, file, store.get_ref(), file_storage.get_ref()).await {
            Ok(record) => {
                info!("Created image {} for user {}", record.id, user.0);
                dispatcher.dispatch(record.id);
                images.push(record);
            }
            Err(message) => failed.push(UploadFailure {
                file_name: file.file_name.clone(),
                error: message.to_string(),
            }),
        }
    }

    if images.is_empty() {
        let message = failed
            .first()
            .map_or("Failed to store image", |f| f.error.as_str());
        return Ok(HttpResponse::InternalServerError().json(error_body(message)));
    }
    Ok(HttpResponse::Accepted().json(UploadResponse { images, failed }))
}

async fn list_images(
    user: AuthenticatedUser,
    store: web::Data<dyn ImageRecordStore>,
) -> HttpResponse {
    match store.list_by_owner(user.0).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            error!("Failed to list images for user {}: {}", user.0, e);
            HttpResponse::InternalServerError().json(error_body("Failed to list images"))
        }
    }
}

fn parse_image_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

async fn get_image(
    user: AuthenticatedUser,
    store: web::Data<dyn ImageRecordStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let Some(image_id) = parse_image_id(&path.into_inner()) else {
        return HttpResponse::BadRequest().json(error_body("Invalid UUID format"));
    };
    match store.get(image_id).await {
        Ok(Some(record)) if record.owner_id == user.0 => HttpResponse::Ok().json(record),
        Ok(_) => HttpResponse::NotFound().json(error_body("Image not found")),
        Err(e) => {
            error!("Error retrieving image {}: {}", image_id, e);
            HttpResponse::InternalServerError().json(error_body("Failed to retrieve image"))
        }
    }
}

async fn delete_image(
    user: AuthenticatedUser,
    store: web::Data<dyn ImageRecordStore>,
    file_storage: web::Data<dyn FileStorage>,
    path: web::Path<String>,
) -> HttpResponse {
    let Some(image_id) = parse_image_id(&path.into_inner()) else {
        return HttpResponse::BadRequest().json(error_body("Invalid UUID format"));
    };

    match store.get(image_id).await {
        Ok(Some(record)) if record.owner_id == user.0 => {}
        Ok(_) => return HttpResponse::NotFound().json(error_body("Image not found")),
        Err(e) => {
            error!("Error retrieving image {}: {}", image_id, e);
            return HttpResponse::InternalServerError().json(error_body("Failed to delete image"));
        }
    }

    let removed = match store.delete(image_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return HttpResponse::NotFound().json(error_body("Image not found")),
        Err(e) => {
            error!("Failed to delete image record {}: {}", image_id, e);
            return HttpResponse::InternalServerError().json(error_body("Failed to delete image"));
        }
    };
    info!("Deleted image {} for user {}", image_id, user.0);

    // Identical uploads share one content-addressed file.
    let still_referenced = match store.list_by_owner(user.0).await {
        Ok(records) => records
            .iter()
            .any(|r| r.storage_path == removed.storage_path),
        Err(e) => {
            warn!("Could not check other references to {}: {}", removed.storage_path, e);
            true
        }
    };
    if !still_referenced {
        if let Err(e) = file_storage.delete(&removed.storage_path).await {
            warn!("Failed to delete file {}: {}", removed.storage_path, e);
        }
    }

    HttpResponse::NoContent().finish()
}
