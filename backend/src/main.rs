use actix_cors::Cors;
use actix_web::{App, HttpServer};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use fieldscan::AppServices;
use fieldscan::analysis::{AnalysisDispatcher, AnalysisWorker};
use fieldscan::auth::{AuthMiddleware, JwtService};
use fieldscan::config::{AppConfig, StorageBackend, StoreBackend};
use fieldscan::db::{DynamoDbImageRepository, ImageRecordStore, InMemoryImageRepository};
use fieldscan::routes::configure_routes;
use fieldscan::storage::{FileStorage, LocalFileStorage, S3Service};
use fieldscan::vision::GeminiClient;
use std::env;
use std::sync::Arc;

fn startup_error(message: String) -> std::io::Error {
    log::error!("{}", message);
    std::io::Error::other(message)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config =
        AppConfig::from_env().map_err(|e| startup_error(format!("Invalid configuration: {}", e)))?;

    let needs_aws = matches!(config.store, StoreBackend::DynamoDb { .. })
        || matches!(config.storage, StorageBackend::S3 { .. });
    let aws_config = if needs_aws {
        Some(aws_config::defaults(BehaviorVersion::latest()).load().await)
    } else {
        None
    };

    let store: Arc<dyn ImageRecordStore> = match (&config.store, &aws_config) {
        (StoreBackend::DynamoDb { images_table }, Some(aws)) => {
            log::info!("Using DynamoDB table '{}' for image records", images_table);
            Arc::new(DynamoDbImageRepository::new(
                DynamoDbClient::new(aws),
                images_table.clone(),
            ))
        }
        _ => {
            log::warn!("Using in-memory image records; data is lost on restart");
            Arc::new(InMemoryImageRepository::new())
        }
    };

    let storage: Arc<dyn FileStorage> = match (&config.storage, &aws_config) {
        (StorageBackend::S3 { bucket }, Some(aws)) => {
            log::info!("Storing uploads in S3 bucket '{}'", bucket);
            Arc::new(S3Service::new(S3Client::new(aws), bucket.clone()))
        }
        (StorageBackend::Local { root }, _) => {
            log::info!("Storing uploads under {}", root.display());
            Arc::new(LocalFileStorage::new(root.clone()))
        }
        (StorageBackend::S3 { .. }, None) => {
            return Err(startup_error("S3 storage requires AWS configuration".into()));
        }
    };

    let model = GeminiClient::new(
        &config.vision.endpoint,
        config.vision.model.clone(),
        config.vision.api_key.clone(),
        config.analysis.timeout(),
    )
    .map_err(|e| startup_error(format!("Failed to create vision client: {}", e)))?;
    log::info!(
        "Vision model {} (timeout {:?}, {} concurrent analyses)",
        config.vision.model,
        config.analysis.timeout(),
        config.analysis.max_concurrent
    );

    let worker = AnalysisWorker::new(
        store.clone(),
        storage.clone(),
        Arc::new(model),
        config.analysis.timeout(),
    );
    let services = AppServices {
        store,
        storage,
        dispatcher: AnalysisDispatcher::new(worker, config.analysis.max_concurrent),
        settings: config.analysis.clone(),
    };

    let auth_middleware = AuthMiddleware::new(JwtService::new(&config.jwt_secret));
    let frontend_dir = config.frontend_dir.clone();

    if let Some(base_url) = &config.base_url {
        log::info!("Public URL: {}", base_url);
    }
    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(auth_middleware.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .configure(|cfg| services.register(cfg))
            .configure(|cfg| configure_routes(cfg, frontend_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
