pub mod analysis;
pub mod auth;
pub mod config;
pub mod db;
pub mod poller;
pub mod routes;
pub mod storage;
pub mod vision;

use actix_web::web;
use std::sync::Arc;

use analysis::AnalysisDispatcher;
use config::AnalysisSettings;
use db::ImageRecordStore;
use storage::FileStorage;

/// Handles shared by every HTTP worker, opened once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn ImageRecordStore>,
    pub storage: Arc<dyn FileStorage>,
    pub dispatcher: AnalysisDispatcher,
    pub settings: AnalysisSettings,
}

impl AppServices {
    pub fn register(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::from(self.store.clone()))
            .app_data(web::Data::from(self.storage.clone()))
            .app_data(web::Data::new(self.dispatcher.clone()))
            .app_data(web::Data::new(self.settings.clone()));
    }
}
