use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::vision::gemini_client::{DEFAULT_ENDPOINT, DEFAULT_MODEL};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("Failed to read config file: {0}")]
    File(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    DynamoDb { images_table: String },
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    S3 { bucket: String },
    Local { root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub max_upload_bytes: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_concurrent: 4,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl AnalysisSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisFile {
    #[serde(default)]
    analysis: AnalysisSettings,
}

impl AnalysisSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let file: AnalysisFile = serde_yaml::from_str(config_str)?;
        if file.analysis.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "analysis.timeout_secs",
                value: "0".to_string(),
            });
        }
        Ok(file.analysis)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub base_url: Option<String>,
    pub jwt_secret: String,
    pub store: StoreBackend,
    pub storage: StorageBackend,
    pub vision: VisionConfig,
    pub analysis: AnalysisSettings,
    pub frontend_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));

        let port = match lookup("PORT") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value })?,
            None => 8081,
        };

        let store = match lookup("STORE_BACKEND").as_deref() {
            None | Some("memory") => StoreBackend::Memory,
            Some("dynamodb") => StoreBackend::DynamoDb {
                images_table: required("DYNAMODB_IMAGES_TABLE")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let storage = match lookup("STORAGE_BACKEND").as_deref() {
            None | Some("local") => StorageBackend::Local {
                root: lookup("UPLOAD_DIR")
                    .unwrap_or_else(|| "uploads".to_string())
                    .into(),
            },
            Some("s3") => StorageBackend::S3 {
                bucket: required("S3_BUCKET_NAME")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let vision = VisionConfig {
            endpoint: lookup("VISION_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: lookup("VISION_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: required("VISION_API_KEY")?,
        };

        let analysis = match lookup("ANALYSIS_CONFIG") {
            Some(path) => AnalysisSettings::load(Path::new(&path))?,
            None => AnalysisSettings::default(),
        };

        Ok(Self {
            port,
            base_url: lookup("BASE_URL"),
            jwt_secret: required("JWT_SECRET")?,
            store,
            storage,
            vision,
            analysis,
            frontend_dir: lookup("FRONTEND_DIR")
                .unwrap_or_else(|| "frontend/dist".to_string())
                .into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_to_local_backends() {
        let config =
            AppConfig::from_lookup(lookup(&[("JWT_SECRET", "s"), ("VISION_API_KEY", "k")]))
                .unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(
            config.storage,
            StorageBackend::Local {
                root: PathBuf::from("uploads")
            }
        );
        assert_eq!(config.vision.model, DEFAULT_MODEL);
        assert_eq!(config.analysis, AnalysisSettings::default());
    }

    #[test]
    fn aws_backends_need_their_names() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("VISION_API_KEY", "k"),
            ("STORE_BACKEND", "dynamodb"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DYNAMODB_IMAGES_TABLE")));

        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("VISION_API_KEY", "k"),
            ("STORE_BACKEND", "dynamodb"),
            ("DYNAMODB_IMAGES_TABLE", "images"),
            ("STORAGE_BACKEND", "s3"),
            ("S3_BUCKET_NAME", "photos"),
        ]))
        .unwrap();
        assert_eq!(
            config.store,
            StoreBackend::DynamoDb {
                images_table: "images".into()
            }
        );
        assert_eq!(
            config.storage,
            StorageBackend::S3 {
                bucket: "photos".into()
            }
        );
    }

    #[test]
    fn missing_secret_is_reported() {
        let err = AppConfig::from_lookup(lookup(&[("VISION_API_KEY", "k")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn bad_port_is_invalid() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("VISION_API_KEY", "k"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }

    #[test]
    fn analysis_settings_from_yaml() {
        let settings = AnalysisSettings::from_yaml(
            "analysis:\n  timeout_secs: 15\n  max_concurrent: 8\n",
        )
        .unwrap();
        assert_eq!(settings.timeout(), Duration::from_secs(15));
        assert_eq!(settings.max_concurrent, 8);
        assert_eq!(
            settings.max_upload_bytes,
            AnalysisSettings::default().max_upload_bytes
        );
    }

    #[test]
    fn analysis_settings_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.yaml");
        std::fs::write(&path, "analysis:\n  max_upload_bytes: 1024\n").unwrap();
        let settings = AnalysisSettings::load(&path).unwrap();
        assert_eq!(settings.max_upload_bytes, 1024);
        assert_eq!(settings.timeout_secs, 60);
    }

    #[test]
    fn shipped_analysis_config_matches_defaults() {
        let manifest_dir = env!("CARGO_MANIFEST_DIR");
        let path = format!("{}/../config/analysis.yaml", manifest_dir);
        let settings = AnalysisSettings::load(Path::new(&path)).unwrap();
        assert_eq!(settings, AnalysisSettings::default());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = AnalysisSettings::from_yaml("analysis:\n  timeout_secs: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "analysis.timeout_secs",
                ..
            }
        ));
    }
}
