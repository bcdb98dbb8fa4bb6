use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Upper bound of the normalized coordinate space used by the vision model.
pub const BOX_SCALE: f64 = 1000.0;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImageStatus::Completed | ImageStatus::Failed)
    }
}

/// Bounding box as emitted by the model: `[yMin, xMin, yMax, xMax]` in a 0-1000 space.
///
/// Boxes that do not have that shape are kept verbatim so they can still be
/// listed next to their label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundingBox {
    Normalized([f64; 4]),
    Malformed(serde_json::Value),
}

impl Default for BoundingBox {
    fn default() -> Self {
        BoundingBox::Malformed(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// Coordinates clamped into the normalized space, or `None` for malformed boxes.
    pub fn clamped(&self) -> Option<[f64; 4]> {
        match self {
            BoundingBox::Normalized(coords) => Some(coords.map(|c| c.clamp(0.0, BOX_SCALE))),
            BoundingBox::Malformed(_) => None,
        }
    }

    /// Projects the box onto an image of `width` x `height` pixels for overlay drawing.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<PixelRect> {
        let [y_min, x_min, y_max, x_max] = self.clamped()?;
        let sx = width as f64 / BOX_SCALE;
        let sy = height as f64 / BOX_SCALE;
        let x = (x_min * sx).round() as u32;
        let y = (y_min * sy).round() as u32;
        Some(PixelRect {
            x,
            y,
            width: ((x_max - x_min).max(0.0) * sx).round() as u32,
            height: ((y_max - y_min).max(0.0) * sy).round() as u32,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedItem {
    pub label: String,
    pub confidence_percent: f64,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub total_area_percent: f64,
    pub weed_coverage_percent: f64,
    pub healthy_crop_coverage_percent: f64,
    pub detected_items: Vec<DetectedItem>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub storage_path: String,
    pub mime_type: String,
    pub status: ImageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_model_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(owner_id: Uuid, storage_path: String, mime_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            storage_path,
            mime_type,
            status: ImageStatus::default(),
            raw_model_output: None,
            analysis: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `analysis` is carried exactly by completed records.
    pub fn is_consistent(&self) -> bool {
        self.analysis.is_some() == (self.status == ImageStatus::Completed)
    }
}

/// Files of a batch that were accepted but could not be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailure {
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub images: Vec<ImageRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<UploadFailure>,
}
