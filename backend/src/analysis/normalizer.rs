//! Turns free-form model output into an [`AnalysisResult`].
//!
//! The model is asked for JSON only but routinely wraps it in prose or code
//! fences. Anything that cannot be read as a JSON object degrades to a
//! placeholder result instead of an error.

use serde_json::{Map, Value};
use shared::{AnalysisResult, BoundingBox, DetectedItem};

use super::geometry::coverage_percent;

pub const FALLBACK_RECOMMENDATION: &str = "Unable to analyze image details";
pub const DEFAULT_TOTAL_AREA_PERCENT: f64 = 100.0;

const WEED_LABEL: &str = "weed";
const CROP_LABEL: &str = "crop";

/// Span from the first `{` through the last `}`, if any.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

pub fn normalize(raw: &str) -> AnalysisResult {
    let parsed = extract_json_span(raw).and_then(|span| serde_json::from_str::<Value>(span).ok());
    match parsed {
        Some(Value::Object(map)) => from_object(&map),
        _ => {
            log::warn!(
                "Model output is not parseable JSON, using fallback result. Preview: {}",
                preview(raw)
            );
            fallback()
        }
    }
}

pub fn fallback() -> AnalysisResult {
    AnalysisResult {
        total_area_percent: DEFAULT_TOTAL_AREA_PERCENT,
        weed_coverage_percent: 0.0,
        healthy_crop_coverage_percent: 100.0,
        detected_items: Vec::new(),
        recommendations: vec![FALLBACK_RECOMMENDATION.to_string()],
    }
}

fn from_object(map: &Map<String, Value>) -> AnalysisResult {
    let detected_items: Vec<DetectedItem> = first_of(map, &["detectedItems", "items"])
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_item).collect())
        .unwrap_or_default();

    let recommendations = map
        .get("recommendations")
        .and_then(Value::as_array)
        .map(|recs| {
            recs.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // Explicit figures from the model win over anything derived from the boxes.
    let weed_coverage_percent = percent(map, "weedCoveragePercent")
        .unwrap_or_else(|| coverage_percent(&detected_items, WEED_LABEL));
    let healthy_crop_coverage_percent = percent(map, "healthyCropCoveragePercent")
        .unwrap_or_else(|| coverage_percent(&detected_items, CROP_LABEL));
    let total_area_percent =
        percent(map, "totalAreaPercent").unwrap_or(DEFAULT_TOTAL_AREA_PERCENT);

    AnalysisResult {
        total_area_percent,
        weed_coverage_percent,
        healthy_crop_coverage_percent,
        detected_items,
        recommendations,
    }
}

fn parse_item(value: &Value) -> Option<DetectedItem> {
    let item = value.as_object()?;
    let label = item
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let confidence_percent = first_of(item, &["confidencePercent", "confidence"])
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
        .map_or(0.0, |n| n.clamp(0.0, 100.0));
    let bounding_box = first_of(item, &["boundingBox", "box_2d"])
        .cloned()
        .map(BoundingBox::from_value)
        .unwrap_or_default();
    Some(DetectedItem {
        label,
        confidence_percent,
        bounding_box,
    })
}

fn first_of<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| map.get(*key))
}

/// Finite number under `key`, pulled into [0, 100].
fn percent(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
        .map(|n| n.clamp(0.0, 100.0))
}

pub(crate) fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
