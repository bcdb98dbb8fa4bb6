use shared::{BoundingBox, DetectedItem, BOX_SCALE};

/// Fraction of the image covered by a normalized box, in `[0, 1]`.
///
/// Coordinates are clamped into the normalized space first; inverted or
/// malformed boxes cover nothing.
pub fn box_area(bbox: &BoundingBox) -> f64 {
    let Some([y_min, x_min, y_max, x_max]) = bbox.clamped() else {
        return 0.0;
    };
    let width = (x_max - x_min).max(0.0);
    let height = (y_max - y_min).max(0.0);
    (width * height) / (BOX_SCALE * BOX_SCALE)
}

/// Percentage of the image covered by items whose label contains `needle`,
/// ignoring case. Overlapping boxes are summed, so the result is clamped and
/// rounded to a whole percent.
pub fn coverage_percent(items: &[DetectedItem], needle: &str) -> f64 {
    let needle = needle.to_lowercase();
    let fraction: f64 = items
        .iter()
        .filter(|item| item.label.to_lowercase().contains(&needle))
        .map(|item| box_area(&item.bounding_box))
        .sum();
    (fraction * 100.0).clamp(0.0, 100.0).round()
}
