/// Instruction sent with every field photo.
pub const FIELD_ANALYSIS_PROMPT: &str = r#"You are an agronomy assistant analyzing a field photograph.
Identify weeds, healthy crop plants and bare soil in the image.

Respond with a single JSON object and nothing else, using this shape:
{
  "totalAreaPercent": <number 0-100, share of the image that shows analyzable field>,
  "weedCoveragePercent": <number 0-100>,
  "healthyCropCoveragePercent": <number 0-100>,
  "items": [
    {
      "label": "<weed | crop | bare_soil | other short category>",
      "confidence": <number 0-100>,
      "box_2d": [yMin, xMin, yMax, xMax]
    }
  ],
  "recommendations": ["<short actionable recommendation>"]
}

Bounding box coordinates are integers normalized to 0-1000 relative to the
image height (y) and width (x). Do not wrap the JSON in markdown."#;
