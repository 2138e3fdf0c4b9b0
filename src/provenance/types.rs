use serde::{Deserialize, Serialize};

/// Axis-aligned box in page coordinates, origin top-left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        ((self.x_min + self.x_max) / 2.0, (self.y_min + self.y_max) / 2.0)
    }

    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

/// One OCR text region. Never mutated by the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrBlock {
    pub page: u32,
    pub block_index: usize,
    pub text: String,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Where in the scanned document an event was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    pub anchor_terms: Vec<String>,
    /// `block_index` of the matched block.
    pub matched_block: Option<usize>,
    /// Number of anchor terms found in the matched block.
    pub match_score: usize,
    pub page: Option<u32>,
    pub bbox: Option<BoundingBox>,
    /// `block_index` values of nearby blocks on the same page.
    pub neighbor_blocks: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpanConfig {
    /// Anchor terms shorter than this many characters are dropped.
    pub min_anchor_len: usize,
    /// Center-to-center distance for a block to count as a neighbor.
    pub neighbor_distance: f32,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            min_anchor_len: 2,
            neighbor_distance: 100.0,
        }
    }
}

/// Share of events and episodes that could be tied back to an OCR block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateCoverage {
    pub match_rate: f32,
    pub matched_items: usize,
    pub total_items: usize,
    pub blocks_total: usize,
}

/// Share of events that received a source span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanCoverage {
    pub rate: f32,
}

/// Provenance quality record for one document. Observability only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    pub source_span: SpanCoverage,
    pub coordinates: CoordinateCoverage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_deserializes_without_confidence() {
        let json = r#"{"page":1,"blockIndex":3,"text":"2024-03-01",
            "bbox":{"xMin":0,"yMin":0,"xMax":10,"yMax":4}}"#;
        let block: OcrBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.block_index, 3);
        assert!(block.confidence.is_none());
        assert_eq!(block.bbox.center(), (5.0, 2.0));
    }

    #[test]
    fn coverage_nests_span_and_coordinates() {
        let json = serde_json::to_value(Coverage::default()).unwrap();
        assert_eq!(json["sourceSpan"]["rate"], 0.0);
        for key in ["matchRate", "matchedItems", "blocksTotal"] {
            assert!(json["coordinates"].get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn center_distance_is_euclidean() {
        let a = BoundingBox { x_min: 0.0, y_min: 0.0, x_max: 2.0, y_max: 2.0 };
        let b = BoundingBox { x_min: 3.0, y_min: 4.0, x_max: 5.0, y_max: 6.0 };
        assert!((a.center_distance(&b) - 5.0).abs() < 1e-6);
    }
}
