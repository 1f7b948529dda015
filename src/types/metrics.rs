//! `MetricSample` and the fallback metric map used when reads degrade.

use super::scalar::Scalar;
use std::collections::HashMap;

/// Tags that are never surfaced as metric fields.
pub const RESERVED_TAGS: &[&str] = &[
    "equipmentId",
    "locationId",
    "time",
    "equipment_type",
    "system",
    "zone",
];

/// A merged view of the most recent sample per field over a read window.
pub type MetricMap = HashMap<String, Scalar>;

/// A single field reading at a point in time, as produced by field
/// controllers and consumed before being merged into a `MetricMap`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub equipment_id: String,
    pub location_id: String,
    pub timestamp_ns: i64,
    pub field: String,
    pub value: Scalar,
}

impl MetricSample {
    pub fn is_reserved_tag(field: &str) -> bool {
        RESERVED_TAGS.contains(&field)
    }
}

/// Conservative fallback metric map returned when no samples exist, so
/// control algorithms degrade rather than fail.
pub fn fallback_metrics() -> MetricMap {
    let mut m = MetricMap::new();
    m.insert("outdoor".to_string(), Scalar::Num(50.0));
    m.insert("supply".to_string(), Scalar::Num(55.0));
    m.insert("room".to_string(), Scalar::Num(72.0));
    m.insert("return".to_string(), Scalar::Num(72.0));
    m
}

/// Merge newer samples over older ones, keeping the latest value per field
/// and dropping any reserved tag slots that slipped through.
pub fn merge_latest(samples: impl IntoIterator<Item = MetricSample>) -> MetricMap {
    let mut out = MetricMap::new();
    let mut latest_ts: HashMap<String, i64> = HashMap::new();

    for s in samples {
        if MetricSample::is_reserved_tag(&s.field) {
            continue;
        }
        let newer = latest_ts
            .get(&s.field)
            .map(|&ts| s.timestamp_ns >= ts)
            .unwrap_or(true);
        if newer {
            latest_ts.insert(s.field.clone(), s.timestamp_ns);
            out.insert(s.field, s.value);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_latest_per_field() {
        let samples = vec![
            MetricSample {
                equipment_id: "E1".into(),
                location_id: "L1".into(),
                timestamp_ns: 1,
                field: "supply".into(),
                value: Scalar::Num(50.0),
            },
            MetricSample {
                equipment_id: "E1".into(),
                location_id: "L1".into(),
                timestamp_ns: 2,
                field: "supply".into(),
                value: Scalar::Num(55.0),
            },
        ];
        let merged = merge_latest(samples);
        assert_eq!(merged.get("supply"), Some(&Scalar::Num(55.0)));
    }

    #[test]
    fn merge_drops_reserved_tags() {
        let samples = vec![MetricSample {
            equipment_id: "E1".into(),
            location_id: "L1".into(),
            timestamp_ns: 1,
            field: "zone".into(),
            value: Scalar::Text("north".into()),
        }];
        assert!(merge_latest(samples).is_empty());
    }

    #[test]
    fn fallback_has_expected_fields() {
        let fb = fallback_metrics();
        assert_eq!(fb.len(), 4);
        assert!(fb.contains_key("outdoor"));
    }
}
