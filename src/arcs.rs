//! Road arc records and the arena that owns them during a validation run.

use crate::errors::TopologyError;
use ahash::AHashMap;
use geo::{Coord, Euclidean, Length, LineString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structure types that mean "no structure" (at-grade road).
pub const NON_STRUCTURE_TYPES: [&str; 2] = ["Unknown", "None"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum SegmentType {
    Road = 1,
    Ferry = 2,
    Other = 3,
}

impl TryFrom<i64> for SegmentType {
    type Error = TopologyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SegmentType::Road),
            2 => Ok(SegmentType::Ferry),
            3 => Ok(SegmentType::Other),
            other => Err(TopologyError::InvalidAttribute {
                field: "segment_type",
                reason: format!("unknown segment type {}", other),
            }),
        }
    }
}

impl From<SegmentType> for i64 {
    fn from(value: SegmentType) -> Self {
        value as i64
    }
}

/// One edge of the road network: a single-part line with its attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct RoadArc {
    pub segment_id: String,
    pub segment_type: SegmentType,
    pub structure_type: String,
    /// Set when the arc crosses an administrative boundary.
    pub boundary_flag: bool,
    pub geometry: LineString<f64>,
}

impl RoadArc {
    pub fn new(segment_id: impl Into<String>, geometry: LineString<f64>) -> Self {
        Self {
            segment_id: segment_id.into(),
            segment_type: SegmentType::Road,
            structure_type: "Unknown".to_string(),
            boundary_flag: false,
            geometry,
        }
    }

    /// Copy every non-geometric attribute onto a new geometry.
    pub fn with_geometry(&self, segment_id: String, geometry: LineString<f64>) -> Self {
        Self {
            segment_id,
            segment_type: self.segment_type,
            structure_type: self.structure_type.clone(),
            boundary_flag: self.boundary_flag,
            geometry,
        }
    }

    pub fn start(&self) -> Option<Coord<f64>> {
        self.geometry.0.first().copied()
    }

    pub fn end(&self) -> Option<Coord<f64>> {
        self.geometry.0.last().copied()
    }

    /// Both endpoints, or `None` for an empty geometry.
    pub fn endpoints(&self) -> Option<(Coord<f64>, Coord<f64>)> {
        Some((self.start()?, self.end()?))
    }

    pub fn length(&self) -> f64 {
        Euclidean.length(&self.geometry)
    }

    pub fn is_structure(&self) -> bool {
        !NON_STRUCTURE_TYPES.contains(&self.structure_type.as_str())
    }

    pub fn is_ferry(&self) -> bool {
        self.segment_type == SegmentType::Ferry
    }

    pub fn is_self_loop(&self) -> bool {
        self.geometry.0.len() > 2 && self.start() == self.end()
    }
}

/// Arena of arcs keyed by `segment_id`.
///
/// Order is stable: a split replaces one record with its parts at the same position.
#[derive(Clone, Debug, Default)]
pub struct ArcCollection {
    arcs: Vec<RoadArc>,
    positions: AHashMap<String, usize>,
}

impl ArcCollection {
    /// Callers must guarantee unique ids; the standardizer does.
    pub fn new(arcs: Vec<RoadArc>) -> Self {
        let mut collection = Self {
            arcs,
            positions: AHashMap::new(),
        };
        collection.reindex();
        collection
    }

    fn reindex(&mut self) {
        self.positions = self
            .arcs
            .iter()
            .enumerate()
            .map(|(i, arc)| (arc.segment_id.clone(), i))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RoadArc> {
        self.arcs.iter()
    }

    pub fn as_slice(&self) -> &[RoadArc] {
        &self.arcs
    }

    pub fn get(&self, segment_id: &str) -> Option<&RoadArc> {
        self.position(segment_id).map(|i| &self.arcs[i])
    }

    pub fn position(&self, segment_id: &str) -> Option<usize> {
        self.positions.get(segment_id).copied()
    }

    pub fn contains(&self, segment_id: &str) -> bool {
        self.positions.contains_key(segment_id)
    }

    /// Remove each keyed record and insert its replacement parts in its place.
    ///
    /// Returns the number of records removed. Keys not present are ignored.
    pub fn replace_many(&mut self, mut replacements: BTreeMap<String, Vec<RoadArc>>) -> usize {
        if replacements.is_empty() {
            return 0;
        }
        let mut removed = 0;
        let old = std::mem::take(&mut self.arcs);
        let mut arcs = Vec::with_capacity(old.len() + replacements.len());
        for arc in old {
            match replacements.remove(&arc.segment_id) {
                Some(parts) => {
                    removed += 1;
                    arcs.extend(parts);
                }
                None => arcs.push(arc),
            }
        }
        self.arcs = arcs;
        self.reindex();
        removed
    }

    pub fn into_vec(self) -> Vec<RoadArc> {
        self.arcs
    }
}

impl<'a> IntoIterator for &'a ArcCollection {
    type Item = &'a RoadArc;
    type IntoIter = std::slice::Iter<'a, RoadArc>;

    fn into_iter(self) -> Self::IntoIter {
        self.arcs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    fn arc(id: &str, x: f64) -> RoadArc {
        RoadArc::new(id, line_string![(x: x, y: 0.0), (x: x + 1.0, y: 0.0)])
    }

    #[test]
    fn test_replace_many_keeps_position() {
        let mut collection = ArcCollection::new(vec![arc("a", 0.0), arc("b", 1.0), arc("c", 2.0)]);
        let mut replacements = BTreeMap::new();
        replacements.insert("b".to_string(), vec![arc("b1", 1.0), arc("b2", 1.5)]);

        assert_eq!(collection.replace_many(replacements), 1);
        let ids: Vec<&str> = collection.iter().map(|a| a.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b1", "b2", "c"]);
        assert_eq!(collection.position("c"), Some(3));
        assert!(!collection.contains("b"));
    }

    #[test]
    fn test_segment_type_from_int() {
        assert_eq!(SegmentType::try_from(2).ok(), Some(SegmentType::Ferry));
        assert!(SegmentType::try_from(9).is_err());
    }

    #[test]
    fn test_structure_and_self_loop() {
        let mut bridge = arc("a", 0.0);
        assert!(!bridge.is_structure());
        bridge.structure_type = "Bridge".to_string();
        assert!(bridge.is_structure());

        let lp = RoadArc::new(
            "loop",
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)],
        );
        assert!(lp.is_self_loop());
        assert!((lp.length() - (2.0 + 2f64.sqrt())).abs() < 1e-9);
    }
}
