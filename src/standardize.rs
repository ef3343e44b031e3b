//! Geometry standardization: single parts, fixed precision, unique identifiers.

use crate::arcs::{ArcCollection, RoadArc, SegmentType};
use ahash::AHashSet;
use geo::{Coord, Geometry, LineString};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

pub const DEFAULT_PRECISION: u32 = 7;
/// f64 carries at most 15 significant decimal digits.
pub const MAX_PRECISION: u32 = 15;

lazy_static! {
    static ref SEGMENT_ID_PATTERN: Regex = Regex::new("^[0-9a-f]{32}$").expect("static pattern");
}

/// An arc record as handed over by the conforming stage, before standardization.
#[derive(Clone, Debug)]
pub struct RawArc {
    pub segment_id: Option<String>,
    pub segment_type: SegmentType,
    pub structure_type: String,
    pub boundary_flag: bool,
    pub geometry: Geometry<f64>,
}

/// A record excluded because its geometry is not linear.
#[derive(Clone, Debug, PartialEq)]
pub struct RejectedRecord {
    /// Position in the raw input.
    pub position: usize,
    pub segment_id: Option<String>,
    pub geometry_type: &'static str,
}

#[derive(Debug)]
pub struct Standardized {
    pub arcs: ArcCollection,
    pub rejected: Vec<RejectedRecord>,
    /// Set when identifiers were regenerated or multi-part geometries exploded.
    pub export_required: bool,
}

pub fn is_valid_segment_id(id: &str) -> bool {
    SEGMENT_ID_PATTERN.is_match(id)
}

/// Fresh 32-hex identifier.
pub fn new_segment_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Clone, Copy, Debug)]
pub struct Standardizer {
    precision: u32,
    scale: f64,
}

impl Default for Standardizer {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION)
    }
}

impl Standardizer {
    /// Precision above [`MAX_PRECISION`] is clamped.
    pub fn new(precision: u32) -> Self {
        if precision > MAX_PRECISION {
            warn!(precision, max = MAX_PRECISION, "Clamping coordinate precision");
        }
        let precision = precision.min(MAX_PRECISION);
        Self {
            precision,
            scale: 10f64.powi(precision as i32),
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn round_coord(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (c.x * self.scale).round() / self.scale,
            y: (c.y * self.scale).round() / self.scale,
        }
    }

    pub fn round_line(&self, line: &LineString<f64>) -> LineString<f64> {
        line.0.iter().map(|c| self.round_coord(*c)).collect()
    }

    pub fn standardize(&self, raw: Vec<RawArc>) -> Standardized {
        let mut rejected = Vec::new();
        let mut exploded = false;
        let mut arcs = Vec::with_capacity(raw.len());

        for (position, record) in raw.into_iter().enumerate() {
            let parts: Vec<LineString<f64>> = match record.geometry {
                Geometry::LineString(line) => vec![line],
                Geometry::MultiLineString(multi) => {
                    if multi.0.len() > 1 {
                        exploded = true;
                    }
                    multi.0
                }
                Geometry::Line(line) => vec![LineString::from(vec![line.start, line.end])],
                other => {
                    let geometry_type = geometry_type_name(&other);
                    warn!(
                        position,
                        geometry_type,
                        segment_id = ?record.segment_id,
                        "Dropping record with non-linear geometry"
                    );
                    rejected.push(RejectedRecord {
                        position,
                        segment_id: record.segment_id,
                        geometry_type,
                    });
                    continue;
                }
            };

            let single_part = parts.len() == 1;
            for part in parts {
                if part.0.len() < 2 {
                    warn!(position, "Dropping line part with fewer than two vertices");
                    rejected.push(RejectedRecord {
                        position,
                        segment_id: record.segment_id.clone(),
                        geometry_type: "LineString",
                    });
                    continue;
                }
                // Exploded parts never keep the parent id.
                let segment_id = if single_part {
                    record.segment_id.clone().unwrap_or_default()
                } else {
                    String::new()
                };
                arcs.push(RoadArc {
                    segment_id,
                    segment_type: record.segment_type,
                    structure_type: record.structure_type.clone(),
                    boundary_flag: record.boundary_flag,
                    geometry: part,
                });
            }
        }

        let regenerated = self.normalize(&mut arcs);
        if regenerated > 0 || exploded {
            info!(
                regenerated,
                exploded, "Standardization changed identifiers; export required"
            );
        }

        Standardized {
            arcs: ArcCollection::new(arcs),
            rejected,
            export_required: regenerated > 0 || exploded,
        }
    }

    /// Re-round every geometry and repair identifiers in place.
    ///
    /// Returns the number of identifiers regenerated or rewritten.
    pub fn normalize(&self, arcs: &mut [RoadArc]) -> usize {
        let mut seen: AHashSet<String> = AHashSet::with_capacity(arcs.len());
        let mut regenerated = 0;
        for arc in arcs.iter_mut() {
            arc.geometry = self.round_line(&arc.geometry);
            let id = arc.segment_id.to_ascii_lowercase();
            if is_valid_segment_id(&id) && !seen.contains(&id) {
                if id != arc.segment_id {
                    regenerated += 1;
                }
                arc.segment_id = id;
            } else {
                arc.segment_id = new_segment_id();
                regenerated += 1;
            }
            seen.insert(arc.segment_id.clone());
        }
        regenerated
    }

    /// Standardize a collection that was mutated after the initial pass.
    pub fn restandardize(&self, arcs: ArcCollection) -> (ArcCollection, usize) {
        let mut arcs = arcs.into_vec();
        let regenerated = self.normalize(&mut arcs);
        (ArcCollection::new(arcs), regenerated)
    }
}

fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{MultiLineString, Point, line_string};

    fn raw(id: Option<&str>, geometry: Geometry<f64>) -> RawArc {
        RawArc {
            segment_id: id.map(str::to_string),
            segment_type: SegmentType::Road,
            structure_type: "Unknown".to_string(),
            boundary_flag: false,
            geometry,
        }
    }

    const GOOD_ID: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_valid_ids_are_kept() {
        let out = Standardizer::default().standardize(vec![raw(
            Some(GOOD_ID),
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)].into(),
        )]);
        assert_eq!(out.arcs.as_slice()[0].segment_id, GOOD_ID);
        assert!(!out.export_required);
    }

    #[test]
    fn test_missing_malformed_and_duplicate_ids_regenerated() {
        let line: Geometry<f64> = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)].into();
        let out = Standardizer::default().standardize(vec![
            raw(Some(GOOD_ID), line.clone()),
            raw(Some(GOOD_ID), line.clone()),
            raw(None, line.clone()),
            raw(Some("not-an-id"), line),
        ]);
        assert!(out.export_required);
        let ids: AHashSet<&str> = out.arcs.iter().map(|a| a.segment_id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        assert!(ids.contains(GOOD_ID));
        assert!(out.arcs.iter().all(|a| is_valid_segment_id(&a.segment_id)));
    }

    #[test]
    fn test_multilinestring_exploded_with_fresh_ids() {
        let multi = MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 2.0, y: 0.0), (x: 3.0, y: 0.0)],
        ]);
        let mut record = raw(Some(GOOD_ID), multi.into());
        record.structure_type = "Bridge".to_string();
        let out = Standardizer::default().standardize(vec![record]);

        assert_eq!(out.arcs.len(), 2);
        assert!(out.export_required);
        for arc in out.arcs.iter() {
            assert_ne!(arc.segment_id, GOOD_ID);
            assert_eq!(arc.structure_type, "Bridge");
        }
    }

    #[test]
    fn test_point_rejected() {
        let out = Standardizer::default().standardize(vec![
            raw(Some(GOOD_ID), Point::new(1.0, 1.0).into()),
            raw(None, line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)].into()),
        ]);
        assert_eq!(out.arcs.len(), 1);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].geometry_type, "Point");
        assert_eq!(out.rejected[0].position, 0);
    }

    #[test]
    fn test_coordinates_rounded() {
        let out = Standardizer::new(3).standardize(vec![raw(
            None,
            line_string![(x: 0.12345, y: 9.87651), (x: 1.0, y: 1.0)].into(),
        )]);
        let first = out.arcs.as_slice()[0].geometry.0[0];
        assert_eq!(first, Coord { x: 0.123, y: 9.877 });
    }

    #[test]
    fn test_uppercase_id_normalized() {
        let upper = GOOD_ID.to_uppercase();
        let out = Standardizer::default().standardize(vec![raw(
            Some(upper.as_str()),
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)].into(),
        )]);
        assert_eq!(out.arcs.as_slice()[0].segment_id, GOOD_ID);
    }

    #[test]
    fn test_excessive_precision_clamped() {
        for precision in [400, u32::MAX] {
            let standardizer = Standardizer::new(precision);
            assert_eq!(standardizer.precision(), MAX_PRECISION);
            let c = standardizer.round_coord(Coord { x: 1.5, y: -2.25 });
            assert_eq!(c, Coord { x: 1.5, y: -2.25 });
        }
    }
}
