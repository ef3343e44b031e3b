//! Meshblock construction: the closed faces enclosed by the road network.

pub mod polygonize;

use crate::arcs::RoadArc;
use crate::connectivity::{compute_nodes, dangling_arc_ids};
use crate::report::{SEGMENT_ID_FIELD, ValidationRecord};
use crate::spatial_index::{Predicate, SpatialIndex};
use crate::standardize::new_segment_id;
use geo::{BoundingRect, LineString, MultiLineString, Polygon, Relate};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

pub use polygonize::polygonize;

pub const REPRESENTATION_CODE: &str = "E401";

/// One face of the built meshblock.
#[derive(Clone, Debug, PartialEq)]
pub struct Meshblock {
    pub meshblock_id: String,
    pub geometry: Polygon<f64>,
    /// Ids of meshblocks this one touches, including contact at a single vertex.
    pub neighbours: BTreeSet<String>,
}

impl Meshblock {
    /// Exterior and interior rings as one lineal geometry.
    pub fn boundary(&self) -> MultiLineString<f64> {
        polygon_boundary(&self.geometry)
    }
}

fn polygon_boundary(polygon: &Polygon<f64>) -> MultiLineString<f64> {
    let rings: Vec<LineString<f64>> = std::iter::once(polygon.exterior().clone())
        .chain(polygon.interiors().iter().cloned())
        .collect();
    MultiLineString::new(rings)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MeshblockSummary {
    /// Arcs forming part of some meshblock boundary.
    pub valid: usize,
    /// Arcs submitted to polygonization that bound no face.
    pub invalid: usize,
    /// Ferries and dangling arcs left out of polygonization.
    pub excluded: usize,
}

#[derive(Clone, Debug, Default)]
pub struct MeshblockOutcome {
    pub meshblocks: Vec<Meshblock>,
    pub unrepresented: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
    pub summary: MeshblockSummary,
}

impl MeshblockOutcome {
    /// Representation failures as a report record.
    pub fn representation_record(&self) -> Option<ValidationRecord> {
        ValidationRecord::with_field(
            REPRESENTATION_CODE,
            "arc is not covered by any meshblock boundary",
            self.unrepresented.iter().cloned(),
            SEGMENT_ID_FIELD,
        )
    }
}

/// Build meshblocks from a validated arc set.
pub fn build_meshblocks(arcs: &[RoadArc]) -> MeshblockOutcome {
    let (ferries, roads): (Vec<&RoadArc>, Vec<&RoadArc>) = arcs.iter().partition(|a| a.is_ferry());
    let road_arcs: Vec<RoadArc> = roads.into_iter().cloned().collect();
    let nodes = compute_nodes(&road_arcs);
    let dangling = dangling_arc_ids(&road_arcs, &nodes);

    let included: Vec<&RoadArc> = road_arcs
        .iter()
        .filter(|a| !dangling.contains(&a.segment_id))
        .collect();
    let mut excluded: BTreeSet<String> = ferries.iter().map(|a| a.segment_id.clone()).collect();
    excluded.extend(dangling);

    let lines: Vec<LineString<f64>> = included.iter().map(|a| a.geometry.clone()).collect();
    let polygons = polygonize(&lines);
    let index = SpatialIndex::build(&polygons);
    let boundaries: Vec<MultiLineString<f64>> = polygons.iter().map(polygon_boundary).collect();

    let unrepresented: BTreeSet<String> = included
        .iter()
        .filter(|arc| {
            let Some(rect) = arc.geometry.bounding_rect() else {
                return true;
            };
            !index
                .candidates(rect)
                .any(|j| arc.geometry.relate(&boundaries[j]).is_coveredby())
        })
        .map(|arc| arc.segment_id.clone())
        .collect();

    let ids: Vec<String> = polygons.iter().map(|_| new_segment_id()).collect();
    let meshblocks: Vec<Meshblock> = polygons
        .iter()
        .enumerate()
        .map(|(i, polygon)| Meshblock {
            meshblock_id: ids[i].clone(),
            geometry: polygon.clone(),
            neighbours: index
                .query_slice(polygon, Predicate::Touches, &polygons)
                .into_iter()
                .filter(|&j| j != i)
                .map(|j| ids[j].clone())
                .collect(),
        })
        .collect();

    let summary = MeshblockSummary {
        valid: included.len() - unrepresented.len(),
        invalid: unrepresented.len(),
        excluded: excluded.len(),
    };
    info!(
        "Built {} meshblocks: {} arcs valid, {} invalid, {} excluded",
        meshblocks.len(),
        summary.valid,
        summary.invalid,
        summary.excluded
    );

    MeshblockOutcome {
        meshblocks,
        unrepresented,
        excluded,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arcs::SegmentType;
    use geo::{Area, line_string};

    /// 20x20 square split into four 10x10 faces, already noded.
    fn grid() -> Vec<RoadArc> {
        let edges = [
            ((0.0, 0.0), (10.0, 0.0)),
            ((10.0, 0.0), (20.0, 0.0)),
            ((20.0, 0.0), (20.0, 10.0)),
            ((20.0, 10.0), (20.0, 20.0)),
            ((20.0, 20.0), (10.0, 20.0)),
            ((10.0, 20.0), (0.0, 20.0)),
            ((0.0, 20.0), (0.0, 10.0)),
            ((0.0, 10.0), (0.0, 0.0)),
            ((10.0, 0.0), (10.0, 10.0)),
            ((10.0, 10.0), (10.0, 20.0)),
            ((0.0, 10.0), (10.0, 10.0)),
            ((10.0, 10.0), (20.0, 10.0)),
        ];
        edges
            .iter()
            .enumerate()
            .map(|(i, ((x1, y1), (x2, y2)))| {
                RoadArc::new(
                    format!("g{:02}", i),
                    line_string![(x: *x1, y: *y1), (x: *x2, y: *y2)],
                )
            })
            .collect()
    }

    #[test]
    fn test_grid_area_conserved() {
        let outcome = build_meshblocks(&grid());
        assert_eq!(outcome.meshblocks.len(), 4);
        let area: f64 = outcome.meshblocks.iter().map(|m| m.geometry.unsigned_area()).sum();
        assert!((area - 400.0).abs() < 1e-9);
        assert!(outcome.unrepresented.is_empty());
        assert_eq!(
            outcome.summary,
            MeshblockSummary {
                valid: 12,
                invalid: 0,
                excluded: 0
            }
        );
        // Each quadrant shares an edge with two others and a corner with the third.
        for m in &outcome.meshblocks {
            assert_eq!(m.neighbours.len(), 3);
            assert!(!m.neighbours.contains(&m.meshblock_id));
        }
    }

    #[test]
    fn test_ferries_and_dangles_excluded() {
        let mut arcs = grid();
        arcs.push(RoadArc::new("spur", line_string![(x: 20.0, y: 20.0), (x: 30.0, y: 30.0)]));
        let mut ferry = RoadArc::new("ferry", line_string![(x: 0.0, y: 0.0), (x: 20.0, y: 20.0)]);
        ferry.segment_type = SegmentType::Ferry;
        arcs.push(ferry);

        let outcome = build_meshblocks(&arcs);
        assert_eq!(outcome.meshblocks.len(), 4);
        assert_eq!(
            outcome.excluded,
            BTreeSet::from(["ferry".to_string(), "spur".to_string()])
        );
        assert_eq!(outcome.summary.excluded, 2);
        assert_eq!(outcome.summary.valid, 12);
    }

    #[test]
    fn test_bridge_between_loops_unrepresented() {
        let arcs = vec![
            RoadArc::new(
                "left",
                line_string![
                    (x: 10.0, y: 5.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0),
                    (x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 5.0)
                ],
            ),
            RoadArc::new(
                "right",
                line_string![
                    (x: 20.0, y: 5.0), (x: 20.0, y: 0.0), (x: 30.0, y: 0.0),
                    (x: 30.0, y: 10.0), (x: 20.0, y: 10.0), (x: 20.0, y: 5.0)
                ],
            ),
            RoadArc::new("link", line_string![(x: 10.0, y: 5.0), (x: 20.0, y: 5.0)]),
        ];
        let outcome = build_meshblocks(&arcs);
        assert_eq!(outcome.meshblocks.len(), 2);
        assert_eq!(outcome.unrepresented, BTreeSet::from(["link".to_string()]));
        assert!(outcome.excluded.is_empty());

        let record = outcome.representation_record().unwrap();
        assert_eq!(record.code, REPRESENTATION_CODE);
        assert_eq!(record.query.as_deref(), Some("segment_id in ('link')"));
    }

    #[test]
    fn test_corner_contact_counts_as_neighbour() {
        let arcs = vec![
            RoadArc::new(
                "low",
                line_string![
                    (x: 10.0, y: 10.0), (x: 0.0, y: 10.0), (x: 0.0, y: 0.0),
                    (x: 10.0, y: 0.0), (x: 10.0, y: 10.0)
                ],
            ),
            RoadArc::new(
                "high",
                line_string![
                    (x: 10.0, y: 10.0), (x: 20.0, y: 10.0), (x: 20.0, y: 20.0),
                    (x: 10.0, y: 20.0), (x: 10.0, y: 10.0)
                ],
            ),
        ];
        let outcome = build_meshblocks(&arcs);
        assert_eq!(outcome.meshblocks.len(), 2);
        let (a, b) = (&outcome.meshblocks[0], &outcome.meshblocks[1]);
        assert_eq!(a.neighbours, BTreeSet::from([b.meshblock_id.clone()]));
        assert_eq!(b.neighbours, BTreeSet::from([a.meshblock_id.clone()]));
    }

    #[test]
    fn test_disjoint_faces_have_no_neighbours() {
        let arcs = vec![
            RoadArc::new(
                "a",
                line_string![
                    (x: 0.0, y: 0.0),
                    (x: 5.0, y: 0.0),
                    (x: 5.0, y: 5.0),
                    (x: 0.0, y: 0.0)
                ],
            ),
            RoadArc::new(
                "b",
                line_string![
                    (x: 50.0, y: 0.0),
                    (x: 55.0, y: 0.0),
                    (x: 55.0, y: 5.0),
                    (x: 50.0, y: 0.0)
                ],
            ),
        ];
        let outcome = build_meshblocks(&arcs);
        assert_eq!(outcome.meshblocks.len(), 2);
        assert!(outcome.meshblocks.iter().all(|m| m.neighbours.is_empty()));
    }
}
