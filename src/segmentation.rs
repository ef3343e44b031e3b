//! Crossing segmentation.
//!
//! Every intersection between arcs must be a node. Arcs whose interiors cross
//! are split at the crossing points, the collection is re-standardized, and only
//! the freshly created arcs are re-checked, until no crossing remains or the
//! pass limit is hit. A crossing that cannot be split (the split point rounds
//! onto an existing vertex) is a perpetual error: it is reported, never retried.

use crate::arcs::{ArcCollection, RoadArc};
use crate::spatial_index::{Predicate, SpatialIndex};
use crate::standardize::{Standardizer, new_segment_id};
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Coord, Line, LineString};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_PASSES: usize = 10;

/// Arc id → ids of the arcs it crosses, ascending.
pub type Crossings = BTreeMap<String, Vec<String>>;

/// Find crossing arcs. With `subset`, only those arcs are checked (against all arcs).
///
/// `index` must be built over `arcs` in collection order.
pub fn detect_crossings(
    arcs: &ArcCollection,
    index: &SpatialIndex,
    subset: Option<&BTreeSet<String>>,
) -> Crossings {
    let slice = arcs.as_slice();
    let mut crossings = Crossings::new();
    for (i, arc) in slice.iter().enumerate() {
        if subset.is_some_and(|s| !s.contains(&arc.segment_id)) {
            continue;
        }
        let partners: BTreeSet<String> = index
            .query(&arc.geometry, Predicate::Crosses, |j| &slice[j].geometry)
            .into_iter()
            .filter(|&j| j != i)
            .map(|j| slice[j].segment_id.clone())
            .collect();
        if !partners.is_empty() {
            crossings.insert(arc.segment_id.clone(), partners.into_iter().collect());
        }
    }
    crossings
}

#[derive(Clone, Copy, Debug)]
struct Cut {
    segment: usize,
    t: f64,
    point: Coord<f64>,
}

pub(crate) fn segment_param(line: Line<f64>, p: Coord<f64>) -> f64 {
    let d = line.delta();
    let len2 = d.x * d.x + d.y * d.y;
    if len2 == 0.0 {
        return 0.0;
    }
    ((p.x - line.start.x) * d.x + (p.y - line.start.y) * d.y) / len2
}

/// Split `line` wherever `by` meets its interior.
///
/// Returns the line unchanged (as a single part) when nothing cuts it.
pub fn split_line(line: &LineString<f64>, by: &LineString<f64>) -> Vec<LineString<f64>> {
    let coords = &line.0;
    let (Some(&first), Some(&last)) = (coords.first(), coords.last()) else {
        return Vec::new();
    };

    let mut cuts: Vec<Cut> = Vec::new();
    for (segment, seg) in line.lines().enumerate() {
        for other in by.lines() {
            if let Some(LineIntersection::SinglePoint { intersection, .. }) =
                line_intersection(seg, other)
            {
                if intersection == first || intersection == last {
                    continue;
                }
                cuts.push(Cut {
                    segment,
                    t: segment_param(seg, intersection),
                    point: intersection,
                });
            }
        }
    }
    if cuts.is_empty() {
        return vec![line.clone()];
    }
    cuts.sort_by(|a, b| a.segment.cmp(&b.segment).then(a.t.total_cmp(&b.t)));

    let mut parts = Vec::new();
    let mut current = vec![first];
    let mut k = 0;
    for i in 0..coords.len() - 1 {
        while k < cuts.len() && cuts[k].segment == i {
            let p = cuts[k].point;
            if current.last() != Some(&p) {
                current.push(p);
            }
            if current.len() >= 2 {
                parts.push(LineString::new(std::mem::replace(&mut current, vec![p])));
            }
            k += 1;
        }
        let next = coords[i + 1];
        if current.last() != Some(&next) {
            current.push(next);
        }
    }
    if current.len() >= 2 {
        parts.push(LineString::new(current));
    }
    parts
}

/// Split `line` by each partner in turn, accumulating the parts.
pub fn split_by_all(line: &LineString<f64>, partners: &[&LineString<f64>]) -> Vec<LineString<f64>> {
    partners.iter().fold(vec![line.clone()], |parts, by| {
        parts.iter().flat_map(|part| split_line(part, by)).collect()
    })
}

fn is_degenerate(line: &LineString<f64>) -> bool {
    line.0.windows(2).all(|w| w[0] == w[1])
}

#[derive(Debug)]
pub struct SegmentationOutcome {
    pub arcs: ArcCollection,
    /// Records replaced by their parts.
    pub split_arcs: usize,
    pub created_arcs: usize,
    /// Arcs left crossing another arc.
    pub perpetual: BTreeSet<String>,
    pub passes: usize,
    pub export_required: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct CrossingSegmenter {
    standardizer: Standardizer,
    max_passes: usize,
}

impl CrossingSegmenter {
    pub fn new(standardizer: Standardizer, max_passes: usize) -> Self {
        Self {
            standardizer,
            max_passes: max_passes.max(1),
        }
    }

    /// Parts of `arc` after splitting by `partners`, rounded and with fresh ids.
    ///
    /// `None` when rounding collapses the split to fewer than two parts.
    fn split_arc(&self, arc: &RoadArc, partners: &[&LineString<f64>]) -> Option<Vec<RoadArc>> {
        let parts: Vec<LineString<f64>> = split_by_all(&arc.geometry, partners)
            .iter()
            .map(|part| self.standardizer.round_line(part))
            .filter(|part| !is_degenerate(part))
            .collect();
        if parts.len() < 2 {
            return None;
        }
        Some(
            parts
                .into_iter()
                .map(|geometry| arc.with_geometry(new_segment_id(), geometry))
                .collect(),
        )
    }

    pub fn segment(&self, arcs: ArcCollection) -> SegmentationOutcome {
        let mut arcs = arcs;
        let mut subset: Option<BTreeSet<String>> = None;
        let mut perpetual: BTreeSet<String> = BTreeSet::new();
        let mut split_arcs = 0;
        let mut created_arcs = 0;
        let mut passes = 0;

        loop {
            let index = SpatialIndex::build(arcs.iter().map(|a| &a.geometry));
            let mut crossings = detect_crossings(&arcs, &index, subset.as_ref());
            crossings.retain(|id, _| !perpetual.contains(id));
            if crossings.is_empty() {
                break;
            }
            if passes == self.max_passes {
                warn!(
                    remaining = crossings.len(),
                    max_passes = self.max_passes,
                    "Segmentation pass limit reached"
                );
                perpetual.extend(crossings.into_keys());
                break;
            }
            passes += 1;
            debug!(pass = passes, crossing_arcs = crossings.len(), "Segmenting crossings");

            let mut replacements: BTreeMap<String, Vec<RoadArc>> = BTreeMap::new();
            for (id, partner_ids) in &crossings {
                let Some(arc) = arcs.get(id) else {
                    continue;
                };
                let partners: Vec<&LineString<f64>> = partner_ids
                    .iter()
                    .filter_map(|p| arcs.get(p))
                    .map(|a| &a.geometry)
                    .collect();
                match self.split_arc(arc, &partners) {
                    Some(parts) => {
                        replacements.insert(id.clone(), parts);
                    }
                    None => {
                        warn!(
                            segment_id = %id,
                            partners = ?partner_ids,
                            "Perpetual crossing: split degenerates after rounding"
                        );
                        perpetual.insert(id.clone());
                    }
                }
            }
            if replacements.is_empty() {
                break;
            }

            let new_ids: BTreeSet<String> = replacements
                .values()
                .flatten()
                .map(|a| a.segment_id.clone())
                .collect();
            created_arcs += new_ids.len();
            split_arcs += arcs.replace_many(replacements);
            arcs = self.standardizer.restandardize(arcs).0;
            subset = Some(new_ids);
        }

        info!(
            split_arcs,
            created_arcs,
            perpetual = perpetual.len(),
            passes,
            "Crossing segmentation complete"
        );
        SegmentationOutcome {
            arcs,
            split_arcs,
            created_arcs,
            perpetual,
            passes,
            export_required: split_arcs > 0,
        }
    }
}

impl Default for CrossingSegmenter {
    fn default() -> Self {
        Self::new(Standardizer::default(), DEFAULT_MAX_PASSES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standardize::{RawArc, is_valid_segment_id};
    use geo::{Relate, line_string};

    fn collection(lines: Vec<LineString<f64>>) -> ArcCollection {
        let raw = lines
            .into_iter()
            .map(|line| RawArc {
                segment_id: None,
                segment_type: crate::arcs::SegmentType::Road,
                structure_type: "Unknown".to_string(),
                boundary_flag: false,
                geometry: line.into(),
            })
            .collect();
        Standardizer::default().standardize(raw).arcs
    }

    fn geometries(arcs: &ArcCollection) -> BTreeSet<Vec<(i64, i64)>> {
        arcs.iter()
            .map(|a| {
                a.geometry
                    .0
                    .iter()
                    .map(|c| (c.x.round() as i64, c.y.round() as i64))
                    .collect()
            })
            .collect()
    }

    fn no_crossings(arcs: &ArcCollection) -> bool {
        let slice = arcs.as_slice();
        slice.iter().enumerate().all(|(i, a)| {
            slice
                .iter()
                .enumerate()
                .all(|(j, b)| i == j || !a.geometry.relate(&b.geometry).is_crosses())
        })
    }

    #[test]
    fn test_split_line_at_crossing() {
        let parts = split_line(
            &line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)],
            &line_string![(x: 5.0, y: -5.0), (x: 5.0, y: 5.0)],
        );
        assert_eq!(
            parts,
            vec![
                line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0)],
                line_string![(x: 5.0, y: 0.0), (x: 10.0, y: 0.0)],
            ]
        );
    }

    #[test]
    fn test_split_line_at_existing_vertex() {
        let parts = split_line(
            &line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0), (x: 10.0, y: 0.0)],
            &line_string![(x: 5.0, y: -5.0), (x: 5.0, y: 5.0)],
        );
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0.len(), 2);
        assert_eq!(parts[1].0.len(), 2);
    }

    #[test]
    fn test_split_by_all_order_independent() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)];
        let a = line_string![(x: 3.0, y: -1.0), (x: 3.0, y: 1.0)];
        let b = line_string![(x: 7.0, y: -1.0), (x: 7.0, y: 1.0)];
        let forward = split_by_all(&line, &[&a, &b]);
        let backward = split_by_all(&line, &[&b, &a]);
        assert_eq!(forward.len(), 3);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_single_crossing_becomes_four_arcs() {
        let arcs = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)],
            line_string![(x: 5.0, y: -5.0), (x: 5.0, y: 5.0)],
        ]);
        let outcome = CrossingSegmenter::default().segment(arcs);

        assert_eq!(outcome.arcs.len(), 4);
        assert_eq!(outcome.split_arcs, 2);
        assert!(outcome.perpetual.is_empty());
        assert!(outcome.export_required);
        assert_eq!(
            geometries(&outcome.arcs),
            BTreeSet::from([
                vec![(0, 0), (5, 0)],
                vec![(5, 0), (10, 0)],
                vec![(5, -5), (5, 0)],
                vec![(5, 0), (5, 5)],
            ])
        );
        assert!(no_crossings(&outcome.arcs));
    }

    #[test]
    fn test_segmentation_is_idempotent() {
        let arcs = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)],
            line_string![(x: 5.0, y: -5.0), (x: 5.0, y: 5.0)],
        ]);
        let segmenter = CrossingSegmenter::default();
        let first = segmenter.segment(arcs);
        let ids: BTreeSet<String> = first.arcs.iter().map(|a| a.segment_id.clone()).collect();

        let second = segmenter.segment(first.arcs);
        assert_eq!(second.split_arcs, 0);
        assert_eq!(second.passes, 0);
        assert!(second.perpetual.is_empty());
        assert!(!second.export_required);
        let again: BTreeSet<String> = second.arcs.iter().map(|a| a.segment_id.clone()).collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn test_grid_split_completeness() {
        let mut lines = Vec::new();
        for k in 1..=3 {
            let v = k as f64 * 10.0;
            lines.push(line_string![(x: 0.0, y: v), (x: 40.0, y: v)]);
            lines.push(line_string![(x: v, y: 0.0), (x: v, y: 40.0)]);
        }
        let outcome = CrossingSegmenter::default().segment(collection(lines));

        // Each line is crossed three times, giving four parts.
        assert_eq!(outcome.arcs.len(), 24);
        assert!(outcome.perpetual.is_empty());
        assert!(no_crossings(&outcome.arcs));
        assert!(outcome.arcs.iter().all(|a| is_valid_segment_id(&a.segment_id)));
        let ids: BTreeSet<&str> = outcome.arcs.iter().map(|a| a.segment_id.as_str()).collect();
        assert_eq!(ids.len(), 24);
    }

    #[test]
    fn test_parts_inherit_attributes() {
        let mut arcs = collection(vec![
            line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)],
            line_string![(x: 5.0, y: -5.0), (x: 5.0, y: 5.0)],
        ])
        .into_vec();
        arcs[0].structure_type = "Bridge".to_string();
        arcs[0].boundary_flag = true;
        let outcome = CrossingSegmenter::default().segment(ArcCollection::new(arcs));

        let bridges: Vec<&RoadArc> = outcome
            .arcs
            .iter()
            .filter(|a| a.structure_type == "Bridge")
            .collect();
        assert_eq!(bridges.len(), 2);
        assert!(bridges.iter().all(|a| a.boundary_flag));
    }

    #[test]
    fn test_rounding_collapse_is_perpetual() {
        // The crossing point rounds onto a's start vertex at integer precision.
        let standardizer = Standardizer::new(0);
        let raw = vec![
            line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 1.0)],
            line_string![(x: 1.0, y: -1.0), (x: 0.0, y: 1.0)],
        ]
        .into_iter()
        .map(|line| RawArc {
            segment_id: None,
            segment_type: crate::arcs::SegmentType::Road,
            structure_type: "Unknown".to_string(),
            boundary_flag: false,
            geometry: line.into(),
        })
        .collect();
        let arcs = standardizer.standardize(raw).arcs;
        let a_id = arcs.as_slice()[0].segment_id.clone();

        let outcome = CrossingSegmenter::new(standardizer, DEFAULT_MAX_PASSES).segment(arcs);
        assert_eq!(outcome.perpetual, BTreeSet::from([a_id.clone()]));
        assert!(outcome.arcs.contains(&a_id));
        assert_eq!(outcome.arcs.len(), 3);
    }
}
