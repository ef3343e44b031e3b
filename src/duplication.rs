//! Duplicate and overlapping arcs. Reported only: which copy is canonical is ambiguous.

use crate::arcs::RoadArc;
use crate::connectivity::{CoordKey, coord_key};
use crate::spatial_index::{Predicate, SpatialIndex};
use ahash::AHashMap;
use std::collections::BTreeSet;

/// Lengths are compared at this resolution before the exact geometry check.
const LENGTH_RESOLUTION: f64 = 1e-6;

type DuplicateKey = (i64, CoordKey, CoordKey);

fn duplicate_key(arc: &RoadArc) -> Option<DuplicateKey> {
    let (start, end) = arc.endpoints()?;
    let (a, b) = (coord_key(start), coord_key(end));
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Some(((arc.length() / LENGTH_RESOLUTION).round() as i64, lo, hi))
}

fn same_path(a: &RoadArc, b: &RoadArc) -> bool {
    let (x, y) = (&a.geometry.0, &b.geometry.0);
    x.len() == y.len() && (x == y || x.iter().eq(y.iter().rev()))
}

/// Arcs whose full geometry matches another arc vertex for vertex, in either direction.
pub fn find_exact_duplicates(arcs: &[RoadArc]) -> BTreeSet<String> {
    let mut groups: AHashMap<DuplicateKey, Vec<&RoadArc>> = AHashMap::new();
    for arc in arcs {
        if let Some(key) = duplicate_key(arc) {
            groups.entry(key).or_default().push(arc);
        }
    }

    let mut flagged = BTreeSet::new();
    for group in groups.values().filter(|g| g.len() > 1) {
        for (i, a) in group.iter().enumerate() {
            for b in &group[i + 1..] {
                if same_path(a, b) {
                    flagged.insert(a.segment_id.clone());
                    flagged.insert(b.segment_id.clone());
                }
            }
        }
    }
    flagged
}

/// Arcs partially coincident with at least one other arc.
///
/// `index` must be built over `arcs`.
pub fn find_overlaps(arcs: &[RoadArc], index: &SpatialIndex) -> BTreeSet<String> {
    arcs.iter()
        .enumerate()
        .filter(|(i, arc)| {
            index
                .query(&arc.geometry, Predicate::Overlaps, |j| &arcs[j].geometry)
                .into_iter()
                .any(|j| j != *i)
        })
        .map(|(_, arc)| arc.segment_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    #[test]
    fn test_reversed_duplicates_flagged() {
        let arcs = vec![
            RoadArc::new("a", line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 1.0), (x: 10.0, y: 0.0)]),
            RoadArc::new("b", line_string![(x: 10.0, y: 0.0), (x: 5.0, y: 1.0), (x: 0.0, y: 0.0)]),
            RoadArc::new("c", line_string![(x: 0.0, y: 0.0), (x: 5.0, y: -1.0), (x: 10.0, y: 0.0)]),
        ];
        assert_eq!(
            find_exact_duplicates(&arcs),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_identical_duplicates_flagged() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)];
        let arcs = vec![RoadArc::new("a", line.clone()), RoadArc::new("b", line)];
        assert_eq!(find_exact_duplicates(&arcs).len(), 2);
    }

    #[test]
    fn test_overlaps_exclude_duplicates_and_touches() {
        let arcs = vec![
            RoadArc::new("a", line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)]),
            RoadArc::new("b", line_string![(x: 5.0, y: 0.0), (x: 15.0, y: 0.0)]),
            RoadArc::new("c", line_string![(x: 15.0, y: 0.0), (x: 15.0, y: 10.0)]),
            RoadArc::new("d", line_string![(x: 0.0, y: 5.0), (x: 10.0, y: 5.0)]),
            RoadArc::new("e", line_string![(x: 0.0, y: 5.0), (x: 10.0, y: 5.0)]),
        ];
        let index = SpatialIndex::build(arcs.iter().map(|a| &a.geometry));
        assert_eq!(
            find_overlaps(&arcs, &index),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }
}
