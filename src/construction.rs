//! Structural checks on individual arcs: minimum length and simplicity.

use crate::arcs::RoadArc;
use crate::connectivity::{CoordKey, coord_key};
use ahash::AHashMap;
use geo::Line;
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use std::collections::BTreeSet;

pub const DEFAULT_MIN_LENGTH: f64 = 3.0;

/// Structure arcs neither of whose endpoints is shared with another structure arc.
pub fn isolated_structures(arcs: &[RoadArc]) -> BTreeSet<String> {
    let mut structure_nodes: AHashMap<CoordKey, BTreeSet<&str>> = AHashMap::new();
    let structures: Vec<&RoadArc> = arcs.iter().filter(|a| a.is_structure()).collect();
    for arc in &structures {
        let Some((start, end)) = arc.endpoints() else {
            continue;
        };
        for c in [start, end] {
            structure_nodes
                .entry(coord_key(c))
                .or_default()
                .insert(arc.segment_id.as_str());
        }
    }

    structures
        .into_iter()
        .filter(|arc| {
            arc.endpoints().is_some_and(|(start, end)| {
                [start, end].iter().all(|c| {
                    structure_nodes
                        .get(&coord_key(*c))
                        .is_none_or(|ids| ids.len() == 1)
                })
            })
        })
        .map(|arc| arc.segment_id.clone())
        .collect()
}

/// Arcs shorter than `min_length`, except isolated structures.
pub fn find_short_arcs(arcs: &[RoadArc], min_length: f64) -> BTreeSet<String> {
    let short: Vec<&RoadArc> = arcs.iter().filter(|a| a.length() < min_length).collect();
    if short.is_empty() {
        return BTreeSet::new();
    }
    let exempt = isolated_structures(arcs);
    short
        .into_iter()
        .filter(|a| !exempt.contains(&a.segment_id))
        .map(|a| a.segment_id.clone())
        .collect()
}

/// Whether the arc's segments only meet their neighbours at shared vertices.
///
/// A closed arc may meet itself at its endpoint.
pub fn is_simple(arc: &RoadArc) -> bool {
    let lines: Vec<Line<f64>> = arc.geometry.lines().collect();
    let n = lines.len();
    let closed = arc.start() == arc.end();
    for i in 0..n {
        for j in (i + 1)..n {
            let Some(hit) = line_intersection(lines[i], lines[j]) else {
                continue;
            };
            let adjacent = j == i + 1;
            let closing = closed && i == 0 && j == n - 1;
            match hit {
                LineIntersection::Collinear { .. } => return false,
                LineIntersection::SinglePoint { intersection, .. } => {
                    if adjacent && intersection == lines[i].end {
                        continue;
                    }
                    if closing && intersection == lines[i].start {
                        continue;
                    }
                    return false;
                }
            }
        }
    }
    true
}

pub fn find_non_simple(arcs: &[RoadArc]) -> BTreeSet<String> {
    arcs.iter()
        .filter(|a| !is_simple(a))
        .map(|a| a.segment_id.clone())
        .collect()
}
