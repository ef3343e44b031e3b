//! Node-level connectivity analysis.
//!
//! Nodes are not stored: they are rebuilt from arc endpoints after every
//! topology mutation. A node's degree counts a self-loop twice.

use crate::arcs::RoadArc;
use crate::spatial_index::{SpatialIndex, expand_rect};
use ahash::AHashSet;
use geo::{Coord, Distance, Euclidean, Point, Rect};
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_DANGLE_DISTANCE: f64 = 5.0;
pub const DEFAULT_CLUSTER_TOLERANCE: f64 = 0.01;

pub type CoordKey = (OrderedFloat<f64>, OrderedFloat<f64>);

pub fn coord_key(c: Coord<f64>) -> CoordKey {
    (OrderedFloat(c.x), OrderedFloat(c.y))
}

pub fn key_coord(key: CoordKey) -> Coord<f64> {
    Coord {
        x: key.0.into_inner(),
        y: key.1.into_inner(),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeIncidence {
    pub segment_ids: BTreeSet<String>,
    pub degree: usize,
}

/// Coordinate → arcs ending there.
#[derive(Clone, Debug, Default)]
pub struct NodeMap {
    nodes: BTreeMap<CoordKey, NodeIncidence>,
}

impl NodeMap {
    pub fn get(&self, c: Coord<f64>) -> Option<&NodeIncidence> {
        self.nodes.get(&coord_key(c))
    }

    pub fn degree(&self, c: Coord<f64>) -> usize {
        self.get(c).map_or(0, |n| n.degree)
    }

    pub fn contains(&self, c: Coord<f64>) -> bool {
        self.nodes.contains_key(&coord_key(c))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Coord<f64>, &NodeIncidence)> {
        self.nodes.iter().map(|(k, v)| (key_coord(*k), v))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub fn compute_nodes<'a, I>(arcs: I) -> NodeMap
where
    I: IntoIterator<Item = &'a RoadArc>,
{
    let mut nodes: BTreeMap<CoordKey, NodeIncidence> = BTreeMap::new();
    for arc in arcs {
        let Some((start, end)) = arc.endpoints() else {
            continue;
        };
        for c in [start, end] {
            let node = nodes.entry(coord_key(c)).or_default();
            node.segment_ids.insert(arc.segment_id.clone());
            node.degree += 1;
        }
    }
    NodeMap { nodes }
}

/// A degree-1 node and the arc ending there.
#[derive(Clone, Debug, PartialEq)]
pub struct Dangle {
    pub coord: Coord<f64>,
    pub segment_id: String,
}

/// Degree-1 nodes, sorted by coordinate.
///
/// With `exclude_boundary`, dangles on arcs flagged as crossing an administrative
/// boundary are skipped.
pub fn find_dangles(arcs: &[RoadArc], nodes: &NodeMap, exclude_boundary: bool) -> Vec<Dangle> {
    let boundary: AHashSet<&str> = arcs
        .iter()
        .filter(|a| a.boundary_flag)
        .map(|a| a.segment_id.as_str())
        .collect();

    nodes
        .iter()
        .filter(|(_, node)| node.degree == 1)
        .filter_map(|(coord, node)| {
            let segment_id = node.segment_ids.iter().next()?;
            if exclude_boundary && boundary.contains(segment_id.as_str()) {
                return None;
            }
            Some(Dangle {
                coord,
                segment_id: segment_id.clone(),
            })
        })
        .collect()
}

/// Arcs with at least one dangling endpoint.
pub fn dangling_arc_ids(arcs: &[RoadArc], nodes: &NodeMap) -> BTreeSet<String> {
    find_dangles(arcs, nodes, false)
        .into_iter()
        .map(|d| d.segment_id)
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NonNodalIntersections {
    /// Coordinates that are both an endpoint and another arc's interior vertex.
    pub coords: Vec<Coord<f64>>,
    /// Arcs ending or passing through those coordinates.
    pub segment_ids: BTreeSet<String>,
}

pub fn find_non_nodal_intersections(arcs: &[RoadArc], nodes: &NodeMap) -> NonNodalIntersections {
    let mut non_nodes: BTreeMap<CoordKey, BTreeSet<&str>> = BTreeMap::new();
    for arc in arcs.iter().filter(|a| a.geometry.0.len() > 2) {
        let coords = &arc.geometry.0;
        for c in &coords[1..coords.len() - 1] {
            non_nodes
                .entry(coord_key(*c))
                .or_default()
                .insert(arc.segment_id.as_str());
        }
    }

    let mut result = NonNodalIntersections::default();
    for (key, interior_ids) in non_nodes {
        let Some(node) = nodes.get(key_coord(key)) else {
            continue;
        };
        // Touching its own interior is a simplicity defect, not a non-nodal join.
        let foreign = node
            .segment_ids
            .iter()
            .any(|end_id| interior_ids.iter().any(|i| *i != end_id.as_str()));
        if !foreign {
            continue;
        }
        result.coords.push(key_coord(key));
        result.segment_ids.extend(node.segment_ids.iter().cloned());
        result
            .segment_ids
            .extend(interior_ids.into_iter().map(str::to_string));
    }
    result
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CloseDangles {
    /// Arcs whose dangling end lies within the distance of a separate arc.
    pub dangle_ids: BTreeSet<String>,
    /// The separate arcs they nearly touch.
    pub nearby_ids: BTreeSet<String>,
}

/// Dangles closer than `min_distance` to an arc they are not connected to.
///
/// `index` must be built over `arcs`.
pub fn find_close_dangles(
    arcs: &[RoadArc],
    nodes: &NodeMap,
    index: &SpatialIndex,
    min_distance: f64,
) -> CloseDangles {
    let mut result = CloseDangles::default();
    for dangle in find_dangles(arcs, nodes, true) {
        let Some(node) = nodes.get(dangle.coord) else {
            continue;
        };
        let point = Point::from(dangle.coord);
        let search = expand_rect(Rect::new(dangle.coord, dangle.coord), min_distance);
        for j in index.candidates(search) {
            let other = &arcs[j];
            if node.segment_ids.contains(&other.segment_id) {
                continue;
            }
            if Euclidean.distance(&point, &other.geometry) <= min_distance {
                result.dangle_ids.insert(dangle.segment_id.clone());
                result.nearby_ids.insert(other.segment_id.clone());
            }
        }
    }
    result
}

/// Arcs with adjacent vertices closer than `tolerance`.
pub fn find_cluster_violations(arcs: &[RoadArc], tolerance: f64) -> BTreeSet<String> {
    arcs.iter()
        .filter(|arc| {
            arc.geometry
                .0
                .windows(2)
                .any(|w| Euclidean.distance(Point::from(w[0]), Point::from(w[1])) < tolerance)
        })
        .map(|arc| arc.segment_id.clone())
        .collect()
}
