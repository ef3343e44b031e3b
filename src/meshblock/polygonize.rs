//! Planar polygonization of a line set.
//!
//! Lines are noded at every intersection, dangling chains and cut edges are
//! removed, and minimal faces are walked on a half-edge structure. Clockwise
//! rings are component outlines: they become holes of the smallest face that
//! contains them, or are dropped when nothing does.

use crate::connectivity::{CoordKey, coord_key};
use crate::segmentation::segment_param;
use ahash::{AHashMap, AHashSet};
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Area, Contains, Coord, Line, LineString, Point, Polygon};
use rstar::{AABB, RTree, RTreeObject};
use std::collections::BTreeMap;

const AREA_EPSILON: f64 = 1e-12;

#[derive(Clone, Copy, Debug)]
struct IndexedLine {
    line: Line<f64>,
    index: usize,
}

impl RTreeObject for IndexedLine {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        let (p1, p2) = (self.line.start, self.line.end);
        AABB::from_corners(
            [p1.x.min(p2.x), p1.y.min(p2.y)],
            [p1.x.max(p2.x), p1.y.max(p2.y)],
        )
    }
}

/// Split every segment at the points where it meets any other segment.
fn node_segments(lines: &[LineString<f64>]) -> Vec<Line<f64>> {
    let segments: Vec<Line<f64>> = lines
        .iter()
        .flat_map(|l| l.lines())
        .filter(|s| s.start != s.end)
        .collect();
    let indexed: Vec<IndexedLine> = segments
        .iter()
        .enumerate()
        .map(|(index, line)| IndexedLine { line: *line, index })
        .collect();
    let tree = RTree::bulk_load(indexed);

    let mut splits: AHashMap<usize, Vec<Coord<f64>>> = AHashMap::new();
    for (a, b) in tree.intersection_candidates_with_other_tree(&tree) {
        if a.index >= b.index {
            continue;
        }
        let points = match line_intersection(a.line, b.line) {
            Some(LineIntersection::SinglePoint { intersection, .. }) => vec![intersection],
            Some(LineIntersection::Collinear { intersection }) => {
                vec![intersection.start, intersection.end]
            }
            None => continue,
        };
        for p in points {
            for item in [a, b] {
                if p != item.line.start && p != item.line.end {
                    splits.entry(item.index).or_default().push(p);
                }
            }
        }
    }

    let mut noded = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let Some(points) = splits.get_mut(&i) else {
            noded.push(*segment);
            continue;
        };
        points.push(segment.start);
        points.push(segment.end);
        points.sort_by(|p, q| {
            segment_param(*segment, *p).total_cmp(&segment_param(*segment, *q))
        });
        points.dedup();
        noded.extend(
            points
                .windows(2)
                .filter(|w| w[0] != w[1])
                .map(|w| Line::new(w[0], w[1])),
        );
    }
    noded
}

/// Undirected planar graph over unique noded segments.
struct PlanarGraph {
    vertices: Vec<Coord<f64>>,
    edges: Vec<(usize, usize)>,
}

impl PlanarGraph {
    fn from_segments(segments: &[Line<f64>]) -> Self {
        let mut ids: BTreeMap<CoordKey, usize> = BTreeMap::new();
        let mut vertices = Vec::new();
        let mut vertex = |c: Coord<f64>| {
            *ids.entry(coord_key(c)).or_insert_with(|| {
                vertices.push(c);
                vertices.len() - 1
            })
        };
        let mut seen: AHashSet<(usize, usize)> = AHashSet::new();
        let mut edges = Vec::new();
        for s in segments {
            let (u, v) = (vertex(s.start), vertex(s.end));
            if u == v {
                continue;
            }
            if seen.insert((u.min(v), u.max(v))) {
                edges.push((u, v));
            }
        }
        Self { vertices, edges }
    }

    /// Drop edges with an endpoint of degree one until none remain.
    fn prune_dangles(&mut self) {
        loop {
            let mut degree = vec![0usize; self.vertices.len()];
            for &(u, v) in &self.edges {
                degree[u] += 1;
                degree[v] += 1;
            }
            let before = self.edges.len();
            self.edges.retain(|&(u, v)| degree[u] > 1 && degree[v] > 1);
            if self.edges.len() == before {
                break;
            }
        }
    }

    /// Walk every half-edge once, keeping the face on the left.
    ///
    /// Half-edge `2e` runs along edge `e`, `2e + 1` against it. Returns the
    /// half-edge cycles.
    fn faces(&self) -> Vec<Vec<usize>> {
        let half_count = self.edges.len() * 2;
        let origin = |h: usize| {
            let (u, v) = self.edges[h / 2];
            if h % 2 == 0 { u } else { v }
        };
        let target = |h: usize| origin(h ^ 1);

        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.vertices.len()];
        for h in 0..half_count {
            outgoing[origin(h)].push(h);
        }
        let angle = |h: usize| {
            let (a, b) = (self.vertices[origin(h)], self.vertices[target(h)]);
            (b.y - a.y).atan2(b.x - a.x)
        };
        let mut slot = vec![0usize; half_count];
        for list in outgoing.iter_mut() {
            list.sort_by(|&p, &q| angle(p).total_cmp(&angle(q)).then(p.cmp(&q)));
            for (i, &h) in list.iter().enumerate() {
                slot[h] = i;
            }
        }
        // Next half-edge: the one preceding the twin in counter-clockwise order.
        let next = |h: usize| {
            let twin = h ^ 1;
            let list = &outgoing[origin(twin)];
            list[(slot[twin] + list.len() - 1) % list.len()]
        };

        let mut visited = vec![false; half_count];
        let mut cycles = Vec::new();
        for start in 0..half_count {
            if visited[start] {
                continue;
            }
            let mut cycle = Vec::new();
            let mut h = start;
            while !visited[h] {
                visited[h] = true;
                cycle.push(h);
                h = next(h);
            }
            cycles.push(cycle);
        }
        cycles
    }

    fn ring(&self, cycle: &[usize]) -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = cycle
            .iter()
            .map(|&h| {
                let (u, v) = self.edges[h / 2];
                self.vertices[if h % 2 == 0 { u } else { v }]
            })
            .collect();
        if let Some(&first) = coords.first() {
            coords.push(first);
        }
        LineString::new(coords)
    }
}

fn signed_area(ring: &LineString<f64>) -> f64 {
    ring.lines()
        .map(|l| l.start.x * l.end.y - l.end.x * l.start.y)
        .sum::<f64>()
        / 2.0
}

/// Minimal closed faces of the arrangement formed by `lines`.
pub fn polygonize(lines: &[LineString<f64>]) -> Vec<Polygon<f64>> {
    let mut graph = PlanarGraph::from_segments(&node_segments(lines));

    let cycles = loop {
        graph.prune_dangles();
        let cycles = graph.faces();
        let mut face_of = vec![0usize; graph.edges.len() * 2];
        for (f, cycle) in cycles.iter().enumerate() {
            for &h in cycle {
                face_of[h] = f;
            }
        }
        // A cut edge has the same face on both sides.
        let before = graph.edges.len();
        let mut e = 0;
        graph.edges.retain(|_| {
            let keep = face_of[2 * e] != face_of[2 * e + 1];
            e += 1;
            keep
        });
        if graph.edges.len() == before {
            break cycles;
        }
    };

    let mut shells: Vec<(LineString<f64>, f64)> = Vec::new();
    let mut outlines: Vec<LineString<f64>> = Vec::new();
    for cycle in &cycles {
        let ring = graph.ring(cycle);
        let area = signed_area(&ring);
        if area > AREA_EPSILON {
            shells.push((ring, area));
        } else if area < -AREA_EPSILON {
            outlines.push(ring);
        }
    }

    let shell_polygons: Vec<Polygon<f64>> = shells
        .iter()
        .map(|(ring, _)| Polygon::new(ring.clone(), vec![]))
        .collect();
    let mut holes: Vec<Vec<LineString<f64>>> = vec![Vec::new(); shells.len()];
    for outline in outlines {
        let Some(&first) = outline.0.first() else {
            continue;
        };
        let vertex = Point::from(first);
        let container = shell_polygons
            .iter()
            .enumerate()
            .filter(|(_, shell)| shell.contains(&vertex))
            .min_by(|(i, _), (j, _)| shells[*i].1.total_cmp(&shells[*j].1))
            .map(|(i, _)| i);
        if let Some(i) = container {
            holes[i].push(outline);
        }
    }

    shells
        .into_iter()
        .zip(holes)
        .map(|((ring, _), interiors)| Polygon::new(ring, interiors))
        .filter(|p| p.unsigned_area() > AREA_EPSILON)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    fn square(x0: f64, y0: f64, size: f64) -> LineString<f64> {
        let (x1, y1) = (x0 + size, y0 + size);
        line_string![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)]
    }

    fn total_area(polygons: &[Polygon<f64>]) -> f64 {
        polygons.iter().map(|p| p.unsigned_area()).sum()
    }

    #[test]
    fn test_single_square() {
        let polygons = polygonize(&[line_string![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0)
        ]]);
        assert_eq!(polygons.len(), 1);
        assert!((total_area(&polygons) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_unnoded_cross_in_square() {
        // Interior lines end on the square's edges and cross each other.
        let polygons = polygonize(&[
            square(0.0, 0.0, 20.0),
            line_string![(x: 0.0, y: 10.0), (x: 20.0, y: 10.0)],
            line_string![(x: 10.0, y: 0.0), (x: 10.0, y: 20.0)],
        ]);
        assert_eq!(polygons.len(), 4);
        assert!(polygons.iter().all(|p| (p.unsigned_area() - 100.0).abs() < 1e-9));
    }

    #[test]
    fn test_dangles_and_cut_edges_removed() {
        let polygons = polygonize(&[
            square(0.0, 0.0, 10.0),
            square(20.0, 0.0, 10.0),
            // Bridge between the squares and a spur off the second one.
            line_string![(x: 10.0, y: 5.0), (x: 20.0, y: 5.0)],
            line_string![(x: 30.0, y: 5.0), (x: 40.0, y: 5.0)],
        ]);
        assert_eq!(polygons.len(), 2);
        assert!((total_area(&polygons) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_nested_ring_becomes_hole() {
        let polygons = polygonize(&[
            square(0.0, 0.0, 30.0),
            square(10.0, 10.0, 10.0),
        ]);
        assert_eq!(polygons.len(), 2);
        // Area conservation: faces tile the outer square exactly once.
        assert!((total_area(&polygons) - 900.0).abs() < 1e-9);
        assert!(polygons.iter().any(|p| p.interiors().len() == 1));
    }

    #[test]
    fn test_open_lines_have_no_faces() {
        let polygons = polygonize(&[
            line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)],
            line_string![(x: 10.0, y: 0.0), (x: 10.0, y: 10.0)],
        ]);
        assert!(polygons.is_empty());
    }
}
