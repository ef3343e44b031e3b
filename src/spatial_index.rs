//! R-tree over geometry envelopes, refined with exact DE-9IM predicates.

use geo::relate::IntersectionMatrix;
use geo::{BoundingRect, Rect, Relate};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Predicate {
    Intersects,
    Crosses,
    Overlaps,
    Within,
    CoveredBy,
    Touches,
}

impl Predicate {
    pub fn evaluate(self, matrix: &IntersectionMatrix) -> bool {
        match self {
            Predicate::Intersects => matrix.is_intersects(),
            Predicate::Crosses => matrix.is_crosses(),
            Predicate::Overlaps => matrix.is_overlaps(),
            Predicate::Within => matrix.is_within(),
            Predicate::CoveredBy => matrix.is_coveredby(),
            Predicate::Touches => matrix.is_touches(),
        }
    }
}

type Entry = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Index of item positions. Rebuild it whenever the indexed geometries change.
pub struct SpatialIndex {
    tree: RTree<Entry>,
}

impl SpatialIndex {
    pub fn build<'a, G, I>(geometries: I) -> Self
    where
        G: BoundingRect<f64, Output = Option<Rect<f64>>> + 'a,
        I: IntoIterator<Item = &'a G>,
    {
        let entries: Vec<Entry> = geometries
            .into_iter()
            .enumerate()
            .filter_map(|(i, geometry)| {
                let rect = geometry.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    i,
                ))
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }

    /// Positions whose envelope intersects `rect`.
    pub fn candidates(&self, rect: Rect<f64>) -> impl Iterator<Item = usize> + '_ {
        let envelope = AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        );
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
    }

    /// Positions `j` where `predicate(geometry, lookup(j))` holds.
    ///
    /// `lookup` resolves a position to the geometry the index was built from.
    pub fn query<'b, A, B, F>(
        &self,
        geometry: &A,
        predicate: Predicate,
        lookup: F,
    ) -> BTreeSet<usize>
    where
        A: Relate<f64> + BoundingRect<f64, Output = Option<Rect<f64>>>,
        B: Relate<f64> + 'b,
        F: Fn(usize) -> &'b B,
    {
        let Some(rect) = geometry.bounding_rect() else {
            return BTreeSet::new();
        };
        self.candidates(rect)
            .filter(|&j| predicate.evaluate(&geometry.relate(lookup(j))))
            .collect()
    }

    /// [`SpatialIndex::query`] over the slice the index was built from.
    pub fn query_slice<A, B>(
        &self,
        geometry: &A,
        predicate: Predicate,
        items: &[B],
    ) -> BTreeSet<usize>
    where
        A: Relate<f64> + BoundingRect<f64, Output = Option<Rect<f64>>>,
        B: Relate<f64>,
    {
        self.query(geometry, predicate, |j| &items[j])
    }
}

/// Grow a rectangle by `distance` on every side.
pub fn expand_rect(rect: Rect<f64>, distance: f64) -> Rect<f64> {
    Rect::new(
        geo::Coord {
            x: rect.min().x - distance,
            y: rect.min().y - distance,
        },
        geo::Coord {
            x: rect.max().x + distance,
            y: rect.max().y + distance,
        },
    )
}
