//! Conflation of a freshly built meshblock against a reference polygon network.
//!
//! Each new polygon is linked to every reference polygon it shares area with,
//! and its primary reference is the one it overlaps most. New polygons that
//! share a primary reference form a cardinality group. A group is valid when
//! it is a clean one-to-one match, or when the reference covers at least the
//! threshold fraction of the group's total area.
//!
//! Neighbour divergence is judged per group: the references of the group's
//! new neighbours must equal the reference polygon's own neighbours.

use crate::meshblock::Meshblock;
use crate::report::{MESHBLOCK_ID_FIELD, ValidationRecord};
use crate::spatial_index::{Predicate, SpatialIndex};
use geo::{Area, BooleanOps, Polygon};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const DEFAULT_CARDINALITY_THRESHOLD: f64 = 0.8;
pub const CARDINALITY_CODE: &str = "E501";
pub const NEIGHBOURS_CODE: &str = "E502";

/// Shared areas at or below this are boundary contact, not overlap.
const AREA_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub struct ReferencePolygon {
    pub id: String,
    pub geometry: Polygon<f64>,
}

/// Conflation attributes of one new meshblock.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MeshblockLink {
    pub meshblock_id: String,
    /// References sharing area with this meshblock.
    pub linked_ids: BTreeSet<String>,
    /// The linked reference with the largest shared area.
    pub primary_id: Option<String>,
    pub cardinality_valid: bool,
    /// Reference neighbours with no counterpart among the new neighbours.
    pub missing_neighbours: BTreeSet<String>,
    /// Projected new neighbours that are not reference neighbours.
    pub extra_neighbours: BTreeSet<String>,
}

impl MeshblockLink {
    pub fn neighbours_diverge(&self) -> bool {
        !self.missing_neighbours.is_empty() || !self.extra_neighbours.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CardinalityGroup {
    pub reference_id: String,
    pub meshblock_ids: BTreeSet<String>,
    /// Shared area over the group's total area.
    pub coverage: f64,
    pub valid: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ConflationOutcome {
    /// In meshblock order.
    pub links: Vec<MeshblockLink>,
    /// Sorted by reference id.
    pub groups: Vec<CardinalityGroup>,
}

impl ConflationOutcome {
    pub fn link(&self, meshblock_id: &str) -> Option<&MeshblockLink> {
        self.links.iter().find(|l| l.meshblock_id == meshblock_id)
    }

    pub fn cardinality_record(&self) -> Option<ValidationRecord> {
        ValidationRecord::with_field(
            CARDINALITY_CODE,
            "meshblock has no valid cardinality match against the reference network",
            self.links
                .iter()
                .filter(|l| !l.cardinality_valid)
                .map(|l| l.meshblock_id.clone()),
            MESHBLOCK_ID_FIELD,
        )
    }

    pub fn neighbour_record(&self) -> Option<ValidationRecord> {
        ValidationRecord::with_field(
            NEIGHBOURS_CODE,
            "meshblock neighbours differ from the reference neighbours",
            self.links
                .iter()
                .filter(|l| l.neighbours_diverge())
                .map(|l| l.meshblock_id.clone()),
            MESHBLOCK_ID_FIELD,
        )
    }

    pub fn records(&self) -> Vec<ValidationRecord> {
        [self.cardinality_record(), self.neighbour_record()]
            .into_iter()
            .flatten()
            .collect()
    }
}

fn shared_area(a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
    a.intersection(b).unsigned_area()
}

/// Match `meshblocks` against `references` with the given coverage threshold.
pub fn conflate(
    meshblocks: &[Meshblock],
    references: &[ReferencePolygon],
    threshold: f64,
) -> ConflationOutcome {
    let reference_geometries: Vec<Polygon<f64>> =
        references.iter().map(|r| r.geometry.clone()).collect();
    let index = SpatialIndex::build(&reference_geometries);

    // Shared area per (meshblock, reference) position pair.
    let overlaps: Vec<BTreeMap<usize, f64>> = meshblocks
        .iter()
        .map(|m| {
            index
                .query_slice(&m.geometry, Predicate::Intersects, &reference_geometries)
                .into_iter()
                .filter_map(|r| {
                    let area = shared_area(&m.geometry, &reference_geometries[r]);
                    (area > AREA_EPSILON).then_some((r, area))
                })
                .collect()
        })
        .collect();

    let primary: Vec<Option<usize>> = overlaps
        .iter()
        .map(|shared| {
            shared
                .iter()
                .max_by(|(i, a), (j, b)| a.total_cmp(b).then(j.cmp(i)))
                .map(|(r, _)| *r)
        })
        .collect();

    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (m, p) in primary.iter().enumerate() {
        if let Some(r) = p {
            members.entry(*r).or_default().push(m);
        }
    }

    let mut valid_meshblocks = vec![false; meshblocks.len()];
    let mut groups = Vec::with_capacity(members.len());
    for (&r, group) in &members {
        let total: f64 = group.iter().map(|&m| meshblocks[m].geometry.unsigned_area()).sum();
        let covered: f64 = group.iter().map(|&m| overlaps[m].get(&r).copied().unwrap_or(0.0)).sum();
        let coverage = if total > 0.0 { covered / total } else { 0.0 };
        let one_to_one = group.len() == 1 && overlaps[group[0]].len() == 1;
        let valid = one_to_one || coverage >= threshold;
        debug!(
            "Reference {}: {} meshblocks, coverage {:.3}, valid {}",
            references[r].id,
            group.len(),
            coverage,
            valid
        );
        for &m in group {
            valid_meshblocks[m] = valid;
        }
        groups.push(CardinalityGroup {
            reference_id: references[r].id.clone(),
            meshblock_ids: group.iter().map(|&m| meshblocks[m].meshblock_id.clone()).collect(),
            coverage,
            valid,
        });
    }
    groups.sort_by(|a, b| a.reference_id.cmp(&b.reference_id));

    // Neighbour divergence per group.
    let position: BTreeMap<&str, usize> = meshblocks
        .iter()
        .enumerate()
        .map(|(i, m)| (m.meshblock_id.as_str(), i))
        .collect();
    let mut divergence: BTreeMap<usize, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();
    for (&r, group) in &members {
        let projected: BTreeSet<usize> = group
            .iter()
            .flat_map(|&m| meshblocks[m].neighbours.iter())
            .filter_map(|n| position.get(n.as_str()).and_then(|&j| primary[j]))
            .filter(|&p| p != r)
            .collect();
        let expected: BTreeSet<usize> = index
            .query_slice(&reference_geometries[r], Predicate::Touches, &reference_geometries)
            .into_iter()
            .filter(|&j| j != r)
            .collect();
        let ids = |set: BTreeSet<&usize>| -> BTreeSet<String> {
            set.into_iter().map(|&j| references[j].id.clone()).collect()
        };
        let missing = ids(expected.difference(&projected).collect());
        let extra = ids(projected.difference(&expected).collect());
        divergence.insert(r, (missing, extra));
    }

    let links: Vec<MeshblockLink> = meshblocks
        .iter()
        .enumerate()
        .map(|(m, meshblock)| {
            let (missing_neighbours, extra_neighbours) = primary[m]
                .and_then(|r| divergence.get(&r).cloned())
                .unwrap_or_default();
            MeshblockLink {
                meshblock_id: meshblock.meshblock_id.clone(),
                linked_ids: overlaps[m].keys().map(|&r| references[r].id.clone()).collect(),
                primary_id: primary[m].map(|r| references[r].id.clone()),
                cardinality_valid: valid_meshblocks[m],
                missing_neighbours,
                extra_neighbours,
            }
        })
        .collect();

    info!(
        "Conflated {} meshblocks against {} references: {} invalid cardinality, {} divergent",
        meshblocks.len(),
        references.len(),
        links.iter().filter(|l| !l.cardinality_valid).count(),
        links.iter().filter(|l| l.neighbours_diverge()).count()
    );

    ConflationOutcome { links, groups }
}
