//! Validation orchestration.
//!
//! A run standardizes the raw records, repairs crossings, then evaluates every
//! entry of [`VALIDATIONS`] against the corrected collection. Checks never
//! fail the run: each returns at most one record and the orchestrator merges
//! them into a single [`ValidationReport`].

use crate::arcs::{ArcCollection, RoadArc};
use crate::conflation::{
    ConflationOutcome, DEFAULT_CARDINALITY_THRESHOLD, ReferencePolygon, conflate,
};
use crate::connectivity::{
    DEFAULT_CLUSTER_TOLERANCE, DEFAULT_DANGLE_DISTANCE, NodeMap, compute_nodes, find_close_dangles,
    find_cluster_violations, find_dangles, find_non_nodal_intersections,
};
use crate::construction::{DEFAULT_MIN_LENGTH, find_non_simple, find_short_arcs};
use crate::duplication::{find_exact_duplicates, find_overlaps};
use crate::meshblock::{MeshblockOutcome, build_meshblocks};
use crate::report::{SEGMENT_ID_FIELD, ValidationRecord, ValidationReport};
use crate::segmentation::{CrossingSegmenter, DEFAULT_MAX_PASSES};
use crate::spatial_index::SpatialIndex;
use crate::standardize::{DEFAULT_PRECISION, RawArc, RejectedRecord, Standardizer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Thresholds for one validation run. Distances are in CRS units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Decimal places kept on every coordinate.
    pub precision: u32,
    pub min_length: f64,
    pub dangle_distance: f64,
    pub cluster_tolerance: f64,
    /// Minimum shared-area fraction for a many-to-one meshblock match.
    pub cardinality_threshold: f64,
    pub max_segmentation_passes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            min_length: DEFAULT_MIN_LENGTH,
            dangle_distance: DEFAULT_DANGLE_DISTANCE,
            cluster_tolerance: DEFAULT_CLUSTER_TOLERANCE,
            cardinality_threshold: DEFAULT_CARDINALITY_THRESHOLD,
            max_segmentation_passes: DEFAULT_MAX_PASSES,
        }
    }
}

/// Everything a check may read. Nodes and the index are built once per run.
pub struct ValidationContext<'a> {
    pub arcs: &'a [RoadArc],
    pub nodes: NodeMap,
    pub index: SpatialIndex,
    pub rejected: &'a [RejectedRecord],
    pub perpetual: &'a BTreeSet<String>,
    pub config: &'a ValidationConfig,
}

impl<'a> ValidationContext<'a> {
    pub fn new(
        arcs: &'a [RoadArc],
        rejected: &'a [RejectedRecord],
        perpetual: &'a BTreeSet<String>,
        config: &'a ValidationConfig,
    ) -> Self {
        Self {
            nodes: compute_nodes(arcs),
            index: SpatialIndex::build(arcs.iter().map(|a| &a.geometry)),
            arcs,
            rejected,
            perpetual,
            config,
        }
    }
}

pub struct ValidationDescriptor {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub run: fn(&ValidationDescriptor, &ValidationContext) -> Option<ValidationRecord>,
}

impl ValidationDescriptor {
    pub fn evaluate(&self, ctx: &ValidationContext) -> Option<ValidationRecord> {
        (self.run)(self, ctx)
    }

    fn record<I: IntoIterator<Item = String>>(&self, ids: I) -> Option<ValidationRecord> {
        ValidationRecord::for_segments(self.code, self.description, ids)
    }
}

/// Ordered check registry.
pub const VALIDATIONS: &[ValidationDescriptor] = &[
    ValidationDescriptor {
        code: "E100",
        name: "construction_singlepart",
        description: "record geometry is not linear and was dropped",
        run: |d, ctx| {
            d.record(ctx.rejected.iter().map(|r| {
                r.segment_id
                    .clone()
                    .unwrap_or_else(|| format!("record {}", r.position))
            }))
        },
    },
    ValidationDescriptor {
        code: "E101",
        name: "construction_min_length",
        description: "arc is shorter than the minimum length",
        run: |d, ctx| d.record(find_short_arcs(ctx.arcs, ctx.config.min_length)),
    },
    ValidationDescriptor {
        code: "E102",
        name: "construction_simple",
        description: "arc geometry is not simple",
        run: |d, ctx| d.record(find_non_simple(ctx.arcs)),
    },
    ValidationDescriptor {
        code: "E103",
        name: "construction_cluster_tolerance",
        description: "arc has vertices closer than the cluster tolerance",
        run: |d, ctx| d.record(find_cluster_violations(ctx.arcs, ctx.config.cluster_tolerance)),
    },
    ValidationDescriptor {
        code: "E201",
        name: "duplication_duplicated",
        description: "arc duplicates another arc",
        run: |d, ctx| d.record(find_exact_duplicates(ctx.arcs)),
    },
    ValidationDescriptor {
        code: "E202",
        name: "duplication_overlap",
        description: "arc partially overlaps another arc",
        run: |d, ctx| d.record(find_overlaps(ctx.arcs, &ctx.index)),
    },
    ValidationDescriptor {
        code: "E301",
        name: "connectivity_segmentation",
        description: "arc crosses another arc and could not be segmented",
        run: |d, ctx| d.record(ctx.perpetual.iter().cloned()),
    },
    ValidationDescriptor {
        code: "E302",
        name: "connectivity_node_intersection",
        description: "arc endpoint touches another arc away from a node",
        run: |d, ctx| d.record(find_non_nodal_intersections(ctx.arcs, &ctx.nodes).segment_ids),
    },
    ValidationDescriptor {
        code: "E303",
        name: "connectivity_min_distance",
        description: "dangle is within the minimum distance of another arc",
        run: |d, ctx| {
            let close = find_close_dangles(
                ctx.arcs,
                &ctx.nodes,
                &ctx.index,
                ctx.config.dangle_distance,
            );
            let selection: BTreeSet<&String> =
                close.dangle_ids.iter().chain(&close.nearby_ids).collect();
            d.record(close.dangle_ids.iter().cloned())
                .map(|r| r.with_query_ids(SEGMENT_ID_FIELD, selection))
        },
    },
    ValidationDescriptor {
        code: "E304",
        name: "connectivity_dangles",
        description: "arc ends at a dangle",
        run: |d, ctx| {
            d.record(
                find_dangles(ctx.arcs, &ctx.nodes, true)
                    .into_iter()
                    .map(|x| x.segment_id),
            )
        },
    },
];

pub fn descriptor(code: &str) -> Option<&'static ValidationDescriptor> {
    VALIDATIONS.iter().find(|d| d.code == code)
}

#[derive(Debug)]
pub struct ValidationOutcome {
    pub arcs: ArcCollection,
    pub report: ValidationReport,
    /// Set when the corrected arcs differ from the input and must be written back.
    pub export_required: bool,
}

#[derive(Debug)]
pub struct MeshblockRun {
    pub meshblock: MeshblockOutcome,
    pub conflation: Option<ConflationOutcome>,
    pub report: ValidationReport,
}

#[derive(Clone, Debug, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Standardize, segment and validate a raw arc set.
    pub fn run(&self, raw: Vec<RawArc>) -> ValidationOutcome {
        let input_count = raw.len();
        let standardizer = Standardizer::new(self.config.precision);
        let standardized = standardizer.standardize(raw);

        let segmenter = CrossingSegmenter::new(standardizer, self.config.max_segmentation_passes);
        let segmented = segmenter.segment(standardized.arcs);

        let report = self.check(
            segmented.arcs.as_slice(),
            &standardized.rejected,
            &segmented.perpetual,
        );
        let export_required = standardized.export_required || segmented.export_required;
        info!(
            "Validated {} input records into {} arcs; {} error categories, export required: {}",
            input_count,
            segmented.arcs.len(),
            report.len(),
            export_required
        );
        ValidationOutcome {
            arcs: segmented.arcs,
            report,
            export_required,
        }
    }

    /// Evaluate every registered check against an already corrected arc set.
    pub fn check(
        &self,
        arcs: &[RoadArc],
        rejected: &[RejectedRecord],
        perpetual: &BTreeSet<String>,
    ) -> ValidationReport {
        let ctx = ValidationContext::new(arcs, rejected, perpetual, &self.config);
        let mut report = ValidationReport::new();
        for descriptor in VALIDATIONS {
            match descriptor.evaluate(&ctx) {
                Some(record) => {
                    debug!(
                        "{} ({}): {} affected",
                        descriptor.code,
                        descriptor.name,
                        record.affected_ids.len()
                    );
                    report.push(record);
                }
                None => debug!("{} ({}): clean", descriptor.code, descriptor.name),
            }
        }
        report
    }

    /// Build meshblocks and, given a reference network, conflate against it.
    pub fn build_meshblock(
        &self,
        arcs: &[RoadArc],
        references: Option<&[ReferencePolygon]>,
    ) -> MeshblockRun {
        let meshblock = build_meshblocks(arcs);
        let mut report = ValidationReport::new();
        report.extend(meshblock.representation_record());

        let conflation = references.map(|references| {
            conflate(&meshblock.meshblocks, references, self.config.cardinality_threshold)
        });
        if let Some(conflation) = &conflation {
            report.extend(conflation.records());
        }
        MeshblockRun {
            meshblock,
            conflation,
            report,
        }
    }
}
