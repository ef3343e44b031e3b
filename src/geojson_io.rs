//! GeoJSON load and export at the edges of a run.

use crate::arcs::{RoadArc, SegmentType};
use crate::conflation::{ConflationOutcome, ReferencePolygon};
use crate::errors::{Result, TopologyError, io_err};
use crate::meshblock::Meshblock;
use crate::report::ValidationReport;
use crate::standardize::RawArc;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

fn read_collection(path: &Path) -> Result<FeatureCollection> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err!(path, e))?;
    match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        _ => Err(TopologyError::MissingLayer(format!(
            "{} is not a FeatureCollection",
            path.display()
        ))),
    }
}

fn write_geojson(path: &Path, geojson: &GeoJson) -> Result<()> {
    let file = File::create(path).map_err(|e| io_err!(path, e))?;
    serde_json::to_writer(BufWriter::new(file), geojson)?;
    Ok(())
}

fn collection(features: Vec<Feature>) -> GeoJson {
    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

fn property_string(properties: &JsonObject, key: &str) -> Option<String> {
    match properties.get(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn property_flag(properties: &JsonObject, key: &str) -> Result<bool> {
    match properties.get(key) {
        None | Some(JsonValue::Null) => Ok(false),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(JsonValue::Number(n)) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(TopologyError::InvalidAttribute {
                field: "boundary_flag",
                reason: format!("expected 0 or 1, got {}", n),
            }),
        },
        Some(other) => Err(TopologyError::InvalidAttribute {
            field: "boundary_flag",
            reason: format!("expected 0 or 1, got {}", other),
        }),
    }
}

fn property_segment_type(properties: &JsonObject) -> Result<SegmentType> {
    match properties.get("segment_type") {
        None | Some(JsonValue::Null) => Ok(SegmentType::Road),
        Some(JsonValue::Number(n)) => {
            let value = n.as_i64().ok_or_else(|| TopologyError::InvalidAttribute {
                field: "segment_type",
                reason: format!("not an integer: {}", n),
            })?;
            SegmentType::try_from(value)
        }
        Some(other) => Err(TopologyError::InvalidAttribute {
            field: "segment_type",
            reason: format!("not an integer: {}", other),
        }),
    }
}

/// Arc records from a feature collection. Z values are dropped.
pub fn arcs_from_geojson(collection: FeatureCollection) -> Result<Vec<RawArc>> {
    let empty = JsonObject::new();
    collection
        .features
        .into_iter()
        .map(|feature| -> Result<RawArc> {
            let properties = feature.properties.as_ref().unwrap_or(&empty);
            let geometry = match feature.geometry {
                Some(geometry) => geo_types::Geometry::<f64>::try_from(geometry)?,
                None => geo::Geometry::GeometryCollection(geo::GeometryCollection::default()),
            };
            Ok(RawArc {
                segment_id: property_string(properties, "segment_id"),
                segment_type: property_segment_type(properties)?,
                structure_type: property_string(properties, "structure_type")
                    .unwrap_or_else(|| "Unknown".to_string()),
                boundary_flag: property_flag(properties, "boundary_flag")?,
                geometry,
            })
        })
        .collect()
}

pub fn read_arcs(path: &Path) -> Result<Vec<RawArc>> {
    let arcs = arcs_from_geojson(read_collection(path)?)?;
    info!("Read {} arc records from {}", arcs.len(), path.display());
    Ok(arcs)
}

pub fn arcs_to_geojson<'a, I>(arcs: I) -> GeoJson
where
    I: IntoIterator<Item = &'a RoadArc>,
{
    let features = arcs
        .into_iter()
        .map(|arc| {
            let mut properties = JsonObject::new();
            properties.insert("segment_id".to_string(), arc.segment_id.clone().into());
            properties.insert("segment_type".to_string(), i64::from(arc.segment_type).into());
            properties.insert("structure_type".to_string(), arc.structure_type.clone().into());
            properties.insert("boundary_flag".to_string(), i64::from(arc.boundary_flag).into());
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::from(&arc.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    collection(features)
}

pub fn write_arcs(path: &Path, arcs: &[RoadArc]) -> Result<()> {
    write_geojson(path, &arcs_to_geojson(arcs))?;
    info!("Wrote {} arcs to {}", arcs.len(), path.display());
    Ok(())
}

/// Reference polygons keyed by `id_property`. Features that are not a single
/// polygon are skipped.
pub fn references_from_geojson(
    collection: FeatureCollection,
    id_property: &str,
) -> Result<Vec<ReferencePolygon>> {
    let empty = JsonObject::new();
    let mut references = Vec::with_capacity(collection.features.len());
    for (position, feature) in collection.features.into_iter().enumerate() {
        let properties = feature.properties.as_ref().unwrap_or(&empty);
        let Some(id) = property_string(properties, id_property) else {
            return Err(TopologyError::InvalidAttribute {
                field: "reference id",
                reason: format!("feature {} has no '{}' property", position, id_property),
            });
        };
        let geometry = feature
            .geometry
            .map(geo_types::Geometry::<f64>::try_from)
            .transpose()?;
        let polygon = match geometry {
            Some(geo::Geometry::Polygon(polygon)) => Some(polygon),
            Some(geo::Geometry::MultiPolygon(multi)) if multi.0.len() == 1 => {
                multi.0.into_iter().next()
            }
            _ => None,
        };
        let Some(geometry) = polygon else {
            warn!("Skipping reference feature {} ({}): not a single polygon", position, id);
            continue;
        };
        references.push(ReferencePolygon { id, geometry });
    }
    Ok(references)
}

pub fn read_reference_polygons(path: &Path, id_property: &str) -> Result<Vec<ReferencePolygon>> {
    let references = references_from_geojson(read_collection(path)?, id_property)?;
    info!("Read {} reference polygons from {}", references.len(), path.display());
    Ok(references)
}

fn string_array<'a, I: IntoIterator<Item = &'a String>>(ids: I) -> JsonValue {
    JsonValue::Array(ids.into_iter().map(|id| JsonValue::String(id.clone())).collect())
}

/// Meshblock polygons with neighbour and, when available, conflation attributes.
pub fn meshblocks_to_geojson(
    meshblocks: &[Meshblock],
    conflation: Option<&ConflationOutcome>,
) -> GeoJson {
    let features = meshblocks
        .iter()
        .map(|meshblock| {
            let mut properties = JsonObject::new();
            properties.insert("meshblock_id".to_string(), meshblock.meshblock_id.clone().into());
            properties.insert("neighbours".to_string(), string_array(&meshblock.neighbours));
            if let Some(link) = conflation.and_then(|c| c.link(&meshblock.meshblock_id)) {
                properties.insert("linked_ids".to_string(), string_array(&link.linked_ids));
                properties.insert(
                    "primary_id".to_string(),
                    link.primary_id.clone().map_or(JsonValue::Null, JsonValue::String),
                );
                properties.insert("cardinality_valid".to_string(), link.cardinality_valid.into());
                properties.insert(
                    "missing_neighbours".to_string(),
                    string_array(&link.missing_neighbours),
                );
                properties.insert(
                    "extra_neighbours".to_string(),
                    string_array(&link.extra_neighbours),
                );
            }
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::from(&meshblock.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    collection(features)
}

pub fn write_meshblocks(
    path: &Path,
    meshblocks: &[Meshblock],
    conflation: Option<&ConflationOutcome>,
) -> Result<()> {
    write_geojson(path, &meshblocks_to_geojson(meshblocks, conflation))?;
    info!("Wrote {} meshblocks to {}", meshblocks.len(), path.display());
    Ok(())
}

pub fn write_report(path: &Path, report: &ValidationReport) -> Result<()> {
    let file = File::create(path).map_err(|e| io_err!(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    info!("Wrote {} validation records to {}", report.len(), path.display());
    Ok(())
}
