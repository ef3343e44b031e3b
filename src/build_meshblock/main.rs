// cargo run --release --bin build_meshblock -- --input nrn_arcs_validated.geojson \
//     --reference meshblocks_2021.geojson --output meshblock.geojson --report meshblock_errors.json

use anyhow::Result;
use clap::Parser;
use nrn::conflation::DEFAULT_CARDINALITY_THRESHOLD;
use nrn::geojson_io::{read_arcs, read_reference_polygons, write_meshblocks, write_report};
use nrn::standardize::Standardizer;
use nrn::validation::{ValidationConfig, Validator};
use std::path::PathBuf;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Validated arc layer as a GeoJSON FeatureCollection
    #[arg(long, env = "NRN_INPUT")]
    input: PathBuf,

    /// Reference polygon layer to conflate against
    #[arg(long, env = "NRN_REFERENCE")]
    reference: Option<PathBuf>,

    /// Property holding the reference polygon identifier
    #[arg(long, env = "NRN_REFERENCE_ID_FIELD", default_value = "id")]
    reference_id_field: String,

    /// Where to write the meshblock polygons
    #[arg(long, env = "NRN_MESHBLOCK_OUTPUT")]
    output: PathBuf,

    /// Where to write the validation report (JSON)
    #[arg(long, env = "NRN_REPORT")]
    report: PathBuf,

    #[arg(long, env = "NRN_PRECISION", default_value_t = nrn::standardize::DEFAULT_PRECISION)]
    precision: u32,

    /// Minimum shared-area fraction for a many-to-one match
    #[arg(long, env = "NRN_CARDINALITY_THRESHOLD", default_value_t = DEFAULT_CARDINALITY_THRESHOLD)]
    cardinality_threshold: f64,

    #[arg(long, env = "NRN_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    let config = ValidationConfig {
        precision: args.precision,
        cardinality_threshold: args.cardinality_threshold,
        ..ValidationConfig::default()
    };

    let standardized = Standardizer::new(config.precision).standardize(read_arcs(&args.input)?);
    if !standardized.rejected.is_empty() {
        tracing::warn!(
            "{} records with non-linear geometry left out of the meshblock",
            standardized.rejected.len()
        );
    }

    let references = match &args.reference {
        Some(path) => Some(read_reference_polygons(path, &args.reference_id_field)?),
        None => None,
    };

    let run = Validator::new(config)
        .build_meshblock(standardized.arcs.as_slice(), references.as_deref());

    let summary = run.meshblock.summary;
    tracing::info!(
        "Meshblock arcs: {} valid, {} invalid, {} excluded",
        summary.valid,
        summary.invalid,
        summary.excluded
    );

    write_meshblocks(&args.output, &run.meshblock.meshblocks, run.conflation.as_ref())?;
    write_report(&args.report, &run.report)?;

    Ok(())
}
