// cargo run --release --bin validate_topology -- --input nrn_arcs.geojson \
//     --output nrn_arcs_validated.geojson --report errors.json

use anyhow::Result;
use clap::Parser;
use nrn::connectivity::{DEFAULT_CLUSTER_TOLERANCE, DEFAULT_DANGLE_DISTANCE};
use nrn::segmentation::DEFAULT_MAX_PASSES;
use nrn::geojson_io::{read_arcs, write_arcs, write_report};
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
    /// Arc layer as a GeoJSON FeatureCollection
    #[arg(long, env = "NRN_INPUT")]
    input: PathBuf,

    /// Where to write the corrected arcs
    #[arg(long, env = "NRN_OUTPUT")]
    output: PathBuf,

    /// Where to write the validation report (JSON)
    #[arg(long, env = "NRN_REPORT")]
    report: PathBuf,

    /// Write the corrected arcs even when nothing changed
    #[arg(long)]
    force_export: bool,

    /// Decimal places kept on coordinates
    #[arg(long, env = "NRN_PRECISION", default_value_t = nrn::standardize::DEFAULT_PRECISION)]
    precision: u32,

    /// Minimum arc length in CRS units
    #[arg(long, env = "NRN_MIN_LENGTH", default_value_t = nrn::construction::DEFAULT_MIN_LENGTH)]
    min_length: f64,

    /// Dangles closer than this to another arc are flagged
    #[arg(long, env = "NRN_DANGLE_DISTANCE", default_value_t = DEFAULT_DANGLE_DISTANCE)]
    dangle_distance: f64,

    /// Minimum spacing between consecutive vertices
    #[arg(long, env = "NRN_CLUSTER_TOLERANCE", default_value_t = DEFAULT_CLUSTER_TOLERANCE)]
    cluster_tolerance: f64,

    #[arg(long, env = "NRN_MAX_SEGMENTATION_PASSES", default_value_t = DEFAULT_MAX_PASSES)]
    max_segmentation_passes: usize,

    #[arg(long, env = "NRN_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    let config = ValidationConfig {
        precision: args.precision,
        min_length: args.min_length,
        dangle_distance: args.dangle_distance,
        cluster_tolerance: args.cluster_tolerance,
        max_segmentation_passes: args.max_segmentation_passes,
        ..ValidationConfig::default()
    };
    tracing::debug!("Running with {:?}", config);

    let raw = read_arcs(&args.input)?;
    let outcome = Validator::new(config).run(raw);

    for record in outcome.report.records() {
        tracing::warn!(
            "{}: {} ({} affected)",
            record.code,
            record.description,
            record.affected_ids.len()
        );
    }
    write_report(&args.report, &outcome.report)?;

    if outcome.export_required || args.force_export {
        write_arcs(&args.output, outcome.arcs.as_slice())?;
    } else {
        tracing::info!("No corrections made; skipping arc export");
    }

    Ok(())
}
