//! calipers - measure a GDAL dataset against a reference frame.
//!
//! Computes the ground sample distance of a dataset and, for every subtree
//! of the target reference frame the dataset touches, the LOD range and
//! tile ranges at which the dataset should be published.
//!
//! Output format:
//!
//! ```text
//! gsd: <number>
//! <nodeSrs>: <minLod,maxLod>/<tileRange@minLod>;...;<tileRange@maxLod>
//! ```

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tilecast::calipers::{self, DatasetType, MeasureParams, Measurement};
use tilecast::frame::FrameRegistry;
use tilecast::logging;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DatasetTypeArg {
    /// Digital elevation model.
    Dem,
    /// Orthophoto imagery.
    Ophoto,
}

impl From<DatasetTypeArg> for DatasetType {
    fn from(value: DatasetTypeArg) -> Self {
        match value {
            DatasetTypeArg::Dem => DatasetType::Dem,
            DatasetTypeArg::Ophoto => DatasetType::Ophoto,
        }
    }
}

#[derive(Parser)]
#[command(name = "calipers")]
#[command(version = tilecast::VERSION)]
#[command(about = "Measures GDAL dataset in given reference frame", long_about = None)]
struct Cli {
    /// Path to the dataset to examine.
    dataset: PathBuf,

    /// Target reference frame.
    reference_frame: String,

    /// Dataset type (dem or ophoto). Mandatory only if autodetect fails.
    #[arg(long, value_enum)]
    dataset_type: Option<DatasetTypeArg>,

    /// Inverse scale between a DEM's resolution and the resolution of the
    /// most detailed orthophoto that can be draped on it. To get a 2x
    /// better orthophoto (resolution scale 1/2) use 2.
    #[arg(long, default_value_t = 3.0)]
    dem_to_ophoto_scale: f64,

    /// Inverse fraction of a tile at which the rasterization algorithm
    /// stops (4 means 1/4 of a tile).
    #[arg(long, default_value_t = 32.0)]
    tile_fraction_limit: f64,

    /// Additional reference-frame registry (JSON file).
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Also write log output to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn run(cli: Cli) -> Result<Measurement, tilecast::Error> {
    let mut frames = FrameRegistry::with_defaults();
    if let Some(registry) = &cli.registry {
        frames.load_file(registry)?;
    }

    let frame = frames.get(&cli.reference_frame).ok_or_else(|| {
        tilecast::Error::NotFound(format!("unknown reference frame '{}'", cli.reference_frame))
    })?;

    let descriptor = tilecast::dataset::probe(&cli.dataset)?;

    let params = MeasureParams {
        dataset_type: cli.dataset_type.map(DatasetType::from),
        dem_to_ophoto_scale: cli.dem_to_ophoto_scale,
        tile_fraction_limit: cli.tile_fraction_limit,
    };

    calipers::measure(&descriptor, frame, &params)
}

/// One output line per productive node.
fn format_node(node: &tilecast::calipers::NodeRanges) -> String {
    let ranges = &node.ranges;
    let mut line = format!("{}: {}", node.srs, ranges.lod_range);
    let mut sep = '/';
    for lod in ranges.lod_range.iter() {
        line.push(sep);
        line.push_str(&ranges.tile_range_at(lod).to_string());
        sep = ';';
    }
    line
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match &cli.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("calipers.log");
            match logging::init_logging_with_file(dir, file) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("calipers: cannot open log file {}: {e}", path.display());
                    return ExitCode::FAILURE;
                }
            }
        }
        None => logging::init_logging(),
    };

    match run(cli) {
        Ok(measurement) => {
            println!("gsd: {}", measurement.gsd);
            for node in &measurement.nodes {
                println!("{}", format_node(node));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("calipers: {e}");
            ExitCode::FAILURE
        }
    }
}
