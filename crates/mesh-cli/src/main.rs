//! meshrecon: turn scanned point clouds into watertight, printable meshes.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=mesh_recon=info` - Stage-by-stage logging
//! - `RUST_LOG=mesh_recon=debug` - Detailed progress logging
//! - `RUST_LOG=mesh_recon::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Reconstruct a scan into scan_watertight.stl in ./out
//! meshrecon convert scan.ply -o out --format stl
//!
//! # Check an existing mesh
//! RUST_LOG=debug meshrecon validate model.obj
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use mesh_recon::MeshFormat;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{convert, info, repair, validate};

/// meshrecon - point cloud to watertight mesh.
///
/// Reconstructs a closed, manifold surface from a point cloud, repairs it,
/// smooths it and writes OBJ, PLY or STL ready for slicing.
#[derive(Parser)]
#[command(name = "meshrecon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Mesh file format for written output.
#[derive(Clone, Copy, ValueEnum)]
pub enum FileFormat {
    Obj,
    Ply,
    Stl,
}

impl From<FileFormat> for MeshFormat {
    fn from(format: FileFormat) -> Self {
        match format {
            FileFormat::Obj => MeshFormat::Obj,
            FileFormat::Ply => MeshFormat::Ply,
            FileFormat::Stl => MeshFormat::Stl,
        }
    }
}

/// Starting configuration before individual overrides.
#[derive(Clone, Copy, ValueEnum)]
pub enum Preset {
    /// Depth 9, 10 smoothing iterations
    Default,
    /// Depth 6, for quick previews
    Draft,
    /// Depth 10, larger voxel fallback grid
    HighDetail,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct a watertight mesh from a point cloud (.ply, .xyz)
    Convert(convert::ConvertArgs),

    /// Check whether a mesh is watertight
    Validate {
        /// Input mesh file
        input: PathBuf,
    },

    /// Repair a mesh into a watertight solid
    Repair {
        /// Input mesh file
        input: PathBuf,

        /// Output file path (format determined by extension)
        #[arg(short, long)]
        output: PathBuf,

        /// Reconstruction depth the voxel fallback resolution derives from
        #[arg(long, default_value = "9")]
        depth: u32,

        /// Fill holes up to this edge count before voxelizing
        #[arg(long)]
        max_hole_edges: Option<usize>,

        /// Vertex welding tolerance
        #[arg(long)]
        weld_tolerance: Option<f64>,

        /// Taubin smoothing iterations after repair
        #[arg(long, default_value = "0")]
        smooth: usize,
    },

    /// Display point cloud or mesh statistics
    Info {
        /// Input point cloud or mesh file
        input: PathBuf,

        /// Estimate reconstruction cost at this depth (point clouds only)
        #[arg(long)]
        depth: Option<u32>,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "mesh_recon=info",
            2 => "mesh_recon=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Convert(args) => convert::run(args, &cli),
        Commands::Validate { input } => validate::run(input, &cli),
        Commands::Repair {
            input,
            output,
            depth,
            max_hole_edges,
            weld_tolerance,
            smooth,
        } => repair::run(
            input,
            output,
            *depth,
            *max_hole_edges,
            *weld_tolerance,
            *smooth,
            &cli,
        ),
        Commands::Info { input, depth } => info::run(input, *depth, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(mesh_err) = e.downcast_ref::<mesh_recon::MeshError>() {
                eprintln!("{}: {}", "Error".red().bold(), mesh_err);
                eprintln!("  {}: {}", "Code".cyan(), mesh_err.code());
                eprintln!(
                    "  {}: {:?}",
                    "Category".cyan(),
                    mesh_err.category()
                );
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    mesh_err.recovery_suggestion()
                );
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
