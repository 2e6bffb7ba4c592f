//! meshrecon convert - point cloud to watertight mesh file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use mesh_recon::{
    AccelContext, CancellationToken, InvalidMeshPolicy, OutlierParams, Pipeline, PlyEncoding,
    Progress, ReconstructionConfig,
};
use serde::Serialize;
use tracing::info;

use crate::{Cli, FileFormat, OutputFormat, Preset, output};

#[derive(Args)]
pub struct ConvertArgs {
    /// Input point cloud (.ply or .xyz)
    pub input: PathBuf,

    /// Directory for <stem>_watertight.<ext>
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Output mesh format
    #[arg(long = "to")]
    pub output_format: Option<FileFormat>,

    /// Starting configuration
    #[arg(long, default_value = "default")]
    pub preset: Preset,

    /// TOML configuration file; flags override its values
    #[arg(long, conflicts_with = "preset")]
    pub config: Option<PathBuf>,

    /// Reconstruction depth (grid of up to 2^depth cells per axis)
    #[arg(long)]
    pub depth: Option<u32>,

    /// Fraction of lowest-density vertices to trim (0 to 0.5)
    #[arg(long)]
    pub trim_quantile: Option<f64>,

    /// Taubin smoothing iterations
    #[arg(long)]
    pub smoothing_iterations: Option<usize>,

    /// Skip hole filling and voxel fallback
    #[arg(long)]
    pub no_repair: bool,

    /// Fail instead of writing a mesh that is not watertight
    #[arg(long)]
    pub reject_invalid: bool,

    /// Drop statistical outliers before normal estimation
    #[arg(long)]
    pub remove_outliers: bool,

    /// Write binary little-endian instead of ASCII PLY
    #[arg(long)]
    pub binary: bool,

    /// Worker threads (default: one per core)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Serialize)]
struct ConvertResult {
    input: String,
    output: String,
    watertight: bool,
    repair: Option<String>,
    retried: bool,
    resolution: usize,
    vertices: usize,
    faces: usize,
    volume: f64,
    surface_area: f64,
}

impl ConvertArgs {
    fn build_config(&self) -> Result<ReconstructionConfig> {
        let mut config = match &self.config {
            Some(path) => ReconstructionConfig::from_toml_file(path)
                .with_context(|| format!("Failed to read configuration from {:?}", path))?,
            None => match self.preset {
                Preset::Default => ReconstructionConfig::default(),
                Preset::Draft => ReconstructionConfig::draft(),
                Preset::HighDetail => ReconstructionConfig::high_detail(),
            },
        };

        if let Some(format) = self.output_format {
            config.output_format = format.into();
        }
        if let Some(depth) = self.depth {
            config.depth = depth;
        }
        if let Some(q) = self.trim_quantile {
            config.trim_quantile = q;
        }
        if let Some(n) = self.smoothing_iterations {
            config.smoothing_iterations = n;
        }
        if self.no_repair {
            config.repair_enabled = false;
        }
        if self.reject_invalid {
            config.invalid_mesh_policy = InvalidMeshPolicy::Reject;
        }
        if self.remove_outliers {
            config.outlier_removal = Some(OutlierParams::default());
        }
        if self.binary {
            config.ply_encoding = PlyEncoding::BinaryLittleEndian;
        }

        config.validate()?;
        Ok(config)
    }
}

pub fn run(args: &ConvertArgs, cli: &Cli) -> Result<()> {
    let config = args.build_config()?;
    info!(
        input = %args.input.display(),
        depth = config.depth,
        format = %config.output_format,
        "Converting point cloud"
    );
    let accel = AccelContext::acquire(args.threads)?;

    let mut cancel = CancellationToken::new();
    if let Some(secs) = args.timeout {
        cancel = cancel.with_timeout(Duration::from_secs(secs));
    }

    let show_progress = !cli.quiet && matches!(cli.format, OutputFormat::Text);
    let mut pipeline = Pipeline::new(config)
        .with_accel(&accel)
        .with_cancel(cancel);
    if show_progress {
        pipeline = pipeline.with_progress(Box::new(|p: &Progress| {
            eprintln!(
                "  {} {}",
                format!("[{}/{}]", p.current + 1, p.total).dimmed(),
                p.message
            );
            true
        }));
    }

    let (path, result) = pipeline
        .convert_file(&args.input, &args.output_dir)
        .with_context(|| format!("Failed to convert {:?}", args.input))?;

    let summary = ConvertResult {
        input: args.input.display().to_string(),
        output: path.display().to_string(),
        watertight: result.watertight(),
        repair: result.repair.as_ref().map(|o| o.to_string()),
        retried: result.retried,
        resolution: result.resolution,
        vertices: result.stats.vertices,
        faces: result.stats.faces,
        volume: result.stats.volume,
        surface_area: result.stats.surface_area,
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.format, cli.quiet),
        OutputFormat::Text => print_text(&summary, &path, cli),
    }

    Ok(())
}

fn print_text(summary: &ConvertResult, path: &Path, cli: &Cli) {
    if cli.quiet {
        return;
    }
    if summary.watertight {
        output::success(
            &format!("Watertight mesh saved to {}", path.display()),
            cli.format,
            cli.quiet,
        );
    } else {
        output::warning(
            &format!(
                "Mesh saved to {} but it is NOT watertight",
                path.display()
            ),
            cli.format,
            cli.quiet,
        );
    }

    println!("  {}: {}", "Grid resolution".cyan(), summary.resolution);
    if let Some(repair) = &summary.repair {
        let retry = if summary.retried { " (after retry)" } else { "" };
        println!("  {}: {}{}", "Repair".cyan(), repair, retry);
    }
    println!(
        "  {}: {} vertices, {} faces",
        "Size".cyan(),
        summary.vertices,
        summary.faces
    );
    println!("  {}: {:.4}", "Volume".cyan(), summary.volume);
    println!("  {}: {:.4}", "Surface area".cyan(), summary.surface_area);
    println!("  {}: {}", "Watertight".cyan(), output::yes_no(summary.watertight));
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use mesh_recon::MeshFormat;
    use std::io::Write;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ConvertArgs,
    }

    fn parse(argv: &[&str]) -> ConvertArgs {
        TestCli::parse_from(std::iter::once("convert").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_flags_override_preset() {
        let args = parse(&[
            "scan.ply",
            "--preset",
            "draft",
            "--depth",
            "7",
            "--to",
            "stl",
            "--no-repair",
            "--reject-invalid",
        ]);
        let config = args.build_config().unwrap();
        assert_eq!(config.depth, 7);
        assert_eq!(config.output_format, MeshFormat::Stl);
        assert!(!config.repair_enabled);
        assert_eq!(config.invalid_mesh_policy, InvalidMeshPolicy::Reject);
        assert_eq!(
            config.smoothing_iterations,
            ReconstructionConfig::draft().smoothing_iterations
        );
    }

    #[test]
    fn test_out_of_range_flag_rejected() {
        let args = parse(&["scan.ply", "--trim-quantile", "0.9"]);
        assert!(args.build_config().is_err());
    }

    #[test]
    fn test_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "depth = 5\nsmoothing_iterations = 3").unwrap();
        file.flush().unwrap();

        let path = file.path().to_string_lossy().into_owned();
        let args = parse(&["scan.xyz", "--config", &path, "--binary"]);
        let config = args.build_config().unwrap();
        assert_eq!(config.depth, 5);
        assert_eq!(config.smoothing_iterations, 3);
        assert_eq!(config.ply_encoding, PlyEncoding::BinaryLittleEndian);
    }
}
