//! meshrecon info - point cloud and mesh statistics.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_recon::pointcloud::PointCloudFormat;
use mesh_recon::{
    Mesh, PoissonParams, PointCloud, estimate_point_spacing, estimate_reconstruction,
};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct BoundsInfo {
    min: [f64; 3],
    max: [f64; 3],
    dimensions: [f64; 3],
}

impl BoundsInfo {
    fn new((min, max): (nalgebra::Point3<f64>, nalgebra::Point3<f64>)) -> Self {
        let dims = max - min;
        Self {
            min: [min.x, min.y, min.z],
            max: [max.x, max.y, max.z],
            dimensions: [dims.x, dims.y, dims.z],
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Info {
    PointCloud {
        path: String,
        points: usize,
        has_normals: bool,
        has_colors: bool,
        mean_spacing: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        bounds: Option<BoundsInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimate: Option<EstimateInfo>,
    },
    Mesh {
        path: String,
        vertices: usize,
        faces: usize,
        components: usize,
        watertight: bool,
        volume: f64,
        surface_area: f64,
        has_normals: bool,
        has_colors: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        bounds: Option<BoundsInfo>,
    },
}

#[derive(Serialize)]
struct EstimateInfo {
    depth: u32,
    grid: [usize; 3],
    memory_mb: f64,
    seconds: f64,
}

pub fn run(input: &Path, depth: Option<u32>, cli: &Cli) -> Result<()> {
    let info = if is_point_cloud(input)? {
        cloud_info(input, depth)?
    } else {
        mesh_info(input)?
    };

    match cli.format {
        OutputFormat::Json => output::print(&info, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                print_text(&info);
            }
        }
    }
    Ok(())
}

/// XYZ files are always clouds; a PLY is a cloud when it has no faces.
fn is_point_cloud(input: &Path) -> Result<bool> {
    match PointCloudFormat::from_path(input) {
        Some(PointCloudFormat::Xyz) => Ok(true),
        Some(PointCloudFormat::Ply) => {
            let mesh = Mesh::load(input)
                .with_context(|| format!("Failed to read {:?}", input))?;
            Ok(mesh.faces.is_empty())
        }
        None => Ok(false),
    }
}

fn cloud_info(input: &Path, depth: Option<u32>) -> Result<Info> {
    let cloud = PointCloud::load(input)
        .with_context(|| format!("Failed to load point cloud from {:?}", input))?;

    let estimate = depth
        .map(|depth| {
            estimate_reconstruction(&cloud, depth, &PoissonParams::default()).map(|e| {
                EstimateInfo {
                    depth,
                    grid: e.grid_dims,
                    memory_mb: e.estimated_memory_bytes as f64 / (1024.0 * 1024.0),
                    seconds: e.estimated_seconds,
                }
            })
        })
        .transpose()?;

    Ok(Info::PointCloud {
        path: input.display().to_string(),
        points: cloud.len(),
        has_normals: cloud.has_normals(),
        has_colors: cloud.has_colors(),
        mean_spacing: estimate_point_spacing(&cloud),
        bounds: cloud.bounds().map(BoundsInfo::new),
        estimate,
    })
}

fn mesh_info(input: &Path) -> Result<Info> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let report = mesh.validate();

    Ok(Info::Mesh {
        path: input.display().to_string(),
        vertices: report.vertex_count,
        faces: report.face_count,
        components: report.component_count,
        watertight: report.is_watertight,
        volume: report.volume,
        surface_area: report.surface_area,
        has_normals: mesh.has_normals(),
        has_colors: mesh.has_colors(),
        bounds: report.bounds.map(BoundsInfo::new),
    })
}

fn print_bounds(bounds: &Option<BoundsInfo>) {
    if let Some(b) = bounds {
        println!(
            "  {}: {:.3} x {:.3} x {:.3}",
            "Dimensions".cyan(),
            b.dimensions[0],
            b.dimensions[1],
            b.dimensions[2]
        );
        println!(
            "  {}: ({:.3}, {:.3}, {:.3}) to ({:.3}, {:.3}, {:.3})",
            "Bounds".cyan(),
            b.min[0],
            b.min[1],
            b.min[2],
            b.max[0],
            b.max[1],
            b.max[2]
        );
    }
}

fn print_text(info: &Info) {
    match info {
        Info::PointCloud {
            path,
            points,
            has_normals,
            has_colors,
            mean_spacing,
            bounds,
            estimate,
        } => {
            println!("{}", "Point Cloud Information".bold().underline());
            println!("  {}: {}", "File".cyan(), path);
            println!("  {}: {}", "Points".cyan(), points);
            print_bounds(bounds);
            println!("  {}: {:.5}", "Mean spacing".cyan(), mean_spacing);
            println!("  {}: {}", "Has normals".cyan(), output::yes_no(*has_normals));
            println!("  {}: {}", "Has colors".cyan(), output::yes_no(*has_colors));
            if let Some(e) = estimate {
                println!(
                    "  {}: {}x{}x{} grid, ~{:.0} MB, ~{:.1} s at depth {}",
                    "Estimate".cyan(),
                    e.grid[0],
                    e.grid[1],
                    e.grid[2],
                    e.memory_mb,
                    e.seconds,
                    e.depth
                );
            }
        }
        Info::Mesh {
            path,
            vertices,
            faces,
            components,
            watertight,
            volume,
            surface_area,
            has_normals,
            has_colors,
            bounds,
        } => {
            println!("{}", "Mesh Information".bold().underline());
            println!("  {}: {}", "File".cyan(), path);
            println!("  {}: {}", "Vertices".cyan(), vertices);
            println!("  {}: {}", "Faces".cyan(), faces);
            println!("  {}: {}", "Components".cyan(), components);
            print_bounds(bounds);
            println!("  {}: {:.4}", "Volume".cyan(), volume);
            println!("  {}: {:.4}", "Surface area".cyan(), surface_area);
            println!("  {}: {}", "Watertight".cyan(), output::yes_no(*watertight));
            println!("  {}: {}", "Has normals".cyan(), output::yes_no(*has_normals));
            println!("  {}: {}", "Has colors".cyan(), output::yes_no(*has_colors));
        }
    }
}
