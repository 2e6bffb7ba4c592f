//! meshrecon repair - close an existing mesh into a watertight solid.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use mesh_recon::{
    Mesh, RepairOutcome, RepairPolicy, SmoothingParams, StageContext, repair_with, smooth_with,
};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct RepairResult {
    input: String,
    output: String,
    path: String,
    outcome: String,
    watertight: bool,
    input_vertices: usize,
    input_faces: usize,
    output_vertices: usize,
    output_faces: usize,
    input_boundary_edges: usize,
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    input: &Path,
    output_path: &Path,
    depth: u32,
    max_hole_edges: Option<usize>,
    weld_tolerance: Option<f64>,
    smooth_iterations: usize,
    cli: &Cli,
) -> Result<()> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let initial = mesh.validate();

    let mut policy = RepairPolicy::default();
    if let Some(max_edges) = max_hole_edges {
        policy.max_hole_edges = max_edges;
    }
    if let Some(tolerance) = weld_tolerance {
        policy.weld_tolerance = tolerance;
    }

    let ctx = StageContext::default();
    let repaired = repair_with(&mesh, depth, &policy, &ctx).context("Repair operation failed")?;
    if let RepairOutcome::Failed { reason } = &repaired.outcome {
        bail!("Mesh could not be repaired: {reason}");
    }

    let mut result_mesh = repaired.mesh;
    if smooth_iterations > 0 {
        let params = SmoothingParams::default();
        let iterations = params.iterations_for(Some(&repaired.outcome), smooth_iterations);
        result_mesh = smooth_with(&result_mesh, iterations, &params, &ctx)?.mesh;
    }

    let report = result_mesh.validate();
    result_mesh
        .save(output_path)
        .with_context(|| format!("Failed to save repaired mesh to {:?}", output_path))?;

    let result = RepairResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        path: repaired.outcome.path().to_string(),
        outcome: repaired.outcome.to_string(),
        watertight: report.is_watertight,
        input_vertices: initial.vertex_count,
        input_faces: initial.face_count,
        output_vertices: report.vertex_count,
        output_faces: report.face_count,
        input_boundary_edges: initial.boundary_edge_count,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Repaired mesh saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!("  {}: {}", "Outcome".cyan(), result.outcome);
                println!(
                    "  {}: {} → {} vertices",
                    "Vertices".cyan(),
                    result.input_vertices,
                    result.output_vertices
                );
                println!(
                    "  {}: {} → {} faces",
                    "Faces".cyan(),
                    result.input_faces,
                    result.output_faces
                );
                if result.input_boundary_edges > 0 {
                    println!(
                        "  {}: {} boundary edges closed",
                        "Repairs".green(),
                        result.input_boundary_edges
                    );
                }
                println!(
                    "  {}: {}",
                    "Watertight".cyan(),
                    output::yes_no(result.watertight)
                );
            }
        }
    }

    Ok(())
}
