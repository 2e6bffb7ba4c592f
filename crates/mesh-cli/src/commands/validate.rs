//! meshrecon validate - check whether a mesh is watertight.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_recon::Mesh;
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ValidationResult {
    path: String,
    watertight: bool,
    issues: Vec<IssueInfo>,
    vertices: usize,
    faces: usize,
    components: usize,
    volume: f64,
    surface_area: f64,
}

#[derive(Serialize)]
struct IssueInfo {
    category: String,
    message: String,
    severity: String,
}

impl IssueInfo {
    fn error(category: &str, message: String) -> Self {
        Self {
            category: category.to_string(),
            message,
            severity: "error".to_string(),
        }
    }
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;

    let report = mesh.validate();
    let mut issues = Vec::new();

    if !report.is_closed {
        issues.push(IssueInfo::error(
            "topology",
            format!("Mesh is open ({} boundary edges)", report.boundary_edge_count),
        ));
    }
    if !report.is_manifold {
        issues.push(IssueInfo::error(
            "topology",
            format!(
                "Mesh is not manifold ({} non-manifold edges, {} non-manifold vertices)",
                report.non_manifold_edge_count, report.non_manifold_vertex_count
            ),
        ));
    }
    if report.component_count != 1 {
        issues.push(IssueInfo::error(
            "topology",
            format!("Mesh has {} components, expected 1", report.component_count),
        ));
    }
    if !report.is_consistently_oriented {
        issues.push(IssueInfo::error(
            "winding",
            "Face winding is inconsistent".to_string(),
        ));
    } else if report.is_inside_out {
        issues.push(IssueInfo::error(
            "winding",
            "Mesh is inside-out (normals point inward)".to_string(),
        ));
    }

    let result = ValidationResult {
        path: input.display().to_string(),
        watertight: report.is_watertight,
        issues,
        vertices: report.vertex_count,
        faces: report.face_count,
        components: report.component_count,
        volume: report.volume,
        surface_area: report.surface_area,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Validation Report".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                println!(
                    "  {}: {} vertices, {} faces, {} components",
                    "Size".cyan(),
                    result.vertices,
                    result.faces,
                    result.components
                );

                if result.watertight {
                    println!("  {}: {}", "Status".cyan(), "Watertight".green().bold());
                    println!("  {}: {:.4}", "Volume".cyan(), result.volume);
                } else {
                    println!("  {}: {}", "Status".cyan(), "Not watertight".red().bold());
                }

                if !result.issues.is_empty() {
                    println!("\n{}", "Issues:".bold());
                    for issue in &result.issues {
                        println!("  {} [{}] {}", "✗".red(), issue.category, issue.message);
                    }
                }
            }
        }
    }

    if !result.watertight {
        std::process::exit(1);
    }

    Ok(())
}
