//! Tracing extensions for pipeline stages.
//!
//! Structured logging helpers shared by every stage:
//!
//! - **Timers**: [`OperationTimer`] opens a span and logs elapsed time on drop
//! - **Mesh state**: vertex/face counts and extents between stages
//! - **Outcomes**: validation reports and the repair path taken
//!
//! # Usage
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // RUST_LOG=mesh_recon=debug for per-stage detail
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: fallbacks taken, solver not converged, validation failures
//! - **INFO**: stage summaries and timing
//! - **DEBUG**: intermediate counts (holes, loops, components)
//! - **TRACE**: per-element detail

use std::time::Instant;
use tracing::{Span, debug, info, trace, warn};

use crate::repair::RepairOutcome;
use crate::types::Mesh;
use crate::validate::ValidationReport;

/// A performance timer that logs duration on drop.
///
/// ```rust,ignore
/// fn expensive_stage() {
///     let _timer = OperationTimer::new("voxelize");
///     // ... work ...
/// } // logs elapsed_ms here
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("mesh_stage", stage = name);
        debug!(target: "mesh_recon::timing", stage = name, "Starting stage");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer carrying the input mesh size.
    pub fn with_mesh(name: &'static str, mesh: &Mesh) -> Self {
        let span = tracing::info_span!(
            "mesh_stage",
            stage = name,
            faces = mesh.face_count(),
            vertices = mesh.vertex_count()
        );
        debug!(
            target: "mesh_recon::timing",
            stage = name,
            faces = mesh.face_count(),
            vertices = mesh.vertex_count(),
            "Starting stage"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "mesh_recon::timing",
            stage = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Stage completed"
        );
    }
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &Mesh, context: &str) {
    let (min_bounds, max_bounds) = mesh.bounds().unwrap_or_default();
    let dims = max_bounds - min_bounds;

    debug!(
        target: "mesh_recon::mesh_state",
        context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        dimensions = format!("{:.3} x {:.3} x {:.3}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
    trace!(
        target: "mesh_recon::mesh_state",
        context,
        has_normals = mesh.has_normals(),
        has_colors = mesh.has_colors(),
        signed_volume = mesh.signed_volume(),
        "Mesh attributes"
    );
}

/// Log a validation report.
pub fn log_validation_result(report: &ValidationReport) {
    if report.is_watertight {
        info!(
            target: "mesh_recon::validation",
            is_watertight = report.is_watertight,
            is_manifold = report.is_manifold,
            vertex_count = report.vertex_count,
            face_count = report.face_count,
            "Mesh validation passed"
        );
    } else {
        warn!(
            target: "mesh_recon::validation",
            is_manifold = report.is_manifold,
            is_consistently_oriented = report.is_consistently_oriented,
            boundary_edges = report.boundary_edge_count,
            non_manifold_edges = report.non_manifold_edge_count,
            non_manifold_vertices = report.non_manifold_vertex_count,
            components = report.component_count,
            "Mesh validation found issues"
        );
    }
}

/// Log which repair path was taken.
pub fn log_repair_outcome(outcome: &RepairOutcome, elapsed_ms: f64) {
    match outcome {
        RepairOutcome::Filled { holes_filled } => info!(
            target: "mesh_recon::repair",
            path = "filled",
            holes_filled,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Repair completed"
        ),
        RepairOutcome::Voxelized { reason, resolution } => warn!(
            target: "mesh_recon::repair",
            path = "voxelized",
            reason = %reason,
            resolution,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Repair fell back to voxelization"
        ),
        RepairOutcome::Failed { reason } => warn!(
            target: "mesh_recon::repair",
            path = "failed",
            reason = %reason,
            "Repair failed"
        ),
    }
}

/// Log entry into a pipeline stage.
pub fn log_stage(stage: &str, index: usize, total: usize) {
    debug!(
        target: "mesh_recon::progress",
        stage,
        index,
        total,
        "Entering stage"
    );
}

/// Log a file I/O operation.
pub fn log_io_operation(operation: &str, path: &std::path::Path, format: &str, success: bool) {
    if success {
        info!(
            target: "mesh_recon::io",
            operation,
            path = %path.display(),
            format,
            "I/O operation completed"
        );
    } else {
        warn!(
            target: "mesh_recon::io",
            operation,
            path = %path.display(),
            format,
            "I/O operation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::VoxelReason;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_stage");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_logging_helpers_accept_empty_inputs() {
        let mesh = Mesh::new();
        log_mesh_stats(&mesh, "test");
        let _timer = OperationTimer::with_mesh("empty", &mesh);
        log_validation_result(&crate::validate::validate(&mesh));
        log_repair_outcome(&RepairOutcome::Filled { holes_filled: 0 }, 0.0);
        log_repair_outcome(
            &RepairOutcome::Voxelized {
                reason: VoxelReason::OversizedHole { edges: 500 },
                resolution: 64,
            },
            1.0,
        );
        log_stage("load", 0, 7);
    }
}
