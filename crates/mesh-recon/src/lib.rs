//! Point cloud to watertight triangle mesh.
//!
//! This crate turns an unstructured, possibly incomplete point cloud into a
//! closed, manifold, outward-oriented triangle mesh ready for 3D printing.
//! It is built as a chain of stateless stages that take and return owned
//! values:
//!
//! - **Loader**: validate points, estimate and orient normals ([`pointcloud`])
//! - **Reconstructor**: implicit-surface reconstruction with per-vertex
//!   density ([`reconstruct`])
//! - **Trimmer**: remove low-density, unsupported surface ([`trim`])
//! - **Repairer**: fill holes, or fall back to voxelization ([`repair`])
//! - **Smoother**: shrink-free Taubin smoothing ([`smooth`])
//! - **Validator**: certify the result ([`validate()`])
//! - **Exporter**: OBJ, PLY and STL ([`io`])
//!
//! [`Pipeline`] runs them in order with a single [`ReconstructionConfig`].
//!
//! # Depth and cost
//!
//! `depth` bounds the reconstruction grid at `2^depth` cells per axis.
//! Memory and time grow steeply with it, so both grid stages estimate their
//! footprint first and fail with [`MeshError::ResourceLimit`] rather than
//! allocate past the [`ResourceBudget`].
//!
//! # Orientation
//!
//! Face winding is counter-clockwise when viewed from outside, so normals
//! point outward by the right-hand rule.
//!
//! # Quick Start
//!
//! ```no_run
//! use mesh_recon::{MeshFormat, Pipeline, PointCloud, ReconstructionConfig};
//!
//! let cloud = PointCloud::load("object.ply")?;
//! let output = Pipeline::new(ReconstructionConfig::default()).run(cloud)?;
//!
//! if !output.watertight() {
//!     eprintln!("best-effort mesh: {}", output.report);
//! }
//! output.mesh.save("object_watertight.stl")?;
//! # Ok::<(), mesh_recon::MeshError>(())
//! ```
//!
//! # Individual stages
//!
//! ```no_run
//! use mesh_recon::{PointCloud, NormalParams, reconstruct, repair, trim, smooth, validate};
//!
//! let cloud = PointCloud::load("object.xyz")?
//!     .with_estimated_normals(&NormalParams::default())?;
//! let recon = reconstruct(&cloud, 8)?;
//! let trimmed = trim(&recon.mesh, &recon.density, 0.02)?;
//! let repaired = repair(&trimmed, 8)?;
//! let smoothed = smooth(&repaired, 5, 0.5)?;
//! assert!(validate(&smoothed).is_watertight);
//! # Ok::<(), mesh_recon::MeshError>(())
//! ```
//!
//! # Logging
//!
//! Every stage logs through `tracing`; see [`tracing_ext`] for the targets.

mod error;
mod pipeline;
pub mod tracing_ext;
mod types;

pub mod accel;
pub mod adjacency;
pub mod components;
pub mod holes;
pub mod intersect;
pub mod io;
pub mod pointcloud;
pub mod progress;
pub mod reconstruct;
pub mod repair;
pub mod smooth;
pub mod trim;
pub mod validate;
pub mod voxel;
pub mod winding;

// Core types
pub use error::{ErrorCategory, ErrorCode, MeshError, MeshResult, RecoverySuggestion};
pub use types::{Mesh, Triangle, Vertex, VertexColor};

pub use adjacency::MeshAdjacency;

// Stage 1: loading and normals
pub use pointcloud::{
    CloudPoint, MIN_POINTS, NormalOrientation, NormalParams, PointCloud, PointCloudFormat,
    estimate_normals, estimate_point_spacing,
};

// Stage 2: reconstruction
pub use reconstruct::{
    MAX_DEPTH, PoissonParams, Reconstruction, estimate_reconstruction, reconstruct,
    reconstruct_with,
};

// Stage 3: trimming
pub use trim::{quantile, trim};

// Stage 4: repair
pub use components::{ComponentAnalysis, find_connected_components, keep_largest_component};
pub use holes::{BoundaryLoop, HoleDefect, UnfillableHole, detect_holes, fill_holes};
pub use intersect::{IntersectionParams, SelfIntersectionResult, detect_self_intersections};
pub use repair::{
    RepairOutcome, RepairPolicy, RepairResult, VoxelReason, compute_vertex_normals, repair,
    repair_with,
};
pub use voxel::{estimate_voxelization, voxelize};
pub use winding::{fix_winding_order, is_consistently_oriented, orient_outward};

// Stage 5: smoothing
pub use smooth::{SmoothResult, SmoothingParams, smooth, smooth_with};

// Stage 6: validation
pub use validate::{ValidationReport, check_mesh_data, validate};

// Export
pub use io::{
    MeshFormat, PlyEncoding, export, export_obj, export_ply, export_stl, export_with, load_mesh,
    mesh_from_bytes, output_path_for, save, save_with,
};

// Orchestration
pub use pipeline::{
    InvalidMeshPolicy, MeshStats, OutlierParams, Pipeline, PipelineOutput, ReconstructionConfig,
    convert,
};

// Resources, progress and cancellation
pub use accel::AccelContext;
pub use progress::{
    CancellationToken, OperationEstimate, OperationType, Progress, ProgressCallback,
    ResourceBudget, StageContext,
};

pub use tracing_ext::{OperationTimer, log_mesh_stats, log_validation_result};

// Convenience methods on Mesh
impl Mesh {
    /// Load a mesh from a file, detecting the format from the extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> MeshResult<Self> {
        io::load_mesh(path.as_ref())
    }

    /// Parse a mesh held in memory.
    pub fn from_bytes(bytes: &[u8], format: MeshFormat) -> MeshResult<Self> {
        io::mesh_from_bytes(bytes, format)
    }

    /// Save to a file, detecting the format from the extension.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> MeshResult<()> {
        let path = path.as_ref();
        let format = MeshFormat::from_path(path).ok_or_else(|| {
            MeshError::unsupported_format(
                path.extension().and_then(|e| e.to_str()).map(String::from),
            )
        })?;
        io::save(self, path, format)
    }

    /// Serialize to `format`.
    pub fn export(&self, format: MeshFormat) -> MeshResult<Vec<u8>> {
        io::export(self, format)
    }

    /// Measure the mesh and report whether it is watertight.
    pub fn validate(&self) -> ValidationReport {
        validate::validate(self)
    }

    /// Compute area-weighted vertex normals.
    pub fn compute_normals(&mut self) {
        repair::compute_vertex_normals(self)
    }

    /// Find edge-connected components.
    pub fn find_components(&self) -> ComponentAnalysis {
        components::find_connected_components(self)
    }

    /// Check for intersecting face pairs.
    pub fn detect_self_intersections(&self) -> SelfIntersectionResult {
        intersect::detect_self_intersections(self, &IntersectionParams::default())
    }
}
