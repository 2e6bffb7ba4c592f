//! End-to-end conversion: point cloud in, validated mesh out.
//!
//! The stages always run in the same order:
//!
//! 1. load (validation, optional outlier removal, normals)
//! 2. reconstruct
//! 3. trim
//! 4. repair (one relaxed retry when the result does not validate)
//! 5. smooth
//! 6. validate
//! 7. export (only for [`Pipeline::convert_file`])
//!
//! # Example
//!
//! ```no_run
//! use mesh_recon::{Pipeline, PointCloud, ReconstructionConfig};
//!
//! let cloud = PointCloud::load("scan.ply")?;
//! let output = Pipeline::new(ReconstructionConfig::draft()).run(cloud)?;
//! println!("{}", output.stats);
//! # Ok::<(), mesh_recon::MeshError>(())
//! ```

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::accel::AccelContext;
use crate::error::{MeshError, MeshResult};
use crate::io::{MeshFormat, PlyEncoding, output_path_for, save_with};
use crate::pointcloud::{NormalParams, PointCloud};
use crate::progress::{
    CancellationToken, ProgressCallback, ResourceBudget, StageContext, StageReporter,
};
use crate::reconstruct::{MAX_DEPTH, PoissonParams, reconstruct_with};
use crate::repair::{RepairOutcome, RepairPolicy, repair_with};
use crate::smooth::{SmoothingParams, smooth_with};
use crate::tracing_ext::{log_mesh_stats, log_stage, log_validation_result};
use crate::trim::{MAX_TRIM_QUANTILE, trim};
use crate::types::Mesh;
use crate::validate::{ValidationReport, validate};

/// What to do with a mesh that fails final validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum InvalidMeshPolicy {
    /// Return the best-effort mesh with `watertight = false`.
    #[default]
    Tag,
    /// Fail with [`MeshError::UnrepairableMesh`].
    Reject,
}

/// Statistical outlier removal before normal estimation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct OutlierParams {
    /// Neighbors per point.
    pub k: usize,
    /// Points farther than `mean + std_ratio * std` are dropped.
    pub std_ratio: f64,
}

impl Default for OutlierParams {
    fn default() -> Self {
        Self {
            k: 20,
            std_ratio: 2.0,
        }
    }
}

/// Settings for one conversion.
///
/// # Example
///
/// ```
/// use mesh_recon::{MeshFormat, ReconstructionConfig};
///
/// let config = ReconstructionConfig {
///     depth: 7,
///     output_format: MeshFormat::Stl,
///     ..ReconstructionConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ReconstructionConfig {
    /// Octree depth in `1..=14`; grid resolution is at most `2^depth`.
    ///
    /// Default: `9`
    pub depth: u32,

    /// Fraction of lowest-density vertices removed, in `[0, 0.5]`.
    ///
    /// Default: `0.01`
    pub trim_quantile: f64,

    /// Run the repair stage.
    ///
    /// Default: `true`
    pub repair_enabled: bool,

    /// Base Taubin iterations, scaled by the repair path taken.
    ///
    /// Default: `10`
    pub smoothing_iterations: usize,

    /// Format written by [`Pipeline::convert_file`].
    ///
    /// Default: `obj`
    pub output_format: MeshFormat,

    /// Encoding used when `output_format` is PLY.
    pub ply_encoding: PlyEncoding,

    /// What to do when the final mesh is not watertight.
    pub invalid_mesh_policy: InvalidMeshPolicy,

    /// Optional outlier removal; off by default.
    pub outlier_removal: Option<OutlierParams>,

    pub normals: NormalParams,
    pub poisson: PoissonParams,
    pub repair: RepairPolicy,
    pub smoothing: SmoothingParams,
    pub budget: ResourceBudget,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            depth: 9,
            trim_quantile: 0.01,
            repair_enabled: true,
            smoothing_iterations: 10,
            output_format: MeshFormat::Obj,
            ply_encoding: PlyEncoding::Ascii,
            invalid_mesh_policy: InvalidMeshPolicy::Tag,
            outlier_removal: None,
            normals: NormalParams::default(),
            poisson: PoissonParams::default(),
            repair: RepairPolicy::default(),
            smoothing: SmoothingParams::default(),
            budget: ResourceBudget::default(),
        }
    }
}

impl ReconstructionConfig {
    /// Fast, coarse preset for previews.
    pub fn draft() -> Self {
        Self {
            depth: 6,
            smoothing_iterations: 5,
            ..Self::default()
        }
    }

    /// Fine preset; needs dense clouds to benefit.
    pub fn high_detail() -> Self {
        Self {
            depth: 10,
            smoothing_iterations: 15,
            repair: RepairPolicy {
                max_voxel_resolution: 256,
                ..RepairPolicy::default()
            },
            ..Self::default()
        }
    }

    /// Reject out-of-range values.
    ///
    /// # Errors
    ///
    /// [`MeshError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> MeshResult<()> {
        if !(1..=MAX_DEPTH).contains(&self.depth) {
            return Err(MeshError::invalid_config("depth", self.depth, "must be in 1..=14"));
        }
        if !(0.0..=MAX_TRIM_QUANTILE).contains(&self.trim_quantile) {
            return Err(MeshError::invalid_config(
                "trim_quantile",
                self.trim_quantile,
                "must be in [0, 0.5]",
            ));
        }
        if self.normals.k < 3 {
            return Err(MeshError::invalid_config("normals.k", self.normals.k, "must be >= 3"));
        }
        if let Some(outliers) = &self.outlier_removal
            && (outliers.k == 0 || !(outliers.std_ratio > 0.0))
        {
            return Err(MeshError::invalid_config(
                "outlier_removal",
                format!("k={}, std_ratio={}", outliers.k, outliers.std_ratio),
                "k must be > 0 and std_ratio > 0",
            ));
        }

        let p = &self.poisson;
        for (field, value) in [
            ("poisson.scale", p.scale),
            ("poisson.spacing_factor", p.spacing_factor),
            ("poisson.solver_tolerance", p.solver_tolerance),
            ("poisson.density_radius_factor", p.density_radius_factor),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(MeshError::invalid_config(field, value, "must be positive"));
            }
        }
        if p.scale < 1.0 {
            return Err(MeshError::invalid_config("poisson.scale", p.scale, "must be >= 1"));
        }
        if p.max_solver_iterations == 0 {
            return Err(MeshError::invalid_config(
                "poisson.max_solver_iterations",
                p.max_solver_iterations,
                "must be > 0",
            ));
        }

        let r = &self.repair;
        if r.max_hole_edges < 3 {
            return Err(MeshError::invalid_config(
                "repair.max_hole_edges",
                r.max_hole_edges,
                "must be >= 3",
            ));
        }
        if r.max_voxel_resolution < 2 {
            return Err(MeshError::invalid_config(
                "repair.max_voxel_resolution",
                r.max_voxel_resolution,
                "must be >= 2",
            ));
        }
        if !(r.weld_tolerance >= 0.0 && r.weld_tolerance.is_finite()) {
            return Err(MeshError::invalid_config(
                "repair.weld_tolerance",
                r.weld_tolerance,
                "must be >= 0",
            ));
        }

        self.smoothing.validate()
    }
}

#[cfg(feature = "config")]
impl ReconstructionConfig {
    /// Parse from TOML; missing fields take their defaults.
    pub fn from_toml(toml_str: &str) -> MeshResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| MeshError::parse_error("<toml>", e.to_string()))
    }

    /// Load from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> MeshResult<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| MeshError::io_read(path, e))?;
        toml::from_str(&contents).map_err(|e| MeshError::parse_error(path, e.to_string()))
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> MeshResult<String> {
        toml::to_string_pretty(self).map_err(|e| MeshError::export("toml", e.to_string()))
    }

    /// Parse from JSON.
    pub fn from_json(json_str: &str) -> MeshResult<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| MeshError::parse_error("<json>", e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> MeshResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MeshError::export("json", e.to_string()))
    }
}

/// Final statistics for a converted mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshStats {
    pub vertices: usize,
    pub faces: usize,
    pub watertight: bool,
    pub volume: f64,
    pub surface_area: f64,
}

impl MeshStats {
    pub fn from_report(report: &ValidationReport) -> Self {
        Self {
            vertices: report.vertex_count,
            faces: report.face_count,
            watertight: report.is_watertight,
            volume: report.volume,
            surface_area: report.surface_area,
        }
    }
}

impl std::fmt::Display for MeshStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Final mesh statistics:")?;
        writeln!(f, "  - Vertices: {}", self.vertices)?;
        writeln!(f, "  - Faces: {}", self.faces)?;
        writeln!(f, "  - Watertight: {}", self.watertight)?;
        writeln!(f, "  - Volume: {:.4}", self.volume)?;
        write!(f, "  - Surface area: {:.4}", self.surface_area)
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The final mesh; check `watertight` before trusting it.
    pub mesh: Mesh,

    /// Certified result of the last validation.
    pub report: ValidationReport,

    /// Path taken by the last repair, `None` when repair is disabled.
    pub repair: Option<RepairOutcome>,

    /// Whether the relaxed retry ran.
    pub retried: bool,

    /// Grid resolution reconstruction used.
    pub resolution: usize,

    pub stats: MeshStats,

    /// Human-readable record of each stage.
    pub operation_log: Vec<String>,
}

impl PipelineOutput {
    /// Shorthand for `report.is_watertight`.
    pub fn watertight(&self) -> bool {
        self.report.is_watertight
    }
}

const STAGES: [&str; 7] = [
    "load",
    "reconstruct",
    "trim",
    "repair",
    "smooth",
    "validate",
    "export",
];

/// A configured conversion.
///
/// The acceleration context and cancellation token are borrowed for the
/// duration of the run only; nothing is shared between runs.
pub struct Pipeline<'a> {
    config: ReconstructionConfig,
    accel: Option<&'a AccelContext>,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self {
            config,
            accel: None,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Run the grid stages on `accel` instead of rayon's global pool.
    pub fn with_accel(mut self, accel: &'a AccelContext) -> Self {
        self.accel = Some(accel);
        self
    }

    /// Cancel between stages and inside the long loops.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receive an event on entry to every stage.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Convert an in-memory point cloud.
    ///
    /// # Errors
    ///
    /// Any stage error, [`MeshError::Cancelled`] on cancellation, and
    /// [`MeshError::UnrepairableMesh`] for a non-watertight result under
    /// [`InvalidMeshPolicy::Reject`].
    pub fn run(&self, cloud: PointCloud) -> MeshResult<PipelineOutput> {
        let reporter = StageReporter::new(self.progress.as_ref(), &self.cancel, 6);
        self.run_stages(cloud, &reporter)
    }

    /// Load `input`, convert it and write `<output_dir>/<stem>_watertight.<ext>`.
    pub fn convert_file(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> MeshResult<(PathBuf, PipelineOutput)> {
        let reporter = StageReporter::new(self.progress.as_ref(), &self.cancel, 7);
        let cloud = PointCloud::load(input)?;
        let output = self.run_stages(cloud, &reporter)?;

        reporter.enter(6, STAGES[6])?;
        log_stage(STAGES[6], 6, STAGES.len());
        std::fs::create_dir_all(output_dir).map_err(|e| MeshError::io_write(output_dir, e))?;
        let path = output_path_for(input, output_dir, self.config.output_format);
        save_with(
            &output.mesh,
            &path,
            self.config.output_format,
            self.config.ply_encoding,
        )?;

        info!(path = %path.display(), "Conversion complete");
        Ok((path, output))
    }

    fn run_stages(
        &self,
        cloud: PointCloud,
        reporter: &StageReporter<'_>,
    ) -> MeshResult<PipelineOutput> {
        let config = &self.config;
        config.validate()?;

        let ctx = StageContext {
            budget: config.budget,
            accel: self.accel,
            cancel: self.cancel.clone(),
        };
        let mut operation_log = Vec::new();
        let total = STAGES.len();

        reporter.enter(0, STAGES[0])?;
        log_stage(STAGES[0], 0, total);
        let cloud = self.prepare_cloud(cloud, &mut operation_log)?;

        reporter.enter(1, STAGES[1])?;
        log_stage(STAGES[1], 1, total);
        let recon = reconstruct_with(&cloud, config.depth, &config.poisson, &ctx)?;
        drop(cloud);
        operation_log.push(format!(
            "Reconstructed {} faces at resolution {} (depth {})",
            recon.mesh.face_count(),
            recon.resolution,
            config.depth
        ));
        log_mesh_stats(&recon.mesh, "reconstruct");

        reporter.enter(2, STAGES[2])?;
        log_stage(STAGES[2], 2, total);
        let trimmed = trim(&recon.mesh, &recon.density, config.trim_quantile)?;
        operation_log.push(format!(
            "Trimmed {} low-density faces",
            recon.mesh.face_count() - trimmed.face_count()
        ));
        log_mesh_stats(&trimmed, "trim");

        reporter.enter(3, STAGES[3])?;
        log_stage(STAGES[3], 3, total);
        // Voxels finer than the reconstruction grid only add stair steps.
        let policy = config.repair.capped_to_grid(recon.resolution);
        let (mut mesh, mut report, mut outcome) =
            self.repair_smooth_validate(&trimmed, &policy, reporter, &ctx, &mut operation_log)?;

        let mut retried = false;
        if config.repair_enabled && !report.is_watertight {
            warn!(
                max_hole_edges = policy.relaxed().max_hole_edges,
                "Mesh failed validation, retrying repair with relaxed policy"
            );
            retried = true;
            (mesh, report, outcome) = self.repair_smooth_validate(
                &trimmed,
                &policy.relaxed(),
                reporter,
                &ctx,
                &mut operation_log,
            )?;
        }

        if !report.is_watertight {
            match config.invalid_mesh_policy {
                InvalidMeshPolicy::Reject => {
                    return Err(MeshError::unrepairable(format!(
                        "final mesh is not watertight ({} boundary edges, {} non-manifold edges, {} components)",
                        report.boundary_edge_count,
                        report.non_manifold_edge_count,
                        report.component_count
                    )));
                }
                InvalidMeshPolicy::Tag => {
                    warn!("Returning best-effort mesh tagged as not watertight");
                    operation_log.push("Result tagged as NOT watertight".to_string());
                }
            }
        }

        let stats = MeshStats::from_report(&report);
        info!(
            vertices = stats.vertices,
            faces = stats.faces,
            watertight = stats.watertight,
            retried,
            "Pipeline finished"
        );

        Ok(PipelineOutput {
            mesh,
            report,
            repair: outcome,
            retried,
            resolution: recon.resolution,
            stats,
            operation_log,
        })
    }

    fn prepare_cloud(
        &self,
        mut cloud: PointCloud,
        operation_log: &mut Vec<String>,
    ) -> MeshResult<PointCloud> {
        cloud.validate()?;

        if let Some(outliers) = &self.config.outlier_removal {
            let before = cloud.len();
            cloud = cloud.remove_outliers(outliers.k, outliers.std_ratio);
            operation_log.push(format!("Removed {} outliers", before - cloud.len()));
        }

        if !cloud.has_normals() {
            cloud = cloud.with_estimated_normals(&self.config.normals)?;
            operation_log.push(format!(
                "Estimated normals (k = {})",
                self.config.normals.k
            ));
        }
        Ok(cloud)
    }

    /// Stages 4 to 6 for one repair policy.
    fn repair_smooth_validate(
        &self,
        trimmed: &Mesh,
        policy: &RepairPolicy,
        reporter: &StageReporter<'_>,
        ctx: &StageContext<'_>,
        operation_log: &mut Vec<String>,
    ) -> MeshResult<(Mesh, ValidationReport, Option<RepairOutcome>)> {
        let config = &self.config;

        let (repaired, outcome) = if config.repair_enabled {
            let result = repair_with(trimmed, config.depth, policy, ctx)?;
            operation_log.push(format!("Repair: {}", result.outcome));
            (result.mesh, Some(result.outcome))
        } else {
            operation_log.push("Repair skipped".to_string());
            (trimmed.clone(), None)
        };

        reporter.enter(4, STAGES[4])?;
        log_stage(STAGES[4], 4, STAGES.len());
        let iterations = config
            .smoothing
            .iterations_for(outcome.as_ref(), config.smoothing_iterations);
        let smoothed = smooth_with(&repaired, iterations, &config.smoothing, ctx)?;
        operation_log.push(format!("Smoothed ({} iterations)", smoothed.iterations));

        reporter.enter(5, STAGES[5])?;
        log_stage(STAGES[5], 5, STAGES.len());
        let report = validate(&smoothed.mesh);
        log_validation_result(&report);

        Ok((smoothed.mesh, report, outcome))
    }
}

/// Convert with the given configuration on rayon's global pool.
pub fn convert(cloud: PointCloud, config: &ReconstructionConfig) -> MeshResult<PipelineOutput> {
    Pipeline::new(config.clone()).run(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcloud::CloudPoint;
    use nalgebra::{Point3, Vector3};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fibonacci sphere with analytic normals.
    fn sphere_cloud(n: usize) -> PointCloud {
        let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let points = (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - y * y).sqrt();
                let theta = golden * i as f64;
                let n = Vector3::new(r * theta.cos(), y, r * theta.sin());
                CloudPoint::with_normal(Point3::from(n), n)
            })
            .collect();
        PointCloud { points }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ReconstructionConfig::default().validate().is_ok());
        assert!(ReconstructionConfig::draft().validate().is_ok());
        assert!(ReconstructionConfig::high_detail().validate().is_ok());
        assert_eq!(ReconstructionConfig::draft().depth, 6);
        assert_eq!(ReconstructionConfig::high_detail().depth, 10);
    }

    #[test]
    fn test_out_of_range_config_rejected() {
        let cases = [
            ReconstructionConfig {
                depth: 0,
                ..Default::default()
            },
            ReconstructionConfig {
                depth: 15,
                ..Default::default()
            },
            ReconstructionConfig {
                trim_quantile: 0.6,
                ..Default::default()
            },
            ReconstructionConfig {
                trim_quantile: -0.1,
                ..Default::default()
            },
            ReconstructionConfig {
                outlier_removal: Some(OutlierParams {
                    k: 0,
                    std_ratio: 1.0,
                }),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(MeshError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn test_sphere_draft_is_watertight() {
        let output = Pipeline::new(ReconstructionConfig::draft())
            .run(sphere_cloud(2000))
            .unwrap();
        assert!(output.watertight(), "{}", output.report);
        assert!(output.repair.as_ref().is_some_and(|o| o.is_success()));
        assert!(output.stats.volume > 3.0 && output.stats.volume < 5.0);
        assert!(!output.operation_log.is_empty());
    }

    #[test]
    fn test_insufficient_points_fail() {
        let cloud = PointCloud {
            points: vec![CloudPoint::from_coords(0.0, 0.0, 0.0)],
        };
        assert!(matches!(
            convert(cloud, &ReconstructionConfig::draft()),
            Err(MeshError::InsufficientData { .. })
        ));
        assert!(matches!(
            convert(PointCloud::new(), &ReconstructionConfig::draft()),
            Err(MeshError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_progress_sees_every_stage() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let pipeline = Pipeline::new(ReconstructionConfig::draft()).with_progress(Box::new(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            },
        ));
        pipeline.run(sphere_cloud(800)).unwrap();
        assert!(seen.load(Ordering::SeqCst) >= 6);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let result = Pipeline::new(ReconstructionConfig::draft())
            .with_cancel(token)
            .run(sphere_cloud(500));
        assert!(matches!(result, Err(MeshError::Cancelled { .. })));
    }

    #[test]
    fn test_callback_cancels_mid_run() {
        let pipeline = Pipeline::new(ReconstructionConfig::draft())
            .with_progress(Box::new(|p| p.current < 3));
        let result = pipeline.run(sphere_cloud(800));
        assert!(matches!(
            result,
            Err(MeshError::Cancelled { stage: "repair", .. })
        ));
    }

    #[test]
    fn test_resource_limit_fails_fast() {
        let config = ReconstructionConfig {
            budget: ResourceBudget {
                max_memory_bytes: 1024,
            },
            ..ReconstructionConfig::draft()
        };
        assert!(matches!(
            convert(sphere_cloud(500), &config),
            Err(MeshError::ResourceLimit { .. })
        ));
    }

    #[test]
    fn test_repair_disabled_keeps_trim_boundary() {
        let config = ReconstructionConfig {
            repair_enabled: false,
            trim_quantile: 0.3,
            ..ReconstructionConfig::draft()
        };
        let output = convert(sphere_cloud(1500), &config).unwrap();
        assert!(output.repair.is_none());
        assert!(!output.retried);
        assert!(!output.watertight());
        assert!(output.report.boundary_edge_count > 0);
    }

    #[test]
    fn test_reject_policy_errors_on_open_result() {
        let config = ReconstructionConfig {
            repair_enabled: false,
            trim_quantile: 0.3,
            invalid_mesh_policy: InvalidMeshPolicy::Reject,
            ..ReconstructionConfig::draft()
        };
        assert!(matches!(
            convert(sphere_cloud(1500), &config),
            Err(MeshError::UnrepairableMesh { .. })
        ));
    }

    #[test]
    fn test_stats_display() {
        let stats = MeshStats {
            vertices: 10,
            faces: 16,
            watertight: true,
            volume: 1.5,
            surface_area: 7.25,
        };
        let text = stats.to_string();
        assert!(text.contains("Watertight: true"));
        assert!(text.contains("Surface area: 7.2500"));
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_toml_partial_config() {
        let config = ReconstructionConfig::from_toml(
            "depth = 7\noutput_format = \"stl\"\n[repair]\nmax_hole_edges = 50\n",
        )
        .unwrap();
        assert_eq!(config.depth, 7);
        assert_eq!(config.output_format, MeshFormat::Stl);
        assert_eq!(config.repair.max_hole_edges, 50);
        assert_eq!(config.trim_quantile, 0.01);

        let round = ReconstructionConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(round, config);
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_json_round_trip() {
        let config = ReconstructionConfig::high_detail();
        let json = config.to_json().unwrap();
        assert_eq!(ReconstructionConfig::from_json(&json).unwrap(), config);
    }
}
