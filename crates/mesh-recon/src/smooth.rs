//! Taubin smoothing.
//!
//! Each iteration is a Laplacian step with positive `lambda` followed by a
//! step with negative `mu`, where `1/lambda + 1/mu = pass_band`. The second
//! step undoes the shrinkage of the first, so volume is kept within a small
//! tolerance while high-frequency noise (voxel staircases, reconstruction
//! ripple) is removed.
//!
//! Boundary vertices are pinned. On a repaired mesh there are none.
//!
//! Taubin, G. (1995). "A signal processing approach to fair surface design".

use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

use crate::adjacency::{MeshAdjacency, vertex_neighbors};
use crate::error::{MeshError, MeshResult};
use crate::progress::StageContext;
use crate::repair::{RepairOutcome, compute_vertex_normals};
use crate::tracing_ext::OperationTimer;
use crate::types::Mesh;

/// Parameters for [`smooth_with`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct SmoothingParams {
    /// Positive step factor, in `(0, 1)`.
    ///
    /// Default: `0.5`
    pub lambda: f64,

    /// Pass-band frequency `k_pb`; sets `mu = 1 / (k_pb - 1/lambda)`.
    ///
    /// Default: `0.1`
    pub pass_band: f64,

    /// Fraction of the configured iterations applied after hole filling.
    ///
    /// Default: `0.1`
    pub filled_scale: f64,

    /// Fraction of the configured iterations applied after voxelization.
    ///
    /// Default: `1.0`
    pub voxelized_scale: f64,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            lambda: 0.5,
            pass_band: 0.1,
            filled_scale: 0.1,
            voxelized_scale: 1.0,
        }
    }
}

impl SmoothingParams {
    /// The negative inflation factor paired with `lambda`.
    pub fn mu(&self) -> f64 {
        1.0 / (self.pass_band - 1.0 / self.lambda)
    }

    /// Check the factors give a shrink-free filter.
    pub fn validate(&self) -> MeshResult<()> {
        if !(self.lambda > 0.0 && self.lambda < 1.0) {
            return Err(MeshError::invalid_config(
                "smoothing.lambda",
                self.lambda,
                "must be in (0, 1)",
            ));
        }
        if !(self.pass_band > 0.0 && self.pass_band < 1.0 / self.lambda) {
            return Err(MeshError::invalid_config(
                "smoothing.pass_band",
                self.pass_band,
                "must be in (0, 1/lambda)",
            ));
        }
        for (field, value) in [
            ("smoothing.filled_scale", self.filled_scale),
            ("smoothing.voxelized_scale", self.voxelized_scale),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(MeshError::invalid_config(field, value, "must be >= 0"));
            }
        }
        Ok(())
    }

    /// Iterations to run after a repair that took `outcome`.
    ///
    /// Voxelized meshes carry block artifacts and get the full scaled
    /// count; patched meshes only need a light pass. A scaled count that
    /// rounds to zero stays zero.
    pub fn iterations_for(&self, outcome: Option<&RepairOutcome>, iterations: usize) -> usize {
        let scale = match outcome {
            Some(RepairOutcome::Voxelized { .. }) => self.voxelized_scale,
            Some(_) => self.filled_scale,
            None => 1.0,
        };
        (iterations as f64 * scale).round() as usize
    }
}

/// Output of [`smooth_with`].
#[derive(Debug, Clone)]
pub struct SmoothResult {
    pub mesh: Mesh,
    pub iterations: usize,
    /// Largest single-vertex move over all passes.
    pub max_displacement: f64,
}

/// Smooth with `lambda` and the default pass band.
pub fn smooth(mesh: &Mesh, iterations: usize, lambda: f64) -> MeshResult<Mesh> {
    let params = SmoothingParams {
        lambda,
        ..Default::default()
    };
    Ok(smooth_with(mesh, iterations, &params, &StageContext::default())?.mesh)
}

/// Run `iterations` Taubin iterations.
///
/// Cancellation is checked before every iteration; a cancelled run returns
/// the error and no partial mesh.
pub fn smooth_with(
    mesh: &Mesh,
    iterations: usize,
    params: &SmoothingParams,
    ctx: &StageContext<'_>,
) -> MeshResult<SmoothResult> {
    params.validate()?;
    if iterations == 0 || mesh.faces.is_empty() {
        return Ok(SmoothResult {
            mesh: mesh.clone(),
            iterations: 0,
            max_displacement: 0.0,
        });
    }

    let _timer = OperationTimer::with_mesh("smooth", mesh);
    let neighbors = vertex_neighbors(mesh.vertices.len(), &mesh.faces);
    let pinned = {
        let mut pinned = vec![false; mesh.vertices.len()];
        for v in MeshAdjacency::build(&mesh.faces).boundary_vertices() {
            pinned[v as usize] = true;
        }
        pinned
    };

    let mu = params.mu();
    let mut positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();
    let mut max_displacement = 0.0_f64;

    for _ in 0..iterations {
        ctx.check("smooth")?;
        for factor in [params.lambda, mu] {
            let (next, moved) = laplacian_step(&positions, &neighbors, &pinned, factor);
            positions = next;
            max_displacement = max_displacement.max(moved);
        }
    }

    let mut result = mesh.clone();
    for (vertex, position) in result.vertices.iter_mut().zip(positions) {
        vertex.position = position;
    }
    compute_vertex_normals(&mut result);

    debug!(
        iterations,
        lambda = params.lambda,
        mu,
        max_displacement,
        "Smoothed mesh"
    );
    Ok(SmoothResult {
        mesh: result,
        iterations,
        max_displacement,
    })
}

/// `p + factor * (mean(neighbors) - p)` for every free vertex.
fn laplacian_step(
    positions: &[Point3<f64>],
    neighbors: &[Vec<u32>],
    pinned: &[bool],
    factor: f64,
) -> (Vec<Point3<f64>>, f64) {
    let moved: Vec<(Point3<f64>, f64)> = positions
        .par_iter()
        .zip(neighbors.par_iter())
        .zip(pinned.par_iter())
        .map(|((&p, ring), &fixed)| {
            if fixed || ring.is_empty() {
                return (p, 0.0);
            }
            let centroid = ring
                .iter()
                .fold(nalgebra::Vector3::zeros(), |acc, &n| {
                    acc + positions[n as usize].coords
                })
                / ring.len() as f64;
            let delta = (centroid - p.coords) * factor;
            (p + delta, delta.norm())
        })
        .collect();

    let max = moved.iter().map(|&(_, d)| d).fold(0.0, f64::max);
    (moved.into_iter().map(|(p, _)| p).collect(), max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CancellationToken;
    use crate::repair::VoxelReason;
    use crate::types::Vertex;
    use approx::assert_relative_eq;

    /// Closed UV sphere, outward wound.
    fn uv_sphere(rings: usize, segments: usize, radius: f64) -> Mesh {
        use std::f64::consts::PI;
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, radius));
        for r in 1..rings {
            let theta = PI * r as f64 / rings as f64;
            for s in 0..segments {
                let phi = 2.0 * PI * s as f64 / segments as f64;
                mesh.vertices.push(Vertex::from_coords(
                    radius * theta.sin() * phi.cos(),
                    radius * theta.sin() * phi.sin(),
                    radius * theta.cos(),
                ));
            }
        }
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, -radius));

        let seg = segments as u32;
        let ring_start = |r: usize| 1 + ((r - 1) * segments) as u32;
        let south = mesh.vertices.len() as u32 - 1;
        for s in 0..seg {
            mesh.faces.push([0, 1 + s, 1 + (s + 1) % seg]);
        }
        for r in 1..rings - 1 {
            let (a0, b0) = (ring_start(r), ring_start(r + 1));
            for s in 0..seg {
                let (a, a1) = (a0 + s, a0 + (s + 1) % seg);
                let (b, b1) = (b0 + s, b0 + (s + 1) % seg);
                mesh.faces.push([a, b, b1]);
                mesh.faces.push([a, b1, a1]);
            }
        }
        let last = ring_start(rings - 1);
        for s in 0..seg {
            mesh.faces.push([south, last + (s + 1) % seg, last + s]);
        }
        mesh
    }

    #[test]
    fn test_mu_from_pass_band() {
        let params = SmoothingParams::default();
        assert_relative_eq!(params.mu(), 1.0 / (0.1 - 2.0), epsilon = 1e-12);
        assert!(params.mu() < -params.lambda);
    }

    #[test]
    fn test_volume_preserved() {
        let mesh = uv_sphere(16, 32, 1.0);
        assert!(mesh.signed_volume() > 0.0);
        let before = mesh.volume();

        let smoothed = smooth(&mesh, 10, 0.5).unwrap();
        let after = smoothed.volume();
        assert!(
            (after - before).abs() / before < 0.05,
            "volume {before} -> {after}"
        );
    }

    #[test]
    fn test_taubin_shrinks_less_than_laplacian() {
        let mesh = uv_sphere(12, 24, 1.0);
        let taubin = smooth(&mesh, 10, 0.5).unwrap().volume();

        let neighbors = vertex_neighbors(mesh.vertices.len(), &mesh.faces);
        let pinned = vec![false; mesh.vertices.len()];
        let mut positions: Vec<_> = mesh.vertices.iter().map(|v| v.position).collect();
        for _ in 0..20 {
            positions = laplacian_step(&positions, &neighbors, &pinned, 0.5).0;
        }
        let mut laplacian = mesh.clone();
        for (v, p) in laplacian.vertices.iter_mut().zip(positions) {
            v.position = p;
        }

        let original = mesh.volume();
        assert!((original - taubin).abs() < (original - laplacian.volume()).abs());
    }

    #[test]
    fn test_noise_reduced() {
        let mut mesh = uv_sphere(12, 24, 1.0);
        for (i, v) in mesh.vertices.iter_mut().enumerate() {
            let bump = if i % 2 == 0 { 1.05 } else { 0.95 };
            v.position.coords *= bump;
        }
        let spread = |m: &Mesh| {
            let radii: Vec<f64> = m.vertices.iter().map(|v| v.position.coords.norm()).collect();
            let mean = radii.iter().sum::<f64>() / radii.len() as f64;
            radii.iter().map(|r| (r - mean).abs()).fold(0.0, f64::max)
        };
        let smoothed = smooth(&mesh, 5, 0.5).unwrap();
        assert!(spread(&smoothed) < spread(&mesh));
        assert!(smoothed.has_normals());
    }

    #[test]
    fn test_boundary_vertices_pinned() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);

        let smoothed = smooth(&mesh, 3, 0.5).unwrap();
        for (a, b) in mesh.vertices.iter().zip(&smoothed.vertices) {
            assert_eq!(a.position, b.position);
        }
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mesh = uv_sphere(6, 8, 1.0);
        let result = smooth_with(&mesh, 0, &SmoothingParams::default(), &StageContext::new())
            .unwrap();
        assert_eq!(result.mesh, mesh);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_cancelled_inside_loop() {
        let mesh = uv_sphere(6, 8, 1.0);
        let token = CancellationToken::new();
        token.cancel();
        let ctx = StageContext::new().with_cancel(token);
        let result = smooth_with(&mesh, 5, &SmoothingParams::default(), &ctx);
        assert!(matches!(result, Err(MeshError::Cancelled { .. })));
    }

    #[test]
    fn test_iterations_scale_with_repair_path() {
        let params = SmoothingParams::default();
        let filled = RepairOutcome::Filled { holes_filled: 1 };
        let voxelized = RepairOutcome::Voxelized {
            reason: VoxelReason::NotClosed { boundary_edges: 4 },
            resolution: 64,
        };
        assert_eq!(params.iterations_for(Some(&filled), 10), 1);
        assert_eq!(params.iterations_for(Some(&voxelized), 10), 10);
        assert_eq!(params.iterations_for(None, 10), 10);
        assert_eq!(params.iterations_for(Some(&filled), 4), 0);
    }

    #[test]
    fn test_invalid_lambda_rejected() {
        let params = SmoothingParams {
            lambda: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(MeshError::InvalidConfig { .. })
        ));
    }
}
