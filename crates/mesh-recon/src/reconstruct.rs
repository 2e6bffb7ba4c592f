//! Implicit-surface (Poisson-style) reconstruction from oriented points.
//!
//! The oriented samples are splatted into a vector field on a regular grid,
//! the Poisson equation `Δχ = ∇·V` is solved for an indicator function `χ`
//! with a matrix-free conjugate gradient, and the level set of `χ` passing
//! through the samples is extracted with Surface Nets. Every output vertex
//! gets a density value: the Gaussian-weighted number of input samples near
//! it, low where the surface was extrapolated rather than observed.
//!
//! # Depth and resolution
//!
//! `depth` plays the role of an octree depth: the grid has at most `2^depth`
//! cells across the (scaled) bounding cube. Refinement stops where the
//! samples can no longer support finer cells, so the effective resolution is
//!
//! ```text
//! min(2^depth, ceil(extent * scale / (spacing_factor * mean_point_spacing)))
//! ```
//!
//! which is non-decreasing in `depth`.

use fast_surface_nets::{SurfaceNetsBuffer, ndshape::RuntimeShape, surface_nets};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::accel::run_in;
use crate::error::{MeshError, MeshResult};
use crate::pointcloud::{MIN_POINTS, PointCloud, build_kdtree, estimate_point_spacing, fit_plane, to_array};
use crate::progress::{OperationEstimate, OperationType, StageContext, estimate_grid_operation};
use crate::tracing_ext::OperationTimer;
use crate::types::{Mesh, Vertex};

/// Deepest supported depth.
pub const MAX_DEPTH: u32 = 14;

/// Smallest/largest eigenvalue ratio below which a cloud counts as flat.
const FLATNESS_RATIO: f64 = 1e-8;

/// Tuning for the reconstruction stage.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct PoissonParams {
    /// Ratio between the reconstruction cube and the cloud's bounding box.
    pub scale: f64,

    /// Finest cell size, in multiples of the mean point spacing.
    pub spacing_factor: f64,

    /// Grid nodes added outside the cube on every side.
    pub padding: usize,

    /// Relative residual at which the solver stops.
    pub solver_tolerance: f64,

    /// Iteration cap for the solver.
    pub max_solver_iterations: usize,

    /// Density kernel width, in multiples of the mean point spacing.
    pub density_radius_factor: f64,
}

impl Default for PoissonParams {
    fn default() -> Self {
        Self {
            scale: 1.1,
            spacing_factor: 1.25,
            padding: 2,
            solver_tolerance: 1e-6,
            max_solver_iterations: 500,
            density_radius_factor: 2.0,
        }
    }
}

/// Output of [`reconstruct`].
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Closed candidate surface, outward oriented.
    pub mesh: Mesh,

    /// Per-vertex confidence, same length as `mesh.vertices`.
    pub density: Vec<f64>,

    /// Grid cells across the reconstruction cube.
    pub resolution: usize,

    /// Grid cell edge length.
    pub cell_size: f64,

    /// Solver iterations performed.
    pub solver_iterations: usize,

    /// Final relative residual.
    pub solver_residual: f64,
}

/// Regular grid covering the cloud.
#[derive(Debug, Clone, Copy)]
struct GridLayout {
    origin: Point3<f64>,
    cell: f64,
    /// Nodes per axis (the grid is a cube).
    nodes: usize,
    resolution: usize,
}

impl GridLayout {
    fn plan(cloud: &PointCloud, depth: u32, params: &PoissonParams) -> MeshResult<Self> {
        let (min, max) = cloud
            .bounds()
            .ok_or_else(|| MeshError::reconstruction("point cloud is empty"))?;
        let extent = (max - min).max();
        if extent.is_nan() || extent <= 0.0 {
            return Err(MeshError::reconstruction("all points coincide"));
        }

        let side = extent * params.scale;
        let spacing = estimate_point_spacing(cloud);
        let supported = (side / (params.spacing_factor * spacing)).ceil().max(1.0) as usize;
        let resolution = (1usize << depth.min(MAX_DEPTH)).min(supported).max(2);

        let cell = side / resolution as f64;
        let center = Point3::from((min.coords + max.coords) * 0.5);
        let half = Vector3::repeat(side * 0.5 + params.padding as f64 * cell);

        Ok(Self {
            origin: center - half,
            cell,
            nodes: resolution + 1 + 2 * params.padding,
            resolution,
        })
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.nodes * (y + self.nodes * z)
    }

    #[inline]
    fn total(&self) -> usize {
        self.nodes * self.nodes * self.nodes
    }

    /// Lower corner node and fractional offsets of the cell containing `p`.
    #[inline]
    fn locate(&self, p: &Point3<f64>) -> ([usize; 3], [f64; 3]) {
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let g = (p[axis] - self.origin[axis]) / self.cell;
            let i = (g.floor().max(0.0) as usize).min(self.nodes - 2);
            base[axis] = i;
            frac[axis] = (g - i as f64).clamp(0.0, 1.0);
        }
        (base, frac)
    }

    /// The eight trilinear (index, weight) pairs around `p`.
    fn trilinear(&self, p: &Point3<f64>) -> [(usize, f64); 8] {
        let ([x, y, z], [tx, ty, tz]) = self.locate(p);
        let mut out = [(0usize, 0.0f64); 8];
        for (corner, slot) in out.iter_mut().enumerate() {
            let (dx, dy, dz) = (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let w = (if dx == 1 { tx } else { 1.0 - tx })
                * (if dy == 1 { ty } else { 1.0 - ty })
                * (if dz == 1 { tz } else { 1.0 - tz });
            *slot = (self.index(x + dx, y + dy, z + dz), w);
        }
        out
    }

    fn sample(&self, field: &[f64], p: &Point3<f64>) -> f64 {
        self.trilinear(p).iter().map(|&(i, w)| field[i] * w).sum()
    }
}

/// Estimate the grid and memory a reconstruction at `depth` would need.
pub fn estimate_reconstruction(
    cloud: &PointCloud,
    depth: u32,
    params: &PoissonParams,
) -> MeshResult<OperationEstimate> {
    let layout = GridLayout::plan(cloud, depth, params)?;
    Ok(estimate_grid_operation(
        OperationType::SurfaceReconstruction,
        [layout.nodes; 3],
        cloud.len(),
    ))
}

/// Reconstruct with default parameters, no budget limit beyond the default,
/// and rayon's global pool.
pub fn reconstruct(cloud: &PointCloud, depth: u32) -> MeshResult<Reconstruction> {
    reconstruct_with(cloud, depth, &PoissonParams::default(), &StageContext::default())
}

/// Reconstruct a closed surface from an oriented point cloud.
///
/// # Errors
///
/// - [`MeshError::InsufficientData`] below the minimum point count.
/// - [`MeshError::InvalidConfig`] for a depth outside `1..=14`.
/// - [`MeshError::Reconstruction`] for unoriented, coplanar, collinear or
///   coincident points, or when no surface can be extracted.
/// - [`MeshError::ResourceLimit`] when the grid would exceed the budget.
/// - [`MeshError::Cancelled`] when the context is cancelled mid-solve.
pub fn reconstruct_with(
    cloud: &PointCloud,
    depth: u32,
    params: &PoissonParams,
    ctx: &StageContext<'_>,
) -> MeshResult<Reconstruction> {
    if cloud.len() < MIN_POINTS {
        return Err(MeshError::insufficient_data(cloud.len(), MIN_POINTS));
    }
    if !(1..=MAX_DEPTH).contains(&depth) {
        return Err(MeshError::invalid_config("depth", depth, "must be in 1..=14"));
    }
    if !cloud.has_normals() {
        return Err(MeshError::reconstruction(
            "reconstruction requires oriented normals on every point",
        ));
    }
    check_not_flat(cloud)?;

    let layout = GridLayout::plan(cloud, depth, params)?;
    let estimate = estimate_grid_operation(
        OperationType::SurfaceReconstruction,
        [layout.nodes; 3],
        cloud.len(),
    );
    ctx.budget.check(&estimate)?;

    let _timer = OperationTimer::new("reconstruct");
    info!(
        points = cloud.len(),
        depth,
        resolution = layout.resolution,
        nodes = layout.nodes,
        cell = layout.cell,
        "Starting surface reconstruction"
    );

    run_in(ctx.accel, || reconstruct_on_grid(cloud, &layout, params, ctx))
}

fn check_not_flat(cloud: &PointCloud) -> MeshResult<()> {
    let positions: Vec<Point3<f64>> = cloud.points.iter().map(|p| p.position).collect();
    match fit_plane(&positions) {
        Some((_, ratio)) if ratio > FLATNESS_RATIO => Ok(()),
        _ => Err(MeshError::reconstruction(
            "points are coplanar or collinear; no volume to enclose",
        )),
    }
}

fn reconstruct_on_grid(
    cloud: &PointCloud,
    layout: &GridLayout,
    params: &PoissonParams,
    ctx: &StageContext<'_>,
) -> MeshResult<Reconstruction> {
    let field = splat_normals(cloud, layout);
    let mut rhs = divergence(&field, layout);
    for v in &mut rhs {
        *v *= -layout.cell * layout.cell;
    }

    ctx.check("reconstruct")?;
    let solve = solve_poisson(&rhs, layout, params, ctx)?;
    let chi = solve.solution;

    // Indicator value at the samples picks the level set.
    let iso = cloud
        .points
        .par_iter()
        .map(|p| layout.sample(&chi, &p.position))
        .sum::<f64>()
        / cloud.len() as f64;
    if !iso.is_finite() || iso == 0.0 {
        return Err(MeshError::reconstruction(
            "indicator function is flat at the samples; normals may be inconsistent",
        ));
    }
    // With outward normals the indicator dips below zero inside.
    let sign = if iso < 0.0 { 1.0 } else { -1.0 };
    if sign < 0.0 {
        warn!(iso, "Indicator is positive at the samples; normals look inward");
    }
    debug!(iso, "Indicator level set");

    let mut mesh = extract_level_set(&chi, iso, sign, layout)?;
    if mesh.is_inside_out() {
        mesh.flip_all_faces();
    }

    ctx.check("reconstruct")?;
    let density = compute_density(cloud, &mesh, params);
    transfer_colors(cloud, &mut mesh);

    info!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        iterations = solve.iterations,
        residual = solve.residual,
        "Surface reconstruction complete"
    );

    Ok(Reconstruction {
        mesh,
        density,
        resolution: layout.resolution,
        cell_size: layout.cell,
        solver_iterations: solve.iterations,
        solver_residual: solve.residual,
    })
}

/// Trilinear splat of sample normals, then one separable [1 2 1] blur.
fn splat_normals(cloud: &PointCloud, layout: &GridLayout) -> [Vec<f64>; 3] {
    let total = layout.total();
    let mut field = [vec![0.0; total], vec![0.0; total], vec![0.0; total]];

    for point in &cloud.points {
        let Some(n) = point.normal else { continue };
        for (idx, w) in layout.trilinear(&point.position) {
            field[0][idx] += n.x * w;
            field[1][idx] += n.y * w;
            field[2][idx] += n.z * w;
        }
    }

    for component in &mut field {
        for axis in 0..3 {
            *component = blur_axis(component, layout.nodes, axis);
        }
    }
    field
}

fn blur_axis(values: &[f64], n: usize, axis: usize) -> Vec<f64> {
    let stride = [1, n, n * n][axis];
    let mut out = vec![0.0; values.len()];
    out.par_chunks_mut(n * n).enumerate().for_each(|(z, slice)| {
        for y in 0..n {
            for x in 0..n {
                let coord = [x, y, z][axis];
                let i = x + n * (y + n * z);
                let mut v = 0.5 * values[i];
                if coord > 0 {
                    v += 0.25 * values[i - stride];
                }
                if coord + 1 < n {
                    v += 0.25 * values[i + stride];
                }
                slice[x + n * y] = v;
            }
        }
    });
    out
}

/// Central-difference divergence; zero on the boundary layer.
fn divergence(field: &[Vec<f64>; 3], layout: &GridLayout) -> Vec<f64> {
    let n = layout.nodes;
    let inv = 1.0 / (2.0 * layout.cell);
    let mut div = vec![0.0; layout.total()];
    div.par_chunks_mut(n * n).enumerate().for_each(|(z, slice)| {
        if z == 0 || z + 1 == n {
            return;
        }
        for y in 1..n - 1 {
            for x in 1..n - 1 {
                let i = x + n * (y + n * z);
                slice[x + n * y] = (field[0][i + 1] - field[0][i - 1]
                    + field[1][i + n] - field[1][i - n]
                    + field[2][i + n * n] - field[2][i - n * n])
                    * inv;
            }
        }
    });
    div
}

struct Solve {
    solution: Vec<f64>,
    iterations: usize,
    residual: f64,
}

/// `out = A x` with `A = 6I - neighbors` on interior nodes, zero on the boundary.
fn apply_laplacian(x: &[f64], out: &mut [f64], n: usize) {
    out.par_chunks_mut(n * n).enumerate().for_each(|(z, slice)| {
        if z == 0 || z + 1 == n {
            slice.fill(0.0);
            return;
        }
        for y in 0..n {
            for xi in 0..n {
                let local = xi + n * y;
                if y == 0 || y + 1 == n || xi == 0 || xi + 1 == n {
                    slice[local] = 0.0;
                    continue;
                }
                let i = xi + n * (y + n * z);
                slice[local] = 6.0 * x[i]
                    - x[i - 1]
                    - x[i + 1]
                    - x[i - n]
                    - x[i + n]
                    - x[i - n * n]
                    - x[i + n * n];
            }
        }
    });
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
}

/// Conjugate gradient with homogeneous Dirichlet boundary.
fn solve_poisson(
    rhs: &[f64],
    layout: &GridLayout,
    params: &PoissonParams,
    ctx: &StageContext<'_>,
) -> MeshResult<Solve> {
    let n = layout.nodes;
    let mut x = vec![0.0; rhs.len()];
    let mut r = rhs.to_vec();
    let mut p = r.clone();
    let mut ap = vec![0.0; rhs.len()];

    let b_norm = dot(rhs, rhs).sqrt();
    if !b_norm.is_finite() || b_norm == 0.0 {
        return Err(MeshError::reconstruction(
            "normal field has no divergence; nothing to reconstruct",
        ));
    }

    let mut rs_old = b_norm * b_norm;
    let mut residual = 1.0;
    let mut iterations = 0;

    while iterations < params.max_solver_iterations {
        if iterations % 32 == 0 {
            ctx.check("reconstruct")?;
        }
        apply_laplacian(&p, &mut ap, n);
        let pap = dot(&p, &ap);
        if pap.is_nan() || pap <= 0.0 {
            break;
        }
        let alpha = rs_old / pap;
        x.par_iter_mut()
            .zip(p.par_iter())
            .for_each(|(xi, pi)| *xi += alpha * pi);
        r.par_iter_mut()
            .zip(ap.par_iter())
            .for_each(|(ri, api)| *ri -= alpha * api);

        iterations += 1;
        let rs_new = dot(&r, &r);
        residual = rs_new.sqrt() / b_norm;
        if residual < params.solver_tolerance {
            break;
        }

        let beta = rs_new / rs_old;
        p.par_iter_mut()
            .zip(r.par_iter())
            .for_each(|(pi, ri)| *pi = ri + beta * *pi);
        rs_old = rs_new;
    }

    if !residual.is_finite() {
        return Err(MeshError::reconstruction("solver diverged"));
    }
    if residual >= params.solver_tolerance {
        warn!(
            iterations,
            residual, "Solver stopped before reaching tolerance"
        );
    } else {
        debug!(iterations, residual, "Solver converged");
    }

    Ok(Solve {
        solution: x,
        iterations,
        residual,
    })
}

/// Surface Nets over `sign * (chi - iso)`, negative inside.
fn extract_level_set(chi: &[f64], iso: f64, sign: f64, layout: &GridLayout) -> MeshResult<Mesh> {
    let n = layout.nodes;
    let padded = n + 2;
    let mut sdf = vec![1.0f32; padded * padded * padded];

    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let v = (sign * (chi[layout.index(x, y, z)] - iso)) as f32;
                // Exact zeros would make the inside test ambiguous.
                let v = if v == 0.0 { f32::EPSILON } else { v };
                sdf[(x + 1) + padded * ((y + 1) + padded * (z + 1))] = v;
            }
        }
    }

    let shape = RuntimeShape::<u32, 3>::new([padded as u32; 3]);
    let mut buffer = SurfaceNetsBuffer::default();
    surface_nets(&sdf, &shape, [0; 3], [padded as u32 - 1; 3], &mut buffer);

    if buffer.indices.is_empty() {
        return Err(MeshError::reconstruction(
            "level set is empty; the samples do not enclose a volume at this resolution",
        ));
    }

    let mut mesh = Mesh::with_capacity(buffer.positions.len(), buffer.indices.len() / 3);
    for pos in &buffer.positions {
        mesh.vertices.push(Vertex::from_coords(
            layout.origin.x + (pos[0] as f64 - 1.0) * layout.cell,
            layout.origin.y + (pos[1] as f64 - 1.0) * layout.cell,
            layout.origin.z + (pos[2] as f64 - 1.0) * layout.cell,
        ));
    }
    for tri in buffer.indices.chunks_exact(3) {
        if tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2] {
            mesh.faces.push([tri[0], tri[1], tri[2]]);
        }
    }

    debug!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Extracted level set"
    );
    Ok(mesh)
}

/// Gaussian-weighted sample count around each vertex.
fn compute_density(cloud: &PointCloud, mesh: &Mesh, params: &PoissonParams) -> Vec<f64> {
    let kdtree = build_kdtree(cloud);
    let sigma = params.density_radius_factor * estimate_point_spacing(cloud);
    let radius_sq = (3.0 * sigma) * (3.0 * sigma);
    let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);

    mesh.vertices
        .par_iter()
        .map(|v| {
            kdtree
                .within_unsorted::<kiddo::SquaredEuclidean>(&to_array(&v.position), radius_sq)
                .iter()
                .map(|nb| (-nb.distance * inv_two_sigma_sq).exp())
                .sum()
        })
        .collect()
}

/// Nearest-sample colors for every vertex when the cloud is colored.
fn transfer_colors(cloud: &PointCloud, mesh: &mut Mesh) {
    if !cloud.has_colors() {
        return;
    }
    let kdtree = build_kdtree(cloud);
    mesh.vertices.par_iter_mut().for_each(|v| {
        let nearest = kdtree.nearest_one::<kiddo::SquaredEuclidean>(&to_array(&v.position));
        v.color = cloud.points[nearest.item as usize].color;
    });
}
