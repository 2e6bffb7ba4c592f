//! Voxelization fallback for meshes hole filling cannot close.
//!
//! The mesh is rasterized into a regular grid, closed morphologically, and
//! its interior found by flood-filling the exterior from the grid border.
//! The occupancy is then made well-composed and its boundary emitted as
//! shared-corner quads, which yields a closed 2-manifold by construction.
//! Detail below one voxel is lost.
//!
//! The closing must seal every open boundary before the flood fill, or the
//! exterior leaks inside and only a thin skin survives. [`sealing_radius`]
//! sizes it from the widest boundary loop.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::accel::run_in;
use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult};
use crate::holes::detect_holes;
use crate::progress::{OperationEstimate, OperationType, StageContext, estimate_grid_operation};
use crate::tracing_ext::OperationTimer;
use crate::types::{Mesh, Triangle, Vertex};

/// Empty layers kept around the mesh beyond the closing radius.
const BORDER_LAYERS: usize = 2;

/// Occupancy grid over a mesh's bounding box.
#[derive(Debug, Clone)]
struct VoxelGrid {
    dims: [usize; 3],
    origin: Point3<f64>,
    voxel_size: f64,
    occupied: Vec<bool>,
}

impl VoxelGrid {
    fn layout(
        bounds: (Point3<f64>, Point3<f64>),
        resolution: usize,
        padding: usize,
    ) -> MeshResult<([usize; 3], Point3<f64>, f64)> {
        let (min, max) = bounds;
        let extent = max - min;
        let longest = extent.max();
        if !longest.is_finite() || longest <= 0.0 {
            return Err(MeshError::unrepairable(
                "mesh has no spatial extent to voxelize",
            ));
        }

        let voxel_size = longest / resolution.max(2) as f64;
        let mut dims = [0usize; 3];
        for axis in 0..3 {
            dims[axis] = (extent[axis] / voxel_size).ceil().max(1.0) as usize + 2 * padding;
        }
        let origin = min - Vector3::repeat(padding as f64 * voxel_size);
        Ok((dims, origin, voxel_size))
    }

    fn new(dims: [usize; 3], origin: Point3<f64>, voxel_size: f64) -> Self {
        Self {
            dims,
            origin,
            voxel_size,
            occupied: vec![false; dims[0] * dims[1] * dims[2]],
        }
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    #[inline]
    fn coords(&self, i: usize) -> [usize; 3] {
        let x = i % self.dims[0];
        let y = (i / self.dims[0]) % self.dims[1];
        let z = i / (self.dims[0] * self.dims[1]);
        [x, y, z]
    }

    fn cell_of(&self, p: &Point3<f64>) -> usize {
        let mut c = [0usize; 3];
        for axis in 0..3 {
            let g = ((p[axis] - self.origin[axis]) / self.voxel_size).floor();
            c[axis] = (g.max(0.0) as usize).min(self.dims[axis] - 1);
        }
        self.index(c[0], c[1], c[2])
    }

    /// 6-connected neighbors of voxel `i`.
    fn neighbors(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        let [x, y, z] = self.coords(i);
        let d = self.dims;
        [
            (x > 0).then(|| i - 1),
            (x + 1 < d[0]).then(|| i + 1),
            (y > 0).then(|| i - d[0]),
            (y + 1 < d[1]).then(|| i + d[0]),
            (z > 0).then(|| i - d[0] * d[1]),
            (z + 1 < d[2]).then(|| i + d[0] * d[1]),
        ]
        .into_iter()
        .flatten()
    }

    fn occupied_count(&self) -> usize {
        self.occupied.par_iter().filter(|&&o| o).count()
    }
}

/// Estimate memory and time for voxelizing `bounds` at `resolution`.
pub fn estimate_voxelization(
    bounds: (Point3<f64>, Point3<f64>),
    resolution: usize,
) -> MeshResult<OperationEstimate> {
    let (dims, _, _) = VoxelGrid::layout(bounds, resolution, 1 + BORDER_LAYERS)?;
    Ok(estimate_grid_operation(OperationType::Voxelization, dims, 0))
}

/// Closing radius, in voxels, that seals every boundary loop of `mesh` at
/// `resolution`, and never less than `min_radius`.
///
/// A loop whose vertices lie within `R` of their centroid needs the dilated
/// rim to reach the loop's center. Dilation grows along grid axes, so a
/// tilted loop needs up to `sqrt(2) * R`.
pub fn sealing_radius(mesh: &Mesh, resolution: usize, min_radius: usize) -> usize {
    let Some((min, max)) = mesh.bounds() else {
        return min_radius;
    };
    let longest = (max - min).max();
    if !(longest > 0.0) {
        return min_radius;
    }
    let voxel_size = longest / resolution.max(2) as f64;

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let widest = detect_holes(&mesh.faces, &adjacency)
        .iter()
        .map(|hole| {
            let points: Vec<Point3<f64>> = hole
                .vertices
                .iter()
                .filter_map(|&v| mesh.vertices.get(v as usize))
                .map(|v| v.position)
                .collect();
            let centroid = points
                .iter()
                .fold(Vector3::zeros(), |acc, p| acc + p.coords)
                / points.len() as f64;
            points
                .iter()
                .map(|p| (p.coords - centroid).norm())
                .fold(0.0, f64::max)
        })
        .fold(0.0, f64::max);

    let needed = (std::f64::consts::SQRT_2 * widest / voxel_size).ceil() as usize + 1;
    let radius = if widest > 0.0 { needed } else { 0 };
    debug!(widest, voxel_size, radius, "Sealing radius");
    radius.max(min_radius)
}

/// Rebuild `mesh` as the boundary of its voxelized solid.
///
/// `resolution` is the number of voxels along the longest bounding-box
/// axis. `closing_radius` dilates the rasterized surface before the
/// exterior flood fill (bridging gaps up to about twice that many voxels)
/// and erodes the solid by the same amount afterwards. Use
/// [`sealing_radius`] for meshes with open boundaries.
///
/// # Errors
///
/// - [`MeshError::ResourceLimit`] if the grid would exceed the budget.
/// - [`MeshError::UnrepairableMesh`] if the mesh has no extent or the
///   solid ends up empty.
/// - [`MeshError::Cancelled`] if the context is cancelled.
pub fn voxelize(
    mesh: &Mesh,
    resolution: usize,
    closing_radius: usize,
    ctx: &StageContext<'_>,
) -> MeshResult<Mesh> {
    let bounds = mesh
        .bounds()
        .ok_or_else(|| MeshError::unrepairable("cannot voxelize an empty mesh"))?;
    if mesh.faces.is_empty() {
        return Err(MeshError::unrepairable("cannot voxelize a mesh without faces"));
    }

    let padding = closing_radius + BORDER_LAYERS;
    let (dims, origin, voxel_size) = VoxelGrid::layout(bounds, resolution, padding)?;
    let estimate = estimate_grid_operation(OperationType::Voxelization, dims, mesh.face_count());
    ctx.budget.check(&estimate)?;

    let _timer = OperationTimer::with_mesh("voxelize", mesh);
    info!(resolution, ?dims, voxel_size, closing_radius, "Voxelizing mesh");

    run_in(ctx.accel, || {
        let mut grid = VoxelGrid::new(dims, origin, voxel_size);
        rasterize(mesh, &mut grid);
        ctx.check("voxelize")?;

        if closing_radius > 0 {
            let reach = distance_from(&grid, &grid.occupied, closing_radius);
            grid.occupied = reach.iter().map(|&d| d as usize <= closing_radius).collect();
        }
        fill_interior(&mut grid);
        ctx.check("voxelize")?;
        if closing_radius > 0 {
            let empty: Vec<bool> = grid.occupied.iter().map(|&o| !o).collect();
            let depth = distance_from(&grid, &empty, closing_radius);
            grid.occupied = depth.iter().map(|&d| d as usize > closing_radius).collect();
        }

        let added = make_well_composed(&mut grid, ctx)?;
        let solid = grid.occupied_count();
        debug!(solid, added, "Voxel solid ready");
        if solid == 0 {
            return Err(MeshError::unrepairable(
                "voxelized solid is empty; the mesh is too thin for this resolution",
            ));
        }

        let result = extract_boundary(&grid);
        info!(
            vertices = result.vertex_count(),
            faces = result.face_count(),
            "Voxel surface extracted"
        );
        Ok(result)
    })
}

/// Mark every voxel touched by a triangle, sampling at half-voxel spacing.
fn rasterize(mesh: &Mesh, grid: &mut VoxelGrid) {
    let step = grid.voxel_size * 0.5;
    let grid_ref = &*grid;
    let cells: Vec<usize> = mesh
        .triangles()
        .collect::<Vec<Triangle>>()
        .par_iter()
        .flat_map_iter(|tri| {
            let n = (tri.max_edge_length() / step).ceil().max(1.0) as usize;
            let e1 = tri.v1 - tri.v0;
            let e2 = tri.v2 - tri.v0;
            (0..=n).flat_map(move |i| {
                (0..=n - i).map(move |j| {
                    let p = tri.v0 + e1 * (i as f64 / n as f64) + e2 * (j as f64 / n as f64);
                    grid_ref.cell_of(&p)
                })
            })
        })
        .collect();

    for c in cells {
        grid.occupied[c] = true;
    }
}

/// 6-connected step distance from every voxel to the nearest `seed` voxel.
///
/// This is the L1 distance, so `d <= r` is exactly `r` rounds of 6-neighbor
/// dilation of the seeds. The search stops past `limit`; voxels beyond it
/// get `u32::MAX`.
fn distance_from(grid: &VoxelGrid, seeds: &[bool], limit: usize) -> Vec<u32> {
    let mut dist = vec![u32::MAX; seeds.len()];
    let mut queue: VecDeque<usize> = seeds
        .iter()
        .enumerate()
        .filter_map(|(i, &s)| s.then_some(i))
        .collect();
    for &i in &queue {
        dist[i] = 0;
    }

    while let Some(i) = queue.pop_front() {
        let next = dist[i] + 1;
        if next as usize > limit {
            continue;
        }
        for n in grid.neighbors(i) {
            if dist[n] == u32::MAX {
                dist[n] = next;
                queue.push_back(n);
            }
        }
    }
    dist
}

/// Everything not reachable from the grid corner becomes solid.
fn fill_interior(grid: &mut VoxelGrid) {
    let mut outside = vec![false; grid.occupied.len()];
    let mut queue = VecDeque::from([0usize]);
    outside[0] = true;

    while let Some(i) = queue.pop_front() {
        for n in grid.neighbors(i) {
            if !outside[n] && !grid.occupied[n] {
                outside[n] = true;
                queue.push_back(n);
            }
        }
    }

    let interior = outside
        .iter()
        .zip(&grid.occupied)
        .filter(|&(&o, &s)| !o && !s)
        .count();
    debug!(interior, "Filled interior voxels");

    for (occ, out) in grid.occupied.iter_mut().zip(outside) {
        *occ = !out;
    }
}

/// Add voxels until no critical 2x2 or 2x2x2 configuration remains.
///
/// Returns the number of voxels added.
fn make_well_composed(grid: &mut VoxelGrid, ctx: &StageContext<'_>) -> MeshResult<usize> {
    let [nx, ny, nz] = grid.dims;
    let mut total_added = 0;
    let squares = [([1, 0, 0], [0, 1, 0]), ([1, 0, 0], [0, 0, 1]), ([0, 1, 0], [0, 0, 1])];
    let antipodal = [
        ([0, 0, 0], [1, 1, 1]),
        ([1, 0, 0], [0, 1, 1]),
        ([0, 1, 0], [1, 0, 1]),
        ([0, 0, 1], [1, 1, 0]),
    ];

    loop {
        ctx.check("voxelize")?;
        let mut added = 0;

        for z in 0..nz.saturating_sub(1) {
            for y in 0..ny.saturating_sub(1) {
                for x in 0..nx.saturating_sub(1) {
                    let at = move |d: [usize; 3]| (x + d[0]) + nx * ((y + d[1]) + ny * (z + d[2]));

                    for (a, b) in squares {
                        let c00 = at([0, 0, 0]);
                        let c11 = at([a[0] + b[0], a[1] + b[1], a[2] + b[2]]);
                        let c10 = at(a);
                        let c01 = at(b);
                        let occ = &grid.occupied;
                        if occ[c00] == occ[c11] && occ[c10] == occ[c01] && occ[c00] != occ[c10] {
                            let fill = if occ[c00] { c10 } else { c00 };
                            grid.occupied[fill] = true;
                            added += 1;
                        }
                    }

                    let corners: [usize; 8] = std::array::from_fn(|k| {
                        at([k & 1, (k >> 1) & 1, (k >> 2) & 1])
                    });
                    let count = corners.iter().filter(|&&c| grid.occupied[c]).count();
                    if count != 2 && count != 6 {
                        continue;
                    }
                    for (p, q) in antipodal {
                        let (cp, cq) = (at(p), at(q));
                        if count == 2 && grid.occupied[cp] && grid.occupied[cq] {
                            // Bridge along x from p towards q.
                            let bridge = at([q[0], p[1], p[2]]);
                            grid.occupied[bridge] = true;
                            added += 1;
                            break;
                        }
                        if count == 6 && !grid.occupied[cp] && !grid.occupied[cq] {
                            grid.occupied[cp] = true;
                            added += 1;
                            break;
                        }
                    }
                }
            }
        }

        total_added += added;
        if added == 0 {
            return Ok(total_added);
        }
    }
}

/// Emit the outward-facing boundary quads of the solid.
fn extract_boundary(grid: &VoxelGrid) -> Mesh {
    let [nx, ny, _] = grid.dims;
    let corner_index = |c: [usize; 3]| c[0] + (nx + 1) * (c[1] + (ny + 1) * c[2]);

    let mut corner_to_vertex: HashMap<usize, u32> = HashMap::new();
    let mut mesh = Mesh::new();
    let mut vertex_for = |c: [usize; 3], mesh: &mut Mesh| -> u32 {
        *corner_to_vertex.entry(corner_index(c)).or_insert_with(|| {
            let p = grid.origin
                + Vector3::new(c[0] as f64, c[1] as f64, c[2] as f64) * grid.voxel_size;
            mesh.vertices.push(Vertex::new(p));
            (mesh.vertices.len() - 1) as u32
        })
    };

    for i in 0..grid.occupied.len() {
        if !grid.occupied[i] {
            continue;
        }
        let v = grid.coords(i);

        for axis in 0..3 {
            let (u, w) = ((axis + 1) % 3, (axis + 2) % 3);
            for positive in [false, true] {
                let neighbor_solid = if positive {
                    v[axis] + 1 < grid.dims[axis] && {
                        let mut n = v;
                        n[axis] += 1;
                        grid.occupied[grid.index(n[0], n[1], n[2])]
                    }
                } else {
                    v[axis] > 0 && {
                        let mut n = v;
                        n[axis] -= 1;
                        grid.occupied[grid.index(n[0], n[1], n[2])]
                    }
                };
                if neighbor_solid {
                    continue;
                }

                let mut base = v;
                if positive {
                    base[axis] += 1;
                }
                let offset = |du: usize, dw: usize| {
                    let mut c = base;
                    c[u] += du;
                    c[w] += dw;
                    c
                };
                // (0,0) (1,0) (1,1) (0,1) winds around +axis.
                let mut quad = [offset(0, 0), offset(1, 0), offset(1, 1), offset(0, 1)];
                if !positive {
                    quad.reverse();
                }
                let ids = quad.map(|c| vertex_for(c, &mut mesh));
                mesh.faces.push([ids[0], ids[1], ids[2]]);
                mesh.faces.push([ids[0], ids[2], ids[3]]);
            }
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::MeshAdjacency;
    use crate::progress::ResourceBudget;
    use crate::winding::is_consistently_oriented;
    use approx::assert_relative_eq;

    fn cube(min: f64, max: f64) -> Mesh {
        let mut mesh = Mesh::new();
        for &(x, y, z) in &[
            (min, min, min),
            (max, min, min),
            (max, max, min),
            (min, max, min),
            (min, min, max),
            (max, min, max),
            (max, max, max),
            (min, max, max),
        ] {
            mesh.vertices.push(Vertex::from_coords(x, y, z));
        }
        mesh.faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 7, 6],
            [3, 6, 2],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        mesh
    }

    fn assert_closed_manifold(mesh: &Mesh) {
        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert!(adjacency.is_closed());
        assert!(adjacency.is_manifold());
        assert!(adjacency.non_manifold_vertices(&mesh.faces).is_empty());
        assert!(is_consistently_oriented(&mesh.faces));
        assert!(mesh.signed_volume() > 0.0);
    }

    /// Cylinder wall of radius 1 and height 1 with both ends open.
    fn open_tube(segments: usize) -> Mesh {
        let mut mesh = Mesh::new();
        for i in 0..segments {
            let t = i as f64 / segments as f64 * std::f64::consts::TAU;
            mesh.vertices.push(Vertex::from_coords(t.cos(), t.sin(), 0.0));
            mesh.vertices.push(Vertex::from_coords(t.cos(), t.sin(), 1.0));
        }
        let n = segments as u32;
        for i in 0..n {
            let (a, b) = (2 * i, 2 * i + 1);
            let (c, d) = (2 * ((i + 1) % n), 2 * ((i + 1) % n) + 1);
            mesh.faces.push([a, c, d]);
            mesh.faces.push([a, d, b]);
        }
        mesh
    }

    #[test]
    fn test_voxelize_cube() {
        let mesh = cube(0.0, 1.0);
        let result = voxelize(&mesh, 16, 1, &StageContext::default()).unwrap();
        assert_closed_manifold(&result);
        assert_relative_eq!(result.volume(), 1.0, max_relative = 0.35);
    }

    #[test]
    fn test_voxelize_open_box_closes_it() {
        let mut mesh = cube(0.0, 1.0);
        mesh.faces.truncate(10);
        let result = voxelize(&mesh, 20, 1, &StageContext::default()).unwrap();
        assert_closed_manifold(&result);
    }

    #[test]
    fn test_sealing_radius_spans_widest_hole() {
        // Rim radius 1 over 2 units at 32 voxels: ceil(sqrt(2) * 16) + 1.
        assert_eq!(sealing_radius(&open_tube(24), 32, 1), 24);
        assert_eq!(sealing_radius(&open_tube(24), 32, 30), 30);
        assert_eq!(sealing_radius(&cube(0.0, 1.0), 32, 1), 1);
    }

    #[test]
    fn test_open_tube_voxelizes_solid() {
        let tube = open_tube(24);
        let radius = sealing_radius(&tube, 32, 1);
        let result = voxelize(&tube, 32, radius, &StageContext::default()).unwrap();
        assert_closed_manifold(&result);
        assert_relative_eq!(result.volume(), std::f64::consts::PI, max_relative = 0.25);
    }

    #[test]
    fn test_unsealed_tube_leaves_a_skin() {
        let tube = open_tube(24);
        let result = voxelize(&tube, 32, 1, &StageContext::default()).unwrap();
        assert!(result.volume() < 1.0);
    }

    #[test]
    fn test_distance_from_counts_axis_steps() {
        let (dims, origin, voxel_size) =
            VoxelGrid::layout((Point3::origin(), Point3::new(1.0, 1.0, 1.0)), 4, 0).unwrap();
        let grid = VoxelGrid::new(dims, origin, voxel_size);
        let mut seeds = vec![false; grid.occupied.len()];
        seeds[grid.index(0, 0, 0)] = true;
        let distance = distance_from(&grid, &seeds, 2);
        assert_eq!(distance[grid.index(0, 0, 0)], 0);
        assert_eq!(distance[grid.index(1, 1, 0)], 2);
        assert_eq!(distance[grid.index(1, 1, 1)], u32::MAX);
    }

    #[test]
    fn test_overlapping_cubes_merge() {
        let mut mesh = cube(0.0, 1.0);
        let second = cube(0.5, 1.5);
        let offset = mesh.vertices.len() as u32;
        mesh.vertices.extend(second.vertices);
        mesh.faces
            .extend(second.faces.iter().map(|f| f.map(|v| v + offset)));

        let result = voxelize(&mesh, 24, 1, &StageContext::default()).unwrap();
        assert_closed_manifold(&result);
        let union = 2.0 - 0.125;
        assert_relative_eq!(result.volume(), union, max_relative = 0.35);
    }

    #[test]
    fn test_well_composed_fixes_diagonal_pair() {
        let mut grid = VoxelGrid::new([4, 4, 4], Point3::origin(), 1.0);
        let a = grid.index(1, 1, 1);
        let b = grid.index(2, 2, 1);
        grid.occupied[a] = true;
        grid.occupied[b] = true;

        let added = make_well_composed(&mut grid, &StageContext::default()).unwrap();
        assert!(added > 0);
        assert_closed_manifold(&extract_boundary(&grid));
    }

    #[test]
    fn test_single_voxel_boundary() {
        let mut grid = VoxelGrid::new([3, 3, 3], Point3::origin(), 0.5);
        let i = grid.index(1, 1, 1);
        grid.occupied[i] = true;
        let mesh = extract_boundary(&grid);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.face_count(), 12);
        assert_relative_eq!(mesh.signed_volume(), 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_budget_checked_before_allocation() {
        let ctx = StageContext::default().with_budget(ResourceBudget {
            max_memory_bytes: 64,
        });
        assert!(matches!(
            voxelize(&cube(0.0, 1.0), 64, 1, &ctx),
            Err(MeshError::ResourceLimit { .. })
        ));
    }

    #[test]
    fn test_estimate_scales_with_resolution() {
        let bounds = (Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let low = estimate_voxelization(bounds, 16).unwrap();
        let high = estimate_voxelization(bounds, 64).unwrap();
        assert!(high.estimated_memory_bytes > 8 * low.estimated_memory_bytes);
    }

    #[test]
    fn test_empty_mesh_unrepairable() {
        assert!(matches!(
            voxelize(&Mesh::new(), 16, 1, &StageContext::default()),
            Err(MeshError::UnrepairableMesh { .. })
        ));
    }
}
