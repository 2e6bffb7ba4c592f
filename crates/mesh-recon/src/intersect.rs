//! Self-intersection detection.
//!
//! Candidate pairs come from a uniform grid over triangle bounding boxes;
//! each candidate is confirmed with a separating axis test. Faces sharing
//! a vertex are never reported against each other.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::types::{Mesh, Triangle};

/// Result of self-intersection detection.
#[derive(Debug, Clone, Default)]
pub struct SelfIntersectionResult {
    /// Whether the mesh has any self-intersections.
    pub has_intersections: bool,
    /// Number of intersecting triangle pairs found.
    pub intersection_count: usize,
    /// Intersecting pairs as (face_idx_a, face_idx_b), at most `max_reported`.
    pub intersecting_pairs: Vec<(u32, u32)>,
    /// Total faces checked.
    pub faces_checked: usize,
    /// Whether the search stopped early at `max_reported`.
    pub truncated: bool,
}

impl SelfIntersectionResult {
    /// Check if the mesh is free of self-intersections.
    pub fn is_clean(&self) -> bool {
        !self.has_intersections
    }
}

impl std::fmt::Display for SelfIntersectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_intersections {
            write!(
                f,
                "Self-intersections found: {} pair(s){}",
                self.intersection_count,
                if self.truncated { " (truncated)" } else { "" }
            )
        } else {
            write!(f, "No self-intersections detected")
        }
    }
}

/// Parameters for self-intersection detection.
#[derive(Debug, Clone)]
pub struct IntersectionParams {
    /// Maximum number of intersecting pairs to report; 0 means unlimited.
    pub max_reported: usize,
    /// Epsilon for geometric comparisons.
    pub epsilon: f64,
}

impl Default for IntersectionParams {
    fn default() -> Self {
        Self {
            max_reported: 100,
            epsilon: 1e-10,
        }
    }
}

impl IntersectionParams {
    /// Stop at the first intersecting pair.
    pub fn first_only() -> Self {
        Self {
            max_reported: 1,
            ..Self::default()
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy)]
struct Aabb {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl Aabb {
    fn from_triangle(tri: &Triangle, epsilon: f64) -> Self {
        let e = Vector3::repeat(epsilon);
        Self {
            min: tri.v0.inf(&tri.v1).inf(&tri.v2) - e,
            max: tri.v0.sup(&tri.v1).sup(&tri.v2) + e,
        }
    }

    fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

/// Uniform grid of face buckets.
struct FaceGrid {
    origin: Point3<f64>,
    cell: f64,
    buckets: HashMap<[i64; 3], Vec<u32>>,
}

/// Upper bound on grid cells touched by one face before it is bucketed coarser.
const MAX_CELLS_PER_FACE: i64 = 64;

impl FaceGrid {
    fn build(aabbs: &[Aabb]) -> Self {
        let mut origin = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut extent_sum = 0.0;
        for b in aabbs {
            origin = origin.inf(&b.min);
            extent_sum += (b.max - b.min).max();
        }
        let cell = (extent_sum / aabbs.len().max(1) as f64).max(f64::EPSILON);

        let mut grid = Self {
            origin,
            cell,
            buckets: HashMap::new(),
        };
        for (i, b) in aabbs.iter().enumerate() {
            let (lo, hi) = grid.cell_range(b);
            let span = (0..3).map(|a| hi[a] - lo[a] + 1).product::<i64>();
            if span > MAX_CELLS_PER_FACE {
                // Oversized faces share one overflow bucket checked by every query.
                grid.buckets.entry([i64::MIN; 3]).or_default().push(i as u32);
                continue;
            }
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        grid.buckets.entry([x, y, z]).or_default().push(i as u32);
                    }
                }
            }
        }
        grid
    }

    fn cell_of(&self, p: &Point3<f64>) -> [i64; 3] {
        let r = (p - self.origin) / self.cell;
        [r.x.floor() as i64, r.y.floor() as i64, r.z.floor() as i64]
    }

    fn cell_range(&self, b: &Aabb) -> ([i64; 3], [i64; 3]) {
        (self.cell_of(&b.min), self.cell_of(&b.max))
    }

    /// Faces with index greater than `face` whose buckets overlap its box.
    fn candidates(&self, face: u32, b: &Aabb, out: &mut Vec<u32>) {
        out.clear();
        let (lo, hi) = self.cell_range(b);
        let span = (0..3).map(|a| hi[a] - lo[a] + 1).product::<i64>();

        if span > MAX_CELLS_PER_FACE {
            out.extend(
                self.buckets
                    .values()
                    .flatten()
                    .copied()
                    .filter(|&j| j > face),
            );
        } else {
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        if let Some(bucket) = self.buckets.get(&[x, y, z]) {
                            out.extend(bucket.iter().copied().filter(|&j| j > face));
                        }
                    }
                }
            }
            if let Some(oversized) = self.buckets.get(&[i64::MIN; 3]) {
                out.extend(oversized.iter().copied().filter(|&j| j > face));
            }
        }

        out.sort_unstable();
        out.dedup();
    }
}

/// Detect self-intersections in a mesh.
///
/// # Example
/// ```
/// use mesh_recon::{Mesh, Vertex};
/// use mesh_recon::intersect::{detect_self_intersections, IntersectionParams};
///
/// let mut mesh = Mesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
///
/// let result = detect_self_intersections(&mesh, &IntersectionParams::default());
/// assert!(result.is_clean());
/// ```
pub fn detect_self_intersections(
    mesh: &Mesh,
    params: &IntersectionParams,
) -> SelfIntersectionResult {
    let face_count = mesh.faces.len();
    if face_count < 2 {
        return SelfIntersectionResult {
            faces_checked: face_count,
            ..Default::default()
        };
    }

    debug!(faces = face_count, "Checking for self-intersections");

    let triangles: Vec<Triangle> = mesh.triangles().collect();
    let aabbs: Vec<Aabb> = triangles
        .iter()
        .map(|t| Aabb::from_triangle(t, params.epsilon))
        .collect();
    let grid = FaceGrid::build(&aabbs);

    let max_pairs = if params.max_reported == 0 {
        usize::MAX
    } else {
        params.max_reported
    };

    let intersection_count = AtomicUsize::new(0);
    let should_stop = AtomicBool::new(false);

    let mut intersecting_pairs: Vec<(u32, u32)> = (0..face_count as u32)
        .into_par_iter()
        .map_init(Vec::new, |candidates, i| {
            if should_stop.load(Ordering::Relaxed) {
                return Vec::new();
            }

            let fi = &mesh.faces[i as usize];
            let mut local_pairs = Vec::new();
            grid.candidates(i, &aabbs[i as usize], candidates);

            for &j in candidates.iter() {
                if should_stop.load(Ordering::Relaxed) {
                    break;
                }
                if !aabbs[i as usize].overlaps(&aabbs[j as usize]) {
                    continue;
                }
                let fj = &mesh.faces[j as usize];
                if fi.iter().any(|v| fj.contains(v)) {
                    continue;
                }
                if triangles_intersect(&triangles[i as usize], &triangles[j as usize], params.epsilon)
                {
                    let count = intersection_count.fetch_add(1, Ordering::Relaxed);
                    if count < max_pairs {
                        local_pairs.push((i, j));
                    }
                    if count + 1 >= max_pairs {
                        should_stop.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
            local_pairs
        })
        .flatten()
        .collect();

    intersecting_pairs.truncate(max_pairs);
    let final_count = intersection_count.load(Ordering::Relaxed);
    let truncated = params.max_reported > 0 && final_count >= max_pairs;

    if final_count > 0 {
        warn!(pairs = final_count, truncated, "Self-intersections found");
    } else {
        info!(faces = face_count, "No self-intersections found");
    }

    SelfIntersectionResult {
        has_intersections: final_count > 0,
        intersection_count: final_count,
        intersecting_pairs,
        faces_checked: face_count,
        truncated,
    }
}

/// Separating axis test between two triangles.
///
/// Touching counts as intersecting.
fn triangles_intersect(t1: &Triangle, t2: &Triangle, epsilon: f64) -> bool {
    let n1 = t1.normal_unnormalized();
    let n2 = t2.normal_unnormalized();

    if n1.norm_squared() < epsilon * epsilon || n2.norm_squared() < epsilon * epsilon {
        return false;
    }

    let edges1 = [t1.v1 - t1.v0, t1.v2 - t1.v1, t1.v0 - t1.v2];
    let edges2 = [t2.v1 - t2.v0, t2.v2 - t2.v1, t2.v0 - t2.v2];

    let cross_normals = n1.cross(&n2);
    let is_coplanar =
        cross_normals.norm_squared() < epsilon * epsilon * n1.norm_squared() * n2.norm_squared();

    if is_coplanar {
        if separated_by_axis(&n1, t1, t2, epsilon) {
            return false;
        }
        let in_plane = edges1
            .iter()
            .map(|e| n1.cross(e))
            .chain(edges2.iter().map(|e| n2.cross(e)));
        for axis in in_plane {
            if axis.norm_squared() > epsilon * epsilon && separated_by_axis(&axis, t1, t2, epsilon)
            {
                return false;
            }
        }
        return true;
    }

    if separated_by_axis(&n1, t1, t2, epsilon) || separated_by_axis(&n2, t1, t2, epsilon) {
        return false;
    }

    for e1 in &edges1 {
        for e2 in &edges2 {
            let axis = e1.cross(e2);
            if axis.norm_squared() > epsilon * epsilon && separated_by_axis(&axis, t1, t2, epsilon)
            {
                return false;
            }
        }
    }

    true
}

fn separated_by_axis(axis: &Vector3<f64>, t1: &Triangle, t2: &Triangle, epsilon: f64) -> bool {
    let project = |t: &Triangle| {
        let p = [
            axis.dot(&t.v0.coords),
            axis.dot(&t.v1.coords),
            axis.dot(&t.v2.coords),
        ];
        (p[0].min(p[1]).min(p[2]), p[0].max(p[1]).max(p[2]))
    };
    let (min1, max1) = project(t1);
    let (min2, max2) = project(t2);
    max1 + epsilon < min2 || max2 + epsilon < min1
}
