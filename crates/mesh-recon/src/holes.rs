//! Boundary loop detection and hole filling.
//!
//! Loops are traced along directed boundary half-edges, so every loop
//! carries the orientation of the faces around it and patches inherit a
//! consistent winding. A boundary that passes through the same vertex twice
//! is split there into simple loops, each patched on its own. A hole is
//! filled only when its loop is small enough and projects onto its best-fit
//! plane as a simple polygon.

use hashbrown::HashMap;
use nalgebra::{Point2, Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::adjacency::{MeshAdjacency, edge_key, face_edges};
use crate::pointcloud::fit_plane;
use crate::types::Mesh;

/// A closed chain of boundary edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryLoop {
    /// Vertex indices in the direction the adjacent faces traverse them.
    pub vertices: Vec<u32>,
}

impl BoundaryLoop {
    /// Number of edges (and vertices) in the loop.
    pub fn edge_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Why a boundary loop cannot be closed by a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoleDefect {
    /// More edges than the fill limit.
    Oversized,
    /// The loop folds over itself on its best-fit plane, or has no plane.
    FoldedProjection,
}

/// A loop the hole filler refused, with its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnfillableHole {
    pub edges: usize,
    pub defect: HoleDefect,
}

/// Trace every boundary loop of the mesh.
///
/// A vertex where several boundary chains meet splits the walk into
/// separate loops, so every returned loop visits each vertex once. Loops
/// may share such a pinch vertex.
pub fn detect_holes(faces: &[[u32; 3]], adjacency: &MeshAdjacency) -> Vec<BoundaryLoop> {
    let mut outgoing: HashMap<u32, Vec<u32>> = HashMap::new();
    for face in faces {
        for (a, b) in face_edges(face) {
            if adjacency
                .edge_to_faces
                .get(&edge_key(a, b))
                .is_some_and(|f| f.len() == 1)
            {
                outgoing.entry(a).or_default().push(b);
            }
        }
    }
    if outgoing.is_empty() {
        return Vec::new();
    }

    let mut starts: Vec<u32> = outgoing.keys().copied().collect();
    starts.sort_unstable();

    let mut loops = Vec::new();
    for start in starts {
        while outgoing.get(&start).is_some_and(|o| !o.is_empty()) {
            let mut path = vec![start];
            let mut position: HashMap<u32, usize> = HashMap::from([(start, 0)]);
            let mut current = start;

            loop {
                let Some(next) = outgoing.get_mut(&current).and_then(Vec::pop) else {
                    if path.len() > 1 {
                        warn!(start, dangling = path.len(), "Boundary chain is not closed");
                    }
                    break;
                };

                match position.get(&next).copied() {
                    Some(k) => {
                        if path.len() - k >= 3 {
                            loops.push(BoundaryLoop {
                                vertices: path[k..].to_vec(),
                            });
                        }
                        for v in &path[k + 1..] {
                            position.remove(v);
                        }
                        path.truncate(k + 1);
                        current = next;
                        if path.len() == 1 {
                            break;
                        }
                    }
                    None => {
                        position.insert(next, path.len());
                        path.push(next);
                        current = next;
                    }
                }
            }
        }
    }

    debug!(
        holes = loops.len(),
        sizes = ?loops.iter().map(BoundaryLoop::edge_count).collect::<Vec<_>>(),
        "Detected boundary loops"
    );
    loops
}

/// Decide whether a loop can be patched.
fn classify(
    mesh: &Mesh,
    boundary: &BoundaryLoop,
    max_hole_edges: usize,
) -> Result<Vec<Point2<f64>>, HoleDefect> {
    if boundary.edge_count() > max_hole_edges {
        return Err(HoleDefect::Oversized);
    }

    let positions: Vec<Point3<f64>> = boundary
        .vertices
        .iter()
        .map(|&v| mesh.vertices[v as usize].position)
        .collect();
    let projected = project_to_plane(&positions).ok_or(HoleDefect::FoldedProjection)?;

    if signed_area(&projected).abs() <= f64::EPSILON * scale_sq(&projected)
        || polygon_self_intersects(&projected)
    {
        return Err(HoleDefect::FoldedProjection);
    }
    Ok(projected)
}

/// Project points onto their least-squares plane.
fn project_to_plane(points: &[Point3<f64>]) -> Option<Vec<Point2<f64>>> {
    let (normal, _) = fit_plane(points)?;
    let helper = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = normal.cross(&helper).normalize();
    let v = normal.cross(&u);
    let origin = points[0];
    Some(
        points
            .iter()
            .map(|p| {
                let d = p - origin;
                Point2::new(d.dot(&u), d.dot(&v))
            })
            .collect(),
    )
}

fn signed_area(polygon: &[Point2<f64>]) -> f64 {
    let n = polygon.len();
    (0..n)
        .map(|i| {
            let (a, b) = (polygon[i], polygon[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        * 0.5
}

fn scale_sq(polygon: &[Point2<f64>]) -> f64 {
    let (mut lo, mut hi) = (polygon[0], polygon[0]);
    for p in polygon {
        lo = lo.inf(p);
        hi = hi.sup(p);
    }
    (hi - lo).norm_squared()
}

fn orient(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    (b - a).perp(&(c - a))
}

fn segments_intersect(p1: &Point2<f64>, p2: &Point2<f64>, q1: &Point2<f64>, q2: &Point2<f64>) -> bool {
    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);
    d1 * d2 <= 0.0 && d3 * d4 <= 0.0 && !(d1 == 0.0 && d2 == 0.0 && !boxes_touch(p1, p2, q1, q2))
}

fn boxes_touch(p1: &Point2<f64>, p2: &Point2<f64>, q1: &Point2<f64>, q2: &Point2<f64>) -> bool {
    p1.x.min(p2.x) <= q1.x.max(q2.x)
        && q1.x.min(q2.x) <= p1.x.max(p2.x)
        && p1.y.min(p2.y) <= q1.y.max(q2.y)
        && q1.y.min(q2.y) <= p1.y.max(p2.y)
}

/// Whether any two non-adjacent polygon edges touch.
fn polygon_self_intersects(polygon: &[Point2<f64>]) -> bool {
    let n = polygon.len();
    if n < 4 {
        return false;
    }
    for i in 0..n {
        let (a1, a2) = (&polygon[i], &polygon[(i + 1) % n]);
        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            if segments_intersect(a1, a2, &polygon[j], &polygon[(j + 1) % n]) {
                return true;
            }
        }
    }
    false
}

fn point_in_triangle(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> bool {
    let d1 = orient(a, b, p);
    let d2 = orient(b, c, p);
    let d3 = orient(c, a, p);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Triangulate a patch for one loop by ear clipping on its projection.
///
/// The patch runs opposite to the loop so that its faces traverse every
/// boundary edge against the existing face. Falls back to a fan if no ear
/// is found.
pub fn fill_hole_ear_clipping(boundary: &BoundaryLoop, projected: &[Point2<f64>]) -> Vec<[u32; 3]> {
    let n = boundary.vertices.len();
    if n < 3 {
        return Vec::new();
    }

    let order: Vec<usize> = (0..n).rev().collect();
    let ccw = {
        let reversed: Vec<Point2<f64>> = order.iter().map(|&i| projected[i]).collect();
        signed_area(&reversed) > 0.0
    };
    let convex = |a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>| {
        let o = orient(a, b, c);
        if ccw { o > 0.0 } else { o < 0.0 }
    };

    let mut remaining = order;
    let mut triangles = Vec::with_capacity(n - 2);

    while remaining.len() > 3 {
        let m = remaining.len();
        let ear = (0..m).find(|&i| {
            let prev = remaining[(i + m - 1) % m];
            let curr = remaining[i];
            let next = remaining[(i + 1) % m];
            let (a, b, c) = (&projected[prev], &projected[curr], &projected[next]);
            convex(a, b, c)
                && remaining
                    .iter()
                    .filter(|&&k| k != prev && k != curr && k != next)
                    .all(|&k| !point_in_triangle(&projected[k], a, b, c))
        });

        let Some(i) = ear else {
            warn!(
                remaining = remaining.len(),
                "Ear clipping stuck, using fan triangulation"
            );
            break;
        };
        let prev = remaining[(i + m - 1) % m];
        let next = remaining[(i + 1) % m];
        triangles.push([
            boundary.vertices[prev],
            boundary.vertices[remaining[i]],
            boundary.vertices[next],
        ]);
        remaining.remove(i);
    }

    for i in 1..remaining.len() - 1 {
        triangles.push([
            boundary.vertices[remaining[0]],
            boundary.vertices[remaining[i]],
            boundary.vertices[remaining[i + 1]],
        ]);
    }

    triangles
}

/// Fill every hole, or none.
///
/// All loops are checked first; if any is unfillable the mesh is left
/// untouched and the first offending loop is returned. Otherwise every loop
/// is patched and the number of holes filled is returned.
pub fn fill_holes(mesh: &mut Mesh, max_hole_edges: usize) -> Result<usize, UnfillableHole> {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let holes = detect_holes(&mesh.faces, &adjacency);
    if holes.is_empty() {
        return Ok(0);
    }

    let projections: Vec<Vec<Point2<f64>>> = holes
        .par_iter()
        .map(|hole| {
            classify(mesh, hole, max_hole_edges).map_err(|defect| UnfillableHole {
                edges: hole.edge_count(),
                defect,
            })
        })
        .collect::<Result<_, _>>()
        .inspect_err(|hole| {
            debug!(edges = hole.edges, defect = ?hole.defect, max_hole_edges, "Hole not fillable");
        })?;

    let patches: Vec<Vec<[u32; 3]>> = holes
        .par_iter()
        .zip(projections.par_iter())
        .map(|(hole, projected)| fill_hole_ear_clipping(hole, projected))
        .collect();

    let new_faces: usize = patches.iter().map(Vec::len).sum();
    for patch in patches {
        mesh.faces.extend(patch);
    }

    info!(holes = holes.len(), new_faces, "Filled holes");
    Ok(holes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use crate::winding::is_consistently_oriented;

    fn open_box_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        for &(x, y, z) in &[
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0),
            (1.0, 1.0, 0.0),
            (0.0, 1.0, 0.0),
            (0.0, 0.0, 1.0),
            (1.0, 0.0, 1.0),
            (1.0, 1.0, 1.0),
            (0.0, 1.0, 1.0),
        ] {
            mesh.vertices.push(Vertex::from_coords(x, y, z));
        }
        mesh.faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        mesh
    }

    /// Flat disk fan of `n` rim vertices around a center, open along the rim.
    fn disk(n: usize) -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        for i in 0..n {
            let t = i as f64 / n as f64 * std::f64::consts::TAU;
            mesh.vertices.push(Vertex::from_coords(t.cos(), t.sin(), 0.0));
        }
        for i in 0..n as u32 {
            mesh.faces.push([0, 1 + i, 1 + (i + 1) % n as u32]);
        }
        mesh
    }

    #[test]
    fn test_detect_holes() {
        let mesh = open_box_mesh();
        let adjacency = MeshAdjacency::build(&mesh.faces);
        let holes = detect_holes(&mesh.faces, &adjacency);

        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].edge_count(), 4);
    }

    #[test]
    fn test_closed_mesh_has_no_holes() {
        let mut mesh = open_box_mesh();
        mesh.faces.push([4, 5, 6]);
        mesh.faces.push([4, 6, 7]);
        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert!(detect_holes(&mesh.faces, &adjacency).is_empty());
    }

    #[test]
    fn test_fill_closes_box_outward() {
        let mut mesh = open_box_mesh();
        let filled = fill_holes(&mut mesh, 200).unwrap();

        assert_eq!(filled, 1);
        assert_eq!(mesh.face_count(), 12);
        assert!(MeshAdjacency::build(&mesh.faces).is_closed());
        assert!(is_consistently_oriented(&mesh.faces));
        approx::assert_relative_eq!(mesh.signed_volume(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_oversized_hole_leaves_mesh_untouched() {
        let mut mesh = disk(40);
        let before = mesh.clone();

        let err = fill_holes(&mut mesh, 32).unwrap_err();
        assert_eq!(err.edges, 40);
        assert_eq!(err.defect, HoleDefect::Oversized);
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_disk_patch_is_manifold() {
        let mut mesh = disk(40);
        assert_eq!(fill_holes(&mut mesh, 200), Ok(1));
        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert!(adjacency.is_closed());
        assert!(adjacency.is_manifold());
        assert_eq!(mesh.face_count(), 40 + 38);
    }

    #[test]
    fn test_concave_loop_ear_clipping() {
        // L-shaped outline.
        let outline = [
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 2.0),
            Point2::new(0.0, 2.0),
        ];
        let boundary = BoundaryLoop {
            vertices: (0..6).collect(),
        };
        let tris = fill_hole_ear_clipping(&boundary, &outline);
        assert_eq!(tris.len(), 4);

        let area: f64 = tris
            .iter()
            .map(|t| {
                let [a, b, c] = t.map(|v| outline[v as usize]);
                orient(&a, &b, &c).abs() * 0.5
            })
            .sum();
        approx::assert_relative_eq!(area, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_folded_projection_detected() {
        let bowtie = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
        ];
        assert!(polygon_self_intersects(&bowtie));

        let square = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        assert!(!polygon_self_intersects(&square));
    }

    #[test]
    fn test_pinched_boundary_fills_each_loop() {
        // Two open fans touching at rim vertex 1.
        let mut mesh = disk(6);
        let center = mesh.vertices.len() as u32;
        mesh.vertices.push(Vertex::from_coords(2.0, 0.0, 0.0));
        let rim: Vec<u32> = (0..6)
            .map(|j| {
                if j == 3 {
                    return 1;
                }
                let t = j as f64 / 6.0 * std::f64::consts::TAU;
                mesh.vertices
                    .push(Vertex::from_coords(2.0 + t.cos(), t.sin(), 0.0));
                (mesh.vertices.len() - 1) as u32
            })
            .collect();
        for j in 0..6 {
            mesh.faces.push([center, rim[j], rim[(j + 1) % 6]]);
        }

        let adjacency = MeshAdjacency::build(&mesh.faces);
        let holes = detect_holes(&mesh.faces, &adjacency);
        assert_eq!(holes.len(), 2);
        for hole in &holes {
            assert_eq!(hole.edge_count(), 6);
            assert_eq!(hole.vertices.iter().filter(|&&v| v == 1).count(), 1);
        }

        assert_eq!(fill_holes(&mut mesh, 200), Ok(2));
        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert!(adjacency.is_closed());
        assert!(adjacency.is_manifold());
    }
}
