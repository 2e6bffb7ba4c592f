//! Watertightness repair.
//!
//! Repair runs in two tiers. The cheap tier cleans the mesh, fills every
//! boundary loop with a triangulated patch, and fixes orientation. When a
//! hole cannot be patched, or the patched surface is still open,
//! non-manifold or self-intersecting, the whole mesh is rebuilt through the
//! voxel fallback instead. Which tier produced the result is reported as a
//! [`RepairOutcome`].

use hashbrown::{HashMap, HashSet};
use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::adjacency::{MeshAdjacency, vertex_fans};
use crate::components::keep_largest_component;
use crate::error::{MeshError, MeshResult};
use crate::holes::{HoleDefect, UnfillableHole, fill_holes};
use crate::intersect::{IntersectionParams, detect_self_intersections};
use crate::progress::StageContext;
use crate::tracing_ext::{OperationTimer, log_repair_outcome};
use crate::types::{Mesh, Triangle};
use crate::voxel::{sealing_radius, voxelize};
use crate::winding::{fix_winding_order, orient_outward};

/// Thresholds deciding between hole filling and voxelization.
///
/// # Example
///
/// ```
/// use mesh_recon::RepairPolicy;
///
/// let policy = RepairPolicy {
///     max_hole_edges: 64,
///     detect_self_intersections: false,
///     ..Default::default()
/// };
/// assert_eq!(policy.relaxed().max_hole_edges, policy.relaxed_max_hole_edges);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct RepairPolicy {
    /// Largest boundary loop, in edges, that hole filling will patch.
    ///
    /// Default: `200`
    pub max_hole_edges: usize,

    /// Loop size limit used by the single relaxed retry.
    ///
    /// Default: `1000`
    pub relaxed_max_hole_edges: usize,

    /// Cap on voxels along the longest axis in the fallback. The effective
    /// resolution is `min(2^depth, max_voxel_resolution)`.
    ///
    /// Default: `128`
    pub max_voxel_resolution: usize,

    /// Smallest morphological closing radius, in voxels, applied before the
    /// interior flood fill. The fallback widens it until the widest hole is
    /// sealed.
    ///
    /// Default: `1`
    pub closing_radius: usize,

    /// Run the triangle/triangle intersection check on patched meshes.
    ///
    /// Default: `true`
    pub detect_self_intersections: bool,

    /// Drop every connected component but the largest.
    ///
    /// Default: `true`
    pub keep_largest_component: bool,

    /// Vertex weld distance as a fraction of the bounding-box diagonal.
    ///
    /// Default: `1e-9`
    pub weld_tolerance: f64,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_hole_edges: 200,
            relaxed_max_hole_edges: 1000,
            max_voxel_resolution: 128,
            closing_radius: 1,
            detect_self_intersections: true,
            keep_largest_component: true,
            weld_tolerance: 1e-9,
        }
    }
}

impl RepairPolicy {
    /// The policy used for the retry after a failed validation.
    pub fn relaxed(&self) -> Self {
        Self {
            max_hole_edges: self.relaxed_max_hole_edges.max(self.max_hole_edges),
            ..self.clone()
        }
    }

    /// This policy with the voxel fallback no finer than a `resolution`-cell
    /// grid.
    pub fn capped_to_grid(&self, resolution: usize) -> Self {
        Self {
            max_voxel_resolution: self.max_voxel_resolution.min(resolution.max(2)),
            ..self.clone()
        }
    }

    /// Voxel resolution for the fallback at `depth`.
    pub fn voxel_resolution(&self, depth: u32) -> usize {
        let by_depth = 1usize.checked_shl(depth).unwrap_or(usize::MAX);
        by_depth.min(self.max_voxel_resolution).max(2)
    }
}

/// Why the voxel fallback was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoxelReason {
    /// A boundary loop exceeded `max_hole_edges`.
    OversizedHole { edges: usize },
    /// A boundary loop self-overlapped on its best-fit plane.
    FoldedHole { edges: usize },
    /// Boundary edges remained after filling.
    NotClosed { boundary_edges: usize },
    /// Non-manifold edges or vertices remained after filling.
    NonManifold { edges: usize, vertices: usize },
    /// Faces intersect each other.
    SelfIntersecting { pairs: usize },
}

impl From<UnfillableHole> for VoxelReason {
    fn from(hole: UnfillableHole) -> Self {
        match hole.defect {
            HoleDefect::Oversized => VoxelReason::OversizedHole { edges: hole.edges },
            HoleDefect::FoldedProjection => VoxelReason::FoldedHole { edges: hole.edges },
        }
    }
}

impl std::fmt::Display for VoxelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoxelReason::OversizedHole { edges } => {
                write!(f, "hole with {edges} edges exceeds the fill limit")
            }
            VoxelReason::FoldedHole { edges } => {
                write!(f, "hole with {edges} edges folds over itself")
            }
            VoxelReason::NotClosed { boundary_edges } => {
                write!(f, "{boundary_edges} boundary edges remain after filling")
            }
            VoxelReason::NonManifold { edges, vertices } => write!(
                f,
                "{edges} non-manifold edges and {vertices} non-manifold vertices remain"
            ),
            VoxelReason::SelfIntersecting { pairs } => {
                write!(f, "{pairs} intersecting face pair(s)")
            }
        }
    }
}

/// Which repair tier produced the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Holes were patched in place; `holes_filled` may be zero.
    Filled { holes_filled: usize },
    /// The mesh was rebuilt from voxels.
    Voxelized {
        reason: VoxelReason,
        resolution: usize,
    },
    /// Neither tier produced a closed 2-manifold.
    Failed { reason: String },
}

impl RepairOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RepairOutcome::Failed { .. })
    }

    /// Short tag for logs and reports.
    pub fn path(&self) -> &'static str {
        match self {
            RepairOutcome::Filled { .. } => "filled",
            RepairOutcome::Voxelized { .. } => "voxelized",
            RepairOutcome::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairOutcome::Filled { holes_filled } => write!(f, "filled {holes_filled} hole(s)"),
            RepairOutcome::Voxelized { reason, resolution } => {
                write!(f, "voxelized at resolution {resolution} ({reason})")
            }
            RepairOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A repaired mesh and how it was obtained.
#[derive(Debug, Clone)]
pub struct RepairResult {
    /// The repaired mesh, or the best effort when the outcome is `Failed`.
    pub mesh: Mesh,
    pub outcome: RepairOutcome,
}

/// Repair with the default policy and fail on an unrepairable mesh.
///
/// # Errors
///
/// [`MeshError::UnrepairableMesh`] if neither hole filling nor voxelization
/// yields a closed 2-manifold.
pub fn repair(mesh: &Mesh, depth: u32) -> MeshResult<Mesh> {
    let result = repair_with(mesh, depth, &RepairPolicy::default(), &StageContext::default())?;
    match result.outcome {
        RepairOutcome::Failed { reason } => Err(MeshError::unrepairable(reason)),
        _ => Ok(result.mesh),
    }
}

/// Make `mesh` watertight, reporting which tier did it.
///
/// A `Failed` outcome is a value, not an error: the caller decides whether
/// the best-effort mesh is usable.
///
/// # Errors
///
/// - [`MeshError::ResourceLimit`] if the voxel grid would exceed the budget.
/// - [`MeshError::Cancelled`] if the context is cancelled.
pub fn repair_with(
    mesh: &Mesh,
    depth: u32,
    policy: &RepairPolicy,
    ctx: &StageContext<'_>,
) -> MeshResult<RepairResult> {
    let timer = OperationTimer::with_mesh("repair", mesh);
    ctx.check("repair")?;

    let mut work = mesh.clone();
    clean_mesh(&mut work, policy);
    fix_winding_order(&mut work);

    let patched = match fill_holes(&mut work, policy.max_hole_edges) {
        Ok(holes_filled) => {
            finish_orientation(&mut work);
            match surface_defect(&work, policy) {
                None => Ok(holes_filled),
                Some(reason) => Err(reason),
            }
        }
        Err(hole) => Err(VoxelReason::from(hole)),
    };
    ctx.check("repair")?;

    let (mut repaired, outcome) = match patched {
        Ok(holes_filled) => (work, RepairOutcome::Filled { holes_filled }),
        Err(reason) => voxel_fallback(work, reason, depth, policy, ctx)?,
    };

    if outcome.is_success() {
        if policy.keep_largest_component {
            keep_largest_component(&mut repaired);
        }
        compute_vertex_normals(&mut repaired);
    }

    log_repair_outcome(&outcome, timer.elapsed_ms());
    Ok(RepairResult {
        mesh: repaired,
        outcome,
    })
}

fn voxel_fallback(
    source: Mesh,
    reason: VoxelReason,
    depth: u32,
    policy: &RepairPolicy,
    ctx: &StageContext<'_>,
) -> MeshResult<(Mesh, RepairOutcome)> {
    let resolution = policy.voxel_resolution(depth);
    let closing_radius = sealing_radius(&source, resolution, policy.closing_radius);
    debug!(%reason, resolution, closing_radius, "Falling back to voxelization");

    match voxelize(&source, resolution, closing_radius, ctx) {
        Ok(mut voxelized) => {
            finish_orientation(&mut voxelized);
            let relaxed = RepairPolicy {
                detect_self_intersections: false,
                ..policy.clone()
            };
            match surface_defect(&voxelized, &relaxed) {
                None => Ok((voxelized, RepairOutcome::Voxelized { reason, resolution })),
                Some(defect) => Ok((
                    voxelized,
                    RepairOutcome::Failed {
                        reason: format!("voxelized surface is still invalid: {defect}"),
                    },
                )),
            }
        }
        Err(MeshError::UnrepairableMesh { details }) => {
            Ok((source, RepairOutcome::Failed { reason: details }))
        }
        Err(e) => Err(e),
    }
}

fn finish_orientation(mesh: &mut Mesh) {
    fix_winding_order(mesh);
    orient_outward(mesh);
    split_nonmanifold_vertices(mesh);
}

/// The first reason `mesh` is not an acceptable closed 2-manifold.
fn surface_defect(mesh: &Mesh, policy: &RepairPolicy) -> Option<VoxelReason> {
    let adjacency = MeshAdjacency::build(&mesh.faces);

    let nm_edges = adjacency.non_manifold_edge_count();
    let nm_vertices = adjacency.non_manifold_vertices(&mesh.faces).len();
    if nm_edges > 0 || nm_vertices > 0 {
        return Some(VoxelReason::NonManifold {
            edges: nm_edges,
            vertices: nm_vertices,
        });
    }
    if !adjacency.is_closed() {
        return Some(VoxelReason::NotClosed {
            boundary_edges: adjacency.boundary_edge_count(),
        });
    }
    if policy.detect_self_intersections {
        let result = detect_self_intersections(mesh, &IntersectionParams::first_only());
        if result.has_intersections {
            return Some(VoxelReason::SelfIntersecting {
                pairs: result.intersection_count,
            });
        }
    }
    None
}

/// The cleanup pass run before hole filling.
///
/// Removes faces with repeated vertices, welds coincident vertices, drops
/// duplicate faces and faces beyond the second on any edge, and compacts
/// the vertex array.
pub fn clean_mesh(mesh: &mut Mesh, policy: &RepairPolicy) {
    let before = (mesh.vertex_count(), mesh.face_count());

    remove_degenerate_faces(mesh);
    let diagonal = mesh
        .bounds()
        .map(|(min, max)| (max - min).norm())
        .unwrap_or(0.0);
    weld_vertices(mesh, policy.weld_tolerance * diagonal);
    remove_duplicate_faces(mesh);
    fix_non_manifold_edges(mesh);
    remove_unreferenced_vertices(mesh);

    if (mesh.vertex_count(), mesh.face_count()) != before {
        info!(
            vertices_before = before.0,
            vertices_after = mesh.vertex_count(),
            faces_before = before.1,
            faces_after = mesh.face_count(),
            "Cleaned mesh"
        );
    }
}

/// Remove faces that reference a vertex more than once.
pub fn remove_degenerate_faces(mesh: &mut Mesh) -> usize {
    let original = mesh.faces.len();
    mesh.faces
        .retain(|&[a, b, c]| a != b && b != c && a != c);
    let removed = original - mesh.faces.len();
    if removed > 0 {
        debug!(removed, "Removed degenerate faces");
    }
    removed
}

/// Weld vertices closer than `epsilon` into the lowest index of their cluster.
///
/// With `epsilon == 0` only exactly coincident positions are merged.
/// Returns the number of vertices merged.
pub fn weld_vertices(mesh: &mut Mesh, epsilon: f64) -> usize {
    if mesh.vertices.is_empty() {
        return 0;
    }

    let mut remap: Vec<u32> = (0..mesh.vertices.len() as u32).collect();
    let mut merged = 0;

    if epsilon <= 0.0 {
        let mut first: HashMap<[u64; 3], u32> = HashMap::with_capacity(mesh.vertices.len());
        for (idx, vertex) in mesh.vertices.iter().enumerate() {
            let p = vertex.position;
            let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
            let target = *first.entry(key).or_insert(idx as u32);
            if target != idx as u32 {
                remap[idx] = target;
                merged += 1;
            }
        }
    } else {
        let cell_size = epsilon * 2.0;
        let cell_of = |v: &Vector3<f64>| {
            [
                (v.x / cell_size).floor() as i64,
                (v.y / cell_size).floor() as i64,
                (v.z / cell_size).floor() as i64,
            ]
        };

        let mut spatial_hash: HashMap<[i64; 3], Vec<u32>> = HashMap::new();
        for (idx, vertex) in mesh.vertices.iter().enumerate() {
            spatial_hash
                .entry(cell_of(&vertex.position.coords))
                .or_default()
                .push(idx as u32);
        }

        for (idx, vertex) in mesh.vertices.iter().enumerate() {
            let idx = idx as u32;
            if remap[idx as usize] != idx {
                continue;
            }
            let cell = cell_of(&vertex.position.coords);
            for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        let Some(candidates) =
                            spatial_hash.get(&[cell[0] + dx, cell[1] + dy, cell[2] + dz])
                        else {
                            continue;
                        };
                        for &other in candidates {
                            if other <= idx || remap[other as usize] != other {
                                continue;
                            }
                            let dist = (vertex.position - mesh.vertices[other as usize].position)
                                .norm();
                            if dist < epsilon {
                                remap[other as usize] = idx;
                                merged += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    if merged == 0 {
        return 0;
    }

    for face in &mut mesh.faces {
        *face = face.map(|v| remap[v as usize]);
    }
    remove_degenerate_faces(mesh);

    debug!(merged, epsilon, "Welded vertices");
    merged
}

/// Remove repeated faces, regardless of winding or starting vertex.
///
/// Returns the number of faces removed.
pub fn remove_duplicate_faces(mesh: &mut Mesh) -> usize {
    let original = mesh.faces.len();
    let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(original);

    mesh.faces.retain(|face| {
        let mut key = *face;
        key.sort_unstable();
        seen.insert(key)
    });

    let removed = original - mesh.faces.len();
    if removed > 0 {
        debug!(removed, "Removed duplicate faces");
    }
    removed
}

/// Keep the two largest faces on every edge shared by more than two.
///
/// Returns the number of faces removed.
pub fn fix_non_manifold_edges(mesh: &mut Mesh) -> usize {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let mut faces_to_remove: HashSet<u32> = HashSet::new();

    for (v0, v1) in adjacency.non_manifold_edges() {
        let Some(incident) = adjacency.faces_for_edge(v0, v1) else {
            continue;
        };
        let mut by_area: Vec<(u32, f64)> = incident
            .iter()
            .filter(|f| !faces_to_remove.contains(*f))
            .map(|&f| (f, face_area(mesh, f)))
            .collect();
        if by_area.len() <= 2 {
            continue;
        }
        by_area.sort_by(|a, b| b.1.total_cmp(&a.1));
        faces_to_remove.extend(by_area.iter().skip(2).map(|&(f, _)| f));
    }

    if faces_to_remove.is_empty() {
        return 0;
    }

    let mut idx = 0u32;
    mesh.faces.retain(|_| {
        let keep = !faces_to_remove.contains(&idx);
        idx += 1;
        keep
    });

    warn!(
        removed = faces_to_remove.len(),
        "Removed faces on non-manifold edges"
    );
    faces_to_remove.len()
}

fn face_area(mesh: &Mesh, face: u32) -> f64 {
    let [a, b, c] = mesh.faces[face as usize];
    Triangle::new(
        mesh.vertices[a as usize].position,
        mesh.vertices[b as usize].position,
        mesh.vertices[c as usize].position,
    )
    .area()
}

/// Remove unreferenced vertices and compact the vertex array in order.
///
/// Returns the number of vertices removed.
pub fn remove_unreferenced_vertices(mesh: &mut Mesh) -> usize {
    let mut referenced = vec![false; mesh.vertices.len()];
    for face in &mesh.faces {
        for &v in face {
            referenced[v as usize] = true;
        }
    }
    let kept = referenced.iter().filter(|&&r| r).count();
    if kept == mesh.vertices.len() {
        return 0;
    }

    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    let mut vertices = Vec::with_capacity(kept);
    for (old, vertex) in mesh.vertices.drain(..).enumerate() {
        if referenced[old] {
            remap[old] = vertices.len() as u32;
            vertices.push(vertex);
        }
    }
    mesh.vertices = vertices;
    for face in &mut mesh.faces {
        *face = face.map(|v| remap[v as usize]);
    }

    let removed = referenced.len() - kept;
    debug!(removed, "Removed unreferenced vertices");
    removed
}

/// Give each extra fan around a pinched vertex its own copy of the vertex.
///
/// Returns the number of vertices added.
pub fn split_nonmanifold_vertices(mesh: &mut Mesh) -> usize {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let pinched = adjacency.non_manifold_vertices(&mesh.faces);
    let mut added = 0;

    for vertex in pinched {
        let Some(incident) = adjacency.faces_for_vertex(vertex) else {
            continue;
        };
        let fans = vertex_fans(vertex, incident, &mesh.faces);
        for fan in fans.iter().skip(1) {
            let copy = mesh.vertices.len() as u32;
            mesh.vertices.push(mesh.vertices[vertex as usize].clone());
            for &f in fan {
                for v in &mut mesh.faces[f as usize] {
                    if *v == vertex {
                        *v = copy;
                    }
                }
            }
            added += 1;
        }
    }

    if added > 0 {
        debug!(added, "Split non-manifold vertices");
    }
    added
}

/// Area-weighted vertex normals.
pub fn compute_vertex_normals(mesh: &mut Mesh) {
    let mut accum = vec![Vector3::zeros(); mesh.vertices.len()];
    for face in &mesh.faces {
        let [a, b, c] = *face;
        let weighted = Triangle::new(
            mesh.vertices[a as usize].position,
            mesh.vertices[b as usize].position,
            mesh.vertices[c as usize].position,
        )
        .normal_unnormalized();
        for &v in face {
            accum[v as usize] += weighted;
        }
    }

    for (vertex, n) in mesh.vertices.iter_mut().zip(accum) {
        let len_sq = n.norm_squared();
        vertex.normal = (len_sq > f64::EPSILON * f64::EPSILON).then(|| n / len_sq.sqrt());
    }
}
