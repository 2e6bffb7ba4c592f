//! Connected component analysis.
//!
//! A connected component is a set of faces reachable from one another
//! across shared edges. Faces touching only at a vertex are separate
//! components.

use std::cmp::Reverse;

use tracing::{debug, info};

use crate::adjacency::MeshAdjacency;
use crate::types::Mesh;

/// Result of connected component analysis.
#[derive(Debug, Clone, Default)]
pub struct ComponentAnalysis {
    /// Number of connected components found.
    pub component_count: usize,
    /// Face indices for each component, sorted by component size (largest first).
    pub components: Vec<Vec<u32>>,
    /// Size of the largest component (number of faces).
    pub largest_component_size: usize,
    /// Size of the smallest component (number of faces).
    pub smallest_component_size: usize,
}

impl ComponentAnalysis {
    /// Check if the mesh is fully connected (single component).
    pub fn is_connected(&self) -> bool {
        self.component_count == 1
    }

    /// Get the face indices of the largest component.
    pub fn largest_component(&self) -> &[u32] {
        self.components.first().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl std::fmt::Display for ComponentAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} component(s)", self.component_count)?;
        if self.component_count > 1 {
            write!(
                f,
                " (largest {} faces, smallest {} faces)",
                self.largest_component_size, self.smallest_component_size
            )?;
        }
        Ok(())
    }
}

/// Find all edge-connected components of a mesh.
///
/// Every shared edge links its faces, including non-manifold edges with
/// more than two faces.
///
/// # Example
/// ```
/// use mesh_recon::{Mesh, Vertex};
/// use mesh_recon::components::find_connected_components;
///
/// let mut mesh = Mesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(10.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(11.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(10.0, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
/// mesh.faces.push([3, 4, 5]);
///
/// let analysis = find_connected_components(&mesh);
/// assert_eq!(analysis.component_count, 2);
/// ```
pub fn find_connected_components(mesh: &Mesh) -> ComponentAnalysis {
    if mesh.faces.is_empty() {
        return ComponentAnalysis::default();
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let face_count = mesh.faces.len();

    let mut face_neighbors: Vec<Vec<u32>> = vec![Vec::new(); face_count];
    for faces in adjacency.edge_to_faces.values() {
        for (i, &a) in faces.iter().enumerate() {
            for &b in &faces[i + 1..] {
                face_neighbors[a as usize].push(b);
                face_neighbors[b as usize].push(a);
            }
        }
    }

    let mut visited = vec![false; face_count];
    let mut components: Vec<Vec<u32>> = Vec::new();

    for start_face in 0..face_count {
        if visited[start_face] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start_face as u32];
        visited[start_face] = true;

        while let Some(face_idx) = stack.pop() {
            component.push(face_idx);
            for &neighbor in &face_neighbors[face_idx as usize] {
                if !visited[neighbor as usize] {
                    visited[neighbor as usize] = true;
                    stack.push(neighbor);
                }
            }
        }

        component.sort_unstable();
        components.push(component);
    }

    // Stable sort keeps discovery order among equal sizes.
    components.sort_by_key(|c| Reverse(c.len()));

    let component_count = components.len();
    let largest_component_size = components.first().map(|c| c.len()).unwrap_or(0);
    let smallest_component_size = components.last().map(|c| c.len()).unwrap_or(0);

    if component_count > 1 {
        debug!(
            component_count,
            sizes = ?components.iter().map(|c| c.len()).collect::<Vec<_>>(),
            "Found multiple components"
        );
    }

    ComponentAnalysis {
        component_count,
        components,
        largest_component_size,
        smallest_component_size,
    }
}

/// Keep only the largest connected component.
///
/// Returns the number of components removed.
pub fn keep_largest_component(mesh: &mut Mesh) -> usize {
    let analysis = find_connected_components(mesh);
    if analysis.component_count <= 1 {
        return 0;
    }

    let removed = analysis.component_count - 1;
    info!(
        kept_faces = analysis.largest_component_size,
        removed, "Keeping largest component"
    );

    *mesh = extract_faces(mesh, analysis.largest_component());
    removed
}

/// Build a mesh from a subset of faces, compacting vertices in index order.
pub(crate) fn extract_faces(mesh: &Mesh, face_indices: &[u32]) -> Mesh {
    let mut used = vec![false; mesh.vertices.len()];
    for &f in face_indices {
        for &v in &mesh.faces[f as usize] {
            used[v as usize] = true;
        }
    }

    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    let mut result = Mesh::with_capacity(
        used.iter().filter(|&&u| u).count(),
        face_indices.len(),
    );
    for (old, vertex) in mesh.vertices.iter().enumerate() {
        if used[old] {
            remap[old] = result.vertices.len() as u32;
            result.vertices.push(vertex.clone());
        }
    }
    result.faces = face_indices
        .iter()
        .map(|&f| mesh.faces[f as usize].map(|v| remap[v as usize]))
        .collect();
    result
}
