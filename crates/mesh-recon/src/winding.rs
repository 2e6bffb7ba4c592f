//! Winding consistency and outward orientation.

use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::{debug, info};

use crate::adjacency::{MeshAdjacency, edge_key, face_edges};
use crate::components::find_connected_components;
use crate::types::Mesh;

/// Make face winding consistent across every connected component.
///
/// BFS from an arbitrary face per component; a neighbor across a manifold
/// edge is flipped when it traverses the shared edge in the same direction.
/// Non-manifold edges carry no orientation information and are skipped.
///
/// Returns the number of faces flipped.
pub fn fix_winding_order(mesh: &mut Mesh) -> usize {
    if mesh.faces.is_empty() {
        return 0;
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let face_count = mesh.faces.len();
    let mut visited = vec![false; face_count];
    let mut flipped = 0;
    let mut components = 0;

    for start in 0..face_count {
        if visited[start] {
            continue;
        }
        components += 1;
        visited[start] = true;
        let mut queue = VecDeque::from([start as u32]);

        while let Some(face_idx) = queue.pop_front() {
            let face = mesh.faces[face_idx as usize];
            for (a, b) in face_edges(&face) {
                let Some(neighbors) = adjacency.edge_to_faces.get(&edge_key(a, b)) else {
                    continue;
                };
                if neighbors.len() != 2 {
                    continue;
                }
                for &neighbor in neighbors {
                    if neighbor == face_idx || visited[neighbor as usize] {
                        continue;
                    }
                    visited[neighbor as usize] = true;

                    let other = &mut mesh.faces[neighbor as usize];
                    if edge_direction_in_face(other, a, b) == Some(true) {
                        other.swap(1, 2);
                        flipped += 1;
                    }
                    queue.push_back(neighbor);
                }
            }
        }
    }

    if flipped > 0 {
        info!(flipped, components, "Fixed winding order");
    } else {
        debug!(components, "Winding order already consistent");
    }

    flipped
}

/// Flip every component whose signed volume is negative.
///
/// Meaningful for closed components; open ones are oriented by the sign of
/// their (partial) signed volume, which is still the best available guess.
/// Returns the number of components flipped.
pub fn orient_outward(mesh: &mut Mesh) -> usize {
    let analysis = find_connected_components(mesh);
    let mut flipped = 0;

    for component in &analysis.components {
        let volume: f64 = component
            .iter()
            .map(|&f| {
                let [i0, i1, i2] = mesh.faces[f as usize];
                let v0 = mesh.vertices[i0 as usize].position.coords;
                let v1 = mesh.vertices[i1 as usize].position.coords;
                let v2 = mesh.vertices[i2 as usize].position.coords;
                v0.dot(&v1.cross(&v2))
            })
            .sum();

        if volume < 0.0 {
            for &f in component {
                mesh.faces[f as usize].swap(1, 2);
            }
            flipped += 1;
        }
    }

    if flipped > 0 {
        debug!(flipped, "Flipped inside-out components");
    }
    flipped
}

/// Whether no directed edge is used by more than one face.
///
/// On a manifold mesh this is exactly "every interior edge is traversed in
/// opposite directions by its two faces".
pub fn is_consistently_oriented(faces: &[[u32; 3]]) -> bool {
    let mut directed: HashMap<(u32, u32), u32> = HashMap::with_capacity(faces.len() * 3);
    for face in faces {
        for edge in face_edges(face) {
            let count = directed.entry(edge).or_default();
            *count += 1;
            if *count > 1 {
                return false;
            }
        }
    }
    true
}

/// Check if edge (a, b) appears in face in the same direction (a -> b).
/// Returns Some(true) if same direction, Some(false) if opposite, None if edge not found.
fn edge_direction_in_face(face: &[u32; 3], a: u32, b: u32) -> Option<bool> {
    for (v0, v1) in face_edges(face) {
        if v0 == a && v1 == b {
            return Some(true);
        }
        if v0 == b && v1 == a {
            return Some(false);
        }
    }
    None
}
