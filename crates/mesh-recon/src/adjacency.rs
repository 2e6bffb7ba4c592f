//! Mesh topology queries via adjacency structures.

use hashbrown::{HashMap, HashSet};

/// Lightweight topology structure for mesh queries.
///
/// Provides lookups for vertex-to-face and edge-to-face relationships
/// without the overhead of a full half-edge data structure.
#[derive(Debug, Clone)]
pub struct MeshAdjacency {
    /// Maps vertex index to the faces that use it.
    pub vertex_to_faces: HashMap<u32, Vec<u32>>,

    /// Maps edge (min_idx, max_idx) to the faces that share it.
    pub edge_to_faces: HashMap<(u32, u32), Vec<u32>>,
}

/// Canonical (min, max) key for an undirected edge.
#[inline]
pub fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

/// The three directed edges of a face, following its winding.
#[inline]
pub fn face_edges(&[v0, v1, v2]: &[u32; 3]) -> [(u32, u32); 3] {
    [(v0, v1), (v1, v2), (v2, v0)]
}

impl MeshAdjacency {
    /// Build adjacency structures from a face list.
    pub fn build(faces: &[[u32; 3]]) -> Self {
        let mut vertex_to_faces: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut edge_to_faces: HashMap<(u32, u32), Vec<u32>> =
            HashMap::with_capacity(faces.len() * 3 / 2);

        for (face_idx, face) in faces.iter().enumerate() {
            let face_idx = face_idx as u32;

            for &v in face {
                vertex_to_faces.entry(v).or_default().push(face_idx);
            }
            for (a, b) in face_edges(face) {
                edge_to_faces
                    .entry(edge_key(a, b))
                    .or_default()
                    .push(face_idx);
            }
        }

        Self {
            vertex_to_faces,
            edge_to_faces,
        }
    }

    /// Edges with exactly one adjacent face.
    pub fn boundary_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() == 1)
            .map(|(&edge, _)| edge)
    }

    /// Edges with more than two adjacent faces.
    pub fn non_manifold_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() > 2)
            .map(|(&edge, _)| edge)
    }

    /// At most two faces on every edge (boundary edges allowed).
    pub fn is_manifold(&self) -> bool {
        self.edge_to_faces.values().all(|faces| faces.len() <= 2)
    }

    /// Every edge has exactly two faces.
    pub fn is_closed(&self) -> bool {
        !self.edge_to_faces.is_empty() && self.edge_to_faces.values().all(|f| f.len() == 2)
    }

    /// Count boundary edges.
    pub fn boundary_edge_count(&self) -> usize {
        self.edge_to_faces
            .values()
            .filter(|faces| faces.len() == 1)
            .count()
    }

    /// Count non-manifold edges.
    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_to_faces
            .values()
            .filter(|faces| faces.len() > 2)
            .count()
    }

    /// Get faces adjacent to a vertex.
    pub fn faces_for_vertex(&self, vertex_idx: u32) -> Option<&[u32]> {
        self.vertex_to_faces.get(&vertex_idx).map(|v| v.as_slice())
    }

    /// Get faces adjacent to an edge. Order of the endpoints does not matter.
    pub fn faces_for_edge(&self, v0: u32, v1: u32) -> Option<&[u32]> {
        self.edge_to_faces.get(&edge_key(v0, v1)).map(|v| v.as_slice())
    }

    /// Vertices sitting on at least one boundary edge.
    pub fn boundary_vertices(&self) -> HashSet<u32> {
        self.boundary_edges().flat_map(|(a, b)| [a, b]).collect()
    }

    /// Vertices whose incident faces form more than one edge-connected fan.
    ///
    /// Such a vertex is a "pinch": the surface touches itself at a point
    /// even when every edge is manifold.
    pub fn non_manifold_vertices(&self, faces: &[[u32; 3]]) -> Vec<u32> {
        let mut result: Vec<u32> = self
            .vertex_to_faces
            .iter()
            .filter(|(v, incident)| vertex_fans(**v, incident, faces).len() > 1)
            .map(|(&v, _)| v)
            .collect();
        result.sort_unstable();
        result
    }
}

/// Group the faces around `vertex` into fans connected through edges that
/// contain `vertex`.
pub fn vertex_fans(vertex: u32, incident: &[u32], faces: &[[u32; 3]]) -> Vec<Vec<u32>> {
    // Edge partner vertex -> faces around `vertex` using edge (vertex, partner).
    let mut by_partner: HashMap<u32, Vec<u32>> = HashMap::new();
    for &f in incident {
        for &other in &faces[f as usize] {
            if other != vertex {
                by_partner.entry(other).or_default().push(f);
            }
        }
    }

    let mut visited: HashSet<u32> = HashSet::with_capacity(incident.len());
    let mut fans = Vec::new();

    for &start in incident {
        if !visited.insert(start) {
            continue;
        }
        let mut fan = vec![start];
        let mut stack = vec![start];
        while let Some(f) = stack.pop() {
            for &other in &faces[f as usize] {
                if other == vertex {
                    continue;
                }
                if let Some(neighbors) = by_partner.get(&other) {
                    for &n in neighbors {
                        if visited.insert(n) {
                            fan.push(n);
                            stack.push(n);
                        }
                    }
                }
            }
        }
        fans.push(fan);
    }

    fans
}

/// One-ring neighbor lists for every vertex, sorted and deduplicated.
pub fn vertex_neighbors(vertex_count: usize, faces: &[[u32; 3]]) -> Vec<Vec<u32>> {
    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); vertex_count];
    for face in faces {
        for (a, b) in face_edges(face) {
            neighbors[a as usize].push(b);
            neighbors[b as usize].push(a);
        }
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }
    neighbors
}
