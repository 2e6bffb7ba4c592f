//! Mesh certification.
//!
//! [`validate`] measures a mesh rather than trusting the stages before it.
//! A mesh is watertight when it is a single closed 2-manifold component
//! with consistent, outward winding.

use nalgebra::Point3;
use tracing::{debug, warn};

use crate::adjacency::MeshAdjacency;
use crate::components::find_connected_components;
use crate::error::{MeshError, MeshResult};
use crate::types::Mesh;
use crate::winding::is_consistently_oriented;

/// Validation report for a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// Closed, manifold, one component, consistently and outwardly wound.
    pub is_watertight: bool,

    /// No edge with more than two faces and no pinched vertex.
    pub is_manifold: bool,

    /// No boundary edges.
    pub is_closed: bool,

    /// Every interior edge is traversed once in each direction.
    pub is_consistently_oriented: bool,

    /// Negative signed volume.
    pub is_inside_out: bool,

    pub vertex_count: usize,
    pub face_count: usize,

    /// Edges with exactly one face.
    pub boundary_edge_count: usize,

    /// Edges with more than two faces.
    pub non_manifold_edge_count: usize,

    /// Vertices whose faces form more than one fan.
    pub non_manifold_vertex_count: usize,

    pub component_count: usize,

    /// Bounding box as (min_corner, max_corner).
    pub bounds: Option<(Point3<f64>, Point3<f64>)>,

    /// Only meaningful when closed.
    pub volume: f64,

    pub surface_area: f64,
}

impl ValidationReport {
    /// Single closed manifold component, ignoring orientation.
    pub fn is_closed_manifold(&self) -> bool {
        self.is_closed && self.is_manifold && self.component_count == 1
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "NO" };

        writeln!(f, "Validation Report:")?;
        writeln!(f, "  Vertices: {}", self.vertex_count)?;
        writeln!(f, "  Faces: {}", self.face_count)?;
        writeln!(f, "  Components: {}", self.component_count)?;
        if let Some((min, max)) = &self.bounds {
            writeln!(
                f,
                "  Bounds: [{:.3}, {:.3}, {:.3}] to [{:.3}, {:.3}, {:.3}]",
                min.x, min.y, min.z, max.x, max.y, max.z
            )?;
        }
        writeln!(f, "  Surface Area: {:.4}", self.surface_area)?;
        writeln!(f, "  Volume: {:.4}", self.volume)?;
        writeln!(
            f,
            "  Closed: {} (boundary edges: {})",
            yes_no(self.is_closed),
            self.boundary_edge_count
        )?;
        writeln!(
            f,
            "  Manifold: {} (non-manifold edges: {}, vertices: {})",
            yes_no(self.is_manifold),
            self.non_manifold_edge_count,
            self.non_manifold_vertex_count
        )?;
        writeln!(
            f,
            "  Orientation: {}",
            if !self.is_consistently_oriented {
                "INCONSISTENT"
            } else if self.is_inside_out {
                "INSIDE-OUT"
            } else {
                "outward"
            }
        )?;
        write!(f, "  Watertight: {}", yes_no(self.is_watertight))
    }
}

/// Measure `mesh` and report whether it is watertight.
///
/// Out-of-range face indices make every structural flag false.
///
/// # Example
///
/// ```
/// use mesh_recon::{Mesh, Vertex, validate};
///
/// let mut mesh = Mesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
///
/// let report = validate(&mesh);
/// assert!(!report.is_watertight);
/// assert_eq!(report.boundary_edge_count, 3);
/// ```
pub fn validate(mesh: &Mesh) -> ValidationReport {
    if let Err(e) = check_mesh_data(mesh) {
        warn!(error = %e, "Mesh data is invalid");
        return ValidationReport {
            is_watertight: false,
            is_manifold: false,
            is_closed: false,
            is_consistently_oriented: false,
            is_inside_out: false,
            vertex_count: mesh.vertex_count(),
            face_count: mesh.face_count(),
            boundary_edge_count: 0,
            non_manifold_edge_count: 0,
            non_manifold_vertex_count: 0,
            component_count: 0,
            bounds: None,
            volume: 0.0,
            surface_area: 0.0,
        };
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let boundary_edge_count = adjacency.boundary_edge_count();
    let non_manifold_edge_count = adjacency.non_manifold_edge_count();
    let non_manifold_vertex_count = adjacency.non_manifold_vertices(&mesh.faces).len();
    let component_count = find_connected_components(mesh).component_count;
    let is_consistently_oriented = is_consistently_oriented(&mesh.faces);

    let signed_volume = mesh.signed_volume();
    let is_closed = !mesh.faces.is_empty() && boundary_edge_count == 0;
    let is_manifold = non_manifold_edge_count == 0 && non_manifold_vertex_count == 0;
    let is_inside_out = is_closed && signed_volume < 0.0;

    let report = ValidationReport {
        is_watertight: is_closed
            && is_manifold
            && component_count == 1
            && is_consistently_oriented
            && !is_inside_out,
        is_manifold,
        is_closed,
        is_consistently_oriented,
        is_inside_out,
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        boundary_edge_count,
        non_manifold_edge_count,
        non_manifold_vertex_count,
        component_count,
        bounds: mesh.bounds(),
        volume: signed_volume.abs(),
        surface_area: mesh.surface_area(),
    };

    debug!("{}", report);
    report
}

/// Reject face indices past the vertex array and non-finite coordinates.
pub fn check_mesh_data(mesh: &Mesh) -> MeshResult<()> {
    let vertex_count = mesh.vertices.len();

    if let Some((vertex_idx, _)) = mesh
        .vertices
        .iter()
        .enumerate()
        .find(|(_, v)| !v.position.coords.iter().all(|c| c.is_finite()))
    {
        return Err(MeshError::format(format!(
            "vertex {vertex_idx} has a non-finite coordinate"
        )));
    }

    if let Some((face_idx, face)) = mesh
        .faces
        .iter()
        .enumerate()
        .find(|(_, f)| f.iter().any(|&v| v as usize >= vertex_count))
    {
        return Err(MeshError::format(format!(
            "face {face_idx} {face:?} references a vertex past {vertex_count}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;

    fn tetrahedron() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.5, 0.866025, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.5, 0.288675, 0.816497));
        mesh.faces.push([0, 2, 1]);
        mesh.faces.push([0, 1, 3]);
        mesh.faces.push([1, 2, 3]);
        mesh.faces.push([2, 0, 3]);
        mesh
    }

    #[test]
    fn test_watertight_tetrahedron() {
        let report = validate(&tetrahedron());
        assert!(report.is_watertight);
        assert!(report.is_manifold);
        assert!(report.is_consistently_oriented);
        assert!(!report.is_inside_out);
        assert_eq!(report.component_count, 1);
        assert!(report.volume > 0.0);
        assert!(report.surface_area > 0.0);
    }

    #[test]
    fn test_open_mesh() {
        let mut mesh = tetrahedron();
        mesh.faces.pop();
        let report = validate(&mesh);
        assert!(!report.is_watertight);
        assert!(!report.is_closed);
        assert!(report.is_manifold);
        assert_eq!(report.boundary_edge_count, 3);
    }

    #[test]
    fn test_inside_out_is_not_watertight() {
        let mut mesh = tetrahedron();
        mesh.flip_all_faces();
        let report = validate(&mesh);
        assert!(report.is_closed_manifold());
        assert!(report.is_consistently_oriented);
        assert!(report.is_inside_out);
        assert!(!report.is_watertight);
    }

    #[test]
    fn test_inconsistent_winding() {
        let mut mesh = tetrahedron();
        mesh.faces[1] = [0, 3, 1];
        let report = validate(&mesh);
        assert!(!report.is_consistently_oriented);
        assert!(!report.is_watertight);
    }

    #[test]
    fn test_two_components_not_watertight() {
        let mut mesh = tetrahedron();
        let offset = mesh.vertices.len() as u32;
        let copy: Vec<_> = mesh
            .vertices
            .iter()
            .map(|v| Vertex::from_coords(v.position.x + 5.0, v.position.y, v.position.z))
            .collect();
        mesh.vertices.extend(copy);
        let faces: Vec<_> = mesh.faces.iter().map(|f| f.map(|v| v + offset)).collect();
        mesh.faces.extend(faces);

        let report = validate(&mesh);
        assert!(report.is_closed);
        assert!(report.is_manifold);
        assert_eq!(report.component_count, 2);
        assert!(!report.is_watertight);
    }

    #[test]
    fn test_pinched_vertex_not_manifold() {
        let mut mesh = tetrahedron();
        let offset = mesh.vertices.len() as u32 - 1;
        let copy: Vec<_> = mesh.vertices[..3]
            .iter()
            .map(|v| Vertex::from_coords(v.position.x, v.position.y, -v.position.z - 0.5))
            .collect();
        mesh.vertices.extend(copy);
        // Second tetrahedron reusing vertex 3 as its apex.
        let remap = |v: u32| if v == 3 { 3 } else { v + offset + 1 };
        let faces: Vec<_> = [[0, 1, 2], [0, 3, 1], [1, 3, 2], [2, 3, 0]]
            .iter()
            .map(|f: &[u32; 3]| f.map(remap))
            .collect();
        mesh.faces.extend(faces);

        let report = validate(&mesh);
        assert_eq!(report.non_manifold_edge_count, 0);
        assert_eq!(report.non_manifold_vertex_count, 1);
        assert!(!report.is_manifold);
    }

    #[test]
    fn test_invalid_index_reported_not_panicking() {
        let mut mesh = tetrahedron();
        mesh.faces.push([0, 1, 99]);
        let report = validate(&mesh);
        assert!(!report.is_watertight);
        assert!(check_mesh_data(&mesh).is_err());
    }

    #[test]
    fn test_nan_rejected() {
        let mut mesh = tetrahedron();
        mesh.vertices[0].position.x = f64::NAN;
        assert!(matches!(
            check_mesh_data(&mesh),
            Err(MeshError::Format { .. })
        ));
    }

    #[test]
    fn test_empty_mesh() {
        let report = validate(&Mesh::new());
        assert!(!report.is_watertight);
        assert_eq!(report.face_count, 0);
    }

    #[test]
    fn test_report_display() {
        let text = validate(&tetrahedron()).to_string();
        assert!(text.contains("Watertight: yes"));
        assert!(text.contains("Faces: 4"));
    }
}
