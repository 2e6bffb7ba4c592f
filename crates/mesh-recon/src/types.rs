//! Core mesh data types.

use nalgebra::{Point3, Vector3};

/// RGB color with 8-bit components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl VertexColor {
    /// Create a new color from RGB components.
    #[inline]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create a color from floating point values in [0, 1] range.
    #[inline]
    pub fn from_float(r: f32, g: f32, b: f32) -> Self {
        Self {
            r: (r.clamp(0.0, 1.0) * 255.0).round() as u8,
            g: (g.clamp(0.0, 1.0) * 255.0).round() as u8,
            b: (b.clamp(0.0, 1.0) * 255.0).round() as u8,
        }
    }

    /// Convert to floating point values in [0, 1] range.
    #[inline]
    pub fn to_float(&self) -> (f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        )
    }
}

/// A mesh vertex with optional attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector.
    pub normal: Option<Vector3<f64>>,

    /// Vertex color (RGB).
    pub color: Option<VertexColor>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
            color: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }
}

/// A triangle mesh with indexed vertices and faces.
///
/// The mesh is a plain value: every pipeline stage takes one by value or
/// reference and hands back a new or modified one.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    /// Each face is [v0, v1, v2] with counter-clockwise winding seen from outside.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Whether any vertex carries a normal.
    pub fn has_normals(&self) -> bool {
        self.vertices.iter().any(|v| v.normal.is_some())
    }

    /// Whether any vertex carries a color.
    pub fn has_colors(&self) -> bool {
        self.vertices.iter().any(|v| v.color.is_some())
    }

    /// Compute the axis-aligned bounding box.
    /// Returns (min_corner, max_corner) or None if mesh is empty.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        bounds_of(self.vertices.iter().map(|v| &v.position))
    }

    /// Iterate over triangles, yielding Triangle structs with actual vertex data.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Flip the winding of every face.
    pub fn flip_all_faces(&mut self) {
        for face in &mut self.faces {
            face.swap(1, 2);
        }
        for vertex in &mut self.vertices {
            if let Some(n) = vertex.normal.as_mut() {
                *n = -*n;
            }
        }
    }

    /// Compute the signed volume of the mesh.
    ///
    /// Sum of signed tetrahedra formed by each face and the origin. Positive
    /// for a closed mesh with outward-facing winding, negative when inside-out,
    /// meaningless for open meshes.
    pub fn signed_volume(&self) -> f64 {
        let mut volume = 0.0;

        for &[i0, i1, i2] in &self.faces {
            let v0 = &self.vertices[i0 as usize].position;
            let v1 = &self.vertices[i1 as usize].position;
            let v2 = &self.vertices[i2 as usize].position;
            volume += v0.coords.dot(&v1.coords.cross(&v2.coords));
        }

        volume / 6.0
    }

    /// Absolute enclosed volume (closed meshes only).
    #[inline]
    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    /// Check if the mesh appears to be inside-out (negative signed volume).
    #[inline]
    pub fn is_inside_out(&self) -> bool {
        self.signed_volume() < 0.0
    }

    /// Compute the total surface area of the mesh.
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|tri| tri.area()).sum()
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// Axis-aligned bounds of a set of points.
pub(crate) fn bounds_of<'a>(
    mut points: impl Iterator<Item = &'a Point3<f64>>,
) -> Option<(Point3<f64>, Point3<f64>)> {
    let first = points.next()?;
    let mut min = *first;
    let mut max = *first;

    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        min.z = min.z.min(p.z);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
        max.z = max.z.max(p.z);
    }

    Some((min, max))
}

/// A triangle with concrete vertex positions.
///
/// Winding is counter-clockwise when viewed from the front (normal points
/// toward viewer).
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the (unnormalized) face normal via cross product.
    /// Length equals twice the triangle area.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        e1.cross(&e2)
    }

    /// Compute the unit face normal.
    /// Returns None for degenerate triangles (zero area).
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let n = self.normal_unnormalized();
        let len_sq = n.norm_squared();
        if len_sq > f64::EPSILON * f64::EPSILON {
            Some(n / len_sq.sqrt())
        } else {
            None
        }
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Length of the longest edge; bounds rasterization step counts.
    pub fn max_edge_length(&self) -> f64 {
        (self.v1 - self.v0)
            .norm()
            .max((self.v2 - self.v1).norm())
            .max((self.v0 - self.v2).norm())
    }
}
