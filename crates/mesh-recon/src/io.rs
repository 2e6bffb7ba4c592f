//! Mesh file I/O for OBJ, PLY and STL.
//!
//! Export serializes into memory first ([`export`]); [`save`] writes those
//! bytes to disk. Loading exists so exported meshes can be checked and so
//! the CLI can validate and repair existing files.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::pointcloud::{ply_float, ply_u8};
use crate::tracing_ext::log_io_operation;
use crate::types::{Mesh, Vertex, VertexColor};
use crate::validate::check_mesh_data;

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "lowercase"))]
pub enum MeshFormat {
    #[default]
    Obj,
    Ply,
    Stl,
}

impl MeshFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// Canonical lowercase file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            MeshFormat::Obj => "obj",
            MeshFormat::Ply => "ply",
            MeshFormat::Stl => "stl",
        }
    }
}

impl FromStr for MeshFormat {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "obj" => Ok(MeshFormat::Obj),
            "ply" => Ok(MeshFormat::Ply),
            "stl" => Ok(MeshFormat::Stl),
            _ => Err(MeshError::unsupported_format(Some(s.to_string()))),
        }
    }
}

impl std::fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// PLY body encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum PlyEncoding {
    #[default]
    Ascii,
    BinaryLittleEndian,
}

/// `<output_dir>/<input stem>_watertight.<ext>`.
///
/// The extension always matches `format`, whatever the input's was.
pub fn output_path_for(input: &Path, output_dir: &Path, format: MeshFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("mesh");
    output_dir.join(format!("{stem}_watertight.{}", format.extension()))
}

// ============================================================================
// Export
// ============================================================================

/// Serialize a mesh. PLY uses the ASCII encoding.
///
/// # Errors
///
/// [`MeshError::Export`] if a face references a missing vertex or the
/// encoder fails.
pub fn export(mesh: &Mesh, format: MeshFormat) -> MeshResult<Vec<u8>> {
    export_with(mesh, format, PlyEncoding::Ascii)
}

/// Serialize a mesh, choosing the PLY encoding.
pub fn export_with(mesh: &Mesh, format: MeshFormat, ply: PlyEncoding) -> MeshResult<Vec<u8>> {
    match format {
        MeshFormat::Obj => export_obj(mesh),
        MeshFormat::Ply => export_ply(mesh, ply),
        MeshFormat::Stl => export_stl(mesh),
    }
}

fn check_exportable(mesh: &Mesh, format: &'static str) -> MeshResult<()> {
    check_mesh_data(mesh).map_err(|e| MeshError::export(format, e.to_string()))
}

/// ASCII OBJ with `v`, `vn` and `f` lines.
///
/// Colors are written as the common `v x y z r g b` extension. Normals
/// share the vertex index, so faces are written as `f a//a b//b c//c`.
pub fn export_obj(mesh: &Mesh) -> MeshResult<Vec<u8>> {
    check_exportable(mesh, "obj")?;
    let err = |e: std::io::Error| MeshError::export("obj", e.to_string());

    let has_normals = mesh.has_normals();
    let has_colors = mesh.has_colors();
    let mut out = Vec::with_capacity(mesh.vertex_count() * 48 + mesh.face_count() * 24);

    writeln!(out, "# Vertices: {}", mesh.vertex_count()).map_err(err)?;
    writeln!(out, "# Faces: {}", mesh.face_count()).map_err(err)?;

    for v in &mesh.vertices {
        let p = &v.position;
        match (has_colors, v.color) {
            (true, Some(c)) => {
                let (r, g, b) = c.to_float();
                writeln!(out, "v {} {} {} {r:.6} {g:.6} {b:.6}", p.x, p.y, p.z)
            }
            (true, None) => writeln!(out, "v {} {} {} 1 1 1", p.x, p.y, p.z),
            _ => writeln!(out, "v {} {} {}", p.x, p.y, p.z),
        }
        .map_err(err)?;
    }

    if has_normals {
        for v in &mesh.vertices {
            let n = v.normal.unwrap_or_else(Vector3::zeros);
            writeln!(out, "vn {:.6} {:.6} {:.6}", n.x, n.y, n.z).map_err(err)?;
        }
    }

    for face in &mesh.faces {
        let [a, b, c] = face.map(|i| i + 1);
        if has_normals {
            writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}").map_err(err)?;
        } else {
            writeln!(out, "f {a} {b} {c}").map_err(err)?;
        }
    }

    Ok(out)
}

/// PLY with `x y z` as doubles, optional float `nx ny nz` and uchar
/// `red green blue`.
pub fn export_ply(mesh: &Mesh, encoding: PlyEncoding) -> MeshResult<Vec<u8>> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };
    use ply_rs::writer::Writer;

    check_exportable(mesh, "ply")?;

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = match encoding {
        PlyEncoding::Ascii => Encoding::Ascii,
        PlyEncoding::BinaryLittleEndian => Encoding::BinaryLittleEndian,
    };

    let has_normals = mesh.has_normals();
    let has_colors = mesh.has_colors();
    let scalar = |name: &str, ty: ScalarType| {
        PropertyDef::new(name.to_string(), PropertyType::Scalar(ty))
    };

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        vertex_def.properties.add(scalar(name, ScalarType::Double));
    }
    if has_normals {
        for name in ["nx", "ny", "nz"] {
            vertex_def.properties.add(scalar(name, ScalarType::Float));
        }
    }
    if has_colors {
        for name in ["red", "green", "blue"] {
            vertex_def.properties.add(scalar(name, ScalarType::UChar));
        }
    }
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    ply.header.elements.add(face_def);

    let vertices: Vec<DefaultElement> = mesh
        .vertices
        .iter()
        .map(|v| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Double(v.position.x));
            element.insert("y".to_string(), Property::Double(v.position.y));
            element.insert("z".to_string(), Property::Double(v.position.z));
            if has_normals {
                let n = v.normal.unwrap_or_else(Vector3::zeros);
                element.insert("nx".to_string(), Property::Float(n.x as f32));
                element.insert("ny".to_string(), Property::Float(n.y as f32));
                element.insert("nz".to_string(), Property::Float(n.z as f32));
            }
            if has_colors {
                let c = v.color.unwrap_or(VertexColor::new(255, 255, 255));
                element.insert("red".to_string(), Property::UChar(c.r));
                element.insert("green".to_string(), Property::UChar(c.g));
                element.insert("blue".to_string(), Property::UChar(c.b));
            }
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    let faces: Vec<DefaultElement> = mesh
        .faces
        .iter()
        .map(|face| {
            let mut element = DefaultElement::new();
            element.insert(
                "vertex_indices".to_string(),
                Property::ListInt(face.iter().map(|&i| i as i32).collect()),
            );
            element
        })
        .collect();
    ply.payload.insert("face".to_string(), faces);

    ply.make_consistent()
        .map_err(|e| MeshError::export("ply", format!("inconsistent header: {e:?}")))?;

    let writer = Writer::<DefaultElement>::new();
    let mut out = Vec::new();
    match encoding {
        PlyEncoding::Ascii => writer.write_ply(&mut out, &mut ply),
        PlyEncoding::BinaryLittleEndian => write_binary_ply(&writer, &mut out, &ply),
    }
    .map_err(|e| MeshError::export("ply", e.to_string()))?;
    Ok(out)
}

/// ply-rs writes an element's count as the length of every binary list
/// in it, so face lists go through a definition whose count is 3.
fn write_binary_ply(
    writer: &ply_rs::writer::Writer<ply_rs::ply::DefaultElement>,
    out: &mut Vec<u8>,
    ply: &ply_rs::ply::Ply<ply_rs::ply::DefaultElement>,
) -> std::io::Result<usize> {
    let mut written = writer.write_header(out, &ply.header)?;
    for (name, def) in &ply.header.elements {
        let Some(elements) = ply.payload.get(name) else {
            continue;
        };
        if name == "face" {
            let mut triangle = def.clone();
            triangle.count = 3;
            for element in elements {
                written += writer.write_little_endian_element(out, element, &triangle)?;
            }
        } else {
            written += writer.write_payload_of_element(out, elements, def, &ply.header)?;
        }
    }
    Ok(written)
}

/// Binary STL. Facet normals are recomputed from winding; vertex normals
/// and colors are not written.
pub fn export_stl(mesh: &Mesh) -> MeshResult<Vec<u8>> {
    check_exportable(mesh, "stl")?;

    let to_f32 = |p: &nalgebra::Point3<f64>| [p.x as f32, p.y as f32, p.z as f32];
    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles()
        .map(|tri| {
            let n = tri.normal().unwrap_or_else(Vector3::zeros);
            stl_io::Triangle {
                normal: stl_io::Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [
                    stl_io::Vertex::new(to_f32(&tri.v0)),
                    stl_io::Vertex::new(to_f32(&tri.v1)),
                    stl_io::Vertex::new(to_f32(&tri.v2)),
                ],
            }
        })
        .collect();

    let degenerate = mesh.triangles().filter(|t| t.normal().is_none()).count();
    if degenerate > 0 {
        warn!(degenerate, "Writing zero facet normals for degenerate triangles");
    }

    let mut out = Vec::with_capacity(84 + triangles.len() * 50);
    stl_io::write_stl(&mut out, triangles.iter())
        .map_err(|e| MeshError::export("stl", e.to_string()))?;
    Ok(out)
}

/// Export and write to `path`.
pub fn save(mesh: &Mesh, path: &Path, format: MeshFormat) -> MeshResult<()> {
    save_with(mesh, path, format, PlyEncoding::Ascii)
}

/// [`save`] with an explicit PLY encoding.
pub fn save_with(mesh: &Mesh, path: &Path, format: MeshFormat, ply: PlyEncoding) -> MeshResult<()> {
    let bytes = export_with(mesh, format, ply)?;
    let result = File::create(path)
        .and_then(|mut file| file.write_all(&bytes))
        .map_err(|e| MeshError::io_write(path, e));
    log_io_operation("save", path, format.extension(), result.is_ok());
    result?;

    info!(
        path = %path.display(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        bytes = bytes.len(),
        "Saved mesh"
    );
    Ok(())
}

// ============================================================================
// Import
// ============================================================================

/// Load a mesh from file, detecting the format from the extension.
pub fn load_mesh(path: &Path) -> MeshResult<Mesh> {
    let format = MeshFormat::from_path(path).ok_or_else(|| {
        MeshError::unsupported_format(path.extension().and_then(|e| e.to_str()).map(String::from))
    })?;

    let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
    let mesh = read_mesh(&mut BufReader::new(file), format, path);
    log_io_operation("load", path, format.extension(), mesh.is_ok());
    let mesh = mesh?;

    info!(
        path = %path.display(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Loaded mesh"
    );
    Ok(mesh)
}

/// Parse a mesh held in memory.
pub fn mesh_from_bytes(bytes: &[u8], format: MeshFormat) -> MeshResult<Mesh> {
    read_mesh(&mut Cursor::new(bytes), format, Path::new("<memory>"))
}

fn read_mesh<R: BufRead + Seek>(reader: &mut R, format: MeshFormat, path: &Path) -> MeshResult<Mesh> {
    let mesh = match format {
        MeshFormat::Obj => read_obj(reader, path)?,
        MeshFormat::Ply => read_ply(reader, path)?,
        MeshFormat::Stl => read_stl(reader, path)?,
    };
    check_mesh_data(&mesh)?;
    Ok(mesh)
}

fn read_stl(reader: &mut (impl Read + Seek), path: &Path) -> MeshResult<Mesh> {
    let stl = stl_io::read_stl(reader).map_err(|e| MeshError::parse_error(path, e.to_string()))?;

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());
    for v in &stl.vertices {
        mesh.vertices.push(Vertex::from_coords(
            v.0[0] as f64,
            v.0[1] as f64,
            v.0[2] as f64,
        ));
    }
    for face in &stl.faces {
        mesh.faces.push(face.vertices.map(|i| i as u32));
    }

    debug!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Parsed STL"
    );
    Ok(mesh)
}

/// tobj numbers vertices by first use in the face list, so the loaded
/// vertex order can differ from the file's `v` lines. Faces keep their
/// geometry.
fn read_obj(reader: &mut impl BufRead, path: &Path) -> MeshResult<Mesh> {
    let (models, _materials) = tobj::load_obj_buf(
        reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| Err(tobj::LoadError::OpenFileFailed),
    )
    .map_err(|e| MeshError::parse_error(path, e.to_string()))?;

    let mut mesh = Mesh::new();
    for model in &models {
        let obj = &model.mesh;
        let offset = mesh.vertices.len() as u32;

        for (i, p) in obj.positions.chunks_exact(3).enumerate() {
            let mut vertex = Vertex::from_coords(p[0] as f64, p[1] as f64, p[2] as f64);
            if let Some(n) = obj.normals.get(3 * i..3 * i + 3) {
                vertex.normal = Some(Vector3::new(n[0] as f64, n[1] as f64, n[2] as f64));
            }
            if let Some(c) = obj.vertex_color.get(3 * i..3 * i + 3) {
                vertex.color = Some(VertexColor::from_float(c[0], c[1], c[2]));
            }
            mesh.vertices.push(vertex);
        }
        mesh.faces.extend(
            obj.indices
                .chunks_exact(3)
                .map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]),
        );
    }

    debug!(
        models = models.len(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Parsed OBJ"
    );
    Ok(mesh)
}

fn read_ply(reader: &mut impl BufRead, path: &Path) -> MeshResult<Mesh> {
    use ply_rs::parser::Parser;
    use ply_rs::ply::Property;

    let ply = Parser::<ply_rs::ply::DefaultElement>::new()
        .read_ply(reader)
        .map_err(|e| MeshError::parse_error(path, format!("PLY parse error: {e:?}")))?;

    let mut mesh = Mesh::new();

    if let Some(vertices) = ply.payload.get("vertex") {
        mesh.vertices.reserve(vertices.len());
        for (i, element) in vertices.iter().enumerate() {
            let coord = |name: &str| {
                ply_float(element.get(name)).ok_or_else(|| {
                    MeshError::parse_error(path, format!("vertex {i} is missing property '{name}'"))
                })
            };
            let mut vertex = Vertex::from_coords(coord("x")?, coord("y")?, coord("z")?);

            if let (Some(nx), Some(ny), Some(nz)) = (
                ply_float(element.get("nx")),
                ply_float(element.get("ny")),
                ply_float(element.get("nz")),
            ) {
                vertex.normal = Some(Vector3::new(nx, ny, nz));
            }
            if let (Some(r), Some(g), Some(b)) = (
                ply_u8(element.get("red")),
                ply_u8(element.get("green")),
                ply_u8(element.get("blue")),
            ) {
                vertex.color = Some(VertexColor::new(r, g, b));
            }
            mesh.vertices.push(vertex);
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for (i, element) in faces.iter().enumerate() {
            let list = element
                .get("vertex_indices")
                .or_else(|| element.get("vertex_index"));
            let indices: Vec<u32> = match list {
                Some(Property::ListInt(l)) => l.iter().map(|&v| v as u32).collect(),
                Some(Property::ListUInt(l)) => l.clone(),
                Some(Property::ListShort(l)) => l.iter().map(|&v| v as u32).collect(),
                Some(Property::ListUShort(l)) => l.iter().map(|&v| v as u32).collect(),
                Some(Property::ListUChar(l)) => l.iter().map(|&v| v as u32).collect(),
                _ => {
                    return Err(MeshError::parse_error(
                        path,
                        format!("face {i} has no vertex index list"),
                    ));
                }
            };
            // Fan-triangulate polygons.
            for k in 1..indices.len().saturating_sub(1) {
                mesh.faces.push([indices[0], indices[k], indices[k + 1]]);
            }
        }
    }

    debug!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Parsed PLY"
    );
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use tempfile::TempDir;

    fn tetrahedron() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.5, 0.866025, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.5, 0.288675, 0.816497));
        mesh.faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        mesh
    }

    fn decorated_tetrahedron() -> Mesh {
        let mut mesh = tetrahedron();
        crate::repair::compute_vertex_normals(&mut mesh);
        for (i, v) in mesh.vertices.iter_mut().enumerate() {
            v.color = Some(VertexColor::new(10 * i as u8, 200, 255));
        }
        mesh
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(MeshFormat::from_path(Path::new("a.obj")), Some(MeshFormat::Obj));
        assert_eq!(MeshFormat::from_path(Path::new("a.PLY")), Some(MeshFormat::Ply));
        assert_eq!(MeshFormat::from_path(Path::new("a.Stl")), Some(MeshFormat::Stl));
        assert_eq!(MeshFormat::from_path(Path::new("a.3mf")), None);
        assert_eq!(MeshFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_output_path_for() {
        let path = output_path_for(Path::new("/in/scan.ply"), Path::new("/out"), MeshFormat::Stl);
        assert_eq!(path, PathBuf::from("/out/scan_watertight.stl"));
        let path = output_path_for(Path::new("cloud.xyz"), Path::new("."), MeshFormat::Obj);
        assert_eq!(path, PathBuf::from("./cloud_watertight.obj"));
    }

    #[test]
    fn test_ply_binary_round_trip() {
        let mesh = decorated_tetrahedron();
        let bytes = export_ply(&mesh, PlyEncoding::BinaryLittleEndian).unwrap();
        assert!(bytes.starts_with(b"ply\n"));

        // Each face record is a uchar length of 3 and three ints.
        let body = bytes
            .windows(11)
            .position(|w| w == b"end_header\n")
            .unwrap()
            + 11;
        let faces_at = body + mesh.vertex_count() * (3 * 8 + 3 * 4 + 3);
        assert_eq!(bytes.len(), faces_at + mesh.face_count() * 13);
        assert_eq!(bytes[faces_at], 3);

        let loaded = mesh_from_bytes(&bytes, MeshFormat::Ply).unwrap();
        assert_eq!(loaded.vertex_count(), mesh.vertex_count());
        assert_eq!(loaded.faces, mesh.faces);
        for (a, b) in mesh.vertices.iter().zip(&loaded.vertices) {
            assert!((a.position - b.position).norm() < 1e-12);
            assert_eq!(a.color, b.color);
            let (na, nb) = (a.normal.unwrap(), b.normal.unwrap());
            assert!((na - nb).norm() < 1e-6);
        }
    }

    #[test]
    fn test_ply_ascii_round_trip() {
        let mesh = tetrahedron();
        let bytes = export_ply(&mesh, PlyEncoding::Ascii).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("format ascii 1.0"));
        assert!(!text.contains("property float nx"));

        let loaded = mesh_from_bytes(&bytes, MeshFormat::Ply).unwrap();
        assert_eq!(loaded.faces, mesh.faces);
        for (a, b) in mesh.vertices.iter().zip(&loaded.vertices) {
            assert!((a.position - b.position).norm() < 1e-6);
        }
    }

    #[test]
    fn test_obj_round_trip_keeps_normals_and_colors() {
        let mesh = decorated_tetrahedron();
        let bytes = export_obj(&mesh).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("vn ")).count(), 4);
        assert!(text.contains("f 1//1 3//3 2//2"));

        let loaded = mesh_from_bytes(&bytes, MeshFormat::Obj).unwrap();
        assert_eq!(loaded.vertex_count(), 4);
        assert_eq!(loaded.face_count(), 4);
        assert!(loaded.has_normals());
        // Vertices come back renumbered by first use; compare corner by corner.
        for (fa, fb) in mesh.faces.iter().zip(&loaded.faces) {
            for (&ia, &ib) in fa.iter().zip(fb) {
                let (a, b) = (&mesh.vertices[ia as usize], &loaded.vertices[ib as usize]);
                assert!((a.position - b.position).norm() < 1e-6);
                assert!((a.normal.unwrap() - b.normal.unwrap()).norm() < 1e-5);
                assert_eq!(a.color, b.color);
            }
        }
    }

    #[test]
    fn test_stl_layout_and_facet_normals() {
        let mut mesh = tetrahedron();
        for v in &mut mesh.vertices {
            // Vertex normals must not leak into facet records.
            v.normal = Some(Vector3::new(0.0, 0.0, 1.0));
            v.color = Some(VertexColor::new(1, 2, 3));
        }
        let bytes = export_stl(&mesh).unwrap();
        assert_eq!(bytes.len(), 84 + 50 * 4);
        assert_eq!(u32::from_le_bytes(bytes[80..84].try_into().unwrap()), 4);

        let read_f32 = |at: usize| f32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        // First facet is the bottom face [0, 2, 1], facing -Z.
        assert_relative_eq!(read_f32(84), 0.0, epsilon = 1e-6);
        assert_relative_eq!(read_f32(88), 0.0, epsilon = 1e-6);
        assert_relative_eq!(read_f32(92), -1.0, epsilon = 1e-6);

        let loaded = mesh_from_bytes(&bytes, MeshFormat::Stl).unwrap();
        assert_eq!(loaded.face_count(), 4);
        assert_eq!(loaded.vertex_count(), 4);
        assert!(!loaded.has_colors());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tet.ply");
        save(&tetrahedron(), &path, MeshFormat::Ply).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("format ascii 1.0"));
        let loaded = load_mesh(&path).unwrap();
        assert_eq!(loaded.face_count(), 4);
        let (min, max) = loaded.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_relative_eq!(max.z, 0.816497, epsilon = 1e-12);
    }

    #[test]
    fn test_ply_polygon_fan_triangulated() {
        let text = "ply\nformat ascii 1.0\nelement vertex 4\nproperty float x\n\
                    property float y\nproperty float z\nelement face 1\n\
                    property list uchar int vertex_indices\nend_header\n\
                    0 0 0\n1 0 0\n1 1 0\n0 1 0\n4 0 1 2 3\n";
        let mesh = mesh_from_bytes(text.as_bytes(), MeshFormat::Ply).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let text = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\n\
                    property float y\nproperty float z\nelement face 1\n\
                    property list uchar int vertex_indices\nend_header\n\
                    0 0 0\n1 0 0\n0 1 0\n3 0 1 7\n";
        assert!(matches!(
            mesh_from_bytes(text.as_bytes(), MeshFormat::Ply),
            Err(MeshError::Format { .. })
        ));

        let mut mesh = tetrahedron();
        mesh.faces.push([0, 1, 9]);
        assert!(matches!(
            export(&mesh, MeshFormat::Obj),
            Err(MeshError::Export { format: "obj", .. })
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mesh.3mf");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            load_mesh(&path),
            Err(MeshError::UnsupportedFormat { .. })
        ));
        assert!("gltf".parse::<MeshFormat>().is_err());
    }
}
