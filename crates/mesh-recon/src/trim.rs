//! Density trimming: strip surface the samples do not support.
//!
//! Reconstruction always closes the surface, including across regions where
//! no samples exist. Vertices whose density is at or below the
//! `quantile`-th density value are removed together with every face that
//! uses them. Surface far from every sample has density exactly zero, so
//! ties at the threshold are trimmed as a block. This reopens the mesh along
//! the trimmed region; closing it again is the repairer's job.

use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};
use crate::types::Mesh;

/// Largest accepted trim quantile.
pub const MAX_TRIM_QUANTILE: f64 = 0.5;

/// Linear-interpolated quantile of `values` (`q` in `[0, 1]`).
///
/// Returns `None` for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let t = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * t)
}

/// Remove faces touching any vertex in the lowest `quantile` of `density`.
///
/// Vertices equal to the threshold go too, unless every vertex shares it.
/// A zero quantile removes nothing. Unreferenced vertices are dropped and
/// the rest renumbered in order.
///
/// # Errors
///
/// - [`MeshError::InvalidConfig`] if `quantile` is outside `[0, 0.5]`.
/// - [`MeshError::Format`] if `density` does not have one value per vertex.
pub fn trim(mesh: &Mesh, density: &[f64], quantile_q: f64) -> MeshResult<Mesh> {
    if !(0.0..=MAX_TRIM_QUANTILE).contains(&quantile_q) {
        return Err(MeshError::invalid_config(
            "trim_quantile",
            quantile_q,
            "must be in [0, 0.5]",
        ));
    }
    if density.len() != mesh.vertex_count() {
        return Err(MeshError::format(format!(
            "{} density values for {} vertices",
            density.len(),
            mesh.vertex_count()
        )));
    }

    let Some(threshold) = quantile(density, quantile_q) else {
        return Ok(mesh.clone());
    };
    let highest = density.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let inclusive = quantile_q > 0.0 && threshold < highest;
    let removed: Vec<bool> = density
        .iter()
        .map(|&d| d < threshold || (inclusive && d == threshold))
        .collect();
    let removed_vertices = removed.iter().filter(|&&r| r).count();

    let kept_faces: Vec<[u32; 3]> = mesh
        .faces
        .iter()
        .filter(|f| f.iter().all(|&v| !removed[v as usize]))
        .copied()
        .collect();

    let mut referenced = vec![false; mesh.vertex_count()];
    for face in &kept_faces {
        for &v in face {
            referenced[v as usize] = true;
        }
    }

    let mut remap = vec![u32::MAX; mesh.vertex_count()];
    let mut result = Mesh::with_capacity(mesh.vertex_count() - removed_vertices, kept_faces.len());
    for (old, vertex) in mesh.vertices.iter().enumerate() {
        if referenced[old] {
            remap[old] = result.vertices.len() as u32;
            result.vertices.push(vertex.clone());
        }
    }
    result.faces = kept_faces
        .iter()
        .map(|f| f.map(|v| remap[v as usize]))
        .collect();

    debug!(threshold, removed_vertices, "Density threshold");
    info!(
        quantile = quantile_q,
        faces_before = mesh.face_count(),
        faces_after = result.face_count(),
        "Trimmed low-density surface"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use approx::assert_relative_eq;

    fn strip(n: usize) -> Mesh {
        // Quad strip along X: vertices (i, 0) and (i, 1).
        let mut mesh = Mesh::new();
        for i in 0..=n {
            mesh.vertices.push(Vertex::from_coords(i as f64, 0.0, 0.0));
            mesh.vertices.push(Vertex::from_coords(i as f64, 1.0, 0.0));
        }
        for i in 0..n as u32 {
            let (a, b, c, d) = (2 * i, 2 * i + 1, 2 * i + 2, 2 * i + 3);
            mesh.faces.push([a, c, d]);
            mesh.faces.push([a, d, b]);
        }
        mesh
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_relative_eq!(quantile(&values, 0.0).unwrap(), 1.0);
        assert_relative_eq!(quantile(&values, 0.5).unwrap(), 3.0);
        assert_relative_eq!(quantile(&values, 0.125).unwrap(), 1.5);
        assert!(quantile(&[], 0.1).is_none());
    }

    #[test]
    fn test_zero_quantile_keeps_everything() {
        let mesh = strip(4);
        let density: Vec<f64> = (0..mesh.vertex_count()).map(|i| i as f64).collect();
        let trimmed = trim(&mesh, &density, 0.0).unwrap();
        assert_eq!(trimmed, mesh);
    }

    #[test]
    fn test_low_density_end_removed() {
        let mesh = strip(4);
        // The first column has the lowest density.
        let density: Vec<f64> = (0..mesh.vertex_count()).map(|i| (i / 2) as f64).collect();
        let trimmed = trim(&mesh, &density, 0.2).unwrap();

        assert_eq!(trimmed.face_count(), mesh.face_count() - 2);
        assert_eq!(trimmed.vertex_count(), mesh.vertex_count() - 2);
        assert!(trimmed.vertices.iter().all(|v| v.position.x >= 1.0));
        for face in &trimmed.faces {
            assert!(face.iter().all(|&v| (v as usize) < trimmed.vertex_count()));
        }
    }

    #[test]
    fn test_zero_density_ties_trimmed_together() {
        let mesh = strip(9);
        // Three unsupported columns share density zero; 1% lands on the tie.
        let density: Vec<f64> = (0..mesh.vertex_count())
            .map(|i| if i < 6 { 0.0 } else { 1.0 + i as f64 })
            .collect();
        let trimmed = trim(&mesh, &density, 0.01).unwrap();
        assert_eq!(trimmed.face_count(), mesh.face_count() - 6);
        assert!(trimmed.vertices.iter().all(|v| v.position.x >= 3.0));
    }

    #[test]
    fn test_uniform_density_keeps_everything() {
        let mesh = strip(4);
        let density = vec![0.5; mesh.vertex_count()];
        assert_eq!(trim(&mesh, &density, 0.3).unwrap(), mesh);
    }

    #[test]
    fn test_trim_never_adds_faces() {
        let mesh = strip(6);
        let density: Vec<f64> = (0..mesh.vertex_count()).map(|i| ((i * 7) % 5) as f64).collect();
        for q in [0.0, 0.1, 0.3, 0.5] {
            assert!(trim(&mesh, &density, q).unwrap().face_count() <= mesh.face_count());
        }
    }

    #[test]
    fn test_invalid_inputs() {
        let mesh = strip(2);
        let density = vec![1.0; mesh.vertex_count()];
        assert!(matches!(
            trim(&mesh, &density, 0.6),
            Err(MeshError::InvalidConfig { field: "trim_quantile", .. })
        ));
        assert!(matches!(
            trim(&mesh, &density[1..], 0.1),
            Err(MeshError::Format { .. })
        ));
    }
}
