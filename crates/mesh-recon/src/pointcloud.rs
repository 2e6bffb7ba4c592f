//! Point cloud loading, validation, and normal estimation.
//!
//! This is the first pipeline stage. It provides:
//!
//! - [`PointCloud`] for storing 3D samples with optional normals and colors
//! - Validation ([`PointCloud::from_points`]) rejecting non-finite data and
//!   mismatched attributes
//! - File loading for PLY (ASCII or binary) and XYZ text
//! - PCA normal estimation over k nearest neighbors, oriented toward the
//!   capturing viewpoint
//! - Statistical outlier removal
//!
//! # Example
//!
//! ```no_run
//! use mesh_recon::pointcloud::{NormalParams, PointCloud};
//!
//! let cloud = PointCloud::load("scan.xyz")?;
//! let cloud = cloud.with_estimated_normals(&NormalParams::default())?;
//! assert!(cloud.has_normals());
//! # Ok::<(), mesh_recon::MeshError>(())
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use nalgebra::{Matrix3, Point3, Vector3};
use ply_rs::ply::Property;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::types::{VertexColor, bounds_of};

/// Fewest points from which local planes can be fitted.
pub const MIN_POINTS: usize = 10;

/// Relative tolerance on normal length before it is considered malformed.
const NORMAL_UNIT_TOLERANCE: f64 = 1e-3;

/// A point in the cloud with optional attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudPoint {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector (estimated or from the source).
    pub normal: Option<Vector3<f64>>,

    /// Point color (RGB).
    pub color: Option<VertexColor>,
}

impl CloudPoint {
    /// Create a point with only position.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
            color: None,
        }
    }

    /// Create a point from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a point with position and normal.
    #[inline]
    pub fn with_normal(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal: Some(normal),
            color: None,
        }
    }
}

/// Where estimated normals should point.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum NormalOrientation {
    /// Toward a known camera position.
    TowardViewpoint([f64; 3]),
    /// Toward a camera assumed on +Z above the cloud, two bounding-box
    /// diagonals from the centroid.
    Auto,
    /// Away from the centroid. Only meaningful for roughly convex, fully
    /// sampled objects.
    AwayFromCentroid,
}

/// Parameters for normal estimation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct NormalParams {
    /// Neighbors used for each local plane fit.
    pub k: usize,

    /// Orientation rule applied after fitting.
    pub orientation: NormalOrientation,
}

impl Default for NormalParams {
    fn default() -> Self {
        Self {
            k: 30,
            orientation: NormalOrientation::Auto,
        }
    }
}

/// A collection of 3D points with optional attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    /// The points in the cloud.
    pub points: Vec<CloudPoint>,
}

impl PointCloud {
    /// Create a new empty point cloud.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Build a validated cloud from parallel attribute arrays.
    ///
    /// Fails with [`MeshError::Format`] on non-finite coordinates, zero-length
    /// normals, or attribute arrays whose length differs from `positions`, and
    /// with [`MeshError::InsufficientData`] below [`MIN_POINTS`] points.
    pub fn from_points(
        positions: &[Point3<f64>],
        normals: Option<&[Vector3<f64>]>,
        colors: Option<&[VertexColor]>,
    ) -> MeshResult<Self> {
        if let Some(normals) = normals
            && normals.len() != positions.len()
        {
            return Err(MeshError::format(format!(
                "{} normals supplied for {} points",
                normals.len(),
                positions.len()
            )));
        }
        if let Some(colors) = colors
            && colors.len() != positions.len()
        {
            return Err(MeshError::format(format!(
                "{} colors supplied for {} points",
                colors.len(),
                positions.len()
            )));
        }

        let points = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| CloudPoint {
                position,
                normal: normals.map(|n| n[i]),
                color: colors.map(|c| c[i]),
            })
            .collect();

        let mut cloud = Self { points };
        cloud.validate()?;
        Ok(cloud)
    }

    /// Check the cloud invariants, normalizing near-unit normals in place.
    pub fn validate(&mut self) -> MeshResult<()> {
        let with_normals = self.points.iter().filter(|p| p.normal.is_some()).count();
        if with_normals != 0 && with_normals != self.points.len() {
            return Err(MeshError::format(format!(
                "{} of {} points carry normals; normals must be all or none",
                with_normals,
                self.points.len()
            )));
        }
        let with_colors = self.points.iter().filter(|p| p.color.is_some()).count();
        if with_colors != 0 && with_colors != self.points.len() {
            return Err(MeshError::format(format!(
                "{} of {} points carry colors; colors must be all or none",
                with_colors,
                self.points.len()
            )));
        }

        let mut renormalized = 0usize;
        for (i, point) in self.points.iter_mut().enumerate() {
            let p = point.position;
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                return Err(MeshError::format(format!(
                    "point {i} has non-finite coordinates ({}, {}, {})",
                    p.x, p.y, p.z
                )));
            }
            if let Some(n) = point.normal.as_mut() {
                let len = n.norm();
                if !len.is_finite() || len < 1e-12 {
                    return Err(MeshError::format(format!(
                        "point {i} has a zero or non-finite normal"
                    )));
                }
                if (len - 1.0).abs() > NORMAL_UNIT_TOLERANCE {
                    renormalized += 1;
                }
                *n /= len;
            }
        }
        if renormalized > 0 {
            debug!(renormalized, "Rescaled non-unit normals");
        }

        if self.points.len() < MIN_POINTS {
            return Err(MeshError::insufficient_data(self.points.len(), MIN_POINTS));
        }
        Ok(())
    }

    /// Number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Check if all points have normals.
    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some())
    }

    /// Check if any points have colors.
    pub fn has_colors(&self) -> bool {
        self.points.iter().any(|p| p.color.is_some())
    }

    /// Compute the axis-aligned bounding box.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        bounds_of(self.points.iter().map(|p| &p.position))
    }

    /// Compute the centroid of the point cloud.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }

        let sum: Vector3<f64> = self
            .points
            .iter()
            .map(|p| p.position.coords)
            .fold(Vector3::zeros(), |acc, v| acc + v);

        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Add a point to the cloud.
    #[inline]
    pub fn push(&mut self, point: CloudPoint) {
        self.points.push(point);
    }

    /// Add a point from coordinates.
    #[inline]
    pub fn push_coords(&mut self, x: f64, y: f64, z: f64) {
        self.points.push(CloudPoint::from_coords(x, y, z));
    }

    /// Load and validate a point cloud from file, detecting the format from
    /// the extension.
    pub fn load(path: impl AsRef<Path>) -> MeshResult<Self> {
        let path = path.as_ref();
        let format = PointCloudFormat::from_path(path).ok_or_else(|| {
            MeshError::unsupported_format(
                path.extension().and_then(|e| e.to_str()).map(String::from),
            )
        })?;

        info!(?path, ?format, "Loading point cloud");

        let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
        let mut reader = BufReader::new(file);
        let mut cloud = match format {
            PointCloudFormat::Ply => read_ply(&mut reader, path)?,
            PointCloudFormat::Xyz => read_xyz(reader, path)?,
        };
        cloud.validate()?;

        info!(
            points = cloud.len(),
            has_normals = cloud.has_normals(),
            has_colors = cloud.has_colors(),
            "Loaded point cloud"
        );

        Ok(cloud)
    }

    /// Parse and validate a point cloud held in memory.
    pub fn from_bytes(bytes: &[u8], format: PointCloudFormat) -> MeshResult<Self> {
        let path = Path::new("<memory>");
        let mut cloud = match format {
            PointCloudFormat::Ply => read_ply(&mut BufReader::new(bytes), path)?,
            PointCloudFormat::Xyz => read_xyz(BufReader::new(bytes), path)?,
        };
        cloud.validate()?;
        Ok(cloud)
    }

    /// Return a copy with normals estimated by local plane fitting.
    pub fn with_estimated_normals(&self, params: &NormalParams) -> MeshResult<Self> {
        let normals = estimate_normals(self, params)?;
        let mut result = self.clone();
        for (point, normal) in result.points.iter_mut().zip(normals) {
            point.normal = Some(normal);
        }
        Ok(result)
    }

    /// Remove statistical outliers.
    ///
    /// Points whose mean distance to their k nearest neighbors exceeds
    /// `mean + std_ratio * std` are removed.
    pub fn remove_outliers(&self, k: usize, std_ratio: f64) -> Self {
        if k == 0 || self.len() <= k {
            return self.clone();
        }

        let kdtree = build_kdtree(self);

        let mean_distances: Vec<f64> = self
            .points
            .par_iter()
            .map(|point| {
                let neighbors = kdtree
                    .nearest_n::<kiddo::SquaredEuclidean>(&to_array(&point.position), k + 1);
                let sum: f64 = neighbors.iter().skip(1).map(|n| n.distance.sqrt()).sum();
                sum / k as f64
            })
            .collect();

        let global_mean: f64 = mean_distances.iter().sum::<f64>() / mean_distances.len() as f64;
        let variance: f64 = mean_distances
            .iter()
            .map(|d| (d - global_mean).powi(2))
            .sum::<f64>()
            / mean_distances.len() as f64;
        let threshold = global_mean + std_ratio * variance.sqrt();

        let points: Vec<CloudPoint> = self
            .points
            .iter()
            .zip(&mean_distances)
            .filter(|&(_, &d)| d <= threshold)
            .map(|(p, _)| p.clone())
            .collect();

        debug!(
            removed = self.len() - points.len(),
            threshold, "Removed statistical outliers"
        );

        Self { points }
    }
}

// ============================================================================
// File formats
// ============================================================================

/// Supported point cloud file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointCloudFormat {
    /// PLY (Stanford Polygon File Format), ASCII or binary.
    Ply,
    /// XYZ (ASCII `x y z [nx ny nz] [r g b]` per line).
    Xyz,
}

impl PointCloudFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "ply" => Some(PointCloudFormat::Ply),
                "xyz" | "txt" | "pts" => Some(PointCloudFormat::Xyz),
                _ => None,
            })
    }
}

fn read_ply(reader: &mut impl BufRead, path: &Path) -> MeshResult<PointCloud> {
    use ply_rs::parser::Parser;

    let parser = Parser::<ply_rs::ply::DefaultElement>::new();
    let ply = parser
        .read_ply(reader)
        .map_err(|e| MeshError::parse_error(path, format!("PLY parse error: {e:?}")))?;

    let Some(vertices) = ply.payload.get("vertex") else {
        return Ok(PointCloud::new());
    };

    let mut cloud = PointCloud::with_capacity(vertices.len());
    for (i, element) in vertices.iter().enumerate() {
        let coord = |name: &str| {
            ply_float(element.get(name)).ok_or_else(|| {
                MeshError::parse_error(path, format!("vertex {i} is missing property '{name}'"))
            })
        };
        let mut point = CloudPoint::from_coords(coord("x")?, coord("y")?, coord("z")?);

        if let (Some(nx), Some(ny), Some(nz)) = (
            ply_float(element.get("nx")),
            ply_float(element.get("ny")),
            ply_float(element.get("nz")),
        ) {
            point.normal = Some(Vector3::new(nx, ny, nz));
        }

        if let (Some(r), Some(g), Some(b)) = (
            ply_u8(element.get("red")),
            ply_u8(element.get("green")),
            ply_u8(element.get("blue")),
        ) {
            point.color = Some(VertexColor::new(r, g, b));
        }

        cloud.push(point);
    }

    Ok(cloud)
}

pub(crate) fn ply_float(prop: Option<&Property>) -> Option<f64> {
    match prop? {
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        Property::Int(v) => Some(*v as f64),
        Property::UInt(v) => Some(*v as f64),
        Property::Short(v) => Some(*v as f64),
        Property::UShort(v) => Some(*v as f64),
        Property::Char(v) => Some(*v as f64),
        Property::UChar(v) => Some(*v as f64),
        _ => None,
    }
}

pub(crate) fn ply_u8(prop: Option<&Property>) -> Option<u8> {
    match prop? {
        Property::UChar(v) => Some(*v),
        Property::Char(v) => Some((*v).max(0) as u8),
        Property::UShort(v) => Some((*v).min(255) as u8),
        Property::Short(v) => Some((*v).clamp(0, 255) as u8),
        Property::UInt(v) => Some((*v).min(255) as u8),
        Property::Int(v) => Some((*v).clamp(0, 255) as u8),
        Property::Float(v) => Some((v * 255.0).clamp(0.0, 255.0).round() as u8),
        Property::Double(v) => Some((v * 255.0).clamp(0.0, 255.0).round() as u8),
        _ => None,
    }
}

fn read_xyz(reader: impl BufRead, path: &Path) -> MeshResult<PointCloud> {
    let mut cloud = PointCloud::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| MeshError::io_read(path, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let values: Vec<f64> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::parse::<f64>)
            .collect::<Result<_, _>>()
            .map_err(|e| {
                MeshError::parse_error(path, format!("line {}: {e}", line_num + 1))
            })?;

        let mut point = match values.len() {
            3 | 6 | 9 => CloudPoint::from_coords(values[0], values[1], values[2]),
            n => {
                return Err(MeshError::parse_error(
                    path,
                    format!(
                        "line {}: expected 3, 6 or 9 values (x y z [nx ny nz] [r g b]), found {n}",
                        line_num + 1
                    ),
                ));
            }
        };
        if values.len() >= 6 {
            point.normal = Some(Vector3::new(values[3], values[4], values[5]));
        }
        if values.len() == 9 {
            let channel = |v: f64| v.clamp(0.0, 255.0).round() as u8;
            point.color = Some(VertexColor::new(
                channel(values[6]),
                channel(values[7]),
                channel(values[8]),
            ));
        }

        cloud.push(point);
    }

    Ok(cloud)
}

// ============================================================================
// Neighborhood queries and normal estimation
// ============================================================================

#[inline]
pub(crate) fn to_array(p: &Point3<f64>) -> [f64; 3] {
    [p.x, p.y, p.z]
}

/// Build a KD-tree from the point cloud. Items are point indices.
///
/// The immutable tree balances on construction, so scans sampled on a
/// regular grid (many equal coordinates along one axis) are fine.
pub(crate) fn build_kdtree(cloud: &PointCloud) -> kiddo::ImmutableKdTree<f64, 3> {
    let positions: Vec<[f64; 3]> = cloud
        .points
        .iter()
        .map(|point| to_array(&point.position))
        .collect();
    kiddo::ImmutableKdTree::new_from_slice(&positions)
}

/// Mean distance from a point to its nearest neighbor.
///
/// Sampled on at most 2000 points for large clouds.
pub fn estimate_point_spacing(cloud: &PointCloud) -> f64 {
    if cloud.len() < 2 {
        return 1.0;
    }

    let kdtree = build_kdtree(cloud);
    let step = (cloud.len() / 2000).max(1);

    let (total, count) = cloud
        .points
        .iter()
        .step_by(step)
        .filter_map(|point| {
            let neighbors =
                kdtree.nearest_n::<kiddo::SquaredEuclidean>(&to_array(&point.position), 2);
            neighbors.get(1).map(|n| n.distance.sqrt())
        })
        .fold((0.0, 0usize), |(sum, n), d| (sum + d, n + 1));

    if count > 0 && total > 0.0 {
        total / count as f64
    } else {
        1.0
    }
}

/// Smallest-eigenvalue eigenvector of the covariance of `points`.
///
/// Returns the normal and the ratio of smallest to largest eigenvalue.
pub(crate) fn fit_plane(points: &[Point3<f64>]) -> Option<(Vector3<f64>, f64)> {
    if points.len() < 3 {
        return None;
    }
    let centroid: Vector3<f64> =
        points.iter().map(|p| p.coords).sum::<Vector3<f64>>() / points.len() as f64;

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }

    let eig = cov.symmetric_eigen();
    let (mut min_idx, mut max_val) = (0, eig.eigenvalues[0]);
    for i in 1..3 {
        if eig.eigenvalues[i] < eig.eigenvalues[min_idx] {
            min_idx = i;
        }
        max_val = max_val.max(eig.eigenvalues[i]);
    }
    if max_val <= 0.0 {
        return None;
    }

    let normal = eig.eigenvectors.column(min_idx).into_owned();
    let norm = normal.norm();
    (norm > 1e-12).then(|| (normal / norm, eig.eigenvalues[min_idx].max(0.0) / max_val))
}

/// Resolve the viewpoint used for orientation, if any.
fn resolve_viewpoint(cloud: &PointCloud, orientation: NormalOrientation) -> Option<Point3<f64>> {
    match orientation {
        NormalOrientation::TowardViewpoint([x, y, z]) => Some(Point3::new(x, y, z)),
        NormalOrientation::Auto => {
            let (min, max) = cloud.bounds()?;
            let centroid = cloud.centroid()?;
            let diagonal = (max - min).norm().max(f64::EPSILON);
            Some(centroid + Vector3::z() * (2.0 * diagonal))
        }
        NormalOrientation::AwayFromCentroid => None,
    }
}

/// Estimate one unit normal per point by PCA over its `k` nearest neighbors,
/// then orient per `params.orientation`.
pub fn estimate_normals(cloud: &PointCloud, params: &NormalParams) -> MeshResult<Vec<Vector3<f64>>> {
    if cloud.len() < MIN_POINTS {
        return Err(MeshError::insufficient_data(cloud.len(), MIN_POINTS));
    }
    let k = params.k.clamp(3, cloud.len());

    info!(k, points = cloud.len(), "Estimating normals");

    let kdtree = build_kdtree(cloud);
    let viewpoint = resolve_viewpoint(cloud, params.orientation);
    let centroid = cloud.centroid().unwrap_or_else(Point3::origin);

    let normals: Vec<Vector3<f64>> = cloud
        .points
        .par_iter()
        .map(|point| {
            let neighbors = kdtree
                .nearest_n::<kiddo::SquaredEuclidean>(&to_array(&point.position), k);
            let local: Vec<Point3<f64>> = neighbors
                .iter()
                .map(|n| cloud.points[n.item as usize].position)
                .collect();

            let reference = match viewpoint {
                Some(eye) => eye - point.position,
                None => point.position - centroid,
            };
            let normal = fit_plane(&local)
                .map(|(n, _)| n)
                .or_else(|| reference.try_normalize(1e-12))
                .unwrap_or_else(Vector3::z);

            if normal.dot(&reference) < 0.0 { -normal } else { normal }
        })
        .collect();

    let fallback = normals.iter().filter(|n| !n.iter().all(|c| c.is_finite())).count();
    if fallback > 0 {
        warn!(fallback, "Non-finite normals produced during estimation");
        return Err(MeshError::format("normal estimation produced non-finite values"));
    }

    Ok(normals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_plane(n: usize) -> PointCloud {
        let mut cloud = PointCloud::new();
        for x in 0..n {
            for y in 0..n {
                cloud.push_coords(x as f64, y as f64, 0.0);
            }
        }
        cloud
    }

    fn sphere_points(n: usize) -> Vec<Point3<f64>> {
        let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
        (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - y * y).sqrt();
                let theta = golden * i as f64;
                Point3::new(r * theta.cos(), y, r * theta.sin())
            })
            .collect()
    }

    #[test]
    fn test_from_points_validates_counts() {
        let positions = sphere_points(20);
        let normals = vec![Vector3::z(); 19];
        let err = PointCloud::from_points(&positions, Some(&normals), None).unwrap_err();
        assert!(matches!(err, MeshError::Format { .. }));

        let colors = vec![VertexColor::new(1, 2, 3); 21];
        let err = PointCloud::from_points(&positions, None, Some(&colors)).unwrap_err();
        assert!(matches!(err, MeshError::Format { .. }));
    }

    #[test]
    fn test_from_points_rejects_non_finite() {
        let mut positions = sphere_points(20);
        positions[7].y = f64::NAN;
        let err = PointCloud::from_points(&positions, None, None).unwrap_err();
        assert!(matches!(err, MeshError::Format { .. }));
    }

    #[test]
    fn test_from_points_requires_minimum() {
        for n in [0, 1, MIN_POINTS - 1] {
            let err = PointCloud::from_points(&sphere_points(n), None, None).unwrap_err();
            assert!(matches!(err, MeshError::InsufficientData { found, .. } if found == n));
        }
        assert!(PointCloud::from_points(&sphere_points(MIN_POINTS), None, None).is_ok());
    }

    #[test]
    fn test_from_points_normalizes_normals() {
        let positions = sphere_points(12);
        let normals: Vec<_> = positions.iter().map(|p| p.coords * 3.0).collect();
        let cloud = PointCloud::from_points(&positions, Some(&normals), None).unwrap();
        for p in &cloud.points {
            assert_relative_eq!(p.normal.unwrap().norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_mixed_normals_rejected() {
        let mut cloud = PointCloud::from_points(&sphere_points(12), None, None).unwrap();
        cloud.points[0].normal = Some(Vector3::x());
        assert!(matches!(cloud.validate(), Err(MeshError::Format { .. })));
    }

    #[test]
    fn test_estimate_point_spacing() {
        let mut cloud = PointCloud::new();
        for i in 0..10 {
            cloud.push_coords(i as f64, 0.0, 0.0);
        }
        assert_relative_eq!(estimate_point_spacing(&cloud), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_normals_face_auto_viewpoint() {
        let cloud = grid_plane(6);
        let normals = estimate_normals(&cloud, &NormalParams { k: 8, ..Default::default() }).unwrap();
        assert_eq!(normals.len(), cloud.len());
        for n in normals {
            assert!(n.z > 0.99, "normal {n:?} should point toward +Z camera");
        }
    }

    #[test]
    fn test_explicit_viewpoint_below() {
        let cloud = grid_plane(5);
        let params = NormalParams {
            k: 8,
            orientation: NormalOrientation::TowardViewpoint([2.0, 2.0, -10.0]),
        };
        for n in estimate_normals(&cloud, &params).unwrap() {
            assert!(n.z < -0.99);
        }
    }

    #[test]
    fn test_sphere_normals_away_from_centroid() {
        let cloud = PointCloud::from_points(&sphere_points(400), None, None).unwrap();
        let params = NormalParams {
            k: 12,
            orientation: NormalOrientation::AwayFromCentroid,
        };
        let with_normals = cloud.with_estimated_normals(&params).unwrap();
        assert!(with_normals.has_normals());
        for p in &with_normals.points {
            let radial = p.position.coords.normalize();
            assert!(p.normal.unwrap().dot(&radial) > 0.9);
        }
    }

    #[test]
    fn test_remove_outliers() {
        let mut cloud = grid_plane(10);
        cloud.push_coords(100.0, 100.0, 100.0);
        let filtered = cloud.remove_outliers(5, 1.0);
        assert_eq!(filtered.len(), 100);
        assert!(filtered.points.iter().all(|p| p.position.x < 50.0));
    }

    #[test]
    fn test_grid_sampled_cloud() {
        // 1600 points on one z value, 40 per row and column.
        let cloud = grid_plane(40);
        let kdtree = build_kdtree(&cloud);
        let nearest = kdtree.nearest_n::<kiddo::SquaredEuclidean>(&[20.0, 20.0, 0.0], 5);
        assert_eq!(nearest.len(), 5);
        assert_eq!(nearest[0].distance, 0.0);
        assert_eq!(nearest[4].distance, 1.0);

        assert_relative_eq!(estimate_point_spacing(&cloud), 1.0, epsilon = 1e-12);
        let normals = estimate_normals(&cloud, &NormalParams { k: 8, ..Default::default() }).unwrap();
        assert!(normals.iter().all(|n| n.z > 0.99));
        let filtered = cloud.remove_outliers(8, 2.0);
        assert!(filtered.len() > 1000);
    }

    #[test]
    fn test_xyz_parsing() {
        let text = (0..12)
            .map(|i| format!("{i} 0 0 0 0 1 255 0 {i}\n"))
            .collect::<String>();
        let cloud = PointCloud::from_bytes(text.as_bytes(), PointCloudFormat::Xyz).unwrap();
        assert_eq!(cloud.len(), 12);
        assert!(cloud.has_normals());
        assert_eq!(cloud.points[3].color, Some(VertexColor::new(255, 0, 3)));
    }

    #[test]
    fn test_xyz_bad_column_count() {
        let err = PointCloud::from_bytes(b"1 2 3 4\n", PointCloudFormat::Xyz).unwrap_err();
        assert!(matches!(err, MeshError::ParseError { .. }));
    }

    #[test]
    fn test_ply_ascii_parsing() {
        let mut text = String::from(
            "ply\nformat ascii 1.0\nelement vertex 10\nproperty float x\nproperty float y\n\
             property float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\n\
             end_header\n",
        );
        for i in 0..10 {
            text.push_str(&format!("{i} {} 0.5 10 20 30\n", i * 2));
        }
        let cloud = PointCloud::from_bytes(text.as_bytes(), PointCloudFormat::Ply).unwrap();
        assert_eq!(cloud.len(), 10);
        assert!(!cloud.has_normals());
        assert_relative_eq!(cloud.points[4].position.y, 8.0);
        assert_eq!(cloud.points[0].color, Some(VertexColor::new(10, 20, 30)));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            PointCloudFormat::from_path(Path::new("a.PLY")),
            Some(PointCloudFormat::Ply)
        );
        assert_eq!(
            PointCloudFormat::from_path(Path::new("a.xyz")),
            Some(PointCloudFormat::Xyz)
        );
        assert_eq!(PointCloudFormat::from_path(Path::new("a.pcd")), None);
    }
}
