#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_recon::{Mesh, MeshFormat, PointCloud, pointcloud::PointCloudFormat};

// Arbitrary bytes must never panic either PLY reader.
fuzz_target!(|data: &[u8]| {
    if let Ok(cloud) = PointCloud::from_bytes(data, PointCloudFormat::Ply) {
        let _ = cloud.bounds();
    }

    if let Ok(mesh) = Mesh::from_bytes(data, MeshFormat::Ply) {
        let _ = mesh.validate();
    }
});
