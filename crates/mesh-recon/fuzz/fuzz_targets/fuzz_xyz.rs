#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_recon::{NormalParams, PointCloud, pointcloud::PointCloudFormat};

fuzz_target!(|data: &[u8]| {
    let Ok(cloud) = PointCloud::from_bytes(data, PointCloudFormat::Xyz) else {
        return;
    };
    if cloud.len() <= 4096 {
        let _ = cloud.with_estimated_normals(&NormalParams::default());
    }
});
