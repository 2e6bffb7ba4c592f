#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_recon::{Mesh, MeshFormat};

fuzz_target!(|data: &[u8]| {
    if let Ok(mesh) = Mesh::from_bytes(data, MeshFormat::Stl) {
        let report = mesh.validate();
        if report.face_count <= 1024 {
            let _ = mesh.export(MeshFormat::Ply);
        }
    }
});
