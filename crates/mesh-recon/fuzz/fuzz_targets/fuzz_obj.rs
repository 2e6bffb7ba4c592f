#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_recon::{Mesh, MeshFormat};

// Whatever loads must validate and export without panicking.
fuzz_target!(|data: &[u8]| {
    if let Ok(mesh) = Mesh::from_bytes(data, MeshFormat::Obj) {
        let _ = mesh.validate();
        let _ = mesh.export(MeshFormat::Stl);
    }
});
