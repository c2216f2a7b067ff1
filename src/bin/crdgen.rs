//! # CRD Generator
//!
//! Prints the `Mesh` and `MeshRevision` custom resource definitions as a YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/mesh-operator.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::CustomResourceExt;
use mesh_operator::crd::{Mesh, MeshRevision};

fn main() {
    let crds = [Mesh::crd(), MeshRevision::crd()];
    let mut documents = Vec::with_capacity(crds.len());
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => documents.push(yaml),
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
    print!("{}", documents.join("---\n"));
}
