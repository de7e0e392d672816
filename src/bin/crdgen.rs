//! # CRD Generator
//!
//! Prints the `Cluster` CustomResourceDefinition (managed roles subset) as YAML.
//!
//! The schema only covers the fields this controller reads. Install it on
//! test and development clusters only; on a real cluster it would replace
//! the operator's full `Cluster` definition.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/cluster.yaml
//! ```

use kube::core::CustomResourceExt;
use managed_roles_controller::crd::Cluster;

fn main() {
    match serde_yaml::to_string(&Cluster::crd()) {
        Ok(yaml) => {
            println!("# This file is auto-generated by crdgen");
            println!("# DO NOT EDIT THIS FILE MANUALLY");
            println!("# Fix schema issues in src/crd/ and regenerate");
            println!("---");
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
