//! # CRD Generator
//!
//! Prints the `EventBasedAddOn` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/eventbasedaddon.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use event_manager::crd::EventBasedAddOn;
use kube::CustomResourceExt;

fn main() {
    match serde_yaml::to_string(&EventBasedAddOn::crd()) {
        Ok(yaml) => print!("{yaml}"),
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
