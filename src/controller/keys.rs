//! # Keys
//!
//! Identity keys shared by the dependency index, the requeue mappers and the
//! reconciler.

use kube::ResourceExt;
use std::fmt;

use crate::crd::{ClusterReference, ReferencedKind};

/// Cluster identity (`kind:namespace/name`)
pub type ClusterKey = ClusterReference;

/// Namespace-qualified name of an `EventBasedAddOn`
///
/// Cluster-scoped objects have no namespace and render as `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddOnKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl AddOnKey {
    #[must_use]
    pub fn cluster_scoped(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for AddOnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => write!(f, "{ns}/{}", self.name),
            _ => f.write_str(&self.name),
        }
    }
}

/// Build the key of any Kubernetes object
pub fn get_key_from_object<K: ResourceExt>(obj: &K) -> AddOnKey {
    AddOnKey {
        namespace: obj.namespace().filter(|ns| !ns.is_empty()),
        name: obj.name_any(),
    }
}

/// Key of an object referenced by an add-on (kind + namespace + name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    pub kind: ReferencedKind,
    /// Empty for cluster-scoped kinds
    pub namespace: String,
    pub name: String,
}

impl ReferenceKey {
    #[must_use]
    pub fn new(kind: ReferencedKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn event_source(name: &str) -> Self {
        Self::new(ReferencedKind::EventSource, "", name)
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}:{}", self.kind, self.name)
        } else {
            write!(f, "{}:{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ClusterType;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    #[test]
    fn test_add_on_key_display() {
        assert_eq!(AddOnKey::cluster_scoped("a").to_string(), "a");
        let key = AddOnKey {
            namespace: Some("ns".to_string()),
            name: "a".to_string(),
        };
        assert_eq!(key.to_string(), "ns/a");
    }

    #[test]
    fn test_get_key_from_object() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("cm1".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(get_key_from_object(&cm).to_string(), "default/cm1");
    }

    #[test]
    fn test_reference_and_cluster_display() {
        let r = ReferenceKey::new(ReferencedKind::ConfigMap, "default", "cm1");
        assert_eq!(r.to_string(), "ConfigMap:default/cm1");
        assert_eq!(ReferenceKey::event_source("es").to_string(), "EventSource:es");

        let c = ClusterKey::new(ClusterType::Sveltos, "ns", "c1");
        assert_eq!(c.to_string(), "Sveltos:ns/c1");
    }
}
