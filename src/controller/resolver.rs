//! # Resource Resolver
//!
//! Turns the references declared by an add-on into concrete content:
//! the data of each ConfigMap/Secret, the Helm charts and the EventSource.
//! Only reads; never writes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::controller::error::AddOnError;
use crate::controller::keys::ReferenceKey;
use crate::controller::store::ObjectStore;
use crate::crd::{EventBasedAddOnSpec, EventSource, HelmChart, PolicyRef, ReferencedKind};

/// Content of one referenced ConfigMap or Secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyContent {
    pub reference: ReferenceKey,
    /// Data key -> text (templated Kubernetes resources)
    pub entries: BTreeMap<String, String>,
}

/// Everything an add-on references, resolved
#[derive(Debug, Clone)]
pub struct ResolvedReferences {
    /// Sorted by reference identity
    pub policies: Vec<PolicyContent>,
    pub charts: Vec<HelmChart>,
    pub event_source: EventSource,
}

/// Keys of every object an add-on depends on
#[must_use]
pub fn reference_keys(spec: &EventBasedAddOnSpec) -> BTreeSet<ReferenceKey> {
    let mut keys: BTreeSet<ReferenceKey> = spec
        .policy_refs
        .iter()
        .map(|r| ReferenceKey::new(r.kind, &r.namespace, &r.name))
        .collect();
    if !spec.event_source_name.is_empty() {
        keys.insert(ReferenceKey::event_source(&spec.event_source_name));
    }
    keys
}

#[derive(Clone)]
pub struct ResourceResolver {
    store: Arc<dyn ObjectStore>,
}

impl ResourceResolver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Resolve every reference of `spec`
    ///
    /// # Errors
    ///
    /// - `ReferenceNotFound` when a referenced object does not exist
    /// - `ReferenceInvalid` when its content is not usable
    pub async fn resolve(&self, spec: &EventBasedAddOnSpec) -> Result<ResolvedReferences, AddOnError> {
        let event_source = self.fetch_event_source(&spec.event_source_name).await?;

        // refs to the same object with different keys merge their entries
        let mut merged: BTreeMap<ReferenceKey, BTreeMap<String, String>> = BTreeMap::new();
        for policy_ref in &spec.policy_refs {
            let content = self.fetch_policy_ref(policy_ref).await?;
            merged
                .entry(content.reference)
                .or_default()
                .extend(content.entries);
        }
        let policies = merged
            .into_iter()
            .map(|(reference, entries)| PolicyContent { reference, entries })
            .collect();

        Ok(ResolvedReferences {
            policies,
            charts: spec.helm_charts.clone(),
            event_source,
        })
    }

    pub async fn fetch_event_source(&self, name: &str) -> Result<EventSource, AddOnError> {
        let reference = ReferenceKey::event_source(name);
        if name.is_empty() {
            return Err(AddOnError::reference_invalid(reference, "eventSourceName is empty"));
        }
        self.store
            .get_event_source(name)
            .await?
            .ok_or_else(|| AddOnError::reference_not_found(reference))
    }

    async fn fetch_policy_ref(&self, policy_ref: &PolicyRef) -> Result<PolicyContent, AddOnError> {
        let reference = ReferenceKey::new(policy_ref.kind, &policy_ref.namespace, &policy_ref.name);
        let data = match policy_ref.kind {
            ReferencedKind::ConfigMap => self.get_config_map(&reference).await?,
            ReferencedKind::Secret => self.get_secret(&reference).await?,
            ReferencedKind::EventSource => {
                return Err(AddOnError::reference_invalid(
                    &reference,
                    "policyRefs only support ConfigMap and Secret",
                ))
            }
        };

        let entries = match &policy_ref.key {
            Some(key) => {
                let value = data.get(key).ok_or_else(|| {
                    AddOnError::reference_invalid(&reference, format!("key '{key}' not found"))
                })?;
                BTreeMap::from([(key.clone(), value.clone())])
            }
            None => data,
        };
        Ok(PolicyContent { reference, entries })
    }

    async fn get_config_map(
        &self,
        reference: &ReferenceKey,
    ) -> Result<BTreeMap<String, String>, AddOnError> {
        let config_map = self
            .store
            .get_config_map(&reference.namespace, &reference.name)
            .await?
            .ok_or_else(|| AddOnError::reference_not_found(reference))?;
        Ok(config_map.data.unwrap_or_default())
    }

    async fn get_secret(
        &self,
        reference: &ReferenceKey,
    ) -> Result<BTreeMap<String, String>, AddOnError> {
        let secret = self
            .store
            .get_secret(&reference.namespace, &reference.name)
            .await?
            .ok_or_else(|| AddOnError::reference_not_found(reference))?;

        let mut entries = BTreeMap::new();
        for (key, bytes) in secret.data.unwrap_or_default() {
            let text = String::from_utf8(bytes.0).map_err(|e| {
                AddOnError::reference_invalid(reference, format!("key '{key}' is not UTF-8: {e}"))
            })?;
            entries.insert(key, text);
        }
        entries.extend(secret.string_data.unwrap_or_default());
        Ok(entries)
    }
}
