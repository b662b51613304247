//! # Change Hash
//!
//! Digest over everything that determines what gets deployed to a cluster.
//! A cluster is redeployed only when this digest differs from the one stored
//! in its ClusterInfo.
//!
//! Lists whose order carries no meaning are sorted before hashing and JSON
//! objects are written with sorted keys, so semantically identical inputs
//! always produce the same digest.

use serde::Serialize;
use std::collections::BTreeMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::controller::error::AddOnError;
use crate::controller::fetcher::ObservedEventReport;
use crate::controller::resolver::ResolvedReferences;
use crate::crd::{EventBasedAddOnSpec, EventSourceSpec, HelmChart, MatchingResource, PolicyRef};

#[derive(Serialize)]
struct HashInput<'a> {
    event_source_name: &'a str,
    policy_refs: Vec<&'a PolicyRef>,
    helm_charts: Vec<&'a HelmChart>,
    policies: Vec<(String, &'a BTreeMap<String, String>)>,
    event_source: &'a EventSourceSpec,
    matching_resources: Vec<&'a MatchingResource>,
    resources: Option<&'a str>,
}

/// Compute the deployment digest (hex encoded SHA-256)
///
/// The cluster selector is not part of the digest: it decides where to
/// deploy, not what. The report revision is not part of it either, a report
/// rewritten with identical content does not trigger a redeploy.
///
/// # Errors
///
/// `AddOnError::Serialization` if an input cannot be serialized.
pub fn hash(
    spec: &EventBasedAddOnSpec,
    references: &ResolvedReferences,
    report: Option<&ObservedEventReport>,
) -> Result<String, AddOnError> {
    let mut policy_refs: Vec<&PolicyRef> = spec.policy_refs.iter().collect();
    policy_refs.sort_by(|a, b| {
        (a.kind, &a.namespace, &a.name, &a.key).cmp(&(b.kind, &b.namespace, &b.name, &b.key))
    });

    // ordered on the full serialized chart so entries differing only in
    // version or values still sort deterministically
    let mut helm_charts: Vec<(String, &HelmChart)> = spec
        .helm_charts
        .iter()
        .map(|chart| Ok((serde_json::to_string(chart)?, chart)))
        .collect::<Result<_, serde_json::Error>>()?;
    helm_charts.sort_by(|a, b| a.0.cmp(&b.0));
    let helm_charts: Vec<&HelmChart> = helm_charts.into_iter().map(|(_, chart)| chart).collect();

    let mut policies: Vec<(String, &BTreeMap<String, String>)> = references
        .policies
        .iter()
        .map(|p| (p.reference.to_string(), &p.entries))
        .collect();
    policies.sort_by(|a, b| a.0.cmp(&b.0));

    let mut matching_resources: Vec<&MatchingResource> = report
        .map(|r| r.matching_resources.iter().collect())
        .unwrap_or_default();
    matching_resources.sort();

    let input = HashInput {
        event_source_name: &spec.event_source_name,
        policy_refs,
        helm_charts,
        policies,
        event_source: &references.event_source.spec,
        matching_resources,
        resources: report.and_then(|r| r.resources.as_deref()),
    };

    let value = serde_json::to_value(&input)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Serialize `value` as JSON with object keys in sorted order
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
