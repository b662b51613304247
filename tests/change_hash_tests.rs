//! # Change Hash Tests
//!
//! The digest must change exactly when what would be deployed changes.

use event_manager::controller::fetcher::ObservedEventReport;
use event_manager::controller::hash::hash;
use event_manager::controller::resolver::{PolicyContent, ResolvedReferences};
use event_manager::prelude::*;
use std::collections::BTreeMap;

fn spec(selector: &str, refs: Vec<PolicyRef>) -> EventBasedAddOnSpec {
    EventBasedAddOnSpec {
        cluster_selector: selector.into(),
        event_source_name: "es".into(),
        policy_refs: refs,
        helm_charts: vec![],
    }
}

fn policy_ref(name: &str) -> PolicyRef {
    PolicyRef {
        namespace: "default".into(),
        name: name.into(),
        kind: ReferencedKind::ConfigMap,
        key: None,
    }
}

fn content(name: &str, text: &str) -> PolicyContent {
    PolicyContent {
        reference: ReferenceKey::new(ReferencedKind::ConfigMap, "default", name),
        entries: BTreeMap::from([("policy.yaml".to_string(), text.to_string())]),
    }
}

fn resolved(policies: Vec<PolicyContent>) -> ResolvedReferences {
    ResolvedReferences {
        policies,
        charts: vec![],
        event_source: EventSource::new(
            "es",
            EventSourceSpec {
                group: String::new(),
                version: "v1".into(),
                kind: "Service".into(),
                namespace: None,
                label_filters: vec![],
                script: None,
                collect_resources: false,
            },
        ),
    }
}

fn report(revision: &str, names: &[&str]) -> ObservedEventReport {
    ObservedEventReport {
        revision: revision.into(),
        matching_resources: names
            .iter()
            .map(|name| MatchingResource {
                api_version: "v1".into(),
                kind: "Service".into(),
                namespace: "web".into(),
                name: (*name).into(),
            })
            .collect(),
        resources: None,
    }
}

#[test]
fn test_hash_ignores_declaration_order() {
    let a = hash(
        &spec("env=fv", vec![policy_ref("cm1"), policy_ref("cm2")]),
        &resolved(vec![content("cm1", "x"), content("cm2", "y")]),
        Some(&report("1", &["nginx", "haproxy"])),
    )
    .unwrap();
    let b = hash(
        &spec("env=fv", vec![policy_ref("cm2"), policy_ref("cm1")]),
        &resolved(vec![content("cm2", "y"), content("cm1", "x")]),
        Some(&report("1", &["haproxy", "nginx"])),
    )
    .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
}

#[test]
fn test_hash_ignores_selector_and_report_revision() {
    let references = resolved(vec![content("cm1", "x")]);
    let a = hash(&spec("env=fv", vec![policy_ref("cm1")]), &references, Some(&report("1", &["nginx"]))).unwrap();
    let b = hash(&spec("env=prod", vec![policy_ref("cm1")]), &references, Some(&report("7", &["nginx"]))).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_hash_tracks_content() {
    let spec = spec("env=fv", vec![policy_ref("cm1")]);
    let base = hash(&spec, &resolved(vec![content("cm1", "x")]), None).unwrap();

    let policy_changed = hash(&spec, &resolved(vec![content("cm1", "x2")]), None).unwrap();
    let report_appeared = hash(&spec, &resolved(vec![content("cm1", "x")]), Some(&report("1", &["nginx"]))).unwrap();
    let mut references = resolved(vec![content("cm1", "x")]);
    references.event_source.spec.kind = "Deployment".into();
    let event_source_changed = hash(&spec, &references, None).unwrap();

    assert_ne!(base, policy_changed);
    assert_ne!(base, report_appeared);
    assert_ne!(base, event_source_changed);
}

fn chart(version: &str, values: Option<&str>) -> HelmChart {
    HelmChart {
        repository_url: "https://kyverno.github.io/kyverno/".into(),
        repository_name: "kyverno".into(),
        chart_name: "kyverno/kyverno".into(),
        chart_version: version.into(),
        release_name: "kyverno".into(),
        release_namespace: "kyverno".into(),
        values: values.map(str::to_string),
        helm_chart_action: HelmChartAction::Install,
    }
}

#[test]
fn test_hash_ignores_order_of_charts_sharing_a_release() {
    let references = resolved(vec![]);
    let mut forward = spec("env=fv", vec![]);
    forward.helm_charts = vec![chart("v3.0.1", None), chart("v3.1.0", Some("replicas: 2"))];
    let mut backward = spec("env=fv", vec![]);
    backward.helm_charts = vec![chart("v3.1.0", Some("replicas: 2")), chart("v3.0.1", None)];

    assert_eq!(
        hash(&forward, &references, None).unwrap(),
        hash(&backward, &references, None).unwrap()
    );
}
