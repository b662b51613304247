//! # Templates
//!
//! Instantiates policy content and Helm values with the data reported for a
//! cluster. Placeholders have the form `{{ .Path.to.field }}`; numeric path
//! segments index lists.
//!
//! Context roots: `.Cluster`, `.EventSource`, `.MatchingResources`, `.Resources`.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

use crate::controller::error::AddOnError;
use crate::controller::fetcher::ObservedEventReport;
use crate::controller::keys::ClusterKey;
use crate::crd::EventSource;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z0-9_\-.]+?)\s*\}\}").expect("placeholder regex is valid")
});

/// Values available to templates for one cluster
#[derive(Debug, Clone)]
pub struct TemplateContext {
    root: Value,
}

impl TemplateContext {
    /// Build the context for `cluster`
    ///
    /// # Errors
    ///
    /// `ReferenceInvalid` when the collected resources are not valid YAML.
    pub fn new(
        cluster: &ClusterKey,
        event_source: &EventSource,
        report: Option<&ObservedEventReport>,
    ) -> Result<Self, AddOnError> {
        let matching = report
            .map(|r| serde_json::to_value(&r.matching_resources))
            .transpose()?
            .unwrap_or_else(|| json!([]));
        let resources = match report.and_then(|r| r.resources.as_deref()) {
            Some(text) => parse_documents(text).map_err(|e| {
                AddOnError::reference_invalid("EventReport resources", e)
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            root: json!({
                "Cluster": {
                    "kind": cluster.cluster_type.as_str(),
                    "namespace": cluster.namespace,
                    "name": cluster.name,
                },
                "EventSource": serde_json::to_value(&event_source.spec)?,
                "MatchingResources": matching,
                "Resources": resources,
            }),
        })
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.root, |value, segment| match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

/// Replace every placeholder in `text`
///
/// # Errors
///
/// `ReferenceInvalid` naming `source` when a placeholder path does not exist.
pub fn instantiate(text: &str, context: &TemplateContext, source: &str) -> Result<String, AddOnError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for captures in PLACEHOLDER.captures_iter(text) {
        let (Some(whole), Some(path)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = context.lookup(path.as_str()).ok_or_else(|| {
            AddOnError::reference_invalid(source, format!("unknown template path '.{}'", path.as_str()))
        })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&render(value));
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse multi-document YAML into JSON values, skipping empty documents
pub fn parse_documents(text: &str) -> Result<Vec<Value>, serde_yaml::Error> {
    use serde::Deserialize;

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterType, EventSourceSpec, MatchingResource};

    fn context() -> TemplateContext {
        let event_source = EventSource::new(
            "lb",
            EventSourceSpec {
                group: String::new(),
                version: "v1".into(),
                kind: "Service".into(),
                namespace: None,
                label_filters: vec![],
                script: None,
                collect_resources: true,
            },
        );
        let report = ObservedEventReport {
            revision: "1".into(),
            matching_resources: vec![MatchingResource {
                api_version: "v1".into(),
                kind: "Service".into(),
                namespace: "web".into(),
                name: "nginx".into(),
            }],
            resources: Some("apiVersion: v1\nkind: Service\nmetadata:\n  name: nginx\nspec:\n  ports:\n  - port: 80\n".into()),
        };
        TemplateContext::new(
            &ClusterKey::new(ClusterType::Capi, "default", "c1"),
            &event_source,
            Some(&report),
        )
        .unwrap()
    }

    #[test]
    fn test_instantiate_paths() {
        let ctx = context();
        let out = instantiate(
            "cluster={{ .Cluster.name }} ns={{.MatchingResources.0.namespace}} port={{ .Resources.0.spec.ports.0.port }}",
            &ctx,
            "cm",
        )
        .unwrap();
        assert_eq!(out, "cluster=c1 ns=web port=80");
    }

    #[test]
    fn test_objects_render_as_json() {
        let ctx = context();
        let out = instantiate("{{ .Cluster }}", &ctx, "cm").unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["kind"], "Capi");
    }

    #[test]
    fn test_unknown_path_is_invalid_reference() {
        let ctx = context();
        let err = instantiate("{{ .Cluster.labels }}", &ctx, "ConfigMap:default/cm1").unwrap_err();
        assert!(matches!(err, AddOnError::ReferenceInvalid { .. }));
    }

    #[test]
    fn test_text_without_placeholders_is_unchanged() {
        let ctx = context();
        let text = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: x\n";
        assert_eq!(instantiate(text, &ctx, "cm").unwrap(), text);
    }

    #[test]
    fn test_parse_documents_skips_empty() {
        let docs = parse_documents("---\na: 1\n---\n---\nb: 2\n").unwrap();
        assert_eq!(docs.len(), 2);
    }
}
