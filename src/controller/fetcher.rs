//! # Event Report Fetcher
//!
//! Read contract for the latest EventReport of a (cluster, event source)
//! pair. "No report yet" is `Ok(None)`, distinct from a transport failure.
//!
//! `ReflectorEventReportFetcher` reads from a watch-fed reflector cache, so
//! a fetch never leaves the process.

use async_trait::async_trait;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;

use crate::controller::error::AddOnError;
use crate::controller::keys::ClusterKey;
use crate::crd::{EventReport, MatchingResource};

/// An EventReport as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEventReport {
    /// Version marker; changes whenever the report is rewritten
    pub revision: String,
    pub matching_resources: Vec<MatchingResource>,
    pub resources: Option<String>,
}

impl ObservedEventReport {
    #[must_use]
    pub fn from_report(report: &EventReport) -> Self {
        let revision = report
            .resource_version()
            .or_else(|| report.metadata.generation.map(|g| g.to_string()))
            .unwrap_or_default();
        Self {
            revision,
            matching_resources: report.spec.matching_resources.clone(),
            resources: report.spec.resources.clone(),
        }
    }
}

/// Name of the EventReport collected for `cluster` in the management cluster
#[must_use]
pub fn event_report_name(event_source: &str, cluster: &ClusterKey) -> String {
    format!(
        "{event_source}--{}--{}",
        cluster.cluster_type.as_str(),
        cluster.name
    )
    .to_lowercase()
}

#[async_trait]
pub trait EventReportFetcher: Send + Sync {
    async fn fetch(
        &self,
        cluster: &ClusterKey,
        event_source: &str,
    ) -> Result<Option<ObservedEventReport>, AddOnError>;
}

pub struct ReflectorEventReportFetcher {
    store: Store<EventReport>,
}

impl ReflectorEventReportFetcher {
    #[must_use]
    pub fn new(store: Store<EventReport>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventReportFetcher for ReflectorEventReportFetcher {
    async fn fetch(
        &self,
        cluster: &ClusterKey,
        event_source: &str,
    ) -> Result<Option<ObservedEventReport>, AddOnError> {
        let key = ObjectRef::new(&event_report_name(event_source, cluster))
            .within(&cluster.namespace);
        Ok(self
            .store
            .get(&key)
            .map(|report| ObservedEventReport::from_report(&report)))
    }
}
