//! # Status
//!
//! ClusterInfo bookkeeping, the Ready condition, and status persistence.

use tracing::{debug, warn};

use crate::controller::deployer::DeploymentState;
use crate::controller::error::AddOnError;
use crate::controller::keys::ClusterKey;
use crate::controller::reconciler::types::Reconciler;
use crate::crd::{ClusterInfo, Condition, EventBasedAddOn, EventBasedAddOnStatus, FeatureStatus};

pub const READY_CONDITION: &str = "Ready";

/// Outcome of one deployment attempt in one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterUpdate {
    /// Cluster matched but nothing was attempted yet (paused cluster)
    Pending,
    Provisioned { hash: String },
    Failed { message: String },
}

impl ClusterUpdate {
    fn target(&self) -> DeploymentState {
        match self {
            ClusterUpdate::Pending => DeploymentState::Provisioning,
            ClusterUpdate::Provisioned { .. } => DeploymentState::Provisioned,
            ClusterUpdate::Failed { .. } => DeploymentState::Failed,
        }
    }
}

/// Every attempt passes through Provisioning, so a recorded outcome is valid
/// when reachable from the current state in at most two steps.
fn reachable(current: DeploymentState, target: DeploymentState) -> bool {
    current.can_transition_to(target)
        || (current.can_transition_to(DeploymentState::Provisioning)
            && DeploymentState::Provisioning.can_transition_to(target))
}

/// Record the outcome of a deployment attempt for `cluster`
pub fn update_cluster_info(status: &mut EventBasedAddOnStatus, cluster: &ClusterKey, update: ClusterUpdate) {
    let position = status.cluster_info.iter().position(|ci| &ci.cluster == cluster);
    let current = DeploymentState::from_status(position.map(|i| status.cluster_info[i].status));
    let target = update.target();
    if !reachable(current, target) {
        warn!(cluster = %cluster, ?current, ?target, "Unexpected ClusterInfo transition");
    }

    let previous = position.map(|i| status.cluster_info.remove(i));
    let info = match update {
        ClusterUpdate::Pending => match previous {
            Some(previous) => previous,
            None => ClusterInfo {
                cluster: cluster.clone(),
                hash: None,
                status: FeatureStatus::Provisioning,
                failure_message: None,
                last_applied_time: None,
            },
        },
        ClusterUpdate::Provisioned { hash } => ClusterInfo {
            cluster: cluster.clone(),
            hash: Some(hash),
            status: FeatureStatus::Provisioned,
            failure_message: None,
            last_applied_time: Some(chrono::Utc::now().to_rfc3339()),
        },
        // hash cleared so the next pass retries the full set
        ClusterUpdate::Failed { message } => ClusterInfo {
            cluster: cluster.clone(),
            hash: None,
            status: FeatureStatus::Failed,
            failure_message: Some(message),
            last_applied_time: previous.and_then(|p| p.last_applied_time),
        },
    };
    status.cluster_info.push(info);
    status.cluster_info.sort_by(|a, b| a.cluster.cmp(&b.cluster));
}

/// Drop the ClusterInfo of `cluster`; `true` if there was one
pub fn remove_cluster_info_entry(status: &mut EventBasedAddOnStatus, cluster: &ClusterKey) -> bool {
    let before = status.cluster_info.len();
    status.cluster_info.retain(|ci| &ci.cluster != cluster);
    before != status.cluster_info.len()
}

/// Set the Ready condition. `True` when every matching cluster is Provisioned.
pub fn set_ready_condition(status: &mut EventBasedAddOnStatus, error: Option<&AddOnError>) {
    let pending = status
        .matching_cluster_refs
        .iter()
        .filter(|cluster| {
            status
                .cluster_info_for(cluster)
                .map_or(true, |ci| ci.status != FeatureStatus::Provisioned)
        })
        .count();

    let (value, reason, message) = match error {
        Some(error) => ("False", error.reason(), Some(error.to_string())),
        None if pending > 0 => (
            "False",
            "Provisioning",
            Some(format!("{pending} matching cluster(s) not provisioned yet")),
        ),
        None => ("True", "Provisioned", None),
    };

    let last_transition_time = status
        .ready_condition()
        .filter(|c| c.status == value)
        .and_then(|c| c.last_transition_time.clone())
        .or_else(|| Some(chrono::Utc::now().to_rfc3339()));

    status.conditions.retain(|c| c.r#type != READY_CONDITION);
    status.conditions.push(Condition {
        r#type: READY_CONDITION.to_string(),
        status: value.to_string(),
        last_transition_time,
        reason: Some(reason.to_string()),
        message,
    });
}

/// Write `status` unless it equals what the add-on already carries
///
/// # Errors
///
/// Returns the store error when the patch fails.
pub async fn persist_status(
    ctx: &Reconciler,
    add_on: &EventBasedAddOn,
    status: &EventBasedAddOnStatus,
) -> Result<(), AddOnError> {
    if add_on.status.as_ref() == Some(status) {
        debug!("Skipping status update - status unchanged");
        return Ok(());
    }
    let name = add_on.metadata.name.as_deref().unwrap_or_default();
    ctx.store.patch_status(name, status).await
}
