use tracing::debug;

use crate::external::{NodeCommunicationError, NodeCommunicator};
use crate::node::NodeAddresses;
use crate::reports::{self, ReportItem};

/// Name of the quorum device client service on cluster nodes.
pub const SERVICE_NAME: &str = "corosync-qdevice";

pub const OP_CLIENT_ENABLE: &str = "remote/qdevice_client_enable";

const ENABLE_SKIPPED_RESPONSE: &str = "corosync is not enabled, skipping";

/// Enables the qdevice client service on `node` and returns what to report.
///
/// A node without corosync enabled answers that it skipped the service; that
/// is reported as a skip rather than a success.
pub async fn remote_client_enable(
    communicator: &dyn NodeCommunicator,
    node: &NodeAddresses,
) -> Result<ReportItem, NodeCommunicationError> {
    let response = communicator.call_node(node, OP_CLIENT_ENABLE, "").await?;
    debug!(node = node.label(), response = response.trim(), "qdevice client enable answered");
    if response.trim() == ENABLE_SKIPPED_RESPONSE {
        Ok(reports::service_enable_skipped(
            SERVICE_NAME,
            "corosync is not enabled",
            node.label(),
        ))
    } else {
        Ok(reports::service_enable_success(SERVICE_NAME, node.label()))
    }
}
