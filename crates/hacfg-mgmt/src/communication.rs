//! Parallel fan-out of one remote action over the cluster nodes.

use futures::future::join_all;
use std::future::Future;
use tracing::{debug, warn};

use crate::external::NodeCommunicationError;
use crate::node::{NodeAddresses, NodeAddressesList};
use crate::reports::{LibraryError, ReportCode, ReportItem, ReportItemSeverity, ReportProcessor};

/// Outcome of the action on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome<T = ()> {
    pub node: String,
    pub result: Result<T, NodeCommunicationError>,
}

impl<T> NodeOutcome<T> {
    pub fn error(&self) -> Option<&NodeCommunicationError> {
        self.result.as_ref().err()
    }
}

/// What a successful node action has to report, if anything.
pub trait NodeSuccess {
    fn into_report(self) -> Option<ReportItem>;
}

impl NodeSuccess for () {
    fn into_report(self) -> Option<ReportItem> {
        None
    }
}

impl NodeSuccess for ReportItem {
    fn into_report(self) -> Option<ReportItem> {
        Some(self)
    }
}

/// Runs `action` on every node concurrently and waits for all of them.
///
/// Outcomes come back in node order no matter which node finished first.
pub async fn run_on_nodes<'a, F, Fut, T>(
    nodes: &'a NodeAddressesList,
    action: F,
) -> Vec<NodeOutcome<T>>
where
    F: Fn(&'a NodeAddresses) -> Fut,
    Fut: Future<Output = Result<T, NodeCommunicationError>>,
{
    let results = join_all(nodes.iter().map(&action)).await;
    nodes
        .iter()
        .zip(results)
        .map(|(node, result)| NodeOutcome {
            node: node.label().to_string(),
            result,
        })
        .collect()
}

/// Report for a node that failed during a fan-out.
///
/// Failures are errors forceable by skip-offline, or warnings once it is set.
pub fn node_failure_report(
    error: &NodeCommunicationError,
    skip_offline_nodes: bool,
) -> ReportItem {
    if skip_offline_nodes {
        error.to_report_item(ReportItemSeverity::Warning, None)
    } else {
        error.to_report_item(ReportItemSeverity::Error, Some(ReportCode::SkipOfflineNodes))
    }
}

/// Runs `action` on every node, then hands the reports of all nodes to
/// `reporter` as one batch in node order. Fails if any failure was an error.
pub async fn process_on_nodes<'a, F, Fut, T>(
    reporter: &dyn ReportProcessor,
    nodes: &'a NodeAddressesList,
    skip_offline_nodes: bool,
    action: F,
) -> Result<(), LibraryError>
where
    F: Fn(&'a NodeAddresses) -> Fut,
    Fut: Future<Output = Result<T, NodeCommunicationError>>,
    T: NodeSuccess,
{
    let outcomes = run_on_nodes(nodes, action).await;
    let total = outcomes.len();
    let mut failed = 0;
    let report_items: Vec<ReportItem> = outcomes
        .into_iter()
        .filter_map(|outcome| match outcome.result {
            Ok(success) => success.into_report(),
            Err(error) => {
                failed += 1;
                warn!(node = %outcome.node, command = error.command(), "node request failed");
                Some(node_failure_report(&error, skip_offline_nodes))
            }
        })
        .collect();
    debug!(nodes = total, failed, "node fan-out finished");
    reporter.process_list(report_items)
}
