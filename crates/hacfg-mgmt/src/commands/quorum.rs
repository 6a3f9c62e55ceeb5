//! Cluster side quorum commands.
//!
//! Adding a `net` quorum device distributes certificates before the
//! configuration is pushed:
//!
//! 1. fetch the CA certificate from the qnetd host,
//! 2. initialize the client database on every node with that CA,
//! 3. generate a certificate request locally,
//! 4. have the qnetd host sign it,
//! 5. turn the signed certificate into a PKCS#12 bundle locally,
//! 6. import the bundle on every node.
//!
//! Steps 2 and 6 run on all nodes in parallel. Their node failures are
//! collected and processed as one batch once every node has answered, so a
//! failure on one node never cancels the requests to the others.

use std::collections::BTreeMap;
use tracing::info;

use crate::communication::process_on_nodes;
use crate::corosync::QuorumConfig;
use crate::env::LibraryEnvironment;
use crate::node::NodeAddressesList;
use crate::qdevice::{client, net};
use crate::reports::{self, LibraryError, ReportItemSeverity};

/// Returns the quorum options and the quorum device section.
pub async fn get_config(env: &LibraryEnvironment) -> Result<QuorumConfig, LibraryError> {
    env.ensure_not_cman()?;
    let cfg = env.get_corosync_conf().await?;
    Ok(cfg.quorum_config())
}

/// Sets quorum options; an empty value removes the option.
pub async fn set_options(
    env: &LibraryEnvironment,
    options: &BTreeMap<String, String>,
    skip_offline_nodes: bool,
) -> Result<(), LibraryError> {
    env.ensure_not_cman()?;
    let mut cfg = env.get_corosync_conf().await?;
    cfg.set_quorum_options(env.report_processor(), options)?;
    env.push_corosync_conf(&cfg, skip_offline_nodes).await
}

/// Adds a quorum device to the cluster.
///
/// On a live configuration the `net` model certificates are distributed first
/// and the qdevice client is enabled on every node; the configuration is pushed
/// only after both succeeded.
pub async fn add_device(
    env: &LibraryEnvironment,
    model: &str,
    model_options: &BTreeMap<String, String>,
    generic_options: &BTreeMap<String, String>,
    force_model: bool,
    force_options: bool,
    skip_offline_nodes: bool,
) -> Result<(), LibraryError> {
    env.ensure_not_cman()?;
    let mut cfg = env.get_corosync_conf().await?;
    cfg.add_quorum_device(
        env.report_processor(),
        model,
        model_options,
        generic_options,
        force_model,
        force_options,
    )?;

    if env.is_corosync_conf_live() {
        if model == net::MODEL {
            let qnetd_host = model_options
                .get("host")
                .ok_or_else(|| LibraryError::from(reports::required_option_missing("host")))?;
            add_device_model_net(env, qnetd_host, cfg.cluster_name(), cfg.nodes(), skip_offline_nodes)
                .await?;
        }

        let communicator = env.node_communicator();
        process_on_nodes(env.report_processor(), cfg.nodes(), skip_offline_nodes, |node| {
            client::remote_client_enable(communicator, node)
        })
        .await?;
    }

    env.push_corosync_conf(&cfg, skip_offline_nodes).await
}

/// Sets up `net` model certificates on every node of the cluster.
pub async fn add_device_model_net(
    env: &LibraryEnvironment,
    qnetd_host: &str,
    cluster_name: &str,
    nodes: &NodeAddressesList,
    skip_offline_nodes: bool,
) -> Result<(), LibraryError> {
    let reporter = env.report_processor();
    let communicator = env.node_communicator();
    let runner = env.cmd_runner();
    let certs = env.cert_store();

    reporter.process(reports::qdevice_certificate_distribution_started())?;

    let ca_certificate = net::remote_qdevice_get_ca_certificate(communicator, qnetd_host)
        .await
        .map_err(remote_call_failure)?;

    process_on_nodes(reporter, nodes, skip_offline_nodes, |node| {
        net::remote_client_setup(communicator, node, &ca_certificate)
    })
    .await?;

    let cert_request = certs
        .client_generate_certificate_request(runner, cluster_name)
        .await?;
    let signed_certificate =
        net::remote_sign_certificate_request(communicator, qnetd_host, &cert_request, cluster_name)
            .await
            .map_err(remote_call_failure)?;
    let pk12_bundle = certs
        .client_cert_request_to_pk12(runner, &signed_certificate)
        .await?;

    process_on_nodes(reporter, nodes, skip_offline_nodes, |node| {
        net::remote_client_import_certificate_and_key(communicator, node, &pk12_bundle)
    })
    .await?;

    info!(qnetd_host, cluster_name, nodes = nodes.len(), "qdevice certificates distributed");
    Ok(())
}

/// Updates options of the existing quorum device.
pub async fn update_device(
    env: &LibraryEnvironment,
    model_options: &BTreeMap<String, String>,
    generic_options: &BTreeMap<String, String>,
    force_options: bool,
    skip_offline_nodes: bool,
) -> Result<(), LibraryError> {
    env.ensure_not_cman()?;
    let mut cfg = env.get_corosync_conf().await?;
    cfg.update_quorum_device(
        env.report_processor(),
        model_options,
        generic_options,
        force_options,
    )?;
    env.push_corosync_conf(&cfg, skip_offline_nodes).await
}

pub async fn remove_device(
    env: &LibraryEnvironment,
    skip_offline_nodes: bool,
) -> Result<(), LibraryError> {
    env.ensure_not_cman()?;
    let mut cfg = env.get_corosync_conf().await?;
    cfg.remove_quorum_device()?;
    env.push_corosync_conf(&cfg, skip_offline_nodes).await
}

// Single host calls are not subject to skip-offline.
fn remote_call_failure(error: net::RemoteCallError) -> LibraryError {
    match error {
        net::RemoteCallError::Communication(e) => {
            e.to_report_item(ReportItemSeverity::Error, None).into()
        }
        net::RemoteCallError::Library(e) => e,
    }
}
