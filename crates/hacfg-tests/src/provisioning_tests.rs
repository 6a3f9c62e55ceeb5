//! Certificate distribution across a simulated qnetd host and cluster.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hacfg_mgmt::commands::{qdevice, quorum};
use hacfg_mgmt::corosync::MemoryCorosyncConfStore;
use hacfg_mgmt::qdevice::client::OP_CLIENT_ENABLE;
use hacfg_mgmt::qdevice::net::{
    CertificateRole, OP_CLIENT_IMPORT_CERTIFICATE, OP_CLIENT_INIT_CERTIFICATE_STORAGE,
    OP_GET_CA_CERTIFICATE, OP_SIGN_NODE_CERTIFICATE,
};
use hacfg_mgmt::reports::MemoryReportProcessor;
use hacfg_mgmt::{LibraryEnvironment, ReportCode, ReportItemSeverity};

use crate::harness::{init_test_logging, SimulatedCluster, FAKE_QNETD_CA};

const CLUSTER_NAME: &str = "test99";
const NODES: &[&str] = &["node1", "node2", "node3"];

struct Scenario {
    cluster: Arc<SimulatedCluster>,
    reporter: Arc<MemoryReportProcessor>,
    conf_store: Arc<MemoryCorosyncConfStore>,
    env: LibraryEnvironment,
}

impl Scenario {
    fn new(cluster: SimulatedCluster) -> Self {
        init_test_logging();
        let cluster = Arc::new(cluster);
        let reporter = Arc::new(MemoryReportProcessor::new());
        let conf_store = Arc::new(MemoryCorosyncConfStore::new(
            cluster.corosync_conf(CLUSTER_NAME),
        ));
        let env = cluster.orchestrator_env("node1", reporter.clone(), conf_store.clone());
        Self {
            cluster,
            reporter,
            conf_store,
            env,
        }
    }

    async fn add_net_device(&self, skip_offline_nodes: bool) -> Result<(), hacfg_mgmt::LibraryError> {
        let model_options = options(&[("host", self.cluster.qnetd_host()), ("algorithm", "ffsplit")]);
        let generic_options = options(&[("timeout", "12345")]);
        quorum::add_device(
            &self.env,
            "net",
            &model_options,
            &generic_options,
            false,
            false,
            skip_offline_nodes,
        )
        .await
    }

    fn reports_of(&self, severity: ReportItemSeverity) -> Vec<(ReportCode, String)> {
        self.reporter
            .items()
            .into_iter()
            .filter(|item| item.severity == severity)
            .map(|item| (item.code, item.info_str("node")))
            .collect()
    }
}

fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn expected_bundle() -> String {
    format!("pk12[signed[request[{}]]]", CLUSTER_NAME)
}

#[tokio::test]
async fn add_net_device_provisions_every_node() {
    let s = Scenario::new(SimulatedCluster::new(
        "add_net_device_provisions_every_node",
        "qnetd",
        NODES,
    ));
    s.cluster.initialize_qnetd().await.unwrap();

    s.add_net_device(false).await.unwrap();

    for node in NODES {
        let host = s.cluster.host(node);
        assert_eq!(
            host.client_trust().as_deref(),
            Some(format!("trusts[{}]", FAKE_QNETD_CA).as_str()),
            "{} trusts the qnetd CA",
            node
        );
        assert_eq!(host.imported_bundle(), Some(expected_bundle()), "{}", node);
    }

    let pushes = s.conf_store.pushes();
    assert_eq!(pushes.len(), 1);
    let rendered = pushes[0].0.render_quorum_section();
    assert!(rendered.contains("model: net"));
    assert!(rendered.contains("timeout: 12345"));
    assert!(rendered.contains("host: qnetd"));
    assert!(rendered.contains("algorithm: ffsplit"));

    let info: Vec<ReportCode> = s
        .reports_of(ReportItemSeverity::Info)
        .into_iter()
        .map(|(code, _)| code)
        .collect();
    assert_eq!(info[0], ReportCode::QdeviceCertificateDistributionStarted);
    assert_eq!(
        info.iter()
            .filter(|c| **c == ReportCode::ServiceEnableSuccess)
            .count(),
        NODES.len()
    );
}

#[tokio::test]
async fn requests_follow_distribution_order() {
    let s = Scenario::new(SimulatedCluster::new(
        "requests_follow_distribution_order",
        "qnetd",
        NODES,
    ));
    s.cluster.initialize_qnetd().await.unwrap();
    s.add_net_device(false).await.unwrap();

    let requests: Vec<String> = s.cluster.calls().into_iter().map(|(_, r)| r).collect();
    let first = |op: &str| requests.iter().position(|r| r == op).unwrap();
    let last = |op: &str| requests.iter().rposition(|r| r == op).unwrap();

    assert!(first(OP_GET_CA_CERTIFICATE) < first(OP_CLIENT_INIT_CERTIFICATE_STORAGE));
    assert!(last(OP_CLIENT_INIT_CERTIFICATE_STORAGE) < first(OP_SIGN_NODE_CERTIFICATE));
    assert!(first(OP_SIGN_NODE_CERTIFICATE) < first(OP_CLIENT_IMPORT_CERTIFICATE));
    assert!(last(OP_CLIENT_IMPORT_CERTIFICATE) < first(OP_CLIENT_ENABLE));

    assert_eq!(s.cluster.targets_of(OP_GET_CA_CERTIFICATE), vec!["qnetd"]);
    assert_eq!(s.cluster.targets_of(OP_SIGN_NODE_CERTIFICATE), vec!["qnetd"]);
    assert_eq!(s.cluster.targets_of(OP_CLIENT_IMPORT_CERTIFICATE), NODES);
}

#[tokio::test]
async fn offline_node_aborts_before_signing() {
    let s = Scenario::new(SimulatedCluster::new(
        "offline_node_aborts_before_signing",
        "qnetd",
        NODES,
    ));
    s.cluster.initialize_qnetd().await.unwrap();
    s.cluster.set_offline("node2");

    let err = s.add_net_device(false).await.unwrap_err();

    assert_eq!(err.reports.len(), 1);
    assert_eq!(err.reports[0].code, ReportCode::NodeCommunicationErrorUnableToConnect);
    assert_eq!(err.reports[0].forceable, Some(ReportCode::SkipOfflineNodes));
    assert!(s.cluster.targets_of(OP_SIGN_NODE_CERTIFICATE).is_empty());
    assert!(s.cluster.targets_of(OP_CLIENT_IMPORT_CERTIFICATE).is_empty());
    assert!(s.conf_store.pushes().is_empty());

    // the other nodes were still asked
    assert_eq!(
        s.cluster.targets_of(OP_CLIENT_INIT_CERTIFICATE_STORAGE),
        NODES
    );
    assert!(s.cluster.host("node3").client_trust().is_some());
}

#[tokio::test]
async fn skip_offline_nodes_downgrades_node_failures() {
    let s = Scenario::new(SimulatedCluster::new(
        "skip_offline_nodes_downgrades_node_failures",
        "qnetd",
        NODES,
    ));
    s.cluster.initialize_qnetd().await.unwrap();
    s.cluster
        .fail_request("node2", OP_CLIENT_INIT_CERTIFICATE_STORAGE);

    s.add_net_device(true).await.unwrap();

    // node2 never got a database, so its import fails too
    assert_eq!(
        s.reports_of(ReportItemSeverity::Warning),
        vec![
            (
                ReportCode::NodeCommunicationErrorUnableToConnect,
                "node2".to_string()
            ),
            (
                ReportCode::NodeCommunicationCommandUnsuccessful,
                "node2".to_string()
            ),
        ]
    );
    assert_eq!(s.cluster.targets_of(OP_CLIENT_IMPORT_CERTIFICATE), NODES);
    assert_eq!(s.cluster.host("node1").imported_bundle(), Some(expected_bundle()));
    assert_eq!(s.cluster.host("node3").imported_bundle(), Some(expected_bundle()));
    assert!(s.cluster.host("node2").imported_bundle().is_none());

    let pushes = s.conf_store.pushes();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].1, "push honours skip-offline");
}

#[tokio::test]
async fn uninitialized_qnetd_is_fatal_even_when_skipping() {
    let s = Scenario::new(SimulatedCluster::new(
        "uninitialized_qnetd_is_fatal_even_when_skipping",
        "qnetd",
        NODES,
    ));

    let err = s.add_net_device(true).await.unwrap_err();

    assert_eq!(err.reports.len(), 1);
    assert_eq!(err.reports[0].code, ReportCode::NodeCommunicationCommandUnsuccessful);
    assert_eq!(err.reports[0].severity, ReportItemSeverity::Error);
    assert_eq!(err.reports[0].forceable, None);
    assert!(s.cluster.targets_of(OP_CLIENT_INIT_CERTIFICATE_STORAGE).is_empty());
    assert!(s.conf_store.pushes().is_empty());
}

#[tokio::test]
async fn signing_failure_is_fatal() {
    let s = Scenario::new(SimulatedCluster::new(
        "signing_failure_is_fatal",
        "qnetd",
        NODES,
    ));
    s.cluster.initialize_qnetd().await.unwrap();
    s.cluster.fail_request("qnetd", OP_SIGN_NODE_CERTIFICATE);

    let err = s.add_net_device(true).await.unwrap_err();

    assert_eq!(err.reports[0].code, ReportCode::NodeCommunicationErrorUnableToConnect);
    assert_eq!(err.reports[0].forceable, None);
    assert!(s.cluster.targets_of(OP_CLIENT_IMPORT_CERTIFICATE).is_empty());
    assert!(s.cluster.host("node1").imported_bundle().is_none());
    assert!(s.conf_store.pushes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn node_failures_are_reported_in_node_order() {
    let cluster = SimulatedCluster::new("node_failures_are_reported_in_node_order", "qnetd", NODES)
        .with_latency("node2", Duration::from_millis(200))
        .with_latency("node3", Duration::from_millis(10));
    let s = Scenario::new(cluster);
    s.cluster.initialize_qnetd().await.unwrap();
    s.cluster
        .fail_request("node2", OP_CLIENT_INIT_CERTIFICATE_STORAGE);
    s.cluster
        .fail_request("node3", OP_CLIENT_INIT_CERTIFICATE_STORAGE);

    let err = s.add_net_device(false).await.unwrap_err();

    let nodes: Vec<String> = err.reports.iter().map(|r| r.info_str("node")).collect();
    assert_eq!(nodes, vec!["node2", "node3"]);
}

#[tokio::test(start_paused = true)]
async fn client_enable_reports_follow_node_order() {
    let cluster = SimulatedCluster::new("client_enable_reports_follow_node_order", "qnetd", NODES)
        .with_latency("node1", Duration::from_millis(200))
        .with_latency("node2", Duration::from_millis(100));
    let s = Scenario::new(cluster);
    s.cluster.initialize_qnetd().await.unwrap();

    s.add_net_device(false).await.unwrap();

    let enabled: Vec<String> = s
        .reports_of(ReportItemSeverity::Info)
        .into_iter()
        .filter(|(code, _)| *code == ReportCode::ServiceEnableSuccess)
        .map(|(_, node)| node)
        .collect();
    assert_eq!(enabled, NODES);
}

#[tokio::test]
async fn file_mode_skips_distribution() {
    let s = Scenario::new(SimulatedCluster::new(
        "file_mode_skips_distribution",
        "qnetd",
        NODES,
    ));
    let env = s.env.with_live_corosync_conf(false);

    let model_options = options(&[("host", "qnetd")]);
    quorum::add_device(&env, "net", &model_options, &BTreeMap::new(), false, false, false)
        .await
        .unwrap();

    assert!(s.cluster.calls().is_empty());
    assert!(!s
        .cluster
        .host("node1")
        .store
        .is_initialized(CertificateRole::Client));
    assert_eq!(s.conf_store.pushes().len(), 1);
}

#[tokio::test]
async fn qnetd_setup_twice_fails_until_destroyed() {
    init_test_logging();
    let cluster = SimulatedCluster::new("qnetd_setup_twice_fails_until_destroyed", "qnetd", &[]);
    cluster.initialize_qnetd().await.unwrap();

    let err = cluster.initialize_qnetd().await.unwrap_err();
    assert!(err.has_code(ReportCode::QdeviceAlreadyInitialized));

    qdevice::qdevice_destroy(cluster.qnetd().env(), "net")
        .await
        .unwrap();
    assert!(!cluster.qnetd().store.is_initialized(CertificateRole::Qnetd));

    cluster.initialize_qnetd().await.unwrap();
    assert!(cluster.qnetd().store.is_initialized(CertificateRole::Qnetd));
}

#[tokio::test]
async fn client_destroy_removes_node_database() {
    let s = Scenario::new(SimulatedCluster::new(
        "client_destroy_removes_node_database",
        "qnetd",
        NODES,
    ));
    s.cluster.initialize_qnetd().await.unwrap();
    s.add_net_device(false).await.unwrap();

    let node3 = s.cluster.host("node3");
    qdevice::client_net_destroy(node3.env()).unwrap();

    assert!(!s.cluster.client_dir("node3").exists());
    assert!(s.cluster.client_dir("node2").exists());
}
