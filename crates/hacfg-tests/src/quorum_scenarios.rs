//! Quorum configuration and alert editing scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;

use hacfg_mgmt::alert::{AlertChanges, AlertConfiguration};
use hacfg_mgmt::commands::quorum;
use hacfg_mgmt::corosync::{MemoryCorosyncConfStore, QuorumDevice};
use hacfg_mgmt::reports::MemoryReportProcessor;
use hacfg_mgmt::{ClusterType, LibraryEnvironment, ReportCode};

use crate::harness::{init_test_logging, SimulatedCluster};

fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

struct Editor {
    cluster: Arc<SimulatedCluster>,
    reporter: Arc<MemoryReportProcessor>,
    conf_store: Arc<MemoryCorosyncConfStore>,
}

impl Editor {
    fn new(test_name: &str) -> Self {
        init_test_logging();
        let cluster = Arc::new(SimulatedCluster::new(test_name, "qnetd", &["node1", "node2"]));
        let conf_store = Arc::new(MemoryCorosyncConfStore::new(cluster.corosync_conf("cl")));
        Self {
            cluster,
            reporter: Arc::new(MemoryReportProcessor::new()),
            conf_store,
        }
    }

    fn env(&self) -> LibraryEnvironment {
        self.cluster
            .orchestrator_env("node1", self.reporter.clone(), self.conf_store.clone())
    }

    fn file_env(&self) -> LibraryEnvironment {
        self.env().with_live_corosync_conf(false)
    }
}

#[tokio::test]
async fn file_mode_device_lifecycle() {
    let editor = Editor::new("file_mode_device_lifecycle");
    let env = editor.file_env();

    quorum::add_device(
        &env,
        "net",
        &options(&[("host", "127.0.0.1"), ("algorithm", "lms")]),
        &options(&[("timeout", "20")]),
        false,
        false,
        false,
    )
    .await
    .unwrap();

    let config = quorum::get_config(&env).await.unwrap();
    assert_eq!(
        config.device,
        Some(QuorumDevice {
            model: "net".to_string(),
            model_options: options(&[("algorithm", "lms"), ("host", "127.0.0.1")]),
            generic_options: options(&[("timeout", "20")]),
        })
    );

    quorum::remove_device(&env, false).await.unwrap();
    let config = quorum::get_config(&env).await.unwrap();
    assert!(config.device.is_none());
    assert!(editor.cluster.calls().is_empty());
    assert_eq!(editor.conf_store.pushes().len(), 2);
}

#[tokio::test]
async fn update_keeps_empty_values() {
    let editor = Editor::new("update_keeps_empty_values");
    let env = editor.file_env();
    quorum::add_device(
        &env,
        "net",
        &options(&[("host", "qnetd"), ("port", "4433")]),
        &BTreeMap::new(),
        false,
        false,
        false,
    )
    .await
    .unwrap();

    quorum::update_device(&env, &options(&[("port", "")]), &options(&[("timeout", "9")]), false, false)
        .await
        .unwrap();

    let device = editor.conf_store.current().quorum_device.unwrap();
    assert_eq!(device.model_options.get("port").map(String::as_str), Some(""));
    assert_eq!(device.generic_options.get("timeout").map(String::as_str), Some("9"));
}

#[tokio::test]
async fn options_can_be_set_and_cleared() {
    let editor = Editor::new("options_can_be_set_and_cleared");
    let env = editor.file_env();

    quorum::set_options(&env, &options(&[("wait_for_all", "1"), ("auto_tie_breaker", "1")]), false)
        .await
        .unwrap();
    quorum::set_options(&env, &options(&[("auto_tie_breaker", "")]), false)
        .await
        .unwrap();

    let config = quorum::get_config(&env).await.unwrap();
    assert_eq!(config.options, options(&[("wait_for_all", "1")]));

    let err = quorum::set_options(&env, &options(&[("bad", "1")]), false)
        .await
        .unwrap_err();
    assert!(err.has_code(ReportCode::InvalidOption));
    assert_eq!(editor.conf_store.pushes().len(), 2);
}

#[tokio::test]
async fn quorum_config_serializes_to_json() {
    let editor = Editor::new("quorum_config_serializes_to_json");
    let env = editor.file_env();
    quorum::add_device(&env, "net", &options(&[("host", "qnetd")]), &BTreeMap::new(), false, false, false)
        .await
        .unwrap();

    let config = quorum::get_config(&env).await.unwrap();
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["device"]["model"], "net");
    assert_eq!(json["device"]["model_options"]["host"], "qnetd");
}

#[tokio::test]
async fn disabled_corosync_skips_client_enable() {
    let editor = Editor::new("disabled_corosync_skips_client_enable");
    editor.cluster.initialize_qnetd().await.unwrap();
    editor.cluster.set_corosync_enabled("node2", false);

    quorum::add_device(
        &editor.env(),
        "net",
        &options(&[("host", "qnetd")]),
        &BTreeMap::new(),
        false,
        false,
        false,
    )
    .await
    .unwrap();

    let enable: Vec<(ReportCode, String)> = editor
        .reporter
        .items()
        .into_iter()
        .filter(|i| {
            matches!(
                i.code,
                ReportCode::ServiceEnableSuccess | ReportCode::ServiceEnableSkipped
            )
        })
        .map(|i| (i.code, i.info_str("node")))
        .collect();
    assert_eq!(
        enable,
        vec![
            (ReportCode::ServiceEnableSuccess, "node1".to_string()),
            (ReportCode::ServiceEnableSkipped, "node2".to_string()),
        ]
    );
}

#[tokio::test]
async fn forced_model_still_enables_clients() {
    let editor = Editor::new("forced_model_still_enables_clients");

    quorum::add_device(&editor.env(), "custom", &BTreeMap::new(), &BTreeMap::new(), true, false, false)
        .await
        .unwrap();

    let requests: Vec<String> = editor.cluster.calls().into_iter().map(|(_, r)| r).collect();
    assert_eq!(
        requests,
        vec![
            hacfg_mgmt::qdevice::client::OP_CLIENT_ENABLE,
            hacfg_mgmt::qdevice::client::OP_CLIENT_ENABLE,
        ]
    );
    assert_eq!(
        editor.conf_store.current().quorum_device.map(|d| d.model),
        Some("custom".to_string())
    );
}

#[tokio::test]
async fn cman_cluster_refuses_every_quorum_command() {
    let editor = Editor::new("cman_cluster_refuses_every_quorum_command");
    let env = editor.env().with_cluster_type(ClusterType::Cman);
    let none = BTreeMap::new();
    let host = options(&[("host", "qnetd")]);

    let results = vec![
        quorum::get_config(&env).await.map(|_| ()),
        quorum::set_options(&env, &options(&[("wait_for_all", "1")]), false).await,
        quorum::add_device(&env, "net", &host, &none, false, false, false).await,
        quorum::update_device(&env, &host, &none, false, false).await,
        quorum::remove_device(&env, false).await,
    ];

    for result in results {
        let err = result.unwrap_err();
        assert!(err.has_code(ReportCode::CmanUnsupportedCommand));
    }
    assert!(editor.cluster.calls().is_empty());
    assert!(editor.conf_store.pushes().is_empty());
}

#[tokio::test]
async fn cman_file_is_editable() {
    let editor = Editor::new("cman_file_is_editable");
    let env = editor
        .file_env()
        .with_cluster_type(ClusterType::Cman);

    quorum::set_options(&env, &options(&[("wait_for_all", "1")]), false)
        .await
        .unwrap();
    assert_eq!(editor.conf_store.pushes().len(), 1);
}

#[test]
fn alert_ids_and_recipients() {
    init_test_logging();
    let reporter = MemoryReportProcessor::new();
    let mut alerts = AlertConfiguration::new();

    let first = alerts
        .create_alert(None, Some("/usr/bin/agent"), AlertChanges::default())
        .unwrap();
    let second = alerts
        .create_alert(None, Some("/usr/bin/agent"), AlertChanges::default())
        .unwrap();
    assert_eq!((first.as_str(), second.as_str()), ("alert", "alert-1"));

    let recipient = alerts
        .add_recipient(&reporter, "alert", Some("admin@example.com"), None, AlertChanges::default(), false)
        .unwrap();
    assert_eq!(recipient, "alert-recipient");

    let err = alerts
        .add_recipient(&reporter, "alert", Some("admin@example.com"), None, AlertChanges::default(), false)
        .unwrap_err();
    assert!(err.has_code(ReportCode::CibAlertRecipientAlreadyExists));

    alerts
        .add_recipient(&reporter, "alert", Some("admin@example.com"), None, AlertChanges::default(), true)
        .unwrap();
    assert_eq!(alerts.alert("alert").unwrap().recipients.len(), 2);

    let err = alerts.remove_alerts(&["alert-1", "missing"]).unwrap_err();
    assert!(err.has_code(ReportCode::IdNotFound));
    assert_eq!(alerts.alerts().len(), 2);
}

#[test]
fn alert_configuration_persists_as_json() {
    let mut alerts = AlertConfiguration::new();
    let changes = AlertChanges {
        description: Some("pager"),
        instance_attributes: options(&[("level", "crit")]),
        ..AlertChanges::default()
    };
    alerts
        .create_alert(Some("pager"), Some("/usr/bin/page"), changes)
        .unwrap();

    let json = serde_json::to_string(&alerts).unwrap();
    let restored: AlertConfiguration = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, alerts);
    assert_eq!(
        restored.alert("pager").unwrap().instance_attributes["level"],
        "crit"
    );
}
