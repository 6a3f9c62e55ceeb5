//! Commands run on the qnetd host and on the cluster nodes, usually on behalf
//! of a remote request.

use tracing::info;

use crate::env::LibraryEnvironment;
use crate::qdevice::net::{self, CertificateRole};
use crate::reports::{self, LibraryError};
use crate::service::{run_service_action, ServiceAction};

/// Service name of the qnetd arbitrator.
pub const QNETD_SERVICE: &str = "corosync-qnetd";

fn ensure_supported_model(model: &str) -> Result<(), LibraryError> {
    if model == net::MODEL {
        Ok(())
    } else {
        Err(reports::invalid_option_value("model", model, &[net::MODEL]).into())
    }
}

async fn service_action(
    env: &LibraryEnvironment,
    action: ServiceAction,
) -> Result<(), LibraryError> {
    run_service_action(env.cmd_runner(), env.systemctl(), QNETD_SERVICE, action).await?;
    env.report_processor()
        .process(reports::service_action_succeeded(QNETD_SERVICE, action.as_str()))
}

/// Initializes the qnetd certificate database, optionally enabling and
/// starting the qnetd service.
pub async fn qdevice_setup(
    env: &LibraryEnvironment,
    model: &str,
    enable: bool,
    start: bool,
) -> Result<(), LibraryError> {
    ensure_supported_model(model)?;
    env.cert_store().setup(env.cmd_runner()).await?;
    env.report_processor()
        .process(reports::qdevice_initialization_success(model))?;
    if enable {
        service_action(env, ServiceAction::Enable).await?;
    }
    if start {
        service_action(env, ServiceAction::Start).await?;
    }
    Ok(())
}

/// Stops and disables qnetd, then removes its certificate database.
pub async fn qdevice_destroy(env: &LibraryEnvironment, model: &str) -> Result<(), LibraryError> {
    ensure_supported_model(model)?;
    service_action(env, ServiceAction::Stop).await?;
    service_action(env, ServiceAction::Disable).await?;
    env.cert_store().destroy(CertificateRole::Qnetd)?;
    env.report_processor()
        .process(reports::qdevice_destroy_success(model))
}

pub fn qdevice_get_ca_certificate(
    env: &LibraryEnvironment,
    model: &str,
) -> Result<Vec<u8>, LibraryError> {
    ensure_supported_model(model)?;
    env.cert_store().qdevice_get_ca_certificate()
}

pub async fn qdevice_sign_certificate_request(
    env: &LibraryEnvironment,
    model: &str,
    cert_request: &[u8],
    cluster_name: &str,
) -> Result<Vec<u8>, LibraryError> {
    ensure_supported_model(model)?;
    env.cert_store()
        .qdevice_sign_certificate_request(env.cmd_runner(), cert_request, cluster_name)
        .await
}

/// Node side of certificate distribution: re-create the client database.
pub async fn client_net_setup(
    env: &LibraryEnvironment,
    ca_certificate: &[u8],
) -> Result<(), LibraryError> {
    env.cert_store()
        .client_setup(env.cmd_runner(), ca_certificate)
        .await?;
    info!("qdevice client certificate database ready");
    Ok(())
}

/// Node side of certificate distribution: import the PKCS#12 bundle.
pub async fn client_net_import_certificate(
    env: &LibraryEnvironment,
    pk12_bundle: &[u8],
) -> Result<(), LibraryError> {
    env.cert_store()
        .client_import_certificate_and_key(env.cmd_runner(), pk12_bundle)
        .await
}

pub fn client_net_destroy(env: &LibraryEnvironment) -> Result<(), LibraryError> {
    env.cert_store().destroy(CertificateRole::Client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corosync::MemoryCorosyncConfStore;
    use crate::external::CommandOutput;
    use crate::qdevice::net::CertificateStore;
    use crate::reports::{MemoryReportProcessor, ReportCode};
    use crate::testing::{ScriptedCommandRunner, ScriptedNodeCommunicator};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        reporter: Arc<MemoryReportProcessor>,
        runner: Arc<ScriptedCommandRunner>,
        env: LibraryEnvironment,
    }

    fn fixture(runner: ScriptedCommandRunner) -> Fixture {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(MemoryReportProcessor::new());
        let runner = Arc::new(runner);
        let env = LibraryEnvironment::new(
            reporter.clone(),
            runner.clone(),
            Arc::new(ScriptedNodeCommunicator::new()),
            Arc::new(MemoryCorosyncConfStore::default()),
            CertificateStore::new(
                dir.path().join("qnetd"),
                "/usr/sbin/qnetd-certutil",
                dir.path().join("node"),
                "/usr/sbin/node-certutil",
            ),
        )
        .with_systemctl("/usr/bin/systemctl");
        Fixture {
            dir,
            reporter,
            runner,
            env,
        }
    }

    fn codes(f: &Fixture) -> Vec<ReportCode> {
        f.reporter.items().iter().map(|i| i.code).collect()
    }

    #[tokio::test]
    async fn setup_initializes_enables_and_starts() {
        let f = fixture(ScriptedCommandRunner::returning("", 0));
        qdevice_setup(&f.env, "net", true, true).await.unwrap();

        let calls = f.runner.calls();
        assert_eq!(calls[0], vec!["/usr/sbin/qnetd-certutil", "-i"]);
        assert_eq!(calls[1], vec!["/usr/bin/systemctl", "enable", "corosync-qnetd.service"]);
        assert_eq!(calls[2], vec!["/usr/bin/systemctl", "start", "corosync-qnetd.service"]);
        assert_eq!(
            codes(&f),
            vec![
                ReportCode::QdeviceInitializationSuccess,
                ReportCode::ServiceActionSucceeded,
                ReportCode::ServiceActionSucceeded,
            ]
        );
    }

    #[tokio::test]
    async fn setup_rejects_unknown_model() {
        let f = fixture(ScriptedCommandRunner::returning("", 0));
        let err = qdevice_setup(&f.env, "bad model", false, false)
            .await
            .unwrap_err();
        assert_eq!(err.reports[0].code, ReportCode::InvalidOptionValue);
        assert!(f.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn setup_failure_skips_service_actions() {
        let f = fixture(ScriptedCommandRunner::returning("test error", 1));
        let err = qdevice_setup(&f.env, "net", true, true).await.unwrap_err();
        assert_eq!(err.reports[0].code, ReportCode::QdeviceInitializationError);
        assert_eq!(f.runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn destroy_stops_disables_and_removes_database() {
        let f = fixture(ScriptedCommandRunner::returning("", 0));
        let qnetd_dir = f.dir.path().join("qnetd");
        std::fs::create_dir_all(&qnetd_dir).unwrap();
        std::fs::write(qnetd_dir.join("cert9.db"), b"db").unwrap();

        qdevice_destroy(&f.env, "net").await.unwrap();

        assert!(!qnetd_dir.exists());
        let actions: Vec<String> = f.runner.calls().iter().map(|c| c[1].clone()).collect();
        assert_eq!(actions, vec!["stop", "disable"]);
        assert_eq!(codes(&f).last(), Some(&ReportCode::QdeviceDestroySuccess));
    }

    #[tokio::test]
    async fn client_setup_and_import_roundtrip_through_store() {
        let f = fixture(ScriptedCommandRunner::new(|_| CommandOutput::new("", 0)));
        client_net_setup(&f.env, b"ca cert").await.unwrap();
        client_net_import_certificate(&f.env, b"bundle").await.unwrap();

        let calls = f.runner.calls();
        assert_eq!(calls[0][1], "-i");
        assert_eq!(calls[1][1], "-m");

        client_net_destroy(&f.env).unwrap();
        assert!(!f.dir.path().join("node").exists());
    }

    #[test]
    fn get_ca_certificate_requires_initialized_qnetd() {
        let f = fixture(ScriptedCommandRunner::returning("", 0));
        let err = qdevice_get_ca_certificate(&f.env, "net").unwrap_err();
        assert_eq!(err.reports[0].code, ReportCode::QdeviceNotInitialized);
    }
}
