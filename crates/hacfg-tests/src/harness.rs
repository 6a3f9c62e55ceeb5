//! Test Harness - simulated qnetd host and cluster nodes
//!
//! Every simulated host owns a certificate store rooted in the test's temp
//! directory and a [`FakeCertutil`] standing in for both certutil tools. The
//! [`SimulatedCluster`] is itself a [`NodeCommunicator`]: a remote request is
//! served by running the matching library command on the target host.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hacfg_mgmt::commands::qdevice as qdevice_commands;
use hacfg_mgmt::corosync::{CorosyncConf, MemoryCorosyncConfStore};
use hacfg_mgmt::external::{CommandOutput, NodeCommunicationError, NodeCommunicator};
use hacfg_mgmt::node::{NodeAddresses, NodeAddressesList};
use hacfg_mgmt::qdevice::client::OP_CLIENT_ENABLE;
use hacfg_mgmt::qdevice::net::{
    self, CertificateRole, CertificateStore, OP_CLIENT_IMPORT_CERTIFICATE,
    OP_CLIENT_INIT_CERTIFICATE_STORAGE, OP_GET_CA_CERTIFICATE, OP_SIGN_NODE_CERTIFICATE,
};
use hacfg_mgmt::reports::MemoryReportProcessor;
use hacfg_mgmt::testing::{ScriptedCommandRunner, ScriptedNodeCommunicator};
use hacfg_mgmt::LibraryEnvironment;

/// CA certificate the fake qnetd tool creates.
pub const FAKE_QNETD_CA: &str = "qnetd-ca";

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .try_init();
    });
}

#[derive(Debug)]
pub struct TestEnv {
    temp_dir: TempDir,
    test_name: String,
}

impl TestEnv {
    pub fn new(test_name: &str) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
        Self {
            temp_dir,
            test_name: test_name.to_string(),
        }
    }

    pub fn tempdir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Certificate store whose directories live under `<tempdir>/<host>`.
    pub fn cert_store(&self, host: &str) -> CertificateStore {
        let root = self.tempdir().join(host);
        CertificateStore::new(
            root.join("qnetd/nssdb"),
            "/usr/sbin/corosync-qnetd-certutil",
            root.join("node/nssdb"),
            "/usr/sbin/corosync-qdevice-net-certutil",
        )
    }
}

/// Stand-in for the qnetd and node certutil tools of one host.
///
/// Products are plain text wrapping their inputs, so a test can tell which
/// request a certificate was signed from.
#[derive(Debug, Clone)]
pub struct FakeCertutil {
    store: CertificateStore,
}

impl FakeCertutil {
    pub fn new(store: CertificateStore) -> Self {
        Self { store }
    }

    pub fn into_runner(self) -> ScriptedCommandRunner {
        ScriptedCommandRunner::new(move |args| self.run(args))
    }

    pub fn run(&self, args: &[String]) -> CommandOutput {
        match self.try_run(args) {
            Ok(output) => output,
            Err(e) => CommandOutput::new(e.to_string(), 1),
        }
    }

    fn try_run(&self, args: &[String]) -> anyhow::Result<CommandOutput> {
        let (tool, rest) = args
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty command"))?;
        let flags: Vec<&str> = rest.iter().map(String::as_str).collect();
        let tool = Path::new(tool);

        if tool == self.store.tool(CertificateRole::Qnetd) {
            self.qnetd(&flags)
        } else if tool == self.store.tool(CertificateRole::Client) {
            self.client(&flags)
        } else {
            Ok(CommandOutput::new("", 0))
        }
    }

    fn qnetd(&self, flags: &[&str]) -> anyhow::Result<CommandOutput> {
        let dir = self.store.certs_dir(CertificateRole::Qnetd);
        match flags {
            ["-i"] => {
                fs::create_dir_all(dir)?;
                fs::write(dir.join("cert9.db"), "qnetd database")?;
                fs::write(self.store.qnetd_ca_file_path(), FAKE_QNETD_CA)?;
                Ok(CommandOutput::new("Certificate database initialized\n", 0))
            }
            ["-s", "-c", request, "-n", cluster] => {
                let request = fs::read_to_string(request)?;
                let path = dir.join(format!("cluster-{}.crt", cluster));
                fs::write(&path, format!("signed[{}]", request))?;
                Ok(stored("Certificate stored in", &path))
            }
            other => anyhow::bail!("unexpected qnetd certutil arguments: {:?}", other),
        }
    }

    fn client(&self, flags: &[&str]) -> anyhow::Result<CommandOutput> {
        let dir = self.store.certs_dir(CertificateRole::Client);
        match flags {
            ["-i", "-c", ca_file] => {
                let ca = fs::read_to_string(ca_file)?;
                fs::write(dir.join("cert9.db"), format!("trusts[{}]", ca))?;
                Ok(CommandOutput::new("", 0))
            }
            ["-r", "-n", cluster] => {
                let path = dir.join("qdevice-net-node.crq");
                fs::write(&path, format!("request[{}]", cluster))?;
                Ok(stored("Certificate request stored in", &path))
            }
            ["-M", "-c", signed] => {
                let signed = fs::read_to_string(signed)?;
                let path = dir.join("qdevice-net-node.p12");
                fs::write(&path, format!("pk12[{}]", signed))?;
                Ok(stored("Certificate stored in", &path))
            }
            ["-m", "-c", bundle] => {
                fs::copy(bundle, dir.join("imported.p12"))?;
                Ok(CommandOutput::new("", 0))
            }
            other => anyhow::bail!("unexpected node certutil arguments: {:?}", other),
        }
    }
}

fn stored(marker: &str, path: &Path) -> CommandOutput {
    CommandOutput::new(format!("{} {}\n", marker, path.display()), 0)
}

/// One simulated machine: its certificate store and the environment its
/// daemon runs commands in.
pub struct SimulatedHost {
    pub name: String,
    pub store: CertificateStore,
    env: LibraryEnvironment,
    corosync_enabled: AtomicBool,
}

impl SimulatedHost {
    fn new(name: &str, store: CertificateStore) -> Self {
        let env = LibraryEnvironment::new(
            Arc::new(MemoryReportProcessor::new()),
            Arc::new(FakeCertutil::new(store.clone()).into_runner()),
            Arc::new(ScriptedNodeCommunicator::new()),
            Arc::new(MemoryCorosyncConfStore::default()),
            store.clone(),
        );
        Self {
            name: name.to_string(),
            store,
            env,
            corosync_enabled: AtomicBool::new(true),
        }
    }

    pub fn env(&self) -> &LibraryEnvironment {
        &self.env
    }

    /// Contents of the client database, if initialized.
    pub fn client_trust(&self) -> Option<String> {
        self.read_client_file("cert9.db")
    }

    /// Certificate bundle imported into the client database.
    pub fn imported_bundle(&self) -> Option<String> {
        self.read_client_file("imported.p12")
    }

    fn read_client_file(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.store.certs_dir(CertificateRole::Client).join(name)).ok()
    }

    fn failure(&self, request: &str, reason: String) -> NodeCommunicationError {
        NodeCommunicationError::CommandUnsuccessful {
            node: self.name.clone(),
            command: request.to_string(),
            reason,
        }
    }

    fn decode_field(
        &self,
        form: &HashMap<String, String>,
        request: &str,
        field: &str,
    ) -> Result<Vec<u8>, NodeCommunicationError> {
        let value = form
            .get(field)
            .ok_or_else(|| self.failure(request, format!("missing {}", field)))?;
        STANDARD
            .decode(value)
            .map_err(|e| self.failure(request, format!("invalid {}: {}", field, e)))
    }

    async fn handle(&self, request: &str, data: &str) -> Result<String, NodeCommunicationError> {
        let form = parse_form(data);
        let failed = |e: hacfg_mgmt::LibraryError| self.failure(request, e.to_string());
        match request {
            OP_GET_CA_CERTIFICATE => {
                let ca = qdevice_commands::qdevice_get_ca_certificate(&self.env, net::MODEL)
                    .map_err(failed)?;
                Ok(STANDARD.encode(ca))
            }
            OP_SIGN_NODE_CERTIFICATE => {
                let cert_request = self.decode_field(&form, request, "certificate_request")?;
                let cluster_name = form.get("cluster_name").cloned().unwrap_or_default();
                let signed = qdevice_commands::qdevice_sign_certificate_request(
                    &self.env,
                    net::MODEL,
                    &cert_request,
                    &cluster_name,
                )
                .await
                .map_err(failed)?;
                Ok(STANDARD.encode(signed))
            }
            OP_CLIENT_INIT_CERTIFICATE_STORAGE => {
                let ca = self.decode_field(&form, request, "ca_certificate")?;
                qdevice_commands::client_net_setup(&self.env, &ca)
                    .await
                    .map_err(failed)?;
                Ok(String::new())
            }
            OP_CLIENT_IMPORT_CERTIFICATE => {
                let bundle = self.decode_field(&form, request, "certificate")?;
                qdevice_commands::client_net_import_certificate(&self.env, &bundle)
                    .await
                    .map_err(failed)?;
                Ok(String::new())
            }
            OP_CLIENT_ENABLE => {
                if self.corosync_enabled.load(Ordering::SeqCst) {
                    Ok("corosync-qdevice enabled".to_string())
                } else {
                    Ok("corosync is not enabled, skipping".to_string())
                }
            }
            _ => Err(NodeCommunicationError::UnsupportedCommand {
                node: self.name.clone(),
                command: request.to_string(),
                reason: "HTTP error: 404".to_string(),
            }),
        }
    }
}

/// Decodes a form body produced by the library: `=` arrives as `%3D`.
pub fn parse_form(data: &str) -> HashMap<String, String> {
    data.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.replace("%3D", "=")))
        .collect()
}

/// A qnetd host plus cluster nodes, reachable through [`NodeCommunicator`].
pub struct SimulatedCluster {
    test_env: TestEnv,
    qnetd_host: String,
    node_names: Vec<String>,
    hosts: BTreeMap<String, SimulatedHost>,
    latency: HashMap<String, Duration>,
    offline: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<(String, String)>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl SimulatedCluster {
    pub fn new(test_name: &str, qnetd_host: &str, nodes: &[&str]) -> Self {
        let test_env = TestEnv::new(test_name);
        let hosts = std::iter::once(qnetd_host)
            .chain(nodes.iter().copied())
            .map(|name| (name.to_string(), SimulatedHost::new(name, test_env.cert_store(name))))
            .collect();
        Self {
            test_env,
            qnetd_host: qnetd_host.to_string(),
            node_names: nodes.iter().map(|n| n.to_string()).collect(),
            hosts,
            latency: HashMap::new(),
            offline: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, host: &str, latency: Duration) -> Self {
        self.latency.insert(host.to_string(), latency);
        self
    }

    pub fn tempdir(&self) -> &Path {
        self.test_env.tempdir()
    }

    pub fn qnetd_host(&self) -> &str {
        &self.qnetd_host
    }

    pub fn host(&self, name: &str) -> &SimulatedHost {
        &self.hosts[name]
    }

    pub fn qnetd(&self) -> &SimulatedHost {
        self.host(&self.qnetd_host)
    }

    pub fn nodes(&self) -> NodeAddressesList {
        self.node_names.iter().map(NodeAddresses::new).collect()
    }

    pub fn corosync_conf(&self, cluster_name: &str) -> CorosyncConf {
        CorosyncConf {
            cluster_name: cluster_name.to_string(),
            nodes: self.nodes(),
            ..CorosyncConf::default()
        }
    }

    /// Runs qnetd setup on the qnetd host.
    pub async fn initialize_qnetd(&self) -> Result<(), hacfg_mgmt::LibraryError> {
        qdevice_commands::qdevice_setup(self.qnetd().env(), net::MODEL, false, false).await
    }

    pub fn set_offline(&self, host: &str) {
        self.offline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_string());
    }

    /// Makes one operation on one host unreachable.
    pub fn fail_request(&self, host: &str, request: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((host.to_string(), request.to_string()));
    }

    pub fn set_corosync_enabled(&self, host: &str, enabled: bool) {
        self.host(host)
            .corosync_enabled
            .store(enabled, Ordering::SeqCst);
    }

    /// Every (host, request) seen, in the order requests were sent.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Hosts that received `request`, in order.
    pub fn targets_of(&self, request: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, r)| r == request)
            .map(|(host, _)| host)
            .collect()
    }

    fn is_unreachable(&self, host: &str, request: &str) -> bool {
        self.offline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(host)
            || self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&(host.to_string(), request.to_string()))
    }

    /// Environment of a cluster node orchestrating a command, talking to the
    /// other hosts through this cluster.
    pub fn orchestrator_env(
        self: &Arc<Self>,
        node: &str,
        reporter: Arc<MemoryReportProcessor>,
        corosync_conf: Arc<MemoryCorosyncConfStore>,
    ) -> LibraryEnvironment {
        let store = self.host(node).store.clone();
        LibraryEnvironment::new(
            reporter,
            Arc::new(FakeCertutil::new(store.clone()).into_runner()),
            self.clone(),
            corosync_conf,
            store,
        )
    }

    pub fn client_dir(&self, host: &str) -> PathBuf {
        self.host(host)
            .store
            .certs_dir(CertificateRole::Client)
            .to_path_buf()
    }
}

#[async_trait]
impl NodeCommunicator for SimulatedCluster {
    async fn call_host(
        &self,
        host: &str,
        request: &str,
        data: &str,
    ) -> Result<String, NodeCommunicationError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((host.to_string(), request.to_string()));
        if let Some(latency) = self.latency.get(host) {
            tokio::time::sleep(*latency).await;
        }
        debug!(host, request, "simulated request");

        let target = match self.hosts.get(host) {
            Some(target) if !self.is_unreachable(host, request) => target,
            _ => {
                return Err(NodeCommunicationError::UnableToConnect {
                    node: host.to_string(),
                    command: request.to_string(),
                    reason: "connection refused".to_string(),
                })
            }
        };
        target.handle(request, data).await
    }
}
