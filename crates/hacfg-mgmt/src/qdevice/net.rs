//! Certificates for the `net` quorum device model.
//!
//! The qnetd host owns a certificate authority in its certificate database.
//! Every cluster node owns a client database seeded with that authority and a
//! client certificate signed by it. All database work is delegated to the
//! external certutil tools; this module only prepares their input files and
//! picks up the files they produce.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::HacfgConfig;
use crate::external::{is_dir_nonempty, CommandRunner, NodeCommunicationError, NodeCommunicator};
use crate::node::NodeAddresses;
use crate::reports::{self, LibraryError, ReportItem};

/// Model name as it appears in reports and in the cluster configuration.
pub const MODEL: &str = "net";

pub const DEFAULT_CA_FILE_NAME: &str = "qnetd-cacert.crt";

pub const OP_GET_CA_CERTIFICATE: &str = "remote/qdevice_net_get_ca_certificate";
pub const OP_CLIENT_INIT_CERTIFICATE_STORAGE: &str =
    "remote/qdevice_net_client_init_certificate_storage";
pub const OP_SIGN_NODE_CERTIFICATE: &str = "remote/qdevice_net_sign_node_certificate";
pub const OP_CLIENT_IMPORT_CERTIFICATE: &str = "remote/qdevice_net_client_import_certificate";

const STORED_FILE_MARKERS: [&str; 2] = ["Certificate request stored in ", "Certificate stored in "];

/// Which certificate database an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateRole {
    /// The arbitrator's database holding the CA.
    Qnetd,
    /// A cluster node's database.
    Client,
}

/// Failure of a remote call whose response is also decoded locally.
#[derive(Debug, Error)]
pub enum RemoteCallError {
    #[error(transparent)]
    Communication(#[from] NodeCommunicationError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

/// Locations of both certificate databases and the tools managing them.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    qnetd_certs_dir: PathBuf,
    qnetd_tool: PathBuf,
    qnetd_ca_file_name: String,
    client_certs_dir: PathBuf,
    client_tool: PathBuf,
    client_ca_file_name: String,
}

impl CertificateStore {
    pub fn new(
        qnetd_certs_dir: impl Into<PathBuf>,
        qnetd_tool: impl Into<PathBuf>,
        client_certs_dir: impl Into<PathBuf>,
        client_tool: impl Into<PathBuf>,
    ) -> Self {
        Self {
            qnetd_certs_dir: qnetd_certs_dir.into(),
            qnetd_tool: qnetd_tool.into(),
            qnetd_ca_file_name: DEFAULT_CA_FILE_NAME.to_string(),
            client_certs_dir: client_certs_dir.into(),
            client_tool: client_tool.into(),
            client_ca_file_name: DEFAULT_CA_FILE_NAME.to_string(),
        }
    }

    pub fn from_config(config: &HacfgConfig) -> Self {
        Self {
            qnetd_certs_dir: config.qnetd_certs_dir.clone(),
            qnetd_tool: config.qnetd_tool.clone(),
            qnetd_ca_file_name: config.qnetd_ca_file_name.clone(),
            client_certs_dir: config.client_certs_dir.clone(),
            client_tool: config.client_tool.clone(),
            client_ca_file_name: config.client_ca_file_name.clone(),
        }
    }

    pub fn certs_dir(&self, role: CertificateRole) -> &Path {
        match role {
            CertificateRole::Qnetd => &self.qnetd_certs_dir,
            CertificateRole::Client => &self.client_certs_dir,
        }
    }

    pub fn tool(&self, role: CertificateRole) -> &Path {
        match role {
            CertificateRole::Qnetd => &self.qnetd_tool,
            CertificateRole::Client => &self.client_tool,
        }
    }

    /// Where the qnetd CA certificate is kept on the qnetd host.
    pub fn qnetd_ca_file_path(&self) -> PathBuf {
        self.qnetd_certs_dir.join(&self.qnetd_ca_file_name)
    }

    /// Where a node keeps its copy of the qnetd CA certificate.
    pub fn client_ca_file_path(&self) -> PathBuf {
        self.client_certs_dir.join(&self.client_ca_file_name)
    }

    /// A database counts as initialized once its directory has any entry.
    pub fn is_initialized(&self, role: CertificateRole) -> bool {
        is_dir_nonempty(self.certs_dir(role))
    }

    fn ensure_initialized(&self, role: CertificateRole) -> Result<(), LibraryError> {
        if self.is_initialized(role) {
            Ok(())
        } else {
            Err(reports::qdevice_not_initialized(MODEL).into())
        }
    }

    fn tool_args(&self, role: CertificateRole, args: &[&str]) -> Vec<String> {
        let mut full = vec![self.tool(role).display().to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    /// Creates the qnetd certificate database with a fresh CA.
    pub async fn setup(&self, runner: &dyn CommandRunner) -> Result<(), LibraryError> {
        if self.is_initialized(CertificateRole::Qnetd) {
            return Err(reports::qdevice_already_initialized(MODEL).into());
        }
        let args = self.tool_args(CertificateRole::Qnetd, &["-i"]);
        run_initialization(runner, &args).await?;
        info!(dir = %self.qnetd_certs_dir.display(), "qnetd certificate database initialized");
        Ok(())
    }

    /// Removes a certificate database. Missing databases are not an error.
    pub fn destroy(&self, role: CertificateRole) -> Result<(), LibraryError> {
        if !self.is_initialized(role) {
            return Ok(());
        }
        let dir = self.certs_dir(role);
        fs::remove_dir_all(dir)
            .map_err(|e| reports::qdevice_destroy_error(MODEL, &os_error_reason(&e)))?;
        info!(dir = %dir.display(), ?role, "certificate database removed");
        Ok(())
    }

    /// Reads the CA certificate of an initialized qnetd database.
    pub fn qdevice_get_ca_certificate(&self) -> Result<Vec<u8>, LibraryError> {
        self.ensure_initialized(CertificateRole::Qnetd)?;
        let path = self.qnetd_ca_file_path();
        fs::read(&path).map_err(|e| {
            reports::qdevice_certificate_read_error(&path.display().to_string(), &os_error_reason(&e))
                .into()
        })
    }

    /// Signs a node's certificate request with the qnetd CA.
    pub async fn qdevice_sign_certificate_request(
        &self,
        runner: &dyn CommandRunner,
        cert_request: &[u8],
        cluster_name: &str,
    ) -> Result<Vec<u8>, LibraryError> {
        self.ensure_initialized(CertificateRole::Qnetd)?;
        let tmpfile = store_to_tmpfile(cert_request, reports::qdevice_certificate_sign_error)?;
        let tmp_path = tmpfile.path().display().to_string();
        let args = self.tool_args(
            CertificateRole::Qnetd,
            &["-s", "-c", &tmp_path, "-n", cluster_name],
        );
        run_certificate_tool(runner, &args, reports::qdevice_certificate_sign_error).await
    }

    /// Wipes the client database and re-creates it around `ca_certificate`.
    pub async fn client_setup(
        &self,
        runner: &dyn CommandRunner,
        ca_certificate: &[u8],
    ) -> Result<(), LibraryError> {
        self.destroy(CertificateRole::Client)?;

        let ca_file = self.client_ca_file_path();
        fs::create_dir_all(&self.client_certs_dir)
            .and_then(|_| fs::write(&ca_file, ca_certificate))
            .map_err(|e| reports::qdevice_initialization_error(MODEL, &os_error_reason(&e)))?;

        let ca_path = ca_file.display().to_string();
        let args = self.tool_args(CertificateRole::Client, &["-i", "-c", &ca_path]);
        run_initialization(runner, &args).await?;
        info!(dir = %self.client_certs_dir.display(), "client certificate database initialized");
        Ok(())
    }

    /// Generates a certificate request for this node.
    pub async fn client_generate_certificate_request(
        &self,
        runner: &dyn CommandRunner,
        cluster_name: &str,
    ) -> Result<Vec<u8>, LibraryError> {
        self.ensure_initialized(CertificateRole::Client)?;
        let args = self.tool_args(CertificateRole::Client, &["-r", "-n", cluster_name]);
        run_certificate_tool(runner, &args, |reason| {
            reports::qdevice_initialization_error(MODEL, reason)
        })
        .await
    }

    /// Turns a signed certificate into a PKCS#12 bundle holding the node key.
    pub async fn client_cert_request_to_pk12(
        &self,
        runner: &dyn CommandRunner,
        signed_certificate: &[u8],
    ) -> Result<Vec<u8>, LibraryError> {
        self.ensure_initialized(CertificateRole::Client)?;
        let tmpfile =
            store_to_tmpfile(signed_certificate, reports::qdevice_certificate_import_error)?;
        let tmp_path = tmpfile.path().display().to_string();
        let args = self.tool_args(CertificateRole::Client, &["-M", "-c", &tmp_path]);
        run_certificate_tool(runner, &args, reports::qdevice_certificate_import_error).await
    }

    /// Imports a PKCS#12 bundle into the client database.
    pub async fn client_import_certificate_and_key(
        &self,
        runner: &dyn CommandRunner,
        pk12_bundle: &[u8],
    ) -> Result<(), LibraryError> {
        self.ensure_initialized(CertificateRole::Client)?;
        let tmpfile = store_to_tmpfile(pk12_bundle, reports::qdevice_certificate_import_error)?;
        let tmp_path = tmpfile.path().display().to_string();
        let args = self.tool_args(CertificateRole::Client, &["-m", "-c", &tmp_path]);
        let output = runner.run(&args).await?;
        if !output.success() {
            return Err(reports::qdevice_certificate_import_error(&output.output).into());
        }
        Ok(())
    }
}

async fn run_initialization(runner: &dyn CommandRunner, args: &[String]) -> Result<(), LibraryError> {
    let output = runner.run(args).await?;
    if !output.success() {
        return Err(reports::qdevice_initialization_error(MODEL, &output.output).into());
    }
    Ok(())
}

/// Runs a certutil command that produces a file and returns the file's bytes.
async fn run_certificate_tool(
    runner: &dyn CommandRunner,
    args: &[String],
    report: impl Fn(&str) -> ReportItem,
) -> Result<Vec<u8>, LibraryError> {
    let output = runner.run(args).await?;
    if !output.success() {
        return Err(report(&output.output).into());
    }
    get_output_certificate(&output.output, report)
}

fn store_to_tmpfile(
    data: &[u8],
    report: impl Fn(&str) -> ReportItem,
) -> Result<NamedTempFile, LibraryError> {
    let mut file = NamedTempFile::new().map_err(|e| report(&os_error_reason(&e)))?;
    file.write_all(data)
        .and_then(|_| file.flush())
        .map_err(|e| report(&os_error_reason(&e)))?;
    Ok(file)
}

/// Finds the file the tool announced in its output and reads it.
pub(crate) fn get_output_certificate(
    tool_output: &str,
    report: impl Fn(&str) -> ReportItem,
) -> Result<Vec<u8>, LibraryError> {
    let path = tool_output
        .lines()
        .find_map(stored_file_path)
        .ok_or_else(|| report(tool_output))?;
    debug!(path, "reading certificate produced by tool");
    fs::read(path).map_err(|e| report(&format!("{}: {}", path, os_error_reason(&e))).into())
}

/// OS error text without the `(os error N)` suffix std appends.
fn os_error_reason(error: &io::Error) -> String {
    let text = error.to_string();
    match text.rfind(" (os error ") {
        Some(pos) if text.ends_with(')') => text[..pos].to_string(),
        _ => text,
    }
}

fn stored_file_path(line: &str) -> Option<&str> {
    STORED_FILE_MARKERS.iter().find_map(|marker| {
        let start = line.find(marker)? + marker.len();
        let path = line[start..].trim();
        (!path.is_empty()).then_some(path)
    })
}

fn encode_payload(data: &[u8]) -> String {
    // Bodies are form encoded; base64 padding is the only character needing escape.
    STANDARD.encode(data).replace('=', "%3D")
}

/// Sends `payload` to `host` and base64 decodes the response.
pub async fn remote_fetch(
    communicator: &dyn NodeCommunicator,
    host: &str,
    request: &str,
    payload: &str,
) -> Result<Vec<u8>, RemoteCallError> {
    let response = communicator.call_host(host, request, payload).await?;
    STANDARD
        .decode(response.trim())
        .map_err(|_| RemoteCallError::Library(reports::invalid_response_format(host).into()))
}

/// Downloads the CA certificate from the qnetd host.
pub async fn remote_qdevice_get_ca_certificate(
    communicator: &dyn NodeCommunicator,
    host: &str,
) -> Result<Vec<u8>, RemoteCallError> {
    remote_fetch(communicator, host, OP_GET_CA_CERTIFICATE, "").await
}

/// Has the qnetd host sign a certificate request for `cluster_name`.
pub async fn remote_sign_certificate_request(
    communicator: &dyn NodeCommunicator,
    host: &str,
    cert_request: &[u8],
    cluster_name: &str,
) -> Result<Vec<u8>, RemoteCallError> {
    let payload = format!(
        "certificate_request={}&cluster_name={}",
        encode_payload(cert_request),
        cluster_name
    );
    remote_fetch(communicator, host, OP_SIGN_NODE_CERTIFICATE, &payload).await
}

/// Asks a node to re-create its client database around `ca_certificate`.
pub async fn remote_client_setup(
    communicator: &dyn NodeCommunicator,
    node: &NodeAddresses,
    ca_certificate: &[u8],
) -> Result<(), NodeCommunicationError> {
    let payload = format!("ca_certificate={}", encode_payload(ca_certificate));
    communicator
        .call_node(node, OP_CLIENT_INIT_CERTIFICATE_STORAGE, &payload)
        .await
        .map(|_| ())
}

/// Pushes the PKCS#12 bundle to a node for import.
pub async fn remote_client_import_certificate_and_key(
    communicator: &dyn NodeCommunicator,
    node: &NodeAddresses,
    pk12_bundle: &[u8],
) -> Result<(), NodeCommunicationError> {
    let payload = format!("certificate={}", encode_payload(pk12_bundle));
    communicator
        .call_node(node, OP_CLIENT_IMPORT_CERTIFICATE, &payload)
        .await
        .map(|_| ())
}
