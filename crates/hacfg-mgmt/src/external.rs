//! Access to the world outside the library: local tools and remote hosts.
//!
//! The [`CommandRunner`] and [`NodeCommunicator`] traits are the seams every
//! command goes through. Production code uses [`ProcessCommandRunner`] and
//! [`HttpNodeCommunicator`]; tests plug in the doubles from [`crate::testing`].

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::HacfgConfig;
use crate::node::NodeAddresses;
use crate::reports::{self, LibraryError, ReportCode, ReportItem, ReportItemSeverity};

/// Combined output and exit status of a finished external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output followed by standard error.
    pub output: String,
    pub retval: i32,
}

impl CommandOutput {
    pub fn new(output: impl Into<String>, retval: i32) -> Self {
        Self {
            output: output.into(),
            retval,
        }
    }

    pub fn success(&self) -> bool {
        self.retval == 0
    }
}

/// Runs local external tools.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a tool and wait for it to finish.
    ///
    /// # Arguments
    /// * `args` - Program path followed by its arguments.
    ///
    /// # Returns
    /// The tool's output and exit code. A non-zero exit code is not an error
    /// at this level; only a tool that cannot be started is.
    async fn run(&self, args: &[String]) -> Result<CommandOutput, LibraryError>;
}

/// Runs tools as child processes via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessCommandRunner {
    env_vars: BTreeMap<String, String>,
}

impl ProcessCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, args: &[String]) -> Result<CommandOutput, LibraryError> {
        let command_line = args.join(" ");
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| reports::run_external_process_error("", "empty command"))?;

        debug!(command = %command_line, "running external process");
        let output = tokio::process::Command::new(program)
            .args(rest)
            .envs(&self.env_vars)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| reports::run_external_process_error(&command_line, &e.to_string()))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let retval = output.status.code().unwrap_or(-1);
        debug!(command = %command_line, retval, "external process finished");

        Ok(CommandOutput::new(text, retval))
    }
}

/// Failure of a single remote request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeCommunicationError {
    #[error("Unable to connect to {node} ({reason})")]
    UnableToConnect {
        node: String,
        command: String,
        reason: String,
    },

    #[error("Unable to authenticate to {node} ({reason})")]
    NotAuthorized {
        node: String,
        command: String,
        reason: String,
    },

    #[error("{node}: Permission denied ({reason})")]
    PermissionDenied {
        node: String,
        command: String,
        reason: String,
    },

    #[error("{node}: Unsupported command ({command})")]
    UnsupportedCommand {
        node: String,
        command: String,
        reason: String,
    },

    #[error("{node}: {reason}")]
    CommandUnsuccessful {
        node: String,
        command: String,
        reason: String,
    },

    #[error("Error connecting to {node} ({reason})")]
    Other {
        node: String,
        command: String,
        reason: String,
    },
}

impl NodeCommunicationError {
    fn parts(&self) -> (ReportCode, &str, &str, &str) {
        let (code, node, command, reason) = match self {
            Self::UnableToConnect { node, command, reason } => {
                (ReportCode::NodeCommunicationErrorUnableToConnect, node, command, reason)
            }
            Self::NotAuthorized { node, command, reason } => {
                (ReportCode::NodeCommunicationErrorNotAuthorized, node, command, reason)
            }
            Self::PermissionDenied { node, command, reason } => {
                (ReportCode::NodeCommunicationErrorPermissionDenied, node, command, reason)
            }
            Self::UnsupportedCommand { node, command, reason } => {
                (ReportCode::NodeCommunicationErrorUnsupportedCommand, node, command, reason)
            }
            Self::CommandUnsuccessful { node, command, reason } => {
                (ReportCode::NodeCommunicationCommandUnsuccessful, node, command, reason)
            }
            Self::Other { node, command, reason } => {
                (ReportCode::NodeCommunicationError, node, command, reason)
            }
        };
        (code, node.as_str(), command.as_str(), reason.as_str())
    }

    pub fn node(&self) -> &str {
        self.parts().1
    }

    pub fn command(&self) -> &str {
        self.parts().2
    }

    pub fn reason(&self) -> &str {
        self.parts().3
    }

    /// Converts the failure to a report item naming the node, command and reason.
    pub fn to_report_item(
        &self,
        severity: ReportItemSeverity,
        forceable: Option<ReportCode>,
    ) -> ReportItem {
        let (code, node, command, reason) = self.parts();
        let mut item = ReportItem::new(severity, code)
            .with_info("node", node)
            .with_info("command", command)
            .with_info("reason", reason);
        item.forceable = forceable;
        item
    }
}

/// Sends requests to other cluster hosts.
#[async_trait]
pub trait NodeCommunicator: Send + Sync {
    /// Send a request to a host.
    ///
    /// # Arguments
    /// * `host` - Host name or address.
    /// * `request` - Operation path, e.g. `remote/qdevice_net_get_ca_certificate`.
    /// * `data` - Form encoded request body, possibly empty.
    ///
    /// # Returns
    /// The response body.
    async fn call_host(
        &self,
        host: &str,
        request: &str,
        data: &str,
    ) -> Result<String, NodeCommunicationError>;

    /// Send a request to a cluster node, addressed by its ring0 address.
    async fn call_node(
        &self,
        node: &NodeAddresses,
        request: &str,
        data: &str,
    ) -> Result<String, NodeCommunicationError> {
        self.call_host(&node.ring0, request, data).await
    }
}

/// Node communicator speaking HTTPS to the management daemon on each host.
pub struct HttpNodeCommunicator {
    client: reqwest::Client,
    port: u16,
    auth_tokens: HashMap<String, String>,
}

impl HttpNodeCommunicator {
    pub fn new(port: u16, timeout: Duration, auth_tokens: HashMap<String, String>) -> Self {
        // Cluster daemons use self-signed certificates.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default();

        Self {
            client,
            port,
            auth_tokens,
        }
    }

    pub fn from_config(config: &HacfgConfig) -> Self {
        Self::new(
            config.pcsd_port,
            Duration::from_secs(config.request_timeout_secs),
            config.auth_tokens.clone(),
        )
    }

    fn url(&self, host: &str, request: &str) -> String {
        if host.contains(':') {
            format!("https://[{}]:{}/{}", host, self.port, request)
        } else {
            format!("https://{}:{}/{}", host, self.port, request)
        }
    }
}

#[async_trait]
impl NodeCommunicator for HttpNodeCommunicator {
    async fn call_host(
        &self,
        host: &str,
        request: &str,
        data: &str,
    ) -> Result<String, NodeCommunicationError> {
        let url = self.url(host, request);
        debug!(host, request, "sending node request");

        let mut builder = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(data.to_string());
        if let Some(token) = self.auth_tokens.get(host) {
            builder = builder.header(COOKIE, format!("token={}", token));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NodeCommunicationError::UnableToConnect {
                node: host.to_string(),
                command: request.to_string(),
                reason: e.to_string(),
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NodeCommunicationError::Other {
                node: host.to_string(),
                command: request.to_string(),
                reason: format!("Read error: {}", e),
            })?;
        debug!(host, request, status = status.as_u16(), "node request finished");

        let node = host.to_string();
        let command = request.to_string();
        match status.as_u16() {
            200..=299 => Ok(body),
            400 => Err(NodeCommunicationError::CommandUnsuccessful {
                node,
                command,
                reason: body,
            }),
            401 => Err(NodeCommunicationError::NotAuthorized {
                node,
                command,
                reason: "HTTP error: 401".to_string(),
            }),
            403 => Err(NodeCommunicationError::PermissionDenied {
                node,
                command,
                reason: "HTTP error: 403".to_string(),
            }),
            404 => Err(NodeCommunicationError::UnsupportedCommand {
                node,
                command,
                reason: "HTTP error: 404".to_string(),
            }),
            code => Err(NodeCommunicationError::Other {
                node,
                command,
                reason: format!("HTTP error: {}", code),
            }),
        }
    }
}

/// True if `path` is a directory with at least one entry.
pub fn is_dir_nonempty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
