use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Paths, tools and transport settings used by the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HacfgConfig {
    pub qnetd_certs_dir: PathBuf,
    pub qnetd_tool: PathBuf,
    pub qnetd_ca_file_name: String,
    pub client_certs_dir: PathBuf,
    pub client_tool: PathBuf,
    pub client_ca_file_name: String,
    pub systemctl_binary: PathBuf,
    pub pcsd_port: u16,
    pub request_timeout_secs: u64,
    /// Per-host tokens sent with every remote request.
    pub auth_tokens: HashMap<String, String>,
}

impl Default for HacfgConfig {
    fn default() -> Self {
        Self {
            qnetd_certs_dir: PathBuf::from("/etc/corosync/qdevice/net/qnetd/nssdb"),
            qnetd_tool: PathBuf::from("/usr/sbin/corosync-qnetd-certutil"),
            qnetd_ca_file_name: String::from("qnetd-cacert.crt"),
            client_certs_dir: PathBuf::from("/etc/corosync/qdevice/net/node/nssdb"),
            client_tool: PathBuf::from("/usr/sbin/corosync-qdevice-net-certutil"),
            client_ca_file_name: String::from("qnetd-cacert.crt"),
            systemctl_binary: PathBuf::from("/usr/bin/systemctl"),
            pcsd_port: 2224,
            request_timeout_secs: 60,
            auth_tokens: HashMap::new(),
        }
    }
}

impl HacfgConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: HacfgConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: HacfgConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
