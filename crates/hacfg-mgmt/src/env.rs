//! Everything a library command needs from its surroundings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::HacfgConfig;
use crate::corosync::{ConfigFacade, CorosyncConfStore};
use crate::external::{CommandRunner, HttpNodeCommunicator, NodeCommunicator, ProcessCommandRunner};
use crate::qdevice::net::CertificateStore;
use crate::reports::{self, LibraryError, ReportProcessor};

/// Cluster stack the local node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Corosync,
    Cman,
}

/// Collaborators and settings shared by the library commands.
///
/// The corosync configuration is "live" when it is the running cluster's
/// configuration; otherwise commands only edit it and never touch the network.
pub struct LibraryEnvironment {
    report_processor: Arc<dyn ReportProcessor>,
    cmd_runner: Arc<dyn CommandRunner>,
    node_communicator: Arc<dyn NodeCommunicator>,
    corosync_conf: Arc<dyn CorosyncConfStore>,
    cert_store: CertificateStore,
    systemctl: PathBuf,
    cluster_type: ClusterType,
    corosync_conf_live: bool,
}

impl LibraryEnvironment {
    pub fn new(
        report_processor: Arc<dyn ReportProcessor>,
        cmd_runner: Arc<dyn CommandRunner>,
        node_communicator: Arc<dyn NodeCommunicator>,
        corosync_conf: Arc<dyn CorosyncConfStore>,
        cert_store: CertificateStore,
    ) -> Self {
        Self {
            report_processor,
            cmd_runner,
            node_communicator,
            corosync_conf,
            cert_store,
            systemctl: HacfgConfig::default().systemctl_binary,
            cluster_type: ClusterType::Corosync,
            corosync_conf_live: true,
        }
    }

    /// Environment with the production runner and HTTP communicator.
    pub fn from_config(
        config: &HacfgConfig,
        report_processor: Arc<dyn ReportProcessor>,
        corosync_conf: Arc<dyn CorosyncConfStore>,
    ) -> Self {
        Self::new(
            report_processor,
            Arc::new(ProcessCommandRunner::new()),
            Arc::new(HttpNodeCommunicator::from_config(config)),
            corosync_conf,
            CertificateStore::from_config(config),
        )
        .with_systemctl(config.systemctl_binary.clone())
    }

    pub fn with_cluster_type(mut self, cluster_type: ClusterType) -> Self {
        self.cluster_type = cluster_type;
        self
    }

    pub fn with_live_corosync_conf(mut self, live: bool) -> Self {
        self.corosync_conf_live = live;
        self
    }

    pub fn with_systemctl(mut self, systemctl: impl Into<PathBuf>) -> Self {
        self.systemctl = systemctl.into();
        self
    }

    pub fn report_processor(&self) -> &dyn ReportProcessor {
        &*self.report_processor
    }

    pub fn cmd_runner(&self) -> &dyn CommandRunner {
        &*self.cmd_runner
    }

    pub fn node_communicator(&self) -> &dyn NodeCommunicator {
        &*self.node_communicator
    }

    pub fn cert_store(&self) -> &CertificateStore {
        &self.cert_store
    }

    pub fn systemctl(&self) -> &Path {
        &self.systemctl
    }

    pub fn is_cman_cluster(&self) -> bool {
        self.cluster_type == ClusterType::Cman
    }

    pub fn is_corosync_conf_live(&self) -> bool {
        self.corosync_conf_live
    }

    /// Quorum commands are not available on a running cman cluster.
    pub fn ensure_not_cman(&self) -> Result<(), LibraryError> {
        if self.is_cman_cluster() && self.corosync_conf_live {
            return Err(reports::cman_unsupported_command().into());
        }
        Ok(())
    }

    pub async fn get_corosync_conf(&self) -> Result<ConfigFacade, LibraryError> {
        Ok(ConfigFacade::new(self.corosync_conf.get().await?))
    }

    pub async fn push_corosync_conf(
        &self,
        facade: &ConfigFacade,
        skip_offline_nodes: bool,
    ) -> Result<(), LibraryError> {
        self.corosync_conf.push(facade.config(), skip_offline_nodes).await
    }
}
