//! Cluster configuration model and the quorum related edits applied to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::node::NodeAddressesList;
use crate::qdevice::{net, SUPPORTED_MODELS};
use crate::reports::{self, LibraryError, ReportCode, ReportItem, ReportProcessor};

/// Options of the quorum section.
pub const QUORUM_OPTIONS: &[&str] = &[
    "auto_tie_breaker",
    "last_man_standing",
    "last_man_standing_window",
    "wait_for_all",
];

/// Model independent quorum device options.
pub const DEVICE_GENERIC_OPTIONS: &[&str] = &["sync_timeout", "timeout"];

/// Options of the `net` quorum device model.
pub const DEVICE_NET_OPTIONS: &[&str] = &[
    "algorithm",
    "connect_timeout",
    "force_ip_version",
    "host",
    "port",
    "tie_breaker",
];

/// Quorum device section of the cluster configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumDevice {
    pub model: String,
    #[serde(default)]
    pub model_options: BTreeMap<String, String>,
    #[serde(default)]
    pub generic_options: BTreeMap<String, String>,
}

/// The parts of corosync.conf this library reads and edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorosyncConf {
    pub cluster_name: String,
    #[serde(default)]
    pub nodes: NodeAddressesList,
    #[serde(default)]
    pub quorum_options: BTreeMap<String, String>,
    #[serde(default)]
    pub quorum_device: Option<QuorumDevice>,
}

impl CorosyncConf {
    /// Renders the `quorum { ... }` section as it appears in corosync.conf.
    pub fn render_quorum_section(&self) -> String {
        let mut out = String::from("quorum {\n");
        for (name, value) in &self.quorum_options {
            out.push_str(&format!("    {}: {}\n", name, value));
        }
        if let Some(device) = &self.quorum_device {
            out.push_str("\n    device {\n");
            for (name, value) in &device.generic_options {
                out.push_str(&format!("        {}: {}\n", name, value));
            }
            out.push_str(&format!("        model: {}\n", device.model));
            if !device.model_options.is_empty() {
                out.push_str(&format!("\n        {} {{\n", device.model));
                for (name, value) in &device.model_options {
                    out.push_str(&format!("            {}: {}\n", name, value));
                }
                out.push_str("        }\n");
            }
            out.push_str("    }\n");
        }
        out.push_str("}\n");
        out
    }
}

/// Snapshot returned by the quorum `get_config` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfig {
    pub options: BTreeMap<String, String>,
    pub device: Option<QuorumDevice>,
}

/// Validating editor over a [`CorosyncConf`].
#[derive(Debug, Clone)]
pub struct ConfigFacade {
    config: CorosyncConf,
}

impl ConfigFacade {
    pub fn new(config: CorosyncConf) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorosyncConf {
        &self.config
    }

    pub fn into_config(self) -> CorosyncConf {
        self.config
    }

    pub fn cluster_name(&self) -> &str {
        &self.config.cluster_name
    }

    pub fn nodes(&self) -> &NodeAddressesList {
        &self.config.nodes
    }

    pub fn quorum_options(&self) -> &BTreeMap<String, String> {
        &self.config.quorum_options
    }

    pub fn quorum_device(&self) -> Option<&QuorumDevice> {
        self.config.quorum_device.as_ref()
    }

    pub fn has_quorum_device(&self) -> bool {
        self.config.quorum_device.is_some()
    }

    pub fn quorum_config(&self) -> QuorumConfig {
        QuorumConfig {
            options: self.config.quorum_options.clone(),
            device: self.config.quorum_device.clone(),
        }
    }

    /// Sets quorum options; an empty value removes the option.
    pub fn set_quorum_options(
        &mut self,
        reporter: &dyn ReportProcessor,
        options: &BTreeMap<String, String>,
    ) -> Result<(), LibraryError> {
        reporter.process_list(validate_quorum_options(options))?;
        for (name, value) in options {
            if value.is_empty() {
                self.config.quorum_options.remove(name);
            } else {
                self.config.quorum_options.insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Adds a quorum device section.
    ///
    /// An unknown model is an error forceable by `force_model`; unknown option
    /// names are errors forceable by `force_options`. The `net` model requires
    /// the `host` option.
    pub fn add_quorum_device(
        &mut self,
        reporter: &dyn ReportProcessor,
        model: &str,
        model_options: &BTreeMap<String, String>,
        generic_options: &BTreeMap<String, String>,
        force_model: bool,
        force_options: bool,
    ) -> Result<(), LibraryError> {
        if self.has_quorum_device() {
            return Err(reports::qdevice_already_defined().into());
        }

        let mut report_items = validate_model(model, force_model);
        report_items.extend(validate_model_options(model, model_options, true, force_options));
        report_items.extend(validate_generic_options(generic_options, force_options));
        reporter.process_list(report_items)?;

        self.config.quorum_device = Some(QuorumDevice {
            model: model.to_string(),
            model_options: model_options.clone(),
            generic_options: generic_options.clone(),
        });
        debug!(model, "quorum device added to configuration");
        Ok(())
    }

    /// Merges options into the existing quorum device. Values are stored as given.
    pub fn update_quorum_device(
        &mut self,
        reporter: &dyn ReportProcessor,
        model_options: &BTreeMap<String, String>,
        generic_options: &BTreeMap<String, String>,
        force_options: bool,
    ) -> Result<(), LibraryError> {
        let device = self
            .config
            .quorum_device
            .as_mut()
            .ok_or_else(|| LibraryError::from(reports::qdevice_not_defined()))?;

        let mut report_items =
            validate_model_options(&device.model, model_options, false, force_options);
        report_items.extend(validate_generic_options(generic_options, force_options));
        reporter.process_list(report_items)?;

        device
            .model_options
            .extend(model_options.iter().map(|(k, v)| (k.clone(), v.clone())));
        device
            .generic_options
            .extend(generic_options.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    pub fn remove_quorum_device(&mut self) -> Result<(), LibraryError> {
        match self.config.quorum_device.take() {
            Some(_) => Ok(()),
            None => Err(reports::qdevice_not_defined().into()),
        }
    }
}

fn validate_quorum_options(options: &BTreeMap<String, String>) -> Vec<ReportItem> {
    options
        .keys()
        .filter(|name| !QUORUM_OPTIONS.contains(&name.as_str()))
        .map(|name| reports::invalid_option(name, "quorum", QUORUM_OPTIONS))
        .collect()
}

fn validate_model(model: &str, force_model: bool) -> Vec<ReportItem> {
    if SUPPORTED_MODELS.contains(&model) {
        return Vec::new();
    }
    vec![reports::invalid_option_value("model", model, SUPPORTED_MODELS)
        .forceable_by(ReportCode::ForceQdeviceModel, force_model)]
}

fn validate_model_options(
    model: &str,
    options: &BTreeMap<String, String>,
    need_required: bool,
    force_options: bool,
) -> Vec<ReportItem> {
    if model != net::MODEL {
        return Vec::new();
    }
    let mut report_items: Vec<ReportItem> = options
        .keys()
        .filter(|name| !DEVICE_NET_OPTIONS.contains(&name.as_str()))
        .map(|name| {
            reports::invalid_option(name, "quorum device model", DEVICE_NET_OPTIONS)
                .forceable_by(ReportCode::ForceOptions, force_options)
        })
        .collect();
    if need_required && options.get("host").map_or(true, |h| h.is_empty()) {
        report_items.push(reports::required_option_missing("host"));
    }
    report_items
}

fn validate_generic_options(
    options: &BTreeMap<String, String>,
    force_options: bool,
) -> Vec<ReportItem> {
    options
        .keys()
        .filter(|name| !DEVICE_GENERIC_OPTIONS.contains(&name.as_str()))
        .map(|name| {
            reports::invalid_option(name, "quorum device", DEVICE_GENERIC_OPTIONS)
                .forceable_by(ReportCode::ForceOptions, force_options)
        })
        .collect()
}

/// Where the cluster configuration is read from and written back to.
#[async_trait]
pub trait CorosyncConfStore: Send + Sync {
    async fn get(&self) -> Result<CorosyncConf, LibraryError>;

    /// Writes the configuration back, distributing it when the store is live.
    async fn push(&self, config: &CorosyncConf, skip_offline_nodes: bool)
        -> Result<(), LibraryError>;
}

/// Configuration store held in memory. Keeps every pushed version.
#[derive(Debug, Default)]
pub struct MemoryCorosyncConfStore {
    current: RwLock<CorosyncConf>,
    pushes: RwLock<Vec<(CorosyncConf, bool)>>,
}

impl MemoryCorosyncConfStore {
    pub fn new(config: CorosyncConf) -> Self {
        Self {
            current: RwLock::new(config),
            pushes: RwLock::new(Vec::new()),
        }
    }

    pub fn current(&self) -> CorosyncConf {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every pushed configuration with its `skip_offline_nodes` flag.
    pub fn pushes(&self) -> Vec<(CorosyncConf, bool)> {
        self.pushes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CorosyncConfStore for MemoryCorosyncConfStore {
    async fn get(&self) -> Result<CorosyncConf, LibraryError> {
        Ok(self.current())
    }

    async fn push(
        &self,
        config: &CorosyncConf,
        skip_offline_nodes: bool,
    ) -> Result<(), LibraryError> {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.pushes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((config.clone(), skip_offline_nodes));
        Ok(())
    }
}
