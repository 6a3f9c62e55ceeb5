//! Structured diagnostics produced by library commands.
//!
//! Every step of a command describes what happened as a [`ReportItem`]. Items
//! with [`ReportItemSeverity::Error`] abort the enclosing command; warnings and
//! infos accumulate in a [`ReportProcessor`] in the order they were produced.
//!
//! Some errors are "forceable": they carry the code of the flag that would have
//! turned them into a warning (`--force`, `--skip-offline`). [`ReportItem::forceable_by`]
//! applies that policy in one place.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Severity of a report item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportItemSeverity {
    /// Aborts the enclosing command.
    Error,
    /// Informational, the command proceeds.
    Warning,
    /// Progress information.
    Info,
}

/// Machine readable identification of a report item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportCode {
    /// A recipient with the same value already exists in the alert.
    CibAlertRecipientAlreadyExists,
    /// A recipient value is empty or otherwise unusable.
    CibAlertRecipientValueInvalid,
    /// The command cannot run on a cman based cluster.
    CmanUnsupportedCommand,
    /// Force flag accepting duplicate recipient values.
    ForceAlertRecipientValueNotUnique,
    /// Force flag accepting unknown options.
    ForceOptions,
    /// Force flag accepting unknown quorum device models.
    ForceQdeviceModel,
    /// An id is already used somewhere in the configuration.
    IdAlreadyExists,
    /// No element with the given id exists.
    IdNotFound,
    /// Option name is not allowed.
    InvalidOption,
    /// Option value is not allowed.
    InvalidOptionValue,
    /// A remote host answered with something we cannot decode.
    InvalidResponseFormat,
    /// Remote command ran but reported a failure.
    NodeCommunicationCommandUnsuccessful,
    /// Generic communication failure.
    NodeCommunicationError,
    /// Remote host refused our credentials.
    NodeCommunicationErrorNotAuthorized,
    /// Remote host denied the operation.
    NodeCommunicationErrorPermissionDenied,
    /// Remote host is unreachable.
    NodeCommunicationErrorUnableToConnect,
    /// Remote host does not know the requested operation.
    NodeCommunicationErrorUnsupportedCommand,
    /// A quorum device is already configured.
    QdeviceAlreadyDefined,
    /// Quorum device certificate storage already exists.
    QdeviceAlreadyInitialized,
    /// Certificates are being distributed to the cluster nodes.
    QdeviceCertificateDistributionStarted,
    /// Importing or converting a certificate failed.
    QdeviceCertificateImportError,
    /// A certificate file could not be read.
    QdeviceCertificateReadError,
    /// Signing a certificate request failed.
    QdeviceCertificateSignError,
    /// Certificate storage could not be removed.
    QdeviceDestroyError,
    /// Certificate storage removed.
    QdeviceDestroySuccess,
    /// Certificate storage could not be created.
    QdeviceInitializationError,
    /// Certificate storage created.
    QdeviceInitializationSuccess,
    /// No quorum device is configured.
    QdeviceNotDefined,
    /// Certificate storage does not exist yet.
    QdeviceNotInitialized,
    /// A mandatory option was not given.
    RequiredOptionMissing,
    /// A local external tool could not be started.
    RunExternalProcessError,
    /// A service action (enable, start, ...) failed.
    ServiceActionFailed,
    /// A service action (enable, start, ...) succeeded.
    ServiceActionSucceeded,
    /// A node skipped enabling a service.
    ServiceEnableSkipped,
    /// A node enabled a service.
    ServiceEnableSuccess,
    /// Flag tolerating unreachable nodes.
    SkipOfflineNodes,
}

impl ReportCode {
    /// Returns the wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCode::CibAlertRecipientAlreadyExists => "CIB_ALERT_RECIPIENT_ALREADY_EXISTS",
            ReportCode::CibAlertRecipientValueInvalid => "CIB_ALERT_RECIPIENT_VALUE_INVALID",
            ReportCode::CmanUnsupportedCommand => "CMAN_UNSUPPORTED_COMMAND",
            ReportCode::ForceAlertRecipientValueNotUnique => {
                "FORCE_ALERT_RECIPIENT_VALUE_NOT_UNIQUE"
            }
            ReportCode::ForceOptions => "FORCE_OPTIONS",
            ReportCode::ForceQdeviceModel => "FORCE_QDEVICE_MODEL",
            ReportCode::IdAlreadyExists => "ID_ALREADY_EXISTS",
            ReportCode::IdNotFound => "ID_NOT_FOUND",
            ReportCode::InvalidOption => "INVALID_OPTION",
            ReportCode::InvalidOptionValue => "INVALID_OPTION_VALUE",
            ReportCode::InvalidResponseFormat => "INVALID_RESPONSE_FORMAT",
            ReportCode::NodeCommunicationCommandUnsuccessful => {
                "NODE_COMMUNICATION_COMMAND_UNSUCCESSFUL"
            }
            ReportCode::NodeCommunicationError => "NODE_COMMUNICATION_ERROR",
            ReportCode::NodeCommunicationErrorNotAuthorized => {
                "NODE_COMMUNICATION_ERROR_NOT_AUTHORIZED"
            }
            ReportCode::NodeCommunicationErrorPermissionDenied => {
                "NODE_COMMUNICATION_ERROR_PERMISSION_DENIED"
            }
            ReportCode::NodeCommunicationErrorUnableToConnect => {
                "NODE_COMMUNICATION_ERROR_UNABLE_TO_CONNECT"
            }
            ReportCode::NodeCommunicationErrorUnsupportedCommand => {
                "NODE_COMMUNICATION_ERROR_UNSUPPORTED_COMMAND"
            }
            ReportCode::QdeviceAlreadyDefined => "QDEVICE_ALREADY_DEFINED",
            ReportCode::QdeviceAlreadyInitialized => "QDEVICE_ALREADY_INITIALIZED",
            ReportCode::QdeviceCertificateDistributionStarted => {
                "QDEVICE_CERTIFICATE_DISTRIBUTION_STARTED"
            }
            ReportCode::QdeviceCertificateImportError => "QDEVICE_CERTIFICATE_IMPORT_ERROR",
            ReportCode::QdeviceCertificateReadError => "QDEVICE_CERTIFICATE_READ_ERROR",
            ReportCode::QdeviceCertificateSignError => "QDEVICE_CERTIFICATE_SIGN_ERROR",
            ReportCode::QdeviceDestroyError => "QDEVICE_DESTROY_ERROR",
            ReportCode::QdeviceDestroySuccess => "QDEVICE_DESTROY_SUCCESS",
            ReportCode::QdeviceInitializationError => "QDEVICE_INITIALIZATION_ERROR",
            ReportCode::QdeviceInitializationSuccess => "QDEVICE_INITIALIZATION_SUCCESS",
            ReportCode::QdeviceNotDefined => "QDEVICE_NOT_DEFINED",
            ReportCode::QdeviceNotInitialized => "QDEVICE_NOT_INITIALIZED",
            ReportCode::RequiredOptionMissing => "REQUIRED_OPTION_MISSING",
            ReportCode::RunExternalProcessError => "RUN_EXTERNAL_PROCESS_ERROR",
            ReportCode::ServiceActionFailed => "SERVICE_ACTION_FAILED",
            ReportCode::ServiceActionSucceeded => "SERVICE_ACTION_SUCCEEDED",
            ReportCode::ServiceEnableSkipped => "SERVICE_ENABLE_SKIPPED",
            ReportCode::ServiceEnableSuccess => "SERVICE_ENABLE_SUCCESS",
            ReportCode::SkipOfflineNodes => "SKIP_OFFLINE_NODES",
        }
    }
}

impl fmt::Display for ReportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportItem {
    /// How serious the item is.
    pub severity: ReportItemSeverity,
    /// What happened.
    pub code: ReportCode,
    /// Details, keyed by name.
    pub info: BTreeMap<String, Value>,
    /// Flag that would downgrade this error to a warning.
    pub forceable: Option<ReportCode>,
}

impl ReportItem {
    /// Creates an item with an empty payload.
    pub fn new(severity: ReportItemSeverity, code: ReportCode) -> Self {
        Self {
            severity,
            code,
            info: BTreeMap::new(),
            forceable: None,
        }
    }

    /// Creates an error item.
    pub fn error(code: ReportCode) -> Self {
        Self::new(ReportItemSeverity::Error, code)
    }

    /// Creates a warning item.
    pub fn warning(code: ReportCode) -> Self {
        Self::new(ReportItemSeverity::Warning, code)
    }

    /// Creates an info item.
    pub fn info(code: ReportCode) -> Self {
        Self::new(ReportItemSeverity::Info, code)
    }

    /// Adds one payload entry.
    pub fn with_info(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.info.insert(key.to_string(), value.into());
        self
    }

    /// Applies a force flag: the item becomes a warning when `forced`,
    /// otherwise it stays an error pointing at `force_code`.
    pub fn forceable_by(mut self, force_code: ReportCode, forced: bool) -> Self {
        if forced {
            self.severity = ReportItemSeverity::Warning;
            self.forceable = None;
        } else {
            self.severity = ReportItemSeverity::Error;
            self.forceable = Some(force_code);
        }
        self
    }

    /// Returns true for error items.
    pub fn is_error(&self) -> bool {
        self.severity == ReportItemSeverity::Error
    }

    /// Returns a payload entry rendered as text.
    pub fn info_str(&self, key: &str) -> String {
        match self.info.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// Human readable description of the item.
    pub fn message(&self) -> String {
        let i = |key: &str| self.info_str(key);
        match self.code {
            ReportCode::CibAlertRecipientAlreadyExists => format!(
                "Recipient '{}' in alert '{}' already exists",
                i("recipient"),
                i("alert")
            ),
            ReportCode::CibAlertRecipientValueInvalid => {
                format!("Recipient value '{}' is not valid.", i("recipient"))
            }
            ReportCode::CmanUnsupportedCommand => {
                "This command is not supported on CMAN clusters".to_string()
            }
            ReportCode::IdAlreadyExists => format!("'{}' already exists", i("id")),
            ReportCode::IdNotFound => {
                format!("{} '{}' does not exist", i("id_description"), i("id"))
            }
            ReportCode::InvalidOption => format!(
                "invalid {} option '{}', allowed options are: {}",
                i("option_type"),
                i("option_name"),
                i("allowed")
            ),
            ReportCode::InvalidOptionValue => format!(
                "'{}' is not a valid {} value, use {}",
                i("option_value"),
                i("option_name"),
                i("allowed_values")
            ),
            ReportCode::InvalidResponseFormat => {
                format!("{}: Invalid format of response", i("node"))
            }
            ReportCode::NodeCommunicationCommandUnsuccessful => {
                format!("{}: {}", i("node"), i("reason"))
            }
            ReportCode::NodeCommunicationError => {
                format!("Error connecting to {} ({})", i("node"), i("reason"))
            }
            ReportCode::NodeCommunicationErrorNotAuthorized => {
                format!("Unable to authenticate to {} ({})", i("node"), i("reason"))
            }
            ReportCode::NodeCommunicationErrorPermissionDenied => {
                format!("{}: Permission denied ({})", i("node"), i("reason"))
            }
            ReportCode::NodeCommunicationErrorUnableToConnect => {
                format!("Unable to connect to {} ({})", i("node"), i("reason"))
            }
            ReportCode::NodeCommunicationErrorUnsupportedCommand => {
                format!("{}: Unsupported command ({})", i("node"), i("command"))
            }
            ReportCode::QdeviceAlreadyDefined => "quorum device is already defined".to_string(),
            ReportCode::QdeviceAlreadyInitialized => {
                format!("Quorum device '{}' has been already initialized", i("model"))
            }
            ReportCode::QdeviceCertificateDistributionStarted => {
                "Setting up qdevice certificates on nodes...".to_string()
            }
            ReportCode::QdeviceCertificateImportError => {
                format!("Unable to import quorum device certificate: {}", i("reason"))
            }
            ReportCode::QdeviceCertificateReadError => format!(
                "Unable to read quorum device certificate '{}': {}",
                i("path"),
                i("reason")
            ),
            ReportCode::QdeviceCertificateSignError => {
                format!("Unable to sign quorum device certificate: {}", i("reason"))
            }
            ReportCode::QdeviceDestroyError => format!(
                "Unable to destroy quorum device '{}': {}",
                i("model"),
                i("reason")
            ),
            ReportCode::QdeviceDestroySuccess => {
                format!("Quorum device '{}' configuration files removed", i("model"))
            }
            ReportCode::QdeviceInitializationError => format!(
                "Unable to initialize quorum device '{}': {}",
                i("model"),
                i("reason")
            ),
            ReportCode::QdeviceInitializationSuccess => {
                format!("Quorum device '{}' initialized", i("model"))
            }
            ReportCode::QdeviceNotDefined => "no quorum device is defined in this cluster".to_string(),
            ReportCode::QdeviceNotInitialized => {
                format!("Quorum device '{}' has not been initialized yet", i("model"))
            }
            ReportCode::RequiredOptionMissing => {
                format!("required option '{}' is missing", i("option_name"))
            }
            ReportCode::RunExternalProcessError => {
                format!("unable to run command {}: {}", i("command"), i("reason"))
            }
            ReportCode::ServiceActionFailed => format!(
                "Unable to {} {}: {}",
                i("action"),
                i("service"),
                i("reason")
            ),
            ReportCode::ServiceActionSucceeded => {
                format!("{}: {} succeeded", i("service"), i("action"))
            }
            ReportCode::ServiceEnableSkipped => format!(
                "{}: not enabling {} - {}",
                i("node"),
                i("service"),
                i("reason")
            ),
            ReportCode::ServiceEnableSuccess => format!("{}: {} enabled", i("node"), i("service")),
            ReportCode::ForceAlertRecipientValueNotUnique
            | ReportCode::ForceOptions
            | ReportCode::ForceQdeviceModel
            | ReportCode::SkipOfflineNodes => self.code.as_str().to_string(),
        }
    }
}

impl fmt::Display for ReportItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

fn summarize(reports: &[ReportItem]) -> String {
    if reports.is_empty() {
        return "library error".to_string();
    }
    reports
        .iter()
        .map(ReportItem::message)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of a library command, carrying the error items that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", summarize(.reports))]
pub struct LibraryError {
    /// Items describing the failure.
    pub reports: Vec<ReportItem>,
}

impl LibraryError {
    /// Creates an error from a list of report items.
    pub fn new(reports: Vec<ReportItem>) -> Self {
        Self { reports }
    }

    /// Returns true if any carried item has the given code.
    pub fn has_code(&self, code: ReportCode) -> bool {
        self.reports.iter().any(|r| r.code == code)
    }
}

impl From<ReportItem> for LibraryError {
    fn from(item: ReportItem) -> Self {
        Self::new(vec![item])
    }
}

/// Sink for report items produced while a command runs.
pub trait ReportProcessor: Send + Sync {
    /// Appends one item to the ordered list.
    fn report(&self, item: ReportItem);

    /// Appends one item; fails if it is an error.
    fn process(&self, item: ReportItem) -> Result<(), LibraryError> {
        self.process_list(vec![item])
    }

    /// Appends all items in order, then fails with every error among them.
    fn process_list(&self, items: Vec<ReportItem>) -> Result<(), LibraryError> {
        let errors: Vec<ReportItem> = items.iter().filter(|i| i.is_error()).cloned().collect();
        for item in items {
            self.report(item);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LibraryError::new(errors))
        }
    }
}

/// Report processor keeping items in memory and mirroring them to `tracing`.
#[derive(Debug, Default)]
pub struct MemoryReportProcessor {
    items: Mutex<Vec<ReportItem>>,
}

impl MemoryReportProcessor {
    /// Creates an empty processor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all items reported so far.
    pub fn items(&self) -> Vec<ReportItem> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drops all collected items.
    pub fn clear(&self) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ReportProcessor for MemoryReportProcessor {
    fn report(&self, item: ReportItem) {
        match item.severity {
            ReportItemSeverity::Error => tracing::error!(code = %item.code, "{}", item.message()),
            ReportItemSeverity::Warning => tracing::warn!(code = %item.code, "{}", item.message()),
            ReportItemSeverity::Info => tracing::info!(code = %item.code, "{}", item.message()),
        }
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
    }
}

fn allowed_list(allowed: &[&str]) -> Value {
    Value::Array(allowed.iter().map(|a| Value::from(*a)).collect())
}

pub fn cman_unsupported_command() -> ReportItem {
    ReportItem::error(ReportCode::CmanUnsupportedCommand)
}

pub fn qdevice_already_initialized(model: &str) -> ReportItem {
    ReportItem::error(ReportCode::QdeviceAlreadyInitialized).with_info("model", model)
}

pub fn qdevice_not_initialized(model: &str) -> ReportItem {
    ReportItem::error(ReportCode::QdeviceNotInitialized).with_info("model", model)
}

pub fn qdevice_initialization_success(model: &str) -> ReportItem {
    ReportItem::info(ReportCode::QdeviceInitializationSuccess).with_info("model", model)
}

pub fn qdevice_initialization_error(model: &str, reason: &str) -> ReportItem {
    ReportItem::error(ReportCode::QdeviceInitializationError)
        .with_info("model", model)
        .with_info("reason", reason)
}

pub fn qdevice_destroy_success(model: &str) -> ReportItem {
    ReportItem::info(ReportCode::QdeviceDestroySuccess).with_info("model", model)
}

pub fn qdevice_destroy_error(model: &str, reason: &str) -> ReportItem {
    ReportItem::error(ReportCode::QdeviceDestroyError)
        .with_info("model", model)
        .with_info("reason", reason)
}

pub fn qdevice_certificate_distribution_started() -> ReportItem {
    ReportItem::info(ReportCode::QdeviceCertificateDistributionStarted)
}

pub fn qdevice_certificate_sign_error(reason: &str) -> ReportItem {
    ReportItem::error(ReportCode::QdeviceCertificateSignError).with_info("reason", reason)
}

pub fn qdevice_certificate_import_error(reason: &str) -> ReportItem {
    ReportItem::error(ReportCode::QdeviceCertificateImportError).with_info("reason", reason)
}

pub fn qdevice_certificate_read_error(path: &str, reason: &str) -> ReportItem {
    ReportItem::error(ReportCode::QdeviceCertificateReadError)
        .with_info("path", path)
        .with_info("reason", reason)
}

pub fn qdevice_already_defined() -> ReportItem {
    ReportItem::error(ReportCode::QdeviceAlreadyDefined)
}

pub fn qdevice_not_defined() -> ReportItem {
    ReportItem::error(ReportCode::QdeviceNotDefined)
}

pub fn invalid_response_format(node: &str) -> ReportItem {
    ReportItem::error(ReportCode::InvalidResponseFormat).with_info("node", node)
}

/// Unknown option name. Not forceable until [`ReportItem::forceable_by`] says so.
pub fn invalid_option(option_name: &str, option_type: &str, allowed: &[&str]) -> ReportItem {
    ReportItem::error(ReportCode::InvalidOption)
        .with_info("option_name", option_name)
        .with_info("option_type", option_type)
        .with_info("allowed", allowed_list(allowed))
}

pub fn invalid_option_value(option_name: &str, option_value: &str, allowed: &[&str]) -> ReportItem {
    ReportItem::error(ReportCode::InvalidOptionValue)
        .with_info("option_name", option_name)
        .with_info("option_value", option_value)
        .with_info("allowed_values", allowed_list(allowed))
}

pub fn required_option_missing(option_name: &str) -> ReportItem {
    ReportItem::error(ReportCode::RequiredOptionMissing).with_info("option_name", option_name)
}

pub fn id_already_exists(id: &str) -> ReportItem {
    ReportItem::error(ReportCode::IdAlreadyExists).with_info("id", id)
}

pub fn id_not_found(id: &str, id_description: &str) -> ReportItem {
    ReportItem::error(ReportCode::IdNotFound)
        .with_info("id", id)
        .with_info("id_description", id_description)
}

pub fn cib_alert_recipient_already_exists(alert_id: &str, recipient_value: &str) -> ReportItem {
    ReportItem::error(ReportCode::CibAlertRecipientAlreadyExists)
        .with_info("alert", alert_id)
        .with_info("recipient", recipient_value)
}

pub fn cib_alert_recipient_value_invalid(recipient_value: &str) -> ReportItem {
    ReportItem::error(ReportCode::CibAlertRecipientValueInvalid)
        .with_info("recipient", recipient_value)
}

pub fn run_external_process_error(command: &str, reason: &str) -> ReportItem {
    ReportItem::error(ReportCode::RunExternalProcessError)
        .with_info("command", command)
        .with_info("reason", reason)
}

pub fn service_action_succeeded(service: &str, action: &str) -> ReportItem {
    ReportItem::info(ReportCode::ServiceActionSucceeded)
        .with_info("service", service)
        .with_info("action", action)
}

pub fn service_action_failed(service: &str, action: &str, reason: &str) -> ReportItem {
    ReportItem::error(ReportCode::ServiceActionFailed)
        .with_info("service", service)
        .with_info("action", action)
        .with_info("reason", reason)
}

pub fn service_enable_success(service: &str, node: &str) -> ReportItem {
    ReportItem::info(ReportCode::ServiceEnableSuccess)
        .with_info("service", service)
        .with_info("node", node)
}

pub fn service_enable_skipped(service: &str, reason: &str, node: &str) -> ReportItem {
    ReportItem::info(ReportCode::ServiceEnableSkipped)
        .with_info("service", service)
        .with_info("reason", reason)
        .with_info("node", node)
}
