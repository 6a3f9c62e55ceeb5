//! Cluster alerts and their recipients.
//!
//! Alerts and recipients share one id namespace. Omitted ids are generated
//! from a base name (`alert`, `<alert-id>-recipient`) by appending `-1`, `-2`,
//! ... until the id is free. Attribute updates treat an empty value as removal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::reports::{self, LibraryError, ReportCode, ReportItem, ReportProcessor};

pub type NvSet = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub instance_attributes: NvSet,
    #[serde(default)]
    pub meta_attributes: NvSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// Agent executable run for every alert.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub instance_attributes: NvSet,
    #[serde(default)]
    pub meta_attributes: NvSet,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

/// Optional fields of a create or update request.
#[derive(Debug, Clone, Default)]
pub struct AlertChanges<'a> {
    pub description: Option<&'a str>,
    pub instance_attributes: NvSet,
    pub meta_attributes: NvSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertConfiguration {
    alerts: Vec<Alert>,
}

impl AlertConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn alert(&self, id: &str) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn recipient(&self, id: &str) -> Option<&Recipient> {
        self.alerts
            .iter()
            .flat_map(|a| a.recipients.iter())
            .find(|r| r.id == id)
    }

    fn id_exists(&self, id: &str) -> bool {
        self.alert(id).is_some() || self.recipient(id).is_some()
    }

    /// First free id among `base`, `base-1`, `base-2`, ...
    pub fn find_unique_id(&self, base: &str) -> String {
        if !self.id_exists(base) {
            return base.to_string();
        }
        (1..)
            .map(|counter| format!("{}-{}", base, counter))
            .find(|candidate| !self.id_exists(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    fn claim_id(&self, id: Option<&str>, base: &str) -> Result<String, LibraryError> {
        match id {
            Some(id) if self.id_exists(id) => Err(reports::id_already_exists(id).into()),
            Some(id) => Ok(id.to_string()),
            None => Ok(self.find_unique_id(base)),
        }
    }

    fn alert_index(&self, id: &str) -> Result<usize, LibraryError> {
        self.alerts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| reports::id_not_found(id, "alert").into())
    }

    fn recipient_index(&self, id: &str) -> Result<(usize, usize), LibraryError> {
        self.alerts
            .iter()
            .enumerate()
            .find_map(|(ai, a)| a.recipients.iter().position(|r| r.id == id).map(|ri| (ai, ri)))
            .ok_or_else(|| reports::id_not_found(id, "recipient").into())
    }

    /// Creates an alert and returns its id.
    pub fn create_alert(
        &mut self,
        id: Option<&str>,
        path: Option<&str>,
        changes: AlertChanges<'_>,
    ) -> Result<String, LibraryError> {
        let path = path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| LibraryError::from(reports::required_option_missing("path")))?;
        let id = self.claim_id(id, "alert")?;

        let mut alert = Alert {
            id: id.clone(),
            path: path.to_string(),
            ..Alert::default()
        };
        apply_changes(&mut alert.description, &mut alert.instance_attributes, &mut alert.meta_attributes, changes);
        self.alerts.push(alert);
        debug!(alert = %id, "alert created");
        Ok(id)
    }

    pub fn update_alert(
        &mut self,
        id: &str,
        path: Option<&str>,
        changes: AlertChanges<'_>,
    ) -> Result<(), LibraryError> {
        let index = self.alert_index(id)?;
        let alert = &mut self.alerts[index];
        if let Some(path) = path.filter(|p| !p.is_empty()) {
            alert.path = path.to_string();
        }
        apply_changes(&mut alert.description, &mut alert.instance_attributes, &mut alert.meta_attributes, changes);
        Ok(())
    }

    /// Removes alerts. If any id is unknown nothing is removed.
    pub fn remove_alerts(&mut self, ids: &[&str]) -> Result<(), LibraryError> {
        let missing: Vec<ReportItem> = ids
            .iter()
            .filter(|id| self.alert(id).is_none())
            .map(|id| reports::id_not_found(id, "alert"))
            .collect();
        if !missing.is_empty() {
            return Err(LibraryError::new(missing));
        }
        self.alerts.retain(|a| !ids.contains(&a.id.as_str()));
        Ok(())
    }

    /// Adds a recipient to an alert and returns its id.
    ///
    /// A value already used by another recipient of the same alert is an
    /// error unless `allow_same_value` is set, in which case it is a warning.
    pub fn add_recipient(
        &mut self,
        reporter: &dyn ReportProcessor,
        alert_id: &str,
        value: Option<&str>,
        id: Option<&str>,
        changes: AlertChanges<'_>,
        allow_same_value: bool,
    ) -> Result<String, LibraryError> {
        let value = value.ok_or_else(|| LibraryError::from(reports::required_option_missing("value")))?;
        if value.is_empty() {
            return Err(reports::cib_alert_recipient_value_invalid(value).into());
        }
        let index = self.alert_index(alert_id)?;
        let id = self.claim_id(id, &format!("{}-recipient", alert_id))?;

        let alert = &mut self.alerts[index];
        if alert.recipients.iter().any(|r| r.value == value) {
            reporter.process(duplicate_value(alert_id, value, allow_same_value))?;
        }

        let mut recipient = Recipient {
            id: id.clone(),
            value: value.to_string(),
            ..Recipient::default()
        };
        apply_changes(
            &mut recipient.description,
            &mut recipient.instance_attributes,
            &mut recipient.meta_attributes,
            changes,
        );
        alert.recipients.push(recipient);
        debug!(alert = alert_id, recipient = %id, "recipient added");
        Ok(id)
    }

    pub fn update_recipient(
        &mut self,
        reporter: &dyn ReportProcessor,
        recipient_id: &str,
        value: Option<&str>,
        changes: AlertChanges<'_>,
        allow_same_value: bool,
    ) -> Result<(), LibraryError> {
        let (ai, ri) = self.recipient_index(recipient_id)?;
        let alert = &mut self.alerts[ai];

        if let Some(value) = value {
            if value.is_empty() {
                return Err(reports::cib_alert_recipient_value_invalid(value).into());
            }
            let taken = alert
                .recipients
                .iter()
                .enumerate()
                .any(|(i, r)| i != ri && r.value == value);
            if taken {
                reporter.process(duplicate_value(&alert.id, value, allow_same_value))?;
            }
            alert.recipients[ri].value = value.to_string();
        }

        let recipient = &mut alert.recipients[ri];
        apply_changes(
            &mut recipient.description,
            &mut recipient.instance_attributes,
            &mut recipient.meta_attributes,
            changes,
        );
        Ok(())
    }

    /// Removes recipients. If any id is unknown nothing is removed.
    pub fn remove_recipients(&mut self, ids: &[&str]) -> Result<(), LibraryError> {
        let missing: Vec<ReportItem> = ids
            .iter()
            .filter(|id| self.recipient(id).is_none())
            .map(|id| reports::id_not_found(id, "recipient"))
            .collect();
        if !missing.is_empty() {
            return Err(LibraryError::new(missing));
        }
        for alert in &mut self.alerts {
            alert.recipients.retain(|r| !ids.contains(&r.id.as_str()));
        }
        Ok(())
    }
}

fn duplicate_value(alert_id: &str, value: &str, allow_same_value: bool) -> ReportItem {
    reports::cib_alert_recipient_already_exists(alert_id, value)
        .forceable_by(ReportCode::ForceAlertRecipientValueNotUnique, allow_same_value)
}

/// Applies name/value updates; an empty value removes the name.
pub fn update_nvset(target: &mut NvSet, updates: &NvSet) {
    for (name, value) in updates {
        if value.is_empty() {
            target.remove(name);
        } else {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn apply_changes(
    description: &mut Option<String>,
    instance_attributes: &mut NvSet,
    meta_attributes: &mut NvSet,
    changes: AlertChanges<'_>,
) {
    match changes.description {
        Some("") => *description = None,
        Some(text) => *description = Some(text.to_string()),
        None => {}
    }
    update_nvset(instance_attributes, &changes.instance_attributes);
    update_nvset(meta_attributes, &changes.meta_attributes);
}
