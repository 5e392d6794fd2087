//! Host notification service boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TriggerSpec;
use crate::config::ReminderConfig;
use crate::models::Medication;

/// Failure reported by the host notification service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Notification service unavailable")]
    Unavailable,

    #[error("Notification service rejected request: {0}")]
    Rejected(String),
}

/// Host permission state for posting notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// The user has not been asked yet.
    Undetermined,
}

/// Notification channel settings (Android; other hosts may ignore it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub vibration_pattern: Vec<u64>,
    pub light_color: String,
}

/// What a reminder shows and carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    /// Payload: owning medication
    pub medication_id: i64,
    /// Payload: tag identifying reminder notifications
    pub kind_tag: String,
    pub category: String,
    pub channel_id: String,
}

impl NotificationContent {
    /// Reminder content for a medication.
    pub fn for_medication(medication: &Medication, config: &ReminderConfig) -> Self {
        let dosage = medication
            .dosage
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(config.fallback_body.as_str());
        Self {
            title: config.title.clone(),
            body: format!("{} - {}", medication.name, dosage),
            medication_id: medication.id,
            kind_tag: config.kind_tag.clone(),
            category: config.category.clone(),
            channel_id: config.channel_id.clone(),
        }
    }
}

/// The host's local notification service.
///
/// Implementations may drop, delay or coalesce alarms; the scheduler does
/// not try to detect that.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Whether the host can post notifications at all (false on simulators).
    fn is_capable(&self) -> bool;

    async fn permission_status(&self) -> PermissionStatus;

    /// Prompt the user. Returns the resulting status.
    async fn request_permission(&self) -> PermissionStatus;

    async fn configure_channel(&self, channel: &ChannelSpec) -> Result<(), DeviceError>;

    /// Register a repeating alarm and return its opaque identifier.
    async fn register(
        &self,
        trigger: &TriggerSpec,
        content: &NotificationContent,
    ) -> Result<String, DeviceError>;

    /// Cancel an alarm. Unknown or expired identifiers are not an error.
    async fn cancel(&self, identifier: &str) -> Result<(), DeviceError>;
}
