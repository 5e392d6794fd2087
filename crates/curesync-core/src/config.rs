//! Reminder configuration.
//!
//! Hosts may pass a JSON document to override any field; missing fields
//! fall back to the defaults below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recurrence::{RecurrenceRule, TimeOfDay};
use crate::scheduler::ChannelSpec;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Notification presentation and default-schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReminderConfig {
    /// Android notification channel id
    pub channel_id: String,
    /// Android notification channel display name
    pub channel_name: String,
    /// Channel vibration pattern in milliseconds
    pub vibration_pattern: Vec<u64>,
    /// Channel LED colour
    pub light_color: String,
    /// Category identifier attached to every reminder
    pub category: String,
    /// Payload tag identifying reminder notifications
    pub kind_tag: String,
    /// Notification title
    pub title: String,
    /// Body text used when a medication has no dosage
    pub fallback_body: String,
    /// Times shown for medications without a schedule
    pub default_times: Vec<String>,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            channel_id: "medication-reminders".to_string(),
            channel_name: "Medication Reminders".to_string(),
            vibration_pattern: vec![0, 250, 250, 250],
            light_color: "#14b8a6".to_string(),
            category: "medication".to_string(),
            kind_tag: "medication-reminder".to_string(),
            title: "Time for your medication".to_string(),
            fallback_body: "Take as prescribed".to_string(),
            default_times: vec!["08:00".into(), "14:00".into(), "20:00".into()],
        }
    }
}

impl ReminderConfig {
    /// Load from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("channel_id", &self.channel_id),
            ("category", &self.category),
            ("kind_tag", &self.kind_tag),
            ("title", &self.title),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".into(),
                });
            }
        }
        self.default_time_values()?;
        Ok(())
    }

    /// Presentation default rule built from `default_times`.
    ///
    /// Falls back to the built-in default if the configured list is empty
    /// or malformed.
    pub fn default_rule(&self) -> RecurrenceRule {
        match self.default_time_values() {
            Ok(mut times) if !times.is_empty() => {
                times.sort();
                times.dedup();
                RecurrenceRule::Daily { times }
            }
            _ => RecurrenceRule::presentation_default(),
        }
    }

    /// Channel the permission gate registers once permission is granted.
    pub fn channel_spec(&self) -> ChannelSpec {
        ChannelSpec {
            id: self.channel_id.clone(),
            name: self.channel_name.clone(),
            vibration_pattern: self.vibration_pattern.clone(),
            light_color: self.light_color.clone(),
        }
    }

    fn default_time_values(&self) -> Result<Vec<TimeOfDay>, ConfigError> {
        self.default_times
            .iter()
            .map(|t| {
                t.parse::<TimeOfDay>().map_err(|e| ConfigError::Invalid {
                    field: "default_times",
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}
