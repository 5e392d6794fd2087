//! Dose history models.

use serde::{Deserialize, Serialize};

/// Outcome the user logged for a dose.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Taken,
    Skipped,
}

impl DoseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseStatus::Taken => "taken",
            DoseStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "taken" => Some(DoseStatus::Taken),
            "skipped" => Some(DoseStatus::Skipped),
            _ => None,
        }
    }
}

/// A logged dose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoseRecord {
    pub id: i64,
    pub medication_id: i64,
    /// When the outcome was logged
    pub taken_at: String,
    pub status: DoseStatus,
}
