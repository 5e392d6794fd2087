//! Medication models.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recurrence::{self, RecurrenceRule};

/// Why a medication record was rejected before it reached storage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MedicationError {
    #[error("Medication name must not be empty")]
    EmptyName,

    #[error("Inventory count must not be negative, got {0}")]
    NegativeInventory(i64),
}

/// A stored medication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    /// Row id assigned by storage
    pub id: i64,
    /// Display name (non-empty)
    pub name: String,
    /// Display dosage (e.g., "50mg")
    pub dosage: Option<String>,
    /// Stored schedule JSON; see [`crate::recurrence`]
    pub frequency: Option<String>,
    /// Doses on hand, decremented when a dose is taken
    pub inventory_count: i64,
    /// Hex colour for the UI
    pub color: Option<String>,
    /// Icon name for the UI
    pub icon: Option<String>,
    /// Creation timestamp
    pub created_at: String,
}

impl Medication {
    /// Parsed schedule, or `None` when absent or malformed.
    pub fn recurrence(&self) -> Option<RecurrenceRule> {
        recurrence::parse(self.frequency.as_deref())
    }

    pub fn validate(&self) -> Result<(), MedicationError> {
        validate_fields(&self.name, self.inventory_count)
    }
}

/// A medication that has not been stored yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewMedication {
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub inventory_count: i64,
    pub color: Option<String>,
    pub icon: Option<String>,
}

impl NewMedication {
    /// Create a new medication with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the schedule from a typed rule.
    pub fn with_rule(mut self, rule: &RecurrenceRule) -> Self {
        self.frequency = Some(rule.to_stored_json());
        self
    }

    pub fn with_dosage(mut self, dosage: impl Into<String>) -> Self {
        self.dosage = Some(dosage.into());
        self
    }

    pub fn with_inventory(mut self, count: i64) -> Self {
        self.inventory_count = count;
        self
    }

    pub fn validate(&self) -> Result<(), MedicationError> {
        validate_fields(&self.name, self.inventory_count)
    }
}

fn validate_fields(name: &str, inventory_count: i64) -> Result<(), MedicationError> {
    if name.trim().is_empty() {
        return Err(MedicationError::EmptyName);
    }
    if inventory_count < 0 {
        return Err(MedicationError::NegativeInventory(inventory_count));
    }
    Ok(())
}
