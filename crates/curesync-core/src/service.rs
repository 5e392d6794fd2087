//! Medication flows that keep reminders in step with storage.
//!
//! A medication save never fails because of reminders: scheduling problems
//! come back as a [`ReminderStatus`] next to the stored record.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::db::{self, Database, DbError};
use crate::models::{DoseRecord, DoseStatus, Medication, MedicationError, NewMedication};
use crate::scheduler::{
    next_occurrence, CancelReport, Orchestrator, SchedulingError, SchedulingResult,
};
use crate::timeline::{build_timeline, dose_progress, AdherenceSummary, TimeSlot};

/// Service errors.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid medication: {0}")]
    Invalid(#[from] MedicationError),

    #[error("Medication not found: {0}")]
    NotFound(i64),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Reminder bookkeeping failed: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("Database lock poisoned")]
    Poisoned,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// What happened to a medication's reminders during a save or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderStatus {
    /// Reminders registered (zero when there is no schedule)
    Scheduled { count: usize },
    /// Schedule unchanged; existing reminders kept
    Unchanged,
    /// Reminders cancelled
    Cancelled { count: usize, failed: usize },
    /// Notifications are not permitted; the medication was still saved
    PermissionDenied,
    /// Reminders could not be set; the medication was still saved
    Failed { reason: String },
}

impl ReminderStatus {
    fn from_scheduling(result: SchedulingResult<usize>) -> Self {
        match result {
            Ok(count) => ReminderStatus::Scheduled { count },
            Err(e) => Self::from_error(e),
        }
    }

    fn from_cancel(report: CancelReport) -> Self {
        ReminderStatus::Cancelled {
            count: report.requested,
            failed: report.failed,
        }
    }

    fn from_error(e: SchedulingError) -> Self {
        match e {
            SchedulingError::PermissionDenied => ReminderStatus::PermissionDenied,
            other => {
                tracing::error!(error = %other, "Reminder update failed");
                ReminderStatus::Failed {
                    reason: other.to_string(),
                }
            }
        }
    }
}

/// A stored medication plus the outcome of its reminder update.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMedication {
    pub medication: Medication,
    pub reminders: ReminderStatus,
}

/// Medication CRUD, dose logging and reminder lifecycle hooks.
pub struct MedicationService {
    db: Arc<Mutex<Database>>,
    orchestrator: Orchestrator,
}

impl MedicationService {
    pub fn new(db: Arc<Mutex<Database>>, orchestrator: Orchestrator) -> Self {
        Self { db, orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn lock(&self) -> ServiceResult<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| ServiceError::Poisoned)
    }

    /// Store a new medication and schedule its reminders.
    pub async fn add_medication(&self, new: NewMedication) -> ServiceResult<SavedMedication> {
        new.validate()?;
        let medication = self.lock()?.insert_medication(&new)?;
        tracing::info!(medication_id = medication.id, "Medication added");

        let reminders =
            ReminderStatus::from_scheduling(self.orchestrator.on_medication_created(&medication).await);
        Ok(SavedMedication {
            medication,
            reminders,
        })
    }

    /// Store edits to a medication, rescheduling if its schedule changed.
    pub async fn update_medication(&self, medication: Medication) -> ServiceResult<SavedMedication> {
        medication.validate()?;
        let old = {
            let db = self.lock()?;
            let old = db
                .get_medication(medication.id)?
                .ok_or(ServiceError::NotFound(medication.id))?;
            db.update_medication(&medication)?;
            old
        };

        let reminders = match self
            .orchestrator
            .on_medication_updated(&old, &medication)
            .await
        {
            Ok(None) => ReminderStatus::Unchanged,
            Ok(Some(count)) => ReminderStatus::Scheduled { count },
            Err(e) => ReminderStatus::from_error(e),
        };
        Ok(SavedMedication {
            medication,
            reminders,
        })
    }

    /// Cancel a medication's reminders, then delete it with its history.
    ///
    /// If the ledger cannot be read or cleared the medication is kept, since
    /// deleting it would cascade away the only record of its live alarms.
    pub async fn delete_medication(&self, id: i64) -> ServiceResult<ReminderStatus> {
        let exists = self.lock()?.medication_exists(id)?;
        if !exists {
            return Err(ServiceError::NotFound(id));
        }

        let report = match self.orchestrator.on_medication_deleted(id).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(medication_id = id, error = %e, "Cancellation failed, keeping medication");
                return Err(e.into());
            }
        };
        let reminders = ReminderStatus::from_cancel(report);
        self.lock()?.delete_medication(id)?;
        tracing::info!(medication_id = id, "Medication deleted");
        Ok(reminders)
    }

    pub fn get_medication(&self, id: i64) -> ServiceResult<Option<Medication>> {
        Ok(self.lock()?.get_medication(id)?)
    }

    pub fn list_medications(&self) -> ServiceResult<Vec<Medication>> {
        Ok(self.lock()?.list_medications()?)
    }

    /// Log a dose outcome; a taken dose draws down inventory.
    pub fn record_dose(&self, medication_id: i64, status: DoseStatus) -> ServiceResult<DoseRecord> {
        let mut db = self.lock()?;
        if !db.medication_exists(medication_id)? {
            return Err(ServiceError::NotFound(medication_id));
        }
        Ok(db.record_dose(medication_id, status)?)
    }

    /// Dose records logged at or after `since` (RFC 3339).
    pub fn history_since(&self, since: &str) -> ServiceResult<Vec<DoseRecord>> {
        Ok(self.lock()?.history_since(since)?)
    }

    /// One medication's dose records, newest first.
    pub fn medication_history(&self, id: i64) -> ServiceResult<Vec<DoseRecord>> {
        let db = self.lock()?;
        if !db.medication_exists(id)? {
            return Err(ServiceError::NotFound(id));
        }
        Ok(db.history_for_medication(id)?)
    }

    pub fn adherence_since(&self, since: &str) -> ServiceResult<AdherenceSummary> {
        Ok(AdherenceSummary::from_records(&self.history_since(since)?))
    }

    /// Today's expected doses across all medications.
    pub fn timeline(&self, now: NaiveDateTime) -> ServiceResult<Vec<TimeSlot>> {
        let medications = self.list_medications()?;
        let default_rule = self.orchestrator.config().default_rule();
        Ok(build_timeline(&medications, now, &default_rule))
    }

    /// Share of today's slots covered by taken doses, in `0.0..=1.0`.
    ///
    /// `day_start` is the instant local midnight fell on.
    pub fn today_progress(&self, now: NaiveDateTime, day_start: DateTime<Utc>) -> ServiceResult<f64> {
        let slots = self.timeline(now)?;
        let records = self.history_since(&db::timestamp(day_start))?;
        Ok(dose_progress(&slots, &records))
    }

    /// Next reminder time for a medication, if it has a schedule.
    pub fn next_due(&self, id: i64, now: NaiveDateTime) -> ServiceResult<Option<NaiveDateTime>> {
        let medication = self.get_medication(id)?.ok_or(ServiceError::NotFound(id))?;
        Ok(next_occurrence(medication.recurrence().as_ref(), now))
    }
}
