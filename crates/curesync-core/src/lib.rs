//! CureSync Core Library
//!
//! Local-first medication tracking with recurring reminder notifications.
//!
//! # Architecture
//!
//! ```text
//! Medication saved (frequency JSON)
//!             │
//!     Recurrence Model ── malformed? ──► no reminders (logged)
//!             │
//!     Trigger Compiler ──► [TriggerSpec, ...]
//!             │
//!     Permission Gate ── denied / unsupported ──► nothing registered
//!             │
//!     ┌───────▼────────────────────────────┐
//!     │        Scheduling Orchestrator     │
//!     │  register all specs with the host  │
//!     │  all-or-nothing, then record ids   │
//!     └───────┬────────────────────────────┘
//!             │
//!     Schedule Ledger (notifications table)
//!             │
//!     edit ──► reschedule      delete ──► cancel every recorded id
//! ```
//!
//! # Core Principle
//!
//! **The ledger holds exactly the alarms the host accepted.** A medication
//! never ends up with a partial set of reminders, and cancelling works from
//! the ledger alone.
//!
//! # Modules
//!
//! - [`recurrence`]: Recurrence rules and their stored JSON form
//! - [`scheduler`]: Trigger compiler, ledger, permission gate, orchestrator
//! - [`db`]: SQLite persistence (medications, dose history, ledger)
//! - [`models`]: Domain types (Medication, DoseRecord)
//! - [`service`]: Medication flows that drive the orchestrator
//! - [`timeline`]: Today's dose slots and adherence
//! - [`config`]: Reminder presentation settings

pub mod config;
pub mod db;
pub mod models;
pub mod recurrence;
pub mod scheduler;
pub mod service;
pub mod timeline;

// Re-export commonly used types
pub use config::ReminderConfig;
pub use db::Database;
pub use models::{DoseRecord, DoseStatus, Medication, NewMedication};
pub use recurrence::{RecurrenceRule, TimeOfDay, Weekday};
pub use scheduler::{
    compile, NotificationContent, NotificationService, Orchestrator, ScheduleLedger, SqliteLedger,
    TriggerSpec,
};
pub use service::{MedicationService, ReminderStatus, SavedMedication};
pub use timeline::{AdherenceSummary, TimeSlot};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::TimeZone;
use scheduler::{ChannelSpec, DeviceError, PermissionState, PermissionStatus};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CureSyncError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Scheduling error: {0}")]
    SchedulingError(String),
}

impl From<db::DbError> for CureSyncError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => CureSyncError::NotFound(what),
            other => CureSyncError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CureSyncError {
    fn from(e: serde_json::Error) -> Self {
        CureSyncError::SerializationError(e.to_string())
    }
}

impl From<config::ConfigError> for CureSyncError {
    fn from(e: config::ConfigError) -> Self {
        CureSyncError::InvalidInput(e.to_string())
    }
}

impl From<recurrence::RecurrenceError> for CureSyncError {
    fn from(e: recurrence::RecurrenceError) -> Self {
        CureSyncError::InvalidInput(e.to_string())
    }
}

impl From<scheduler::SchedulingError> for CureSyncError {
    fn from(e: scheduler::SchedulingError) -> Self {
        CureSyncError::SchedulingError(e.to_string())
    }
}

impl From<service::ServiceError> for CureSyncError {
    fn from(e: service::ServiceError) -> Self {
        use service::ServiceError;
        match e {
            ServiceError::Invalid(e) => CureSyncError::InvalidInput(e.to_string()),
            ServiceError::NotFound(id) => CureSyncError::NotFound(format!("medication {}", id)),
            ServiceError::Storage(e) => e.into(),
            ServiceError::Scheduling(e) => e.into(),
            ServiceError::Poisoned => CureSyncError::DatabaseError("Lock poisoned".to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for CureSyncError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        CureSyncError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Host Notification Callbacks
// =========================================================================

/// Error raised by the host notification service.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum HostNotifierError {
    #[error("Host notification failure: {0}")]
    Failed(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for HostNotifierError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        HostNotifierError::Failed(e.reason)
    }
}

/// Local notification service implemented by the mobile host.
#[uniffi::export(callback_interface)]
pub trait HostNotifier: Send + Sync {
    /// False on simulators and other hosts that cannot post notifications.
    fn is_physical_device(&self) -> bool;
    fn permission_status(&self) -> FfiPermissionStatus;
    fn request_permission(&self) -> FfiPermissionStatus;
    fn configure_channel(&self, channel: FfiChannel) -> Result<(), HostNotifierError>;
    /// Register a repeating notification; returns the host's identifier.
    fn schedule_notification(
        &self,
        trigger: FfiTrigger,
        content: FfiNotificationContent,
    ) -> Result<String, HostNotifierError>;
    fn cancel_notification(&self, identifier: String) -> Result<(), HostNotifierError>;
}

/// Adapts the host callbacks to the scheduler's notification service.
struct ForeignNotifier {
    host: Box<dyn HostNotifier>,
}

#[async_trait]
impl NotificationService for ForeignNotifier {
    fn is_capable(&self) -> bool {
        self.host.is_physical_device()
    }

    async fn permission_status(&self) -> PermissionStatus {
        self.host.permission_status().into()
    }

    async fn request_permission(&self) -> PermissionStatus {
        self.host.request_permission().into()
    }

    async fn configure_channel(&self, channel: &ChannelSpec) -> Result<(), DeviceError> {
        self.host
            .configure_channel(channel.clone().into())
            .map_err(host_error)
    }

    async fn register(
        &self,
        trigger: &TriggerSpec,
        content: &NotificationContent,
    ) -> Result<String, DeviceError> {
        self.host
            .schedule_notification(trigger.into(), content.clone().into())
            .map_err(host_error)
    }

    async fn cancel(&self, identifier: &str) -> Result<(), DeviceError> {
        self.host
            .cancel_notification(identifier.to_string())
            .map_err(host_error)
    }
}

fn host_error(e: HostNotifierError) -> DeviceError {
    match e {
        HostNotifierError::Failed(reason) => DeviceError::Rejected(reason),
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Install a tracing subscriber. Later calls are ignored.
#[uniffi::export]
pub fn init_logging(filter: String) -> Result<(), CureSyncError> {
    let filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .map_err(|e| CureSyncError::InvalidInput(e.to_string()))?;
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("Logging already initialized");
    }
    Ok(())
}

/// Check a schedule JSON document and return it in canonical stored form.
#[uniffi::export]
pub fn validate_schedule(json: String) -> Result<String, CureSyncError> {
    Ok(RecurrenceRule::parse_strict(&json)?.to_stored_json())
}

/// Open or create a database at the given path.
///
/// `config_json` overrides reminder presentation settings.
#[uniffi::export]
pub fn open_database(
    path: String,
    notifier: Box<dyn HostNotifier>,
    config_json: Option<String>,
) -> Result<Arc<CureSyncCore>, CureSyncError> {
    let config = match config_json {
        Some(json) => ReminderConfig::from_json(&json)?,
        None => ReminderConfig::default(),
    };
    let db = Database::open(&path)?;
    Ok(CureSyncCore::new(db, notifier, config))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory(
    notifier: Box<dyn HostNotifier>,
) -> Result<Arc<CureSyncCore>, CureSyncError> {
    let db = Database::open_in_memory()?;
    Ok(CureSyncCore::new(db, notifier, ReminderConfig::default()))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe medication service for FFI.
#[derive(uniffi::Object)]
pub struct CureSyncCore {
    service: MedicationService,
}

impl CureSyncCore {
    fn new(db: Database, notifier: Box<dyn HostNotifier>, config: ReminderConfig) -> Arc<Self> {
        let db = Arc::new(Mutex::new(db));
        let ledger = Arc::new(SqliteLedger::new(Arc::clone(&db)));
        let notifier = Arc::new(ForeignNotifier { host: notifier });
        let orchestrator = Orchestrator::new(notifier, ledger, config);
        Arc::new(Self {
            service: MedicationService::new(db, orchestrator),
        })
    }
}

#[uniffi::export]
impl CureSyncCore {
    // =========================================================================
    // Medication Operations
    // =========================================================================

    /// Add a medication and schedule its reminders.
    pub async fn add_medication(
        &self,
        medication: FfiNewMedication,
    ) -> Result<FfiSaveResult, CureSyncError> {
        let saved = self.service.add_medication(medication.into()).await?;
        Ok(saved.into())
    }

    /// Save edits; reminders are rebuilt only if the schedule changed.
    pub async fn update_medication(
        &self,
        medication: FfiMedication,
    ) -> Result<FfiSaveResult, CureSyncError> {
        let saved = self.service.update_medication(medication.into()).await?;
        Ok(saved.into())
    }

    /// Cancel reminders and delete a medication with its history.
    pub async fn delete_medication(&self, id: i64) -> Result<FfiReminderStatus, CureSyncError> {
        Ok(self.service.delete_medication(id).await?.into())
    }

    pub fn get_medication(&self, id: i64) -> Result<Option<FfiMedication>, CureSyncError> {
        Ok(self.service.get_medication(id)?.map(|m| m.into()))
    }

    pub fn list_medications(&self) -> Result<Vec<FfiMedication>, CureSyncError> {
        let medications = self.service.list_medications()?;
        Ok(medications.into_iter().map(|m| m.into()).collect())
    }

    // =========================================================================
    // Dose History
    // =========================================================================

    /// Log a dose. A taken dose decrements inventory.
    pub fn record_dose(
        &self,
        medication_id: i64,
        status: FfiDoseStatus,
    ) -> Result<FfiDoseRecord, CureSyncError> {
        let record = self.service.record_dose(medication_id, status.into())?;
        Ok(record.into())
    }

    /// Dose records logged since an RFC 3339 timestamp.
    pub fn history_since(&self, since: String) -> Result<Vec<FfiDoseRecord>, CureSyncError> {
        let records = self.service.history_since(&since)?;
        Ok(records.into_iter().map(|r| r.into()).collect())
    }

    /// A medication's dose records, newest first.
    pub fn medication_history(&self, id: i64) -> Result<Vec<FfiDoseRecord>, CureSyncError> {
        let records = self.service.medication_history(id)?;
        Ok(records.into_iter().map(|r| r.into()).collect())
    }

    pub fn adherence_since(&self, since: String) -> Result<FfiAdherence, CureSyncError> {
        Ok(self.service.adherence_since(&since)?.into())
    }

    // =========================================================================
    // Schedule Views
    // =========================================================================

    /// Today's expected doses in local time.
    pub fn today_timeline(&self) -> Result<Vec<FfiTimeSlot>, CureSyncError> {
        let now = chrono::Local::now().naive_local();
        let slots = self.service.timeline(now)?;
        Ok(slots.into_iter().map(|s| s.into()).collect())
    }

    /// Share of today's doses taken so far, `0.0..=1.0`.
    pub fn today_progress(&self) -> Result<f64, CureSyncError> {
        let now = chrono::Local::now();
        let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN);
        let day_start = chrono::Local
            .from_local_datetime(&midnight)
            .earliest()
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|| now.with_timezone(&chrono::Utc));
        Ok(self.service.today_progress(now.naive_local(), day_start)?)
    }

    /// Next local reminder time (`YYYY-MM-DDTHH:MM`), if scheduled.
    pub fn next_due(&self, id: i64) -> Result<Option<String>, CureSyncError> {
        let now = chrono::Local::now().naive_local();
        let next = self.service.next_due(id, now)?;
        Ok(next.map(|t| t.format("%Y-%m-%dT%H:%M").to_string()))
    }

    // =========================================================================
    // Notification Housekeeping
    // =========================================================================

    /// Ask for notification permission if needed. Returns true when granted.
    pub async fn ensure_notification_permission(&self) -> bool {
        let gate = self.service.orchestrator().permission_gate();
        gate.resolve().await == PermissionState::Granted
    }

    /// Drop ledger entries left behind by deleted medications.
    pub async fn reconcile_ledger(&self) -> Result<u32, CureSyncError> {
        let removed = self.service.orchestrator().reconcile_orphans().await?;
        Ok(removed.len() as u32)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe medication.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedication {
    pub id: i64,
    pub name: String,
    pub dosage: Option<String>,
    /// Schedule JSON
    pub frequency: Option<String>,
    pub inventory_count: i64,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub created_at: String,
}

impl From<Medication> for FfiMedication {
    fn from(med: Medication) -> Self {
        Self {
            id: med.id,
            name: med.name,
            dosage: med.dosage,
            frequency: med.frequency,
            inventory_count: med.inventory_count,
            color: med.color,
            icon: med.icon,
            created_at: med.created_at,
        }
    }
}

impl From<FfiMedication> for Medication {
    fn from(med: FfiMedication) -> Self {
        Medication {
            id: med.id,
            name: med.name,
            dosage: med.dosage,
            frequency: med.frequency,
            inventory_count: med.inventory_count,
            color: med.color,
            icon: med.icon,
            created_at: med.created_at,
        }
    }
}

/// FFI-safe medication input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewMedication {
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub inventory_count: i64,
    pub color: Option<String>,
    pub icon: Option<String>,
}

impl From<FfiNewMedication> for NewMedication {
    fn from(med: FfiNewMedication) -> Self {
        NewMedication {
            name: med.name,
            dosage: med.dosage,
            frequency: med.frequency,
            inventory_count: med.inventory_count,
            color: med.color,
            icon: med.icon,
        }
    }
}

/// Reminder outcome of a save or delete.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum FfiReminderStatus {
    Scheduled { count: u32 },
    Unchanged,
    Cancelled { count: u32, failed: u32 },
    PermissionDenied,
    Failed { reason: String },
}

impl From<ReminderStatus> for FfiReminderStatus {
    fn from(status: ReminderStatus) -> Self {
        match status {
            ReminderStatus::Scheduled { count } => FfiReminderStatus::Scheduled {
                count: count as u32,
            },
            ReminderStatus::Unchanged => FfiReminderStatus::Unchanged,
            ReminderStatus::Cancelled { count, failed } => FfiReminderStatus::Cancelled {
                count: count as u32,
                failed: failed as u32,
            },
            ReminderStatus::PermissionDenied => FfiReminderStatus::PermissionDenied,
            ReminderStatus::Failed { reason } => FfiReminderStatus::Failed { reason },
        }
    }
}

/// FFI-safe save result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSaveResult {
    pub medication: FfiMedication,
    pub reminders: FfiReminderStatus,
}

impl From<SavedMedication> for FfiSaveResult {
    fn from(saved: SavedMedication) -> Self {
        Self {
            medication: saved.medication.into(),
            reminders: saved.reminders.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiDoseStatus {
    Taken,
    Skipped,
}

impl From<FfiDoseStatus> for DoseStatus {
    fn from(status: FfiDoseStatus) -> Self {
        match status {
            FfiDoseStatus::Taken => DoseStatus::Taken,
            FfiDoseStatus::Skipped => DoseStatus::Skipped,
        }
    }
}

impl From<DoseStatus> for FfiDoseStatus {
    fn from(status: DoseStatus) -> Self {
        match status {
            DoseStatus::Taken => FfiDoseStatus::Taken,
            DoseStatus::Skipped => FfiDoseStatus::Skipped,
        }
    }
}

/// FFI-safe dose record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDoseRecord {
    pub id: i64,
    pub medication_id: i64,
    pub taken_at: String,
    pub status: FfiDoseStatus,
}

impl From<DoseRecord> for FfiDoseRecord {
    fn from(record: DoseRecord) -> Self {
        Self {
            id: record.id,
            medication_id: record.medication_id,
            taken_at: record.taken_at,
            status: record.status.into(),
        }
    }
}

/// FFI-safe timeline slot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTimeSlot {
    pub id: String,
    pub medication_id: i64,
    pub medication_name: String,
    /// `HH:MM`
    pub time: String,
    pub is_past: bool,
}

impl From<TimeSlot> for FfiTimeSlot {
    fn from(slot: TimeSlot) -> Self {
        Self {
            id: slot.id,
            medication_id: slot.medication_id,
            medication_name: slot.medication_name,
            time: slot.time.to_string(),
            is_past: slot.is_past,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAdherence {
    pub taken: u32,
    pub skipped: u32,
    pub rate_percent: u32,
}

impl From<AdherenceSummary> for FfiAdherence {
    fn from(summary: AdherenceSummary) -> Self {
        Self {
            taken: summary.taken,
            skipped: summary.skipped,
            rate_percent: summary.rate_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiPermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

impl From<FfiPermissionStatus> for PermissionStatus {
    fn from(status: FfiPermissionStatus) -> Self {
        match status {
            FfiPermissionStatus::Granted => PermissionStatus::Granted,
            FfiPermissionStatus::Denied => PermissionStatus::Denied,
            FfiPermissionStatus::Undetermined => PermissionStatus::Undetermined,
        }
    }
}

/// FFI-safe notification channel.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiChannel {
    pub id: String,
    pub name: String,
    pub vibration_pattern: Vec<u64>,
    pub light_color: String,
}

impl From<ChannelSpec> for FfiChannel {
    fn from(channel: ChannelSpec) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            vibration_pattern: channel.vibration_pattern,
            light_color: channel.light_color,
        }
    }
}

/// FFI-safe repeating trigger. `weekday` is 0 = Sunday.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum FfiTrigger {
    Daily {
        hour: u8,
        minute: u8,
    },
    Weekly {
        weekday: u8,
        hour: u8,
        minute: u8,
    },
    /// Repeats every `seconds` from registration.
    Interval {
        seconds: u64,
        anchor_hour: u8,
        anchor_minute: u8,
    },
}

impl From<&TriggerSpec> for FfiTrigger {
    fn from(spec: &TriggerSpec) -> Self {
        match *spec {
            TriggerSpec::Daily { time } => FfiTrigger::Daily {
                hour: time.hour(),
                minute: time.minute(),
            },
            TriggerSpec::Weekly { weekday, time } => FfiTrigger::Weekly {
                weekday: weekday.index(),
                hour: time.hour(),
                minute: time.minute(),
            },
            TriggerSpec::Interval {
                anchor,
                every_hours,
            } => FfiTrigger::Interval {
                seconds: u64::from(every_hours) * 3600,
                anchor_hour: anchor.hour(),
                anchor_minute: anchor.minute(),
            },
        }
    }
}

/// FFI-safe notification content.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNotificationContent {
    pub title: String,
    pub body: String,
    pub medication_id: i64,
    pub kind_tag: String,
    pub category: String,
    pub channel_id: String,
}

impl From<NotificationContent> for FfiNotificationContent {
    fn from(content: NotificationContent) -> Self {
        Self {
            title: content.title,
            body: content.body,
            medication_id: content.medication_id,
            kind_tag: content.kind_tag,
            category: content.category,
            channel_id: content.channel_id,
        }
    }
}
