//! Schedule ledger: the durable medication → alarm identifier mapping.
//!
//! The host notification service cannot be queried by medication, so an
//! identifier lost from the ledger before it is cancelled becomes an
//! unreachable alarm. Ledger rows live in the same SQLite database as the
//! medication rows they reference.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use super::{ScheduledTrigger, TriggerSpec};
use crate::db::{Database, DbError};

/// Ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Ledger lock poisoned")]
    Poisoned,
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// A persisted registration.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// Device-assigned identifier
    pub identifier: String,
    pub medication_id: i64,
    /// Registration time, unix millis
    pub registered_at: i64,
    /// The spec registered under this identifier, if readable
    pub trigger: Option<TriggerSpec>,
}

/// Persisted record of live device alarms per medication.
///
/// Calls are local and short; they run synchronously on the caller.
pub trait ScheduleLedger: Send + Sync {
    /// Append confirmed registrations as one batch. Empty input is a no-op.
    fn record_triggers(&self, medication_id: i64, triggers: &[ScheduledTrigger]) -> LedgerResult<()>;

    /// Entries for a medication in registration order.
    fn entries_for(&self, medication_id: i64) -> LedgerResult<Vec<LedgerEntry>>;

    /// Remove every entry for a medication. Returns how many were removed.
    fn remove_entries(&self, medication_id: i64) -> LedgerResult<usize>;

    /// Atomically replace a medication's entries with a new set.
    fn replace_entries(&self, medication_id: i64, triggers: &[ScheduledTrigger]) -> LedgerResult<()>;

    /// Remove one entry by identifier.
    fn remove_entry(&self, identifier: &str) -> LedgerResult<bool>;

    /// Entries whose medication no longer exists.
    fn orphaned_entries(&self) -> LedgerResult<Vec<LedgerEntry>>;

    /// Identifiers for a medication in registration order.
    fn identifiers_for(&self, medication_id: i64) -> LedgerResult<Vec<String>> {
        Ok(self
            .entries_for(medication_id)?
            .into_iter()
            .map(|e| e.identifier)
            .collect())
    }
}

/// Ledger backed by the shared SQLite database.
#[derive(Clone)]
pub struct SqliteLedger {
    db: Arc<Mutex<Database>>,
}

impl SqliteLedger {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| LedgerError::Poisoned)
    }
}

impl ScheduleLedger for SqliteLedger {
    fn record_triggers(&self, medication_id: i64, triggers: &[ScheduledTrigger]) -> LedgerResult<()> {
        Ok(self.lock()?.insert_ledger_entries(medication_id, triggers)?)
    }

    fn entries_for(&self, medication_id: i64) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.lock()?.ledger_entries_for(medication_id)?)
    }

    fn remove_entries(&self, medication_id: i64) -> LedgerResult<usize> {
        Ok(self.lock()?.delete_ledger_entries(medication_id)?)
    }

    fn replace_entries(&self, medication_id: i64, triggers: &[ScheduledTrigger]) -> LedgerResult<()> {
        Ok(self.lock()?.replace_ledger_entries(medication_id, triggers)?)
    }

    fn remove_entry(&self, identifier: &str) -> LedgerResult<bool> {
        Ok(self.lock()?.delete_ledger_entry(identifier)?)
    }

    fn orphaned_entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.lock()?.orphaned_ledger_entries()?)
    }
}
