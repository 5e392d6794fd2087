//! Scheduling orchestrator: schedule, reschedule and cancel per medication.
//!
//! Device calls for one operation run sequentially, so ledger order matches
//! compiled trigger order. Operations on different medications may run
//! concurrently; callers must serialize operations on the same medication.

use std::sync::Arc;

use thiserror::Error;

use super::{
    compile, LedgerEntry, LedgerError, NotificationContent, NotificationService, PermissionGate,
    PermissionState, ScheduleLedger, ScheduledTrigger, TriggerSpec,
};
use crate::config::ReminderConfig;
use crate::models::Medication;

/// Scheduling errors surfaced to callers.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Notification permission not granted")]
    PermissionDenied,

    #[error("Registering reminders for medication {medication_id} failed: {reason} ({rolled_back} rolled back)")]
    RegistrationFailed {
        medication_id: i64,
        reason: String,
        rolled_back: usize,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type SchedulingResult<T> = Result<T, SchedulingError>;

/// Result of cancelling a medication's reminders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Cancellation requests sent to the device
    pub requested: usize,
    /// Requests the device reported as failed (ledger cleaned regardless)
    pub failed: usize,
}

/// Comparison of a medication's ledger against its current rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerAudit {
    pub medication_id: i64,
    /// Compiled specs with no live registration
    pub missing: Vec<TriggerSpec>,
    /// Identifiers whose spec is unknown or no longer compiled
    pub stale: Vec<String>,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.stale.is_empty()
    }
}

/// Coordinates compilation, device registration and ledger bookkeeping.
pub struct Orchestrator {
    service: Arc<dyn NotificationService>,
    ledger: Arc<dyn ScheduleLedger>,
    gate: PermissionGate,
    config: ReminderConfig,
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn NotificationService>,
        ledger: Arc<dyn ScheduleLedger>,
        config: ReminderConfig,
    ) -> Self {
        let gate = PermissionGate::new(Arc::clone(&service), config.channel_spec());
        Self {
            service,
            ledger,
            gate,
            config,
        }
    }

    /// The permission gate guarding registration.
    pub fn permission_gate(&self) -> &PermissionGate {
        &self.gate
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.config
    }

    /// Register all reminders for a medication. All-or-nothing.
    ///
    /// Returns the number of alarms registered. A missing or malformed rule
    /// registers nothing and succeeds; so does an incapable host. A
    /// medication that already has ledger entries is rescheduled instead so
    /// its old alarms are not left behind.
    pub async fn schedule(&self, medication: &Medication) -> SchedulingResult<usize> {
        match self.gate.resolve().await {
            PermissionState::Granted => {}
            PermissionState::Denied => return Err(SchedulingError::PermissionDenied),
            PermissionState::Unsupported => return Ok(0),
        }

        let existing = self.ledger.entries_for(medication.id)?;
        if !existing.is_empty() {
            tracing::warn!(
                medication_id = medication.id,
                count = existing.len(),
                "Schedule called with live reminders, replacing them"
            );
            return self.replace(medication, existing).await;
        }

        let specs = compile(medication.recurrence().as_ref());
        if specs.is_empty() {
            tracing::debug!(medication_id = medication.id, "No reminders to schedule");
            return Ok(0);
        }

        let registered = self.register_all(medication, &specs).await?;
        if let Err(e) = self.ledger.record_triggers(medication.id, &registered) {
            tracing::error!(medication_id = medication.id, error = %e, "Ledger write failed, rolling back");
            self.cancel_identifiers(registered.iter().map(|t| t.identifier.as_str()))
                .await;
            return Err(e.into());
        }

        tracing::info!(medication_id = medication.id, count = registered.len(), "Reminders scheduled");
        Ok(registered.len())
    }

    /// Replace a medication's reminders with those of its current rule.
    ///
    /// New alarms are registered first and the ledger swapped in one
    /// transaction; old alarms are cancelled only after the swap. If
    /// registration fails, the new alarms are rolled back and the old ones
    /// cancelled, so the medication ends with no reminders.
    pub async fn reschedule(&self, medication: &Medication) -> SchedulingResult<usize> {
        match self.gate.resolve().await {
            PermissionState::Granted => {}
            PermissionState::Denied => {
                // Old alarms no longer match the medication; drop them anyway.
                self.cancel(medication.id).await?;
                return Err(SchedulingError::PermissionDenied);
            }
            PermissionState::Unsupported => {
                self.cancel(medication.id).await?;
                return Ok(0);
            }
        }

        let existing = self.ledger.entries_for(medication.id)?;
        self.replace(medication, existing).await
    }

    /// Cancel every reminder of a medication.
    ///
    /// Ledger entries are removed whatever the device reports; a failed
    /// cancellation is logged and counted, never retried.
    pub async fn cancel(&self, medication_id: i64) -> SchedulingResult<CancelReport> {
        let identifiers = self.ledger.identifiers_for(medication_id)?;
        let failed = self
            .cancel_identifiers(identifiers.iter().map(String::as_str))
            .await;
        self.ledger.remove_entries(medication_id)?;

        if !identifiers.is_empty() {
            tracing::info!(medication_id, count = identifiers.len(), failed, "Reminders cancelled");
        }
        Ok(CancelReport {
            requested: identifiers.len(),
            failed,
        })
    }

    /// A medication was created.
    pub async fn on_medication_created(&self, medication: &Medication) -> SchedulingResult<usize> {
        self.schedule(medication).await
    }

    /// A medication was edited. Reschedules only if its rule changed.
    ///
    /// Returns `None` when nothing needed to change.
    pub async fn on_medication_updated(
        &self,
        old: &Medication,
        new: &Medication,
    ) -> SchedulingResult<Option<usize>> {
        if old.recurrence() == new.recurrence() {
            tracing::debug!(medication_id = new.id, "Schedule unchanged");
            return Ok(None);
        }
        self.reschedule(new).await.map(Some)
    }

    /// A medication is being deleted.
    pub async fn on_medication_deleted(&self, medication_id: i64) -> SchedulingResult<CancelReport> {
        self.cancel(medication_id).await
    }

    /// Compare the ledger for a medication with what its rule compiles to.
    pub fn audit(&self, medication: &Medication) -> SchedulingResult<LedgerAudit> {
        let mut missing = compile(medication.recurrence().as_ref());
        let mut stale = Vec::new();

        for entry in self.ledger.entries_for(medication.id)? {
            let matched = entry
                .trigger
                .as_ref()
                .and_then(|spec| missing.iter().position(|m| m == spec));
            match matched {
                Some(index) => {
                    missing.remove(index);
                }
                None => stale.push(entry.identifier),
            }
        }

        Ok(LedgerAudit {
            medication_id: medication.id,
            missing,
            stale,
        })
    }

    /// Drop ledger entries whose medication no longer exists.
    ///
    /// Their alarms are cancelled best-effort. Returns the removed entries.
    pub async fn reconcile_orphans(&self) -> SchedulingResult<Vec<LedgerEntry>> {
        let orphans = self.ledger.orphaned_entries()?;
        for entry in &orphans {
            tracing::warn!(
                medication_id = entry.medication_id,
                identifier = %entry.identifier,
                "Dropping orphaned ledger entry"
            );
            if let Err(e) = self.service.cancel(&entry.identifier).await {
                tracing::warn!(identifier = %entry.identifier, error = %e, "Cancellation failed");
            }
            self.ledger.remove_entry(&entry.identifier)?;
        }
        Ok(orphans)
    }

    /// Register new alarms, swap the ledger, then cancel the old alarms.
    ///
    /// If registration fails the old alarms are cancelled too, leaving the
    /// medication with no reminders rather than ones for a stale rule.
    async fn replace(
        &self,
        medication: &Medication,
        existing: Vec<LedgerEntry>,
    ) -> SchedulingResult<usize> {
        let specs = compile(medication.recurrence().as_ref());
        let registered = match self.register_all(medication, &specs).await {
            Ok(registered) => registered,
            Err(e) => {
                // The old alarms no longer match the stored rule.
                let failed = self
                    .cancel_identifiers(existing.iter().map(|entry| entry.identifier.as_str()))
                    .await;
                self.ledger.remove_entries(medication.id)?;
                tracing::warn!(
                    medication_id = medication.id,
                    cancelled = existing.len(),
                    failed,
                    "Dropped old reminders after failed reschedule"
                );
                return Err(e);
            }
        };

        if let Err(e) = self.ledger.replace_entries(medication.id, &registered) {
            tracing::error!(medication_id = medication.id, error = %e, "Ledger swap failed, rolling back");
            self.cancel_identifiers(registered.iter().map(|t| t.identifier.as_str()))
                .await;
            return Err(e.into());
        }

        self.cancel_identifiers(existing.iter().map(|e| e.identifier.as_str()))
            .await;

        tracing::info!(
            medication_id = medication.id,
            replaced = existing.len(),
            count = registered.len(),
            "Reminders rescheduled"
        );
        Ok(registered.len())
    }

    /// Register specs in order. On the first failure, cancel what was
    /// already registered by this call and report the failure.
    async fn register_all(
        &self,
        medication: &Medication,
        specs: &[TriggerSpec],
    ) -> SchedulingResult<Vec<ScheduledTrigger>> {
        let content = NotificationContent::for_medication(medication, &self.config);
        let mut registered: Vec<ScheduledTrigger> = Vec::with_capacity(specs.len());

        for spec in specs {
            match self.service.register(spec, &content).await {
                Ok(identifier) => registered.push(ScheduledTrigger {
                    medication_id: medication.id,
                    identifier,
                    spec: spec.clone(),
                }),
                Err(e) => {
                    tracing::error!(
                        medication_id = medication.id,
                        error = %e,
                        registered = registered.len(),
                        "Registration failed, rolling back"
                    );
                    self.cancel_identifiers(registered.iter().map(|t| t.identifier.as_str()))
                        .await;
                    return Err(SchedulingError::RegistrationFailed {
                        medication_id: medication.id,
                        reason: e.to_string(),
                        rolled_back: registered.len(),
                    });
                }
            }
        }
        Ok(registered)
    }

    /// Cancel identifiers one at a time. Returns how many failed.
    async fn cancel_identifiers<'a>(&self, identifiers: impl Iterator<Item = &'a str>) -> usize {
        let mut failed = 0;
        for identifier in identifiers {
            if let Err(e) = self.service.cancel(identifier).await {
                tracing::warn!(identifier, error = %e, "Cancellation failed");
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::db::Database;
    use crate::models::NewMedication;
    use crate::recurrence::{RecurrenceRule, TimeOfDay, Weekday};
    use crate::scheduler::testing::FakeNotifier;
    use crate::scheduler::{PermissionStatus, SqliteLedger};

    struct Harness {
        fake: Arc<FakeNotifier>,
        ledger: Arc<SqliteLedger>,
        db: Arc<Mutex<Database>>,
        orchestrator: Orchestrator,
    }

    fn harness(fake: FakeNotifier) -> Harness {
        let fake = Arc::new(fake);
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let ledger = Arc::new(SqliteLedger::new(db.clone()));
        let orchestrator = Orchestrator::new(fake.clone(), ledger.clone(), ReminderConfig::default());
        Harness {
            fake,
            ledger,
            db,
            orchestrator,
        }
    }

    fn daily(times: &[(u8, u8)]) -> RecurrenceRule {
        RecurrenceRule::Daily {
            times: times
                .iter()
                .map(|&(h, m)| TimeOfDay::new(h, m).unwrap())
                .collect(),
        }
    }

    fn insert(h: &Harness, rule: Option<&RecurrenceRule>) -> Medication {
        let mut new = NewMedication::new("Atorvastatin").with_dosage("20mg");
        if let Some(rule) = rule {
            new = new.with_rule(rule);
        }
        h.db.lock().unwrap().insert_medication(&new).unwrap()
    }

    #[tokio::test]
    async fn test_schedule_daily_records_in_order() {
        let h = harness(FakeNotifier::granted());
        let med = insert(&h, Some(&daily(&[(20, 0), (8, 0)])));

        let count = h.orchestrator.schedule(&med).await.unwrap();
        assert_eq!(count, 2);

        let entries = h.ledger.entries_for(med.id).unwrap();
        assert_eq!(
            entries.iter().map(|e| e.identifier.as_str()).collect::<Vec<_>>(),
            vec!["notif-1", "notif-2"]
        );
        assert_eq!(
            entries[0].trigger,
            Some(TriggerSpec::Daily {
                time: TimeOfDay::new(8, 0).unwrap()
            })
        );
        let contents = h.fake.contents.lock().unwrap().clone();
        assert!(contents.iter().all(|c| c.body == "Atorvastatin - 20mg"));
    }

    #[tokio::test]
    async fn test_schedule_weekly() {
        let h = harness(FakeNotifier::granted());
        let rule = RecurrenceRule::Weekly {
            times: vec![TimeOfDay::new(9, 0).unwrap()],
            days_of_week: [1, 3, 5].iter().map(|&d| Weekday::new(d).unwrap()).collect(),
        };
        let med = insert(&h, Some(&rule));

        assert_eq!(h.orchestrator.schedule(&med).await.unwrap(), 3);
        assert_eq!(h.ledger.entries_for(med.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_schedule_absent_rule_is_noop() {
        let h = harness(FakeNotifier::granted());
        let med = insert(&h, None);

        assert_eq!(h.orchestrator.schedule(&med).await.unwrap(), 0);
        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
        assert_eq!(h.fake.registers(), 0);
    }

    #[tokio::test]
    async fn test_schedule_malformed_rule_is_noop() {
        let h = harness(FakeNotifier::granted());
        let mut med = insert(&h, None);
        med.frequency = Some(r#"{"type":"daily","times":["99:99"]}"#.into());

        assert_eq!(h.orchestrator.schedule(&med).await.unwrap(), 0);
        assert_eq!(h.fake.registers(), 0);
    }

    #[tokio::test]
    async fn test_schedule_is_all_or_nothing() {
        let h = harness(FakeNotifier::granted());
        let med = insert(&h, Some(&daily(&[(6, 0), (10, 0), (14, 0), (18, 0)])));
        h.fake.fail_register_on(2);

        let err = h.orchestrator.schedule(&med).await.unwrap_err();
        match err {
            SchedulingError::RegistrationFailed {
                medication_id,
                rolled_back,
                ..
            } => {
                assert_eq!(medication_id, med.id);
                assert_eq!(rolled_back, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
        assert!(h.fake.live_ids().is_empty());
        assert_eq!(h.fake.cancelled_ids(), vec!["notif-1", "notif-2"]);
    }

    #[tokio::test]
    async fn test_schedule_rolls_back_when_ledger_write_fails() {
        let h = harness(FakeNotifier::granted());
        let mut med = insert(&h, Some(&daily(&[(8, 0)])));
        // No such medication row, so the ledger insert violates the foreign key
        med.id += 100;

        let err = h.orchestrator.schedule(&med).await.unwrap_err();
        assert!(matches!(err, SchedulingError::Ledger(_)));
        assert!(h.fake.live_ids().is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied_has_no_side_effects() {
        let h = harness(FakeNotifier::with_status(
            true,
            PermissionStatus::Denied,
            PermissionStatus::Denied,
        ));
        let med = insert(&h, Some(&daily(&[(8, 0)])));

        let err = h.orchestrator.schedule(&med).await.unwrap_err();
        assert!(matches!(err, SchedulingError::PermissionDenied));
        assert_eq!(h.fake.registers(), 0);
        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incapable_host_schedules_nothing() {
        let h = harness(FakeNotifier::with_status(
            false,
            PermissionStatus::Granted,
            PermissionStatus::Granted,
        ));
        let med = insert(&h, Some(&daily(&[(8, 0)])));

        assert_eq!(h.orchestrator.schedule(&med).await.unwrap(), 0);
        assert_eq!(h.fake.registers(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = harness(FakeNotifier::granted());
        let med = insert(&h, Some(&daily(&[(8, 0), (20, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();

        let first = h.orchestrator.cancel(med.id).await.unwrap();
        assert_eq!(first, CancelReport { requested: 2, failed: 0 });
        let second = h.orchestrator.cancel(med.id).await.unwrap();
        assert_eq!(second, CancelReport::default());
        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_cleans_ledger_despite_device_failures() {
        let h = harness(FakeNotifier::granted());
        let med = insert(&h, Some(&daily(&[(8, 0), (12, 0), (20, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();
        h.fake.fail_cancel_of("notif-2");

        let report = h.orchestrator.on_medication_deleted(med.id).await.unwrap();
        assert_eq!(report, CancelReport { requested: 3, failed: 1 });
        assert_eq!(h.fake.cancelled_ids(), vec!["notif-1", "notif-2", "notif-3"]);
        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_replaces_not_merges() {
        let h = harness(FakeNotifier::granted());
        let mut med = insert(&h, Some(&daily(&[(8, 0), (14, 0), (20, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();
        let old_ids = h.ledger.identifiers_for(med.id).unwrap();

        med.frequency = Some(daily(&[(9, 0), (21, 0)]).to_stored_json());
        assert_eq!(h.orchestrator.reschedule(&med).await.unwrap(), 2);

        let new_ids = h.ledger.identifiers_for(med.id).unwrap();
        assert_eq!(new_ids.len(), 2);
        assert!(new_ids.iter().all(|id| !old_ids.contains(id)));
        assert_eq!(h.fake.live_ids(), new_ids.into_iter().collect());
    }

    #[tokio::test]
    async fn test_failed_reschedule_drops_stale_reminders() {
        let h = harness(FakeNotifier::granted());
        let mut med = insert(&h, Some(&daily(&[(8, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();

        med.frequency = Some(daily(&[(9, 0), (21, 0)]).to_stored_json());
        h.fake.fail_register_on(2);
        let err = h.orchestrator.reschedule(&med).await.unwrap_err();
        assert!(matches!(err, SchedulingError::RegistrationFailed { rolled_back: 1, .. }));

        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
        assert!(h.fake.live_ids().is_empty());
        assert!(h.fake.cancelled_ids().contains(&"notif-1".to_string()));
        let audit = h.orchestrator.audit(&med).unwrap();
        assert!(audit.stale.is_empty());
        assert_eq!(audit.missing.len(), 2);
    }

    #[tokio::test]
    async fn test_reschedule_to_absent_rule_clears() {
        let h = harness(FakeNotifier::granted());
        let mut med = insert(&h, Some(&daily(&[(8, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();

        med.frequency = None;
        assert_eq!(h.orchestrator.reschedule(&med).await.unwrap(), 0);
        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
        assert!(h.fake.live_ids().is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_after_permission_revoked_cancels_old() {
        let h = harness(FakeNotifier::granted());
        let mut med = insert(&h, Some(&daily(&[(8, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();

        h.fake.set_status(PermissionStatus::Denied);
        med.frequency = Some(daily(&[(10, 0)]).to_stored_json());
        let err = h.orchestrator.reschedule(&med).await.unwrap_err();
        assert!(matches!(err, SchedulingError::PermissionDenied));
        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
        assert_eq!(h.fake.registers(), 1);
    }

    #[tokio::test]
    async fn test_schedule_twice_does_not_duplicate() {
        let h = harness(FakeNotifier::granted());
        let med = insert(&h, Some(&daily(&[(8, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();
        h.orchestrator.schedule(&med).await.unwrap();

        assert_eq!(h.ledger.identifiers_for(med.id).unwrap(), vec!["notif-2"]);
        assert_eq!(h.fake.live_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_update_hook_skips_unchanged_rule() {
        let h = harness(FakeNotifier::granted());
        let old = insert(&h, Some(&daily(&[(8, 0)])));
        h.orchestrator.on_medication_created(&old).await.unwrap();

        let mut renamed = old.clone();
        renamed.name = "Renamed".into();
        // Same rule, different JSON formatting
        renamed.frequency = Some(r#"{ "type": "daily", "times": ["8:00"] }"#.into());
        assert_eq!(h.orchestrator.on_medication_updated(&old, &renamed).await.unwrap(), None);
        assert_eq!(h.fake.registers(), 1);

        let mut retimed = old.clone();
        retimed.frequency = Some(daily(&[(7, 30)]).to_stored_json());
        assert_eq!(
            h.orchestrator.on_medication_updated(&old, &retimed).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_audit_detects_drift() {
        let h = harness(FakeNotifier::granted());
        let mut med = insert(&h, Some(&daily(&[(8, 0), (20, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();
        assert!(h.orchestrator.audit(&med).unwrap().is_consistent());

        // Rule edited without rescheduling
        med.frequency = Some(daily(&[(8, 0), (22, 0)]).to_stored_json());
        let audit = h.orchestrator.audit(&med).unwrap();
        assert!(!audit.is_consistent());
        assert_eq!(
            audit.missing,
            vec![TriggerSpec::Daily {
                time: TimeOfDay::new(22, 0).unwrap()
            }]
        );
        assert_eq!(audit.stale, vec!["notif-2"]);
    }

    #[tokio::test]
    async fn test_reconcile_orphans() {
        let h = harness(FakeNotifier::granted());
        let med = insert(&h, Some(&daily(&[(8, 0)])));
        h.orchestrator.schedule(&med).await.unwrap();
        {
            let db = h.db.lock().unwrap();
            db.conn().execute_batch("PRAGMA foreign_keys = OFF").unwrap();
            db.conn()
                .execute("DELETE FROM medications WHERE id = ?", [med.id])
                .unwrap();
            db.conn().execute_batch("PRAGMA foreign_keys = ON").unwrap();
        }

        let removed = h.orchestrator.reconcile_orphans().await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(h.fake.live_ids().is_empty());
        assert!(h.ledger.entries_for(med.id).unwrap().is_empty());
    }
}
