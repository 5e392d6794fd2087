//! Common test utilities for integration tests
//!
//! A recording notification device and a service wired to a real database.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use curesync_core::recurrence::{RecurrenceRule, TimeOfDay, Weekday};
use curesync_core::scheduler::{
    ChannelSpec, DeviceError, NotificationContent, NotificationService, PermissionStatus,
};
use curesync_core::{Database, MedicationService, Orchestrator, ReminderConfig, SqliteLedger, TriggerSpec};

/// An alarm the device currently holds.
#[derive(Debug, Clone)]
pub struct Alarm {
    pub trigger: TriggerSpec,
    pub content: NotificationContent,
}

/// In-memory device that records every live alarm.
pub struct RecordingDevice {
    capable: bool,
    status: Mutex<PermissionStatus>,
    grant_on_request: bool,
    fail_after: Mutex<Option<usize>>,
    next_id: AtomicUsize,
    pub alarms: Mutex<BTreeMap<String, Alarm>>,
    pub prompts: AtomicUsize,
}

impl RecordingDevice {
    pub fn new(status: PermissionStatus) -> Self {
        Self::build(true, status, true)
    }

    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted)
    }

    /// Undetermined status; the prompt answers with `grant`.
    pub fn asking(grant: bool) -> Self {
        Self::build(true, PermissionStatus::Undetermined, grant)
    }

    pub fn simulator() -> Self {
        Self::build(false, PermissionStatus::Granted, true)
    }

    fn build(capable: bool, status: PermissionStatus, grant_on_request: bool) -> Self {
        Self {
            capable,
            status: Mutex::new(status),
            grant_on_request,
            fail_after: Mutex::new(None),
            next_id: AtomicUsize::new(1),
            alarms: Mutex::new(BTreeMap::new()),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn set_status(&self, status: PermissionStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Let `successes` registrations through, then reject the next one.
    pub fn fail_register_after(&self, successes: usize) {
        *self.fail_after.lock().unwrap() = Some(successes);
    }

    pub fn alarm_count(&self) -> usize {
        self.alarms.lock().unwrap().len()
    }

    pub fn alarms_for(&self, medication_id: i64) -> Vec<Alarm> {
        self.alarms
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.content.medication_id == medication_id)
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.alarms.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl NotificationService for RecordingDevice {
    fn is_capable(&self) -> bool {
        self.capable
    }

    async fn permission_status(&self) -> PermissionStatus {
        *self.status.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionStatus {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let answer = if self.grant_on_request {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        self.set_status(answer);
        answer
    }

    async fn configure_channel(&self, _channel: &ChannelSpec) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn register(
        &self,
        trigger: &TriggerSpec,
        content: &NotificationContent,
    ) -> Result<String, DeviceError> {
        {
            let mut fail_after = self.fail_after.lock().unwrap();
            match *fail_after {
                Some(0) => {
                    *fail_after = None;
                    return Err(DeviceError::Rejected("quota exceeded".into()));
                }
                Some(n) => *fail_after = Some(n - 1),
                None => {}
            }
        }
        let id = format!("alarm-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.alarms.lock().unwrap().insert(
            id.clone(),
            Alarm {
                trigger: trigger.clone(),
                content: content.clone(),
            },
        );
        Ok(id)
    }

    async fn cancel(&self, identifier: &str) -> Result<(), DeviceError> {
        self.alarms.lock().unwrap().remove(identifier);
        Ok(())
    }
}

/// A medication service over `db` talking to `device`.
pub fn service_with(db: Database, device: Arc<RecordingDevice>) -> MedicationService {
    let db = Arc::new(Mutex::new(db));
    let ledger = Arc::new(SqliteLedger::new(db.clone()));
    let orchestrator = Orchestrator::new(device, ledger, ReminderConfig::default());
    MedicationService::new(db, orchestrator)
}

pub fn in_memory(device: Arc<RecordingDevice>) -> MedicationService {
    service_with(Database::open_in_memory().unwrap(), device)
}

pub fn on_disk(path: &Path, device: Arc<RecordingDevice>) -> MedicationService {
    service_with(Database::open(path).unwrap(), device)
}

pub fn time(h: u8, m: u8) -> TimeOfDay {
    TimeOfDay::new(h, m).unwrap()
}

pub fn daily(times: &[(u8, u8)]) -> RecurrenceRule {
    RecurrenceRule::Daily {
        times: times.iter().map(|&(h, m)| time(h, m)).collect(),
    }
}

pub fn weekly(times: &[(u8, u8)], days: &[u8]) -> RecurrenceRule {
    RecurrenceRule::Weekly {
        times: times.iter().map(|&(h, m)| time(h, m)).collect(),
        days_of_week: days.iter().map(|&d| Weekday::new(d).unwrap()).collect(),
    }
}
