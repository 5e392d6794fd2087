//! Scripted notification service for unit tests.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ChannelSpec, DeviceError, NotificationContent, NotificationService, PermissionStatus,
    TriggerSpec,
};

pub(crate) struct FakeNotifier {
    capable: bool,
    status: Mutex<PermissionStatus>,
    answer_on_request: PermissionStatus,
    fail_register_on: Mutex<Option<usize>>,
    fail_cancel: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub request_calls: AtomicUsize,
    pub channel_calls: AtomicUsize,
    pub cancelled: Mutex<Vec<String>>,
    pub live: Mutex<BTreeSet<String>>,
    pub contents: Mutex<Vec<NotificationContent>>,
}

impl FakeNotifier {
    pub fn granted() -> Self {
        Self::with_status(true, PermissionStatus::Granted, PermissionStatus::Granted)
    }

    pub fn with_status(
        capable: bool,
        status: PermissionStatus,
        answer_on_request: PermissionStatus,
    ) -> Self {
        Self {
            capable,
            status: Mutex::new(status),
            answer_on_request,
            fail_register_on: Mutex::new(None),
            fail_cancel: Mutex::new(HashSet::new()),
            next_id: AtomicUsize::new(1),
            register_calls: AtomicUsize::new(0),
            request_calls: AtomicUsize::new(0),
            channel_calls: AtomicUsize::new(0),
            cancelled: Mutex::new(Vec::new()),
            live: Mutex::new(BTreeSet::new()),
            contents: Mutex::new(Vec::new()),
        }
    }

    /// Fail the register call with this zero-based index (counted across calls).
    pub fn fail_register_on(&self, call_index: usize) {
        *self.fail_register_on.lock().unwrap() = Some(call_index);
    }

    pub fn fail_cancel_of(&self, identifier: &str) {
        self.fail_cancel.lock().unwrap().insert(identifier.to_string());
    }

    pub fn set_status(&self, status: PermissionStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn live_ids(&self) -> BTreeSet<String> {
        self.live.lock().unwrap().clone()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn registers(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationService for FakeNotifier {
    fn is_capable(&self) -> bool {
        self.capable
    }

    async fn permission_status(&self) -> PermissionStatus {
        *self.status.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionStatus {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer_on_request;
        *self.status.lock().unwrap() = answer;
        answer
    }

    async fn configure_channel(&self, _channel: &ChannelSpec) -> Result<(), DeviceError> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn register(
        &self,
        _trigger: &TriggerSpec,
        content: &NotificationContent,
    ) -> Result<String, DeviceError> {
        let call = self.register_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_register_on.lock().unwrap() == Some(call) {
            return Err(DeviceError::Rejected("scripted failure".into()));
        }
        let id = format!("notif-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.lock().unwrap().insert(id.clone());
        self.contents.lock().unwrap().push(content.clone());
        Ok(id)
    }

    async fn cancel(&self, identifier: &str) -> Result<(), DeviceError> {
        self.cancelled.lock().unwrap().push(identifier.to_string());
        if self.fail_cancel.lock().unwrap().contains(identifier) {
            return Err(DeviceError::Unavailable);
        }
        self.live.lock().unwrap().remove(identifier);
        Ok(())
    }
}
