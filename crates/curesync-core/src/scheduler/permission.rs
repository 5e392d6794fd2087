//! Permission gate for the host notification service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{ChannelSpec, NotificationService, PermissionStatus};

/// Outcome of negotiating notification capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    /// The user or host declined.
    Denied,
    /// The host cannot post notifications at all.
    Unsupported,
}

/// Idempotent permission negotiation.
///
/// The user is prompted at most once per gate; later calls re-read the
/// current status so a grant made in system settings is picked up.
pub struct PermissionGate {
    service: Arc<dyn NotificationService>,
    channel: ChannelSpec,
    requested: AtomicBool,
    channel_ready: AtomicBool,
}

impl PermissionGate {
    pub fn new(service: Arc<dyn NotificationService>, channel: ChannelSpec) -> Self {
        Self {
            service,
            channel,
            requested: AtomicBool::new(false),
            channel_ready: AtomicBool::new(false),
        }
    }

    /// Resolve the current capability, prompting once if undetermined.
    pub async fn resolve(&self) -> PermissionState {
        if !self.service.is_capable() {
            tracing::debug!("Notifications unsupported on this host");
            return PermissionState::Unsupported;
        }

        let mut status = self.service.permission_status().await;
        if status == PermissionStatus::Undetermined && !self.requested.swap(true, Ordering::SeqCst) {
            status = self.service.request_permission().await;
            tracing::info!(?status, "Requested notification permission");
        }

        if status != PermissionStatus::Granted {
            tracing::warn!(?status, "Notification permission not granted");
            return PermissionState::Denied;
        }

        if !self.channel_ready.load(Ordering::SeqCst) {
            match self.service.configure_channel(&self.channel).await {
                Ok(()) => self.channel_ready.store(true, Ordering::SeqCst),
                Err(e) => tracing::warn!(channel = %self.channel.id, error = %e, "Channel setup failed"),
            }
        }
        PermissionState::Granted
    }

    /// True only when reminders can be registered.
    pub async fn ensure_granted(&self) -> bool {
        self.resolve().await == PermissionState::Granted
    }
}
