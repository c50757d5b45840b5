//! The worker's registration: lifecycle control and notifications.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::config::{NotificationAction, NotificationConfig};
use crate::error::{Result, SwError};

/// What to display: title plus options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    pub icon: String,
    pub badge: String,
    pub actions: Vec<NotificationAction>,
}

impl From<&NotificationConfig> for NotificationDescriptor {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            title: config.title.clone(),
            body: config.body.clone(),
            tag: config.tag.clone(),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            actions: config.actions.clone(),
        }
    }
}

/// A notification that has been displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub descriptor: NotificationDescriptor,
}

impl Notification {
    pub fn new(descriptor: NotificationDescriptor) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            descriptor,
        }
    }

    pub fn tag(&self) -> &str {
        &self.descriptor.tag
    }
}

/// Notification permission granted by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationPermission {
    #[default]
    Granted,
    Denied,
}

/// The worker's registration (`self.registration` plus `skipWaiting`).
#[async_trait]
pub trait Registration: Send + Sync {
    /// Activate this worker without waiting for old clients to close.
    async fn skip_waiting(&self) -> Result<()>;

    /// Display a notification.
    async fn show_notification(&self, descriptor: NotificationDescriptor) -> Result<Notification>;

    /// Dismiss a displayed notification.
    async fn close_notification(&self, notification: &Notification) -> Result<()>;
}

/// Registration that records what the worker asked for.
#[derive(Debug, Default)]
pub struct MemoryRegistration {
    permission: NotificationPermission,
    shown: RwLock<Vec<Notification>>,
    displayed: RwLock<Vec<Notification>>,
    skip_waiting_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MemoryRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(mut self, permission: NotificationPermission) -> Self {
        self.permission = permission;
        self
    }

    /// Every notification ever shown, oldest first.
    pub async fn shown(&self) -> Vec<Notification> {
        self.shown.read().await.clone()
    }

    /// Notifications currently on screen.
    pub async fn displayed(&self) -> Vec<Notification> {
        self.displayed.read().await.clone()
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registration for MemoryRegistration {
    async fn skip_waiting(&self) -> Result<()> {
        self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn show_notification(&self, descriptor: NotificationDescriptor) -> Result<Notification> {
        if self.permission != NotificationPermission::Granted {
            return Err(SwError::notification(
                "No notification permission has been granted for this origin",
            ));
        }

        let notification = Notification::new(descriptor);
        self.shown.write().await.push(notification.clone());

        let mut displayed = self.displayed.write().await;
        if !notification.tag().is_empty() {
            displayed.retain(|n| n.tag() != notification.tag());
        }
        displayed.push(notification.clone());
        Ok(notification)
    }

    async fn close_notification(&self, notification: &Notification) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.displayed
            .write()
            .await
            .retain(|n| n.id != notification.id);
        Ok(())
    }
}
