//! Worker events and their extendable lifetimes.
//!
//! A handler that starts asynchronous work hands it to
//! [`ExtendableEvent::wait_until`]; the dispatcher does not consider the event
//! finished until [`ExtendableEvent::settle`] has joined all of it.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use futures::future::{join_all, BoxFuture, FutureExt};

use crate::error::Result;
use crate::registration::Notification;
use crate::request::{Request, Response};

/// The six event types a worker reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    Sync,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Install => "Install",
            EventKind::Activate => "Activate",
            EventKind::Fetch => "Fetch",
            EventKind::Push => "Push",
            EventKind::NotificationClick => "NotificationClick",
            EventKind::Sync => "Sync",
        };
        f.write_str(name)
    }
}

/// An event whose lifetime can be extended by pending work.
pub struct ExtendableEvent {
    kind: EventKind,
    pending: Vec<BoxFuture<'static, Result<()>>>,
}

impl ExtendableEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            pending: Vec::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Keep the event alive until `work` completes. An `Err` fails the event.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.pending.push(work.boxed());
    }

    /// Number of futures the event is waiting on.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drive every pending future to completion.
    ///
    /// All futures run to completion even if one fails; the first error in
    /// registration order is returned.
    pub async fn settle(self) -> Result<()> {
        join_all(self.pending)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()
            .map(|_| ())
    }
}

impl fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("kind", &self.kind)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// A fetch event: the intercepted request plus the event lifetime.
#[derive(Debug)]
pub struct FetchEvent {
    pub request: Request,
    pub lifetime: ExtendableEvent,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            lifetime: ExtendableEvent::new(EventKind::Fetch),
        }
    }
}

/// A push message. The payload is carried but not interpreted.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

impl PushEvent {
    pub fn with_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }
}

/// A click on a displayed notification or one of its action buttons.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: Notification,
    /// Action identifier of the clicked button, `None` for the body.
    pub action: Option<String>,
}

/// A background sync firing for a registered tag.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub tag: String,
    /// Set by the platform on its final retry.
    pub last_chance: bool,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            last_chance: false,
        }
    }
}

/// Any event the dispatcher can route to a handler.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
    Sync(SyncEvent),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
            WorkerEvent::Sync(_) => EventKind::Sync,
        }
    }
}

/// What happened once an event's lifetime settled.
#[derive(Debug)]
pub struct EventOutcome {
    pub kind: EventKind,
    /// Result of the extended lifetime.
    pub settled: Result<()>,
    /// Response handed to the page, for fetch events.
    pub response: Option<Result<Response>>,
}

impl EventOutcome {
    pub fn is_ok(&self) -> bool {
        self.settled.is_ok() && !matches!(self.response, Some(Err(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_settle_runs_all_pending() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut event = ExtendableEvent::new(EventKind::Install);

        for _ in 0..3 {
            let counter = counter.clone();
            event.wait_until(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert_eq!(event.pending(), 3);
        assert!(event.settle().await.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_settle_reports_first_error_but_runs_everything() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut event = ExtendableEvent::new(EventKind::Activate);

        event.wait_until(async { Err(SwError::cache("first")) });
        event.wait_until(async { Err(SwError::cache("second")) });
        let c = counter.clone();
        event.wait_until(async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(event.settle().await, Err(SwError::cache("first")));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_settle_with_nothing_pending() {
        let event = ExtendableEvent::new(EventKind::Push);
        assert!(event.settle().await.is_ok());
    }

    #[test]
    fn test_worker_event_kind() {
        assert_eq!(WorkerEvent::Install.kind(), EventKind::Install);
        assert_eq!(
            WorkerEvent::Sync(SyncEvent::new("github")).kind(),
            EventKind::Sync
        );
    }
}
