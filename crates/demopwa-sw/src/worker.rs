//! The service worker: one handler per lifecycle event.
//!
//! Each handler either returns right away after registering its work on the
//! event's lifetime, or (for fetch) produces the page's response and leaves
//! cache population running under the lifetime.

use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{add_all, CacheStorage, MatchOptions};
use crate::clients::{ClientQuery, ClientType, Clients};
use crate::config::{WorkerConfig, ACTION_NO, ACTION_YES};
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::error::{Result, SwError};
use crate::event::{
    EventKind, EventOutcome, ExtendableEvent, FetchEvent, NotificationClickEvent, PushEvent,
    SyncEvent, WorkerEvent,
};
use crate::net::Fetcher;
use crate::registration::{Notification, NotificationDescriptor, Registration};
use crate::request::{Request, Response};

/// The offline cache and lifecycle handler.
///
/// Cheap to clone; every platform service is shared.
#[derive(Clone)]
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
    registration: Arc<dyn Registration>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl ServiceWorker {
    /// Start building a worker for `config`.
    pub fn builder(config: WorkerConfig) -> ServiceWorkerBuilder {
        ServiceWorkerBuilder::new(config)
    }

    /// Configuration the worker was built with.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Route an event to its handler and wait for its lifetime to settle.
    pub async fn dispatch(&self, event: WorkerEvent) -> EventOutcome {
        let kind = event.kind();
        let mut lifetime = ExtendableEvent::new(kind);

        let response = match event {
            WorkerEvent::Install => {
                self.on_install(&mut lifetime);
                None
            }
            WorkerEvent::Activate => {
                self.on_activate(&mut lifetime);
                None
            }
            WorkerEvent::Fetch(request) => {
                let mut fetch = FetchEvent::new(request);
                let response = self.on_fetch(&mut fetch).await;
                lifetime = fetch.lifetime;
                Some(response)
            }
            WorkerEvent::Push(push) => {
                self.on_push(&mut lifetime, &push);
                None
            }
            WorkerEvent::NotificationClick(click) => {
                self.on_notification_click(&mut lifetime, click);
                None
            }
            WorkerEvent::Sync(sync) => {
                self.on_sync(&mut lifetime, &sync);
                None
            }
        };

        let settled = lifetime.settle().await;

        if let Err(ref e) = settled {
            self.record(Diagnostic::EventFailed {
                kind,
                category: e.category(),
                error: e.to_string(),
            });
        }
        if let Some(Err(ref e)) = response {
            self.record(Diagnostic::EventFailed {
                kind,
                category: e.category(),
                error: e.to_string(),
            });
        }

        EventOutcome {
            kind,
            settled,
            response,
        }
    }

    // ==================== Install ====================

    /// Populate the cache with the manifest list, then skip waiting.
    pub fn on_install(&self, event: &mut ExtendableEvent) {
        self.record(Diagnostic::EventReceived(EventKind::Install));

        let worker = self.clone();
        event.wait_until(async move { worker.precache().await });
    }

    async fn precache(&self) -> Result<()> {
        let name = self.config.cache_name.as_str();
        // Failing to open the cache fails the install itself.
        let cache = self.caches.open(name).await?;
        let requests = self.config.precache_requests()?;
        let count = requests.len();

        match add_all(cache.as_ref(), self.fetcher.as_ref(), requests).await {
            Ok(()) => {
                self.record(Diagnostic::PrecacheComplete {
                    cache: name.to_string(),
                    count,
                });
                self.registration.skip_waiting().await
            }
            Err(e) => {
                self.record(Diagnostic::PrecacheFailed {
                    cache: name.to_string(),
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                });
                Ok(())
            }
        }
    }

    // ==================== Fetch ====================

    /// Answer from the cache, falling back to the network.
    ///
    /// A network response is returned unmodified; a copy is written to the
    /// cache under the event's lifetime.
    pub async fn on_fetch(&self, event: &mut FetchEvent) -> Result<Response> {
        self.record(Diagnostic::EventReceived(EventKind::Fetch));

        let request = &event.request;
        let options = MatchOptions::in_cache(self.config.cache_name.clone());
        if let Some(cached) = self.caches.match_request(request, &options).await? {
            debug!(url = %request.url, "Serving from cache");
            return Ok(cached);
        }

        debug!(url = %request.url, "Cache miss, fetching from network");
        let response = self.fetcher.fetch(request).await?;

        let worker = self.clone();
        let request = request.clone();
        let copy = response.clone();
        event.lifetime.wait_until(async move {
            worker.store(request, copy).await;
            Ok(())
        });

        Ok(response)
    }

    async fn store(&self, request: Request, response: Response) {
        let result = async {
            let cache = self.caches.open(&self.config.cache_name).await?;
            cache.put(&request, response).await
        }
        .await;

        if let Err(e) = result {
            self.record(Diagnostic::CachePutFailed {
                url: request.url.to_string(),
                message: e.to_string(),
            });
        }
    }

    // ==================== Activate ====================

    /// Delete caches from older versions and take control of open pages.
    pub fn on_activate(&self, event: &mut ExtendableEvent) {
        self.record(Diagnostic::EventReceived(EventKind::Activate));

        let worker = self.clone();
        event.wait_until(async move {
            worker.clear_old_caches().await?;
            worker.clients.claim().await
        });
    }

    async fn clear_old_caches(&self) -> Result<()> {
        let current = self.config.cache_name.as_str();
        let stale: Vec<String> = self
            .caches
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let results = join_all(stale.iter().map(|name| self.caches.delete(name))).await;
        for result in results {
            result?;
        }

        self.record(Diagnostic::OldCachesCleared { deleted: stale });
        Ok(())
    }

    // ==================== Push ====================

    /// Show the configured notification. The push payload is not read.
    pub fn on_push(&self, event: &mut ExtendableEvent, push: &PushEvent) {
        self.record(Diagnostic::EventReceived(EventKind::Push));
        if let Some(ref data) = push.data {
            debug!(bytes = data.len(), "Ignoring push payload");
        }

        let descriptor = NotificationDescriptor::from(&self.config.notification);
        let registration = self.registration.clone();
        event.wait_until(async move {
            registration.show_notification(descriptor).await.map(|_| ())
        });
    }

    // ==================== Notification Click ====================

    /// Close the notification and bring the app to the front.
    pub fn on_notification_click(&self, event: &mut ExtendableEvent, click: NotificationClickEvent) {
        self.record(Diagnostic::EventReceived(EventKind::NotificationClick));

        match click.action.as_deref() {
            Some(ACTION_YES) => self.record(Diagnostic::NotificationLiked),
            Some(ACTION_NO) => self.record(Diagnostic::NotificationDisliked),
            _ => {}
        }

        let worker = self.clone();
        event.wait_until(async move {
            worker.close(&click.notification).await;
            if let Err(e) = worker.focus_or_open().await {
                worker.record(Diagnostic::ClientsFailed {
                    context: "notificationclick",
                    message: e.to_string(),
                });
            }
            Ok(())
        });
    }

    async fn close(&self, notification: &Notification) {
        if let Err(e) = self.registration.close_notification(notification).await {
            self.record(Diagnostic::NotificationCloseFailed {
                message: e.to_string(),
            });
        }
    }

    async fn focus_or_open(&self) -> Result<()> {
        let query = ClientQuery {
            include_uncontrolled: false,
            client_type: ClientType::Window,
        };
        let windows = self.clients.match_all(&query).await?;

        if let Some(client) = windows.iter().find(|c| c.url == self.config.focus_url) {
            debug!(client = %client.id, "Focusing existing window");
            self.clients.focus(&client.id).await?;
            return Ok(());
        }

        let url = self.config.open_window_url()?;
        debug!(url = %url, "Opening new window");
        self.clients.open_window(&url).await?;
        Ok(())
    }

    // ==================== Sync ====================

    /// Tell every open window it is back online, for recognized tags only.
    pub fn on_sync(&self, event: &mut ExtendableEvent, sync: &SyncEvent) {
        self.record(Diagnostic::EventReceived(EventKind::Sync));

        if !self.config.is_sync_tag(&sync.tag) {
            debug!(tag = %sync.tag, "Ignoring unrecognized sync tag");
            return;
        }

        let worker = self.clone();
        let last_chance = sync.last_chance;
        event.wait_until(async move {
            worker.notify_clients(last_chance).await;
            Ok(())
        });
    }

    /// Post the sync message to every window client. Returns how many got it.
    async fn notify_clients(&self, last_chance: bool) -> usize {
        let clients = match self.clients.match_all(&ClientQuery::default()).await {
            Ok(clients) => clients,
            Err(e) => {
                self.record(Diagnostic::ClientsFailed {
                    context: "sync",
                    message: e.to_string(),
                });
                return 0;
            }
        };

        let message = self.config.sync_message.as_str();
        let results = join_all(
            clients
                .iter()
                .map(|client| self.clients.post_message(&client.id, message)),
        )
        .await;

        let mut delivered = 0;
        for (client, result) in clients.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => self.record(Diagnostic::ClientsFailed {
                    context: "sync",
                    message: format!("{}: {}", client.id, e),
                }),
            }
        }
        debug!(
            delivered,
            total = clients.len(),
            last_chance,
            "Sync message posted"
        );
        delivered
    }

    fn record(&self, diagnostic: Diagnostic) {
        self.diagnostics.record(&diagnostic);
    }
}

/// Builder for [`ServiceWorker`].
pub struct ServiceWorkerBuilder {
    config: WorkerConfig,
    caches: Option<Arc<dyn CacheStorage>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    clients: Option<Arc<dyn Clients>>,
    registration: Option<Arc<dyn Registration>>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl ServiceWorkerBuilder {
    /// Create a new builder. Diagnostics go to `tracing` unless replaced.
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            caches: None,
            fetcher: None,
            clients: None,
            registration: None,
            diagnostics: Arc::new(TracingSink),
        }
    }

    /// Set the cache storage.
    pub fn caches(mut self, caches: Arc<dyn CacheStorage>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Set the network fetcher.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Set the clients API.
    pub fn clients(mut self, clients: Arc<dyn Clients>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Set the registration.
    pub fn registration(mut self, registration: Arc<dyn Registration>) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Set the diagnostic sink.
    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Validate the config and build the worker.
    pub fn build(self) -> Result<ServiceWorker> {
        self.config.validate()?;
        Ok(ServiceWorker {
            config: Arc::new(self.config),
            caches: self.caches.ok_or_else(|| missing("cache storage"))?,
            fetcher: self.fetcher.ok_or_else(|| missing("fetcher"))?,
            clients: self.clients.ok_or_else(|| missing("clients"))?,
            registration: self.registration.ok_or_else(|| missing("registration"))?,
            diagnostics: self.diagnostics,
        })
    }
}

fn missing(what: &str) -> SwError {
    SwError::config(format!("service worker built without {}", what))
}
