//! # DemoPWA Service Worker
//!
//! Offline caching, push notifications and background sync for the DemoPWA
//! progressive web app.
//!
//! ## Features
//!
//! - **Install**: precache the manifest list as one atomic batch, then skip waiting
//! - **Fetch**: cache-first, network fallback, write-back of network responses
//! - **Activate**: drop caches from older versions, claim open pages
//! - **Push**: show a fixed notification
//! - **Notification click**: focus the app window or open a new one
//! - **Sync**: tell open pages they are back online
//!
//! ## Architecture
//!
//! ```text
//! WorkerEvent ──► ServiceWorker::dispatch
//!                     │
//!                     ├── on_install / on_activate / on_fetch / on_push / ...
//!                     │       └── ExtendableEvent::wait_until(work)
//!                     └── ExtendableEvent::settle() ──► EventOutcome
//!
//! Platform (injected)
//!     ├── CacheStorage ── Cache ── Request → Response
//!     ├── Fetcher        (HttpFetcher, StaticFetcher)
//!     ├── Clients        (MemoryClients)
//!     ├── Registration   (MemoryRegistration)
//!     └── DiagnosticSink (TracingSink, MemorySink)
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod net;
pub mod registration;
pub mod request;
pub mod worker;

pub use cache::{add_all, Cache, CacheStorage, MatchOptions, MemoryCache, MemoryCacheStorage};
pub use clients::{Client, ClientMessage, ClientQuery, ClientType, Clients, MemoryClients};
pub use config::{NotificationAction, NotificationConfig, WorkerConfig};
pub use diagnostics::{Diagnostic, DiagnosticSink, FanoutSink, MemorySink, TracingSink};
pub use error::{Result, SwError};
pub use event::{
    EventKind, EventOutcome, ExtendableEvent, FetchEvent, NotificationClickEvent, PushEvent,
    SyncEvent, WorkerEvent,
};
pub use net::{Fetcher, FetcherConfig, HttpFetcher, StaticFetcher};
pub use registration::{
    MemoryRegistration, Notification, NotificationDescriptor, NotificationPermission, Registration,
};
pub use request::{CacheKey, Request, RequestMode, Response};
pub use worker::{ServiceWorker, ServiceWorkerBuilder};
