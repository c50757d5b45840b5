//! Structured diagnostics emitted by the worker.
//!
//! Failures in the worker never reach the page; the diagnostic trail is the
//! only record of them. Handlers record a [`Diagnostic`] through an injected
//! [`DiagnosticSink`], which by default forwards to `tracing`.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn, Level};

use crate::event::EventKind;

/// Something the worker wants on the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// An event was dispatched to the worker.
    EventReceived(EventKind),
    /// Every manifest resource was stored.
    PrecacheComplete { cache: String, count: usize },
    /// The manifest batch failed; nothing was stored.
    PrecacheFailed {
        cache: String,
        error: String,
        /// Whether reinstalling could succeed (network or server error).
        retryable: bool,
    },
    /// A network response could not be written back to the cache.
    CachePutFailed { url: String, message: String },
    /// Caches from older versions were deleted.
    OldCachesCleared { deleted: Vec<String> },
    /// The "yes" notification action was clicked.
    NotificationLiked,
    /// The "no" notification action was clicked.
    NotificationDisliked,
    /// A clicked notification could not be dismissed.
    NotificationCloseFailed { message: String },
    /// Enumerating, messaging, focusing or opening clients failed.
    ClientsFailed { context: &'static str, message: String },
    /// An event's extended lifetime settled with an error.
    EventFailed {
        kind: EventKind,
        category: &'static str,
        error: String,
    },
}

impl Diagnostic {
    pub fn level(&self) -> Level {
        match self {
            Diagnostic::EventReceived(_)
            | Diagnostic::PrecacheComplete { .. }
            | Diagnostic::OldCachesCleared { .. }
            | Diagnostic::NotificationLiked => Level::INFO,
            Diagnostic::CachePutFailed { .. }
            | Diagnostic::NotificationDisliked
            | Diagnostic::NotificationCloseFailed { .. } => Level::WARN,
            Diagnostic::PrecacheFailed { .. }
            | Diagnostic::ClientsFailed { .. }
            | Diagnostic::EventFailed { .. } => Level::ERROR,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::EventReceived(kind) => write!(f, "Event: {}", kind),
            Diagnostic::PrecacheComplete { .. } => f.write_str("All files are cached"),
            Diagnostic::PrecacheFailed { error, .. } => write!(f, "Failed to cache {}", error),
            Diagnostic::CachePutFailed { url, message } => write!(f, "{}: {}", url, message),
            Diagnostic::OldCachesCleared { .. } => f.write_str("Old caches are cleared!"),
            Diagnostic::NotificationLiked => f.write_str("I ♥ this app!"),
            Diagnostic::NotificationDisliked => f.write_str("I don't like this app"),
            Diagnostic::NotificationCloseFailed { message } => {
                write!(f, "Failed to close notification: {}", message)
            }
            Diagnostic::ClientsFailed { context, message } => write!(f, "{}: {}", context, message),
            Diagnostic::EventFailed { kind, error, .. } => {
                write!(f, "{} event failed: {}", kind, error)
            }
        }
    }
}

/// Destination for worker diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: &Diagnostic);
}

/// Forwards diagnostics to `tracing` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::EventReceived(kind) => info!(event = %kind, "{}", diagnostic),
            Diagnostic::PrecacheComplete { cache, count } => {
                info!(cache = %cache, count, "{}", diagnostic)
            }
            Diagnostic::PrecacheFailed {
                cache,
                error,
                retryable,
            } => {
                error!(cache = %cache, error = %error, retryable, "Failed to cache")
            }
            Diagnostic::CachePutFailed { url, message } => {
                warn!(url = %url, error = %message, "{}", diagnostic)
            }
            Diagnostic::OldCachesCleared { deleted } => {
                info!(deleted = ?deleted, "{}", diagnostic)
            }
            Diagnostic::NotificationLiked => info!("{}", diagnostic),
            Diagnostic::NotificationDisliked => warn!("{}", diagnostic),
            Diagnostic::NotificationCloseFailed { message } => {
                warn!(error = %message, "Failed to close notification")
            }
            Diagnostic::ClientsFailed { context, message } => {
                error!(context, error = %message, "Clients operation failed")
            }
            Diagnostic::EventFailed {
                kind,
                category,
                error,
            } => {
                error!(event = %kind, category, error = %error, "Event failed")
            }
        }
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Records at or above `level` (ERROR is the most severe).
    pub fn at_least(&self, level: Level) -> Vec<Diagnostic> {
        self.records()
            .into_iter()
            .filter(|d| d.level() <= level)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, diagnostic: &Diagnostic) {
        if let Ok(mut records) = self.records.lock() {
            records.push(diagnostic.clone());
        }
    }
}

/// Sends each diagnostic to several sinks.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl DiagnosticSink for FanoutSink {
    fn record(&self, diagnostic: &Diagnostic) {
        for sink in &self.sinks {
            sink.record(diagnostic);
        }
    }
}
