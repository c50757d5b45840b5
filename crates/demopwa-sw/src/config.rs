//! Worker configuration
//!
//! Every literal the worker depends on (cache name, precache manifest,
//! notification content, focus target, sync tags) lives here so a deploy can
//! change them without touching the handlers.

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::{Result, SwError};
use crate::request::Request;

/// Current cache namespace. Bumping it drops every older cache on activation.
pub const DEFAULT_CACHE_NAME: &str = "cache-v4";

/// Origin the worker is registered for.
pub const DEFAULT_SCOPE: &str = "https://demopwa.in/";

/// Resources cached at install time.
pub const DEFAULT_PRECACHE: [&str; 5] = [
    "./",
    "./index.html?utm=homescreen",
    "/static-page.html",
    "/terminos-y-condiciones",
    "/privacy-policy-cookie-restriction-mode",
];

/// Sync tags that trigger client messaging. The second one is what the
/// browser devtools use when emulating a sync.
pub const DEFAULT_SYNC_TAGS: [&str; 2] = ["github", "test-tag-from-devtools"];

/// Message posted to clients after a successful sync.
pub const DEFAULT_SYNC_MESSAGE: &str = "online";

pub const ACTION_YES: &str = "yes";
pub const ACTION_NO: &str = "no";

const DEFAULT_ICON: &str = "./images/icons/apple-touch-icon.png";

/// Service worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache namespace kept live by this worker version
    pub cache_name: String,

    /// Scope URL; relative paths below resolve against it
    pub scope: Url,

    /// Manifest list cached on install, in order
    pub precache: Vec<String>,

    /// Notification shown on push
    pub notification: NotificationConfig,

    /// Window to focus when a notification is clicked
    pub focus_url: Url,

    /// Path opened when no window matches `focus_url`
    pub open_path: String,

    /// Recognized background sync tags
    pub sync_tags: Vec<String>,

    /// Message posted to every window client on sync
    pub sync_message: String,
}

/// Static notification descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub icon: String,
    pub badge: String,
    pub actions: Vec<NotificationAction>,
}

/// A notification action button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let scope = default_scope();
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            focus_url: scope.clone(),
            scope,
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            notification: NotificationConfig::default(),
            open_path: "/".to_string(),
            sync_tags: DEFAULT_SYNC_TAGS.iter().map(|t| t.to_string()).collect(),
            sync_message: DEFAULT_SYNC_MESSAGE.to_string(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Push notification demo".to_string(),
            body: "click to return to application".to_string(),
            tag: "demo".to_string(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_ICON.to_string(),
            actions: vec![
                NotificationAction {
                    action: ACTION_YES.to_string(),
                    title: "I ♥ this app!".to_string(),
                },
                NotificationAction {
                    action: ACTION_NO.to_string(),
                    title: "I don't like this app".to_string(),
                },
            ],
        }
    }
}

fn default_scope() -> Url {
    Url::parse(DEFAULT_SCOPE).expect("DEFAULT_SCOPE is a valid URL")
}

impl WorkerConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SwError::config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SwError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Check that every path resolves and the worker has something to do.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(SwError::config("cache_name must not be empty"));
        }
        if self.sync_tags.is_empty() {
            return Err(SwError::config("at least one sync tag is required"));
        }
        self.precache_requests()?;
        self.open_window_url()?;
        Ok(())
    }

    /// Resolve a path against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.scope
            .join(path)
            .map_err(|e| SwError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// The manifest list as GET requests, in manifest order.
    pub fn precache_requests(&self) -> Result<Vec<Request>> {
        self.precache
            .iter()
            .map(|path| self.resolve(path).map(Request::get))
            .collect()
    }

    /// Where a new window is opened from a notification click.
    pub fn open_window_url(&self) -> Result<Url> {
        self.resolve(&self.open_path)
    }

    /// Whether a background sync tag is handled.
    pub fn is_sync_tag(&self, tag: &str) -> bool {
        self.sync_tags.iter().any(|t| t == tag)
    }
}
