//! Clients API
//!
//! Pages (and workers) the service worker can see, message, focus, or open.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, RwLock};
use url::Url;

use crate::error::{Result, SwError};

// ==================== Client ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    /// Only meaningful in a [`ClientQuery`].
    All,
}

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Auxiliary,
    TopLevel,
    Nested,
    None,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// A client (page or worker) in the worker's origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub frame_type: FrameType,
    pub visibility_state: VisibilityState,
    pub focused: bool,
    /// Whether this worker controls the client.
    pub controlled: bool,
}

impl Client {
    /// A visible top-level window controlled by the worker.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            frame_type: FrameType::TopLevel,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controlled: true,
        }
    }

    /// Mark the client as not (yet) controlled by this worker.
    pub fn uncontrolled(mut self) -> Self {
        self.controlled = false;
        self
    }

    fn matches(&self, query: &ClientQuery) -> bool {
        if !query.include_uncontrolled && !self.controlled {
            return false;
        }
        match query.client_type {
            ClientType::All => true,
            t => self.client_type == t,
        }
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Options for `clients.matchAll()`. The default finds controlled windows.
#[derive(Debug, Clone, Default)]
pub struct ClientQuery {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// A message posted from the worker to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub client_id: String,
    pub data: String,
}

// ==================== Clients ====================

/// The `clients` global.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Clients matching the query, in the order the platform reports them.
    async fn match_all(&self, query: &ClientQuery) -> Result<Vec<Client>>;

    /// Get a client by ID.
    async fn get(&self, id: &str) -> Result<Option<Client>>;

    /// Post a message to a client.
    async fn post_message(&self, id: &str, message: &str) -> Result<()>;

    /// Focus a window client.
    async fn focus(&self, id: &str) -> Result<Client>;

    /// Open a new window. `None` when the new window is outside the origin.
    async fn open_window(&self, url: &Url) -> Result<Option<Client>>;

    /// Take control of every client in scope.
    async fn claim(&self) -> Result<()>;
}

/// In-memory client list. Posted messages are delivered on a channel.
#[derive(Debug)]
pub struct MemoryClients {
    clients: RwLock<Vec<Client>>,
    origin: Option<Url>,
    outbox: mpsc::UnboundedSender<ClientMessage>,
    focus_calls: AtomicUsize,
    open_calls: AtomicUsize,
}

impl MemoryClients {
    /// Create an empty client list and the receiver for posted messages.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (
            Self {
                clients: RwLock::new(Vec::new()),
                origin: None,
                outbox,
                focus_calls: AtomicUsize::new(0),
                open_calls: AtomicUsize::new(0),
            },
            inbox,
        )
    }

    /// Restrict `open_window` results to one origin.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.push(client);
    }

    /// All clients regardless of type or control.
    pub async fn all(&self) -> Vec<Client> {
        self.clients.read().await.clone()
    }

    /// Number of successful `focus` calls.
    pub fn focus_calls(&self) -> usize {
        self.focus_calls.load(Ordering::SeqCst)
    }

    /// Number of `open_window` calls.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    fn same_origin(&self, url: &Url) -> bool {
        match self.origin {
            Some(ref origin) => origin.origin() == url.origin(),
            None => true,
        }
    }
}

#[async_trait]
impl Clients for MemoryClients {
    async fn match_all(&self, query: &ClientQuery) -> Result<Vec<Client>> {
        Ok(self
            .clients
            .read()
            .await
            .iter()
            .filter(|c| c.matches(query))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Client>> {
        Ok(self.clients.read().await.iter().find(|c| c.id == id).cloned())
    }

    async fn post_message(&self, id: &str, message: &str) -> Result<()> {
        if self.get(id).await?.is_none() {
            return Err(SwError::NotFound(format!("client {}", id)));
        }
        self.outbox
            .send(ClientMessage {
                client_id: id.to_string(),
                data: message.to_string(),
            })
            .map_err(|_| SwError::client(format!("message port for {} is closed", id)))
    }

    async fn focus(&self, id: &str) -> Result<Client> {
        let mut clients = self.clients.write().await;
        let index = clients
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| SwError::NotFound(format!("client {}", id)))?;

        if clients[index].client_type != ClientType::Window {
            return Err(SwError::client("Can only focus window clients"));
        }

        for client in clients.iter_mut() {
            client.focused = false;
        }
        let client = &mut clients[index];
        client.focused = true;
        client.visibility_state = VisibilityState::Visible;
        self.focus_calls.fetch_add(1, Ordering::SeqCst);
        Ok(client.clone())
    }

    async fn open_window(&self, url: &Url) -> Result<Option<Client>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let mut client = Client::window(url.clone());
        client.focused = true;

        let mut clients = self.clients.write().await;
        for other in clients.iter_mut() {
            other.focused = false;
        }
        clients.push(client.clone());

        if self.same_origin(url) {
            Ok(Some(client))
        } else {
            Ok(None)
        }
    }

    async fn claim(&self) -> Result<()> {
        let mut clients = self.clients.write().await;
        for client in clients.iter_mut() {
            client.controlled = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_match_all_defaults_to_controlled_windows() {
        let (clients, _rx) = MemoryClients::new();
        clients.add(Client::window(url("https://demopwa.in/"))).await;
        clients
            .add(Client::window(url("https://demopwa.in/about")).uncontrolled())
            .await;

        let found = clients.match_all(&ClientQuery::default()).await.unwrap();
        assert_eq!(found.len(), 1);

        let everything = clients
            .match_all(&ClientQuery {
                include_uncontrolled: true,
                client_type: ClientType::All,
            })
            .await
            .unwrap();
        assert_eq!(everything.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_controls_every_client() {
        let (clients, _rx) = MemoryClients::new();
        clients
            .add(Client::window(url("https://demopwa.in/")).uncontrolled())
            .await;

        clients.claim().await.unwrap();

        let found = clients.match_all(&ClientQuery::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].controlled);
    }

    #[tokio::test]
    async fn test_post_message_delivers() {
        let (clients, mut rx) = MemoryClients::new();
        let client = Client::window(url("https://demopwa.in/"));
        let id = client.id.clone();
        clients.add(client).await;

        clients.post_message(&id, "online").await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.client_id, id);
        assert_eq!(message.data, "online");
    }

    #[tokio::test]
    async fn test_post_message_unknown_client() {
        let (clients, _rx) = MemoryClients::new();
        let err = clients.post_message("client-missing", "online").await.unwrap_err();
        assert!(matches!(err, SwError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_focus_window() {
        let (clients, _rx) = MemoryClients::new();
        let a = Client::window(url("https://demopwa.in/a"));
        let b = Client::window(url("https://demopwa.in/b"));
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        clients.add(a).await;
        clients.add(b).await;

        clients.focus(&a_id).await.unwrap();
        let focused = clients.focus(&b_id).await.unwrap();

        assert!(focused.focused);
        assert!(!clients.get(&a_id).await.unwrap().unwrap().focused);
        assert_eq!(clients.focus_calls(), 2);
    }

    #[tokio::test]
    async fn test_focus_rejects_workers() {
        let (clients, _rx) = MemoryClients::new();
        let mut worker = Client::window(url("https://demopwa.in/worker.js"));
        worker.client_type = ClientType::Worker;
        let id = worker.id.clone();
        clients.add(worker).await;

        assert!(clients.focus(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_open_window() {
        let (clients, _rx) = MemoryClients::new();
        let client = clients
            .open_window(&url("https://demopwa.in/"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(client.client_type, ClientType::Window);
        assert!(client.focused);
        assert!(clients.get(&client.id).await.unwrap().is_some());
        assert_eq!(clients.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_open_window_cross_origin_returns_none() {
        let (clients, _rx) = MemoryClients::new();
        let clients = clients.with_origin(url("https://demopwa.in/"));

        let opened = clients.open_window(&url("https://example.com/")).await.unwrap();
        assert!(opened.is_none());
        assert_eq!(clients.all().await.len(), 1);
    }
}
