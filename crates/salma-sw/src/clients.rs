//! Open application instances (windows) known to the worker.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::ServiceWorkerError;

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Version identifier of the worker controlling this client, if any.
    pub controller: Option<String>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl Client {
    /// Create an uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: format!("client-{}", uuid_simple()),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }

    /// Whether this client shows `url`, ignoring fragments.
    pub fn shows(&self, url: &Url) -> bool {
        let mut own = self.url.clone();
        own.set_fragment(None);
        let mut other = url.clone();
        other.set_fragment(None);
        own == other
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Match all clients.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Number of clients controlled by `version`.
    pub fn controlled_by(&self, version: &str) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller.as_deref() == Some(version))
            .count()
    }

    /// Open a new focused window on `url`.
    pub fn open_window(&mut self, url: Url) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        let mut client = Client::window(url);
        client.focused = true;
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<Client, ServiceWorkerError> {
        match self.clients.get(id) {
            None => return Err(ServiceWorkerError::NotFound(format!("client {}", id))),
            Some(c) if c.client_type != ClientType::Window => {
                return Err(ServiceWorkerError::StateError(
                    "Can only focus window clients".to_string(),
                ));
            }
            Some(_) => {}
        }

        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        self.clients
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {}", id)))
    }

    /// Make `version` the controller of every client. Returns how many were claimed.
    pub fn claim(&mut self, version: &str) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.controller.as_deref() != Some(version) {
                client.controller = Some(version.to_string());
                claimed += 1;
            }
        }
        claimed
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
