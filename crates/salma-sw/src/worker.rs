//! Event dispatch for the offline worker.

use futures::FutureExt;
use salma_common::WorkerConfig;
use salma_net::Fetcher;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::{Client, ClientMatchOptions, ClientType, Clients};
use crate::event::ExtendableEvent;
use crate::lifecycle::{ActivationReport, CacheLifecycle, InstallReport};
use crate::messaging::{ClientMessage, MessageEvent, VersionReply};
use crate::notification::{
    Notification, NotificationClickEvent, Notifier, PushEvent, DAILY_REMINDER_TAG,
};
use crate::registration::ServiceWorkerRegistration;
use crate::router::{CacheRouter, FetchEvent, FetchOutcome};
use crate::ServiceWorkerError;

/// Sync tag whose hook only logs.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Kinds of events the worker reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
    Push,
    NotificationClick,
    Sync,
    PeriodicSync,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch => "fetch",
            Self::Message => "message",
            Self::Push => "push",
            Self::NotificationClick => "notificationclick",
            Self::Sync => "sync",
            Self::PeriodicSync => "periodicsync",
        }
    }
}

/// An event delivered by the platform.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
    Message(MessageEvent),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
    Sync { tag: String },
    PeriodicSync { tag: String },
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Install => EventKind::Install,
            Self::Activate => EventKind::Activate,
            Self::Fetch(_) => EventKind::Fetch,
            Self::Message(_) => EventKind::Message,
            Self::Push(_) => EventKind::Push,
            Self::NotificationClick(_) => EventKind::NotificationClick,
            Self::Sync { .. } => EventKind::Sync,
            Self::PeriodicSync { .. } => EventKind::PeriodicSync,
        }
    }
}

/// What a notification click led to.
#[derive(Debug, Clone)]
pub enum ClickOutcome {
    /// An open window on the app root was focused.
    Focused(Client),
    /// A new window was opened on the app root.
    Opened(Client),
    /// The notification was only closed.
    Closed,
}

/// Result of handling one event.
#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    Fetch(FetchOutcome),
    Click(ClickOutcome),
    /// Handled with no result for the caller.
    Done,
    /// The handler failed; the failure was logged.
    Aborted,
}

/// A handled event together with its background work.
#[derive(Debug)]
pub struct Dispatched {
    pub outcome: EventOutcome,
    /// Await [`ExtendableEvent::settled`] to let background work finish.
    pub lifetime: ExtendableEvent,
}

/// The offline worker: one handler per [`EventKind`].
pub struct OfflineWorker {
    config: Arc<WorkerConfig>,
    root_url: Url,
    lifecycle: CacheLifecycle,
    router: CacheRouter,
    clients: Arc<RwLock<Clients>>,
    notifier: Arc<dyn Notifier>,
}

impl OfflineWorker {
    /// Every event kind with a handler.
    pub const HANDLED_EVENTS: [EventKind; 8] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Message,
        EventKind::Push,
        EventKind::NotificationClick,
        EventKind::Sync,
        EventKind::PeriodicSync,
    ];

    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let root_url = config.root_url()?;
        let config = Arc::new(config);
        let clients = Arc::new(RwLock::new(Clients::new()));

        let router = CacheRouter::new(
            Arc::clone(&storage),
            Arc::clone(&fetcher),
            config.store_name(),
            root_url.clone(),
            config.app_name.clone(),
        );
        let lifecycle = CacheLifecycle::new(
            Arc::clone(&config),
            storage,
            fetcher,
            Arc::clone(&clients),
        );

        Ok(Self {
            config,
            root_url,
            lifecycle,
            router,
            clients,
            notifier,
        })
    }

    /// Version identifier, equal to the active store's name.
    pub fn version(&self) -> String {
        self.lifecycle.store_name()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Open application instances.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    pub fn registration(&self) -> Arc<RwLock<ServiceWorkerRegistration>> {
        self.lifecycle.registration()
    }

    pub fn lifecycle(&self) -> &CacheLifecycle {
        &self.lifecycle
    }

    pub fn router(&self) -> &CacheRouter {
        &self.router
    }

    /// Handle one event.
    ///
    /// A panicking handler is logged and contained. A fetch whose handler
    /// panicked passes through so the request still resolves.
    pub async fn dispatch(&self, event: WorkerEvent) -> Dispatched {
        let kind = event.kind();
        let lifetime = ExtendableEvent::new(kind.as_str());

        let outcome = match AssertUnwindSafe(self.handle(event, &lifetime))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    event = kind.as_str(),
                    error = %panic_message(panic.as_ref()),
                    "Uncaught error in event handler"
                );
                match kind {
                    EventKind::Fetch => EventOutcome::Fetch(FetchOutcome::PassThrough),
                    _ => EventOutcome::Aborted,
                }
            }
        };

        Dispatched { outcome, lifetime }
    }

    async fn handle(&self, event: WorkerEvent, lifetime: &ExtendableEvent) -> EventOutcome {
        match event {
            WorkerEvent::Install => EventOutcome::Installed(self.lifecycle.install().await),
            WorkerEvent::Activate => EventOutcome::Activated(self.lifecycle.activate().await),
            WorkerEvent::Fetch(fetch) => {
                EventOutcome::Fetch(self.router.handle_fetch(&fetch, lifetime).await)
            }
            WorkerEvent::Message(message) => {
                self.on_message(message).await;
                EventOutcome::Done
            }
            WorkerEvent::Push(push) => {
                self.on_push(push, lifetime);
                EventOutcome::Done
            }
            WorkerEvent::NotificationClick(click) => match self.on_click(click).await {
                Ok(outcome) => EventOutcome::Click(outcome),
                Err(e) => {
                    warn!(error = %e, "Notification click failed");
                    EventOutcome::Aborted
                }
            },
            WorkerEvent::Sync { tag } => {
                if tag == BACKGROUND_SYNC_TAG {
                    info!(tag = %tag, "Background sync");
                } else {
                    debug!(tag = %tag, "Ignoring sync tag");
                }
                EventOutcome::Done
            }
            WorkerEvent::PeriodicSync { tag } => {
                if tag == DAILY_REMINDER_TAG {
                    self.show(Notification::reminder(&self.config.app_name), lifetime);
                } else {
                    debug!(tag = %tag, "Ignoring periodic sync tag");
                }
                EventOutcome::Done
            }
        }
    }

    async fn on_message(&self, message: MessageEvent) {
        let Some(parsed) = ClientMessage::parse(&message.data) else {
            debug!(data = %message.data, "Ignoring unrecognized message");
            return;
        };

        match parsed {
            ClientMessage::SkipWaiting => {
                info!("Skip waiting requested by client");
                self.lifecycle.skip_waiting().await;
            }
            ClientMessage::GetVersion => {
                let Some(reply) = message.reply else {
                    debug!("GET_VERSION without a reply port");
                    return;
                };
                let payload = VersionReply {
                    version: self.version(),
                };
                match serde_json::to_value(payload) {
                    Ok(value) => {
                        if reply.send(value).is_err() {
                            debug!("Version reply port closed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Encoding version reply failed"),
                }
            }
        }
    }

    fn on_push(&self, push: PushEvent, lifetime: &ExtendableEvent) {
        let notification = Notification::push(&self.config.app_name, push.data.as_deref());
        self.show(notification, lifetime);
    }

    fn show(&self, notification: Notification, lifetime: &ExtendableEvent) {
        let notifier = Arc::clone(&self.notifier);
        lifetime.wait_until(async move { notifier.show(notification).await });
    }

    async fn on_click(
        &self,
        click: NotificationClickEvent,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        if !click.wants_app() {
            return Ok(ClickOutcome::Closed);
        }

        let mut clients = self.clients.write().await;
        let windows = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        let existing = clients
            .match_all(&windows)
            .into_iter()
            .find(|c| c.shows(&self.root_url))
            .map(|c| c.id.clone());

        match existing {
            Some(id) => Ok(ClickOutcome::Focused(clients.focus(&id)?)),
            None => Ok(ClickOutcome::Opened(clients.open_window(self.root_url.clone()))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
