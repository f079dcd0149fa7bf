//! Versioned cache store lifecycle: install, activate, skip waiting.

use futures::future::join_all;
use salma_common::WorkerConfig;
use salma_net::{CredentialsMode, Destination, Fetcher, Request, RequestMode};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::clients::Clients;
use crate::registration::ServiceWorkerRegistration;
use crate::ServiceWorkerError;

/// What the install step managed to precache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Store the manifest was written to.
    pub store: String,
    /// Manifest entries now in the store.
    pub cached: Vec<String>,
    /// Manifest entries that could not be cached, with the reason.
    pub failed: Vec<(String, String)>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What the activate step removed and claimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// The store that stays active.
    pub active_store: String,
    /// Stale stores deleted.
    pub deleted: Vec<String>,
    /// Stale stores that could not be deleted, with the reason.
    pub delete_failures: Vec<(String, String)>,
    /// Clients that switched to this version.
    pub claimed: usize,
}

/// Owns creation and eviction of versioned cache stores.
pub struct CacheLifecycle {
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,
    registration: Arc<RwLock<ServiceWorkerRegistration>>,
}

impl CacheLifecycle {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<RwLock<Clients>>,
    ) -> Self {
        let registration = ServiceWorkerRegistration::new(config.origin.clone());
        Self {
            config,
            storage,
            fetcher,
            clients,
            registration: Arc::new(RwLock::new(registration)),
        }
    }

    /// Name of the store this version owns; also the reported version identifier.
    pub fn store_name(&self) -> String {
        self.config.store_name()
    }

    /// Shared registration state.
    pub fn registration(&self) -> Arc<RwLock<ServiceWorkerRegistration>> {
        Arc::clone(&self.registration)
    }

    /// Open the versioned store and precache the manifest.
    ///
    /// Never fails: store and fetch problems are logged and reported. The new
    /// worker is marked ready to replace the active one right away.
    pub async fn install(&self) -> InstallReport {
        let store = self.store_name();
        info!(store = %store, entries = self.config.precache.len(), "Installing");
        self.registration.write().await.update(store.clone());

        let mut report = InstallReport {
            store: store.clone(),
            ..Default::default()
        };

        match self.storage.open(&store).await {
            Ok(()) => {
                debug!(store = %store, "Cache opened");
                let results = join_all(
                    self.config
                        .precache
                        .iter()
                        .map(|entry| self.precache_one(&store, entry)),
                )
                .await;

                for (entry, result) in self.config.precache.iter().zip(results) {
                    match result {
                        Ok(()) => report.cached.push(entry.clone()),
                        Err(e) => {
                            warn!(store = %store, entry = %entry, error = %e, "Precache failed");
                            report.failed.push((entry.clone(), e.to_string()));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(store = %store, error = %e, "Cache open failed; skipping precache");
                report.failed = self
                    .config
                    .precache
                    .iter()
                    .map(|entry| (entry.clone(), e.to_string()))
                    .collect();
            }
        }

        let mut registration = self.registration.write().await;
        registration.install_complete();
        registration.skip_waiting();

        info!(
            store = %store,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Install finished"
        );
        report
    }

    async fn precache_one(&self, store: &str, entry: &str) -> Result<(), ServiceWorkerError> {
        let url = self.config.resolve(entry)?;
        let mut request = Request::get(url.clone()).destination(Destination::guess(&url));
        request = if request.is_same_origin(&self.config.origin) {
            request.mode(RequestMode::SameOrigin)
        } else {
            request
                .mode(RequestMode::Cors)
                .credentials(CredentialsMode::Omit)
        };

        let response = self.fetcher.fetch(&request).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::NetworkError(format!(
                "unexpected status {}",
                response.status
            )));
        }

        let cached = CacheEntry::from_response(&request, response).await?;
        self.storage
            .put(store, RequestKey::for_request(&request), cached)
            .await
    }

    /// Evict every store except the current one and claim all open clients.
    ///
    /// Eviction and claiming run concurrently and fail independently.
    pub async fn activate(&self) -> ActivationReport {
        let current = self.store_name();
        {
            let mut registration = self.registration.write().await;
            registration.begin_activation();
        }
        info!(store = %current, "Activating");

        let evict = async {
            let names = match self.storage.keys().await {
                Ok(names) => names,
                Err(e) => {
                    warn!(error = %e, "Listing cache stores failed");
                    Vec::new()
                }
            };

            join_all(names.into_iter().filter(|name| *name != current).map(|name| async move {
                info!(store = %name, "Deleting stale cache");
                let result = self.storage.delete(&name).await;
                (name, result)
            }))
            .await
        };
        let claim = async { self.clients.write().await.claim(&current) };

        let (deletions, claimed) = tokio::join!(evict, claim);

        let mut report = ActivationReport {
            active_store: current.clone(),
            claimed,
            ..Default::default()
        };
        for (name, result) in deletions {
            match result {
                Ok(_) => report.deleted.push(name),
                Err(e) => {
                    warn!(store = %name, error = %e, "Deleting stale cache failed");
                    report.delete_failures.push((name, e.to_string()));
                }
            }
        }

        self.registration.write().await.finish_activation();
        info!(
            store = %current,
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "Activation finished"
        );
        report
    }

    /// Force the waiting worker to take over. Runs activation when one is waiting.
    pub async fn skip_waiting(&self) -> Option<ActivationReport> {
        let ready = {
            let mut registration = self.registration.write().await;
            registration.skip_waiting();
            let controlled = match registration.get_active() {
                Some(active) => self.clients.read().await.controlled_by(&active.version),
                None => 0,
            };
            registration.ready_to_activate(controlled)
        };

        if ready {
            Some(self.activate().await)
        } else {
            debug!("Skip waiting requested with no waiting worker");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::registration::ServiceWorkerState;
    use async_trait::async_trait;
    use http::StatusCode;
    use salma_net::{NetError, Response, ResponseType};
    use std::sync::Mutex;
    use url::Url;

    /// Answers every URL except those listed as offline.
    struct StubNetwork {
        offline: Vec<&'static str>,
        seen: Mutex<Vec<Request>>,
    }

    impl StubNetwork {
        fn new(offline: Vec<&'static str>) -> Self {
            Self {
                offline,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Fetcher for StubNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
            self.seen.lock().unwrap().push(request.clone());
            if self.offline.iter().any(|u| request.url.as_str().starts_with(u)) {
                return Err(NetError::Offline);
            }
            if request.url.path() == "/gone.js" {
                return Ok(Response::empty(StatusCode::NOT_FOUND));
            }
            Ok(Response::synthesized(StatusCode::OK, "text/plain", request.url.to_string())
                .with_type(ResponseType::Basic))
        }
    }

    /// Memory storage whose operations can be made to fail.
    #[derive(Default)]
    struct FaultyStorage {
        inner: MemoryCacheStorage,
        fail_open: bool,
        fail_keys: bool,
        fail_delete: Option<&'static str>,
    }

    fn storage_error(op: &str) -> ServiceWorkerError {
        ServiceWorkerError::CacheError(format!("{} refused: quota exceeded", op))
    }

    #[async_trait]
    impl CacheStorage for FaultyStorage {
        async fn open(&self, name: &str) -> Result<(), ServiceWorkerError> {
            if self.fail_open {
                return Err(storage_error("open"));
            }
            self.inner.open(name).await
        }

        async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
            self.inner.has(name).await
        }

        async fn put(
            &self,
            name: &str,
            key: RequestKey,
            entry: CacheEntry,
        ) -> Result<(), ServiceWorkerError> {
            self.inner.put(name, key, entry).await
        }

        async fn match_request(
            &self,
            name: &str,
            key: &RequestKey,
        ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
            self.inner.match_request(name, key).await
        }

        async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
            if self.fail_delete == Some(name) {
                return Err(storage_error("delete"));
            }
            self.inner.delete(name).await
        }

        async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
            if self.fail_keys {
                return Err(storage_error("keys"));
            }
            self.inner.keys().await
        }
    }

    fn config(precache: &[&str]) -> Arc<WorkerConfig> {
        Arc::new(WorkerConfig {
            origin: Url::parse("https://salma.example/").unwrap(),
            precache: precache.iter().map(|s| s.to_string()).collect(),
            ..WorkerConfig::default()
        })
    }

    fn lifecycle(
        config: Arc<WorkerConfig>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<StubNetwork>,
    ) -> CacheLifecycle {
        CacheLifecycle::new(config, storage, network, Arc::new(RwLock::new(Clients::new())))
    }

    #[tokio::test]
    async fn test_install_precaches_manifest() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(StubNetwork::new(vec![]));
        let lc = lifecycle(config(&["/", "/index.html"]), storage.clone(), network);

        let report = lc.install().await;
        assert!(report.is_complete());
        assert_eq!(report.store, "salma-organizer-v2");
        assert_eq!(report.cached, vec!["/".to_string(), "/index.html".to_string()]);
        assert_eq!(storage.entry_count("salma-organizer-v2").await, Some(2));

        let root = RequestKey::get(&Url::parse("https://salma.example/").unwrap());
        assert!(storage
            .match_request("salma-organizer-v2", &root)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_install_survives_partial_failure() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(StubNetwork::new(vec!["https://cdn.tailwindcss.com"]));
        let lc = lifecycle(
            config(&["/", "https://cdn.tailwindcss.com", "/gone.js"]),
            storage.clone(),
            network,
        );

        let report = lc.install().await;
        assert_eq!(report.cached, vec!["/".to_string()]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(storage.entry_count("salma-organizer-v2").await, Some(1));

        let registration = lc.registration();
        let registration = registration.read().await;
        assert!(registration.waiting.is_some());
        assert!(registration.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_install_cross_origin_omits_credentials() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(StubNetwork::new(vec![]));
        let lc = lifecycle(
            config(&["/manifest.json", "https://unpkg.com/react@18/umd/react.production.min.js"]),
            storage,
            network.clone(),
        );
        lc.install().await;

        let seen = network.seen.lock().unwrap();
        let local = seen.iter().find(|r| r.url.host_str() == Some("salma.example")).unwrap();
        let cdn = seen.iter().find(|r| r.url.host_str() == Some("unpkg.com")).unwrap();
        assert_eq!(local.mode, RequestMode::SameOrigin);
        assert_eq!(cdn.mode, RequestMode::Cors);
        assert_eq!(cdn.credentials, CredentialsMode::Omit);
        assert_eq!(cdn.destination, Destination::Script);
    }

    #[tokio::test]
    async fn test_activate_deletes_stale_stores() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("salma-organizer-v1").await.unwrap();
        let network = Arc::new(StubNetwork::new(vec![]));
        let lc = lifecycle(config(&["/"]), storage.clone(), network);

        lc.install().await;
        let report = lc.activate().await;

        assert_eq!(report.deleted, vec!["salma-organizer-v1".to_string()]);
        assert_eq!(report.active_store, "salma-organizer-v2");
        assert!(!storage.has("salma-organizer-v1").await.unwrap());
        assert!(storage.has("salma-organizer-v2").await.unwrap());

        let registration = lc.registration();
        let registration = registration.read().await;
        assert_eq!(
            registration.get_active().unwrap().state,
            ServiceWorkerState::Activated
        );
    }

    #[tokio::test]
    async fn test_activate_claims_clients() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let clients = Arc::new(RwLock::new(Clients::new()));
        clients
            .write()
            .await
            .open_window(Url::parse("https://salma.example/").unwrap());
        let lc = CacheLifecycle::new(
            config(&[]),
            storage,
            Arc::new(StubNetwork::new(vec![])),
            clients.clone(),
        );

        let report = lc.activate().await;
        assert_eq!(report.claimed, 1);
        assert_eq!(clients.read().await.controlled_by("salma-organizer-v2"), 1);
    }

    #[tokio::test]
    async fn test_skip_waiting_without_waiting_worker() {
        let lc = lifecycle(
            config(&[]),
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(StubNetwork::new(vec![])),
        );
        assert!(lc.skip_waiting().await.is_none());
    }

    #[tokio::test]
    async fn test_skip_waiting_activates_waiting_worker() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("salma-organizer-v1").await.unwrap();
        let lc = lifecycle(config(&[]), storage.clone(), Arc::new(StubNetwork::new(vec![])));
        lc.install().await;

        let report = lc.skip_waiting().await.unwrap();
        assert_eq!(report.deleted, vec!["salma-organizer-v1".to_string()]);
        assert!(lc.registration().read().await.waiting.is_none());
    }

    #[tokio::test]
    async fn test_install_reports_every_entry_when_open_fails() {
        let storage = Arc::new(FaultyStorage {
            fail_open: true,
            ..Default::default()
        });
        let network = Arc::new(StubNetwork::new(vec![]));
        let lc = lifecycle(config(&["/", "/index.html"]), storage.clone(), network.clone());

        let report = lc.install().await;
        assert!(report.cached.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].0, "/");
        assert!(report.failed.iter().all(|(_, reason)| reason.contains("open refused")));
        assert!(network.seen.lock().unwrap().is_empty());
        assert!(!storage.inner.has("salma-organizer-v2").await.unwrap());

        let registration = lc.registration();
        let registration = registration.read().await;
        assert_eq!(
            registration.waiting.as_ref().unwrap().state,
            ServiceWorkerState::Installed
        );
        assert!(registration.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_activate_claims_clients_when_listing_fails() {
        let storage = Arc::new(FaultyStorage {
            fail_keys: true,
            ..Default::default()
        });
        storage.inner.open("salma-organizer-v1").await.unwrap();
        let clients = Arc::new(RwLock::new(Clients::new()));
        clients
            .write()
            .await
            .open_window(Url::parse("https://salma.example/").unwrap());
        let lc = CacheLifecycle::new(
            config(&[]),
            storage.clone(),
            Arc::new(StubNetwork::new(vec![])),
            clients.clone(),
        );
        lc.install().await;

        let report = lc.activate().await;
        assert!(report.deleted.is_empty());
        assert!(report.delete_failures.is_empty());
        assert_eq!(report.claimed, 1);
        assert!(storage.inner.has("salma-organizer-v1").await.unwrap());
        assert!(lc.registration().read().await.get_active().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_activate_reports_failed_deletion() {
        let storage = Arc::new(FaultyStorage {
            fail_delete: Some("salma-organizer-v0"),
            ..Default::default()
        });
        storage.inner.open("salma-organizer-v0").await.unwrap();
        storage.inner.open("salma-organizer-v1").await.unwrap();
        let lc = lifecycle(config(&["/"]), storage.clone(), Arc::new(StubNetwork::new(vec![])));
        lc.install().await;

        let report = lc.activate().await;
        assert_eq!(report.deleted, vec!["salma-organizer-v1".to_string()]);
        assert_eq!(report.delete_failures.len(), 1);
        assert_eq!(report.delete_failures[0].0, "salma-organizer-v0");
        assert!(report.delete_failures[0].1.contains("delete refused"));
        assert_eq!(
            storage.inner.keys().await.unwrap(),
            vec!["salma-organizer-v0".to_string(), "salma-organizer-v2".to_string()]
        );
    }
}
