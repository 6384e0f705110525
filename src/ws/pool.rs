#![expect(
    clippy::module_name_repetitions,
    reason = "ConnectionPool is re-exported from `ws` and reads better with the suffix"
)]

use std::sync::{Arc, Weak};

use dashmap::{DashMap, Entry};

use super::client::{Client, ClientInner};
use super::config::{Config, UrlSource};
use super::handlers::Handlers;
use super::traits::Connector;
use super::transport::TungsteniteConnector;
use crate::Result;
use crate::error::{Error, Kind};

/// Shares one [`Client`] per URL between independent consumers.
///
/// The pool only holds weak references: a pooled connection lives exactly as long as at least one
/// handle returned by [`ConnectionPool::acquire`] is alive, and is torn down with the last one.
///
/// ```rust,no_run
/// use resilient_ws::ws::{ConnectionPool, Handlers};
/// use resilient_ws::ws::config::Config;
///
/// # async fn example() -> resilient_ws::Result<()> {
/// let pool = ConnectionPool::new();
/// let config = || Config::builder().url("wss://example.com/logs").build();
///
/// let first = pool.acquire(config(), Handlers::new())?;
/// let second = pool.acquire(config(), Handlers::new())?;
/// assert_eq!(pool.ref_count("wss://example.com/logs"), 2);
/// # drop((first, second));
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    clients: DashMap<String, Weak<ClientInner>>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::with_connector(TungsteniteConnector)
    }
}

impl ConnectionPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connector<C: Connector>(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            clients: DashMap::new(),
        }
    }

    /// Return the live client for the config's URL, or create one.
    ///
    /// The URL is resolved once to compute the pool key, an unusable address is a
    /// [`Kind::Validation`] error. `config` and `handlers` are only used when a new client is
    /// created. Register listeners with [`Client::on`] to observe a shared connection.
    pub fn acquire(&self, config: Config, handlers: Handlers) -> Result<Client> {
        let key = config
            .url()
            .resolve()
            .map_err(|e| Error::with_source(Kind::Validation, e))?
            .to_string();

        match self.clients.entry(key) {
            Entry::Occupied(mut entry) => {
                if let Some(inner) = entry.get().upgrade() {
                    return Ok(Client::from_inner(inner));
                }

                let client = Client::spawn(config, handlers, Arc::clone(&self.connector))?;
                entry.insert(client.downgrade());
                Ok(client)
            }
            Entry::Vacant(entry) => {
                let client = Client::spawn(config, handlers, Arc::clone(&self.connector))?;
                entry.insert(client.downgrade());
                Ok(client)
            }
        }
    }

    /// The live client for `url`, if any.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<Client> {
        let key = Self::key(url)?;
        self.clients
            .get(&key)
            .and_then(|entry| entry.upgrade())
            .map(Client::from_inner)
    }

    /// Number of live handles sharing the connection for `url`.
    #[must_use]
    pub fn ref_count(&self, url: &str) -> usize {
        Self::key(url)
            .and_then(|key| self.clients.get(&key).map(|entry| entry.strong_count()))
            .unwrap_or(0)
    }

    /// Number of live pooled connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget connections whose handles have all been dropped. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, client| client.strong_count() > 0);
        before.saturating_sub(self.clients.len())
    }

    fn key(url: &str) -> Option<String> {
        UrlSource::from(url)
            .resolve()
            .ok()
            .map(|url| url.to_string())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}
