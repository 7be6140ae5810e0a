use coinbridge_config::{CoinSettings, ConfigSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::HandlerError;

/// Shared per-symbol client cache, embedded by value in both the Loader and
/// Mover of a handler family so the pair reuse one connection per coin.
///
/// Clients are built lazily from the configuration snapshot the provider
/// was constructed with; a registry reload constructs a fresh provider
/// against the new snapshot rather than mutating this one.
pub struct ClientPool<C> {
    snapshot: Arc<ConfigSnapshot>,
    connect: Box<dyn Fn(&str, &CoinSettings) -> Result<C, HandlerError> + Send + Sync>,
    clients: RwLock<HashMap<String, Arc<C>>>,
}

impl<C> ClientPool<C> {
    pub fn new(
        snapshot: Arc<ConfigSnapshot>,
        connect: impl Fn(&str, &CoinSettings) -> Result<C, HandlerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            snapshot,
            connect: Box::new(connect),
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    /// Get or build the client for a coin symbol.
    pub fn get(&self, symbol: &str) -> Result<Arc<C>, HandlerError> {
        let symbol = symbol.to_uppercase();
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&symbol)
        {
            return Ok(Arc::clone(client));
        }

        let settings = self.snapshot.settings_for(&symbol);
        let client = Arc::new((self.connect)(&symbol, &settings)?);

        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        // A racing builder may have inserted first; keep the existing one so
        // every caller sees the same instance
        let entry = clients.entry(symbol).or_insert_with(|| Arc::clone(&client));
        Ok(Arc::clone(entry))
    }
}
