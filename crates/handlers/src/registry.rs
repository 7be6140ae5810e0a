use coinbridge_config::ConfigSnapshot;
use coinbridge_types::Coin;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{HandlerError, Loader, Mover};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no mover registered for coin {0}")]
    NoMover(String),

    #[error("no loader registered for coin {0}")]
    NoLoader(String),
}

/// What one factory produces for its family of coins: at most one shared
/// loader (loaders scan many coins in one pass) and one mover per coin.
pub struct HandlerSet {
    pub loader: Option<Arc<dyn Loader>>,
    pub movers: HashMap<String, Arc<dyn Mover>>,
}

impl HandlerSet {
    pub fn empty() -> Self {
        Self {
            loader: None,
            movers: HashMap::new(),
        }
    }
}

/// Constructor for one handler family, keyed by `Coin::network_type`.
///
/// Factories are registered once at startup — resolution never imports
/// code paths named by configuration.
pub trait HandlerFactory: Send + Sync {
    fn network_type(&self) -> &str;

    /// Build handler instances for `coins` (all enabled, all of this
    /// factory's network type) against an immutable settings snapshot.
    fn build(&self, coins: &[Coin], snapshot: &Arc<ConfigSnapshot>)
        -> Result<HandlerSet, HandlerError>;
}

/// Resolves which Loader/Mover instance serves each enabled coin.
///
/// `reload` must be called whenever coin configuration changes; it is
/// idempotent for an unchanged snapshot, and one factory failing to build
/// never prevents the others from resolving.
pub struct HandlerRegistry {
    factories: Mutex<Vec<Arc<dyn HandlerFactory>>>,
    loaders: RwLock<HashMap<String, Arc<dyn Loader>>>,
    movers: RwLock<HashMap<String, Arc<dyn Mover>>>,
    snapshot: RwLock<Option<Arc<ConfigSnapshot>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(Vec::new()),
            loaders: RwLock::new(HashMap::new()),
            movers: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(None),
        }
    }

    pub fn register(&self, factory: Arc<dyn HandlerFactory>) {
        debug!(network_type = factory.network_type(), "registering handler factory");
        self.factories
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(factory);
    }

    /// Rebuild all handler instances from a configuration snapshot.
    pub fn reload(&self, snapshot: Arc<ConfigSnapshot>) {
        let factories: Vec<Arc<dyn HandlerFactory>> = self
            .factories
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut loaders: HashMap<String, Arc<dyn Loader>> = HashMap::new();
        let mut movers: HashMap<String, Arc<dyn Mover>> = HashMap::new();

        for factory in factories {
            let network_type = factory.network_type().to_string();
            let coins: Vec<Coin> = snapshot
                .enabled_coins()
                .into_iter()
                .filter(|c| c.network_type == network_type)
                .collect();
            if coins.is_empty() {
                continue;
            }

            match factory.build(&coins, &snapshot) {
                Ok(set) => {
                    for coin in &coins {
                        if let Some(loader) = &set.loader {
                            loaders.insert(coin.symbol.clone(), Arc::clone(loader));
                        }
                    }
                    for (symbol, mover) in set.movers {
                        movers.insert(symbol.to_uppercase(), mover);
                    }
                }
                Err(e) => {
                    // One broken handler family must not take down the rest
                    error!(
                        %network_type,
                        error = %e,
                        "handler factory failed to build, skipping its coins"
                    );
                }
            }
        }

        info!(
            version = snapshot.version(),
            loaders = loaders.len(),
            movers = movers.len(),
            "handler registry reloaded"
        );

        *self.loaders.write().unwrap_or_else(|e| e.into_inner()) = loaders;
        *self.movers.write().unwrap_or_else(|e| e.into_inner()) = movers;
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<Arc<ConfigSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get_loader(&self, symbol: &str) -> Result<Arc<dyn Loader>, RegistryError> {
        self.loaders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&symbol.to_uppercase())
            .cloned()
            .ok_or_else(|| RegistryError::NoLoader(symbol.to_uppercase()))
    }

    pub fn get_mover(&self, symbol: &str) -> Result<Arc<dyn Mover>, RegistryError> {
        self.movers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&symbol.to_uppercase())
            .cloned()
            .ok_or_else(|| RegistryError::NoMover(symbol.to_uppercase()))
    }

    pub fn has_loader(&self, symbol: &str) -> bool {
        self.loaders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&symbol.to_uppercase())
    }

    pub fn has_mover(&self, symbol: &str) -> bool {
        self.movers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&symbol.to_uppercase())
    }

    /// Symbols that currently have a loader, sorted for stable scheduling.
    pub fn loader_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .loaders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        symbols.sort();
        symbols
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockChain, MockHandlerFactory};

    fn snapshot() -> Arc<ConfigSnapshot> {
        Arc::new(
            ConfigSnapshot::builder()
                .coin(Coin::new("LTC", "mock"))
                .coin(Coin::new("LTCP", "mock").with_our_account("bridge").issuable())
                .coin(Coin::new("DOGE", "unhandled"))
                .build(),
        )
    }

    #[tokio::test]
    async fn reload_resolves_enabled_coins() {
        let registry = HandlerRegistry::new();
        let chain = MockChain::new();
        registry.register(Arc::new(MockHandlerFactory::new(Arc::clone(&chain))));
        registry.reload(snapshot());

        assert!(registry.has_loader("ltc"));
        assert!(registry.has_mover("LTCP"));
        assert!(!registry.has_mover("DOGE"));
        assert!(registry.get_mover("DOGE").is_err());
        assert_eq!(registry.loader_symbols(), vec!["LTC", "LTCP"]);
    }

    #[tokio::test]
    async fn reload_is_idempotent() {
        let registry = HandlerRegistry::new();
        let chain = MockChain::new();
        registry.register(Arc::new(MockHandlerFactory::new(chain)));

        let snap = snapshot();
        registry.reload(Arc::clone(&snap));
        let first = registry.loader_symbols();

        registry.reload(snap);
        assert_eq!(registry.loader_symbols(), first);
        assert!(registry.has_mover("LTC"));
    }

    #[tokio::test]
    async fn failing_factory_does_not_break_others() {
        struct BrokenFactory;
        impl HandlerFactory for BrokenFactory {
            fn network_type(&self) -> &str {
                "unhandled"
            }
            fn build(
                &self,
                _coins: &[Coin],
                _snapshot: &Arc<ConfigSnapshot>,
            ) -> Result<HandlerSet, HandlerError> {
                Err(HandlerError::DeadApi("cannot connect".into()))
            }
        }

        let registry = HandlerRegistry::new();
        registry.register(Arc::new(BrokenFactory));
        registry.register(Arc::new(MockHandlerFactory::new(MockChain::new())));
        registry.reload(snapshot());

        // The broken family is skipped, the healthy one resolves
        assert!(!registry.has_mover("DOGE"));
        assert!(registry.has_mover("LTC"));
    }
}
