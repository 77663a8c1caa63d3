use std::collections::BTreeMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::models::error::AmuxError;
use crate::poller::dupfd::DupFdPoller;
use crate::poller::epoller::EpollPoller;
use crate::poller::thread::ThreadPoller;
use crate::traits::poller::Poller;

/// Constructor of a readiness strategy.
pub type PollerFactory = fn() -> Result<Box<dyn Poller>, AmuxError>;

/// Name-keyed table of readiness strategies.
///
/// Built-in strategies are present from construction; more can be added
/// at runtime. Lookups by unknown name fail with `UnknownPoller`.
pub struct PollerRegistry {
    factories: RwLock<BTreeMap<String, PollerFactory>>,
}

impl PollerRegistry {
    /// Registry holding the built-in strategies.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(DupFdPoller::NAME, || Ok(Box::new(DupFdPoller::new()?)));
        registry.register(EpollPoller::NAME, || Ok(Box::new(EpollPoller::new()?)));
        registry.register(ThreadPoller::NAME, || Ok(Box::new(ThreadPoller::new()?)));
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(BTreeMap::new()),
        }
    }

    /// Process-wide registry used by `TransportSession::open`.
    pub fn global() -> &'static PollerRegistry {
        static GLOBAL: OnceLock<PollerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(PollerRegistry::new)
    }

    /// Add or replace a strategy.
    pub fn register(&self, name: &str, factory: PollerFactory) {
        if self.factories.write().insert(name.to_string(), factory).is_some() {
            log::warn!("poller {} re-registered", name);
        }
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Poller>, AmuxError> {
        let factory = self
            .factories
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| AmuxError::UnknownPoller(name.to_string()))?;
        let poller = factory()?;
        log::debug!("created {} poller", name);
        Ok(poller)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

impl Default for PollerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = PollerRegistry::new();
        assert_eq!(registry.names(), vec!["dupfd", "epoller", "thread"]);

        for name in registry.names() {
            let poller = registry.create(&name).unwrap();
            assert_eq!(poller.name(), name);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let registry = PollerRegistry::new();
        assert!(matches!(
            registry.create("kqueue"),
            Err(AmuxError::UnknownPoller(name)) if name == "kqueue"
        ));
    }

    #[test]
    fn custom_strategy() {
        let registry = PollerRegistry::empty();
        assert!(registry.create("dupfd").is_err());
        registry.register("custom", || Ok(Box::new(DupFdPoller::new()?)));
        assert_eq!(registry.create("custom").unwrap().descriptors_count(), 8);
    }
}
