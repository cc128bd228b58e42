//! Resolves message types to provider instances.
//!
//! The registry owns two maps: provider name → instance, and message type →
//! provider name. Lookups take a read lock; registration and remapping take
//! the write lock. Build one at startup and share it by `Arc`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use switchboard_core::config::RoutingConfig;
use switchboard_core::MessageType;

use crate::simulated::SimulatedProvider;
use crate::traits::Provider;

/// Errors from remapping a message type.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("provider not registered: {0}")]
    UnknownProvider(String),

    #[error("provider '{provider}' does not support {message_type}")]
    Unsupported {
        provider: String,
        message_type: MessageType,
    },
}

#[derive(Default)]
struct RegistryInner {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    routes: BTreeMap<MessageType, String>,
}

#[derive(Default)]
pub struct ProviderRegistry {
    inner: RwLock<RegistryInner>,
}

impl ProviderRegistry {
    /// Create an empty registry with no providers or routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the simulated carriers.
    ///
    /// sms and mms route to `default_sms`, email routes to `default_email`.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let phone = [MessageType::Sms, MessageType::Mms];
        let email = [MessageType::Email];

        registry.register("default_sms", Arc::new(SimulatedProvider::new("default_sms", &phone)));
        registry.register(
            "default_email",
            Arc::new(SimulatedProvider::new("default_email", &email)),
        );
        registry.register("twilio", Arc::new(SimulatedProvider::new("twilio", &phone)));
        registry.register("sendgrid", Arc::new(SimulatedProvider::new("sendgrid", &email)));
        registry.register("xillio", Arc::new(SimulatedProvider::new("xillio", &email)));

        {
            let mut inner = registry.write();
            inner.routes.insert(MessageType::Sms, "default_sms".to_string());
            inner.routes.insert(MessageType::Mms, "default_sms".to_string());
            inner.routes.insert(MessageType::Email, "default_email".to_string());
        }

        info!(
            providers = registry.read().providers.len(),
            "Provider registry initialized with defaults"
        );
        registry
    }

    /// Register (or replace) a provider under `name`.
    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        let name = name.into();
        debug!(provider = %name, "Registering provider");
        self.write().providers.insert(name, provider);
    }

    /// Look up a provider by registry name.
    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.read().providers.get(name).cloned()
    }

    /// The provider currently routed for `message_type`.
    pub fn provider_for(&self, message_type: MessageType) -> Option<Arc<dyn Provider>> {
        let inner = self.read();
        let name = inner.routes.get(&message_type)?;
        inner.providers.get(name).cloned()
    }

    /// Route `message_type` to the provider registered as `name`.
    ///
    /// Rejected when the provider is unknown or does not claim support for
    /// the type; the existing route is left untouched in both cases.
    pub fn set_provider_for(&self, message_type: MessageType, name: &str) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let provider = inner
            .providers
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_string()))?;

        if !provider.supports(message_type) {
            return Err(RegistryError::Unsupported {
                provider: name.to_string(),
                message_type,
            });
        }

        inner.routes.insert(message_type, name.to_string());
        info!(%message_type, provider = %name, "Provider route updated");
        Ok(())
    }

    /// Apply configured remaps. Invalid entries are logged and skipped.
    ///
    /// Returns how many remaps were applied.
    pub fn apply_routing(&self, routing: &RoutingConfig) -> usize {
        let mut applied = 0;
        for (message_type, name) in routing.overrides() {
            match self.set_provider_for(message_type, name) {
                Ok(()) => applied += 1,
                Err(e) => warn!(%message_type, provider = name, error = %e, "Ignoring provider override"),
            }
        }
        applied
    }

    /// Registered provider names, sorted.
    pub fn available_providers(&self) -> Vec<String> {
        self.read().providers.keys().cloned().collect()
    }

    /// Current message type → provider name routes.
    pub fn mappings(&self) -> BTreeMap<MessageType, String> {
        self.read().routes.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
