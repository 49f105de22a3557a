use std::sync::Arc;

use rpcmeter_protocol::{
    ConfigError, ConfigModel, DiscoveryError, DispatchError, ProviderDescriptor, RegistryProtocol,
};

use crate::discovery::{RegistryClient, RegistryLookup, StaticLookup};
use crate::dispatch::{CancelToken, Dispatcher, InvocationOutcome};
use crate::transport::TransportFactory;

/// The caller-facing surface a CLI or test driver binds against. Owns the
/// discovery cache and the per-endpoint connection pools; dropping the
/// session discards both.
pub struct Session {
    registry: RegistryClient,
    dispatcher: Dispatcher,
}

impl Session {
    pub fn new(lookup: Box<dyn RegistryLookup>) -> Self {
        Session {
            registry: RegistryClient::new(lookup),
            dispatcher: Dispatcher::new(),
        }
    }

    /// A session for direct connections only (registry protocol `none`).
    pub fn direct() -> Self {
        Session::new(Box::new(StaticLookup::new(Vec::new())))
    }

    pub fn register_transport(&mut self, factory: Arc<dyn TransportFactory>) {
        self.dispatcher.register_transport(factory);
    }

    pub fn validate_config(&self, cfg: &ConfigModel) -> Result<(), ConfigError> {
        cfg.validate()
    }

    /// Explicit discovery round-trip; see [`RegistryClient::list_providers`]
    /// for the blocking caveat.
    pub fn discover_providers(
        &mut self,
        protocol: RegistryProtocol,
        address: &str,
        group: &str,
    ) -> Result<Vec<ProviderDescriptor>, DiscoveryError> {
        self.registry.list_providers(protocol, address, group)
    }

    pub fn cached_providers(&self, address: &str, group: &str) -> Option<&[ProviderDescriptor]> {
        self.registry.cached(address, group)
    }

    pub fn resolve_methods(
        &self,
        providers: &[ProviderDescriptor],
        service_interface: &str,
        group: &str,
        version: &str,
    ) -> Vec<String> {
        RegistryClient::resolve_methods(providers, service_interface, group, version)
    }

    /// Drops cached discovery results when the address field is edited.
    pub fn invalidate_address(&mut self, address: &str) {
        self.registry.invalidate(address);
    }

    pub fn dispatch(&mut self, cfg: &ConfigModel) -> Result<InvocationOutcome, DispatchError> {
        self.dispatcher.dispatch(&mut self.registry, cfg)
    }

    pub fn dispatch_cancellable(
        &mut self,
        cfg: &ConfigModel,
        cancel: &CancelToken,
    ) -> Result<InvocationOutcome, DispatchError> {
        self.dispatcher.dispatch_cancellable(&mut self.registry, cfg, cancel)
    }
}
