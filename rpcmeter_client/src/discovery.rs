use std::collections::HashMap;

use tracing::{debug, warn};

use rpcmeter_protocol::{DiscoveryError, EndpointUrl, ProviderDescriptor, RegistryProtocol};

/// The registry lookup primitive: raw endpoint urls currently registered
/// under a group. Implemented externally per registry protocol (zookeeper,
/// multicast, redis, simple).
pub trait RegistryLookup: Send {
    fn fetch(
        &self,
        protocol: RegistryProtocol,
        address: &str,
        group: &str,
    ) -> Result<Vec<EndpointUrl>, DiscoveryError>;
}

/// Lookup over a fixed url list. Used for tests and for registries whose
/// content is known up front.
pub struct StaticLookup {
    urls: Vec<EndpointUrl>,
}

impl StaticLookup {
    pub fn new(urls: Vec<EndpointUrl>) -> Self {
        StaticLookup { urls }
    }
}

impl RegistryLookup for StaticLookup {
    fn fetch(
        &self,
        _protocol: RegistryProtocol,
        _address: &str,
        _group: &str,
    ) -> Result<Vec<EndpointUrl>, DiscoveryError> {
        Ok(self.urls.clone())
    }
}

/// Parses a comma-separated `host:port` list into direct endpoints.
pub fn direct_endpoints(protocol: &str, address: &str) -> Result<Vec<EndpointUrl>, DiscoveryError> {
    if address.trim().is_empty() {
        return Err(DiscoveryError::BlankAddress);
    }
    let mut endpoints = Vec::new();
    for peer in address.split(',') {
        let peer = peer.trim();
        if peer.is_empty() {
            continue;
        }
        let malformed = |reason: &str| DiscoveryError::MalformedUrl {
            url: peer.to_owned(),
            reason: reason.to_owned(),
        };
        let (host, port) = peer.rsplit_once(':').ok_or_else(|| malformed("missing port"))?;
        if host.is_empty() {
            return Err(malformed("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| malformed("invalid port"))?;
        endpoints.push(EndpointUrl::new(protocol, host, port));
    }
    if endpoints.is_empty() {
        return Err(DiscoveryError::BlankAddress);
    }
    Ok(endpoints)
}

/// Discovers providers through a [`RegistryLookup`] and caches the result per
/// (address, group) for the lifetime of the session.
///
/// A failed round-trip reports the error and leaves every cached list
/// untouched; the cache is only refreshed on success and invalidated
/// explicitly when an address is edited.
pub struct RegistryClient {
    lookup: Box<dyn RegistryLookup>,
    cache: HashMap<(String, String), Vec<ProviderDescriptor>>,
}

impl RegistryClient {
    pub fn new(lookup: Box<dyn RegistryLookup>) -> Self {
        RegistryClient {
            lookup,
            cache: HashMap::new(),
        }
    }

    /// Enumerates the full registry namespace visible under `group`.
    ///
    /// This round-trip can block for seconds on a large registry; it is never
    /// triggered implicitly, callers decide when to pay for it.
    pub fn list_providers(
        &mut self,
        protocol: RegistryProtocol,
        address: &str,
        group: &str,
    ) -> Result<Vec<ProviderDescriptor>, DiscoveryError> {
        if address.trim().is_empty() {
            return Err(DiscoveryError::BlankAddress);
        }
        let urls = if protocol == RegistryProtocol::None {
            direct_endpoints("", address)?
        } else {
            self.lookup.fetch(protocol, address, group).map_err(|err| {
                warn!(address, %err, "provider discovery failed");
                err
            })?
        };
        let providers: Vec<ProviderDescriptor> =
            urls.into_iter().map(ProviderDescriptor::from).collect();
        debug!(address, group, count = providers.len(), "provider list refreshed");
        self.cache
            .insert((address.to_owned(), group.to_owned()), providers.clone());
        Ok(providers)
    }

    pub fn cached(&self, address: &str, group: &str) -> Option<&[ProviderDescriptor]> {
        self.cache
            .get(&(address.to_owned(), group.to_owned()))
            .map(Vec::as_slice)
    }

    /// Drops every cached list for `address`, for when the address field is
    /// edited.
    pub fn invalidate(&mut self, address: &str) {
        self.cache.retain(|(a, _), _| a != address);
    }

    /// Methods advertised by the first provider matching the
    /// group/version/interface composite key. "No methods found" is a normal
    /// empty result, not a failure.
    pub fn resolve_methods(
        providers: &[ProviderDescriptor],
        service_interface: &str,
        group: &str,
        version: &str,
    ) -> Vec<String> {
        providers
            .iter()
            .find(|p| p.matches(service_interface, group, version))
            .map(|p| p.methods.clone())
            .unwrap_or_default()
    }
}
