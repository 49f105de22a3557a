use std::collections::BTreeMap;
use std::fmt;

use qstring::QString;
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

pub const GROUP_KEY: &str = "group";
pub const VERSION_KEY: &str = "version";
pub const TIMEOUT_KEY: &str = "timeout";
pub const METHODS_KEY: &str = "methods";

/// A provider endpoint url as a registry advertises it:
/// `dubbo://10.0.0.7:20880/com.example.FooService?group=g&version=1.0&methods=a,b`.
///
/// Protocol-specific parameters are kept as an opaque key/value map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointUrl {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub service_interface: String,
    pub params: BTreeMap<String, String>,
}

impl EndpointUrl {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        EndpointUrl {
            protocol: protocol.into(),
            host: host.into(),
            port,
            service_interface: String::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_interface(mut self, service_interface: impl Into<String>) -> Self {
        self.service_interface = service_interface.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn parse(raw: &str) -> Result<Self, DiscoveryError> {
        let malformed = |reason: &str| DiscoveryError::MalformedUrl {
            url: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let (protocol, rest) = raw.split_once("://").ok_or_else(|| malformed("missing scheme"))?;
        if protocol.is_empty() {
            return Err(malformed("missing scheme"));
        }
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, Some(q)),
            None => (rest, None),
        };
        let (authority, path) = match rest.split_once('/') {
            Some((a, p)) => (a, p),
            None => (rest, ""),
        };
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| malformed("missing port"))?;
        if host.is_empty() {
            return Err(malformed("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| malformed("invalid port"))?;

        let mut params = BTreeMap::new();
        if let Some(query) = query {
            for (k, v) in QString::from(query).into_pairs() {
                params.insert(k, v);
            }
        }

        Ok(EndpointUrl {
            protocol: protocol.to_owned(),
            host: host.to_owned(),
            port,
            service_interface: path.to_owned(),
            params,
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Method names advertised under the `methods` parameter.
    pub fn methods(&self) -> Vec<String> {
        match self.param(METHODS_KEY) {
            Some(m) if !m.is_empty() => m.split(',').map(str::to_owned).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.protocol, self.host, self.port, self.service_interface
        )?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            f.write_str(if i == 0 { "?" } else { "&" })?;
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// One registered provider as seen through a discovery round-trip.
/// Produced fresh per discovery call; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub service_interface: String,
    pub group: String,
    pub version: String,
    pub protocol: String,
    pub methods: Vec<String>,
    pub url: EndpointUrl,
}

impl From<EndpointUrl> for ProviderDescriptor {
    fn from(url: EndpointUrl) -> Self {
        ProviderDescriptor {
            service_interface: url.service_interface.clone(),
            group: url.param(GROUP_KEY).unwrap_or_default().to_owned(),
            version: url.param(VERSION_KEY).unwrap_or_default().to_owned(),
            protocol: url.protocol.clone(),
            methods: url.methods(),
            url,
        }
    }
}

impl ProviderDescriptor {
    /// Group/version/interface composite match; an empty group or version on
    /// the caller side matches any provider.
    pub fn matches(&self, service_interface: &str, group: &str, version: &str) -> bool {
        self.service_interface == service_interface
            && (group.is_empty() || self.group == group)
            && (version.is_empty() || self.version == version)
    }
}
