use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::codec;
use crate::error::ConfigError;
use crate::url::{ProviderDescriptor, TIMEOUT_KEY};

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RETRIES: u32 = 0;
/// Default per-provider pool size; leaves headroom for forking's
/// retries+1 concurrent attempts against a single peer.
pub const DEFAULT_CONNECTIONS: u32 = 8;

/// Registry center protocol. `None` means direct connection: the address is
/// taken as the peer list itself, no discovery round-trip.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RegistryProtocol {
    None,
    Zookeeper,
    Multicast,
    Redis,
    Simple,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumIter, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RpcProtocol {
    Dubbo,
    Rmi,
    Hessian,
    Webservice,
    Memcached,
    Redis,
}

/// Failure-handling strategy across provider instances.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ClusterPolicy {
    /// Retry on a freshly selected provider, up to `retries` extra attempts.
    Failover,
    /// Exactly one attempt, report immediately.
    Failfast,
    /// Swallow the failure and report success with an empty result.
    Failsafe,
    /// Immediate call behaves as failfast; async recovery is not scheduled.
    Failback,
    /// retries+1 concurrent attempts, first success wins.
    Forking,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoadBalance {
    Random,
    RoundRobin,
    LeastActive,
    ConsistentHash,
}

/// `async` does not block on the remote outcome; it is best-effort and the
/// return value is never observed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvokeMode {
    Sync,
    Async,
}

/// One positional argument row: a Java type token and its string literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodArgument {
    pub param_type: String,
    pub param_value: String,
}

impl MethodArgument {
    pub fn new(param_type: impl Into<String>, param_value: impl Into<String>) -> Self {
        MethodArgument {
            param_type: param_type.into(),
            param_value: param_value.into(),
        }
    }
}

/// Everything one invocation needs: registry, protocol and consumer
/// parameters plus the target method and its arguments.
///
/// Built and edited by the embedding tool, validated, then treated as
/// immutable for the duration of a single dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigModel {
    pub registry_protocol: RegistryProtocol,
    pub registry_group: String,
    pub rpc_protocol: RpcProtocol,
    /// One `host:port` for direct connection, a comma-separated list for
    /// registry-based discovery.
    pub address: String,
    pub timeout_ms: u64,
    pub version: String,
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub cluster: ClusterPolicy,
    pub group: String,
    /// Maximum concurrently-open connections per provider.
    pub connections: u32,
    pub router_group: String,
    pub loadbalance: LoadBalance,
    pub invoke_mode: InvokeMode,
    pub interface_name: String,
    pub method_name: String,
    pub method_args: Vec<MethodArgument>,
}

impl Default for ConfigModel {
    fn default() -> Self {
        ConfigModel {
            registry_protocol: RegistryProtocol::None,
            registry_group: String::new(),
            rpc_protocol: RpcProtocol::Dubbo,
            address: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            version: String::new(),
            retries: DEFAULT_RETRIES,
            cluster: ClusterPolicy::Failover,
            group: String::new(),
            connections: DEFAULT_CONNECTIONS,
            router_group: String::new(),
            loadbalance: LoadBalance::Random,
            invoke_mode: InvokeMode::Sync,
            interface_name: String::new(),
            method_name: String::new(),
            method_args: Vec::new(),
        }
    }
}

impl ConfigModel {
    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::BlankField("address"));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::NonPositive("timeout"));
        }
        if self.connections == 0 {
            return Err(ConfigError::NonPositive("connections"));
        }
        if self.interface_name.trim().is_empty() {
            return Err(ConfigError::BlankField("interface"));
        }
        if self.method_name.trim().is_empty() {
            return Err(ConfigError::BlankField("method"));
        }
        for arg in &self.method_args {
            if !codec::is_known_type(&arg.param_type) {
                return Err(ConfigError::InvalidArgumentType(arg.param_type.clone()));
            }
        }
        Ok(())
    }

    /// `group/interface:version` composite key identifying the target service.
    pub fn interface_key(&self) -> String {
        format!("{}/{}:{}", self.group, self.interface_name, self.version)
    }

    /// Copies the provider-advertised parameters into the config: the
    /// caller-driven discover → select → populate step.
    pub fn apply_provider(&mut self, provider: &ProviderDescriptor) {
        self.interface_name = provider.service_interface.clone();
        self.group = provider.group.clone();
        self.version = provider.version.clone();
        if let Ok(protocol) = provider.protocol.parse::<RpcProtocol>() {
            self.rpc_protocol = protocol;
        }
        if let Some(timeout) = provider.url.param(TIMEOUT_KEY) {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.timeout_ms = ms;
            }
        }
    }

    /// Flattens the model to ordered (key, value) string pairs so any
    /// presentation layer (CLI flags, config file, form) can bind against it.
    /// Argument rows appear as `arg.N.type` / `arg.N.value`.
    pub fn to_flat_fields(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = vec![
            ("registry.protocol", self.registry_protocol.to_string()),
            ("registry.group", self.registry_group.clone()),
            ("protocol", self.rpc_protocol.to_string()),
            ("address", self.address.clone()),
            ("timeout", self.timeout_ms.to_string()),
            ("version", self.version.clone()),
            ("retries", self.retries.to_string()),
            ("cluster", self.cluster.to_string()),
            ("group", self.group.clone()),
            ("connections", self.connections.to_string()),
            ("router.group", self.router_group.clone()),
            ("loadbalance", self.loadbalance.to_string()),
            ("async", self.invoke_mode.to_string()),
            ("interface", self.interface_name.clone()),
            ("method", self.method_name.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect();
        for (i, arg) in self.method_args.iter().enumerate() {
            fields.push((format!("arg.{}.type", i), arg.param_type.clone()));
            fields.push((format!("arg.{}.value", i), arg.param_value.clone()));
        }
        fields
    }

    /// Inverse of [`to_flat_fields`](Self::to_flat_fields). Missing keys keep
    /// their defaults; unknown keys are rejected.
    pub fn from_flat_fields(fields: &[(String, String)]) -> Result<Self, ConfigError> {
        let mut cfg = ConfigModel::default();
        let mut args: BTreeMap<usize, MethodArgument> = BTreeMap::new();

        for (key, value) in fields {
            match key.as_str() {
                "registry.protocol" => cfg.registry_protocol = parse_field(key, value)?,
                "registry.group" => cfg.registry_group = value.clone(),
                "protocol" => cfg.rpc_protocol = parse_field(key, value)?,
                "address" => cfg.address = value.clone(),
                "timeout" => cfg.timeout_ms = parse_field(key, value)?,
                "version" => cfg.version = value.clone(),
                "retries" => cfg.retries = parse_field(key, value)?,
                "cluster" => cfg.cluster = parse_field(key, value)?,
                "group" => cfg.group = value.clone(),
                "connections" => cfg.connections = parse_field(key, value)?,
                "router.group" => cfg.router_group = value.clone(),
                "loadbalance" => cfg.loadbalance = parse_field(key, value)?,
                "async" => cfg.invoke_mode = parse_field(key, value)?,
                "interface" => cfg.interface_name = value.clone(),
                "method" => cfg.method_name = value.clone(),
                other => {
                    let (index, part) = parse_arg_key(other)
                        .ok_or_else(|| ConfigError::UnknownField(other.to_owned()))?;
                    let entry = args
                        .entry(index)
                        .or_insert_with(|| MethodArgument::new("", ""));
                    match part {
                        ArgPart::Type => entry.param_type = value.clone(),
                        ArgPart::Value => entry.param_value = value.clone(),
                    }
                }
            }
        }

        cfg.method_args = args.into_values().collect();
        Ok(cfg)
    }
}

enum ArgPart {
    Type,
    Value,
}

fn parse_arg_key(key: &str) -> Option<(usize, ArgPart)> {
    let rest = key.strip_prefix("arg.")?;
    let (index, part) = rest.split_once('.')?;
    let index = index.parse().ok()?;
    match part {
        "type" => Some((index, ArgPart::Type)),
        "value" => Some((index, ArgPart::Value)),
        _ => None,
    }
}

fn parse_field<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.parse().map_err(|err: T::Err| ConfigError::InvalidField {
        field: field.to_owned(),
        value: value.to_owned(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::EndpointUrl;

    fn dispatchable() -> ConfigModel {
        ConfigModel {
            address: "127.0.0.1:20880".to_owned(),
            interface_name: "com.example.FooService".to_owned(),
            method_name: "bar".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ConfigModel::default();
        assert_eq!(cfg.timeout_ms, 5000);
        assert_eq!(cfg.retries, 0);
        assert_eq!(cfg.cluster, ClusterPolicy::Failover);
        assert_eq!(cfg.connections, DEFAULT_CONNECTIONS);
        assert_eq!(cfg.loadbalance, LoadBalance::Random);
        assert_eq!(cfg.invoke_mode, InvokeMode::Sync);
    }

    #[test]
    fn enum_wire_tokens() {
        assert_eq!("none".parse::<RegistryProtocol>().unwrap(), RegistryProtocol::None);
        assert_eq!("consistenthash".parse::<LoadBalance>().unwrap(), LoadBalance::ConsistentHash);
        assert_eq!("failover".parse::<ClusterPolicy>().unwrap(), ClusterPolicy::Failover);
        assert_eq!(RpcProtocol::Webservice.to_string(), "webservice");
        assert_eq!(LoadBalance::RoundRobin.to_string(), "roundrobin");
        assert!("bogus".parse::<ClusterPolicy>().is_err());
    }

    #[test]
    fn validate_accepts_a_dispatchable_config() {
        let mut cfg = dispatchable();
        cfg.method_args.push(MethodArgument::new("java.lang.String", "hello"));
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_blank_and_non_positive_fields() {
        let mut cfg = dispatchable();
        cfg.address = "  ".to_owned();
        assert_eq!(cfg.validate(), Err(ConfigError::BlankField("address")));

        let mut cfg = dispatchable();
        cfg.interface_name.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::BlankField("interface")));

        let mut cfg = dispatchable();
        cfg.method_name.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::BlankField("method")));

        let mut cfg = dispatchable();
        cfg.timeout_ms = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::NonPositive("timeout")));

        let mut cfg = dispatchable();
        cfg.connections = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::NonPositive("connections")));
    }

    #[test]
    fn validate_rejects_unknown_argument_types() {
        let mut cfg = dispatchable();
        cfg.method_args.push(MethodArgument::new("com.example.Custom", "{}"));
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidArgumentType("com.example.Custom".to_owned()))
        );
    }

    #[test]
    fn flat_fields_round_trip_including_arg_order() {
        let mut cfg = dispatchable();
        cfg.registry_protocol = RegistryProtocol::Zookeeper;
        cfg.registry_group = "staging".to_owned();
        cfg.cluster = ClusterPolicy::Forking;
        cfg.retries = 2;
        cfg.method_args = vec![
            MethodArgument::new("int", "1"),
            MethodArgument::new("java.lang.String", "two"),
            MethodArgument::new("double", "3.0"),
        ];
        let fields = cfg.to_flat_fields();
        let back = ConfigModel::from_flat_fields(&fields).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn flat_fields_reject_unknown_keys_and_bad_values() {
        let unknown = vec![("bogus".to_owned(), "x".to_owned())];
        assert_eq!(
            ConfigModel::from_flat_fields(&unknown),
            Err(ConfigError::UnknownField("bogus".to_owned()))
        );

        let bad = vec![("cluster".to_owned(), "bogus".to_owned())];
        assert!(matches!(
            ConfigModel::from_flat_fields(&bad),
            Err(ConfigError::InvalidField { .. })
        ));
    }

    #[test]
    fn serde_round_trips_losslessly() {
        let mut cfg = dispatchable();
        cfg.method_args = vec![
            MethodArgument::new("java.lang.String", "a"),
            MethodArgument::new("int", "2"),
        ];
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ConfigModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn apply_provider_populates_consumer_fields() {
        let url = EndpointUrl::parse(
            "hessian://10.0.0.7:8080/com.example.FooService?group=g1&version=1.2&timeout=900&methods=bar",
        )
        .unwrap();
        let provider = ProviderDescriptor::from(url);
        let mut cfg = ConfigModel::default();
        cfg.apply_provider(&provider);
        assert_eq!(cfg.interface_name, "com.example.FooService");
        assert_eq!(cfg.group, "g1");
        assert_eq!(cfg.version, "1.2");
        assert_eq!(cfg.rpc_protocol, RpcProtocol::Hessian);
        assert_eq!(cfg.timeout_ms, 900);
    }
}
