use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use rpcmeter::{
    CallRequest, ConfigModel, DiscoveryError, DispatchErrorKind, EndpointUrl, RegistryLookup,
    RegistryProtocol, RpcProtocol, Session, Transport, TransportFactory, TransportFault,
};

/// One zookeeper-ish namespace: known addresses answer with a fixed provider
/// set, `bad:*` addresses refuse the connection.
struct FixtureLookup;

impl RegistryLookup for FixtureLookup {
    fn fetch(
        &self,
        _protocol: RegistryProtocol,
        address: &str,
        group: &str,
    ) -> Result<Vec<EndpointUrl>, DiscoveryError> {
        if address.starts_with("bad") {
            return Err(DiscoveryError::Unreachable {
                address: address.to_owned(),
                reason: "connection refused".to_owned(),
            });
        }
        let urls = vec![
            EndpointUrl::parse(&format!(
                "dubbo://10.0.0.7:20880/com.example.FooService?group={}&version=1.0&methods=bar,baz&timeout=900",
                group
            ))
            .unwrap(),
            EndpointUrl::parse(
                "hessian://10.0.0.8:8080/com.example.OtherService?methods=ping",
            )
            .unwrap(),
        ];
        Ok(urls)
    }
}

struct EchoFactory {
    calls: Arc<AtomicUsize>,
}

impl TransportFactory for EchoFactory {
    fn protocol(&self) -> RpcProtocol {
        RpcProtocol::Dubbo
    }

    fn connect(&self, _endpoint: &EndpointUrl) -> Result<Box<dyn Transport>, TransportFault> {
        Ok(Box::new(EchoTransport {
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct EchoTransport {
    calls: Arc<AtomicUsize>,
}

impl Transport for EchoTransport {
    fn invoke(&self, request: &CallRequest, _timeout: Duration) -> Result<Value, TransportFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!(request.method))
    }
}

#[test]
fn discover_select_populate_then_dispatch() {
    let mut session = Session::new(Box::new(FixtureLookup));
    let calls = Arc::new(AtomicUsize::new(0));
    session.register_transport(Arc::new(EchoFactory {
        calls: Arc::clone(&calls),
    }));

    // step 1: explicit discovery
    let providers = session
        .discover_providers(RegistryProtocol::Zookeeper, "zk1:2181", "g1")
        .unwrap();
    assert_eq!(providers.len(), 2);

    // step 2: the caller selects an interface and lists its methods
    let methods = session.resolve_methods(&providers, "com.example.FooService", "g1", "1.0");
    assert_eq!(methods, vec!["bar".to_owned(), "baz".to_owned()]);

    // step 3: populate the config from the chosen provider and dispatch
    let provider = providers
        .iter()
        .find(|p| p.service_interface == "com.example.FooService")
        .unwrap();
    let mut cfg = ConfigModel {
        registry_protocol: RegistryProtocol::Zookeeper,
        address: "zk1:2181".to_owned(),
        registry_group: "g1".to_owned(),
        method_name: "bar".to_owned(),
        ..Default::default()
    };
    cfg.apply_provider(provider);
    assert_eq!(cfg.interface_name, "com.example.FooService");
    assert_eq!(cfg.group, "g1");
    assert_eq!(cfg.version, "1.0");
    assert_eq!(cfg.timeout_ms, 900);
    assert_eq!(cfg.rpc_protocol, RpcProtocol::Dubbo);

    let outcome = session.dispatch(&cfg).unwrap();
    assert_eq!(outcome.value, Some(json!("bar")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unreachable_registry_keeps_other_cached_lists() {
    let mut session = Session::new(Box::new(FixtureLookup));
    session
        .discover_providers(RegistryProtocol::Zookeeper, "zk1:2181", "g1")
        .unwrap();
    assert!(session.cached_providers("zk1:2181", "g1").is_some());

    let err = session
        .discover_providers(RegistryProtocol::Zookeeper, "bad:2181", "g1")
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Unreachable { .. }));

    // the earlier list survives the failed round-trip
    assert_eq!(session.cached_providers("zk1:2181", "g1").unwrap().len(), 2);
    assert!(session.cached_providers("bad:2181", "g1").is_none());
}

#[test]
fn address_edit_invalidates_only_that_cache_entry() {
    let mut session = Session::new(Box::new(FixtureLookup));
    session
        .discover_providers(RegistryProtocol::Zookeeper, "zk1:2181", "g1")
        .unwrap();
    session
        .discover_providers(RegistryProtocol::Zookeeper, "zk2:2181", "g1")
        .unwrap();

    session.invalidate_address("zk1:2181");
    assert!(session.cached_providers("zk1:2181", "g1").is_none());
    assert!(session.cached_providers("zk2:2181", "g1").is_some());
}

#[test]
fn dispatch_fails_resolution_when_no_provider_matches() {
    let mut session = Session::new(Box::new(FixtureLookup));
    let calls = Arc::new(AtomicUsize::new(0));
    session.register_transport(Arc::new(EchoFactory {
        calls: Arc::clone(&calls),
    }));

    let cfg = ConfigModel {
        registry_protocol: RegistryProtocol::Zookeeper,
        address: "zk1:2181".to_owned(),
        registry_group: "g1".to_owned(),
        interface_name: "com.example.MissingService".to_owned(),
        method_name: "bar".to_owned(),
        ..Default::default()
    };

    let err = session.dispatch(&cfg).unwrap_err();
    assert_eq!(err.kind, DispatchErrorKind::ResolutionFailed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn no_methods_found_is_an_empty_result_not_an_error() {
    let mut session = Session::new(Box::new(FixtureLookup));
    let providers = session
        .discover_providers(RegistryProtocol::Zookeeper, "zk1:2181", "g1")
        .unwrap();
    let methods = session.resolve_methods(&providers, "com.example.NoSuch", "", "");
    assert!(methods.is_empty());
}
