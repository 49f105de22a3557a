use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use strum_macros::Display;
use tracing::{debug, warn};

use rpcmeter_protocol::{
    ClusterPolicy, ConfigModel, DispatchError, DispatchErrorKind, EndpointUrl, InvokeMode,
    RegistryProtocol, RpcProtocol, codec,
};

use crate::discovery::{direct_endpoints, RegistryClient};
use crate::pool::ConnPool;
use crate::selector::{selector_for, Selector};
use crate::transport::{CallRequest, TransportFactory, TransportFault};

/// Per-invocation state machine. Terminal states carry the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DispatchPhase {
    Idle,
    Resolving,
    Invoking,
    Succeeded,
    Failed,
}

/// What a finished dispatch hands back: the opaque return value (absent for
/// async and failsafe-swallowed calls) and the elapsed wall time.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    pub value: Option<Value>,
    pub elapsed: Duration,
}

/// Cancels a pending dispatch. Before the invoking phase the abort is clean;
/// once a call is in flight it is best-effort, but a cancelled dispatch is
/// never retried.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Applies a validated [`ConfigModel`] to perform one timed, retryable call:
/// resolve providers, materialize arguments, then invoke under the configured
/// cluster policy.
pub struct Dispatcher {
    transports: HashMap<RpcProtocol, Arc<dyn TransportFactory>>,
    pools: HashMap<String, Arc<ConnPool>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            transports: HashMap::new(),
            pools: HashMap::new(),
        }
    }

    pub fn register_transport(&mut self, factory: Arc<dyn TransportFactory>) {
        self.transports.insert(factory.protocol(), factory);
    }

    pub fn dispatch(
        &mut self,
        registry: &mut RegistryClient,
        cfg: &ConfigModel,
    ) -> Result<InvocationOutcome, DispatchError> {
        self.dispatch_cancellable(registry, cfg, &CancelToken::new())
    }

    pub fn dispatch_cancellable(
        &mut self,
        registry: &mut RegistryClient,
        cfg: &ConfigModel,
        cancel: &CancelToken,
    ) -> Result<InvocationOutcome, DispatchError> {
        let started = Instant::now();

        cfg.validate().map_err(|err| {
            let kind = match err {
                rpcmeter_protocol::ConfigError::InvalidArgumentType(_) => {
                    DispatchErrorKind::ArgumentMismatch
                }
                _ => DispatchErrorKind::ResolutionFailed,
            };
            DispatchError::new(kind, err.to_string())
        })?;
        if cancel.is_cancelled() {
            return Err(cancelled("before resolving"));
        }

        debug!(
            phase = %DispatchPhase::Resolving,
            interface = %cfg.interface_name,
            method = %cfg.method_name,
            "dispatch"
        );
        let endpoints = resolve_endpoints(registry, cfg)?;

        // arguments materialize before any network attempt; a failure here is
        // never retried
        let args = codec::encode(&cfg.method_args)
            .map_err(|err| DispatchError::new(DispatchErrorKind::ArgumentMismatch, err.to_string()))?;
        let request = CallRequest {
            service_interface: cfg.interface_name.clone(),
            method: cfg.method_name.clone(),
            args,
            group: cfg.group.clone(),
            version: cfg.version.clone(),
        };

        let factory = self.transports.get(&cfg.rpc_protocol).cloned().ok_or_else(|| {
            DispatchError::new(
                DispatchErrorKind::TransportError,
                format!("no transport registered for `{}`", cfg.rpc_protocol),
            )
        })?;

        if cancel.is_cancelled() {
            return Err(cancelled("before invoking"));
        }
        debug!(phase = %DispatchPhase::Invoking, cluster = %cfg.cluster, "dispatch");

        let mut selector = selector_for(cfg.loadbalance);
        let key = cfg.interface_key();
        let timeout = Duration::from_millis(cfg.timeout_ms);

        if cfg.invoke_mode == InvokeMode::Async {
            return self.invoke_detached(
                &factory,
                &endpoints,
                selector.as_mut(),
                &key,
                &request,
                timeout,
                cfg.connections,
                started,
            );
        }

        let result = match cfg.cluster {
            ClusterPolicy::Failfast => self.invoke_once(
                &factory, &endpoints, selector.as_mut(), &key, &request, timeout, cfg.connections,
            ),
            ClusterPolicy::Failback => {
                // recovery scheduling is out of scope; the immediate call is
                // failfast-equivalent
                debug!("failback: no recovery scheduled for this call");
                self.invoke_once(
                    &factory, &endpoints, selector.as_mut(), &key, &request, timeout,
                    cfg.connections,
                )
            }
            ClusterPolicy::Failsafe => {
                match self.invoke_once(
                    &factory, &endpoints, selector.as_mut(), &key, &request, timeout,
                    cfg.connections,
                ) {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        warn!(%err, "failsafe swallowed invocation failure");
                        return Ok(finish(None, started));
                    }
                }
            }
            ClusterPolicy::Failover => self.invoke_failover(
                &factory, &endpoints, selector.as_mut(), &key, &request, timeout, cfg, cancel,
            ),
            ClusterPolicy::Forking => self.invoke_forking(
                &factory, &endpoints, selector.as_mut(), &key, &request, timeout, cfg,
            ),
        };

        match result {
            Ok(value) => {
                debug!(phase = %DispatchPhase::Succeeded, elapsed_ms = started.elapsed().as_millis() as u64, "dispatch");
                Ok(finish(Some(value), started))
            }
            Err(err) => {
                debug!(phase = %DispatchPhase::Failed, %err, "dispatch");
                Err(err)
            }
        }
    }

    /// One attempt against one selected endpoint.
    fn invoke_once(
        &mut self,
        factory: &Arc<dyn TransportFactory>,
        endpoints: &[EndpointUrl],
        selector: &mut dyn Selector,
        key: &str,
        request: &CallRequest,
        timeout: Duration,
        connections: u32,
    ) -> Result<Value, DispatchError> {
        let idx = selector
            .select(endpoints, key)
            .ok_or_else(no_provider)?;
        let endpoint = &endpoints[idx];
        selector.on_start(endpoint);
        let result = self.attempt(factory, endpoint, request, timeout, connections);
        selector.on_complete(endpoint);
        result
    }

    /// Re-selects a provider for every extra attempt, up to `retries`.
    fn invoke_failover(
        &mut self,
        factory: &Arc<dyn TransportFactory>,
        endpoints: &[EndpointUrl],
        selector: &mut dyn Selector,
        key: &str,
        request: &CallRequest,
        timeout: Duration,
        cfg: &ConfigModel,
        cancel: &CancelToken,
    ) -> Result<Value, DispatchError> {
        let mut last: Option<DispatchError> = None;
        for attempt_no in 0..=cfg.retries {
            if cancel.is_cancelled() {
                return Err(cancelled("between attempts"));
            }
            match self.invoke_once(factory, endpoints, selector, key, request, timeout, cfg.connections) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(attempt = attempt_no + 1, %err, "failover attempt failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(no_provider))
    }

    /// retries+1 concurrent attempts; the first success wins and the
    /// remaining outstanding attempts are ignored.
    fn invoke_forking(
        &mut self,
        factory: &Arc<dyn TransportFactory>,
        endpoints: &[EndpointUrl],
        selector: &mut dyn Selector,
        key: &str,
        request: &CallRequest,
        timeout: Duration,
        cfg: &ConfigModel,
    ) -> Result<Value, DispatchError> {
        let forks = cfg.retries as usize + 1;
        let (tx, rx) = mpsc::channel::<Result<Value, TransportFault>>();

        for _ in 0..forks {
            let idx = selector.select(endpoints, key).ok_or_else(no_provider)?;
            let endpoint = endpoints[idx].clone();
            let pool = self.pool_for(&endpoint, cfg.connections);
            let factory = Arc::clone(factory);
            let request = request.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                let _permit = pool.acquire();
                let result = factory
                    .connect(&endpoint)
                    .and_then(|transport| transport.invoke(&request, timeout));
                // the receiver is gone once a winner was chosen
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut last: Option<DispatchError> = None;
        for result in rx.iter() {
            match result {
                Ok(value) => return Ok(value),
                Err(fault) => last = Some(fault_to_error(fault)),
            }
        }
        Err(last.unwrap_or_else(no_provider))
    }

    /// Async mode: issue the call on a detached thread and report success
    /// immediately; the remote outcome is never observed by the caller.
    #[allow(clippy::too_many_arguments)]
    fn invoke_detached(
        &mut self,
        factory: &Arc<dyn TransportFactory>,
        endpoints: &[EndpointUrl],
        selector: &mut dyn Selector,
        key: &str,
        request: &CallRequest,
        timeout: Duration,
        connections: u32,
        started: Instant,
    ) -> Result<InvocationOutcome, DispatchError> {
        let idx = selector.select(endpoints, key).ok_or_else(no_provider)?;
        let endpoint = endpoints[idx].clone();
        let pool = self.pool_for(&endpoint, connections);
        let factory = Arc::clone(factory);
        let request = request.clone();
        thread::spawn(move || {
            let _permit = pool.acquire();
            match factory
                .connect(&endpoint)
                .and_then(|transport| transport.invoke(&request, timeout))
            {
                Ok(_) => debug!("async invocation completed"),
                Err(err) => debug!(%err, "async invocation failed, unobserved by caller"),
            }
        });
        Ok(finish(None, started))
    }

    fn attempt(
        &mut self,
        factory: &Arc<dyn TransportFactory>,
        endpoint: &EndpointUrl,
        request: &CallRequest,
        timeout: Duration,
        connections: u32,
    ) -> Result<Value, DispatchError> {
        let pool = self.pool_for(endpoint, connections);
        let _permit = pool.acquire();
        let transport = factory.connect(endpoint).map_err(fault_to_error)?;
        transport.invoke(request, timeout).map_err(fault_to_error)
    }

    fn pool_for(&mut self, endpoint: &EndpointUrl, connections: u32) -> Arc<ConnPool> {
        let key = format!("{}://{}", endpoint.protocol, endpoint.authority());
        Arc::clone(
            self.pools
                .entry(key)
                .or_insert_with(|| ConnPool::new(connections)),
        )
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Candidate endpoints for the invocation: the session's cached discovery
/// result when present, a fresh lookup otherwise, or the direct peer list
/// when no registry is configured.
fn resolve_endpoints(
    registry: &mut RegistryClient,
    cfg: &ConfigModel,
) -> Result<Vec<EndpointUrl>, DispatchError> {
    if cfg.registry_protocol == RegistryProtocol::None {
        return direct_endpoints(&cfg.rpc_protocol.to_string(), &cfg.address)
            .map_err(|err| DispatchError::new(DispatchErrorKind::ResolutionFailed, err.to_string()));
    }

    let providers = match registry.cached(&cfg.address, &cfg.registry_group) {
        Some(cached) => cached.to_vec(),
        None => registry
            .list_providers(cfg.registry_protocol, &cfg.address, &cfg.registry_group)
            .map_err(|err| {
                DispatchError::new(DispatchErrorKind::ResolutionFailed, err.to_string())
            })?,
    };
    let endpoints: Vec<EndpointUrl> = providers
        .iter()
        .filter(|p| p.matches(&cfg.interface_name, &cfg.group, &cfg.version))
        .map(|p| p.url.clone())
        .collect();
    if endpoints.is_empty() {
        return Err(DispatchError::new(
            DispatchErrorKind::ResolutionFailed,
            format!("no provider matches `{}`", cfg.interface_key()),
        ));
    }
    Ok(endpoints)
}

fn finish(value: Option<Value>, started: Instant) -> InvocationOutcome {
    InvocationOutcome {
        value,
        elapsed: started.elapsed(),
    }
}

fn fault_to_error(fault: TransportFault) -> DispatchError {
    let kind = match fault {
        TransportFault::Timeout => DispatchErrorKind::Timeout,
        TransportFault::Remote(_) => DispatchErrorKind::RemoteException,
        TransportFault::Io(_) => DispatchErrorKind::TransportError,
    };
    DispatchError::new(kind, fault.to_string())
}

fn no_provider() -> DispatchError {
    DispatchError::new(DispatchErrorKind::ResolutionFailed, "no provider available")
}

fn cancelled(stage: &str) -> DispatchError {
    DispatchError::new(
        DispatchErrorKind::Cancelled,
        format!("dispatch cancelled {}", stage),
    )
}
