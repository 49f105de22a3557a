use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use rpcmeter_protocol::{EndpointUrl, RpcProtocol};

/// One materialized call, ready for a transport to put on the wire.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub service_interface: String,
    pub method: String,
    /// Positional arguments, already typed by the codec.
    pub args: Vec<Value>,
    pub group: String,
    pub version: String,
}

/// What a single remote attempt can come back with. The dispatcher maps these
/// onto its error kinds and applies the cluster policy.
#[derive(Debug, Clone, Error)]
pub enum TransportFault {
    #[error("attempt timed out")]
    Timeout,
    #[error("remote exception: {0}")]
    Remote(String),
    #[error("transport error: {0}")]
    Io(String),
}

/// A connected channel to one provider. Supplied by the embedding
/// application per rpc protocol; this crate never implements a wire format.
///
/// `invoke` must honor `timeout` for the single attempt and report
/// [`TransportFault::Timeout`] when it elapses.
pub trait Transport: Send + Sync {
    fn invoke(&self, request: &CallRequest, timeout: Duration) -> Result<Value, TransportFault>;
}

/// Produces [`Transport`]s for the protocol it serves. Implementations may
/// pool or reuse underlying connections; the dispatcher separately bounds
/// concurrent invocations per endpoint.
pub trait TransportFactory: Send + Sync {
    fn protocol(&self) -> RpcProtocol;

    fn connect(&self, endpoint: &EndpointUrl) -> Result<Box<dyn Transport>, TransportFault>;
}
