//! Facade crate: re-exports the configuration model, discovery client and
//! invocation dispatcher under one roof.

pub use rpcmeter_client::*;
pub use rpcmeter_protocol::*;
