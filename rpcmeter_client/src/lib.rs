pub mod discovery;
pub mod dispatch;
pub mod pool;
pub mod selector;
pub mod session;
pub mod transport;

pub use discovery::*;
pub use dispatch::*;
pub use pool::*;
pub use selector::*;
pub use session::*;
pub use transport::*;
