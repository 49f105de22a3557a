pub mod codec;
pub mod config;
pub mod error;
pub mod url;

pub use config::*;
pub use error::*;
pub use url::*;
