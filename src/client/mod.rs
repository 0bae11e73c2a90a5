//! The client side: the driver and node-side request signing.

pub mod auth;
pub mod connection;
pub mod driver;
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http;

pub use auth::ClientAuth;
pub use connection::{DriverConnection, DriverConnector, InProcessConnection, InProcessConnector};
pub use driver::{default_invoker, Driver};
#[cfg(feature = "http")]
pub use http::{HttpConnection, HttpConnector};
