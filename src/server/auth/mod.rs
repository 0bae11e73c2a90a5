//! Server-side authentication.
//!
//! Nodes identify themselves with an X25519 public key that the broker
//! has been told to trust, and sign state-changing calls with an HMAC
//! under the key they share with the broker. See
//! [`AuthenticationInterceptor`] for the exact rules.

pub mod interceptor;

pub use interceptor::{AuthenticationInterceptor, ACCESS_DENIED};
