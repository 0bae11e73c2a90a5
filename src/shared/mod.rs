//! Building blocks shared by the server and the driver client.

pub mod crypto;
pub mod retry;

pub use crypto::KeyPair;
pub use retry::{Jitter, RetryInvoker, RetryState, WaitStrategy};
