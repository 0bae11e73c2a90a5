//! Connections from a driver to the broker.
//!
//! A [`DriverConnector`] opens [`DriverConnection`]s; a connection moves
//! one [`Request`] to the broker and brings back its [`Response`]. The
//! [`Driver`](super::Driver) adds sessions, typed calls and retries on
//! top.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::server::{DriverServicer, UnaryService};
use crate::types::{Request, Response, RpcRequest, RpcResponse};

/// An open channel to the broker.
#[async_trait]
pub trait DriverConnection: Send + Sync {
    /// Performs one call.
    ///
    /// Failures to reach the broker are [`Error::Transport`]; answers with
    /// a non-OK status are [`Error::Status`].
    async fn call(&self, request: Request<RpcRequest>) -> Result<Response<RpcResponse>>;

    /// Releases the channel. [`Driver::disconnect`](super::Driver::disconnect)
    /// calls this; dropping the driver does not. The default does nothing.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens connections to the broker.
#[async_trait]
pub trait DriverConnector: Send + Sync {
    /// The connection type produced.
    type Connection: DriverConnection;

    /// Opens a connection.
    async fn connect(&self) -> Result<Self::Connection>;
}

/// Connects a driver directly to a service in the same process.
#[derive(Clone)]
pub struct InProcessConnector {
    service: Arc<dyn UnaryService>,
}

impl InProcessConnector {
    /// Connects to `service`.
    pub fn new(service: Arc<dyn UnaryService>) -> Self {
        Self { service }
    }

    /// Connects to a [`DriverServicer`].
    pub fn driver(servicer: DriverServicer) -> Self {
        Self::new(Arc::new(servicer))
    }
}

impl std::fmt::Debug for InProcessConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessConnector").finish_non_exhaustive()
    }
}

/// Connection produced by [`InProcessConnector`].
#[derive(Clone)]
pub struct InProcessConnection {
    service: Arc<dyn UnaryService>,
}

#[async_trait]
impl DriverConnection for InProcessConnection {
    async fn call(&self, request: Request<RpcRequest>) -> Result<Response<RpcResponse>> {
        self.service.call(request).await.map_err(Error::Status)
    }
}

#[async_trait]
impl DriverConnector for InProcessConnector {
    type Connection = InProcessConnection;

    async fn connect(&self) -> Result<InProcessConnection> {
        Ok(InProcessConnection {
            service: Arc::clone(&self.service),
        })
    }
}
