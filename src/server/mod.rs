//! The broker side: servicers, authentication and transports.
//!
//! [`FleetServicer`] and [`DriverServicer`] implement the two APIs over a
//! shared [`State`]. [`AuthenticationInterceptor`] wraps the node-facing
//! one. All of them are [`UnaryService`]s, so any transport can drive
//! them; [`http`] is the one shipped with this crate.

pub mod auth;
pub mod driver;
pub mod fleet;
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http;
pub mod service;

use std::collections::HashSet;
use std::sync::Arc;

use fleetbroker_state::State;
use tracing::info;

pub use auth::{AuthenticationInterceptor, ACCESS_DENIED};
pub use driver::DriverServicer;
pub use fleet::FleetServicer;
pub use service::UnaryService;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::shared::crypto::KeyPair;

/// One state shared by the servicers of a broker.
#[derive(Clone)]
pub struct Broker {
    state: Arc<dyn State>,
}

impl Broker {
    /// A broker over `state`.
    pub fn new(state: Arc<dyn State>) -> Self {
        Self { state }
    }

    /// A broker over the state named by `config.database`.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let state = config.state_factory().state()?;
        info!(database = %config.database, "Broker state ready");
        Ok(Self::new(state))
    }

    /// The shared state.
    pub fn state(&self) -> &Arc<dyn State> {
        &self.state
    }

    /// The driver-facing servicer.
    pub fn driver_servicer(&self) -> DriverServicer {
        DriverServicer::new(Arc::clone(&self.state))
    }

    /// The node-facing servicer, unauthenticated.
    pub fn fleet_servicer(&self) -> FleetServicer {
        FleetServicer::new(Arc::clone(&self.state))
    }

    /// The node-facing servicer behind an [`AuthenticationInterceptor`]
    /// trusting `public_keys`.
    pub async fn authenticated_fleet_servicer(
        &self,
        key_pair: KeyPair,
        public_keys: &HashSet<Vec<u8>>,
    ) -> Result<AuthenticationInterceptor<FleetServicer>> {
        AuthenticationInterceptor::new(
            self.fleet_servicer(),
            Arc::clone(&self.state),
            key_pair,
            public_keys,
        )
        .await
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").finish_non_exhaustive()
    }
}

/// Serves both APIs over HTTP on the configured addresses.
///
/// The node-facing API is authenticated when `config` lists trusted
/// public keys.
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub async fn serve_http(config: &ServerConfig) -> Result<()> {
    use tokio::net::TcpListener;

    let broker = Broker::from_config(config)?;
    let trusted = config.trusted_public_keys()?;
    let driver_listener = TcpListener::bind(config.driver_address.as_str()).await?;
    let fleet_listener = TcpListener::bind(config.fleet_address.as_str()).await?;
    let driver = http::serve(driver_listener, broker.driver_servicer());

    if trusted.is_empty() {
        tokio::try_join!(driver, http::serve(fleet_listener, broker.fleet_servicer()))?;
    } else {
        let fleet = broker
            .authenticated_fleet_servicer(config.key_pair()?, &trusted)
            .await?;
        tokio::try_join!(driver, http::serve(fleet_listener, fleet))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CreateRunRequest, Request, RpcKind, RpcRequest};

    #[tokio::test]
    async fn servicers_share_one_state() {
        let broker = Broker::from_config(&ServerConfig::default()).unwrap();
        let response = broker
            .driver_servicer()
            .call(Request::new(RpcRequest::from(CreateRunRequest {})))
            .await
            .unwrap();
        assert_eq!(response.get_ref().kind(), RpcKind::CreateRun);

        let node = broker
            .fleet_servicer()
            .create_node(crate::types::CreateNodeRequest {})
            .await
            .unwrap()
            .node;
        assert!(broker.state().get_nodes().await.unwrap().contains(&node.node_id));
    }
}
