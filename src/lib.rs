//! # fleetbroker
//!
//! A task-distribution broker for fleets of compute nodes.
//!
//! A *driver* schedules task instructions for nodes and collects their
//! results; *nodes* pull instructions and push results back. The broker
//! in between keeps every task in a [`State`](fleetbroker_state::State)
//! and serves two RPC APIs:
//!
//! - the driver-facing API (`CreateRun`, `GetNodes`, `PushTaskIns`,
//!   `PullTaskRes`), see [`server::DriverServicer`];
//! - the node-facing API (`CreateNode`, `DeleteNode`, `PullTaskIns`,
//!   `PushTaskRes`), see [`server::FleetServicer`], optionally behind
//!   [`server::AuthenticationInterceptor`].
//!
//! [`client::Driver`] is the driver-side client. It connects lazily,
//! creates its run once and retries calls that fail with
//! [`Code::Unavailable`](error::Code::Unavailable) using a
//! [`RetryInvoker`](shared::retry::RetryInvoker).
//!
//! # Module Organization
//!
//! - [`types`] - RPC messages and the request/response envelope
//! - [`server`] - Servicers, authentication and transports
//! - [`client`] - The driver client and node-side signing
//! - [`shared`] - Crypto primitives and the retry invoker
//! - [`config`] - TOML and environment configuration
//! - [`error`] - [`Error`], [`Status`] and [`Code`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use fleetbroker::client::{Driver, InProcessConnector};
//! use fleetbroker::server::Broker;
//! use fleetbroker::types::{Node, Task, TaskIns};
//! use fleetbroker::state::InMemoryState;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let broker = Broker::new(Arc::new(InMemoryState::in_memory()));
//! let driver = Driver::new(InProcessConnector::driver(broker.driver_servicer()));
//!
//! let ids = driver
//!     .push_task_ins(vec![TaskIns::new(0, Task::new(Node::new(7)))])
//!     .await
//!     .unwrap();
//! assert!(ids[0].is_some());
//! # });
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;
pub mod server;
pub mod shared;
pub mod types;

pub use error::{Code, Error, Result, Status};
pub use fleetbroker_state as state;
