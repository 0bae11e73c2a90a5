//! Public-key and HMAC authentication for the node-facing API.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use fleetbroker_state::State;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, Status};
use crate::server::service::UnaryService;
use crate::shared::crypto::{self, KeyPair};
use crate::types::{
    Metadata, Request, Response, RpcKind, RpcRequest, RpcResponse, AUTH_TOKEN_HEADER,
    PUBLIC_KEY_HEADER,
};

/// Message of every authentication failure.
pub const ACCESS_DENIED: &str = "Access denied!";

fn access_denied(kind: RpcKind, reason: &str) -> Status {
    warn!(%kind, reason, "Rejected unauthenticated call");
    Status::unauthenticated(ACCESS_DENIED)
}

/// Gates a service behind public-key and HMAC checks.
///
/// For every call:
///
/// 1. the `public-key` metadata must decode to a trusted key;
/// 2. `CreateNode` is forwarded and the response gains a `public-key`
///    entry carrying the broker's own key;
/// 3. `DeleteNode`, `PullTaskIns` and `PushTaskRes` must also carry an
///    `auth-token` that is the HMAC of the request body under the key
///    shared between the caller and the broker;
/// 4. any other call is rejected.
///
/// The checks of concurrent calls are serialized by a per-instance lock;
/// the wrapped service runs after the lock is released.
pub struct AuthenticationInterceptor<S> {
    inner: S,
    state: Arc<dyn State>,
    key_pair: KeyPair,
    lock: Mutex<()>,
}

impl<S: UnaryService> AuthenticationInterceptor<S> {
    /// Wraps `inner`, trusting `public_keys` in addition to any keys
    /// already known to `state`.
    ///
    /// # Errors
    ///
    /// Fails if the keys cannot be stored.
    pub async fn new(
        inner: S,
        state: Arc<dyn State>,
        key_pair: KeyPair,
        public_keys: &HashSet<Vec<u8>>,
    ) -> Result<Self> {
        state.store_client_public_keys(public_keys).await?;
        let trusted = state.get_client_public_keys().await?.len();
        info!(trusted, "Client public keys stored");
        Ok(Self {
            inner,
            state,
            key_pair,
            lock: Mutex::new(()),
        })
    }

    /// The broker's key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Runs the checks for `request`, returning metadata to attach to the
    /// response on success.
    async fn authenticate(&self, request: &Request<RpcRequest>) -> std::result::Result<Metadata, Status> {
        let _guard = self.lock.lock().await;
        let kind = request.get_ref().kind();

        let public_key_bytes = request
            .metadata()
            .get(PUBLIC_KEY_HEADER)
            .ok_or_else(|| access_denied(kind, "missing public key"))
            .and_then(|value| {
                crypto::decode_base64(value).map_err(|_| access_denied(kind, "malformed public key"))
            })?;

        let trusted = self.state.get_client_public_keys().await?;
        if !trusted.contains(&public_key_bytes) {
            return Err(access_denied(kind, "unknown public key"));
        }

        match kind {
            RpcKind::CreateNode => {
                let mut metadata = Metadata::new();
                metadata.insert(
                    PUBLIC_KEY_HEADER,
                    crypto::encode_base64(&self.key_pair.public_bytes()),
                );
                Ok(metadata)
            },
            kind if kind.is_signed() => {
                self.verify_token(request, &public_key_bytes)?;
                Ok(Metadata::new())
            },
            _ => Err(access_denied(kind, "method not allowed")),
        }
    }

    fn verify_token(
        &self,
        request: &Request<RpcRequest>,
        public_key_bytes: &[u8],
    ) -> std::result::Result<(), Status> {
        let kind = request.get_ref().kind();
        let token = request
            .metadata()
            .get(AUTH_TOKEN_HEADER)
            .ok_or_else(|| access_denied(kind, "missing auth token"))
            .and_then(|value| {
                crypto::decode_base64(value).map_err(|_| access_denied(kind, "malformed auth token"))
            })?;
        let public_key = crypto::bytes_to_public_key(public_key_bytes)
            .map_err(|_| access_denied(kind, "unusable public key"))?;
        let shared_key = self
            .key_pair
            .shared_key(&public_key)
            .map_err(|_| access_denied(kind, "key agreement failed"))?;
        let body = request
            .get_ref()
            .to_canonical_bytes()
            .map_err(|e| Status::internal(e.to_string()))?;

        if crypto::verify_hmac(&shared_key, &body, &token) {
            Ok(())
        } else {
            Err(access_denied(kind, "hmac mismatch"))
        }
    }
}

#[async_trait]
impl<S: UnaryService> UnaryService for AuthenticationInterceptor<S> {
    async fn call(
        &self,
        request: Request<RpcRequest>,
    ) -> std::result::Result<Response<RpcResponse>, Status> {
        let extra = self.authenticate(&request).await?;
        let mut response = self.inner.call(request).await?;
        response.metadata_mut().extend(extra);
        Ok(response)
    }
}

impl<S> std::fmt::Debug for AuthenticationInterceptor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationInterceptor")
            .field("key_pair", &self.key_pair)
            .finish_non_exhaustive()
    }
}
