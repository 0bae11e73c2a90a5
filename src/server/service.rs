//! The unary call seam shared by servicers, interceptors and transports.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Status;
use crate::types::{Request, Response, RpcKind, RpcRequest, RpcResponse, Service};

/// Something that answers one RPC at a time.
///
/// Servicers implement it, interceptors implement it by wrapping another
/// service, and transports drive it.
#[async_trait]
pub trait UnaryService: Send + Sync {
    /// Handles one call.
    async fn call(&self, request: Request<RpcRequest>) -> Result<Response<RpcResponse>, Status>;
}

#[async_trait]
impl<S: UnaryService + ?Sized> UnaryService for Arc<S> {
    async fn call(&self, request: Request<RpcRequest>) -> Result<Response<RpcResponse>, Status> {
        (**self).call(request).await
    }
}

#[async_trait]
impl<S: UnaryService + ?Sized> UnaryService for Box<S> {
    async fn call(&self, request: Request<RpcRequest>) -> Result<Response<RpcResponse>, Status> {
        (**self).call(request).await
    }
}

pub(crate) fn unimplemented(kind: RpcKind, service: Service) -> Status {
    Status::unimplemented(format!("{kind} is not served by the {} API", service.name()))
}
