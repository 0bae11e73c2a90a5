//! Transport-agnostic RPC envelope.
//!
//! Every call is a [`Request`] carrying one [`RpcRequest`] variant plus
//! [`Metadata`]; every successful answer a [`Response`] carrying the
//! matching [`RpcResponse`] variant. Transports only need to move these
//! values around; the servicers and the authentication interceptor never
//! see anything transport specific.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::driver::{
    CreateRunRequest, CreateRunResponse, GetNodesRequest, GetNodesResponse, PullTaskResRequest,
    PullTaskResResponse, PushTaskInsRequest, PushTaskInsResponse,
};
use super::fleet::{
    CreateNodeRequest, CreateNodeResponse, DeleteNodeRequest, DeleteNodeResponse,
    PullTaskInsRequest, PullTaskInsResponse, PushTaskResRequest, PushTaskResResponse,
};
use crate::error::Status;

/// Metadata key carrying the caller's base64url-encoded public key.
pub const PUBLIC_KEY_HEADER: &str = "public-key";

/// Metadata key carrying the base64url-encoded HMAC of the request body.
pub const AUTH_TOKEN_HEADER: &str = "auth-token";

/// Request or response metadata: lower-case keys to string values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` (lower-cased) to `value`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries
            .insert(key.into().to_ascii_lowercase(), value.into())
    }

    /// Looks up `key` case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies every entry of `other` into `self`.
    pub fn extend(&mut self, other: Metadata) {
        self.entries.extend(other.entries);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

/// An RPC message plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Request<T> {
    metadata: Metadata,
    message: T,
}

impl<T> Request<T> {
    /// Wraps `message` with empty metadata.
    pub fn new(message: T) -> Self {
        Self {
            metadata: Metadata::new(),
            message,
        }
    }

    /// Replaces the metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The request metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to the request metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The message.
    pub fn get_ref(&self) -> &T {
        &self.message
    }

    /// Consumes the request, returning the message.
    pub fn into_inner(self) -> T {
        self.message
    }

    /// Splits into metadata and message.
    pub fn into_parts(self) -> (Metadata, T) {
        (self.metadata, self.message)
    }

    /// Maps the message, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Request<U> {
        Request {
            metadata: self.metadata,
            message: f(self.message),
        }
    }
}

/// An RPC answer plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    metadata: Metadata,
    message: T,
}

impl<T> Response<T> {
    /// Wraps `message` with empty metadata.
    pub fn new(message: T) -> Self {
        Self {
            metadata: Metadata::new(),
            message,
        }
    }

    /// Replaces the metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The response metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to the response metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The message.
    pub fn get_ref(&self) -> &T {
        &self.message
    }

    /// Consumes the response, returning the message.
    pub fn into_inner(self) -> T {
        self.message
    }

    /// Splits into metadata and message.
    pub fn into_parts(self) -> (Metadata, T) {
        (self.metadata, self.message)
    }

    /// Maps the message, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            metadata: self.metadata,
            message: f(self.message),
        }
    }
}

/// The two RPC surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Node-facing API.
    Fleet,
    /// Driver-facing API.
    Driver,
}

impl Service {
    /// Path segment used by the HTTP transport.
    pub fn name(self) -> &'static str {
        match self {
            Self::Fleet => "Fleet",
            Self::Driver => "Driver",
        }
    }
}

macro_rules! rpc_methods {
    ($( $service:ident :: $method:ident ( $req:ty ) -> $res:ty ; )+) => {
        /// Every RPC method of both APIs.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RpcKind {
            $(
                #[doc = concat!("`", stringify!($service), "/", stringify!($method), "`")]
                $method,
            )+
        }

        impl RpcKind {
            /// All methods.
            pub const ALL: &'static [RpcKind] = &[$(RpcKind::$method),+];

            /// The API serving this method.
            pub fn service(self) -> Service {
                match self {
                    $(Self::$method => Service::$service,)+
                }
            }

            /// The method name, e.g. `"PullTaskIns"`.
            pub fn method(self) -> &'static str {
                match self {
                    $(Self::$method => stringify!($method),)+
                }
            }
        }

        /// A request of any kind.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind", content = "message")]
        pub enum RpcRequest {
            $(
                #[doc = concat!("`", stringify!($method), "` request.")]
                $method($req),
            )+
        }

        impl RpcRequest {
            /// The method this request is for.
            pub fn kind(&self) -> RpcKind {
                match self {
                    $(Self::$method(_) => RpcKind::$method,)+
                }
            }

            /// Deterministic serialization of the inner message. The
            /// authentication token is an HMAC over exactly these bytes.
            pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
                match self {
                    $(Self::$method(message) => serde_json::to_vec(message),)+
                }
            }

            /// Decodes the inner message of a `kind` request.
            pub fn from_json(kind: RpcKind, body: &[u8]) -> Result<Self, serde_json::Error> {
                match kind {
                    $(RpcKind::$method => serde_json::from_slice(body).map(Self::$method),)+
                }
            }
        }

        /// A response of any kind.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind", content = "message")]
        pub enum RpcResponse {
            $(
                #[doc = concat!("`", stringify!($method), "` response.")]
                $method($res),
            )+
        }

        impl RpcResponse {
            /// The method this response answers.
            pub fn kind(&self) -> RpcKind {
                match self {
                    $(Self::$method(_) => RpcKind::$method,)+
                }
            }

            /// Serializes the inner message.
            pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
                match self {
                    $(Self::$method(message) => serde_json::to_vec(message),)+
                }
            }

            /// Decodes the inner message of a `kind` response.
            pub fn from_json(kind: RpcKind, body: &[u8]) -> Result<Self, serde_json::Error> {
                match kind {
                    $(RpcKind::$method => serde_json::from_slice(body).map(Self::$method),)+
                }
            }
        }

        $(
            impl From<$req> for RpcRequest {
                fn from(message: $req) -> Self {
                    Self::$method(message)
                }
            }

            impl From<$res> for RpcResponse {
                fn from(message: $res) -> Self {
                    Self::$method(message)
                }
            }

            impl TryFrom<RpcResponse> for $res {
                type Error = Status;

                fn try_from(response: RpcResponse) -> Result<Self, Status> {
                    match response {
                        RpcResponse::$method(message) => Ok(message),
                        other => Err(Status::internal(format!(
                            "expected {} response, got {}",
                            stringify!($method),
                            other.kind()
                        ))),
                    }
                }
            }
        )+
    };
}

rpc_methods! {
    Fleet::CreateNode(CreateNodeRequest) -> CreateNodeResponse;
    Fleet::DeleteNode(DeleteNodeRequest) -> DeleteNodeResponse;
    Fleet::PullTaskIns(PullTaskInsRequest) -> PullTaskInsResponse;
    Fleet::PushTaskRes(PushTaskResRequest) -> PushTaskResResponse;
    Driver::CreateRun(CreateRunRequest) -> CreateRunResponse;
    Driver::GetNodes(GetNodesRequest) -> GetNodesResponse;
    Driver::PushTaskIns(PushTaskInsRequest) -> PushTaskInsResponse;
    Driver::PullTaskRes(PullTaskResRequest) -> PullTaskResResponse;
}

impl RpcKind {
    /// The HTTP path, e.g. `"/Fleet/PullTaskIns"`.
    pub fn path(self) -> String {
        format!("/{}/{}", self.service().name(), self.method())
    }

    /// Looks up a method by service and method name.
    pub fn from_names(service: &str, method: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.service().name() == service && kind.method() == method)
    }

    /// Whether calls of this kind must carry an HMAC `auth-token`.
    pub fn is_signed(self) -> bool {
        matches!(self, Self::DeleteNode | Self::PullTaskIns | Self::PushTaskRes)
    }
}

impl fmt::Display for RpcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service().name(), self.method())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetbroker_state::{Node, Task, TaskIns};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn metadata_keys_are_case_insensitive() {
        let mut metadata = Metadata::new();
        metadata.insert("Public-Key", "abc");
        assert_eq!(metadata.get("public-key"), Some("abc"));
        assert_eq!(metadata.get("PUBLIC-KEY"), Some("abc"));
        assert_eq!(metadata.remove("public-KEY"), Some("abc".to_string()));
        assert!(metadata.is_empty());
    }

    #[test]
    fn kinds_map_to_paths() {
        assert_eq!(RpcKind::PullTaskIns.path(), "/Fleet/PullTaskIns");
        assert_eq!(RpcKind::CreateRun.path(), "/Driver/CreateRun");
        assert_eq!(
            RpcKind::from_names("Driver", "PushTaskIns"),
            Some(RpcKind::PushTaskIns)
        );
        assert_eq!(RpcKind::from_names("Fleet", "PushTaskIns"), None);
        assert_eq!(RpcKind::ALL.len(), 8);
    }

    #[test]
    fn canonical_bytes_survive_a_json_round_trip() {
        let ins = TaskIns::new(
            3,
            Task::new(Node::new(4)).with_payload(json!({"z": 1.1, "a": [0.1, 2e-9]})),
        );
        let request = RpcRequest::from(PushTaskInsRequest {
            task_ins_list: vec![ins],
        });
        let bytes = request.to_canonical_bytes().unwrap();

        let decoded = RpcRequest::from_json(RpcKind::PushTaskIns, &bytes).unwrap();
        assert_eq!(decoded.to_canonical_bytes().unwrap(), bytes);
    }

    #[test]
    fn response_conversion_checks_the_kind() {
        let response = RpcResponse::from(CreateRunResponse { run_id: 9 });
        assert_eq!(CreateRunResponse::try_from(response.clone()).unwrap().run_id, 9);

        let err = GetNodesResponse::try_from(response).unwrap_err();
        assert_eq!(err.code, crate::error::Code::Internal);
    }
}
